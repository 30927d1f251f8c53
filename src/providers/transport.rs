//! Pooled HTTP client construction.
//!
//! Each provider builds exactly one [`reqwest::Client`] and reuses it for
//! every runner and every page, so keep-alive connections survive across
//! pagination loops and tile refreshes.

use reqwest::Client;

use crate::config::FetchDefaults;

/// Builds the client for one provider.
///
/// `skip_tls_verify` disables certificate validation and is meant for
/// development backends with self-signed certificates.
pub(crate) fn build_client(defaults: &FetchDefaults, skip_tls_verify: bool) -> reqwest::Result<Client> {
    Client::builder()
        .user_agent(defaults.user_agent.as_str())
        .timeout(defaults.request_timeout)
        .connect_timeout(defaults.connect_timeout)
        .pool_idle_timeout(defaults.pool_idle_timeout)
        .pool_max_idle_per_host(defaults.pool_max_idle_per_host)
        .tcp_keepalive(defaults.tcp_keepalive)
        .danger_accept_invalid_certs(skip_tls_verify)
        .build()
}
