//! Provider, request, and tile configuration.
//!
//! These types are deserialized by the host application (from YAML, TOML, or
//! anything serde reads) and handed to [`Registry::build`](crate::providers::Registry::build)
//! and [`build_runners`](crate::providers::build_runners). Field names follow
//! the camelCase keys of the dashboard configuration file.
//!
//! Loading and validating the file is the host's job; this module only
//! describes shapes and defaults.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Construction-time knobs shared by all providers of a registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchDefaults {
    /// Hard cap on one upstream request, connect to last body byte.
    pub request_timeout: Duration,
    /// TCP connect timeout.
    pub connect_timeout: Duration,
    /// How long an idle pooled connection is kept.
    pub pool_idle_timeout: Duration,
    /// Idle connections kept per upstream host.
    pub pool_max_idle_per_host: usize,
    /// TCP keep-alive interval for pooled connections.
    pub tcp_keepalive: Duration,
    /// `User-Agent` sent upstream.
    pub user_agent: String,
    /// TTL used by requests that do not set their own. Zero disables caching.
    pub default_ttl: Duration,
    /// Page size assumed when neither the response nor the request names one.
    pub default_page_limit: u64,
    /// Maximum number of upstream body bytes quoted in an error.
    pub error_body_limit: usize,
}

impl Default for FetchDefaults {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(15),
            connect_timeout: Duration::from_secs(10),
            pool_idle_timeout: Duration::from_secs(90),
            pool_max_idle_per_host: 10,
            tcp_keepalive: Duration::from_secs(60),
            user_agent: concat!("tilefetch/", env!("CARGO_PKG_VERSION")).to_owned(),
            default_ttl: Duration::ZERO,
            default_page_limit: 1,
            error_body_limit: 2048,
        }
    }
}

/// One upstream HTTP backend.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    #[serde(rename = "baseURL")]
    pub base_url: String,
    #[serde(rename = "skipTLSVerify", default)]
    pub skip_tls_verify: Option<bool>,
    #[serde(default)]
    pub auth: AuthConfig,
}

/// Provider-wide credentials. Basic wins when both are present.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub basic: Option<BasicAuth>,
    #[serde(default)]
    pub bearer: Option<BearerAuth>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BasicAuth {
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BearerAuth {
    pub token: String,
}

/// A request template bound to a provider by name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestConfig {
    pub provider: String,
    #[serde(default)]
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub query: HashMap<String, String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Raw body; wins over `body_json` when non-blank.
    #[serde(default)]
    pub body: String,
    #[serde(rename = "bodyJSON", default)]
    pub body_json: Map<String, Value>,
    /// Cache TTL; falls back to [`FetchDefaults::default_ttl`].
    #[serde(default, deserialize_with = "de_opt_duration", skip_serializing)]
    pub ttl: Option<Duration>,
    #[serde(default)]
    pub paginate: bool,
    #[serde(default)]
    pub page: PageParams,
}

/// Where pagination parameters are written on follow-up requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PageLocation {
    #[default]
    Query,
    Body,
}

impl<'de> Deserialize<'de> for PageLocation {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "query" => Ok(Self::Query),
            "body" => Ok(Self::Body),
            other => Err(de::Error::unknown_variant(other, &["query", "body"])),
        }
    }
}

/// How to read progress from a page and write the next window.
///
/// `start_field`, `limit_field`, and `total_field` name fields of the
/// response; `req_start` and `req_limit` name the request parameters (query
/// keys or body fields, per `location`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PageParams {
    pub location: PageLocation,
    pub start_field: String,
    pub limit_field: String,
    pub total_field: String,
    pub req_start: String,
    pub req_limit: String,
    /// Stop after this many pages; zero means unbounded.
    pub limit_pages: usize,
}

/// One dashboard tile: a title, a template name, and the request feeding it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TileConfig {
    #[serde(default)]
    pub title: String,
    pub template: String,
    pub request: RequestConfig,
}

impl RequestConfig {
    /// The request TTL, or `defaults.default_ttl` when unset.
    pub fn effective_ttl(&self, defaults: &FetchDefaults) -> Duration {
        self.ttl.unwrap_or(defaults.default_ttl)
    }
}

fn de_opt_duration<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    struct DurationVisitor;

    impl<'de> Visitor<'de> for DurationVisitor {
        type Value = Option<Duration>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("seconds as a number or a duration string such as \"90s\" or \"1m30s\"")
        }

        fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_some<D: Deserializer<'de>>(self, d: D) -> Result<Self::Value, D::Error> {
            d.deserialize_any(self)
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
            Ok(Some(Duration::from_secs(v)))
        }

        // Negative TTLs mean "do not cache".
        fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
            Ok(Some(Duration::from_secs(v.max(0).unsigned_abs())))
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
            Duration::try_from_secs_f64(v.max(0.0))
                .map(Some)
                .map_err(E::custom)
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
            parse_duration(v).map(Some).map_err(E::custom)
        }
    }

    deserializer.deserialize_option(DurationVisitor)
}

/// Errors from [`parse_duration`].
#[derive(Debug, Error)]
pub enum DurationError {
    #[error("empty duration")]
    Empty,

    #[error("invalid duration {input:?}: {source}")]
    Invalid {
        input: String,
        #[source]
        source: humantime::DurationError,
    },

    #[error("duration {input:?} out of range")]
    OutOfRange { input: String },
}

/// Parses durations such as `"250ms"`, `"30s"`, `"5m"`, `"1h"`, `"1m30s"`.
///
/// A bare number is read as seconds; a leading `-` yields zero. Unit
/// suffixes follow `humantime`.
pub fn parse_duration(raw: &str) -> Result<Duration, DurationError> {
    let s = raw.trim();
    if s.is_empty() {
        return Err(DurationError::Empty);
    }
    if let Some(rest) = s.strip_prefix('-') {
        parse_duration(rest)?;
        return Ok(Duration::ZERO);
    }
    if let Ok(secs) = s.parse::<f64>() {
        return Duration::try_from_secs_f64(secs).map_err(|_| DurationError::OutOfRange {
            input: raw.to_owned(),
        });
    }
    humantime::parse_duration(s).map_err(|source| DurationError::Invalid {
        input: raw.to_owned(),
        source,
    })
}
