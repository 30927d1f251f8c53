//! Upstream providers, compiled runners, and the pagination engine.
//!
//! ## Core types
//!
//! - [`Runner`]: the contract the render layer consumes: run once, get an
//!   [`Accumulator`] back.
//! - [`HttpProvider`]: one configured backend: base URL, credentials, a
//!   pooled client, and a response cache shared by all of its runners.
//! - [`HttpRunner`]: a request template bound to a provider, either a single
//!   pre-normalized request or a pagination loop.
//! - [`Registry`]: providers by (lower-cased) name; compiles request
//!   templates into runners.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;

use crate::config::{FetchDefaults, ProviderConfig, RequestConfig, TileConfig};
use crate::context::{Cancelled, Context};
use crate::fetcher::NormalizeError;

pub mod accumulator;
mod auth;
mod http_provider;
pub mod pagination;
mod transport;

pub use accumulator::{Accumulator, Page};
pub use http_provider::{HttpProvider, HttpRunner};

/// What one successful [`Runner::run`] produced.
#[derive(Debug, Clone)]
pub struct Fetched {
    pub accumulator: Accumulator,
    /// Pages fetched (or served from cache) during this run.
    pub pages: usize,
    /// Status of the last upstream response; `200 OK` for cache hits.
    pub status: StatusCode,
}

/// Errors produced while executing a runner.
///
/// A failure on any page aborts the whole run; pages collected before the
/// failure are dropped.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("normalize request: {0}")]
    Normalize(#[from] NormalizeError),

    #[error("encode request body: {0}")]
    EncodeBody(#[source] serde_json::Error),

    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("read body from {url}: {source}")]
    ReadBody {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("upstream {status} from {url}: {body}")]
    Upstream {
        status: StatusCode,
        url: String,
        /// Response body, truncated to the provider's error snippet limit.
        body: String,
    },

    #[error("invalid JSON from {url}: {source}")]
    Decode {
        url: String,
        status: StatusCode,
        #[source]
        source: serde_json::Error,
    },

    #[error("fetch cancelled")]
    Cancelled,
}

impl FetchError {
    /// The upstream HTTP status, when the failure happened after a response
    /// arrived.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Upstream { status, .. } | Self::Decode { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<Cancelled> for FetchError {
    fn from(_: Cancelled) -> Self {
        Self::Cancelled
    }
}

/// Errors produced while building providers and compiling runners.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider {name:?}: missing baseURL")]
    MissingBaseUrl { name: String },

    #[error("provider {name:?}: invalid baseURL: {source}")]
    InvalidBaseUrl {
        name: String,
        #[source]
        source: url::ParseError,
    },

    #[error("provider {name:?}: build HTTP client: {source}")]
    Client {
        name: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("unknown provider {0:?}")]
    UnknownProvider(String),

    #[error("provider {provider:?}: invalid HTTP method {method:?}")]
    InvalidMethod { provider: String, method: String },

    #[error("provider {provider:?}: {source}")]
    Normalize {
        provider: String,
        #[source]
        source: NormalizeError,
    },

    #[error("provider {provider:?}: encode request body: {source}")]
    EncodeBody {
        provider: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("tile {index} ({title}): {source}")]
    Tile {
        index: usize,
        title: String,
        #[source]
        source: Box<ProviderError>,
    },
}

/// A compiled, ready-to-execute request.
///
/// Implementations must be cheap to call repeatedly and safe to call from
/// many tasks at once.
#[async_trait]
pub trait Runner: Send + Sync {
    /// Performs the request (and pagination, if enabled).
    async fn run(&self, ctx: &Context) -> Result<Fetched, FetchError>;
}

/// Providers keyed by trimmed, lower-cased name.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    providers: HashMap<String, Arc<HttpProvider>>,
}

impl Registry {
    /// Builds one [`HttpProvider`] per configured backend.
    ///
    /// # Errors
    ///
    /// Fails on the first provider with a missing or invalid base URL, or
    /// whose HTTP client cannot be built.
    pub fn build(
        configs: &HashMap<String, ProviderConfig>,
        defaults: &FetchDefaults,
    ) -> Result<Self, ProviderError> {
        let mut providers = HashMap::with_capacity(configs.len());
        for (name, config) in configs {
            let key = normalize_name(name);
            let provider = HttpProvider::new(key.clone(), config, defaults)?;
            providers.insert(key, Arc::new(provider));
        }
        Ok(Self { providers })
    }

    /// Adds (or replaces) a provider under its own name.
    pub fn insert(&mut self, provider: HttpProvider) {
        self.providers
            .insert(normalize_name(provider.name()), Arc::new(provider));
    }

    /// Looks a provider up by name, ignoring case and surrounding whitespace.
    pub fn get(&self, name: &str) -> Option<&Arc<HttpProvider>> {
        self.providers.get(&normalize_name(name))
    }

    /// Number of registered providers.
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Returns `true` if no providers are registered.
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Compiles `request` into a runner bound to its provider.
    ///
    /// # Errors
    ///
    /// [`ProviderError::UnknownProvider`] if the request names no registered
    /// provider, plus any error from [`HttpProvider::runner`].
    pub fn compile(&self, request: &RequestConfig) -> Result<HttpRunner, ProviderError> {
        let provider = self
            .get(&request.provider)
            .ok_or_else(|| ProviderError::UnknownProvider(request.provider.clone()))?;
        HttpProvider::runner(provider, request)
    }
}

/// Compiles one runner per tile, in tile order.
///
/// # Errors
///
/// The first compilation failure, wrapped in [`ProviderError::Tile`] with the
/// tile's index and title.
pub fn build_runners(
    registry: &Registry,
    tiles: &[TileConfig],
) -> Result<Vec<Arc<dyn Runner>>, ProviderError> {
    tiles
        .iter()
        .enumerate()
        .map(|(index, tile)| {
            registry
                .compile(&tile.request)
                .map(|runner| Arc::new(runner) as Arc<dyn Runner>)
                .map_err(|source| ProviderError::Tile {
                    index,
                    title: tile.title.clone(),
                    source: Box::new(source),
                })
        })
        .collect()
}

fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}
