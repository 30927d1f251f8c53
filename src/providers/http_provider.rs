//! HTTP provider and runner: single requests and the pagination loop.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, StatusCode};
use serde_json::{Map, Value};
use tracing::{debug, trace};
use url::Url;

use crate::cache::{Cache, TtlCache};
use crate::config::{AuthConfig, FetchDefaults, PageLocation, PageParams, ProviderConfig, RequestConfig};
use crate::context::Context;
use crate::fetcher::{NormalizedRequest, RequestSpec};
use crate::http::{Headers, Method};

use super::auth::apply_auth;
use super::pagination::{self, Window};
use super::transport::build_client;
use super::{Accumulator, FetchError, Fetched, Page, ProviderError, Runner};

const JSON_CONTENT_TYPE: &str = "application/json";

/// One configured upstream backend.
///
/// Owns the pooled HTTP client and the response cache; both are shared by
/// every runner compiled against this provider.
pub struct HttpProvider {
    name: String,
    base: Url,
    auth: AuthConfig,
    client: Client,
    cache: Arc<dyn Cache<Page>>,
    defaults: FetchDefaults,
}

impl fmt::Debug for HttpProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpProvider")
            .field("name", &self.name)
            .field("base", &self.base.as_str())
            .finish_non_exhaustive()
    }
}

impl HttpProvider {
    /// Builds a provider with its own client and an empty [`TtlCache`].
    ///
    /// # Errors
    ///
    /// [`ProviderError::MissingBaseUrl`], [`ProviderError::InvalidBaseUrl`],
    /// or [`ProviderError::Client`].
    pub fn new(
        name: impl Into<String>,
        config: &ProviderConfig,
        defaults: &FetchDefaults,
    ) -> Result<Self, ProviderError> {
        let name = name.into();
        let raw = config.base_url.trim();
        if raw.is_empty() {
            return Err(ProviderError::MissingBaseUrl { name });
        }
        let base = match Url::parse(raw) {
            Ok(base) => base,
            Err(source) => return Err(ProviderError::InvalidBaseUrl { name, source }),
        };
        let client = match build_client(defaults, config.skip_tls_verify.unwrap_or(false)) {
            Ok(client) => client,
            Err(source) => return Err(ProviderError::Client { name, source }),
        };

        Ok(Self {
            name,
            base,
            auth: config.auth.clone(),
            client,
            cache: Arc::new(TtlCache::new()),
            defaults: defaults.clone(),
        })
    }

    /// Replaces the response cache.
    pub fn with_cache(mut self, cache: Arc<dyn Cache<Page>>) -> Self {
        self.cache = cache;
        self
    }

    /// The provider's registry name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The URL request paths are resolved against.
    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// The response cache shared by this provider's runners.
    pub fn cache(&self) -> &Arc<dyn Cache<Page>> {
        &self.cache
    }

    /// Compiles `request` into a runner bound to `provider`.
    ///
    /// Non-paginated requests are normalized here, once; the runner reuses
    /// the URL, body, and cache key on every call.
    ///
    /// # Errors
    ///
    /// [`ProviderError::InvalidMethod`], [`ProviderError::EncodeBody`], or
    /// [`ProviderError::Normalize`] for a non-paginated request whose target
    /// does not resolve.
    pub fn runner(provider: &Arc<Self>, request: &RequestConfig) -> Result<HttpRunner, ProviderError> {
        let method = Method::canonical(&request.method);
        let http_method = method.to_reqwest().ok_or_else(|| ProviderError::InvalidMethod {
            provider: provider.name.clone(),
            method: request.method.clone(),
        })?;

        let headers: Headers = request
            .headers
            .iter()
            .filter(|(k, v)| !k.is_empty() && !v.is_empty())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let initial_body = initial_body(&request.body, &request.body_json).map_err(|source| {
            ProviderError::EncodeBody {
                provider: provider.name.clone(),
                source,
            }
        })?;

        let mut runner = HttpRunner {
            provider: Arc::clone(provider),
            method,
            http_method,
            target: request.path.clone(),
            query: request.query.clone(),
            headers,
            body_json: request.body_json.clone(),
            initial_body,
            ttl: request.effective_ttl(&provider.defaults),
            mode: Mode::Paginated(request.page.clone()),
        };

        if !request.paginate {
            let prepared = runner
                .prepare(&runner.query, runner.initial_body.clone())
                .map_err(|source| ProviderError::Normalize {
                    provider: provider.name.clone(),
                    source,
                })?;
            runner.mode = Mode::Single(prepared);
        }

        Ok(runner)
    }
}

/// A body ready to send, tagged with whether it is JSON we produced.
#[derive(Debug, Clone, Default)]
struct Body {
    bytes: Bytes,
    json: bool,
}

impl Body {
    fn json(map: &Map<String, Value>) -> Result<Self, serde_json::Error> {
        Ok(Self {
            bytes: Bytes::from(serde_json::to_vec(map)?),
            json: true,
        })
    }
}

/// A raw body wins over a JSON template; neither means no body.
fn initial_body(raw: &str, json: &Map<String, Value>) -> Result<Body, serde_json::Error> {
    if !raw.trim().is_empty() {
        return Ok(Body {
            bytes: Bytes::from(raw.to_owned()),
            json: false,
        });
    }
    if !json.is_empty() {
        return Body::json(json);
    }
    Ok(Body::default())
}

/// One fully normalized request.
#[derive(Debug, Clone)]
struct Prepared {
    normalized: NormalizedRequest,
    headers: Headers,
    body: Bytes,
}

#[derive(Debug, Clone)]
enum Mode {
    Single(Prepared),
    Paginated(PageParams),
}

/// A request template bound to an [`HttpProvider`].
#[derive(Debug, Clone)]
pub struct HttpRunner {
    provider: Arc<HttpProvider>,
    method: Method,
    http_method: reqwest::Method,
    target: String,
    query: HashMap<String, String>,
    headers: Headers,
    body_json: Map<String, Value>,
    initial_body: Body,
    ttl: Duration,
    mode: Mode,
}

impl HttpRunner {
    /// Returns `true` if this runner walks pages.
    pub fn is_paginated(&self) -> bool {
        matches!(self.mode, Mode::Paginated(_))
    }

    /// The upstream-cache TTL of this runner's requests.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn prepare(
        &self,
        query: &HashMap<String, String>,
        body: Body,
    ) -> Result<Prepared, crate::fetcher::NormalizeError> {
        let mut headers = self.headers.clone();
        if body.json && !headers.contains("content-type") {
            headers.insert("Content-Type", JSON_CONTENT_TYPE);
        }

        let spec = RequestSpec {
            target: self.target.clone(),
            method: self.method.clone(),
            query: query.clone(),
            headers,
            body: body.bytes,
            cache_ttl: self.ttl,
        };
        let normalized = spec.normalize(&self.provider.base)?;

        Ok(Prepared {
            normalized,
            headers: spec.headers,
            body: spec.body,
        })
    }

    async fn run_paginated(&self, ctx: &Context, params: &PageParams) -> Result<Fetched, FetchError> {
        let mut acc = Accumulator::new();
        let mut status;
        let mut prev_start: Option<u64> = None;
        let mut last_limit = pagination::initial_limit(&self.query, &self.body_json, params)
            .unwrap_or(self.provider.defaults.default_page_limit);

        let mut query = self.query.clone();
        let mut body = self.initial_body.clone();

        loop {
            ctx.check()?;

            let prepared = self.prepare(&query, body.clone())?;
            let (page_status, page) = self.fetch_page(ctx, &prepared).await?;
            status = page_status;

            let current_start = pagination::as_count(page.get(&params.start_field));
            let next = pagination::next_window(params, &page, acc.page_count() + 1, last_limit);
            let added = acc.push_page(page);

            trace!(
                provider = %self.provider.name,
                page = acc.page_count(),
                start = current_start,
                added,
                "merged page"
            );

            if added == 0 || prev_start == Some(current_start) {
                debug!(
                    provider = %self.provider.name,
                    pages = acc.page_count(),
                    start = current_start,
                    added,
                    "pagination made no progress; stopping"
                );
                break;
            }
            prev_start = Some(current_start);

            let Some(window) = next else {
                break;
            };
            last_limit = window.limit;
            self.advance(params, window, &mut query, &mut body)?;
        }

        let pages = acc.page_count();
        debug!(provider = %self.provider.name, pages, "pagination complete");
        Ok(Fetched {
            accumulator: acc,
            pages,
            status,
        })
    }

    /// Writes `window` into the next request's query or body.
    fn advance(
        &self,
        params: &PageParams,
        window: Window,
        query: &mut HashMap<String, String>,
        body: &mut Body,
    ) -> Result<(), FetchError> {
        match params.location {
            PageLocation::Query => {
                *query = pagination::inject_query(&self.query, params, window);
            }
            PageLocation::Body => {
                let next = pagination::inject_body(&self.body_json, params, window);
                *body = Body::json(&next).map_err(FetchError::EncodeBody)?;
            }
        }
        Ok(())
    }

    /// Serves one request from cache or upstream, storing fresh responses.
    async fn fetch_page(&self, ctx: &Context, req: &Prepared) -> Result<(StatusCode, Page), FetchError> {
        let key = req.normalized.cache_key.as_str();
        let use_cache = !self.ttl.is_zero() && !ctx.is_no_cache();

        if use_cache {
            if let Some(page) = self.provider.cache.get(key) {
                trace!(provider = %self.provider.name, cache_key = key, "cache hit");
                return Ok((StatusCode::OK, page));
            }
        }

        let (status, page) = tokio::select! {
            biased;
            _ = ctx.cancelled() => return Err(FetchError::Cancelled),
            result = self.send(req) => result?,
        };

        if use_cache {
            self.provider.cache.set(key, page.clone(), self.ttl);
        }
        Ok((status, page))
    }

    async fn send(&self, req: &Prepared) -> Result<(StatusCode, Page), FetchError> {
        let url = &req.normalized.url;
        trace!(provider = %self.provider.name, method = %self.method, url = %url, "sending request");

        let mut builder = self
            .provider
            .client
            .request(self.http_method.clone(), url.clone());
        for (name, value) in req.headers.iter() {
            builder = builder.header(name, value);
        }
        builder = apply_auth(builder, &self.provider.auth);
        if !req.body.is_empty() {
            builder = builder.body(req.body.clone());
        }

        let response = builder.send().await.map_err(|source| FetchError::Transport {
            url: url.to_string(),
            source,
        })?;
        let status = response.status();
        let raw = response.bytes().await.map_err(|source| FetchError::ReadBody {
            url: url.to_string(),
            source,
        })?;

        if !status.is_success() {
            return Err(FetchError::Upstream {
                status,
                url: url.to_string(),
                body: snippet(&raw, self.provider.defaults.error_body_limit),
            });
        }

        let page = decode_page(&raw).map_err(|source| FetchError::Decode {
            url: url.to_string(),
            status,
            source,
        })?;
        Ok((status, page))
    }
}

#[async_trait]
impl Runner for HttpRunner {
    async fn run(&self, ctx: &Context) -> Result<Fetched, FetchError> {
        match &self.mode {
            Mode::Single(prepared) => {
                ctx.check()?;
                let (status, page) = self.fetch_page(ctx, prepared).await?;
                Ok(Fetched {
                    accumulator: Accumulator::from_page(page),
                    pages: 1,
                    status,
                })
            }
            Mode::Paginated(params) => self.run_paginated(ctx, params).await,
        }
    }
}

/// Decodes a response body into a JSON object; a blank body is `{}`.
///
/// Integers within the `i64`/`u64` range keep their exact value.
fn decode_page(raw: &[u8]) -> Result<Page, serde_json::Error> {
    if raw.iter().all(u8::is_ascii_whitespace) {
        return Ok(Page::new());
    }
    serde_json::from_slice(raw)
}

/// At most `limit` bytes of `raw` as text, cut on a character boundary.
fn snippet(raw: &[u8], limit: usize) -> String {
    let text = String::from_utf8_lossy(&raw[..raw.len().min(limit)]);
    let mut end = text.len().min(limit);
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_owned()
}
