//! Tile rendering with a per-tile output cache.
//!
//! [`TileRenderer`] sits in front of the upstream-response cache: within a
//! tile's TTL the same [`Rendered`] is returned without touching the runner
//! or the template engine at all. Each render carries a hash of its HTML so
//! pollers can detect changes without diffing markup.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use reqwest::StatusCode;
use serde_json::json;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{trace, warn};

use crate::config::{FetchDefaults, TileConfig};
use crate::context::Context;
use crate::hash::hex_digest;
use crate::providers::{FetchError, ProviderError, Registry, Runner, build_runners};
use crate::templates::{TemplateEngine, TemplateError};

/// Errors returned by [`TileRenderer::render_tile`].
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("invalid tile id {index}")]
    BadId { index: isize },

    #[error("tile {index} not found")]
    NotFound { index: isize },

    #[error("tile {index}: request failed: {source}")]
    Upstream {
        index: usize,
        #[source]
        source: FetchError,
    },

    #[error("tile {index}: {source}")]
    Template {
        index: usize,
        #[source]
        source: TemplateError,
    },
}

impl RenderError {
    /// The HTTP status a handler should answer with.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadId { .. } => StatusCode::BAD_REQUEST,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Upstream { .. } => StatusCode::BAD_GATEWAY,
            Self::Template { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Rendered tile HTML and its content hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub html: String,
    /// FNV-1a 64 of `html`, as 16 hex digits.
    pub hash: String,
}

/// One dashboard cell: a runner, a template, and a render TTL.
pub struct Tile {
    pub title: String,
    pub template: String,
    /// Zero disables render caching for this tile.
    pub ttl: Duration,
    pub runner: Arc<dyn Runner>,
}

impl fmt::Debug for Tile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tile")
            .field("title", &self.title)
            .field("template", &self.template)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
struct CachedTile {
    rendered: Rendered,
    expires_at: Instant,
}

/// Renders tiles by index, memoizing output per tile.
///
/// Safe to call concurrently. Two calls for the same tile racing on a cold
/// slot both run the fetch; the later store wins.
pub struct TileRenderer {
    tiles: Vec<Tile>,
    engine: Arc<dyn TemplateEngine>,
    slots: RwLock<Vec<Option<CachedTile>>>,
}

impl TileRenderer {
    /// Creates a renderer with one empty cache slot per tile.
    pub fn new(tiles: Vec<Tile>, engine: Arc<dyn TemplateEngine>) -> Self {
        let slots = RwLock::new(vec![None; tiles.len()]);
        Self {
            tiles,
            engine,
            slots,
        }
    }

    /// Compiles `configs` against `registry` and wraps the runners as tiles.
    ///
    /// Each tile's render TTL is its request TTL, or `defaults.default_ttl`.
    ///
    /// # Errors
    ///
    /// The first tile whose request fails to compile, as
    /// [`ProviderError::Tile`].
    pub fn from_configs(
        registry: &Registry,
        configs: &[TileConfig],
        defaults: &FetchDefaults,
        engine: Arc<dyn TemplateEngine>,
    ) -> Result<Self, ProviderError> {
        let runners = build_runners(registry, configs)?;
        let tiles = configs
            .iter()
            .zip(runners)
            .map(|(config, runner)| Tile {
                title: config.title.clone(),
                template: config.template.clone(),
                ttl: config.request.effective_ttl(defaults),
                runner,
            })
            .collect();
        Ok(Self::new(tiles, engine))
    }

    /// Number of tiles.
    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    /// Returns `true` if there are no tiles.
    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    /// The tile at `index`, if any.
    pub fn tile(&self, index: usize) -> Option<&Tile> {
        self.tiles.get(index)
    }

    /// Renders tile `index`, serving a cached render while it is fresh.
    ///
    /// Template variables: `title`, `index`, `data` (the merged arrays, else
    /// the first page), `pages` (page count), and `acc` (`{"merged", "pages"}`).
    ///
    /// Failures are never cached.
    ///
    /// # Errors
    ///
    /// [`RenderError::BadId`] for a negative index, [`RenderError::NotFound`]
    /// past the last tile, [`RenderError::Upstream`] when the runner fails,
    /// and [`RenderError::Template`] when the template does.
    pub async fn render_tile(&self, ctx: &Context, index: isize) -> Result<Rendered, RenderError> {
        let idx = usize::try_from(index).map_err(|_| RenderError::BadId { index })?;
        let tile = self.tiles.get(idx).ok_or(RenderError::NotFound { index })?;
        let caching = !tile.ttl.is_zero();

        if caching {
            if let Some(hit) = self.cached(idx) {
                trace!(index = idx, "render cache hit");
                return Ok(hit);
            }
        }

        let fetched = match tile.runner.run(ctx).await {
            Ok(fetched) => fetched,
            Err(source) => {
                warn!(index = idx, status = ?source.status(), error = %source, "tile fetch failed");
                return Err(RenderError::Upstream { index: idx, source });
            }
        };

        let context = json!({
            "title": tile.title,
            "index": idx,
            "data": fetched.accumulator.primary(),
            "pages": fetched.pages,
            "acc": fetched.accumulator.to_value(),
        });
        let html = match self.engine.render(&tile.template, &context) {
            Ok(html) => html,
            Err(source) => {
                warn!(index = idx, template = %tile.template, error = %source, "tile render failed");
                return Err(RenderError::Template { index: idx, source });
            }
        };

        let rendered = Rendered {
            hash: hex_digest(&html),
            html,
        };
        if caching {
            self.store(idx, rendered.clone(), tile.ttl);
        }
        Ok(rendered)
    }

    fn cached(&self, idx: usize) -> Option<Rendered> {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        slots
            .get(idx)?
            .as_ref()
            .filter(|entry| Instant::now() < entry.expires_at)
            .map(|entry| entry.rendered.clone())
    }

    fn store(&self, idx: usize, rendered: Rendered, ttl: Duration) {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(slot) = slots.get_mut(idx) {
            *slot = Some(CachedTile {
                rendered,
                expires_at: Instant::now() + ttl,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde_json::Value;

    use super::*;
    use crate::providers::{Accumulator, Fetched};
    use crate::templates::TeraEngine;

    /// Returns `{"items": [{"id": n}]}` on the n-th call.
    #[derive(Default)]
    struct CountingRunner {
        calls: AtomicUsize,
        fail: bool,
    }

    impl CountingRunner {
        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Runner for CountingRunner {
        async fn run(&self, _ctx: &Context) -> Result<Fetched, FetchError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail {
                return Err(FetchError::Upstream {
                    status: StatusCode::SERVICE_UNAVAILABLE,
                    url: "https://upstream.test/".into(),
                    body: "down".into(),
                });
            }
            let page = match json!({"items": [{"id": n}], "total": 1}) {
                Value::Object(map) => map,
                _ => unreachable!(),
            };
            Ok(Fetched {
                accumulator: Accumulator::from_page(page),
                pages: 1,
                status: StatusCode::OK,
            })
        }
    }

    fn engine() -> Arc<dyn TemplateEngine> {
        Arc::new(
            TeraEngine::from_raw([
                (
                    "items.txt",
                    "{{ title }}:{% for i in data.items %}{{ i.id }}{% endfor %}",
                ),
                ("meta.txt", "{{ index }}|{{ pages }}|{{ acc.pages | length }}|{{ acc.pages.0.total }}"),
            ])
            .unwrap(),
        )
    }

    fn renderer(runner: Arc<CountingRunner>, template: &str, ttl: Duration) -> TileRenderer {
        TileRenderer::new(
            vec![Tile {
                title: "Open".into(),
                template: template.into(),
                ttl,
                runner,
            }],
            engine(),
        )
    }

    // ── caching ───────────────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn ttl_memoizes_until_expiry() {
        let runner = Arc::new(CountingRunner::default());
        let r = renderer(runner.clone(), "items.txt", Duration::from_secs(30));
        let ctx = Context::new();

        let first = r.render_tile(&ctx, 0).await.unwrap();
        tokio::time::advance(Duration::from_secs(10)).await;
        let second = r.render_tile(&ctx, 0).await.unwrap();
        assert_eq!(runner.calls(), 1);
        assert_eq!(first, second);
        assert_eq!(first.html, "Open:1");

        tokio::time::advance(Duration::from_secs(21)).await;
        let third = r.render_tile(&ctx, 0).await.unwrap();
        assert_eq!(runner.calls(), 2);
        assert_eq!(third.html, "Open:2");
        assert_ne!(third.hash, first.hash);
    }

    #[tokio::test]
    async fn zero_ttl_renders_every_time() {
        let runner = Arc::new(CountingRunner::default());
        let r = renderer(runner.clone(), "items.txt", Duration::ZERO);
        let ctx = Context::new();

        r.render_tile(&ctx, 0).await.unwrap();
        r.render_tile(&ctx, 0).await.unwrap();
        assert_eq!(runner.calls(), 2);
    }

    #[tokio::test]
    async fn hash_is_digest_of_html() {
        let runner = Arc::new(CountingRunner::default());
        let r = renderer(runner, "items.txt", Duration::ZERO);
        let out = r.render_tile(&Context::new(), 0).await.unwrap();
        assert_eq!(out.hash, hex_digest("Open:1"));
        assert_eq!(out.hash.len(), 16);
    }

    #[tokio::test]
    async fn template_sees_index_pages_and_accumulator() {
        let runner = Arc::new(CountingRunner::default());
        let r = renderer(runner, "meta.txt", Duration::ZERO);
        let out = r.render_tile(&Context::new(), 0).await.unwrap();
        assert_eq!(out.html, "0|1|1|1");
    }

    // ── errors ────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn index_validation_skips_runner() {
        let runner = Arc::new(CountingRunner::default());
        let r = renderer(runner.clone(), "items.txt", Duration::from_secs(30));
        let ctx = Context::new();

        let bad = r.render_tile(&ctx, -1).await.unwrap_err();
        assert!(matches!(bad, RenderError::BadId { index: -1 }));
        assert_eq!(bad.status(), StatusCode::BAD_REQUEST);

        let missing = r.render_tile(&ctx, 1).await.unwrap_err();
        assert!(matches!(missing, RenderError::NotFound { index: 1 }));
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        assert_eq!(runner.calls(), 0);
    }

    #[tokio::test]
    async fn upstream_failure_is_not_cached() {
        let runner = Arc::new(CountingRunner::failing());
        let r = renderer(runner.clone(), "items.txt", Duration::from_secs(30));
        let ctx = Context::new();

        let err = r.render_tile(&ctx, 0).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
        assert!(matches!(
            err,
            RenderError::Upstream {
                index: 0,
                source: FetchError::Upstream { .. }
            }
        ));

        r.render_tile(&ctx, 0).await.unwrap_err();
        assert_eq!(runner.calls(), 2);
    }

    #[tokio::test]
    async fn template_failure_is_internal_and_not_cached() {
        let runner = Arc::new(CountingRunner::default());
        let r = renderer(runner.clone(), "absent.html", Duration::from_secs(30));
        let ctx = Context::new();

        let err = r.render_tile(&ctx, 0).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.to_string(), "tile 0: template \"absent.html\" not found");

        r.render_tile(&ctx, 0).await.unwrap_err();
        assert_eq!(runner.calls(), 2);
    }

    // ── construction ──────────────────────────────────────────────────────────

    #[test]
    fn from_configs_uses_request_ttl_or_default() {
        use crate::config::{ProviderConfig, RequestConfig};
        use std::collections::HashMap;

        let providers: HashMap<String, ProviderConfig> = [(
            "jira".to_string(),
            ProviderConfig {
                base_url: "https://jira.example.com/".into(),
                ..ProviderConfig::default()
            },
        )]
        .into_iter()
        .collect();
        let defaults = FetchDefaults {
            default_ttl: Duration::from_secs(60),
            ..FetchDefaults::default()
        };
        let registry = Registry::build(&providers, &defaults).unwrap();

        let tile = |title: &str, ttl: Option<Duration>| TileConfig {
            title: title.into(),
            template: "items.txt".into(),
            request: RequestConfig {
                provider: "jira".into(),
                path: "/search".into(),
                ttl,
                ..RequestConfig::default()
            },
        };
        let configs = vec![tile("a", Some(Duration::from_secs(5))), tile("b", None)];

        let r = TileRenderer::from_configs(&registry, &configs, &defaults, engine()).unwrap();
        assert_eq!(r.len(), 2);
        assert_eq!(r.tile(0).unwrap().ttl, Duration::from_secs(5));
        assert_eq!(r.tile(1).unwrap().ttl, Duration::from_secs(60));
        assert_eq!(r.tile(1).unwrap().title, "b");
    }
}
