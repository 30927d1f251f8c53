//! # tilefetch
//!
//! Fetches paginated JSON from HTTP backends, merges the pages, and renders
//! the result into cached, content-hashed tiles.
//!
//! Two caches are layered: each provider caches decoded upstream responses
//! by request fingerprint, and the [`TileRenderer`] caches rendered HTML per
//! tile.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::collections::HashMap;
//! use std::sync::Arc;
//!
//! use tilefetch::config::{FetchDefaults, ProviderConfig, RequestConfig, TileConfig};
//! use tilefetch::{Context, Registry, TeraEngine, TileRenderer};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let defaults = FetchDefaults::default();
//!     let providers = HashMap::from([(
//!         "github".to_string(),
//!         ProviderConfig {
//!             base_url: "https://api.github.com/".into(),
//!             ..ProviderConfig::default()
//!         },
//!     )]);
//!     let registry = Registry::build(&providers, &defaults)?;
//!
//!     let tiles = vec![TileConfig {
//!         title: "Issues".into(),
//!         template: "issues.html".into(),
//!         request: RequestConfig {
//!             provider: "github".into(),
//!             path: "/search/issues".into(),
//!             query: HashMap::from([("q".to_string(), "repo:rust-lang/rust is:open".to_string())]),
//!             ..RequestConfig::default()
//!         },
//!     }];
//!     let engine = TeraEngine::from_raw([(
//!         "issues.html",
//!         "<h2>{{ title }}</h2>{% for i in data.items %}<li>{{ i.title }}</li>{% endfor %}",
//!     )])?;
//!
//!     let renderer = TileRenderer::from_configs(&registry, &tiles, &defaults, Arc::new(engine))?;
//!     let tile = renderer.render_tile(&Context::new(), 0).await?;
//!     println!("{} {}", tile.hash, tile.html);
//!     Ok(())
//! }
//! ```

// ── Request building blocks ───────────────────────────────────────────────────
pub mod context;
pub mod fetcher;
pub mod hash;
pub mod http;

// ── Caching and upstream execution ────────────────────────────────────────────
pub mod cache;
pub mod config;
pub mod providers;

// ── Presentation ──────────────────────────────────────────────────────────────
pub mod render;
pub mod templates;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use cache::{Cache, TtlCache};
pub use context::{CancellationToken, Context};
pub use fetcher::{NormalizedRequest, RequestSpec};
pub use http::{Headers, Method};
pub use providers::{Accumulator, FetchError, Fetched, ProviderError, Registry, Runner};
pub use render::{RenderError, Rendered, TileRenderer};
pub use templates::{TemplateEngine, TeraEngine};
