//! Request normalization and deterministic cache-key derivation.
//!
//! A [`RequestSpec`] is the logical description of one upstream call. Before
//! it is sent, [`RequestSpec::normalize`] resolves its target against the
//! provider's base URL, folds the query template into the URL in a fixed
//! order, and derives a cache key that does not depend on header casing,
//! header order, or query-map iteration order.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hasher;
use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;
use url::Url;

use crate::hash::Fnv1a64;
use crate::http::{Headers, Method};

/// Errors produced while normalizing a [`RequestSpec`].
#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("invalid request target {target:?}: {source}")]
    InvalidTarget {
        target: String,
        #[source]
        source: url::ParseError,
    },
}

/// One upstream request, before resolution against a provider.
#[derive(Debug, Clone, Default)]
pub struct RequestSpec {
    /// Path or URL reference, resolved against the provider base URL.
    pub target: String,
    /// Canonical method (upper-case, GET when blank).
    pub method: Method,
    /// Query parameters merged into the resolved URL.
    pub query: HashMap<String, String>,
    /// Outbound headers; part of the cache key.
    pub headers: Headers,
    /// Exact body bytes sent upstream; part of the cache key.
    pub body: Bytes,
    /// How long a successful response may be served from cache.
    pub cache_ttl: Duration,
}

/// The result of [`RequestSpec::normalize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedRequest {
    /// Absolute URL including the merged, sorted query string.
    pub url: Url,
    /// 16 hex digits identifying method + URL + headers + body.
    pub cache_key: String,
}

impl RequestSpec {
    /// Creates a GET spec for `target` with no query, headers, body, or TTL.
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            ..Self::default()
        }
    }

    /// Sets the method, canonicalizing it.
    pub fn method(mut self, method: impl AsRef<str>) -> Self {
        self.method = Method::canonical(method.as_ref());
        self
    }

    /// Adds one query parameter.
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    /// Appends one header entry.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Sets the body bytes.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Sets the cache TTL.
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Resolves the target against `base`, merges the query, and computes the
    /// cache key.
    ///
    /// # Errors
    ///
    /// Returns [`NormalizeError::InvalidTarget`] if the target is not a valid
    /// URL reference.
    ///
    /// # Examples
    ///
    /// ```
    /// use tilefetch::fetcher::RequestSpec;
    /// use url::Url;
    ///
    /// let base = Url::parse("https://api.example.com/base/").unwrap();
    /// let spec = RequestSpec::new("../v1/resource")
    ///     .query("b", "2")
    ///     .query("a", "1")
    ///     .query("", "ignored")
    ///     .query("x", "");
    ///
    /// let normalized = spec.normalize(&base).unwrap();
    /// assert_eq!(normalized.url.as_str(), "https://api.example.com/v1/resource?a=1&b=2");
    /// ```
    pub fn normalize(&self, base: &Url) -> Result<NormalizedRequest, NormalizeError> {
        let mut url = base
            .join(&self.target)
            .map_err(|source| NormalizeError::InvalidTarget {
                target: self.target.clone(),
                source,
            })?;

        merge_query(&mut url, &self.query);

        let cache_key = cache_key(&self.method, &url, &self.headers, &self.body);
        Ok(NormalizedRequest { url, cache_key })
    }
}

/// Merges `params` into the query already present on `url`.
///
/// Empty keys and empty values are dropped so templates cannot emit `?k=`.
/// A parameter in `params` replaces every same-named pair already on the URL.
/// The result is re-encoded with keys in lexicographic order.
fn merge_query(url: &mut Url, params: &HashMap<String, String>) {
    if params.is_empty() {
        return;
    }

    let mut pairs: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (k, v) in url.query_pairs() {
        pairs.entry(k.into_owned()).or_default().push(v.into_owned());
    }
    for (k, v) in params {
        if k.is_empty() || v.is_empty() {
            continue;
        }
        pairs.insert(k.clone(), vec![v.clone()]);
    }

    if pairs.is_empty() {
        url.set_query(None);
        return;
    }

    url.query_pairs_mut().clear().extend_pairs(
        pairs
            .iter()
            .flat_map(|(k, values)| values.iter().map(move |v| (k, v))),
    );
}

/// FNV-1a over `METHOD\nURL\n`, the canonical header block, then the body.
fn cache_key(method: &Method, url: &Url, headers: &Headers, body: &[u8]) -> String {
    let mut h = Fnv1a64::new();
    h.write(method.as_str().as_bytes());
    h.write(b"\n");
    h.write(url.as_str().as_bytes());
    h.write(b"\n");
    h.write(headers.canonical_block().as_bytes());
    h.write(body);
    h.hex()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://api.example.com/base/").unwrap()
    }

    fn key(spec: &RequestSpec) -> String {
        spec.normalize(&base()).unwrap().cache_key
    }

    // ── URL resolution ────────────────────────────────────────────────────────

    #[test]
    fn resolves_dot_dot_and_sorts_query() {
        let spec = RequestSpec::new("../v1/resource")
            .query("b", "2")
            .query("a", "1")
            .query("", "ignored")
            .query("x", "");
        let n = spec.normalize(&base()).unwrap();
        assert_eq!(n.url.as_str(), "https://api.example.com/v1/resource?a=1&b=2");
    }

    #[test]
    fn resolves_relative_path_under_base() {
        let n = RequestSpec::new("search").normalize(&base()).unwrap();
        assert_eq!(n.url.as_str(), "https://api.example.com/base/search");
    }

    #[test]
    fn absolute_target_passes_through() {
        let n = RequestSpec::new("https://other.example.org/x?y=1")
            .normalize(&base())
            .unwrap();
        assert_eq!(n.url.as_str(), "https://other.example.org/x?y=1");
    }

    #[test]
    fn spec_query_overrides_url_query() {
        let n = RequestSpec::new("items?limit=10&q=old&z=keep")
            .query("q", "new")
            .normalize(&base())
            .unwrap();
        assert_eq!(
            n.url.as_str(),
            "https://api.example.com/base/items?limit=10&q=new&z=keep"
        );
    }

    #[test]
    fn dropping_every_param_leaves_no_question_mark() {
        let n = RequestSpec::new("items")
            .query("", "x")
            .query("empty", "")
            .normalize(&base())
            .unwrap();
        assert_eq!(n.url.as_str(), "https://api.example.com/base/items");
    }

    #[test]
    fn query_values_are_form_encoded() {
        let n = RequestSpec::new("search")
            .query("jql", "project = X")
            .normalize(&base())
            .unwrap();
        assert_eq!(
            n.url.as_str(),
            "https://api.example.com/base/search?jql=project+%3D+X"
        );
    }

    #[test]
    fn invalid_target_is_rejected() {
        let err = RequestSpec::new("http://[::1").normalize(&base()).unwrap_err();
        assert!(matches!(err, NormalizeError::InvalidTarget { ref target, .. } if target == "http://[::1"));
    }

    // ── cache keys ────────────────────────────────────────────────────────────

    #[test]
    fn key_ignores_header_case_and_order() {
        let a = RequestSpec::new("x")
            .header("Accept", "json")
            .header("X-Team", "core");
        let b = RequestSpec::new("x")
            .header("x-team", "core")
            .header("ACCEPT", "json");
        assert_eq!(key(&a), key(&b));
    }

    #[test]
    fn key_ignores_query_insertion_order() {
        let a = RequestSpec::new("x").query("a", "1").query("b", "2").query("c", "3");
        let b = RequestSpec::new("x").query("c", "3").query("b", "2").query("a", "1");
        assert_eq!(key(&a), key(&b));
    }

    #[test]
    fn key_changes_with_query_value() {
        let a = RequestSpec::new("x").query("a", "1");
        let b = RequestSpec::new("x").query("a", "2");
        assert_ne!(key(&a), key(&b));
    }

    #[test]
    fn key_changes_with_body() {
        let a = RequestSpec::new("x").method("POST").body(r#"{"a":1}"#);
        let b = RequestSpec::new("x").method("POST").body(r#"{"a":2}"#);
        let empty = RequestSpec::new("x").method("POST");
        assert_ne!(key(&a), key(&b));
        assert_ne!(key(&a), key(&empty));
    }

    #[test]
    fn key_changes_with_method_and_header_value() {
        let get = RequestSpec::new("x");
        let post = RequestSpec::new("x").method("post");
        assert_ne!(key(&get), key(&post));

        let h1 = RequestSpec::new("x").header("Accept", "json");
        let h2 = RequestSpec::new("x").header("Accept", "xml");
        assert_ne!(key(&h1), key(&h2));
    }

    #[test]
    fn blank_method_keys_like_get() {
        let blank = RequestSpec::new("x").method("  ");
        let get = RequestSpec::new("x").method("get");
        assert_eq!(key(&blank), key(&get));
    }

    #[test]
    fn key_is_sixteen_hex_digits() {
        let k = key(&RequestSpec::new("x"));
        assert_eq!(k.len(), 16);
        assert!(k.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
