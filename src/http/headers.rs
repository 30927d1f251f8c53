//! Outbound header map with case-insensitive name lookup.
//!
//! Header names are case-insensitive per [RFC 9110 §5.1]; the map keeps the
//! caller's spelling and insertion order, and only folds case when it has to
//! compare names or derive a cache key.

use std::collections::BTreeMap;

/// A case-insensitive, multi-value header map for upstream requests.
///
/// Preserves insertion order and allows multiple values per header name.
/// [`Headers::canonical_block`] produces the order- and case-independent form
/// that feeds request cache keys.
///
/// # Examples
///
/// ```
/// use tilefetch::http::Headers;
///
/// let mut headers = Headers::new();
/// headers.insert("Accept", "application/json");
/// headers.insert("X-Team", "core");
/// headers.insert("x-team", "infra");
///
/// assert!(headers.contains("accept"));
/// assert_eq!(headers.len(), 3);
/// assert_eq!(headers.canonical_block(), "accept:application/json\nx-team:core,infra\n");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    inner: Vec<(String, String)>,
}

impl Headers {
    /// Creates an empty header map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a header entry. Multiple values for the same name are preserved.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.inner.push((name.into(), value.into()));
    }

    /// Returns `true` if the map contains at least one entry with the given name.
    pub fn contains(&self, name: &str) -> bool {
        self.inner.iter().any(|(k, _)| k.eq_ignore_ascii_case(name))
    }

    /// Returns the total number of header entries (not unique names).
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns `true` if there are no header entries.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Returns an iterator over all `(name, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Renders the headers as `name:value\n` lines for cache-key derivation.
    ///
    /// Names are lower-cased and sorted; values sharing a name are joined with
    /// `,` in insertion order. Two maps that differ only in name casing or
    /// entry order produce the same block.
    pub fn canonical_block(&self) -> String {
        let mut grouped: BTreeMap<String, Vec<&str>> = BTreeMap::new();
        for (name, value) in &self.inner {
            grouped
                .entry(name.to_ascii_lowercase())
                .or_default()
                .push(value.as_str());
        }

        let mut out = String::new();
        for (name, values) in grouped {
            out.push_str(&name);
            out.push(':');
            out.push_str(&values.join(","));
            out.push('\n');
        }
        out
    }
}

impl<K, V> FromIterator<(K, V)> for Headers
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            inner: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}
