//! Request-side HTTP primitives.
//!
//! This module provides the two pieces of a request template that take part
//! in cache-key derivation: the canonical [`Method`] and the [`Headers`] map.

use std::fmt;

pub mod headers;

pub use headers::Headers;

/// An HTTP request method in canonical (upper-case) form.
///
/// Parsing trims whitespace, upper-cases the input and maps a blank string to
/// [`Method::Get`], so a request template that omits its method behaves like
/// a plain GET.
///
/// # Examples
///
/// ```
/// use tilefetch::http::Method;
///
/// assert_eq!(Method::canonical(" post "), Method::Post);
/// assert_eq!(Method::canonical(""), Method::Get);
/// assert_eq!(Method::canonical("report").as_str(), "REPORT");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum Method {
    /// GET: retrieve a representation of the target resource.
    #[default]
    Get,
    /// POST: search endpoints that take their filter in the body.
    Post,
    /// PUT: replace the target resource's current representation.
    Put,
    /// DELETE: remove the target resource.
    Delete,
    /// HEAD: identical to GET but without a response body.
    Head,
    /// OPTIONS: describe the communication options for the target resource.
    Options,
    /// PATCH: apply partial modifications to a resource.
    Patch,
    /// A non-standard extension method, already upper-cased.
    Custom(String),
}

impl Method {
    /// Canonicalizes a configured method name.
    pub fn canonical(raw: &str) -> Self {
        let upper = raw.trim().to_ascii_uppercase();
        match upper.as_str() {
            "" | "GET" => Self::Get,
            "POST" => Self::Post,
            "PUT" => Self::Put,
            "DELETE" => Self::Delete,
            "HEAD" => Self::Head,
            "OPTIONS" => Self::Options,
            "PATCH" => Self::Patch,
            _ => Self::Custom(upper),
        }
    }

    /// Returns the method as a string slice.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
            Self::Patch => "PATCH",
            Self::Custom(s) => s.as_str(),
        }
    }

    /// Converts to the client library's method type.
    ///
    /// Returns `None` only for custom methods that are not valid HTTP tokens.
    pub fn to_reqwest(&self) -> Option<reqwest::Method> {
        reqwest::Method::from_bytes(self.as_str().as_bytes()).ok()
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for Method {
    fn from(raw: &str) -> Self {
        Self::canonical(raw)
    }
}

impl AsRef<str> for Method {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}
