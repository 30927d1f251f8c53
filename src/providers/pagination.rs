//! Pagination window arithmetic and parameter injection.
//!
//! The loop itself lives in [`HttpRunner`](super::HttpRunner); this module
//! holds the pure pieces: reading counters from a page, computing the next
//! `(start, limit)` window, and writing it into a query map or JSON body.

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::config::PageParams;

use super::Page;

/// A `(start, limit)` pair describing one page of a multi-page fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: u64,
    pub limit: u64,
}

/// Reads a non-negative integer from an arbitrary JSON value.
///
/// Accepts integers, floats (truncated), and numeric strings. Negative,
/// non-numeric, and missing values read as zero.
pub fn as_count(value: Option<&Value>) -> u64 {
    match value {
        Some(Value::Number(n)) => {
            if let Some(u) = n.as_u64() {
                u
            } else if n.as_i64().is_some() {
                0
            } else {
                n.as_f64()
                    .filter(|f| f.is_finite() && *f > 0.0)
                    .map_or(0, |f| f as u64)
            }
        }
        Some(Value::String(s)) => s.parse::<i64>().map_or(0, |n| n.max(0).unsigned_abs()),
        _ => 0,
    }
}

/// Computes the window after `last`, or `None` when pagination is complete.
///
/// Stops when `pages_seen` reached the configured page cap, or when the next
/// start would reach the reported total. When the page does not report its
/// limit, the response field named by `req_limit` is tried, then
/// `fallback_limit` (the limit last sent upstream). The limit never drops
/// below one so the loop always advances.
pub fn next_window(
    params: &PageParams,
    last: &Page,
    pages_seen: usize,
    fallback_limit: u64,
) -> Option<Window> {
    if params.limit_pages > 0 && pages_seen >= params.limit_pages {
        return None;
    }

    let start = as_count(last.get(&params.start_field));
    let total = as_count(last.get(&params.total_field));
    let mut limit = as_count(last.get(&params.limit_field));

    if limit == 0 && !params.req_limit.trim().is_empty() {
        limit = as_count(last.get(&params.req_limit));
    }
    if limit == 0 {
        limit = fallback_limit;
    }
    let limit = limit.max(1);

    let next = start.saturating_add(limit);
    if total > 0 && next >= total {
        return None;
    }

    Some(Window { start: next, limit })
}

/// Returns a copy of `query` with the window written under the request-side
/// names. Blank names are skipped.
pub fn inject_query(
    query: &HashMap<String, String>,
    params: &PageParams,
    window: Window,
) -> HashMap<String, String> {
    let mut out = query.clone();
    if !params.req_start.trim().is_empty() {
        out.insert(params.req_start.clone(), window.start.to_string());
    }
    if !params.req_limit.trim().is_empty() && window.limit > 0 {
        out.insert(params.req_limit.clone(), window.limit.to_string());
    }
    out
}

/// Returns a copy of `body` with the window written as JSON numbers.
pub fn inject_body(body: &Map<String, Value>, params: &PageParams, window: Window) -> Map<String, Value> {
    let mut out = body.clone();
    if !params.req_start.trim().is_empty() {
        out.insert(params.req_start.clone(), Value::from(window.start));
    }
    if !params.req_limit.trim().is_empty() && window.limit > 0 {
        out.insert(params.req_limit.clone(), Value::from(window.limit));
    }
    out
}

/// Reads the request-side limit from an initial query map or body, if set.
pub fn initial_limit(
    query: &HashMap<String, String>,
    body: &Map<String, Value>,
    params: &PageParams,
) -> Option<u64> {
    let name = params.req_limit.trim();
    if name.is_empty() {
        return None;
    }
    let from_query = query.get(name).and_then(|v| v.parse::<u64>().ok());
    let from_body = Some(as_count(body.get(name))).filter(|n| *n > 0);
    from_query.or(from_body).filter(|n| *n > 0)
}
