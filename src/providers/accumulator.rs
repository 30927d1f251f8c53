//! Per-run page collection with de-duplicated array merging.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::Serialize;
use serde_json::{Map, Value};

/// One decoded upstream response body (a JSON object).
pub type Page = Map<String, Value>;

/// The result of one [`Runner`](super::Runner) execution.
///
/// Holds every raw page in arrival order plus `merged`: for each top-level
/// key whose value is a non-empty array on some page, the concatenation of
/// those arrays across pages with duplicates removed.
///
/// An element's identity is its `id` field, else its `key` field, else its
/// full JSON serialization. Identity is tracked per array key, so an `id: 1`
/// under `issues` does not shadow an `id: 1` under `comments`.
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use tilefetch::providers::Accumulator;
///
/// let mut acc = Accumulator::new();
/// let added = acc.push_page(json!({"issues": [{"id": 1}, {"id": 2}]}).as_object().unwrap().clone());
/// assert_eq!(added, 2);
/// let added = acc.push_page(json!({"issues": [{"id": 2}, {"id": 3}]}).as_object().unwrap().clone());
/// assert_eq!(added, 1);
/// assert_eq!(acc.merged()["issues"].len(), 3);
/// assert_eq!(acc.page_count(), 2);
/// ```
#[derive(Debug, Clone, Default, Serialize)]
pub struct Accumulator {
    merged: BTreeMap<String, Vec<Value>>,
    pages: Vec<Page>,
    #[serde(skip)]
    seen: HashMap<String, HashSet<String>>,
}

impl Accumulator {
    /// Creates an empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an accumulator holding exactly one page.
    pub fn from_page(page: Page) -> Self {
        let mut acc = Self::new();
        acc.push_page(page);
        acc
    }

    /// Appends `page` and merges its top-level arrays.
    ///
    /// Returns how many previously unseen elements were merged, summed over
    /// all array keys.
    pub fn push_page(&mut self, page: Page) -> usize {
        let added = self.merge_arrays(&page);
        self.pages.push(page);
        added
    }

    fn merge_arrays(&mut self, page: &Page) -> usize {
        let mut added = 0;
        for (key, value) in page {
            let Value::Array(items) = value else {
                continue;
            };
            if items.is_empty() {
                continue;
            }

            let seen = self.seen.entry(key.clone()).or_default();
            let merged = self.merged.entry(key.clone()).or_default();
            for item in items {
                if seen.insert(item_identity(item)) {
                    merged.push(item.clone());
                    added += 1;
                }
            }
        }
        added
    }

    /// Raw pages in arrival order.
    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    /// Number of pages collected.
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// De-duplicated arrays keyed by their top-level field name.
    pub fn merged(&self) -> &BTreeMap<String, Vec<Value>> {
        &self.merged
    }

    /// The payload a template should see first.
    ///
    /// The merged view when any array was merged, else the first page, else
    /// the whole accumulator (`{"merged": {}, "pages": []}`).
    pub fn primary(&self) -> Value {
        if !self.merged.is_empty() {
            let merged: Map<String, Value> = self
                .merged
                .iter()
                .map(|(k, v)| (k.clone(), Value::Array(v.clone())))
                .collect();
            return Value::Object(merged);
        }
        if let Some(first) = self.pages.first() {
            return Value::Object(first.clone());
        }
        self.to_value()
    }

    /// `{"merged": {...}, "pages": [...]}`.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Best-effort identity used for de-duplication.
pub(crate) fn item_identity(item: &Value) -> String {
    if let Value::Object(map) = item {
        if let Some(id) = map.get("id") {
            return stringify(id);
        }
        if let Some(key) = map.get("key") {
            return stringify(key);
        }
    }
    item.to_string()
}

/// Renders a scalar the way a human would write it: strings bare, integral
/// floats without a fractional part.
pub(crate) fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => match (n.as_i64(), n.as_u64(), n.as_f64()) {
            (Some(i), _, _) => i.to_string(),
            (_, Some(u), _) => u.to_string(),
            (_, _, Some(f)) if f.fract() == 0.0 && f.abs() < 9.0e15 => (f as i64).to_string(),
            _ => n.to_string(),
        },
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn page(value: Value) -> Page {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    // ── merge & dedup ─────────────────────────────────────────────────────────

    #[test]
    fn overlapping_pages_merge_to_three() {
        let mut acc = Accumulator::new();
        assert_eq!(acc.push_page(page(json!({"items": [{"id": 1}, {"id": 2}]}))), 2);
        assert_eq!(acc.push_page(page(json!({"items": [{"id": 2}, {"id": 3}]}))), 1);

        let ids: Vec<_> = acc.merged()["items"].iter().map(|v| v["id"].clone()).collect();
        assert_eq!(ids, vec![json!(1), json!(2), json!(3)]);
        assert_eq!(acc.page_count(), 2);
    }

    #[test]
    fn identity_falls_back_to_key_then_structure() {
        let mut acc = Accumulator::new();
        acc.push_page(page(json!({
            "issues": [{"key": "A-1"}, {"key": "A-1", "extra": true}],
            "tags": ["x", "y", "x"],
            "rows": [[1, 2], [1, 2], [2, 1]]
        })));
        assert_eq!(acc.merged()["issues"].len(), 1);
        assert_eq!(acc.merged()["tags"], vec![json!("x"), json!("y")]);
        assert_eq!(acc.merged()["rows"].len(), 2);
    }

    #[test]
    fn id_wins_over_key() {
        let mut acc = Accumulator::new();
        acc.push_page(page(json!({"a": [{"id": 1, "key": "x"}, {"id": 2, "key": "x"}]})));
        assert_eq!(acc.merged()["a"].len(), 2);
    }

    #[test]
    fn integral_float_and_int_ids_collide() {
        let mut acc = Accumulator::new();
        acc.push_page(page(json!({"a": [{"id": 7}]})));
        assert_eq!(acc.push_page(page(json!({"a": [{"id": 7.0}]}))), 0);
    }

    #[test]
    fn identity_is_scoped_per_array_key() {
        let mut acc = Accumulator::new();
        let added = acc.push_page(page(json!({
            "issues": [{"id": 1}],
            "comments": [{"id": 1}]
        })));
        assert_eq!(added, 2);
    }

    #[test]
    fn non_arrays_and_empty_arrays_are_not_merged() {
        let mut acc = Accumulator::new();
        let added = acc.push_page(page(json!({"total": 3, "name": "x", "empty": []})));
        assert_eq!(added, 0);
        assert!(acc.merged().is_empty());
        assert_eq!(acc.page_count(), 1);
    }

    // ── views ─────────────────────────────────────────────────────────────────

    #[test]
    fn primary_prefers_merged() {
        let acc = Accumulator::from_page(page(json!({"items": [1, 2], "total": 2})));
        assert_eq!(acc.primary(), json!({"items": [1, 2]}));
    }

    #[test]
    fn primary_falls_back_to_first_page() {
        let acc = Accumulator::from_page(page(json!({"status": "green"})));
        assert_eq!(acc.primary(), json!({"status": "green"}));
    }

    #[test]
    fn primary_of_empty_accumulator_is_whole_shape() {
        assert_eq!(Accumulator::new().primary(), json!({"merged": {}, "pages": []}));
    }

    #[test]
    fn serialized_shape_hides_seen_sets() {
        let acc = Accumulator::from_page(page(json!({"items": [{"id": 1}]})));
        assert_eq!(
            acc.to_value(),
            json!({"merged": {"items": [{"id": 1}]}, "pages": [{"items": [{"id": 1}]}]})
        );
    }

    #[test]
    fn stringify_scalars() {
        assert_eq!(stringify(&json!("abc")), "abc");
        assert_eq!(stringify(&json!(42)), "42");
        assert_eq!(stringify(&json!(42.0)), "42");
        assert_eq!(stringify(&json!(1.5)), "1.5");
        assert_eq!(stringify(&json!(true)), "true");
        assert_eq!(stringify(&json!(null)), "null");
    }
}
