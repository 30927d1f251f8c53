//! Template execution behind a small trait.
//!
//! The render layer only needs "render template `name` against this JSON
//! context"; [`TeraEngine`] provides that on top of `tera`, with two extra
//! filters:
//!
//! - `dig(key=...)`: the string field `key` of an object, a string input
//!   unchanged, anything else as `""`.
//! - `format_date(format=...)`: reformats a Jira-style timestamp
//!   (`2024-03-05T14:07:09.123+0000`, or with a trailing `Z`) using a
//!   `strftime` pattern, default `%Y-%m-%d %H:%M`. Input that does not parse
//!   is passed through.

use std::collections::HashMap;
use std::error::Error as _;
use std::fmt::Write as _;

use chrono::DateTime;
use serde_json::Value;
use tera::Tera;
use thiserror::Error;

/// Errors produced while loading or executing templates.
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("load templates: {}", describe(.0))]
    Load(#[source] tera::Error),

    #[error("template {0:?} not found")]
    NotFound(String),

    #[error("template context must be a JSON object")]
    InvalidContext(#[source] tera::Error),

    #[error("render {name:?}: {}", describe(.source))]
    Render {
        name: String,
        #[source]
        source: tera::Error,
    },
}

/// Renders named templates against a JSON context.
pub trait TemplateEngine: Send + Sync {
    /// Renders `name` with the top-level keys of `context` as variables.
    fn render(&self, name: &str, context: &Value) -> Result<String, TemplateError>;
}

/// [`TemplateEngine`] backed by a `tera` template set.
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use tilefetch::templates::{TemplateEngine, TeraEngine};
///
/// let engine = TeraEngine::from_raw([("count.txt", "{{ title }}: {{ data.items | length }}")]).unwrap();
/// let out = engine
///     .render("count.txt", &json!({"title": "Open", "data": {"items": [1, 2, 3]}}))
///     .unwrap();
/// assert_eq!(out, "Open: 3");
/// ```
#[derive(Debug)]
pub struct TeraEngine {
    tera: Tera,
}

impl Default for TeraEngine {
    fn default() -> Self {
        Self::with_tera(Tera::default())
    }
}

impl TeraEngine {
    /// Creates an engine with no templates.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads every template matching `glob` (e.g. `"templates/**/*.html"`).
    ///
    /// # Errors
    ///
    /// [`TemplateError::Load`] if a matched file fails to parse.
    pub fn from_glob(glob: &str) -> Result<Self, TemplateError> {
        Tera::new(glob).map(Self::with_tera).map_err(TemplateError::Load)
    }

    /// Builds an engine from `(name, source)` pairs.
    ///
    /// # Errors
    ///
    /// [`TemplateError::Load`] if any source fails to parse.
    pub fn from_raw<I, N, S>(templates: I) -> Result<Self, TemplateError>
    where
        I: IntoIterator<Item = (N, S)>,
        N: AsRef<str>,
        S: AsRef<str>,
    {
        let mut engine = Self::new();
        let templates: Vec<(N, S)> = templates.into_iter().collect();
        engine
            .tera
            .add_raw_templates(
                templates
                    .iter()
                    .map(|(name, source)| (name.as_ref(), source.as_ref())),
            )
            .map_err(TemplateError::Load)?;
        Ok(engine)
    }

    /// Adds (or replaces) one template.
    ///
    /// # Errors
    ///
    /// [`TemplateError::Load`] if `source` fails to parse.
    pub fn add_raw_template(&mut self, name: &str, source: &str) -> Result<(), TemplateError> {
        self.tera
            .add_raw_template(name, source)
            .map_err(TemplateError::Load)
    }

    /// Returns `true` if a template called `name` is loaded.
    pub fn has_template(&self, name: &str) -> bool {
        self.tera.get_template_names().any(|n| n == name)
    }

    fn with_tera(mut tera: Tera) -> Self {
        tera.register_filter("dig", dig);
        tera.register_filter("format_date", format_date);
        Self { tera }
    }
}

impl TemplateEngine for TeraEngine {
    fn render(&self, name: &str, context: &Value) -> Result<String, TemplateError> {
        if !self.has_template(name) {
            return Err(TemplateError::NotFound(name.to_owned()));
        }
        let ctx = tera::Context::from_value(context.clone()).map_err(TemplateError::InvalidContext)?;
        self.tera
            .render(name, &ctx)
            .map_err(|source| TemplateError::Render {
                name: name.to_owned(),
                source,
            })
    }
}

fn dig(value: &Value, args: &HashMap<String, Value>) -> tera::Result<Value> {
    let out = match value {
        Value::String(s) => s.clone(),
        Value::Object(map) => args
            .get("key")
            .and_then(Value::as_str)
            .and_then(|key| map.get(key))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned(),
        _ => String::new(),
    };
    Ok(Value::String(out))
}

const JIRA_TIMESTAMP: &str = "%Y-%m-%dT%H:%M:%S%.3f%z";
const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d %H:%M";

fn format_date(value: &Value, args: &HashMap<String, Value>) -> tera::Result<Value> {
    let Some(input) = value.as_str() else {
        return Ok(value.clone());
    };
    let format = match args.get("format") {
        Some(Value::String(f)) => f.as_str(),
        Some(_) => return Err(tera::Error::msg("format_date: `format` must be a string")),
        None => DEFAULT_DATE_FORMAT,
    };

    let normalized = input.replacen('Z', "+0000", 1);
    let Ok(ts) = DateTime::parse_from_str(&normalized, JIRA_TIMESTAMP) else {
        return Ok(Value::String(input.to_owned()));
    };
    let mut out = String::new();
    write!(out, "{}", ts.format(format))
        .map_err(|_| tera::Error::msg(format!("format_date: invalid format {format:?}")))?;
    Ok(Value::String(out))
}

/// Tera's top-level message rarely says what went wrong; the cause is
/// further down the source chain.
fn describe(err: &tera::Error) -> String {
    let mut out = err.to_string();
    let mut cause = err.source();
    while let Some(inner) = cause {
        out.push_str(": ");
        out.push_str(&inner.to_string());
        cause = inner.source();
    }
    out
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn engine(name: &str, source: &str) -> TeraEngine {
        TeraEngine::from_raw([(name, source)]).unwrap()
    }

    // ── rendering ─────────────────────────────────────────────────────────────

    #[test]
    fn renders_context_keys() {
        let e = engine(
            "list.txt",
            "{{ title }}#{{ index }}:{% for i in data.issues %}{{ i.key }},{% endfor %}",
        );
        let out = e
            .render(
                "list.txt",
                &json!({"title": "Bugs", "index": 2, "data": {"issues": [{"key": "A-1"}, {"key": "A-2"}]}}),
            )
            .unwrap();
        assert_eq!(out, "Bugs#2:A-1,A-2,");
    }

    #[test]
    fn html_templates_are_escaped() {
        let e = engine("tile.html", "<p>{{ title }}</p>");
        let out = e.render("tile.html", &json!({"title": "<b>x</b>"})).unwrap();
        assert_eq!(out, "<p>&lt;b&gt;x&lt;&#x2F;b&gt;</p>");
    }

    #[test]
    fn unknown_template_is_not_found() {
        let e = TeraEngine::new();
        let err = e.render("missing.html", &json!({})).unwrap_err();
        assert!(matches!(err, TemplateError::NotFound(ref n) if n == "missing.html"));
    }

    #[test]
    fn non_object_context_is_rejected() {
        let e = engine("a.txt", "x");
        let err = e.render("a.txt", &json!([1, 2])).unwrap_err();
        assert!(matches!(err, TemplateError::InvalidContext(_)));
    }

    #[test]
    fn undefined_variable_is_a_render_error() {
        let e = engine("a.txt", "{{ nope.deeper }}");
        let err = e.render("a.txt", &json!({})).unwrap_err();
        assert!(matches!(err, TemplateError::Render { ref name, .. } if name == "a.txt"));
        assert!(err.to_string().starts_with("render \"a.txt\": "));
    }

    #[test]
    fn syntax_errors_fail_at_load() {
        let err = TeraEngine::from_raw([("bad.txt", "{% for %}")]).unwrap_err();
        assert!(matches!(err, TemplateError::Load(_)));

        let mut e = TeraEngine::new();
        assert!(e.add_raw_template("ok.txt", "fine").is_ok());
        assert!(e.has_template("ok.txt"));
        assert!(e.add_raw_template("bad.txt", "{{").is_err());
    }

    // ── dig ───────────────────────────────────────────────────────────────────

    #[test]
    fn dig_reads_string_fields() {
        let e = engine(
            "d.txt",
            r#"{{ obj | dig(key="name") }}|{{ obj | dig(key="n") }}|{{ obj | dig(key="none") }}|{{ s | dig(key="x") }}|{{ n | dig(key="x") }}"#,
        );
        let out = e
            .render(
                "d.txt",
                &json!({"obj": {"name": "alice", "n": 3}, "s": "plain", "n": 7}),
            )
            .unwrap();
        assert_eq!(out, "alice|||plain|");
    }

    // ── format_date ───────────────────────────────────────────────────────────

    #[test]
    fn format_date_reads_jira_timestamps() {
        let e = engine(
            "d.txt",
            r#"{{ a | format_date }}|{{ b | format_date(format="%d.%m.%Y") }}|{{ c | format_date(format="%H:%M %z") }}"#,
        );
        let out = e
            .render(
                "d.txt",
                &json!({
                    "a": "2024-03-05T14:07:09.123+0000",
                    "b": "2024-03-05T14:07:09.123Z",
                    "c": "2024-03-05T14:07:09.123+0200",
                }),
            )
            .unwrap();
        assert_eq!(out, "2024-03-05 14:07|05.03.2024|14:07 +0200");
    }

    #[test]
    fn format_date_passes_unparseable_input_through() {
        let e = engine("d.txt", "{{ a | format_date }}|{{ n | format_date }}");
        let out = e.render("d.txt", &json!({"a": "yesterday", "n": 5})).unwrap();
        assert_eq!(out, "yesterday|5");
    }

    #[test]
    fn format_date_rejects_non_string_format() {
        let e = engine("d.txt", "{{ a | format_date(format=3) }}");
        let err = e
            .render("d.txt", &json!({"a": "2024-03-05T14:07:09.123Z"}))
            .unwrap_err();
        assert!(matches!(err, TemplateError::Render { .. }));
    }
}
