//! `{{field}}` template rendering.
//!
//! Tags hold a dotted path into the JSON context (`{{ json.user.name }}`,
//! `{{ query.tags.0 }}`). Text outside tags is copied verbatim.

use regex_lite::{Captures, Regex};
use serde_json::Value;
use std::sync::OnceLock;

fn tag_pattern() -> &'static Regex {
    static TAG: OnceLock<Regex> = OnceLock::new();
    TAG.get_or_init(|| Regex::new(r"\{\{\s*([^{}]*?)\s*\}\}").expect("valid tag pattern"))
}

/// Render `template` against `context`.
///
/// Missing fields and `null` render empty. Strings render raw, numbers and
/// booleans as their literal, arrays and objects as compact JSON.
pub fn render(template: &str, context: &Value) -> String {
    if !template.contains("{{") {
        return template.to_string();
    }

    tag_pattern()
        .replace_all(template, |caps: &Captures<'_>| {
            lookup(context, &caps[1]).map(stringify).unwrap_or_default()
        })
        .into_owned()
}

/// Resolve a dotted path inside `context`.
pub fn lookup<'a>(context: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return None;
    }

    path.split('.').try_fold(context, |current, segment| {
        let segment = segment.trim();
        match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        }
    })
}

fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}
