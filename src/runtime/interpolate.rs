//! `{{variable}}` placeholder substitution for action configuration.

use regex_lite::Regex;
use serde_json::Value;
use std::sync::OnceLock;

fn placeholder_regex() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z0-9_\-]+(?:\.[A-Za-z0-9_\-]+)*)\s*\}\}").expect("valid regex")
    })
}

/// Resolve a dotted path (`order.items.0.price`) inside a JSON value.
pub fn lookup_path<'a>(scope: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(scope, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Replace placeholders in every string of `template` using values from `scope`.
///
/// A string consisting of exactly one placeholder takes the raw JSON value, so
/// `"{{amount}}"` stays a number. Unresolved placeholders are left as written.
pub fn interpolate(template: &Value, scope: &Value) -> Value {
    match template {
        Value::String(text) => interpolate_string(text, scope),
        Value::Array(items) => Value::Array(items.iter().map(|item| interpolate(item, scope)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, value)| (key.clone(), interpolate(value, scope)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn interpolate_string(text: &str, scope: &Value) -> Value {
    let regex = placeholder_regex();

    if let Some(captures) = regex.captures(text) {
        let whole = captures.get(0).map(|m| m.as_str()).unwrap_or_default();
        if whole.len() == text.trim().len() {
            if let Some(value) = lookup_path(scope, &captures[1]) {
                return value.clone();
            }
        }
    }

    Value::String(render(text, scope))
}

/// Render placeholders into a plain string (non-string values are JSON-encoded).
pub fn render(text: &str, scope: &Value) -> String {
    placeholder_regex()
        .replace_all(text, |caps: &regex_lite::Captures| match lookup_path(scope, &caps[1]) {
            Some(Value::String(s)) => s.clone(),
            Some(value) => value.to_string(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn replaces_placeholders_inside_text() {
        let scope = json!({ "fan": { "name": "Ada" }, "amount": 25 });
        assert_eq!(
            render("Thanks {{ fan.name }} for the ${{amount}} tip!", &scope),
            "Thanks Ada for the $25 tip!"
        );
    }

    #[test]
    fn single_placeholder_keeps_json_type() {
        let scope = json!({ "amount": 25, "items": [1, 2] });
        assert_eq!(interpolate(&json!("{{amount}}"), &scope), json!(25));
        assert_eq!(interpolate(&json!(" {{ items }} "), &scope), json!([1, 2]));
    }

    #[test]
    fn unresolved_placeholders_are_left_intact() {
        let scope = json!({ "amount": 25 });
        assert_eq!(render("Hi {{name}}", &scope), "Hi {{name}}");
        assert_eq!(interpolate(&json!("{{missing}}"), &scope), json!("{{missing}}"));
    }

    #[test]
    fn walks_nested_config() {
        let scope = json!({ "email": "fan@example.com", "nodes": { "n1": { "id": 7 } } });
        let config = json!({
            "to": "{{email}}",
            "meta": { "ref": "order-{{nodes.n1.id}}", "retries": 3 },
            "cc": ["{{email}}"]
        });
        assert_eq!(
            interpolate(&config, &scope),
            json!({
                "to": "fan@example.com",
                "meta": { "ref": "order-7", "retries": 3 },
                "cc": ["fan@example.com"]
            })
        );
    }

    #[test]
    fn lookup_indexes_into_arrays() {
        let scope = json!({ "items": [{ "price": 4 }, { "price": 9 }] });
        assert_eq!(lookup_path(&scope, "items.1.price"), Some(&json!(9)));
        assert_eq!(lookup_path(&scope, "items.5.price"), None);
    }
}
