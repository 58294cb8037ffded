//! Condition evaluation for condition nodes and event-trigger thresholds
//!
//! Conditions are a single comparison between a payload field and a literal,
//! written either as an expression string (`"amount > 100"`) or as a structured
//! `{ "field", "operator", "value" }` object.

use crate::error::ConditionError;
use crate::runtime::interpolate::lookup_path;
use serde_json::Value;
use std::str::FromStr;

/// Comparison operators shared by condition nodes and event thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Gt,
    Gte,
    Lt,
    Lte,
    Eq,
    Neq,
    Contains,
}

impl FromStr for Comparison {
    type Err = ConditionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            ">" | "gt" | "greater_than" => Ok(Comparison::Gt),
            ">=" | "gte" | "greater_than_or_equal" => Ok(Comparison::Gte),
            "<" | "lt" | "less_than" => Ok(Comparison::Lt),
            "<=" | "lte" | "less_than_or_equal" => Ok(Comparison::Lte),
            "==" | "=" | "eq" | "equals" => Ok(Comparison::Eq),
            "!=" | "neq" | "not_equals" => Ok(Comparison::Neq),
            "contains" => Ok(Comparison::Contains),
            other => Err(ConditionError::UnknownOperator(other.to_string())),
        }
    }
}

impl Comparison {
    /// Compare `actual` (taken from the payload) against `expected`.
    ///
    /// Numbers compare numerically, strings lexically; mismatched types are
    /// only ever unequal.
    pub fn holds(&self, actual: &Value, expected: &Value) -> bool {
        match self {
            Comparison::Eq => loosely_equal(actual, expected),
            Comparison::Neq => !loosely_equal(actual, expected),
            Comparison::Contains => match (actual, expected) {
                (Value::String(haystack), Value::String(needle)) => haystack.contains(needle.as_str()),
                (Value::Array(items), needle) => items.iter().any(|item| loosely_equal(item, needle)),
                _ => false,
            },
            Comparison::Gt | Comparison::Gte | Comparison::Lt | Comparison::Lte => {
                let ordering = match (as_number(actual), as_number(expected)) {
                    (Some(a), Some(b)) => a.partial_cmp(&b),
                    _ => match (actual.as_str(), expected.as_str()) {
                        (Some(a), Some(b)) => Some(a.cmp(b)),
                        _ => None,
                    },
                };
                match ordering {
                    Some(ordering) => match self {
                        Comparison::Gt => ordering.is_gt(),
                        Comparison::Gte => ordering.is_ge(),
                        Comparison::Lt => ordering.is_lt(),
                        _ => ordering.is_le(),
                    },
                    None => false,
                }
            }
        }
    }
}

/// A parsed `<path> <op> <literal>` condition
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub field: String,
    pub comparison: Comparison,
    pub value: Value,
}

impl Condition {
    /// Build a condition from a condition node's `data`.
    pub fn from_node_data(data: &Value) -> Result<Self, ConditionError> {
        let expression = data
            .get("expression")
            .or_else(|| data.get("condition"))
            .and_then(Value::as_str);
        if let Some(expression) = expression {
            return Self::parse(expression);
        }

        let field = data
            .get("field")
            .and_then(Value::as_str)
            .ok_or(ConditionError::MissingExpression)?;
        let comparison = data
            .get("operator")
            .and_then(Value::as_str)
            .unwrap_or("eq")
            .parse()?;
        Ok(Self {
            field: field.to_string(),
            comparison,
            value: data.get("value").cloned().unwrap_or(Value::Null),
        })
    }

    /// Parse an expression such as `amount > 100` or `tier == "gold"`.
    pub fn parse(expression: &str) -> Result<Self, ConditionError> {
        let trimmed = expression.trim();
        let malformed = || ConditionError::Malformed(trimmed.to_string());

        let (field, rest) = trimmed.split_once(char::is_whitespace).ok_or_else(malformed)?;
        let (operator, literal) = rest.trim_start().split_once(char::is_whitespace).ok_or_else(malformed)?;
        let literal = literal.trim();
        if field.is_empty() || literal.is_empty() {
            return Err(malformed());
        }

        Ok(Self {
            field: field.to_string(),
            comparison: operator.parse()?,
            value: serde_json::from_str(literal).unwrap_or_else(|_| Value::String(literal.to_string())),
        })
    }

    /// Evaluate against the execution scope. A missing field is `false`.
    pub fn evaluate(&self, scope: &Value) -> bool {
        match lookup_path(scope, &self.field) {
            Some(actual) => self.comparison.holds(actual, &self.value),
            None => {
                tracing::debug!("🔍 Condition field '{}' not present in payload", self.field);
                false
            }
        }
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn loosely_equal(a: &Value, b: &Value) -> bool {
    match (as_number(a), as_number(b)) {
        (Some(x), Some(y)) if a.is_number() || b.is_number() => x == y,
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_numeric_expression() {
        let condition = Condition::parse("amount > 100").unwrap();
        assert_eq!(condition.field, "amount");
        assert_eq!(condition.comparison, Comparison::Gt);
        assert_eq!(condition.value, json!(100));

        assert!(!condition.evaluate(&json!({ "amount": 50 })));
        assert!(condition.evaluate(&json!({ "amount": 150 })));
        assert!(!condition.evaluate(&json!({ "amount": 100 })));
    }

    #[test]
    fn quoted_and_bare_string_literals() {
        let quoted = Condition::parse(r#"tier == "gold""#).unwrap();
        assert!(quoted.evaluate(&json!({ "tier": "gold" })));

        let bare = Condition::parse("tier != silver").unwrap();
        assert_eq!(bare.value, json!("silver"));
        assert!(bare.evaluate(&json!({ "tier": "gold" })));
    }

    #[test]
    fn nested_paths_and_missing_fields() {
        let condition = Condition::parse("order.total >= 20").unwrap();
        assert!(condition.evaluate(&json!({ "order": { "total": 20 } })));
        assert!(!condition.evaluate(&json!({ "order": {} })));
        assert!(!condition.evaluate(&json!({})));
    }

    #[test]
    fn numeric_strings_compare_as_numbers() {
        let condition = Condition::parse("amount < 10").unwrap();
        assert!(condition.evaluate(&json!({ "amount": "9.5" })));
        assert!(Comparison::Eq.holds(&json!("5"), &json!(5)));
    }

    #[test]
    fn structured_form_from_node_data() {
        let condition = Condition::from_node_data(&json!({
            "field": "tags",
            "operator": "contains",
            "value": "vip"
        }))
        .unwrap();
        assert!(condition.evaluate(&json!({ "tags": ["new", "vip"] })));
        assert!(!condition.evaluate(&json!({ "tags": ["new"] })));
    }

    #[test]
    fn malformed_expressions_are_rejected() {
        assert!(matches!(Condition::parse("amount"), Err(ConditionError::Malformed(_))));
        assert!(matches!(Condition::parse("amount >"), Err(ConditionError::Malformed(_))));
        assert!(matches!(
            Condition::parse("amount ~ 5"),
            Err(ConditionError::UnknownOperator(op)) if op == "~"
        ));
        assert_eq!(
            Condition::from_node_data(&json!({})),
            Err(ConditionError::MissingExpression)
        );
    }
}
