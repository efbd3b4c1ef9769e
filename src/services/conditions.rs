use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Branch/visibility condition gating optional phases. Resolved against the
/// student's accumulated form data keyed by node slug. Comparison is string
/// coercion only; numeric operators are deliberately not supported.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Condition {
    #[serde(alias = "nodeId", alias = "nodeSlug")]
    pub(crate) node_slug: String,
    #[serde(alias = "fieldKey")]
    pub(crate) field_key: String,
    pub(crate) operator: Operator,
    pub(crate) value: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum Operator {
    Equals,
    NotEquals,
    Contains,
}

/// Fail-closed: a missing node or field evaluates to false for every
/// operator, including `not_equals`.
pub(crate) fn evaluate(
    condition: &Condition,
    submission_data: &HashMap<String, serde_json::Value>,
) -> bool {
    let Some(form_data) = submission_data.get(&condition.node_slug) else {
        return false;
    };
    let Some(actual) = form_data.get(&condition.field_key) else {
        return false;
    };
    if actual.is_null() {
        return false;
    }

    let expected = coerce(&condition.value);

    match condition.operator {
        Operator::Equals => coerce(actual) == expected,
        Operator::NotEquals => coerce(actual) != expected,
        Operator::Contains => match actual {
            serde_json::Value::Array(items) => items.iter().any(|item| coerce(item) == expected),
            other => coerce(other).contains(&expected),
        },
    }
}

fn coerce(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(text) => text.clone(),
        serde_json::Value::Number(number) => number.to_string(),
        serde_json::Value::Bool(flag) => flag.to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(node: &str, form: serde_json::Value) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert(node.to_string(), form);
        map
    }

    fn condition(operator: Operator, value: serde_json::Value) -> Condition {
        Condition {
            node_slug: "intake".to_string(),
            field_key: "track".to_string(),
            operator,
            value,
        }
    }

    #[test]
    fn equals_matches_string() {
        let submissions = data("intake", serde_json::json!({"track": "research"}));
        assert!(evaluate(&condition(Operator::Equals, "research".into()), &submissions));
        assert!(!evaluate(&condition(Operator::Equals, "teaching".into()), &submissions));
    }

    #[test]
    fn equals_coerces_numbers_to_strings() {
        let submissions = data("intake", serde_json::json!({"track": 3}));
        assert!(evaluate(&condition(Operator::Equals, "3".into()), &submissions));
        assert!(evaluate(&condition(Operator::Equals, 3.into()), &submissions));
    }

    #[test]
    fn not_equals_is_fail_closed_on_missing_field() {
        let submissions = data("intake", serde_json::json!({"other": "x"}));
        assert!(!evaluate(&condition(Operator::NotEquals, "research".into()), &submissions));
    }

    #[test]
    fn missing_node_evaluates_false() {
        let submissions = HashMap::new();
        assert!(!evaluate(&condition(Operator::Equals, "research".into()), &submissions));
    }

    #[test]
    fn null_field_evaluates_false() {
        let submissions = data("intake", serde_json::json!({"track": null}));
        assert!(!evaluate(&condition(Operator::Equals, "null".into()), &submissions));
    }

    #[test]
    fn contains_on_strings_and_arrays() {
        let text = data("intake", serde_json::json!({"track": "applied research"}));
        assert!(evaluate(&condition(Operator::Contains, "research".into()), &text));

        let list = data("intake", serde_json::json!({"track": ["teaching", "research"]}));
        assert!(evaluate(&condition(Operator::Contains, "research".into()), &list));
        assert!(!evaluate(&condition(Operator::Contains, "admin".into()), &list));
    }

    #[test]
    fn deserializes_camel_case_aliases() {
        let raw = serde_json::json!({
            "nodeId": "intake",
            "fieldKey": "track",
            "operator": "not_equals",
            "value": "x"
        });
        let parsed: Condition = serde_json::from_value(raw).expect("condition");
        assert_eq!(parsed.node_slug, "intake");
        assert_eq!(parsed.operator, Operator::NotEquals);
    }
}
