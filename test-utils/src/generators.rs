//! Shared proptest generators for the contract engine.
//!
//! Generated object keys are short lowercase words, so they never collide
//! with the reserved matcher key. Numbers are integers only: a float and an
//! integer that compare equal by value would break literal-identity laws.

use pact_engine::matchers::MatchSpec;
use pact_engine::{ContractDocument, Interaction, RequestSpec, ResponseSpec};
use proptest::collection::{btree_map, vec};
use proptest::option;
use proptest::prelude::*;
use serde_json::{Map, Value};

/// Generate object keys.
pub fn key_strategy() -> impl Strategy<Value = String> {
    "[a-z]{1,8}"
}

/// Generate JSON scalars (null, booleans, integers, strings).
pub fn json_scalar_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        (-1_000_000i64..1_000_000).prop_map(Value::from),
        "[a-zA-Z0-9 ]{0,12}".prop_map(Value::String),
    ]
}

/// Generate arbitrary JSON values up to a few levels deep.
pub fn json_value_strategy() -> impl Strategy<Value = Value> {
    json_scalar_strategy().prop_recursive(3, 32, 4, |inner| {
        prop_oneof![
            vec(inner.clone(), 0..4).prop_map(Value::Array),
            btree_map(key_strategy(), inner, 0..4)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

/// Generate JSON values whose arrays repeat a single element, so every
/// array element has the same shape as the first.
pub fn homogeneous_value_strategy() -> impl Strategy<Value = Value> {
    json_scalar_strategy().prop_recursive(3, 32, 4, |inner| {
        prop_oneof![
            (inner.clone(), 0usize..4).prop_map(|(element, len)| Value::Array(vec![element; len])),
            btree_map(key_strategy(), inner, 0..4)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

/// Generate composite (object) examples for shape matching.
pub fn json_object_strategy() -> impl Strategy<Value = Value> {
    btree_map(key_strategy(), homogeneous_value_strategy(), 1..5)
        .prop_map(|m| Value::Object(m.into_iter().collect()))
}

/// Same-typed variant of `value` with an extra key added to every object.
///
/// Scalars change value but keep their type; arrays keep their length.
#[must_use]
pub fn widen(value: &Value) -> Value {
    match value {
        Value::Null => Value::Null,
        Value::Bool(b) => Value::Bool(!b),
        Value::Number(n) => Value::from(n.as_i64().unwrap_or_default().wrapping_add(7)),
        Value::String(s) => Value::String(format!("{s}~")),
        Value::Array(items) => Value::Array(items.iter().map(widen).collect()),
        Value::Object(map) => {
            let mut widened: Map<String, Value> =
                map.iter().map(|(k, v)| (k.clone(), widen(v))).collect();
            widened.insert("extra_field".to_string(), Value::from("added"));
            Value::Object(widened)
        }
    }
}

/// Generate match specs mixing all three matcher kinds.
pub fn match_spec_strategy() -> impl Strategy<Value = MatchSpec> {
    let leaf = prop_oneof![
        json_scalar_strategy().prop_map(MatchSpec::from),
        homogeneous_value_strategy().prop_map(MatchSpec::TypeLike),
    ];
    leaf.prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            (inner.clone(), 0usize..3)
                .prop_map(|(template, min)| MatchSpec::each_like(template, min)),
            btree_map(key_strategy(), inner.clone(), 0..4).prop_map(MatchSpec::object),
            vec(inner, 0..3).prop_map(MatchSpec::array),
        ]
    })
}

/// Generate HTTP methods.
pub fn http_method_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("GET".to_string()),
        Just("POST".to_string()),
        Just("PUT".to_string()),
        Just("DELETE".to_string()),
        Just("patch".to_string()),
    ]
}

/// Generate request path specs.
pub fn path_spec_strategy() -> impl Strategy<Value = MatchSpec> {
    "/[a-z]{1,8}(/[0-9]{1,3})?".prop_flat_map(|path| {
        prop_oneof![
            Just(MatchSpec::from(path.clone())),
            Just(MatchSpec::like(path)),
        ]
    })
}

/// Generate header spec maps.
pub fn headers_strategy() -> impl Strategy<Value = std::collections::BTreeMap<String, MatchSpec>> {
    btree_map(
        "X-[A-Z][a-z]{1,6}",
        "[a-z0-9]{1,8}".prop_map(MatchSpec::from),
        0..3,
    )
}

/// Generate valid interactions.
pub fn interaction_strategy() -> impl Strategy<Value = Interaction> {
    (
        ("[a-z][a-z0-9 ]{0,24}", option::of("[a-z][a-z ]{0,16}")),
        (http_method_strategy(), path_spec_strategy()),
        (headers_strategy(), option::of(match_spec_strategy())),
        (100u16..600, any::<bool>()),
        (headers_strategy(), option::of(match_spec_strategy())),
    )
        .prop_map(
            |(
                (description, provider_state),
                (method, path),
                (req_headers, req_body),
                (status, shaped),
                (res_headers, res_body),
            )| {
                let status = if shaped {
                    MatchSpec::like(status)
                } else {
                    MatchSpec::from(status)
                };
                Interaction {
                    description,
                    provider_state,
                    request: RequestSpec {
                        method,
                        path,
                        headers: req_headers,
                        body: req_body,
                    },
                    response: ResponseSpec {
                        status,
                        headers: res_headers,
                        body: res_body,
                    },
                }
            },
        )
}

/// Generate participant names.
pub fn participant_name_strategy() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9-]{0,15}"
}

/// Generate valid contract documents with up to four interactions.
pub fn contract_document_strategy() -> impl Strategy<Value = ContractDocument> {
    (
        participant_name_strategy(),
        participant_name_strategy(),
        vec(interaction_strategy(), 0..4),
    )
        .prop_map(|(consumer, provider, interactions)| {
            interactions
                .into_iter()
                .fold(ContractDocument::new(consumer, provider), ContractDocument::with_interaction)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::strategy::ValueTree;
    use proptest::test_runner::TestRunner;

    #[test]
    fn test_widen_adds_keys_and_keeps_types() {
        let value = serde_json::json!({"a": 1, "b": ["x"], "c": {"d": true}});
        let widened = widen(&value);
        assert_eq!(widened["extra_field"], "added");
        assert_eq!(widened["c"]["extra_field"], "added");
        assert_eq!(widened["a"], 8);
        assert_eq!(widened["b"][0], "x~");
    }

    #[test]
    fn test_generated_interactions_are_valid() {
        let mut runner = TestRunner::default();
        for _ in 0..50 {
            let interaction = interaction_strategy()
                .new_tree(&mut runner)
                .unwrap()
                .current();
            assert!(interaction.validate().is_ok(), "{interaction:?}");
        }
    }
}
