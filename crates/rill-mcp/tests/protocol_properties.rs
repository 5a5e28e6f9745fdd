//! Protocol Property Tests
//!
//! Property-based coverage of the meta-key grammar and message
//! round-trips.

use proptest::prelude::*;
use regex::Regex;

use rill_mcp::protocol::{
    is_valid_meta_key, JsonRpcMessageTrait, JsonRpcRequest, RequestId,
};

/// The normative meta-key grammar, compiled independently of the
/// implementation under test
fn reference_pattern() -> Regex {
    Regex::new(
        r"^([a-zA-Z][a-zA-Z0-9-]*(\.[a-zA-Z][a-zA-Z0-9-]*)*/)?[a-zA-Z0-9]([a-zA-Z0-9._-]*[a-zA-Z0-9])?$",
    )
    .unwrap()
}

/// Keys built from the grammar itself, so acceptance is checked against
/// an independent construction
fn valid_key_strategy() -> impl Strategy<Value = String> {
    let label = proptest::string::string_regex("[a-zA-Z][a-zA-Z0-9-]{0,5}").unwrap();
    let prefix = proptest::collection::vec(label, 1..4).prop_map(|labels| labels.join("."));
    let name =
        proptest::string::string_regex("[a-zA-Z0-9]([a-zA-Z0-9._-]{0,6}[a-zA-Z0-9])?").unwrap();
    (proptest::option::of(prefix), name).prop_map(|(prefix, name)| match prefix {
        Some(prefix) => format!("{prefix}/{name}"),
        None => name,
    })
}

proptest! {
    #[test]
    fn grammar_constructed_keys_are_accepted(key in valid_key_strategy()) {
        prop_assert!(is_valid_meta_key(&key), "rejected grammar-built key {key:?}");
    }

    #[test]
    fn acceptance_agrees_with_the_reference_regex(key in "[a-zA-Z0-9./_-]{0,16}") {
        let expected = !key.is_empty() && reference_pattern().is_match(&key);
        prop_assert_eq!(is_valid_meta_key(&key), expected, "key {:?}", key);
    }

    #[test]
    fn requests_round_trip(
        method in "[a-z][a-z/]{0,15}",
        id in proptest::num::i64::ANY,
        param in proptest::num::i64::ANY,
    ) {
        let request = JsonRpcRequest::new(
            method,
            Some(serde_json::json!({"value": param})),
            RequestId::new_number(id),
        );
        let json = request.to_json().unwrap();
        let parsed = JsonRpcRequest::from_json(&json).unwrap();
        prop_assert_eq!(request, parsed);
    }

    #[test]
    fn string_ids_round_trip(id in "[a-zA-Z0-9-]{1,24}") {
        let request = JsonRpcRequest::new("ping", None, RequestId::new_string(id));
        let parsed = JsonRpcRequest::from_json(&request.to_json().unwrap()).unwrap();
        prop_assert_eq!(request, parsed);
    }
}
