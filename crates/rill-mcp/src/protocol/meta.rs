//! `_meta` Field Codec
//!
//! MCP reserves the `_meta` params/result field for protocol-level metadata
//! such as progress tokens. Keys follow the form `[prefix/]name` where the
//! optional prefix is a sequence of dot-separated labels. This module
//! validates that grammar on both encode and decode, and provides the
//! combined general-fields codec used by message payloads that mix typed
//! fields with dynamic ones.

// Layer 1: Standard library imports
use std::collections::HashSet;
use std::fmt;
use std::sync::OnceLock;

// Layer 2: Third-party crate imports
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// Layer 3: Internal module imports
use super::errors::{McpError, McpResult};

/// Reserved key under which meta fields are carried on the wire
pub const META_KEY: &str = "_meta";

/// Key within `_meta` that carries the progress token of a request
pub const PROGRESS_TOKEN_KEY: &str = "progressToken";

/// Grammar for `_meta` keys: `[prefix/]name`
///
/// - `prefix` (optional): dot-separated labels; each label starts with a
///   letter and contains only letters, digits, and hyphens.
/// - `name`: starts and ends alphanumeric; the interior may include
///   hyphen, underscore, and dot.
fn meta_key_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        #[allow(clippy::unwrap_used)] // the pattern is a compile-time constant
        let pattern = Regex::new(
            r"^([a-zA-Z][a-zA-Z0-9-]*(\.[a-zA-Z][a-zA-Z0-9-]*)*/)?[a-zA-Z0-9]([a-zA-Z0-9._-]*[a-zA-Z0-9])?$",
        )
        .unwrap();
        pattern
    })
}

/// Check a single `_meta` key against the grammar
pub fn is_valid_meta_key(key: &str) -> bool {
    !key.is_empty() && meta_key_pattern().is_match(key)
}

/// Validated `_meta` mapping
///
/// Construction and deserialization validate every key; an invalid key
/// fails with an "invalid meta key" error before any bytes are written or
/// accepted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetaFields {
    fields: Map<String, Value>,
}

impl MetaFields {
    /// Create an empty meta mapping
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a raw JSON map, validating every key
    ///
    /// # Errors
    ///
    /// Returns [`McpError::InvalidParams`] naming the offending key.
    pub fn from_map(fields: Map<String, Value>) -> McpResult<Self> {
        for key in fields.keys() {
            if !is_valid_meta_key(key) {
                return Err(McpError::invalid_params(format!("invalid meta key: {key:?}")));
            }
        }
        Ok(Self { fields })
    }

    /// Insert a key/value pair, validating the key
    ///
    /// # Errors
    ///
    /// Returns [`McpError::InvalidParams`] if the key violates the grammar.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> McpResult<()> {
        let key = key.into();
        if !is_valid_meta_key(&key) {
            return Err(McpError::invalid_params(format!("invalid meta key: {key:?}")));
        }
        self.fields.insert(key, value);
        Ok(())
    }

    /// Look up a value by key
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Whether the mapping has no entries
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// The underlying wire map
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Consume into the underlying wire map
    pub fn into_map(self) -> Map<String, Value> {
        self.fields
    }
}

impl Serialize for MetaFields {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::Error;
        for key in self.fields.keys() {
            if !is_valid_meta_key(key) {
                return Err(S::Error::custom(format!("invalid meta key: {key:?}")));
            }
        }
        self.fields.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for MetaFields {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        use serde::de::Error;
        let fields = Map::<String, Value>::deserialize(deserializer)?;
        MetaFields::from_map(fields).map_err(|e| D::Error::custom(e.to_string()))
    }
}

/// Progress token attached to a request via `_meta.progressToken`
///
/// String or integer; MUST be unique across all in-flight requests within
/// a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProgressToken {
    /// String-based token
    String(String),
    /// Numeric token
    Number(i64),
}

impl fmt::Display for ProgressToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgressToken::String(s) => write!(f, "{s}"),
            ProgressToken::Number(n) => write!(f, "{n}"),
        }
    }
}

/// Request-level meta view with typed projections
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestMeta {
    fields: MetaFields,
}

impl RequestMeta {
    /// Extract the `_meta` object of a params value, validating its keys
    ///
    /// Absent or empty `_meta` yields an empty view.
    ///
    /// # Errors
    ///
    /// Returns [`McpError::InvalidParams`] when `_meta` is present but not
    /// an object, or carries an invalid key.
    pub fn from_params(params: Option<&Value>) -> McpResult<Self> {
        let Some(meta) = params.and_then(|p| p.get(META_KEY)) else {
            return Ok(Self::default());
        };
        let Value::Object(map) = meta else {
            return Err(McpError::invalid_params("_meta must be an object"));
        };
        Ok(Self {
            fields: MetaFields::from_map(map.clone())?,
        })
    }

    /// Project `_meta.progressToken` to a typed token
    pub fn progress_token(&self) -> Option<ProgressToken> {
        match self.fields.get(PROGRESS_TOKEN_KEY) {
            Some(Value::String(s)) => Some(ProgressToken::String(s.clone())),
            Some(Value::Number(n)) => n.as_i64().map(ProgressToken::Number),
            _ => None,
        }
    }

    /// The validated meta mapping
    pub fn fields(&self) -> &MetaFields {
        &self.fields
    }
}

/// Meta plus dynamic fields shared by extensible payloads
///
/// On encode, `_meta` is emitted only when non-empty and `additional`
/// emits under its own keys, excluding a caller-supplied reserved set and
/// `_meta` itself.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeneralFields {
    /// Validated `_meta` mapping, if any
    pub meta: Option<MetaFields>,
    /// Dynamic fields outside the reserved set
    pub additional: Map<String, Value>,
}

impl GeneralFields {
    /// Merge into a wire object, skipping reserved keys
    ///
    /// # Errors
    ///
    /// Returns [`McpError::InvalidParams`] if a meta key violates the
    /// grammar.
    pub fn encode_into(
        &self,
        target: &mut Map<String, Value>,
        reserved: &HashSet<&str>,
    ) -> McpResult<()> {
        if let Some(meta) = &self.meta {
            if !meta.is_empty() {
                for key in meta.as_map().keys() {
                    if !is_valid_meta_key(key) {
                        return Err(McpError::invalid_params(format!(
                            "invalid meta key: {key:?}"
                        )));
                    }
                }
                target.insert(META_KEY.to_string(), Value::Object(meta.as_map().clone()));
            }
        }
        for (key, value) in &self.additional {
            if key == META_KEY || reserved.contains(key.as_str()) {
                continue;
            }
            target.insert(key.clone(), value.clone());
        }
        Ok(())
    }

    /// Split a wire object into meta and dynamic fields
    ///
    /// Keys in `reserved` are left to the typed decoder and skipped here.
    ///
    /// # Errors
    ///
    /// Returns [`McpError::InvalidParams`] when `_meta` carries an invalid
    /// key or is not an object.
    pub fn decode_from(source: &Map<String, Value>, reserved: &HashSet<&str>) -> McpResult<Self> {
        let mut meta = None;
        let mut additional = Map::new();

        for (key, value) in source {
            if key == META_KEY {
                let Value::Object(map) = value else {
                    return Err(McpError::invalid_params("_meta must be an object"));
                };
                meta = Some(MetaFields::from_map(map.clone())?);
            } else if !reserved.contains(key.as_str()) {
                additional.insert(key.clone(), value.clone());
            }
        }

        Ok(Self { meta, additional })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plain_names_are_valid() {
        for key in ["progressToken", "a", "0", "a.b-c_d", "trace-id", "x9"] {
            assert!(is_valid_meta_key(key), "expected valid: {key}");
        }
    }

    #[test]
    fn prefixed_names_are_valid() {
        for key in [
            "example/name",
            "com.example/name",
            "com.example.sub/trace-id",
            "a1/b",
            "a-/b",
        ] {
            assert!(is_valid_meta_key(key), "expected valid: {key}");
        }
    }

    #[test]
    fn invalid_keys_are_rejected() {
        for key in [
            "",
            "/foo",
            "foo/",
            ".a/b",
            "a./b",
            "com..example/n",
            "9abc/name",
            "-x",
            "x-",
            "a/b/c",
            "pre fix/name",
        ] {
            assert!(!is_valid_meta_key(key), "expected invalid: {key}");
        }
    }

    #[test]
    fn invalid_key_fails_construction() {
        let mut map = Map::new();
        map.insert("/foo".to_string(), json!(1));
        let err = MetaFields::from_map(map).unwrap_err();
        assert!(err.to_string().contains("invalid meta key"));
    }

    #[test]
    fn invalid_key_fails_serialization() {
        // Bypass the validating constructor to prove the encoder checks too
        let mut map = Map::new();
        map.insert("/foo".to_string(), json!(1));
        let meta = MetaFields { fields: map };
        assert!(serde_json::to_string(&meta).is_err());
    }

    #[test]
    fn progress_token_projection() {
        let params = json!({"_meta": {"progressToken": "p1"}, "name": "add"});
        let meta = RequestMeta::from_params(Some(&params)).unwrap();
        assert_eq!(
            meta.progress_token(),
            Some(ProgressToken::String("p1".to_string()))
        );

        let params = json!({"_meta": {"progressToken": 7}});
        let meta = RequestMeta::from_params(Some(&params)).unwrap();
        assert_eq!(meta.progress_token(), Some(ProgressToken::Number(7)));

        let meta = RequestMeta::from_params(None).unwrap();
        assert_eq!(meta.progress_token(), None);
    }

    #[test]
    fn general_fields_encode_excludes_reserved() {
        let mut meta = MetaFields::new();
        meta.insert("trace", json!("t-1")).unwrap();

        let mut additional = Map::new();
        additional.insert("extra".to_string(), json!(true));
        additional.insert("name".to_string(), json!("shadowed"));
        additional.insert(META_KEY.to_string(), json!({"smuggled": 1}));

        let general = GeneralFields {
            meta: Some(meta),
            additional,
        };

        let mut target = Map::new();
        target.insert("name".to_string(), json!("typed"));
        let reserved: HashSet<&str> = ["name"].into_iter().collect();
        general.encode_into(&mut target, &reserved).unwrap();

        assert_eq!(target["name"], json!("typed"));
        assert_eq!(target["extra"], json!(true));
        assert_eq!(target[META_KEY], json!({"trace": "t-1"}));
    }

    #[test]
    fn general_fields_decode_round_trip() {
        let source = json!({
            "name": "typed",
            "_meta": {"progressToken": "p"},
            "extra": [1, 2]
        });
        let Value::Object(map) = source else {
            unreachable!()
        };
        let reserved: HashSet<&str> = ["name"].into_iter().collect();
        let general = GeneralFields::decode_from(&map, &reserved).unwrap();
        assert!(general.meta.is_some());
        assert_eq!(general.additional.len(), 1);
        assert_eq!(general.additional["extra"], json!([1, 2]));
    }

    #[test]
    fn empty_meta_is_not_emitted() {
        let general = GeneralFields {
            meta: Some(MetaFields::new()),
            additional: Map::new(),
        };
        let mut target = Map::new();
        general.encode_into(&mut target, &HashSet::new()).unwrap();
        assert!(!target.contains_key(META_KEY));
    }
}
