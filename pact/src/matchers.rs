//! Matcher engine.
//!
//! A [`MatchSpec`] describes what counts as a valid value at some position
//! of a request or response: an exact literal, a value of the same shape
//! as an example ([`MatchSpec::TypeLike`]), or an array whose every element
//! follows a template ([`MatchSpec::EachLike`]).
//!
//! Matching is pure. A failed match reports every mismatch found, each with
//! a JSON pointer (RFC 6901) to the offending position. Descent stops below
//! a type mismatch since nothing useful can be said about the children of a
//! string that should have been an object.

use reqwest::header::HeaderMap;
use serde::de::{self, Deserializer};
use serde::ser::{self, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Object key that marks a matcher in the on-disk encoding.
pub const MATCHER_KEY: &str = "pact:matcher:type";

const TYPE_TAG: &str = "type";
const EACH_LIKE_TAG: &str = "eachLike";

/// Rule describing what counts as a matching JSON value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchSpec {
    /// Deep equality; sequences and mappings may nest further specs.
    Literal(Literal),
    /// Same JSON type category (and, for composites, the same minimum shape)
    /// as the example.
    TypeLike(Value),
    /// Array of at least `min` elements, each matching `template`.
    EachLike {
        /// Spec every element must satisfy
        template: Box<MatchSpec>,
        /// Minimum number of elements
        min: usize,
    },
}

/// Literal value whose composite members are themselves specs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Literal {
    /// JSON null
    Null,
    /// JSON boolean
    Bool(bool),
    /// JSON number
    Number(Number),
    /// JSON string
    String(String),
    /// Ordered sequence
    Array(Vec<MatchSpec>),
    /// Mapping of keys to specs
    Object(BTreeMap<String, MatchSpec>),
}

/// JSON type category used for shape matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonType {
    /// null
    Null,
    /// true/false
    Boolean,
    /// any number
    Number,
    /// any string
    String,
    /// any array
    Array,
    /// any object
    Object,
}

impl JsonType {
    /// Type category of a concrete value.
    #[must_use]
    pub const fn of(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(_) => Self::Boolean,
            Value::Number(_) => Self::Number,
            Value::String(_) => Self::String,
            Value::Array(_) => Self::Array,
            Value::Object(_) => Self::Object,
        }
    }

    /// Lowercase name used in mismatch reasons.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Boolean => "boolean",
            Self::Number => "number",
            Self::String => "string",
            Self::Array => "array",
            Self::Object => "object",
        }
    }
}

impl fmt::Display for JsonType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One mismatch between a spec and an actual value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mismatch {
    /// JSON pointer to the offending position
    pub path: String,
    /// Human-readable reason
    pub reason: String,
}

impl Mismatch {
    /// Create a mismatch at `path`.
    #[must_use]
    pub fn new(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let path = if self.path.is_empty() { "/" } else { &self.path };
        write!(f, "{path}: {}", self.reason)
    }
}

/// Result of matching a value against a spec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchOutcome {
    /// Whether the value satisfied the spec
    pub ok: bool,
    /// Pointer of the first mismatch (empty when `ok`)
    pub path: String,
    /// Reason of the first mismatch (empty when `ok`)
    pub reason: String,
    /// Every mismatch found, in discovery order
    pub mismatches: Vec<Mismatch>,
}

impl MatchOutcome {
    fn from_mismatches(mismatches: Vec<Mismatch>) -> Self {
        let (path, reason) = mismatches
            .first()
            .map(|m| (m.path.clone(), m.reason.clone()))
            .unwrap_or_default();
        Self {
            ok: mismatches.is_empty(),
            path,
            reason,
            mismatches,
        }
    }
}

/// Malformed matcher encoding.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodingError {
    /// Tag names a matcher this engine does not know
    #[error("unknown matcher type '{0}'")]
    UnknownMatcher(String),

    /// Tag is present but not a string
    #[error("matcher type tag must be a string")]
    InvalidTag,

    /// Required field missing from a matcher object
    #[error("matcher '{matcher}' is missing field '{field}'")]
    MissingField {
        /// Matcher tag
        matcher: &'static str,
        /// Missing field name
        field: &'static str,
    },

    /// `min` is not a non-negative integer
    #[error("matcher 'eachLike' has invalid 'min': expected a non-negative integer")]
    InvalidMin,

    /// A literal object uses the reserved matcher key
    #[error("key '{MATCHER_KEY}' is reserved for matcher encodings")]
    ReservedKey,
}

impl MatchSpec {
    /// Literal spec built from a plain JSON value.
    #[must_use]
    pub fn literal(value: impl Into<Value>) -> Self {
        Self::from(value.into())
    }

    /// Shape spec: any value of the example's type category matches.
    #[must_use]
    pub fn like(example: impl Into<Value>) -> Self {
        Self::TypeLike(example.into())
    }

    /// Array spec requiring at least `min` elements matching `template`.
    #[must_use]
    pub fn each_like(template: impl Into<Self>, min: usize) -> Self {
        Self::EachLike {
            template: Box::new(template.into()),
            min,
        }
    }

    /// Literal object whose members are arbitrary specs.
    pub fn object<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, Self)>,
        K: Into<String>,
    {
        Self::Literal(Literal::Object(
            entries.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        ))
    }

    /// Literal array whose items are arbitrary specs.
    pub fn array<I>(items: I) -> Self
    where
        I: IntoIterator<Item = Self>,
    {
        Self::Literal(Literal::Array(items.into_iter().collect()))
    }

    /// Concrete value this spec stands for.
    ///
    /// Literals reproduce themselves, `TypeLike` yields its example and
    /// `EachLike` yields `max(min, 1)` copies of its template's example.
    #[must_use]
    pub fn example(&self) -> Value {
        match self {
            Self::Literal(literal) => literal.example(),
            Self::TypeLike(example) => example.clone(),
            Self::EachLike { template, min } => {
                Value::Array(vec![template.example(); (*min).max(1)])
            }
        }
    }

    /// Type category a matching value must have.
    #[must_use]
    pub fn json_type(&self) -> JsonType {
        match self {
            Self::Literal(literal) => literal.json_type(),
            Self::TypeLike(example) => JsonType::of(example),
            Self::EachLike { .. } => JsonType::Array,
        }
    }

    const fn is_composite_literal(&self) -> bool {
        matches!(
            self,
            Self::Literal(Literal::Array(_) | Literal::Object(_))
        )
    }

    /// Encode into the on-disk JSON form.
    ///
    /// # Errors
    ///
    /// Fails if a literal object uses the reserved [`MATCHER_KEY`].
    pub fn encode(&self) -> Result<Value, EncodingError> {
        match self {
            Self::Literal(literal) => literal.encode(),
            Self::TypeLike(example) => {
                let mut map = Map::new();
                map.insert(MATCHER_KEY.to_string(), Value::from(TYPE_TAG));
                map.insert("value".to_string(), example.clone());
                Ok(Value::Object(map))
            }
            Self::EachLike { template, min } => {
                let mut map = Map::new();
                map.insert(MATCHER_KEY.to_string(), Value::from(EACH_LIKE_TAG));
                map.insert("min".to_string(), Value::from(*min));
                map.insert("value".to_string(), template.encode()?);
                Ok(Value::Object(map))
            }
        }
    }

    /// Decode from the on-disk JSON form.
    ///
    /// # Errors
    ///
    /// Fails on unknown matcher tags and malformed matcher objects.
    pub fn decode(value: Value) -> Result<Self, EncodingError> {
        match value {
            Value::Null => Ok(Self::Literal(Literal::Null)),
            Value::Bool(b) => Ok(Self::Literal(Literal::Bool(b))),
            Value::Number(n) => Ok(Self::Literal(Literal::Number(n))),
            Value::String(s) => Ok(Self::Literal(Literal::String(s))),
            Value::Array(items) => items
                .into_iter()
                .map(Self::decode)
                .collect::<Result<Vec<_>, _>>()
                .map(|items| Self::Literal(Literal::Array(items))),
            Value::Object(mut map) => match map.remove(MATCHER_KEY) {
                None => map
                    .into_iter()
                    .map(|(k, v)| Self::decode(v).map(|spec| (k, spec)))
                    .collect::<Result<BTreeMap<_, _>, _>>()
                    .map(|entries| Self::Literal(Literal::Object(entries))),
                Some(Value::String(tag)) => Self::decode_matcher(&tag, map),
                Some(_) => Err(EncodingError::InvalidTag),
            },
        }
    }

    fn decode_matcher(tag: &str, mut map: Map<String, Value>) -> Result<Self, EncodingError> {
        match tag {
            TYPE_TAG => map
                .remove("value")
                .map(Self::TypeLike)
                .ok_or(EncodingError::MissingField {
                    matcher: TYPE_TAG,
                    field: "value",
                }),
            EACH_LIKE_TAG => {
                let min = match map.remove("min") {
                    None => 1,
                    Some(v) => v
                        .as_u64()
                        .and_then(|n| usize::try_from(n).ok())
                        .ok_or(EncodingError::InvalidMin)?,
                };
                let template = map.remove("value").ok_or(EncodingError::MissingField {
                    matcher: EACH_LIKE_TAG,
                    field: "value",
                })?;
                Ok(Self::each_like(Self::decode(template)?, min))
            }
            other => Err(EncodingError::UnknownMatcher(other.to_string())),
        }
    }
}

impl Literal {
    fn example(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Number(n) => Value::Number(n.clone()),
            Self::String(s) => Value::String(s.clone()),
            Self::Array(items) => Value::Array(items.iter().map(MatchSpec::example).collect()),
            Self::Object(entries) => Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.example()))
                    .collect(),
            ),
        }
    }

    const fn json_type(&self) -> JsonType {
        match self {
            Self::Null => JsonType::Null,
            Self::Bool(_) => JsonType::Boolean,
            Self::Number(_) => JsonType::Number,
            Self::String(_) => JsonType::String,
            Self::Array(_) => JsonType::Array,
            Self::Object(_) => JsonType::Object,
        }
    }

    fn encode(&self) -> Result<Value, EncodingError> {
        match self {
            Self::Array(items) => items
                .iter()
                .map(MatchSpec::encode)
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Self::Object(entries) => {
                if entries.contains_key(MATCHER_KEY) {
                    return Err(EncodingError::ReservedKey);
                }
                entries
                    .iter()
                    .map(|(k, v)| v.encode().map(|encoded| (k.clone(), encoded)))
                    .collect::<Result<Map<_, _>, _>>()
                    .map(Value::Object)
            }
            scalar => Ok(scalar.example()),
        }
    }
}

impl From<Value> for MatchSpec {
    fn from(value: Value) -> Self {
        Self::Literal(match value {
            Value::Null => Literal::Null,
            Value::Bool(b) => Literal::Bool(b),
            Value::Number(n) => Literal::Number(n),
            Value::String(s) => Literal::String(s),
            Value::Array(items) => Literal::Array(items.into_iter().map(Self::from).collect()),
            Value::Object(map) => {
                Literal::Object(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect())
            }
        })
    }
}

impl From<&str> for MatchSpec {
    fn from(value: &str) -> Self {
        Self::Literal(Literal::String(value.to_string()))
    }
}

impl From<String> for MatchSpec {
    fn from(value: String) -> Self {
        Self::Literal(Literal::String(value))
    }
}

impl From<u16> for MatchSpec {
    fn from(value: u16) -> Self {
        Self::Literal(Literal::Number(Number::from(value)))
    }
}

impl From<i32> for MatchSpec {
    fn from(value: i32) -> Self {
        Self::Literal(Literal::Number(Number::from(value)))
    }
}

impl From<i64> for MatchSpec {
    fn from(value: i64) -> Self {
        Self::Literal(Literal::Number(Number::from(value)))
    }
}

impl From<bool> for MatchSpec {
    fn from(value: bool) -> Self {
        Self::Literal(Literal::Bool(value))
    }
}

impl Serialize for MatchSpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.encode()
            .map_err(ser::Error::custom)?
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for MatchSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::decode(value).map_err(de::Error::custom)
    }
}

/// Shape matcher, as in `like(1)`.
#[must_use]
pub fn like(example: impl Into<Value>) -> MatchSpec {
    MatchSpec::like(example)
}

/// Array matcher with at least one element, as in `each_like({...})`.
#[must_use]
pub fn each_like(template: impl Into<MatchSpec>) -> MatchSpec {
    MatchSpec::each_like(template, 1)
}

/// Match `actual` against `spec` with pointers rooted at the document root.
#[must_use]
pub fn matches(spec: &MatchSpec, actual: &Value) -> MatchOutcome {
    matches_at(spec, actual, "")
}

/// Match `actual` against `spec` with pointers prefixed by `base_path`.
#[must_use]
pub fn matches_at(spec: &MatchSpec, actual: &Value, base_path: &str) -> MatchOutcome {
    let mut mismatches = Vec::new();
    match_spec(spec, actual, base_path, false, &mut mismatches);
    MatchOutcome::from_mismatches(mismatches)
}

/// Match a header value, treating `Content-Type` by media type.
///
/// A literal `Content-Type` expectation accepts any actual value with the
/// same media type (case-insensitive) that carries at least the expected
/// parameters, so `application/json` accepts `application/json; charset=utf-8`.
#[must_use]
pub fn match_header(
    name: &str,
    spec: &MatchSpec,
    actual: Option<&str>,
    path: &str,
) -> Vec<Mismatch> {
    let Some(actual) = actual else {
        return vec![Mismatch::new(path, format!("missing header '{name}'"))];
    };

    if name.eq_ignore_ascii_case("content-type") {
        if let MatchSpec::Literal(Literal::String(expected)) = spec {
            return if content_type_matches(expected, actual) {
                Vec::new()
            } else {
                vec![Mismatch::new(
                    path,
                    format!("expected content type '{expected}', got '{actual}'"),
                )]
            };
        }
    }

    match spec {
        MatchSpec::Literal(literal @ (Literal::Number(_) | Literal::Bool(_))) => {
            let expected = literal.example().to_string();
            if expected == actual.trim() {
                Vec::new()
            } else {
                vec![Mismatch::new(path, format!("expected {expected}, got {actual}"))]
            }
        }
        MatchSpec::TypeLike(example @ (Value::Number(_) | Value::Bool(_))) => {
            match serde_json::from_str::<Value>(actual.trim()) {
                Ok(parsed) if JsonType::of(&parsed) == JsonType::of(example) => Vec::new(),
                _ => vec![Mismatch::new(
                    path,
                    format!("expected type {}, got '{actual}'", JsonType::of(example)),
                )],
            }
        }
        _ => matches_at(spec, &Value::String(actual.to_string()), path).mismatches,
    }
}

/// Match every header spec against a header map.
///
/// Names compare case-insensitively; repeated headers are joined with
/// `", "`. Pointers are `<base_path>/<lowercased name>`.
#[must_use]
pub fn match_headers(
    specs: &BTreeMap<String, MatchSpec>,
    headers: &HeaderMap,
    base_path: &str,
) -> Vec<Mismatch> {
    specs
        .iter()
        .flat_map(|(name, spec)| {
            let actual = joined_header(headers, name);
            let path = pointer_child(base_path, &name.to_ascii_lowercase());
            match_header(name, spec, actual.as_deref(), &path)
        })
        .collect()
}

fn joined_header(headers: &HeaderMap, name: &str) -> Option<String> {
    let values: Vec<&str> = headers
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect();
    (!values.is_empty()).then(|| values.join(", "))
}

/// Interpret raw body bytes as a matchable value.
///
/// Empty bodies are absent, JSON bodies are parsed, anything else is
/// matched as a (lossily decoded) string.
#[must_use]
pub fn body_value(bytes: &[u8]) -> Option<Value> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return None;
    }
    Some(
        serde_json::from_slice(bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned())),
    )
}

/// Wire form of an example body.
///
/// A string example is sent as raw text unless the content type is JSON
/// (or absent, which means JSON); every other example is serialized.
#[must_use]
pub fn body_text(example: &Value, content_type: Option<&str>) -> String {
    match example {
        Value::String(text) if content_type.is_some_and(|ct| !is_json_content_type(ct)) => {
            text.clone()
        }
        other => other.to_string(),
    }
}

/// `application/json` or any `+json` media type.
#[must_use]
pub fn is_json_content_type(content_type: &str) -> bool {
    let (media_type, _) = split_media_type(content_type);
    let media_type = media_type.to_ascii_lowercase();
    media_type == "application/json" || media_type.ends_with("+json")
}

fn content_type_matches(expected: &str, actual: &str) -> bool {
    let (expected_type, expected_params) = split_media_type(expected);
    let (actual_type, actual_params) = split_media_type(actual);

    expected_type.eq_ignore_ascii_case(actual_type)
        && expected_params.iter().all(|(key, value)| {
            actual_params
                .iter()
                .any(|(k, v)| k.eq_ignore_ascii_case(key) && v.eq_ignore_ascii_case(value))
        })
}

fn split_media_type(raw: &str) -> (&str, Vec<(&str, &str)>) {
    let mut parts = raw.split(';');
    let media_type = parts.next().unwrap_or_default().trim();
    let params = parts
        .filter_map(|p| p.split_once('='))
        .map(|(k, v)| (k.trim(), v.trim().trim_matches('"')))
        .collect();
    (media_type, params)
}

/// Append an escaped object key or array index to a JSON pointer.
#[must_use]
pub fn pointer_child(path: &str, key: &str) -> String {
    format!("{path}/{}", key.replace('~', "~0").replace('/', "~1"))
}

fn match_spec(
    spec: &MatchSpec,
    actual: &Value,
    path: &str,
    cascade: bool,
    out: &mut Vec<Mismatch>,
) {
    if let Some(reason) = type_mismatch(spec, actual, cascade) {
        out.push(Mismatch::new(path, reason));
        return;
    }

    match spec {
        MatchSpec::Literal(literal) => match_literal(literal, actual, path, cascade, out),
        MatchSpec::TypeLike(example) => {
            let shape = MatchSpec::from(example.clone());
            match_spec(&shape, actual, path, true, out);
        }
        MatchSpec::EachLike { template, min } => {
            let Value::Array(items) = actual else {
                return;
            };
            if items.len() < *min {
                out.push(Mismatch::new(
                    path,
                    format!("expected at least {min} element(s), got {}", items.len()),
                ));
            }
            let element_cascade = cascade || template.is_composite_literal();
            match_elements(items.iter().enumerate(), template, path, element_cascade, out);
        }
    }
}

fn type_mismatch(spec: &MatchSpec, actual: &Value, cascade: bool) -> Option<String> {
    let expected = spec.json_type();
    let got = JsonType::of(actual);
    if expected == got {
        return None;
    }
    match spec {
        MatchSpec::Literal(literal) if !cascade && !spec.is_composite_literal() => {
            Some(format!("expected {}, got {actual}", literal.example()))
        }
        _ => Some(format!("expected type {expected}, got {got}")),
    }
}

fn match_literal(
    literal: &Literal,
    actual: &Value,
    path: &str,
    cascade: bool,
    out: &mut Vec<Mismatch>,
) {
    match (literal, actual) {
        (Literal::Object(entries), Value::Object(map)) => {
            let mut descend = Vec::new();
            for (key, child) in entries {
                let child_path = pointer_child(path, key);
                match map.get(key) {
                    None => out.push(Mismatch::new(child_path, format!("missing key '{key}'"))),
                    Some(value) => match type_mismatch(child, value, cascade) {
                        Some(reason) => out.push(Mismatch::new(child_path, reason)),
                        None => descend.push((child, value, child_path)),
                    },
                }
            }
            if !cascade {
                for key in map.keys().filter(|k| !entries.contains_key(*k)) {
                    out.push(Mismatch::new(
                        pointer_child(path, key),
                        format!("unexpected key '{key}'"),
                    ));
                }
            }
            for (child, value, child_path) in descend {
                match_spec(child, value, &child_path, cascade, out);
            }
        }
        (Literal::Array(items), Value::Array(values)) => {
            if cascade {
                if let Some(template) = items.first() {
                    match_elements(values.iter().enumerate(), template, path, true, out);
                }
                return;
            }
            if items.len() != values.len() {
                out.push(Mismatch::new(
                    path,
                    format!("expected array of length {}, got {}", items.len(), values.len()),
                ));
            }
            let mut descend = Vec::new();
            for (index, (item, value)) in items.iter().zip(values).enumerate() {
                let child_path = pointer_child(path, &index.to_string());
                match type_mismatch(item, value, false) {
                    Some(reason) => out.push(Mismatch::new(child_path, reason)),
                    None => descend.push((item, value, child_path)),
                }
            }
            for (item, value, child_path) in descend {
                match_spec(item, value, &child_path, false, out);
            }
        }
        _ if cascade => {}
        (Literal::Number(expected), Value::Number(got)) => {
            if !numbers_equal(expected, got) {
                out.push(Mismatch::new(path, format!("expected {expected}, got {got}")));
            }
        }
        (expected, got) => {
            let expected = expected.example();
            if &expected != got {
                out.push(Mismatch::new(path, format!("expected {expected}, got {got}")));
            }
        }
    }
}

fn match_elements<'a>(
    items: impl Iterator<Item = (usize, &'a Value)>,
    template: &MatchSpec,
    path: &str,
    cascade: bool,
    out: &mut Vec<Mismatch>,
) {
    let mut descend = Vec::new();
    for (index, value) in items {
        let child_path = pointer_child(path, &index.to_string());
        match type_mismatch(template, value, cascade) {
            Some(reason) => out.push(Mismatch::new(child_path, reason)),
            None => descend.push((value, child_path)),
        }
    }
    for (value, child_path) in descend {
        match_spec(template, value, &child_path, cascade, out);
    }
}

#[allow(clippy::float_cmp)]
fn numbers_equal(a: &Number, b: &Number) -> bool {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        return x == y;
    }
    if let (Some(x), Some(y)) = (a.as_u64(), b.as_u64()) {
        return x == y;
    }
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}
