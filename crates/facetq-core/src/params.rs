//! Typed access to a JSON parameter payload.
//!
//! Every identifier a caller supplies is coerced here, element by element,
//! before any statement text exists. Facet and boolean reads never fail.

use std::fmt;

use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

use crate::combinator::MatchMode;
use crate::error::ValidationError;
use crate::facets::{normalize_boolean, FacetFilter, WILDCARD};

/// Declared primitive type of a shape parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    Int,
    Str,
    IntList,
    Bool,
    /// One of a fixed set of spellings.
    Enum(&'static [&'static str]),
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamType::Int => f.write_str("int"),
            ParamType::Str => f.write_str("str"),
            ParamType::IntList => f.write_str("int[]"),
            ParamType::Bool => f.write_str("bool"),
            ParamType::Enum(values) => f.write_str(&values.join("|")),
        }
    }
}

impl Serialize for ParamType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Which scopes a node-centric shape looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeSelection {
    /// `"*"`, `["*"]`, or nothing at all.
    Every,
    Listed(Vec<i64>),
}

/// Read-only view over a request payload. Non-object payloads read as empty.
#[derive(Debug, Clone, Copy)]
pub struct Payload<'a> {
    raw: &'a Value,
    fields: Option<&'a Map<String, Value>>,
}

impl<'a> Payload<'a> {
    pub fn new(raw: &'a Value) -> Self {
        Self {
            raw,
            fields: raw.as_object(),
        }
    }

    pub fn raw(&self) -> &'a Value {
        self.raw
    }

    /// Present and non-null.
    pub fn get(&self, name: &str) -> Option<&'a Value> {
        self.field(name).filter(|v| !v.is_null())
    }

    fn field(&self, name: &str) -> Option<&'a Value> {
        self.fields.and_then(|f| f.get(name))
    }

    /// Optional integer. Absent, `null` and `""` read as `None`.
    pub fn int(&self, name: &str) -> Result<Option<i64>, ValidationError> {
        match self.get(name) {
            None => Ok(None),
            Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
            Some(v) => coerce_int(v)
                .map(Some)
                .ok_or_else(|| ValidationError::type_mismatch(name, ParamType::Int)),
        }
    }

    pub fn require_int(&self, name: &str) -> Result<i64, ValidationError> {
        self.int(name)?.ok_or_else(|| ValidationError::missing(name))
    }

    /// Integer list; absent or `null` reads as empty. Each element is
    /// validated on its own and reported as `name[i]`.
    pub fn int_list(&self, name: &str) -> Result<Vec<i64>, ValidationError> {
        match self.get(name) {
            None => Ok(Vec::new()),
            Some(Value::Array(items)) => items
                .iter()
                .enumerate()
                .map(|(i, v)| {
                    coerce_int(v).ok_or_else(|| {
                        ValidationError::type_mismatch(format!("{name}[{i}]"), ParamType::Int)
                    })
                })
                .collect(),
            Some(_) => Err(ValidationError::type_mismatch(name, ParamType::IntList)),
        }
    }

    /// Integer list where `"*"`, `["*"]` or an empty list select every scope.
    pub fn scope_selection(&self, name: &str) -> Result<ScopeSelection, ValidationError> {
        match self.get(name) {
            Some(Value::String(s)) if s.trim() == WILDCARD => Ok(ScopeSelection::Every),
            Some(Value::Array(items))
                if items.len() == 1 && items[0].as_str().map(str::trim) == Some(WILDCARD) =>
            {
                Ok(ScopeSelection::Every)
            }
            _ => {
                let ids = self.int_list(name)?;
                if ids.is_empty() {
                    Ok(ScopeSelection::Every)
                } else {
                    Ok(ScopeSelection::Listed(ids))
                }
            }
        }
    }

    /// Boolean-like flag; `default` applies only when the key is absent.
    pub fn boolean(&self, name: &str, default: bool) -> bool {
        match self.field(name) {
            None => default,
            Some(v) => normalize_boolean(Some(v)),
        }
    }

    pub fn match_mode(&self, name: &str) -> MatchMode {
        MatchMode::parse_lenient(self.get(name))
    }

    pub fn facets(&self) -> FacetFilter {
        FacetFilter::from_payload(self.raw)
    }

    /// Required free-text value, trimmed. Empty reads as missing.
    pub fn require_str(&self, name: &str) -> Result<String, ValidationError> {
        match self.get(name) {
            None => Err(ValidationError::missing(name)),
            Some(Value::String(s)) if s.trim().is_empty() => Err(ValidationError::missing(name)),
            Some(Value::String(s)) => Ok(s.trim().to_string()),
            Some(_) => Err(ValidationError::type_mismatch(name, ParamType::Str)),
        }
    }

    /// Optional free-text value, trimmed. Empty reads as `None`; numbers are
    /// accepted in their decimal form.
    pub fn opt_str(&self, name: &str) -> Result<Option<String>, ValidationError> {
        match self.get(name) {
            None => Ok(None),
            Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.trim().to_string())),
            Some(Value::Number(n)) => Ok(Some(n.to_string())),
            Some(_) => Err(ValidationError::type_mismatch(name, ParamType::Str)),
        }
    }
}

fn coerce_int(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                .map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
