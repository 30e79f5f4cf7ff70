//! Facet Normalizer
//!
//! Canonicalizes user-supplied facet values (role, temporal status, origin
//! mode) into a wildcard or a concrete match value. Both entry points are
//! total: unexpected input degrades to the wildcard / `false` rather than
//! failing.

use serde::Serialize;
use serde_json::Value;

/// Wire spelling of the wildcard.
pub const WILDCARD: &str = "*";

/// Form default leaked by some clients for unset selects.
const PLACEHOLDER: &str = "str";

const TRUTHY: [&str; 5] = ["1", "true", "yes", "y", "on"];

/// A normalized facet value: match anything, or match exactly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum FacetValue {
    #[default]
    Any,
    Exact(String),
}

impl Serialize for FacetValue {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FacetValue::Any => serializer.serialize_str(WILDCARD),
            FacetValue::Exact(s) => serializer.serialize_str(s),
        }
    }
}

impl FacetValue {
    pub fn exact(value: impl Into<String>) -> Self {
        FacetValue::Exact(value.into())
    }

    pub fn is_any(&self) -> bool {
        matches!(self, FacetValue::Any)
    }

    pub fn as_exact(&self) -> Option<&str> {
        match self {
            FacetValue::Any => None,
            FacetValue::Exact(s) => Some(s),
        }
    }

    /// Does a stored (nullable) column value satisfy this facet?
    pub fn accepts(&self, stored: Option<&str>) -> bool {
        match self {
            FacetValue::Any => true,
            FacetValue::Exact(want) => stored == Some(want.as_str()),
        }
    }
}

/// Normalize a raw facet value.
///
/// Absent, `null`, empty (after trimming), `"*"` and the placeholder `"str"`
/// (any case) become [`FacetValue::Any`]. Everything else is kept as its
/// trimmed string form.
pub fn normalize(raw: Option<&Value>) -> FacetValue {
    let text = match raw {
        None | Some(Value::Null) => return FacetValue::Any,
        Some(Value::String(s)) => s.trim().to_string(),
        Some(other) => other.to_string().trim().to_string(),
    };
    if text.is_empty() || text == WILDCARD || text.eq_ignore_ascii_case(PLACEHOLDER) {
        FacetValue::Any
    } else {
        FacetValue::Exact(text)
    }
}

/// Coerce a boolean-like value.
///
/// Booleans pass through; anything else is compared case-insensitively (and
/// untrimmed) against `1 / true / yes / y / on`.
pub fn normalize_boolean(raw: Option<&Value>) -> bool {
    match raw {
        Some(Value::Bool(b)) => *b,
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => is_truthy(s),
        Some(other) => is_truthy(&other.to_string()),
    }
}

fn is_truthy(s: &str) -> bool {
    let lowered = s.to_lowercase();
    TRUTHY.contains(&lowered.as_str())
}

// ============================================================================
// Origin mode
// ============================================================================

/// Whether a classification was generated by the automatic process or
/// entered by hand.
///
/// Storage keeps a nullable flag where only [`OriginMode::AUTOMATIC_FLAG`]
/// means automatic; null and every other value mean manual.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum OriginMode {
    Automatic,
    Manual,
}

impl OriginMode {
    pub const AUTOMATIC_FLAG: &'static str = "0";

    pub fn from_flag(flag: Option<&str>) -> Self {
        match flag {
            Some(Self::AUTOMATIC_FLAG) => OriginMode::Automatic,
            _ => OriginMode::Manual,
        }
    }

    /// The flag written for this mode. Manual is written as absence.
    pub fn to_flag(self) -> Option<&'static str> {
        match self {
            OriginMode::Automatic => Some(Self::AUTOMATIC_FLAG),
            OriginMode::Manual => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            OriginMode::Automatic => "AUTO",
            OriginMode::Manual => "MANU",
        }
    }
}

/// Origin-mode facet after normalization.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum OriginFilter {
    #[default]
    Any,
    Only(OriginMode),
    /// A concrete value that names no mode; matches no classification.
    Unmatched(String),
}

impl OriginFilter {
    pub fn accepts(&self, flag: Option<&str>) -> bool {
        match self {
            OriginFilter::Any => true,
            OriginFilter::Only(mode) => OriginMode::from_flag(flag) == *mode,
            OriginFilter::Unmatched(_) => false,
        }
    }
}

impl From<FacetValue> for OriginFilter {
    fn from(value: FacetValue) -> Self {
        match value {
            FacetValue::Any => OriginFilter::Any,
            FacetValue::Exact(s) => match s.as_str() {
                "AUTO" => OriginFilter::Only(OriginMode::Automatic),
                "MANU" => OriginFilter::Only(OriginMode::Manual),
                _ => OriginFilter::Unmatched(s),
            },
        }
    }
}

// ============================================================================
// Facet filter
// ============================================================================

/// Per-query facet constraints on classification rows.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FacetFilter {
    pub role: FacetValue,
    pub temporal: FacetValue,
    pub origin: OriginFilter,
}

impl FacetFilter {
    pub const ROLE_KEY: &'static str = "role";
    pub const TEMPORAL_KEY: &'static str = "temporalite";
    pub const MODE_KEY: &'static str = "mode";

    /// Read the three facets from a request payload. Never fails.
    pub fn from_payload(payload: &Value) -> Self {
        Self {
            role: normalize(payload.get(Self::ROLE_KEY)),
            temporal: normalize(payload.get(Self::TEMPORAL_KEY)),
            origin: normalize(payload.get(Self::MODE_KEY)).into(),
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = FacetValue::Exact(role.into());
        self
    }

    pub fn with_temporal(mut self, temporal: impl Into<String>) -> Self {
        self.temporal = FacetValue::Exact(temporal.into());
        self
    }

    pub fn with_origin(mut self, mode: OriginMode) -> Self {
        self.origin = OriginFilter::Only(mode);
        self
    }

    pub fn is_unconstrained(&self) -> bool {
        self.role.is_any() && self.temporal.is_any() && self.origin == OriginFilter::Any
    }

    pub fn accepts(&self, role: Option<&str>, temporal: Option<&str>, flag: Option<&str>) -> bool {
        self.role.accepts(role) && self.temporal.accepts(temporal) && self.origin.accepts(flag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wildcard_inputs() {
        assert_eq!(normalize(None), FacetValue::Any);
        assert_eq!(normalize(Some(&Value::Null)), FacetValue::Any);
        assert_eq!(normalize(Some(&json!(""))), FacetValue::Any);
        assert_eq!(normalize(Some(&json!("   "))), FacetValue::Any);
        assert_eq!(normalize(Some(&json!("str"))), FacetValue::Any);
        assert_eq!(normalize(Some(&json!(" STR "))), FacetValue::Any);
        assert_eq!(normalize(Some(&json!("*"))), FacetValue::Any);
    }

    #[test]
    fn concrete_values_are_trimmed_not_rewritten() {
        assert_eq!(normalize(Some(&json!("Expert"))), FacetValue::exact("Expert"));
        assert_eq!(normalize(Some(&json!("  Passé "))), FacetValue::exact("Passé"));
        assert_eq!(normalize(Some(&json!("strong"))), FacetValue::exact("strong"));
        assert_eq!(normalize(Some(&json!(3))), FacetValue::exact("3"));
        assert_eq!(normalize(Some(&json!(true))), FacetValue::exact("true"));
    }

    #[test]
    fn boolean_coercion_is_total() {
        for yes in [json!(true), json!("1"), json!("TRUE"), json!("Yes"), json!("y"), json!("On"), json!(1)] {
            assert!(normalize_boolean(Some(&yes)), "{yes}");
        }
        for no in [json!(false), json!("0"), json!("no"), json!(" true"), json!(0), json!([1]), json!({})] {
            assert!(!normalize_boolean(Some(&no)), "{no}");
        }
        assert!(!normalize_boolean(None));
        assert!(!normalize_boolean(Some(&Value::Null)));
    }

    #[test]
    fn origin_flag_is_null_biased() {
        assert_eq!(OriginMode::from_flag(Some("0")), OriginMode::Automatic);
        assert_eq!(OriginMode::from_flag(None), OriginMode::Manual);
        assert_eq!(OriginMode::from_flag(Some("1")), OriginMode::Manual);
        assert_eq!(OriginMode::from_flag(Some("")), OriginMode::Manual);
        assert_eq!(OriginMode::Manual.to_flag(), None);
        assert_eq!(OriginMode::Automatic.to_flag(), Some("0"));
    }

    #[test]
    fn unknown_mode_matches_nothing() {
        let filter = FacetFilter::from_payload(&json!({"mode": "auto"}));
        assert_eq!(filter.origin, OriginFilter::Unmatched("auto".into()));
        assert!(!filter.accepts(None, None, Some("0")));
        assert!(!filter.accepts(None, None, None));
    }

    #[test]
    fn filter_from_payload() {
        let filter = FacetFilter::from_payload(&json!({
            "role": "Expert",
            "temporalite": "str",
            "mode": "MANU",
        }));
        assert_eq!(filter.role, FacetValue::exact("Expert"));
        assert!(filter.temporal.is_any());
        assert_eq!(filter.origin, OriginFilter::Only(OriginMode::Manual));
        assert!(filter.accepts(Some("Expert"), Some("Passé"), None));
        assert!(!filter.accepts(Some("Expert"), Some("Passé"), Some("0")));
        assert!(!filter.accepts(None, Some("Passé"), None));
    }

    #[test]
    fn facet_value_serializes_wildcard() {
        assert_eq!(serde_json::to_value(FacetValue::Any).unwrap(), json!("*"));
        assert_eq!(serde_json::to_value(FacetValue::exact("Expert")).unwrap(), json!("Expert"));
    }
}
