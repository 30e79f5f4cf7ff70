//! Error taxonomy for the engine.
//!
//! Validation and lookup failures never reach the store. Store failures are
//! wrapped once and propagated as-is; nothing here retries.

use std::fmt;

use crate::params::ParamType;
use crate::taxonomy::NodeId;

/// Top-level failure of an engine operation.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid parameters: {0}")]
    Validation(#[from] ValidationError),

    #[error("unknown query shape: {0}")]
    NotFound(String),

    #[error("store failure: {0}")]
    Store(#[from] StoreError),

    #[error("taxonomy failure: {0}")]
    Taxonomy(#[from] TaxonomyError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl EngineError {
    /// Stable machine-readable tag, used by the HTTP surface.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "validation",
            EngineError::NotFound(_) => "not_found",
            EngineError::Store(_) => "store",
            EngineError::Taxonomy(_) => "taxonomy",
            EngineError::Config(_) => "config",
        }
    }
}

/// A parameter failed its declared contract.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("parameter `{param}`: {reason}")]
pub struct ValidationError {
    pub param: String,
    pub reason: ValidationReason,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationReason {
    Missing,
    TypeMismatch { expected: ParamType },
    UnknownValue { value: String, allowed: &'static [&'static str] },
}

impl fmt::Display for ValidationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationReason::Missing => write!(f, "required but missing"),
            ValidationReason::TypeMismatch { expected } => write!(f, "expected {expected}"),
            ValidationReason::UnknownValue { value, allowed } => {
                write!(f, "unknown value {value:?} (allowed: {})", allowed.join(", "))
            }
        }
    }
}

impl ValidationError {
    pub fn missing(param: impl Into<String>) -> Self {
        Self {
            param: param.into(),
            reason: ValidationReason::Missing,
        }
    }

    pub fn type_mismatch(param: impl Into<String>, expected: ParamType) -> Self {
        Self {
            param: param.into(),
            reason: ValidationReason::TypeMismatch { expected },
        }
    }

    pub fn unknown_value(
        param: impl Into<String>,
        value: impl Into<String>,
        allowed: &'static [&'static str],
    ) -> Self {
        Self {
            param: param.into(),
            reason: ValidationReason::UnknownValue {
                value: value.into(),
                allowed,
            },
        }
    }
}

/// Failure reported by the store collaborator.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("statement failed: {0}")]
    Statement(String),

    #[error("constraint violation: {0}")]
    Constraint(String),
}

/// The taxonomy snapshot could not be built.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaxonomyError {
    #[error("parent chain of node {0} is cyclic")]
    Cycle(NodeId),

    #[error("node {0} appears more than once")]
    DuplicateNode(NodeId),

    #[error("malformed taxonomy row: {0}")]
    MalformedRow(String),
}

/// Invalid engine configuration (schema identifiers and the like).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("`{field}` is not a valid SQL identifier: {value:?}")]
    InvalidIdentifier { field: &'static str, value: String },
}
