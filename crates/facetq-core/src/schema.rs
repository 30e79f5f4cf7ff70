//! Physical table and column names.
//!
//! Identifiers come from configuration, never from requests, and are checked
//! with [`SchemaNames::validate`] before any statement is assembled.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

fn identifier_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_#$]*$").expect("static identifier pattern"))
}

/// Taxonomy node table: `id`, `label`, self-referencing `parent`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeTable {
    pub table: String,
    pub id: String,
    pub label: String,
    pub parent: String,
}

impl Default for NodeTable {
    fn default() -> Self {
        Self {
            table: "taxonomy_node".into(),
            id: "id".into(),
            label: "label".into(),
            parent: "parent_id".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntityTable {
    pub table: String,
    pub id: String,
    pub last_name: String,
    pub first_name: String,
}

impl Default for EntityTable {
    fn default() -> Self {
        Self {
            table: "entity".into(),
            id: "id".into(),
            last_name: "last_name".into(),
            first_name: "first_name".into(),
        }
    }
}

/// Classification fact table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassificationTable {
    pub table: String,
    pub entity: String,
    pub node: String,
    pub node_label: String,
    pub role_code: String,
    pub role: String,
    pub temporal_code: String,
    pub temporal: String,
    pub scope: String,
    pub scope_label: String,
    pub scope_type: String,
    pub scope_type_label: String,
    pub origin_flag: String,
}

impl Default for ClassificationTable {
    fn default() -> Self {
        Self {
            table: "classification".into(),
            entity: "entity_id".into(),
            node: "node_id".into(),
            node_label: "node_label".into(),
            role_code: "role_code".into(),
            role: "role".into(),
            temporal_code: "temporal_code".into(),
            temporal: "temporal_status".into(),
            scope: "scope_id".into(),
            scope_label: "scope_label".into(),
            scope_type: "scope_type_id".into(),
            scope_type_label: "scope_type_label".into(),
            origin_flag: "origin_flag".into(),
        }
    }
}

/// All physical names used by statement lowering.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaNames {
    pub node: NodeTable,
    pub entity: EntityTable,
    pub classification: ClassificationTable,
}

impl SchemaNames {
    /// Reject any name that is not a plain SQL identifier.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let n = &self.node;
        let e = &self.entity;
        let c = &self.classification;
        let fields: [(&'static str, &str); 21] = [
            ("node.table", &n.table),
            ("node.id", &n.id),
            ("node.label", &n.label),
            ("node.parent", &n.parent),
            ("entity.table", &e.table),
            ("entity.id", &e.id),
            ("entity.last_name", &e.last_name),
            ("entity.first_name", &e.first_name),
            ("classification.table", &c.table),
            ("classification.entity", &c.entity),
            ("classification.node", &c.node),
            ("classification.node_label", &c.node_label),
            ("classification.role_code", &c.role_code),
            ("classification.role", &c.role),
            ("classification.temporal_code", &c.temporal_code),
            ("classification.temporal", &c.temporal),
            ("classification.scope", &c.scope),
            ("classification.scope_label", &c.scope_label),
            ("classification.scope_type", &c.scope_type),
            ("classification.scope_type_label", &c.scope_type_label),
            ("classification.origin_flag", &c.origin_flag),
        ];
        for (field, value) in fields {
            if !identifier_re().is_match(value) {
                return Err(ConfigError::InvalidIdentifier {
                    field,
                    value: value.to_string(),
                });
            }
        }
        Ok(())
    }
}
