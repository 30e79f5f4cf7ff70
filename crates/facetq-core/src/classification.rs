//! Manual classification writes.
//!
//! Insertions are always recorded as manual (origin flag absent). Deletion is
//! gated on the origin flag: an automatically generated record is never
//! removed, the statement simply affects zero rows.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ValidationError;
use crate::facets::OriginMode;
use crate::params::Payload;
use crate::schema::SchemaNames;
use crate::store::{SqlValue, Statement};
use crate::taxonomy::NodeId;
use crate::{EntityId, ScopeId};

/// Contribution role of a classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "Expert")]
    Expert,
    #[serde(rename = "Contributeur")]
    Contributor,
    #[serde(rename = "Utilisateur")]
    User,
}

impl Role {
    pub const LABELS: &'static [&'static str] = &["Expert", "Contributeur", "Utilisateur"];

    pub fn label(self) -> &'static str {
        match self {
            Role::Expert => "Expert",
            Role::Contributor => "Contributeur",
            Role::User => "Utilisateur",
        }
    }

    pub fn code(self) -> i64 {
        match self {
            Role::Expert => 1,
            Role::Contributor => 2,
            Role::User => 3,
        }
    }
}

impl FromStr for Role {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Expert" => Ok(Role::Expert),
            "Contributeur" => Ok(Role::Contributor),
            "Utilisateur" => Ok(Role::User),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Whether the classification describes current or past activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TemporalStatus {
    #[serde(rename = "Présent")]
    Present,
    #[serde(rename = "Passé")]
    Past,
}

impl TemporalStatus {
    pub const LABELS: &'static [&'static str] = &["Présent", "Passé"];

    pub fn label(self) -> &'static str {
        match self {
            TemporalStatus::Present => "Présent",
            TemporalStatus::Past => "Passé",
        }
    }

    pub fn code(self) -> i64 {
        match self {
            TemporalStatus::Present => 1,
            TemporalStatus::Past => 2,
        }
    }
}

impl FromStr for TemporalStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Présent" => Ok(TemporalStatus::Present),
            "Passé" => Ok(TemporalStatus::Past),
            _ => Err(()),
        }
    }
}

impl fmt::Display for TemporalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// Wire keys of the write endpoints.
const ENTITY_KEY: &str = "idpers";
const NODE_KEY: &str = "idtheme";
const ROLE_KEY: &str = "libcontr";
const TEMPORAL_KEY: &str = "libtemp";
const SCOPE_KEY: &str = "idstruct";
const SCOPE_LABEL_KEY: &str = "libstruct";
const SCOPE_TYPE_KEY: &str = "idtypestruct";
const SCOPE_TYPE_LABEL_KEY: &str = "libtypestruct";

/// Identifies the classification rows a manual deletion targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassificationKey {
    pub entity: EntityId,
    pub node: NodeId,
    pub role: Role,
    pub temporal: TemporalStatus,
}

impl ClassificationKey {
    pub fn from_payload(body: &Value) -> Result<Self, ValidationError> {
        let p = Payload::new(body);
        Ok(Self {
            entity: p.require_int(ENTITY_KEY)?,
            node: p.require_int(NODE_KEY)?,
            role: parse_enum(&p, ROLE_KEY, Role::LABELS)?,
            temporal: parse_enum(&p, TEMPORAL_KEY, TemporalStatus::LABELS)?,
        })
    }

    /// Delete matching manual rows only.
    pub fn delete_statement(&self, schema: &SchemaNames) -> Statement {
        let c = &schema.classification;
        let text = format!(
            "DELETE FROM {table} WHERE {entity} = :entity_id AND {node} = :node_id \
             AND {role} = :role AND {temporal} = :temporal \
             AND ({flag} IS NULL OR {flag} <> :automatic_flag)",
            table = c.table,
            entity = c.entity,
            node = c.node,
            role = c.role,
            temporal = c.temporal,
            flag = c.origin_flag,
        );
        Statement::new(text)
            .bind("entity_id", self.entity)
            .bind("node_id", self.node)
            .bind("role", self.role.label())
            .bind("temporal", self.temporal.label())
            .bind("automatic_flag", OriginMode::AUTOMATIC_FLAG)
    }
}

/// A manual classification to insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewClassification {
    pub entity: EntityId,
    pub node: NodeId,
    pub role: Role,
    pub temporal: TemporalStatus,
    pub scope: Option<ScopeId>,
    pub scope_label: Option<String>,
    pub scope_type: Option<i64>,
    pub scope_type_label: Option<String>,
}

impl NewClassification {
    pub fn new(entity: EntityId, node: NodeId, role: Role, temporal: TemporalStatus) -> Self {
        Self {
            entity,
            node,
            role,
            temporal,
            scope: None,
            scope_label: None,
            scope_type: None,
            scope_type_label: None,
        }
    }

    pub fn in_scope(mut self, scope: ScopeId, label: impl Into<String>) -> Self {
        self.scope = Some(scope);
        self.scope_label = Some(label.into());
        self
    }

    pub fn from_payload(body: &Value) -> Result<Self, ValidationError> {
        let p = Payload::new(body);
        Ok(Self {
            entity: p.require_int(ENTITY_KEY)?,
            node: p.require_int(NODE_KEY)?,
            role: parse_enum(&p, ROLE_KEY, Role::LABELS)?,
            temporal: parse_enum(&p, TEMPORAL_KEY, TemporalStatus::LABELS)?,
            scope: p.int(SCOPE_KEY)?,
            scope_label: p.opt_str(SCOPE_LABEL_KEY)?,
            scope_type: p.int(SCOPE_TYPE_KEY)?,
            scope_type_label: p.opt_str(SCOPE_TYPE_LABEL_KEY)?,
        })
    }

    /// Insert with the node label copied from the node table and the origin
    /// flag left absent.
    pub fn insert_statement(&self, schema: &SchemaNames) -> Statement {
        let c = &schema.classification;
        let n = &schema.node;
        let text = format!(
            "INSERT INTO {table} ({entity}, {role_code}, {role}, {temporal_code}, {temporal}, \
             {node}, {node_label}, {scope}, {scope_label}, {scope_type}, {scope_type_label}, {flag}) \
             VALUES (:entity_id, :role_code, :role, :temporal_code, :temporal, :node_id, \
             (SELECT {n_label} FROM {n_table} WHERE {n_id} = :node_id), \
             :scope_id, :scope_label, :scope_type_id, :scope_type_label, NULL)",
            table = c.table,
            entity = c.entity,
            role_code = c.role_code,
            role = c.role,
            temporal_code = c.temporal_code,
            temporal = c.temporal,
            node = c.node,
            node_label = c.node_label,
            scope = c.scope,
            scope_label = c.scope_label,
            scope_type = c.scope_type,
            scope_type_label = c.scope_type_label,
            flag = c.origin_flag,
            n_label = n.label,
            n_table = n.table,
            n_id = n.id,
        );
        Statement::new(text)
            .bind("entity_id", self.entity)
            .bind("role_code", self.role.code())
            .bind("role", self.role.label())
            .bind("temporal_code", self.temporal.code())
            .bind("temporal", self.temporal.label())
            .bind("node_id", self.node)
            .bind("scope_id", SqlValue::opt_int(self.scope))
            .bind("scope_label", SqlValue::opt_text(self.scope_label.clone()))
            .bind("scope_type_id", SqlValue::opt_int(self.scope_type))
            .bind("scope_type_label", SqlValue::opt_text(self.scope_type_label.clone()))
    }
}

fn parse_enum<T: FromStr>(
    p: &Payload<'_>,
    name: &str,
    allowed: &'static [&'static str],
) -> Result<T, ValidationError> {
    let raw = p.require_str(name)?;
    raw.parse()
        .map_err(|_| ValidationError::unknown_value(name, raw, allowed))
}
