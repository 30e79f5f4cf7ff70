//! Schema bootstrap and fixture loading.
//!
//! Tables are created from the configured [`SchemaNames`], so a bootstrapped
//! database always matches what statement lowering expects.

use std::collections::HashMap;

use rusqlite::params;
use serde::Serialize;

use facetq_core::eval::FactSnapshot;
use facetq_core::schema::SchemaNames;
use facetq_core::{ConfigError, Role, StoreError, TemporalStatus};

use crate::{store_error, SqliteStore};

/// Rows written by [`SqliteStore::load_fixture`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FixtureCounts {
    pub nodes: usize,
    pub entities: usize,
    pub classifications: usize,
}

/// `CREATE TABLE` / `CREATE INDEX` script for `schema`.
pub fn create_script(schema: &SchemaNames) -> Result<String, ConfigError> {
    schema.validate()?;
    let n = &schema.node;
    let e = &schema.entity;
    let c = &schema.classification;
    Ok(format!(
        "CREATE TABLE IF NOT EXISTS {n_table} (
            {n_id} INTEGER PRIMARY KEY,
            {n_label} TEXT NOT NULL,
            {n_parent} INTEGER
        );
        CREATE INDEX IF NOT EXISTS {n_table}_{n_parent}_idx ON {n_table} ({n_parent});

        CREATE TABLE IF NOT EXISTS {e_table} (
            {e_id} INTEGER PRIMARY KEY,
            {e_last} TEXT NOT NULL,
            {e_first} TEXT NOT NULL DEFAULT ''
        );

        CREATE TABLE IF NOT EXISTS {c_table} (
            {c_entity} INTEGER NOT NULL REFERENCES {e_table} ({e_id}),
            {c_role_code} INTEGER,
            {c_role} TEXT,
            {c_temporal_code} INTEGER,
            {c_temporal} TEXT,
            {c_node} INTEGER NOT NULL REFERENCES {n_table} ({n_id}),
            {c_node_label} TEXT,
            {c_scope} INTEGER,
            {c_scope_label} TEXT,
            {c_scope_type} INTEGER,
            {c_scope_type_label} TEXT,
            {c_flag} TEXT
        );
        CREATE INDEX IF NOT EXISTS {c_table}_{c_entity}_idx ON {c_table} ({c_entity});
        CREATE INDEX IF NOT EXISTS {c_table}_{c_node}_idx ON {c_table} ({c_node});
        CREATE INDEX IF NOT EXISTS {c_table}_{c_scope}_idx ON {c_table} ({c_scope});",
        n_table = n.table,
        n_id = n.id,
        n_label = n.label,
        n_parent = n.parent,
        e_table = e.table,
        e_id = e.id,
        e_last = e.last_name,
        e_first = e.first_name,
        c_table = c.table,
        c_entity = c.entity,
        c_role_code = c.role_code,
        c_role = c.role,
        c_temporal_code = c.temporal_code,
        c_temporal = c.temporal,
        c_node = c.node,
        c_node_label = c.node_label,
        c_scope = c.scope,
        c_scope_label = c.scope_label,
        c_scope_type = c.scope_type,
        c_scope_type_label = c.scope_type_label,
        c_flag = c.origin_flag,
    ))
}

impl SqliteStore {
    /// Create the tables (idempotent).
    pub fn bootstrap(&self, schema: &SchemaNames) -> Result<(), StoreError> {
        let script = create_script(schema).map_err(|e| StoreError::Statement(e.to_string()))?;
        self.with_connection(|conn| conn.execute_batch(&script).map_err(store_error))?;
        tracing::info!(
            node_table = %schema.node.table,
            classification_table = %schema.classification.table,
            "schema bootstrapped"
        );
        Ok(())
    }

    /// Write a fact snapshot in one transaction. Role and temporal codes are
    /// derived from their labels; the node label is copied from the nodes.
    pub fn load_fixture(
        &self,
        schema: &SchemaNames,
        snapshot: &FactSnapshot,
    ) -> Result<FixtureCounts, StoreError> {
        schema.validate().map_err(|e| StoreError::Statement(e.to_string()))?;
        let n = &schema.node;
        let e = &schema.entity;
        let c = &schema.classification;
        let insert_node = format!(
            "INSERT INTO {} ({}, {}, {}) VALUES (?1, ?2, ?3)",
            n.table, n.id, n.label, n.parent
        );
        let insert_entity = format!(
            "INSERT INTO {} ({}, {}, {}) VALUES (?1, ?2, ?3)",
            e.table, e.id, e.last_name, e.first_name
        );
        let insert_classification = format!(
            "INSERT INTO {} ({}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            c.table,
            c.entity,
            c.role_code,
            c.role,
            c.temporal_code,
            c.temporal,
            c.node,
            c.node_label,
            c.scope,
            c.scope_label,
            c.scope_type,
            c.scope_type_label,
            c.origin_flag,
        );
        let labels: HashMap<i64, &str> = snapshot
            .nodes
            .iter()
            .map(|node| (node.id, node.label.as_str()))
            .collect();

        let counts = self.with_connection(|conn| {
            let tx = conn.transaction().map_err(store_error)?;
            {
                let mut stmt = tx.prepare(&insert_node).map_err(store_error)?;
                for node in &snapshot.nodes {
                    stmt.execute(params![node.id, node.label, node.parent])
                        .map_err(store_error)?;
                }
                let mut stmt = tx.prepare(&insert_entity).map_err(store_error)?;
                for entity in &snapshot.entities {
                    stmt.execute(params![entity.id, entity.last_name, entity.first_name])
                        .map_err(store_error)?;
                }
                let mut stmt = tx.prepare(&insert_classification).map_err(store_error)?;
                for fact in &snapshot.classifications {
                    let role_code = fact
                        .role
                        .as_deref()
                        .and_then(|r| r.parse::<Role>().ok())
                        .map(Role::code);
                    let temporal_code = fact
                        .temporal_status
                        .as_deref()
                        .and_then(|t| t.parse::<TemporalStatus>().ok())
                        .map(TemporalStatus::code);
                    stmt.execute(params![
                        fact.entity_id,
                        role_code,
                        fact.role,
                        temporal_code,
                        fact.temporal_status,
                        fact.node_id,
                        labels.get(&fact.node_id).copied(),
                        fact.scope_id,
                        fact.scope_label,
                        fact.scope_type_id,
                        fact.scope_type_label,
                        fact.origin_flag,
                    ])
                    .map_err(store_error)?;
                }
            }
            tx.commit().map_err(store_error)?;
            Ok(FixtureCounts {
                nodes: snapshot.nodes.len(),
                entities: snapshot.entities.len(),
                classifications: snapshot.classifications.len(),
            })
        })?;

        tracing::info!(
            nodes = counts.nodes,
            entities = counts.entities,
            classifications = counts.classifications,
            "fixture loaded"
        );
        Ok(counts)
    }
}
