//! Query Executor
//!
//! Dispatches `(shape id, payload)` through the registry, lowers the plan and
//! runs it against the store collaborator. Each request issues at most one
//! statement; plans that select nothing return an empty result without a
//! round trip. The taxonomy snapshot is the only shared state and is swapped
//! whole on reload.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use serde_json::Value;

use crate::classification::{ClassificationKey, NewClassification};
use crate::combinator::MembershipPredicate;
use crate::error::EngineError;
use crate::registry::{catalog, lookup, ShapeDecl, ShapeKind};
use crate::schema::SchemaNames;
use crate::search::ClassificationSearch;
use crate::sql;
use crate::store::{Row, Statement, Store};
use crate::taxonomy::{TaxonomyIndex, TreeEntry};

/// A validated, lowered request that has not been executed.
#[derive(Debug, Clone)]
pub struct PreparedQuery {
    pub shape: ShapeKind,
    pub predicate: MembershipPredicate,
    /// `None` when the plan selects nothing.
    pub statement: Option<Statement>,
}

pub struct QueryEngine {
    store: Arc<dyn Store>,
    schema: SchemaNames,
    taxonomy: RwLock<Arc<TaxonomyIndex>>,
}

impl std::fmt::Debug for QueryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryEngine")
            .field("schema", &self.schema)
            .field("taxonomy_nodes", &self.taxonomy.read().len())
            .finish()
    }
}

impl QueryEngine {
    /// Build an engine around an already loaded taxonomy.
    pub fn with_taxonomy(
        store: Arc<dyn Store>,
        schema: SchemaNames,
        taxonomy: TaxonomyIndex,
    ) -> Result<Self, EngineError> {
        schema.validate()?;
        Ok(Self {
            store,
            schema,
            taxonomy: RwLock::new(Arc::new(taxonomy)),
        })
    }

    /// Validate the schema names and load the taxonomy from the store.
    pub async fn open(store: Arc<dyn Store>, schema: SchemaNames) -> Result<Self, EngineError> {
        schema.validate()?;
        let taxonomy = load_taxonomy(store.as_ref(), &schema).await?;
        tracing::info!(nodes = taxonomy.len(), "taxonomy loaded");
        Self::with_taxonomy(store, schema, taxonomy)
    }

    pub fn schema(&self) -> &SchemaNames {
        &self.schema
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Current taxonomy snapshot.
    pub fn taxonomy(&self) -> Arc<TaxonomyIndex> {
        Arc::clone(&self.taxonomy.read())
    }

    /// Replace the taxonomy snapshot with a fresh load. On failure the
    /// previous snapshot stays in place.
    pub async fn reload_taxonomy(&self) -> Result<usize, EngineError> {
        match load_taxonomy(self.store.as_ref(), &self.schema).await {
            Ok(fresh) => {
                let nodes = fresh.len();
                *self.taxonomy.write() = Arc::new(fresh);
                tracing::info!(nodes, "taxonomy reloaded");
                Ok(nodes)
            }
            Err(err) => {
                tracing::warn!(error = %err, "taxonomy reload failed, keeping previous snapshot");
                Err(err)
            }
        }
    }

    /// Depth-first listing of the taxonomy.
    pub fn tree(&self) -> Vec<TreeEntry> {
        self.taxonomy().tree()
    }

    pub fn shapes(&self) -> &'static [ShapeDecl] {
        catalog()
    }

    /// Validate and lower a request without executing it.
    pub fn prepare(&self, shape_id: &str, payload: &Value) -> Result<PreparedQuery, EngineError> {
        let decl = lookup(shape_id).ok_or_else(|| EngineError::NotFound(shape_id.to_string()))?;
        let request = decl.kind.parse(payload)?;
        let predicate = request.plan(&self.taxonomy());
        let statement = sql::lower(&predicate, &self.schema);
        Ok(PreparedQuery {
            shape: decl.kind,
            predicate,
            statement,
        })
    }

    /// Run a catalog query.
    pub async fn execute(&self, shape_id: &str, payload: &Value) -> Result<Vec<Row>, EngineError> {
        let started = Instant::now();
        let prepared = self.prepare(shape_id, payload)?;
        let Some(statement) = prepared.statement else {
            tracing::debug!(shape = shape_id, "empty selection, store not consulted");
            return Ok(Vec::new());
        };

        tracing::debug!(
            shape = shape_id,
            statement_params = ?statement.param_names(),
            "executing statement"
        );
        tracing::trace!(shape = shape_id, text = %statement.text, params = ?statement.params);

        let rows = self.store.run_query(&statement).await?;
        tracing::info!(
            shape = shape_id,
            rows = rows.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "query complete"
        );
        Ok(rows)
    }

    /// Validate and lower a classification search. `None` when no theme was
    /// requested.
    pub fn prepare_search(&self, payload: &Value) -> Result<Option<Statement>, EngineError> {
        let search = ClassificationSearch::from_payload(payload)?;
        Ok(search
            .plan(&self.taxonomy())
            .map(|plan| sql::lower_search(&plan, &self.schema)))
    }

    /// List every classification under the requested themes that passes the
    /// facets (and scope, when given).
    pub async fn search_classifications(&self, payload: &Value) -> Result<Vec<Row>, EngineError> {
        let started = Instant::now();
        let Some(statement) = self.prepare_search(payload)? else {
            tracing::debug!("empty search, store not consulted");
            return Ok(Vec::new());
        };
        tracing::debug!(statement_params = ?statement.param_names(), "executing search");
        tracing::trace!(text = %statement.text, params = ?statement.params);

        let rows = self.store.run_query(&statement).await?;
        tracing::info!(
            rows = rows.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "search complete"
        );
        Ok(rows)
    }

    /// Record a manual classification. Returns the number of rows written.
    pub async fn insert_classification(&self, new: &NewClassification) -> Result<u64, EngineError> {
        let statement = new.insert_statement(&self.schema);
        tracing::trace!(params = ?statement.params, "insert classification");
        let written = self.store.execute(&statement).await?;
        tracing::info!(
            entity = new.entity,
            node = new.node,
            role = new.role.label(),
            "classification inserted"
        );
        Ok(written)
    }

    /// Remove matching manual classifications. Automatic records are left
    /// untouched; the result is then zero.
    pub async fn delete_classification(&self, key: &ClassificationKey) -> Result<u64, EngineError> {
        let statement = key.delete_statement(&self.schema);
        let removed = self.store.execute(&statement).await?;
        if removed == 0 {
            tracing::warn!(
                entity = key.entity,
                node = key.node,
                role = key.role.label(),
                temporal = key.temporal.label(),
                "no manual classification deleted"
            );
        } else {
            tracing::info!(entity = key.entity, node = key.node, removed, "classification deleted");
        }
        Ok(removed)
    }
}

async fn load_taxonomy(store: &dyn Store, schema: &SchemaNames) -> Result<TaxonomyIndex, EngineError> {
    let rows = store.run_query(&TaxonomyIndex::load_statement(schema)).await?;
    Ok(TaxonomyIndex::from_rows(&rows)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classification::{Role, TemporalStatus};
    use crate::error::StoreError;
    use crate::store::SqlValue;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;

    /// Records statements and answers with canned data.
    #[derive(Default)]
    struct RecordingStore {
        seen: Mutex<Vec<Statement>>,
        nodes: Vec<Row>,
        affected: u64,
        fail: bool,
    }

    impl RecordingStore {
        fn with_chain() -> Self {
            let nodes = [
                json!({"id": 1, "label": "root", "parent_id": null}),
                json!({"id": 2, "label": "child", "parent_id": 1}),
                json!({"id": 3, "label": "grandchild", "parent_id": 2}),
            ];
            Self {
                nodes: nodes.iter().filter_map(|v| v.as_object().cloned()).collect(),
                ..Default::default()
            }
        }

        fn calls(&self) -> usize {
            self.seen.lock().len()
        }
    }

    #[async_trait]
    impl Store for RecordingStore {
        async fn run_query(&self, statement: &Statement) -> Result<Vec<Row>, StoreError> {
            self.seen.lock().push(statement.clone());
            if self.fail {
                return Err(StoreError::Unavailable("connection refused".into()));
            }
            if statement.text.contains("parent_id FROM") {
                return Ok(self.nodes.clone());
            }
            Ok(Vec::new())
        }

        async fn execute(&self, statement: &Statement) -> Result<u64, StoreError> {
            self.seen.lock().push(statement.clone());
            Ok(self.affected)
        }
    }

    async fn engine(store: Arc<RecordingStore>) -> QueryEngine {
        QueryEngine::open(store, SchemaNames::default()).await.unwrap()
    }

    #[tokio::test]
    async fn open_loads_taxonomy() {
        let store = Arc::new(RecordingStore::with_chain());
        let engine = engine(store.clone()).await;
        assert_eq!(engine.taxonomy().len(), 3);
        assert_eq!(store.calls(), 1);
        assert_eq!(engine.tree().len(), 3);
    }

    #[tokio::test]
    async fn unknown_shape_is_not_found() {
        let store = Arc::new(RecordingStore::with_chain());
        let engine = engine(store.clone()).await;
        let err = engine.execute("drop_everything", &json!({})).await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound(ref id) if id == "drop_everything"));
        assert_eq!(store.calls(), 1);
    }

    #[tokio::test]
    async fn empty_selection_skips_the_store() {
        let store = Arc::new(RecordingStore::with_chain());
        let engine = engine(store.clone()).await;
        let rows = engine.execute("people_by_themes", &json!({"theme_ids": []})).await.unwrap();
        assert!(rows.is_empty());
        assert_eq!(store.calls(), 1);
    }

    #[tokio::test]
    async fn one_statement_per_request() {
        let store = Arc::new(RecordingStore::with_chain());
        let engine = engine(store.clone()).await;
        engine
            .execute("people_by_themes", &json!({"theme_ids": [1, 2], "match": "ALL"}))
            .await
            .unwrap();
        assert_eq!(store.calls(), 2);
        let last = store.seen.lock().last().cloned().unwrap();
        assert_eq!(last.params["req1"], SqlValue::int_list([1, 2, 3]));
        assert!(last.text.contains("EXISTS"));
    }

    #[tokio::test]
    async fn validation_never_reaches_the_store() {
        let store = Arc::new(RecordingStore::with_chain());
        let engine = engine(store.clone()).await;
        let err = engine
            .execute("people_by_themes", &json!({"theme_ids": ["1; DROP TABLE entity"]}))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        assert_eq!(store.calls(), 1);
    }

    #[tokio::test]
    async fn store_failures_propagate() {
        let store = Arc::new(RecordingStore::with_chain());
        let engine = engine(store).await;
        let failing = Arc::new(RecordingStore {
            fail: true,
            ..RecordingStore::with_chain()
        });
        let engine = QueryEngine::with_taxonomy(failing.clone(), SchemaNames::default(), (*engine.taxonomy()).clone())
            .unwrap();
        let err = engine.execute("people_with_no_theme", &json!({})).await.unwrap_err();
        assert!(matches!(err, EngineError::Store(StoreError::Unavailable(_))));
        assert_eq!(failing.calls(), 1);
    }

    #[tokio::test]
    async fn failed_reload_keeps_snapshot() {
        let failing = Arc::new(RecordingStore {
            fail: true,
            ..RecordingStore::with_chain()
        });
        let snapshot = TaxonomyIndex::from_rows(&failing.nodes).unwrap();
        let engine = QueryEngine::with_taxonomy(failing, SchemaNames::default(), snapshot).unwrap();
        assert!(engine.reload_taxonomy().await.is_err());
        assert_eq!(engine.taxonomy().len(), 3);
    }

    #[tokio::test]
    async fn delete_reports_rows_affected() {
        let store = Arc::new(RecordingStore {
            affected: 0,
            ..RecordingStore::with_chain()
        });
        let engine = engine(store.clone()).await;
        let key = ClassificationKey {
            entity: 1,
            node: 2,
            role: Role::Expert,
            temporal: TemporalStatus::Present,
        };
        assert_eq!(engine.delete_classification(&key).await.unwrap(), 0);
        let last = store.seen.lock().last().cloned().unwrap();
        assert!(last.text.starts_with("DELETE FROM classification"));
    }

    #[tokio::test]
    async fn search_issues_one_statement() {
        let store = Arc::new(RecordingStore::with_chain());
        let engine = engine(store.clone()).await;

        let rows = engine.search_classifications(&json!({"theme_ids": []})).await.unwrap();
        assert!(rows.is_empty());
        assert_eq!(store.calls(), 1);

        engine
            .search_classifications(&json!({"theme_ids": [2], "temporalite": "Passé", "structure_id": 5}))
            .await
            .unwrap();
        assert_eq!(store.calls(), 2);
        let last = store.seen.lock().last().cloned().unwrap();
        assert_eq!(last.params["req1"], SqlValue::int_list([2, 3]));
        assert_eq!(last.params["temporal"], SqlValue::text("Passé"));
        assert_eq!(last.params["scope_id"], SqlValue::Integer(5));

        let err = engine
            .search_classifications(&json!({"theme_ids": ["2 OR 1=1"]}))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        assert_eq!(store.calls(), 2);
    }

    #[test]
    fn invalid_schema_is_rejected() {
        let mut schema = SchemaNames::default();
        schema.entity.table = "entity e; --".into();
        let store: Arc<dyn Store> = Arc::new(RecordingStore::default());
        let err = QueryEngine::with_taxonomy(store, schema, TaxonomyIndex::empty()).unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }
}
