//! In-memory reference evaluation.
//!
//! Evaluates a [`MembershipPredicate`] directly over a [`FactSnapshot`] with
//! the same semantics as the lowered statement, SQL null handling included.
//! Used for fixture-driven evaluation without a database and as the oracle
//! in differential tests against a real store.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::combinator::{
    Dimension, EvidenceSet, ExclusionReach, GroupingKey, MembershipPredicate, MembershipTest,
    RowFilter,
};
use crate::error::TaxonomyError;
use crate::search::SearchPlan;
use crate::store::Row;
use crate::taxonomy::{NodeId, TaxonomyIndex, TaxonomyNode};
use crate::{EntityId, ScopeId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub id: EntityId,
    pub last_name: String,
    #[serde(default)]
    pub first_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassificationRecord {
    pub entity_id: EntityId,
    pub node_id: NodeId,
    pub role: Option<String>,
    pub temporal_status: Option<String>,
    pub origin_flag: Option<String>,
    pub scope_id: Option<ScopeId>,
    pub scope_label: Option<String>,
    pub scope_type_id: Option<i64>,
    pub scope_type_label: Option<String>,
}

impl ClassificationRecord {
    fn dimension(&self, dim: Dimension) -> Option<i64> {
        match dim {
            Dimension::Entity => Some(self.entity_id),
            Dimension::Node => Some(self.node_id),
            Dimension::Scope => self.scope_id,
        }
    }

    fn qualifies(&self, rows: &RowFilter) -> bool {
        rows.facets.accepts(
            self.role.as_deref(),
            self.temporal_status.as_deref(),
            self.origin_flag.as_deref(),
        ) && rows.scope.map_or(true, |s| self.scope_id == Some(s))
            && rows.entity.map_or(true, |e| self.entity_id == e)
    }
}

/// Nodes, entities and classification facts, as one JSON document.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FactSnapshot {
    pub nodes: Vec<TaxonomyNode>,
    pub entities: Vec<EntityRecord>,
    pub classifications: Vec<ClassificationRecord>,
}

impl FactSnapshot {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn taxonomy(&self) -> Result<TaxonomyIndex, TaxonomyError> {
        TaxonomyIndex::from_nodes(self.nodes.iter().cloned())
    }

    /// Rows selected by `pred`, shaped and ordered like the store's answer.
    pub fn evaluate(&self, pred: &MembershipPredicate) -> Vec<Row> {
        if pred.is_never() {
            return Vec::new();
        }

        let link = pred.key.link();
        let mut by_key: HashMap<i64, Vec<&ClassificationRecord>> = HashMap::new();
        for c in &self.classifications {
            if c.qualifies(&pred.rows) {
                if let Some(k) = c.dimension(link) {
                    by_key.entry(k).or_default().push(c);
                }
            }
        }

        let keys: Vec<KeyRecord<'_>> = match pred.key {
            GroupingKey::Entity => self.entities.iter().map(KeyRecord::Entity).collect(),
            GroupingKey::Node => self.nodes.iter().map(KeyRecord::Node).collect(),
        };

        let mut out: Vec<Row> = Vec::new();
        let mut seen: BTreeSet<String> = BTreeSet::new();
        for key in keys {
            let id = key.id();
            if let Some(candidates) = &pred.candidates {
                if !candidates.contains(&id) {
                    continue;
                }
            }
            let facts: &[&ClassificationRecord] = by_key.get(&id).map(Vec::as_slice).unwrap_or(&[]);
            let touches = |set: &EvidenceSet| facts.iter().any(|c| set.contains(c.dimension(set.dimension())));

            match &pred.test {
                MembershipTest::Never => {}
                MembershipTest::Witnessed => {
                    for c in facts {
                        push_distinct(&mut out, &mut seen, key.row(Some(c), pred.rows.scope));
                    }
                }
                MembershipTest::Any { required, excluded } => {
                    if let Some(x) = excluded {
                        if x.reach == ExclusionReach::Key && touches(&x.set) {
                            continue;
                        }
                    }
                    for c in facts {
                        if !required.contains(c.dimension(required.dimension())) {
                            continue;
                        }
                        if let Some(x) = excluded {
                            // `NOT IN` is unknown for a null operand.
                            let evidence = c.dimension(x.set.dimension());
                            if x.reach == ExclusionReach::Row
                                && (evidence.is_none() || x.set.contains(evidence))
                            {
                                continue;
                            }
                        }
                        push_distinct(&mut out, &mut seen, key.row(Some(c), pred.rows.scope));
                    }
                }
                MembershipTest::All { required, excluded } => {
                    let all = required.iter().all(|set| touches(set));
                    let clear = excluded.as_ref().map_or(true, |x| !touches(x));
                    if all && clear {
                        push_distinct(&mut out, &mut seen, key.row(None, pred.rows.scope));
                    }
                }
                MembershipTest::Absent { within } => {
                    let present = match within {
                        Some(set) => touches(set),
                        None => !facts.is_empty(),
                    };
                    if !present {
                        push_distinct(&mut out, &mut seen, key.row(None, pred.rows.scope));
                    }
                }
            }
        }

        sort_rows(pred.key, &mut out);
        out
    }
}

impl FactSnapshot {
    /// Classification rows listed by a search, shaped and ordered like the
    /// store's answer. Facts whose entity or node is unknown are dropped, as
    /// the inner joins do.
    pub fn search(&self, plan: &SearchPlan) -> Vec<Row> {
        let entities: HashMap<EntityId, &EntityRecord> = self.entities.iter().map(|e| (e.id, e)).collect();
        let labels: HashMap<NodeId, &str> = self.nodes.iter().map(|n| (n.id, n.label.as_str())).collect();

        let mut out: Vec<Row> = Vec::new();
        for c in &self.classifications {
            if !plan.nodes.contains(&c.node_id) || !c.qualifies(&plan.rows) {
                continue;
            }
            let (Some(entity), Some(theme)) = (entities.get(&c.entity_id), labels.get(&c.node_id)) else {
                continue;
            };
            let row = json!({
                "entity_id": c.entity_id,
                "last_name": entity.last_name,
                "first_name": entity.first_name,
                "node_id": c.node_id,
                "theme": theme,
                "role": c.role,
                "temporal_status": c.temporal_status,
                "origin_flag": c.origin_flag,
                "scope_id": c.scope_id,
                "scope_label": c.scope_label,
            });
            if let Value::Object(map) = row {
                out.push(map);
            }
        }

        let text = |r: &Row, k: &str| r.get(k).and_then(Value::as_str).map(str::to_string);
        let int = |r: &Row, k: &str| r.get(k).and_then(Value::as_i64);
        out.sort_by(|a, b| {
            text(a, "last_name")
                .cmp(&text(b, "last_name"))
                .then_with(|| text(a, "first_name").cmp(&text(b, "first_name")))
                .then_with(|| int(a, "entity_id").cmp(&int(b, "entity_id")))
                .then_with(|| text(a, "theme").cmp(&text(b, "theme")))
                .then_with(|| int(a, "node_id").cmp(&int(b, "node_id")))
                .then_with(|| text(a, "role").cmp(&text(b, "role")))
                .then_with(|| text(a, "temporal_status").cmp(&text(b, "temporal_status")))
                .then_with(|| int(a, "scope_id").cmp(&int(b, "scope_id")))
        });
        out
    }
}

enum KeyRecord<'a> {
    Entity(&'a EntityRecord),
    Node(&'a TaxonomyNode),
}

impl KeyRecord<'_> {
    fn id(&self) -> i64 {
        match self {
            KeyRecord::Entity(e) => e.id,
            KeyRecord::Node(n) => n.id,
        }
    }

    /// Joined rows report the witnessing fact's scope; keyed rows report the
    /// requested scope, if any.
    fn row(&self, fact: Option<&ClassificationRecord>, requested: Option<ScopeId>) -> Row {
        let value = match self {
            KeyRecord::Entity(e) => {
                let (scope_id, scope_label) = match fact {
                    Some(c) => (json!(c.scope_id), json!(c.scope_label)),
                    None => (json!(requested), Value::Null),
                };
                json!({
                    "entity_id": e.id,
                    "last_name": e.last_name,
                    "first_name": e.first_name,
                    "scope_id": scope_id,
                    "scope_label": scope_label,
                })
            }
            KeyRecord::Node(n) => json!({ "node_id": n.id, "label": n.label }),
        };
        match value {
            Value::Object(map) => map,
            _ => Row::new(),
        }
    }
}

fn push_distinct(out: &mut Vec<Row>, seen: &mut BTreeSet<String>, row: Row) {
    if seen.insert(Value::Object(row.clone()).to_string()) {
        out.push(row);
    }
}

fn sort_rows(key: GroupingKey, rows: &mut [Row]) {
    let text = |r: &Row, k: &str| r.get(k).and_then(Value::as_str).unwrap_or("").to_string();
    let int = |r: &Row, k: &str| r.get(k).and_then(Value::as_i64).unwrap_or(i64::MIN);
    match key {
        GroupingKey::Entity => rows.sort_by(|a, b| {
            text(a, "last_name")
                .cmp(&text(b, "last_name"))
                .then_with(|| text(a, "first_name").cmp(&text(b, "first_name")))
                .then_with(|| int(a, "entity_id").cmp(&int(b, "entity_id")))
        }),
        GroupingKey::Node => rows.sort_by(|a, b| {
            text(a, "label")
                .cmp(&text(b, "label"))
                .then_with(|| int(a, "node_id").cmp(&int(b, "node_id")))
        }),
    }
}

/// Key identifiers of evaluated rows (`entity_id` or `node_id`).
pub fn row_keys(key: GroupingKey, rows: &[Row]) -> BTreeSet<i64> {
    let column = match key {
        GroupingKey::Entity => "entity_id",
        GroupingKey::Node => "node_id",
    };
    rows.iter()
        .filter_map(|r| r.get(column).and_then(Value::as_i64))
        .collect()
}
