//! Taxonomy Closure Resolver
//!
//! Holds an immutable snapshot of the parent-pointer forest and answers
//! descendant-closure questions by walking a parent → children adjacency map.
//! Results are sets: order is irrelevant and duplicates collapse.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TaxonomyError;
use crate::schema::SchemaNames;
use crate::store::{Row, Statement};

pub type NodeId = i64;

/// Effective membership of a [`NodeSet`].
pub type Closure = BTreeSet<NodeId>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxonomyNode {
    pub id: NodeId,
    pub label: String,
    #[serde(default, rename = "parent_id")]
    pub parent: Option<NodeId>,
}

impl TaxonomyNode {
    pub fn new(id: NodeId, label: impl Into<String>, parent: Option<NodeId>) -> Self {
        Self {
            id,
            label: label.into(),
            parent,
        }
    }
}

/// Seed identifiers plus the descendant-inclusion flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSet {
    pub seeds: Vec<NodeId>,
    pub include_descendants: bool,
}

impl NodeSet {
    pub fn new(seeds: Vec<NodeId>, include_descendants: bool) -> Self {
        Self {
            seeds,
            include_descendants,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.seeds.is_empty()
    }

    /// Seeds with duplicates removed, first occurrence kept.
    pub fn distinct_seeds(&self) -> Vec<NodeId> {
        let mut seen = HashSet::new();
        self.seeds.iter().copied().filter(|id| seen.insert(*id)).collect()
    }
}

/// One line of the depth-first tree listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TreeEntry {
    pub id: NodeId,
    pub label: String,
    pub parent_id: Option<NodeId>,
    #[serde(rename = "lvl")]
    pub level: u32,
}

/// Immutable taxonomy snapshot with a precomputed adjacency map.
#[derive(Debug, Clone, Default)]
pub struct TaxonomyIndex {
    nodes: BTreeMap<NodeId, TaxonomyNode>,
    /// Children per parent, ordered by (label, id).
    children: HashMap<NodeId, Vec<NodeId>>,
}

impl TaxonomyIndex {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a snapshot, rejecting duplicate identifiers and cyclic parent
    /// chains. A parent reference to an unknown node makes that node a root.
    pub fn from_nodes(
        nodes: impl IntoIterator<Item = TaxonomyNode>,
    ) -> Result<Self, TaxonomyError> {
        let mut by_id = BTreeMap::new();
        for node in nodes {
            let id = node.id;
            if by_id.insert(id, node).is_some() {
                return Err(TaxonomyError::DuplicateNode(id));
            }
        }

        check_acyclic(&by_id)?;

        let mut children: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        for node in by_id.values() {
            if let Some(parent) = node.parent {
                children.entry(parent).or_default().push(node.id);
            }
        }
        for kids in children.values_mut() {
            kids.sort_by(|a, b| {
                let la = &by_id[a].label;
                let lb = &by_id[b].label;
                la.cmp(lb).then(a.cmp(b))
            });
        }

        Ok(Self {
            nodes: by_id,
            children,
        })
    }

    /// Build a snapshot from store rows carrying `id`, `label`, `parent_id`.
    pub fn from_rows(rows: &[Row]) -> Result<Self, TaxonomyError> {
        let nodes = rows.iter().map(node_from_row).collect::<Result<Vec<_>, _>>()?;
        Self::from_nodes(nodes)
    }

    /// Statement loading the whole node table with canonical column names.
    pub fn load_statement(schema: &SchemaNames) -> Statement {
        let n = &schema.node;
        Statement::new(format!(
            "SELECT {id} AS id, {label} AS label, {parent} AS parent_id FROM {table}",
            id = n.id,
            label = n.label,
            parent = n.parent,
            table = n.table,
        ))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn node(&self, id: NodeId) -> Option<&TaxonomyNode> {
        self.nodes.get(&id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &TaxonomyNode> {
        self.nodes.values()
    }

    pub fn children_of(&self, id: NodeId) -> &[NodeId] {
        self.children.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Effective membership of `set`: the seeds, plus every descendant when
    /// inclusion is requested. Unknown seeds are kept as-is.
    pub fn closure_of(&self, set: &NodeSet) -> Closure {
        if !set.include_descendants {
            return set.seeds.iter().copied().collect();
        }
        let mut out = Closure::new();
        for seed in &set.seeds {
            self.expand_into(*seed, &mut out);
        }
        out
    }

    /// One independent closure per distinct seed, in first-occurrence order.
    pub fn closures_per_seed(&self, set: &NodeSet) -> Vec<Closure> {
        set.distinct_seeds()
            .into_iter()
            .map(|seed| {
                let mut closure = Closure::new();
                if set.include_descendants {
                    self.expand_into(seed, &mut closure);
                } else {
                    closure.insert(seed);
                }
                closure
            })
            .collect()
    }

    /// Strict descendants of `root` (root excluded).
    pub fn descendants_of(&self, root: NodeId) -> Closure {
        let mut out = Closure::new();
        self.expand_into(root, &mut out);
        out.remove(&root);
        out
    }

    /// Is `node` reachable from `ancestor` by zero or more child links?
    pub fn is_descendant_or_self(&self, node: NodeId, ancestor: NodeId) -> bool {
        let mut cursor = Some(node);
        let mut steps = 0usize;
        while let Some(id) = cursor {
            if id == ancestor {
                return true;
            }
            steps += 1;
            if steps > self.nodes.len() {
                return false;
            }
            cursor = self.nodes.get(&id).and_then(|n| n.parent);
        }
        false
    }

    fn expand_into(&self, seed: NodeId, out: &mut Closure) {
        if !out.insert(seed) {
            return;
        }
        let mut stack: Vec<NodeId> = self.children_of(seed).to_vec();
        while let Some(id) = stack.pop() {
            if out.insert(id) {
                stack.extend_from_slice(self.children_of(id));
            }
        }
    }

    /// Depth-first listing from the roots, siblings ordered by label.
    pub fn tree(&self) -> Vec<TreeEntry> {
        let mut roots: Vec<&TaxonomyNode> = self
            .nodes
            .values()
            .filter(|n| n.parent.map_or(true, |p| !self.nodes.contains_key(&p)))
            .collect();
        roots.sort_by(|a, b| a.label.cmp(&b.label).then(a.id.cmp(&b.id)));

        let mut out = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<(NodeId, u32)> = roots.iter().rev().map(|n| (n.id, 1)).collect();
        while let Some((id, level)) = stack.pop() {
            let Some(node) = self.nodes.get(&id) else {
                continue;
            };
            out.push(TreeEntry {
                id,
                label: node.label.clone(),
                parent_id: node.parent,
                level,
            });
            for child in self.children_of(id).iter().rev() {
                stack.push((*child, level + 1));
            }
        }
        out
    }
}

fn check_acyclic(nodes: &BTreeMap<NodeId, TaxonomyNode>) -> Result<(), TaxonomyError> {
    let mut settled: HashSet<NodeId> = HashSet::new();
    for start in nodes.keys() {
        let mut path: HashSet<NodeId> = HashSet::new();
        let mut cursor = Some(*start);
        while let Some(id) = cursor {
            if settled.contains(&id) {
                break;
            }
            if !path.insert(id) {
                return Err(TaxonomyError::Cycle(id));
            }
            cursor = nodes.get(&id).and_then(|n| n.parent);
        }
        settled.extend(path);
    }
    Ok(())
}

fn node_from_row(row: &Row) -> Result<TaxonomyNode, TaxonomyError> {
    let id = row
        .get("id")
        .and_then(int_value)
        .ok_or_else(|| TaxonomyError::MalformedRow(format!("missing integer id in {row:?}")))?;
    let label = match row.get("label") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    };
    let parent = match row.get("parent_id") {
        None | Some(Value::Null) => None,
        Some(v) => Some(int_value(v).ok_or_else(|| {
            TaxonomyError::MalformedRow(format!("node {id}: parent_id {v} is not an integer"))
        })?),
    };
    Ok(TaxonomyNode { id, label, parent })
}

fn int_value(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
