//! Classification search
//!
//! The row-level listing behind the people search screen: one row per
//! qualifying classification under the requested themes, carrying the
//! entity, the theme label and the classification's own facets and scope.
//! Unlike the catalog shapes nothing is grouped; the caller sees every
//! matching fact.
//!
//! ```text
//!   theme_ids ──closure_of──► node set ─┐
//!   role / temporalite / mode ──────────┼──► RowFilter ──► one statement
//!   structure_id (optional) ────────────┘
//! ```

use serde_json::Value;

use crate::combinator::RowFilter;
use crate::error::ValidationError;
use crate::params::Payload;
use crate::registry::{INCLUDE_DESC, STRUCTURE_ID, THEME_IDS};
use crate::taxonomy::{Closure, NodeSet, TaxonomyIndex};

/// A validated search request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassificationSearch {
    pub themes: NodeSet,
    pub rows: RowFilter,
}

/// Nodes to list and the row constraints, ready for lowering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchPlan {
    pub nodes: Closure,
    pub rows: RowFilter,
}

impl ClassificationSearch {
    /// `theme_ids` (int[]), `include_desc` (default true), the three facets
    /// and an optional `structure_id`.
    pub fn from_payload(payload: &Value) -> Result<Self, ValidationError> {
        let p = Payload::new(payload);
        let themes = NodeSet::new(p.int_list(THEME_IDS)?, p.boolean(INCLUDE_DESC, true));
        let mut rows = RowFilter::new(p.facets());
        if let Some(scope) = p.int(STRUCTURE_ID)? {
            rows = rows.in_scope(scope);
        }
        Ok(Self { themes, rows })
    }

    /// `None` when no theme was requested: the answer is empty.
    pub fn plan(&self, taxonomy: &TaxonomyIndex) -> Option<SearchPlan> {
        if self.themes.is_empty() {
            return None;
        }
        Some(SearchPlan {
            nodes: taxonomy.closure_of(&self.themes),
            rows: self.rows.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facets::FacetValue;
    use crate::taxonomy::TaxonomyNode;
    use serde_json::json;
    use std::collections::BTreeSet;

    fn taxonomy() -> TaxonomyIndex {
        TaxonomyIndex::from_nodes([
            TaxonomyNode::new(1, "root", None),
            TaxonomyNode::new(2, "child", Some(1)),
            TaxonomyNode::new(3, "grandchild", Some(2)),
        ])
        .unwrap()
    }

    #[test]
    fn closure_follows_include_desc() {
        let search = ClassificationSearch::from_payload(&json!({"theme_ids": [2]})).unwrap();
        let plan = search.plan(&taxonomy()).unwrap();
        assert_eq!(plan.nodes, BTreeSet::from([2, 3]));

        let search =
            ClassificationSearch::from_payload(&json!({"theme_ids": [2], "include_desc": "0"})).unwrap();
        assert_eq!(search.plan(&taxonomy()).unwrap().nodes, BTreeSet::from([2]));
    }

    #[test]
    fn facets_and_scope_are_read() {
        let search = ClassificationSearch::from_payload(&json!({
            "theme_ids": ["1"],
            "role": "Expert",
            "temporalite": "*",
            "structure_id": "7",
        }))
        .unwrap();
        assert_eq!(search.rows.facets.role, FacetValue::exact("Expert"));
        assert_eq!(search.rows.facets.temporal, FacetValue::Any);
        assert_eq!(search.rows.scope, Some(7));
        assert_eq!(search.rows.entity, None);

        let unscoped =
            ClassificationSearch::from_payload(&json!({"theme_ids": [1], "structure_id": null})).unwrap();
        assert_eq!(unscoped.rows.scope, None);
    }

    #[test]
    fn no_themes_plans_nothing() {
        let search = ClassificationSearch::from_payload(&json!({})).unwrap();
        assert!(search.plan(&taxonomy()).is_none());
    }

    #[test]
    fn bad_identifiers_are_rejected() {
        let err = ClassificationSearch::from_payload(&json!({"theme_ids": [1, "x"]})).unwrap_err();
        assert_eq!(err.param, "theme_ids[1]");
        let err =
            ClassificationSearch::from_payload(&json!({"theme_ids": [1], "structure_id": "lab"})).unwrap_err();
        assert_eq!(err.param, "structure_id");
    }
}
