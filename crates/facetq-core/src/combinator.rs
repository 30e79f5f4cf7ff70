//! Set Combinator
//!
//! Turns closures, a match mode and an optional exclusion into a
//! [`MembershipPredicate`]: a store-independent description of which grouping
//! keys (entities or taxonomy nodes) are selected by their classification
//! rows. Lowering to a statement lives in [`crate::sql`]; the in-memory
//! reference evaluation lives in [`crate::eval`].
//!
//! ```text
//!   key = Entity  → evidence dimension = classification node
//!   key = Node    → evidence dimension = classification scope
//!
//!   ANY(R₁..Rₙ) \ X   one qualifying row with evidence ∈ ∪Rᵢ
//!                     (entity: and ∉ X on that same row; node: no row ∈ X)
//!   ALL(R₁..Rₙ) \ X   ∀i ∃ qualifying row with evidence ∈ Rᵢ, ∄ row ∈ X
//! ```

use std::collections::BTreeSet;

use serde::Serialize;
use serde_json::Value;

use crate::facets::FacetFilter;
use crate::{EntityId, ScopeId};

/// Existential or universal quantification over the required seeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MatchMode {
    #[default]
    Any,
    All,
}

impl MatchMode {
    pub const SPELLINGS: &'static [&'static str] = &["ANY", "ALL"];

    /// `"all"` in any case selects [`MatchMode::All`]; anything else,
    /// including absence, is [`MatchMode::Any`].
    pub fn parse_lenient(raw: Option<&Value>) -> Self {
        match raw.and_then(Value::as_str) {
            Some(s) if s.trim().eq_ignore_ascii_case("ALL") => MatchMode::All,
            _ => MatchMode::Any,
        }
    }
}

/// What a result row is keyed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupingKey {
    Entity,
    Node,
}

impl GroupingKey {
    /// The classification column that serves as evidence for this key.
    pub fn evidence(self) -> Dimension {
        match self {
            GroupingKey::Entity => Dimension::Node,
            GroupingKey::Node => Dimension::Scope,
        }
    }

    /// The classification column that links a row back to its key.
    pub fn link(self) -> Dimension {
        match self {
            GroupingKey::Entity => Dimension::Entity,
            GroupingKey::Node => Dimension::Node,
        }
    }
}

/// A classification column used as key link or evidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Entity,
    Node,
    Scope,
}

/// A non-empty set of identifiers along one dimension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EvidenceSet {
    dimension: Dimension,
    members: BTreeSet<i64>,
}

impl EvidenceSet {
    /// `None` when `members` is empty.
    pub fn new(dimension: Dimension, members: impl IntoIterator<Item = i64>) -> Option<Self> {
        let members: BTreeSet<i64> = members.into_iter().collect();
        if members.is_empty() {
            None
        } else {
            Some(Self { dimension, members })
        }
    }

    pub fn dimension(&self) -> Dimension {
        self.dimension
    }

    pub fn members(&self) -> &BTreeSet<i64> {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn contains(&self, id: Option<i64>) -> bool {
        id.is_some_and(|id| self.members.contains(&id))
    }
}

/// How far an exclusion reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionReach {
    /// Only the witnessing row must avoid the excluded set.
    Row,
    /// No qualifying row of the key may touch the excluded set.
    Key,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Exclusion {
    pub set: EvidenceSet,
    pub reach: ExclusionReach,
}

/// Constraints every classification row must meet to count as evidence.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RowFilter {
    pub facets: FacetFilter,
    pub scope: Option<ScopeId>,
    pub entity: Option<EntityId>,
}

impl RowFilter {
    pub fn new(facets: FacetFilter) -> Self {
        Self {
            facets,
            scope: None,
            entity: None,
        }
    }

    pub fn in_scope(mut self, scope: ScopeId) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn of_entity(mut self, entity: EntityId) -> Self {
        self.entity = Some(entity);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipTest {
    /// Always false; nothing is sent to the store.
    Never,
    /// At least one qualifying row.
    Witnessed,
    Any {
        required: EvidenceSet,
        excluded: Option<Exclusion>,
    },
    All {
        required: Vec<EvidenceSet>,
        excluded: Option<EvidenceSet>,
    },
    /// No qualifying row (with evidence in `within`, when given).
    Absent { within: Option<EvidenceSet> },
}

/// Store-independent selection of grouping keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipPredicate {
    pub key: GroupingKey,
    /// Restricts the keys considered; `None` means every key.
    pub candidates: Option<BTreeSet<i64>>,
    pub rows: RowFilter,
    pub test: MembershipTest,
}

impl MembershipPredicate {
    pub fn never(key: GroupingKey) -> Self {
        Self {
            key,
            candidates: None,
            rows: RowFilter::default(),
            test: MembershipTest::Never,
        }
    }

    /// Keys with at least one qualifying row.
    pub fn witnessed(key: GroupingKey, rows: RowFilter) -> Self {
        Self {
            key,
            candidates: None,
            rows,
            test: MembershipTest::Witnessed,
        }
    }

    /// Keys with no qualifying row, optionally only counting evidence in
    /// `within`.
    pub fn absent(key: GroupingKey, within: Option<EvidenceSet>, rows: RowFilter) -> Self {
        Self {
            key,
            candidates: None,
            rows,
            test: MembershipTest::Absent { within },
        }
    }

    /// Narrow to the given keys. An empty candidate set selects nothing.
    pub fn restrict_to(mut self, candidates: BTreeSet<i64>) -> Self {
        if candidates.is_empty() {
            self.test = MembershipTest::Never;
        }
        self.candidates = Some(candidates);
        self
    }

    pub fn is_never(&self) -> bool {
        matches!(self.test, MembershipTest::Never)
    }

    /// Whether result rows carry the witnessing row's scope.
    pub fn reports_row_scope(&self) -> bool {
        matches!(
            self.test,
            MembershipTest::Witnessed | MembershipTest::Any { .. }
        )
    }
}

/// Compose per-seed evidence sets under `mode`, with an optional exclusion.
///
/// `required` holds one set per distinct seed (already closed over
/// descendants where requested). ANY unions them; ALL keeps them apart so
/// each is witnessed independently. An absent or empty `excluded` disables
/// the exclusion clause. Entity-keyed ANY applies the exclusion to the
/// witnessing row only; every other combination excludes key-wide.
pub fn combine(
    key: GroupingKey,
    required: Vec<BTreeSet<i64>>,
    mode: MatchMode,
    excluded: Option<BTreeSet<i64>>,
    rows: RowFilter,
) -> MembershipPredicate {
    let dimension = key.evidence();
    if required.is_empty() {
        return MembershipPredicate::never(key);
    }
    let excluded = excluded.and_then(|set| EvidenceSet::new(dimension, set));

    let test = match mode {
        MatchMode::Any => {
            let Some(required) = EvidenceSet::new(dimension, required.into_iter().flatten())
            else {
                return MembershipPredicate::never(key);
            };
            let reach = match key {
                GroupingKey::Entity => ExclusionReach::Row,
                GroupingKey::Node => ExclusionReach::Key,
            };
            MembershipTest::Any {
                required,
                excluded: excluded.map(|set| Exclusion { set, reach }),
            }
        }
        MatchMode::All => {
            let per_seed: Option<Vec<EvidenceSet>> = required
                .into_iter()
                .map(|set| EvidenceSet::new(dimension, set))
                .collect();
            let Some(mut required) = per_seed else {
                // An empty per-seed set can never be witnessed.
                return MembershipPredicate::never(key);
            };
            required.dedup();
            MembershipTest::All { required, excluded }
        }
    };

    MembershipPredicate {
        key,
        candidates: None,
        rows,
        test,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn set(ids: &[i64]) -> BTreeSet<i64> {
        ids.iter().copied().collect()
    }

    #[test]
    fn match_mode_is_lenient() {
        assert_eq!(MatchMode::parse_lenient(None), MatchMode::Any);
        assert_eq!(MatchMode::parse_lenient(Some(&json!("all"))), MatchMode::All);
        assert_eq!(MatchMode::parse_lenient(Some(&json!(" ALL "))), MatchMode::All);
        assert_eq!(MatchMode::parse_lenient(Some(&json!("every"))), MatchMode::Any);
        assert_eq!(MatchMode::parse_lenient(Some(&json!(1))), MatchMode::Any);
    }

    #[test]
    fn any_unions_seed_closures() {
        let pred = combine(
            GroupingKey::Entity,
            vec![set(&[1, 2]), set(&[2, 3])],
            MatchMode::Any,
            None,
            RowFilter::default(),
        );
        match pred.test {
            MembershipTest::Any { required, excluded } => {
                assert_eq!(required.members(), &set(&[1, 2, 3]));
                assert_eq!(required.dimension(), Dimension::Node);
                assert!(excluded.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn all_keeps_seeds_apart() {
        let pred = combine(
            GroupingKey::Entity,
            vec![set(&[2, 3]), set(&[3])],
            MatchMode::All,
            Some(set(&[9])),
            RowFilter::default(),
        );
        match pred.test {
            MembershipTest::All { required, excluded } => {
                assert_eq!(required.len(), 2);
                assert_eq!(excluded.unwrap().members(), &set(&[9]));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn exclusion_reach_depends_on_key() {
        let entity = combine(
            GroupingKey::Entity,
            vec![set(&[1])],
            MatchMode::Any,
            Some(set(&[2])),
            RowFilter::default(),
        );
        let node = combine(
            GroupingKey::Node,
            vec![set(&[10])],
            MatchMode::Any,
            Some(set(&[11])),
            RowFilter::default(),
        );
        let reach = |p: &MembershipPredicate| match &p.test {
            MembershipTest::Any { excluded: Some(x), .. } => x.reach,
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(reach(&entity), ExclusionReach::Row);
        assert_eq!(reach(&node), ExclusionReach::Key);
    }

    #[test]
    fn degenerate_inputs() {
        let none = combine(GroupingKey::Entity, vec![], MatchMode::Any, None, RowFilter::default());
        assert!(none.is_never());

        let empty_seed = combine(
            GroupingKey::Entity,
            vec![set(&[1]), set(&[])],
            MatchMode::All,
            None,
            RowFilter::default(),
        );
        assert!(empty_seed.is_never());

        let empty_excl = combine(
            GroupingKey::Entity,
            vec![set(&[1])],
            MatchMode::Any,
            Some(set(&[])),
            RowFilter::default(),
        );
        assert!(matches!(empty_excl.test, MembershipTest::Any { excluded: None, .. }));
    }

    #[test]
    fn restrict_to_empty_is_never() {
        let pred = MembershipPredicate::witnessed(GroupingKey::Node, RowFilter::default())
            .restrict_to(BTreeSet::new());
        assert!(pred.is_never());
        let pred = MembershipPredicate::witnessed(GroupingKey::Node, RowFilter::default())
            .restrict_to(set(&[4]));
        assert!(!pred.is_never());
        assert!(pred.reports_row_scope());
    }
}
