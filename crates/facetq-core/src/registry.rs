//! Query Registry
//!
//! A fixed catalog of eleven query shapes. Each [`ShapeKind`] declares its
//! parameter schema and parses a payload into a typed [`ShapeRequest`];
//! [`ShapeRequest::plan`] is the single dispatcher that maps every request
//! onto the combinator algebra.
//!
//! | family        | shapes                                                   |
//! |---------------|----------------------------------------------------------|
//! | entity-keyed  | `people_*`                                               |
//! | node-keyed    | `themes_*`, `subthemes_*`                                |

use std::collections::BTreeSet;

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::Value;

use crate::combinator::{
    combine, Dimension, EvidenceSet, GroupingKey, MatchMode, MembershipPredicate, RowFilter,
};
use crate::error::ValidationError;
use crate::facets::FacetFilter;
use crate::params::{ParamType, Payload, ScopeSelection};
use crate::taxonomy::{NodeId, NodeSet, TaxonomyIndex};
use crate::{EntityId, ScopeId};

// ============================================================================
// Declarations
// ============================================================================

pub(crate) const THEME_IDS: &str = "theme_ids";
const EXCLUDE_THEME_IDS: &str = "exclude_theme_ids";
const MATCH: &str = "match";
pub(crate) const INCLUDE_DESC: &str = "include_desc";
pub(crate) const STRUCTURE_ID: &str = "structure_id";
const STRUCTURE_IDS: &str = "structure_ids";
const INCLUDE_STRUCTURES: &str = "include_structures";
const EXCLUDE_STRUCTURES: &str = "exclude_structures";
const PERSON_ID: &str = "person_id";
const ROOT_THEME_ID: &str = "root_theme_id";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: &'static str,
    pub ty: ParamType,
}

const fn p(name: &'static str, ty: ParamType) -> ParamSpec {
    ParamSpec { name, ty }
}

const MATCH_TYPE: ParamType = ParamType::Enum(MatchMode::SPELLINGS);
const ROLE: ParamSpec = p(FacetFilter::ROLE_KEY, ParamType::Str);
const TEMPORAL: ParamSpec = p(FacetFilter::TEMPORAL_KEY, ParamType::Str);
const MODE: ParamSpec = p(FacetFilter::MODE_KEY, ParamType::Str);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShapeKind {
    PeopleWithNoTheme,
    PeopleByThemes,
    PeopleByThemesExcluding,
    PeopleOfStructureByThemes,
    PeopleOfStructureByThemesExcluding,
    ThemesOfPerson,
    ThemesInStructures,
    ThemesNotInStructures,
    ThemesInSNotInSp,
    SubthemesOfXInS,
    SubthemesOfXNotInS,
}

/// Catalog entry: stable id, label, result key and parameter schema.
#[derive(Debug)]
pub struct ShapeDecl {
    pub kind: ShapeKind,
    pub id: &'static str,
    pub label: &'static str,
    pub key: GroupingKey,
    pub params: &'static [ParamSpec],
}

impl Serialize for ShapeDecl {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        struct Params(&'static [ParamSpec]);

        impl Serialize for Params {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                let mut map = serializer.serialize_map(Some(self.0.len()))?;
                for spec in self.0 {
                    map.serialize_entry(spec.name, &spec.ty)?;
                }
                map.end()
            }
        }

        let mut map = serializer.serialize_map(Some(4))?;
        map.serialize_entry("id", self.id)?;
        map.serialize_entry("label", self.label)?;
        map.serialize_entry("returns", &self.key)?;
        map.serialize_entry("params", &Params(self.params))?;
        map.end()
    }
}

static CATALOG: [ShapeDecl; 11] = [
    ShapeDecl {
        kind: ShapeKind::PeopleWithNoTheme,
        id: "people_with_no_theme",
        label: "People without any theme",
        key: GroupingKey::Entity,
        params: &[ROLE, TEMPORAL, MODE],
    },
    ShapeDecl {
        kind: ShapeKind::PeopleByThemes,
        id: "people_by_themes",
        label: "People on themes T (ANY/ALL, descendants)",
        key: GroupingKey::Entity,
        params: &[
            p(THEME_IDS, ParamType::IntList),
            p(MATCH, MATCH_TYPE),
            p(INCLUDE_DESC, ParamType::Bool),
            ROLE,
            TEMPORAL,
            MODE,
        ],
    },
    ShapeDecl {
        kind: ShapeKind::PeopleByThemesExcluding,
        id: "people_by_themes_excluding",
        label: "People on themes T but not on T'",
        key: GroupingKey::Entity,
        params: &[
            p(THEME_IDS, ParamType::IntList),
            p(EXCLUDE_THEME_IDS, ParamType::IntList),
            p(MATCH, MATCH_TYPE),
            p(INCLUDE_DESC, ParamType::Bool),
            ROLE,
            TEMPORAL,
            MODE,
        ],
    },
    ShapeDecl {
        kind: ShapeKind::PeopleOfStructureByThemes,
        id: "people_of_structure_by_themes",
        label: "People of structure S on themes T",
        key: GroupingKey::Entity,
        params: &[
            p(STRUCTURE_ID, ParamType::Int),
            p(THEME_IDS, ParamType::IntList),
            p(MATCH, MATCH_TYPE),
            p(INCLUDE_DESC, ParamType::Bool),
            ROLE,
            TEMPORAL,
            MODE,
        ],
    },
    ShapeDecl {
        kind: ShapeKind::PeopleOfStructureByThemesExcluding,
        id: "people_of_structure_by_themes_excluding",
        label: "People of structure S on themes T but not on T'",
        key: GroupingKey::Entity,
        params: &[
            p(STRUCTURE_ID, ParamType::Int),
            p(THEME_IDS, ParamType::IntList),
            p(EXCLUDE_THEME_IDS, ParamType::IntList),
            p(MATCH, MATCH_TYPE),
            p(INCLUDE_DESC, ParamType::Bool),
            ROLE,
            TEMPORAL,
            MODE,
        ],
    },
    ShapeDecl {
        kind: ShapeKind::ThemesOfPerson,
        id: "themes_of_person",
        label: "Themes of a person",
        key: GroupingKey::Node,
        params: &[p(PERSON_ID, ParamType::Int), ROLE, TEMPORAL, MODE],
    },
    ShapeDecl {
        kind: ShapeKind::ThemesInStructures,
        id: "themes_in_structures",
        label: "Themes present in structures S (ANY/ALL, or every structure)",
        key: GroupingKey::Node,
        params: &[
            p(STRUCTURE_IDS, ParamType::IntList),
            p(MATCH, MATCH_TYPE),
            ROLE,
            TEMPORAL,
            MODE,
        ],
    },
    ShapeDecl {
        kind: ShapeKind::ThemesNotInStructures,
        id: "themes_not_in_structures",
        label: "Themes absent from structures S",
        key: GroupingKey::Node,
        params: &[p(STRUCTURE_IDS, ParamType::IntList), ROLE, TEMPORAL, MODE],
    },
    ShapeDecl {
        kind: ShapeKind::ThemesInSNotInSp,
        id: "themes_in_S_not_in_Sp",
        label: "Themes present in S but not in S'",
        key: GroupingKey::Node,
        params: &[
            p(INCLUDE_STRUCTURES, ParamType::IntList),
            p(EXCLUDE_STRUCTURES, ParamType::IntList),
            ROLE,
            TEMPORAL,
            MODE,
        ],
    },
    ShapeDecl {
        kind: ShapeKind::SubthemesOfXInS,
        id: "subthemes_of_X_in_S",
        label: "Sub-themes of X present in structures S",
        key: GroupingKey::Node,
        params: &[
            p(ROOT_THEME_ID, ParamType::Int),
            p(STRUCTURE_IDS, ParamType::IntList),
            p(MATCH, MATCH_TYPE),
            ROLE,
            TEMPORAL,
            MODE,
        ],
    },
    ShapeDecl {
        kind: ShapeKind::SubthemesOfXNotInS,
        id: "subthemes_of_X_not_in_S",
        label: "Sub-themes of X absent from structures S",
        key: GroupingKey::Node,
        params: &[
            p(ROOT_THEME_ID, ParamType::Int),
            p(STRUCTURE_IDS, ParamType::IntList),
            ROLE,
            TEMPORAL,
            MODE,
        ],
    },
];

/// Every registered shape, in declaration order.
pub fn catalog() -> &'static [ShapeDecl] {
    &CATALOG
}

pub fn lookup(id: &str) -> Option<&'static ShapeDecl> {
    CATALOG.iter().find(|decl| decl.id == id)
}

impl ShapeKind {
    pub fn decl(self) -> &'static ShapeDecl {
        // Declaration order matches variant order.
        &CATALOG[self as usize]
    }

    pub fn id(self) -> &'static str {
        self.decl().id
    }

    /// Validate `payload` against this shape's schema.
    pub fn parse(self, payload: &Value) -> Result<ShapeRequest, ValidationError> {
        let p = Payload::new(payload);
        let facets = p.facets();
        let request = match self {
            ShapeKind::PeopleWithNoTheme => ShapeRequest::PeopleWithNoTheme(facets),
            ShapeKind::PeopleByThemes => {
                ShapeRequest::PeopleByThemes(ThemeQuery::parse(&p, false, None)?)
            }
            ShapeKind::PeopleByThemesExcluding => {
                ShapeRequest::PeopleByThemesExcluding(ThemeQuery::parse(&p, true, None)?)
            }
            ShapeKind::PeopleOfStructureByThemes => {
                let scope = p.require_int(STRUCTURE_ID)?;
                ShapeRequest::PeopleOfStructureByThemes(ThemeQuery::parse(&p, false, Some(scope))?)
            }
            ShapeKind::PeopleOfStructureByThemesExcluding => {
                let scope = p.require_int(STRUCTURE_ID)?;
                ShapeRequest::PeopleOfStructureByThemesExcluding(ThemeQuery::parse(
                    &p,
                    true,
                    Some(scope),
                )?)
            }
            ShapeKind::ThemesOfPerson => ShapeRequest::ThemesOfPerson(PersonQuery {
                person: p.require_int(PERSON_ID)?,
                facets,
            }),
            ShapeKind::ThemesInStructures => ShapeRequest::ThemesInStructures(ScopeQuery {
                scopes: p.scope_selection(STRUCTURE_IDS)?,
                mode: p.match_mode(MATCH),
                facets,
            }),
            ShapeKind::ThemesNotInStructures => {
                ShapeRequest::ThemesNotInStructures(ScopeAbsence {
                    scopes: p.int_list(STRUCTURE_IDS)?,
                    facets,
                })
            }
            ShapeKind::ThemesInSNotInSp => ShapeRequest::ThemesInSNotInSp(ScopeDifference {
                included: p.int_list(INCLUDE_STRUCTURES)?,
                excluded: p.int_list(EXCLUDE_STRUCTURES)?,
                facets,
            }),
            ShapeKind::SubthemesOfXInS => ShapeRequest::SubthemesOfXInS(SubtreeQuery {
                root: p.require_int(ROOT_THEME_ID)?,
                scopes: p.int_list(STRUCTURE_IDS)?,
                mode: p.match_mode(MATCH),
                facets,
            }),
            ShapeKind::SubthemesOfXNotInS => ShapeRequest::SubthemesOfXNotInS(SubtreeQuery {
                root: p.require_int(ROOT_THEME_ID)?,
                scopes: p.int_list(STRUCTURE_IDS)?,
                mode: MatchMode::Any,
                facets,
            }),
        };
        Ok(request)
    }
}

// ============================================================================
// Typed requests
// ============================================================================

/// Entity-keyed selection by taxonomy nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThemeQuery {
    pub themes: NodeSet,
    /// Closed over descendants with the same flag as `themes`.
    pub excluded: Option<NodeSet>,
    pub mode: MatchMode,
    pub scope: Option<ScopeId>,
    pub facets: FacetFilter,
}

impl ThemeQuery {
    fn parse(
        p: &Payload<'_>,
        with_exclusion: bool,
        scope: Option<ScopeId>,
    ) -> Result<Self, ValidationError> {
        let include_descendants = p.boolean(INCLUDE_DESC, true);
        let themes = NodeSet::new(p.int_list(THEME_IDS)?, include_descendants);
        let excluded = if with_exclusion {
            let ids = p.int_list(EXCLUDE_THEME_IDS)?;
            (!ids.is_empty()).then(|| NodeSet::new(ids, include_descendants))
        } else {
            None
        };
        Ok(Self {
            themes,
            excluded,
            mode: p.match_mode(MATCH),
            scope,
            facets: p.facets(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersonQuery {
    pub person: EntityId,
    pub facets: FacetFilter,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeQuery {
    pub scopes: ScopeSelection,
    pub mode: MatchMode,
    pub facets: FacetFilter,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeAbsence {
    pub scopes: Vec<ScopeId>,
    pub facets: FacetFilter,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeDifference {
    pub included: Vec<ScopeId>,
    pub excluded: Vec<ScopeId>,
    pub facets: FacetFilter,
}

/// Node-keyed selection restricted to the strict descendants of `root`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubtreeQuery {
    pub root: NodeId,
    pub scopes: Vec<ScopeId>,
    pub mode: MatchMode,
    pub facets: FacetFilter,
}

/// A validated request for one catalog shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShapeRequest {
    PeopleWithNoTheme(FacetFilter),
    PeopleByThemes(ThemeQuery),
    PeopleByThemesExcluding(ThemeQuery),
    PeopleOfStructureByThemes(ThemeQuery),
    PeopleOfStructureByThemesExcluding(ThemeQuery),
    ThemesOfPerson(PersonQuery),
    ThemesInStructures(ScopeQuery),
    ThemesNotInStructures(ScopeAbsence),
    ThemesInSNotInSp(ScopeDifference),
    SubthemesOfXInS(SubtreeQuery),
    SubthemesOfXNotInS(SubtreeQuery),
}

fn singletons(ids: &[i64]) -> Vec<BTreeSet<i64>> {
    let mut seen = BTreeSet::new();
    ids.iter()
        .filter(|id| seen.insert(**id))
        .map(|id| BTreeSet::from([*id]))
        .collect()
}

impl ShapeRequest {
    pub fn kind(&self) -> ShapeKind {
        match self {
            ShapeRequest::PeopleWithNoTheme(_) => ShapeKind::PeopleWithNoTheme,
            ShapeRequest::PeopleByThemes(_) => ShapeKind::PeopleByThemes,
            ShapeRequest::PeopleByThemesExcluding(_) => ShapeKind::PeopleByThemesExcluding,
            ShapeRequest::PeopleOfStructureByThemes(_) => ShapeKind::PeopleOfStructureByThemes,
            ShapeRequest::PeopleOfStructureByThemesExcluding(_) => {
                ShapeKind::PeopleOfStructureByThemesExcluding
            }
            ShapeRequest::ThemesOfPerson(_) => ShapeKind::ThemesOfPerson,
            ShapeRequest::ThemesInStructures(_) => ShapeKind::ThemesInStructures,
            ShapeRequest::ThemesNotInStructures(_) => ShapeKind::ThemesNotInStructures,
            ShapeRequest::ThemesInSNotInSp(_) => ShapeKind::ThemesInSNotInSp,
            ShapeRequest::SubthemesOfXInS(_) => ShapeKind::SubthemesOfXInS,
            ShapeRequest::SubthemesOfXNotInS(_) => ShapeKind::SubthemesOfXNotInS,
        }
    }

    /// Map the request onto the combinator algebra.
    pub fn plan(&self, taxonomy: &TaxonomyIndex) -> MembershipPredicate {
        match self {
            ShapeRequest::PeopleWithNoTheme(facets) => {
                MembershipPredicate::absent(GroupingKey::Entity, None, RowFilter::new(facets.clone()))
            }
            ShapeRequest::PeopleByThemes(q)
            | ShapeRequest::PeopleByThemesExcluding(q)
            | ShapeRequest::PeopleOfStructureByThemes(q)
            | ShapeRequest::PeopleOfStructureByThemesExcluding(q) => {
                let mut rows = RowFilter::new(q.facets.clone());
                rows.scope = q.scope;
                let required = taxonomy.closures_per_seed(&q.themes);
                let excluded = q.excluded.as_ref().map(|set| taxonomy.closure_of(set));
                combine(GroupingKey::Entity, required, q.mode, excluded, rows)
            }
            ShapeRequest::ThemesOfPerson(q) => MembershipPredicate::witnessed(
                GroupingKey::Node,
                RowFilter::new(q.facets.clone()).of_entity(q.person),
            ),
            ShapeRequest::ThemesInStructures(q) => {
                let rows = RowFilter::new(q.facets.clone());
                match &q.scopes {
                    ScopeSelection::Every => MembershipPredicate::witnessed(GroupingKey::Node, rows),
                    ScopeSelection::Listed(ids) => {
                        combine(GroupingKey::Node, singletons(ids), q.mode, None, rows)
                    }
                }
            }
            ShapeRequest::ThemesNotInStructures(q) => {
                match EvidenceSet::new(Dimension::Scope, q.scopes.iter().copied()) {
                    None => MembershipPredicate::never(GroupingKey::Node),
                    within => MembershipPredicate::absent(
                        GroupingKey::Node,
                        within,
                        RowFilter::new(q.facets.clone()),
                    ),
                }
            }
            ShapeRequest::ThemesInSNotInSp(q) => {
                let excluded = q.excluded.iter().copied().collect();
                combine(
                    GroupingKey::Node,
                    singletons(&q.included),
                    MatchMode::Any,
                    Some(excluded),
                    RowFilter::new(q.facets.clone()),
                )
            }
            ShapeRequest::SubthemesOfXInS(q) => {
                let rows = RowFilter::new(q.facets.clone());
                let candidates = taxonomy.descendants_of(q.root);
                // ALL without explicit scopes degrades to ANY over every scope.
                let pred = if q.scopes.is_empty() {
                    MembershipPredicate::witnessed(GroupingKey::Node, rows)
                } else {
                    combine(GroupingKey::Node, singletons(&q.scopes), q.mode, None, rows)
                };
                pred.restrict_to(candidates)
            }
            ShapeRequest::SubthemesOfXNotInS(q) => {
                let within = EvidenceSet::new(Dimension::Scope, q.scopes.iter().copied());
                let candidates = taxonomy.descendants_of(q.root);
                MembershipPredicate::absent(GroupingKey::Node, within, RowFilter::new(q.facets.clone()))
                    .restrict_to(candidates)
            }
        }
    }
}
