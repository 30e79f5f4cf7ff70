//! facetq: faceted hierarchical query engine
//!
//! Answers membership questions over entities classified against a taxonomy:
//! "which entities are classified under any/all of these nodes (descendants
//! included), with role R, not under those nodes, within scope S?"
//!
//! ```text
//! ┌──────────────┐   ┌────────────────┐   ┌───────────────┐   ┌──────────────┐
//! │ shape id +   │──►│ Query Registry │──►│ Set Combinator│──►│  Lowering    │
//! │ JSON payload │   │ (typed params) │   │ (ANY/ALL/excl)│   │ (:named SQL) │
//! └──────────────┘   └───────┬────────┘   └───────▲───────┘   └──────┬───────┘
//!                            │                    │                  │
//!                    ┌───────▼────────┐   ┌───────┴───────┐   ┌──────▼───────┐
//!                    │ Facet          │   │ Taxonomy      │   │ Store        │
//!                    │ Normalizer     │   │ Closures      │   │ collaborator │
//!                    └────────────────┘   └───────────────┘   └──────────────┘
//! ```
//!
//! ## Guarantees
//!
//! - **Injection safety**: request values are only ever bound as named
//!   parameters; statement text is assembled from fixed templates, validated
//!   schema identifiers and engine-generated placeholder names.
//! - **One round trip**: each catalog query and each classification search
//!   issues at most one statement.
//!   Empty required sets short-circuit to an empty result without touching
//!   the store.
//! - **Stateless evaluation**: the catalog is a `static`; the only shared state
//!   is the taxonomy snapshot, swapped atomically on reload.

pub mod classification;
pub mod combinator;
pub mod engine;
pub mod error;
pub mod eval;
pub mod facets;
pub mod params;
pub mod registry;
pub mod schema;
pub mod search;
pub mod sql;
pub mod store;
pub mod taxonomy;

pub use classification::{ClassificationKey, NewClassification, Role, TemporalStatus};
pub use combinator::{GroupingKey, MatchMode, MembershipPredicate, MembershipTest};
pub use engine::{PreparedQuery, QueryEngine};
pub use error::{ConfigError, EngineError, StoreError, TaxonomyError, ValidationError};
pub use eval::FactSnapshot;
pub use facets::{normalize, normalize_boolean, FacetFilter, FacetValue, OriginFilter, OriginMode};
pub use registry::{catalog, lookup, ShapeDecl, ShapeKind, ShapeRequest};
pub use schema::SchemaNames;
pub use search::{ClassificationSearch, SearchPlan};
pub use store::{Row, SqlValue, Statement, Store};
pub use taxonomy::{NodeId, NodeSet, TaxonomyIndex, TaxonomyNode};

/// Identifier of a classified entity.
pub type EntityId = i64;

/// Identifier of a scope (grouping) on a classification.
pub type ScopeId = i64;
