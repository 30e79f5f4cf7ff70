//! Statement lowering
//!
//! Renders a [`MembershipPredicate`] as one SQL statement with `:name`
//! placeholders. Text is built only from fixed templates, validated schema
//! identifiers and placeholder names generated here; every value is bound.
//!
//! Two layouts are used:
//!
//! - **joined**: `key JOIN classification` with `SELECT DISTINCT`, for tests
//!   witnessed by a single row (ANY, unconstrained) and for the node-keyed
//!   ALL over single scopes, which groups and counts distinct evidence.
//! - **keyed**: `FROM key` with one `EXISTS` per required set and
//!   `NOT EXISTS` for exclusion / absence.
//!
//! Identifier sets (closures, scope lists, candidates) are bound whole, one
//! list parameter each, and read back with `json_each`.

use std::collections::{BTreeMap, BTreeSet};

use crate::combinator::{
    Dimension, EvidenceSet, ExclusionReach, GroupingKey, MembershipPredicate, MembershipTest,
    RowFilter,
};
use crate::facets::{OriginFilter, OriginMode};
use crate::schema::SchemaNames;
use crate::search::SearchPlan;
use crate::store::{SqlValue, Statement};

/// Alias of the key table.
const KEY: &str = "k";
/// Alias of the joined classification row.
const ROW: &str = "c";
/// Alias of a bound identifier list.
const LIST: &str = "ids";
/// Aliases of the entity and node tables in the search listing.
const ENTITY: &str = "e";
const NODE: &str = "n";

/// Lower `pred` to a statement. `None` for predicates that select nothing;
/// callers answer those with an empty result without touching the store.
pub fn lower(pred: &MembershipPredicate, schema: &SchemaNames) -> Option<Statement> {
    let mut b = Lowering::new(schema, pred.key);
    let text = match &pred.test {
        MembershipTest::Never => return None,
        MembershipTest::Witnessed => b.joined(pred, None, None),
        MembershipTest::Any { required, excluded } => {
            let exclusion = excluded.as_ref().map(|x| (&x.set, x.reach));
            b.joined(pred, Some(required), exclusion)
        }
        MembershipTest::All { required, excluded }
            if pred.key == GroupingKey::Node && required.iter().all(|s| s.len() == 1) =>
        {
            b.grouped(pred, required, excluded.as_ref())
        }
        MembershipTest::All { required, excluded } => {
            let mut conds: Vec<String> = required
                .iter()
                .map(|set| b.exists(&pred.rows, Some((set, "req"))))
                .collect();
            if let Some(x) = excluded {
                conds.push(format!("NOT {}", b.exists(&pred.rows, Some((x, "exc")))));
            }
            b.keyed(pred, conds)
        }
        MembershipTest::Absent { within } => {
            let within = within.as_ref().map(|set| (set, "req"));
            let cond = format!("NOT {}", b.exists(&pred.rows, within));
            b.keyed(pred, vec![cond])
        }
    };
    Some(Statement {
        text,
        params: b.params,
    })
}

/// Lower a classification search: one row per qualifying classification
/// whose node is in the plan's set.
pub fn lower_search(plan: &SearchPlan, schema: &SchemaNames) -> Statement {
    let mut b = Lowering::new(schema, GroupingKey::Entity);
    let (c, e, n) = (&schema.classification, &schema.entity, &schema.node);

    let mut conds = b.row_conditions(ROW, &plan.rows);
    let list = b.list("req", &plan.nodes);
    conds.push(format!("{ROW}.{} IN ({list})", c.node));

    let text = assemble(&[
        format!(
            "SELECT {ROW}.{} AS entity_id, {ENTITY}.{} AS last_name, {ENTITY}.{} AS first_name, \
             {ROW}.{} AS node_id, {NODE}.{} AS theme, {ROW}.{} AS role, {ROW}.{} AS temporal_status, \
             {ROW}.{} AS origin_flag, {ROW}.{} AS scope_id, {ROW}.{} AS scope_label",
            c.entity, e.last_name, e.first_name, c.node, n.label, c.role, c.temporal, c.origin_flag,
            c.scope, c.scope_label
        ),
        format!(
            "FROM {} {ROW} JOIN {} {ENTITY} ON {ENTITY}.{} = {ROW}.{} JOIN {} {NODE} ON {NODE}.{} = {ROW}.{}",
            c.table, e.table, e.id, c.entity, n.table, n.id, c.node
        ),
        where_clause(&conds),
        SEARCH_ORDER.into(),
    ]);
    Statement {
        text,
        params: b.params,
    }
}

/// Row order of the search listing. Nulls sort first.
pub const SEARCH_ORDER: &str =
    "ORDER BY last_name, first_name, entity_id, theme, node_id, role, temporal_status, scope_id";

struct Lowering<'a> {
    schema: &'a SchemaNames,
    key: GroupingKey,
    params: BTreeMap<String, SqlValue>,
    next_list: BTreeMap<&'static str, usize>,
    next_alias: usize,
}

impl<'a> Lowering<'a> {
    fn new(schema: &'a SchemaNames, key: GroupingKey) -> Self {
        Self {
            schema,
            key,
            params: BTreeMap::new(),
            next_list: BTreeMap::new(),
            next_alias: 0,
        }
    }

    // ------------------------------------------------------------------------
    // Binding
    // ------------------------------------------------------------------------

    /// Bind a fixed-name parameter. Rebinding a name keeps one entry.
    fn named(&mut self, name: &'static str, value: SqlValue) -> String {
        self.params.insert(name.to_string(), value);
        format!(":{name}")
    }

    /// Bind a whole identifier set as one list parameter and return the
    /// subquery that enumerates it. The number of placeholders stays fixed
    /// however large the closure is.
    fn list(&mut self, prefix: &'static str, ids: &BTreeSet<i64>) -> String {
        let counter = self.next_list.entry(prefix).or_insert(0);
        *counter += 1;
        let name = format!("{prefix}{counter}");
        let text = format!("SELECT {LIST}.value FROM json_each(:{name}) AS {LIST}");
        self.params.insert(name, SqlValue::int_list(ids.iter().copied()));
        text
    }

    fn alias(&mut self) -> String {
        self.next_alias += 1;
        format!("x{}", self.next_alias)
    }

    // ------------------------------------------------------------------------
    // Names
    // ------------------------------------------------------------------------

    fn column(&self, dim: Dimension) -> &'a str {
        let c = &self.schema.classification;
        match dim {
            Dimension::Entity => &c.entity,
            Dimension::Node => &c.node,
            Dimension::Scope => &c.scope,
        }
    }

    fn key_table(&self) -> &'a str {
        match self.key {
            GroupingKey::Entity => &self.schema.entity.table,
            GroupingKey::Node => &self.schema.node.table,
        }
    }

    fn key_id(&self) -> &'a str {
        match self.key {
            GroupingKey::Entity => &self.schema.entity.id,
            GroupingKey::Node => &self.schema.node.id,
        }
    }

    fn projection(&self) -> String {
        match self.key {
            GroupingKey::Entity => {
                let e = &self.schema.entity;
                format!(
                    "{KEY}.{} AS entity_id, {KEY}.{} AS last_name, {KEY}.{} AS first_name",
                    e.id, e.last_name, e.first_name
                )
            }
            GroupingKey::Node => {
                let n = &self.schema.node;
                format!("{KEY}.{} AS node_id, {KEY}.{} AS label", n.id, n.label)
            }
        }
    }

    fn order_by(&self) -> &'static str {
        match self.key {
            GroupingKey::Entity => "ORDER BY last_name, first_name, entity_id",
            GroupingKey::Node => "ORDER BY label, node_id",
        }
    }

    // ------------------------------------------------------------------------
    // Clauses
    // ------------------------------------------------------------------------

    /// Conditions a classification row under `alias` must meet.
    fn row_conditions(&mut self, alias: &str, rows: &RowFilter) -> Vec<String> {
        let schema = self.schema;
        let c = &schema.classification;
        let mut out = Vec::new();
        if let Some(role) = rows.facets.role.as_exact() {
            let p = self.named("role", SqlValue::text(role));
            out.push(format!("{alias}.{} = {p}", c.role));
        }
        if let Some(temporal) = rows.facets.temporal.as_exact() {
            let p = self.named("temporal", SqlValue::text(temporal));
            out.push(format!("{alias}.{} = {p}", c.temporal));
        }
        match &rows.facets.origin {
            OriginFilter::Any => {}
            OriginFilter::Only(OriginMode::Automatic) => {
                let p = self.named("automatic_flag", SqlValue::text(OriginMode::AUTOMATIC_FLAG));
                out.push(format!("{alias}.{} = {p}", c.origin_flag));
            }
            OriginFilter::Only(OriginMode::Manual) => {
                let p = self.named("automatic_flag", SqlValue::text(OriginMode::AUTOMATIC_FLAG));
                out.push(format!(
                    "({alias}.{flag} IS NULL OR {alias}.{flag} <> {p})",
                    flag = c.origin_flag
                ));
            }
            OriginFilter::Unmatched(_) => out.push("1 = 0".to_string()),
        }
        if let Some(scope) = rows.scope {
            let p = self.named("scope_id", SqlValue::Integer(scope));
            out.push(format!("{alias}.{} = {p}", c.scope));
        }
        if let Some(entity) = rows.entity {
            let p = self.named("entity_id", SqlValue::Integer(entity));
            out.push(format!("{alias}.{} = {p}", c.entity));
        }
        out
    }

    fn candidates(&mut self, pred: &MembershipPredicate) -> Option<String> {
        let ids = pred.candidates.as_ref()?;
        let list = self.list("cand", ids);
        Some(format!("{KEY}.{} IN ({list})", self.key_id()))
    }

    /// `EXISTS (...)` over the key's qualifying rows, optionally with
    /// evidence in `set` (bound under `prefix`).
    fn exists(&mut self, rows: &RowFilter, set: Option<(&EvidenceSet, &'static str)>) -> String {
        let alias = self.alias();
        let link = self.column(self.key.link());
        let mut conds = vec![format!("{alias}.{link} = {KEY}.{}", self.key_id())];
        conds.extend(self.row_conditions(&alias, rows));
        if let Some((set, prefix)) = set {
            let list = self.list(prefix, set.members());
            conds.push(format!("{alias}.{} IN ({list})", self.column(set.dimension())));
        }
        format!(
            "EXISTS (SELECT 1 FROM {} {alias} WHERE {})",
            self.schema.classification.table,
            conds.join(" AND ")
        )
    }

    fn from_joined(&self) -> String {
        format!(
            "FROM {table} {KEY} JOIN {cls} {ROW} ON {ROW}.{link} = {KEY}.{id}",
            table = self.key_table(),
            cls = self.schema.classification.table,
            link = self.column(self.key.link()),
            id = self.key_id(),
        )
    }

    // ------------------------------------------------------------------------
    // Layouts
    // ------------------------------------------------------------------------

    fn joined(
        &mut self,
        pred: &MembershipPredicate,
        required: Option<&EvidenceSet>,
        exclusion: Option<(&EvidenceSet, ExclusionReach)>,
    ) -> String {
        let mut select = format!("SELECT DISTINCT {}", self.projection());
        if self.key == GroupingKey::Entity {
            let c = &self.schema.classification;
            select.push_str(&format!(
                ", {ROW}.{} AS scope_id, {ROW}.{} AS scope_label",
                c.scope, c.scope_label
            ));
        }

        let mut conds = self.row_conditions(ROW, &pred.rows);
        conds.extend(self.candidates(pred));
        if let Some(set) = required {
            let list = self.list("req", set.members());
            conds.push(format!("{ROW}.{} IN ({list})", self.column(set.dimension())));
        }
        match exclusion {
            None => {}
            Some((set, ExclusionReach::Row)) => {
                let list = self.list("exc", set.members());
                conds.push(format!("{ROW}.{} NOT IN ({list})", self.column(set.dimension())));
            }
            Some((set, ExclusionReach::Key)) => {
                conds.push(format!("NOT {}", self.exists(&pred.rows, Some((set, "exc")))));
            }
        }

        assemble(&[select, self.from_joined(), where_clause(&conds), self.order_by().into()])
    }

    fn grouped(
        &mut self,
        pred: &MembershipPredicate,
        required: &[EvidenceSet],
        excluded: Option<&EvidenceSet>,
    ) -> String {
        let dim = self.key.evidence();
        let union: BTreeSet<i64> = required.iter().flat_map(|s| s.members().iter().copied()).collect();

        let mut conds = self.row_conditions(ROW, &pred.rows);
        conds.extend(self.candidates(pred));
        let list = self.list("req", &union);
        conds.push(format!("{ROW}.{} IN ({list})", self.column(dim)));
        if let Some(set) = excluded {
            conds.push(format!("NOT {}", self.exists(&pred.rows, Some((set, "exc")))));
        }

        let schema = self.schema;
        let n = &schema.node;
        let count = self.named("required_count", SqlValue::Integer(union.len() as i64));
        assemble(&[
            format!("SELECT {}", self.projection()),
            self.from_joined(),
            where_clause(&conds),
            format!("GROUP BY {KEY}.{}, {KEY}.{}", n.id, n.label),
            format!("HAVING COUNT(DISTINCT {ROW}.{}) = {count}", self.column(dim)),
            self.order_by().into(),
        ])
    }

    fn keyed(&mut self, pred: &MembershipPredicate, tests: Vec<String>) -> String {
        let mut select = format!("SELECT {}", self.projection());
        if self.key == GroupingKey::Entity {
            let scope = match pred.rows.scope {
                Some(scope) => self.named("scope_id", SqlValue::Integer(scope)),
                None => "NULL".to_string(),
            };
            select.push_str(&format!(", {scope} AS scope_id, NULL AS scope_label"));
        }

        let mut conds: Vec<String> = self.candidates(pred).into_iter().collect();
        conds.extend(tests);

        assemble(&[
            select,
            format!("FROM {} {KEY}", self.key_table()),
            where_clause(&conds),
            self.order_by().into(),
        ])
    }
}

fn where_clause(conds: &[String]) -> String {
    if conds.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conds.join(" AND "))
    }
}

fn assemble(parts: &[String]) -> String {
    parts
        .iter()
        .filter(|p| !p.is_empty())
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join("\n")
}
