//! Store collaborator contract.
//!
//! The engine hands the store a [`Statement`] whose text only contains
//! `:name` placeholders; every request value travels in `params`.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;

use crate::error::StoreError;

/// One result record, keyed by lower-cased column name.
pub type Row = serde_json::Map<String, Value>;

/// A value bound to a named placeholder.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Text(String),
    /// A whole identifier set under one placeholder. Stores expose it to
    /// statements as a table of `value`s (see [`SqlValue::json_array`]).
    IntList(Vec<i64>),
}

impl SqlValue {
    pub fn text(s: impl Into<String>) -> Self {
        SqlValue::Text(s.into())
    }

    pub fn opt_text(s: Option<impl Into<String>>) -> Self {
        s.map_or(SqlValue::Null, |s| SqlValue::Text(s.into()))
    }

    pub fn opt_int(v: Option<i64>) -> Self {
        v.map_or(SqlValue::Null, SqlValue::Integer)
    }

    pub fn int_list(ids: impl IntoIterator<Item = i64>) -> Self {
        SqlValue::IntList(ids.into_iter().collect())
    }

    /// JSON array text for an [`SqlValue::IntList`], the form `json_each`
    /// reads.
    pub fn json_array(ids: &[i64]) -> String {
        let items: Vec<String> = ids.iter().map(i64::to_string).collect();
        format!("[{}]", items.join(","))
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Integer(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => write!(f, "NULL"),
            SqlValue::Integer(v) => write!(f, "{v}"),
            SqlValue::Text(s) => write!(f, "{s:?}"),
            SqlValue::IntList(ids) if ids.len() > 8 => {
                write!(f, "{} ({} ids)", SqlValue::json_array(&ids[..8]).replace(']', ",...]"), ids.len())
            }
            SqlValue::IntList(ids) => write!(f, "{}", SqlValue::json_array(ids)),
        }
    }
}

/// Statement text plus its named bindings.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct Statement {
    pub text: String,
    pub params: BTreeMap<String, SqlValue>,
}

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r":([A-Za-z_][A-Za-z0-9_]*)").expect("static placeholder pattern"))
}

impl Statement {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            params: BTreeMap::new(),
        }
    }

    pub fn bind(mut self, name: &str, value: impl Into<SqlValue>) -> Self {
        self.params.insert(name.to_string(), value.into());
        self
    }

    /// Placeholder names referenced by the text.
    pub fn placeholders(&self) -> BTreeSet<String> {
        placeholder_re()
            .captures_iter(&self.text)
            .map(|c| c[1].to_string())
            .collect()
    }

    /// Names of the bindings, for logging without values.
    pub fn param_names(&self) -> Vec<&str> {
        self.params.keys().map(String::as_str).collect()
    }
}

/// Execution capability consumed by the engine.
///
/// Implementations own connection management and transactions. Failures are
/// returned as-is; the engine never retries.
#[async_trait]
pub trait Store: Send + Sync {
    /// Run a statement and return every row.
    async fn run_query(&self, statement: &Statement) -> Result<Vec<Row>, StoreError>;

    /// Run a statement and return the first row, if any.
    async fn run_one(&self, statement: &Statement) -> Result<Option<Row>, StoreError> {
        Ok(self.run_query(statement).await?.into_iter().next())
    }

    /// Run a write statement and return the number of affected rows.
    async fn execute(&self, statement: &Statement) -> Result<u64, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholders_are_collected_once() {
        let st = Statement::new("SELECT 1 FROM t WHERE a = :a AND b IN (:b1, :b2) AND c = :a")
            .bind("a", 1i64)
            .bind("b1", 2i64)
            .bind("b2", "x");
        let names: Vec<_> = st.placeholders().into_iter().collect();
        assert_eq!(names, vec!["a", "b1", "b2"]);
        assert_eq!(st.param_names(), vec!["a", "b1", "b2"]);
    }

    #[test]
    fn sql_value_serializes_plainly() {
        assert_eq!(serde_json::to_string(&SqlValue::Null).unwrap(), "null");
        assert_eq!(serde_json::to_string(&SqlValue::Integer(4)).unwrap(), "4");
        assert_eq!(serde_json::to_string(&SqlValue::text("x")).unwrap(), "\"x\"");
        assert_eq!(serde_json::to_string(&SqlValue::int_list([3, 1])).unwrap(), "[3,1]");
    }

    #[test]
    fn long_lists_display_abbreviated() {
        assert_eq!(SqlValue::int_list([1, 2]).to_string(), "[1,2]");
        assert_eq!(
            SqlValue::int_list(1..=20).to_string(),
            "[1,2,3,4,5,6,7,8,...] (20 ids)"
        );
    }
}
