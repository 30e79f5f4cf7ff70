//! Server and CLI configuration.
//!
//! A JSON file (every field optional) layered under command-line / environment
//! overrides. Schema identifiers are validated on load.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use facetq_core::SchemaNames;

use crate::session::MAX_SESSION_TTL_MINUTES;

pub const DEFAULT_LISTEN: &str = "127.0.0.1:5000";
pub const DEFAULT_SESSION_TTL_MINUTES: i64 = 360;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FacetqConfig {
    pub listen: SocketAddr,
    pub database: PathBuf,
    /// Username to password, for the static session gate.
    pub users: BTreeMap<String, String>,
    pub session_ttl_minutes: i64,
    pub schema: SchemaNames,
}

impl Default for FacetqConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 5000)),
            database: PathBuf::from("facetq.db"),
            users: BTreeMap::new(),
            session_ttl_minutes: DEFAULT_SESSION_TTL_MINUTES,
            schema: SchemaNames::default(),
        }
    }
}

impl FacetqConfig {
    /// Load from `path`, or defaults when no file is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .map_err(|e| anyhow!("failed to read config {}: {e}", path.display()))?;
                Self::from_json(&text)
                    .map_err(|e| anyhow!("invalid config {}: {e}", path.display()))?
            }
            None => Self::default(),
        };
        Ok(config)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.schema.validate()?;
        if !(1..=MAX_SESSION_TTL_MINUTES).contains(&self.session_ttl_minutes) {
            return Err(anyhow!(
                "session_ttl_minutes must be between 1 and {MAX_SESSION_TTL_MINUTES} (got {})",
                self.session_ttl_minutes
            ));
        }
        Ok(())
    }

    pub fn with_database(mut self, database: Option<PathBuf>) -> Self {
        if let Some(db) = database {
            self.database = db;
        }
        self
    }

    pub fn with_listen(mut self, listen: Option<SocketAddr>) -> Self {
        if let Some(addr) = listen {
            self.listen = addr;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = FacetqConfig::default();
        assert_eq!(config.listen.to_string(), DEFAULT_LISTEN);
        assert_eq!(config.session_ttl_minutes, 360);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let config = FacetqConfig::from_json(
            r#"{"users": {"admin": "secret"}, "schema": {"entity": {"table": "personne"}}}"#,
        )
        .unwrap();
        assert_eq!(config.users["admin"], "secret");
        assert_eq!(config.schema.entity.table, "personne");
        assert_eq!(config.schema.entity.id, "id");
        assert_eq!(config.schema.node.table, "taxonomy_node");
        assert_eq!(config.listen.to_string(), DEFAULT_LISTEN);
    }

    #[test]
    fn hostile_identifiers_are_rejected() {
        let err = FacetqConfig::from_json(r#"{"schema": {"node": {"label": "label; DROP TABLE x"}}}"#)
            .unwrap_err();
        assert!(err.to_string().contains("node.label"), "{err}");
    }

    #[test]
    fn session_ttl_is_bounded() {
        for ttl in ["0", "-5", "9223372036854775807", "527041"] {
            let err = FacetqConfig::from_json(&format!(r#"{{"session_ttl_minutes": {ttl}}}"#)).unwrap_err();
            assert!(err.to_string().contains("session_ttl_minutes"), "{err}");
        }
        let config = FacetqConfig::from_json(r#"{"session_ttl_minutes": 527040}"#).unwrap();
        assert_eq!(config.session_ttl_minutes, MAX_SESSION_TTL_MINUTES);
    }

    #[test]
    fn overrides_win() {
        let config = FacetqConfig::default()
            .with_database(Some(PathBuf::from("/tmp/x.db")))
            .with_listen(Some("0.0.0.0:8080".parse().unwrap()));
        assert_eq!(config.database, PathBuf::from("/tmp/x.db"));
        assert_eq!(config.listen.port(), 8080);
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("facetq.json");
        std::fs::write(&path, r#"{"session_ttl_minutes": 5}"#).unwrap();
        let config = FacetqConfig::load(Some(&path)).unwrap();
        assert_eq!(config.session_ttl_minutes, 5);
        assert!(FacetqConfig::load(Some(&dir.path().join("missing.json"))).is_err());
    }
}
