//! Session gate for the HTTP surface.
//!
//! Credentials are exchanged for an opaque bearer token; every route except
//! health and login requires a live token. The static gate checks configured
//! credentials and keeps sessions in memory.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionToken {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("invalid credentials")]
    InvalidCredentials,
}

/// Longest accepted session lifetime (one year).
pub const MAX_SESSION_TTL_MINUTES: i64 = 366 * 24 * 60;

pub trait SessionGate: Send + Sync {
    /// Return the caller's live session, or open a new one.
    fn find_or_create_session(&self, credentials: &Credentials) -> Result<SessionToken, SessionError>;

    /// Username behind a live token.
    fn authenticate(&self, token: &str) -> Option<String>;
}

#[derive(Debug, Clone)]
struct Session {
    username: String,
    expires_at: DateTime<Utc>,
}

pub struct StaticSessionGate {
    users: BTreeMap<String, String>,
    ttl: Duration,
    sessions: Mutex<HashMap<String, Session>>,
}

impl StaticSessionGate {
    /// `ttl_minutes` is clamped to `1..=MAX_SESSION_TTL_MINUTES`.
    pub fn new(users: BTreeMap<String, String>, ttl_minutes: i64) -> Self {
        Self {
            users,
            ttl: Duration::minutes(ttl_minutes.clamp(1, MAX_SESSION_TTL_MINUTES)),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn find_or_create_session_at(
        &self,
        credentials: &Credentials,
        now: DateTime<Utc>,
    ) -> Result<SessionToken, SessionError> {
        match self.users.get(&credentials.username) {
            Some(expected) if *expected == credentials.password => {}
            _ => {
                tracing::warn!(user = %credentials.username, "login rejected");
                return Err(SessionError::InvalidCredentials);
            }
        }

        let mut sessions = self.sessions.lock();
        sessions.retain(|_, s| s.expires_at > now);

        if let Some((token, session)) = sessions
            .iter()
            .find(|(_, s)| s.username == credentials.username)
        {
            return Ok(SessionToken {
                access_token: token.clone(),
                expires_at: session.expires_at,
            });
        }

        let token = Uuid::new_v4().to_string();
        let expires_at = now.checked_add_signed(self.ttl).unwrap_or(DateTime::<Utc>::MAX_UTC);
        sessions.insert(
            token.clone(),
            Session {
                username: credentials.username.clone(),
                expires_at,
            },
        );
        tracing::info!(user = %credentials.username, %expires_at, "session opened");
        Ok(SessionToken {
            access_token: token,
            expires_at,
        })
    }

    pub fn authenticate_at(&self, token: &str, now: DateTime<Utc>) -> Option<String> {
        let sessions = self.sessions.lock();
        sessions
            .get(token)
            .filter(|s| s.expires_at > now)
            .map(|s| s.username.clone())
    }
}

impl SessionGate for StaticSessionGate {
    fn find_or_create_session(&self, credentials: &Credentials) -> Result<SessionToken, SessionError> {
        self.find_or_create_session_at(credentials, Utc::now())
    }

    fn authenticate(&self, token: &str) -> Option<String> {
        self.authenticate_at(token, Utc::now())
    }
}
