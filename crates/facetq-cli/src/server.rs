//! facetq HTTP server.
//!
//! A thin JSON surface over [`QueryEngine`]:
//!
//! ```text
//! GET    /api/health            status + time (no auth)
//! POST   /api/login             {username, password} -> {access_token}
//! GET    /api/queries           catalog listing
//! POST   /api/queries/{id}      execute a catalog query
//! POST   /api/people/search     classification rows under themes
//! POST   /api/positions         insert a manual classification
//! DELETE /api/positions         delete a manual classification
//! GET    /api/themes/tree       depth-first taxonomy listing
//! POST   /api/admin/reload      reload the taxonomy snapshot
//! ```
//!
//! Everything but health and login requires `Authorization: Bearer <token>`.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{AUTHORIZATION, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;

use facetq_core::{ClassificationKey, EngineError, NewClassification, QueryEngine};

use crate::session::{Credentials, SessionGate};

const QUERIES_PREFIX: &str = "/api/queries/";
const INTERNAL_ERROR: &str = "internal error";

pub struct ServerState {
    pub engine: QueryEngine,
    pub sessions: Arc<dyn SessionGate>,
}

pub async fn serve(listen: std::net::SocketAddr, state: Arc<ServerState>) -> Result<()> {
    let listener = TcpListener::bind(listen)
        .await
        .map_err(|e| anyhow!("serve: failed to bind {listen}: {e}"))?;
    let bound = listener
        .local_addr()
        .map_err(|e| anyhow!("serve: failed to read bound addr: {e}"))?;
    tracing::info!(addr = %bound, "listening");

    loop {
        let (stream, peer) = listener
            .accept()
            .await
            .map_err(|e| anyhow!("serve: accept failed: {e}"))?;
        let io = TokioIo::new(stream);
        let state = state.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req| handle_request(req, state.clone()));
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                tracing::warn!(peer = %peer, error = %e, "connection error");
            }
        });
    }
}

async fn handle_request(
    req: Request<Incoming>,
    state: Arc<ServerState>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let auth = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body = req.into_body().collect().await?.to_bytes();

    let resp = route(&state, &method, &path, auth.as_deref(), &body).await;
    tracing::debug!(%method, %path, status = resp.status().as_u16(), "request");
    Ok(resp)
}

/// Dispatch one request. Split from the hyper plumbing so routes can be
/// exercised without a socket.
pub async fn route(
    state: &ServerState,
    method: &Method,
    path: &str,
    auth: Option<&str>,
    body: &[u8],
) -> Response<Full<Bytes>> {
    match (method.clone(), path) {
        (Method::GET, "/api/health") => json_response(
            StatusCode::OK,
            &json!({ "status": "ok", "time": chrono::Utc::now().to_rfc3339() }),
        ),
        (Method::POST, "/api/login") => handle_login(state, body),
        _ => {
            if let Err(resp) = require_session(auth, state) {
                return resp;
            }
            match (method.clone(), path) {
                (Method::GET, "/api/queries") => json_response(StatusCode::OK, &state.engine.shapes()),
                (Method::POST, p) if p.starts_with(QUERIES_PREFIX) => {
                    let shape = &p[QUERIES_PREFIX.len()..];
                    handle_query(state, shape, body).await
                }
                (Method::POST, "/api/people/search") => handle_search(state, body).await,
                (Method::POST, "/api/positions") => handle_insert(state, body).await,
                (Method::DELETE, "/api/positions") => handle_delete(state, body).await,
                (Method::GET, "/api/themes/tree") => json_response(StatusCode::OK, &state.engine.tree()),
                (Method::POST, "/api/admin/reload") => match state.engine.reload_taxonomy().await {
                    Ok(nodes) => json_response(StatusCode::OK, &json!({ "nodes": nodes })),
                    Err(e) => engine_error(&e),
                },
                _ => json_error(StatusCode::NOT_FOUND, "not found"),
            }
        }
    }
}

fn handle_login(state: &ServerState, body: &[u8]) -> Response<Full<Bytes>> {
    let credentials: Credentials = match serde_json::from_slice(body) {
        Ok(c) => c,
        Err(e) => return json_error(StatusCode::BAD_REQUEST, &format!("invalid login body: {e}")),
    };
    match state.sessions.find_or_create_session(&credentials) {
        Ok(token) => json_response(StatusCode::OK, &token),
        Err(e) => json_error(StatusCode::UNAUTHORIZED, &e.to_string()),
    }
}

async fn handle_query(state: &ServerState, shape: &str, body: &[u8]) -> Response<Full<Bytes>> {
    let payload = match parse_body(body) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match state.engine.execute(shape, &payload).await {
        Ok(rows) => json_response(
            StatusCode::OK,
            &json!({ "shape": shape, "count": rows.len(), "rows": rows }),
        ),
        Err(e) => engine_error(&e),
    }
}

async fn handle_search(state: &ServerState, body: &[u8]) -> Response<Full<Bytes>> {
    let payload = match parse_body(body) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match state.engine.search_classifications(&payload).await {
        Ok(rows) => json_response(StatusCode::OK, &rows),
        Err(e) => engine_error(&e),
    }
}

async fn handle_insert(state: &ServerState, body: &[u8]) -> Response<Full<Bytes>> {
    let payload = match parse_body(body) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let new = match NewClassification::from_payload(&payload) {
        Ok(n) => n,
        Err(e) => return engine_error(&EngineError::from(e)),
    };
    match state.engine.insert_classification(&new).await {
        Ok(inserted) => json_response(StatusCode::CREATED, &json!({ "inserted": inserted })),
        Err(e) => engine_error(&e),
    }
}

async fn handle_delete(state: &ServerState, body: &[u8]) -> Response<Full<Bytes>> {
    let payload = match parse_body(body) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let key = match ClassificationKey::from_payload(&payload) {
        Ok(k) => k,
        Err(e) => return engine_error(&EngineError::from(e)),
    };
    match state.engine.delete_classification(&key).await {
        Ok(deleted) => json_response(StatusCode::OK, &json!({ "deleted": deleted })),
        Err(e) => engine_error(&e),
    }
}

/// An empty body is an empty object.
fn parse_body(body: &[u8]) -> Result<Value, Response<Full<Bytes>>> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(json!({}));
    }
    serde_json::from_slice(body)
        .map_err(|e| json_error(StatusCode::BAD_REQUEST, &format!("invalid JSON body: {e}")))
}

fn require_session(auth: Option<&str>, state: &ServerState) -> Result<String, Response<Full<Bytes>>> {
    let Some(header) = auth else {
        return Err(json_error(
            StatusCode::UNAUTHORIZED,
            "missing Authorization: Bearer <token>",
        ));
    };
    let token = header
        .strip_prefix("Bearer ")
        .or_else(|| header.strip_prefix("bearer "))
        .unwrap_or("");
    state
        .sessions
        .authenticate(token)
        .ok_or_else(|| json_error(StatusCode::UNAUTHORIZED, "invalid or expired token"))
}

/// Client errors carry their message; server-side failures are logged and
/// answered with a fixed one.
fn engine_error(err: &EngineError) -> Response<Full<Bytes>> {
    let (status, message) = match err {
        EngineError::Validation(_) => (StatusCode::BAD_REQUEST, err.to_string()),
        EngineError::NotFound(_) => (StatusCode::NOT_FOUND, err.to_string()),
        EngineError::Store(_) | EngineError::Taxonomy(_) | EngineError::Config(_) => {
            tracing::warn!(error = %err, kind = err.kind(), "request failed");
            (StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR.to_string())
        }
    };
    json_response(status, &json!({ "error": message, "kind": err.kind() }))
}

fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Response<Full<Bytes>> {
    let body = serde_json::to_vec(value).unwrap_or_else(|_| b"{\"error\":\"serialize\"}".to_vec());
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(body)))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::from_static(b"{\"error\":\"internal\"}"))))
}

fn json_error(status: StatusCode, msg: &str) -> Response<Full<Bytes>> {
    json_response(status, &json!({ "error": msg }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::StaticSessionGate;
    use facetq_core::eval::{ClassificationRecord, EntityRecord, FactSnapshot};
    use facetq_core::{SchemaNames, Statement, Store, TaxonomyNode};
    use facetq_store_sqlite::SqliteStore;
    use std::collections::BTreeMap;

    async fn state() -> ServerState {
        let schema = SchemaNames::default();
        let store = SqliteStore::open_in_memory().unwrap();
        store.bootstrap(&schema).unwrap();
        let snapshot = FactSnapshot {
            nodes: vec![
                TaxonomyNode::new(1, "Sciences", None),
                TaxonomyNode::new(2, "Physics", Some(1)),
            ],
            entities: vec![EntityRecord {
                id: 10,
                last_name: "Curie".into(),
                first_name: "Marie".into(),
            }],
            classifications: vec![ClassificationRecord {
                entity_id: 10,
                node_id: 2,
                role: Some("Expert".into()),
                temporal_status: Some("Présent".into()),
                origin_flag: Some("0".into()),
                ..Default::default()
            }],
        };
        store.load_fixture(&schema, &snapshot).unwrap();
        let engine = QueryEngine::open(Arc::new(store), schema).await.unwrap();
        let users = BTreeMap::from([("ada".to_string(), "lovelace".to_string())]);
        ServerState {
            engine,
            sessions: Arc::new(StaticSessionGate::new(users, 60)),
        }
    }

    async fn body_json(resp: Response<Full<Bytes>>) -> Value {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn login(state: &ServerState) -> String {
        let resp = route(
            state,
            &Method::POST,
            "/api/login",
            None,
            br#"{"username": "ada", "password": "lovelace"}"#,
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let v = body_json(resp).await;
        format!("Bearer {}", v["access_token"].as_str().unwrap())
    }

    #[tokio::test]
    async fn health_needs_no_token() {
        let state = state().await;
        let resp = route(&state, &Method::GET, "/api/health", None, b"").await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["status"], "ok");
    }

    #[tokio::test]
    async fn queries_require_a_session() {
        let state = state().await;
        let resp = route(&state, &Method::GET, "/api/queries", None, b"").await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let resp = route(&state, &Method::GET, "/api/queries", Some("Bearer nope"), b"").await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let bad = route(
            &state,
            &Method::POST,
            "/api/login",
            None,
            br#"{"username": "ada", "password": "x"}"#,
        )
        .await;
        assert_eq!(bad.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn catalog_and_execution() {
        let state = state().await;
        let auth = login(&state).await;

        let resp = route(&state, &Method::GET, "/api/queries", Some(&auth), b"").await;
        let catalog = body_json(resp).await;
        assert_eq!(catalog.as_array().map(Vec::len), Some(11));

        let resp = route(
            &state,
            &Method::POST,
            "/api/queries/people_by_themes",
            Some(&auth),
            br#"{"theme_ids": [1]}"#,
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let v = body_json(resp).await;
        assert_eq!(v["count"], 1);
        assert_eq!(v["rows"][0]["last_name"], "Curie");
    }

    #[tokio::test]
    async fn error_statuses() {
        let state = state().await;
        let auth = login(&state).await;

        let resp = route(&state, &Method::POST, "/api/queries/nope", Some(&auth), b"").await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = route(
            &state,
            &Method::POST,
            "/api/queries/themes_of_person",
            Some(&auth),
            b"{}",
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(resp).await["kind"], "validation");

        let resp = route(
            &state,
            &Method::POST,
            "/api/queries/people_by_themes",
            Some(&auth),
            b"{not json",
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn positions_round_trip() {
        let state = state().await;
        let auth = login(&state).await;

        let resp = route(
            &state,
            &Method::DELETE,
            "/api/positions",
            Some(&auth),
            r#"{"idpers": 10, "idtheme": 2, "libcontr": "Expert", "libtemp": "Présent"}"#.as_bytes(),
        )
        .await;
        assert_eq!(body_json(resp).await["deleted"], 0);

        let resp = route(
            &state,
            &Method::POST,
            "/api/positions",
            Some(&auth),
            r#"{"idpers": 10, "idtheme": 1, "libcontr": "Utilisateur", "libtemp": "Passé"}"#.as_bytes(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::CREATED);

        let resp = route(
            &state,
            &Method::DELETE,
            "/api/positions",
            Some(&auth),
            r#"{"idpers": 10, "idtheme": 1, "libcontr": "Utilisateur", "libtemp": "Passé"}"#.as_bytes(),
        )
        .await;
        assert_eq!(body_json(resp).await["deleted"], 1);
    }

    #[tokio::test]
    async fn people_search() {
        let state = state().await;
        let resp = route(&state, &Method::POST, "/api/people/search", None, br#"{"theme_ids": [1]}"#).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let auth = login(&state).await;
        let resp = route(
            &state,
            &Method::POST,
            "/api/people/search",
            Some(&auth),
            r#"{"theme_ids": [1], "role": "Expert", "temporalite": "Présent", "mode": "AUTO"}"#.as_bytes(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let rows = body_json(resp).await;
        assert_eq!(rows.as_array().map(Vec::len), Some(1));
        assert_eq!(rows[0]["theme"], "Physics");
        assert_eq!(rows[0]["role"], "Expert");

        let resp = route(
            &state,
            &Method::POST,
            "/api/people/search",
            Some(&auth),
            r#"{"theme_ids": [1], "temporalite": "Passé"}"#.as_bytes(),
        )
        .await;
        assert_eq!(body_json(resp).await, json!([]));

        let resp = route(&state, &Method::POST, "/api/people/search", Some(&auth), b"{}").await;
        assert_eq!(body_json(resp).await, json!([]));

        let resp = route(
            &state,
            &Method::POST,
            "/api/people/search",
            Some(&auth),
            br#"{"theme_ids": ["x"]}"#,
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn store_failures_hide_details() {
        let state = state().await;
        let auth = login(&state).await;
        state
            .engine
            .store()
            .execute(&Statement::new("DROP TABLE classification"))
            .await
            .unwrap();

        let resp = route(
            &state,
            &Method::POST,
            "/api/queries/people_by_themes",
            Some(&auth),
            br#"{"theme_ids": [1]}"#,
        )
        .await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let v = body_json(resp).await;
        assert_eq!(v["kind"], "store");
        assert_eq!(v["error"], INTERNAL_ERROR);
    }

    #[tokio::test]
    async fn tree_and_reload() {
        let state = state().await;
        let auth = login(&state).await;

        let resp = route(&state, &Method::GET, "/api/themes/tree", Some(&auth), b"").await;
        let tree = body_json(resp).await;
        assert_eq!(tree[0]["label"], "Sciences");
        assert_eq!(tree[1]["lvl"], 2);

        let resp = route(&state, &Method::POST, "/api/admin/reload", Some(&auth), b"").await;
        assert_eq!(body_json(resp).await["nodes"], 2);
    }
}
