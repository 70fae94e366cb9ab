use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Path, State},
    http::{HeaderMap, Method, StatusCode},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use subtle::ConstantTimeEq;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use cadence_shared::{AppendReceipt, LogRecord, OutgoingMessage};

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::record_log::RecordLog;

/// Room for the JSON envelope around a message body.
const ENVELOPE_BYTES: usize = 4096;
/// JSON escaping can grow a body up to six times.
const ESCAPE_FACTOR: usize = 6;
const MAX_COLLECTION_NAME: usize = 64;

#[derive(Clone)]
pub struct AppState {
    pub log: Arc<RecordLog>,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    let request_limit = state
        .config
        .max_body_bytes
        .saturating_mul(ESCAPE_FACTOR)
        .saturating_add(ENVELOPE_BYTES);

    Router::new()
        .route("/health", get(health_check))
        .route(
            "/v1/collections/:collection/records",
            get(list_records).post(append_record),
        )
        .layer(DefaultBodyLimit::max(request_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn append_record(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(collection): Path<String>,
    Json(mut message): Json<OutgoingMessage>,
) -> Result<(StatusCode, Json<AppendReceipt>), ServerError> {
    verify_token(&headers, &state.config)?;
    validate_collection(&collection)?;

    let body = message.body.trim();
    if body.is_empty() {
        return Err(ServerError::EmptyBody);
    }
    if body.len() > state.config.max_body_bytes {
        return Err(ServerError::BodyTooLarge {
            size: body.len(),
            max: state.config.max_body_bytes,
        });
    }
    message.body = body.to_string();

    let appended = state.log.append(&collection, message).await;
    let record = appended.record;

    let status = if appended.created {
        info!(collection = %collection, id = %record.id, author = %record.message.author_id, "Record appended");
        StatusCode::CREATED
    } else {
        debug!(collection = %collection, id = %record.id, "Append replayed");
        StatusCode::OK
    };

    Ok((
        status,
        Json(AppendReceipt {
            id: record.id,
            created_at: record.created_at,
        }),
    ))
}

async fn list_records(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(collection): Path<String>,
) -> Result<Json<Vec<LogRecord>>, ServerError> {
    verify_token(&headers, &state.config)?;
    validate_collection(&collection)?;
    Ok(Json(state.log.list(&collection).await))
}

fn verify_token(headers: &HeaderMap, config: &ServerConfig) -> Result<(), ServerError> {
    let Some(ref expected) = config.api_token else {
        return Ok(());
    };

    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let token = auth.strip_prefix("Bearer ").unwrap_or(auth);

    // Constant-time comparison.
    let token_bytes = token.as_bytes();
    let expected_bytes = expected.as_bytes();
    if token_bytes.len() != expected_bytes.len()
        || token_bytes.ct_eq(expected_bytes).unwrap_u8() != 1
    {
        return Err(ServerError::Unauthorized);
    }

    Ok(())
}

fn validate_collection(name: &str) -> Result<(), ServerError> {
    let valid = !name.is_empty()
        && name.len() <= MAX_COLLECTION_NAME
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(ServerError::InvalidCollection(name.to_string()))
    }
}

pub async fn serve(state: AppState, addr: SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use futures::StreamExt;
    use serde_json::Value;
    use tower::ServiceExt;

    use cadence_net::{HttpLog, RemoteError, RemoteLog};
    use cadence_shared::{Author, PendingEntry};

    const RECORDS: &str = "/v1/collections/chat_messages/records";

    fn state(token: Option<&str>) -> AppState {
        AppState {
            log: Arc::new(RecordLog::new()),
            config: Arc::new(ServerConfig {
                api_token: token.map(String::from),
                ..ServerConfig::default()
            }),
        }
    }

    fn outgoing(body: &str) -> OutgoingMessage {
        let author = Author {
            id: "u1".into(),
            name: "Ada".into(),
            avatar: "a.png".into(),
        };
        PendingEntry::compose(&author, body.into()).to_outgoing(&author.id)
    }

    fn post(uri: &str, message: &OutgoingMessage, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        builder
            .body(Body::from(serde_json::to_vec(message).unwrap()))
            .unwrap()
    }

    fn get_req(uri: &str, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn call(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let res = app.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn test_health() {
        let app = build_router(state(Some("secret")));
        let (status, json) = call(&app, get_req("/health", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn test_append_then_list() {
        let app = build_router(state(None));
        let msg = outgoing("  hello  ");

        let (status, receipt) = call(&app, post(RECORDS, &msg, None)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert!(receipt["id"].is_string());
        assert!(receipt["createdAt"].is_string());

        let (status, list) = call(&app, get_req(RECORDS, None)).await;
        assert_eq!(status, StatusCode::OK);
        let records = list.as_array().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["id"], receipt["id"]);
        assert_eq!(records[0]["body"], "hello");
        assert_eq!(records[0]["clientId"], msg.client_id.unwrap().0);
    }

    #[tokio::test]
    async fn test_replayed_append_returns_existing_record() {
        let app = build_router(state(None));
        let msg = outgoing("once");

        let (first, a) = call(&app, post(RECORDS, &msg, None)).await;
        let (second, b) = call(&app, post(RECORDS, &msg, None)).await;
        assert_eq!(first, StatusCode::CREATED);
        assert_eq!(second, StatusCode::OK);
        assert_eq!(a["id"], b["id"]);

        let (_, list) = call(&app, get_req(RECORDS, None)).await;
        assert_eq!(list.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_bodies_are_unprocessable() {
        let app = build_router(state(None));

        let (status, json) = call(&app, post(RECORDS, &outgoing("   "), None)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(json["error"].is_string());

        let huge = "a".repeat(16 * 1024 + 1);
        let (status, _) = call(&app, post(RECORDS, &outgoing(&huge), None)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_token_is_required_when_configured() {
        let app = build_router(state(Some("secret")));
        let msg = outgoing("hi");

        let (status, _) = call(&app, post(RECORDS, &msg, None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, _) = call(&app, post(RECORDS, &msg, Some("guess"))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, _) = call(&app, get_req(RECORDS, None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = call(&app, post(RECORDS, &msg, Some("secret"))).await;
        assert_eq!(status, StatusCode::CREATED);
    }

    #[tokio::test]
    async fn test_invalid_collection_name() {
        let app = build_router(state(None));
        let (status, _) = call(&app, get_req("/v1/collections/chat.messages/records", None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_validate_collection() {
        assert!(validate_collection("chat_messages").is_ok());
        assert!(validate_collection("room-2").is_ok());
        assert!(validate_collection("").is_err());
        assert!(validate_collection(&"x".repeat(65)).is_err());
    }

    #[tokio::test]
    async fn test_http_log_against_server() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = build_router(state(Some("secret")));
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        let log = HttpLog::new(
            &format!("http://{addr}"),
            "chat_messages",
            Some("secret".into()),
            Duration::from_secs(5),
            Duration::from_millis(50),
        )
        .unwrap();

        let msg = outgoing("over the wire");
        let id = log.append(&msg).await.unwrap();
        // Retrying the same record is harmless.
        assert_eq!(log.append(&msg).await.unwrap(), id);

        let mut stream = log.subscribe();
        let snapshot = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id, id.0);
        assert_eq!(snapshot[0].client_id, msg.client_id);
        assert!(!snapshot[0].pending);
        stream.unsubscribe();

        let result = log.append(&outgoing(" ")).await;
        assert!(matches!(result, Err(RemoteError::Rejected(_))));
    }

    #[tokio::test]
    async fn test_subscription_survives_server_outage() {
        // Reserve a port, then leave it closed until the server comes up.
        let addr = {
            let reserved = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            reserved.local_addr().unwrap()
        };

        let log = HttpLog::new(
            &format!("http://{addr}"),
            "chat_messages",
            None,
            Duration::from_secs(1),
            Duration::from_millis(20),
        )
        .unwrap();
        let mut stream = log.subscribe();

        let state = state(None);
        state.log.append("chat_messages", outgoing("before the outage")).await;
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
            let _ = axum::serve(listener, build_router(state)).await;
        });

        let snapshot = tokio::time::timeout(Duration::from_secs(10), stream.next())
            .await
            .expect("subscription never recovered")
            .expect("subscription ended during the outage")
            .expect("transient failures must not surface");
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].body, "before the outage");
        stream.unsubscribe();
    }
}
