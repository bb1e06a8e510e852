use axum::{
    async_trait,
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        FromRequestParts, Path, Query, State,
    },
    http::{header, request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use connect_protocol::{
    CloseSessionsResponse, CreateSessionRequest, CreateSessionResponse, HealthResponse,
    ListSessionsResponse, MailboxMessage, PublicSessionView, SendSignalRequest,
    SendSignalResponse, SessionCode, SessionStatus, VerifyPasswordRequest,
    VerifyPasswordResponse,
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::debug;

use crate::error::RelayError;
use crate::identity::{Identity, IdentityError};
use crate::registry::NewSession;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(render_metrics))
        .route("/api/session/create", post(create_session))
        .route("/api/session/list", get(list_sessions))
        .route("/api/session/close", post(close_sessions))
        .route("/api/session/verify", post(verify_session_password))
        .route("/api/session/:code", get(get_session))
        .route("/api/signal/send", post(send_signal))
        .route("/api/signal/poll", get(poll_signals))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Caller identity from a verified `Authorization: Bearer` token.
#[derive(Debug, Clone)]
pub struct Authenticated(pub Identity);

#[async_trait]
impl FromRequestParts<AppState> for Authenticated {
    type Rejection = RelayError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = extract_token(&parts.headers).ok_or(IdentityError::MissingToken)?;
        let identity = state.identity.verify(token).await?;
        Ok(Authenticated(identity))
    }
}

fn extract_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|auth| auth.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

fn bad_request(rejection: impl std::fmt::Display) -> RelayError {
    RelayError::Validation(rejection.to_string())
}

pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        backend: state.backend.to_string(),
    })
}

pub async fn render_metrics(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}

pub async fn create_session(
    State(state): State<AppState>,
    Authenticated(identity): Authenticated,
    body: Result<Json<CreateSessionRequest>, JsonRejection>,
) -> Result<Json<CreateSessionResponse>, RelayError> {
    let Json(request) = body.map_err(bad_request)?;
    let session = state
        .registry
        .create(
            &identity.subject,
            NewSession {
                name: request.name,
                require_password: request.require_password,
                password: request.password,
            },
        )
        .await?;
    Ok(Json(CreateSessionResponse {
        success: true,
        session,
    }))
}

pub async fn list_sessions(
    State(state): State<AppState>,
) -> Result<Json<ListSessionsResponse>, RelayError> {
    let sessions = state.registry.list().await?;
    Ok(Json(ListSessionsResponse { sessions }))
}

pub async fn get_session(
    State(state): State<AppState>,
    code: Result<Path<SessionCode>, PathRejection>,
) -> Result<Json<PublicSessionView>, RelayError> {
    let Path(code) = code.map_err(bad_request)?;
    state
        .registry
        .get(&code)
        .await?
        .map(|record| Json(record.public_view()))
        .ok_or_else(|| RelayError::NotFound(format!("session {code}")))
}

pub async fn close_sessions(
    State(state): State<AppState>,
    Authenticated(identity): Authenticated,
) -> Result<Json<CloseSessionsResponse>, RelayError> {
    let closed = state.registry.close(&identity.subject).await?;
    Ok(Json(CloseSessionsResponse {
        success: true,
        closed,
    }))
}

pub async fn verify_session_password(
    State(state): State<AppState>,
    Authenticated(identity): Authenticated,
    body: Result<Json<VerifyPasswordRequest>, JsonRejection>,
) -> Result<Json<VerifyPasswordResponse>, RelayError> {
    let Json(request) = body.map_err(bad_request)?;
    let record = match state.registry.get(&request.code).await? {
        Some(record) if record.status == SessionStatus::Online => record,
        _ => return Ok(Json(VerifyPasswordResponse { valid: false })),
    };
    if record.owner != identity.subject {
        return Err(RelayError::Forbidden(format!(
            "session {} belongs to another owner",
            request.code
        )));
    }
    let valid = state
        .registry
        .verify_password(&request.code, &request.password)
        .await?;
    debug!(code = %request.code, valid, "password verification");
    Ok(Json(VerifyPasswordResponse { valid }))
}

pub async fn send_signal(
    State(state): State<AppState>,
    body: Result<Json<SendSignalRequest>, JsonRejection>,
) -> Result<Json<SendSignalResponse>, RelayError> {
    let Json(request) = body.map_err(bad_request)?;
    state
        .mailbox
        .send(&request.target_code, request.kind, request.payload)
        .await?;
    Ok(Json(SendSignalResponse { success: true }))
}

#[derive(Debug, Deserialize)]
pub struct PollQuery {
    code: SessionCode,
}

pub async fn poll_signals(
    State(state): State<AppState>,
    query: Result<Query<PollQuery>, QueryRejection>,
) -> Result<Json<Vec<MailboxMessage>>, RelayError> {
    let Query(PollQuery { code }) = query.map_err(bad_request)?;
    let messages = state.mailbox.poll(&code).await?;
    Ok(Json(messages))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::Config;
    use crate::identity::tests::{token_for, SECRET};
    use crate::identity::Hs256Verifier;
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use std::time::Duration;
    use tower::util::ServiceExt;

    fn test_app(clock: &ManualClock) -> Router {
        let state = AppState::in_memory(
            &Config::default(),
            Arc::new(clock.clone()),
            Arc::new(Hs256Verifier::new(SECRET, None, None)),
        );
        build_router(state)
    }

    fn request(method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn call(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    async fn create(app: &Router, owner: &str, body: Value) -> Value {
        let token = token_for(owner);
        let (status, value) = call(
            app,
            request(Method::POST, "/api/session/create", Some(&token), Some(body)),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{value}");
        value["session"].clone()
    }

    #[test_timeout::tokio_timeout_test]
    async fn health_reports_backend() {
        let app = test_app(&ManualClock::default());
        let (status, body) = call(&app, request(Method::GET, "/health", None, None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "status": "ok", "backend": "memory" }));
    }

    #[test_timeout::tokio_timeout_test]
    async fn create_requires_bearer_token() {
        let app = test_app(&ManualClock::default());
        let (status, body) = call(
            &app,
            request(Method::POST, "/api/session/create", None, Some(json!({}))),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "unauthorized");

        let (status, _) = call(
            &app,
            request(
                Method::POST,
                "/api/session/create",
                Some("not-a-jwt"),
                Some(json!({})),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[test_timeout::tokio_timeout_test]
    async fn create_then_list_never_leaks_hash() {
        let app = test_app(&ManualClock::default());
        let session = create(
            &app,
            "alice",
            json!({ "name": "desk", "requirePassword": true, "password": "pw" }),
        )
        .await;
        assert_eq!(session["owner"], "alice");
        assert_eq!(session["requiresPassword"], true);
        assert!(session.get("passwordHash").is_none());
        let code = session["code"].as_str().unwrap().to_string();
        assert_eq!(code.len(), 6);

        let (status, body) = call(&app, request(Method::GET, "/api/session/list", None, None)).await;
        assert_eq!(status, StatusCode::OK);
        let rendered = body.to_string();
        assert!(!rendered.contains("argon2"));
        assert_eq!(
            body["sessions"],
            json!([{ "code": code, "name": "desk", "owner": "alice", "status": "online" }])
        );

        let (status, body) = call(
            &app,
            request(Method::GET, &format!("/api/session/{code}"), None, None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "desk");
    }

    #[test_timeout::tokio_timeout_test]
    async fn missing_password_is_bad_request() {
        let app = test_app(&ManualClock::default());
        let token = token_for("alice");
        let (status, body) = call(
            &app,
            request(
                Method::POST,
                "/api/session/create",
                Some(&token),
                Some(json!({ "requirePassword": true })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "bad_request");
    }

    #[test_timeout::tokio_timeout_test]
    async fn unknown_and_malformed_session_lookups() {
        let app = test_app(&ManualClock::default());
        let (status, _) = call(&app, request(Method::GET, "/api/session/123456", None, None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = call(&app, request(Method::GET, "/api/session/12ab", None, None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[test_timeout::tokio_timeout_test]
    async fn verify_is_owner_only() {
        let app = test_app(&ManualClock::default());
        let session = create(
            &app,
            "alice",
            json!({ "requirePassword": true, "password": "pw" }),
        )
        .await;
        let code = session["code"].clone();

        let alice = token_for("alice");
        let (status, body) = call(
            &app,
            request(
                Method::POST,
                "/api/session/verify",
                Some(&alice),
                Some(json!({ "code": code, "password": "pw" })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "valid": true }));

        let (_, body) = call(
            &app,
            request(
                Method::POST,
                "/api/session/verify",
                Some(&alice),
                Some(json!({ "code": code, "password": "nope" })),
            ),
        )
        .await;
        assert_eq!(body, json!({ "valid": false }));

        let mallory = token_for("mallory");
        let (status, body) = call(
            &app,
            request(
                Method::POST,
                "/api/session/verify",
                Some(&mallory),
                Some(json!({ "code": code, "password": "pw" })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "forbidden");
    }

    #[test_timeout::tokio_timeout_test]
    async fn close_marks_only_callers_sessions() {
        let app = test_app(&ManualClock::default());
        let mine = create(&app, "alice", json!({})).await;
        let theirs = create(&app, "bob", json!({})).await;

        let alice = token_for("alice");
        let (status, body) = call(
            &app,
            request(Method::POST, "/api/session/close", Some(&alice), None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "success": true, "closed": 1 }));

        let (_, body) = call(&app, request(Method::GET, "/api/session/list", None, None)).await;
        let sessions = body["sessions"].as_array().unwrap();
        for session in sessions {
            let expected = if session["code"] == mine["code"] {
                "closed"
            } else {
                assert_eq!(session["code"], theirs["code"]);
                "online"
            };
            assert_eq!(session["status"], expected);
        }
    }

    #[test_timeout::tokio_timeout_test]
    async fn signal_round_trip_drains_once() {
        let app = test_app(&ManualClock::default());
        let (status, body) = call(
            &app,
            request(
                Method::POST,
                "/api/signal/send",
                None,
                Some(json!({
                    "targetCode": "111111",
                    "kind": "offer",
                    "payload": { "description": { "type": "offer" }, "callerCode": "222222" }
                })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "success": true }));

        let (status, body) = call(
            &app,
            request(Method::GET, "/api/signal/poll?code=111111", None, None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let messages = body.as_array().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["kind"], "offer");
        assert_eq!(messages[0]["payload"]["callerCode"], "222222");
        assert!(messages[0]["enqueuedAt"].is_u64());

        let (_, body) = call(
            &app,
            request(Method::GET, "/api/signal/poll?code=111111", None, None),
        )
        .await;
        assert_eq!(body, json!([]));
    }

    #[test_timeout::tokio_timeout_test]
    async fn invalid_signals_are_rejected() {
        let app = test_app(&ManualClock::default());
        for body in [
            json!({ "targetCode": "111111", "kind": "offer", "payload": { "description": {} } }),
            json!({ "targetCode": "1111", "kind": "ice", "payload": {} }),
            json!({ "targetCode": "111111", "kind": "bye", "payload": {} }),
        ] {
            let (status, _) = call(
                &app,
                request(Method::POST, "/api/signal/send", None, Some(body)),
            )
            .await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
        }

        let (status, _) = call(&app, request(Method::GET, "/api/signal/poll", None, None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (_, body) = call(
            &app,
            request(Method::GET, "/api/signal/poll?code=111111", None, None),
        )
        .await;
        assert_eq!(body, json!([]));
    }

    #[test_timeout::tokio_timeout_test]
    async fn sessions_disappear_after_ttl() {
        let clock = ManualClock::default();
        let app = test_app(&clock);
        let session = create(&app, "alice", json!({})).await;
        let code = session["code"].as_str().unwrap().to_string();

        clock.advance(Duration::from_secs(24 * 60 * 60));
        let (status, _) = call(
            &app,
            request(Method::GET, &format!("/api/session/{code}"), None, None),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (_, body) = call(&app, request(Method::GET, "/api/session/list", None, None)).await;
        assert_eq!(body, json!({ "sessions": [] }));
    }

    #[test_timeout::tokio_timeout_test]
    async fn metrics_without_recorder_is_not_found() {
        let app = test_app(&ManualClock::default());
        let (status, _) = call(&app, request(Method::GET, "/metrics", None, None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
