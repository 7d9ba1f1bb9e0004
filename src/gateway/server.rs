//! Control API and event channel (axum)
//!
//! The upstream auth layer sets the principal header; every route except
//! `/health` requires it.

use axum::{
    extract::{
        rejection::JsonRejection,
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use super::broadcaster::{SessionEvent, SubscriptionHandle};
use super::protocol::{
    ApiError, ClientMessage, ErrorMessage, ExecuteRequest, ExecuteResponse, ServerMessage,
    SessionsListResponse, StopResponse, PROTOCOL_VERSION,
};
use crate::config::ServerConfig;
use crate::error::Error;
use crate::orchestrator::{Metrics, Orchestrator};
use crate::session::{ExecutionSession, SessionView};

/// Events buffered per event-channel subscription
const SUBSCRIPTION_BUFFER: usize = 256;
/// Frames buffered per connection before the writer catches up
const OUTBOUND_BUFFER: usize = 512;

#[derive(Clone)]
pub struct GatewayState {
    pub orchestrator: Arc<Orchestrator>,
    pub principal_header: String,
}

// ---- Error Handling ----

pub struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        AppError {
            status,
            message: message.into(),
        }
    }

    fn forbidden(err: Error) -> Self {
        match err {
            Error::Unauthorized(message) => Self::new(StatusCode::FORBIDDEN, message),
            other => other.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(ApiError {
            error: self.message,
        });
        (self.status, body).into_response()
    }
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        let status = match &err {
            Error::InvalidInput(_) | Error::Json(_) => StatusCode::BAD_REQUEST,
            Error::SecurityBlocked(_) => StatusCode::FORBIDDEN,
            Error::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            warn!("Request failed: {}", err);
        }
        AppError::new(status, err.to_string())
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::new(StatusCode::BAD_REQUEST, rejection.body_text())
    }
}

fn principal(headers: &HeaderMap, state: &GatewayState) -> Result<String, AppError> {
    headers
        .get(state.principal_header.as_str())
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .ok_or_else(|| AppError::new(StatusCode::UNAUTHORIZED, "Missing principal"))
}

/// The session, if `principal` owns it
async fn owned_session(
    state: &GatewayState,
    principal: &str,
    session_id: &str,
) -> Result<Arc<ExecutionSession>, AppError> {
    let session = state
        .orchestrator
        .registry()
        .get(session_id)
        .await
        .ok_or_else(|| AppError::new(StatusCode::NOT_FOUND, format!("Session {} not found", session_id)))?;
    if session.principal() != principal {
        return Err(AppError::new(
            StatusCode::FORBIDDEN,
            format!("Session {} belongs to another principal", session_id),
        ));
    }
    Ok(session)
}

// ---- Handlers ----

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    protocol: &'static str,
    engine: String,
}

async fn health(State(state): State<GatewayState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        protocol: PROTOCOL_VERSION,
        engine: state.orchestrator.engine_name().to_string(),
    })
}

async fn execute(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    body: Result<Json<ExecuteRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ExecuteResponse>), AppError> {
    let principal = principal(&headers, &state)?;
    let Json(request) = body?;
    let response = state
        .orchestrator
        .execute(&principal, request.bundle, request.options)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(response)))
}

async fn get_session(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<SessionView>, AppError> {
    let principal = principal(&headers, &state)?;
    let session = owned_session(&state, &principal, &id).await?;
    Ok(Json(session.view().await))
}

async fn stop_session(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<StopResponse>, AppError> {
    let principal = principal(&headers, &state)?;
    let response = state
        .orchestrator
        .stop_execution_as(&principal, &id)
        .await
        .map_err(AppError::forbidden)?;
    Ok(Json(response))
}

async fn list_sessions(
    State(state): State<GatewayState>,
    headers: HeaderMap,
) -> Result<Json<SessionsListResponse>, AppError> {
    let principal = principal(&headers, &state)?;
    let sessions = state.orchestrator.list_sessions(&principal).await;
    Ok(Json(SessionsListResponse {
        total: sessions.len(),
        sessions,
    }))
}

async fn metrics(
    State(state): State<GatewayState>,
    headers: HeaderMap,
) -> Result<Json<Metrics>, AppError> {
    principal(&headers, &state)?;
    Ok(Json(state.orchestrator.get_system_metrics().await))
}

// ---- Event channel ----

async fn ws_upgrade(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, AppError> {
    let principal = principal(&headers, &state)?;
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, principal)))
}

fn encode<T: Serialize>(message: &T) -> Option<String> {
    match serde_json::to_string(message) {
        Ok(text) => Some(text),
        Err(e) => {
            warn!("Failed to encode event channel message: {}", e);
            None
        }
    }
}

/// One event channel connection
struct Connection {
    state: GatewayState,
    principal: String,
    outbound: mpsc::Sender<String>,
    subscriptions: HashMap<String, (SubscriptionHandle, JoinHandle<()>)>,
}

impl Connection {
    async fn send<T: Serialize>(&self, message: &T) {
        if let Some(text) = encode(message) {
            let _ = self.outbound.send(text).await;
        }
    }

    async fn handle_text(&mut self, text: &str) {
        let message = match ClientMessage::parse(text) {
            Ok(message) => message,
            Err(error) => {
                self.send(&error).await;
                return;
            }
        };

        let session_id = message.session_id().to_string();
        let result = match message {
            ClientMessage::Subscribe { .. } => self.subscribe(&session_id).await,
            ClientMessage::GetStatus { .. } => self.get_status(&session_id).await,
            ClientMessage::StopExecution { .. } => self.stop(&session_id).await,
            ClientMessage::Unsubscribe { .. } => {
                self.unsubscribe(&session_id);
                self.send(&ServerMessage::Unsubscribed {
                    session_id: session_id.clone(),
                })
                .await;
                Ok(())
            }
        };
        if let Err(e) = result {
            self.send(&ErrorMessage::new(e.message).with_session(session_id))
                .await;
        }
    }

    async fn subscribe(&mut self, session_id: &str) -> Result<(), AppError> {
        let session = owned_session(&self.state, &self.principal, session_id).await?;
        self.unsubscribe(session_id);

        let broadcaster = self.state.orchestrator.broadcaster().clone();
        let status = session.state().await;
        let live = if status.is_terminal() {
            None
        } else {
            Some(broadcaster.subscribe_channel(session_id, SUBSCRIPTION_BUFFER))
        };

        self.send(&ServerMessage::Subscribed {
            session_id: session_id.to_string(),
        })
        .await;
        let tail = session.log_tail(self.state.orchestrator.config().log_tail_lines);
        let replayed = tail.last().map(|line| line.seq).unwrap_or(0);
        for log in tail {
            self.send(&ServerMessage::LogUpdate {
                session_id: session_id.to_string(),
                log,
            })
            .await;
        }

        let Some((handle, mut events)) = live else {
            let view = session.view().await;
            self.send(&ServerMessage::StatusUpdate {
                session_id: session_id.to_string(),
                status: view.status,
                reason: view.reason,
            })
            .await;
            self.send(&ServerMessage::ExecutionStopped {
                session_id: session_id.to_string(),
                status: view.status,
            })
            .await;
            return Ok(());
        };

        let outbound = self.outbound.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if let SessionEvent::Log { log, .. } = &event {
                    if log.seq <= replayed {
                        continue;
                    }
                }
                let closed = matches!(event, SessionEvent::Closed { .. });
                if let Some(text) = encode(&ServerMessage::from(event)) {
                    if outbound.send(text).await.is_err() {
                        break;
                    }
                }
                if closed {
                    break;
                }
            }
        });
        self.subscriptions
            .insert(session_id.to_string(), (handle, forwarder));
        Ok(())
    }

    async fn get_status(&self, session_id: &str) -> Result<(), AppError> {
        let session = owned_session(&self.state, &self.principal, session_id).await?;
        self.send(&ServerMessage::Status {
            session_id: session_id.to_string(),
            session: Box::new(session.view().await),
        })
        .await;
        Ok(())
    }

    async fn stop(&self, session_id: &str) -> Result<(), AppError> {
        let response = self
            .state
            .orchestrator
            .stop_execution_as(&self.principal, session_id)
            .await
            .map_err(AppError::forbidden)?;
        self.send(&ServerMessage::StatusUpdate {
            session_id: response.session_id,
            status: response.status,
            reason: None,
        })
        .await;
        Ok(())
    }

    fn unsubscribe(&mut self, session_id: &str) {
        if let Some((handle, forwarder)) = self.subscriptions.remove(session_id) {
            self.state.orchestrator.broadcaster().unsubscribe(&handle);
            forwarder.abort();
        }
    }

    fn close(mut self) {
        let ids: Vec<String> = self.subscriptions.keys().cloned().collect();
        for id in ids {
            self.unsubscribe(&id);
        }
    }
}

async fn handle_socket(socket: WebSocket, state: GatewayState, principal: String) {
    info!("Event channel connected for {}", principal);
    let (mut sender, mut receiver) = socket.split();
    let (outbound, mut outbound_rx) = mpsc::channel::<String>(OUTBOUND_BUFFER);

    let writer = tokio::spawn(async move {
        while let Some(text) = outbound_rx.recv().await {
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let mut connection = Connection {
        state,
        principal,
        outbound,
        subscriptions: HashMap::new(),
    };

    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => connection.handle_text(text.as_str()).await,
            Ok(Message::Binary(_)) => connection.send(&ErrorMessage::invalid_format()).await,
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!("Event channel read error: {}", e);
                break;
            }
        }
    }

    info!("Event channel closed for {}", connection.principal);
    connection.close();
    writer.abort();
}

// ---- Router ----

pub fn build_router(orchestrator: Arc<Orchestrator>, config: &ServerConfig) -> Router {
    let state = GatewayState {
        orchestrator,
        principal_header: config.principal_header.to_ascii_lowercase(),
    };

    let api = Router::new()
        .route("/execute", post(execute))
        .route("/session/{id}", get(get_session))
        .route("/stop/{id}", post(stop_session))
        .route("/sessions", get(list_sessions))
        .route("/metrics", get(metrics));

    let mut router = Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api);
    if config.websocket {
        router = router.route("/ws", get(ws_upgrade));
    }

    router
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::gateway::protocol::ExecuteOptions;
    use crate::sandbox::{LogStream, MockBehavior, MockEngine, ToolBundle};
    use crate::session::SessionState;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::{json, Value};
    use std::time::Duration;
    use tower::ServiceExt;

    fn app(engine: MockEngine, config: Config) -> (Router, Arc<Orchestrator>) {
        let orchestrator = Arc::new(Orchestrator::new(Arc::new(engine), &config));
        (build_router(orchestrator.clone(), &config.server), orchestrator)
    }

    fn request(method: &str, uri: &str, principal: Option<&str>, body: Option<Value>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(principal) = principal {
            builder = builder.header("x-principal-id", principal);
        }
        match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn send(router: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let response = router.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    fn js_bundle() -> Value {
        json!({"bundle": {"files": [{"filename": "index.js", "content": "console.log(\"ok\")"}]}})
    }

    #[tokio::test]
    async fn test_health() {
        let (router, _) = app(MockEngine::new(), Config::default());
        let (status, body) = send(&router, request("GET", "/health", None, None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["engine"], "mock");
    }

    #[tokio::test]
    async fn test_execute_and_query() {
        let (router, orchestrator) = app(
            MockEngine::with_default(MockBehavior::runs_forever()),
            Config::default(),
        );

        let (status, body) = send(
            &router,
            request("POST", "/api/v1/execute", Some("alice"), Some(js_bundle())),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let session_id = body["sessionId"].as_str().unwrap().to_string();
        assert_eq!(body["status"], "provisioning");

        let uri = format!("/api/v1/session/{}", session_id);
        let (status, body) = send(&router, request("GET", &uri, Some("alice"), None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["sessionId"], session_id.as_str());
        assert_eq!(body["language"], "javascript");

        let (status, _) = send(&router, request("GET", &uri, Some("bob"), None)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = send(&router, request("GET", "/api/v1/sessions", Some("alice"), None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 1);

        let (status, body) = send(&router, request("GET", "/api/v1/metrics", Some("alice"), None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["totalExecutions"], 1);

        orchestrator.cleanup().await;
    }

    #[tokio::test]
    async fn test_missing_principal() {
        let (router, _) = app(MockEngine::new(), Config::default());
        let (status, body) = send(
            &router,
            request("POST", "/api/v1/execute", None, Some(js_bundle())),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_bad_requests() {
        let (router, _) = app(MockEngine::new(), Config::default());

        let (status, _) = send(
            &router,
            request(
                "POST",
                "/api/v1/execute",
                Some("alice"),
                Some(json!({"bundle": {"files": []}})),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            &router,
            request("POST", "/api/v1/execute", Some("alice"), Some(json!({"nope": 1}))),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&router, request("GET", "/api/v1/session/unknown", Some("alice"), None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_blocked_bundle_is_forbidden() {
        let mut config = Config::default();
        config.security.block_on_critical = true;
        let (router, orchestrator) = app(MockEngine::new(), config);

        let (status, body) = send(
            &router,
            request(
                "POST",
                "/api/v1/execute",
                Some("alice"),
                Some(json!({"bundle": {"files": [{"filename": "hack.sh", "content": "eval(\"$X\")"}]}})),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(body["error"].as_str().unwrap().contains("critical"));
        assert!(orchestrator.registry().is_empty().await);
    }

    #[tokio::test]
    async fn test_stop_requires_owner() {
        let (router, orchestrator) = app(
            MockEngine::with_default(MockBehavior::runs_forever()),
            Config::default(),
        );
        let (_, body) = send(
            &router,
            request("POST", "/api/v1/execute", Some("alice"), Some(js_bundle())),
        )
        .await;
        let uri = format!("/api/v1/stop/{}", body["sessionId"].as_str().unwrap());

        let (status, _) = send(&router, request("POST", &uri, Some("bob"), None)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = send(&router, request("POST", &uri, Some("alice"), None)).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["sessionId"].is_string());

        let (status, _) = send(&router, request("POST", "/api/v1/stop/missing", Some("alice"), None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        orchestrator.cleanup().await;
    }

    // ---- Event channel ----

    fn connection(orchestrator: &Arc<Orchestrator>, principal: &str) -> (Connection, mpsc::Receiver<String>) {
        let (outbound, frames) = mpsc::channel(64);
        let connection = Connection {
            state: GatewayState {
                orchestrator: orchestrator.clone(),
                principal_header: "x-principal-id".to_string(),
            },
            principal: principal.to_string(),
            outbound,
            subscriptions: HashMap::new(),
        };
        (connection, frames)
    }

    async fn next_frame(frames: &mut mpsc::Receiver<String>) -> Value {
        let text = tokio::time::timeout(Duration::from_secs(5), frames.recv())
            .await
            .expect("no frame within 5s")
            .expect("outbound channel closed");
        serde_json::from_str(&text).unwrap()
    }

    fn subscribe_frame(session_id: &str) -> String {
        json!({"action": "subscribe", "sessionId": session_id}).to_string()
    }

    /// Start a session and wait until `ready` is in its log tail
    async fn running_session(orchestrator: &Arc<Orchestrator>, ready: &str) -> String {
        let response = orchestrator
            .execute(
                "alice",
                ToolBundle::single("index.js", "console.log(1)"),
                ExecuteOptions::default(),
            )
            .await
            .unwrap();
        let session = orchestrator.registry().get(&response.session_id).await.unwrap();
        for _ in 0..200 {
            if session.log_tail(10).iter().any(|l| l.line == ready) {
                return response.session_id;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("session never logged {:?}", ready);
    }

    #[tokio::test]
    async fn test_event_channel_replays_then_streams() {
        let engine = MockEngine::with_default(MockBehavior {
            logs: vec![(LogStream::Stdout, "ready\n".to_string())],
            ..MockBehavior::runs_forever()
        });
        let mut config = Config::default();
        config.orchestrator.termination_grace = Duration::from_millis(100);
        let (_, orchestrator) = app(engine, config);
        let session_id = running_session(&orchestrator, "ready").await;
        let (mut conn, mut frames) = connection(&orchestrator, "alice");

        conn.handle_text("{not json").await;
        let frame = next_frame(&mut frames).await;
        assert_eq!(frame["error"], "Invalid message format");

        conn.handle_text(&subscribe_frame(&session_id)).await;
        let frame = next_frame(&mut frames).await;
        assert_eq!(frame["event"], "subscribed");
        assert_eq!(frame["sessionId"], session_id.as_str());
        let frame = next_frame(&mut frames).await;
        assert_eq!(frame["event"], "logUpdate");
        assert_eq!(frame["log"]["line"], "ready");
        let replayed = frame["log"]["seq"].as_u64().unwrap();

        orchestrator.stop_execution(&session_id).await.unwrap();
        let mut live = Vec::new();
        loop {
            let frame = next_frame(&mut frames).await;
            let done = frame["event"] == "executionStopped";
            live.push(frame);
            if done {
                break;
            }
        }
        assert!(live
            .iter()
            .filter(|f| f["event"] == "logUpdate")
            .all(|f| f["log"]["seq"].as_u64().unwrap() > replayed));
        assert!(live
            .iter()
            .any(|f| f["event"] == "statusUpdate" && f["status"] == "stopped"));
        assert_eq!(live.last().unwrap()["status"], "stopped");

        conn.close();
    }

    #[tokio::test]
    async fn test_event_channel_terminal_session() {
        let (_, orchestrator) = app(
            MockEngine::with_default(MockBehavior::exits_with(0, &["done"])),
            Config::default(),
        );
        let response = orchestrator
            .execute(
                "alice",
                ToolBundle::single("index.js", "console.log(\"done\")"),
                ExecuteOptions::default(),
            )
            .await
            .unwrap();
        let session = orchestrator.registry().get(&response.session_id).await.unwrap();
        for _ in 0..200 {
            if session.state().await == SessionState::Completed && session.is_cleaned_up() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let (mut conn, mut frames) = connection(&orchestrator, "alice");
        conn.handle_text(&subscribe_frame(&response.session_id)).await;

        let events: Vec<Value> = [
            next_frame(&mut frames).await,
            next_frame(&mut frames).await,
            next_frame(&mut frames).await,
            next_frame(&mut frames).await,
        ]
        .into();
        assert_eq!(events[0]["event"], "subscribed");
        assert_eq!(events[1]["event"], "logUpdate");
        assert_eq!(events[1]["log"]["line"], "done");
        assert_eq!(events[2]["event"], "statusUpdate");
        assert_eq!(events[2]["status"], "completed");
        assert_eq!(events[3]["event"], "executionStopped");
        assert_eq!(events[3]["status"], "completed");
        assert!(conn.subscriptions.is_empty());
    }

    #[tokio::test]
    async fn test_event_channel_status_and_stop() {
        let engine = MockEngine::with_default(MockBehavior {
            logs: vec![(LogStream::Stdout, "up\n".to_string())],
            ..MockBehavior::runs_forever()
        });
        let mut config = Config::default();
        config.orchestrator.termination_grace = Duration::from_millis(100);
        let (_, orchestrator) = app(engine, config);
        let session_id = running_session(&orchestrator, "up").await;

        let (mut alice, mut alice_frames) = connection(&orchestrator, "alice");
        alice
            .handle_text(&json!({"action": "getStatus", "sessionId": session_id}).to_string())
            .await;
        let frame = next_frame(&mut alice_frames).await;
        assert_eq!(frame["event"], "status");
        assert_eq!(frame["session"]["sessionId"], session_id.as_str());
        assert_eq!(frame["session"]["status"], "running");

        let (mut bob, mut bob_frames) = connection(&orchestrator, "bob");
        let stop = json!({"action": "stopExecution", "sessionId": session_id}).to_string();
        bob.handle_text(&stop).await;
        let frame = next_frame(&mut bob_frames).await;
        assert!(frame["error"].is_string());
        assert_eq!(frame["sessionId"], session_id.as_str());
        assert!(orchestrator
            .registry()
            .get(&session_id)
            .await
            .unwrap()
            .stop_cause()
            .is_none());

        bob.handle_text(&json!({"action": "getStatus", "sessionId": "missing"}).to_string())
            .await;
        let frame = next_frame(&mut bob_frames).await;
        assert!(frame["error"].as_str().unwrap().contains("not found"));

        alice.handle_text(&stop).await;
        let frame = next_frame(&mut alice_frames).await;
        assert_eq!(frame["event"], "statusUpdate");
        assert_eq!(frame["sessionId"], session_id.as_str());

        orchestrator.cleanup().await;
    }

    #[tokio::test]
    async fn test_websocket_route_can_be_disabled() {
        let mut config = Config::default();
        config.server.websocket = false;
        let (router, _) = app(MockEngine::new(), config);
        let (status, _) = send(&router, request("GET", "/ws", Some("alice"), None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
