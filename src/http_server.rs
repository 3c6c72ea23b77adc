//! HTTP server implementation using Axum.

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        ws::{Message, WebSocket, WebSocketUpgrade},
        FromRequest, FromRequestParts, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::interval;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::error::{AgentError, Result};
use crate::executor::{ExecuteRequest, ExecutionResult};
use crate::health::{self, HealthStatus};
use crate::limits::ResourceLimits;
use crate::sandbox::{ExecutionEvent, Stage, Stream};
use crate::state::AppState;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

impl IntoResponse for AgentError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            warn!(error = %self, "Request failed");
        }
        let body = ErrorBody {
            error: self.code(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<JsonRejection> for AgentError {
    fn from(rejection: JsonRejection) -> Self {
        AgentError::InvalidRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for AgentError {
    fn from(rejection: QueryRejection) -> Self {
        AgentError::InvalidRequest(rejection.body_text())
    }
}

impl From<PathRejection> for AgentError {
    fn from(rejection: PathRejection) -> Self {
        AgentError::InvalidRequest(rejection.body_text())
    }
}

/// JSON body whose rejection is an [`AgentError`].
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(AgentError))]
struct JsonBody<T>(T);

#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(AgentError))]
struct Query<T>(T);

#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(AgentError))]
struct Path<T>(T);

// Request/Response types
#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

#[derive(Deserialize, Default)]
struct CreateSessionRequest {
    #[serde(default)]
    env: HashMap<String, String>,
}

#[derive(Serialize)]
struct CreateSessionResponse {
    session_id: String,
}

#[derive(Serialize)]
struct SessionInfo {
    id: String,
    env: HashMap<String, String>,
    workspace: String,
    age_secs: u64,
    idle_secs: u64,
}

#[derive(Deserialize)]
struct SetEnvRequest {
    env: HashMap<String, String>,
}

#[derive(Deserialize)]
struct WriteFileRequest {
    path: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    content_base64: Option<String>,
}

#[derive(Serialize)]
struct WriteFileResponse {
    path: String,
    size: usize,
}

#[derive(Deserialize)]
struct ReadFileQuery {
    path: String,
}

#[derive(Serialize)]
struct ReadFileResponse {
    path: String,
    size: usize,
    content_base64: String,
    /// Present when the file is valid UTF-8
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
}

#[derive(Serialize)]
struct LanguageInfo {
    name: String,
    aliases: Vec<String>,
    toolchain: String,
    available: bool,
    default: bool,
    source_file: String,
    compile: Option<Vec<String>>,
    run: Vec<String>,
    run_limits: ResourceLimits,
}

/// Messages sent to WebSocket clients.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    Started { id: String, language: String },
    Stage { stage: Stage },
    Output { stage: Stage, stream: Stream, data: String },
    Result { result: ExecutionResult },
    Error { error: String, message: String },
}

impl From<ExecutionEvent> for ServerEvent {
    fn from(event: ExecutionEvent) -> Self {
        match event {
            ExecutionEvent::Started { id, language } => ServerEvent::Started { id, language },
            ExecutionEvent::Stage { stage } => ServerEvent::Stage { stage },
            ExecutionEvent::Output {
                stage,
                stream,
                data,
            } => ServerEvent::Output {
                stage,
                stream,
                data,
            },
        }
    }
}

impl From<&AgentError> for ServerEvent {
    fn from(error: &AgentError) -> Self {
        ServerEvent::Error {
            error: error.code().to_string(),
            message: error.to_string(),
        }
    }
}

/// All routes, without binding a socket.
pub fn router(state: AppState) -> Router {
    Router::new()
        // Session management
        .route("/sessions", post(create_session).get(list_sessions))
        .route("/sessions/:id", get(get_session).delete(delete_session))
        .route("/sessions/:id/env", post(set_env))
        .route("/sessions/:id/files", get(read_file).put(write_file))
        .route("/sessions/:id/execute", post(execute_in_session))
        // Stateless execution
        .route("/execute", post(execute))
        .route("/ws/execute", get(ws_execute))
        .route("/languages", get(languages))
        // Health check
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Remove idle sessions every minute.
pub fn spawn_session_sweeper(state: AppState) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let ttl = state.config().session_ttl;
        let mut interval = interval(SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            let removed = state.expire_sessions(ttl).await;
            if removed > 0 {
                debug!(removed, "Session sweep");
            }
        }
    })
}

/// Run the HTTP server until SIGTERM or Ctrl-C.
pub async fn run_server(state: AppState) -> Result<()> {
    let addr = state.config().socket_addr()?;
    let sweeper = spawn_session_sweeper(state.clone());
    let app = router(state.clone());

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| AgentError::io(format!("bind {}", addr), e))?;
    info!("Starting HTTP server on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| AgentError::io("serve", e))?;

    sweeper.abort();
    state.clear_sessions().await;
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let report = health::report(&state).await;
    let status = match report.status {
        HealthStatus::Ok => StatusCode::OK,
        HealthStatus::Degraded => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, Json(report))
}

async fn languages(State(state): State<AppState>) -> Json<Vec<LanguageInfo>> {
    let executor = &state.executor;
    let config = executor.config();
    let registry = executor.registry();
    let default = registry.get(&config.default_language).map(|p| p.name.clone());
    let list = registry
        .profiles()
        .filter(|p| config.is_enabled(registry, &p.name))
        .map(|p| LanguageInfo {
            name: p.name.clone(),
            aliases: p.aliases.clone(),
            toolchain: p.toolchain.clone(),
            available: p.toolchain_available(),
            default: default.as_deref() == Some(p.name.as_str()),
            source_file: p.source_file.clone(),
            compile: p.compile.clone(),
            run: p.run.clone(),
            run_limits: p.run_limits,
        })
        .collect();
    Json(list)
}

async fn execute(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<ExecuteRequest>,
) -> Result<Json<ExecutionResult>> {
    info!("POST /execute - language: {:?}", req.language);
    let result = state.executor.execute(req, None).await?;
    Ok(Json(result))
}

async fn ws_execute(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// One request per connection: read it, stream events, send the result, close.
async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let request = loop {
        match socket.recv().await {
            Some(Ok(Message::Text(text))) => match serde_json::from_str::<ExecuteRequest>(&text) {
                Ok(request) => break request,
                Err(e) => {
                    let err = AgentError::InvalidRequest(e.to_string());
                    let _ = send_event(&mut socket, &ServerEvent::from(&err)).await;
                    let _ = socket.send(Message::Close(None)).await;
                    return;
                }
            },
            Some(Ok(Message::Close(_))) | None => return,
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                debug!("WebSocket read error: {}", e);
                return;
            }
        }
    };

    let (tx, mut rx) = mpsc::unbounded_channel();
    let executor = state.executor.clone();
    let job = tokio::spawn(async move { executor.execute(request, Some(tx)).await });

    let mut connected = true;
    while let Some(event) = rx.recv().await {
        // Keep draining after a disconnect so the job is never blocked.
        if connected && send_event(&mut socket, &ServerEvent::from(event)).await.is_err() {
            debug!("WebSocket client went away during execution");
            connected = false;
        }
    }
    if !connected {
        return;
    }

    let last = match job.await {
        Ok(Ok(result)) => ServerEvent::Result { result },
        Ok(Err(e)) => ServerEvent::from(&e),
        Err(e) => ServerEvent::from(&AgentError::Internal(e.to_string())),
    };
    let _ = send_event(&mut socket, &last).await;
    let _ = socket.send(Message::Close(None)).await;
}

async fn send_event(socket: &mut WebSocket, event: &ServerEvent) -> std::result::Result<(), axum::Error> {
    match serde_json::to_string(event) {
        Ok(json) => socket.send(Message::Text(json)).await,
        Err(e) => {
            warn!("Failed to serialize event: {}", e);
            Ok(())
        }
    }
}

async fn create_session(
    State(state): State<AppState>,
    body: Option<JsonBody<CreateSessionRequest>>,
) -> Result<(StatusCode, Json<CreateSessionResponse>)> {
    let req = body.map(|JsonBody(req)| req).unwrap_or_default();
    let session_id = state.create_session(req.env).await?;
    Ok((StatusCode::CREATED, Json(CreateSessionResponse { session_id })))
}

async fn list_sessions(State(state): State<AppState>) -> Json<Vec<SessionInfo>> {
    let sessions = state.sessions.read().await;
    let now = Instant::now();
    let list: Vec<SessionInfo> = sessions
        .values()
        .map(|s| SessionInfo {
            id: s.id.clone(),
            env: s.env.clone(),
            workspace: s.workspace.path().display().to_string(),
            age_secs: now.duration_since(s.created_at).as_secs(),
            idle_secs: now.duration_since(s.last_used).as_secs(),
        })
        .collect();
    Json(list)
}

async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionInfo>> {
    let sessions = state.sessions.read().await;
    let session = sessions
        .get(&id)
        .ok_or_else(|| AgentError::SessionNotFound(id.clone()))?;
    let now = Instant::now();
    Ok(Json(SessionInfo {
        id: session.id.clone(),
        env: session.env.clone(),
        workspace: session.workspace.path().display().to_string(),
        age_secs: now.duration_since(session.created_at).as_secs(),
        idle_secs: now.duration_since(session.last_used).as_secs(),
    }))
}

async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    state.delete_session(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn set_env(
    State(state): State<AppState>,
    Path(id): Path<String>,
    JsonBody(req): JsonBody<SetEnvRequest>,
) -> Result<StatusCode> {
    let mut sessions = state.sessions.write().await;
    let session = sessions
        .get_mut(&id)
        .ok_or_else(|| AgentError::SessionNotFound(id.clone()))?;
    session.env.extend(req.env);
    session.last_used = Instant::now();
    Ok(StatusCode::OK)
}

async fn write_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
    JsonBody(req): JsonBody<WriteFileRequest>,
) -> Result<Json<WriteFileResponse>> {
    let content = match (req.content, req.content_base64) {
        (Some(text), None) => text.into_bytes(),
        (None, Some(encoded)) => STANDARD
            .decode(encoded.as_bytes())
            .map_err(|e| AgentError::InvalidRequest(format!("content_base64: {}", e)))?,
        _ => {
            return Err(AgentError::InvalidRequest(
                "send exactly one of 'content' or 'content_base64'".into(),
            ))
        }
    };
    if content.len() > state.config().max_source_bytes {
        return Err(AgentError::InvalidRequest(format!(
            "file is {} bytes, limit is {}",
            content.len(),
            state.config().max_source_bytes
        )));
    }
    let session = state.touch_session(&id).await?;
    session.workspace.write_file(&req.path, &content).await?;
    info!("Session {}: wrote {} ({} bytes)", id, req.path, content.len());
    Ok(Json(WriteFileResponse {
        path: req.path,
        size: content.len(),
    }))
}

async fn read_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ReadFileQuery>,
) -> Result<Json<ReadFileResponse>> {
    let session = state.touch_session(&id).await?;
    let content = session.workspace.read_file(&query.path).await?;
    Ok(Json(ReadFileResponse {
        path: query.path,
        size: content.len(),
        content_base64: STANDARD.encode(&content),
        content: String::from_utf8(content).ok(),
    }))
}

async fn execute_in_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    JsonBody(req): JsonBody<ExecuteRequest>,
) -> Result<Json<ExecutionResult>> {
    let session = state.touch_session(&id).await?;
    let _busy = session.lock.lock().await;
    info!("POST /sessions/{}/execute - language: {:?}", id, req.language);
    let result = state
        .executor
        .execute_in(&session.workspace, &session.env, req, None)
        .await?;
    Ok(Json(result))
}
