//! Shared application state and session types.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::info;

use crate::config::AgentConfig;
use crate::error::{AgentError, Result};
use crate::executor::Executor;
use crate::sandbox::Workspace;

/// A persistent workspace with its own environment.
#[derive(Debug)]
pub struct Session {
    pub id: String,
    pub workspace: Arc<Workspace>,
    pub env: HashMap<String, String>,
    pub created_at: Instant,
    pub last_used: Instant,
    /// Serializes executions within the session
    pub lock: Arc<Mutex<()>>,
}

/// What a request needs from a session once the map lock is released.
pub struct SessionHandle {
    pub workspace: Arc<Workspace>,
    pub env: Vec<(String, String)>,
    pub lock: Arc<Mutex<()>>,
}

/// Thread-safe session storage.
pub type Sessions = Arc<RwLock<HashMap<String, Session>>>;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub sessions: Sessions,
    pub executor: Arc<Executor>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(executor: Arc<Executor>) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            executor,
            started_at: Instant::now(),
        }
    }

    pub fn config(&self) -> &AgentConfig {
        self.executor.config()
    }

    pub async fn create_session(&self, env: HashMap<String, String>) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        let config = self.config();
        let workspace = Workspace::create(&config.sessions_dir(), &id, config.run_as).await?;
        let now = Instant::now();
        let session = Session {
            id: id.clone(),
            workspace: Arc::new(workspace),
            env,
            created_at: now,
            last_used: now,
            lock: Arc::new(Mutex::new(())),
        };
        self.sessions.write().await.insert(id.clone(), session);
        info!("Created session: {}", id);
        Ok(id)
    }

    /// Mark the session used and hand out what a request needs.
    pub async fn touch_session(&self, id: &str) -> Result<SessionHandle> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| AgentError::SessionNotFound(id.to_string()))?;
        session.last_used = Instant::now();
        Ok(SessionHandle {
            workspace: session.workspace.clone(),
            env: session
                .env
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            lock: session.lock.clone(),
        })
    }

    pub async fn delete_session(&self, id: &str) -> Result<()> {
        let session = self
            .sessions
            .write()
            .await
            .remove(id)
            .ok_or_else(|| AgentError::SessionNotFound(id.to_string()))?;
        session.workspace.remove().await;
        info!("Deleted session: {}", id);
        Ok(())
    }

    /// Remove sessions idle longer than `ttl`; returns how many went.
    pub async fn expire_sessions(&self, ttl: Duration) -> usize {
        let expired: Vec<Session> = {
            let mut sessions = self.sessions.write().await;
            let now = Instant::now();
            let ids: Vec<String> = sessions
                .iter()
                .filter(|(_, s)| now.duration_since(s.last_used) > ttl)
                .map(|(id, _)| id.clone())
                .collect();
            ids.iter().filter_map(|id| sessions.remove(id)).collect()
        };
        for session in &expired {
            info!("Cleaning up expired session: {}", session.id);
            session.workspace.remove().await;
        }
        expired.len()
    }

    /// Drop every session; used on shutdown.
    pub async fn clear_sessions(&self) {
        let drained: Vec<Session> = self.sessions.write().await.drain().map(|(_, s)| s).collect();
        for session in drained {
            session.workspace.remove().await;
        }
    }
}
