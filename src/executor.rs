//! Compile-then-run orchestration.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{info, warn};

use crate::config::AgentConfig;
use crate::error::{AgentError, Result};
use crate::language::{LanguageProfile, LanguageRegistry};
use crate::limits::LimitOverrides;
use crate::sandbox::{self, EventSink, ExecutionEvent, Stage, StageResult, StageSpec, Workspace};
use crate::verdict::{self, ExecutionStatus};

/// One execution request, as received over HTTP or WebSocket.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecuteRequest {
    /// Defaults to the worker's configured language
    pub language: Option<String>,
    /// Written to the profile's source file. Optional inside a session.
    pub source: Option<String>,
    pub stdin: Option<String>,
    /// Arguments passed to the program
    pub args: Vec<String>,
    /// Extra files (headers, data) keyed by relative path
    pub files: BTreeMap<String, String>,
    pub limits: LimitOverrides,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub id: String,
    pub language: String,
    pub status: ExecutionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compile: Option<StageResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run: Option<StageResult>,
    /// Output of the last stage that ran
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    pub duration_ms: u64,
}

impl ExecutionResult {
    fn new(id: &str, language: &str) -> Self {
        Self {
            id: id.to_string(),
            language: language.to_string(),
            status: ExecutionStatus::InternalError,
            compile: None,
            run: None,
            stdout: String::new(),
            stderr: String::new(),
            exit_code: None,
            signal: None,
            duration_ms: 0,
        }
    }

    fn finish(mut self, status: ExecutionStatus, started: Instant) -> Self {
        self.status = status;
        if let Some(last) = self.run.as_ref().or(self.compile.as_ref()) {
            self.stdout = last.stdout.clone();
            self.stderr = last.stderr.clone();
            self.exit_code = last.exit_code;
            self.signal = last.signal;
        }
        self.duration_ms = started.elapsed().as_millis() as u64;
        self
    }

    fn internal_error(mut self, message: String, started: Instant) -> Self {
        self = self.finish(ExecutionStatus::InternalError, started);
        self.stderr = message;
        self
    }
}

/// Counters exposed through the health report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub active: usize,
    pub total: u64,
    pub by_status: BTreeMap<ExecutionStatus, u64>,
}

#[derive(Debug, Default)]
struct ExecutionStats {
    active: AtomicUsize,
    total: AtomicU64,
    by_status: Mutex<HashMap<ExecutionStatus, u64>>,
}

impl ExecutionStats {
    fn record(&self, status: ExecutionStatus) {
        self.total.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut by_status) = self.by_status.lock() {
            *by_status.entry(status).or_insert(0) += 1;
        }
    }
}

struct ActiveGuard<'a>(&'a AtomicUsize);

impl<'a> ActiveGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self(counter)
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

pub struct Executor {
    config: Arc<AgentConfig>,
    registry: Arc<LanguageRegistry>,
    permits: Arc<Semaphore>,
    stats: ExecutionStats,
}

impl Executor {
    pub fn new(config: Arc<AgentConfig>, registry: Arc<LanguageRegistry>) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        Self {
            config,
            registry,
            permits,
            stats: ExecutionStats::default(),
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn registry(&self) -> &LanguageRegistry {
        &self.registry
    }

    /// Profile for `language`, or the default one, if enabled.
    pub fn profile_for(&self, language: Option<&str>) -> Result<&LanguageProfile> {
        let name = language.unwrap_or(&self.config.default_language);
        match self.registry.get(name) {
            Some(profile) if self.config.is_enabled(&self.registry, name) => Ok(profile),
            _ => Err(AgentError::UnsupportedLanguage(name.to_string())),
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        let by_status = self
            .stats
            .by_status
            .lock()
            .map(|m| m.iter().map(|(k, v)| (*k, *v)).collect())
            .unwrap_or_default();
        StatsSnapshot {
            active: self.stats.active.load(Ordering::Relaxed),
            total: self.stats.total.load(Ordering::Relaxed),
            by_status,
        }
    }

    /// Compile and run in a fresh workspace that is removed afterwards.
    pub async fn execute(
        &self,
        request: ExecuteRequest,
        sink: Option<EventSink>,
    ) -> Result<ExecutionResult> {
        let profile = self.validate(&request, true)?;
        let _permit = self.acquire().await?;
        let _active = ActiveGuard::enter(&self.stats.active);

        let id = uuid::Uuid::new_v4().to_string();
        let workspace = Workspace::create(&self.config.jobs_dir(), &id, self.config.run_as).await?;
        let result = self
            .run_job(&id, profile, &workspace, &[], &request, sink.as_ref())
            .await;
        workspace.remove().await;
        self.record(result)
    }

    /// Compile and run inside a persistent session workspace.
    pub async fn execute_in(
        &self,
        workspace: &Workspace,
        session_env: &[(String, String)],
        request: ExecuteRequest,
        sink: Option<EventSink>,
    ) -> Result<ExecutionResult> {
        let profile = self.validate(&request, false)?;
        let _permit = self.acquire().await?;
        let _active = ActiveGuard::enter(&self.stats.active);

        let id = uuid::Uuid::new_v4().to_string();
        let result = self
            .run_job(&id, profile, workspace, session_env, &request, sink.as_ref())
            .await;
        self.record(result)
    }

    fn validate(&self, request: &ExecuteRequest, require_source: bool) -> Result<&LanguageProfile> {
        let profile = self.profile_for(request.language.as_deref())?;
        if require_source && request.source.is_none() {
            return Err(AgentError::InvalidRequest("missing 'source'".into()));
        }
        let size = request.source.as_ref().map_or(0, String::len)
            + request.files.values().map(String::len).sum::<usize>();
        if size > self.config.max_source_bytes {
            return Err(AgentError::InvalidRequest(format!(
                "source is {} bytes, limit is {}",
                size, self.config.max_source_bytes
            )));
        }
        request.limits.validate()?;
        Ok(profile)
    }

    async fn acquire(&self) -> Result<OwnedSemaphorePermit> {
        let wait = Duration::from_millis(self.config.queue_timeout_ms);
        match tokio::time::timeout(wait, self.permits.clone().acquire_owned()).await {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_)) => Err(AgentError::Internal("execution semaphore closed".into())),
            Err(_) => {
                warn!(queue_timeout_ms = self.config.queue_timeout_ms, "No execution slot available");
                Err(AgentError::Busy(self.config.queue_timeout_ms))
            }
        }
    }

    fn record(&self, result: Result<ExecutionResult>) -> Result<ExecutionResult> {
        if let Ok(result) = &result {
            self.stats.record(result.status);
            info!(
                id = %result.id,
                language = %result.language,
                status = %result.status,
                duration_ms = result.duration_ms,
                "Execution finished"
            );
        }
        result
    }

    async fn run_job(
        &self,
        id: &str,
        profile: &LanguageProfile,
        workspace: &Workspace,
        extra_env: &[(String, String)],
        request: &ExecuteRequest,
        sink: Option<&EventSink>,
    ) -> Result<ExecutionResult> {
        let started = Instant::now();
        let emit = |event: ExecutionEvent| {
            if let Some(sink) = sink {
                let _ = sink.send(event);
            }
        };
        emit(ExecutionEvent::Started {
            id: id.to_string(),
            language: profile.name.clone(),
        });

        if let Some(source) = &request.source {
            workspace
                .write_file(&profile.source_file, source.as_bytes())
                .await?;
        }
        for (path, content) in &request.files {
            workspace.write_file(path, content.as_bytes()).await?;
        }
        if !workspace.contains(&profile.source_file).await {
            return Err(AgentError::InvalidRequest(format!(
                "no source: send 'source' or write {} first",
                profile.source_file
            )));
        }

        let dir = workspace.path();
        let mut env = profile.environment(dir);
        env.extend(extra_env.iter().cloned());
        let mut result = ExecutionResult::new(id, &profile.name);

        if let Some(argv) = profile.compile_command(dir) {
            emit(ExecutionEvent::Stage {
                stage: Stage::Compile,
            });
            let spec = StageSpec {
                stage: Stage::Compile,
                argv: &argv,
                workdir: dir,
                env: &env,
                stdin: None,
                limits: profile.compile_limits,
                run_as: self.config.run_as,
            };
            let compiled = match sandbox::run_stage(spec, sink).await {
                Ok(stage) => stage,
                Err(e @ AgentError::Spawn { .. }) => {
                    warn!(error = %e, toolchain = %profile.toolchain, "Compiler unavailable");
                    return Ok(result.internal_error(e.to_string(), started));
                }
                Err(e) => return Err(e),
            };
            let verdict = verdict::classify_compile(&compiled);
            result.compile = Some(compiled);
            if let Some(status) = verdict {
                return Ok(result.finish(status, started));
            }
        }

        self.run_program(profile, dir, &env, request, result, started, sink)
            .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_program(
        &self,
        profile: &LanguageProfile,
        dir: &std::path::Path,
        env: &[(String, String)],
        request: &ExecuteRequest,
        mut result: ExecutionResult,
        started: Instant,
        sink: Option<&EventSink>,
    ) -> Result<ExecutionResult> {
        if let Some(sink) = sink {
            let _ = sink.send(ExecutionEvent::Stage { stage: Stage::Run });
        }
        let argv = profile.run_command(dir, &request.args);
        let spec = StageSpec {
            stage: Stage::Run,
            argv: &argv,
            workdir: dir,
            env,
            stdin: request.stdin.as_deref().map(str::as_bytes),
            limits: profile.run_limits.clamp(&request.limits),
            run_as: self.config.run_as,
        };
        let ran = match sandbox::run_stage(spec, sink).await {
            Ok(stage) => stage,
            Err(e @ AgentError::Spawn { .. }) => {
                return Ok(result.internal_error(e.to_string(), started));
            }
            Err(e) => return Err(e),
        };
        let status = verdict::classify_run(&ran);
        result.run = Some(ran);
        Ok(result.finish(status, started))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn executor(max_concurrent: usize) -> (tempfile::TempDir, Executor) {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = AgentConfig::new(tmp.path());
        config.max_concurrent = max_concurrent;
        config.queue_timeout_ms = 50;
        config.prepare_data_dir().unwrap();
        let executor = Executor::new(Arc::new(config), Arc::new(LanguageRegistry::builtin()));
        (tmp, executor)
    }

    #[tokio::test]
    async fn disabled_language_is_rejected() {
        let (_tmp, executor) = executor(1);
        let request = ExecuteRequest {
            language: Some("java".into()),
            source: Some("class Main {}".into()),
            ..ExecuteRequest::default()
        };
        let err = executor.execute(request, None).await.unwrap_err();
        assert!(matches!(err, AgentError::UnsupportedLanguage(_)));
    }

    #[tokio::test]
    async fn missing_source_is_rejected() {
        let (_tmp, executor) = executor(1);
        let err = executor
            .execute(ExecuteRequest::default(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn oversized_source_is_rejected() {
        let (_tmp, executor) = executor(1);
        let request = ExecuteRequest {
            source: Some("x".repeat(executor.config().max_source_bytes + 1)),
            ..ExecuteRequest::default()
        };
        assert!(executor.execute(request, None).await.is_err());
    }

    #[tokio::test]
    async fn busy_when_no_slot_frees_up() {
        let (_tmp, executor) = executor(1);
        let _held = executor.permits.clone().acquire_owned().await.unwrap();
        let err = executor.acquire().await.unwrap_err();
        assert!(matches!(err, AgentError::Busy(50)));
    }

    #[test]
    fn finish_copies_last_stage_output() {
        let result = ExecutionResult {
            compile: Some(StageResult {
                stdout: "compiled".into(),
                exit_code: Some(0),
                ..StageResult::default()
            }),
            run: Some(StageResult {
                stdout: "42\n".into(),
                exit_code: Some(0),
                ..StageResult::default()
            }),
            ..ExecutionResult::new("id", "cpp")
        }
        .finish(ExecutionStatus::Ok, Instant::now());
        assert_eq!(result.stdout, "42\n");
        assert_eq!(result.exit_code, Some(0));
    }
}
