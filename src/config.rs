//! Worker configuration from flags and environment.

use clap::Args;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{AgentError, Result};
use crate::language::LanguageRegistry;
use crate::sandbox::RunAs;

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_UID: u32 = 1001;
pub const DEFAULT_GID: u32 = 1001;

/// Flags shared by every subcommand. Each falls back to an environment variable.
#[derive(Args, Debug, Clone)]
pub struct WorkerArgs {
    /// Address to bind
    #[arg(long, env = "SANDBOX_HOST", default_value = "0.0.0.0", global = true)]
    pub host: String,

    /// Port to listen on (and to probe for healthcheck)
    #[arg(long, env = "SANDBOX_PORT", default_value_t = DEFAULT_PORT, global = true)]
    pub port: u16,

    /// Default language for requests that do not name one
    #[arg(long, env = "SANDBOX_LANGUAGE", default_value = "cpp", global = true)]
    pub language: String,

    /// Comma-separated list of enabled languages (defaults to --language)
    #[arg(long, env = "SANDBOX_LANGUAGES", value_delimiter = ',', global = true)]
    pub languages: Vec<String>,

    /// Directory for job and session workspaces
    #[arg(long, env = "SANDBOX_DATA_DIR", default_value = "/app/data", global = true)]
    pub data_dir: PathBuf,

    /// Executions allowed to run at the same time
    #[arg(long, env = "SANDBOX_MAX_CONCURRENT", default_value_t = 4, global = true)]
    pub max_concurrent: usize,

    /// How long a request waits for a free execution slot
    #[arg(long, env = "SANDBOX_QUEUE_TIMEOUT_MS", default_value_t = 30_000, global = true)]
    pub queue_timeout_ms: u64,

    /// Largest accepted source plus extra files, in bytes
    #[arg(long, env = "SANDBOX_MAX_SOURCE_BYTES", default_value_t = 1024 * 1024, global = true)]
    pub max_source_bytes: usize,

    /// Idle time after which a session is removed
    #[arg(long, env = "SANDBOX_SESSION_TTL_SECS", default_value_t = 300, global = true)]
    pub session_ttl_secs: u64,

    /// uid for submitted code when the worker runs as root
    #[arg(long, env = "SANDBOX_UID", default_value_t = DEFAULT_UID, global = true)]
    pub run_as_uid: u32,

    /// gid for submitted code when the worker runs as root
    #[arg(long, env = "SANDBOX_GID", default_value_t = DEFAULT_GID, global = true)]
    pub run_as_gid: u32,
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub host: String,
    pub port: u16,
    pub default_language: String,
    pub languages: Vec<String>,
    pub data_dir: PathBuf,
    pub max_concurrent: usize,
    pub queue_timeout_ms: u64,
    pub max_source_bytes: usize,
    pub session_ttl: Duration,
    /// Set only when the worker is root; children then switch to this identity
    pub run_as: Option<RunAs>,
}

impl AgentConfig {
    /// Defaults rooted at `data_dir`, with no privilege drop.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: DEFAULT_PORT,
            default_language: "cpp".into(),
            languages: vec!["cpp".into()],
            data_dir: data_dir.into(),
            max_concurrent: 4,
            queue_timeout_ms: 30_000,
            max_source_bytes: 1024 * 1024,
            session_ttl: Duration::from_secs(300),
            run_as: None,
        }
    }

    pub fn with_languages(mut self, default: &str, enabled: &[&str]) -> Self {
        self.default_language = default.to_string();
        self.languages = enabled.iter().map(|l| l.to_string()).collect();
        self
    }

    pub fn from_args(args: &WorkerArgs) -> Result<Self> {
        if args.run_as_uid == 0 || args.run_as_gid == 0 {
            return Err(AgentError::Config(
                "submitted code must never run as uid/gid 0".into(),
            ));
        }
        let languages = if args.languages.is_empty() {
            vec![args.language.clone()]
        } else {
            args.languages
                .iter()
                .map(|l| l.trim().to_string())
                .filter(|l| !l.is_empty())
                .collect()
        };
        let run_as = nix::unistd::geteuid().is_root().then_some(RunAs {
            uid: args.run_as_uid,
            gid: args.run_as_gid,
        });
        Ok(Self {
            host: args.host.clone(),
            port: args.port,
            default_language: args.language.clone(),
            languages,
            data_dir: args.data_dir.clone(),
            max_concurrent: args.max_concurrent,
            queue_timeout_ms: args.queue_timeout_ms,
            max_source_bytes: args.max_source_bytes,
            session_ttl: Duration::from_secs(args.session_ttl_secs),
            run_as,
        })
    }

    pub fn validate(&self, registry: &LanguageRegistry) -> Result<()> {
        if self.max_concurrent == 0 {
            return Err(AgentError::Config("max_concurrent must be at least 1".into()));
        }
        if !self.data_dir.is_absolute() {
            return Err(AgentError::Config(format!(
                "data directory must be absolute: {}",
                self.data_dir.display()
            )));
        }
        if let Some(run_as) = self.run_as {
            if run_as.uid == 0 || run_as.gid == 0 {
                return Err(AgentError::Config(
                    "submitted code must never run as uid/gid 0".into(),
                ));
            }
        }
        for language in &self.languages {
            if registry.get(language).is_none() {
                return Err(AgentError::Config(format!("unknown language '{}'", language)));
            }
        }
        let default = registry.get(&self.default_language).ok_or_else(|| {
            AgentError::Config(format!("unknown language '{}'", self.default_language))
        })?;
        if !self.is_enabled(registry, &default.name) {
            return Err(AgentError::Config(format!(
                "default language '{}' is not among the enabled languages",
                self.default_language
            )));
        }
        Ok(())
    }

    /// Whether `language` (by name or alias) is enabled.
    pub fn is_enabled(&self, registry: &LanguageRegistry, language: &str) -> bool {
        let Some(profile) = registry.get(language) else {
            return false;
        };
        self.languages.iter().any(|l| profile.matches(l))
    }

    pub fn jobs_dir(&self) -> PathBuf {
        self.data_dir.join("jobs")
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.data_dir.join("sessions")
    }

    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| AgentError::Config(format!("bad listen address {}:{}: {}", self.host, self.port, e)))
    }

    /// Create the workspace roots and check the data directory is writable.
    pub fn prepare_data_dir(&self) -> Result<()> {
        for dir in [self.jobs_dir(), self.sessions_dir()] {
            std::fs::create_dir_all(&dir)
                .map_err(|e| AgentError::io(format!("mkdir {}", dir.display()), e))?;
        }
        if !data_dir_writable(&self.data_dir) {
            return Err(AgentError::Config(format!(
                "data directory {} is not writable",
                self.data_dir.display()
            )));
        }
        Ok(())
    }

    /// Remove every job and session workspace.
    pub fn purge_workspaces(&self) -> Result<()> {
        for dir in [self.jobs_dir(), self.sessions_dir()] {
            match std::fs::remove_dir_all(&dir) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(AgentError::io(format!("clear {}", dir.display()), e)),
            }
        }
        Ok(())
    }
}

/// Create and remove a probe file.
pub fn data_dir_writable(dir: &Path) -> bool {
    let probe = dir.join(format!(".write-probe-{}", std::process::id()));
    let ok = std::fs::write(&probe, b"ok").is_ok();
    let _ = std::fs::remove_file(&probe);
    ok
}
