//! Resource limits for compile and run stages.

use nix::sys::resource::{getrlimit, setrlimit, Resource};
use serde::{Deserialize, Serialize};

use crate::error::{AgentError, Result};

/// Limits applied to one stage. `None` leaves the inherited rlimit alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// CPU time, enforced with RLIMIT_CPU (rounded up to whole seconds)
    pub cpu_ms: Option<u64>,
    /// Wall-clock time, enforced by the parent
    pub wall_ms: u64,
    /// Address space in KB
    pub memory_kb: Option<u64>,
    /// Largest file the stage may write, in KB
    pub fsize_kb: Option<u64>,
    pub nofile: Option<u64>,
    pub nproc: Option<u64>,
    /// Cap per captured stream
    pub output_bytes: usize,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            cpu_ms: Some(5_000),
            wall_ms: 10_000,
            memory_kb: Some(256 * 1024),
            fsize_kb: Some(16 * 1024),
            nofile: Some(64),
            nproc: Some(256),
            output_bytes: 1024 * 1024,
        }
    }
}

/// Limits a request may ask for. Each one can only tighten the profile limit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitOverrides {
    pub time_ms: Option<u64>,
    pub wall_ms: Option<u64>,
    pub memory_kb: Option<u64>,
    pub output_bytes: Option<usize>,
}

impl LimitOverrides {
    pub fn validate(&self) -> Result<()> {
        let zero = [
            ("time_ms", self.time_ms == Some(0)),
            ("wall_ms", self.wall_ms == Some(0)),
            ("memory_kb", self.memory_kb == Some(0)),
            ("output_bytes", self.output_bytes == Some(0)),
        ];
        match zero.iter().find(|(_, is_zero)| *is_zero) {
            Some((name, _)) => Err(AgentError::InvalidRequest(format!(
                "limit '{}' must be greater than zero",
                name
            ))),
            None => Ok(()),
        }
    }
}

/// A limit the profile leaves unset stays unset.
fn tighten(base: Option<u64>, requested: Option<u64>) -> Option<u64> {
    match (base, requested) {
        (Some(base), Some(requested)) => Some(base.min(requested)),
        (base, _) => base,
    }
}

impl ResourceLimits {
    /// Apply request overrides without ever exceeding `self`.
    pub fn clamp(&self, overrides: &LimitOverrides) -> ResourceLimits {
        ResourceLimits {
            cpu_ms: tighten(self.cpu_ms, overrides.time_ms),
            wall_ms: overrides
                .wall_ms
                .map_or(self.wall_ms, |wall| wall.min(self.wall_ms)),
            memory_kb: tighten(self.memory_kb, overrides.memory_kb),
            output_bytes: overrides
                .output_bytes
                .map_or(self.output_bytes, |cap| cap.min(self.output_bytes)),
            ..*self
        }
    }

    /// Set rlimits on the calling process.
    ///
    /// Runs in the forked child before exec, so it must not allocate.
    pub fn apply(&self) -> nix::Result<()> {
        if let Some(cpu_ms) = self.cpu_ms {
            // The soft limit raises SIGXCPU one second before the hard SIGKILL.
            let soft = cpu_ms.div_ceil(1000).max(1);
            lower(Resource::RLIMIT_CPU, soft, soft + 1)?;
        }
        if let Some(kb) = self.memory_kb {
            let bytes = kb.saturating_mul(1024);
            lower(Resource::RLIMIT_AS, bytes, bytes)?;
        }
        if let Some(kb) = self.fsize_kb {
            let bytes = kb.saturating_mul(1024);
            lower(Resource::RLIMIT_FSIZE, bytes, bytes)?;
        }
        if let Some(nofile) = self.nofile {
            lower(Resource::RLIMIT_NOFILE, nofile, nofile)?;
        }
        if let Some(nproc) = self.nproc {
            lower(Resource::RLIMIT_NPROC, nproc, nproc)?;
        }
        setrlimit(Resource::RLIMIT_CORE, 0, 0)
    }
}

/// Never raise past the inherited hard limit; an unprivileged process cannot.
fn lower(resource: Resource, soft: u64, hard: u64) -> nix::Result<()> {
    let (_, current_hard) = getrlimit(resource)?;
    let hard = hard.min(current_hard);
    setrlimit(resource, soft.min(hard), hard)
}
