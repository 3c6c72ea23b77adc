//! Classification of stage outcomes.
//!
//! Pure functions over [`StageResult`]; the order of the checks matters.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::sandbox::StageResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Ok,
    CompileError,
    RuntimeError,
    TimeLimitExceeded,
    MemoryLimitExceeded,
    OutputLimitExceeded,
    InternalError,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Ok => "ok",
            ExecutionStatus::CompileError => "compile_error",
            ExecutionStatus::RuntimeError => "runtime_error",
            ExecutionStatus::TimeLimitExceeded => "time_limit_exceeded",
            ExecutionStatus::MemoryLimitExceeded => "memory_limit_exceeded",
            ExecutionStatus::OutputLimitExceeded => "output_limit_exceeded",
            ExecutionStatus::InternalError => "internal_error",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Allocation failures as reported by libstdc++, glibc/musl and the Go runtime.
const OUT_OF_MEMORY_MARKERS: &[&str] = &[
    "std::bad_alloc",
    "Cannot allocate memory",
    "out of memory",
    "OutOfMemoryError",
];

fn hit_time_limit(stage: &StageResult) -> bool {
    stage.timed_out || stage.signal == Some(libc::SIGXCPU)
}

fn hit_output_limit(stage: &StageResult) -> bool {
    stage.output_truncated || stage.signal == Some(libc::SIGXFSZ)
}

fn ran_out_of_memory(stage: &StageResult) -> bool {
    stage.exit_code != Some(0)
        && OUT_OF_MEMORY_MARKERS
            .iter()
            .any(|marker| stage.stderr.contains(marker))
}

/// `None` when compilation succeeded and the run stage should follow.
pub fn classify_compile(stage: &StageResult) -> Option<ExecutionStatus> {
    if stage.succeeded() {
        None
    } else if hit_time_limit(stage) {
        Some(ExecutionStatus::TimeLimitExceeded)
    } else {
        Some(ExecutionStatus::CompileError)
    }
}

pub fn classify_run(stage: &StageResult) -> ExecutionStatus {
    if hit_time_limit(stage) {
        ExecutionStatus::TimeLimitExceeded
    } else if hit_output_limit(stage) {
        ExecutionStatus::OutputLimitExceeded
    } else if ran_out_of_memory(stage) {
        ExecutionStatus::MemoryLimitExceeded
    } else if stage.exit_code == Some(0) {
        ExecutionStatus::Ok
    } else {
        ExecutionStatus::RuntimeError
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exited(code: i32) -> StageResult {
        StageResult {
            exit_code: Some(code),
            ..StageResult::default()
        }
    }

    fn signaled(signal: i32) -> StageResult {
        StageResult {
            signal: Some(signal),
            ..StageResult::default()
        }
    }

    #[test]
    fn clean_exit_is_ok() {
        assert_eq!(classify_run(&exited(0)), ExecutionStatus::Ok);
        assert_eq!(classify_compile(&exited(0)), None);
    }

    #[test]
    fn nonzero_exit_and_crash_are_runtime_errors() {
        assert_eq!(classify_run(&exited(1)), ExecutionStatus::RuntimeError);
        assert_eq!(classify_run(&signaled(libc::SIGSEGV)), ExecutionStatus::RuntimeError);
    }

    #[test]
    fn worker_timeout_wins_over_kill_signal() {
        let stage = StageResult {
            timed_out: true,
            ..signaled(libc::SIGKILL)
        };
        assert_eq!(classify_run(&stage), ExecutionStatus::TimeLimitExceeded);
        assert_eq!(classify_compile(&stage), Some(ExecutionStatus::TimeLimitExceeded));
    }

    #[test]
    fn cpu_rlimit_signal_is_time_limit() {
        assert_eq!(classify_run(&signaled(libc::SIGXCPU)), ExecutionStatus::TimeLimitExceeded);
    }

    #[test]
    fn output_cap_and_file_size_are_output_limit() {
        let truncated = StageResult {
            output_truncated: true,
            ..signaled(libc::SIGKILL)
        };
        assert_eq!(classify_run(&truncated), ExecutionStatus::OutputLimitExceeded);
        assert_eq!(classify_run(&signaled(libc::SIGXFSZ)), ExecutionStatus::OutputLimitExceeded);
    }

    #[test]
    fn bad_alloc_abort_is_memory_limit() {
        let stage = StageResult {
            stderr: "terminate called after throwing an instance of 'std::bad_alloc'\n".into(),
            ..signaled(libc::SIGABRT)
        };
        assert_eq!(classify_run(&stage), ExecutionStatus::MemoryLimitExceeded);
    }

    #[test]
    fn failed_compile_is_compile_error() {
        let stage = StageResult {
            stderr: "main.cpp:1:1: error: expected unqualified-id".into(),
            ..exited(1)
        };
        assert_eq!(classify_compile(&stage), Some(ExecutionStatus::CompileError));
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&ExecutionStatus::TimeLimitExceeded).unwrap();
        assert_eq!(json, "\"time_limit_exceeded\"");
    }
}
