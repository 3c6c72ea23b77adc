//! sandbox-agent - compiles and runs submitted code under resource limits.
//!
//! One worker serves one or more language profiles over HTTP and WebSocket.
//! Each execution gets a private workspace under the data directory, a
//! compile stage and a run stage, each a child process in its own process
//! group with rlimits, a scrubbed environment and a wall-clock deadline.

#[cfg(not(target_os = "linux"))]
compile_error!("This program only works on Linux.");

pub mod config;
pub mod error;
pub mod executor;
pub mod health;
pub mod http_server;
pub mod language;
pub mod limits;
pub mod sandbox;
pub mod state;
pub mod verdict;

pub use config::AgentConfig;
pub use error::{AgentError, Result};
pub use executor::{ExecuteRequest, ExecutionResult, Executor};
pub use language::{LanguageProfile, LanguageRegistry};
pub use state::AppState;
pub use verdict::ExecutionStatus;
