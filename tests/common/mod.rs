#![allow(dead_code)]

use sandbox_agent::language::LanguageProfile;
use sandbox_agent::limits::ResourceLimits;
use sandbox_agent::{AgentConfig, AppState, Executor, LanguageRegistry};
use std::sync::Arc;
use tempfile::TempDir;

fn strings(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

fn test_limits() -> ResourceLimits {
    ResourceLimits {
        cpu_ms: Some(5_000),
        wall_ms: 5_000,
        memory_kb: Some(512 * 1024),
        fsize_kb: Some(1024),
        nofile: Some(64),
        nproc: None,
        output_bytes: 64 * 1024,
    }
}

/// Interpreted shell profile; needs nothing beyond /bin/sh.
pub fn sh_profile() -> LanguageProfile {
    LanguageProfile {
        name: "sh".into(),
        aliases: vec!["shell".into()],
        toolchain: "sh".into(),
        source_file: "main.sh".into(),
        binary_file: "main.sh".into(),
        compile: None,
        run: strings(&["sh", "{src}"]),
        env: Vec::new(),
        compile_limits: test_limits(),
        run_limits: test_limits(),
    }
}

/// Shell profile with a syntax check standing in for compilation.
pub fn checked_sh_profile() -> LanguageProfile {
    LanguageProfile {
        name: "checked-sh".into(),
        aliases: Vec::new(),
        compile: Some(strings(&["sh", "-n", "{src}"])),
        ..sh_profile()
    }
}

pub fn registry() -> LanguageRegistry {
    LanguageRegistry::builtin()
        .with_profile(sh_profile())
        .with_profile(checked_sh_profile())
}

pub fn executor_with(max_concurrent: usize) -> (TempDir, Arc<Executor>) {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = AgentConfig::new(tmp.path()).with_languages("sh", &["sh", "checked-sh"]);
    config.max_concurrent = max_concurrent;
    config.queue_timeout_ms = 100;
    config.prepare_data_dir().unwrap();
    let executor = Executor::new(Arc::new(config), Arc::new(registry()));
    (tmp, Arc::new(executor))
}

pub fn executor() -> (TempDir, Arc<Executor>) {
    executor_with(4)
}

pub fn app_state() -> (TempDir, AppState) {
    let (tmp, executor) = executor();
    (tmp, AppState::new(executor))
}
