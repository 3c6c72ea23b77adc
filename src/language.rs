//! Language runtime profiles.
//!
//! A profile names the toolchain, the compile and run command templates and
//! the limits for each stage. Templates may use `{dir}` (workspace root),
//! `{src}` (source file) and `{bin}` (compiled binary).

use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::limits::ResourceLimits;

#[derive(Debug, Clone, Serialize)]
pub struct LanguageProfile {
    pub name: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
    /// Executable whose presence on PATH means the profile can run
    pub toolchain: String,
    /// Source file name inside the workspace
    pub source_file: String,
    pub binary_file: String,
    pub compile: Option<Vec<String>>,
    pub run: Vec<String>,
    #[serde(skip)]
    pub env: Vec<(String, String)>,
    pub compile_limits: ResourceLimits,
    pub run_limits: ResourceLimits,
}

fn strings(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

fn compile_limits(memory_mb: Option<u64>) -> ResourceLimits {
    ResourceLimits {
        cpu_ms: Some(30_000),
        wall_ms: 45_000,
        memory_kb: memory_mb.map(|mb| mb * 1024),
        fsize_kb: Some(64 * 1024),
        nofile: Some(256),
        nproc: None,
        output_bytes: 64 * 1024,
    }
}

impl LanguageProfile {
    pub fn cpp() -> Self {
        Self {
            name: "cpp".into(),
            aliases: strings(&["c++", "cxx"]),
            toolchain: "g++".into(),
            source_file: "main.cpp".into(),
            binary_file: "main".into(),
            compile: Some(strings(&[
                "g++", "-std=c++17", "-O2", "-pipe", "-o", "{bin}", "{src}",
            ])),
            run: strings(&["{bin}"]),
            env: Vec::new(),
            compile_limits: compile_limits(Some(768)),
            run_limits: ResourceLimits::default(),
        }
    }

    pub fn c() -> Self {
        Self {
            name: "c".into(),
            aliases: Vec::new(),
            toolchain: "gcc".into(),
            source_file: "main.c".into(),
            binary_file: "main".into(),
            compile: Some(strings(&[
                "gcc", "-std=c11", "-O2", "-pipe", "-o", "{bin}", "{src}", "-lm",
            ])),
            run: strings(&["{bin}"]),
            env: Vec::new(),
            compile_limits: compile_limits(Some(512)),
            run_limits: ResourceLimits::default(),
        }
    }

    // The Go and JVM runtimes reserve more address space than any useful
    // RLIMIT_AS, so neither limits memory_kb.
    pub fn go() -> Self {
        Self {
            name: "go".into(),
            aliases: strings(&["golang"]),
            toolchain: "go".into(),
            source_file: "main.go".into(),
            binary_file: "main".into(),
            compile: Some(strings(&["go", "build", "-o", "{bin}", "{src}"])),
            run: strings(&["{bin}"]),
            // Build cache is private to the job; nothing is reused across submissions.
            env: vec![
                ("GOCACHE".into(), "{dir}/.gocache".into()),
                ("GOPATH".into(), "{dir}/.gopath".into()),
                ("GO111MODULE".into(), "off".into()),
                ("CGO_ENABLED".into(), "0".into()),
            ],
            compile_limits: compile_limits(None),
            run_limits: ResourceLimits {
                memory_kb: None,
                nproc: None,
                ..ResourceLimits::default()
            },
        }
    }

    pub fn java() -> Self {
        Self {
            name: "java".into(),
            aliases: Vec::new(),
            toolchain: "javac".into(),
            source_file: "Main.java".into(),
            binary_file: "Main.class".into(),
            compile: Some(strings(&["javac", "-encoding", "UTF-8", "-d", "{dir}", "{src}"])),
            run: strings(&["java", "-Xss64m", "-cp", "{dir}", "Main"]),
            env: Vec::new(),
            compile_limits: compile_limits(None),
            run_limits: ResourceLimits {
                memory_kb: None,
                nproc: None,
                ..ResourceLimits::default()
            },
        }
    }

    /// Case-insensitive match on the name or any alias.
    pub fn matches(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
            || self.aliases.iter().any(|a| a.eq_ignore_ascii_case(name))
    }

    pub fn source_path(&self, dir: &Path) -> PathBuf {
        dir.join(&self.source_file)
    }

    pub fn binary_path(&self, dir: &Path) -> PathBuf {
        dir.join(&self.binary_file)
    }

    pub fn compile_command(&self, dir: &Path) -> Option<Vec<String>> {
        self.compile
            .as_ref()
            .map(|template| self.expand_all(template, dir))
    }

    /// Run argv followed by the program's own arguments.
    pub fn run_command(&self, dir: &Path, args: &[String]) -> Vec<String> {
        let mut argv = self.expand_all(&self.run, dir);
        argv.extend(args.iter().cloned());
        argv
    }

    pub fn environment(&self, dir: &Path) -> Vec<(String, String)> {
        self.env
            .iter()
            .map(|(key, value)| (key.clone(), self.expand(value, dir)))
            .collect()
    }

    pub fn toolchain_available(&self) -> bool {
        find_in_path(&self.toolchain).is_some()
    }

    fn expand_all(&self, template: &[String], dir: &Path) -> Vec<String> {
        template.iter().map(|part| self.expand(part, dir)).collect()
    }

    fn expand(&self, template: &str, dir: &Path) -> String {
        template
            .replace("{src}", &self.source_path(dir).to_string_lossy())
            .replace("{bin}", &self.binary_path(dir).to_string_lossy())
            .replace("{dir}", &dir.to_string_lossy())
    }
}

/// Locate an executable the way `execvp` would.
pub fn find_in_path(program: &str) -> Option<PathBuf> {
    if program.contains('/') {
        let path = PathBuf::from(program);
        return path.is_file().then_some(path);
    }
    let search = std::env::var_os("PATH")?;
    std::env::split_paths(&search)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}

/// The set of profiles a worker knows about.
#[derive(Debug, Clone)]
pub struct LanguageRegistry {
    profiles: Vec<LanguageProfile>,
}

impl LanguageRegistry {
    pub fn builtin() -> Self {
        Self {
            profiles: vec![
                LanguageProfile::cpp(),
                LanguageProfile::c(),
                LanguageProfile::go(),
                LanguageProfile::java(),
            ],
        }
    }

    /// Add a profile, replacing any existing one with the same name.
    pub fn with_profile(mut self, profile: LanguageProfile) -> Self {
        self.profiles.retain(|p| p.name != profile.name);
        self.profiles.push(profile);
        self
    }

    pub fn get(&self, name: &str) -> Option<&LanguageProfile> {
        self.profiles.iter().find(|p| p.matches(name))
    }

    pub fn profiles(&self) -> impl Iterator<Item = &LanguageProfile> {
        self.profiles.iter()
    }
}

impl Default for LanguageRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::LimitOverrides;

    #[test]
    fn lookup_by_alias_ignores_case() {
        let registry = LanguageRegistry::builtin();
        assert_eq!(registry.get("C++").map(|p| p.name.as_str()), Some("cpp"));
        assert_eq!(registry.get("golang").map(|p| p.name.as_str()), Some("go"));
        assert!(registry.get("cobol").is_none());
    }

    #[test]
    fn cpp_templates_expand_into_workspace() {
        let profile = LanguageProfile::cpp();
        let dir = Path::new("/app/data/jobs/abc");
        let compile = profile.compile_command(dir).unwrap();
        assert_eq!(compile[0], "g++");
        assert!(compile.contains(&"/app/data/jobs/abc/main".to_string()));
        assert_eq!(compile.last().unwrap(), "/app/data/jobs/abc/main.cpp");

        let run = profile.run_command(dir, &["-v".to_string()]);
        assert_eq!(run, vec!["/app/data/jobs/abc/main".to_string(), "-v".to_string()]);
    }

    #[test]
    fn go_environment_points_into_workspace() {
        let env = LanguageProfile::go().environment(Path::new("/w"));
        assert!(env.contains(&("GOCACHE".to_string(), "/w/.gocache".to_string())));
    }

    #[test]
    fn go_caches_are_not_shared_between_jobs() {
        let go = LanguageProfile::go();
        let first = go.environment(Path::new("/app/data/jobs/a"));
        let second = go.environment(Path::new("/app/data/jobs/b"));
        let cache = |env: &[(String, String)]| {
            env.iter().find(|(k, _)| k == "GOCACHE").map(|(_, v)| v.clone())
        };
        assert_ne!(cache(&first), cache(&second));
    }

    #[test]
    fn memory_override_leaves_jvm_and_go_unlimited() {
        let overrides = LimitOverrides {
            memory_kb: Some(256 * 1024),
            ..LimitOverrides::default()
        };
        for profile in [LanguageProfile::java(), LanguageProfile::go()] {
            assert_eq!(profile.run_limits.clamp(&overrides).memory_kb, None);
        }
        assert_eq!(
            LanguageProfile::cpp().run_limits.clamp(&overrides).memory_kb,
            Some(256 * 1024)
        );
    }

    #[test]
    fn with_profile_replaces_same_name() {
        let mut custom = LanguageProfile::c();
        custom.toolchain = "clang".into();
        let registry = LanguageRegistry::builtin().with_profile(custom);
        assert_eq!(registry.get("c").unwrap().toolchain, "clang");
        assert_eq!(registry.profiles().filter(|p| p.name == "c").count(), 1);
    }

    #[test]
    fn finds_shell_on_path() {
        assert!(find_in_path("sh").is_some());
        assert!(find_in_path("definitely-not-a-real-tool-42").is_none());
    }
}
