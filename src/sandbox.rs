//! Workspaces and the single-stage process runner.

use nix::sys::signal::{kill, killpg, Signal};
use nix::unistd::{chown, setgid, setgroups, setsid, setuid, Gid, Pid, Uid};
use serde::{Deserialize, Serialize};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::fs::PermissionsExt;
use std::os::unix::process::ExitStatusExt;
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{AgentError, Result};
use crate::limits::ResourceLimits;

/// How long a killed stage may take to be reaped.
const KILL_GRACE: Duration = Duration::from_secs(2);

/// How long to wait for the output pipes to drain once the stage is gone.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

const READ_CHUNK: usize = 8192;

/// Identity children switch to when the worker itself runs as root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunAs {
    pub uid: u32,
    pub gid: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Compile,
    Run,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Compile => write!(f, "compile"),
            Stage::Run => write!(f, "run"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stream {
    Stdout,
    Stderr,
}

/// Progress of an execution, delivered to streaming clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionEvent {
    Started { id: String, language: String },
    Stage { stage: Stage },
    Output { stage: Stage, stream: Stream, data: String },
}

pub type EventSink = mpsc::UnboundedSender<ExecutionEvent>;

/// A private directory holding one job's or one session's files.
#[derive(Debug)]
pub struct Workspace {
    root: PathBuf,
    owner: Option<RunAs>,
}

impl Workspace {
    /// Create `parent/<id>` with mode 0700, owned by `owner` when given.
    pub async fn create(parent: &Path, id: &str, owner: Option<RunAs>) -> Result<Self> {
        let root = parent.join(id);
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| AgentError::io(format!("mkdir {}", root.display()), e))?;
        tokio::fs::set_permissions(&root, std::fs::Permissions::from_mode(0o700))
            .await
            .map_err(|e| AgentError::io(format!("chmod {}", root.display()), e))?;
        let workspace = Self { root, owner };
        workspace.give_to_owner(&workspace.root)?;
        debug!(path = %workspace.root.display(), "Workspace created");
        Ok(workspace)
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Map a client-supplied relative path into the workspace.
    ///
    /// Leading slashes are ignored; `..`, empty paths and anything that
    /// would leave the workspace are rejected.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf> {
        let trimmed = relative.trim_start_matches('/');
        let mut resolved = self.root.clone();
        let mut depth = 0;
        for component in Path::new(trimmed).components() {
            match component {
                Component::Normal(part) => {
                    resolved.push(part);
                    depth += 1;
                }
                Component::CurDir => {}
                _ => {
                    return Err(AgentError::InvalidRequest(format!(
                        "path '{}' escapes the workspace",
                        relative
                    )))
                }
            }
        }
        if depth == 0 {
            return Err(AgentError::InvalidRequest("empty file path".into()));
        }
        Ok(resolved)
    }

    pub async fn write_file(&self, relative: &str, content: &[u8]) -> Result<PathBuf> {
        let path = self.resolve(relative)?;
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| AgentError::io("mkdir parent", e))?;
                self.give_to_owner(parent)?;
            }
        }
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| AgentError::io(format!("write {}", relative), e))?;
        tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644))
            .await
            .map_err(|e| AgentError::io(format!("chmod {}", relative), e))?;
        self.give_to_owner(&path)?;
        Ok(path)
    }

    pub async fn read_file(&self, relative: &str) -> Result<Vec<u8>> {
        let path = self.resolve(relative)?;
        match tokio::fs::read(&path).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(AgentError::FileNotFound(relative.to_string()))
            }
            Err(e) => Err(AgentError::io(format!("read {}", relative), e)),
        }
    }

    pub async fn contains(&self, relative: &str) -> bool {
        match self.resolve(relative) {
            Ok(path) => tokio::fs::metadata(path).await.is_ok(),
            Err(_) => false,
        }
    }

    /// Delete the workspace and everything in it.
    pub async fn remove(&self) {
        if let Err(e) = tokio::fs::remove_dir_all(&self.root).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.root.display(), error = %e, "Failed to remove workspace");
            }
        }
    }

    fn give_to_owner(&self, path: &Path) -> Result<()> {
        if let Some(owner) = self.owner {
            chown(
                path,
                Some(Uid::from_raw(owner.uid)),
                Some(Gid::from_raw(owner.gid)),
            )
            .map_err(|e| AgentError::io(format!("chown {}", path.display()), e.into()))?;
        }
        Ok(())
    }
}

/// Outcome of one child process.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    pub duration_ms: u64,
    /// Killed by the worker at the wall-clock limit
    pub timed_out: bool,
    /// Output exceeded the cap and the stage was killed
    pub output_truncated: bool,
}

impl StageResult {
    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0) && !self.timed_out && !self.output_truncated
    }
}

/// Everything needed to launch a stage.
#[derive(Debug)]
pub struct StageSpec<'a> {
    pub stage: Stage,
    pub argv: &'a [String],
    pub workdir: &'a Path,
    pub env: &'a [(String, String)],
    pub stdin: Option<&'a [u8]>,
    pub limits: ResourceLimits,
    pub run_as: Option<RunAs>,
}

const DEFAULT_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// The environment every stage starts from. Only the worker's PATH is
/// inherited, so toolchains installed outside the default dirs are found.
fn base_environment(workdir: &Path) -> Vec<(String, String)> {
    let dir = workdir.to_string_lossy().to_string();
    let path = std::env::var("PATH")
        .ok()
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| DEFAULT_PATH.to_string());
    vec![
        ("PATH".into(), path),
        ("HOME".into(), dir.clone()),
        ("TMPDIR".into(), dir),
        ("LANG".into(), "C.UTF-8".into()),
    ]
}

/// Runs between fork and exec: new session, rlimits, then identity.
fn prepare_child(limits: &ResourceLimits, run_as: Option<RunAs>) -> nix::Result<()> {
    setsid()?;
    limits.apply()?;
    if let Some(id) = run_as {
        let gid = Gid::from_raw(id.gid);
        setgroups(&[gid])?;
        setgid(gid)?;
        setuid(Uid::from_raw(id.uid))?;
    }
    Ok(())
}

fn kill_group(pgid: Option<Pid>) {
    if let Some(pgid) = pgid {
        // ESRCH just means the group is already gone.
        let _ = killpg(pgid, Signal::SIGKILL);
    }
}

struct Capture<'a> {
    stage: Stage,
    limit: usize,
    pgid: Option<Pid>,
    sink: Option<&'a EventSink>,
}

impl Capture<'_> {
    fn emit(&self, stream: Stream, bytes: &[u8]) {
        if let Some(sink) = self.sink {
            if !bytes.is_empty() {
                let _ = sink.send(ExecutionEvent::Output {
                    stage: self.stage,
                    stream,
                    data: String::from_utf8_lossy(bytes).into_owned(),
                });
            }
        }
    }

    /// Read a stream up to the cap. Past the cap the whole group is killed.
    ///
    /// Bytes land in `captured` as they arrive, so a read abandoned
    /// part-way still leaves its output behind.
    async fn read<R: AsyncRead + Unpin>(&self, reader: Option<R>, stream: Stream, captured: &mut Captured) {
        let Some(mut reader) = reader else {
            return;
        };
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            let n = match reader.read(&mut chunk).await {
                Ok(0) | Err(_) => return,
                Ok(n) => n,
            };
            let room = self.limit.saturating_sub(captured.bytes.len());
            let take = n.min(room);
            captured.bytes.extend_from_slice(&chunk[..take]);
            self.emit(stream, &chunk[..take]);
            if take < n {
                debug!(stage = %self.stage, ?stream, limit = self.limit, "Output cap reached, killing stage");
                captured.truncated = true;
                kill_group(self.pgid);
                return;
            }
        }
    }
}

#[derive(Default)]
struct Captured {
    bytes: Vec<u8>,
    truncated: bool,
}

/// `pipe:[inode]` names of the given descriptors, as seen in `/proc/<pid>/fd`.
fn pipe_names(fds: &[Option<RawFd>]) -> Vec<PathBuf> {
    fds.iter()
        .flatten()
        .filter_map(|fd| std::fs::read_link(format!("/proc/self/fd/{}", fd)).ok())
        .collect()
}

/// SIGKILL every process that still holds a write end of one of `pipes`.
///
/// Catches programs that left their process group (setsid, double fork)
/// but kept the stage's stdout or stderr. Returns how many were killed.
fn kill_pipe_holders(pipes: &[PathBuf]) -> usize {
    if pipes.is_empty() {
        return 0;
    }
    let Ok(entries) = std::fs::read_dir("/proc") else {
        return 0;
    };
    let mut killed = 0;
    for entry in entries.flatten() {
        let Some(pid) = entry.file_name().to_str().and_then(|n| n.parse::<i32>().ok()) else {
            continue;
        };
        let Ok(fds) = std::fs::read_dir(entry.path().join("fd")) else {
            continue;
        };
        let holds_pipe = fds.flatten().any(|fd| {
            std::fs::read_link(fd.path()).is_ok_and(|target| pipes.contains(&target))
                && opened_for_writing(&entry.path().join("fdinfo").join(fd.file_name()))
        });
        if holds_pipe && kill(Pid::from_raw(pid), Signal::SIGKILL).is_ok() {
            killed += 1;
        }
    }
    killed
}

/// Whether an `fdinfo` entry describes a write-only descriptor.
fn opened_for_writing(fdinfo: &Path) -> bool {
    std::fs::read_to_string(fdinfo)
        .ok()
        .and_then(|info| {
            info.lines()
                .find_map(|line| line.strip_prefix("flags:"))
                .and_then(|flags| i32::from_str_radix(flags.trim(), 8).ok())
        })
        .is_some_and(|flags| flags & libc::O_ACCMODE == libc::O_WRONLY)
}

/// Threads of this worker process, from `/proc/self/status`.
fn worker_threads() -> u64 {
    std::fs::read_to_string("/proc/self/status")
        .ok()
        .and_then(|status| {
            status
                .lines()
                .find_map(|line| line.strip_prefix("Threads:"))
                .and_then(|n| n.trim().parse().ok())
        })
        .unwrap_or(0)
}

/// Limits as applied to the child.
///
/// RLIMIT_NPROC counts every task of the real uid. Without a uid switch
/// the child shares the worker's uid, so the worker's own threads are
/// added on top of the budget.
fn effective_limits(limits: ResourceLimits, run_as: Option<RunAs>) -> ResourceLimits {
    match run_as {
        Some(_) => limits,
        None => ResourceLimits {
            nproc: limits.nproc.map(|n| n.saturating_add(worker_threads())),
            ..limits
        },
    }
}

/// Spawn one stage, feed stdin, capture output and enforce wall time.
pub async fn run_stage(spec: StageSpec<'_>, sink: Option<&EventSink>) -> Result<StageResult> {
    let program = spec
        .argv
        .first()
        .ok_or_else(|| AgentError::InvalidRequest("empty command".into()))?;
    info!(stage = %spec.stage, command = ?spec.argv, "Running stage");
    debug!(
        wall_ms = spec.limits.wall_ms,
        cpu_ms = ?spec.limits.cpu_ms,
        memory_kb = ?spec.limits.memory_kb,
        "Limits"
    );

    let mut command = Command::new(program);
    command
        .args(&spec.argv[1..])
        .current_dir(spec.workdir)
        .env_clear()
        .envs(base_environment(spec.workdir))
        .envs(
            spec.env
                .iter()
                .filter(|(key, _)| !key.starts_with("LD_"))
                .map(|(key, value)| (key.as_str(), value.as_str())),
        )
        .stdin(if spec.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let run_as = spec.run_as;
    let limits = effective_limits(spec.limits, run_as);
    // SAFETY: prepare_child only makes async-signal-safe syscalls.
    unsafe {
        command.pre_exec(move || prepare_child(&limits, run_as).map_err(std::io::Error::from));
    }

    let started = Instant::now();
    let mut child = command.spawn().map_err(|source| AgentError::Spawn {
        program: program.clone(),
        source,
    })?;
    // setsid made the child its own group leader.
    let pgid = child.id().map(|id| Pid::from_raw(id as i32));

    if let (Some(input), Some(mut stdin)) = (spec.stdin, child.stdin.take()) {
        let input = input.to_vec();
        tokio::spawn(async move {
            // A program that never reads stdin closes the pipe early.
            let _ = stdin.write_all(&input).await;
        });
    }

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let pipes = pipe_names(&[
        stdout.as_ref().map(|p| p.as_raw_fd()),
        stderr.as_ref().map(|p| p.as_raw_fd()),
    ]);
    let capture = Capture {
        stage: spec.stage,
        limit: spec.limits.output_bytes,
        pgid,
        sink,
    };

    let mut out = Captured::default();
    let mut err = Captured::default();
    let mut timed_out = false;
    let status = {
        let reading = async {
            tokio::join!(
                capture.read(stdout, Stream::Stdout, &mut out),
                capture.read(stderr, Stream::Stderr, &mut err)
            );
        };
        tokio::pin!(reading);
        let deadline = tokio::time::sleep(Duration::from_millis(spec.limits.wall_ms));
        tokio::pin!(deadline);

        // The stage ends when its process exits, not when its pipes close.
        let mut drained = false;
        let status = loop {
            tokio::select! {
                status = child.wait() => break status,
                _ = &mut reading, if !drained => drained = true,
                _ = &mut deadline => {
                    if timed_out {
                        return Err(AgentError::Internal(format!(
                            "{} stage did not exit after SIGKILL",
                            spec.stage
                        )));
                    }
                    timed_out = true;
                    info!(stage = %spec.stage, wall_ms = spec.limits.wall_ms, "Wall time exceeded, killing stage");
                    kill_group(pgid);
                    deadline.as_mut().reset(tokio::time::Instant::now() + KILL_GRACE);
                }
            }
        };

        // Anything still in the group outlives the stage otherwise.
        kill_group(pgid);
        if !drained && tokio::time::timeout(DRAIN_GRACE, &mut reading).await.is_err() {
            let killed = kill_pipe_holders(&pipes);
            warn!(stage = %spec.stage, killed, "Detached processes held the output pipes open");
            let _ = tokio::time::timeout(DRAIN_GRACE, &mut reading).await;
        }
        status
    };
    let status = status.map_err(|e| AgentError::io("wait for stage", e))?;
    let duration_ms = started.elapsed().as_millis() as u64;

    let result = StageResult {
        stdout: String::from_utf8_lossy(&out.bytes).into_owned(),
        stderr: String::from_utf8_lossy(&err.bytes).into_owned(),
        exit_code: status.code(),
        signal: status.signal(),
        duration_ms,
        timed_out,
        output_truncated: out.truncated || err.truncated,
    };
    info!(
        stage = %spec.stage,
        exit_code = ?result.exit_code,
        signal = ?result.signal,
        duration_ms,
        timed_out,
        "Stage finished"
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec<'a>(argv: &'a [String], dir: &'a Path) -> StageSpec<'a> {
        StageSpec {
            stage: Stage::Run,
            argv,
            workdir: dir,
            env: &[],
            stdin: None,
            limits: ResourceLimits {
                nproc: None,
                ..ResourceLimits::default()
            },
            run_as: None,
        }
    }

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".into(), "-c".into(), script.into()]
    }

    #[tokio::test]
    async fn resolve_rejects_escapes() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = Workspace::create(tmp.path(), "ws", None).await.unwrap();
        assert!(ws.resolve("../etc/passwd").is_err());
        assert!(ws.resolve("a/../../b").is_err());
        assert!(ws.resolve("").is_err());
        assert!(ws.resolve("/").is_err());
        assert_eq!(ws.resolve("/src/main.cpp").unwrap(), ws.path().join("src/main.cpp"));
    }

    #[tokio::test]
    async fn write_then_read_nested_file() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = Workspace::create(tmp.path(), "ws", None).await.unwrap();
        ws.write_file("include/util.h", b"#pragma once\n").await.unwrap();
        assert_eq!(ws.read_file("include/util.h").await.unwrap(), b"#pragma once\n");
        assert!(matches!(
            ws.read_file("missing.txt").await,
            Err(AgentError::FileNotFound(_))
        ));
        ws.remove().await;
        assert!(!ws.path().exists());
    }

    #[tokio::test]
    async fn captures_stdout_stderr_and_exit_code() {
        let tmp = tempfile::tempdir().unwrap();
        let argv = sh("echo out; echo err >&2; exit 3");
        let result = run_stage(spec(&argv, tmp.path()), None).await.unwrap();
        assert_eq!(result.stdout, "out\n");
        assert_eq!(result.stderr, "err\n");
        assert_eq!(result.exit_code, Some(3));
        assert!(!result.succeeded());
    }

    #[tokio::test]
    async fn environment_is_scrubbed() {
        let tmp = tempfile::tempdir().unwrap();
        let argv = sh("echo \"$HOME|$LD_PRELOAD|$EXTRA\"");
        let env = vec![
            ("LD_PRELOAD".to_string(), "/evil.so".to_string()),
            ("EXTRA".to_string(), "yes".to_string()),
        ];
        let mut stage = spec(&argv, tmp.path());
        stage.env = &env;
        let result = run_stage(stage, None).await.unwrap();
        assert_eq!(
            result.stdout.trim(),
            format!("{}||yes", tmp.path().display())
        );
    }

    #[tokio::test]
    async fn wall_time_kills_the_process_group() {
        let tmp = tempfile::tempdir().unwrap();
        let argv = sh("echo begin; sleep 30 & sleep 30; echo never");
        let mut stage = spec(&argv, tmp.path());
        stage.limits.wall_ms = 300;
        let started = Instant::now();
        let result = run_stage(stage, None).await.unwrap();
        assert!(result.timed_out);
        assert_eq!(result.stdout, "begin\n");
        assert_eq!(result.signal, Some(libc::SIGKILL));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn output_cap_truncates_and_streams() {
        let tmp = tempfile::tempdir().unwrap();
        let argv = sh("while :; do echo xxxxxxxxxxxxxxxx; done");
        let mut stage = spec(&argv, tmp.path());
        stage.limits.output_bytes = 1000;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let result = run_stage(stage, Some(&tx)).await.unwrap();
        assert!(result.output_truncated);
        assert_eq!(result.stdout.len(), 1000);

        drop(tx);
        let mut streamed = 0;
        while let Some(event) = rx.recv().await {
            if let ExecutionEvent::Output { stream: Stream::Stdout, data, .. } = event {
                streamed += data.len();
            }
        }
        assert_eq!(streamed, 1000);
    }

    #[tokio::test]
    async fn stdin_is_delivered() {
        let tmp = tempfile::tempdir().unwrap();
        let argv = vec!["cat".to_string()];
        let mut stage = spec(&argv, tmp.path());
        stage.stdin = Some(b"3 4\n");
        let result = run_stage(stage, None).await.unwrap();
        assert_eq!(result.stdout, "3 4\n");
        assert!(result.succeeded());
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let tmp = tempfile::tempdir().unwrap();
        let argv = vec!["/nonexistent/compiler".to_string()];
        let err = run_stage(spec(&argv, tmp.path()), None).await.unwrap_err();
        assert!(matches!(err, AgentError::Spawn { .. }));
    }

    /// True once `pid` has exited (reaped or zombie).
    async fn exited(pid: i32) -> bool {
        for _ in 0..40 {
            match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
                Err(_) => return true,
                Ok(stat) => {
                    let state = stat.rsplit(')').next().map(str::trim_start);
                    if state.is_some_and(|s| s.starts_with('Z')) {
                        return true;
                    }
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        false
    }

    #[tokio::test]
    async fn detached_process_does_not_keep_the_stage_alive() {
        if crate::language::find_in_path("setsid").is_none() {
            eprintln!("setsid not installed, skipping");
            return;
        }
        let tmp = tempfile::tempdir().unwrap();
        let argv = sh("setsid sh -c 'echo $$ > escaped.pid; exec sleep 60' & \
             while [ ! -s escaped.pid ]; do :; done; echo done");
        let started = Instant::now();
        let result = run_stage(spec(&argv, tmp.path()), None).await.unwrap();
        assert_eq!(result.exit_code, Some(0));
        assert!(!result.timed_out);
        assert_eq!(result.stdout, "done\n");
        assert!(started.elapsed() < Duration::from_secs(5));

        let pid: i32 = std::fs::read_to_string(tmp.path().join("escaped.pid"))
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        assert!(exited(pid).await, "detached process {} survived the stage", pid);
    }

    #[tokio::test]
    async fn background_jobs_are_killed_with_the_stage() {
        let tmp = tempfile::tempdir().unwrap();
        let argv = sh("sleep 60 & echo $! > bg.pid; echo started");
        let result = run_stage(spec(&argv, tmp.path()), None).await.unwrap();
        assert_eq!(result.stdout, "started\n");
        let pid: i32 = std::fs::read_to_string(tmp.path().join("bg.pid"))
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        assert!(exited(pid).await);
    }

    #[tokio::test]
    async fn rlimits_reach_the_child() {
        let tmp = tempfile::tempdir().unwrap();
        let argv = sh("ulimit -v; ulimit -c; ulimit -t");
        let result = run_stage(spec(&argv, tmp.path()), None).await.unwrap();
        let lines: Vec<&str> = result.stdout.lines().collect();
        assert_eq!(lines, vec!["262144", "0", "5"]);
    }

    #[test]
    fn nproc_budget_covers_worker_threads_without_uid_switch() {
        let base = ResourceLimits::default();
        let switched = effective_limits(base, Some(RunAs { uid: 1001, gid: 1001 }));
        assert_eq!(switched, base);

        let shared = effective_limits(base, None);
        assert!(shared.nproc.unwrap() > base.nproc.unwrap());
        assert_eq!(shared.memory_kb, base.memory_kb);
    }
}
