//! sandbox-agent - per-language code execution worker.
//!
//! Usage:
//!   sandbox-agent [serve] [--port 8080]                 # Start HTTP server
//!   sandbox-agent run <file> [--stdin <file>] [-- args] # Compile and run one file
//!   sandbox-agent healthcheck [--port 8080]             # Container health probe

use clap::{Parser, Subcommand};
use sandbox_agent::config::{AgentConfig, WorkerArgs};
use sandbox_agent::executor::{ExecuteRequest, Executor};
use sandbox_agent::health;
use sandbox_agent::http_server;
use sandbox_agent::language::LanguageRegistry;
use sandbox_agent::limits::LimitOverrides;
use sandbox_agent::state::AppState;
use sandbox_agent::verdict::ExecutionStatus;
use std::path::{Path, PathBuf};
use std::process::exit;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "sandbox-agent")]
#[command(about = "Compile and run submitted code under resource limits")]
struct Args {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    worker: WorkerArgs,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the HTTP server (default)
    Serve,

    /// Compile and run a single source file, then exit with its status
    Run {
        /// Source file
        file: PathBuf,

        /// File fed to the program's stdin
        #[arg(long)]
        stdin: Option<PathBuf>,

        /// CPU time limit in milliseconds
        #[arg(long)]
        time_ms: Option<u64>,

        /// Wall-clock limit in milliseconds
        #[arg(long)]
        wall_ms: Option<u64>,

        /// Memory limit in KB
        #[arg(long)]
        memory_kb: Option<u64>,

        /// Arguments passed to the program
        #[arg(last = true)]
        args: Vec<String>,
    },

    /// Probe a running worker's /health; exit 0 when healthy
    Healthcheck,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match args.command.unwrap_or(Commands::Serve) {
        Commands::Healthcheck => {
            let url = health::local_health_url(args.worker.port);
            match health::probe(&url, health::PROBE_TIMEOUT).await {
                Ok(()) => exit(0),
                Err(e) => {
                    eprintln!("Error: {}", e);
                    exit(1);
                }
            }
        }
        Commands::Serve => {
            // Workspaces left by a previous server process are garbage.
            let executor = build_executor(&args.worker, true);
            let config = executor.config();
            if !executor
                .profile_for(None)
                .map(|p| p.toolchain_available())
                .unwrap_or(false)
            {
                warn!(language = %config.default_language, "Toolchain not found on PATH; /health will report degraded");
            }
            match config.run_as {
                Some(id) => info!(uid = id.uid, gid = id.gid, "Running as root; submitted code drops to uid/gid"),
                None => info!(uid = nix::unistd::geteuid().as_raw(), "Submitted code runs as the worker's own uid"),
            }
            if let Err(e) = http_server::run_server(AppState::new(Arc::new(executor))).await {
                eprintln!("Error: {}", e);
                exit(1);
            }
        }
        Commands::Run {
            file,
            stdin,
            time_ms,
            wall_ms,
            memory_kb,
            args: program_args,
        } => {
            let executor = build_executor(&args.worker, false);
            let source = read_or_exit(&file);
            let stdin = stdin.as_deref().map(read_or_exit);
            let request = ExecuteRequest {
                language: None,
                source: Some(source),
                stdin,
                args: program_args,
                limits: LimitOverrides {
                    time_ms,
                    wall_ms,
                    memory_kb,
                    output_bytes: None,
                },
                ..ExecuteRequest::default()
            };
            match executor.execute(request, None).await {
                Ok(result) => {
                    print!("{}", result.stdout);
                    eprint!("{}", result.stderr);
                    if result.status != ExecutionStatus::Ok {
                        eprintln!("[{}]", result.status);
                    }
                    exit(result.exit_code.unwrap_or(1));
                }
                Err(e) => {
                    eprintln!("Error: {}", e);
                    exit(1);
                }
            }
        }
    }
}

fn build_executor(args: &WorkerArgs, fresh_data_dir: bool) -> Executor {
    let registry = LanguageRegistry::builtin();
    let config = match AgentConfig::from_args(args).and_then(|c| c.validate(&registry).map(|_| c)) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            exit(1);
        }
    };
    let prepared = if fresh_data_dir {
        config.purge_workspaces().and_then(|_| config.prepare_data_dir())
    } else {
        config.prepare_data_dir()
    };
    if let Err(e) = prepared {
        eprintln!("Error: {}", e);
        exit(1);
    }
    Executor::new(Arc::new(config), Arc::new(registry))
}

fn read_or_exit(path: &Path) -> String {
    match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => {
            eprintln!("Error: cannot read {}: {}", path.display(), e);
            exit(1);
        }
    }
}
