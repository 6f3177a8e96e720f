//! Bosun - a local multi-service stack supervisor
//!
//! This is the main CLI entry point for Bosun.

use bosun::error::{BosunError, Result};
use bosun::network::Network;
use bosun::runtime::{LocalRuntime, ProcessRuntime};
use bosun::stack::{
    OrchestratorConfig, ServiceStatus, Stack, StackOrchestrator, StackParser, UpOutcome,
};
use bosun::storage::VolumeManager;
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Bosun - local multi-service stack supervisor
#[derive(Parser)]
#[command(name = "bosun")]
#[command(author = "Evoker Industries")]
#[command(version)]
#[command(about = "Bring a declarative service stack up and down in dependency order", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the stack and supervise it
    Up {
        /// Stack file
        #[arg(short, long)]
        file: Option<PathBuf>,
        /// Activate a profile (repeatable)
        #[arg(short, long)]
        profile: Vec<String>,
        /// Start the stack and return instead of supervising
        #[arg(short = 'd', long)]
        detach: bool,
    },

    /// Stop the stack
    Down {
        /// Stack file
        #[arg(short, long)]
        file: Option<PathBuf>,
        /// Also remove named volumes and their data
        #[arg(short, long)]
        volumes: bool,
    },

    /// Restart a single service
    Restart {
        /// Stack file
        #[arg(short, long)]
        file: Option<PathBuf>,
        /// Service name
        service: String,
    },

    /// List services and their states
    Ps {
        /// Stack file
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// View service logs
    Logs {
        /// Stack file
        #[arg(long)]
        file: Option<PathBuf>,
        /// Service name; all services when omitted
        service: Option<String>,
        /// Follow log output
        #[arg(short = 'f', long)]
        follow: bool,
        /// Number of lines to show from the end
        #[arg(short = 'n', long)]
        tail: Option<usize>,
    },

    /// Validate and print the resolved stack file
    Config {
        /// Stack file
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

/// On-disk record of a stack session, written by `up` so that `ps`,
/// `logs`, `restart` and `down` work from other invocations
#[derive(Debug, Serialize, Deserialize)]
struct SessionState {
    stack: String,
    services: Vec<ServiceRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ServiceRecord {
    name: String,
    state: String,
    pid: Option<u32>,
    log: PathBuf,
    stop_grace_secs: u64,
    /// Start batch index; `down` stops higher batches first
    batch: usize,
}

/// Filesystem layout under the user data directory
struct Paths {
    base: PathBuf,
}

impl Paths {
    fn new() -> Self {
        let base = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("/var/lib"))
            .join("bosun");
        Self { base }
    }

    fn volumes(&self) -> PathBuf {
        self.base.join("volumes")
    }

    fn logs(&self, stack: &str) -> PathBuf {
        self.base.join("logs").join(stack)
    }

    fn session(&self, stack: &str) -> PathBuf {
        self.base.join("stacks").join(format!("{}.json", stack))
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match run(cli.command).await {
        Ok(code) => {
            if code != 0 {
                std::process::exit(code);
            }
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(exit_code(&e));
        }
    }
}

/// Exit codes: 2 for stack file problems, 3 for dependency timeouts,
/// 1 for everything else
fn exit_code(e: &BosunError) -> i32 {
    if e.is_validation() {
        2
    } else if matches!(e, BosunError::DependencyTimeout { .. }) {
        3
    } else {
        1
    }
}

async fn run(command: Commands) -> Result<i32> {
    let paths = Paths::new();

    match command {
        Commands::Up {
            file,
            profile,
            detach,
        } => up(&paths, file, profile, detach).await,

        Commands::Down { file, volumes } => down(&paths, file, volumes).await,

        Commands::Restart { file, service } => restart(&paths, file, &service).await,

        Commands::Ps { file } => {
            let stack = load_stack(file)?;
            let Some(session) = read_session(&paths, &stack.name)? else {
                println!("No running session for stack {}", stack.name);
                return Ok(0);
            };

            println!("{:<16} {:<12} {:<8} LOG", "NAME", "STATE", "PID");
            for record in &session.services {
                let pid = record
                    .pid
                    .map(|p| p.to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{:<16} {:<12} {:<8} {}",
                    record.name,
                    record.state,
                    pid,
                    record.log.display()
                );
            }
            Ok(0)
        }

        Commands::Logs {
            file,
            service,
            follow,
            tail,
        } => {
            let stack = load_stack(file)?;
            let log_dir = paths.logs(&stack.name);

            match service {
                Some(name) => {
                    if stack.service(&name).is_none() {
                        return Err(BosunError::ServiceNotFound(name));
                    }
                    let path = log_dir.join(format!("{}.log", name));
                    print_log(&path, tail)?;
                    if follow {
                        follow_log(&path).await?;
                    }
                }
                None => {
                    for spec in &stack.services {
                        println!("==> {} <==", spec.name);
                        print_log(&log_dir.join(format!("{}.log", spec.name)), tail)?;
                    }
                }
            }
            Ok(0)
        }

        Commands::Config { file } => {
            let working_dir = std::env::current_dir()?;
            let path = stack_file_path(file, &working_dir)?;

            let mut raw = StackParser::parse_file(&path)?;
            let env: HashMap<String, String> = std::env::vars().collect();
            StackParser::interpolate(&mut raw, &env);

            let default_name = dir_name(&working_dir);
            let stack = StackParser::resolve(raw.clone(), &default_name)?;
            StackParser::validate(&stack)?;

            let rendered = serde_yaml::to_string(&raw)
                .map_err(|e| BosunError::StackParse(e.to_string()))?;
            println!("{}", rendered);
            Ok(0)
        }
    }
}

async fn up(
    paths: &Paths,
    file: Option<PathBuf>,
    profiles: Vec<String>,
    detach: bool,
) -> Result<i32> {
    let stack = load_stack(file)?;
    let stack_name = stack.name.clone();

    let runtime = Arc::new(LocalRuntime::new(paths.logs(&stack_name))?);
    let volumes = VolumeManager::new(paths.volumes())?;
    let orchestrator = Arc::new(StackOrchestrator::new(
        stack,
        Arc::clone(&runtime),
        volumes,
        OrchestratorConfig::default(),
    ));

    // Stream lifecycle transitions while the stack comes up
    let mut events = orchestrator.events().subscribe();
    let printer = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event.reason {
                Some(reason) => println!(
                    "{:<16} {} -> {} ({})",
                    event.service, event.old_state, event.new_state, reason
                ),
                None => println!(
                    "{:<16} {} -> {}",
                    event.service, event.old_state, event.new_state
                ),
            }
        }
    });

    let report = orchestrator.up(&profiles).await?;

    println!();
    print_statuses(&report.statuses);
    write_session(paths, &stack_name, &orchestrator, &runtime)?;

    if detach {
        printer.abort();
        return Ok(match report.outcome {
            UpOutcome::Success => 0,
            UpOutcome::PartialFailure => 4,
            UpOutcome::Cancelled => 130,
        });
    }

    if report.outcome == UpOutcome::PartialFailure {
        eprintln!("Some services failed to start; the rest keep running");
    }

    println!("Supervising stack {} (Ctrl-C to stop)", stack_name);
    tokio::signal::ctrl_c().await?;

    println!("Stopping stack {}...", stack_name);
    orchestrator.down(false).await?;
    remove_session(paths, &stack_name)?;
    printer.abort();
    Ok(0)
}

async fn down(paths: &Paths, file: Option<PathBuf>, purge_volumes: bool) -> Result<i32> {
    let stack = load_stack(file)?;

    match read_session(paths, &stack.name)? {
        Some(session) => {
            // dependents first: higher start batches stop before lower ones
            let mut records = session.services;
            records.sort_by(|a, b| b.batch.cmp(&a.batch));

            for record in &records {
                if let Some(pid) = record.pid {
                    stop_pid(pid, Duration::from_secs(record.stop_grace_secs), &record.name);
                }
            }
            remove_session(paths, &stack.name)?;
        }
        None => println!("No running session for stack {}", stack.name),
    }

    if purge_volumes {
        let manager = VolumeManager::new(paths.volumes())?;
        for name in manager.purge(&stack.volumes)? {
            println!("Removed volume {}", name);
        }
    }
    Ok(0)
}

async fn restart(paths: &Paths, file: Option<PathBuf>, service: &str) -> Result<i32> {
    let stack = load_stack(file)?;
    let spec = stack
        .service(service)
        .cloned()
        .ok_or_else(|| BosunError::ServiceNotFound(service.to_string()))?;

    let mut session = read_session(paths, &stack.name)?
        .ok_or_else(|| BosunError::ServiceNotRunning(service.to_string()))?;

    // A restart only re-validates the service's own dependencies
    for dep in &spec.depends_on {
        let dep_has_check = stack
            .service(&dep.service)
            .map(|s| s.health_check.is_some())
            .unwrap_or(false);
        let satisfied = session
            .services
            .iter()
            .find(|r| r.name == dep.service)
            .map(|r| match dep.condition {
                bosun::stack::DependsCondition::Started => {
                    matches!(r.state.as_str(), "started" | "healthy" | "unhealthy")
                }
                bosun::stack::DependsCondition::Healthy => {
                    r.state == "healthy" || (!dep_has_check && r.state == "started")
                }
            })
            .unwrap_or(false);
        if !satisfied {
            return Err(BosunError::DependencyTimeout {
                service: service.to_string(),
                dependency: dep.service.clone(),
            });
        }
    }

    let record = session
        .services
        .iter_mut()
        .find(|r| r.name == service)
        .ok_or_else(|| BosunError::ServiceNotRunning(service.to_string()))?;

    if let Some(pid) = record.pid {
        stop_pid(pid, Duration::from_secs(record.stop_grace_secs), service);
    }

    let runtime = LocalRuntime::new(paths.logs(&stack.name))?;
    let network = Network::new(&stack.network);
    let handle = runtime.start(&spec, &network).await?;

    record.pid = handle.pid;
    record.state = "started".to_string();
    write_session_state(paths, &stack.name, &session)?;

    println!("Restarted {}", service);
    Ok(0)
}

fn dir_name(dir: &Path) -> String {
    dir.file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("stack")
        .to_string()
}

fn stack_file_path(file: Option<PathBuf>, working_dir: &Path) -> Result<PathBuf> {
    file.or_else(|| StackParser::find_stack_file(working_dir))
        .ok_or_else(|| {
            BosunError::StackParse("no stack file found (expected bosun.yaml)".to_string())
        })
}

/// Parse, interpolate, resolve and validate the stack file
fn load_stack(file: Option<PathBuf>) -> Result<Stack> {
    let working_dir = std::env::current_dir()?;
    let path = stack_file_path(file, &working_dir)?;

    let mut raw = StackParser::parse_file(&path)?;
    let env: HashMap<String, String> = std::env::vars().collect();
    StackParser::interpolate(&mut raw, &env);

    let stack = StackParser::resolve(raw, &dir_name(&working_dir))?;
    StackParser::validate(&stack)?;
    Ok(stack)
}

fn print_statuses(statuses: &[ServiceStatus]) {
    println!("{:<16} {:<12} REASON", "NAME", "STATE");
    for status in statuses {
        println!(
            "{:<16} {:<12} {}",
            status.name,
            status.state,
            status.reason.as_deref().unwrap_or("-")
        );
    }
}

fn write_session(
    paths: &Paths,
    stack_name: &str,
    orchestrator: &StackOrchestrator<LocalRuntime>,
    runtime: &LocalRuntime,
) -> Result<()> {
    let batches = orchestrator.batches();
    let batch_of: HashMap<String, usize> = batches
        .iter()
        .enumerate()
        .flat_map(|(i, batch)| batch.iter().map(move |name| (name.clone(), i)))
        .collect();

    let services = orchestrator
        .ps()
        .into_iter()
        .map(|status| {
            let stop_grace = orchestrator
                .stack()
                .service(&status.name)
                .and_then(|s| s.stop_grace)
                .unwrap_or(Duration::from_secs(10));
            ServiceRecord {
                pid: orchestrator.handle(&status.name).and_then(|h| h.pid),
                log: runtime.log_path(&status.name),
                stop_grace_secs: stop_grace.as_secs(),
                batch: batch_of.get(&status.name).copied().unwrap_or(0),
                state: status.state.to_string(),
                name: status.name,
            }
        })
        .collect();

    let session = SessionState {
        stack: stack_name.to_string(),
        services,
    };
    write_session_state(paths, stack_name, &session)
}

fn write_session_state(paths: &Paths, stack_name: &str, session: &SessionState) -> Result<()> {
    let path = paths.session(stack_name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, serde_json::to_string_pretty(session)?)?;
    Ok(())
}

fn read_session(paths: &Paths, stack_name: &str) -> Result<Option<SessionState>> {
    let path = paths.session(stack_name);
    if !path.exists() {
        return Ok(None);
    }
    let session = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
    Ok(Some(session))
}

fn remove_session(paths: &Paths, stack_name: &str) -> Result<()> {
    let path = paths.session(stack_name);
    if path.exists() {
        std::fs::remove_file(&path)?;
    }
    Ok(())
}

/// SIGTERM, wait out the grace period, then SIGKILL. A pid that is
/// already gone is not an error.
fn stop_pid(pid: u32, grace: Duration, service: &str) {
    unsafe {
        if libc::kill(pid as i32, libc::SIGTERM) != 0 {
            return;
        }
    }

    let deadline = std::time::Instant::now() + grace;
    while std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(100));
        let alive = unsafe { libc::kill(pid as i32, 0) == 0 };
        if !alive {
            println!("Stopped {}", service);
            return;
        }
    }

    unsafe {
        libc::kill(pid as i32, libc::SIGKILL);
    }
    println!("Killed {}", service);
}

fn print_log(path: &Path, tail: Option<usize>) -> Result<()> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            println!("(no logs)");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    match tail {
        Some(n) => {
            let lines: Vec<&str> = content.lines().collect();
            let start = lines.len().saturating_sub(n);
            for line in &lines[start..] {
                println!("{}", line);
            }
        }
        None => print!("{}", content),
    }
    Ok(())
}

/// Poll the log file and print anything appended to it
async fn follow_log(path: &Path) -> Result<()> {
    use std::io::{Read, Seek, SeekFrom};

    let mut offset = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
    loop {
        if let Ok(mut file) = std::fs::File::open(path) {
            let len = file.metadata()?.len();
            if len > offset {
                file.seek(SeekFrom::Start(offset))?;
                let mut buf = String::new();
                file.read_to_string(&mut buf)?;
                print!("{}", buf);
                offset = len;
            } else if len < offset {
                // file was truncated, start over
                offset = 0;
            }
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
}
