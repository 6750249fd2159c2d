//! PVC Mode Migrator
//!
//! Command-line entry point. Parses flags, sets up logging (stderr plus a
//! run log in the working directory), connects to the cluster and runs one
//! of the subcommands:
//!
//! - `migrate` (default): quiesce, convert every eligible claim, resume
//! - `resume`: restore replica counts saved by an earlier run
//! - `inspect`: print the claims a run would convert, without changing them

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn, Level};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use pvc_mode_migrator::{
    AccessMode, Error, FsManifestStore, KubeCluster, MigratorConfig, Mounter, Orchestrator,
    PollPolicy, Result, RunContext,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// In-place access-mode and mounter migration for bound PersistentVolumeClaims
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Namespace to migrate
    #[arg(short, long, env = "MIGRATOR_NAMESPACE", global = true)]
    namespace: Option<String>,

    /// Desired access mode
    #[arg(long, env = "MIGRATOR_ACCESS_MODE", value_enum, default_value_t = AccessMode::ReadWriteMany, global = true)]
    access_mode: AccessMode,

    /// Desired CSI mounter
    #[arg(long, env = "MIGRATOR_MOUNTER", value_enum, default_value_t = Mounter::Kernel, global = true)]
    mounter: Mounter,

    /// Kubeconfig context (default: active context)
    #[arg(long, env = "MIGRATOR_CONTEXT", global = true)]
    context: Option<String>,

    /// Only claims of this storage class are converted
    #[arg(long, env = "MIGRATOR_STORAGE_CLASS", default_value = "cephfs", global = true)]
    storage_class: String,

    /// Root directory for logs, backups and the replica snapshot
    #[arg(long, env = "MIGRATOR_WORK_DIR", default_value = "./pvc-migrations", global = true)]
    work_dir: PathBuf,

    /// Give up waiting for pods to drain after this many seconds
    #[arg(long, env = "MIGRATOR_DRAIN_TIMEOUT", default_value = "900", global = true)]
    drain_timeout_secs: u64,

    /// Give up waiting for a recreated claim to bind after this many seconds
    #[arg(long, env = "MIGRATOR_BIND_TIMEOUT", default_value = "600", global = true)]
    bind_timeout_secs: u64,

    /// Seconds between two checks while waiting
    #[arg(long, env = "MIGRATOR_POLL_INTERVAL", default_value = "5", global = true)]
    poll_interval_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON", global = true)]
    log_json: bool,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// Quiesce workloads, convert every eligible claim, resume workloads
    Migrate,
    /// Restore workload replica counts saved by an earlier run
    Resume,
    /// List eligible claims and their current settings
    Inspect,
}

impl Args {
    fn config(&self) -> Result<MigratorConfig> {
        if self.poll_interval_secs == 0 {
            return Err(Error::Validation("poll interval must be at least 1 second".into()));
        }
        let interval = Duration::from_secs(self.poll_interval_secs);
        Ok(MigratorConfig {
            storage_class: self.storage_class.clone(),
            work_root: self.work_dir.clone(),
            context: self.context.clone(),
            drain: PollPolicy::new(interval, Duration::from_secs(self.drain_timeout_secs)),
            bind: PollPolicy::new(interval, Duration::from_secs(self.bind_timeout_secs)),
            ..Default::default()
        })
    }

    fn run_context(&self) -> Result<RunContext> {
        let namespace = self
            .namespace
            .clone()
            .ok_or_else(|| Error::Validation("--namespace is required".into()))?;
        RunContext::new(&self.config()?, namespace, self.access_mode, self.mounter)
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let command = args.command.unwrap_or(Command::Migrate);

    let ctx = match args.run_context() {
        Ok(ctx) => ctx,
        Err(e) => return fatal(&e, None),
    };

    // Inspect changes nothing, so it leaves no run log behind
    let run_log = (command != Command::Inspect).then_some(&ctx);
    let _guard = match init_logging(&args, run_log) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("FATAL: failed to set up logging: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    info!("Starting PVC Mode Migrator");
    info!("  Version: {}", pvc_mode_migrator::VERSION);
    info!("  Command: {:?}", command);
    info!("  Namespace: {}", ctx.namespace());
    info!("  Storage class: {}", ctx.storage_class());
    info!("  Target: {} / {}", ctx.access_mode(), ctx.mounter());
    info!("  Work dir: {}", ctx.work_dir().display());

    let cancel = ctx.cancel_token().clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping at the next wait");
            cancel.cancel();
        }
    });

    match execute(command, &ctx, args.context.as_deref()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => fatal(&e, Some(&ctx)),
    }
}

async fn execute(command: Command, ctx: &RunContext, context: Option<&str>) -> Result<()> {
    let cluster = Arc::new(KubeCluster::connect(context).await?);
    let store = Arc::new(FsManifestStore::new(ctx.backup_dir()));
    let orchestrator = Orchestrator::new(cluster, store);

    match command {
        Command::Migrate => {
            let summary = orchestrator.run(ctx).await?;
            info!(
                converted = ?summary.converted,
                skipped = ?summary.skipped,
                workloads = summary.workloads,
                "Run finished"
            );
        }
        Command::Resume => {
            let snapshot = orchestrator.resume(ctx).await?;
            info!(workloads = snapshot.len(), "Workloads resumed");
        }
        Command::Inspect => {
            let reports = orchestrator.inspect(ctx).await?;
            println!("{}", serde_json::to_string_pretty(&reports)?);
        }
    }
    Ok(())
}

/// Report a fatal error and pick the exit status
fn fatal(e: &Error, ctx: Option<&RunContext>) -> ExitCode {
    error!(error = %e, class = ?e.class(), "Run aborted");
    eprintln!("FATAL: {}", e);

    if e.is_data_at_risk() {
        if let Some(ctx) = ctx {
            eprintln!(
                "FATAL: the claim was deleted and not rebound. Its volume is kept with reclaim policy Retain."
            );
            eprintln!(
                "FATAL: recreate it from the manifests in {}, then run `resume` for namespace {}.",
                ctx.backup_dir().display(),
                ctx.namespace()
            );
        }
    }
    ExitCode::from(e.exit_code())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args, run_log: Option<&RunContext>) -> anyhow::Result<Option<WorkerGuard>> {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("hyper=warn".parse()?)
        .add_directive("kube=info".parse()?)
        .add_directive("tower=warn".parse()?);

    let stderr_layer = if args.log_json {
        fmt::layer().json().with_writer(std::io::stderr).boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed()
    };

    let (file_layer, guard) = match run_log {
        Some(ctx) => {
            std::fs::create_dir_all(ctx.work_dir()).with_context(|| {
                format!("failed to create work dir {}", ctx.work_dir().display())
            })?;
            let appender = tracing_appender::rolling::never(ctx.work_dir(), ctx.log_file_name());
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .context("failed to install tracing subscriber")?;

    Ok(guard)
}
