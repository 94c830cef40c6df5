use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error};

use planstream::config::{build_output_store, Config};
use planstream::engine::Engine;
use planstream::filter::LogFilter;
use planstream::gateway::{Gateway, PathKeyGenerator};
use planstream::store::JobStore;
use planstream::subprocess::{cancellation, CommandSpec, RunRequest, TokioProcessRunner};

/// Run infrastructure automation commands as jobs and stream their output
/// to live viewers.
#[derive(Parser)]
#[command(name = "planstream")]
#[command(about = "Job execution and live output streaming engine", long_about = None)]
struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Path to configuration file
    #[arg(short = 'c', long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the subscription gateway
    Serve {
        /// Bind address override
        #[arg(long)]
        bind: Option<SocketAddr>,
    },
    /// Execute a single command as a job and print its transcript
    Run {
        /// Resolved executable to run
        executable: PathBuf,

        /// Operation token (e.g. plan, apply)
        operation: String,

        /// Working directory for the command
        #[arg(short = 'd', long, default_value = ".")]
        dir: PathBuf,

        /// Key/value argument, key=value; repeatable
        #[arg(long = "arg")]
        args: Vec<String>,

        /// Standalone flag, emitted verbatim; repeatable
        #[arg(long = "flag")]
        flags: Vec<String>,

        /// Trailing positional input
        #[arg(long)]
        input: Option<String>,

        /// Deduplicate argument keys (last write wins)
        #[arg(long)]
        dedupe: bool,

        /// Job id to record the output under
        #[arg(long, default_value = "local")]
        job_id: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .with_target(cli.verbose >= 2)
        .init();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };
    debug!("loaded configuration: {config:?}");

    let result = match cli.command {
        Commands::Serve { bind } => serve(config, bind).await,
        Commands::Run {
            executable,
            operation,
            dir,
            args,
            flags,
            input,
            dedupe,
            job_id,
        } => {
            run_once(
                config, executable, operation, dir, args, flags, input, dedupe, job_id,
            )
            .await
        }
    };

    if let Err(e) = result {
        error!("fatal error: {e}");
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn load_config(path: Option<&std::path::Path>) -> anyhow::Result<Config> {
    match path {
        Some(path) => Config::load(path),
        None => Ok(Config::default()),
    }
}

async fn serve(config: Config, bind: Option<SocketAddr>) -> anyhow::Result<()> {
    let durable = build_output_store(&config.storage).await?;
    let store = Arc::new(JobStore::new(durable));
    let filter = Arc::new(LogFilter::new(&config.filter.patterns)?);
    let engine = Engine::start(Arc::clone(&store), filter, config.runner.intake_capacity);

    let gateway = Arc::new(Gateway::new(
        store,
        engine.registry(),
        Arc::new(PathKeyGenerator),
        config.runner.receiver_capacity,
    ));

    let addr = bind.unwrap_or(config.server.bind);
    gateway.serve(addr).await
}

#[allow(clippy::too_many_arguments)]
async fn run_once(
    config: Config,
    executable: PathBuf,
    operation: String,
    dir: PathBuf,
    args: Vec<String>,
    flags: Vec<String>,
    input: Option<String>,
    dedupe: bool,
    job_id: String,
) -> anyhow::Result<()> {
    let durable = build_output_store(&config.storage).await?;
    let store = Arc::new(JobStore::new(durable));
    let filter = Arc::new(LogFilter::new(&config.filter.patterns)?);
    let engine = Engine::start(Arc::clone(&store), filter, config.runner.intake_capacity);

    let mut command = if dedupe {
        CommandSpec::dedupe(&operation)
    } else {
        CommandSpec::allow_duplicates(&operation)
    };
    for pair in &args {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("--arg must be key=value, got {pair}"))?;
        command = command.arg(key, value);
    }
    for flag in &flags {
        command = command.flag(flag);
    }
    if let Some(input) = &input {
        command = command.input(input);
    }

    let request = RunRequest {
        job_id: job_id.clone(),
        executable,
        working_dir: dir,
        command,
        env: std::env::vars().collect(),
    };

    // Ctrl-C requests graceful cancellation; the runner escalates.
    let (cancel_tx, cancel_rx) = cancellation();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = cancel_tx.send(true);
        }
    });

    let runner = TokioProcessRunner::new(config.runner.grace_period);
    let outcome = engine.execute(&runner, request, cancel_rx).await;

    if let Ok(job) = store.get(&job_id).await {
        for line in &job.output {
            println!("{line}");
        }
    }
    engine.shutdown().await;

    outcome.map_err(Into::into)
}
