mod apply;
mod bus;
mod cache;
mod classify;
mod config;
mod context;
mod domain;
mod error;
mod mail;
mod orchestrator;
mod persistence;
mod worker;

use std::process::ExitCode;
use std::sync::{mpsc, Arc};

use clap::{Parser, Subcommand};

use bus::ProgressBus;
use context::EngineContext;
use domain::JobManifest;
use orchestrator::launcher::{DockerLauncher, ProcessLauncher, WorkerLauncher};
use persistence::sqlite::SqliteStore;
use persistence::Store;

#[derive(Parser)]
#[command(name = "inbox-cleaner", about = "IMAP mailbox cleanup job engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a single worker batch. Reads the manifest from `MANIFEST` and the
    /// database path from `DB_PATH` — never from positional arguments.
    Worker,
    /// Start the long-running engine process: boot recovery, scheduler, and
    /// the orchestrator driver for any running folder jobs.
    Serve,
    /// Manually (re)start the orchestrator driver for one folder job.
    StartJob {
        job_id: i64,
    },
}

fn build_launcher() -> Arc<dyn WorkerLauncher> {
    match std::env::var("DOCKER_WORKER_IMAGE") {
        Ok(image) => {
            let self_name = std::env::var("HOSTNAME").unwrap_or_default();
            Arc::new(DockerLauncher::self_inspect(&self_name, &image))
        }
        Err(_) => Arc::new(ProcessLauncher::new()),
    }
}

fn run_worker_command() -> ExitCode {
    let manifest = match JobManifest::from_env() {
        Ok(m) => m,
        Err(e) => {
            log::error!("worker could not load manifest: {e}");
            return ExitCode::FAILURE;
        }
    };

    let store = match SqliteStore::open(std::path::Path::new(&manifest.db_path)) {
        Ok(s) => s,
        Err(e) => {
            log::error!("worker could not open database at {}: {e}", manifest.db_path);
            return ExitCode::FAILURE;
        }
    };

    let bus = ProgressBus::new();
    match worker::run_worker(&store, &bus, &manifest) {
        Ok(()) => ExitCode::SUCCESS,
        Err(_) => ExitCode::FAILURE,
    }
}

fn run_serve_command(cfg: config::Config) -> ExitCode {
    let store: Arc<dyn Store> = match SqliteStore::open(std::path::Path::new(&cfg.db_path)) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            log::error!("could not open database at {}: {e}", cfg.db_path);
            return ExitCode::FAILURE;
        }
    };

    let ctx = EngineContext::new(store, ProgressBus::new(), build_launcher());

    orchestrator::recovery::recover_running_jobs(Arc::clone(&ctx));

    let scheduler_ctx = Arc::clone(&ctx);
    std::thread::spawn(move || orchestrator::scheduler::scheduler_loop(scheduler_ctx));

    log::info!("engine serving — waiting for Ctrl-C");
    let (tx, rx) = mpsc::channel();
    if let Err(e) = ctrlc::set_handler(move || {
        let _ = tx.send(());
    }) {
        log::warn!("could not install Ctrl-C handler: {e}");
    }
    let _ = rx.recv();
    log::info!("shutting down");
    ExitCode::SUCCESS
}

fn run_start_job_command(cfg: config::Config, job_id: i64) -> ExitCode {
    let store: Arc<dyn Store> = match SqliteStore::open(std::path::Path::new(&cfg.db_path)) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            log::error!("could not open database at {}: {e}", cfg.db_path);
            return ExitCode::FAILURE;
        }
    };
    let ctx = EngineContext::new(store, ProgressBus::new(), build_launcher());
    orchestrator::run_folder_job(ctx, job_id);
    ExitCode::SUCCESS
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Command::Worker => run_worker_command(),
        Command::Serve => match config::load_config() {
            Ok(cfg) => run_serve_command(cfg),
            Err(e) => {
                log::error!("configuration error: {e}");
                ExitCode::FAILURE
            }
        },
        Command::StartJob { job_id } => match config::load_config() {
            Ok(cfg) => run_start_job_command(cfg, job_id),
            Err(e) => {
                log::error!("configuration error: {e}");
                ExitCode::FAILURE
            }
        },
    }
}
