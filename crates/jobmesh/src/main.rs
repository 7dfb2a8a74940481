mod bootstrap;

use bootstrap::BootstrapFile;
use clap::{Args, Parser, Subcommand, ValueEnum};
use jobmesh_mesos::{
    ClusterState, FrameworkConfig, HttpSchedulerDriver, SchedulerDriver, StateClient,
    StateClientConfig,
};
use jobmesh_scheduler::{
    AppConstraint, FacadeService, FirstFitAssigner, LaunchConfig, OfferBuffer, QueueConfig,
    ReconcileConfig, ReconcileService, SchedulerEngine, TaskAssigner, TaskLauncher,
    TaskStatistics, TraceEventBus,
};
use jobmesh_storage::{KVStore, RedbBackend};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "jobmesh", about = "Jobmesh cloud job scheduler")]
struct Cli {
    /// Log output format
    #[arg(long, value_enum, default_value = "text", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler against a resource manager master
    Run(RunArgs),
    /// Load apps and jobs from a YAML bootstrap file into the store
    ///
    /// The data file is locked while `run` is active, so stop the scheduler
    /// before importing. Jobs listed under `trigger` are queued once per
    /// import; there is no recurring trigger.
    Import {
        /// Path to the redb database file
        #[arg(long, default_value = "./jobmesh.redb")]
        data_dir: PathBuf,
        /// YAML file with `apps`, `jobs` and `trigger` lists
        file: PathBuf,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Master URL, e.g. http://127.0.0.1:5050
    #[arg(long, env = "JOBMESH_MASTER", default_value = "http://127.0.0.1:5050")]
    master: String,
    /// Path to the redb database file
    #[arg(long, default_value = "./jobmesh.redb")]
    data_dir: PathBuf,
    #[arg(long, default_value = "jobmesh")]
    framework_name: String,
    /// User tasks run as on the agents
    #[arg(long, default_value = "")]
    user: String,
    #[arg(long)]
    role: Option<String>,
    /// Hostname reported to the master
    #[arg(long)]
    hostname: Option<String>,
    #[arg(long, default_value_t = 10)]
    launch_interval_secs: u64,
    #[arg(long, default_value_t = 600)]
    reconcile_interval_secs: u64,
    #[arg(long)]
    disable_reconcile: bool,
    /// Port of the agents' state endpoint
    #[arg(long, default_value_t = 5051)]
    agent_state_port: u16,
    /// Timeout of calls to the master and agents
    #[arg(long, default_value_t = 10_000)]
    http_timeout_ms: u64,
    /// Maximum entries in the ready and failover queues
    #[arg(long, default_value_t = 10_000)]
    job_state_queue_size: usize,
    /// YAML bootstrap file imported before scheduling starts; its `trigger`
    /// jobs are queued once per start
    #[arg(long)]
    bootstrap: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    match cli.log_format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }

    match cli.command {
        Commands::Run(args) => run_scheduler(args).await,
        Commands::Import { data_dir, file } => run_import(&data_dir, &file),
    }
}

/// Import a bootstrap file and exit
fn run_import(data_dir: &std::path::Path, file: &std::path::Path) -> miette::Result<()> {
    let facade = open_facade(data_dir, QueueConfig::default())?;
    BootstrapFile::load(file)?.apply(&facade)?;
    Ok(())
}

/// Run the driver, event engine, launch cycle and reconciliation loop
async fn run_scheduler(args: RunArgs) -> miette::Result<()> {
    info!("Starting jobmesh scheduler against {}", args.master);

    let facade = Arc::new(open_facade(
        &args.data_dir,
        QueueConfig {
            job_state_queue_size: args.job_state_queue_size,
        },
    )?);
    facade
        .start()
        .map_err(|e| miette::miette!("Failed to load running tasks: {}", e))?;

    if let Some(path) = &args.bootstrap {
        BootstrapFile::load(path)?.apply(&facade)?;
    }
    facade
        .bootstrap_daemon_jobs()
        .map_err(|e| miette::miette!("Failed to queue daemon jobs: {}", e))?;

    let framework_id = facade
        .registry()
        .framework_id()
        .map_err(|e| miette::miette!("Failed to read framework id: {}", e))?;
    if let Some(id) = &framework_id {
        info!(framework_id = %id, "Resuming framework");
    }

    let http_timeout = Duration::from_millis(args.http_timeout_ms);
    let driver = Arc::new(
        HttpSchedulerDriver::new(
            FrameworkConfig {
                master_url: args.master.clone(),
                name: args.framework_name.clone(),
                user: args.user.clone(),
                role: args.role.clone(),
                hostname: args.hostname.clone(),
                request_timeout: http_timeout,
                ..FrameworkConfig::default()
            },
            framework_id.clone(),
        )
        .map_err(|e| miette::miette!("Failed to create scheduler driver: {}", e))?,
    );

    let mut state_client = StateClient::new(StateClientConfig {
        master_url: args.master.clone(),
        agent_state_port: args.agent_state_port,
        timeout: http_timeout,
    })
    .map_err(|e| miette::miette!("Failed to create state client: {}", e))?;
    if let Some(id) = framework_id {
        state_client = state_client.with_framework_id(id);
    }
    let cluster_state: Arc<dyn ClusterState> = Arc::new(state_client);

    let scheduler_driver: Arc<dyn SchedulerDriver> = driver.clone();
    let offers = Arc::new(OfferBuffer::new());
    let assigner: Arc<dyn TaskAssigner> = Arc::new(FirstFitAssigner::default());
    let constraint = Arc::new(AppConstraint::new(facade.registry().clone()));
    let events = TraceEventBus::default();
    let statistics = Arc::new(TaskStatistics::new());

    let token = CancellationToken::new();
    let (event_tx, event_rx) = mpsc::channel(1024);

    // 1. Subscription stream
    let driver_token = token.clone();
    let driver_handle = tokio::spawn({
        let driver = driver.clone();
        async move {
            if let Err(e) = driver.run(event_tx, driver_token).await {
                error!("Scheduler driver error: {}", e);
            }
        }
    });

    // 2. Event engine
    let engine = SchedulerEngine::new(
        facade.clone(),
        offers.clone(),
        assigner.clone(),
        scheduler_driver.clone(),
        cluster_state.clone(),
        events.clone(),
        statistics.clone(),
    );
    let engine_token = token.clone();
    let engine_handle = tokio::spawn(async move { engine.run(event_rx, engine_token).await });

    // 3. Launch cycle
    let launcher = TaskLauncher::new(
        facade.clone(),
        offers,
        assigner,
        constraint,
        cluster_state,
        scheduler_driver.clone(),
        events,
        LaunchConfig {
            interval: Duration::from_secs(args.launch_interval_secs),
            ..LaunchConfig::default()
        },
    );
    let launcher_token = token.clone();
    let launcher_handle = tokio::spawn(async move { launcher.run(launcher_token).await });

    // 4. Reconciliation
    let reconcile = ReconcileService::new(
        facade.clone(),
        scheduler_driver,
        ReconcileConfig {
            interval: Duration::from_secs(args.reconcile_interval_secs),
            enabled: !args.disable_reconcile,
        },
    );
    let reconcile_token = token.clone();
    let reconcile_handle = tokio::spawn(async move { reconcile.run(reconcile_token).await });

    info!("All components started");

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| miette::miette!("Failed to listen for ctrl-c: {}", e))?;

    info!("Shutting down gracefully...");
    token.cancel();

    let shutdown_timeout = Duration::from_secs(5);
    let _ = tokio::time::timeout(shutdown_timeout, async {
        let _ = tokio::join!(launcher_handle, reconcile_handle);
    })
    .await;
    let _ = tokio::time::timeout(shutdown_timeout, async {
        let _ = tokio::join!(engine_handle, driver_handle);
    })
    .await;

    facade.stop();
    let snapshot = statistics.snapshot();
    info!(
        succeeded = snapshot.succeeded,
        failed = snapshot.failed,
        "Shutdown complete"
    );

    Ok(())
}

fn open_facade(data_dir: &std::path::Path, config: QueueConfig) -> miette::Result<FacadeService> {
    let store: Arc<dyn KVStore> = Arc::new(RedbBackend::new(data_dir).map_err(|e| {
        miette::miette!("Failed to open storage at '{}': {}", data_dir.display(), e)
    })?);
    Ok(FacadeService::new(store, config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_import_help_explains_store_lock_and_triggers() {
        let mut cli = Cli::command();
        let import = cli.find_subcommand_mut("import").unwrap();
        let help = import.render_long_help().to_string();

        assert!(help.contains("locked"));
        assert!(help.contains("once"));
    }
}
