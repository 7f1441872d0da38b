use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{error, info};
use vcs_gitops::advisor::RuleAdvisor;
use vcs_gitops::config::load_config;
use vcs_gitops::db::{SqlStore, init_db};
use vcs_gitops::error::GitOpsError;
use vcs_gitops::job::JobQueue;
use vcs_gitops::logging::{FileLogger, setup_logging};
use vcs_gitops::services::Collaborators;
use vcs_gitops::vcs::ProviderRegistry;
use vcs_gitops::{AppState, api};

const DEFAULT_CONFIG_PATH: &str = "gitops_config.toml";
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();

    let config_path =
        std::env::var("GITOPS_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let mut config = match load_config(&config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };
    if let Ok(bind_address) = std::env::var("BIND_ADDRESS") {
        config.server.bind_address = bind_address;
    }

    let file_logger = config
        .server
        .log_dir
        .as_ref()
        .map(|dir| {
            let logger = FileLogger::new(PathBuf::from(dir));
            match config.server.log_max_files {
                Some(max_files) => logger.with_max_files(max_files),
                None => logger,
            }
        });
    let (recent_logs, _log_guard) = match setup_logging(file_logger.as_ref()) {
        Ok(logging) => logging,
        Err(e) => {
            eprintln!("Logging error: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = run(config, config_path, recent_logs.handle()).await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(
    config: vcs_gitops::config::GitOpsConfig,
    config_path: String,
    recent_logs: Arc<std::sync::Mutex<vcs_gitops::logging::RecentLogs>>,
) -> Result<(), GitOpsError> {
    let pool = init_db(&config.server.database_path).await?;
    let store = SqlStore::new(pool);
    store.sync_catalog(&config).await?;

    let store_arc = Arc::new(store.clone());
    let services = Collaborators {
        store: store_arc.clone(),
        tokens: store_arc.clone(),
        sheets: store_arc.clone(),
        plans: store_arc.clone(),
        issues: store_arc.clone(),
        rollouts: store_arc.clone(),
        reviewer: Arc::new(RuleAdvisor::new()?),
        releases: store_arc,
    };

    let http = reqwest::Client::builder()
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .timeout(HTTP_TIMEOUT)
        .build()
        .map_err(|e| GitOpsError::ConfigError(format!("Failed to build HTTP client: {}", e)))?;

    let jobs = JobQueue::start(
        store,
        config.server.release_workers,
        config.server.release_queue_capacity,
    );

    let bind_address = config.server.bind_address.clone();
    let state = Arc::new(AppState {
        registry: ProviderRegistry::with_defaults(),
        services,
        jobs,
        http,
        recent_logs,
        start_time: Instant::now(),
        config,
    });

    let app = api::router(state);

    info!("Listening on {}", bind_address);
    info!("Using config at {:?}", config_path);
    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
