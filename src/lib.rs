pub mod advisor;
pub mod api;
pub mod changes;
pub mod comment;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod job;
pub mod logging;
pub mod services;
pub mod vcs;
pub mod webhook;

use std::sync::{Arc, Mutex};
use std::time::Instant;

use config::GitOpsConfig;
use job::JobQueue;
use logging::RecentLogs;
use services::Collaborators;
use vcs::ProviderRegistry;

pub struct AppState {
    pub config: GitOpsConfig,
    pub registry: ProviderRegistry,
    pub services: Collaborators,
    pub jobs: JobQueue,
    /// Shared by every provider built for a request
    pub http: reqwest::Client,
    pub recent_logs: Arc<Mutex<RecentLogs>>,
    pub start_time: Instant,
}

pub type SharedState = Arc<AppState>;
