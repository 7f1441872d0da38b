#![allow(dead_code)]

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tower::ServiceExt;

use vcs_gitops::advisor::RuleAdvisor;
use vcs_gitops::config::{GitOpsConfig, parse_config};
use vcs_gitops::db::{SqlStore, init_memory_db};
use vcs_gitops::job::{Job, JobQueue, JobStatus};
use vcs_gitops::logging::RecentLogs;
use vcs_gitops::services::Collaborators;
use vcs_gitops::vcs::ProviderRegistry;
use vcs_gitops::{AppState, api};

pub const WEBHOOK_SECRET: &str = "s3cret";
pub const EXTERNAL_URL: &str = "https://db.example.com";

pub struct TestApp {
    pub router: Router,
    pub store: SqlStore,
}

/// One provider, project `hr` with connector `main` watching `main` under `migrations/`,
/// and two environments with one database each.
pub fn config(vcs_type: &str, instance_url: &str, repo_id: &str, web_url: &str, merge_action: &str) -> GitOpsConfig {
    let toml = format!(
        r#"
[server]
external_url = "{EXTERNAL_URL}"
release_workers = 1
release_queue_capacity = 4

[workspace]
id = "ws1"

[[vcs_provider]]
id = "vcs"
type = "{vcs_type}"
instance_url = "{instance_url}"
access_token = "token"

[[project]]
id = "hr"
title = "HR"

[[project.connector]]
id = "main"
vcs_provider = "vcs"
external_repo_id = "{repo_id}"
web_url = "{web_url}"
branch = "main"
base_directory = "migrations"
webhook_secret = "{WEBHOOK_SECRET}"
merge_action = "{merge_action}"

[[environment]]
id = "prod"
title = "Production"
order = 2

[[environment]]
id = "test"
title = "Test"
order = 1

[[database]]
name = "hr"
instance = "mysql-prod"
environment = "prod"
project = "hr"

[[database]]
name = "hr_test"
instance = "mysql-test"
environment = "test"
project = "hr"

[[user]]
email = "jdoe@example.com"
name = "John Doe"
"#
    );
    parse_config(&toml).unwrap()
}

pub async fn spawn_app(config: GitOpsConfig) -> TestApp {
    let store = SqlStore::new(init_memory_db().await.unwrap());
    store.sync_catalog(&config).await.unwrap();

    let shared = Arc::new(store.clone());
    let services = Collaborators {
        store: shared.clone(),
        tokens: shared.clone(),
        sheets: shared.clone(),
        plans: shared.clone(),
        issues: shared.clone(),
        rollouts: shared.clone(),
        reviewer: Arc::new(RuleAdvisor::new().unwrap()),
        releases: shared,
    };
    let jobs = JobQueue::start(
        store.clone(),
        config.server.release_workers,
        config.server.release_queue_capacity,
    );

    let state = Arc::new(AppState {
        config,
        registry: ProviderRegistry::with_defaults(),
        services,
        jobs,
        http: reqwest::Client::new(),
        recent_logs: Arc::new(Mutex::new(RecentLogs::default())),
        start_time: Instant::now(),
    });

    TestApp {
        router: api::router(state),
        store,
    }
}

pub async fn post(app: &TestApp, uri: &str, headers: &[(&str, &str)], body: Vec<u8>) -> (StatusCode, String) {
    let mut request = Request::builder().method("POST").uri(uri);
    for (name, value) in headers {
        request = request.header(*name, *value);
    }
    send(app, request.body(Body::from(body)).unwrap()).await
}

pub async fn get(app: &TestApp, uri: &str) -> (StatusCode, String) {
    send(app, Request::builder().uri(uri).body(Body::empty()).unwrap()).await
}

async fn send(app: &TestApp, request: Request<Body>) -> (StatusCode, String) {
    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

/// Polls the job ledger until the job leaves the queued and running states.
pub async fn wait_for_job(store: &SqlStore, id: &str) -> Job {
    for _ in 0..100 {
        let job = store.get_job(id).await.unwrap().unwrap();
        if matches!(job.status, JobStatus::Success | JobStatus::Failed) {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("job {id} did not finish");
}
