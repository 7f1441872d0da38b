//! Interfaces of the platform services the pipeline drives

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::changes::ChangeType;
use crate::error::Result;
use crate::vcs::TokenStore;

/// Identity used when the PR author has no platform account.
pub const SYSTEM_BOT_ID: i64 = 1;
pub const SYSTEM_BOT_EMAIL: &str = "support@gitops.local";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub name: String,
}

impl User {
    pub fn system_bot() -> Self {
        Self {
            id: SYSTEM_BOT_ID,
            email: SYSTEM_BOT_EMAIL.to_string(),
            name: "GitOps Bot".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    pub id: String,
    pub title: String,
    pub order: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Database {
    pub name: String,
    pub instance: String,
    pub environment: String,
    pub project_id: String,
    pub engine: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub project_id: String,
    pub actor_id: i64,
    pub method: String,
    pub resource: String,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Sheet {
    pub id: i64,
    pub name: String,
}

/// Target of a change spec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum ChangeTarget {
    Database(String),
    DatabaseGroup(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeSpec {
    pub sheet: String,
    pub target: ChangeTarget,
    pub change_type: ChangeType,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanStep {
    pub title: String,
    pub specs: Vec<ChangeSpec>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanCreate {
    pub title: String,
    pub description: String,
    pub steps: Vec<PlanStep>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Plan {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Issue {
    pub id: i64,
    pub name: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rollout {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AdviceStatus {
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Advice {
    pub status: AdviceStatus,
    pub title: String,
    pub content: String,
    /// 1-based line of the statement, 0 when unknown
    pub line: usize,
}

#[derive(Debug, Clone)]
pub struct ReviewRequest<'a> {
    pub statement: &'a str,
    pub change_type: ChangeType,
    pub database: &'a Database,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewResult {
    pub status: AdviceStatus,
    pub advices: Vec<Advice>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReleaseFile {
    pub path: String,
    pub version: String,
    pub change_type: ChangeType,
    pub sheet: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReleaseCreate {
    pub title: String,
    pub files: Vec<ReleaseFile>,
    pub vcs_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Release {
    pub id: i64,
    pub name: String,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>>;
    async fn list_environments(&self) -> Result<Vec<Environment>>;
    async fn list_databases(&self, project_id: &str) -> Result<Vec<Database>>;
    async fn append_audit_log(&self, entry: &AuditEntry) -> Result<()>;
}

#[async_trait]
pub trait SheetService: Send + Sync {
    async fn create_sheet(
        &self,
        project_id: &str,
        title: &str,
        content: &str,
        creator: &User,
    ) -> Result<Sheet>;
}

#[async_trait]
pub trait PlanService: Send + Sync {
    async fn create_plan(&self, project_id: &str, plan: &PlanCreate, creator: &User)
    -> Result<Plan>;
}

#[async_trait]
pub trait IssueService: Send + Sync {
    async fn create_issue(
        &self,
        project_id: &str,
        plan: &Plan,
        title: &str,
        description: &str,
        creator: &User,
    ) -> Result<Issue>;
}

#[async_trait]
pub trait RolloutService: Send + Sync {
    async fn create_rollout(&self, project_id: &str, plan: &Plan, creator: &User)
    -> Result<Rollout>;
}

#[async_trait]
pub trait SqlReviewService: Send + Sync {
    async fn check(&self, request: ReviewRequest<'_>) -> Result<ReviewResult>;
}

#[async_trait]
pub trait ReleaseService: Send + Sync {
    async fn create_release(
        &self,
        project_id: &str,
        release: &ReleaseCreate,
        creator: &User,
    ) -> Result<Release>;
}

/// The services a webhook request may call into.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn Store>,
    pub tokens: Arc<dyn TokenStore>,
    pub sheets: Arc<dyn SheetService>,
    pub plans: Arc<dyn PlanService>,
    pub issues: Arc<dyn IssueService>,
    pub rollouts: Arc<dyn RolloutService>,
    pub reviewer: Arc<dyn SqlReviewService>,
    pub releases: Arc<dyn ReleaseService>,
}
