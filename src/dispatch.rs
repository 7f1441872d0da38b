//! Routes a normalized pull request event to SQL review, issue creation or release creation

use serde_json::json;
use tracing::{error, info, warn};

use crate::changes::{FileChange, humanize_description};
use crate::comment::{COMMENT_PREFIX_BOT, COMMENT_PREFIX_SQL_REVIEW, starts_with, upsert_comment};
use crate::config::ConnectorConfig;
use crate::error::{GitOpsError, Result};
use crate::job::{Job, JobQueue, JobTask};
use crate::services::{
    Advice, AdviceStatus, AuditEntry, ChangeSpec, ChangeTarget, Collaborators, Database,
    PlanCreate, PlanStep, ReleaseCreate, ReleaseFile, ReviewRequest, ReviewResult, Sheet, Store,
    User,
};
use crate::vcs::{VcsProvider, VcsType};
use crate::webhook::{ActionType, ChangeScope, PullRequestEvent, fetch_changes};

/// Findings beyond this count are not reported.
pub const MAX_REVIEW_FINDINGS: usize = 30;

/// Everything one dispatch needs. Owned so a release can outlive the request.
pub struct DispatchRequest {
    pub provider: Box<dyn VcsProvider>,
    pub services: Collaborators,
    pub project_id: String,
    pub connector: ConnectorConfig,
    pub external_url: String,
    pub event: PullRequestEvent,
}

/// Runs the action of `request.event` and returns the webhook response text.
pub async fn dispatch(request: DispatchRequest, queue: &JobQueue) -> String {
    let pr_url = request.event.info.url.clone();
    match request.event.action {
        ActionType::SqlReview => match sql_review(&request).await {
            Ok(message) => message,
            Err(e) => {
                error!(pr = %pr_url, "SQL review failed: {}", e);
                format!("failed to run SQL review: {}", e)
            }
        },
        ActionType::CreateIssue => match create_issue(&request).await {
            Ok(message) => message,
            Err(e) => {
                error!(pr = %pr_url, "Failed to create issue: {}", e);
                format!("failed to create issue: {}", e)
            }
        },
        ActionType::CreateRelease => {
            let job = Job::new_release(request.project_id.clone(), pr_url.clone());
            let task: JobTask = Box::pin(create_release(request));
            match queue.submit(job, task).await {
                Ok(job_id) => format!("release creation scheduled as job {}", job_id),
                Err(e) => {
                    error!(pr = %pr_url, "Failed to schedule release creation: {}", e);
                    format!("failed to schedule release creation: {}", e)
                }
            }
        }
    }
}

/// Looks up the PR author, falling back to the system bot.
pub async fn resolve_user(store: &dyn Store, email: Option<&str>) -> User {
    let Some(email) = email.filter(|e| !e.is_empty()) else {
        return User::system_bot();
    };
    match store.get_user_by_email(email).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            info!("No user with email {}, acting as the system bot", email);
            User::system_bot()
        }
        Err(e) => {
            warn!("Failed to look up user {}: {}, acting as the system bot", email, e);
            User::system_bot()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    pub path: String,
    pub web_url: Option<String>,
    pub advice: Advice,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReviewSummary {
    pub files: usize,
    pub errors: usize,
    pub warnings: usize,
    pub findings: Vec<Finding>,
    pub reached_limit: bool,
}

impl ReviewSummary {
    pub fn passed(&self) -> bool {
        self.findings.is_empty()
    }
}

/// Picks the configured database, or the first one of the project.
pub fn representative_database<'a>(
    databases: &'a [Database],
    preferred: Option<&str>,
) -> Option<&'a Database> {
    match preferred {
        Some(name) => databases.iter().find(|db| db.name == name),
        None => databases.first(),
    }
}

/// Reviews each change in order, stopping once [`MAX_REVIEW_FINDINGS`] is reached.
pub async fn review_changes(
    services: &Collaborators,
    database: &Database,
    changes: &[FileChange],
) -> ReviewSummary {
    let mut summary = ReviewSummary::default();

    'files: for change in changes {
        summary.files += 1;
        let result = services
            .reviewer
            .check(ReviewRequest {
                statement: &change.content,
                change_type: change.change_type,
                database,
            })
            .await
            .unwrap_or_else(|e| {
                warn!(file = %change.path, "SQL review check failed: {}", e);
                ReviewResult {
                    status: AdviceStatus::Warning,
                    advices: vec![Advice {
                        status: AdviceStatus::Warning,
                        title: "Failed to take SQL review".to_string(),
                        content: e.to_string(),
                        line: 0,
                    }],
                }
            });

        for advice in result.advices {
            match advice.status {
                AdviceStatus::Success => continue,
                AdviceStatus::Warning => summary.warnings += 1,
                AdviceStatus::Error => summary.errors += 1,
            }
            summary.findings.push(Finding {
                path: change.path.clone(),
                web_url: change.web_url.clone(),
                advice,
            });
            if summary.findings.len() >= MAX_REVIEW_FINDINGS {
                summary.reached_limit = true;
                break 'files;
            }
        }
    }
    summary
}

fn line_link(vcs_type: VcsType, url: &str, line: usize) -> String {
    if line == 0 {
        return url.to_string();
    }
    match vcs_type {
        VcsType::GitHub | VcsType::GitLab => format!("{}#L{}", url, line),
        VcsType::Bitbucket => format!("{}#lines-{}", url, line),
        VcsType::AzureDevOps => format!("{}&line={}", url, line),
    }
}

fn escape_cell(text: &str) -> String {
    text.replace('|', "\\|").replace(['\r', '\n'], " ")
}

pub fn render_review_report(vcs_type: VcsType, database: &Database, summary: &ReviewSummary) -> String {
    let mut report = format!("{}\n\n", COMMENT_PREFIX_SQL_REVIEW);
    if summary.passed() {
        report.push_str(&format!(
            "All {} files passed the SQL review against `{}` ({}).\n",
            summary.files, database.name, database.environment
        ));
        return report;
    }

    report.push_str(&format!(
        "Reviewed **{}** files against `{}` ({}).\n\n* Errors: **{}**\n* Warnings: **{}**\n\n",
        summary.files, database.name, database.environment, summary.errors, summary.warnings
    ));
    report.push_str("| File | Line | Level | Rule | Detail |\n|---|---|---|---|---|\n");
    for finding in &summary.findings {
        let name = finding.path.rsplit('/').next().unwrap_or(&finding.path);
        let file = match &finding.web_url {
            Some(url) => format!("[{}]({})", name, line_link(vcs_type, url, finding.advice.line)),
            None => name.to_string(),
        };
        let level = match finding.advice.status {
            AdviceStatus::Error => "ERROR",
            AdviceStatus::Warning => "WARNING",
            AdviceStatus::Success => "SUCCESS",
        };
        report.push_str(&format!(
            "| {} | {} | {} | {} | {} |\n",
            file,
            finding.advice.line,
            level,
            escape_cell(&finding.advice.title),
            escape_cell(&finding.advice.content)
        ));
    }
    if summary.reached_limit {
        report.push_str(&format!(
            "\n> Reached the limit of {} findings, remaining statements were not reviewed.\n",
            MAX_REVIEW_FINDINGS
        ));
    }
    report
}

async fn sql_review(request: &DispatchRequest) -> Result<String> {
    let event = &request.event;
    let databases = request
        .services
        .store
        .list_databases(&request.project_id)
        .await?;
    let Some(database) =
        representative_database(&databases, request.connector.database.as_deref())
    else {
        return Ok(format!(
            "skip SQL review, project {} has no database to review against",
            request.project_id
        ));
    };

    let summary = review_changes(&request.services, database, &event.info.changes).await;
    let report = render_review_report(request.provider.vcs_type(), database, &summary);
    // A passing review only refreshes an existing report.
    let create_if_absent = !summary.passed();
    if let Err(e) = upsert_comment(
        request.provider.as_ref(),
        &request.connector.external_repo_id,
        &event.pr_id,
        &report,
        starts_with(COMMENT_PREFIX_SQL_REVIEW),
        create_if_absent,
    )
    .await
    {
        warn!(pr = %event.info.url, "Failed to upsert SQL review comment: {}", e);
    }

    info!(
        pr = %event.info.url,
        errors = summary.errors,
        warnings = summary.warnings,
        "SQL review finished"
    );
    Ok(format!(
        "SQL review finished: {} errors, {} warnings",
        summary.errors, summary.warnings
    ))
}

async fn create_sheets(
    request: &DispatchRequest,
    changes: &[FileChange],
    creator: &User,
) -> Result<Vec<Sheet>> {
    let mut sheets = Vec::with_capacity(changes.len());
    for change in changes {
        let title = format!(
            "[{}] {} {}",
            change.version,
            change.change_type,
            humanize_description(&change.description)
        );
        sheets.push(
            request
                .services
                .sheets
                .create_sheet(&request.project_id, title.trim(), &change.content, creator)
                .await?,
        );
    }
    Ok(sheets)
}

/// One step per database group, or one step per environment in environment order.
pub async fn build_steps(
    services: &Collaborators,
    project_id: &str,
    connector: &ConnectorConfig,
    changes: &[FileChange],
    sheets: &[Sheet],
) -> Result<Vec<PlanStep>> {
    let spec = |change: &FileChange, sheet: &Sheet, target: ChangeTarget| ChangeSpec {
        sheet: sheet.name.clone(),
        target,
        change_type: change.change_type,
        version: change.version.clone(),
    };

    if let Some(group) = &connector.database_group {
        return Ok(vec![PlanStep {
            title: format!("Database group {}", group),
            specs: changes
                .iter()
                .zip(sheets)
                .map(|(change, sheet)| {
                    spec(change, sheet, ChangeTarget::DatabaseGroup(group.clone()))
                })
                .collect(),
        }]);
    }

    let databases: Vec<Database> = services
        .store
        .list_databases(project_id)
        .await?
        .into_iter()
        .filter(|db| connector.database.as_ref().is_none_or(|name| &db.name == name))
        .collect();
    if databases.is_empty() {
        return Err(GitOpsError::ServiceError(format!(
            "project {} has no database to apply changes to",
            project_id
        )));
    }

    let mut environments = services.store.list_environments().await?;
    environments.sort_by_key(|env| env.order);

    let mut steps = Vec::new();
    for environment in environments {
        let targets: Vec<&Database> = databases
            .iter()
            .filter(|db| db.environment == environment.id)
            .collect();
        if targets.is_empty() {
            continue;
        }
        let mut specs = Vec::new();
        for (change, sheet) in changes.iter().zip(sheets) {
            for db in &targets {
                specs.push(spec(
                    change,
                    sheet,
                    ChangeTarget::Database(format!("{}/{}", db.instance, db.name)),
                ));
            }
        }
        steps.push(PlanStep {
            title: environment.title,
            specs,
        });
    }
    Ok(steps)
}

async fn create_issue(request: &DispatchRequest) -> Result<String> {
    let event = &request.event;
    let services = &request.services;
    let creator = resolve_user(services.store.as_ref(), event.info.author_email.as_deref()).await;
    let changes = &event.info.changes;

    let sheets = create_sheets(request, changes, &creator).await?;
    let steps = build_steps(services, &request.project_id, &request.connector, changes, &sheets).await?;
    let description = format!("Created from {}\n\n{}", event.info.url, event.info.description);

    let plan = services
        .plans
        .create_plan(
            &request.project_id,
            &PlanCreate {
                title: event.info.title.clone(),
                description: description.clone(),
                steps,
            },
            &creator,
        )
        .await?;
    let issue = services
        .issues
        .create_issue(&request.project_id, &plan, &event.info.title, &description, &creator)
        .await?;
    // Not transactional: the issue stays if the rollout fails.
    let rollout = services
        .rollouts
        .create_rollout(&request.project_id, &plan, &creator)
        .await
        .map_err(|e| {
            error!(pr = %event.info.url, issue = %issue.name, "Rollout creation failed after issue was created: {}", e);
            e
        })?;

    let issue_url = format!(
        "{}/{}",
        request.external_url.trim_end_matches('/'),
        issue.name
    );
    let audit = AuditEntry {
        project_id: request.project_id.clone(),
        actor_id: creator.id,
        method: "gitops.CreateIssue".to_string(),
        resource: issue.name.clone(),
        payload: json!({
            "pullRequest": event.info.url,
            "plan": plan.name,
            "rollout": rollout.name,
            "files": changes.iter().map(|c| &c.path).collect::<Vec<_>>(),
        }),
    };
    if let Err(e) = services.store.append_audit_log(&audit).await {
        warn!(issue = %issue.name, "Failed to append audit log: {}", e);
    }

    let body = format!(
        "{}\n\nCreated issue [{}]({}) for {} migration files.",
        COMMENT_PREFIX_BOT,
        issue.title,
        issue_url,
        changes.len()
    );
    if let Err(e) = upsert_comment(
        request.provider.as_ref(),
        &request.connector.external_repo_id,
        &event.pr_id,
        &body,
        starts_with(COMMENT_PREFIX_BOT),
        true,
    )
    .await
    {
        warn!(pr = %event.info.url, "Failed to comment issue link: {}", e);
    }

    info!(pr = %event.info.url, issue = %issue.name, "Created issue and rollout");
    Ok(format!("created issue {}", issue_url))
}

/// Release body, run on the job queue.
async fn create_release(request: DispatchRequest) -> Result<String> {
    let event = &request.event;
    let services = &request.services;
    let changes = fetch_changes(
        request.provider.as_ref(),
        &request.connector,
        event,
        ChangeScope::All,
    )
    .await?;
    if changes.is_empty() {
        return Ok(format!("no migration files in {}", event.info.url));
    }

    let creator = resolve_user(services.store.as_ref(), event.info.author_email.as_deref()).await;
    let sheets = create_sheets(&request, &changes, &creator).await?;
    let files = changes
        .iter()
        .zip(&sheets)
        .map(|(change, sheet)| ReleaseFile {
            path: change.path.clone(),
            version: change.version.clone(),
            change_type: change.change_type,
            sheet: sheet.name.clone(),
        })
        .collect();

    let release = services
        .releases
        .create_release(
            &request.project_id,
            &ReleaseCreate {
                title: event.info.title.clone(),
                files,
                vcs_url: event.info.url.clone(),
            },
            &creator,
        )
        .await?;
    let release_url = format!(
        "{}/{}",
        request.external_url.trim_end_matches('/'),
        release.name
    );

    let body = format!(
        "{}\n\nCreated release [{}]({}) with {} migration files.",
        COMMENT_PREFIX_BOT,
        event.info.title,
        release_url,
        changes.len()
    );
    if let Err(e) = upsert_comment(
        request.provider.as_ref(),
        &request.connector.external_repo_id,
        &event.pr_id,
        &body,
        starts_with(COMMENT_PREFIX_BOT),
        true,
    )
    .await
    {
        warn!(pr = %event.info.url, "Failed to comment release link: {}", e);
    }

    Ok(format!("created release {}", release_url))
}
