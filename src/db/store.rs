use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqlitePool};
use tracing::info;

use crate::config::GitOpsConfig;
use crate::error::GitOpsError;
use crate::job::{Job, JobStatus};
use crate::services::{
    AuditEntry, Database, Environment, Issue, IssueService, Plan, PlanCreate, PlanService,
    Release, ReleaseCreate, ReleaseService, Rollout, RolloutService, Sheet, SheetService, Store,
    User,
};
use crate::vcs::{Credential, TokenState, TokenStore};

/// SQLite-backed implementation of the platform services and the job ledger
#[derive(Clone)]
pub struct SqlStore {
    pool: SqlitePool,
}

fn db_err(context: &str) -> impl FnOnce(sqlx::Error) -> GitOpsError + '_ {
    move |e| GitOpsError::DatabaseError(format!("{}: {}", context, e))
}

fn parse_time(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

impl SqlStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Upserts the environments, databases and users declared in the config.
    pub async fn sync_catalog(&self, config: &GitOpsConfig) -> Result<(), GitOpsError> {
        for env in &config.environment {
            self.upsert_environment(&Environment {
                id: env.id.clone(),
                title: env.title.clone(),
                order: env.order,
            })
            .await?;
        }
        for db in &config.database {
            self.upsert_database(&Database {
                name: db.name.clone(),
                instance: db.instance.clone(),
                environment: db.environment.clone(),
                project_id: db.project.clone(),
                engine: db.engine.clone(),
            })
            .await?;
        }
        for user in &config.user {
            let name = if user.name.is_empty() { &user.email } else { &user.name };
            self.upsert_user(&user.email, name).await?;
        }
        info!(
            environments = config.environment.len(),
            databases = config.database.len(),
            users = config.user.len(),
            "Catalog synced"
        );
        Ok(())
    }

    pub async fn upsert_environment(&self, env: &Environment) -> Result<(), GitOpsError> {
        sqlx::query(
            r#"
            INSERT INTO environments (id, title, sort_order) VALUES (?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET title = excluded.title, sort_order = excluded.sort_order
            "#,
        )
        .bind(&env.id)
        .bind(&env.title)
        .bind(env.order)
        .execute(&self.pool)
        .await
        .map_err(db_err("Failed to upsert environment"))?;
        Ok(())
    }

    pub async fn upsert_database(&self, db: &Database) -> Result<(), GitOpsError> {
        sqlx::query(
            r#"
            INSERT INTO databases (instance, name, environment, project_id, engine)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(instance, name) DO UPDATE SET
                environment = excluded.environment,
                project_id = excluded.project_id,
                engine = excluded.engine
            "#,
        )
        .bind(&db.instance)
        .bind(&db.name)
        .bind(&db.environment)
        .bind(&db.project_id)
        .bind(&db.engine)
        .execute(&self.pool)
        .await
        .map_err(db_err("Failed to upsert database"))?;
        Ok(())
    }

    pub async fn upsert_user(&self, email: &str, name: &str) -> Result<User, GitOpsError> {
        sqlx::query(
            r#"
            INSERT INTO users (email, name) VALUES (?, ?)
            ON CONFLICT(email) DO UPDATE SET name = excluded.name
            "#,
        )
        .bind(email)
        .bind(name)
        .execute(&self.pool)
        .await
        .map_err(db_err("Failed to upsert user"))?;

        self.get_user_by_email(email).await?.ok_or_else(|| {
            GitOpsError::DatabaseError(format!("User {} missing after upsert", email))
        })
    }

    pub async fn count_audit_entries(&self, project_id: &str) -> Result<i64, GitOpsError> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM audit_log WHERE project_id = ?")
            .bind(project_id)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err("Failed to count audit entries"))?;
        Ok(count.0)
    }

    /// Create a new job record
    pub async fn create_job(&self, job: &Job) -> Result<(), GitOpsError> {
        sqlx::query(
            r#"
            INSERT INTO jobs (id, kind, project_id, pr_url, status, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job.id)
        .bind(&job.kind)
        .bind(&job.project_id)
        .bind(&job.pr_url)
        .bind(job.status.as_str())
        .bind(job.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(db_err("Failed to create job"))?;
        Ok(())
    }

    pub async fn update_job_status(&self, id: &str, status: JobStatus) -> Result<(), GitOpsError> {
        let started_at = (status == JobStatus::Running).then(|| Utc::now().to_rfc3339());
        sqlx::query("UPDATE jobs SET status = ?, started_at = COALESCE(?, started_at) WHERE id = ?")
            .bind(status.as_str())
            .bind(started_at)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err("Failed to update job status"))?;
        Ok(())
    }

    /// Records the final state of a job (success or failure)
    pub async fn complete_job(&self, job: &Job) -> Result<(), GitOpsError> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = ?,
                output = ?,
                output_truncated = ?,
                error = ?,
                started_at = COALESCE(?, started_at),
                completed_at = ?,
                duration_ms = ?
            WHERE id = ?
            "#,
        )
        .bind(job.status.as_str())
        .bind(&job.output)
        .bind(job.output_truncated)
        .bind(&job.error)
        .bind(job.started_at.map(|dt| dt.to_rfc3339()))
        .bind(job.completed_at.map(|dt| dt.to_rfc3339()))
        .bind(job.duration_ms())
        .bind(&job.id)
        .execute(&self.pool)
        .await
        .map_err(db_err("Failed to complete job"))?;
        Ok(())
    }

    pub async fn get_job(&self, id: &str) -> Result<Option<Job>, GitOpsError> {
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            SELECT id, kind, project_id, pr_url, status, created_at,
                   started_at, completed_at, output, output_truncated, error
            FROM jobs
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err("Failed to fetch job"))?;

        Ok(row.map(Job::from))
    }

    /// Most recent jobs first, optionally limited to one project
    pub async fn get_recent_jobs(
        &self,
        project_id: Option<&str>,
        limit: i64,
    ) -> Result<Vec<Job>, GitOpsError> {
        let rows = sqlx::query_as::<_, JobRow>(
            r#"
            SELECT id, kind, project_id, pr_url, status, created_at,
                   started_at, completed_at, output, output_truncated, error
            FROM jobs
            WHERE (?1 IS NULL OR project_id = ?1)
            ORDER BY created_at DESC
            LIMIT ?2
            "#,
        )
        .bind(project_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("Failed to fetch recent jobs"))?;

        Ok(rows.into_iter().map(Job::from).collect())
    }

    pub async fn get_issue(&self, id: i64) -> Result<Option<(Issue, i64)>, GitOpsError> {
        let row: Option<(i64, String, String, i64)> =
            sqlx::query_as("SELECT id, project_id, title, plan_id FROM issues WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err("Failed to fetch issue"))?;
        Ok(row.map(|(id, project, title, plan_id)| {
            (
                Issue {
                    id,
                    name: format!("projects/{}/issues/{}", project, id),
                    title,
                },
                plan_id,
            )
        }))
    }

    /// JSON steps of a stored plan
    pub async fn get_plan_steps(&self, id: i64) -> Result<Option<serde_json::Value>, GitOpsError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT steps FROM plans WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err("Failed to fetch plan"))?;
        row.map(|(steps,)| serde_json::from_str(&steps))
            .transpose()
            .map_err(|e| GitOpsError::DatabaseError(format!("Corrupt plan steps: {}", e)))
    }

    /// JSON files of a stored release
    pub async fn get_release_files(
        &self,
        id: i64,
    ) -> Result<Option<serde_json::Value>, GitOpsError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT files FROM releases WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err("Failed to fetch release"))?;
        row.map(|(files,)| serde_json::from_str(&files))
            .transpose()
            .map_err(|e| GitOpsError::DatabaseError(format!("Corrupt release files: {}", e)))
    }

    fn to_json<T: serde::Serialize>(value: &T) -> Result<String, GitOpsError> {
        serde_json::to_string(value)
            .map_err(|e| GitOpsError::DatabaseError(format!("Failed to encode JSON: {}", e)))
    }
}

#[async_trait]
impl Store for SqlStore {
    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, GitOpsError> {
        let row: Option<(i64, String, String)> =
            sqlx::query_as("SELECT id, email, name FROM users WHERE email = ? COLLATE NOCASE")
                .bind(email)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err("Failed to fetch user"))?;
        Ok(row.map(|(id, email, name)| User { id, email, name }))
    }

    async fn list_environments(&self) -> Result<Vec<Environment>, GitOpsError> {
        let rows: Vec<(String, String, i64)> =
            sqlx::query_as("SELECT id, title, sort_order FROM environments ORDER BY sort_order, id")
                .fetch_all(&self.pool)
                .await
                .map_err(db_err("Failed to list environments"))?;
        Ok(rows
            .into_iter()
            .map(|(id, title, order)| Environment { id, title, order })
            .collect())
    }

    async fn list_databases(&self, project_id: &str) -> Result<Vec<Database>, GitOpsError> {
        let rows: Vec<(String, String, String, String, String)> = sqlx::query_as(
            r#"
            SELECT name, instance, environment, project_id, engine
            FROM databases
            WHERE project_id = ?
            ORDER BY instance, name
            "#,
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("Failed to list databases"))?;
        Ok(rows
            .into_iter()
            .map(|(name, instance, environment, project_id, engine)| Database {
                name,
                instance,
                environment,
                project_id,
                engine,
            })
            .collect())
    }

    async fn append_audit_log(&self, entry: &AuditEntry) -> Result<(), GitOpsError> {
        sqlx::query(
            r#"
            INSERT INTO audit_log (project_id, actor_id, method, resource, payload, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.project_id)
        .bind(entry.actor_id)
        .bind(&entry.method)
        .bind(&entry.resource)
        .bind(entry.payload.to_string())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(db_err("Failed to append audit log"))?;
        Ok(())
    }
}

#[async_trait]
impl TokenStore for SqlStore {
    async fn load_token(&self, provider_id: &str) -> Result<Option<TokenState>, GitOpsError> {
        let row: Option<(Option<String>, String, Option<String>, Option<String>)> = sqlx::query_as(
            r#"
            SELECT username, access_token, refresh_token, expires_at
            FROM vcs_tokens
            WHERE provider_id = ?
            "#,
        )
        .bind(provider_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err("Failed to load VCS token"))?;

        Ok(row.map(|(username, access_token, refresh_token, expires_at)| {
            let credential = match username {
                Some(username) => Credential::Basic {
                    username,
                    password: access_token,
                },
                None => Credential::Bearer(access_token),
            };
            TokenState {
                credential,
                refresh_token,
                expires_at: expires_at.as_deref().and_then(parse_time),
            }
        }))
    }

    async fn save_token(&self, provider_id: &str, token: &TokenState) -> Result<(), GitOpsError> {
        let username = match &token.credential {
            Credential::Basic { username, .. } => Some(username.as_str()),
            Credential::Bearer(_) => None,
        };
        sqlx::query(
            r#"
            INSERT INTO vcs_tokens (provider_id, username, access_token, refresh_token, expires_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(provider_id) DO UPDATE SET
                username = excluded.username,
                access_token = excluded.access_token,
                refresh_token = excluded.refresh_token,
                expires_at = excluded.expires_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(provider_id)
        .bind(username)
        .bind(token.access_token())
        .bind(&token.refresh_token)
        .bind(token.expires_at.map(|dt| dt.to_rfc3339()))
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(db_err("Failed to save VCS token"))?;
        Ok(())
    }
}

#[async_trait]
impl SheetService for SqlStore {
    async fn create_sheet(
        &self,
        project_id: &str,
        title: &str,
        content: &str,
        creator: &User,
    ) -> Result<Sheet, GitOpsError> {
        let result = sqlx::query(
            r#"
            INSERT INTO sheets (project_id, title, content, creator_id, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(project_id)
        .bind(title)
        .bind(content)
        .bind(creator.id)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(db_err("Failed to create sheet"))?;

        let id = result.last_insert_rowid();
        Ok(Sheet {
            id,
            name: format!("projects/{}/sheets/{}", project_id, id),
        })
    }
}

#[async_trait]
impl PlanService for SqlStore {
    async fn create_plan(
        &self,
        project_id: &str,
        plan: &PlanCreate,
        creator: &User,
    ) -> Result<Plan, GitOpsError> {
        let result = sqlx::query(
            r#"
            INSERT INTO plans (project_id, title, description, steps, creator_id, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(project_id)
        .bind(&plan.title)
        .bind(&plan.description)
        .bind(Self::to_json(&plan.steps)?)
        .bind(creator.id)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(db_err("Failed to create plan"))?;

        let id = result.last_insert_rowid();
        Ok(Plan {
            id,
            name: format!("projects/{}/plans/{}", project_id, id),
        })
    }
}

#[async_trait]
impl IssueService for SqlStore {
    async fn create_issue(
        &self,
        project_id: &str,
        plan: &Plan,
        title: &str,
        description: &str,
        creator: &User,
    ) -> Result<Issue, GitOpsError> {
        let result = sqlx::query(
            r#"
            INSERT INTO issues (project_id, plan_id, title, description, creator_id, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(project_id)
        .bind(plan.id)
        .bind(title)
        .bind(description)
        .bind(creator.id)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(db_err("Failed to create issue"))?;

        let id = result.last_insert_rowid();
        Ok(Issue {
            id,
            name: format!("projects/{}/issues/{}", project_id, id),
            title: title.to_string(),
        })
    }
}

#[async_trait]
impl RolloutService for SqlStore {
    async fn create_rollout(
        &self,
        project_id: &str,
        plan: &Plan,
        creator: &User,
    ) -> Result<Rollout, GitOpsError> {
        let result = sqlx::query(
            "INSERT INTO rollouts (project_id, plan_id, creator_id, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(project_id)
        .bind(plan.id)
        .bind(creator.id)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(db_err("Failed to create rollout"))?;

        let id = result.last_insert_rowid();
        Ok(Rollout {
            id,
            name: format!("projects/{}/rollouts/{}", project_id, id),
        })
    }
}

#[async_trait]
impl ReleaseService for SqlStore {
    async fn create_release(
        &self,
        project_id: &str,
        release: &ReleaseCreate,
        creator: &User,
    ) -> Result<Release, GitOpsError> {
        let result = sqlx::query(
            r#"
            INSERT INTO releases (project_id, title, files, vcs_url, creator_id, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(project_id)
        .bind(&release.title)
        .bind(Self::to_json(&release.files)?)
        .bind(&release.vcs_url)
        .bind(creator.id)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(db_err("Failed to create release"))?;

        let id = result.last_insert_rowid();
        Ok(Release {
            id,
            name: format!("projects/{}/releases/{}", project_id, id),
        })
    }
}

// Helper struct to map DB row to Job struct
#[derive(FromRow)]
struct JobRow {
    id: String,
    kind: String,
    project_id: String,
    pr_url: String,
    status: String,
    created_at: String,
    started_at: Option<String>,
    completed_at: Option<String>,
    output: Option<String>,
    output_truncated: Option<bool>,
    error: Option<String>,
}

impl From<JobRow> for Job {
    fn from(row: JobRow) -> Self {
        Job {
            id: row.id,
            kind: row.kind,
            project_id: row.project_id,
            pr_url: row.pr_url,
            status: JobStatus::parse(&row.status),
            created_at: parse_time(&row.created_at).unwrap_or_else(Utc::now),
            started_at: row.started_at.as_deref().and_then(parse_time),
            completed_at: row.completed_at.as_deref().and_then(parse_time),
            output: row.output,
            output_truncated: row.output_truncated.unwrap_or(false),
            error: row.error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changes::ChangeType;
    use crate::db::init_memory_db;
    use crate::services::{ChangeSpec, ChangeTarget, PlanStep, ReleaseFile, SYSTEM_BOT_EMAIL};

    async fn store() -> SqlStore {
        SqlStore::new(init_memory_db().await.unwrap())
    }

    #[tokio::test]
    async fn system_bot_is_seeded() {
        let store = store().await;
        let bot = store.get_user_by_email(SYSTEM_BOT_EMAIL).await.unwrap().unwrap();
        assert_eq!(bot, User::system_bot());
        assert!(store.get_user_by_email("nobody@acme.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn user_lookup_ignores_case() {
        let store = store().await;
        let jane = store.upsert_user("jane@acme.com", "Jane").await.unwrap();
        let found = store.get_user_by_email("Jane@Acme.com").await.unwrap().unwrap();
        assert_eq!(found.id, jane.id);
    }

    #[tokio::test]
    async fn environments_are_ordered() {
        let store = store().await;
        for (id, order) in [("prod", 2), ("test", 1)] {
            store
                .upsert_environment(&Environment {
                    id: id.into(),
                    title: id.to_uppercase(),
                    order,
                })
                .await
                .unwrap();
        }
        let envs = store.list_environments().await.unwrap();
        assert_eq!(
            envs.iter().map(|e| e.id.as_str()).collect::<Vec<_>>(),
            ["test", "prod"]
        );
    }

    #[tokio::test]
    async fn databases_are_scoped_to_project() {
        let store = store().await;
        store
            .upsert_environment(&Environment {
                id: "prod".into(),
                title: "Prod".into(),
                order: 0,
            })
            .await
            .unwrap();
        for (name, project) in [("hr", "hr"), ("billing", "finance")] {
            store
                .upsert_database(&Database {
                    name: name.into(),
                    instance: "mysql".into(),
                    environment: "prod".into(),
                    project_id: project.into(),
                    engine: "MYSQL".into(),
                })
                .await
                .unwrap();
        }
        let dbs = store.list_databases("hr").await.unwrap();
        assert_eq!(dbs.len(), 1);
        assert_eq!(dbs[0].name, "hr");
    }

    #[tokio::test]
    async fn tokens_round_trip_and_overwrite() {
        let store = store().await;
        assert!(store.load_token("gl").await.unwrap().is_none());

        let mut token = TokenState::bearer("first");
        token.refresh_token = Some("r1".into());
        store.save_token("gl", &token).await.unwrap();
        token.credential = Credential::Bearer("second".into());
        store.save_token("gl", &token).await.unwrap();

        let loaded = store.load_token("gl").await.unwrap().unwrap();
        assert_eq!(loaded.access_token(), "second");
        assert_eq!(loaded.refresh_token.as_deref(), Some("r1"));

        let basic = TokenState {
            credential: Credential::Basic {
                username: "bot".into(),
                password: "app-password".into(),
            },
            refresh_token: None,
            expires_at: None,
        };
        store.save_token("bb", &basic).await.unwrap();
        assert_eq!(store.load_token("bb").await.unwrap().unwrap(), basic);
    }

    #[tokio::test]
    async fn creates_plan_issue_rollout_and_release() {
        let store = store().await;
        let bot = User::system_bot();
        let sheet = store
            .create_sheet("hr", "[0001] MIGRATE Init", "CREATE TABLE t (id INT);", &bot)
            .await
            .unwrap();
        assert_eq!(sheet.name, format!("projects/hr/sheets/{}", sheet.id));

        let plan = store
            .create_plan(
                "hr",
                &PlanCreate {
                    title: "Init".into(),
                    description: String::new(),
                    steps: vec![PlanStep {
                        title: "Prod".into(),
                        specs: vec![ChangeSpec {
                            sheet: sheet.name.clone(),
                            target: ChangeTarget::Database("mysql/hr".into()),
                            change_type: ChangeType::Migrate,
                            version: "0001".into(),
                        }],
                    }],
                },
                &bot,
            )
            .await
            .unwrap();
        let steps = store.get_plan_steps(plan.id).await.unwrap().unwrap();
        assert_eq!(steps[0]["specs"][0]["target"]["name"], "mysql/hr");

        let issue = store
            .create_issue("hr", &plan, "Init", "from PR", &bot)
            .await
            .unwrap();
        let (stored, plan_id) = store.get_issue(issue.id).await.unwrap().unwrap();
        assert_eq!(stored, issue);
        assert_eq!(plan_id, plan.id);

        let rollout = store.create_rollout("hr", &plan, &bot).await.unwrap();
        assert!(rollout.name.starts_with("projects/hr/rollouts/"));

        let release = store
            .create_release(
                "hr",
                &ReleaseCreate {
                    title: "Init".into(),
                    files: vec![ReleaseFile {
                        path: "migrations/0001_init.sql".into(),
                        version: "0001".into(),
                        change_type: ChangeType::Migrate,
                        sheet: sheet.name,
                    }],
                    vcs_url: "https://github.com/acme/hr/pull/1".into(),
                },
                &bot,
            )
            .await
            .unwrap();
        let files = store.get_release_files(release.id).await.unwrap().unwrap();
        assert_eq!(files[0]["change_type"], "MIGRATE");
    }

    #[tokio::test]
    async fn job_lifecycle_is_persisted() {
        let store = store().await;
        let mut job = Job::new_release("hr".into(), "https://host/pr/1".into());
        store.create_job(&job).await.unwrap();

        job.mark_running();
        store.update_job_status(&job.id, job.status).await.unwrap();
        assert_eq!(
            store.get_job(&job.id).await.unwrap().unwrap().status,
            JobStatus::Running
        );

        job.mark_success("created release".into());
        store.complete_job(&job).await.unwrap();
        let stored = store.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Success);
        assert_eq!(stored.output.as_deref(), Some("created release"));
        assert!(stored.completed_at.is_some());

        assert_eq!(store.get_recent_jobs(Some("hr"), 10).await.unwrap().len(), 1);
        assert!(store.get_recent_jobs(Some("other"), 10).await.unwrap().is_empty());
        assert_eq!(store.get_recent_jobs(None, 10).await.unwrap().len(), 1);
    }
}
