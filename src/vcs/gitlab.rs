//! GitLab REST v4 provider

use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use serde_json::json;

use super::{
    API_PAGE_SIZE, BranchInfo, ProviderConfig, PullRequestComment, PullRequestFile, Repository,
    VcsProvider, VcsType, WebhookCreate,
};
use crate::error::VcsError;
use crate::vcs::transport::Transport;

/// Maintainer access is required to manage project hooks.
const MAINTAINER_ACCESS_LEVEL: u32 = 40;

pub fn new_provider(config: ProviderConfig) -> Box<dyn VcsProvider> {
    Box::new(GitLabProvider::new(config))
}

pub struct GitLabProvider {
    api_url: String,
    transport: Transport,
}

impl GitLabProvider {
    pub fn new(config: ProviderConfig) -> Self {
        Self {
            api_url: format!("{}/api/v4", config.instance_url),
            transport: config.transport,
        }
    }

    fn project_url(&self, repo_id: &str) -> String {
        format!("{}/projects/{}", self.api_url, urlencoding::encode(repo_id))
    }
}

#[derive(Deserialize)]
struct GlProject {
    id: i64,
    name: String,
    path_with_namespace: String,
    web_url: String,
}

#[derive(Deserialize)]
struct GlBranch {
    name: String,
    commit: GlCommit,
}

#[derive(Deserialize)]
struct GlCommit {
    id: String,
}

#[derive(Deserialize)]
struct GlMergeRequest {
    sha: Option<String>,
    merge_commit_sha: Option<String>,
}

#[derive(Deserialize)]
struct GlDiff {
    new_path: String,
    #[serde(default)]
    deleted_file: bool,
}

#[derive(Deserialize)]
struct GlNote {
    id: i64,
    #[serde(default)]
    body: String,
    #[serde(default)]
    system: bool,
}

#[derive(Deserialize)]
struct GlHook {
    id: i64,
}

#[async_trait]
impl VcsProvider for GitLabProvider {
    fn vcs_type(&self) -> VcsType {
        VcsType::GitLab
    }

    async fn fetch_all_repository_list(&self) -> Result<Vec<Repository>, VcsError> {
        let mut repositories = Vec::new();
        let mut page = 1;
        loop {
            let url = format!(
                "{}/projects?membership=true&simple=true&min_access_level={}&page={}&per_page={}",
                self.api_url, MAINTAINER_ACCESS_LEVEL, page, API_PAGE_SIZE
            );
            let batch: Vec<GlProject> = self.transport.get_json(&url).await?;
            let has_next = batch.len() >= API_PAGE_SIZE;
            repositories.extend(batch.into_iter().map(|p| Repository {
                id: p.id.to_string(),
                name: p.name,
                full_path: p.path_with_namespace,
                web_url: p.web_url,
            }));
            if !has_next {
                break;
            }
            page += 1;
        }
        Ok(repositories)
    }

    async fn read_file_content(
        &self,
        repo_id: &str,
        path: &str,
        git_ref: &str,
    ) -> Result<String, VcsError> {
        let url = format!(
            "{}/repository/files/{}/raw?ref={}",
            self.project_url(repo_id),
            urlencoding::encode(path.trim_start_matches('/')),
            urlencoding::encode(git_ref)
        );
        Ok(self.transport.get(&url, &[]).await?.body)
    }

    async fn get_branch(&self, repo_id: &str, name: &str) -> Result<BranchInfo, VcsError> {
        let url = format!(
            "{}/repository/branches/{}",
            self.project_url(repo_id),
            urlencoding::encode(name)
        );
        let branch: GlBranch = self.transport.get_json(&url).await?;
        Ok(BranchInfo {
            name: branch.name,
            last_commit_id: branch.commit.id,
        })
    }

    async fn list_pull_request_file(
        &self,
        repo_id: &str,
        pr_id: &str,
    ) -> Result<Vec<PullRequestFile>, VcsError> {
        let mr_url = format!("{}/merge_requests/{}", self.project_url(repo_id), pr_id);
        let merge_request: GlMergeRequest = self.transport.get_json(&mr_url).await?;
        let last_commit_id = merge_request
            .merge_commit_sha
            .or(merge_request.sha)
            .unwrap_or_default();

        let mut files = Vec::new();
        let mut page = 1;
        loop {
            let url = format!("{}/diffs?page={}&per_page={}", mr_url, page, API_PAGE_SIZE);
            let batch: Vec<GlDiff> = self.transport.get_json(&url).await?;
            if batch.is_empty() {
                break;
            }
            files.extend(batch.into_iter().map(|d| PullRequestFile {
                path: d.new_path,
                last_commit_id: last_commit_id.clone(),
                is_deleted: d.deleted_file,
            }));
            page += 1;
        }
        Ok(files)
    }

    async fn list_pull_request_comments(
        &self,
        repo_id: &str,
        pr_id: &str,
    ) -> Result<Vec<PullRequestComment>, VcsError> {
        let mut comments = Vec::new();
        let mut page = 1;
        loop {
            let url = format!(
                "{}/merge_requests/{}/notes?page={}&per_page={}",
                self.project_url(repo_id),
                pr_id,
                page,
                API_PAGE_SIZE
            );
            let batch: Vec<GlNote> = self.transport.get_json(&url).await?;
            if batch.is_empty() {
                break;
            }
            comments.extend(
                batch
                    .into_iter()
                    .filter(|n| !n.system)
                    .map(|n| PullRequestComment {
                        id: n.id.to_string(),
                        content: n.body,
                    }),
            );
            page += 1;
        }
        Ok(comments)
    }

    async fn create_pull_request_comment(
        &self,
        repo_id: &str,
        pr_id: &str,
        body: &str,
    ) -> Result<(), VcsError> {
        let url = format!("{}/merge_requests/{}/notes", self.project_url(repo_id), pr_id);
        self.transport
            .send_json(Method::POST, &url, &json!({ "body": body }))
            .await?;
        Ok(())
    }

    async fn update_pull_request_comment(
        &self,
        repo_id: &str,
        pr_id: &str,
        comment_id: &str,
        body: &str,
    ) -> Result<(), VcsError> {
        let url = format!(
            "{}/merge_requests/{}/notes/{}",
            self.project_url(repo_id),
            pr_id,
            comment_id
        );
        self.transport
            .send_json(Method::PUT, &url, &json!({ "body": body }))
            .await?;
        Ok(())
    }

    async fn create_webhook(
        &self,
        repo_id: &str,
        payload: &WebhookCreate,
    ) -> Result<String, VcsError> {
        let url = format!("{}/hooks", self.project_url(repo_id));
        let body = json!({
            "url": payload.url,
            "token": payload.secret,
            "merge_requests_events": true,
            "push_events": false,
            "enable_ssl_verification": true,
        });
        let hook: GlHook = self
            .transport
            .send_json(Method::POST, &url, &body)
            .await?
            .json()?;
        Ok(hook.id.to_string())
    }

    async fn delete_webhook(&self, repo_id: &str, webhook_id: &str) -> Result<(), VcsError> {
        let url = format!("{}/hooks/{}", self.project_url(repo_id), webhook_id);
        self.transport.delete_idempotent(&url).await
    }
}
