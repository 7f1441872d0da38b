//! GitHub REST v3 provider

use async_trait::async_trait;
use reqwest::{Method, Url};
use serde::Deserialize;
use serde_json::json;

use super::{
    API_PAGE_SIZE, BranchInfo, ProviderConfig, PullRequestComment, PullRequestFile, Repository,
    VcsProvider, VcsType, WebhookCreate, branch_from_ref, encode_path,
};
use crate::error::VcsError;
use crate::vcs::transport::Transport;

const ACCEPT_JSON: (&str, &str) = ("Accept", "application/vnd.github+json");
const ACCEPT_RAW: (&str, &str) = ("Accept", "application/vnd.github.raw");

pub fn new_provider(config: ProviderConfig) -> Box<dyn VcsProvider> {
    Box::new(GitHubProvider::new(config))
}

pub struct GitHubProvider {
    api_url: String,
    transport: Transport,
}

impl GitHubProvider {
    pub fn new(config: ProviderConfig) -> Self {
        Self {
            api_url: api_url(&config.instance_url),
            transport: config.transport,
        }
    }
}

/// github.com is served from api.github.com, Enterprise from `/api/v3`.
pub fn api_url(instance_url: &str) -> String {
    let instance = instance_url.trim_end_matches('/');
    if instance == "https://github.com" || instance.is_empty() {
        "https://api.github.com".to_string()
    } else {
        format!("{}/api/v3", instance)
    }
}

#[derive(Deserialize)]
struct GhRepository {
    name: String,
    full_name: String,
    html_url: String,
    #[serde(default)]
    permissions: GhPermissions,
}

#[derive(Deserialize, Default)]
struct GhPermissions {
    #[serde(default)]
    admin: bool,
}

#[derive(Deserialize)]
struct GhRef {
    #[serde(rename = "ref")]
    git_ref: String,
    object: GhObject,
}

#[derive(Deserialize)]
struct GhObject {
    sha: String,
}

#[derive(Deserialize)]
struct GhPullRequestFile {
    filename: String,
    status: String,
    #[serde(default)]
    contents_url: String,
}

#[derive(Deserialize)]
struct GhComment {
    id: i64,
    #[serde(default)]
    body: String,
}

#[derive(Deserialize)]
struct GhWebhook {
    id: i64,
}

/// The `ref` query parameter of a contents URL is the commit the file was last touched at.
fn ref_from_contents_url(contents_url: &str) -> String {
    Url::parse(contents_url)
        .ok()
        .and_then(|url| {
            url.query_pairs()
                .find(|(key, _)| key == "ref")
                .map(|(_, value)| value.into_owned())
        })
        .unwrap_or_default()
}

#[async_trait]
impl VcsProvider for GitHubProvider {
    fn vcs_type(&self) -> VcsType {
        VcsType::GitHub
    }

    async fn fetch_all_repository_list(&self) -> Result<Vec<Repository>, VcsError> {
        let mut repositories = Vec::new();
        let mut page = 1;
        loop {
            let url = format!(
                "{}/user/repos?page={}&per_page={}",
                self.api_url, page, API_PAGE_SIZE
            );
            let batch: Vec<GhRepository> = self.transport.get(&url, &[ACCEPT_JSON]).await?.json()?;
            let has_next = batch.len() >= API_PAGE_SIZE;
            repositories.extend(
                batch
                    .into_iter()
                    .filter(|r| r.permissions.admin)
                    .map(|r| Repository {
                        id: r.full_name.clone(),
                        name: r.name,
                        full_path: r.full_name,
                        web_url: r.html_url,
                    }),
            );
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
            "{}/repos/{}/contents/{}?ref={}",
            self.api_url,
            repo_id,
            encode_path(path),
            urlencoding::encode(git_ref)
        );
        Ok(self.transport.get(&url, &[ACCEPT_RAW]).await?.body)
    }

    async fn get_branch(&self, repo_id: &str, name: &str) -> Result<BranchInfo, VcsError> {
        let url = format!(
            "{}/repos/{}/git/ref/heads/{}",
            self.api_url,
            repo_id,
            encode_path(name)
        );
        let found: GhRef = self.transport.get(&url, &[ACCEPT_JSON]).await?.json()?;
        let branch = branch_from_ref(&found.git_ref).unwrap_or(&found.git_ref);
        Ok(BranchInfo {
            name: branch.to_string(),
            last_commit_id: found.object.sha,
        })
    }

    async fn list_pull_request_file(
        &self,
        repo_id: &str,
        pr_id: &str,
    ) -> Result<Vec<PullRequestFile>, VcsError> {
        let mut files = Vec::new();
        let mut page = 1;
        loop {
            let url = format!(
                "{}/repos/{}/pulls/{}/files?per_page={}&page={}",
                self.api_url, repo_id, pr_id, API_PAGE_SIZE, page
            );
            let batch: Vec<GhPullRequestFile> =
                self.transport.get(&url, &[ACCEPT_JSON]).await?.json()?;
            if batch.is_empty() {
                break;
            }
            files.extend(batch.into_iter().map(|f| PullRequestFile {
                last_commit_id: ref_from_contents_url(&f.contents_url),
                is_deleted: f.status == "removed",
                path: f.filename,
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
                "{}/repos/{}/issues/{}/comments?per_page={}&page={}",
                self.api_url, repo_id, pr_id, API_PAGE_SIZE, page
            );
            let batch: Vec<GhComment> = self.transport.get(&url, &[ACCEPT_JSON]).await?.json()?;
            if batch.is_empty() {
                break;
            }
            comments.extend(batch.into_iter().map(|c| PullRequestComment {
                id: c.id.to_string(),
                content: c.body,
            }));
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
        let url = format!("{}/repos/{}/issues/{}/comments", self.api_url, repo_id, pr_id);
        self.transport
            .send_json(Method::POST, &url, &json!({ "body": body }))
            .await?;
        Ok(())
    }

    async fn update_pull_request_comment(
        &self,
        repo_id: &str,
        _pr_id: &str,
        comment_id: &str,
        body: &str,
    ) -> Result<(), VcsError> {
        let url = format!(
            "{}/repos/{}/issues/comments/{}",
            self.api_url, repo_id, comment_id
        );
        self.transport
            .send_json(Method::PATCH, &url, &json!({ "body": body }))
            .await?;
        Ok(())
    }

    async fn create_webhook(
        &self,
        repo_id: &str,
        payload: &WebhookCreate,
    ) -> Result<String, VcsError> {
        let url = format!("{}/repos/{}/hooks", self.api_url, repo_id);
        let body = json!({
            "name": "web",
            "active": true,
            "events": ["pull_request"],
            "config": {
                "url": payload.url,
                "content_type": "json",
                "secret": payload.secret,
                "insecure_ssl": "0",
            },
        });
        let response = self.transport.send_json(Method::POST, &url, &body).await?;
        if response.status != 201 {
            return Err(VcsError::Status {
                method: Method::POST.to_string(),
                url,
                status: response.status,
                body: response.body,
            });
        }
        let hook: GhWebhook = response.json()?;
        Ok(hook.id.to_string())
    }

    async fn delete_webhook(&self, repo_id: &str, webhook_id: &str) -> Result<(), VcsError> {
        let url = format!("{}/repos/{}/hooks/{}", self.api_url, repo_id, webhook_id);
        self.transport.delete_idempotent(&url).await
    }
}
