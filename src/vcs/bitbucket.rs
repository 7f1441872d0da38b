//! Bitbucket Cloud 2.0 provider

use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use serde_json::json;

use super::{
    API_PAGE_SIZE, BranchInfo, ProviderConfig, PullRequestComment, PullRequestFile, Repository,
    VcsProvider, VcsType, WebhookCreate, encode_path,
};
use crate::error::VcsError;
use crate::vcs::transport::Transport;

/// Pull request events a Bitbucket webhook subscribes to.
pub const PULL_REQUEST_EVENTS: [&str; 3] = [
    "pullrequest:created",
    "pullrequest:updated",
    "pullrequest:fulfilled",
];

pub fn new_provider(config: ProviderConfig) -> Box<dyn VcsProvider> {
    Box::new(BitbucketProvider::new(config))
}

pub struct BitbucketProvider {
    api_url: String,
    transport: Transport,
}

impl BitbucketProvider {
    pub fn new(config: ProviderConfig) -> Self {
        Self {
            api_url: api_url(&config.instance_url),
            transport: config.transport,
        }
    }
}

pub fn api_url(instance_url: &str) -> String {
    let instance = instance_url.trim_end_matches('/');
    if instance == "https://bitbucket.org" || instance.is_empty() {
        "https://api.bitbucket.org/2.0".to_string()
    } else {
        format!("{}/2.0", instance)
    }
}

#[derive(Deserialize)]
struct Page<T> {
    #[serde(default = "Vec::new")]
    values: Vec<T>,
}

#[derive(Deserialize)]
struct BbPermission {
    repository: BbRepository,
}

#[derive(Deserialize)]
struct BbRepository {
    name: String,
    full_name: String,
    #[serde(default)]
    links: BbLinks,
}

#[derive(Deserialize, Default)]
struct BbLinks {
    html: Option<BbLink>,
    #[serde(rename = "self")]
    self_link: Option<BbLink>,
}

#[derive(Deserialize)]
struct BbLink {
    href: String,
}

#[derive(Deserialize)]
struct BbBranch {
    name: String,
    target: BbTarget,
}

#[derive(Deserialize)]
struct BbTarget {
    hash: String,
}

#[derive(Deserialize)]
struct BbDiffStat {
    status: String,
    old: Option<BbDiffFile>,
    new: Option<BbDiffFile>,
}

#[derive(Deserialize)]
struct BbDiffFile {
    path: String,
    #[serde(default)]
    links: BbLinks,
}

#[derive(Deserialize)]
struct BbComment {
    id: i64,
    content: BbContent,
    #[serde(default)]
    deleted: bool,
}

#[derive(Deserialize)]
struct BbContent {
    #[serde(default)]
    raw: String,
}

#[derive(Deserialize)]
struct BbHook {
    uuid: String,
}

/// Source links look like `.../src/{commit}/{path}`.
fn commit_from_src_link(href: &str) -> String {
    href.split_once("/src/")
        .and_then(|(_, rest)| rest.split('/').next())
        .unwrap_or_default()
        .to_string()
}

#[async_trait]
impl VcsProvider for BitbucketProvider {
    fn vcs_type(&self) -> VcsType {
        VcsType::Bitbucket
    }

    async fn fetch_all_repository_list(&self) -> Result<Vec<Repository>, VcsError> {
        let mut repositories = Vec::new();
        let mut page = 1;
        let query = urlencoding::encode("permission=\"admin\"").into_owned();
        loop {
            let url = format!(
                "{}/user/permissions/repositories?q={}&page={}&pagelen={}",
                self.api_url, query, page, API_PAGE_SIZE
            );
            let batch: Page<BbPermission> = self.transport.get_json(&url).await?;
            let has_next = batch.values.len() >= API_PAGE_SIZE;
            repositories.extend(batch.values.into_iter().map(|p| {
                let repo = p.repository;
                Repository {
                    id: repo.full_name.clone(),
                    name: repo.name,
                    web_url: repo.links.html.map(|l| l.href).unwrap_or_default(),
                    full_path: repo.full_name,
                }
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
            "{}/repositories/{}/src/{}/{}",
            self.api_url,
            repo_id,
            urlencoding::encode(git_ref),
            encode_path(path)
        );
        Ok(self.transport.get(&url, &[]).await?.body)
    }

    async fn get_branch(&self, repo_id: &str, name: &str) -> Result<BranchInfo, VcsError> {
        let url = format!(
            "{}/repositories/{}/refs/branches/{}",
            self.api_url,
            repo_id,
            encode_path(name)
        );
        let branch: BbBranch = self.transport.get_json(&url).await?;
        Ok(BranchInfo {
            name: branch.name,
            last_commit_id: branch.target.hash,
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
                "{}/repositories/{}/pullrequests/{}/diffstat?page={}&pagelen={}",
                self.api_url, repo_id, pr_id, page, API_PAGE_SIZE
            );
            let batch: Page<BbDiffStat> = self.transport.get_json(&url).await?;
            if batch.values.is_empty() {
                break;
            }
            for stat in batch.values {
                let is_deleted = stat.status == "removed";
                let Some(file) = (if is_deleted { stat.old } else { stat.new }) else {
                    continue;
                };
                let last_commit_id = file
                    .links
                    .self_link
                    .as_ref()
                    .map(|l| commit_from_src_link(&l.href))
                    .unwrap_or_default();
                files.push(PullRequestFile {
                    path: file.path,
                    last_commit_id,
                    is_deleted,
                });
            }
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
                "{}/repositories/{}/pullrequests/{}/comments?page={}&pagelen={}",
                self.api_url, repo_id, pr_id, page, API_PAGE_SIZE
            );
            let batch: Page<BbComment> = self.transport.get_json(&url).await?;
            if batch.values.is_empty() {
                break;
            }
            comments.extend(
                batch
                    .values
                    .into_iter()
                    .filter(|c| !c.deleted)
                    .map(|c| PullRequestComment {
                        id: c.id.to_string(),
                        content: c.content.raw,
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
        let url = format!(
            "{}/repositories/{}/pullrequests/{}/comments",
            self.api_url, repo_id, pr_id
        );
        self.transport
            .send_json(Method::POST, &url, &json!({ "content": { "raw": body } }))
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
            "{}/repositories/{}/pullrequests/{}/comments/{}",
            self.api_url, repo_id, pr_id, comment_id
        );
        self.transport
            .send_json(Method::PUT, &url, &json!({ "content": { "raw": body } }))
            .await?;
        Ok(())
    }

    async fn create_webhook(
        &self,
        repo_id: &str,
        payload: &WebhookCreate,
    ) -> Result<String, VcsError> {
        let url = format!("{}/repositories/{}/hooks", self.api_url, repo_id);
        let body = json!({
            "description": "GitOps webhook",
            "url": payload.url,
            "active": true,
            "events": PULL_REQUEST_EVENTS,
        });
        let hook: BbHook = self
            .transport
            .send_json(Method::POST, &url, &body)
            .await?
            .json()?;
        Ok(hook.uuid)
    }

    async fn delete_webhook(&self, repo_id: &str, webhook_id: &str) -> Result<(), VcsError> {
        let url = format!(
            "{}/repositories/{}/hooks/{}",
            self.api_url,
            repo_id,
            urlencoding::encode(webhook_id)
        );
        self.transport.delete_idempotent(&url).await
    }
}
