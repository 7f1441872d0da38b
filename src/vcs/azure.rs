//! Azure DevOps Services provider
//!
//! Repository ids have the form `{organization}/{project}/{repository}`.

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

const API_VERSION: &str = "api-version=7.0";
const DEFAULT_INSTANCE: &str = "https://dev.azure.com";
const PROFILE_HOST: &str = "https://app.vssps.visualstudio.com";

pub fn new_provider(config: ProviderConfig) -> Box<dyn VcsProvider> {
    Box::new(AzureDevOpsProvider::new(config))
}

pub struct AzureDevOpsProvider {
    instance_url: String,
    transport: Transport,
}

/// The three parts of an Azure DevOps repository id.
#[derive(Debug, PartialEq, Eq)]
pub struct RepositoryId<'a> {
    pub organization: &'a str,
    pub project: &'a str,
    pub repository: &'a str,
}

impl<'a> RepositoryId<'a> {
    pub fn parse(repo_id: &'a str) -> Result<Self, VcsError> {
        let mut parts = repo_id.split('/');
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(organization), Some(project), Some(repository), None)
                if !organization.is_empty() && !project.is_empty() && !repository.is_empty() =>
            {
                Ok(Self {
                    organization,
                    project,
                    repository,
                })
            }
            _ => Err(VcsError::InvalidRepository(format!(
                "expected organization/project/repository, got {:?}",
                repo_id
            ))),
        }
    }
}

impl AzureDevOpsProvider {
    pub fn new(config: ProviderConfig) -> Self {
        let instance_url = if config.instance_url.is_empty() {
            DEFAULT_INSTANCE.to_string()
        } else {
            config.instance_url
        };
        Self {
            instance_url,
            transport: config.transport,
        }
    }

    fn repository_url(&self, repo_id: &str) -> Result<String, VcsError> {
        let id = RepositoryId::parse(repo_id)?;
        Ok(format!(
            "{}/{}/{}/_apis/git/repositories/{}",
            self.instance_url,
            urlencoding::encode(id.organization),
            urlencoding::encode(id.project),
            urlencoding::encode(id.repository)
        ))
    }

    fn profile_url(&self) -> &str {
        if self.instance_url == DEFAULT_INSTANCE {
            PROFILE_HOST
        } else {
            &self.instance_url
        }
    }
}

#[derive(Deserialize)]
struct ValueList<T> {
    #[serde(default = "Vec::new")]
    value: Vec<T>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AzProfile {
    public_alias: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AzAccount {
    account_name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AzRepository {
    name: String,
    project: AzProjectRef,
    #[serde(default)]
    web_url: String,
}

#[derive(Deserialize)]
struct AzProjectRef {
    name: String,
}

#[derive(Deserialize)]
struct AzBranchStats {
    name: String,
    commit: AzCommitRef,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AzCommitRef {
    commit_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AzPullRequest {
    last_merge_commit: Option<AzCommitRef>,
    last_merge_source_commit: Option<AzCommitRef>,
}

#[derive(Deserialize)]
struct AzChanges {
    #[serde(default = "Vec::new")]
    changes: Vec<AzChange>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AzChange {
    item: AzItem,
    change_type: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AzItem {
    path: String,
    #[serde(default)]
    is_folder: bool,
}

#[derive(Deserialize)]
struct AzThread {
    id: i64,
    #[serde(default = "Vec::new")]
    comments: Vec<AzComment>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AzComment {
    id: i64,
    #[serde(default)]
    content: String,
    #[serde(default)]
    comment_type: String,
    #[serde(default)]
    is_deleted: bool,
}

#[derive(Deserialize)]
struct AzSubscription {
    id: String,
}

fn looks_like_commit(git_ref: &str) -> bool {
    git_ref.len() == 40 && git_ref.chars().all(|c| c.is_ascii_hexdigit())
}

#[async_trait]
impl VcsProvider for AzureDevOpsProvider {
    fn vcs_type(&self) -> VcsType {
        VcsType::AzureDevOps
    }

    /// Azure DevOps does not report per-repository permissions, so every repository in
    /// every organization of the token owner is returned.
    async fn fetch_all_repository_list(&self) -> Result<Vec<Repository>, VcsError> {
        let profile: AzProfile = self
            .transport
            .get_json(&format!(
                "{}/_apis/profile/profiles/me?{}",
                self.profile_url(),
                API_VERSION
            ))
            .await?;
        let accounts: ValueList<AzAccount> = self
            .transport
            .get_json(&format!(
                "{}/_apis/accounts?memberId={}&{}",
                self.profile_url(),
                urlencoding::encode(&profile.public_alias),
                API_VERSION
            ))
            .await?;

        let mut repositories = Vec::new();
        for account in accounts.value {
            let url = format!(
                "{}/{}/_apis/git/repositories?{}",
                self.instance_url,
                urlencoding::encode(&account.account_name),
                API_VERSION
            );
            let repos: ValueList<AzRepository> = self.transport.get_json(&url).await?;
            repositories.extend(repos.value.into_iter().map(|r| {
                let full_path = format!("{}/{}/{}", account.account_name, r.project.name, r.name);
                Repository {
                    id: full_path.clone(),
                    name: r.name,
                    full_path,
                    web_url: r.web_url,
                }
            }));
        }
        Ok(repositories)
    }

    async fn read_file_content(
        &self,
        repo_id: &str,
        path: &str,
        git_ref: &str,
    ) -> Result<String, VcsError> {
        let version_type = if looks_like_commit(git_ref) {
            "commit"
        } else {
            "branch"
        };
        let url = format!(
            "{}/items?path={}&versionDescriptor.version={}&versionDescriptor.versionType={}&$format=octetStream&{}",
            self.repository_url(repo_id)?,
            urlencoding::encode(path),
            urlencoding::encode(git_ref),
            version_type,
            API_VERSION
        );
        Ok(self.transport.get(&url, &[]).await?.body)
    }

    async fn get_branch(&self, repo_id: &str, name: &str) -> Result<BranchInfo, VcsError> {
        let url = format!(
            "{}/stats/branches?name={}&{}",
            self.repository_url(repo_id)?,
            urlencoding::encode(name),
            API_VERSION
        );
        let stats: AzBranchStats = self.transport.get_json(&url).await?;
        Ok(BranchInfo {
            name: stats.name,
            last_commit_id: stats.commit.commit_id,
        })
    }

    async fn list_pull_request_file(
        &self,
        repo_id: &str,
        pr_id: &str,
    ) -> Result<Vec<PullRequestFile>, VcsError> {
        let repo_url = self.repository_url(repo_id)?;
        let pull_request: AzPullRequest = self
            .transport
            .get_json(&format!("{}/pullrequests/{}?{}", repo_url, pr_id, API_VERSION))
            .await?;
        let commit = pull_request
            .last_merge_commit
            .or(pull_request.last_merge_source_commit)
            .map(|c| c.commit_id)
            .ok_or_else(|| {
                VcsError::NotFound(format!("merge commit of pull request {}", pr_id))
            })?;

        let mut files = Vec::new();
        let mut skip = 0;
        loop {
            let url = format!(
                "{}/commits/{}/changes?$top={}&$skip={}&{}",
                repo_url, commit, API_PAGE_SIZE, skip, API_VERSION
            );
            let page: AzChanges = self.transport.get_json(&url).await?;
            if page.changes.is_empty() {
                break;
            }
            skip += page.changes.len();
            files.extend(
                page.changes
                    .into_iter()
                    .filter(|c| !c.item.is_folder)
                    .map(|c| PullRequestFile {
                        path: c.item.path.trim_start_matches('/').to_string(),
                        last_commit_id: commit.clone(),
                        is_deleted: c.change_type.contains("delete"),
                    }),
            );
        }
        Ok(files)
    }

    async fn list_pull_request_comments(
        &self,
        repo_id: &str,
        pr_id: &str,
    ) -> Result<Vec<PullRequestComment>, VcsError> {
        let url = format!(
            "{}/pullRequests/{}/threads?{}",
            self.repository_url(repo_id)?,
            pr_id,
            API_VERSION
        );
        let threads: ValueList<AzThread> = self.transport.get_json(&url).await?;
        Ok(threads
            .value
            .into_iter()
            .filter_map(|thread| {
                let first = thread.comments.into_iter().next()?;
                if first.is_deleted || first.comment_type == "system" {
                    return None;
                }
                Some(PullRequestComment {
                    id: format!("{}/{}", thread.id, first.id),
                    content: first.content,
                })
            })
            .collect())
    }

    async fn create_pull_request_comment(
        &self,
        repo_id: &str,
        pr_id: &str,
        body: &str,
    ) -> Result<(), VcsError> {
        let url = format!(
            "{}/pullRequests/{}/threads?{}",
            self.repository_url(repo_id)?,
            pr_id,
            API_VERSION
        );
        let thread = json!({
            "comments": [{ "parentCommentId": 0, "content": body, "commentType": 1 }],
            "status": 1,
        });
        self.transport.send_json(Method::POST, &url, &thread).await?;
        Ok(())
    }

    async fn update_pull_request_comment(
        &self,
        repo_id: &str,
        pr_id: &str,
        comment_id: &str,
        body: &str,
    ) -> Result<(), VcsError> {
        let (thread_id, comment) = comment_id.split_once('/').ok_or_else(|| {
            VcsError::NotFound(format!("comment {} is not a thread comment", comment_id))
        })?;
        let url = format!(
            "{}/pullRequests/{}/threads/{}/comments/{}?{}",
            self.repository_url(repo_id)?,
            pr_id,
            thread_id,
            comment,
            API_VERSION
        );
        self.transport
            .send_json(Method::PATCH, &url, &json!({ "content": body }))
            .await?;
        Ok(())
    }

    async fn create_webhook(
        &self,
        repo_id: &str,
        payload: &WebhookCreate,
    ) -> Result<String, VcsError> {
        let id = RepositoryId::parse(repo_id)?;
        let url = format!(
            "{}/{}/_apis/hooks/subscriptions?{}",
            self.instance_url,
            urlencoding::encode(id.organization),
            API_VERSION
        );
        let body = json!({
            "publisherId": "tfs",
            "eventType": "git.pullrequest.merged",
            "resourceVersion": "1.0",
            "consumerId": "webHooks",
            "consumerActionId": "httpRequest",
            "publisherInputs": {
                "projectId": id.project,
                "repository": id.repository,
            },
            "consumerInputs": {
                "url": payload.url,
                "httpHeaders": format!("X-Azure-Token: {}", payload.secret),
            },
        });
        let subscription: AzSubscription = self
            .transport
            .send_json(Method::POST, &url, &body)
            .await?
            .json()?;
        Ok(subscription.id)
    }

    async fn delete_webhook(&self, repo_id: &str, webhook_id: &str) -> Result<(), VcsError> {
        let id = RepositoryId::parse(repo_id)?;
        let url = format!(
            "{}/{}/_apis/hooks/subscriptions/{}?{}",
            self.instance_url,
            urlencoding::encode(id.organization),
            urlencoding::encode(webhook_id),
            API_VERSION
        );
        self.transport.delete_idempotent(&url).await
    }
}
