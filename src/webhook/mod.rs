//! Authenticates inbound VCS webhooks and normalizes them into [`PullRequestEvent`]s

use axum::http::HeaderMap;
use futures::future::try_join_all;
use serde::Serialize;
use tracing::debug;

use crate::changes::{FileChange, parse_file_change};
use crate::config::{ConnectorConfig, MergeAction};
use crate::error::VcsError;
use crate::vcs::{BOT_AUTHOR_EMAIL, VcsProvider, VcsType};

pub mod azure;
pub mod bitbucket;
pub mod github;
pub mod gitlab;
pub mod push;

/// Canonical pull request, independent of the provider that sent it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PullRequestInfo {
    pub author_email: Option<String>,
    pub title: String,
    pub description: String,
    pub url: String,
    pub changes: Vec<FileChange>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ActionType {
    SqlReview,
    CreateIssue,
    CreateRelease,
}

impl ActionType {
    fn for_merge(connector: &ConnectorConfig) -> Self {
        match connector.merge_action {
            MergeAction::Issue => ActionType::CreateIssue,
            MergeAction::Release => ActionType::CreateRelease,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequestEvent {
    pub action: ActionType,
    pub pr_id: String,
    pub target_branch: String,
    /// Commit used for file links and reads when the file listing has none.
    pub head_commit: String,
    pub info: PullRequestInfo,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Accept(PullRequestEvent),
    /// The request is genuine but carries nothing to act on.
    Skip(String),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum WebhookError {
    /// Carries no detail about which check failed.
    #[error("failed to authenticate webhook request")]
    Unauthenticated,

    #[error("failed to parse webhook payload: {0}")]
    Malformed(String),
}

impl From<serde_json::Error> for WebhookError {
    fn from(e: serde_json::Error) -> Self {
        WebhookError::Malformed(e.to_string())
    }
}

pub(crate) fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Shared secret check by plain equality.
pub(crate) fn check_token(headers: &HeaderMap, name: &str, secret: &str) -> Result<(), WebhookError> {
    match header(headers, name) {
        Some(token) if !secret.is_empty() && token == secret => Ok(()),
        _ => Err(WebhookError::Unauthenticated),
    }
}

/// Runs authentication, event filtering and normalization for one request.
pub fn authenticate_and_normalize(
    vcs_type: VcsType,
    headers: &HeaderMap,
    body: &[u8],
    connector: &ConnectorConfig,
) -> Result<Verdict, WebhookError> {
    let verdict = match vcs_type {
        VcsType::GitHub => github::parse(headers, body, connector)?,
        VcsType::GitLab => gitlab::parse(headers, body, connector)?,
        VcsType::Bitbucket => bitbucket::parse(headers, body, connector)?,
        VcsType::AzureDevOps => azure::parse(headers, body, connector)?,
    };
    Ok(filter_event(verdict, connector))
}

/// Drops events authored by the bot and events for other branches.
fn filter_event(verdict: Verdict, connector: &ConnectorConfig) -> Verdict {
    let Verdict::Accept(event) = verdict else {
        return verdict;
    };
    if event
        .info
        .author_email
        .as_deref()
        .is_some_and(|email| email.eq_ignore_ascii_case(BOT_AUTHOR_EMAIL))
    {
        return Verdict::Skip("skip pull request authored by the bot".to_string());
    }
    let target = event
        .target_branch
        .strip_prefix("refs/heads/")
        .unwrap_or(&event.target_branch);
    if target != connector.branch {
        return Verdict::Skip(format!(
            "skip branch {}, connector {} watches branch {}",
            target, connector.id, connector.branch
        ));
    }
    Verdict::Accept(event)
}

/// Which pull request files become changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeScope {
    /// Only files under the connector's base directory
    BaseDirectory,
    /// Every migration file in the pull request
    All,
}

/// Browser link to `path` at `commit`.
pub fn file_web_url(vcs_type: VcsType, repo_web_url: &str, commit: &str, path: &str) -> Option<String> {
    if repo_web_url.is_empty() {
        return None;
    }
    let web = repo_web_url.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    Some(match vcs_type {
        VcsType::GitHub => format!("{}/blob/{}/{}", web, commit, path),
        VcsType::GitLab => format!("{}/-/blob/{}/{}", web, commit, path),
        VcsType::Bitbucket => format!("{}/src/{}/{}", web, commit, path),
        VcsType::AzureDevOps => format!("{}?path=/{}&version=GC{}", web, path, commit),
    })
}

/// Lists the pull request files and fetches the content of each migration file.
///
/// Reads run concurrently; the result keeps the order of the provider's file list.
pub async fn fetch_changes(
    provider: &dyn VcsProvider,
    connector: &ConnectorConfig,
    event: &PullRequestEvent,
    scope: ChangeScope,
) -> Result<Vec<FileChange>, VcsError> {
    let files = provider
        .list_pull_request_file(&connector.external_repo_id, &event.pr_id)
        .await?;

    let candidates: Vec<(FileChange, String)> = files
        .into_iter()
        .filter(|f| !f.is_deleted)
        .filter(|f| scope == ChangeScope::All || connector.contains_path(&f.path))
        .filter_map(|f| {
            let commit = if f.last_commit_id.is_empty() {
                event.head_commit.clone()
            } else {
                f.last_commit_id
            };
            parse_file_change(&f.path).map(|change| (change, commit))
        })
        .collect();
    debug!(pr = %event.pr_id, count = candidates.len(), "Fetching migration file content");

    let contents = try_join_all(candidates.iter().map(|(change, commit)| {
        provider.read_file_content(&connector.external_repo_id, &change.path, commit)
    }))
    .await?;

    let vcs_type = provider.vcs_type();
    Ok(candidates
        .into_iter()
        .zip(contents)
        .map(|((mut change, commit), content)| {
            change.web_url = file_web_url(vcs_type, &connector.web_url, &commit, &change.path);
            change.content = content;
            change
        })
        .collect())
}
