use axum::http::HeaderMap;
use serde::Deserialize;

use super::{ActionType, PullRequestEvent, PullRequestInfo, Verdict, WebhookError, check_token};
use crate::config::ConnectorConfig;

pub const TOKEN_HEADER: &str = "X-Azure-Token";

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServiceHookPayload {
    event_type: String,
    resource: Option<PullRequest>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PullRequest {
    pull_request_id: u64,
    status: String,
    #[serde(default)]
    merge_status: String,
    title: String,
    #[serde(default)]
    description: String,
    target_ref_name: String,
    created_by: Option<Identity>,
    repository: RepositoryRef,
    last_merge_commit: Option<CommitRef>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Identity {
    unique_name: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RepositoryRef {
    #[serde(default)]
    web_url: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommitRef {
    commit_id: String,
}

pub fn parse(
    headers: &HeaderMap,
    body: &[u8],
    connector: &ConnectorConfig,
) -> Result<Verdict, WebhookError> {
    check_token(headers, TOKEN_HEADER, connector.webhook_secret.expose())?;

    let payload: ServiceHookPayload = serde_json::from_slice(body)?;
    if !payload.event_type.starts_with("git.pullrequest.") {
        return Ok(Verdict::Skip(format!("skip {} event", payload.event_type)));
    }
    let Some(pr) = payload.resource else {
        return Err(WebhookError::Malformed("pull request event without resource".into()));
    };
    if pr.status != "completed" || pr.merge_status != "succeeded" {
        return Ok(Verdict::Skip(format!(
            "skip pull request with status {} and merge status {}",
            pr.status, pr.merge_status
        )));
    }

    Ok(Verdict::Accept(PullRequestEvent {
        action: ActionType::for_merge(connector),
        pr_id: pr.pull_request_id.to_string(),
        target_branch: pr.target_ref_name,
        head_commit: pr.last_merge_commit.map(|c| c.commit_id).unwrap_or_default(),
        info: PullRequestInfo {
            author_email: pr
                .created_by
                .and_then(|i| i.unique_name)
                .filter(|n| n.contains('@')),
            title: pr.title,
            description: pr.description,
            url: format!(
                "{}/pullrequest/{}",
                pr.repository.web_url.trim_end_matches('/'),
                pr.pull_request_id
            ),
            changes: Vec::new(),
        },
    }))
}
