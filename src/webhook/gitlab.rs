use axum::http::HeaderMap;
use serde::Deserialize;

use super::{ActionType, PullRequestEvent, PullRequestInfo, Verdict, WebhookError, check_token};
use crate::config::ConnectorConfig;

pub const TOKEN_HEADER: &str = "X-Gitlab-Token";

#[derive(Deserialize)]
struct MergeRequestPayload {
    object_kind: String,
    #[serde(default)]
    user: Option<User>,
    object_attributes: Option<MergeRequest>,
}

#[derive(Deserialize)]
struct User {
    email: Option<String>,
}

#[derive(Deserialize)]
struct MergeRequest {
    iid: u64,
    title: String,
    description: Option<String>,
    url: String,
    target_branch: String,
    action: Option<String>,
    merge_commit_sha: Option<String>,
    last_commit: Option<LastCommit>,
}

#[derive(Deserialize)]
struct LastCommit {
    id: String,
}

pub fn parse(
    headers: &HeaderMap,
    body: &[u8],
    connector: &ConnectorConfig,
) -> Result<Verdict, WebhookError> {
    check_token(headers, TOKEN_HEADER, connector.webhook_secret.expose())?;

    let payload: MergeRequestPayload = serde_json::from_slice(body)?;
    if payload.object_kind == "push" {
        let push = super::push::from_gitlab(body)?;
        return Ok(Verdict::Skip(super::push::describe(&push, connector)));
    }
    if payload.object_kind != "merge_request" {
        return Ok(Verdict::Skip(format!(
            "skip {} event",
            payload.object_kind
        )));
    }
    let Some(mr) = payload.object_attributes else {
        return Err(WebhookError::Malformed(
            "merge request event without object_attributes".into(),
        ));
    };
    if mr.action.as_deref() != Some("merge") {
        return Ok(Verdict::Skip(format!(
            "skip merge request action {}",
            mr.action.as_deref().unwrap_or("none")
        )));
    }

    let head_commit = mr
        .merge_commit_sha
        .or(mr.last_commit.map(|c| c.id))
        .unwrap_or_default();
    Ok(Verdict::Accept(PullRequestEvent {
        action: ActionType::for_merge(connector),
        pr_id: mr.iid.to_string(),
        target_branch: mr.target_branch,
        head_commit,
        info: PullRequestInfo {
            author_email: payload
                .user
                .and_then(|u| u.email)
                .filter(|e| !e.is_empty() && e != "[REDACTED]"),
            title: mr.title,
            description: mr.description.unwrap_or_default(),
            url: mr.url,
            changes: Vec::new(),
        },
    }))
}
