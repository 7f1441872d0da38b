use axum::http::HeaderMap;
use serde::Deserialize;

use super::{ActionType, PullRequestEvent, PullRequestInfo, Verdict, WebhookError, header};
use crate::config::ConnectorConfig;
use crate::vcs::bitbucket::PULL_REQUEST_EVENTS;

pub const EVENT_HEADER: &str = "X-Event-Key";

#[derive(Deserialize)]
struct PullRequestPayload {
    pullrequest: PullRequest,
}

#[derive(Deserialize)]
struct PullRequest {
    id: u64,
    title: String,
    #[serde(default)]
    description: String,
    links: Links,
    destination: Endpoint,
    source: Endpoint,
    merge_commit: Option<CommitRef>,
}

#[derive(Deserialize)]
struct Links {
    html: Link,
}

#[derive(Deserialize)]
struct Link {
    href: String,
}

#[derive(Deserialize)]
struct Endpoint {
    branch: BranchRef,
    commit: Option<CommitRef>,
}

#[derive(Deserialize)]
struct BranchRef {
    name: String,
}

#[derive(Deserialize)]
struct CommitRef {
    hash: String,
}

/// Bitbucket does not sign deliveries; the hook URL itself is the credential and only the
/// pull request event keys it was registered for are accepted.
pub fn parse(
    headers: &HeaderMap,
    body: &[u8],
    connector: &ConnectorConfig,
) -> Result<Verdict, WebhookError> {
    let event_key = header(headers, EVENT_HEADER).unwrap_or_default();
    if !PULL_REQUEST_EVENTS.contains(&event_key) {
        return Ok(Verdict::Skip(format!("skip {} event", event_key)));
    }

    let payload: PullRequestPayload = serde_json::from_slice(body)?;
    let pr = payload.pullrequest;
    let source_commit = pr.source.commit.map(|c| c.hash).unwrap_or_default();
    let (action, head_commit) = match event_key {
        "pullrequest:fulfilled" => (
            ActionType::for_merge(connector),
            pr.merge_commit.map(|c| c.hash).unwrap_or(source_commit),
        ),
        _ => (ActionType::SqlReview, source_commit),
    };

    Ok(Verdict::Accept(PullRequestEvent {
        action,
        pr_id: pr.id.to_string(),
        target_branch: pr.destination.branch.name,
        head_commit,
        info: PullRequestInfo {
            author_email: None,
            title: pr.title,
            description: pr.description,
            url: pr.links.html.href,
            changes: Vec::new(),
        },
    }))
}
