//! Push payloads, reduced to the commit list [`get_distinct_file_list`] works on

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use super::WebhookError;
use crate::changes::{Commit, PushEvent, get_distinct_file_list, parse_file_change};
use crate::config::ConnectorConfig;

#[derive(Deserialize)]
struct GitHubPush {
    #[serde(rename = "ref")]
    git_ref: String,
    before: String,
    after: String,
    #[serde(default)]
    commits: Vec<GitHubCommit>,
}

#[derive(Deserialize)]
struct GitHubCommit {
    id: String,
    #[serde(default = "distinct_by_default")]
    distinct: bool,
    message: String,
    timestamp: DateTime<Utc>,
    #[serde(default)]
    added: Vec<String>,
    #[serde(default)]
    modified: Vec<String>,
}

fn distinct_by_default() -> bool {
    true
}

#[derive(Deserialize)]
struct GitLabPush {
    object_kind: String,
    #[serde(rename = "ref")]
    git_ref: String,
    before: String,
    after: String,
    #[serde(default)]
    commits: Vec<GitLabCommit>,
}

#[derive(Deserialize)]
struct GitLabCommit {
    id: String,
    title: String,
    timestamp: DateTime<Utc>,
    #[serde(default)]
    added: Vec<String>,
    #[serde(default)]
    modified: Vec<String>,
}

/// GitHub `push` event. Commits already seen on another branch are dropped.
pub fn from_github(body: &[u8]) -> Result<PushEvent, WebhookError> {
    let payload: GitHubPush = serde_json::from_slice(body)?;
    let commits = payload
        .commits
        .into_iter()
        .filter(|c| c.distinct)
        .map(|c| Commit {
            title: c.message.split("\n\n").next().unwrap_or_default().to_string(),
            id: c.id,
            timestamp: c.timestamp,
            added: c.added,
            modified: c.modified,
        })
        .collect();
    Ok(PushEvent {
        git_ref: payload.git_ref,
        before: payload.before,
        after: payload.after,
        commits,
    })
}

/// GitLab `push` hook.
pub fn from_gitlab(body: &[u8]) -> Result<PushEvent, WebhookError> {
    let payload: GitLabPush = serde_json::from_slice(body)?;
    if payload.object_kind != "push" {
        return Err(WebhookError::Malformed(format!(
            "expected push hook, got {}",
            payload.object_kind
        )));
    }
    let commits = payload
        .commits
        .into_iter()
        .map(|c| Commit {
            id: c.id,
            title: c.title,
            timestamp: c.timestamp,
            added: c.added,
            modified: c.modified,
        })
        .collect();
    Ok(PushEvent {
        git_ref: payload.git_ref,
        before: payload.before,
        after: payload.after,
        commits,
    })
}

/// Skip reason for a push. Migrations are only acted on through pull requests,
/// so the push is summarized and nothing else happens.
pub fn describe(event: &PushEvent, connector: &ConnectorConfig) -> String {
    let migrations: Vec<_> = get_distinct_file_list(event)
        .into_iter()
        .filter(|item| item.is_sql && connector.contains_path(&item.file_name))
        .filter(|item| parse_file_change(&item.file_name).is_some())
        .collect();
    for item in &migrations {
        debug!(
            commit = %item.commit.id,
            "Pushed migration {} ({:?})", item.file_name, item.item_type
        );
    }
    format!(
        "skip push event on {}: {} migration files in {} commits",
        event.git_ref,
        migrations.len(),
        event.commits.len()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changes::FileItemType;
    use crate::webhook::test_support::connector;
    use serde_json::json;

    fn github_body() -> Vec<u8> {
        serde_json::to_vec(&json!({
            "ref": "refs/heads/main",
            "before": "a0",
            "after": "c2",
            "commits": [
                {
                    "id": "c1",
                    "distinct": true,
                    "message": "Add employee table\n\nAlso seeds it.",
                    "timestamp": "2024-05-01T12:00:00+02:00",
                    "added": ["migrations/0001_ddl_employee.sql", "README.md"],
                    "modified": []
                },
                {
                    "id": "c0",
                    "distinct": false,
                    "message": "Cherry-picked",
                    "timestamp": "2024-05-01T11:00:00Z",
                    "added": ["migrations/0009_ddl_other.sql"],
                    "modified": []
                },
                {
                    "id": "c2",
                    "distinct": true,
                    "message": "Fix column type",
                    "timestamp": "2024-05-01T10:30:00Z",
                    "added": [],
                    "modified": ["migrations/0001_ddl_employee.sql", "migrations/0002_dml_seed.sql"]
                }
            ]
        }))
        .unwrap()
    }

    #[test]
    fn github_push_keeps_distinct_commits_with_first_paragraph_title() {
        let event = from_github(&github_body()).unwrap();
        assert_eq!(event.git_ref, "refs/heads/main");
        let ids: Vec<&str> = event.commits.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, ["c1", "c2"]);
        assert_eq!(event.commits[0].title, "Add employee table");
        assert_eq!(event.commits[0].timestamp.to_rfc3339(), "2024-05-01T10:00:00+00:00");
    }

    #[test]
    fn file_added_then_modified_stays_added_with_newest_commit() {
        let event = from_github(&github_body()).unwrap();
        let files = get_distinct_file_list(&event);
        let employee = files
            .iter()
            .find(|f| f.file_name == "migrations/0001_ddl_employee.sql")
            .unwrap();
        assert_eq!(employee.item_type, FileItemType::Added);
        assert_eq!(employee.commit.id, "c2");
        assert_eq!(files.len(), 3);
    }

    #[test]
    fn gitlab_push_is_converted() {
        let body = serde_json::to_vec(&json!({
            "object_kind": "push",
            "ref": "refs/heads/main",
            "before": "0000",
            "after": "b2",
            "user_name": "jdoe",
            "commits": [{
                "id": "b2",
                "title": "Seed employees",
                "message": "Seed employees\n",
                "timestamp": "2024-05-02T09:00:00Z",
                "added": ["migrations/0003_data_seed.sql"],
                "modified": []
            }]
        }))
        .unwrap();
        let event = from_gitlab(&body).unwrap();
        assert_eq!(event.commits.len(), 1);
        assert_eq!(event.commits[0].title, "Seed employees");
        assert_eq!(event.commits[0].added, ["migrations/0003_data_seed.sql"]);

        let tag = serde_json::to_vec(&json!({
            "object_kind": "tag_push", "ref": "refs/tags/v1", "before": "0", "after": "1"
        }))
        .unwrap();
        assert!(matches!(from_gitlab(&tag), Err(WebhookError::Malformed(_))));
    }

    #[test]
    fn bad_timestamp_is_malformed() {
        let body = serde_json::to_vec(&json!({
            "ref": "refs/heads/main", "before": "0", "after": "1",
            "commits": [{ "id": "x", "message": "m", "timestamp": "yesterday" }]
        }))
        .unwrap();
        assert!(matches!(from_github(&body), Err(WebhookError::Malformed(_))));
    }

    #[test]
    fn describe_counts_migrations_under_base_directory() {
        let event = from_github(&github_body()).unwrap();
        assert_eq!(
            describe(&event, &connector("main", "s3cret")),
            "skip push event on refs/heads/main: 2 migration files in 2 commits"
        );
    }
}
