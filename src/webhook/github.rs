use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use tracing::debug;

use super::{ActionType, PullRequestEvent, PullRequestInfo, Verdict, WebhookError, header};
use crate::config::ConnectorConfig;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-Hub-Signature-256";
pub const EVENT_HEADER: &str = "X-GitHub-Event";

/// Verifies a `sha256=<hex>` signature over the raw body.
///
/// The MAC comparison is constant time.
pub fn verify_signature(secret: &str, payload: &[u8], signature_header: &str) -> bool {
    let Some(hex_signature) = signature_header.strip_prefix("sha256=") else {
        return false;
    };
    let Ok(signature) = hex::decode(hex_signature) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(payload);
    mac.verify_slice(&signature).is_ok()
}

#[derive(Deserialize)]
struct PullRequestPayload {
    action: String,
    number: u64,
    pull_request: PullRequest,
}

#[derive(Deserialize)]
struct PullRequest {
    title: String,
    body: Option<String>,
    html_url: String,
    base: GitRef,
    head: GitRef,
    #[serde(default)]
    merged: bool,
    merge_commit_sha: Option<String>,
}

#[derive(Deserialize)]
struct GitRef {
    #[serde(rename = "ref")]
    name: String,
    sha: String,
}

pub fn parse(
    headers: &HeaderMap,
    body: &[u8],
    connector: &ConnectorConfig,
) -> Result<Verdict, WebhookError> {
    let signature = header(headers, SIGNATURE_HEADER).ok_or(WebhookError::Unauthenticated)?;
    let secret = connector.webhook_secret.expose();
    if secret.is_empty() || !verify_signature(secret, body, signature) {
        return Err(WebhookError::Unauthenticated);
    }

    let event = header(headers, EVENT_HEADER).unwrap_or_default();
    if event == "push" {
        let push = super::push::from_github(body)?;
        return Ok(Verdict::Skip(super::push::describe(&push, connector)));
    }
    if event != "pull_request" {
        debug!("Ignoring GitHub {:?} event", event);
        return Ok(Verdict::Skip(format!("skip {} event", event)));
    }

    let payload: PullRequestPayload = serde_json::from_slice(body)?;
    let pr = payload.pull_request;
    let (action, head_commit) = match payload.action.as_str() {
        "opened" | "synchronize" => (ActionType::SqlReview, pr.head.sha),
        "closed" if pr.merged => (
            ActionType::for_merge(connector),
            pr.merge_commit_sha.unwrap_or(pr.head.sha),
        ),
        other => {
            return Ok(Verdict::Skip(format!(
                "skip pull_request event with action {}",
                other
            )));
        }
    };

    Ok(Verdict::Accept(PullRequestEvent {
        action,
        pr_id: payload.number.to_string(),
        target_branch: pr.base.name,
        head_commit,
        info: PullRequestInfo {
            author_email: None,
            title: pr.title,
            description: pr.body.unwrap_or_default(),
            url: pr.html_url,
            changes: Vec::new(),
        },
    }))
}

/// `sha256=<hex>` signature header value for `payload`.
pub fn sign(secret: &str, payload: &[u8]) -> String {
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(payload);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MergeAction;
    use crate::webhook::test_support::connector;
    use axum::http::HeaderValue;
    use serde_json::json;

    fn headers(event: &str, signature: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(EVENT_HEADER, HeaderValue::from_str(event).unwrap());
        headers.insert(SIGNATURE_HEADER, HeaderValue::from_str(signature).unwrap());
        headers
    }

    fn payload(action: &str, merged: bool) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "action": action,
            "number": 17,
            "pull_request": {
                "title": "Add index",
                "body": null,
                "html_url": "https://github.com/acme/hr/pull/17",
                "base": { "ref": "main", "sha": "base0" },
                "head": { "ref": "feature", "sha": "head1" },
                "merged": merged,
                "merge_commit_sha": "merge2"
            }
        }))
        .unwrap()
    }

    #[test]
    fn accepts_valid_signature() {
        let body = b"{\"zen\":\"Keep it logically awesome.\"}";
        let signature = sign("It's a Secret to Everybody", body);
        assert!(verify_signature("It's a Secret to Everybody", body, &signature));
    }

    #[test]
    fn rejects_any_single_bit_flip() {
        let body = b"{\"action\":\"opened\"}".to_vec();
        let signature = sign("secret", &body);
        for byte in 0..body.len() {
            for bit in 0..8 {
                let mut mutated = body.clone();
                mutated[byte] ^= 1 << bit;
                assert!(!verify_signature("secret", &mutated, &signature));
            }
        }
    }

    #[test]
    fn rejects_malformed_signature_headers() {
        let body = b"{}";
        let hex_only = sign("secret", body).trim_start_matches("sha256=").to_string();
        assert!(!verify_signature("secret", body, &hex_only));
        assert!(!verify_signature("secret", body, "sha256=not-hex"));
        assert!(!verify_signature("other", body, &sign("secret", body)));
    }

    #[test]
    fn opened_pull_request_triggers_review() {
        let body = payload("opened", false);
        let verdict = parse(
            &headers("pull_request", &sign("s", &body)),
            &body,
            &connector("main", "s"),
        )
        .unwrap();
        let Verdict::Accept(event) = verdict else {
            panic!("expected accept");
        };
        assert_eq!(event.action, ActionType::SqlReview);
        assert_eq!(event.pr_id, "17");
        assert_eq!(event.head_commit, "head1");
        assert_eq!(event.info.url, "https://github.com/acme/hr/pull/17");
    }

    #[test]
    fn merged_pull_request_uses_connector_merge_action() {
        let body = payload("closed", true);
        let mut release = connector("main", "s");
        release.merge_action = MergeAction::Release;
        let Verdict::Accept(event) =
            parse(&headers("pull_request", &sign("s", &body)), &body, &release).unwrap()
        else {
            panic!("expected accept");
        };
        assert_eq!(event.action, ActionType::CreateRelease);
        assert_eq!(event.head_commit, "merge2");
    }

    #[test]
    fn closed_without_merge_is_skipped() {
        let body = payload("closed", false);
        let verdict = parse(
            &headers("pull_request", &sign("s", &body)),
            &body,
            &connector("main", "s"),
        )
        .unwrap();
        assert!(matches!(verdict, Verdict::Skip(_)));
    }

    #[test]
    fn ping_is_skipped_after_authentication() {
        let body = br#"{"zen":"hi","hook_id":1}"#;
        let verdict = parse(
            &headers("ping", &sign("s", body)),
            body,
            &connector("main", "s"),
        )
        .unwrap();
        assert_eq!(verdict, Verdict::Skip("skip ping event".into()));

        let err = parse(&headers("ping", "sha256=00"), body, &connector("main", "s")).unwrap_err();
        assert_eq!(err, WebhookError::Unauthenticated);
    }
}
