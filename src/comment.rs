//! Keeps one bot comment per concern on a pull request

use tracing::debug;

use crate::error::VcsError;
use crate::vcs::VcsProvider;

pub const COMMENT_PREFIX_SQL_REVIEW: &str = "## SQL Review";
pub const COMMENT_PREFIX_BOT: &str = "## GitOps Bot";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated { comment_id: String },
    /// No matching comment and creation was not requested.
    Skipped,
}

/// Matcher for comments that start with `prefix`.
pub fn starts_with(prefix: &'static str) -> impl Fn(&str) -> bool {
    move |content: &str| content.trim_start().starts_with(prefix)
}

/// Updates the first comment accepted by `is_match`, otherwise creates one when
/// `create_if_absent` is set.
pub async fn upsert_comment(
    provider: &dyn VcsProvider,
    repo_id: &str,
    pr_id: &str,
    body: &str,
    is_match: impl Fn(&str) -> bool,
    create_if_absent: bool,
) -> Result<UpsertOutcome, VcsError> {
    let comments = provider.list_pull_request_comments(repo_id, pr_id).await?;

    if let Some(existing) = comments.iter().find(|c| is_match(&c.content)) {
        debug!(repo = repo_id, pr = pr_id, comment = %existing.id, "Updating existing comment");
        provider
            .update_pull_request_comment(repo_id, pr_id, &existing.id, body)
            .await?;
        return Ok(UpsertOutcome::Updated {
            comment_id: existing.id.clone(),
        });
    }

    if !create_if_absent {
        return Ok(UpsertOutcome::Skipped);
    }
    debug!(repo = repo_id, pr = pr_id, "Creating comment");
    provider
        .create_pull_request_comment(repo_id, pr_id, body)
        .await?;
    Ok(UpsertOutcome::Created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vcs::{
        BranchInfo, PullRequestComment, PullRequestFile, Repository, VcsType, WebhookCreate,
    };
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CommentBoard {
        comments: Mutex<Vec<PullRequestComment>>,
        next_id: Mutex<u32>,
    }

    #[async_trait]
    impl VcsProvider for CommentBoard {
        fn vcs_type(&self) -> VcsType {
            VcsType::GitHub
        }

        async fn fetch_all_repository_list(&self) -> Result<Vec<Repository>, VcsError> {
            Ok(vec![])
        }

        async fn read_file_content(&self, _: &str, path: &str, _: &str) -> Result<String, VcsError> {
            Err(VcsError::NotFound(path.to_string()))
        }

        async fn get_branch(&self, _: &str, name: &str) -> Result<BranchInfo, VcsError> {
            Err(VcsError::NotFound(name.to_string()))
        }

        async fn list_pull_request_file(
            &self,
            _: &str,
            _: &str,
        ) -> Result<Vec<PullRequestFile>, VcsError> {
            Ok(vec![])
        }

        async fn list_pull_request_comments(
            &self,
            _: &str,
            _: &str,
        ) -> Result<Vec<PullRequestComment>, VcsError> {
            Ok(self.comments.lock().unwrap().clone())
        }

        async fn create_pull_request_comment(
            &self,
            _: &str,
            _: &str,
            body: &str,
        ) -> Result<(), VcsError> {
            let mut next_id = self.next_id.lock().unwrap();
            *next_id += 1;
            self.comments.lock().unwrap().push(PullRequestComment {
                id: next_id.to_string(),
                content: body.to_string(),
            });
            Ok(())
        }

        async fn update_pull_request_comment(
            &self,
            _: &str,
            _: &str,
            comment_id: &str,
            body: &str,
        ) -> Result<(), VcsError> {
            let mut comments = self.comments.lock().unwrap();
            let comment = comments
                .iter_mut()
                .find(|c| c.id == comment_id)
                .ok_or_else(|| VcsError::NotFound(comment_id.to_string()))?;
            comment.content = body.to_string();
            Ok(())
        }

        async fn create_webhook(&self, _: &str, _: &WebhookCreate) -> Result<String, VcsError> {
            Ok("1".into())
        }

        async fn delete_webhook(&self, _: &str, _: &str) -> Result<(), VcsError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn repeated_upserts_converge_to_one_comment() {
        let board = CommentBoard::default();
        board
            .create_pull_request_comment("r", "1", "LGTM from a human")
            .await
            .unwrap();

        let first = format!("{COMMENT_PREFIX_SQL_REVIEW}\n\n1 warning");
        let second = format!("{COMMENT_PREFIX_SQL_REVIEW}\n\nall clear");
        let outcome = upsert_comment(
            &board,
            "r",
            "1",
            &first,
            starts_with(COMMENT_PREFIX_SQL_REVIEW),
            true,
        )
        .await
        .unwrap();
        assert_eq!(outcome, UpsertOutcome::Created);

        let outcome = upsert_comment(
            &board,
            "r",
            "1",
            &second,
            starts_with(COMMENT_PREFIX_SQL_REVIEW),
            true,
        )
        .await
        .unwrap();
        assert_eq!(
            outcome,
            UpsertOutcome::Updated {
                comment_id: "2".into()
            }
        );

        let comments = board.comments.lock().unwrap();
        let review: Vec<_> = comments
            .iter()
            .filter(|c| c.content.starts_with(COMMENT_PREFIX_SQL_REVIEW))
            .collect();
        assert_eq!(review.len(), 1);
        assert_eq!(review[0].content, second);
        assert_eq!(comments.len(), 2);
    }

    #[tokio::test]
    async fn does_not_create_when_not_requested() {
        let board = CommentBoard::default();
        let outcome = upsert_comment(
            &board,
            "r",
            "1",
            "## SQL Review\n\npassed",
            starts_with(COMMENT_PREFIX_SQL_REVIEW),
            false,
        )
        .await
        .unwrap();
        assert_eq!(outcome, UpsertOutcome::Skipped);
        assert!(board.comments.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn prefixes_do_not_collide() {
        let board = CommentBoard::default();
        upsert_comment(&board, "r", "1", "## SQL Review\nx", starts_with(COMMENT_PREFIX_SQL_REVIEW), true)
            .await
            .unwrap();
        upsert_comment(&board, "r", "1", "## GitOps Bot\ny", starts_with(COMMENT_PREFIX_BOT), true)
            .await
            .unwrap();
        assert_eq!(board.comments.lock().unwrap().len(), 2);
    }
}
