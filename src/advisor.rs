//! Built-in SQL review rules
//!
//! A small, regex-driven reviewer used when no external review service is wired in.

use async_trait::async_trait;
use regex::Regex;

use crate::changes::ChangeType;
use crate::error::{GitOpsError, Result};
use crate::services::{Advice, AdviceStatus, ReviewRequest, ReviewResult, SqlReviewService};

struct Rule {
    title: &'static str,
    status: AdviceStatus,
    message: &'static str,
    applies_to: Option<ChangeType>,
    check: fn(&Patterns, &str) -> bool,
}

struct Patterns {
    select_all: Regex,
    update_or_delete: Regex,
    where_clause: Regex,
    drop_database: Regex,
    ddl: Regex,
    insert_without_columns: Regex,
}

const RULES: &[Rule] = &[
    Rule {
        title: "statement.select.no-select-all",
        status: AdviceStatus::Warning,
        message: "\"SELECT *\" is discouraged, list the columns explicitly",
        applies_to: None,
        check: |p, stmt| p.select_all.is_match(stmt),
    },
    Rule {
        title: "statement.where.require",
        status: AdviceStatus::Error,
        message: "UPDATE and DELETE statements must have a WHERE clause",
        applies_to: None,
        check: |p, stmt| p.update_or_delete.is_match(stmt) && !p.where_clause.is_match(stmt),
    },
    Rule {
        title: "database.drop-database",
        status: AdviceStatus::Error,
        message: "Dropping a database is not allowed",
        applies_to: None,
        check: |p, stmt| p.drop_database.is_match(stmt),
    },
    Rule {
        title: "statement.data.no-ddl",
        status: AdviceStatus::Warning,
        message: "Data changes should not alter the schema, use a migrate file instead",
        applies_to: Some(ChangeType::Data),
        check: |p, stmt| p.ddl.is_match(stmt),
    },
    Rule {
        title: "statement.insert.must-specify-column",
        status: AdviceStatus::Warning,
        message: "INSERT statements should list the target columns",
        applies_to: None,
        check: |p, stmt| p.insert_without_columns.is_match(stmt),
    },
];

/// Regex based [`SqlReviewService`]
pub struct RuleAdvisor {
    patterns: Patterns,
}

impl RuleAdvisor {
    pub fn new() -> Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern)
                .map_err(|e| GitOpsError::ServiceError(format!("invalid review rule: {}", e)))
        };
        Ok(Self {
            patterns: Patterns {
                select_all: compile(r"(?is)^\s*SELECT\s+(DISTINCT\s+)?\*")?,
                update_or_delete: compile(r"(?is)^\s*(UPDATE|DELETE)\b")?,
                where_clause: compile(r"(?is)\bWHERE\b")?,
                drop_database: compile(r"(?is)^\s*DROP\s+(DATABASE|SCHEMA)\b")?,
                ddl: compile(r"(?is)^\s*(CREATE|ALTER|DROP|TRUNCATE|RENAME)\b")?,
                insert_without_columns: compile(
                    r"(?is)^\s*INSERT\s+(IGNORE\s+)?INTO\s+[\w`.\x22]+\s+(VALUES|SELECT)\b",
                )?,
            },
        })
    }

    /// Findings for every statement in `sql`, in statement order.
    pub fn review(&self, sql: &str, change_type: ChangeType) -> Vec<Advice> {
        let mut advices = Vec::new();
        for (line, statement) in split_statements(sql) {
            for rule in RULES {
                if rule.applies_to.is_some_and(|t| t != change_type) {
                    continue;
                }
                if (rule.check)(&self.patterns, &statement) {
                    advices.push(Advice {
                        status: rule.status,
                        title: rule.title.to_string(),
                        content: rule.message.to_string(),
                        line,
                    });
                }
            }
        }
        advices
    }
}

/// Splits on `;` outside quotes, returning each statement with its 1-based start line.
///
/// Comments are dropped from the statement text, so rules never match inside them.
fn split_statements(sql: &str) -> Vec<(usize, String)> {
    let mut statements = Vec::new();
    let bytes = sql.as_bytes();
    let mut line = 1;
    let mut current: Vec<u8> = Vec::new();
    let mut start_line: Option<usize> = None;
    let mut quote: Option<u8> = None;
    let mut i = 0;

    let mut finish = |current: &mut Vec<u8>, start_line: &mut Option<usize>| {
        if let Some(first) = start_line.take() {
            let text = String::from_utf8_lossy(current).trim().to_string();
            if !text.is_empty() {
                statements.push((first, text));
            }
        }
        current.clear();
    };

    while i < bytes.len() {
        let b = bytes[i];
        if let Some(q) = quote {
            if b == q {
                quote = None;
            }
            current.push(b);
        } else if b == b'-' && bytes.get(i + 1) == Some(&b'-') {
            while i < bytes.len() && bytes[i] != b'\n' {
                i += 1;
            }
            current.push(b' ');
            continue;
        } else if b == b'/' && bytes.get(i + 1) == Some(&b'*') {
            i += 2;
            while i < bytes.len() && !(bytes[i] == b'*' && bytes.get(i + 1) == Some(&b'/')) {
                if bytes[i] == b'\n' {
                    line += 1;
                }
                i += 1;
            }
            i += 2;
            current.push(b' ');
            continue;
        } else if b == b';' {
            finish(&mut current, &mut start_line);
        } else {
            if !b.is_ascii_whitespace() {
                start_line.get_or_insert(line);
                if matches!(b, b'\'' | b'"' | b'`') {
                    quote = Some(b);
                }
            }
            if start_line.is_some() {
                current.push(b);
            }
        }
        if b == b'\n' {
            line += 1;
        }
        i += 1;
    }
    finish(&mut current, &mut start_line);
    statements
}

#[async_trait]
impl SqlReviewService for RuleAdvisor {
    async fn check(&self, request: ReviewRequest<'_>) -> Result<ReviewResult> {
        let advices = self.review(request.statement, request.change_type);
        let status = advices
            .iter()
            .map(|a| a.status)
            .max()
            .unwrap_or(AdviceStatus::Success);
        Ok(ReviewResult { status, advices })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn advisor() -> RuleAdvisor {
        RuleAdvisor::new().unwrap()
    }

    #[test]
    fn splits_statements_with_lines() {
        let sql = "-- header; not a statement\nCREATE TABLE t (id INT);\n\nINSERT INTO t (id)\nVALUES (';');\n/* block;\ncomment */ SELECT 1";
        let statements = split_statements(sql);
        assert_eq!(statements.len(), 3);
        assert_eq!(statements[0], (2, "CREATE TABLE t (id INT)".to_string()));
        assert_eq!(statements[1].0, 4);
        assert!(statements[1].1.ends_with("(';')"));
        assert_eq!(statements[2], (7, "SELECT 1".to_string()));
    }

    #[test]
    fn flags_select_star_as_warning() {
        let advices = advisor().review("CREATE TABLE t (id INT);\nSELECT * FROM t;", ChangeType::Migrate);
        assert_eq!(advices.len(), 1);
        assert_eq!(advices[0].status, AdviceStatus::Warning);
        assert_eq!(advices[0].title, "statement.select.no-select-all");
        assert_eq!(advices[0].line, 2);
    }

    #[test]
    fn requires_where_on_update_and_delete() {
        let advices = advisor().review(
            "UPDATE t SET a = 1;\nDELETE FROM t WHERE id = 2;\nDELETE FROM t;",
            ChangeType::Data,
        );
        let lines: Vec<usize> = advices
            .iter()
            .filter(|a| a.title == "statement.where.require")
            .map(|a| a.line)
            .collect();
        assert_eq!(lines, [1, 3]);
    }

    #[test]
    fn where_inside_a_comment_does_not_count() {
        let advices = advisor().review(
            "UPDATE t SET a = 1 -- WHERE later\n;\nDELETE FROM t /* WHERE id = 1 */;",
            ChangeType::Data,
        );
        let lines: Vec<usize> = advices
            .iter()
            .filter(|a| a.title == "statement.where.require")
            .map(|a| a.line)
            .collect();
        assert_eq!(lines, [1, 3]);
        assert!(!split_statements("SELECT 1 -- note\nFROM t")[0].1.contains("note"));
    }

    #[test]
    fn ddl_is_only_flagged_in_data_changes() {
        let sql = "ALTER TABLE t ADD COLUMN b INT;";
        assert!(advisor().review(sql, ChangeType::Migrate).is_empty());
        let advices = advisor().review(sql, ChangeType::Data);
        assert_eq!(advices[0].title, "statement.data.no-ddl");
    }

    #[test]
    fn insert_needs_column_list() {
        let advices = advisor().review("INSERT INTO t VALUES (1);", ChangeType::Data);
        assert_eq!(advices[0].title, "statement.insert.must-specify-column");
        assert!(advisor().review("INSERT INTO t (id) VALUES (1);", ChangeType::Data).is_empty());
    }

    #[tokio::test]
    async fn check_reports_the_worst_status() {
        let db = crate::services::Database {
            name: "hr".into(),
            instance: "mysql".into(),
            environment: "prod".into(),
            project_id: "hr".into(),
            engine: "MYSQL".into(),
        };
        let advisor = advisor();
        let result = advisor
            .check(ReviewRequest {
                statement: "SELECT * FROM t; DROP DATABASE hr;",
                change_type: ChangeType::Migrate,
                database: &db,
            })
            .await
            .unwrap();
        assert_eq!(result.status, AdviceStatus::Error);
        assert_eq!(result.advices.len(), 2);

        let clean = advisor
            .check(ReviewRequest {
                statement: "CREATE TABLE t (id INT PRIMARY KEY);",
                change_type: ChangeType::Migrate,
                database: &db,
            })
            .await
            .unwrap();
        assert_eq!(clean.status, AdviceStatus::Success);
        assert!(clean.advices.is_empty());
    }
}
