//! Migration file parsing and per-push file deduplication

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

const SEPARATORS: &[char] = &['_', '-', '#'];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeType {
    Migrate,
    Data,
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeType::Migrate => f.write_str("MIGRATE"),
            ChangeType::Data => f.write_str("DATA"),
        }
    }
}

/// A migration file touched by a pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileChange {
    pub path: String,
    pub version: String,
    pub change_type: ChangeType,
    pub description: String,
    pub content: String,
    pub web_url: Option<String>,
}

impl FileChange {
    pub fn file_name(&self) -> &str {
        file_name(&self.path)
    }
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Splits an optional classifier off the front of `rest`.
fn take_classifier(rest: &str) -> (ChangeType, &str) {
    const CLASSIFIERS: [(&str, ChangeType); 4] = [
        ("migrate", ChangeType::Migrate),
        ("ddl", ChangeType::Migrate),
        ("dml", ChangeType::Data),
        ("data", ChangeType::Data),
    ];
    for (word, change_type) in CLASSIFIERS {
        let Some(prefix) = rest.get(..word.len()) else {
            continue;
        };
        if !prefix.eq_ignore_ascii_case(word) {
            continue;
        }
        let tail = &rest[word.len()..];
        if tail.is_empty() || tail.starts_with(SEPARATORS) {
            return (change_type, tail);
        }
    }
    (ChangeType::Migrate, rest)
}

/// Parses `0003_ddl_add_index.sql` style paths.
///
/// Returns `None` for anything that is not a `.sql` file with a leading version number.
pub fn parse_file_change(path: &str) -> Option<FileChange> {
    let name = file_name(path);
    let stem = name
        .len()
        .checked_sub(4)
        .filter(|&i| name.is_char_boundary(i) && name[i..].eq_ignore_ascii_case(".sql"))
        .map(|i| &name[..i])?;

    let digits = stem.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return None;
    }
    let version = &stem[..digits];
    let rest = stem[digits..].trim_start_matches(SEPARATORS);
    let (change_type, rest) = take_classifier(rest);
    let description = rest.trim_matches(SEPARATORS);

    Some(FileChange {
        path: path.to_string(),
        version: version.to_string(),
        change_type,
        description: description.to_string(),
        content: String::new(),
        web_url: None,
    })
}

/// `add_index` becomes `Add index`.
pub fn humanize_description(description: &str) -> String {
    let spaced = description.replace(SEPARATORS, " ");
    let mut chars = spaced.trim().chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub id: String,
    pub title: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub added: Vec<String>,
    #[serde(default)]
    pub modified: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushEvent {
    pub git_ref: String,
    pub before: String,
    pub after: String,
    pub commits: Vec<Commit>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FileItemType {
    Added,
    Modified,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DistinctFileItem {
    pub created_ts: DateTime<Utc>,
    pub commit: Commit,
    pub file_name: String,
    pub item_type: FileItemType,
    pub is_sql: bool,
}

/// One entry per file across all commits of a push.
///
/// Entries keep the content of the newest commit that touched the file, stay `Added`
/// once any commit added the file, and are ordered by first appearance.
pub fn get_distinct_file_list(event: &PushEvent) -> Vec<DistinctFileItem> {
    let mut items: Vec<DistinctFileItem> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for commit in &event.commits {
        let touched = commit
            .added
            .iter()
            .map(|f| (f, FileItemType::Added))
            .chain(commit.modified.iter().map(|f| (f, FileItemType::Modified)));

        for (file, item_type) in touched {
            let item = DistinctFileItem {
                created_ts: commit.timestamp,
                commit: commit.clone(),
                file_name: file.clone(),
                item_type,
                is_sql: file.to_ascii_lowercase().ends_with(".sql"),
            };

            match index.get(file) {
                Some(&i) => {
                    let existing = &mut items[i];
                    if existing.created_ts >= item.created_ts {
                        if item.item_type == FileItemType::Added {
                            existing.item_type = FileItemType::Added;
                        }
                    } else {
                        let was_added = existing.item_type == FileItemType::Added;
                        *existing = item;
                        if was_added {
                            existing.item_type = FileItemType::Added;
                        }
                    }
                }
                None => {
                    index.insert(file.clone(), items.len());
                    items.push(item);
                }
            }
        }
    }
    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn commit(id: &str, minute: u32, added: &[&str], modified: &[&str]) -> Commit {
        Commit {
            id: id.to_string(),
            title: format!("commit {id}"),
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 12, minute, 0).unwrap(),
            added: added.iter().map(|s| s.to_string()).collect(),
            modified: modified.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn push(commits: Vec<Commit>) -> PushEvent {
        PushEvent {
            git_ref: "refs/heads/main".into(),
            before: "0".repeat(40),
            after: "f".repeat(40),
            commits,
        }
    }

    #[test]
    fn parses_versioned_ddl_file() {
        let change = parse_file_change("migrations/0003_ddl_add_index.sql").unwrap();
        assert_eq!(change.version, "0003");
        assert_eq!(change.change_type, ChangeType::Migrate);
        assert_eq!(change.description, "add_index");
        assert_eq!(change.file_name(), "0003_ddl_add_index.sql");
    }

    #[test]
    fn parses_data_classifiers() {
        let dml = parse_file_change("db/12-dml-seed_users.sql").unwrap();
        assert_eq!(dml.version, "12");
        assert_eq!(dml.change_type, ChangeType::Data);
        assert_eq!(dml.description, "seed_users");

        let data = parse_file_change("db/20240101#data#backfill.SQL").unwrap();
        assert_eq!(data.change_type, ChangeType::Data);
        assert_eq!(data.description, "backfill");
    }

    #[test]
    fn classifier_must_be_a_whole_token() {
        let change = parse_file_change("0007_database_cleanup.sql").unwrap();
        assert_eq!(change.change_type, ChangeType::Migrate);
        assert_eq!(change.description, "database_cleanup");

        let bare = parse_file_change("0008.sql").unwrap();
        assert_eq!(bare.change_type, ChangeType::Migrate);
        assert_eq!(bare.description, "");

        let migrate = parse_file_change("0009_migrate.sql").unwrap();
        assert_eq!(migrate.description, "");
    }

    #[test]
    fn skips_non_migration_files() {
        assert!(parse_file_change("readme.md").is_none());
        assert!(parse_file_change("migrations/init.sql").is_none());
        assert!(parse_file_change("migrations/0001_init.sql.bak").is_none());
        assert!(parse_file_change("sql").is_none());
    }

    #[test]
    fn humanizes_descriptions() {
        assert_eq!(humanize_description("add_index"), "Add index");
        assert_eq!(humanize_description(""), "");
    }

    #[test]
    fn added_then_modified_stays_added_with_latest_commit() {
        let event = push(vec![
            commit("c1", 0, &["f.sql"], &[]),
            commit("c2", 5, &[], &["f.sql"]),
        ]);
        let items = get_distinct_file_list(&event);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].item_type, FileItemType::Added);
        assert_eq!(items[0].commit.id, "c2");
        assert!(items[0].is_sql);
    }

    #[test]
    fn reordered_commits_yield_the_same_entries() {
        let forward = get_distinct_file_list(&push(vec![
            commit("c1", 0, &["f.sql"], &[]),
            commit("c2", 5, &[], &["f.sql"]),
        ]));
        let reversed = get_distinct_file_list(&push(vec![
            commit("c2", 5, &[], &["f.sql"]),
            commit("c1", 0, &["f.sql"], &[]),
        ]));
        assert_eq!(forward.len(), reversed.len());
        assert_eq!(reversed[0].file_name, "f.sql");
        assert_eq!(reversed[0].item_type, FileItemType::Added);
        assert_eq!(reversed[0].commit.id, "c2");
    }

    #[test]
    fn keeps_first_insertion_order() {
        let event = push(vec![
            commit("c1", 0, &["b.sql", "a.sql"], &[]),
            commit("c2", 1, &["c.sql"], &["a.sql"]),
            commit("c3", 2, &[], &["b.sql", "README.md"]),
        ]);
        let names: Vec<_> = get_distinct_file_list(&event)
            .into_iter()
            .map(|i| (i.file_name, i.item_type, i.commit.id))
            .collect();
        assert_eq!(
            names,
            vec![
                ("b.sql".to_string(), FileItemType::Added, "c3".to_string()),
                ("a.sql".to_string(), FileItemType::Added, "c2".to_string()),
                ("c.sql".to_string(), FileItemType::Added, "c2".to_string()),
                ("README.md".to_string(), FileItemType::Modified, "c3".to_string()),
            ]
        );
    }
}
