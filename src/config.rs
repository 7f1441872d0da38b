//! TOML configuration: server settings, VCS providers and project connectors

use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::Path;

use crate::error::{GitOpsError, Result};
use crate::vcs::VcsType;

pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:8888";
pub const DEFAULT_DATABASE_PATH: &str = "data/gitops.db";
const DEFAULT_RELEASE_WORKERS: usize = 2;
const DEFAULT_RELEASE_QUEUE_CAPACITY: usize = 64;

/// A string that never shows up in `Debug` output
#[derive(Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            f.write_str("Secret(\"\")")
        } else {
            f.write_str("Secret(***)")
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct GitOpsConfig {
    #[serde(default)]
    pub server: ServerConfig,
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub vcs_provider: Vec<VcsProviderConfig>,
    #[serde(default)]
    pub project: Vec<ProjectConfig>,
    /// Catalog entries synced into the store at startup
    #[serde(default)]
    pub environment: Vec<EnvironmentSeed>,
    #[serde(default)]
    pub database: Vec<DatabaseSeed>,
    #[serde(default)]
    pub user: Vec<UserSeed>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EnvironmentSeed {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub order: i64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseSeed {
    pub name: String,
    pub instance: String,
    pub environment: String,
    pub project: String,
    #[serde(default = "default_engine")]
    pub engine: String,
}

fn default_engine() -> String {
    "MYSQL".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct UserSeed {
    pub email: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Public URL of the platform, used for links in PR comments
    #[serde(default)]
    pub external_url: String,
    #[serde(default = "default_database_path")]
    pub database_path: String,
    pub log_dir: Option<String>,
    /// Rotated log files kept in `log_dir`
    pub log_max_files: Option<usize>,
    #[serde(default = "default_release_workers")]
    pub release_workers: usize,
    #[serde(default = "default_release_queue_capacity")]
    pub release_queue_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            external_url: String::new(),
            database_path: default_database_path(),
            log_dir: None,
            log_max_files: None,
            release_workers: DEFAULT_RELEASE_WORKERS,
            release_queue_capacity: DEFAULT_RELEASE_QUEUE_CAPACITY,
        }
    }
}

fn default_bind_address() -> String {
    DEFAULT_BIND_ADDRESS.to_string()
}

fn default_database_path() -> String {
    DEFAULT_DATABASE_PATH.to_string()
}

fn default_release_workers() -> usize {
    DEFAULT_RELEASE_WORKERS
}

fn default_release_queue_capacity() -> usize {
    DEFAULT_RELEASE_QUEUE_CAPACITY
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkspaceConfig {
    pub id: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct VcsProviderConfig {
    pub id: String,
    #[serde(rename = "type")]
    pub vcs_type: VcsType,
    pub instance_url: String,
    pub access_token: Secret,
    /// Set for basic auth (Bitbucket app passwords, Azure DevOps PATs)
    pub username: Option<String>,
    pub refresh_token: Option<Secret>,
    pub client_id: Option<String>,
    pub client_secret: Option<Secret>,
}

impl VcsProviderConfig {
    /// OAuth refresh is only possible with a refresh token and client credentials.
    pub fn supports_refresh(&self) -> bool {
        self.refresh_token.as_ref().is_some_and(|s| !s.is_empty())
            && self.client_id.as_ref().is_some_and(|s| !s.is_empty())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProjectConfig {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub connector: Vec<ConnectorConfig>,
}

impl ProjectConfig {
    pub fn find_connector(&self, id: &str) -> Option<&ConnectorConfig> {
        self.connector.iter().find(|c| c.id == id)
    }
}

/// Action taken when a pull request lands on the connector's branch
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MergeAction {
    #[default]
    Issue,
    Release,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ConnectorConfig {
    pub id: String,
    pub vcs_provider: String,
    pub external_repo_id: String,
    /// Browser URL of the repository, used to build file links
    #[serde(default)]
    pub web_url: String,
    pub branch: String,
    #[serde(default)]
    pub base_directory: String,
    #[serde(default)]
    pub webhook_secret: Secret,
    pub database: Option<String>,
    pub database_group: Option<String>,
    #[serde(default)]
    pub merge_action: MergeAction,
}

impl ConnectorConfig {
    /// Returns true if `path` is under the configured base directory.
    pub fn contains_path(&self, path: &str) -> bool {
        let base = self.base_directory.trim_matches('/');
        if base.is_empty() {
            return true;
        }
        path.trim_start_matches('/')
            .strip_prefix(base)
            .is_some_and(|rest| rest.starts_with('/'))
    }
}

impl GitOpsConfig {
    pub fn find_project(&self, id: &str) -> Option<&ProjectConfig> {
        self.project.iter().find(|p| p.id == id)
    }

    pub fn find_vcs_provider(&self, id: &str) -> Option<&VcsProviderConfig> {
        self.vcs_provider.iter().find(|p| p.id == id)
    }

    pub fn validate(&self) -> Result<()> {
        if self.workspace.id.is_empty() {
            return Err(GitOpsError::ConfigError("workspace.id must not be empty".into()));
        }

        let mut providers = HashSet::new();
        for provider in &self.vcs_provider {
            if !providers.insert(provider.id.as_str()) {
                return Err(GitOpsError::ConfigError(format!(
                    "duplicate vcs_provider id '{}'",
                    provider.id
                )));
            }
        }

        let mut projects = HashSet::new();
        for project in &self.project {
            if !projects.insert(project.id.as_str()) {
                return Err(GitOpsError::ConfigError(format!(
                    "duplicate project id '{}'",
                    project.id
                )));
            }
            let mut connectors = HashSet::new();
            for connector in &project.connector {
                if !connectors.insert(connector.id.as_str()) {
                    return Err(GitOpsError::ConfigError(format!(
                        "duplicate connector id '{}' in project '{}'",
                        connector.id, project.id
                    )));
                }
                if !providers.contains(connector.vcs_provider.as_str()) {
                    return Err(GitOpsError::ConfigError(format!(
                        "connector '{}' in project '{}' references unknown vcs_provider '{}'",
                        connector.id, project.id, connector.vcs_provider
                    )));
                }
            }
        }

        let environments: HashSet<&str> = self.environment.iter().map(|e| e.id.as_str()).collect();
        for database in &self.database {
            if !environments.contains(database.environment.as_str()) {
                return Err(GitOpsError::ConfigError(format!(
                    "database '{}' references unknown environment '{}'",
                    database.name, database.environment
                )));
            }
        }
        Ok(())
    }
}

pub fn parse_config(contents: &str) -> Result<GitOpsConfig> {
    let config: GitOpsConfig = toml::from_str(contents)?;
    config.validate()?;
    Ok(config)
}

/// Load and parse the configuration file
pub fn load_config(path: impl AsRef<Path>) -> Result<GitOpsConfig> {
    let path = path.as_ref();
    let config_str = fs::read_to_string(path).map_err(|e| {
        GitOpsError::ConfigError(format!(
            "Failed to read config file '{}': {}",
            path.display(),
            e
        ))
    })?;

    parse_config(&config_str).map_err(|e| {
        GitOpsError::ConfigError(format!(
            "Failed to parse config file '{}': {}",
            path.display(),
            e
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[server]
external_url = "https://db.example.com"

[workspace]
id = "ws1"

[[vcs_provider]]
id = "gh"
type = "GITHUB"
instance_url = "https://github.com"
access_token = "ghp_secret"

[[project]]
id = "hr"
title = "HR"

[[project.connector]]
id = "main"
vcs_provider = "gh"
external_repo_id = "acme/hr"
web_url = "https://github.com/acme/hr"
branch = "main"
base_directory = "migrations"
webhook_secret = "s3cret"
merge_action = "release"
"#;

    #[test]
    fn parses_sample_config() {
        let config = parse_config(SAMPLE).unwrap();
        assert_eq!(config.server.bind_address, DEFAULT_BIND_ADDRESS);
        assert_eq!(config.server.release_workers, 2);
        let project = config.find_project("hr").unwrap();
        let connector = project.find_connector("main").unwrap();
        assert_eq!(connector.merge_action, MergeAction::Release);
        assert_eq!(connector.webhook_secret.expose(), "s3cret");
        let provider = config.find_vcs_provider("gh").unwrap();
        assert_eq!(provider.vcs_type, VcsType::GitHub);
        assert!(!provider.supports_refresh());
    }

    #[test]
    fn secrets_are_redacted_in_debug_output() {
        let config = parse_config(SAMPLE).unwrap();
        let dump = format!("{:?}", config);
        assert!(!dump.contains("ghp_secret"));
        assert!(!dump.contains("s3cret"));
    }

    #[test]
    fn rejects_connector_with_unknown_provider() {
        let broken = SAMPLE.replace("vcs_provider = \"gh\"", "vcs_provider = \"gl\"");
        let err = parse_config(&broken).unwrap_err();
        assert!(err.to_string().contains("unknown vcs_provider"));
    }

    #[test]
    fn base_directory_matching() {
        let config = parse_config(SAMPLE).unwrap();
        let connector = &config.project[0].connector[0];
        assert!(connector.contains_path("migrations/0001_init.sql"));
        assert!(connector.contains_path("migrations/prod/0001_init.sql"));
        assert!(!connector.contains_path("migrations_old/0001_init.sql"));
        assert!(!connector.contains_path("docs/readme.md"));

        let mut root = connector.clone();
        root.base_directory = String::new();
        assert!(root.contains_path("0001_init.sql"));
    }

    #[test]
    fn parses_catalog_seeds() {
        let with_catalog = format!(
            "{}\n{}",
            SAMPLE,
            r#"
[[environment]]
id = "prod"
title = "Production"
order = 2

[[database]]
name = "hr"
instance = "mysql-prod"
environment = "prod"
project = "hr"

[[user]]
email = "jane@acme.com"
name = "Jane"
"#
        );
        let config = parse_config(&with_catalog).unwrap();
        assert_eq!(config.environment[0].order, 2);
        assert_eq!(config.database[0].engine, "MYSQL");
        assert_eq!(config.user[0].email, "jane@acme.com");

        let broken = with_catalog.replace("environment = \"prod\"", "environment = \"qa\"");
        let err = parse_config(&broken).unwrap_err();
        assert!(err.to_string().contains("unknown environment"));
    }
}
