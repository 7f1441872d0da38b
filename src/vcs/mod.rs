//! Provider abstraction over the supported version control systems

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::config::VcsProviderConfig;
use crate::error::VcsError;

pub mod azure;
pub mod bitbucket;
pub mod github;
pub mod gitlab;
pub mod transport;

pub use transport::{Credential, TokenState, TokenStore, Transport};

/// Page size used by every paginated listing.
pub const API_PAGE_SIZE: usize = 100;

/// Pull requests authored by this identity are ignored by the webhook pipeline.
pub const BOT_AUTHOR_EMAIL: &str = "gitops-bot@noreply.local";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VcsType {
    #[serde(rename = "GITHUB")]
    GitHub,
    #[serde(rename = "GITLAB")]
    GitLab,
    #[serde(rename = "BITBUCKET")]
    Bitbucket,
    #[serde(rename = "AZURE_DEVOPS")]
    AzureDevOps,
}

impl fmt::Display for VcsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VcsType::GitHub => "GITHUB",
            VcsType::GitLab => "GITLAB",
            VcsType::Bitbucket => "BITBUCKET",
            VcsType::AzureDevOps => "AZURE_DEVOPS",
        };
        f.write_str(name)
    }
}

impl FromStr for VcsType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GITHUB" => Ok(VcsType::GitHub),
            "GITLAB" => Ok(VcsType::GitLab),
            "BITBUCKET" => Ok(VcsType::Bitbucket),
            "AZURE_DEVOPS" | "AZURE" => Ok(VcsType::AzureDevOps),
            other => Err(format!("unknown VCS type: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Repository {
    pub id: String,
    pub name: String,
    pub full_path: String,
    pub web_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BranchInfo {
    pub name: String,
    pub last_commit_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PullRequestFile {
    pub path: String,
    pub last_commit_id: String,
    pub is_deleted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PullRequestComment {
    pub id: String,
    pub content: String,
}

/// Parameters for registering a webhook on a repository.
#[derive(Debug, Clone)]
pub struct WebhookCreate {
    pub url: String,
    pub secret: String,
}

#[async_trait]
pub trait VcsProvider: Send + Sync {
    fn vcs_type(&self) -> VcsType;

    /// Repositories the caller administers, across all pages.
    async fn fetch_all_repository_list(&self) -> Result<Vec<Repository>, VcsError>;

    async fn read_file_content(
        &self,
        repo_id: &str,
        path: &str,
        git_ref: &str,
    ) -> Result<String, VcsError>;

    async fn get_branch(&self, repo_id: &str, name: &str) -> Result<BranchInfo, VcsError>;

    async fn list_pull_request_file(
        &self,
        repo_id: &str,
        pr_id: &str,
    ) -> Result<Vec<PullRequestFile>, VcsError>;

    async fn list_pull_request_comments(
        &self,
        repo_id: &str,
        pr_id: &str,
    ) -> Result<Vec<PullRequestComment>, VcsError>;

    async fn create_pull_request_comment(
        &self,
        repo_id: &str,
        pr_id: &str,
        body: &str,
    ) -> Result<(), VcsError>;

    async fn update_pull_request_comment(
        &self,
        repo_id: &str,
        pr_id: &str,
        comment_id: &str,
        body: &str,
    ) -> Result<(), VcsError>;

    async fn create_webhook(&self, repo_id: &str, payload: &WebhookCreate)
    -> Result<String, VcsError>;

    async fn delete_webhook(&self, repo_id: &str, webhook_id: &str) -> Result<(), VcsError>;
}

/// Everything a provider needs to talk to one VCS instance.
#[derive(Clone)]
pub struct ProviderConfig {
    pub instance_url: String,
    pub transport: Transport,
}

impl ProviderConfig {
    pub fn new(instance_url: impl Into<String>, transport: Transport) -> Self {
        Self {
            instance_url: instance_url.into().trim_end_matches('/').to_string(),
            transport,
        }
    }

    /// Builds the per-request configuration from stored provider settings.
    ///
    /// A token previously refreshed and persisted wins over the configured one.
    pub fn from_settings(
        client: Client,
        settings: &VcsProviderConfig,
        stored: Option<TokenState>,
        redirect_uri: Option<String>,
        store: Option<Arc<dyn TokenStore>>,
    ) -> Self {
        let access_token = settings.access_token.expose().to_string();
        let credential = match &settings.username {
            Some(username) => Credential::Basic {
                username: username.clone(),
                password: access_token,
            },
            None => Credential::Bearer(access_token),
        };
        let token = stored.unwrap_or(TokenState {
            credential,
            refresh_token: settings
                .refresh_token
                .as_ref()
                .map(|s| s.expose().to_string()),
            expires_at: None,
        });

        let mut transport = Transport::new(client, token);
        if settings.supports_refresh() {
            transport = transport.with_refresher(Arc::new(
                transport::OAuthRefresher::for_provider(settings, redirect_uri, store),
            ));
        }
        Self::new(settings.instance_url.clone(), transport)
    }
}

pub type ProviderConstructor = fn(ProviderConfig) -> Box<dyn VcsProvider>;

/// Maps each VCS kind to the constructor of its provider. Built once at start-up.
pub struct ProviderRegistry {
    constructors: HashMap<VcsType, ProviderConstructor>,
}

#[derive(Default)]
pub struct ProviderRegistryBuilder {
    constructors: HashMap<VcsType, ProviderConstructor>,
}

impl ProviderRegistryBuilder {
    /// Panics when `kind` is already registered.
    pub fn register(mut self, kind: VcsType, constructor: ProviderConstructor) -> Self {
        if self.constructors.insert(kind, constructor).is_some() {
            panic!("VCS provider {} registered twice", kind);
        }
        self
    }

    pub fn build(self) -> ProviderRegistry {
        ProviderRegistry {
            constructors: self.constructors,
        }
    }
}

impl ProviderRegistry {
    pub fn builder() -> ProviderRegistryBuilder {
        ProviderRegistryBuilder::default()
    }

    pub fn with_defaults() -> Self {
        Self::builder()
            .register(VcsType::GitHub, github::new_provider)
            .register(VcsType::GitLab, gitlab::new_provider)
            .register(VcsType::Bitbucket, bitbucket::new_provider)
            .register(VcsType::AzureDevOps, azure::new_provider)
            .build()
    }

    /// A fresh provider instance for `kind`, or `None` if nothing is registered.
    pub fn get(&self, kind: VcsType, config: ProviderConfig) -> Option<Box<dyn VcsProvider>> {
        self.constructors.get(&kind).map(|constructor| constructor(config))
    }

    pub fn kinds(&self) -> Vec<VcsType> {
        self.constructors.keys().copied().collect()
    }
}

/// Strips `refs/heads/` from a ref name.
pub fn branch_from_ref(git_ref: &str) -> Option<&str> {
    git_ref.strip_prefix("refs/heads/")
}

/// Encodes each segment of a repository path, leaving the separators intact.
pub(crate) fn encode_path(path: &str) -> String {
    path.trim_start_matches('/')
        .split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_builds_one_provider_per_kind() {
        let registry = ProviderRegistry::with_defaults();
        let mut kinds = registry.kinds();
        kinds.sort_by_key(|k| k.to_string());
        assert_eq!(kinds.len(), 4);

        let config = ProviderConfig::new(
            "https://gitlab.example.com/",
            Transport::new(Client::new(), TokenState::bearer("t")),
        );
        let provider = registry.get(VcsType::GitLab, config).unwrap();
        assert_eq!(provider.vcs_type(), VcsType::GitLab);
    }

    #[test]
    #[should_panic(expected = "registered twice")]
    fn duplicate_registration_panics() {
        ProviderRegistry::builder()
            .register(VcsType::GitHub, github::new_provider)
            .register(VcsType::GitHub, github::new_provider);
    }

    #[test]
    fn vcs_type_round_trips_through_strings() {
        for kind in [
            VcsType::GitHub,
            VcsType::GitLab,
            VcsType::Bitbucket,
            VcsType::AzureDevOps,
        ] {
            assert_eq!(kind.to_string().parse::<VcsType>().unwrap(), kind);
        }
        assert!("svn".parse::<VcsType>().is_err());
    }

    #[test]
    fn branch_ref_requires_heads_prefix() {
        assert_eq!(branch_from_ref("refs/heads/main"), Some("main"));
        assert_eq!(branch_from_ref("refs/tags/v1"), None);
    }

    #[test]
    fn encodes_path_segments() {
        assert_eq!(encode_path("/db/my file.sql"), "db/my%20file.sql");
    }
}
