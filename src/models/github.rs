//! Entities returned by the GitHub REST API. Unknown response fields are
//! ignored; only what the engine consumes is modeled.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct GitHubUser {
    pub login: String,
    #[serde(default)]
    pub id: Option<i64>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct GitHubRepository {
    pub id: i64,
    pub name: String,
    /// `owner/name`.
    pub full_name: String,
    pub owner: GitHubUser,
    #[serde(default = "GitHubRepository::default_branch_name")]
    pub default_branch: String,
    pub ssh_url: String,
    pub clone_url: String,
    #[serde(default)]
    pub html_url: Option<String>,
}

impl GitHubRepository {
    fn default_branch_name() -> String {
        "main".to_string()
    }

    /// Split `full_name` into `(owner, repository)`.
    pub fn owner_and_name(&self) -> (&str, &str) {
        match self.full_name.split_once('/') {
            Some((owner, name)) => (owner, name),
            None => (self.owner.login.as_str(), self.name.as_str()),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct GitHubWorkflowRun {
    pub id: i64,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub conclusion: Option<String>,
}

impl GitHubWorkflowRun {
    /// The effective state of a run: its conclusion once completed,
    /// otherwise its in-flight status.
    pub fn effective_status(&self) -> Option<&str> {
        if self.status.as_deref() == Some("completed") {
            if let Some(conclusion) = self.conclusion.as_deref() {
                return Some(conclusion);
            }
        }
        self.status.as_deref()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct GitHubWorkflowJob {
    pub name: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub conclusion: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct GitHubEnvironment {
    #[serde(default)]
    pub id: Option<i64>,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct GitHubOrganization {
    pub login: String,
    #[serde(default)]
    pub id: Option<i64>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct GitHubTeam {
    pub slug: String,
    #[serde(default)]
    pub permission: Option<String>,
}

/// Result of synchronizing repository environments with the registry.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct EnvironmentSyncResult {
    pub success: bool,
    pub created: Vec<String>,
    pub deleted: Vec<String>,
    pub errors: Vec<String>,
    pub total_operations: usize,
}
