//! Entities returned by the GitLab REST API.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct GitLabProject {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    /// `group/subgroup/project`.
    pub path_with_namespace: String,
    #[serde(default = "GitLabProject::default_branch_name")]
    pub default_branch: String,
    pub ssh_url_to_repo: String,
    pub http_url_to_repo: String,
}

impl GitLabProject {
    fn default_branch_name() -> String {
        "main".to_string()
    }
}
