//! Command-line interface definition.

use std::path::PathBuf;

use clap::Parser;

use crate::controller::Target;

#[derive(Debug, Parser)]
#[command(
    name = "imbi-automations",
    version,
    about = "Fleet-wide repository automation engine"
)]
pub struct Cli {
    /// Configuration file
    #[arg(value_name = "CONFIG")]
    pub config: PathBuf,

    /// Path to the directory containing the workflow to run
    #[arg(value_name = "WORKFLOW")]
    pub workflow: PathBuf,

    #[command(flatten)]
    pub target: TargetArgs,

    #[arg(short, long)]
    pub verbose: bool,

    /// Maximum number of projects processed concurrently
    #[arg(long, value_name = "N", default_value_t = 5)]
    pub max_concurrency: usize,

    /// Cancel remaining projects after the first failure
    #[arg(long)]
    pub exit_on_error: bool,

    /// Preserve failed workspaces for debugging
    #[arg(long)]
    pub preserve_on_error: bool,

    /// Directory for preserved failure workspaces
    #[arg(long, value_name = "PATH")]
    pub error_dir: Option<PathBuf>,

    /// Skip projects whose slug sorts before this one
    #[arg(long, value_name = "SLUG")]
    pub start_from_project: Option<String>,
}

/// Mutually exclusive target selectors; exactly one is required.
#[derive(Debug, clap::Args)]
#[group(required = true, multiple = false)]
pub struct TargetArgs {
    /// Process a single project by Imbi project ID
    #[arg(long, value_name = "ID")]
    pub imbi_project_id: Option<i64>,

    /// Process all Imbi projects of a specific type slug
    #[arg(long, value_name = "SLUG")]
    pub imbi_project_type: Option<String>,

    /// Process all Imbi projects
    #[arg(long)]
    pub all_imbi_projects: bool,

    /// Process a single GitHub repository by URL
    #[arg(long, value_name = "URL")]
    pub github_repository: Option<String>,

    /// Process all repositories in a GitHub organization
    #[arg(long, value_name = "ORG")]
    pub github_organization: Option<String>,

    /// Process all GitHub repositories across all organizations
    #[arg(long)]
    pub all_github_repositories: bool,

    /// Process a single GitLab repository by URL
    #[arg(long, value_name = "URL")]
    pub gitlab_repository: Option<String>,

    /// Recursively process all repositories in a GitLab group
    #[arg(long, value_name = "GROUP")]
    pub gitlab_group: Option<String>,

    /// Process all GitLab repositories
    #[arg(long)]
    pub all_gitlab_repositories: bool,
}

impl TargetArgs {
    pub fn target(&self) -> Target {
        if let Some(id) = self.imbi_project_id {
            Target::ImbiProject(id)
        } else if let Some(slug) = &self.imbi_project_type {
            Target::ImbiProjectType(slug.clone())
        } else if self.all_imbi_projects {
            Target::AllImbiProjects
        } else if let Some(url) = &self.github_repository {
            Target::GitHubRepository(url.clone())
        } else if let Some(org) = &self.github_organization {
            Target::GitHubOrganization(org.clone())
        } else if self.all_github_repositories {
            Target::AllGitHubRepositories
        } else if let Some(url) = &self.gitlab_repository {
            Target::GitLabRepository(url.clone())
        } else if let Some(group) = &self.gitlab_group {
            Target::GitLabGroup(group.clone())
        } else {
            Target::AllGitLabRepositories
        }
    }
}
