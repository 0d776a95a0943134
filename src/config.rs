//! Process configuration loaded once from a TOML file at startup.
//!
//! Config file location is the first positional CLI argument. Sections
//! mirror the remote services (`[anthropic]`, `[github]`, `[gitlab]`,
//! `[imbi]`, `[claude_code]`) plus top-level run policy (commit author,
//! AI commits, error preservation).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};

/// API token wrapper that keeps secrets out of `Debug` output and logs.
#[derive(Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Secret(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret(******)")
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct AnthropicConfiguration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<Secret>,
    #[serde(default = "AnthropicConfiguration::default_hostname")]
    pub hostname: String,
    #[serde(default)]
    pub bedrock: bool,
    #[serde(default = "AnthropicConfiguration::default_model")]
    pub model: String,
}

impl AnthropicConfiguration {
    fn default_hostname() -> String {
        "api.anthropic.com".to_string()
    }

    fn default_model() -> String {
        "claude-sonnet-4-5".to_string()
    }
}

impl Default for AnthropicConfiguration {
    fn default() -> Self {
        Self {
            api_key: None,
            hostname: Self::default_hostname(),
            bedrock: false,
            model: Self::default_model(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct GitHubConfiguration {
    pub api_key: Secret,
    #[serde(default = "GitHubConfiguration::default_hostname")]
    pub hostname: String,
}

impl GitHubConfiguration {
    fn default_hostname() -> String {
        "github.com".to_string()
    }

    /// API base URL. github.com uses the dedicated api subdomain;
    /// GitHub Enterprise hosts serve the API under /api/v3.
    pub fn api_base_url(&self) -> String {
        if self.hostname == "github.com" {
            "https://api.github.com".to_string()
        } else {
            format!("https://{}/api/v3", self.hostname)
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct GitLabConfiguration {
    pub api_key: Secret,
    #[serde(default = "GitLabConfiguration::default_hostname")]
    pub hostname: String,
}

impl GitLabConfiguration {
    fn default_hostname() -> String {
        "gitlab.com".to_string()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ImbiConfiguration {
    pub api_key: Secret,
    pub hostname: String,
    /// Name of the Imbi identifier that stores the GitHub repository id.
    #[serde(default = "ImbiConfiguration::default_github_identifier")]
    pub github_identifier: String,
    #[serde(default = "ImbiConfiguration::default_gitlab_identifier")]
    pub gitlab_identifier: String,
    /// Name of the Imbi link type pointing at the GitHub repository.
    #[serde(default = "ImbiConfiguration::default_github_link")]
    pub github_link: String,
    #[serde(default = "ImbiConfiguration::default_gitlab_link")]
    pub gitlab_link: String,
}

impl ImbiConfiguration {
    fn default_github_identifier() -> String {
        "github".to_string()
    }

    fn default_gitlab_identifier() -> String {
        "gitlab".to_string()
    }

    fn default_github_link() -> String {
        "GitHub Repository".to_string()
    }

    fn default_gitlab_link() -> String {
        "GitLab Project".to_string()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ClaudeCodeConfiguration {
    #[serde(default)]
    pub enabled: bool,
    /// Claude Code executable used for code transformation and commits.
    #[serde(default = "ClaudeCodeConfiguration::default_executable")]
    pub executable: String,
    /// Extra arguments passed before the prompt is piped on stdin.
    #[serde(default = "ClaudeCodeConfiguration::default_args")]
    pub args: Vec<String>,
}

impl ClaudeCodeConfiguration {
    fn default_executable() -> String {
        "claude".to_string()
    }

    fn default_args() -> Vec<String> {
        vec!["--print".to_string()]
    }
}

impl Default for ClaudeCodeConfiguration {
    fn default() -> Self {
        Self {
            enabled: false,
            executable: Self::default_executable(),
            args: Self::default_args(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Configuration {
    /// Author for fallback commits, as `Name <address>`.
    pub commit_author: String,
    /// Use the LLM to write commits instead of the deterministic fallback.
    #[serde(default)]
    pub ai_commits: bool,
    /// Copy failed workspaces to `error_dir` for debugging.
    #[serde(default)]
    pub preserve_on_error: bool,
    #[serde(default = "Configuration::default_error_dir")]
    pub error_dir: PathBuf,
    #[serde(default)]
    pub anthropic: AnthropicConfiguration,
    #[serde(default)]
    pub claude_code: ClaudeCodeConfiguration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github: Option<GitHubConfiguration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gitlab: Option<GitLabConfiguration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub imbi: Option<ImbiConfiguration>,
}

impl Configuration {
    fn default_error_dir() -> PathBuf {
        PathBuf::from("errors")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|err| {
            Error::config(format!("unable to read {}: {err}", path.display()))
        })?;
        let configuration: Configuration = toml::from_str(&contents).map_err(|err| {
            Error::config(format!("unable to parse {}: {err}", path.display()))
        })?;
        configuration.validate()?;
        Ok(configuration)
    }

    fn validate(&self) -> Result<()> {
        if self.commit_author.trim().is_empty() {
            return Err(Error::config("commit_author must not be empty"));
        }
        if self.ai_commits && !self.claude_code.enabled {
            return Err(Error::config(
                "ai_commits requires claude_code.enabled = true",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
commit_author = "Build Bot <bot@example.com>"

[github]
api_key = "ghp_test"

[imbi]
api_key = "imbi-token"
hostname = "imbi.example.com"
"#;

    #[test]
    fn test_minimal_configuration() {
        let config: Configuration = toml::from_str(MINIMAL).unwrap();
        assert_eq!(config.commit_author, "Build Bot <bot@example.com>");
        let github = config.github.unwrap();
        assert_eq!(github.hostname, "github.com");
        assert_eq!(github.api_key.expose(), "ghp_test");
        let imbi = config.imbi.unwrap();
        assert_eq!(imbi.github_identifier, "github");
        assert_eq!(imbi.github_link, "GitHub Repository");
        assert!(!config.ai_commits);
        assert!(!config.claude_code.enabled);
        assert_eq!(config.error_dir, PathBuf::from("errors"));
    }

    #[test]
    fn test_secret_debug_redacted() {
        let secret = Secret::new("hunter2");
        assert_eq!(format!("{secret:?}"), "Secret(******)");
        assert_eq!(secret.expose(), "hunter2");
    }

    #[test]
    fn test_api_base_url() {
        let github = GitHubConfiguration {
            api_key: Secret::new("x"),
            hostname: "github.com".to_string(),
        };
        assert_eq!(github.api_base_url(), "https://api.github.com");

        let enterprise = GitHubConfiguration {
            api_key: Secret::new("x"),
            hostname: "github.example.com".to_string(),
        };
        assert_eq!(enterprise.api_base_url(), "https://github.example.com/api/v3");
    }

    #[test]
    fn test_round_trip() {
        let config: Configuration = toml::from_str(MINIMAL).unwrap();
        let serialized = toml::to_string(&config).unwrap();
        let reparsed: Configuration = toml::from_str(&serialized).unwrap();
        assert_eq!(config, reparsed);
    }

    #[test]
    fn test_ai_commits_requires_claude_code() {
        let config: Configuration = toml::from_str(
            r#"
commit_author = "Bot <b@example.com>"
ai_commits = true
"#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }
}
