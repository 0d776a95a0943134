//! Crate-wide error taxonomy.
//!
//! Client code matches on these variants to distinguish recoverable
//! conditions (rate limits, access denials) from plain failures. 404
//! responses on reads are not errors; clients return `None` instead.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration or workflow definition. Fails the process
    /// with exit code 2 before any project runs.
    #[error("{0}")]
    Config(String),

    /// GitHub returned 403 with a body indicating the rate limit was hit.
    #[error("rate limit exceeded: {0}")]
    RateLimit(String),

    /// 403 responses that are not rate limits.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// Any other non-2xx response.
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// Transport-level failure (connect, TLS, timeout).
    #[error(transparent)]
    Request(#[from] reqwest::Error),

    #[error("git: {0}")]
    Git(String),

    #[error("docker: {0}")]
    Docker(String),

    #[error("shell command failed with exit code {code}: {output}")]
    Shell { code: i32, output: String },

    #[error("command timed out after {0} seconds")]
    Timeout(u64),

    #[error("template error: {0}")]
    Template(#[from] minijinja::Error),

    #[error("agent: {0}")]
    Agent(String),

    #[error("action '{action}' failed: {message}")]
    Action { action: String, message: String },

    #[error("{0} not implemented")]
    NotImplemented(&'static str),

    #[error("path does not exist: {0}")]
    MissingPath(PathBuf),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(message.into())
    }

    pub fn git(message: impl Into<String>) -> Self {
        Error::Git(message.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
