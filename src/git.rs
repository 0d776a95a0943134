//! Git driver: a thin subprocess wrapper over the `git` binary.
//!
//! Every operation runs inside an explicit working directory; no global
//! git configuration is read or mutated. Commit identity is pinned with
//! `-c user.*` so fallback commits behave the same on any host.

use std::path::Path;

use serde::Serialize;

use crate::errors::{Error, Result};
use crate::models::GitSearchStrategy;
use crate::process::{run_command, CommandOutput};
use crate::utils;

pub const DEFAULT_TIMEOUT_SECS: u64 = 3600;
const SHOW_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CommitInfo {
    pub commit: String,
    pub author: String,
    pub message: String,
}

/// The commit delta between the starting commit and HEAD, fed into the
/// pull-request summary prompt.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct CommitSummary {
    pub commits: Vec<CommitInfo>,
}

async fn run_git(args: &[&str], cwd: &Path, timeout_secs: u64) -> Result<CommandOutput> {
    run_command("git", args, Some(cwd), None, timeout_secs).await
}

async fn run_git_checked(args: &[&str], cwd: &Path, timeout_secs: u64) -> Result<CommandOutput> {
    let output = run_git(args, cwd, timeout_secs).await?;
    if !output.success() {
        return Err(Error::git(format!(
            "git {} failed (exit code {}): {}",
            args.first().copied().unwrap_or_default(),
            output.code,
            output.failure_output()
        )));
    }
    Ok(output)
}

/// Clone `url` into `<working_directory>/repository` and return the SHA
/// of HEAD. Depth 1 produces a shallow clone; a starting branch is
/// checked out by the clone itself.
pub async fn clone_repository(
    working_directory: &Path,
    url: &str,
    branch: Option<&str>,
    depth: u32,
) -> Result<String> {
    log::info!("Cloning {}", utils::sanitize(url));
    let depth_value = depth.to_string();
    let mut args = vec!["clone", "--depth", depth_value.as_str()];
    if let Some(branch) = branch {
        args.extend(["--branch", branch]);
    }
    args.extend([url, "repository"]);
    run_git_checked(&args, working_directory, DEFAULT_TIMEOUT_SECS).await?;

    let repository = working_directory.join("repository");
    let head = run_git_checked(&["rev-parse", "HEAD"], &repository, SHOW_TIMEOUT_SECS).await?;
    Ok(head.stdout.trim().to_string())
}

pub async fn add_files(working_directory: &Path, files: &[&str]) -> Result<()> {
    let mut args = vec!["add"];
    args.extend_from_slice(files);
    run_git_checked(&args, working_directory, DEFAULT_TIMEOUT_SECS).await?;
    Ok(())
}

/// `git status --porcelain`; empty output means a clean tree.
pub async fn get_status(working_directory: &Path) -> Result<String> {
    let output =
        run_git_checked(&["status", "--porcelain"], working_directory, SHOW_TIMEOUT_SECS).await?;
    Ok(output.stdout)
}

/// Commit staged changes, returning the new SHA, or `None` when there
/// was nothing to commit.
pub async fn commit_changes(
    working_directory: &Path,
    message: &str,
    commit_author: &str,
) -> Result<Option<String>> {
    let (name, address) = utils::parse_commit_author(commit_author);
    let author = format!("--author={commit_author}");
    let user_name = format!("user.name={name}");
    let user_email = format!("user.email={address}");
    let output = run_git(
        &[
            "-c",
            &user_name,
            "-c",
            &user_email,
            "commit",
            &author,
            "-m",
            message,
        ],
        working_directory,
        DEFAULT_TIMEOUT_SECS,
    )
    .await?;
    if !output.success() {
        let combined = format!("{}{}", output.stdout, output.stderr).to_lowercase();
        if combined.contains("nothing to commit") || combined.contains("working tree clean") {
            return Ok(None);
        }
        return Err(Error::git(format!(
            "commit failed (exit code {}): {}",
            output.code,
            output.failure_output()
        )));
    }
    let head = run_git_checked(&["rev-parse", "HEAD"], working_directory, SHOW_TIMEOUT_SECS).await?;
    Ok(Some(head.stdout.trim().to_string()))
}

pub async fn push_changes(
    working_directory: &Path,
    remote: &str,
    branch: &str,
    set_upstream: bool,
    force: bool,
) -> Result<()> {
    let mut args = vec!["push"];
    if force {
        args.push("--force");
    }
    if set_upstream {
        args.push("--set-upstream");
    }
    args.extend([remote, branch]);
    run_git_checked(&args, working_directory, DEFAULT_TIMEOUT_SECS).await?;
    Ok(())
}

pub async fn create_branch(working_directory: &Path, branch: &str, checkout: bool) -> Result<()> {
    let args: Vec<&str> = if checkout {
        vec!["checkout", "-b", branch]
    } else {
        vec!["branch", branch]
    };
    run_git_checked(&args, working_directory, DEFAULT_TIMEOUT_SECS).await?;
    Ok(())
}

/// Best-effort deletion of a remote branch; a missing branch is not an
/// error.
pub async fn delete_remote_branch_if_exists(working_directory: &Path, branch: &str) -> Result<()> {
    let output = run_git(
        &["push", "origin", "--delete", branch],
        working_directory,
        DEFAULT_TIMEOUT_SECS,
    )
    .await?;
    if !output.success() {
        log::debug!(
            "Remote branch {branch} not deleted: {}",
            output.failure_output()
        );
    }
    Ok(())
}

/// Commits reachable from HEAD but not from `starting_commit`, newest
/// first.
pub async fn get_commits_since(
    working_directory: &Path,
    starting_commit: &str,
) -> Result<CommitSummary> {
    let range = format!("{starting_commit}..HEAD");
    let output = run_git_checked(
        &["log", &range, "--format=%H%x1f%an%x1f%s"],
        working_directory,
        DEFAULT_TIMEOUT_SECS,
    )
    .await?;
    let commits = output
        .stdout
        .lines()
        .filter(|line| !line.is_empty())
        .filter_map(|line| {
            let mut parts = line.splitn(3, '\u{1f}');
            Some(CommitInfo {
                commit: parts.next()?.to_string(),
                author: parts.next()?.to_string(),
                message: parts.next().unwrap_or_default().to_string(),
            })
        })
        .collect();
    Ok(CommitSummary { commits })
}

/// Find the parent of a commit whose message matches `keyword`.
///
/// `git log --grep` lists matches newest first; `BeforeFirstMatch` takes
/// the most recent match and `BeforeLastMatch` the oldest. Returns the
/// matched commit's first parent, or `None` when nothing matches or the
/// match has no parent.
pub async fn find_commit_before_keyword(
    working_directory: &Path,
    keyword: &str,
    strategy: GitSearchStrategy,
) -> Result<Option<String>> {
    let grep = format!("--grep={keyword}");
    let output = run_git_checked(
        &["log", &grep, "--format=%H"],
        working_directory,
        DEFAULT_TIMEOUT_SECS,
    )
    .await?;
    let matches: Vec<&str> = output
        .stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();
    let matched = match strategy {
        GitSearchStrategy::BeforeFirstMatch => matches.first(),
        GitSearchStrategy::BeforeLastMatch => matches.last(),
    };
    let Some(commit) = matched else {
        return Ok(None);
    };

    let parent_ref = format!("{commit}^");
    let output = run_git(
        &["log", "-1", "--format=%H", &parent_ref],
        working_directory,
        SHOW_TIMEOUT_SECS,
    )
    .await?;
    if !output.success() {
        log::debug!("Commit {commit} has no parent: {}", output.failure_output());
        return Ok(None);
    }
    let parent = output.stdout.trim().to_string();
    Ok((!parent.is_empty()).then_some(parent))
}

/// Read a file's content as of a specific commit; `None` when the path
/// does not exist there.
pub async fn get_file_at_commit(
    working_directory: &Path,
    path: &Path,
    commit: &str,
) -> Result<Option<String>> {
    let spec = format!("{commit}:{}", path.display());
    let output = run_git(&["show", &spec], working_directory, SHOW_TIMEOUT_SECS).await?;
    if !output.success() {
        log::debug!("File {} not found at {commit}", path.display());
        return Ok(None);
    }
    Ok(Some(output.stdout))
}

/// Extract `source` as it existed before the commit matching
/// `commit_keyword`, writing it to `destination`. Returns whether the
/// extraction produced a file.
pub async fn extract_file_from_commit(
    working_directory: &Path,
    source: &Path,
    destination: &Path,
    commit_keyword: &str,
    strategy: GitSearchStrategy,
) -> Result<bool> {
    let Some(commit) =
        find_commit_before_keyword(working_directory, commit_keyword, strategy).await?
    else {
        log::debug!("No commit matching {commit_keyword:?} found");
        return Ok(false);
    };
    let Some(content) = get_file_at_commit(working_directory, source, &commit).await? else {
        return Ok(false);
    };
    if let Some(parent) = destination.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(destination, content).await?;
    log::debug!(
        "Extracted {} at {commit} to {}",
        source.display(),
        destination.display()
    );
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn git(args: &[&str], cwd: &Path) {
        let output = run_git(args, cwd, 60).await.unwrap();
        assert!(
            output.success(),
            "git {args:?} failed: {}",
            output.failure_output()
        );
    }

    /// Initialize a repository with a configured identity.
    async fn init_repo(path: &Path) {
        git(&["init", "--initial-branch=main"], path).await;
        git(&["config", "user.name", "Test"], path).await;
        git(&["config", "user.email", "test@example.com"], path).await;
    }

    async fn commit_file(path: &Path, name: &str, content: &str, message: &str) {
        tokio::fs::write(path.join(name), content).await.unwrap();
        git(&["add", "--all"], path).await;
        git(&["commit", "-m", message], path).await;
    }

    #[tokio::test]
    async fn test_commit_changes_and_status() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path()).await;

        tokio::fs::write(dir.path().join("README.md"), "hello\n")
            .await
            .unwrap();
        add_files(dir.path(), &["--all"]).await.unwrap();
        assert!(!get_status(dir.path()).await.unwrap().is_empty());

        let sha = commit_changes(dir.path(), "initial commit", "Bot <bot@example.com>")
            .await
            .unwrap();
        assert!(sha.is_some());
        assert!(get_status(dir.path()).await.unwrap().is_empty());

        // A second commit with a clean tree reports no changes.
        let sha = commit_changes(dir.path(), "empty", "Bot <bot@example.com>")
            .await
            .unwrap();
        assert!(sha.is_none());
    }

    #[tokio::test]
    async fn test_shallow_clone_has_single_commit() {
        let upstream = tempfile::tempdir().unwrap();
        init_repo(upstream.path()).await;
        commit_file(upstream.path(), "a.txt", "one", "first").await;
        commit_file(upstream.path(), "b.txt", "two", "second").await;

        let workspace = tempfile::tempdir().unwrap();
        let url = format!("file://{}", upstream.path().display());
        let starting_commit = clone_repository(workspace.path(), &url, None, 1)
            .await
            .unwrap();
        assert_eq!(starting_commit.len(), 40);

        let repository = workspace.path().join("repository");
        let output = run_git(&["rev-list", "--count", "HEAD"], &repository, 30)
            .await
            .unwrap();
        assert_eq!(output.stdout.trim(), "1");
    }

    #[tokio::test]
    async fn test_extract_file_from_commit() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path()).await;
        commit_file(dir.path(), "setup.cfg", "version = 1\n", "initial layout").await;
        commit_file(dir.path(), "setup.cfg", "version = 2\n", "automation: migrate config").await;
        commit_file(dir.path(), "extra.txt", "x\n", "unrelated").await;

        let destination = dir.path().join("extracted/setup.cfg");
        let extracted = extract_file_from_commit(
            dir.path(),
            Path::new("setup.cfg"),
            &destination,
            "automation: migrate",
            GitSearchStrategy::BeforeLastMatch,
        )
        .await
        .unwrap();
        assert!(extracted);
        assert_eq!(
            tokio::fs::read_to_string(&destination).await.unwrap(),
            "version = 1\n"
        );
    }

    #[tokio::test]
    async fn test_search_strategies() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path()).await;
        commit_file(dir.path(), "f.txt", "0", "base").await;
        let base = run_git(&["rev-parse", "HEAD"], dir.path(), 30)
            .await
            .unwrap()
            .stdout
            .trim()
            .to_string();
        commit_file(dir.path(), "f.txt", "1", "sweep: pass one").await;
        let first_sweep = run_git(&["rev-parse", "HEAD"], dir.path(), 30)
            .await
            .unwrap()
            .stdout
            .trim()
            .to_string();
        commit_file(dir.path(), "f.txt", "2", "sweep: pass two").await;

        // The last match in log order is the oldest sweep commit, so its
        // parent is the pre-sweep base.
        let before_last =
            find_commit_before_keyword(dir.path(), "sweep:", GitSearchStrategy::BeforeLastMatch)
                .await
                .unwrap();
        assert_eq!(before_last.as_deref(), Some(base.as_str()));

        // The first match is the most recent sweep commit.
        let before_first =
            find_commit_before_keyword(dir.path(), "sweep:", GitSearchStrategy::BeforeFirstMatch)
                .await
                .unwrap();
        assert_eq!(before_first.as_deref(), Some(first_sweep.as_str()));
    }

    #[tokio::test]
    async fn test_extract_no_match_returns_false() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path()).await;
        commit_file(dir.path(), "a.txt", "x", "only commit").await;

        let destination = dir.path().join("out.txt");
        let extracted = extract_file_from_commit(
            dir.path(),
            Path::new("a.txt"),
            &destination,
            "no-such-keyword",
            GitSearchStrategy::BeforeLastMatch,
        )
        .await
        .unwrap();
        assert!(!extracted);
        assert!(!destination.exists());
    }

    #[tokio::test]
    async fn test_get_commits_since() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path()).await;
        commit_file(dir.path(), "a.txt", "1", "base").await;
        let base = run_git(&["rev-parse", "HEAD"], dir.path(), 30)
            .await
            .unwrap()
            .stdout
            .trim()
            .to_string();
        commit_file(dir.path(), "a.txt", "2", "change one").await;
        commit_file(dir.path(), "a.txt", "3", "change two").await;

        let summary = get_commits_since(dir.path(), &base).await.unwrap();
        assert_eq!(summary.commits.len(), 2);
        assert_eq!(summary.commits[0].message, "change two");
        assert_eq!(summary.commits[1].message, "change one");
        assert_eq!(summary.commits[0].author, "Test");
    }

    #[tokio::test]
    async fn test_branch_operations() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path()).await;
        commit_file(dir.path(), "a.txt", "1", "base").await;

        create_branch(dir.path(), "automation/test", true)
            .await
            .unwrap();
        let output = run_git(&["branch", "--show-current"], dir.path(), 30)
            .await
            .unwrap();
        assert_eq!(output.stdout.trim(), "automation/test");
    }
}
