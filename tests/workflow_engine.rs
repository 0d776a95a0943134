//! Workflow engine integration tests against real local git
//! repositories. The remote is a bare repository on disk, cloned over
//! the `file://` transport so shallow clones behave like the real thing.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use imbi_automations::config::Configuration;
use imbi_automations::models::{GitHubRepository, GitHubUser, ImbiProject, Workflow};
use imbi_automations::{RunOutcome, WorkflowEngine};

async fn git(args: &[&str], cwd: &Path) -> String {
    let output = tokio::process::Command::new("git")
        .args(args)
        .current_dir(cwd)
        .output()
        .await
        .unwrap();
    assert!(
        output.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).into_owned()
}

/// Create a bare `origin` seeded with one commit on `main`.
async fn seed_origin(root: &Path) -> PathBuf {
    let bare = root.join("origin.git");
    std::fs::create_dir_all(&bare).unwrap();
    git(&["init", "--bare", "--initial-branch=main", "."], &bare).await;

    let seed = root.join("seed");
    std::fs::create_dir_all(&seed).unwrap();
    git(&["init", "--initial-branch=main", "."], &seed).await;
    git(&["config", "user.name", "Seed"], &seed).await;
    git(&["config", "user.email", "seed@example.com"], &seed).await;
    std::fs::write(seed.join("existing.txt"), "seeded\n").unwrap();
    git(&["add", "--all"], &seed).await;
    git(&["commit", "-m", "seed"], &seed).await;
    git(
        &["push", &format!("file://{}", bare.display()), "main"],
        &seed,
    )
    .await;
    bare
}

fn repository_for(bare: &Path) -> GitHubRepository {
    GitHubRepository {
        id: 1,
        name: "widget".to_string(),
        full_name: "acme/widget".to_string(),
        owner: GitHubUser {
            login: "acme".to_string(),
            id: None,
        },
        default_branch: "main".to_string(),
        ssh_url: format!("file://{}", bare.display()),
        clone_url: format!("file://{}", bare.display()),
        html_url: None,
    }
}

fn project() -> ImbiProject {
    serde_json::from_value(serde_json::json!({
        "id": 42,
        "name": "Widget",
        "namespace": "Acme",
        "namespace_slug": "acme",
        "slug": "widget",
        "project_type": "API",
        "project_type_slug": "api",
    }))
    .unwrap()
}

fn configuration(error_dir: &Path, preserve_on_error: bool) -> Configuration {
    let mut configuration: Configuration = toml::from_str(
        r#"
commit_author = "Workflow Bot <bot@example.com>"
"#,
    )
    .unwrap();
    configuration.preserve_on_error = preserve_on_error;
    configuration.error_dir = error_dir.to_path_buf();
    configuration
}

fn load_workflow(root: &Path, name: &str, contents: &str) -> Workflow {
    let dir = root.join(name);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("config.toml"), contents).unwrap();
    Workflow::load(&dir).unwrap()
}

#[tokio::test]
async fn test_file_write_with_fallback_commit_and_push() {
    let root = tempfile::tempdir().unwrap();
    let bare = seed_origin(root.path()).await;
    let workflow = load_workflow(
        root.path(),
        "write_readme",
        r#"
[workflow]
name = "Write README"

[workflow.git]
clone = true
depth = 1
clone_type = "http"

[workflow.github]
create_pull_request = false

[[workflow.actions]]
name = "write-readme"
type = "file"
command = "write"
path = "repository/README.md"
content = "hello\n"
"#,
    );

    let engine = WorkflowEngine::new(
        Arc::new(configuration(&root.path().join("errors"), false)),
        Arc::new(workflow),
    )
    .unwrap();
    let outcome = engine
        .execute(project(), Some(repository_for(&bare)), None)
        .await
        .unwrap();
    assert_eq!(outcome, RunOutcome::Completed);

    // The commit landed on main in the origin with the fixed format.
    let subject = git(&["log", "main", "-1", "--format=%s"], &bare).await;
    assert_eq!(subject.trim(), "imbi-automations: write-readme write-readme");
    let body = git(&["log", "main", "-1", "--format=%b"], &bare).await;
    assert!(body.contains("Generated with [Imbi Automations]"));
    let author = git(&["log", "main", "-1", "--format=%an <%ae>"], &bare).await;
    assert_eq!(author.trim(), "Workflow Bot <bot@example.com>");
    let content = git(&["show", "main:README.md"], &bare).await;
    assert_eq!(content, "hello\n");
}

#[tokio::test]
async fn test_conditions_not_met_skips_project() {
    let root = tempfile::tempdir().unwrap();
    let bare = seed_origin(root.path()).await;
    let workflow = load_workflow(
        root.path(),
        "rust_only",
        r#"
[workflow]
name = "Rust Only"

[workflow.git]
clone = true
clone_type = "http"

[workflow.github]
create_pull_request = false

[[workflow.conditions]]
file_exists = "Cargo.toml"

[[workflow.actions]]
name = "write-readme"
type = "file"
command = "write"
path = "repository/README.md"
content = "never written\n"
"#,
    );

    let engine = WorkflowEngine::new(
        Arc::new(configuration(&root.path().join("errors"), false)),
        Arc::new(workflow),
    )
    .unwrap();
    let outcome = engine
        .execute(project(), Some(repository_for(&bare)), None)
        .await
        .unwrap();
    assert_eq!(outcome, RunOutcome::Skipped);

    // Nothing was committed past the seed commit.
    let count = git(&["rev-list", "--count", "main"], &bare).await;
    assert_eq!(count.trim(), "1");
}

#[tokio::test]
async fn test_failed_action_preserves_workspace() {
    let root = tempfile::tempdir().unwrap();
    let bare = seed_origin(root.path()).await;
    let error_dir = root.path().join("errors");
    let workflow = load_workflow(
        root.path(),
        "Broken_Flow",
        r#"
[workflow]
name = "Broken Flow"

[workflow.git]
clone = true
clone_type = "http"

[workflow.github]
create_pull_request = false

[[workflow.actions]]
name = "explode"
type = "shell"
command = "false"
"#,
    );

    let engine = WorkflowEngine::new(
        Arc::new(configuration(&error_dir, true)),
        Arc::new(workflow),
    )
    .unwrap();
    let result = engine
        .execute(project(), Some(repository_for(&bare)), None)
        .await;
    assert!(result.is_err());

    // Snapshot lives at <error_dir>/<workflow-slug>/<project-slug>-<ts>/.
    let preserved = engine.last_error_path().expect("workspace was preserved");
    assert!(preserved.starts_with(error_dir.join("broken-flow")));
    assert!(preserved
        .file_name()
        .unwrap()
        .to_string_lossy()
        .starts_with("widget-"));
    assert!(preserved.join("repository/existing.txt").is_file());
    assert!(preserved.join("extracted").is_dir());
}

#[tokio::test]
async fn test_failure_without_preservation_leaves_no_snapshot() {
    let root = tempfile::tempdir().unwrap();
    let bare = seed_origin(root.path()).await;
    let error_dir = root.path().join("errors");
    let workflow = load_workflow(
        root.path(),
        "broken",
        r#"
[workflow]
name = "Broken"

[workflow.git]
clone = true
clone_type = "http"

[workflow.github]
create_pull_request = false

[[workflow.actions]]
name = "explode"
type = "shell"
command = "false"
"#,
    );

    let engine = WorkflowEngine::new(
        Arc::new(configuration(&error_dir, false)),
        Arc::new(workflow),
    )
    .unwrap();
    assert!(engine
        .execute(project(), Some(repository_for(&bare)), None)
        .await
        .is_err());
    assert!(engine.last_error_path().is_none());
    assert!(!error_dir.exists());
}

#[tokio::test]
async fn test_action_condition_gates_skip_without_error() {
    let root = tempfile::tempdir().unwrap();
    let bare = seed_origin(root.path()).await;
    let workflow = load_workflow(
        root.path(),
        "gated",
        r#"
[workflow]
name = "Gated"

[workflow.git]
clone = true
clone_type = "http"

[workflow.github]
create_pull_request = false

# Skipped: the clone has no Cargo.toml.
[[workflow.actions]]
name = "rust-only"
type = "shell"
command = "false"

[[workflow.actions.conditions]]
file_exists = "Cargo.toml"

# Runs: the seeded file exists.
[[workflow.actions]]
name = "touch-marker"
type = "file"
command = "write"
path = "repository/marker.txt"
content = "ran\n"

[[workflow.actions.conditions]]
file_exists = "existing.txt"
"#,
    );

    let engine = WorkflowEngine::new(
        Arc::new(configuration(&root.path().join("errors"), false)),
        Arc::new(workflow),
    )
    .unwrap();
    let outcome = engine
        .execute(project(), Some(repository_for(&bare)), None)
        .await
        .unwrap();
    assert_eq!(outcome, RunOutcome::Completed);

    // Only the gated-in action committed; the failing one was skipped.
    let subject = git(&["log", "main", "-1", "--format=%s"], &bare).await;
    assert_eq!(subject.trim(), "imbi-automations: gated touch-marker");
    assert_eq!(git(&["show", "main:marker.txt"], &bare).await, "ran\n");
}

#[tokio::test]
async fn test_git_extract_action_restores_prior_content() {
    let root = tempfile::tempdir().unwrap();
    let bare = seed_origin(root.path()).await;

    // Add history to the origin: a migration commit that rewrites a file.
    let seed = root.path().join("seed");
    std::fs::write(seed.join("settings.cfg"), "version = 2\n").unwrap();
    git(&["add", "--all"], &seed).await;
    git(&["commit", "-m", "migration: rewrite settings"], &seed).await;
    git(
        &["push", &format!("file://{}", bare.display()), "main"],
        &seed,
    )
    .await;

    let workflow = load_workflow(
        root.path(),
        "restore",
        r#"
[workflow]
name = "Restore"

[workflow.git]
clone = true
depth = 10
clone_type = "http"

[workflow.github]
create_pull_request = false

[[workflow.actions]]
name = "restore-settings"
type = "git"
command = "extract"
source = "existing.txt"
destination = "existing.txt"
commit_keyword = "migration: rewrite"

[[workflow.actions]]
name = "copy-back"
type = "file"
command = "copy"
source = "extracted/existing.txt"
destination = "repository/restored.txt"
"#,
    );

    let engine = WorkflowEngine::new(
        Arc::new(configuration(&root.path().join("errors"), false)),
        Arc::new(workflow),
    )
    .unwrap();
    let outcome = engine
        .execute(project(), Some(repository_for(&bare)), None)
        .await
        .unwrap();
    assert_eq!(outcome, RunOutcome::Completed);

    // The extracted file came from the commit before the migration and
    // was committed back by the file action.
    assert_eq!(git(&["show", "main:restored.txt"], &bare).await, "seeded\n");
}

#[tokio::test]
async fn test_no_op_workflow_completes_without_commit() {
    let root = tempfile::tempdir().unwrap();
    let bare = seed_origin(root.path()).await;
    let workflow = load_workflow(
        root.path(),
        "noop",
        r#"
[workflow]
name = "No-op"

[workflow.git]
clone = true
clone_type = "http"

[workflow.github]
create_pull_request = false
"#,
    );

    let engine = WorkflowEngine::new(
        Arc::new(configuration(&root.path().join("errors"), false)),
        Arc::new(workflow),
    )
    .unwrap();
    let outcome = engine
        .execute(project(), Some(repository_for(&bare)), None)
        .await
        .unwrap();
    assert_eq!(outcome, RunOutcome::Completed);
    let count = git(&["rev-list", "--count", "main"], &bare).await;
    assert_eq!(count.trim(), "1");
}
