//! File action executor: append, copy, delete, move, rename, write.
//!
//! Paths resolve relative to the working directory unless absolute, so
//! actions can reach the repository (`repository/...`), extraction
//! output (`extracted/...`), and the workflow source (`workflow/...`).

use crate::errors::{Error, Result};
use crate::models::{FileAction, FileCommand, WorkflowContext};
use crate::utils;

pub async fn execute(context: &WorkflowContext, action: &FileAction) -> Result<()> {
    match action.command {
        FileCommand::Append => write_content(context, action, true),
        FileCommand::Write => write_content(context, action, false),
        FileCommand::Copy => copy(context, action),
        FileCommand::Move | FileCommand::Rename => rename(context, action),
        FileCommand::Delete => delete(context, action),
    }
}

fn write_content(context: &WorkflowContext, action: &FileAction, append: bool) -> Result<()> {
    if !matches!(action.encoding().to_ascii_lowercase().as_str(), "utf-8" | "utf8") {
        return Err(Error::config(format!(
            "action '{}': unsupported encoding {:?}",
            action.common.name,
            action.encoding()
        )));
    }
    let path = context.resolve_path(action.path.as_ref().expect("validated at parse time"));
    let content = action.content.as_deref().expect("validated at parse time");
    log::debug!("Writing to file: {}", path.display());

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if append {
        use std::io::Write;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        file.write_all(content.as_bytes())?;
    } else {
        std::fs::write(&path, content)?;
    }
    Ok(())
}

fn copy(context: &WorkflowContext, action: &FileAction) -> Result<()> {
    let source = context.resolve_path(action.source.as_ref().expect("validated at parse time"));
    let destination =
        context.resolve_path(action.destination.as_ref().expect("validated at parse time"));
    log::debug!("Copying {} to {}", source.display(), destination.display());

    if !source.exists() {
        return Err(Error::MissingPath(source));
    }
    if let Some(parent) = destination.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if source.is_dir() {
        utils::copy_tree(&source, &destination)?;
    } else {
        std::fs::copy(&source, &destination)?;
    }
    Ok(())
}

fn rename(context: &WorkflowContext, action: &FileAction) -> Result<()> {
    let source = context.resolve_path(action.source.as_ref().expect("validated at parse time"));
    let destination =
        context.resolve_path(action.destination.as_ref().expect("validated at parse time"));
    log::debug!("Moving {} to {}", source.display(), destination.display());

    if !source.exists() {
        return Err(Error::MissingPath(source));
    }
    if let Some(parent) = destination.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::rename(&source, &destination)?;
    Ok(())
}

fn delete(context: &WorkflowContext, action: &FileAction) -> Result<()> {
    if let Some(path) = &action.path {
        let path = context.resolve_path(path);
        log::debug!("Deleting: {}", path.display());
        if path.is_dir() {
            std::fs::remove_dir_all(&path)?;
        } else if path.exists() {
            std::fs::remove_file(&path)?;
        } else {
            log::warn!("File to delete does not exist: {}", path.display());
        }
        return Ok(());
    }

    let pattern = action.pattern.as_ref().expect("validated at parse time");
    let pattern = regex::Regex::new(pattern).expect("validated at parse time");
    let repository = context.repository_dir();
    let mut deleted = 0usize;
    for entry in walkdir::WalkDir::new(&repository)
        .follow_links(false)
        .into_iter()
        .filter_map(std::result::Result::ok)
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(&repository) else {
            continue;
        };
        if pattern.is_match(&relative.to_string_lossy()) {
            log::debug!("Deleting file matching pattern: {}", entry.path().display());
            std::fs::remove_file(entry.path())?;
            deleted += 1;
        }
    }
    log::debug!("Deleted {deleted} files matching pattern");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ActionCommon, ConditionType, Workflow, WorkflowConfiguration};
    use std::path::{Path, PathBuf};
    use std::sync::Arc;

    fn context(dir: &Path) -> WorkflowContext {
        WorkflowContext {
            workflow: Arc::new(Workflow {
                path: dir.join("workflow-src"),
                slug: "t".to_string(),
                configuration: WorkflowConfiguration::parse("[workflow]\nname = \"t\"\n").unwrap(),
            }),
            imbi_project: serde_json::from_value(serde_json::json!({
                "id": 1,
                "name": "Widget",
                "namespace": "Acme",
                "namespace_slug": "acme",
                "slug": "widget",
                "project_type": "API",
                "project_type_slug": "api",
            }))
            .unwrap(),
            github_repository: None,
            gitlab_project: None,
            working_directory: dir.to_path_buf(),
            starting_commit: None,
        }
    }

    fn file_action(command: FileCommand) -> FileAction {
        FileAction {
            common: ActionCommon {
                name: "test".to_string(),
                conditions: Vec::new(),
                condition_type: ConditionType::All,
                committable: None,
                filter: None,
                timeout: 3600,
                on_success: None,
                on_failure: None,
            },
            command,
            path: None,
            pattern: None,
            source: None,
            destination: None,
            content: None,
            encoding: None,
        }
    }

    #[tokio::test]
    async fn test_write_and_append() {
        let dir = tempfile::tempdir().unwrap();
        let context = context(dir.path());

        let mut action = file_action(FileCommand::Write);
        action.path = Some(PathBuf::from("repository/docs/README.md"));
        action.content = Some("hello\n".to_string());
        execute(&context, &action).await.unwrap();

        let mut action = file_action(FileCommand::Append);
        action.path = Some(PathBuf::from("repository/docs/README.md"));
        action.content = Some("world\n".to_string());
        execute(&context, &action).await.unwrap();

        let written = std::fs::read_to_string(dir.path().join("repository/docs/README.md")).unwrap();
        assert_eq!(written, "hello\nworld\n");
    }

    #[tokio::test]
    async fn test_copy_directory_recursively() {
        let dir = tempfile::tempdir().unwrap();
        let context = context(dir.path());
        std::fs::create_dir_all(dir.path().join("extracted/config/deep")).unwrap();
        std::fs::write(dir.path().join("extracted/config/deep/a.txt"), "a").unwrap();

        let mut action = file_action(FileCommand::Copy);
        action.source = Some(PathBuf::from("extracted/config"));
        action.destination = Some(PathBuf::from("repository/config"));
        execute(&context, &action).await.unwrap();

        assert_eq!(
            std::fs::read_to_string(dir.path().join("repository/config/deep/a.txt")).unwrap(),
            "a"
        );
    }

    #[tokio::test]
    async fn test_copy_missing_source_fails() {
        let dir = tempfile::tempdir().unwrap();
        let context = context(dir.path());
        let mut action = file_action(FileCommand::Copy);
        action.source = Some(PathBuf::from("does-not-exist"));
        action.destination = Some(PathBuf::from("repository/x"));
        assert!(execute(&context, &action).await.is_err());
    }

    #[tokio::test]
    async fn test_move() {
        let dir = tempfile::tempdir().unwrap();
        let context = context(dir.path());
        std::fs::create_dir_all(dir.path().join("repository")).unwrap();
        std::fs::write(dir.path().join("repository/old.txt"), "data").unwrap();

        let mut action = file_action(FileCommand::Move);
        action.source = Some(PathBuf::from("repository/old.txt"));
        action.destination = Some(PathBuf::from("repository/new/location.txt"));
        execute(&context, &action).await.unwrap();

        assert!(!dir.path().join("repository/old.txt").exists());
        assert_eq!(
            std::fs::read_to_string(dir.path().join("repository/new/location.txt")).unwrap(),
            "data"
        );
    }

    #[tokio::test]
    async fn test_delete_missing_path_is_warning_only() {
        let dir = tempfile::tempdir().unwrap();
        let context = context(dir.path());
        let mut action = file_action(FileCommand::Delete);
        action.path = Some(PathBuf::from("repository/nothing-here.txt"));
        execute(&context, &action).await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_by_pattern() {
        let dir = tempfile::tempdir().unwrap();
        let context = context(dir.path());
        std::fs::create_dir_all(dir.path().join("repository/src")).unwrap();
        std::fs::write(dir.path().join("repository/src/a.pyc"), "x").unwrap();
        std::fs::write(dir.path().join("repository/src/a.py"), "x").unwrap();
        std::fs::write(dir.path().join("repository/b.pyc"), "x").unwrap();

        let mut action = file_action(FileCommand::Delete);
        action.pattern = Some(r"\.pyc$".to_string());
        execute(&context, &action).await.unwrap();

        assert!(!dir.path().join("repository/src/a.pyc").exists());
        assert!(!dir.path().join("repository/b.pyc").exists());
        assert!(dir.path().join("repository/src/a.py").exists());
    }
}
