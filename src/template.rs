//! Template rendering over the workflow context.
//!
//! Undefined names are errors; autoescape stays off because the output
//! is code and configuration, not HTML. The context always carries the
//! workflow, the registry project, the optional code-host records, the
//! working directory, and the starting commit; callers layer prompt-
//! specific extras on top.

use std::path::Path;

use minijinja::{Environment, UndefinedBehavior};

use crate::errors::{Error, Result};
use crate::models::WorkflowContext;

/// Whether a string contains template syntax worth rendering.
pub fn has_template_syntax(text: &str) -> bool {
    text.contains("{{") || text.contains("{%") || text.contains("{#")
}

/// Base render context shared by every template and prompt.
fn base_context(context: &WorkflowContext) -> serde_json::Map<String, serde_json::Value> {
    let mut values = serde_json::Map::new();
    values.insert(
        "workflow".to_string(),
        serde_json::to_value(&*context.workflow).unwrap_or(serde_json::Value::Null),
    );
    values.insert(
        "imbi_project".to_string(),
        serde_json::to_value(&context.imbi_project).unwrap_or(serde_json::Value::Null),
    );
    values.insert(
        "github_repository".to_string(),
        serde_json::to_value(&context.github_repository).unwrap_or(serde_json::Value::Null),
    );
    values.insert(
        "gitlab_project".to_string(),
        serde_json::to_value(&context.gitlab_project).unwrap_or(serde_json::Value::Null),
    );
    values.insert(
        "working_directory".to_string(),
        serde_json::Value::String(context.working_directory.display().to_string()),
    );
    values.insert(
        "starting_commit".to_string(),
        serde_json::to_value(&context.starting_commit).unwrap_or(serde_json::Value::Null),
    );
    values
}

/// Render a template string against the workflow context plus extras.
pub fn render(
    context: &WorkflowContext,
    source: &str,
    extras: &[(&str, serde_json::Value)],
) -> Result<String> {
    let mut environment = Environment::new();
    environment.set_undefined_behavior(UndefinedBehavior::Strict);
    environment.set_keep_trailing_newline(true);

    let repository_dir = context.repository_dir();
    environment.add_function(
        "extract_image_from_dockerfile",
        move |path: String| -> std::result::Result<String, minijinja::Error> {
            extract_image_from_dockerfile(&repository_dir, Path::new(&path)).ok_or_else(|| {
                minijinja::Error::new(
                    minijinja::ErrorKind::InvalidOperation,
                    format!("no FROM image found in {path}"),
                )
            })
        },
    );

    let template = environment.template_from_str(source)?;
    let mut values = base_context(context);
    for (key, value) in extras {
        values.insert((*key).to_string(), value.clone());
    }
    Ok(template.render(minijinja::Value::from_serialize(&values))?)
}

/// Render a template file to a destination file, creating parents.
pub fn render_path(
    context: &WorkflowContext,
    source: &Path,
    destination: &Path,
    extras: &[(&str, serde_json::Value)],
) -> Result<()> {
    log::debug!(
        "Rendering {} to {}",
        source.display(),
        destination.display()
    );
    let contents = std::fs::read_to_string(source)?;
    let rendered = render(context, &contents, extras)?;
    if let Some(parent) = destination.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(destination, rendered)?;
    Ok(())
}

/// Recursively render every file under `source` into `destination`,
/// preserving the relative layout. Returns the number of files written.
pub fn render_tree(
    context: &WorkflowContext,
    source: &Path,
    destination: &Path,
    extras: &[(&str, serde_json::Value)],
) -> Result<usize> {
    std::fs::create_dir_all(destination)?;
    let mut count = 0usize;
    for entry in walkdir::WalkDir::new(source).follow_links(true) {
        let entry = entry.map_err(|err| Error::Io(err.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(source)
            .expect("walkdir yields children of the source root");
        render_path(context, entry.path(), &destination.join(relative), extras)?;
        count += 1;
    }
    Ok(count)
}

/// Find the first `FROM` image reference in a Dockerfile under the
/// repository. Platform flags and build-stage aliases are stripped.
pub fn extract_image_from_dockerfile(repository_dir: &Path, dockerfile: &Path) -> Option<String> {
    let path = if dockerfile.is_absolute() {
        dockerfile.to_path_buf()
    } else {
        repository_dir.join(dockerfile)
    };
    let contents = std::fs::read_to_string(path).ok()?;
    for line in contents.lines() {
        let line = line.trim();
        if !line.to_ascii_uppercase().starts_with("FROM ") {
            continue;
        }
        let image = line[5..]
            .split_whitespace()
            .find(|token| !token.starts_with("--"))?;
        return Some(image.to_string());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Workflow, WorkflowConfiguration};
    use std::sync::Arc;

    fn test_context(working_directory: &Path) -> WorkflowContext {
        let configuration = WorkflowConfiguration::parse(
            r#"
[workflow]
name = "Test Workflow"
"#,
        )
        .unwrap();
        WorkflowContext {
            workflow: Arc::new(Workflow {
                path: working_directory.join("workflow-src"),
                slug: "test-workflow".to_string(),
                configuration,
            }),
            imbi_project: serde_json::from_value(serde_json::json!({
                "id": 42,
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
            working_directory: working_directory.to_path_buf(),
            starting_commit: Some("abc123".to_string()),
        }
    }

    #[test]
    fn test_single_token_renders_project_name() {
        let dir = tempfile::tempdir().unwrap();
        let context = test_context(dir.path());
        let rendered = render(&context, "{{ imbi_project.name }}", &[]).unwrap();
        assert_eq!(rendered, "Widget");
    }

    #[test]
    fn test_strict_undefined_errors() {
        let dir = tempfile::tempdir().unwrap();
        let context = test_context(dir.path());
        assert!(render(&context, "{{ does_not_exist }}", &[]).is_err());
    }

    #[test]
    fn test_control_statements_and_extras() {
        let dir = tempfile::tempdir().unwrap();
        let context = test_context(dir.path());
        let rendered = render(
            &context,
            "{% if starting_commit %}{{ starting_commit }}{% endif %}-{{ action_name }}",
            &[("action_name", serde_json::json!("write"))],
        )
        .unwrap();
        assert_eq!(rendered, "abc123-write");
    }

    #[test]
    fn test_has_template_syntax() {
        assert!(has_template_syntax("hello {{ name }}"));
        assert!(has_template_syntax("{% if x %}y{% endif %}"));
        assert!(!has_template_syntax("plain text"));
    }

    #[test]
    fn test_render_tree_preserves_layout() {
        let dir = tempfile::tempdir().unwrap();
        let context = test_context(dir.path());
        let source = dir.path().join("templates");
        std::fs::create_dir_all(source.join("nested")).unwrap();
        std::fs::write(source.join("top.txt"), "{{ workflow.slug }}").unwrap();
        std::fs::write(source.join("nested/deep.txt"), "{{ imbi_project.slug }}").unwrap();

        let destination = dir.path().join("out");
        let count = render_tree(&context, &source, &destination, &[]).unwrap();
        assert_eq!(count, 2);
        assert_eq!(
            std::fs::read_to_string(destination.join("top.txt")).unwrap(),
            "test-workflow"
        );
        assert_eq!(
            std::fs::read_to_string(destination.join("nested/deep.txt")).unwrap(),
            "widget"
        );
    }

    #[test]
    fn test_extract_image_from_dockerfile() {
        let dir = tempfile::tempdir().unwrap();
        let repository = dir.path().join("repository");
        std::fs::create_dir_all(&repository).unwrap();
        std::fs::write(
            repository.join("Dockerfile"),
            "# syntax=docker/dockerfile:1\nFROM --platform=linux/amd64 python:3.12 AS base\nRUN true\n",
        )
        .unwrap();
        assert_eq!(
            extract_image_from_dockerfile(&repository, Path::new("Dockerfile")),
            Some("python:3.12".to_string())
        );
        assert_eq!(
            extract_image_from_dockerfile(&repository, Path::new("missing")),
            None
        );
    }

    #[test]
    fn test_template_function_in_render() {
        let dir = tempfile::tempdir().unwrap();
        let context = test_context(dir.path());
        let repository = context.repository_dir();
        std::fs::create_dir_all(&repository).unwrap();
        std::fs::write(repository.join("Dockerfile"), "FROM alpine:3.20\n").unwrap();
        let rendered = render(
            &context,
            "{{ extract_image_from_dockerfile('Dockerfile') }}",
            &[],
        )
        .unwrap();
        assert_eq!(rendered, "alpine:3.20");
    }
}
