//! Project discovery
//!
//! The input is either a project file, a solution file (its directory is
//! searched), or a directory. Hidden directories, `bin`, `obj` and finished
//! backups (directories holding the backup marker) are not entered. Results
//! are sorted by path.

use crate::error::AssistantError;
use crate::steps::BACKUP_MARKER;
use std::path::{Path, PathBuf};
use upgrade_step::ProjectRef;
use walkdir::{DirEntry, WalkDir};

const IGNORED_DIRS: &[&str] = &["bin", "obj"];

/// Find the projects for an input path
///
/// # Errors
/// - `InputNotFound` if `input` does not exist
/// - `NoProjects` if nothing with a matching extension was found
/// - `Io` if a directory cannot be read
pub fn discover_projects(
    input: &Path,
    extensions: &[String],
) -> Result<Vec<ProjectRef>, AssistantError> {
    if !input.exists() {
        return Err(AssistantError::InputNotFound(input.to_path_buf()));
    }

    let projects = if input.is_file() {
        if has_extension(input, extensions) {
            vec![ProjectRef::from_path(input)]
        } else {
            let root = input.parent().unwrap_or_else(|| Path::new("."));
            search(root, extensions)?
        }
    } else {
        search(input, extensions)?
    };

    if projects.is_empty() {
        return Err(AssistantError::NoProjects(input.to_path_buf()));
    }
    tracing::info!(input = %input.display(), count = projects.len(), "Discovered projects");
    Ok(projects)
}

fn search(root: &Path, extensions: &[String]) -> Result<Vec<ProjectRef>, AssistantError> {
    let mut found: Vec<PathBuf> = Vec::new();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_pruned(entry));

    for entry in walker {
        let entry = entry.map_err(std::io::Error::from)?;
        if entry.file_type().is_file() && has_extension(entry.path(), extensions) {
            found.push(entry.into_path());
        }
    }

    found.sort();
    Ok(found.into_iter().map(ProjectRef::from_path).collect())
}

fn is_pruned(entry: &DirEntry) -> bool {
    if !entry.file_type().is_dir() {
        return false;
    }
    let ignored = entry
        .file_name()
        .to_str()
        .is_some_and(|name| name.starts_with('.') || IGNORED_DIRS.contains(&name));
    ignored || entry.path().join(BACKUP_MARKER).is_file()
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AssistantConfig;
    use pretty_assertions::assert_eq;
    use upgrade_test_utils::ProjectFixture;

    fn names(projects: &[ProjectRef]) -> Vec<&str> {
        projects.iter().map(|p| p.name.as_str()).collect()
    }

    fn extensions() -> Vec<String> {
        AssistantConfig::default().project_extensions
    }

    #[test]
    fn directory_search_is_sorted_and_skips_build_output() {
        let fixture = ProjectFixture::new()
            .with_project("src/Web/Web.csproj")
            .with_project("src/Core/Core.fsproj")
            .with_project("src/Web/bin/Debug/Copy.csproj")
            .with_project("src/Core/obj/Gen.csproj")
            .with_project(".git/Hidden.csproj")
            .with_file("README.md", "# app");

        let projects = discover_projects(fixture.path(), &extensions()).unwrap();
        assert_eq!(names(&projects), vec!["Core", "Web"]);
    }

    #[test]
    fn finished_backups_are_not_projects() {
        let fixture = ProjectFixture::new()
            .with_project("A/A.csproj")
            .with_project("A.backup/A.csproj")
            .with_file("A.backup/.upgrade-backup", "2026-01-01T00:00:00+00:00\n")
            .with_project("backups/B/B.csproj")
            .with_file("backups/B/.upgrade-backup", "2026-01-01T00:00:00+00:00\n");

        let projects = discover_projects(fixture.path(), &extensions()).unwrap();
        assert_eq!(projects.len(), 1);
        assert_eq!(projects[0].path, fixture.join("A/A.csproj"));
    }

    #[test]
    fn project_file_input_is_the_only_project() {
        let fixture = ProjectFixture::new()
            .with_project("App/App.vbproj")
            .with_project("Other/Other.csproj");

        let projects = discover_projects(&fixture.join("App/App.vbproj"), &extensions()).unwrap();
        assert_eq!(names(&projects), vec!["App"]);
    }

    #[test]
    fn solution_input_searches_its_directory() {
        let fixture = ProjectFixture::new()
            .with_file("app.sln", "")
            .with_project("A/A.csproj")
            .with_project("B/B.csproj");

        let projects = discover_projects(&fixture.join("app.sln"), &extensions()).unwrap();
        assert_eq!(names(&projects), vec!["A", "B"]);
    }

    #[test]
    fn extension_match_ignores_case() {
        let fixture = ProjectFixture::new().with_project("Legacy/Legacy.CSPROJ");
        let projects = discover_projects(fixture.path(), &extensions()).unwrap();
        assert_eq!(names(&projects), vec!["Legacy"]);
    }

    #[test]
    fn empty_directory_has_no_projects() {
        let fixture = ProjectFixture::new().with_file("notes.txt", "");
        let err = discover_projects(fixture.path(), &extensions()).unwrap_err();
        assert!(matches!(err, AssistantError::NoProjects(_)));
    }

    #[test]
    fn missing_input_is_reported() {
        let fixture = ProjectFixture::new();
        let err = discover_projects(&fixture.join("absent"), &extensions()).unwrap_err();
        assert!(matches!(err, AssistantError::InputNotFound(_)));
    }
}
