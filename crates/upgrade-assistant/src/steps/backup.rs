//! Project backup step
//!
//! Copies the current project's directory before anything modifies it and
//! drops a marker file into the copy. The marker makes the step idempotent
//! across process restarts: a backup that already has a marker is complete.

use async_trait::async_trait;
use std::fs;
use std::path::{Component, Path, PathBuf};
use upgrade_step::{
    BuildBreakRisk, CancellationToken, ProjectRef, StatusResult, StepError, UpgradeContext,
    UpgradeStep,
};
use walkdir::WalkDir;

/// Step id
pub const BACKUP_STEP_ID: &str = "builtin.backup";

/// Marker file written into a finished backup
pub const BACKUP_MARKER: &str = ".upgrade-backup";

/// Property bag key holding the backup location of the current project
pub const BACKUP_LOCATION_KEY: &str = "builtin.backup.location";

/// Backs up the current project directory
#[derive(Debug, Clone, Default)]
pub struct BackupStep {
    backup_root: Option<PathBuf>,
    skip: bool,
}

impl BackupStep {
    /// Create a backup step
    ///
    /// With no `backup_root` the copy is placed next to the project
    /// directory as `<dir>.backup`.
    #[must_use]
    pub fn new(backup_root: Option<PathBuf>, skip: bool) -> Self {
        Self { backup_root, skip }
    }

    /// Where the backup of `project` goes
    ///
    /// Under a configured root the project directory's path relative to the
    /// input is kept, so projects sharing a name never share a backup.
    #[must_use]
    pub fn target_for(&self, input: &Path, project: &ProjectRef) -> PathBuf {
        let source = project.directory();
        let Some(root) = &self.backup_root else {
            let dir_name = source
                .file_name()
                .map_or_else(|| project.name.clone(), |n| n.to_string_lossy().into_owned());
            return source.with_file_name(format!("{dir_name}.backup"));
        };

        let base = if input.is_file() {
            input.parent().unwrap_or(input)
        } else {
            input
        };
        let relative: PathBuf = match source.strip_prefix(base) {
            Ok(rel) => rel.to_path_buf(),
            Err(_) => source
                .components()
                .filter(|c| matches!(c, Component::Normal(_)))
                .collect(),
        };
        if relative.as_os_str().is_empty() {
            root.join(&project.name)
        } else {
            root.join(relative)
        }
    }
}

#[async_trait]
impl UpgradeStep for BackupStep {
    fn id(&self) -> &str {
        BACKUP_STEP_ID
    }

    fn title(&self) -> &str {
        "Back up project"
    }

    fn description(&self) -> &str {
        "Copies the project directory so the upgrade can be reverted"
    }

    fn is_applicable(&self, context: &UpgradeContext) -> bool {
        context.current_project().is_some()
    }

    async fn initialize(
        &mut self,
        context: &mut UpgradeContext,
        _cancel: &CancellationToken,
    ) -> Result<StatusResult, StepError> {
        if self.skip {
            return Ok(StatusResult::skipped("Backup disabled by configuration"));
        }
        let Some(project) = context.current_project() else {
            return Ok(StatusResult::skipped("No project selected"));
        };

        let target = self.target_for(context.input_path(), project);
        context
            .properties_mut()
            .insert(BACKUP_LOCATION_KEY, target.clone());

        if target.join(BACKUP_MARKER).is_file() {
            return Ok(StatusResult::complete(format!(
                "Existing backup found at {}",
                target.display()
            )));
        }
        Ok(StatusResult::incomplete(
            format!("Project will be backed up to {}", target.display()),
            BuildBreakRisk::None,
        ))
    }

    async fn apply(
        &mut self,
        context: &mut UpgradeContext,
        cancel: &CancellationToken,
    ) -> Result<StatusResult, StepError> {
        let Some(project) = context.current_project() else {
            return Err(StepError::failed("No project selected"));
        };
        let source = project.directory().to_path_buf();
        let target = self.target_for(context.input_path(), project);

        tracing::info!(from = %source.display(), to = %target.display(), "Backing up project");
        let worker_cancel = cancel.clone();
        let worker_target = target.clone();
        let copied = tokio::task::spawn_blocking(move || -> Result<usize, StepError> {
            let copied = copy_tree(&source, &worker_target, &worker_cancel)?;
            let stamp = chrono::Utc::now().to_rfc3339();
            fs::write(worker_target.join(BACKUP_MARKER), format!("{stamp}\n"))?;
            Ok(copied)
        })
        .await
        .map_err(|err| StepError::failed(format!("backup task failed: {err}")))??;

        Ok(StatusResult::complete(format!(
            "Backed up {copied} files to {}",
            target.display()
        )))
    }
}

/// Copy `source` into `target`, never descending into `target` or its ancestors
///
/// Returns the number of files copied. Links are not followed or copied.
fn copy_tree(source: &Path, target: &Path, cancel: &CancellationToken) -> Result<usize, StepError> {
    fs::create_dir_all(target)?;
    let walker = WalkDir::new(source)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !target.starts_with(entry.path()));

    let mut copied = 0;
    for entry in walker {
        cancel.check()?;
        let entry = entry.map_err(std::io::Error::from)?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|err| StepError::failed(format!("backup path outside project: {err}")))?;
        let to = target.join(relative);

        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&to)?;
        } else if file_type.is_file() {
            fs::copy(entry.path(), &to)?;
            copied += 1;
        } else {
            tracing::debug!(path = %entry.path().display(), "Not copying link");
        }
    }
    Ok(copied)
}
