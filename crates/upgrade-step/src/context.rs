//! Upgrade session context
//!
//! The context is the only sanctioned channel between steps. It carries a
//! closed set of well-known fields (input path, discovered projects, entry
//! points, current project, completion flag) plus a typed property bag for
//! step-specific data such as a chosen backup location.

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Reference to a project being upgraded
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProjectRef {
    /// Display name (file stem of the project file)
    pub name: String,
    /// Path to the project file
    pub path: PathBuf,
}

impl ProjectRef {
    /// Create a project reference from its file path
    #[must_use]
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self { name, path }
    }

    /// Directory containing the project file
    #[must_use]
    pub fn directory(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("."))
    }
}

impl std::fmt::Display for ProjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.path.display())
    }
}

/// String-keyed bag of typed values
#[derive(Default)]
pub struct PropertyBag {
    entries: HashMap<String, Box<dyn Any + Send + Sync>>,
}

impl PropertyBag {
    /// Create an empty bag
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value, replacing any previous value under `key`
    pub fn insert<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) {
        self.entries.insert(key.into(), Box::new(value));
    }

    /// Get a value if present and of type `T`
    #[must_use]
    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<&T> {
        self.entries.get(key).and_then(|v| v.downcast_ref::<T>())
    }

    /// Get a mutable value if present and of type `T`
    pub fn get_mut<T: Any + Send + Sync>(&mut self, key: &str) -> Option<&mut T> {
        self.entries.get_mut(key).and_then(|v| v.downcast_mut::<T>())
    }

    /// Get the value under `key`, inserting `T::default()` first if missing
    /// or of a different type
    pub fn get_or_default<T: Any + Send + Sync + Default>(&mut self, key: &str) -> &mut T {
        let slot = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Box::new(T::default()));
        if !slot.is::<T>() {
            *slot = Box::new(T::default());
        }
        slot.downcast_mut::<T>()
            .unwrap_or_else(|| unreachable!("slot was just set to T"))
    }

    /// Remove a value, returning it if it had type `T`
    pub fn remove<T: Any + Send + Sync>(&mut self, key: &str) -> Option<T> {
        self.entries
            .remove(key)
            .and_then(|v| v.downcast::<T>().ok())
            .map(|b| *b)
    }

    /// Check if a key is present
    #[inline]
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of entries
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the bag is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for PropertyBag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<&String> = self.entries.keys().collect();
        keys.sort();
        f.debug_struct("PropertyBag").field("keys", &keys).finish()
    }
}

/// Mutable state for one upgrade run
#[derive(Debug, Default)]
pub struct UpgradeContext {
    input_path: PathBuf,
    projects: Vec<ProjectRef>,
    entry_points: Vec<ProjectRef>,
    current_project: Option<ProjectRef>,
    completed: bool,
    properties: PropertyBag,
}

impl UpgradeContext {
    /// Create a context for the given input (project file or directory)
    #[must_use]
    pub fn new(input_path: impl Into<PathBuf>) -> Self {
        Self {
            input_path: input_path.into(),
            ..Self::default()
        }
    }

    /// With discovered projects
    #[must_use]
    pub fn with_projects(mut self, projects: Vec<ProjectRef>) -> Self {
        self.projects = projects;
        self
    }

    /// Path the run was started on
    #[inline]
    #[must_use]
    pub fn input_path(&self) -> &Path {
        &self.input_path
    }

    /// All projects in discovery order
    #[inline]
    #[must_use]
    pub fn projects(&self) -> &[ProjectRef] {
        &self.projects
    }

    /// Replace the project list
    pub fn set_projects(&mut self, projects: Vec<ProjectRef>) {
        self.projects = projects;
    }

    /// Entry-point projects
    #[inline]
    #[must_use]
    pub fn entry_points(&self) -> &[ProjectRef] {
        &self.entry_points
    }

    /// Replace the entry points
    pub fn set_entry_points(&mut self, entry_points: Vec<ProjectRef>) {
        self.entry_points = entry_points;
    }

    /// Project currently being upgraded
    #[inline]
    #[must_use]
    pub fn current_project(&self) -> Option<&ProjectRef> {
        self.current_project.as_ref()
    }

    /// Set or clear the current project. Returns whether the value changed.
    pub fn set_current_project(&mut self, project: Option<ProjectRef>) -> bool {
        if self.current_project == project {
            return false;
        }
        tracing::info!(
            project = project.as_ref().map(|p| p.name.as_str()).unwrap_or("<none>"),
            "Current project changed"
        );
        self.current_project = project;
        true
    }

    /// Whether the run has finished
    #[inline]
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.completed
    }

    /// Mark the run finished (or not)
    pub fn set_complete(&mut self, completed: bool) {
        self.completed = completed;
    }

    /// Typed property bag
    #[inline]
    #[must_use]
    pub fn properties(&self) -> &PropertyBag {
        &self.properties
    }

    /// Mutable typed property bag
    #[inline]
    pub fn properties_mut(&mut self) -> &mut PropertyBag {
        &mut self.properties
    }
}
