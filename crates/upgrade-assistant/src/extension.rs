//! Extension registry
//!
//! Extensions contribute steps. Each one is registered through an explicit
//! entry point (`ExtensionRegistry::register`) and loaded in registration
//! order. Loading is isolated per extension: an error, a panic or an API
//! version mismatch in one extension is recorded in the [`LoadReport`] and
//! the remaining extensions still load.

use crate::config::AssistantConfig;
use crate::error::ExtensionError;
use crate::steps::{BackupStep, ProjectSelectionStep, SELECT_PROJECT_STEP_ID};
use indexmap::IndexMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use upgrade_engine::StepOrderer;
use upgrade_step::{StepId, StepScope, StepSpec};

/// Extension API version implemented by this host
pub const EXTENSION_API_VERSION: u32 = 1;

/// Name of the built-in extension
pub const DEFAULT_EXTENSION: &str = "default";

/// Identity of an extension
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ExtensionManifest {
    /// Unique name
    pub name: String,
    /// Extension version
    pub version: String,
    /// Extension API version it was built against
    pub api_version: u32,
}

impl ExtensionManifest {
    /// Manifest targeting the host's API version
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            api_version: EXTENSION_API_VERSION,
        }
    }
}

/// Source of steps
pub trait Extension: Send + Sync {
    /// Identity and API version
    fn manifest(&self) -> ExtensionManifest;

    /// Steps contributed for this configuration
    ///
    /// # Errors
    /// Any error is confined to this extension
    fn steps(&self, config: &AssistantConfig) -> Result<Vec<StepSpec>, ExtensionError>;
}

/// Outcome of loading all extensions
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Extensions whose steps were registered
    pub loaded: Vec<ExtensionManifest>,
    /// Extensions skipped because configuration disabled them
    pub disabled: Vec<String>,
    /// Extensions that failed to load
    pub failures: Vec<ExtensionError>,
    /// Step ids rejected as duplicates
    pub rejected_steps: Vec<StepId>,
}

impl LoadReport {
    /// Whether every enabled extension loaded cleanly
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.rejected_steps.is_empty()
    }
}

/// Registered extensions in registration order
#[derive(Default)]
pub struct ExtensionRegistry {
    extensions: IndexMap<String, Box<dyn Extension>>,
}

impl ExtensionRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in extension
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(DefaultExtension);
        registry
    }

    /// Register an extension
    ///
    /// Returns `false` if an extension with the same name is registered, or
    /// if its manifest cannot be read.
    pub fn register(&mut self, extension: impl Extension + 'static) -> bool {
        let name = match catch_unwind(AssertUnwindSafe(|| extension.manifest())) {
            Ok(manifest) => manifest.name,
            Err(_) => {
                tracing::warn!("Extension panicked while reporting its manifest; ignoring");
                return false;
            }
        };
        if self.extensions.contains_key(&name) {
            tracing::warn!(extension = %name, "Extension already registered; ignoring");
            return false;
        }
        tracing::debug!(extension = %name, "Registered extension");
        self.extensions.insert(name, Box::new(extension));
        true
    }

    /// Number of registered extensions
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.extensions.len()
    }

    /// Check if no extension is registered
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }

    /// Names in registration order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.extensions.keys().map(String::as_str)
    }

    /// Register every enabled extension's steps with `orderer`
    pub fn load_into(&self, orderer: &mut StepOrderer, config: &AssistantConfig) -> LoadReport {
        let mut report = LoadReport::default();

        for (name, extension) in &self.extensions {
            if config.is_extension_disabled(name) {
                tracing::info!(extension = %name, "Extension disabled by configuration");
                report.disabled.push(name.clone());
                continue;
            }

            match load_one(name, extension.as_ref(), config) {
                Ok((manifest, specs)) => {
                    for spec in specs {
                        let id = StepId::from(spec.id());
                        if !orderer.register(spec) {
                            report.rejected_steps.push(id);
                        }
                    }
                    tracing::info!(
                        extension = %manifest.name,
                        version = %manifest.version,
                        "Loaded extension"
                    );
                    report.loaded.push(manifest);
                }
                Err(err) => {
                    tracing::warn!(extension = %name, error = %err, "Extension failed to load");
                    report.failures.push(err);
                }
            }
        }

        report
    }
}

impl std::fmt::Debug for ExtensionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionRegistry")
            .field("extensions", &self.extensions.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn load_one(
    name: &str,
    extension: &dyn Extension,
    config: &AssistantConfig,
) -> Result<(ExtensionManifest, Vec<StepSpec>), ExtensionError> {
    let manifest = catch_unwind(AssertUnwindSafe(|| extension.manifest()))
        .map_err(|payload| panicked(name, payload.as_ref()))?;
    if manifest.api_version != EXTENSION_API_VERSION {
        return Err(ExtensionError::ApiVersionMismatch {
            extension: name.to_string(),
            expected: EXTENSION_API_VERSION,
            found: manifest.api_version,
        });
    }

    let specs = catch_unwind(AssertUnwindSafe(|| extension.steps(config)))
        .map_err(|payload| panicked(name, payload.as_ref()))??;
    Ok((manifest, specs))
}

fn panicked(name: &str, payload: &(dyn std::any::Any + Send)) -> ExtensionError {
    let message = payload
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    ExtensionError::Panicked {
        extension: name.to_string(),
        message,
    }
}

/// Built-in steps: project selection and backup
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultExtension;

impl Extension for DefaultExtension {
    fn manifest(&self) -> ExtensionManifest {
        ExtensionManifest::new(DEFAULT_EXTENSION, env!("CARGO_PKG_VERSION"))
    }

    fn steps(&self, config: &AssistantConfig) -> Result<Vec<StepSpec>, ExtensionError> {
        Ok(vec![
            StepSpec::new(ProjectSelectionStep).with_scope(StepScope::Project),
            StepSpec::new(BackupStep::new(config.backup_dir.clone(), config.skip_backup))
                .with_scope(StepScope::Project)
                .depends_on(SELECT_PROJECT_STEP_ID),
        ])
    }
}
