//! Upgrade commands
//!
//! The menu offered for the current step. Each command is bound to the step
//! it was built for, so executing it never re-resolves the "next" step.

use crate::error::AssistantError;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use upgrade_engine::{StepIndex, UpgradeManager};
use upgrade_step::CancellationToken;

/// Sink for user-facing text
#[cfg_attr(test, mockall::automock)]
pub trait UserOutput: Send + Sync {
    /// Write one line
    fn write_line(&self, text: &str);
}

/// Writes to stdout
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleOutput;

impl UserOutput for ConsoleOutput {
    fn write_line(&self, text: &str) {
        println!("{text}");
    }
}

/// One menu entry
#[async_trait]
pub trait UpgradeCommand: Send + Sync {
    /// Stable token accepted on the command line, e.g. `apply-next`
    fn name(&self) -> &str;

    /// Menu text
    fn command_text(&self) -> String;

    /// Whether the command can run now
    fn is_enabled(&self, _manager: &UpgradeManager) -> bool {
        true
    }

    /// Run the command. Returns whether it succeeded.
    async fn execute(
        &self,
        manager: &mut UpgradeManager,
        cancel: &CancellationToken,
    ) -> Result<bool, AssistantError>;
}

/// Apply the current step
#[derive(Debug, Clone, Copy)]
pub struct ApplyNextCommand {
    step: StepIndex,
}

impl ApplyNextCommand {
    /// Command name
    pub const NAME: &'static str = "apply-next";

    /// Bind to a step
    #[must_use]
    pub fn new(step: StepIndex) -> Self {
        Self { step }
    }
}

#[async_trait]
impl UpgradeCommand for ApplyNextCommand {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn command_text(&self) -> String {
        "Apply next step".to_string()
    }

    async fn execute(
        &self,
        manager: &mut UpgradeManager,
        cancel: &CancellationToken,
    ) -> Result<bool, AssistantError> {
        Ok(manager.apply(self.step, cancel).await?)
    }
}

/// Skip the current step
#[derive(Debug, Clone, Copy)]
pub struct SkipNextCommand {
    step: StepIndex,
}

impl SkipNextCommand {
    /// Command name
    pub const NAME: &'static str = "skip-next";

    /// Bind to a step
    #[must_use]
    pub fn new(step: StepIndex) -> Self {
        Self { step }
    }
}

#[async_trait]
impl UpgradeCommand for SkipNextCommand {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn command_text(&self) -> String {
        "Skip next step".to_string()
    }

    fn is_enabled(&self, manager: &UpgradeManager) -> bool {
        manager
            .step(self.step)
            .is_ok_and(|node| node.status().needs_action())
    }

    async fn execute(
        &self,
        manager: &mut UpgradeManager,
        cancel: &CancellationToken,
    ) -> Result<bool, AssistantError> {
        Ok(manager.skip(self.step, cancel)?)
    }
}

/// Print the step's full report
pub struct SeeMoreDetailsCommand {
    step: StepIndex,
    output: Arc<dyn UserOutput>,
}

impl SeeMoreDetailsCommand {
    /// Command name
    pub const NAME: &'static str = "details";

    /// Bind to a step
    pub fn new(step: StepIndex, output: Arc<dyn UserOutput>) -> Self {
        Self { step, output }
    }
}

#[async_trait]
impl UpgradeCommand for SeeMoreDetailsCommand {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn command_text(&self) -> String {
        "See more step details".to_string()
    }

    async fn execute(
        &self,
        manager: &mut UpgradeManager,
        _cancel: &CancellationToken,
    ) -> Result<bool, AssistantError> {
        manager.step(self.step)?;
        let report = manager.report(self.step);
        if !report.description.is_empty() {
            self.output.write_line(&report.description);
        }
        for line in report.render_text().lines() {
            self.output.write_line(line);
        }
        Ok(true)
    }
}

/// Leave the current project; the next unprocessed project gets selected
#[derive(Debug, Clone, Copy, Default)]
pub struct SelectProjectCommand;

impl SelectProjectCommand {
    /// Command name
    pub const NAME: &'static str = "select-project";
}

#[async_trait]
impl UpgradeCommand for SelectProjectCommand {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn command_text(&self) -> String {
        "Select a different project".to_string()
    }

    fn is_enabled(&self, manager: &UpgradeManager) -> bool {
        manager.context().current_project().is_some() && manager.context().projects().len() > 1
    }

    async fn execute(
        &self,
        manager: &mut UpgradeManager,
        _cancel: &CancellationToken,
    ) -> Result<bool, AssistantError> {
        Ok(manager.select_project(None))
    }
}

/// Stop the run
pub struct ExitCommand {
    on_exit: Box<dyn Fn() + Send + Sync>,
}

impl ExitCommand {
    /// Command name
    pub const NAME: &'static str = "exit";

    /// Create with a termination callback
    pub fn new(on_exit: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            on_exit: Box::new(on_exit),
        }
    }

    /// Create a command that raises `flag`
    #[must_use]
    pub fn with_flag(flag: Arc<AtomicBool>) -> Self {
        Self::new(move || flag.store(true, Ordering::SeqCst))
    }
}

#[async_trait]
impl UpgradeCommand for ExitCommand {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn command_text(&self) -> String {
        "Exit".to_string()
    }

    async fn execute(
        &self,
        _manager: &mut UpgradeManager,
        _cancel: &CancellationToken,
    ) -> Result<bool, AssistantError> {
        (self.on_exit)();
        Ok(true)
    }
}

/// Menu for `step`, enabled commands only
pub fn commands_for_step(
    manager: &UpgradeManager,
    step: StepIndex,
    output: Arc<dyn UserOutput>,
    exit_flag: Arc<AtomicBool>,
) -> Vec<Box<dyn UpgradeCommand>> {
    let all: Vec<Box<dyn UpgradeCommand>> = vec![
        Box::new(ApplyNextCommand::new(step)),
        Box::new(SkipNextCommand::new(step)),
        Box::new(SeeMoreDetailsCommand::new(step, output)),
        Box::new(SelectProjectCommand),
        Box::new(ExitCommand::with_flag(exit_flag)),
    ];
    all.into_iter()
        .filter(|command| command.is_enabled(manager))
        .collect()
}
