//! Command loop
//!
//! [`UpgradeRunner`] repeatedly asks the manager for the next step, offers
//! the command menu for it through a [`UserInput`], and executes the chosen
//! command. The loop ends when no step remains, when the user exits, or when
//! the input decides to stop.

use crate::commands::{commands_for_step, ApplyNextCommand, ExitCommand, UpgradeCommand, UserOutput};
use crate::error::AssistantError;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use upgrade_engine::{StepReport, UpgradeManager};
use upgrade_step::{CancellationToken, StepId, UpgradeStepStatus};

/// What the input wants to do with the current step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Run the menu entry at this index
    Run(usize),
    /// End the run without executing anything
    Stop,
}

/// Source of command choices
#[async_trait]
pub trait UserInput: Send {
    /// Choose a command for `step`
    ///
    /// # Errors
    /// Implementation specific; `InputClosed` when no more input can arrive
    async fn choose(
        &mut self,
        step: &StepReport,
        commands: &[Box<dyn UpgradeCommand>],
    ) -> Result<Decision, AssistantError>;
}

/// Reads command numbers or names, one per line
pub struct ConsoleInput<R> {
    reader: R,
    output: Arc<dyn UserOutput>,
}

impl<R: AsyncBufRead + Unpin + Send> ConsoleInput<R> {
    /// Create over a line reader; prompts go to `output`
    pub fn new(reader: R, output: Arc<dyn UserOutput>) -> Self {
        Self { reader, output }
    }

    fn show(&self, step: &StepReport, commands: &[Box<dyn UpgradeCommand>]) {
        self.output.write_line("");
        self.output.write_line(&format!(
            "Next step: {} [{}] (risk: {})",
            step.title, step.status, step.risk
        ));
        if !step.details.is_empty() {
            self.output.write_line(&format!("  {}", step.details));
        }
        for (position, command) in commands.iter().enumerate() {
            self.output.write_line(&format!(
                "  {}. {} ({})",
                position + 1,
                command.command_text(),
                command.name()
            ));
        }
    }
}

/// Index of the command named or numbered by `answer`
fn parse_choice(answer: &str, commands: &[Box<dyn UpgradeCommand>]) -> Option<usize> {
    let answer = answer.trim();
    if answer.is_empty() {
        return (!commands.is_empty()).then_some(0);
    }
    if let Ok(number) = answer.parse::<usize>() {
        return (1..=commands.len()).contains(&number).then(|| number - 1);
    }
    commands
        .iter()
        .position(|command| command.name().eq_ignore_ascii_case(answer))
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> UserInput for ConsoleInput<R> {
    async fn choose(
        &mut self,
        step: &StepReport,
        commands: &[Box<dyn UpgradeCommand>],
    ) -> Result<Decision, AssistantError> {
        self.show(step, commands);
        loop {
            self.output.write_line("Choose a command [1]:");
            let mut line = String::new();
            if self.reader.read_line(&mut line).await? == 0 {
                return match commands.iter().position(|c| c.name() == ExitCommand::NAME) {
                    Some(exit) => Ok(Decision::Run(exit)),
                    None => Err(AssistantError::InputClosed),
                };
            }
            match parse_choice(&line, commands) {
                Some(index) => return Ok(Decision::Run(index)),
                None => self
                    .output
                    .write_line(&format!("Unknown command: {}", line.trim())),
            }
        }
    }
}

/// Applies every step automatically and stops on a failed step
#[derive(Debug, Clone, Default)]
pub struct NonInteractiveInput {
    wait: Duration,
}

impl NonInteractiveInput {
    /// Create with a pause before each apply
    #[must_use]
    pub fn new(wait: Duration) -> Self {
        Self { wait }
    }
}

#[async_trait]
impl UserInput for NonInteractiveInput {
    async fn choose(
        &mut self,
        step: &StepReport,
        commands: &[Box<dyn UpgradeCommand>],
    ) -> Result<Decision, AssistantError> {
        if step.status == UpgradeStepStatus::Failed {
            return Ok(Decision::Stop);
        }
        let Some(apply) = commands
            .iter()
            .position(|c| c.name() == ApplyNextCommand::NAME)
        else {
            return Ok(Decision::Stop);
        };
        if !self.wait.is_zero() {
            tracing::debug!(step = %step.id, wait_secs = self.wait.as_secs(), "Waiting before apply");
            tokio::time::sleep(self.wait).await;
        }
        Ok(Decision::Run(apply))
    }
}

/// How a run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// No step needs action
    Completed,
    /// The user exited
    Exited,
    /// Stopped on a failed step
    Failed {
        /// Failed step
        step: StepId,
        /// Failure details
        details: String,
    },
}

/// Drives an [`UpgradeManager`] with a [`UserInput`]
pub struct UpgradeRunner {
    manager: UpgradeManager,
    input: Box<dyn UserInput>,
    output: Arc<dyn UserOutput>,
    command_timeout: Option<Duration>,
}

impl UpgradeRunner {
    /// Create a runner
    pub fn new(
        manager: UpgradeManager,
        input: Box<dyn UserInput>,
        output: Arc<dyn UserOutput>,
    ) -> Self {
        Self {
            manager,
            input,
            output,
            command_timeout: None,
        }
    }

    /// With a per-command time limit
    #[must_use]
    pub fn with_command_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// The managed engine
    #[inline]
    #[must_use]
    pub fn manager(&self) -> &UpgradeManager {
        &self.manager
    }

    /// Consume the runner, returning the engine
    #[must_use]
    pub fn into_manager(self) -> UpgradeManager {
        self.manager
    }

    /// Run until completion, exit, or a stop decision
    ///
    /// # Errors
    /// Engine errors (contract violations, cancellation), input errors and
    /// command timeouts
    pub async fn run(&mut self, cancel: &CancellationToken) -> Result<RunOutcome, AssistantError> {
        loop {
            if cancel.is_cancelled() {
                return Err(AssistantError::Cancelled);
            }

            let Some(step) = self.manager.next_step(cancel).await? else {
                self.manager.context_mut().set_complete(true);
                self.output.write_line("Upgrade complete");
                tracing::info!("All steps done");
                return Ok(RunOutcome::Completed);
            };

            let report = self.manager.report(step);
            let exit = Arc::new(AtomicBool::new(false));
            let commands =
                commands_for_step(&self.manager, step, Arc::clone(&self.output), Arc::clone(&exit));

            let index = match self.input.choose(&report, &commands).await? {
                Decision::Run(index) => index,
                Decision::Stop if report.status == UpgradeStepStatus::Failed => {
                    self.output
                        .write_line(&format!("Stopped at failed step {}: {}", report.title, report.details));
                    return Ok(RunOutcome::Failed {
                        step: report.id,
                        details: report.details,
                    });
                }
                Decision::Stop => return Ok(RunOutcome::Exited),
            };
            let command = commands.get(index).ok_or(AssistantError::InvalidChoice {
                choice: index,
                available: commands.len(),
            })?;

            tracing::debug!(step = %report.id, command = command.name(), "Executing command");
            let succeeded = self.execute(command.as_ref(), cancel).await?;
            if !succeeded {
                tracing::warn!(step = %report.id, command = command.name(), "Command did not succeed");
            }

            if exit.load(Ordering::SeqCst) {
                tracing::info!("Exit requested");
                return Ok(RunOutcome::Exited);
            }
        }
    }

    async fn execute(
        &mut self,
        command: &dyn UpgradeCommand,
        cancel: &CancellationToken,
    ) -> Result<bool, AssistantError> {
        let Some(limit) = self.command_timeout else {
            return command.execute(&mut self.manager, cancel).await;
        };
        tokio::time::timeout(limit, command.execute(&mut self.manager, cancel))
            .await
            .map_err(|_| AssistantError::Timeout {
                command: command.name().to_string(),
                duration_secs: limit.as_secs(),
            })?
    }
}

impl std::fmt::Debug for UpgradeRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpgradeRunner")
            .field("manager", &self.manager)
            .field("command_timeout", &self.command_timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::MockUserOutput;
    use upgrade_engine::StepOrderer;
    use upgrade_step::{StepSpec, UpgradeContext};
    use upgrade_test_utils::{Scripted, ScriptedStep, VisitLog};

    fn quiet() -> Arc<dyn UserOutput> {
        let mut output = MockUserOutput::new();
        output.expect_write_line().return_const(());
        Arc::new(output)
    }

    fn manager(specs: Vec<StepSpec>) -> UpgradeManager {
        let mut orderer = StepOrderer::new();
        for spec in specs {
            orderer.register(spec);
        }
        orderer.build(UpgradeContext::default()).unwrap()
    }

    #[tokio::test]
    async fn non_interactive_run_applies_everything() {
        let log = VisitLog::default();
        let m = manager(vec![
            StepSpec::new(ScriptedStep::new("a").with_log(&log)),
            StepSpec::new(ScriptedStep::new("b").with_log(&log)),
        ]);
        let mut runner = UpgradeRunner::new(m, Box::new(NonInteractiveInput::default()), quiet());

        let outcome = runner.run(&CancellationToken::new()).await.unwrap();
        assert_eq!(outcome, RunOutcome::Completed);
        assert_eq!(log.applied(), vec!["a", "b"]);
        assert!(runner.manager().context().is_complete());
    }

    #[tokio::test]
    async fn non_interactive_run_stops_on_failure() {
        let m = manager(vec![StepSpec::new(
            ScriptedStep::new("a").applies_with(Scripted::Error("compile error".into())),
        )]);
        let mut runner = UpgradeRunner::new(m, Box::new(NonInteractiveInput::default()), quiet());

        let outcome = runner.run(&CancellationToken::new()).await.unwrap();
        assert_eq!(
            outcome,
            RunOutcome::Failed {
                step: StepId::from("a"),
                details: "compile error".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn console_input_accepts_numbers_and_names() {
        let input = b"9\nskip-next\n2\n".as_slice();
        let m = manager(vec![
            StepSpec::new(ScriptedStep::new("a")),
            StepSpec::new(ScriptedStep::new("b")),
        ]);
        let console = ConsoleInput::new(input, quiet());
        let mut runner = UpgradeRunner::new(m, Box::new(console), quiet());

        let outcome = runner.run(&CancellationToken::new()).await.unwrap();
        assert_eq!(outcome, RunOutcome::Completed);
        let manager = runner.into_manager();
        for id in ["a", "b"] {
            let index = manager.find(id).unwrap();
            assert_eq!(manager.step(index).unwrap().status(), UpgradeStepStatus::Skipped);
        }
    }

    #[tokio::test]
    async fn closed_console_exits() {
        let m = manager(vec![StepSpec::new(ScriptedStep::new("a"))]);
        let console = ConsoleInput::new(b"".as_slice(), quiet());
        let mut runner = UpgradeRunner::new(m, Box::new(console), quiet());
        assert_eq!(
            runner.run(&CancellationToken::new()).await.unwrap(),
            RunOutcome::Exited
        );
    }

    #[tokio::test]
    async fn cancelled_token_stops_the_loop() {
        let m = manager(vec![StepSpec::new(ScriptedStep::new("a"))]);
        let mut runner = UpgradeRunner::new(m, Box::new(NonInteractiveInput::default()), quiet());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = runner.run(&cancel).await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn empty_answer_picks_first_command() {
        let commands: Vec<Box<dyn UpgradeCommand>> =
            vec![Box::new(ExitCommand::new(|| {})), Box::new(ExitCommand::new(|| {}))];
        assert_eq!(parse_choice("\n", &commands), Some(0));
        assert_eq!(parse_choice(" 2 ", &commands), Some(1));
        assert_eq!(parse_choice("0", &commands), None);
        assert_eq!(parse_choice("EXIT", &commands), Some(0));
        assert_eq!(parse_choice("apply", &commands), None);
    }
}
