//! `upgrade-assistant` command-line entry point
//!
//! `upgrade` walks the ordered steps for every discovered project, either
//! interactively or unattended. `analyze` initializes them per project without
//! applying anything and prints a status report, as text or JSON.

use anyhow::Context;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use upgrade_assistant::error::{
    EXIT_CANCELLED, EXIT_CONFIGURATION, EXIT_OK, EXIT_STEP_FAILED,
};
use upgrade_assistant::{
    AssistantConfig, AssistantError, ConsoleInput, ConsoleOutput, ExtensionRegistry,
    NonInteractiveInput, RunOutcome, Session, UpgradeRunner, UserInput, UserOutput,
};
use upgrade_step::CancellationToken;

fn cli() -> Command {
    Command::new("upgrade-assistant")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Interactive, resumable project upgrade assistant")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("Configuration file (TOML)"),
        )
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Enable debug logging"),
        )
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON"),
        )
        .subcommand(
            Command::new("upgrade")
                .about("Upgrade the projects under a path")
                .arg(
                    Arg::new("path")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Project file, solution file or directory"),
                )
                .arg(
                    Arg::new("non-interactive")
                        .long("non-interactive")
                        .action(ArgAction::SetTrue)
                        .help("Apply every step without prompting"),
                )
                .arg(
                    Arg::new("non-interactive-wait")
                        .long("non-interactive-wait")
                        .value_parser(value_parser!(u64))
                        .help("Seconds to wait before each automatic apply"),
                )
                .arg(
                    Arg::new("skip-backup")
                        .long("skip-backup")
                        .action(ArgAction::SetTrue)
                        .help("Do not back up projects"),
                )
                .arg(
                    Arg::new("disable-extension")
                        .long("disable-extension")
                        .action(ArgAction::Append)
                        .help("Do not load the named extension (repeatable)"),
                ),
        )
        .subcommand(
            Command::new("analyze")
                .about("Report what an upgrade would do without changing anything")
                .arg(
                    Arg::new("path")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Project file, solution file or directory"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Output as JSON"),
                ),
        )
}

#[tokio::main]
async fn main() {
    let matches = cli().get_matches();

    let code = match run(&matches).await {
        Ok(code) => code,
        Err(err) => {
            let code = err
                .downcast_ref::<AssistantError>()
                .map_or(EXIT_CONFIGURATION, AssistantError::exit_code);
            if code == EXIT_CANCELLED {
                eprintln!("Cancelled");
            } else {
                eprintln!("error: {err:#}");
            }
            code
        }
    };
    std::process::exit(code);
}

async fn run(matches: &ArgMatches) -> anyhow::Result<i32> {
    let mut config = match matches.get_one::<PathBuf>("config") {
        Some(path) => AssistantConfig::load(path).map_err(AssistantError::from)?,
        None => AssistantConfig::default(),
    };

    init_tracing(
        matches.get_flag("verbose"),
        matches.get_flag("log-json"),
        config.log_filter.as_deref(),
    )?;

    let cancel = CancellationToken::new();
    let output: Arc<dyn UserOutput> = Arc::new(ConsoleOutput);

    match matches.subcommand() {
        Some(("upgrade", args)) => {
            apply_upgrade_flags(&mut config, args);
            let path = required_path(args)?;
            upgrade(&path, &config, output, &cancel).await
        }
        Some(("analyze", args)) => {
            let path = required_path(args)?;
            analyze(&path, &config, args.get_flag("json"), output.as_ref(), &cancel).await
        }
        _ => unreachable!("clap requires a subcommand"),
    }
}

fn required_path(args: &ArgMatches) -> anyhow::Result<PathBuf> {
    args.get_one::<PathBuf>("path")
        .cloned()
        .context("missing input path")
}

fn apply_upgrade_flags(config: &mut AssistantConfig, args: &ArgMatches) {
    if args.get_flag("non-interactive") {
        config.non_interactive = true;
    }
    if let Some(wait) = args.get_one::<u64>("non-interactive-wait") {
        config.non_interactive_wait_secs = *wait;
    }
    if args.get_flag("skip-backup") {
        config.skip_backup = true;
    }
    if let Some(names) = args.get_many::<String>("disable-extension") {
        for name in names {
            *config = std::mem::take(config).with_disabled_extension(name.clone());
        }
    }
}

/// Filter source order: `RUST_LOG`, `--verbose`, config `log_filter`, `info`
fn init_tracing(verbose: bool, json: bool, config_filter: Option<&str>) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| {
            if verbose {
                EnvFilter::try_new("debug")
            } else {
                EnvFilter::try_new(config_filter.unwrap_or("info"))
            }
        })
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()?;
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr)
                    .compact(),
            )
            .try_init()?;
    }
    Ok(())
}

fn session(path: &Path, config: &AssistantConfig) -> Result<Session, AssistantError> {
    config.validate()?;
    let registry = ExtensionRegistry::with_defaults();
    Session::build(path, config, &registry)
}

async fn upgrade(
    path: &Path,
    config: &AssistantConfig,
    output: Arc<dyn UserOutput>,
    cancel: &CancellationToken,
) -> anyhow::Result<i32> {
    let session = session(path, config)?;

    let input: Box<dyn UserInput> = if config.non_interactive {
        Box::new(NonInteractiveInput::new(config.non_interactive_wait()))
    } else {
        Box::new(ConsoleInput::new(
            tokio::io::BufReader::new(tokio::io::stdin()),
            Arc::clone(&output),
        ))
    };
    let mut runner = UpgradeRunner::new(session.manager, input, Arc::clone(&output))
        .with_command_timeout(config.step_timeout());

    let outcome = tokio::select! {
        outcome = runner.run(cancel) => outcome?,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupted");
            cancel.cancel();
            return Err(AssistantError::Cancelled.into());
        }
    };

    Ok(match outcome {
        RunOutcome::Completed | RunOutcome::Exited => EXIT_OK,
        RunOutcome::Failed { step, details } => {
            output.write_line(&format!("Step {step} failed: {details}"));
            EXIT_STEP_FAILED
        }
    })
}

async fn analyze(
    path: &Path,
    config: &AssistantConfig,
    json: bool,
    output: &dyn UserOutput,
    cancel: &CancellationToken,
) -> anyhow::Result<i32> {
    let mut session = session(path, config)?;

    let analyses = tokio::select! {
        analyses = session.analyze_projects(cancel) => analyses.map_err(AssistantError::from)?,
        _ = tokio::signal::ctrl_c() => {
            cancel.cancel();
            return Err(AssistantError::Cancelled.into());
        }
    };

    if json {
        output.write_line(&serde_json::to_string_pretty(&analyses)?);
    } else {
        for analysis in &analyses {
            output.write_line(&format!("Project {}", analysis.project));
            for report in &analysis.steps {
                output.write_line(report.render_text().trim_end());
            }
        }
    }
    Ok(EXIT_OK)
}
