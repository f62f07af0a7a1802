// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use provisor::{
    args::{self, Action, Args, ParseError},
    checkpoint::{self, CheckpointStore, SystemdCheckpoint},
    config::{Playbook, RunConfig},
    engine::{list_apps, list_steps, Engine, RunOutcome},
    env::Prober,
    path::{default_log_file, default_playbook_file},
    shell::Bash,
};

use anyhow::{bail, Context, Result};
use clap::Parser;
use colored::Colorize;
use std::{
    fs::read_to_string,
    path::{absolute, PathBuf},
    process::exit,
};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    disable_help_flag = true,
    override_usage = "provisor [--config <path>] [options]...",
    version
)]
struct Cli {
    /// Path to playbook file.
    #[arg(long, value_name = "path")]
    pub config: Option<PathBuf>,

    /// Runner options, e.g., `run`, `-d`, `offsetID:<id>`, or `help`.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "options")]
    pub options: Vec<String>,
}

fn main() {
    let cli = Cli::parse();
    let parsed = args::parse(&cli.options);

    let level = match parsed.as_ref().map_or(0, |args| args.verbose) {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .with_timer(false)
        .without_time();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    if let Err(error) = run(cli, parsed) {
        error!("{error:?}");
        exit(1);
    }

    exit(0)
}

fn run(cli: Cli, parsed: std::result::Result<Args, ParseError>) -> Result<()> {
    let args = parsed?;
    for option in args.dangling() {
        warn!("option {option:?} has no effect without its parent option");
    }

    let actions = args.actions();
    if actions.is_empty() {
        print!("{}", args::usage());
        return Ok(());
    }

    let mut session = Session::new(cli.config);
    for action in actions {
        match &action {
            Action::Help => print!("{}", args::usage()),
            Action::List { include_disabled } => run_list(session.playbook()?, *include_disabled),
            Action::ListApps => println!("{}", list_apps(session.playbook()?).join(" ")),
            Action::Disarm => SystemdCheckpoint::try_default()?.disarm()?,
            Action::Run { .. } => {
                if run_playbook(&mut session, &action)? == RunOutcome::Stopped {
                    return Ok(());
                }
            }
            Action::Arm { step_id } => run_arm(&mut session, step_id)?,
        }
    }

    Ok(())
}

/// Lazily loaded playbook of an invocation.
struct Session {
    config: Option<PathBuf>,
    playbook: Option<Playbook>,
}

impl Session {
    fn new(config: Option<PathBuf>) -> Self {
        Self {
            config,
            playbook: None,
        }
    }

    fn playbook_path(&self) -> Result<PathBuf> {
        match &self.config {
            Some(path) => Ok(path.clone()),
            None => Ok(default_playbook_file()?),
        }
    }

    fn playbook(&mut self) -> Result<&Playbook> {
        let playbook = match self.playbook.take() {
            Some(playbook) => playbook,
            None => load_playbook(self.playbook_path()?)?,
        };

        Ok(self.playbook.insert(playbook))
    }
}

fn load_playbook(path: PathBuf) -> Result<Playbook> {
    let data = read_to_string(&path)
        .with_context(|| format!("failed to read playbook at {:?}", path.display()))?;
    let playbook: Playbook = data
        .parse()
        .with_context(|| format!("failed to parse playbook at {:?}", path.display()))?;

    for warning in playbook
        .validate()
        .with_context(|| format!("invalid playbook at {:?}", path.display()))?
    {
        warn!("{warning}");
    }

    Ok(playbook)
}

fn run_list(playbook: &Playbook, include_disabled: bool) {
    for listed in list_steps(playbook, include_disabled) {
        if listed.step.enabled {
            println!("{listed}");
        } else {
            println!("{}", listed.to_string().red());
        }
    }
}

fn run_playbook(session: &mut Session, action: &Action) -> Result<RunOutcome> {
    let playbook = session.playbook()?;
    let settings = &playbook.settings;
    let config = RunConfig::new(settings, default_log_file()?, action);

    let prober = Prober::new(Bash::new(&settings.benign_markers), settings.drive.clone());
    let checkpoint = SystemdCheckpoint::try_default()?;
    let engine = Engine::new(Bash::new(&settings.benign_markers))?;
    let report = engine.provision(&prober, &checkpoint, playbook, &config)?;
    info!(
        "ran {} steps, skipped {}, {} of {} units failed",
        report.executed.len(),
        report.skipped.len(),
        report.failures.len(),
        report.attempted
    );
    if !report.failures.is_empty() {
        warn!("see audit log at {:?} for failures", config.log_path.display());
    }

    Ok(report.outcome)
}

fn run_arm(session: &mut Session, step_id: &str) -> Result<()> {
    if !session.playbook()?.steps.iter().any(|step| step.has_id(step_id)) {
        bail!("no step with id {step_id:?} to resume from");
    }

    let exe = std::env::current_exe().context("cannot locate provisor executable")?;
    let config = match &session.config {
        Some(config) => Some(absolute(config).context("cannot resolve playbook path")?),
        None => None,
    };
    let resume_command = checkpoint::resume_command(&exe, config.as_deref());

    SystemdCheckpoint::try_default()?.arm(step_id, resume_command.as_str())?;

    Ok(())
}
