// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Step runner.
//!
//! The engine walks the steps of a playbook in declared order, deciding for
//! each one whether it runs, and if so, executing its substeps one unit of
//! work at a time. A __unit of work__ is either the installation of a single
//! app, or a single raw shell command.
//!
//! # Failure Isolation
//!
//! A failing unit of work never aborts the run. Its failure is recorded into
//! the audit log with its ordinal position, and the engine moves on to the
//! next unit. Only failure to write the audit log itself stops the engine.
//!
//! # Step Selection
//!
//! Rules apply in this order for every step:
//!
//! 1. Before the resume point is reached, every step is skipped.
//! 2. A stopper step ends the run.
//! 3. Steps of other templates are skipped, common steps never are.
//! 4. Disabled steps are skipped.
//! 5. Steps whose dependencies have not completed are skipped.
//!
//! # Provisioning
//!
//! [`Engine::provision`] wraps a run with its surroundings: the environment
//! gate before any step, and consumption of the resume checkpoint once the
//! run has reached the step the checkpoint points at.

use crate::{
    checkpoint::{CheckpointError, CheckpointStore},
    config::{Playbook, RunConfig},
    env::{EnvironmentStatus, Prober},
    log::{AuditLog, LogEntry, LogError},
    shell::{Bash, Shell},
    step::{Step, Substep},
};

use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::{
    collections::HashSet,
    fmt::{Display, Formatter, Result as FmtResult},
    time::Duration,
};
use tracing::{debug, info, instrument, warn};

/// Why a step did not run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Step lies before the resume point.
    BeforeResume,

    /// Step belongs to another template.
    Category,

    /// Step is disabled.
    Disabled,

    /// Dependency with this identifier has not completed.
    UnmetDependency(String),
}

/// How a run ended.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every step was visited.
    #[default]
    Completed,

    /// A stopper step was reached.
    Stopped,
}

/// Summary of a run.
///
/// Step positions are one-based, matching console and log ordinals.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// Positions of steps that ran.
    pub executed: Vec<usize>,

    /// Positions of steps that were skipped, with reason.
    pub skipped: Vec<(usize, SkipReason)>,

    /// Number of units of work handed to the shell.
    pub attempted: usize,

    /// Failures recorded into the audit log.
    pub failures: Vec<LogEntry>,

    /// How the run ended.
    pub outcome: RunOutcome,

    /// Position of step the run resumed at, if it resumed.
    pub resumed_at: Option<usize>,

    /// Plain titles of steps, substeps, and units shown on console.
    pub titles: Vec<String>,
}

impl RunReport {
    fn skip(&mut self, position: usize, reason: SkipReason) {
        debug!("skip step {position}: {reason:?}");
        self.skipped.push((position, reason));
    }
}

/// Playbook step runner.
#[derive(Debug)]
pub struct Engine<S = Bash>
where
    S: Shell,
{
    shell: S,
    console: Console,
}

impl<S: Shell> Engine<S> {
    /// Construct new engine executing through target shell.
    ///
    /// # Errors
    ///
    /// - Return [`EngineError::IndicatifStyleTemplate`] if spinner style is
    ///   invalid.
    pub fn new(shell: S) -> Result<Self> {
        Ok(Self {
            shell,
            console: Console::new()?,
        })
    }

    /// Run steps of playbook.
    ///
    /// Prints manual follow-ups once every step was visited.
    ///
    /// # Errors
    ///
    /// - Return [`EngineError::Log`] if a failure cannot be recorded into the
    ///   audit log.
    #[instrument(skip(self, playbook), level = "debug")]
    pub fn run(&self, playbook: &Playbook, config: &RunConfig) -> Result<RunReport> {
        let mut log = AuditLog::new(config.log_path.as_path());
        let mut report = RunReport::default();
        let mut completed: HashSet<&str> = HashSet::new();
        let mut resumed = config.resume_id.is_none();
        let total = playbook.steps.len();

        for (index, step) in playbook.steps.iter().enumerate() {
            let position = index + 1;

            // INVARIANT: Steps before the resume point completed before reboot.
            if !resumed {
                if step.id.is_some() && step.id == config.resume_id {
                    info!("resume at step {position} {:?}", step.title);
                    report.resumed_at = Some(position);
                    resumed = true;
                } else {
                    if let Some(id) = step.id.as_deref() {
                        completed.insert(id);
                    }
                    report.skip(position, SkipReason::BeforeResume);
                    continue;
                }
            }

            if step.is_stopper() {
                self.console.stopper(position, total);
                report.outcome = RunOutcome::Stopped;
                return Ok(report);
            }

            if !step.applies_to(config.template) {
                report.skip(position, SkipReason::Category);
                continue;
            }

            if !step.enabled {
                report.skip(position, SkipReason::Disabled);
                continue;
            }

            if let Some(missing) = step
                .depends_on
                .iter()
                .find(|id| !completed.contains(id.as_str()))
            {
                warn!(
                    "skip step {position} {:?}, dependency {missing:?} has not completed",
                    step.title
                );
                report.skip(position, SkipReason::UnmetDependency(missing.clone()));
                continue;
            }

            report.titles.push(self.console.step(position, total, step));
            let failures_before = report.failures.len();
            for (sub_index, substep) in step.substeps.iter().enumerate() {
                let unit = UnitContext {
                    step: position,
                    steps: total,
                    substep: sub_index + 1,
                    substeps: step.substeps.len(),
                };
                self.run_substep(substep, unit, config, &mut log, &mut report)?;
            }

            report.executed.push(position);
            if report.failures.len() == failures_before {
                if let Some(id) = step.id.as_deref() {
                    completed.insert(id);
                }
            }
        }

        if let Some(resume_id) = config.resume_id.as_deref().filter(|_| !resumed) {
            warn!("resume point {resume_id:?} not found, no step was run");
        }

        self.console.manual(&playbook.manual);
        Ok(report)
    }

    /// Run steps of playbook behind environment gate, consuming checkpoint.
    ///
    /// Unless checks are turned off, the environment is loaded first, and the
    /// run is refused if any precondition does not hold. A resumed run disarms
    /// the checkpoint it resumed from, but only after reaching its step.
    ///
    /// # Errors
    ///
    /// - Return [`EngineError::EnvironmentNotReady`] if a precondition does
    ///   not hold.
    /// - Return [`EngineError::Checkpoint`] if checkpoint cannot be inspected
    ///   or removed.
    /// - Return [`EngineError::Log`] if a failure cannot be recorded into the
    ///   audit log.
    #[instrument(skip(self, prober, checkpoint, playbook), level = "debug")]
    pub fn provision<P, C>(
        &self,
        prober: &Prober<P>,
        checkpoint: &C,
        playbook: &Playbook,
        config: &RunConfig,
    ) -> Result<RunReport>
    where
        P: Shell,
        C: CheckpointStore + ?Sized,
    {
        if config.check {
            let status = prober.load();
            info!("{status}");
            if !status.all_set() {
                return Err(EngineError::EnvironmentNotReady(status));
            }
        }

        let report = self.run(playbook, config)?;

        // INVARIANT: A resumed run consumes its checkpoint.
        let reached = config
            .resume_id
            .as_deref()
            .filter(|_| report.resumed_at.is_some());
        if let Some(resume_id) = reached {
            if checkpoint.is_armed()?.as_deref() == Some(resume_id) {
                checkpoint.disarm()?;
            }
        }

        Ok(report)
    }

    fn run_substep(
        &self,
        substep: &Substep,
        unit: UnitContext,
        config: &RunConfig,
        log: &mut AuditLog,
        report: &mut RunReport,
    ) -> Result<()> {
        if !substep.enabled {
            debug!("skip disabled substep {}.{}", unit.step, unit.substep);
            return Ok(());
        }

        if substep.is_noop() {
            debug!("skip empty substep {}.{}", unit.step, unit.substep);
            return Ok(());
        }

        report
            .titles
            .push(self.console.substep(unit.substep, unit.substeps, substep));

        // INVARIANT: Apps install before commands run.
        let apps = substep.apps.as_deref().unwrap_or_default();
        for (index, app) in apps.iter().enumerate() {
            let line = format!("{} / {} - [app] {app}", index + 1, apps.len());
            let command = format!("{} {app}", config.install_command_prefix);
            let ordinal = format!("{} / {}", index + 1, apps.len());
            self.run_unit(&line, &command, config, report, log, || {
                (ordinal, format!("[app] {app}"))
            })?;
        }

        let cmds = substep.cmd.as_deref().unwrap_or_default();
        for (index, cmd) in cmds.iter().enumerate() {
            let line = format!("{} / {} - [cmd] \"{}\"", index + 1, cmds.len(), abbreviate(cmd));
            let ordinal = format!(
                "{}.{}.{}/{}.{}.{}",
                unit.step,
                unit.substep,
                index + 1,
                unit.steps,
                unit.substeps,
                cmds.len()
            );
            self.run_unit(&line, cmd, config, report, log, || {
                (ordinal, format!("running {cmd}"))
            })?;
        }

        Ok(())
    }

    fn run_unit(
        &self,
        line: &str,
        command: &str,
        config: &RunConfig,
        report: &mut RunReport,
        log: &mut AuditLog,
        describe: impl FnOnce() -> (String, String),
    ) -> Result<()> {
        report.titles.push(line.to_string());
        if config.dry_run {
            self.console.dry(line);
            return Ok(());
        }

        let spinner = self.console.spinner(line);
        report.attempted += 1;
        let result = self.shell.run(command);
        self.console.settle(spinner, line, result.is_ok());

        if let Err(error) = result {
            let (ordinal, title) = describe();
            let entry = LogEntry::new(ordinal, title, error.to_string());
            log.record(&entry)?;
            report.failures.push(entry);
        }

        Ok(())
    }
}

/// Position of a substep within a run.
#[derive(Debug, Clone, Copy)]
struct UnitContext {
    step: usize,
    steps: usize,
    substep: usize,
    substeps: usize,
}

// INVARIANT: Keep at most 21 characters of command lines on console.
fn abbreviate(cmd: &str) -> String {
    match cmd.char_indices().nth(21) {
        Some((cut, _)) => format!("{}...", &cmd[..cut]),
        None => cmd.to_string(),
    }
}

/// Operator facing console output.
struct Console {
    style: ProgressStyle,
}

impl std::fmt::Debug for Console {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.debug_struct("Console").finish_non_exhaustive()
    }
}

impl Console {
    fn new() -> Result<Self> {
        let style = ProgressStyle::with_template("{spinner:.blue} {msg}")?
            .tick_chars("-\\|/ ");
        Ok(Self { style })
    }

    fn step(&self, position: usize, total: usize, step: &Step) -> String {
        let title = format!("{position} / {total} - {} - {}", step.category, step.title);
        let banner = format!("================ {title} =====================");
        println!("\n{}", banner.yellow().bold());
        title
    }

    fn substep(&self, position: usize, total: usize, substep: &Substep) -> String {
        let title = format!(
            "{position} / {total} - {}",
            substep.title.as_deref().unwrap_or("untitled substep")
        );
        println!("{}", title.yellow());
        title
    }

    fn dry(&self, line: &str) {
        println!("{} {}", line.blue(), "(dry run)".dimmed());
    }

    fn spinner(&self, line: &str) -> ProgressBar {
        let spinner = ProgressBar::new_spinner()
            .with_style(self.style.clone())
            .with_message(line.to_string());
        spinner.enable_steady_tick(Duration::from_millis(100));
        spinner
    }

    fn settle(&self, spinner: ProgressBar, line: &str, success: bool) {
        spinner.finish_and_clear();
        if success {
            println!("{} {}", line.blue(), "done".green());
        } else {
            println!("{} {}", line.blue(), "failed".red().bold());
        }
    }

    fn stopper(&self, position: usize, total: usize) {
        println!("\n{}", format!("{position} / {total} - reached stopper, halting run").red().bold());
    }

    fn manual(&self, manual: &[String]) {
        if manual.is_empty() {
            return;
        }

        println!("\n{}", "======== Manual Steps ===========".yellow().bold());
        for (index, step) in manual.iter().enumerate() {
            println!("{}) {step}", index + 1);
        }
    }
}

/// Step entry of a playbook listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListedStep<'a> {
    /// One-based position in playbook.
    pub position: usize,

    /// Number of steps in playbook.
    pub total: usize,

    /// Listed step.
    pub step: &'a Step,
}

impl Display for ListedStep<'_> {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        write!(
            fmt,
            "{} / {} - {} - {}",
            self.position, self.total, self.step.category, self.step.title
        )
    }
}

/// List steps of playbook in declared order.
///
/// Disabled steps are left out unless asked for.
pub fn list_steps(playbook: &Playbook, include_disabled: bool) -> Vec<ListedStep<'_>> {
    let total = playbook.steps.len();
    playbook
        .steps
        .iter()
        .enumerate()
        .filter(|(_, step)| include_disabled || step.enabled)
        .map(|(index, step)| ListedStep {
            position: index + 1,
            total,
            step,
        })
        .collect()
}

/// List every app of playbook in declared order.
pub fn list_apps(playbook: &Playbook) -> Vec<&str> {
    playbook.steps.iter().flat_map(Step::apps).collect()
}

/// Engine error types.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Failure could not be recorded.
    #[error(transparent)]
    Log(#[from] LogError),

    /// Spinner style template is invalid.
    #[error(transparent)]
    IndicatifStyleTemplate(#[from] indicatif::style::TemplateError),

    /// Environment precondition does not hold.
    #[error("environment is not ready ({0}), use 'check:false' to run anyway")]
    EnvironmentNotReady(EnvironmentStatus),

    /// Checkpoint could not be consumed.
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}

/// Friendly result alias :3
pub type Result<T, E = EngineError> = std::result::Result<T, E>;
