// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! Specify the layout of the __playbook__ file that Provisor runs, and the
//! immutable run configuration resolved from it. File I/O is left to the
//! caller to figure out.

use crate::{
    args::Action,
    shell::DEFAULT_BENIGN_MARKERS,
    step::{Category, Step},
};

use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
    str::FromStr,
};

/// Playbook layout.
///
/// A __playbook__ describes how to take a fresh installation of some machine
/// to its finished state. It is composed of three parts: settings, steps, and
/// manual follow-ups. Settings decide how steps are executed. Steps are run in
/// declared order. Manual follow-ups are instructions that cannot be
/// automated, and are only ever printed for the operator once a run is over.
///
/// # General Layout
///
/// ```toml
/// manual = ["re-login for the default shell to be set"]
///
/// [settings]
/// template = "desktop"
/// install_command_prefix = "sudo apt-get install -y"
/// log = "$HOME/postInstallation.log"
///
/// [[step]]
/// title = "package managers"
/// category = "common"
///
/// [[step.substep]]
/// apps = ["nala"]
/// ```
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct Playbook {
    /// Static instructions for the operator to perform by hand.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub manual: Vec<String>,

    /// Settings of the playbook.
    #[serde(default)]
    pub settings: Settings,

    /// Ordered listing of steps.
    #[serde(default, rename = "step")]
    pub steps: Vec<Step>,
}

impl Playbook {
    /// Validate structure of steps.
    ///
    /// Returns a listing of warnings that do not prevent a run.
    ///
    /// # Errors
    ///
    /// - Return [`ValidationError::DuplicateId`] if two steps share an id.
    /// - Return [`ValidationError::UnknownDependency`] if a step depends on an
    ///   id that no step carries.
    /// - Return [`ValidationError::ForwardDependency`] if a step depends on
    ///   itself or on a step declared after it.
    pub fn validate(&self) -> Result<Vec<String>, ValidationError> {
        let mut positions = HashMap::new();
        for (index, step) in self.steps.iter().enumerate() {
            if let Some(id) = &step.id {
                if positions.insert(id.as_str(), index).is_some() {
                    return Err(ValidationError::DuplicateId(id.clone()));
                }
            }
        }

        let mut warnings = Vec::new();
        for (index, step) in self.steps.iter().enumerate() {
            for dependency in &step.depends_on {
                match positions.get(dependency.as_str()) {
                    None => {
                        return Err(ValidationError::UnknownDependency {
                            step: step.title.clone(),
                            dependency: dependency.clone(),
                        })
                    }
                    Some(position) if *position >= index => {
                        return Err(ValidationError::ForwardDependency {
                            step: step.title.clone(),
                            dependency: dependency.clone(),
                        })
                    }
                    Some(_) => {}
                }
            }

            for (sub_index, substep) in step.substeps.iter().enumerate() {
                if substep.is_ambiguous() {
                    warnings.push(format!(
                        "step {} ({:?}) substep {} declares both apps and cmd, apps run first",
                        index + 1,
                        step.title,
                        sub_index + 1
                    ));
                }
            }
        }

        Ok(warnings)
    }
}

impl FromStr for Playbook {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut playbook: Playbook = toml::de::from_str(data).map_err(ConfigError::Deserialize)?;

        // INVARIANT: Perform shell expansion on path fields.
        if let Some(log) = playbook.settings.log.take() {
            playbook.settings.log = Some(expand_path(&log)?);
        }
        if let Some(drive) = playbook.settings.drive.as_mut() {
            drive.mount_path = expand_path(&drive.mount_path)?;
        }

        Ok(playbook)
    }
}

impl Display for Playbook {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

fn expand_path(path: &Path) -> Result<PathBuf> {
    Ok(PathBuf::from(
        shellexpand::full(path.to_string_lossy().as_ref())
            .map_err(ConfigError::ShellExpansion)?
            .into_owned(),
    ))
}

/// Playbook settings.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct Settings {
    /// Machine template to provision, i.e., which non-common steps apply.
    #[serde(default)]
    pub template: Category,

    /// Command prefix to install a single app with.
    #[serde(default = "default_install_command_prefix")]
    pub install_command_prefix: String,

    /// Path to audit log file. Uses XDG state directory if absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log: Option<PathBuf>,

    /// Walk steps without executing anything.
    #[serde(default)]
    pub dry_run: bool,

    /// Stderr markers that do not count as command failure.
    #[serde(default = "default_benign_markers")]
    pub benign_markers: Vec<String>,

    /// External backup drive that must be attached and mounted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drive: Option<Drive>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            template: Category::default(),
            install_command_prefix: default_install_command_prefix(),
            log: None,
            dry_run: false,
            benign_markers: default_benign_markers(),
            drive: None,
        }
    }
}

fn default_install_command_prefix() -> String {
    "sudo apt-get install -y".into()
}

fn default_benign_markers() -> Vec<String> {
    DEFAULT_BENIGN_MARKERS.iter().map(ToString::to_string).collect()
}

/// External drive precondition.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct Drive {
    /// Serial number reported by `lsblk`.
    pub serial: String,

    /// Path the drive's first partition must be mounted at.
    pub mount_path: PathBuf,
}

/// Resolved execution parameters of a run.
///
/// Built once from playbook settings and command-line overrides, and never
/// mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    /// Walk steps without executing anything.
    pub dry_run: bool,

    /// Command prefix to install a single app with.
    pub install_command_prefix: String,

    /// Machine template to provision.
    pub template: Category,

    /// Path to audit log file.
    pub log_path: PathBuf,

    /// Skip every step until the one carrying this identifier.
    pub resume_id: Option<String>,

    /// Abort run if environment preconditions are not met.
    pub check: bool,
}

impl RunConfig {
    /// Resolve run configuration from playbook settings and run action.
    ///
    /// Command-line dry run wins over playbook dry run. Any other action than
    /// [`Action::Run`] leaves settings as they are.
    pub fn new(settings: &Settings, log_path: impl Into<PathBuf>, action: &Action) -> Self {
        let (dry_run, check, resume_id) = match action {
            Action::Run {
                dry_run,
                check,
                resume_id,
            } => (settings.dry_run || *dry_run, *check, resume_id.clone()),
            _ => (settings.dry_run, true, None),
        };

        Self {
            dry_run,
            install_command_prefix: settings.install_command_prefix.clone(),
            template: settings.template,
            log_path: settings.log.clone().unwrap_or_else(|| log_path.into()),
            resume_id,
            check,
        }
    }
}

/// Playbook structure is invalid.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Two steps share the same identifier.
    #[error("duplicate step id {0:?}")]
    DuplicateId(String),

    /// Step depends on identifier that no step carries.
    #[error("step {step:?} depends on unknown id {dependency:?}")]
    UnknownDependency { step: String, dependency: String },

    /// Step depends on itself or a later step.
    #[error("step {step:?} depends on {dependency:?} which does not run before it")]
    ForwardDependency { step: String, dependency: String },
}

/// Configuration error types.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to deserialize configuration.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to serialize configuration.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Failed to perform shell expansion on configuration.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;
