// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Resume checkpoints across reboots.
//!
//! Some steps only take effect after a reboot, e.g., kernel modules or a new
//! login shell. A __checkpoint__ stores the identifier of the step to resume
//! from, arranges for the runner to be invoked again on next login, and then
//! reboots the machine. The resumed run removes the checkpoint so it fires
//! exactly once.
//!
//! Checkpoints have no state besides the files on disk. If the startup unit
//! exists, the checkpoint is armed.

use crate::{
    path,
    shell::{quote, Bash, ExecutionError, Shell},
};

use std::{
    fs::{create_dir_all, read_to_string, remove_file, set_permissions, write, Permissions},
    io::ErrorKind,
    os::unix::fs::{symlink, PermissionsExt},
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument};

/// Name of startup unit that resumes a run.
pub const UNIT_NAME: &str = "provisor-resume.service";

/// Option prefix that carries the resume identifier.
pub const RESUME_OPTION: &str = "offsetID:";

/// Persistent resume point.
pub trait CheckpointStore {
    /// Arm checkpoint at target step identifier, then reboot.
    ///
    /// # Errors
    ///
    /// - Return [`CheckpointError`] if checkpoint artifacts cannot be written,
    ///   or reboot cannot be triggered.
    fn arm(&self, step_id: &str, resume_command: &str) -> Result<()>;

    /// Remove checkpoint. Removing a missing checkpoint is not an error.
    ///
    /// # Errors
    ///
    /// - Return [`CheckpointError::Io`] if checkpoint artifacts cannot be
    ///   removed.
    fn disarm(&self) -> Result<()>;

    /// Identifier of armed resume point, if any.
    ///
    /// # Errors
    ///
    /// - Return [`CheckpointError`] if checkpoint exists but cannot be read.
    fn is_armed(&self) -> Result<Option<String>>;
}

/// Reboot trigger.
pub trait Reboot {
    /// Reboot machine.
    ///
    /// # Errors
    ///
    /// - Return [`CheckpointError::Reboot`] if reboot cannot be triggered.
    fn reboot(&self) -> Result<()>;
}

impl<R: Reboot + ?Sized> Reboot for &R {
    fn reboot(&self) -> Result<()> {
        (**self).reboot()
    }
}

/// Reboot through shell.
#[derive(Debug, Default)]
pub struct ShellReboot<S = Bash>
where
    S: Shell,
{
    shell: S,
}

impl<S: Shell> ShellReboot<S> {
    pub fn new(shell: S) -> Self {
        Self { shell }
    }
}

impl<S: Shell> Reboot for ShellReboot<S> {
    fn reboot(&self) -> Result<()> {
        info!("reboot machine");
        self.shell.run("sudo reboot").map_err(CheckpointError::Reboot)?;
        Ok(())
    }
}

/// Checkpoint backed by a systemd user unit.
///
/// Arming writes three artifacts: a companion script that re-invokes the
/// runner with the resume identifier, a oneshot user unit that runs the
/// script, and a symlink that enables the unit for `default.target`.
#[derive(Debug)]
pub struct SystemdCheckpoint<R = ShellReboot>
where
    R: Reboot,
{
    unit_dir: PathBuf,
    script_path: PathBuf,
    reboot: R,
}

impl SystemdCheckpoint {
    /// Construct checkpoint at default XDG locations, rebooting through bash.
    ///
    /// # Errors
    ///
    /// - Return [`CheckpointError::NoWayHome`] if home directory cannot be
    ///   determined.
    pub fn try_default() -> Result<Self> {
        Ok(Self::new(
            path::user_unit_dir()?,
            path::resume_script_file()?,
            ShellReboot::default(),
        ))
    }
}

impl<R: Reboot> SystemdCheckpoint<R> {
    /// Construct new checkpoint with custom locations and reboot trigger.
    pub fn new(unit_dir: impl Into<PathBuf>, script_path: impl Into<PathBuf>, reboot: R) -> Self {
        Self {
            unit_dir: unit_dir.into(),
            script_path: script_path.into(),
            reboot,
        }
    }

    /// Path to startup unit file.
    pub fn unit_path(&self) -> PathBuf {
        self.unit_dir.join(UNIT_NAME)
    }

    /// Path to enablement symlink of startup unit.
    pub fn wants_path(&self) -> PathBuf {
        self.unit_dir.join("default.target.wants").join(UNIT_NAME)
    }

    fn unit_text(&self) -> String {
        format!(
            "[Unit]\n\
             Description=Resume provisioning run after reboot\n\
             After=network-online.target\n\n\
             [Service]\n\
             Type=oneshot\n\
             ExecStart=/usr/bin/env bash {}\n\n\
             [Install]\n\
             WantedBy=default.target\n",
            systemd_quote(self.script_path.to_string_lossy().as_ref())
        )
    }
}

impl<R: Reboot> CheckpointStore for SystemdCheckpoint<R> {
    #[instrument(skip(self), level = "debug")]
    fn arm(&self, step_id: &str, resume_command: &str) -> Result<()> {
        // INVARIANT: Identifier must survive a round trip through the script.
        if step_id.is_empty() || step_id.contains(|c: char| c.is_whitespace() || "'\"".contains(c)) {
            return Err(CheckpointError::InvalidId(step_id.into()));
        }

        info!("arm checkpoint at step {step_id:?}");
        write_file(
            &self.script_path,
            format!("#!/usr/bin/env bash\n{resume_command} {RESUME_OPTION}{step_id}\n"),
        )?;
        set_permissions(&self.script_path, Permissions::from_mode(0o755))
            .map_err(|source| CheckpointError::io(source, &self.script_path))?;

        let unit_path = self.unit_path();
        write_file(&unit_path, self.unit_text())?;

        let wants_path = self.wants_path();
        remove_if_present(&wants_path)?;
        if let Some(parent) = wants_path.parent() {
            create_dir_all(parent).map_err(|source| CheckpointError::io(source, parent))?;
        }
        symlink(&unit_path, &wants_path).map_err(|source| CheckpointError::io(source, &wants_path))?;
        debug!("enabled {:?}", wants_path.display());

        self.reboot.reboot()
    }

    #[instrument(skip(self), level = "debug")]
    fn disarm(&self) -> Result<()> {
        info!("disarm checkpoint");
        remove_if_present(&self.wants_path())?;
        remove_if_present(&self.unit_path())?;
        remove_if_present(&self.script_path)?;

        Ok(())
    }

    fn is_armed(&self) -> Result<Option<String>> {
        if !self.unit_path().exists() {
            return Ok(None);
        }

        let script = read_to_string(&self.script_path)
            .map_err(|source| CheckpointError::io(source, &self.script_path))?;
        let step_id = script
            .split_whitespace()
            .rev()
            .find_map(|word| word.strip_prefix(RESUME_OPTION))
            .filter(|id| !id.is_empty())
            .ok_or_else(|| CheckpointError::Malformed(self.script_path.clone()))?;

        Ok(Some(step_id.into()))
    }
}

/// Build command line that re-invokes runner binary at `exe`.
///
/// The resume option is appended by [`CheckpointStore::arm`], so the command
/// ends with the `run` option.
pub fn resume_command(exe: &Path, config: Option<&Path>) -> String {
    let mut command = quote(exe.to_string_lossy().as_ref());
    if let Some(config) = config {
        command.push_str(" --config ");
        command.push_str(quote(config.to_string_lossy().as_ref()).as_str());
    }
    command.push_str(" run");

    command
}

// INVARIANT: Unit file arguments are double quoted with specifiers and
// variables escaped.
fn systemd_quote(text: &str) -> String {
    let escaped = text
        .replace('\\', r"\\")
        .replace('"', r#"\""#)
        .replace('%', "%%")
        .replace('$', "$$");
    format!("\"{escaped}\"")
}

fn write_file(path: &Path, content: impl AsRef<[u8]>) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        create_dir_all(parent).map_err(|source| CheckpointError::io(source, parent))?;
    }
    write(path, content).map_err(|source| CheckpointError::io(source, path))?;
    debug!("wrote {:?}", path.display());

    Ok(())
}

fn remove_if_present(path: &Path) -> Result<()> {
    match remove_file(path) {
        Ok(()) => {
            debug!("removed {:?}", path.display());
            Ok(())
        }
        Err(error) if error.kind() == ErrorKind::NotFound => Ok(()),
        Err(source) => Err(CheckpointError::io(source, path)),
    }
}

/// Checkpoint error types.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    /// Checkpoint artifact cannot be read, written, or removed.
    #[error("checkpoint artifact {:?} is inaccessible", path.display())]
    Io {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Companion script carries no resume identifier.
    #[error("no resume identifier in checkpoint script {:?}", .0.display())]
    Malformed(PathBuf),

    /// Step identifier cannot be embedded into companion script.
    #[error("step id {0:?} cannot be used as resume point")]
    InvalidId(String),

    /// Reboot could not be triggered.
    #[error("failed to trigger reboot")]
    Reboot(#[source] ExecutionError),

    /// Checkpoint locations cannot be determined.
    #[error(transparent)]
    NoWayHome(#[from] path::NoWayHome),
}

impl CheckpointError {
    fn io(source: std::io::Error, path: &Path) -> Self {
        Self::Io {
            source,
            path: path.into(),
        }
    }
}

/// Friendly result alias :3
pub type Result<T, E = CheckpointError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shell::fake::ScriptedShell;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;
    use std::{cell::Cell, fs::symlink_metadata};

    #[derive(Debug, Default)]
    struct CountingReboot {
        count: Cell<usize>,
    }

    impl Reboot for CountingReboot {
        fn reboot(&self) -> Result<()> {
            self.count.set(self.count.get() + 1);
            Ok(())
        }
    }

    #[sealed_test]
    fn arm_writes_artifacts_then_reboots() -> anyhow::Result<()> {
        let reboot = CountingReboot::default();
        let checkpoint = SystemdCheckpoint::new("units", "provisor/resume.sh", &reboot);

        checkpoint.arm("after-reboot", "/usr/bin/provisor run")?;

        let script = read_to_string("provisor/resume.sh")?;
        assert_eq!(
            script,
            "#!/usr/bin/env bash\n/usr/bin/provisor run offsetID:after-reboot\n"
        );
        assert_eq!(
            symlink_metadata("provisor/resume.sh")?.permissions().mode() & 0o777,
            0o755
        );

        let unit = read_to_string("units/provisor-resume.service")?;
        assert!(unit.contains("Type=oneshot"));
        assert!(unit.contains("ExecStart=/usr/bin/env bash \"provisor/resume.sh\""));
        assert!(unit.contains("WantedBy=default.target"));
        assert!(symlink_metadata("units/default.target.wants/provisor-resume.service")?
            .file_type()
            .is_symlink());

        assert_eq!(reboot.count.get(), 1);
        assert_eq!(checkpoint.is_armed()?, Some("after-reboot".into()));

        Ok(())
    }

    #[sealed_test]
    fn arm_twice_replaces_previous_checkpoint() -> anyhow::Result<()> {
        let reboot = CountingReboot::default();
        let checkpoint = SystemdCheckpoint::new("units", "resume.sh", &reboot);

        checkpoint.arm("first", "provisor run")?;
        checkpoint.arm("second", "provisor run")?;

        assert_eq!(checkpoint.is_armed()?, Some("second".into()));
        assert_eq!(reboot.count.get(), 2);

        Ok(())
    }

    #[sealed_test]
    fn arm_rejects_unembeddable_id() {
        let reboot = CountingReboot::default();
        let checkpoint = SystemdCheckpoint::new("units", "resume.sh", &reboot);

        let result = checkpoint.arm("two words", "provisor run");
        assert!(matches!(result, Err(CheckpointError::InvalidId(id)) if id == "two words"));
        assert_eq!(reboot.count.get(), 0);
        assert!(!Path::new("resume.sh").exists());
    }

    #[sealed_test]
    fn disarm_removes_artifacts() -> anyhow::Result<()> {
        let reboot = CountingReboot::default();
        let checkpoint = SystemdCheckpoint::new("units", "resume.sh", &reboot);
        checkpoint.arm("after-reboot", "provisor run")?;

        checkpoint.disarm()?;

        assert_eq!(checkpoint.is_armed()?, None);
        assert!(symlink_metadata(checkpoint.wants_path()).is_err());
        assert!(!checkpoint.unit_path().exists());
        assert!(!Path::new("resume.sh").exists());

        Ok(())
    }

    #[sealed_test]
    fn disarm_without_checkpoint_is_fine() -> anyhow::Result<()> {
        let reboot = CountingReboot::default();
        let checkpoint = SystemdCheckpoint::new("units", "resume.sh", &reboot);
        checkpoint.disarm()?;
        assert_eq!(checkpoint.is_armed()?, None);

        Ok(())
    }

    #[sealed_test]
    fn is_armed_rejects_script_without_id() -> anyhow::Result<()> {
        let reboot = CountingReboot::default();
        let checkpoint = SystemdCheckpoint::new("units", "resume.sh", &reboot);
        write_file(&checkpoint.unit_path(), "[Unit]\n")?;
        write_file(Path::new("resume.sh"), "#!/usr/bin/env bash\nprovisor run\n")?;

        assert!(matches!(checkpoint.is_armed(), Err(CheckpointError::Malformed(_))));

        Ok(())
    }

    #[sealed_test]
    fn arm_quotes_script_path_with_spaces() -> anyhow::Result<()> {
        let reboot = CountingReboot::default();
        let checkpoint = SystemdCheckpoint::new("units", "my scripts/100% $resume.sh", &reboot);
        checkpoint.arm("after-reboot", "provisor run")?;

        let unit = read_to_string(checkpoint.unit_path())?;
        assert!(unit.contains(r#"ExecStart=/usr/bin/env bash "my scripts/100%% $$resume.sh""#));
        assert_eq!(checkpoint.is_armed()?, Some("after-reboot".into()));

        Ok(())
    }

    #[test]
    fn resume_command_quotes_paths_for_bash() {
        let result = resume_command(Path::new("/opt/my tools/provisor"), None);
        assert_eq!(result, "'/opt/my tools/provisor' run");

        let result = resume_command(
            Path::new("/usr/bin/provisor"),
            Some(Path::new("/home/me/it's playbook.toml")),
        );
        assert_eq!(
            result,
            r"'/usr/bin/provisor' --config '/home/me/it'\''s playbook.toml' run"
        );
    }

    #[test]
    fn resume_command_survives_bash() -> anyhow::Result<()> {
        let command = resume_command(Path::new("echo"), Some(Path::new("a $b 'c'")));
        let output = Bash::default().run(command.as_str())?;
        assert_eq!(output.stdout, "--config a $b 'c' run\n");

        Ok(())
    }

    #[test]
    fn shell_reboot_runs_sudo_reboot() -> anyhow::Result<()> {
        let shell = ScriptedShell::default();
        ShellReboot::new(&shell).reboot()?;
        assert_eq!(shell.calls(), vec!["sudo reboot".to_string()]);

        Ok(())
    }
}
