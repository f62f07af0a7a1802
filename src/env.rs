// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Environment preconditions.
//!
//! Before any step runs, the machine must be ready: the external backup drive
//! must be attached and mounted at its expected path, and the internet must
//! be reachable. Every precondition is probed through its own shell command,
//! so one failing probe never hides the result of another.

use crate::{
    config::Drive,
    shell::{quote, Bash, Shell},
};

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    path::Path,
};
use tracing::{debug, info, instrument, warn};

/// Snapshot of environment preconditions.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EnvironmentStatus {
    pub drive_attached: bool,
    pub drive_mounted: bool,
    pub internet_available: bool,
}

impl EnvironmentStatus {
    /// Check if every precondition holds.
    pub fn all_set(&self) -> bool {
        self.drive_attached && self.drive_mounted && self.internet_available
    }
}

impl Display for EnvironmentStatus {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        let yes_no = |flag: bool| if flag { "yes" } else { "no" };
        write!(
            fmt,
            "drive attached: {}, drive mounted: {}, internet available: {}",
            yes_no(self.drive_attached),
            yes_no(self.drive_mounted),
            yes_no(self.internet_available)
        )
    }
}

/// Probe environment preconditions through a shell.
#[derive(Debug)]
pub struct Prober<S = Bash>
where
    S: Shell,
{
    shell: S,
    drive: Option<Drive>,
}

impl<S: Shell> Prober<S> {
    /// Construct new prober.
    ///
    /// Without a drive, drive probes are never run and count as satisfied.
    pub fn new(shell: S, drive: Option<Drive>) -> Self {
        Self { shell, drive }
    }

    /// Probe every precondition once.
    #[instrument(skip(self), level = "debug")]
    pub fn check(&self) -> EnvironmentStatus {
        let (drive_attached, drive_mounted) = match &self.drive {
            Some(drive) => (self.is_attached(drive), self.is_mounted(drive)),
            None => (true, true),
        };

        let status = EnvironmentStatus {
            drive_attached,
            drive_mounted,
            internet_available: self.probe(network_probe().as_str()),
        };
        debug!("{status}");

        status
    }

    /// Probe every precondition, trying to mount an attached drive once.
    ///
    /// Only an attached but unmounted drive gets a corrective mount attempt,
    /// after which the drive is probed again. The network is probed once.
    #[instrument(skip(self), level = "debug")]
    pub fn load(&self) -> EnvironmentStatus {
        let mut status = self.check();
        let drive = match &self.drive {
            Some(drive) if status.drive_attached && !status.drive_mounted => drive,
            _ => return status,
        };

        info!("mount drive {:?} at {:?}", drive.serial, drive.mount_path.display());
        if let Err(error) = self.shell.run(mount_command(drive).as_str()) {
            warn!("failed to mount drive {:?}: {error}", drive.serial);
        }

        status.drive_attached = self.is_attached(drive);
        status.drive_mounted = self.is_mounted(drive);
        debug!("{status}");

        status
    }

    fn is_attached(&self, drive: &Drive) -> bool {
        match self.shell.run(attached_probe(drive).as_str()) {
            Ok(output) => output.stdout.lines().any(|line| line.trim() == drive.serial),
            Err(error) => {
                debug!("attached probe failed: {error}");
                false
            }
        }
    }

    fn is_mounted(&self, drive: &Drive) -> bool {
        self.probe(mounted_probe(drive).as_str())
    }

    fn probe(&self, command: &str) -> bool {
        match self.shell.run(command) {
            Ok(_) => true,
            Err(error) => {
                debug!("probe failed: {error}");
                false
            }
        }
    }
}

fn attached_probe(drive: &Drive) -> String {
    format!(
        "lsblk -o name,serial | grep -F {} | awk '{{print $2}}'",
        quote(drive.serial.as_str())
    )
}

fn mounted_probe(drive: &Drive) -> String {
    format!(
        "DRIVE_NAME=$(lsblk -o name,serial | grep -F {serial} | awk '{{print $1}}'); \
         if [[ -z $DRIVE_NAME ]] || ! mount | grep -F \"$DRIVE_NAME\" | grep -qF {path}; then \
         echo 'drive not mounted' >&2; fi",
        serial = quote(drive.serial.as_str()),
        path = quote_path(&drive.mount_path),
    )
}

fn mount_command(drive: &Drive) -> String {
    format!(
        "DRIVE_NAME=$(lsblk -o name,serial | grep -F {serial} | awk '{{print $1}}'); \
         sudo mkdir -p {path} && sudo mount \"/dev/${{DRIVE_NAME}}1\" {path}",
        serial = quote(drive.serial.as_str()),
        path = quote_path(&drive.mount_path),
    )
}

fn network_probe() -> String {
    "ping -c 1 1.1.1.1 > /dev/null 2>&1 || echo 'network unreachable' >&2".into()
}

fn quote_path(path: &Path) -> String {
    quote(path.to_string_lossy().as_ref())
}
