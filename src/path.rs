// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path resolution utilities.
//!
//! Determine relevent path information for external files that need to be
//! interacted with, or managed in some way.

use std::path::PathBuf;

/// Determine default absolute path to playbook file.
///
/// Uses XDG Base Directory path `$XDG_CONFIG_HOME/provisor/provisor.toml`.
/// Does not check if the path returned actually exists.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
///
/// # See Also
///
/// - [XDG Base Directory](https://wiki.archlinux.org/title/XDG_Base_Directory)
pub fn default_playbook_file() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|path| path.join("provisor").join("provisor.toml"))
        .ok_or(NoWayHome)
}

/// Determine default absolute path to audit log file.
///
/// Prefers `$XDG_STATE_HOME/provisor/provisor.log`, falling back to the data
/// directory on platforms without a state directory.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
pub fn default_log_file() -> Result<PathBuf> {
    dirs::state_dir()
        .or_else(dirs::data_dir)
        .map(|path| path.join("provisor").join("provisor.log"))
        .ok_or(NoWayHome)
}

/// Determine absolute path to systemd user unit directory.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
pub fn user_unit_dir() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|path| path.join("systemd").join("user"))
        .ok_or(NoWayHome)
}

/// Determine absolute path to companion script of resume checkpoint.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
pub fn resume_script_file() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|path| path.join("provisor").join("resume.sh"))
        .ok_or(NoWayHome)
}

/// No way to determine user's home directory.
#[derive(Clone, Debug, thiserror::Error)]
#[error("cannot determine absolute path to user's home directory")]
pub struct NoWayHome;

/// Friendly result alias :3
pub type Result<T, E = NoWayHome> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;

    #[sealed_test(env = [("HOME", "/home/tester"), ("XDG_CONFIG_HOME", "/home/tester/.config")])]
    fn config_rooted_paths() -> anyhow::Result<()> {
        assert_eq!(
            default_playbook_file()?,
            PathBuf::from("/home/tester/.config/provisor/provisor.toml")
        );
        assert_eq!(
            user_unit_dir()?,
            PathBuf::from("/home/tester/.config/systemd/user")
        );
        assert_eq!(
            resume_script_file()?,
            PathBuf::from("/home/tester/.config/provisor/resume.sh")
        );

        Ok(())
    }
}
