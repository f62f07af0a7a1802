// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Append-only audit log.
//!
//! Failed units of work are recorded into a flat text file so the operator can
//! inspect and fix them by hand once a run is over. The log is never read back.
//! Each process marks the start of its session with a banner right before its
//! first entry, so runs that record nothing leave the file untouched.

use chrono::{DateTime, SecondsFormat, Utc};
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    fs::{create_dir_all, OpenOptions},
    io::Write,
    path::PathBuf,
};
use tracing::debug;

/// Single audit log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Time the entry was recorded.
    pub timestamp: DateTime<Utc>,

    /// Ordinal position of failed unit, e.g., "3.2.1/10.4.5".
    pub ordinal: String,

    /// Human readable title of failed unit.
    pub title: String,

    /// Captured error text.
    pub message: String,
}

impl LogEntry {
    /// Construct new log entry stamped with current time.
    pub fn new(
        ordinal: impl Into<String>,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            ordinal: ordinal.into(),
            title: title.into(),
            message: message.into(),
        }
    }
}

impl Display for LogEntry {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        write!(
            fmt,
            "\n------------------->> {} - {}\n{}\n{}\n<<----------------------\n",
            iso8601(&self.timestamp),
            self.ordinal,
            self.title,
            self.message
        )
    }
}

/// Append-only audit log file.
#[derive(Debug)]
pub struct AuditLog {
    path: PathBuf,
    session_marked: bool,
}

impl AuditLog {
    /// Construct new audit log writing to target path.
    ///
    /// Nothing is created until the first entry gets recorded.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            session_marked: false,
        }
    }

    /// Append entry to log file.
    ///
    /// Marks the beginning of the session first if this is the first entry
    /// recorded by this log.
    ///
    /// # Errors
    ///
    /// - Return [`LogError`] if log file cannot be created or written to.
    pub fn record(&mut self, entry: &LogEntry) -> Result<()> {
        if !self.session_marked {
            self.append(session_banner(&entry.timestamp))?;
            self.session_marked = true;
        }

        debug!("record log entry {:?} into {:?}", entry.ordinal, self.path.display());
        self.append(entry.to_string())
    }

    fn append(&self, content: impl AsRef<str>) -> Result<()> {
        let to_log_error = |source| LogError {
            source,
            log_path: self.path.clone(),
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            create_dir_all(parent).map_err(to_log_error)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(to_log_error)?;
        file.write_all(content.as_ref().as_bytes())
            .map_err(to_log_error)?;

        Ok(())
    }
}

fn session_banner(timestamp: &DateTime<Utc>) -> String {
    format!(
        "\n{rule}\n------------------->> {} - installation start <<----------------------\n{rule}\n",
        iso8601(timestamp),
        rule = "-".repeat(95),
    )
}

fn iso8601(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Audit log file cannot be written.
#[derive(Debug, thiserror::Error)]
#[error("failed to write audit log at {:?}", log_path.display())]
pub struct LogError {
    #[source]
    source: std::io::Error,
    log_path: PathBuf,
}

/// Friendly result alias :3
pub type Result<T, E = LogError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;
    use std::{fs::read_to_string, path::Path};

    fn fixed_entry(ordinal: &str, title: &str, message: &str) -> LogEntry {
        LogEntry {
            timestamp: Utc.with_ymd_and_hms(2025, 3, 14, 9, 26, 53).unwrap(),
            ordinal: ordinal.into(),
            title: title.into(),
            message: message.into(),
        }
    }

    #[test]
    fn log_entry_layout() {
        let result = fixed_entry("1 / 3", "[app] badpkg", "E: Unable to locate package badpkg")
            .to_string();
        let expect = indoc! {"

            ------------------->> 2025-03-14T09:26:53.000Z - 1 / 3
            [app] badpkg
            E: Unable to locate package badpkg
            <<----------------------
        "};
        assert_eq!(result, expect);
    }

    #[sealed_test]
    fn record_marks_session_once() -> anyhow::Result<()> {
        let mut log = AuditLog::new("logs/provisor.log");
        log.record(&fixed_entry("1 / 2", "[app] a", "boom"))?;
        log.record(&fixed_entry("2 / 2", "[app] b", "bang"))?;

        let content = read_to_string("logs/provisor.log")?;
        assert_eq!(content.matches("installation start").count(), 1);
        assert_eq!(content.matches("<<----------------------\n").count(), 2);
        assert!(content.find("boom") < content.find("bang"));

        Ok(())
    }

    #[sealed_test]
    fn record_appends_across_sessions() -> anyhow::Result<()> {
        AuditLog::new("provisor.log").record(&fixed_entry("1 / 1", "[app] a", "boom"))?;
        AuditLog::new("provisor.log").record(&fixed_entry("1 / 1", "[app] a", "boom"))?;

        let content = read_to_string("provisor.log")?;
        assert_eq!(content.matches("installation start").count(), 2);

        Ok(())
    }

    #[sealed_test]
    fn no_entries_no_file() {
        let log = AuditLog::new("provisor.log");
        drop(log);
        assert!(!Path::new("provisor.log").exists());
    }
}
