//! Platform log filtering through the external `filter_logs.sh` script.
//!
//! [`LogFilter`] turns typed criteria into the script's argument vector;
//! [`run_filter`] executes it with a hard timeout and returns its combined
//! output.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::{AppError, Result};

/// Hard limit for one filter run.
pub const FILTER_TIMEOUT: Duration = Duration::from_secs(30);

/// Minimum-severity selection. At most one applies per run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LevelSelector {
    /// `-e`: errors only.
    ErrorsOnly,
    /// `-w`: warnings and errors.
    WarningsOnly,
    /// `-x`: everything except DEBUG.
    ExcludeDebug,
    /// `-l LEVEL`: at or above `LEVEL`.
    AtLeast(String),
}

/// Criteria for one filter run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogFilter {
    /// Severity selection.
    pub level: Option<LevelSelector>,
    /// `-c`: log category (`NETWORKING`, `DISCOVERY`, ...).
    pub category: Option<String>,
    /// `-p`: peer name or IP address.
    pub peer: Option<String>,
    /// `-t`: test-related lines only.
    pub test_only: bool,
    /// `-T`: timestamp prefix such as `16:44:2`.
    pub time_pattern: Option<String>,
    /// `-C`: context lines around matches.
    pub context_lines: Option<usize>,
    /// `-n`: first N lines, or last N when negative.
    pub num_lines: Option<i64>,
    /// `-s`: summary report; all other criteria are ignored.
    pub summary: bool,
}

impl LogFilter {
    /// Summary statistics for a log.
    #[must_use]
    pub fn summary() -> Self {
        Self {
            summary: true,
            ..Self::default()
        }
    }

    /// Error lines with `context` lines around each.
    #[must_use]
    pub fn errors(context: usize) -> Self {
        Self {
            level: Some(LevelSelector::ErrorsOnly),
            context_lines: Some(context),
            ..Self::default()
        }
    }

    /// Script arguments for filtering `file`.
    #[must_use]
    pub fn to_args(&self, file: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = Vec::new();
        if self.summary {
            args.push("-s".into());
            args.push(file.into());
            return args;
        }

        match &self.level {
            Some(LevelSelector::ErrorsOnly) => args.push("-e".into()),
            Some(LevelSelector::WarningsOnly) => args.push("-w".into()),
            Some(LevelSelector::ExcludeDebug) => args.push("-x".into()),
            Some(LevelSelector::AtLeast(level)) => {
                args.push("-l".into());
                args.push(level.into());
            }
            None => {}
        }
        if let Some(category) = &self.category {
            args.push("-c".into());
            args.push(category.into());
        }
        if let Some(peer) = &self.peer {
            args.push("-p".into());
            args.push(peer.into());
        }
        if self.test_only {
            args.push("-t".into());
        }
        if let Some(pattern) = &self.time_pattern {
            args.push("-T".into());
            args.push(pattern.into());
        }
        if let Some(context) = self.context_lines.filter(|c| *c > 0) {
            args.push("-C".into());
            args.push(context.to_string().into());
        }
        if let Some(n) = self.num_lines.filter(|n| *n != 0) {
            args.push("-n".into());
            args.push(n.to_string().into());
        }
        args.push(file.into());
        args
    }
}

/// An existing platform log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFileInfo {
    /// Platform name from the configuration.
    pub platform: String,
    /// Log file path.
    pub path: PathBuf,
    /// Last modification time.
    pub modified: DateTime<Utc>,
}

/// Configured logs that exist on disk, most recently modified first.
#[must_use]
pub fn available_logs(logs: &BTreeMap<String, PathBuf>) -> Vec<LogFileInfo> {
    let mut found: Vec<LogFileInfo> = logs
        .iter()
        .filter_map(|(platform, path)| {
            let modified = std::fs::metadata(path).and_then(|m| m.modified()).ok()?;
            Some(LogFileInfo {
                platform: platform.clone(),
                path: path.clone(),
                modified: DateTime::<Utc>::from(modified),
            })
        })
        .collect();
    found.sort_by(|a, b| b.modified.cmp(&a.modified));
    found
}

/// Pick the log for `platform`, or the most recently modified one.
///
/// A named platform whose log is missing falls back to auto-detection.
#[must_use]
pub fn find_log_file(logs: &BTreeMap<String, PathBuf>, platform: Option<&str>) -> Option<PathBuf> {
    if let Some(platform) = platform {
        let wanted = platform.to_lowercase();
        if let Some(path) = logs.get(&wanted).filter(|p| p.exists()) {
            return Some(path.clone());
        }
        debug!(platform, "platform log missing, auto-detecting");
    }
    available_logs(logs).into_iter().next().map(|info| info.path)
}

/// Run `script` with `args` and return stdout, followed by stderr under an
/// `Errors:` heading when present.
///
/// # Errors
///
/// `AppError::Search` when the script is missing, cannot be started, or
/// runs longer than [`FILTER_TIMEOUT`]. A timed-out script is killed.
pub async fn run_filter(script: &Path, args: &[OsString]) -> Result<String> {
    run_filter_with_timeout(script, args, FILTER_TIMEOUT).await
}

/// [`run_filter`] with an explicit time limit.
///
/// # Errors
///
/// See [`run_filter`].
pub async fn run_filter_with_timeout(
    script: &Path,
    args: &[OsString],
    limit: Duration,
) -> Result<String> {
    if !script.exists() {
        return Err(AppError::Search(format!(
            "filter script not found at {}",
            script.display()
        )));
    }

    let child = Command::new(script)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|err| AppError::Search(format!("error running filter: {err}")))?;

    info!(script = %script.display(), "running log filter");
    let output = match tokio::time::timeout(limit, child.wait_with_output()).await {
        Ok(result) => result.map_err(|err| AppError::Search(format!("error running filter: {err}")))?,
        Err(_elapsed) => {
            warn!(?limit, "log filter timed out");
            return Err(AppError::Search("filter operation timed out".into()));
        }
    };

    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.is_empty() {
        text.push_str("\n\nErrors:\n");
        text.push_str(&stderr);
    }
    if text.is_empty() {
        text.push_str("No output generated");
    }
    Ok(text)
}
