//! Reconstructs run status from an existing `bloom.log`.
//!
//! Used by `bloom status` and to seed the dashboard when the binary is started
//! next to the log of an earlier run.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::error::{BloomError, Result};
use crate::monitor::{LogLevel, Monitor, StepState, FILE_WATCHER_SOURCE};
use crate::step::{Step, StepResult};

/// Lines kept for replay into a monitor.
const SEED_LOG_LINES: usize = 500;

static LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\S+)\s+(TRACE|DEBUG|INFO|WARN|ERROR)\s+[\w:]+:\s(.*)$")
        .expect("valid log line regex")
});

static STARTING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^Starting step:\s+(.+)$").expect("valid step regex"));

static FAILED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^Execution failed:\s+(.+)$").expect("valid failure regex"));

static SKIPPED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^Step .+ is skipped$").expect("valid skip regex"));

static TOTAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^Total steps to execute:\s*(\d+)").expect("valid total regex")
});

static OS_ERROR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(OS compatibility error|Ubuntu version not supported|This server is not supported)")
        .expect("valid os error regex")
});

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParsedStep {
    pub name: String,
    pub status: StepState,
    pub timestamp: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LogStatus {
    pub log_file: PathBuf,
    pub last_modified: Option<DateTime<Utc>>,
    pub steps: Vec<ParsedStep>,
    pub errors: Vec<String>,
    pub os_error: Option<String>,
    pub total_steps: Option<usize>,
    pub config_values: BTreeMap<String, String>,
    /// The success summary line was seen.
    pub finished: bool,
    #[serde(skip)]
    recent_lines: Vec<(LogLevel, String)>,
}

impl LogStatus {
    pub fn has_failures(&self) -> bool {
        self.steps.iter().any(|s| s.status == StepState::Failed)
    }

    pub fn installation_status(&self) -> &'static str {
        if self.has_failures() {
            "failed"
        } else if self.finished {
            "completed"
        } else if self.steps.is_empty() {
            "unknown"
        } else {
            "running"
        }
    }

    /// Human-readable summary for the terminal.
    pub fn report(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Bloom status from {}", self.log_file.display());
        if let Some(modified) = self.last_modified {
            let _ = writeln!(out, "Last updated: {}", modified.format("%Y-%m-%d %H:%M:%S UTC"));
        }

        let done = self
            .steps
            .iter()
            .filter(|s| s.status.is_terminal())
            .count();
        match self.total_steps {
            Some(total) => {
                let _ = writeln!(out, "Progress: {}/{} steps", done, total);
            }
            None => {
                let _ = writeln!(out, "Progress: {} steps seen", done);
            }
        }
        let _ = writeln!(out, "Installation: {}", self.installation_status());

        if !self.steps.is_empty() {
            let _ = writeln!(out, "\nSteps:");
        }
        for step in &self.steps {
            let icon = match step.status {
                StepState::Completed => "✅",
                StepState::Failed => "❌",
                StepState::Skipped => "⏭️",
                StepState::Running => "🔄",
                StepState::Pending => "⏸️",
            };
            match &step.error {
                Some(error) => {
                    let _ = writeln!(out, "  {} {}: {}", icon, step.name, error);
                }
                None => {
                    let _ = writeln!(out, "  {} {}", icon, step.name);
                }
            }
        }

        if let Some(os_error) = &self.os_error {
            let _ = writeln!(out, "\nOS error: {}", os_error);
        }
        if !self.errors.is_empty() {
            let _ = writeln!(out, "\nErrors:");
            for error in &self.errors {
                let _ = writeln!(out, "  - {}", error);
            }
        }
        if let Some(domain) = self.config_values.get("DOMAIN") {
            let _ = writeln!(out, "\nDomain: {}", domain);
        }
        out
    }

    /// Replay the parsed run into `monitor` so the dashboard shows it.
    ///
    /// Every step of `plan` starts out pending and logged names are mapped
    /// back to plan ids. A name the plan does not know is appended with the
    /// name as id. Durations are not recovered.
    pub fn seed_monitor(&self, plan: &[Step], monitor: &Monitor) {
        for (index, step) in plan.iter().enumerate() {
            monitor.initialize_step(step, index + 1);
        }

        let mut next_ordinal = plan.len() + 1;
        for parsed in &self.steps {
            let id = match plan.iter().find(|step| step.name() == parsed.name) {
                Some(step) => step.id().to_string(),
                None => {
                    let step = Step::from_fn(parsed.name.as_str(), parsed.name.as_str(), "", |_| {
                        StepResult::ok()
                    });
                    monitor.initialize_step(&step, next_ordinal);
                    next_ordinal += 1;
                    parsed.name.clone()
                }
            };
            match parsed.status {
                StepState::Pending => {}
                StepState::Running => monitor.start_step(&id),
                StepState::Completed => {
                    monitor.start_step(&id);
                    monitor.complete_step(&id, None);
                }
                StepState::Failed => {
                    monitor.start_step(&id);
                    let error = parsed.error.as_deref().unwrap_or("failed");
                    monitor.complete_step(&id, Some(error));
                }
                StepState::Skipped => monitor.skip_step(&id),
            }
        }

        for (level, line) in &self.recent_lines {
            monitor.add_log(*level, line.as_str(), FILE_WATCHER_SOURCE);
        }

        match self.total_steps {
            Some(total) => monitor.set_variable("total_steps", total),
            None if !plan.is_empty() => monitor.set_variable("total_steps", plan.len()),
            None => {}
        }
        monitor.set_variable("installation_status", self.installation_status());
    }
}

pub fn parse_log(path: &Path) -> Result<LogStatus> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| BloomError::Parse(format!("cannot read {}: {}", path.display(), e)))?;

    let mut status = parse_str(&content);
    status.log_file = path.to_path_buf();
    status.last_modified = std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .map(DateTime::<Utc>::from);
    Ok(status)
}

pub fn parse_str(content: &str) -> LogStatus {
    let mut status = LogStatus::default();
    let mut current: Option<ParsedStep> = None;
    let mut in_config = false;

    for line in content.lines() {
        if OS_ERROR.is_match(line) && status.os_error.is_none() {
            status.os_error = Some(line.to_string());
        }

        let Some(caps) = LINE.captures(line) else {
            continue;
        };
        let timestamp = DateTime::parse_from_rfc3339(&caps[1])
            .ok()
            .map(|t| t.with_timezone(&Utc));
        let level_token = &caps[2];
        let message = caps[3].trim();
        let level = LogLevel::parse(level_token).unwrap_or(LogLevel::Info);
        status.recent_lines.push((level, line.to_string()));

        if message == "Configuration values:" {
            in_config = true;
            continue;
        }
        if in_config {
            let ends_section =
                level_token != "INFO" || STARTING.is_match(message) || TOTAL.is_match(message);
            if ends_section {
                in_config = false;
            } else {
                if let Some((key, value)) = message.split_once(':') {
                    status
                        .config_values
                        .insert(key.trim().to_string(), value.trim().to_string());
                }
                continue;
            }
        }

        if let Some(caps) = TOTAL.captures(message) {
            status.total_steps = caps[1].parse().ok();
        } else if let Some(caps) = STARTING.captures(message) {
            if let Some(step) = current.take() {
                status.steps.push(step);
            }
            current = Some(ParsedStep {
                name: caps[1].trim().to_string(),
                status: StepState::Running,
                timestamp,
                error: None,
            });
        } else if message.starts_with("Completed in ") {
            if let Some(step) = current.as_mut() {
                step.status = StepState::Completed;
            }
        } else if SKIPPED.is_match(message) {
            if let Some(step) = current.as_mut() {
                step.status = StepState::Skipped;
            }
        } else if message == "All steps completed successfully!" {
            status.finished = true;
        }

        if level == LogLevel::Error {
            let error = FAILED
                .captures(message)
                .map(|caps| caps[1].trim().to_string())
                .unwrap_or_else(|| message.to_string());
            if let Some(step) = current.as_mut().filter(|s| s.status == StepState::Running) {
                step.status = StepState::Failed;
                step.error = Some(error.clone());
            }
            status.errors.push(error);
        }
    }

    if let Some(step) = current.take() {
        status.steps.push(step);
    }

    let skip = status.recent_lines.len().saturating_sub(SEED_LOG_LINES);
    status.recent_lines.drain(..skip);
    status
}
