//! Live run state shared between the orchestrator, the log tailer and the HTTP
//! handlers.
//!
//! Every field sits behind one mutex. Each operation holds it only for its own
//! duration, so readers always see a state produced by a complete transition.
//! The monitor never reports errors to its callers: unknown ids and illegal
//! transitions are ignored.

pub mod tailer;

pub use tailer::LogTailer;

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::step::Step;

/// Source recorded for entries produced by the controller itself.
pub const SYSTEM_SOURCE: &str = "system";
/// Source recorded for lines mirrored from the log file.
pub const FILE_WATCHER_SOURCE: &str = "file-watcher";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepState {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl StepState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StepStatus {
    pub id: String,
    pub name: String,
    pub description: String,
    /// 1-based position in the enabled step set.
    pub ordinal: usize,
    #[serde(rename = "status")]
    pub state: StepState,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip)]
    started_instant: Option<Instant>,
}

impl StepStatus {
    fn pending(step: &Step, ordinal: usize) -> Self {
        Self {
            id: step.id().to_string(),
            name: step.name().to_string(),
            description: step.description().to_string(),
            ordinal,
            state: StepState::Pending,
            started_at: None,
            finished_at: None,
            duration_ms: None,
            error: None,
            started_instant: None,
        }
    }

    pub fn duration(&self) -> Option<Duration> {
        self.duration_ms.map(Duration::from_millis)
    }

    fn finish(&mut self, state: StepState) {
        self.state = state;
        self.finished_at = Some(Utc::now());
        let elapsed = self
            .started_instant
            .map(|started| started.elapsed())
            .unwrap_or_default();
        self.duration_ms = Some(elapsed.as_millis() as u64);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Map a level name from any of the log formats we read.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "trace" | "debug" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warn" | "warning" => Some(Self::Warn),
            "error" | "fatal" | "panic" => Some(Self::Error),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VariableValue {
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl VariableValue {
    pub fn type_tag(&self) -> &'static str {
        match self {
            Self::Boolean(_) => "boolean",
            Self::Integer(_) => "integer",
            Self::Float(_) => "float",
            Self::String(_) => "string",
        }
    }
}

impl From<bool> for VariableValue {
    fn from(v: bool) -> Self {
        Self::Boolean(v)
    }
}

impl From<i64> for VariableValue {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<i32> for VariableValue {
    fn from(v: i32) -> Self {
        Self::Integer(i64::from(v))
    }
}

impl From<usize> for VariableValue {
    fn from(v: usize) -> Self {
        Self::Integer(v as i64)
    }
}

impl From<f64> for VariableValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<String> for VariableValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for VariableValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Variable {
    pub name: String,
    #[serde(rename = "type")]
    pub type_tag: &'static str,
    pub value: VariableValue,
}

#[derive(Default)]
struct MonitorState {
    steps: BTreeMap<String, StepStatus>,
    logs: VecDeque<LogEntry>,
    variables: BTreeMap<String, Variable>,
}

/// Cheap-to-clone handle; clones share the same state.
#[derive(Clone, Default)]
pub struct Monitor {
    state: Arc<Mutex<MonitorState>>,
    log_capacity: Option<usize>,
}

impl Monitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep at most `capacity` log entries, dropping the oldest first.
    pub fn with_log_capacity(capacity: usize) -> Self {
        Self {
            state: Arc::default(),
            log_capacity: Some(capacity.max(1)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MonitorState> {
        // A panic elsewhere must not take the dashboard down with it
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn initialize_step(&self, step: &Step, ordinal: usize) {
        let status = StepStatus::pending(step, ordinal);
        self.lock().steps.insert(status.id.clone(), status);
    }

    pub fn start_step(&self, id: &str) {
        let mut state = self.lock();
        if let Some(status) = state.steps.get_mut(id) {
            if status.state == StepState::Pending {
                status.state = StepState::Running;
                status.started_at = Some(Utc::now());
                status.started_instant = Some(Instant::now());
            }
        }
    }

    pub fn complete_step(&self, id: &str, error: Option<&str>) {
        let mut state = self.lock();
        if let Some(status) = state.steps.get_mut(id) {
            if status.state != StepState::Running {
                return;
            }
            match error {
                Some(message) => {
                    status.error = Some(message.to_string());
                    status.finish(StepState::Failed);
                }
                None => status.finish(StepState::Completed),
            }
        }
    }

    /// Marks a step skipped. Accepted from `running` as well as `pending`
    /// because the orchestrator announces a step before asking whether to skip it.
    pub fn skip_step(&self, id: &str) {
        let mut state = self.lock();
        if let Some(status) = state.steps.get_mut(id) {
            if status.state.is_terminal() {
                return;
            }
            status.finish(StepState::Skipped);
            status.duration_ms = Some(0);
        }
    }

    pub fn add_log(&self, level: LogLevel, message: impl Into<String>, source: &str) {
        let entry = LogEntry {
            timestamp: Utc::now(),
            level,
            message: message.into(),
            source: source.to_string(),
        };

        let mut state = self.lock();
        if let Some(capacity) = self.log_capacity {
            while state.logs.len() >= capacity {
                state.logs.pop_front();
            }
        }
        state.logs.push_back(entry);
    }

    pub fn set_variable(&self, name: &str, value: impl Into<VariableValue>) {
        let value = value.into();
        let variable = Variable {
            name: name.to_string(),
            type_tag: value.type_tag(),
            value,
        };
        self.lock().variables.insert(name.to_string(), variable);
    }

    pub fn variables(&self) -> BTreeMap<String, Variable> {
        self.lock().variables.clone()
    }

    pub fn variable(&self, name: &str) -> Option<VariableValue> {
        self.lock().variables.get(name).map(|v| v.value.clone())
    }

    /// Step statuses ordered by their position in the run.
    pub fn steps(&self) -> Vec<StepStatus> {
        let mut steps: Vec<StepStatus> = self.lock().steps.values().cloned().collect();
        steps.sort_by_key(|s| s.ordinal);
        steps
    }

    pub fn step(&self, id: &str) -> Option<StepStatus> {
        self.lock().steps.get(id).cloned()
    }

    /// All log entries in insertion order.
    pub fn logs(&self) -> Vec<LogEntry> {
        self.lock().logs.iter().cloned().collect()
    }

    /// The most recent `n` entries, still in insertion order.
    pub fn recent_logs(&self, n: usize) -> Vec<LogEntry> {
        let state = self.lock();
        let skip = state.logs.len().saturating_sub(n);
        state.logs.iter().skip(skip).cloned().collect()
    }

    /// True once no step is pending or running.
    pub fn is_completed(&self) -> bool {
        self.lock()
            .steps
            .values()
            .all(|s| s.state.is_terminal())
    }

    pub fn has_errors(&self) -> bool {
        self.lock()
            .steps
            .values()
            .any(|s| s.state == StepState::Failed)
    }
}
