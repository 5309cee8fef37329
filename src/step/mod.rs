//! Step model
//!
//! A [`Step`] is an immutable descriptor for one unit of provisioning work.
//! What the step actually does lives behind the [`StepAction`] trait, which has
//! one required capability (`run`) and one optional capability (`should_skip`).

pub mod catalog;
pub mod filter;

pub use filter::{compute_enabled_steps, parse_step_list};

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::ConfigSnapshot;
use crate::error::{BloomError, ErrorCategory};
use crate::monitor::{Monitor, VariableValue};

/// Failure reported by a step action.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct StepError {
    message: String,
}

impl StepError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn category(&self) -> ErrorCategory {
        ErrorCategory::classify(&self.message)
    }
}

impl From<BloomError> for StepError {
    fn from(err: BloomError) -> Self {
        Self::new(err.to_string())
    }
}

impl From<std::io::Error> for StepError {
    fn from(err: std::io::Error) -> Self {
        Self::new(err.to_string())
    }
}

impl From<anyhow::Error> for StepError {
    fn from(err: anyhow::Error) -> Self {
        Self::new(format!("{err:#}"))
    }
}

/// Outcome of a single action invocation.
///
/// `message` is independent of success: a successful step may still report
/// something worth showing, e.g. which disks it selected.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepResult {
    pub error: Option<StepError>,
    pub message: Option<String>,
}

impl StepResult {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn with_message(message: impl Into<String>) -> Self {
        Self {
            error: None,
            message: Some(message.into()),
        }
    }

    pub fn failed(error: impl Into<StepError>) -> Self {
        Self {
            error: Some(error.into()),
            message: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

impl From<std::result::Result<(), StepError>> for StepResult {
    fn from(result: std::result::Result<(), StepError>) -> Self {
        match result {
            Ok(()) => Self::ok(),
            Err(e) => Self::failed(e),
        }
    }
}

/// Everything an action may look at while it runs.
#[derive(Clone)]
pub struct StepContext {
    config: Arc<ConfigSnapshot>,
    monitor: Monitor,
}

impl StepContext {
    pub fn new(config: Arc<ConfigSnapshot>, monitor: Monitor) -> Self {
        Self { config, monitor }
    }

    pub fn config(&self) -> &ConfigSnapshot {
        &self.config
    }

    pub fn monitor(&self) -> &Monitor {
        &self.monitor
    }

    /// Publish a display value on the dashboard.
    pub fn set_variable(&self, name: &str, value: impl Into<VariableValue>) {
        self.monitor.set_variable(name, value);
    }
}

/// The work a step performs.
#[async_trait]
pub trait StepAction: Send + Sync {
    async fn run(&self, ctx: &StepContext) -> StepResult;

    /// When this returns true at run time, `run` is never invoked.
    fn should_skip(&self, _ctx: &StepContext) -> bool {
        false
    }
}

type ActionFn = dyn Fn(&StepContext) -> StepResult + Send + Sync;
type SkipFn = dyn Fn(&StepContext) -> bool + Send + Sync;

/// Adapts plain closures into a [`StepAction`].
pub struct FnStep {
    action: Box<ActionFn>,
    skip: Option<Box<SkipFn>>,
}

impl FnStep {
    pub fn new(action: impl Fn(&StepContext) -> StepResult + Send + Sync + 'static) -> Self {
        Self {
            action: Box::new(action),
            skip: None,
        }
    }

    pub fn with_skip(mut self, skip: impl Fn(&StepContext) -> bool + Send + Sync + 'static) -> Self {
        self.skip = Some(Box::new(skip));
        self
    }
}

#[async_trait]
impl StepAction for FnStep {
    async fn run(&self, ctx: &StepContext) -> StepResult {
        (self.action)(ctx)
    }

    fn should_skip(&self, ctx: &StepContext) -> bool {
        self.skip.as_ref().is_some_and(|skip| skip(ctx))
    }
}

#[derive(Clone)]
pub struct Step {
    id: String,
    name: String,
    description: String,
    action: Arc<dyn StepAction>,
}

impl Step {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        action: impl StepAction + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: description.into(),
            action: Arc::new(action),
        }
    }

    pub fn from_fn(
        id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        action: impl Fn(&StepContext) -> StepResult + Send + Sync + 'static,
    ) -> Self {
        Self::new(id, name, description, FnStep::new(action))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub async fn run(&self, ctx: &StepContext) -> StepResult {
        self.action.run(ctx).await
    }

    pub fn should_skip(&self, ctx: &StepContext) -> bool {
        self.action.should_skip(ctx)
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Ids of the given steps, in order.
pub fn step_ids(steps: &[Step]) -> Vec<String> {
    steps.iter().map(|s| s.id().to_string()).collect()
}
