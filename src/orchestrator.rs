//! Sequential, fail-fast step execution.

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::ErrorCategory;
use crate::monitor::{LogLevel, Monitor, SYSTEM_SOURCE};
use crate::step::{compute_enabled_steps, Step, StepContext, StepError};

/// Steps of `catalog` selected by the `DISABLED_STEPS` / `ENABLED_STEPS`
/// values of the context's configuration.
pub fn enabled_steps(catalog: &[Step], ctx: &StepContext) -> Vec<Step> {
    let config = ctx.config();
    compute_enabled_steps(
        catalog,
        &config.get_list("DISABLED_STEPS"),
        &config.get_list("ENABLED_STEPS"),
    )
}

/// Renders a duration rounded to whole milliseconds, e.g. `1.234s`.
pub fn format_duration(duration: Duration) -> String {
    format!("{:?}", Duration::from_millis(duration.as_millis() as u64))
}

#[derive(Debug, Clone)]
pub struct Orchestrator {
    step_delay: Duration,
    stop: Option<CancellationToken>,
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self {
            step_delay: Duration::from_millis(500),
            stop: None,
        }
    }
}

impl Orchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pause inserted between consecutive steps.
    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = delay;
        self
    }

    /// Checked before each step. Once cancelled the run ends with an error
    /// and the remaining steps stay pending; a step already running is let
    /// finish.
    pub fn with_stop(mut self, stop: CancellationToken) -> Self {
        self.stop = Some(stop);
        self
    }

    fn is_stopped(&self) -> bool {
        self.stop.as_ref().is_some_and(CancellationToken::is_cancelled)
    }

    /// Register every step as pending so the dashboard shows the full plan
    /// before anything runs.
    pub fn prepare(&self, steps: &[Step], monitor: &Monitor) {
        for (index, step) in steps.iter().enumerate() {
            monitor.initialize_step(step, index + 1);
        }
        monitor.set_variable("total_steps", steps.len());
        monitor.set_variable("installation_status", "running");

        let message = format!("Total steps to execute: {}", steps.len());
        info!("{}", message);
        monitor.add_log(LogLevel::Info, message, SYSTEM_SOURCE);
    }

    /// Filter `catalog` against the configuration and run what is left.
    pub async fn run_catalog(&self, catalog: &[Step], ctx: &StepContext) -> Result<(), StepError> {
        let steps = enabled_steps(catalog, ctx);
        self.run(&steps, ctx).await
    }

    /// Run `steps` in order, stopping at the first failure.
    ///
    /// Returns the failing step's error. Steps after it stay `pending`.
    pub async fn run(&self, steps: &[Step], ctx: &StepContext) -> Result<(), StepError> {
        let monitor = ctx.monitor();
        self.prepare(steps, monitor);

        let mut outcome = Ok(());
        for (index, step) in steps.iter().enumerate() {
            if self.is_stopped() {
                outcome = Err(StepError::new(format!(
                    "installation stopped before {}",
                    step.name()
                )));
                break;
            }
            if let Err(e) = self.run_step(step, ctx).await {
                outcome = Err(e);
                break;
            }

            if !self.step_delay.is_zero() && index + 1 < steps.len() {
                tokio::time::sleep(self.step_delay).await;
            }
        }

        self.summarize(&outcome, monitor);
        outcome
    }

    async fn run_step(&self, step: &Step, ctx: &StepContext) -> Result<(), StepError> {
        let monitor = ctx.monitor();
        let id = step.id();

        monitor.start_step(id);
        let message = format!("Starting step: {}", step.name());
        info!("{}", message);
        monitor.add_log(LogLevel::Info, message, id);

        if step.should_skip(ctx) {
            let message = format!("Step {} is skipped", step.name());
            info!("{}", message);
            monitor.add_log(LogLevel::Info, message, id);
            monitor.skip_step(id);
            return Ok(());
        }

        let started = Instant::now();
        let result = step.run(ctx).await;
        let elapsed = started.elapsed();

        if let Some(message) = result.message.as_deref() {
            info!("{}", message);
            monitor.add_log(LogLevel::Info, message, id);
        }

        match result.error {
            Some(err) => {
                let message = format!("Execution failed: {}", err);
                error!("{}", message);
                monitor.add_log(LogLevel::Error, message, id);
                monitor.complete_step(id, Some(err.message()));
                Err(err)
            }
            None => {
                let message = format!("Completed in {}", format_duration(elapsed));
                info!("{}", message);
                monitor.add_log(LogLevel::Info, message, id);
                monitor.complete_step(id, None);
                Ok(())
            }
        }
    }

    fn summarize(&self, outcome: &Result<(), StepError>, monitor: &Monitor) {
        match outcome {
            Ok(()) => {
                let message = "All steps completed successfully!";
                info!("{}", message);
                monitor.add_log(LogLevel::Info, message, SYSTEM_SOURCE);
                monitor.set_variable("installation_status", "completed");
            }
            Err(err) => {
                for line in failure_summary(err) {
                    error!("{}", line);
                    monitor.add_log(LogLevel::Error, line, SYSTEM_SOURCE);
                }
                if err.category().is_recoverable_by_reconfigure() {
                    warn!("Configuration problem detected, the configuration can be resubmitted");
                }
                monitor.set_variable("installation_status", "failed");
            }
        }
    }
}

/// Terminal and log lines describing a failed run.
pub fn failure_summary(err: &StepError) -> Vec<String> {
    match err.category() {
        ErrorCategory::Os => vec![
            format!("OS compatibility error: {}", err),
            "This server is not supported - OS version incompatible".to_string(),
        ],
        ErrorCategory::System => vec![
            format!("System requirements error: {}", err),
            "Server does not meet minimum system requirements".to_string(),
        ],
        ErrorCategory::Config | ErrorCategory::General => {
            vec![format!("Installation failed: {}", err)]
        }
    }
}
