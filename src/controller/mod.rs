//! Mode controller: the phase state machine between collecting a
//! configuration and running the installation, plus the HTTP surface that
//! drives it.

pub mod pages;
pub mod server;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{validate, ConfigSnapshot, ConfigStore, Settings};
use crate::error::{BloomError, ErrorCategory};
use crate::logging::LogFile;
use crate::monitor::{LogTailer, Monitor};
use crate::orchestrator::{failure_summary, Orchestrator};
use crate::status;
use crate::step::{compute_enabled_steps, step_ids, Step, StepContext, StepError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    CollectingConfig,
    Installing,
    Completed,
    Failed,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::CollectingConfig => "collecting configuration",
            Self::Installing => "installing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// How a controller run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Succeeded,
    InstallFailed,
    ConfigInvalid,
    /// Interrupted or shut down while serving interactively.
    Stopped {
        phase: Phase,
        /// The last run ended in an error, even if the wizard is back.
        run_failed: bool,
    },
}

/// Exit code of a process interrupted in the middle of a run.
pub const INTERRUPTED_EXIT_CODE: i32 = 130;

impl Outcome {
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Succeeded => 0,
            Self::InstallFailed => 1,
            Self::ConfigInvalid => 2,
            Self::Stopped { phase, run_failed } => match phase {
                Phase::Completed => 0,
                Phase::Failed => 1,
                Phase::Installing => INTERRUPTED_EXIT_CODE,
                Phase::CollectingConfig => i32::from(run_failed),
            },
        }
    }
}

#[derive(Debug, Error)]
pub enum RequestError {
    #[error("invalid configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),

    #[error("not allowed while {0}")]
    WrongPhase(Phase),

    #[error("failed to save configuration: {0}")]
    Persist(#[from] BloomError),

    #[error("failed to archive log: {0}")]
    Archive(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LastError {
    pub message: String,
    pub category: ErrorCategory,
}

enum ControllerEvent {
    ConfigSubmitted {
        snapshot: Arc<ConfigSnapshot>,
        run_id: u64,
    },
    ValidationFailed(Vec<String>),
    RunFinished {
        run_id: u64,
        result: Result<(), StepError>,
    },
    Reconfigured,
}

struct PhaseState {
    phase: Phase,
    monitor: Monitor,
    prefilled: ConfigSnapshot,
    last_error: Option<LastError>,
    validation_errors: Vec<String>,
    run_id: u64,
    /// A submission passed validation and is being written to disk.
    submitting: bool,
}

/// Clears `submitting` when a submission is dropped before it finishes.
struct SubmitGuard<'a> {
    state: &'a ControllerState,
    armed: bool,
}

impl Drop for SubmitGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.state.lock().submitting = false;
        }
    }
}

/// State shared between the controller loop and the HTTP handlers.
pub struct ControllerState {
    inner: Mutex<PhaseState>,
    events: mpsc::UnboundedSender<ControllerEvent>,
    config_store: ConfigStore,
    settings: Settings,
    known_steps: Vec<String>,
    log_file: Option<Arc<LogFile>>,
    started_at: DateTime<Utc>,
}

impl ControllerState {
    fn lock(&self) -> MutexGuard<'_, PhaseState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn phase(&self) -> Phase {
        self.lock().phase
    }

    /// The monitor of the current (or last) run.
    pub fn monitor(&self) -> Monitor {
        self.lock().monitor.clone()
    }

    pub fn prefilled(&self) -> ConfigSnapshot {
        self.lock().prefilled.clone()
    }

    pub fn last_error(&self) -> Option<LastError> {
        self.lock().last_error.clone()
    }

    pub fn validation_errors(&self) -> Vec<String> {
        self.lock().validation_errors.clone()
    }

    pub fn is_one_shot(&self) -> bool {
        self.settings.one_shot
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn config_store(&self) -> &ConfigStore {
        &self.config_store
    }

    fn fresh_monitor(&self) -> Monitor {
        let monitor = Monitor::new();
        monitor.set_variable("app_version", env!("CARGO_PKG_VERSION"));
        monitor.set_variable("startup_time", self.started_at.to_rfc3339());
        monitor
    }

    /// Validate, persist and publish a configuration.
    ///
    /// With `install` the phase moves to `Installing` and the controller is
    /// told to start the run. Without it the phase is left alone. A second
    /// submission arriving while the first is being written gets
    /// [`RequestError::WrongPhase`].
    pub async fn submit(
        &self,
        snapshot: ConfigSnapshot,
        install: bool,
    ) -> Result<Arc<ConfigSnapshot>, RequestError> {
        {
            let mut inner = self.lock();
            if inner.phase != Phase::CollectingConfig || inner.submitting {
                return Err(RequestError::WrongPhase(inner.phase));
            }

            let errors = validate(&snapshot, &self.known_steps);
            if !errors.is_empty() {
                inner.validation_errors = errors.clone();
                return Err(RequestError::Invalid(errors));
            }
            inner.submitting = true;
        }

        let mut guard = SubmitGuard {
            state: self,
            armed: true,
        };
        let saved = snapshot.save_yaml(&self.settings.config_path()).await;
        guard.armed = false;

        let mut inner = self.lock();
        inner.submitting = false;
        saved?;
        let published = self.config_store.publish(snapshot);
        inner.validation_errors.clear();

        if install {
            inner.phase = Phase::Installing;
            inner.monitor = self.fresh_monitor();
            inner.last_error = None;
            inner.run_id += 1;
            let _ = self.events.send(ControllerEvent::ConfigSubmitted {
                snapshot: Arc::clone(&published),
                run_id: inner.run_id,
            });
        } else {
            inner.prefilled = (*published).clone();
            info!("Configuration saved without starting installation");
        }
        Ok(published)
    }

    /// Record validation errors found by a client.
    ///
    /// In one-shot mode a report during the run rejects the configuration:
    /// the run is abandoned and the phase becomes `Failed`.
    pub fn report_validation_errors(&self, errors: Vec<String>) -> Result<(), RequestError> {
        let mut inner = self.lock();
        let abandons_run = self.settings.one_shot && inner.phase == Phase::Installing;
        if inner.phase != Phase::CollectingConfig && !abandons_run {
            return Err(RequestError::WrongPhase(inner.phase));
        }
        for message in &errors {
            error!("Configuration validation error: {}", message);
        }
        inner.validation_errors = errors.clone();

        if abandons_run {
            // Bumped so the abandoned run's result is ignored
            inner.run_id += 1;
            inner.phase = Phase::Failed;
            let message = if errors.is_empty() {
                "configuration rejected".to_string()
            } else {
                errors.join("; ")
            };
            inner.last_error = Some(LastError {
                message,
                category: ErrorCategory::Config,
            });
        }
        let _ = self.events.send(ControllerEvent::ValidationFailed(errors));
        Ok(())
    }

    /// Archive the run log and return to collecting a configuration.
    pub fn reconfigure(&self) -> Result<Option<PathBuf>, RequestError> {
        let mut inner = self.lock();
        if !matches!(inner.phase, Phase::Failed | Phase::Completed) {
            return Err(RequestError::WrongPhase(inner.phase));
        }

        let archived = match &self.log_file {
            Some(log_file) => log_file.archive()?,
            None => None,
        };
        if let Some(path) = &archived {
            info!("Archived previous log to {}", path.display());
        }

        let saved = self.settings.config_path();
        if saved.exists() {
            match ConfigSnapshot::load_yaml(&saved) {
                Ok(snapshot) => inner.prefilled = snapshot,
                Err(e) => warn!("Could not reload {}: {}", saved.display(), e),
            }
        }

        inner.phase = Phase::CollectingConfig;
        inner.monitor = self.fresh_monitor();
        inner.last_error = None;
        inner.validation_errors.clear();
        let _ = self.events.send(ControllerEvent::Reconfigured);
        Ok(archived)
    }

    /// Apply the end of run `run_id` and return the resulting phase.
    fn finish_run(&self, run_id: u64, result: &Result<(), StepError>) -> Option<Phase> {
        let mut inner = self.lock();
        if inner.run_id != run_id || inner.phase != Phase::Installing {
            debug!(run_id, "Ignoring result of a replaced run");
            return None;
        }

        inner.phase = match result {
            Ok(()) => Phase::Completed,
            Err(err) => {
                let category = err.category();
                inner.last_error = Some(LastError {
                    message: err.message().to_string(),
                    category,
                });
                if category.is_recoverable_by_reconfigure() && !self.settings.one_shot {
                    inner.prefilled = (*self.config_store.load()).clone();
                    Phase::CollectingConfig
                } else {
                    Phase::Failed
                }
            }
        };
        Some(inner.phase)
    }

    /// Put an earlier run, reconstructed from its log, on the dashboard.
    ///
    /// No orchestrator runs for a restored log, so a run that never logged
    /// its summary counts as failed and can be reconfigured.
    fn restore(&self, parsed: &status::LogStatus, plan: &[Step]) {
        let mut inner = self.lock();
        let monitor = self.fresh_monitor();
        parsed.seed_monitor(plan, &monitor);
        inner.monitor = monitor;

        if parsed.finished && !parsed.has_failures() {
            inner.phase = Phase::Completed;
            return;
        }

        let message = parsed
            .steps
            .iter()
            .find_map(|s| s.error.clone())
            .unwrap_or_else(|| {
                if parsed.has_failures() {
                    "installation failed".to_string()
                } else {
                    UNFINISHED_RUN.to_string()
                }
            });
        if !parsed.has_failures() {
            warn!("Previous installation stopped before finishing");
        }
        inner.last_error = Some(LastError {
            category: ErrorCategory::classify(&message),
            message,
        });
        inner.phase = Phase::Failed;
    }
}

const UNFINISHED_RUN: &str = "previous installation did not finish";

pub struct ControllerOptions {
    pub settings: Settings,
    /// Values shown in the wizard, and submitted as-is in one-shot mode.
    pub prefilled: Option<ConfigSnapshot>,
    pub log_file: Option<Arc<LogFile>>,
    /// Start by showing the run recorded in an existing log file.
    pub monitor_existing_log: bool,
}

impl ControllerOptions {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            prefilled: None,
            log_file: None,
            monitor_existing_log: false,
        }
    }
}

/// Bind the first free loopback port among the candidates.
pub async fn bind_loopback(settings: &Settings) -> anyhow::Result<TcpListener> {
    let mut last_error = None;
    for port in settings.candidate_ports() {
        match TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], port))).await {
            Ok(listener) => return Ok(listener),
            Err(e) => {
                debug!(port, "Port unavailable: {}", e);
                last_error = Some(e);
            }
        }
    }
    match last_error {
        Some(e) => Err(anyhow::Error::new(e)
            .context(format!("no free port starting at {}", settings.base_port))),
        None => Err(anyhow!("no candidate ports to bind")),
    }
}

pub struct ModeController {
    state: Arc<ControllerState>,
    events: mpsc::UnboundedReceiver<ControllerEvent>,
    listener: Option<TcpListener>,
    local_addr: SocketAddr,
    catalog: Vec<Step>,
    orchestrator: Orchestrator,
    monitor_existing_log: bool,
    tailer: Option<CancellationToken>,
    /// Stops the run in flight between steps.
    run_stop: Option<CancellationToken>,
    shutdown: CancellationToken,
}

impl ModeController {
    pub async fn bind(options: ControllerOptions, catalog: Vec<Step>) -> anyhow::Result<Self> {
        let listener = bind_loopback(&options.settings).await?;
        let local_addr = listener.local_addr()?;
        let (tx, rx) = mpsc::unbounded_channel();

        let orchestrator = Orchestrator::new().with_step_delay(options.settings.step_delay);
        let mut known_steps = step_ids(&catalog);
        known_steps.sort();

        let started_at = Utc::now();
        let state = Arc::new(ControllerState {
            inner: Mutex::new(PhaseState {
                phase: Phase::CollectingConfig,
                monitor: Monitor::new(),
                prefilled: options.prefilled.unwrap_or_default(),
                last_error: None,
                validation_errors: Vec::new(),
                run_id: 0,
                submitting: false,
            }),
            events: tx,
            config_store: ConfigStore::default(),
            settings: options.settings,
            known_steps,
            log_file: options.log_file,
            started_at,
        });
        state.lock().monitor = state.fresh_monitor();

        Ok(Self {
            state,
            events: rx,
            listener: Some(listener),
            local_addr,
            catalog,
            orchestrator,
            monitor_existing_log: options.monitor_existing_log,
            tailer: None,
            run_stop: None,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> Arc<ControllerState> {
        Arc::clone(&self.state)
    }

    /// Cancelling this token stops the controller with [`Outcome::Stopped`].
    /// A run in flight ends before its next step.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub async fn run(mut self) -> anyhow::Result<Outcome> {
        if self.monitor_existing_log {
            self.enter_monitoring_mode();
        }

        // Submitted before the server starts so the wizard is never served
        if self.state.is_one_shot() {
            let prefilled = self.state.prefilled();
            info!("One-shot mode: submitting pre-filled configuration");
            if let Err(e) = self.state.submit(prefilled, true).await {
                return Ok(self.abort_one_shot(e));
            }
        }

        let listener = self
            .listener
            .take()
            .ok_or_else(|| anyhow!("controller already started"))?;
        let router = server::router(Arc::clone(&self.state));
        let shutdown = self.shutdown.clone();
        let server = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await
        });
        info!("Web interface available at http://{}", self.local_addr);

        let outcome = self.event_loop().await;

        self.shutdown.cancel();
        self.stop_run();
        self.stop_tailer();
        match server.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Web server stopped with error: {}", e),
            Err(e) => warn!("Web server task failed: {}", e),
        }
        Ok(outcome)
    }

    async fn event_loop(&mut self) -> Outcome {
        loop {
            let event = tokio::select! {
                event = self.events.recv() => event,
                _ = self.shutdown.cancelled() => return self.stopped(),
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupted, shutting down");
                    return self.stopped();
                }
            };
            let Some(event) = event else {
                return self.stopped();
            };

            match event {
                ControllerEvent::ConfigSubmitted { snapshot, run_id } => {
                    self.start_installation(snapshot, run_id);
                }
                ControllerEvent::ValidationFailed(errors) => {
                    if self.state.is_one_shot() {
                        self.stop_run();
                        print_invalid(&errors);
                        return Outcome::ConfigInvalid;
                    }
                }
                ControllerEvent::RunFinished { run_id, result } => {
                    if let Some(outcome) = self.finish_installation(run_id, result) {
                        return outcome;
                    }
                }
                ControllerEvent::Reconfigured => self.stop_tailer(),
            }
        }
    }

    fn stopped(&self) -> Outcome {
        let outcome = Outcome::Stopped {
            phase: self.state.phase(),
            run_failed: self.state.last_error().is_some(),
        };
        debug!(exit_code = outcome.exit_code(), "Controller stopped");
        outcome
    }

    fn enter_monitoring_mode(&mut self) {
        let log_path = self.state.settings.log_path();
        match status::parse_log(&log_path) {
            Ok(parsed) => {
                info!("Monitoring existing run from {}", log_path.display());
                let plan = self.restored_plan();
                self.state.restore(&parsed, &plan);
                self.start_tailer(self.state.monitor());
            }
            Err(e) => warn!("Could not read existing log: {}", e),
        }
    }

    /// Steps the logged run most likely had, judged by the saved
    /// configuration. Without one the whole catalog is assumed.
    fn restored_plan(&self) -> Vec<Step> {
        let saved = self.state.settings.config_path();
        let config = if saved.exists() {
            ConfigSnapshot::load_yaml(&saved).unwrap_or_else(|e| {
                warn!("Could not read {}: {}", saved.display(), e);
                ConfigSnapshot::default()
            })
        } else {
            ConfigSnapshot::default()
        };
        compute_enabled_steps(
            &self.catalog,
            &config.get_list("DISABLED_STEPS"),
            &config.get_list("ENABLED_STEPS"),
        )
    }

    fn start_installation(&mut self, snapshot: Arc<ConfigSnapshot>, run_id: u64) {
        if let Some(log_file) = &self.state.log_file {
            if let Err(e) = log_file.open() {
                warn!("Could not open {}: {}", log_file.path().display(), e);
            }
        }
        info!("Starting installation");
        snapshot.log_values();

        let monitor = self.state.monitor();
        self.start_tailer(monitor.clone());

        self.stop_run();
        let stop = self.shutdown.child_token();
        self.run_stop = Some(stop.clone());

        let ctx = StepContext::new(snapshot, monitor);
        let catalog = self.catalog.clone();
        let orchestrator = self.orchestrator.clone().with_stop(stop);
        let events = self.state.events.clone();
        tokio::spawn(async move {
            let result = orchestrator.run_catalog(&catalog, &ctx).await;
            let _ = events.send(ControllerEvent::RunFinished { run_id, result });
        });
    }

    /// Returns the final outcome in one-shot mode.
    fn finish_installation(
        &mut self,
        run_id: u64,
        result: Result<(), StepError>,
    ) -> Option<Outcome> {
        let phase = self.state.finish_run(run_id, &result)?;
        self.run_stop = None;
        match &result {
            Ok(()) => info!("Installation completed successfully"),
            Err(e) => error!("Installation failed: {}", e),
        }
        if phase == Phase::CollectingConfig {
            info!("Configuration error, waiting for a corrected configuration");
        }

        if !self.state.is_one_shot() {
            return None;
        }

        match result {
            Ok(()) => {
                println!("✅ Installation completed successfully");
                Some(Outcome::Succeeded)
            }
            Err(e) => {
                for line in failure_summary(&e) {
                    eprintln!("❌ {}", line);
                }
                eprintln!("   {}", e.category().guidance());
                Some(Outcome::InstallFailed)
            }
        }
    }

    fn abort_one_shot(&self, error: RequestError) -> Outcome {
        match error {
            RequestError::Invalid(errors) => {
                for message in &errors {
                    error!("Configuration validation error: {}", message);
                }
                print_invalid(&errors);
                Outcome::ConfigInvalid
            }
            other => {
                error!("Could not submit configuration: {}", other);
                eprintln!("❌ {}", other);
                Outcome::InstallFailed
            }
        }
    }

    fn start_tailer(&mut self, monitor: Monitor) {
        self.stop_tailer();
        if self.state.log_file.is_none() && !self.monitor_existing_log {
            return;
        }
        let token = self.shutdown.child_token();
        LogTailer::new(self.state.settings.log_path(), monitor).spawn(token.clone());
        self.tailer = Some(token);
    }

    fn stop_run(&mut self) {
        if let Some(token) = self.run_stop.take() {
            token.cancel();
        }
    }

    fn stop_tailer(&mut self) {
        if let Some(token) = self.tailer.take() {
            token.cancel();
        }
    }
}

fn print_invalid(errors: &[String]) {
    eprintln!("❌ Configuration is invalid:");
    for message in errors {
        eprintln!("   - {}", message);
    }
}
