//! Command implementations behind the `bloom` binary.

pub mod headless;

pub use headless::run_headless;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::config::{ConfigSnapshot, Settings};
use crate::controller::{ControllerOptions, ModeController, Outcome};
use crate::logging::LogFile;
use crate::status;
use crate::step::catalog::demo_catalog;
use crate::step::Step;

/// Options of the default (web) mode.
#[derive(Debug, Default, Clone)]
pub struct WebArgs {
    pub config: Option<std::path::PathBuf>,
    pub one_shot: bool,
    pub reconfigure: bool,
}

/// Configuration to pre-fill: the explicit file, else a saved `bloom.yaml`,
/// with environment overrides applied on top.
pub fn load_prefill(settings: &Settings, config: Option<&Path>) -> Result<Option<ConfigSnapshot>> {
    let snapshot = match config {
        Some(path) => Some(
            ConfigSnapshot::load_yaml(path)
                .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        ),
        None => {
            let saved = settings.config_path();
            if saved.exists() {
                debug!("Pre-filling from saved {}", saved.display());
                Some(ConfigSnapshot::load_yaml(&saved).with_context(|| {
                    format!("Failed to load saved configuration {}", saved.display())
                })?)
            } else {
                None
            }
        }
    };

    let snapshot = snapshot.unwrap_or_default().with_env_overrides();
    Ok((!snapshot.is_empty()).then_some(snapshot))
}

/// Serve the wizard and dashboard until the run ends (one-shot) or the
/// operator stops the process.
pub async fn run_web(
    mut settings: Settings,
    args: WebArgs,
    log_file: Arc<LogFile>,
    catalog: Vec<Step>,
) -> Result<Outcome> {
    settings.one_shot |= args.one_shot;

    if args.reconfigure {
        if let Some(archived) = log_file.archive()? {
            println!("📦 Archived previous log to {}", archived.display());
        }
    }

    let monitor_existing_log = args.config.is_none()
        && !args.reconfigure
        && !settings.one_shot
        && settings.log_path().exists();

    let mut options = ControllerOptions::new(settings.clone());
    options.prefilled = load_prefill(&settings, args.config.as_deref())?;
    options.log_file = Some(log_file);
    options.monitor_existing_log = monitor_existing_log;

    let controller = ModeController::bind(options, catalog).await?;
    let url = format!("http://{}", controller.local_addr());
    if monitor_existing_log {
        println!("📊 Monitoring existing installation at {}", url);
    } else if settings.one_shot {
        println!("🚀 One-shot installation started, progress at {}", url);
    } else {
        println!("🌐 Open {} to configure this node", url);
    }
    info!("Serving on {}", url);

    controller.run().await
}

/// Print a status report for an existing log.
pub fn run_status(settings: &Settings) -> Result<()> {
    let path = settings.log_path();
    if !path.exists() {
        println!("No {} found in {}", settings.log_file, settings.work_dir.display());
        return Ok(());
    }
    let parsed = status::parse_log(&path)?;
    print!("{}", parsed.report());
    Ok(())
}

/// Print the catalog ids usable in `DISABLED_STEPS` / `ENABLED_STEPS`.
pub fn list_steps(catalog: &[Step]) {
    println!("Available steps:");
    for step in catalog {
        println!("  {:<30} {}", step.id(), step.description());
    }
}

/// The step catalog the binary runs.
pub fn default_catalog() -> Vec<Step> {
    demo_catalog()
}
