//! Terminal-only run: no web server, progress printed as steps change state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::{validate, ConfigSnapshot, Settings};
use crate::controller::Outcome;
use crate::monitor::{Monitor, StepState, StepStatus};
use crate::orchestrator::{enabled_steps, failure_summary, format_duration, Orchestrator};
use crate::step::{step_ids, Step, StepContext};

const PROGRESS_INTERVAL: Duration = Duration::from_millis(200);

pub async fn run_headless(
    settings: &Settings,
    config: ConfigSnapshot,
    catalog: Vec<Step>,
) -> Result<Outcome> {
    let errors = validate(&config, &step_ids(&catalog));
    if !errors.is_empty() {
        eprintln!("❌ Configuration is invalid:");
        for message in &errors {
            tracing::error!("Configuration validation error: {}", message);
            eprintln!("   - {}", message);
        }
        return Ok(Outcome::ConfigInvalid);
    }

    config.log_values();
    let monitor = Monitor::new();
    monitor.set_variable("app_version", env!("CARGO_PKG_VERSION"));
    let ctx = StepContext::new(Arc::new(config), monitor.clone());
    let steps = enabled_steps(&catalog, &ctx);
    println!("🌱 Running {} steps", steps.len());

    let stop = CancellationToken::new();
    let printer = tokio::spawn(print_progress(monitor.clone(), stop.clone()));

    let orchestrator = Orchestrator::new().with_step_delay(settings.step_delay);
    let result = orchestrator.run(&steps, &ctx).await;

    stop.cancel();
    let _ = printer.await;

    match result {
        Ok(()) => {
            info!("Headless run finished");
            println!("✅ All steps completed successfully!");
            Ok(Outcome::Succeeded)
        }
        Err(e) => {
            for line in failure_summary(&e) {
                eprintln!("❌ {}", line);
            }
            eprintln!("   {}", e.category().guidance());
            Ok(Outcome::InstallFailed)
        }
    }
}

/// Print each step transition once, until `stop` fires and the final state
/// has been flushed.
async fn print_progress(monitor: Monitor, stop: CancellationToken) {
    let mut seen: HashMap<String, StepState> = HashMap::new();
    loop {
        let stopping = tokio::select! {
            _ = stop.cancelled() => true,
            _ = tokio::time::sleep(PROGRESS_INTERVAL) => false,
        };

        let steps = monitor.steps();
        let total = steps.len();
        for status in steps {
            if seen.get(&status.id) == Some(&status.state) {
                continue;
            }
            if let Some(line) = progress_line(&status, total) {
                println!("{}", line);
            }
            seen.insert(status.id.clone(), status.state);
        }

        if stopping {
            break;
        }
    }
}

fn progress_line(status: &StepStatus, total: usize) -> Option<String> {
    let prefix = format!("[{}/{}]", status.ordinal, total);
    let line = match status.state {
        StepState::Pending => return None,
        StepState::Running => format!("{} ▶️  {}", prefix, status.name),
        StepState::Completed => format!(
            "{} ✅ {} ({})",
            prefix,
            status.name,
            status.duration().map(format_duration).unwrap_or_default()
        ),
        StepState::Skipped => format!("{} ⏭️  {} skipped", prefix, status.name),
        StepState::Failed => format!(
            "{} ❌ {}: {}",
            prefix,
            status.name,
            status.error.as_deref().unwrap_or("failed")
        ),
    };
    Some(line)
}
