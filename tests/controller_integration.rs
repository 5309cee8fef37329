//! End-to-end tests of the mode controller and its HTTP API

mod common;

use anyhow::Result;
use bloom::controller::{ControllerOptions, ModeController, Outcome, Phase, INTERRUPTED_EXIT_CODE};
use bloom::error::ErrorCategory;
use bloom::logging::LogFile;
use bloom::monitor::StepState;
use bloom::step::catalog::demo_catalog;
use common::{valid_config, wait_for_phase, TestContext};
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::collections::BTreeMap;

async fn interactive(ctx: &TestContext) -> Result<ModeController> {
    let mut options = ControllerOptions::new(ctx.settings());
    options.log_file = Some(LogFile::new(ctx.log_path()));
    ModeController::bind(options, demo_catalog()).await
}

fn url(controller: &ModeController, path: &str) -> String {
    format!("http://{}{}", controller.local_addr(), path)
}

fn config_body(extra: &[(&str, Value)]) -> Value {
    let mut body = json!({
        "DOMAIN": "cluster.example.com",
        "SKIP_OS_CHECK": true,
        "DEMO_STEP_DELAY_MS": 0,
    });
    for (key, value) in extra {
        body[*key] = value.clone();
    }
    body
}

#[tokio::test]
async fn test_one_shot_success_never_serves_wizard() -> Result<()> {
    let ctx = TestContext::new()?.one_shot();
    let mut options = ControllerOptions::new(ctx.settings());
    options.prefilled = Some(valid_config().with("DEMO_STEP_DELAY_MS", 30));

    let controller = ModeController::bind(options, demo_catalog()).await?;
    let state = controller.state();
    let index = url(&controller, "/");
    let handle = tokio::spawn(controller.run());

    let client = reqwest::Client::new();
    while !handle.is_finished() {
        match client.get(&index).send().await {
            Ok(response) => {
                let body = response.text().await.unwrap_or_default();
                if !body.is_empty() {
                    assert!(!body.contains("Bloom - Configuration"));
                }
            }
            Err(_) => break,
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }

    let outcome = handle.await??;
    assert_eq!(outcome, Outcome::Succeeded);
    assert_eq!(outcome.exit_code(), 0);
    assert_eq!(state.phase(), Phase::Completed);

    let steps = state.monitor().steps();
    assert!(!steps.is_empty());
    assert!(steps
        .iter()
        .all(|s| matches!(s.state, StepState::Completed | StepState::Skipped)));
    assert!(ctx.config_path().exists());
    Ok(())
}

#[tokio::test]
async fn test_one_shot_invalid_config_never_runs() -> Result<()> {
    let ctx = TestContext::new()?.one_shot();
    let mut options = ControllerOptions::new(ctx.settings());
    options.prefilled = Some(bloom::config::ConfigSnapshot::from_pairs([(
        "SKIP_OS_CHECK",
        json!(true),
    )]));

    let controller = ModeController::bind(options, demo_catalog()).await?;
    let state = controller.state();
    let outcome = controller.run().await?;

    assert_eq!(outcome, Outcome::ConfigInvalid);
    assert_eq!(outcome.exit_code(), 2);
    assert!(state.monitor().steps().is_empty());
    assert_eq!(state.phase(), Phase::CollectingConfig);
    assert_eq!(state.validation_errors(), vec!["DOMAIN is required"]);
    assert!(!ctx.config_path().exists());
    assert!(!ctx.log_path().exists());
    Ok(())
}

#[tokio::test]
async fn test_one_shot_install_failure() -> Result<()> {
    let ctx = TestContext::new()?.one_shot();
    let mut options = ControllerOptions::new(ctx.settings());
    options.prefilled = Some(valid_config().with("DEMO_FAIL_STEP", "SetupRKE2Step"));

    let controller = ModeController::bind(options, demo_catalog()).await?;
    let state = controller.state();
    let outcome = controller.run().await?;

    assert_eq!(outcome, Outcome::InstallFailed);
    assert_eq!(state.phase(), Phase::Failed);
    let failed = state.monitor().step("SetupRKE2Step").unwrap();
    assert_eq!(failed.state, StepState::Failed);
    assert_eq!(
        state.monitor().step("FinalOutput").unwrap().state,
        StepState::Pending
    );
    Ok(())
}

#[tokio::test]
async fn test_interactive_submission_runs_installation() -> Result<()> {
    let ctx = TestContext::new()?;
    let controller = interactive(&ctx).await?;
    let state = controller.state();
    let shutdown = controller.shutdown_token();
    let client = reqwest::Client::new();
    let (index, config, steps, logs, variables, phase) = (
        url(&controller, "/"),
        url(&controller, "/api/config"),
        url(&controller, "/api/steps"),
        url(&controller, "/api/logs?limit=2&source=system"),
        url(&controller, "/api/variables"),
        url(&controller, "/api/phase"),
    );
    let handle = tokio::spawn(controller.run());

    let page = client.get(&index).send().await?.text().await?;
    assert!(page.contains("Bloom - Configuration"));
    let empty: BTreeMap<String, Value> = client.get(&steps).send().await?.json().await?;
    assert!(empty.is_empty());

    let response = client
        .post(&config)
        .json(&config_body(&[("GPU_NODE", json!(false))]))
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await?;
    assert_eq!(body["success"], true);
    assert_eq!(body["file"], "bloom.yaml");

    wait_for_phase(&state, Phase::Completed).await?;

    let statuses: BTreeMap<String, Value> = client.get(&steps).send().await?.json().await?;
    assert_eq!(statuses["SetupAndCheckRocmStep"]["status"], "skipped");
    assert_eq!(statuses["SetupRKE2Step"]["status"], "completed");
    assert_eq!(statuses["ValidateArgsStep"]["ordinal"], 1);

    let recent: Vec<Value> = client.get(&logs).send().await?.json().await?;
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[1]["message"], "All steps completed successfully!");
    assert_eq!(recent[1]["source"], "system");

    let vars: BTreeMap<String, Value> = client.get(&variables).send().await?.json().await?;
    assert_eq!(vars["installation_status"]["value"], "completed");
    assert_eq!(vars["total_steps"]["type"], "integer");
    assert!(vars.contains_key("app_version"));
    assert!(vars.contains_key("startup_time"));

    let current: Value = client.get(&phase).send().await?.json().await?;
    assert_eq!(current["phase"], "completed");

    let page = client.get(&index).send().await?.text().await?;
    assert!(page.contains("Bloom - Installation"));

    // Second submission outside CollectingConfig
    let response = client.post(&config).json(&config_body(&[])).send().await?;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    assert!(ctx.config_path().exists());
    assert!(ctx.log_path().exists());

    shutdown.cancel();
    let outcome = handle.await??;
    assert_eq!(
        outcome,
        Outcome::Stopped {
            phase: Phase::Completed,
            run_failed: false
        }
    );
    assert_eq!(outcome.exit_code(), 0);
    Ok(())
}

#[tokio::test]
async fn test_invalid_submission_is_rejected() -> Result<()> {
    let ctx = TestContext::new()?;
    let controller = interactive(&ctx).await?;
    let state = controller.state();
    let shutdown = controller.shutdown_token();
    let config = url(&controller, "/api/config");
    let handle = tokio::spawn(controller.run());

    let response = reqwest::Client::new()
        .post(&config)
        .json(&json!({ "FIRST_NODE": false }))
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await?;
    assert_eq!(body["success"], false);
    assert_eq!(body["errors"].as_array().map(Vec::len), Some(3));

    assert_eq!(state.phase(), Phase::CollectingConfig);
    assert!(!ctx.config_path().exists());

    shutdown.cancel();
    handle.await??;
    Ok(())
}

#[tokio::test]
async fn test_config_only_persists_without_installing() -> Result<()> {
    let ctx = TestContext::new()?;
    let controller = interactive(&ctx).await?;
    let state = controller.state();
    let shutdown = controller.shutdown_token();
    let (config_only, prefilled) = (
        url(&controller, "/api/config-only"),
        url(&controller, "/api/prefilled-config"),
    );
    let handle = tokio::spawn(controller.run());
    let client = reqwest::Client::new();

    let before: Value = client.get(&prefilled).send().await?.json().await?;
    assert_eq!(before["hasPrefilled"], false);
    assert_eq!(before["oneShot"], false);

    let response = client.post(&config_only).json(&config_body(&[])).send().await?;
    assert_eq!(response.status(), StatusCode::OK);

    let saved = std::fs::read_to_string(ctx.config_path())?;
    assert!(saved.contains("DOMAIN: cluster.example.com"));
    assert_eq!(state.phase(), Phase::CollectingConfig);
    assert!(state.monitor().steps().is_empty());
    assert!(!ctx.log_path().exists());

    let after: Value = client.get(&prefilled).send().await?.json().await?;
    assert_eq!(after["hasPrefilled"], true);
    assert_eq!(after["config"]["domain"], "cluster.example.com");

    shutdown.cancel();
    handle.await??;
    Ok(())
}

#[tokio::test]
async fn test_validation_error_report_is_logged() -> Result<()> {
    let ctx = TestContext::new()?;
    let controller = interactive(&ctx).await?;
    let state = controller.state();
    let shutdown = controller.shutdown_token();
    let (report, reconfigure) = (
        url(&controller, "/api/validation-error"),
        url(&controller, "/api/reconfigure"),
    );
    let handle = tokio::spawn(controller.run());
    let client = reqwest::Client::new();

    let body: Value = client
        .post(&report)
        .json(&json!({ "errors": ["DOMAIN is required"] }))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(body, json!({ "status": "error_logged" }));
    assert_eq!(state.validation_errors(), vec!["DOMAIN is required"]);
    assert_eq!(state.phase(), Phase::CollectingConfig);

    // Nothing to reconfigure yet
    let response = client.post(&reconfigure).send().await?;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    shutdown.cancel();
    let outcome = handle.await??;
    assert_eq!(
        outcome,
        Outcome::Stopped {
            phase: Phase::CollectingConfig,
            run_failed: false
        }
    );
    assert_eq!(outcome.exit_code(), 0);
    Ok(())
}

#[tokio::test]
async fn test_config_failure_returns_to_wizard() -> Result<()> {
    let ctx = TestContext::new()?;
    let controller = interactive(&ctx).await?;
    let state = controller.state();
    let shutdown = controller.shutdown_token();
    let (index, config, error) = (
        url(&controller, "/"),
        url(&controller, "/api/config"),
        url(&controller, "/api/error"),
    );
    let handle = tokio::spawn(controller.run());
    let client = reqwest::Client::new();

    let body = config_body(&[
        ("DEMO_FAIL_STEP", json!("SetupRKE2Step")),
        ("DEMO_FAIL_MESSAGE", json!("invalid config value RKE2_VERSION")),
    ]);
    client.post(&config).json(&body).send().await?;

    for _ in 0..500 {
        if state.last_error().is_some() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(state.phase(), Phase::CollectingConfig);

    let last: Value = client.get(&error).send().await?.json().await?;
    assert_eq!(last["error"], "invalid config value RKE2_VERSION");
    assert_eq!(last["errorType"], "config");

    let page = client.get(&index).send().await?.text().await?;
    assert!(page.contains("Bloom - Configuration"));

    // The corrected configuration can be submitted right away
    let response = client.post(&config).json(&config_body(&[])).send().await?;
    assert_eq!(response.status(), StatusCode::OK);
    wait_for_phase(&state, Phase::Completed).await?;

    shutdown.cancel();
    handle.await??;
    Ok(())
}

#[tokio::test]
async fn test_os_failure_stays_failed_until_reconfigure() -> Result<()> {
    let ctx = TestContext::new()?;
    let controller = interactive(&ctx).await?;
    let state = controller.state();
    let shutdown = controller.shutdown_token();
    let (config, error, reconfigure) = (
        url(&controller, "/api/config"),
        url(&controller, "/api/error"),
        url(&controller, "/api/reconfigure"),
    );
    let handle = tokio::spawn(controller.run());
    let client = reqwest::Client::new();

    let body = config_body(&[
        ("DEMO_FAIL_STEP", json!("InstallDependentPackagesStep")),
        (
            "DEMO_FAIL_MESSAGE",
            json!("this tool requires Ubuntu with one of these versions: 22.04"),
        ),
    ]);
    client.post(&config).json(&body).send().await?;
    wait_for_phase(&state, Phase::Failed).await?;

    let last: Value = client.get(&error).send().await?.json().await?;
    assert_eq!(last["errorType"], "os");

    let response = client.post(&config).json(&config_body(&[])).send().await?;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = client.post(&reconfigure).send().await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await?;
    let archived = body["archived"].as_str().unwrap_or_default().to_string();
    assert!(archived.contains("bloom-"));

    assert_eq!(state.phase(), Phase::CollectingConfig);
    assert!(state.monitor().steps().is_empty());
    assert!(!ctx.log_path().exists());
    assert_eq!(ctx.files_starting_with("bloom-").len(), 1);

    let cleared: Value = client.get(&error).send().await?.json().await?;
    assert_eq!(cleared["error"], "");

    // Saved configuration is offered again
    assert_eq!(
        state.prefilled().get_str("DOMAIN").as_deref(),
        Some("cluster.example.com")
    );

    shutdown.cancel();
    handle.await??;
    Ok(())
}

#[tokio::test]
async fn test_rejects_foreign_host_header() -> Result<()> {
    let ctx = TestContext::new()?;
    let controller = interactive(&ctx).await?;
    let shutdown = controller.shutdown_token();
    let phase = url(&controller, "/api/phase");
    let handle = tokio::spawn(controller.run());
    let client = reqwest::Client::new();

    let response = client
        .get(&phase)
        .header(reqwest::header::HOST, "attacker.example.com")
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = client.get(&phase).send().await?;
    assert_eq!(response.status(), StatusCode::OK);

    shutdown.cancel();
    handle.await??;
    Ok(())
}

#[tokio::test]
async fn test_monitoring_mode_shows_previous_run() -> Result<()> {
    let ctx = TestContext::new()?;
    ctx.write_file(
        "bloom.log",
        "\
2026-10-19T10:00:00Z  INFO bloom::orchestrator: Total steps to execute: 2
2026-10-19T10:00:01Z  INFO bloom::orchestrator: Starting step: Check OS
2026-10-19T10:00:02Z  INFO bloom::orchestrator: Completed in 1s
2026-10-19T10:00:03Z  INFO bloom::orchestrator: Starting step: Setup RKE2
2026-10-19T10:00:04Z ERROR bloom::orchestrator: Execution failed: rke2 server did not start
",
    )?;

    let mut options = ControllerOptions::new(ctx.settings());
    options.log_file = Some(LogFile::new(ctx.log_path()));
    options.monitor_existing_log = true;
    let controller = ModeController::bind(options, demo_catalog()).await?;
    let state = controller.state();
    let shutdown = controller.shutdown_token();
    let reconfigure = url(&controller, "/api/reconfigure");
    let handle = tokio::spawn(controller.run());

    wait_for_phase(&state, Phase::Failed).await?;
    let monitor = state.monitor();
    assert_eq!(monitor.steps().len(), demo_catalog().len());
    assert_eq!(
        monitor.step("CheckOsStep").map(|s| s.state),
        Some(StepState::Completed)
    );
    assert_eq!(
        monitor.step("SetupRKE2Step").map(|s| s.state),
        Some(StepState::Failed)
    );
    assert_eq!(
        monitor.step("FinalOutput").map(|s| s.state),
        Some(StepState::Pending)
    );
    assert!(monitor.step("Setup RKE2").is_none());
    assert_eq!(
        state.last_error().map(|e| e.message),
        Some("rke2 server did not start".to_string())
    );

    let response = reqwest::Client::new().post(&reconfigure).send().await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(state.phase(), Phase::CollectingConfig);
    assert_eq!(ctx.files_starting_with("bloom-").len(), 1);

    shutdown.cancel();
    handle.await??;
    Ok(())
}

#[tokio::test]
async fn test_monitoring_unfinished_run_can_be_reconfigured() -> Result<()> {
    let ctx = TestContext::new()?;
    ctx.write_file(
        "bloom.yaml",
        "DOMAIN: cluster.example.com\nDISABLED_STEPS: SetupMetallbStep\n",
    )?;
    ctx.write_file(
        "bloom.log",
        "\
2026-10-19T10:00:00Z  INFO bloom::orchestrator: Total steps to execute: 11
2026-10-19T10:00:01Z  INFO bloom::orchestrator: Starting step: Check OS
",
    )?;

    let mut options = ControllerOptions::new(ctx.settings());
    options.log_file = Some(LogFile::new(ctx.log_path()));
    options.monitor_existing_log = true;
    let controller = ModeController::bind(options, demo_catalog()).await?;
    let state = controller.state();
    let shutdown = controller.shutdown_token();
    let (config, reconfigure) = (
        url(&controller, "/api/config"),
        url(&controller, "/api/reconfigure"),
    );
    let handle = tokio::spawn(controller.run());
    let client = reqwest::Client::new();

    wait_for_phase(&state, Phase::Failed).await?;
    let monitor = state.monitor();
    assert_eq!(monitor.steps().len(), demo_catalog().len() - 1);
    assert!(monitor.step("SetupMetallbStep").is_none());
    assert_eq!(
        monitor.step("CheckOsStep").map(|s| s.state),
        Some(StepState::Running)
    );
    assert_eq!(
        state.last_error().map(|e| e.message),
        Some("previous installation did not finish".to_string())
    );

    let response = client.post(&reconfigure).send().await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(state.phase(), Phase::CollectingConfig);
    assert_eq!(ctx.files_starting_with("bloom-").len(), 1);

    let response = client.post(&config).json(&config_body(&[])).send().await?;
    assert_eq!(response.status(), StatusCode::OK);
    wait_for_phase(&state, Phase::Completed).await?;

    shutdown.cancel();
    handle.await??;
    Ok(())
}

#[tokio::test]
async fn test_one_shot_validation_report_ends_run() -> Result<()> {
    let ctx = TestContext::new()?.one_shot();
    let mut options = ControllerOptions::new(ctx.settings());
    options.prefilled = Some(valid_config().with("DEMO_STEP_DELAY_MS", 200));

    let controller = ModeController::bind(options, demo_catalog()).await?;
    let state = controller.state();
    let report = url(&controller, "/api/validation-error");
    let handle = tokio::spawn(controller.run());

    wait_for_phase(&state, Phase::Installing).await?;
    let response = reqwest::Client::new()
        .post(&report)
        .json(&json!({ "errors": ["CLUSTER_DISKS must not be empty"] }))
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await?;
    assert_eq!(body, json!({ "status": "error_logged" }));

    let outcome = handle.await??;
    assert_eq!(outcome, Outcome::ConfigInvalid);
    assert_eq!(outcome.exit_code(), 2);
    assert_eq!(state.phase(), Phase::Failed);
    assert_eq!(
        state.validation_errors(),
        vec!["CLUSTER_DISKS must not be empty"]
    );
    let last = state.last_error().unwrap();
    assert_eq!(last.category, ErrorCategory::Config);

    // The abandoned run stops before its next step
    tokio::time::sleep(std::time::Duration::from_millis(500)).await;
    assert_eq!(state.phase(), Phase::Failed);
    assert_eq!(
        state.monitor().step("FinalOutput").map(|s| s.state),
        Some(StepState::Pending)
    );
    Ok(())
}

#[tokio::test]
async fn test_stop_after_failed_run_exits_1() -> Result<()> {
    let ctx = TestContext::new()?;
    let controller = interactive(&ctx).await?;
    let state = controller.state();
    let shutdown = controller.shutdown_token();
    let config = url(&controller, "/api/config");
    let handle = tokio::spawn(controller.run());

    let body = config_body(&[("DEMO_FAIL_STEP", json!("SetupRKE2Step"))]);
    reqwest::Client::new().post(&config).json(&body).send().await?;
    wait_for_phase(&state, Phase::Failed).await?;

    shutdown.cancel();
    let outcome = handle.await??;
    assert_eq!(
        outcome,
        Outcome::Stopped {
            phase: Phase::Failed,
            run_failed: true
        }
    );
    assert_eq!(outcome.exit_code(), 1);
    Ok(())
}

#[tokio::test]
async fn test_stop_during_run_is_interrupted() -> Result<()> {
    let ctx = TestContext::new()?;
    let controller = interactive(&ctx).await?;
    let state = controller.state();
    let shutdown = controller.shutdown_token();
    let config = url(&controller, "/api/config");
    let handle = tokio::spawn(controller.run());

    let body = config_body(&[("DEMO_STEP_DELAY_MS", json!(200))]);
    let response = reqwest::Client::new().post(&config).json(&body).send().await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(state.phase(), Phase::Installing);
    for _ in 0..500 {
        if !state.monitor().steps().is_empty() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }

    shutdown.cancel();
    let outcome = handle.await??;
    assert_eq!(outcome.exit_code(), INTERRUPTED_EXIT_CODE);

    tokio::time::sleep(std::time::Duration::from_millis(500)).await;
    assert_eq!(
        state.monitor().step("FinalOutput").map(|s| s.state),
        Some(StepState::Pending)
    );
    Ok(())
}

#[tokio::test]
async fn test_concurrent_submissions_accept_one() -> Result<()> {
    let ctx = TestContext::new()?;
    let controller = interactive(&ctx).await?;
    let state = controller.state();
    let shutdown = controller.shutdown_token();
    let config = url(&controller, "/api/config");
    let handle = tokio::spawn(controller.run());
    let client = reqwest::Client::new();

    let first = config_body(&[("DOMAIN", json!("first.example.com"))]);
    let second = config_body(&[("DOMAIN", json!("second.example.com"))]);
    let (a, b) = tokio::join!(
        client.post(&config).json(&first).send(),
        client.post(&config).json(&second).send(),
    );
    let (a, b) = (a?.status(), b?.status());

    let mut statuses = vec![a.as_u16(), b.as_u16()];
    statuses.sort_unstable();
    assert_eq!(statuses, vec![200, 409]);

    let winner = if a == StatusCode::OK {
        "first.example.com"
    } else {
        "second.example.com"
    };
    let saved = std::fs::read_to_string(ctx.config_path())?;
    assert!(saved.contains(&format!("DOMAIN: {}", winner)));
    assert_eq!(
        state.config_store().load().get_str("DOMAIN").as_deref(),
        Some(winner)
    );
    wait_for_phase(&state, Phase::Completed).await?;

    shutdown.cancel();
    handle.await??;
    Ok(())
}
