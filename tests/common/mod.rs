//! Common test utilities and helpers
#![allow(dead_code)]

use anyhow::Result;
use bloom::config::{ConfigSnapshot, Settings};
use bloom::controller::{ControllerState, Phase};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Temporary working directory plus settings pointing at it
pub struct TestContext {
    temp_dir: TempDir,
    settings: Settings,
}

impl TestContext {
    pub fn new() -> Result<Self> {
        let temp_dir = TempDir::new()?;
        let mut settings = Settings::new(temp_dir.path());
        // Port 0 lets the OS pick a free loopback port
        settings.base_port = 0;
        settings.fixed_port = true;
        settings.step_delay = Duration::ZERO;
        Ok(Self { temp_dir, settings })
    }

    pub fn one_shot(mut self) -> Self {
        self.settings.one_shot = true;
        self
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn settings(&self) -> Settings {
        self.settings.clone()
    }

    pub fn log_path(&self) -> PathBuf {
        self.settings.log_path()
    }

    pub fn config_path(&self) -> PathBuf {
        self.settings.config_path()
    }

    pub fn write_file(&self, name: &str, content: &str) -> Result<PathBuf> {
        let path = self.path().join(name);
        std::fs::write(&path, content)?;
        Ok(path)
    }

    /// Files in the working directory whose name starts with `prefix`
    pub fn files_starting_with(&self, prefix: &str) -> Vec<String> {
        std::fs::read_dir(self.path())
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .filter_map(|e| e.file_name().to_str().map(str::to_string))
                    .filter(|name| name.starts_with(prefix))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// A configuration the demo catalog runs through quickly on any host
pub fn valid_config() -> ConfigSnapshot {
    ConfigSnapshot::from_pairs([
        ("DOMAIN", json!("cluster.example.com")),
        ("SKIP_OS_CHECK", json!(true)),
        ("DEMO_STEP_DELAY_MS", json!(0)),
    ])
}

pub const VALID_CONFIG_YAML: &str = "\
DOMAIN: cluster.example.com
SKIP_OS_CHECK: true
DEMO_STEP_DELAY_MS: 0
";

/// Poll until the controller reaches `phase`
pub async fn wait_for_phase(state: &Arc<ControllerState>, phase: Phase) -> Result<()> {
    for _ in 0..500 {
        if state.phase() == phase {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    anyhow::bail!("timed out waiting for {:?}, still {:?}", phase, state.phase())
}
