use std::path::PathBuf;
use std::time::Duration;

/// First port tried for the web interface.
pub const DEFAULT_PORT: u16 = 62078;
/// Number of consecutive ports scanned before giving up.
pub const PORT_SCAN_RANGE: u16 = 100;

/// Runtime settings of the application itself, as opposed to the
/// provisioning configuration the steps consume.
#[derive(Debug, Clone)]
pub struct Settings {
    pub work_dir: PathBuf,
    pub log_file: String,
    pub config_file: String,
    pub base_port: u16,
    /// Fail instead of scanning when the operator asked for a specific port.
    pub fixed_port: bool,
    pub step_delay: Duration,
    pub one_shot: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("."),
            log_file: "bloom.log".to_string(),
            config_file: "bloom.yaml".to_string(),
            base_port: DEFAULT_PORT,
            fixed_port: false,
            step_delay: Duration::from_millis(500),
            one_shot: false,
        }
    }
}

impl Settings {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            ..Self::default()
        }
    }

    pub fn merge_env_vars(&mut self) {
        self.merge_from(|key| std::env::var(key).ok());
    }

    pub fn merge_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(port) = lookup("BLOOM_PORT").and_then(|v| v.parse::<u16>().ok()) {
            self.base_port = port;
            self.fixed_port = true;
        }

        if let Some(ms) = lookup("BLOOM_STEP_DELAY_MS").and_then(|v| v.parse::<u64>().ok()) {
            self.step_delay = Duration::from_millis(ms);
        }

        if let Some(dir) = lookup("BLOOM_WORK_DIR") {
            self.work_dir = PathBuf::from(dir);
        }

        if let Some(one_shot) = lookup("BLOOM_ONE_SHOT").and_then(|v| v.parse::<bool>().ok()) {
            self.one_shot = one_shot;
        }
    }

    pub fn log_path(&self) -> PathBuf {
        self.work_dir.join(&self.log_file)
    }

    pub fn config_path(&self) -> PathBuf {
        self.work_dir.join(&self.config_file)
    }

    /// Ports to try, in order.
    pub fn candidate_ports(&self) -> std::ops::Range<u16> {
        if self.fixed_port {
            self.base_port..self.base_port.saturating_add(1)
        } else {
            self.base_port..self.base_port.saturating_add(PORT_SCAN_RANGE)
        }
    }
}
