//! Built-in demo catalog.
//!
//! Real provisioning actions live outside this crate. The demo steps keep
//! their ids and skip rules but only simulate the work, which makes the whole
//! flow runnable on any machine.
//!
//! Knobs read from the configuration:
//! - `DEMO_STEP_DELAY_MS`: simulated work per step (default 1000)
//! - `DEMO_FAIL_STEP`: id of a step that should fail
//! - `DEMO_FAIL_MESSAGE`: error text used for that failure

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use super::{Step, StepAction, StepContext, StepError, StepResult};
use crate::config::{validate, ConfigSnapshot};

const DEFAULT_DEMO_DELAY_MS: u64 = 1000;
const SUPPORTED_UBUNTU_VERSIONS: &[&str] = &["20.04", "22.04", "24.04"];

type SkipRule = fn(&ConfigSnapshot) -> bool;
type MessageRule = fn(&ConfigSnapshot) -> Option<String>;

/// The catalog in execution order.
pub fn demo_catalog() -> Vec<Step> {
    let mut steps = vec![Step::new(
        "CheckOsStep",
        "Check OS",
        "Verify running on a supported Ubuntu version",
        CheckOsStep::default(),
    )];

    steps.extend(
        [
            simulated(
                "InstallDependentPackagesStep",
                "Install Packages",
                "Install required packages",
                "Installing dependent packages",
            ),
            simulated(
                "OpenPortsStep",
                "Open Ports",
                "Open the ports required by the cluster",
                "Adding firewall rules",
            ),
            simulated(
                "InotifyInstancesStep",
                "Inotify Configuration",
                "Raise the number of inotify instances",
                "Configuring number of dir/file watchers",
            ),
            simulated(
                "SetupAndCheckRocmStep",
                "Setup ROCm",
                "Install and verify ROCm on GPU nodes",
                "Installing and checking ROCm",
            )
            .skip_when(|config| !config.get_bool("GPU_NODE", true)),
            simulated(
                "SelectDrivesStep",
                "Select Drives",
                "Choose the disks used for cluster storage",
                "Scanning block devices",
            )
            .skip_when(|config| config.get_bool("NO_DISKS_FOR_CLUSTER", false))
            .report(|config| {
                let disks = config.get_list("CLUSTER_DISKS");
                let disks = if disks.is_empty() {
                    "none".to_string()
                } else {
                    disks.join(", ")
                };
                Some(format!("Selected disks: {}", disks))
            }),
            simulated(
                "SetupRKE2Step",
                "Setup RKE2",
                "Install RKE2 and join or create the cluster",
                "Installing RKE2",
            ),
            simulated(
                "SetupLonghornStep",
                "Setup Longhorn",
                "Prepare Longhorn storage nodes",
                "Installing Longhorn nodes",
            )
            .skip_when(|config| config.get_bool("NO_DISKS_FOR_CLUSTER", false)),
            simulated(
                "SetupMetallbStep",
                "Setup MetalLB",
                "Configure the MetalLB address pool",
                "Configuring MetalLB",
            )
            .skip_when(|config| !config.get_bool("FIRST_NODE", true)),
            simulated(
                "CreateDomainConfigStep",
                "Create Domain Config",
                "Write the cluster domain configuration",
                "Writing domain configuration",
            )
            .skip_when(|config| !config.get_bool("FIRST_NODE", true)),
            simulated(
                "FinalOutput",
                "Final Output",
                "Summarize the installation",
                "Collecting cluster details",
            )
            .report(|config| {
                config
                    .get_str("DOMAIN")
                    .map(|domain| format!("Cluster available at https://{}", domain))
            }),
        ]
        .into_iter()
        .map(SimulatedStep::into_step),
    );

    let ids = super::step_ids(&steps);
    let mut catalog = Vec::with_capacity(steps.len() + 1);
    catalog.push(Step::new(
        "ValidateArgsStep",
        "Validate Configuration",
        "Check the configuration before changing the host",
        ValidateArgsStep::new(ids),
    ));
    catalog.extend(steps);
    catalog
}

/// Fails the run early when the published configuration is not acceptable.
pub struct ValidateArgsStep {
    known_steps: Vec<String>,
}

impl ValidateArgsStep {
    pub fn new(mut known_steps: Vec<String>) -> Self {
        known_steps.push("ValidateArgsStep".to_string());
        Self { known_steps }
    }
}

#[async_trait]
impl StepAction for ValidateArgsStep {
    async fn run(&self, ctx: &StepContext) -> StepResult {
        let errors = validate(ctx.config(), &self.known_steps);
        if errors.is_empty() {
            StepResult::with_message("Configuration is valid")
        } else {
            StepResult::failed(StepError::new(format!(
                "invalid configuration: {}",
                errors.join("; ")
            )))
        }
    }
}

pub struct CheckOsStep {
    release_file: PathBuf,
}

impl Default for CheckOsStep {
    fn default() -> Self {
        Self::with_release_file("/etc/os-release")
    }
}

impl CheckOsStep {
    pub fn with_release_file(path: impl Into<PathBuf>) -> Self {
        Self {
            release_file: path.into(),
        }
    }

    async fn check(&self) -> Result<String, StepError> {
        let content = tokio::fs::read_to_string(&self.release_file)
            .await
            .map_err(|e| {
                StepError::new(format!(
                    "could not read {}: {}",
                    self.release_file.display(),
                    e
                ))
            })?;

        let id = os_release_field(&content, "ID").unwrap_or_default();
        let version = os_release_field(&content, "VERSION_ID").unwrap_or_default();
        debug!(id = %id, version = %version, "Parsed os-release");

        if id != "ubuntu" || !SUPPORTED_UBUNTU_VERSIONS.contains(&version.as_str()) {
            return Err(StepError::new(format!(
                "this tool requires Ubuntu with one of these versions: {} (found {} {})",
                SUPPORTED_UBUNTU_VERSIONS.join(", "),
                id,
                version
            )));
        }
        Ok(format!("Ubuntu {} is supported", version))
    }
}

#[async_trait]
impl StepAction for CheckOsStep {
    async fn run(&self, _ctx: &StepContext) -> StepResult {
        match self.check().await {
            Ok(message) => StepResult::with_message(message),
            Err(e) => StepResult::failed(e),
        }
    }

    fn should_skip(&self, ctx: &StepContext) -> bool {
        ctx.config().get_bool("SKIP_OS_CHECK", false)
    }
}

fn os_release_field(content: &str, key: &str) -> Option<String> {
    content.lines().find_map(|line| {
        let (k, v) = line.split_once('=')?;
        (k.trim() == key).then(|| v.trim().trim_matches('"').to_string())
    })
}

/// A catalog entry that only pretends to provision.
pub struct SimulatedStep {
    id: &'static str,
    name: &'static str,
    description: &'static str,
    activity: &'static str,
    skip: Option<SkipRule>,
    report: Option<MessageRule>,
}

fn simulated(
    id: &'static str,
    name: &'static str,
    description: &'static str,
    activity: &'static str,
) -> SimulatedStep {
    SimulatedStep {
        id,
        name,
        description,
        activity,
        skip: None,
        report: None,
    }
}

impl SimulatedStep {
    fn skip_when(mut self, rule: SkipRule) -> Self {
        self.skip = Some(rule);
        self
    }

    fn report(mut self, rule: MessageRule) -> Self {
        self.report = Some(rule);
        self
    }

    fn into_step(self) -> Step {
        let (id, name, description) = (self.id, self.name, self.description);
        Step::new(id, name, description, self)
    }
}

#[async_trait]
impl StepAction for SimulatedStep {
    async fn run(&self, ctx: &StepContext) -> StepResult {
        let config = ctx.config();
        info!("{}", self.activity);

        let delay = config
            .get_u64("DEMO_STEP_DELAY_MS")
            .unwrap_or(DEFAULT_DEMO_DELAY_MS);
        tokio::time::sleep(Duration::from_millis(delay)).await;

        if config.get_str("DEMO_FAIL_STEP").as_deref() == Some(self.id) {
            let message = config
                .get_str("DEMO_FAIL_MESSAGE")
                .unwrap_or_else(|| format!("simulated failure in {}", self.id));
            return StepResult::failed(StepError::new(message));
        }

        match self.report.and_then(|report| report(config)) {
            Some(message) => StepResult::with_message(message),
            None => StepResult::ok(),
        }
    }

    fn should_skip(&self, ctx: &StepContext) -> bool {
        self.skip.is_some_and(|rule| rule(ctx.config()))
    }
}
