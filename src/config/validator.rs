//! Minimal checks run before a configuration is accepted.
//!
//! Every message produced here classifies as a configuration error.

use std::net::IpAddr;

use super::ConfigSnapshot;

/// All problems found in `config`, empty when it is acceptable.
///
/// `known_steps` is the catalog the step lists are checked against.
pub fn validate(config: &ConfigSnapshot, known_steps: &[String]) -> Vec<String> {
    let mut errors = Vec::new();

    if !config.is_set("DOMAIN") {
        errors.push("DOMAIN is required".to_string());
    }

    if !config.get_bool("FIRST_NODE", true) {
        if !config.is_set("SERVER_IP") {
            errors.push("SERVER_IP is required when FIRST_NODE is false".to_string());
        }
        if !config.is_set("JOIN_TOKEN") {
            errors.push("JOIN_TOKEN is required when FIRST_NODE is false".to_string());
        }
    }

    if let Some(ip) = config.get_str("SERVER_IP").filter(|ip| !ip.trim().is_empty()) {
        if ip.trim().parse::<IpAddr>().is_err() {
            errors.push(format!("invalid SERVER_IP '{}': not an IP address", ip));
        }
    }

    let disabled = config.get_list("DISABLED_STEPS");
    let enabled = config.get_list("ENABLED_STEPS");
    if !disabled.is_empty() && !enabled.is_empty() {
        errors.push(
            "invalid configuration: DISABLED_STEPS and ENABLED_STEPS cannot both be set"
                .to_string(),
        );
    }

    for (key, ids) in [("DISABLED_STEPS", &disabled), ("ENABLED_STEPS", &enabled)] {
        for id in ids.iter().filter(|id| !known_steps.contains(id)) {
            errors.push(format!("invalid step name '{}' in {}", id, key));
        }
    }

    errors
}
