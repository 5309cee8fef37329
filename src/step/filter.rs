//! Enabled-step computation
//!
//! Pure functions with no side effects. Unknown ids in either list are simply
//! ineffective; spelling is checked by the configuration validator.

use super::Step;

/// Reduce the catalog to the steps that should run, preserving catalog order.
///
/// Ids in `disable_list` are always excluded. When `enable_list` is non-empty
/// only ids present in it survive.
pub fn compute_enabled_steps(
    catalog: &[Step],
    disable_list: &[String],
    enable_list: &[String],
) -> Vec<Step> {
    catalog
        .iter()
        .filter(|step| !disable_list.iter().any(|id| id == step.id()))
        .filter(|step| enable_list.is_empty() || enable_list.iter().any(|id| id == step.id()))
        .cloned()
        .collect()
}

/// Split a comma-separated step list, dropping blanks.
pub fn parse_step_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
