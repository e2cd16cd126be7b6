//! Release compatibility gate between the Helm chart and this binary.

use crate::error::{ChartreuseError, Result};
use tracing::info;

/// Version of this orchestrator
pub const ORCHESTRATOR_VERSION: &str = env!("CARGO_PKG_VERSION");

/// `major.minor` of a dotted version string, compared as text
fn major_minor(version: &str) -> String {
    version.split('.').take(2).collect::<Vec<_>>().join(".")
}

/// Refuse to run when the chart and the orchestrator disagree on `major.minor`
///
/// Patch versions may differ freely. Must run before any database or Kubernetes I/O.
pub fn ensure_safe_run(packaging_version: &str, orchestrator_version: &str) -> Result<()> {
    let packaging_version = packaging_version.trim();
    if packaging_version.is_empty() {
        return Err(ChartreuseError::config(
            "Helm chart version is not set (HELM_CHART_VERSION), cannot check compatibility, ABORTING!",
        ));
    }

    let packaging_major_minor = major_minor(packaging_version);
    let orchestrator_major_minor = major_minor(orchestrator_version);
    if packaging_major_minor != orchestrator_major_minor {
        return Err(ChartreuseError::CompatibilityMismatch {
            packaging_version: packaging_version.to_string(),
            orchestrator_version: orchestrator_version.to_string(),
            packaging_major_minor,
            orchestrator_major_minor,
        });
    }

    info!(
        chart_version = %packaging_version,
        chartreuse_version = %orchestrator_version,
        "Helm chart and chartreuse versions are compatible"
    );
    Ok(())
}
