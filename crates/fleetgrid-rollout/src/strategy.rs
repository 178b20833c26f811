//! Update options and staged rollout plans.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use fleet_core::config::RolloutConfig;

use crate::error::{OrchestratorError, OrchestratorResult};

/// Options for a single-entity or bulk update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateOptions {
    /// Container image for the new version. Defaults to the entity's image.
    #[serde(default)]
    pub image: Option<String>,
    /// Skip the parked-mode requirement.
    #[serde(default)]
    pub force: bool,
}

impl UpdateOptions {
    pub fn forced() -> Self {
        Self {
            force: true,
            ..Default::default()
        }
    }

    pub fn with_image(mut self, image: &str) -> Self {
        self.image = Some(image.to_string());
        self
    }
}

/// A staged rollout: regions updated one after another, aborting and
/// rolling back the failing region when its success rate drops below
/// `success_threshold`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RolloutPlan {
    /// Region selectors, processed in order.
    pub phases: Vec<String>,
    pub version: String,
    #[serde(default)]
    pub image: Option<String>,
    /// Minimum fraction of a phase that must succeed, in `[0, 1]`.
    pub success_threshold: f64,
    /// Pause between phases, in milliseconds.
    pub wait_ms: u64,
}

impl RolloutPlan {
    /// A plan using the configured threshold and wait.
    pub fn new(phases: &[&str], version: &str, config: &RolloutConfig) -> Self {
        Self {
            phases: phases.iter().map(|p| p.to_string()).collect(),
            version: version.to_string(),
            image: None,
            success_threshold: config.success_threshold,
            wait_ms: config.wait_ms,
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.success_threshold = threshold;
        self
    }

    pub fn with_wait(mut self, wait: Duration) -> Self {
        self.wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_image(mut self, image: &str) -> Self {
        self.image = Some(image.to_string());
        self
    }

    pub fn wait(&self) -> Duration {
        Duration::from_millis(self.wait_ms)
    }

    pub fn update_options(&self) -> UpdateOptions {
        UpdateOptions {
            image: self.image.clone(),
            force: false,
        }
    }

    /// Reject malformed plans before anything is touched.
    pub fn validate(&self) -> OrchestratorResult<()> {
        validate_version(&self.version)?;
        if self.phases.is_empty() {
            return Err(OrchestratorError::InvalidRequest(
                "rollout needs at least one phase".into(),
            ));
        }
        if let Some(blank) = self.phases.iter().find(|p| p.trim().is_empty()) {
            return Err(OrchestratorError::InvalidRequest(format!(
                "invalid phase selector {blank:?}"
            )));
        }
        if !(0.0..=1.0).contains(&self.success_threshold) {
            return Err(OrchestratorError::InvalidRequest(format!(
                "success threshold {} is outside [0, 1]",
                self.success_threshold
            )));
        }
        Ok(())
    }
}

pub(crate) fn validate_version(version: &str) -> OrchestratorResult<()> {
    if version.trim().is_empty() {
        return Err(OrchestratorError::InvalidRequest(
            "version must not be empty".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_takes_configured_defaults() {
        let plan = RolloutPlan::new(&["Munich", "Berlin"], "2.0.0", &RolloutConfig::default());
        assert_eq!(plan.success_threshold, 0.8);
        assert_eq!(plan.wait(), Duration::from_millis(300_000));
        assert!(plan.validate().is_ok());
    }

    #[test]
    fn threshold_outside_unit_interval_rejected() {
        let base = RolloutPlan::new(&["Munich"], "2.0.0", &RolloutConfig::default());
        for bad in [-0.1, 1.5, f64::NAN] {
            let err = base.clone().with_threshold(bad).validate().unwrap_err();
            assert!(matches!(err, OrchestratorError::InvalidRequest(_)), "{bad}");
        }
        assert!(base.clone().with_threshold(0.0).validate().is_ok());
        assert!(base.with_threshold(1.0).validate().is_ok());
    }

    #[test]
    fn empty_phases_or_version_rejected() {
        let config = RolloutConfig::default();
        assert!(RolloutPlan::new(&[], "2.0.0", &config).validate().is_err());
        assert!(RolloutPlan::new(&["Munich"], " ", &config).validate().is_err());
        assert!(RolloutPlan::new(&["Munich", ""], "2.0.0", &config).validate().is_err());
    }

    #[test]
    fn options_deserialize_with_defaults() {
        let opts: UpdateOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(opts, UpdateOptions::default());
        let opts: UpdateOptions = serde_json::from_str(r#"{"force":true}"#).unwrap();
        assert!(opts.force);
    }
}
