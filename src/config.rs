//! Context configuration: supported chains/tokens, anomaly thresholds,
//! and the approval threshold, loaded at construction and swapped only
//! through [`crate::orchestrator::Context::reconfigure`] (spec.md 5:
//! "read-mostly ... loaded at context construction and treated as
//! immutable until a new reconfigure call").

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::compliance::ComplianceConfig;
use crate::trust::anomaly::AnomalyConfig;

/// Named gate the orchestrator checks for the one feature it owns
/// directly (extended-chain support); broader plan gating belongs to an
/// adapter, not this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlanTier {
    Free,
    Pro,
    Enterprise,
}

impl PlanTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanTier::Free => "free",
            PlanTier::Pro => "pro",
            PlanTier::Enterprise => "enterprise",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ContextConfig {
    pub compliance: ComplianceConfig,
    pub anomaly: AnomalyConfig,
    /// Step 8 of the Verify Orchestrator: amounts strictly above this
    /// create a pending Task and set `requiresApproval=true`. `None`
    /// disables the approval-gating step entirely.
    pub approval_threshold: Option<Decimal>,
    pub plan_tier: PlanTier,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            compliance: ComplianceConfig::default(),
            anomaly: AnomalyConfig::default(),
            approval_threshold: Some(Decimal::from(25_000)),
            plan_tier: PlanTier::Free,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_an_approval_threshold() {
        let config = ContextConfig::default();
        assert!(config.approval_threshold.is_some());
        assert_eq!(config.plan_tier.as_str(), "free");
    }
}
