//! Trust Scorer: a per-agent score in [0, 100] derived purely from the
//! Action Store's history (spec.md 4.4). Grounded on the teacher's
//! read-only derivation functions (`TradeContext::current_state`,
//! `requires_approval`) generalized from a single trade's witness_set to
//! an agent's whole action history.

pub mod anomaly;

use serde::Serialize;

use crate::action_store::{ActionStore, ActionType, TaskStatus};
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TrustLevel {
    Untrusted,
    Low,
    Medium,
    High,
    Verified,
}

impl TrustLevel {
    pub fn from_score(score: u32) -> Self {
        match score {
            0..=19 => TrustLevel::Untrusted,
            20..=39 => TrustLevel::Low,
            40..=59 => TrustLevel::Medium,
            60..=79 => TrustLevel::High,
            _ => TrustLevel::Verified,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FactorBreakdown {
    pub history_depth: f64,
    pub task_completion_rate: f64,
    pub anomaly_frequency: f64,
    pub transaction_consistency: f64,
    pub compliance_adherence: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrustScore {
    pub agent_id: String,
    pub score: u32,
    pub level: TrustLevel,
    pub factors: FactorBreakdown,
}

const WEIGHT_HISTORY_DEPTH: f64 = 0.15;
const WEIGHT_TASK_COMPLETION: f64 = 0.25;
const WEIGHT_ANOMALY_FREQUENCY: f64 = 0.25;
const WEIGHT_TRANSACTION_CONSISTENCY: f64 = 0.20;
const WEIGHT_COMPLIANCE_ADHERENCE: f64 = 0.15;

pub struct TrustScorer;

impl TrustScorer {
    pub fn score(store: &ActionStore, agent_id: &str) -> TrustScore {
        let actions = store.actions_by_agent(agent_id);
        let transactions = store.transactions_by_agent(agent_id);
        let anomalies = store.anomalies_by_agent(agent_id);
        let tasks: Vec<_> = store
            .all_tasks()
            .into_iter()
            .filter(|t| t.agent_id == agent_id)
            .collect();

        let history_depth = history_depth_factor(actions.len());
        let task_completion_rate = task_completion_factor(&tasks);
        let anomaly_frequency = anomaly_frequency_factor(actions.len(), &anomalies);
        let transaction_consistency = transaction_consistency_factor(&transactions);
        let compliance_adherence = compliance_adherence_factor(&actions);

        let weighted = history_depth * WEIGHT_HISTORY_DEPTH
            + task_completion_rate * WEIGHT_TASK_COMPLETION
            + anomaly_frequency * WEIGHT_ANOMALY_FREQUENCY
            + transaction_consistency * WEIGHT_TRANSACTION_CONSISTENCY
            + compliance_adherence * WEIGHT_COMPLIANCE_ADHERENCE;

        let score = weighted.round().clamp(0.0, 100.0) as u32;

        TrustScore {
            agent_id: agent_id.to_string(),
            score,
            level: TrustLevel::from_score(score),
            factors: FactorBreakdown {
                history_depth,
                task_completion_rate,
                anomaly_frequency,
                transaction_consistency,
                compliance_adherence,
            },
        }
    }
}

fn history_depth_factor(action_count: usize) -> f64 {
    (action_count as f64 * 2.0).min(100.0)
}

fn task_completion_factor(tasks: &[crate::action_store::Task]) -> f64 {
    let confirmed = tasks.iter().filter(|t| t.status == TaskStatus::Confirmed).count();
    let failed = tasks.iter().filter(|t| t.status == TaskStatus::Failed).count();
    let expired = tasks.iter().filter(|t| t.status == TaskStatus::Expired).count();
    let denom = confirmed + failed + expired;
    if denom == 0 {
        return 50.0;
    }
    100.0 * confirmed as f64 / denom as f64
}

fn anomaly_severity_weight(severity: crate::action_store::Severity) -> f64 {
    use crate::action_store::Severity::*;
    match severity {
        Low => 1.0,
        Medium => 3.0,
        High => 7.0,
        Critical => 15.0,
    }
}

fn anomaly_frequency_factor(action_count: usize, anomalies: &[crate::action_store::AnomalyEvent]) -> f64 {
    if action_count == 0 {
        return 100.0;
    }
    let weighted: f64 = anomalies.iter().map(|a| anomaly_severity_weight(a.severity)).sum();
    (100.0 - (weighted / action_count as f64) * 100.0).max(0.0)
}

fn transaction_consistency_factor(transactions: &[crate::action_store::Action]) -> f64 {
    let amounts: Vec<f64> = transactions
        .iter()
        .filter_map(|a| a.transaction.as_ref())
        .map(|t| t.amount.as_decimal())
        .map(|d| d.to_string().parse::<f64>().unwrap_or(0.0))
        .collect();

    if amounts.len() < 3 {
        return 50.0;
    }

    let mean = amounts.iter().sum::<f64>() / amounts.len() as f64;
    if mean == 0.0 {
        return 50.0;
    }
    let variance = amounts.iter().map(|a| (a - mean).powi(2)).sum::<f64>() / amounts.len() as f64;
    let stddev = variance.sqrt();
    let cv = stddev / mean;

    (100.0 / (1.0 + cv)).clamp(0.0, 100.0)
}

/// Walks `compliance_check` actions' metadata (populated by the Verify
/// Orchestrator via [`crate::compliance::ComplianceVerdict::to_value`])
/// and counts passed vs. total checks across the agent's history.
fn compliance_adherence_factor(actions: &[crate::action_store::Action]) -> f64 {
    let mut passed = 0u64;
    let mut total = 0u64;

    for action in actions {
        if action.action_type != ActionType::ComplianceCheck {
            continue;
        }
        let Some(Value::Map(verdict)) = action.metadata.get("verdict") else {
            continue;
        };
        let Some(Value::List(checks)) = verdict.get("checks") else {
            continue;
        };
        for check in checks {
            if let Value::Map(check) = check {
                total += 1;
                if matches!(check.get("passed"), Some(Value::Bool(true))) {
                    passed += 1;
                }
            }
        }
    }

    if total == 0 {
        return 100.0;
    }
    100.0 * passed as f64 / total as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action_store::{Action, ActionType, TransactionFields};
    use crate::decimal::Amount;

    #[test]
    fn empty_history_yields_neutral_defaults() {
        let store = ActionStore::new();
        let trust = TrustScorer::score(&store, "agent-1");
        assert!(trust.score <= 100);
        assert_eq!(trust.factors.task_completion_rate, 50.0);
        assert_eq!(trust.factors.transaction_consistency, 50.0);
        assert_eq!(trust.factors.compliance_adherence, 100.0);
    }

    #[test]
    fn history_depth_saturates_at_fifty_actions() {
        assert_eq!(history_depth_factor(50), 100.0);
        assert_eq!(history_depth_factor(100), 100.0);
        assert_eq!(history_depth_factor(10), 20.0);
    }

    #[test]
    fn score_is_idempotent_over_identical_history() {
        let mut store = ActionStore::new();
        for i in 0..5 {
            store
                .add_action(Action::new(
                    format!("a{i}"),
                    "proj",
                    "agent-1",
                    ActionType::Reasoning,
                    "thinking",
                ))
                .unwrap();
        }
        let first = TrustScorer::score(&store, "agent-1");
        let second = TrustScorer::score(&store, "agent-1");
        assert_eq!(first.score, second.score);
    }

    #[test]
    fn transaction_consistency_rewards_uniform_amounts() {
        let mut store = ActionStore::new();
        for i in 0..5 {
            let tx = TransactionFields {
                tx_hash: Some(format!("0x{i}")),
                chain: "base".to_string(),
                amount: Amount::parse("100").unwrap(),
                token: "USDC".to_string(),
                from: "0xaaa".to_string(),
                to: "0xbbb".to_string(),
            };
            store
                .add_transaction(
                    Action::new(format!("tx{i}"), "proj", "agent-1", ActionType::Transaction, "transfer"),
                    tx,
                )
                .unwrap();
        }
        let trust = TrustScorer::score(&store, "agent-1");
        assert_eq!(trust.factors.transaction_consistency, 100.0);
    }

    #[test]
    fn score_bounded_in_0_to_100() {
        let store = ActionStore::new();
        let trust = TrustScorer::score(&store, "agent-1");
        assert!(trust.score <= 100);
    }
}
