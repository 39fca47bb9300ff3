//! Trust Scorer and Anomaly Detector tests (spec.md 8): score bounds,
//! idempotency, and the "no anomaly without history" monotonicity
//! property for rules that require prior transactions.

use std::collections::BTreeSet;

use rust_decimal::Decimal;

use chrono::{TimeZone, Utc};

use kontext_core::action_store::{Action, ActionStore, ActionType, Severity, TransactionFields};
use kontext_core::decimal::Amount;
use kontext_core::timestamp::PreciseTimestamp;
use kontext_core::trust::anomaly::{AnomalyConfig, AnomalyDetector};
use kontext_core::trust::TrustScorer;

fn transaction(id: &str, agent: &str, amount: &str, to: &str, sequence: u64) -> Action {
    let mut action = Action::new(id, "proj", agent, ActionType::Transaction, "transfer").with_transaction(
        TransactionFields {
            tx_hash: Some(format!("0x{id}")),
            chain: "base".to_string(),
            amount: Amount::parse(amount).unwrap(),
            token: "USDC".to_string(),
            from: "0xaaa".to_string(),
            to: to.to_string(),
        },
    );
    action.sequence = sequence;
    action
}

fn rules_only(names: &[&'static str]) -> BTreeSet<&'static str> {
    names.iter().copied().collect()
}

#[test]
fn trust_score_is_bounded_and_idempotent() {
    let mut store = ActionStore::new();
    for i in 0..12 {
        store
            .add_action(Action::new(format!("a{i}"), "proj", "agent-1", ActionType::Reasoning, "thinking"))
            .unwrap();
    }
    let first = TrustScorer::score(&store, "agent-1");
    let second = TrustScorer::score(&store, "agent-1");
    assert!(first.score <= 100);
    assert_eq!(first.score, second.score);
}

#[test]
fn fresh_agent_gets_neutral_defaults_not_penalized() {
    let store = ActionStore::new();
    let trust = TrustScorer::score(&store, "brand-new-agent");
    assert_eq!(trust.factors.task_completion_rate, 50.0);
    assert_eq!(trust.factors.transaction_consistency, 50.0);
    assert_eq!(trust.factors.compliance_adherence, 100.0);
}

#[test]
fn unusual_amount_never_fires_without_crossing_the_configured_max() {
    let config = AnomalyConfig {
        enabled_rules: rules_only(&["unusualAmount"]),
        max_amount: Decimal::from(10_000),
        ..AnomalyConfig::default()
    };
    let detector = AnomalyDetector::new(config).unwrap();
    let store = ActionStore::new();
    let tx = transaction("t1", "agent-1", "500", "0xdest", 1);
    assert!(detector.evaluate(&store, &tx).is_empty());
}

#[test]
fn unusual_amount_is_critical_severity_over_five_times_threshold() {
    let config = AnomalyConfig {
        enabled_rules: rules_only(&["unusualAmount"]),
        max_amount: Decimal::from(1_000),
        ..AnomalyConfig::default()
    };
    let detector = AnomalyDetector::new(config).unwrap();
    let store = ActionStore::new();
    let tx = transaction("t1", "agent-1", "50000", "0xdest", 1);
    let events = detector.evaluate(&store, &tx);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].anomaly_type, "unusualAmount");
    assert_eq!(events[0].severity, Severity::Critical);
}

#[test]
fn new_destination_requires_at_least_three_prior_transactions() {
    let config = AnomalyConfig {
        enabled_rules: rules_only(&["newDestination"]),
        ..AnomalyConfig::default()
    };
    let detector = AnomalyDetector::new(config).unwrap();

    let mut store = ActionStore::new();
    for i in 0..2 {
        let action = transaction(&format!("p{i}"), "agent-1", "10", "0xknown", i + 1);
        store.add_action(action).unwrap();
    }

    let tx = transaction("t-new", "agent-1", "10", "0xbrandnew", 10);
    let prior = store.transactions_by_agent("agent-1");
    assert_eq!(prior.len(), 2);
    assert!(detector.evaluate(&store, &tx).is_empty());
}

#[test]
fn new_destination_fires_once_history_threshold_is_met() {
    let config = AnomalyConfig {
        enabled_rules: rules_only(&["newDestination"]),
        ..AnomalyConfig::default()
    };
    let detector = AnomalyDetector::new(config).unwrap();

    let mut store = ActionStore::new();
    for i in 0..4 {
        let action = transaction(&format!("p{i}"), "agent-1", "10", "0xknown", i + 1);
        store.add_action(action).unwrap();
    }

    let tx = transaction("t-new", "agent-1", "10", "0xbrandnew", 10);
    let events = detector.evaluate(&store, &tx);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].anomaly_type, "newDestination");
}

#[test]
fn round_amount_flags_structuring_just_under_the_reporting_threshold() {
    let config = AnomalyConfig {
        enabled_rules: rules_only(&["roundAmount"]),
        ..AnomalyConfig::default()
    };
    let detector = AnomalyDetector::new(config).unwrap();
    let store = ActionStore::new();
    let tx = transaction("t1", "agent-1", "9900", "0xdest", 1);
    let events = detector.evaluate(&store, &tx);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].severity, Severity::High);
}

#[test]
fn off_hours_activity_fires_only_inside_the_configured_window() {
    let config = AnomalyConfig {
        enabled_rules: rules_only(&["offHoursActivity"]),
        off_hours: (22, 5),
        ..AnomalyConfig::default()
    };
    let detector = AnomalyDetector::new(config).unwrap();
    let store = ActionStore::new();

    let mut late_night = transaction("t1", "agent-1", "10", "0xdest", 1);
    late_night.timestamp = PreciseTimestamp::from_parts(Utc.with_ymd_and_hms(2026, 1, 5, 2, 0, 0).unwrap(), 0);
    let events = detector.evaluate(&store, &late_night);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].anomaly_type, "offHoursActivity");

    let mut midday = transaction("t2", "agent-1", "10", "0xdest", 2);
    midday.timestamp = PreciseTimestamp::from_parts(Utc.with_ymd_and_hms(2026, 1, 5, 14, 0, 0).unwrap(), 0);
    assert!(detector.evaluate(&store, &midday).is_empty());
}

#[test]
fn empty_rule_set_is_rejected_at_construction() {
    let config = AnomalyConfig {
        enabled_rules: BTreeSet::new(),
        ..AnomalyConfig::default()
    };
    assert!(AnomalyDetector::new(config).is_err());
}
