//! Rule-based anomaly detection over an agent's transaction history
//! (spec.md 4.4). Stateless given a store snapshot: `evaluate` reads the
//! Action Store and returns the anomalies a new transaction trips,
//! without persisting them itself — persistence and callback dispatch
//! are the caller's (Verify Orchestrator's) responsibility, per the
//! Design Note "Event emitter / callback registry → explicit observer
//! set plus a dispatch primitive that ... isolates callback exceptions."

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use chrono::Duration;
use rust_decimal::Decimal;
use uuid7::uuid7;

use crate::action_store::{Action, ActionStore, AnomalyEvent, Severity};
use crate::value::Value;

#[derive(Debug, Clone)]
pub struct AnomalyConfig {
    pub max_amount: Decimal,
    pub max_frequency: u32,
    /// Off-hours window in UTC hours, e.g. `(22, 5)` meaning 22:00
    /// through 04:59 (wraps past midnight).
    pub off_hours: (u32, u32),
    pub min_interval_seconds: i64,
    pub enabled_rules: BTreeSet<&'static str>,
}

pub const ALL_RULES: &[&str] = &[
    "unusualAmount",
    "frequencySpike",
    "newDestination",
    "offHoursActivity",
    "rapidSuccession",
    "roundAmount",
];

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            max_amount: Decimal::from(10_000),
            max_frequency: 30,
            off_hours: (22, 5),
            min_interval_seconds: 10,
            enabled_rules: ALL_RULES.iter().copied().collect(),
        }
    }
}

pub struct AnomalyDetector {
    config: AnomalyConfig,
}

impl AnomalyDetector {
    pub fn new(config: AnomalyConfig) -> Result<Self, crate::error::AnomalyConfigError> {
        if config.enabled_rules.is_empty() {
            return Err(crate::error::AnomalyConfigError::EmptyRuleSet);
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> &AnomalyConfig {
        &self.config
    }

    /// Evaluates all six rules, in enumeration order, against `tx`
    /// (already present in `store`'s transaction index for the agent).
    /// Rules do not short-circuit — every enabled rule runs.
    pub fn evaluate(&self, store: &ActionStore, tx: &Action) -> Vec<AnomalyEvent> {
        let Some(fields) = tx.transaction.as_ref() else {
            return Vec::new();
        };
        let prior: Vec<Action> = store
            .transactions_by_agent(&tx.agent_id)
            .into_iter()
            .filter(|a| a.sequence < tx.sequence)
            .collect();

        let mut events = Vec::new();

        if self.rule_enabled("unusualAmount") {
            if let Some(e) = self.rule_unusual_amount(tx, fields.amount.as_decimal(), &prior) {
                events.push(e);
            }
        }
        if self.rule_enabled("frequencySpike") {
            if let Some(e) = self.rule_frequency_spike(tx, &prior) {
                events.push(e);
            }
        }
        if self.rule_enabled("newDestination") {
            if let Some(e) = self.rule_new_destination(tx, fields.amount.as_decimal(), &fields.to, &prior) {
                events.push(e);
            }
        }
        if self.rule_enabled("offHoursActivity") {
            if let Some(e) = self.rule_off_hours(tx) {
                events.push(e);
            }
        }
        if self.rule_enabled("rapidSuccession") {
            if let Some(e) = self.rule_rapid_succession(tx, &prior) {
                events.push(e);
            }
        }
        if self.rule_enabled("roundAmount") {
            if let Some(e) = self.rule_round_amount(tx, fields.amount.as_decimal()) {
                events.push(e);
            }
        }

        events
    }

    fn rule_enabled(&self, name: &str) -> bool {
        self.config.enabled_rules.contains(name)
    }

    fn new_event(
        &self,
        rule: &'static str,
        severity: Severity,
        tx: &Action,
        description: impl Into<String>,
        data: BTreeMap<String, Value>,
    ) -> AnomalyEvent {
        AnomalyEvent {
            id: uuid7().to_string(),
            anomaly_type: rule.to_string(),
            severity,
            agent_id: tx.agent_id.clone(),
            action_id: tx.id.clone(),
            description: description.into(),
            data: Value::Map(data),
            detected_at: crate::timestamp::PreciseTimestamp::now(),
            reviewed: false,
        }
    }

    fn rule_unusual_amount(&self, tx: &Action, amount: Decimal, prior: &[Action]) -> Option<AnomalyEvent> {
        let over_max = amount > self.config.max_amount;
        let mean = mean_amount(prior);
        let over_mean = prior.len() >= 3
            && mean.map(|m| m > Decimal::ZERO && amount > m * Decimal::from(5)).unwrap_or(false);

        if !over_max && !over_mean {
            return None;
        }

        let ratio = if self.config.max_amount > Decimal::ZERO {
            amount / self.config.max_amount
        } else {
            Decimal::ZERO
        };
        let severity = severity_from_ratio(ratio, &[(Decimal::from(10), Severity::Critical), (Decimal::from(5), Severity::High), (Decimal::from(2), Severity::Medium)], Severity::Low);

        let mut data = BTreeMap::new();
        data.insert("amount".to_string(), Value::number(amount));
        data.insert("maxAmount".to_string(), Value::number(self.config.max_amount));
        Some(self.new_event(
            "unusualAmount",
            severity,
            tx,
            format!("amount {amount} exceeds the configured threshold"),
            data,
        ))
    }

    fn rule_frequency_spike(&self, tx: &Action, prior: &[Action]) -> Option<AnomalyEvent> {
        let window_start = tx.timestamp.datetime() - Duration::minutes(60);
        let count = prior
            .iter()
            .filter(|a| a.timestamp.datetime() >= window_start)
            .count()
            + 1; // include tx itself

        if count as u32 <= self.config.max_frequency {
            return None;
        }

        let ratio = count as f64 / self.config.max_frequency.max(1) as f64;
        let severity = if ratio > 3.0 {
            Severity::Critical
        } else if ratio > 2.0 {
            Severity::High
        } else {
            Severity::Medium
        };

        let mut data = BTreeMap::new();
        data.insert("count".to_string(), Value::number(count));
        data.insert("maxFrequency".to_string(), Value::number(self.config.max_frequency));
        Some(self.new_event(
            "frequencySpike",
            severity,
            tx,
            format!("{count} transactions in the trailing 60 minutes"),
            data,
        ))
    }

    fn rule_new_destination(
        &self,
        tx: &Action,
        amount: Decimal,
        to: &str,
        prior: &[Action],
    ) -> Option<AnomalyEvent> {
        if prior.len() < 3 {
            return None;
        }
        let known: BTreeSet<&str> = prior
            .iter()
            .filter_map(|a| a.transaction.as_ref())
            .map(|t| t.to.as_str())
            .collect();
        if known.contains(to) {
            return None;
        }

        let severity = if amount > self.config.max_amount * Decimal::new(5, 1) {
            Severity::High
        } else {
            Severity::Low
        };

        let mut data = BTreeMap::new();
        data.insert("to".to_string(), Value::str(to));
        Some(self.new_event(
            "newDestination",
            severity,
            tx,
            format!("first transfer to {to}"),
            data,
        ))
    }

    fn rule_off_hours(&self, tx: &Action) -> Option<AnomalyEvent> {
        let hour = tx.timestamp.hour_utc();
        let (start, end) = self.config.off_hours;
        let in_window = if start <= end {
            hour >= start && hour <= end
        } else {
            hour >= start || hour <= end
        };
        if !in_window {
            return None;
        }
        let mut data = BTreeMap::new();
        data.insert("hourUtc".to_string(), Value::number(hour));
        Some(self.new_event(
            "offHoursActivity",
            Severity::Low,
            tx,
            format!("transaction occurred at {hour:02}:00 UTC, within configured off-hours"),
            data,
        ))
    }

    fn rule_rapid_succession(&self, tx: &Action, prior: &[Action]) -> Option<AnomalyEvent> {
        let last = prior.iter().max_by_key(|a| a.sequence)?;
        let gap = tx.timestamp.datetime() - last.timestamp.datetime();
        let gap_seconds = gap.num_milliseconds() as f64 / 1000.0;
        if gap_seconds >= self.config.min_interval_seconds as f64 {
            return None;
        }
        let severity = if gap_seconds < 2.0 { Severity::High } else { Severity::Medium };

        let mut data = BTreeMap::new();
        data.insert("gapSeconds".to_string(), Value::number(format!("{gap_seconds:.3}")));
        Some(self.new_event(
            "rapidSuccession",
            severity,
            tx,
            format!("{gap_seconds:.1}s since the agent's previous transaction"),
            data,
        ))
    }

    fn rule_round_amount(&self, tx: &Action, amount: Decimal) -> Option<AnomalyEvent> {
        const STRUCTURING_THRESHOLDS: [i64; 4] = [1_000, 3_000, 5_000, 10_000];

        for &threshold in &STRUCTURING_THRESHOLDS {
            let threshold = Decimal::from(threshold);
            let lower_bound = threshold * Decimal::new(95, 2);
            if amount >= lower_bound && amount < threshold {
                let severity = if threshold >= Decimal::from(10_000) {
                    Severity::High
                } else {
                    Severity::Medium
                };
                let mut data = BTreeMap::new();
                data.insert("threshold".to_string(), Value::number(threshold));
                return Some(self.new_event(
                    "roundAmount",
                    severity,
                    tx,
                    format!("amount {amount} sits just below the {threshold} reporting threshold"),
                    data,
                ));
            }
        }

        if amount >= Decimal::from(5_000) && (amount % Decimal::from(1_000)) == Decimal::ZERO {
            let mut data = BTreeMap::new();
            data.insert("amount".to_string(), Value::number(amount));
            return Some(self.new_event(
                "roundAmount",
                Severity::Low,
                tx,
                format!("amount {amount} is an exact multiple of 1,000"),
                data,
            ));
        }

        None
    }
}

fn mean_amount(transactions: &[Action]) -> Option<Decimal> {
    let amounts: Vec<Decimal> = transactions
        .iter()
        .filter_map(|a| a.transaction.as_ref())
        .map(|t| t.amount.as_decimal())
        .collect();
    if amounts.is_empty() {
        return None;
    }
    Some(amounts.iter().sum::<Decimal>() / Decimal::from(amounts.len() as u64))
}

fn severity_from_ratio(ratio: Decimal, breakpoints: &[(Decimal, Severity)], baseline: Severity) -> Severity {
    for (threshold, severity) in breakpoints {
        if ratio > *threshold {
            return *severity;
        }
    }
    baseline
}
