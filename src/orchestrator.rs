//! Verify Orchestrator: the single entry point an agent calls
//! before/after executing a financial action (spec.md 4.5). Wires the
//! Action Store, Compliance Engine, Anomaly Detector and Trust Scorer
//! behind one facade that owns the serialization lock, grounded on the
//! Design Note "class hierarchies over a single context object →
//! composition of the four subsystems behind a thin facade".

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{info, warn};
use uuid7::uuid7;

use crate::action_store::{
    Action, ActionStore, ActionType, AnomalyEvent, ApprovalDecision, ApprovalFields, Severity, Task,
    TaskStatus, ToolCallFields, TransactionFields,
};
use crate::compliance::{ComplianceEngine, ComplianceInput, ComplianceVerdict, RiskLevel};
use crate::config::ContextConfig;
use crate::decimal::Amount;
use crate::digest_chain::{DigestChain, VerifyReport};
use crate::error::{KontextError, TaskError, ValidationError};
use crate::trust::anomaly::AnomalyDetector;
use crate::trust::TrustScore;
use crate::value::Value;

/// Callback fired once per anomaly, after the orchestrator's internal
/// lock has already been released (Design Note: "explicit observer set
/// plus a dispatch primitive that guarantees no lock is held during
/// callback execution and isolates callback exceptions").
pub type AnomalyObserver = Box<dyn Fn(&AnomalyEvent) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct VerifyInput {
    pub agent_id: String,
    pub tx_hash: Option<String>,
    pub chain: String,
    pub amount: String,
    pub token: String,
    pub from: String,
    pub to: String,
    pub description: Option<String>,
    /// Counterparty names for the general-payments name-screening path
    /// (spec.md 4.3); `None` for ordinary crypto transfers.
    pub from_name: Option<String>,
    pub to_name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DigestProof {
    pub terminal_digest: String,
    pub chain_length: u64,
    pub valid: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerifyResult {
    pub compliant: bool,
    pub risk_level: RiskLevel,
    pub checks: Vec<crate::compliance::ComplianceCheck>,
    pub recommendations: Vec<String>,
    pub anomalies: Vec<AnomalyEvent>,
    pub trust_score: TrustScore,
    pub task: Option<Task>,
    pub digest_proof: DigestProof,
}

struct Inner {
    store: ActionStore,
    chain: DigestChain,
    config: ContextConfig,
}

/// Bundles the Action Store and Digest Chain behind one lock (spec.md
/// 5: "a per-instance lock guarding the Action Store and Digest Chain
/// together").
pub struct Context {
    project_id: String,
    inner: Mutex<Inner>,
    observers: Mutex<Vec<AnomalyObserver>>,
    cancelled: Arc<AtomicBool>,
}

impl Context {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self::with_config(project_id, ContextConfig::default())
    }

    pub fn with_config(project_id: impl Into<String>, config: ContextConfig) -> Self {
        Self {
            project_id: project_id.into(),
            inner: Mutex::new(Inner {
                store: ActionStore::new(),
                chain: DigestChain::new(),
                config,
            }),
            observers: Mutex::new(Vec::new()),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Swaps the read-mostly configuration, serialized with normal
    /// operations by taking the same lock (spec.md 5).
    pub fn reconfigure(&self, config: ContextConfig) {
        self.inner.lock().config = config;
    }

    pub fn register_anomaly_observer(&self, observer: AnomalyObserver) {
        self.observers.lock().push(observer);
    }

    /// Cooperative cancellation (spec.md 5: "operations do not support
    /// mid-append cancellation; cancellation observed at entry returns
    /// Cancelled without mutating state"). Once set, every subsequent
    /// mutating call on this `Context` returns `Cancelled` before it
    /// touches the lock; already-applied state is untouched.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn check_cancelled(&self) -> Result<(), KontextError> {
        if self.is_cancelled() {
            return Err(KontextError::Cancelled);
        }
        Ok(())
    }

    fn validate(input: &VerifyInput) -> Result<(), ValidationError> {
        if input.agent_id.trim().is_empty() {
            return Err(ValidationError::MissingField { field: "agentId" });
        }
        if input.chain.trim().is_empty() {
            return Err(ValidationError::MissingField { field: "chain" });
        }
        if input.token.trim().is_empty() {
            return Err(ValidationError::MissingField { field: "token" });
        }
        if input.from.trim().is_empty() {
            return Err(ValidationError::MissingField { field: "from" });
        }
        if input.to.trim().is_empty() {
            return Err(ValidationError::MissingField { field: "to" });
        }
        if input.amount.trim().is_empty() {
            return Err(ValidationError::MissingField { field: "amount" });
        }
        Ok(())
    }

    fn append(
        store: &mut ActionStore,
        chain: &mut DigestChain,
        action: Action,
    ) -> Result<Action, KontextError> {
        let mut action = store.add_action(action)?;
        let link = chain.append(&action)?;
        store.record_digest(action.sequence, link.digest.clone(), link.prior_digest.clone());
        action.digest = Some(link.digest);
        action.prior_digest = Some(link.prior_digest);
        Ok(action)
    }

    /// The nine-step pipeline from spec.md 4.5, run as one straight-line
    /// synchronous sequence under the context lock (Design Note:
    /// "coroutine-heavy verify pipeline → straight-line sequence of
    /// synchronous core calls").
    pub fn verify(&self, input: VerifyInput) -> Result<VerifyResult, KontextError> {
        self.check_cancelled()?;
        Self::validate(&input)?;

        let correlation_id = uuid7().to_string();
        let amount = Amount::parse(&input.amount)
            .map_err(|e| ValidationError::Malformed {
                field: "amount",
                reason: e.to_string(),
            })?;

        let new_anomalies;
        let trust;
        let task;
        let digest_proof;
        let verdict: ComplianceVerdict;

        {
            let mut inner = self.inner.lock();
            let Inner { store, chain, config } = &mut *inner;

            // Step 1 is `validate`, already done above. Step 2: capture inputs.
            let verify_start = Action::new(uuid7().to_string(), &self.project_id, &input.agent_id, ActionType::VerifyStart, "verify invoked")
                .with_correlation_id(correlation_id.clone())
                .with_metadata("chain", Value::str(&input.chain))
                .with_metadata("amount", Value::number(amount.to_canonical_string()))
                .with_metadata("token", Value::str(&input.token))
                .with_metadata("from", Value::str(&input.from))
                .with_metadata("to", Value::str(&input.to));
            Self::append(store, chain, verify_start)?;

            // Step 3: compliance verdict.
            let engine = ComplianceEngine::new(config.compliance.clone());
            verdict = engine.evaluate(&ComplianceInput {
                tx_hash: input.tx_hash.clone(),
                chain: input.chain.clone(),
                amount: input.amount.clone(),
                token: input.token.clone(),
                from: input.from.clone(),
                to: input.to.clone(),
                agent_id: input.agent_id.clone(),
                from_name: input.from_name.clone(),
                to_name: input.to_name.clone(),
            });

            // Step 4: persist the verdict.
            let compliance_action = Action::new(
                uuid7().to_string(),
                &self.project_id,
                &input.agent_id,
                ActionType::ComplianceCheck,
                "compliance screening",
            )
            .with_correlation_id(correlation_id.clone())
            .with_metadata("verdict", verdict.to_value());
            Self::append(store, chain, compliance_action)?;

            // Step 5: persist the transaction itself.
            let transaction_action = Action::new(
                uuid7().to_string(),
                &self.project_id,
                &input.agent_id,
                ActionType::Transaction,
                input.description.clone().unwrap_or_else(|| "transfer".to_string()),
            )
            .with_correlation_id(correlation_id.clone())
            .with_transaction(TransactionFields {
                tx_hash: input.tx_hash.clone(),
                chain: input.chain.clone(),
                amount,
                token: input.token.clone(),
                from: input.from.clone(),
                to: input.to.clone(),
            });
            let transaction_action = Self::append(store, chain, transaction_action)?;

            // Step 6: anomaly evaluation, one action per emitted event.
            let detector = AnomalyDetector::new(config.anomaly.clone())?;
            let events = detector.evaluate(store, &transaction_action);
            let mut persisted_events = Vec::with_capacity(events.len());
            for event in events {
                let event = store.add_anomaly(event)?;
                let anomaly_action = Action::new(
                    uuid7().to_string(),
                    &self.project_id,
                    &input.agent_id,
                    ActionType::AnomalyDetected,
                    event.description.clone(),
                )
                .with_correlation_id(correlation_id.clone())
                .with_metadata("anomalyId", Value::str(&event.id))
                .with_metadata("anomalyType", Value::str(&event.anomaly_type))
                .with_metadata("severity", Value::str(event.severity.as_str()));
                Self::append(store, chain, anomaly_action)?;
                warn!(
                    agent_id = %input.agent_id,
                    anomaly_type = %event.anomaly_type,
                    severity = event.severity.as_str(),
                    "anomaly detected"
                );
                persisted_events.push(event);
            }
            new_anomalies = persisted_events;

            // Step 7: post-event trust snapshot.
            trust = crate::trust::TrustScorer::score(store, &input.agent_id);
            let snapshot_action = Action::new(
                uuid7().to_string(),
                &self.project_id,
                &input.agent_id,
                ActionType::TrustSnapshot,
                "post-verify trust snapshot",
            )
            .with_correlation_id(correlation_id.clone())
            .with_metadata("score", Value::number(trust.score))
            .with_metadata("level", Value::str(format!("{:?}", trust.level)));
            Self::append(store, chain, snapshot_action)?;

            // Step 8: approval gating.
            task = if let Some(threshold) = config.approval_threshold {
                if amount.as_decimal() > threshold {
                    let mut new_task = Task::new(
                        uuid7().to_string(),
                        format!("approve transfer of {amount} {}", input.token),
                        input.agent_id.clone(),
                        vec!["approverId".to_string()],
                        None,
                    );
                    new_task.correlation_id = Some(correlation_id.clone());
                    Some(store.add_task(new_task)?)
                } else {
                    None
                }
            } else {
                None
            };

            // Step 9: digest proof over the chain as it now stands.
            let report: VerifyReport = chain.verify();
            digest_proof = DigestProof {
                terminal_digest: chain.terminal_digest(),
                chain_length: chain.len() as u64,
                valid: report.valid,
            };
        } // lock released here

        info!(agent_id = %input.agent_id, compliant = verdict.compliant, "verify completed");

        // Callbacks fire with no lock held (spec.md 5).
        if !new_anomalies.is_empty() {
            let observers = self.observers.lock();
            for event in &new_anomalies {
                for observer in observers.iter() {
                    observer(event);
                }
            }
        }

        Ok(VerifyResult {
            compliant: verdict.compliant,
            risk_level: verdict.risk_level,
            checks: verdict.checks,
            recommendations: verdict.recommendations,
            anomalies: new_anomalies,
            trust_score: trust,
            task,
            digest_proof,
        })
    }

    pub fn append_reasoning(
        &self,
        agent_id: &str,
        reasoning: impl Into<String>,
        confidence: f64,
        step: Option<u64>,
        session_id: Option<String>,
    ) -> Result<Action, KontextError> {
        self.check_cancelled()?;
        let mut inner = self.inner.lock();
        let Inner { store, chain, .. } = &mut *inner;
        let action = Action::new(
            uuid7().to_string(),
            &self.project_id,
            agent_id,
            ActionType::Reasoning,
            "reasoning entry",
        )
        .with_reasoning(crate::action_store::ReasoningFields {
            reasoning: reasoning.into(),
            confidence,
            step,
            session_id,
        });
        Self::append(store, chain, action)
    }

    pub fn create_task(
        &self,
        agent_id: &str,
        description: impl Into<String>,
        required_evidence: Vec<String>,
        expires_at: Option<crate::timestamp::PreciseTimestamp>,
    ) -> Task {
        let mut inner = self.inner.lock();
        let task = Task::new(uuid7().to_string(), description, agent_id, required_evidence, expires_at);
        inner.store.add_task(task).expect("freshly generated task id is never empty")
    }

    pub fn start_task(&self, task_id: &str) -> Result<Task, KontextError> {
        self.check_cancelled()?;
        let mut inner = self.inner.lock();
        let now = crate::timestamp::PreciseTimestamp::now();
        Ok(inner.store.start_task(task_id, now)?)
    }

    /// Confirms a pending Task and appends an `approval` Action recording
    /// who confirmed it, generalizing the teacher's `Approve` witness
    /// variant to the agent domain (spec.md 3 Supplemental).
    pub fn confirm_task(
        &self,
        task_id: &str,
        approver_id: &str,
        evidence: BTreeMap<String, Value>,
    ) -> Result<Task, KontextError> {
        self.check_cancelled()?;
        let mut inner = self.inner.lock();
        let Inner { store, chain, .. } = &mut *inner;
        let now = crate::timestamp::PreciseTimestamp::now();
        let task = store.confirm_task(task_id, evidence, now)?;

        let approval = Action::new(
            uuid7().to_string(),
            &self.project_id,
            approver_id,
            ActionType::Approval,
            format!("approved task {task_id}"),
        )
        .with_correlation_id(task.correlation_id.clone().unwrap_or_else(|| task_id.to_string()))
        .with_approval(ApprovalFields {
            approver_id: approver_id.to_string(),
            decision: ApprovalDecision::Approve,
            reason: None,
            task_id: task_id.to_string(),
        });
        Self::append(store, chain, approval)?;
        Ok(task)
    }

    /// Fails a Task and appends the matching `approval` Action with a
    /// `reject` decision and the caller's reason.
    pub fn fail_task(
        &self,
        task_id: &str,
        approver_id: &str,
        reason: impl Into<String>,
    ) -> Result<Task, KontextError> {
        self.check_cancelled()?;
        let reason = reason.into();
        let mut inner = self.inner.lock();
        let Inner { store, chain, .. } = &mut *inner;
        let task = store.fail_task(task_id, reason.clone())?;

        let approval = Action::new(
            uuid7().to_string(),
            &self.project_id,
            approver_id,
            ActionType::Approval,
            format!("rejected task {task_id}"),
        )
        .with_correlation_id(task.correlation_id.clone().unwrap_or_else(|| task_id.to_string()))
        .with_approval(ApprovalFields {
            approver_id: approver_id.to_string(),
            decision: ApprovalDecision::Reject,
            reason: Some(reason),
            task_id: task_id.to_string(),
        });
        Self::append(store, chain, approval)?;
        Ok(task)
    }

    /// Appends a `tool_call` Action, e.g. an on-chain balance lookup an
    /// agent made while deciding whether to transact (spec.md 3
    /// Supplemental).
    pub fn append_tool_call(
        &self,
        agent_id: &str,
        tool_name: impl Into<String>,
        arguments: Value,
        result: Value,
        duration_ms: u64,
    ) -> Result<Action, KontextError> {
        self.check_cancelled()?;
        let mut inner = self.inner.lock();
        let Inner { store, chain, .. } = &mut *inner;
        let action = Action::new(
            uuid7().to_string(),
            &self.project_id,
            agent_id,
            ActionType::ToolCall,
            "tool call",
        )
        .with_tool_call(ToolCallFields {
            tool_name: tool_name.into(),
            arguments,
            result,
            duration_ms,
        });
        Self::append(store, chain, action)
    }

    pub fn tasks_with_status(&self, status: TaskStatus) -> Vec<Task> {
        self.inner.lock().store.tasks_with_status(status)
    }

    pub fn trust_score(&self, agent_id: &str) -> TrustScore {
        let inner = self.inner.lock();
        crate::trust::TrustScorer::score(&inner.store, agent_id)
    }

    pub fn verify_chain(&self) -> VerifyReport {
        self.inner.lock().chain.verify()
    }

    /// Stronger check against independently supplied action bodies, e.g.
    /// a bundle handed to an external auditor (spec.md 4.1).
    pub fn verify_content(&self, actions: &[Action]) -> VerifyReport {
        self.inner.lock().chain.verify_content(actions)
    }

    pub fn export_chain_json(&self) -> String {
        crate::export::export_chain_json(&self.inner.lock().chain)
    }

    pub fn export_audit_json(&self) -> String {
        let inner = self.inner.lock();
        crate::export::export_audit_json(&inner.store, &inner.chain, crate::timestamp::PreciseTimestamp::now())
    }

    pub fn export_csv(&self) -> crate::export::CsvExport {
        crate::export::export_csv(&self.inner.lock().store)
    }

    /// Deadline-bounded CSV export (spec.md 5). `deadline` is an
    /// absolute `Instant`; pass `None` for the same behavior as
    /// [`Self::export_csv`].
    pub fn export_csv_with_deadline(&self, deadline: Option<std::time::Instant>) -> crate::export::PartialCsvExport {
        crate::export::export_csv_with_deadline(&self.inner.lock().store, deadline)
    }

    pub fn export_certificate(&self, agent_id: &str) -> serde_json::Value {
        let inner = self.inner.lock();
        let trust = crate::trust::TrustScorer::score(&inner.store, agent_id);
        crate::export::export_compliance_certificate(
            &inner.store,
            &inner.chain,
            agent_id,
            &trust,
            crate::timestamp::PreciseTimestamp::now(),
        )
    }

    /// Best-effort flush of the four reserved keys (spec.md 6). Storage
    /// errors are logged, not propagated (spec.md 7).
    pub fn persist(&self, storage: &mut dyn crate::storage::StorageAdapter) {
        let inner = self.inner.lock();
        let actions_json: serde_json::Value =
            serde_json::to_value(inner.store.all_actions()).expect("actions always serialize");
        let tasks_json: serde_json::Value =
            serde_json::to_value(inner.store.all_tasks()).expect("tasks always serialize");
        let anomalies_json: serde_json::Value =
            serde_json::to_value(inner.store.all_anomalies()).expect("anomalies always serialize");
        let chain_json: serde_json::Value =
            serde_json::to_value(inner.chain.export()).expect("chain export always serializes");

        crate::storage::best_effort_save(storage, "kontext:actions", &actions_json);
        crate::storage::best_effort_save(storage, "kontext:tasks", &tasks_json);
        crate::storage::best_effort_save(storage, "kontext:anomalies", &anomalies_json);
        crate::storage::best_effort_save(storage, "kontext:chain", &chain_json);
    }
}
