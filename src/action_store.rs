//! In-memory typed repository for actions, transactions, tasks, reasoning
//! entries, and anomaly events (spec.md 4.2), plus the indexes the other
//! subsystems query.
//!
//! Grounded on the teacher's witness-walk state derivation
//! (`TradeContext::current_state`) generalized into an explicit `Task`
//! state machine, since this domain's tasks carry their own `status`
//! field rather than deriving state from a replayed event log.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::decimal::Amount;
use crate::error::{StoreError, TaskError};
use crate::timestamp::PreciseTimestamp;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ActionType {
    Transaction,
    Approval,
    Reasoning,
    ToolCall,
    ComplianceCheck,
    VerifyStart,
    AnomalyDetected,
    TrustSnapshot,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Transaction => "transaction",
            ActionType::Approval => "approval",
            ActionType::Reasoning => "reasoning",
            ActionType::ToolCall => "tool_call",
            ActionType::ComplianceCheck => "compliance_check",
            ActionType::VerifyStart => "verify_start",
            ActionType::AnomalyDetected => "anomaly_detected",
            ActionType::TrustSnapshot => "trust_snapshot",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionFields {
    pub tx_hash: Option<String>,
    pub chain: String,
    pub amount: Amount,
    pub token: String,
    pub from: String,
    pub to: String,
}

impl TransactionFields {
    fn to_value(&self) -> Value {
        let mut map = BTreeMap::new();
        map.insert(
            "txHash".to_string(),
            self.tx_hash
                .as_ref()
                .map(|h| Value::str(h.clone()))
                .unwrap_or(Value::Null),
        );
        map.insert("chain".to_string(), Value::str(self.chain.clone()));
        map.insert("amount".to_string(), Value::number(self.amount.to_canonical_string()));
        map.insert("token".to_string(), Value::str(self.token.clone()));
        map.insert("from".to_string(), Value::str(self.from.clone()));
        map.insert("to".to_string(), Value::str(self.to.clone()));
        Value::Map(map)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApprovalDecision {
    Approve,
    Reject,
}

impl ApprovalDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalDecision::Approve => "approve",
            ApprovalDecision::Reject => "reject",
        }
    }
}

/// Records a human or supervisor agent's resolution of a pending Task
/// (spec.md 4.5 step 8's approval-gating outcome).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalFields {
    pub approver_id: String,
    pub decision: ApprovalDecision,
    pub reason: Option<String>,
    pub task_id: String,
}

impl ApprovalFields {
    fn to_value(&self) -> Value {
        let mut map = BTreeMap::new();
        map.insert("approverId".to_string(), Value::str(self.approver_id.clone()));
        map.insert("decision".to_string(), Value::str(self.decision.as_str()));
        map.insert(
            "reason".to_string(),
            self.reason.as_ref().map(|r| Value::str(r.clone())).unwrap_or(Value::Null),
        );
        map.insert("taskId".to_string(), Value::str(self.task_id.clone()));
        Value::Map(map)
    }
}

/// Records a tool invocation an agent made while reasoning toward a
/// transaction, as listed among the Action `type` variants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallFields {
    pub tool_name: String,
    pub arguments: Value,
    pub result: Value,
    pub duration_ms: u64,
}

impl ToolCallFields {
    fn to_value(&self) -> Value {
        let mut map = BTreeMap::new();
        map.insert("toolName".to_string(), Value::str(self.tool_name.clone()));
        map.insert("arguments".to_string(), self.arguments.clone());
        map.insert("result".to_string(), self.result.clone());
        map.insert("durationMs".to_string(), Value::number(self.duration_ms));
        Value::Map(map)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningFields {
    pub reasoning: String,
    pub confidence: f64,
    pub step: Option<u64>,
    pub session_id: Option<String>,
}

impl ReasoningFields {
    fn to_value(&self) -> Value {
        let mut map = BTreeMap::new();
        map.insert("reasoning".to_string(), Value::str(self.reasoning.clone()));
        map.insert("confidence".to_string(), Value::number(format!("{:.6}", self.confidence)));
        map.insert(
            "step".to_string(),
            self.step.map(Value::number).unwrap_or(Value::Null),
        );
        map.insert(
            "sessionId".to_string(),
            self.session_id
                .as_ref()
                .map(|s| Value::str(s.clone()))
                .unwrap_or(Value::Null),
        );
        Value::Map(map)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub id: String,
    pub project_id: String,
    pub agent_id: String,
    pub action_type: ActionType,
    pub description: String,
    pub timestamp: PreciseTimestamp,
    pub sequence: u64,
    pub correlation_id: Option<String>,
    pub metadata: BTreeMap<String, Value>,
    pub digest: Option<String>,
    pub prior_digest: Option<String>,
    pub transaction: Option<TransactionFields>,
    pub reasoning: Option<ReasoningFields>,
    pub approval: Option<ApprovalFields>,
    pub tool_call: Option<ToolCallFields>,
}

impl Action {
    pub fn new(
        id: impl Into<String>,
        project_id: impl Into<String>,
        agent_id: impl Into<String>,
        action_type: ActionType,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            project_id: project_id.into(),
            agent_id: agent_id.into(),
            action_type,
            description: description.into(),
            timestamp: PreciseTimestamp::now(),
            sequence: 0,
            correlation_id: None,
            metadata: BTreeMap::new(),
            digest: None,
            prior_digest: None,
            transaction: None,
            reasoning: None,
            approval: None,
            tool_call: None,
        }
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn with_transaction(mut self, fields: TransactionFields) -> Self {
        self.transaction = Some(fields);
        self
    }

    pub fn with_reasoning(mut self, fields: ReasoningFields) -> Self {
        self.reasoning = Some(fields);
        self
    }

    pub fn with_approval(mut self, fields: ApprovalFields) -> Self {
        self.approval = Some(fields);
        self
    }

    pub fn with_tool_call(mut self, fields: ToolCallFields) -> Self {
        self.tool_call = Some(fields);
        self
    }

    /// Canonical value of this action, excluding `digest`/`priorDigest`
    /// per I-3(b), used as the input to the content fingerprint.
    pub fn to_canonical_value(&self) -> Value {
        let mut map = BTreeMap::new();
        map.insert("id".to_string(), Value::str(self.id.clone()));
        map.insert("projectId".to_string(), Value::str(self.project_id.clone()));
        map.insert("agentId".to_string(), Value::str(self.agent_id.clone()));
        map.insert("type".to_string(), Value::str(self.action_type.as_str()));
        map.insert("description".to_string(), Value::str(self.description.clone()));
        map.insert("timestamp".to_string(), Value::str(self.timestamp.to_rfc3339()));
        map.insert(
            "timestampMonotonic".to_string(),
            Value::number(self.timestamp.monotonic()),
        );
        map.insert("sequence".to_string(), Value::number(self.sequence));
        map.insert(
            "correlationId".to_string(),
            self.correlation_id
                .as_ref()
                .map(|c| Value::str(c.clone()))
                .unwrap_or(Value::Null),
        );
        map.insert("metadata".to_string(), Value::Map(self.metadata.clone()));
        map.insert(
            "transaction".to_string(),
            self.transaction.as_ref().map(|t| t.to_value()).unwrap_or(Value::Null),
        );
        map.insert(
            "reasoning".to_string(),
            self.reasoning.as_ref().map(|r| r.to_value()).unwrap_or(Value::Null),
        );
        map.insert(
            "approval".to_string(),
            self.approval.as_ref().map(|a| a.to_value()).unwrap_or(Value::Null),
        );
        map.insert(
            "toolCall".to_string(),
            self.tool_call.as_ref().map(|t| t.to_value()).unwrap_or(Value::Null),
        );
        Value::Map(map)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TaskStatus {
    Pending,
    InProgress,
    Confirmed,
    Failed,
    Expired,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Confirmed => "confirmed",
            TaskStatus::Failed => "failed",
            TaskStatus::Expired => "expired",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub description: String,
    pub agent_id: String,
    pub status: TaskStatus,
    pub required_evidence: Vec<String>,
    pub provided_evidence: Option<BTreeMap<String, Value>>,
    pub created_at: PreciseTimestamp,
    pub updated_at: PreciseTimestamp,
    pub confirmed_at: Option<PreciseTimestamp>,
    pub expires_at: Option<PreciseTimestamp>,
    pub correlation_id: Option<String>,
    pub metadata: BTreeMap<String, Value>,
}

impl Task {
    pub fn new(
        id: impl Into<String>,
        description: impl Into<String>,
        agent_id: impl Into<String>,
        required_evidence: Vec<String>,
        expires_at: Option<PreciseTimestamp>,
    ) -> Self {
        let now = PreciseTimestamp::now();
        Self {
            id: id.into(),
            description: description.into(),
            agent_id: agent_id.into(),
            status: TaskStatus::Pending,
            required_evidence,
            provided_evidence: None,
            created_at: now,
            updated_at: now,
            confirmed_at: None,
            expires_at,
            correlation_id: None,
            metadata: BTreeMap::new(),
        }
    }

    fn has_expired(&self, now: PreciseTimestamp) -> bool {
        matches!(self.expires_at, Some(deadline) if now > deadline)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyEvent {
    pub id: String,
    pub anomaly_type: String,
    pub severity: Severity,
    pub agent_id: String,
    pub action_id: String,
    pub description: String,
    pub data: Value,
    pub detected_at: PreciseTimestamp,
    pub reviewed: bool,
}

/// Derived, read-only view of an agent's footprint in the store. Never
/// persisted — recomputed on demand by the Trust Scorer and exporters.
#[derive(Debug, Clone, Serialize)]
pub struct AgentView {
    pub agent_id: String,
    pub action_count: usize,
    pub transaction_count: usize,
    pub anomaly_count: usize,
    pub task_count: usize,
}

#[derive(Default)]
pub struct ActionStore {
    actions: Vec<Action>,
    actions_by_agent: HashMap<String, Vec<usize>>,
    actions_by_correlation: HashMap<String, Vec<usize>>,
    actions_by_type: HashMap<ActionType, Vec<usize>>,
    transactions_by_agent: HashMap<String, Vec<usize>>,
    transactions_by_to: HashMap<String, Vec<usize>>,

    tasks: HashMap<String, Task>,
    tasks_by_status: HashMap<TaskStatus, BTreeSet<String>>,

    anomalies: Vec<AnomalyEvent>,
    anomalies_by_agent: HashMap<String, Vec<usize>>,

    next_sequence: u64,
}

impl ActionStore {
    pub fn new() -> Self {
        Self {
            next_sequence: 1,
            ..Default::default()
        }
    }

    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    pub fn last_timestamp(&self) -> Option<PreciseTimestamp> {
        self.actions.last().map(|a| a.timestamp)
    }

    /// Assigns `sequence` and a monotonic timestamp, validates structural
    /// invariants, and inserts. Returns the finalized action.
    pub fn add_action(&mut self, mut action: Action) -> Result<Action, StoreError> {
        if action.id.trim().is_empty() {
            return Err(StoreError::EmptyId);
        }
        if action.action_type == ActionType::Transaction && action.transaction.is_none() {
            return Err(StoreError::InvalidAmount(
                "transaction action missing transaction fields".to_string(),
            ));
        }

        action.timestamp = PreciseTimestamp::next_after(self.last_timestamp().as_ref());
        action.sequence = self.next_sequence;
        self.next_sequence += 1;

        let idx = self.actions.len();
        self.actions_by_agent
            .entry(action.agent_id.clone())
            .or_default()
            .push(idx);
        if let Some(corr) = &action.correlation_id {
            self.actions_by_correlation
                .entry(corr.clone())
                .or_default()
                .push(idx);
        }
        self.actions_by_type
            .entry(action.action_type)
            .or_default()
            .push(idx);

        if let Some(tx) = &action.transaction {
            self.transactions_by_agent
                .entry(action.agent_id.clone())
                .or_default()
                .push(idx);
            self.transactions_by_to.entry(tx.to.clone()).or_default().push(idx);
        }

        self.actions.push(action.clone());
        Ok(action)
    }

    pub fn add_transaction(
        &mut self,
        action: Action,
        fields: TransactionFields,
    ) -> Result<Action, StoreError> {
        self.add_action(action.with_transaction(fields))
    }

    pub fn add_task(&mut self, task: Task) -> Result<Task, StoreError> {
        if task.id.trim().is_empty() {
            return Err(StoreError::EmptyId);
        }
        self.tasks_by_status
            .entry(task.status)
            .or_default()
            .insert(task.id.clone());
        self.tasks.insert(task.id.clone(), task.clone());
        Ok(task)
    }

    pub fn add_anomaly(&mut self, event: AnomalyEvent) -> Result<AnomalyEvent, StoreError> {
        if event.id.trim().is_empty() {
            return Err(StoreError::EmptyId);
        }
        let idx = self.anomalies.len();
        self.anomalies_by_agent
            .entry(event.agent_id.clone())
            .or_default()
            .push(idx);
        self.anomalies.push(event.clone());
        Ok(event)
    }

    pub fn get_task(&self, id: &str) -> Option<Task> {
        self.tasks.get(id).cloned()
    }

    fn set_task_status(&mut self, id: &str, new_status: TaskStatus) {
        if let Some(task) = self.tasks.get(id) {
            let old_status = task.status;
            if let Some(set) = self.tasks_by_status.get_mut(&old_status) {
                set.remove(id);
            }
            self.tasks_by_status
                .entry(new_status)
                .or_default()
                .insert(id.to_string());
        }
        if let Some(task) = self.tasks.get_mut(id) {
            task.status = new_status;
            task.updated_at = PreciseTimestamp::now();
        }
    }

    fn expire_if_needed(&mut self, id: &str, now: PreciseTimestamp) {
        let should_expire = self
            .tasks
            .get(id)
            .map(|t| t.status == TaskStatus::Pending || t.status == TaskStatus::InProgress)
            .unwrap_or(false)
            && self.tasks.get(id).map(|t| t.has_expired(now)).unwrap_or(false);
        if should_expire {
            self.set_task_status(id, TaskStatus::Expired);
        }
    }

    /// `pending -> in_progress`.
    pub fn start_task(&mut self, id: &str, now: PreciseTimestamp) -> Result<Task, TaskError> {
        self.expire_if_needed(id, now);
        let task = self.tasks.get(id).ok_or_else(|| TaskError::NotFound(id.to_string()))?;
        match task.status {
            TaskStatus::Pending => {
                self.set_task_status(id, TaskStatus::InProgress);
                Ok(self.tasks[id].clone())
            }
            other => Err(TaskError::IllegalTransition {
                from: other.as_str().to_string(),
                to: TaskStatus::InProgress.as_str().to_string(),
            }),
        }
    }

    /// `pending|in_progress -> confirmed`, enforcing I-6.
    pub fn confirm_task(
        &mut self,
        id: &str,
        evidence: BTreeMap<String, Value>,
        now: PreciseTimestamp,
    ) -> Result<Task, TaskError> {
        self.expire_if_needed(id, now);
        let task = self.tasks.get(id).ok_or_else(|| TaskError::NotFound(id.to_string()))?;

        match task.status {
            TaskStatus::Confirmed => return Err(TaskError::AlreadyConfirmed(id.to_string())),
            TaskStatus::Expired => {
                return Err(TaskError::Expired(
                    id.to_string(),
                    task.expires_at.map(|t| t.to_rfc3339()).unwrap_or_default(),
                ));
            }
            TaskStatus::Pending | TaskStatus::InProgress => {}
            TaskStatus::Failed => {
                return Err(TaskError::IllegalTransition {
                    from: "failed".to_string(),
                    to: "confirmed".to_string(),
                });
            }
        }

        let missing: Vec<String> = task
            .required_evidence
            .iter()
            .filter(|key| !matches!(evidence.get(*key), Some(v) if !matches!(v, Value::Null)))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(TaskError::InsufficientEvidence(missing));
        }

        let task = self.tasks.get_mut(id).unwrap();
        task.provided_evidence = Some(evidence);
        task.confirmed_at = Some(now);
        drop(task);
        self.set_task_status(id, TaskStatus::Confirmed);
        Ok(self.tasks[id].clone())
    }

    /// `* -> failed`.
    pub fn fail_task(&mut self, id: &str, reason: impl Into<String>) -> Result<Task, TaskError> {
        if !self.tasks.contains_key(id) {
            return Err(TaskError::NotFound(id.to_string()));
        }
        self.tasks
            .get_mut(id)
            .unwrap()
            .metadata
            .insert("failureReason".to_string(), Value::str(reason.into()));
        self.set_task_status(id, TaskStatus::Failed);
        Ok(self.tasks[id].clone())
    }

    pub fn tasks_with_status(&self, status: TaskStatus) -> Vec<Task> {
        self.tasks_by_status
            .get(&status)
            .into_iter()
            .flat_map(|ids| ids.iter())
            .filter_map(|id| self.tasks.get(id).cloned())
            .collect()
    }

    pub fn actions_by_agent(&self, agent_id: &str) -> Vec<Action> {
        self.actions_by_agent
            .get(agent_id)
            .into_iter()
            .flatten()
            .map(|&i| self.actions[i].clone())
            .collect()
    }

    pub fn actions_by_correlation(&self, correlation_id: &str) -> Vec<Action> {
        self.actions_by_correlation
            .get(correlation_id)
            .into_iter()
            .flatten()
            .map(|&i| self.actions[i].clone())
            .collect()
    }

    pub fn actions_by_type(&self, action_type: ActionType) -> Vec<Action> {
        self.actions_by_type
            .get(&action_type)
            .into_iter()
            .flatten()
            .map(|&i| self.actions[i].clone())
            .collect()
    }

    pub fn transactions_by_agent(&self, agent_id: &str) -> Vec<Action> {
        self.transactions_by_agent
            .get(agent_id)
            .into_iter()
            .flatten()
            .map(|&i| self.actions[i].clone())
            .collect()
    }

    pub fn transactions_by_to(&self, to: &str) -> Vec<Action> {
        self.transactions_by_to
            .get(to)
            .into_iter()
            .flatten()
            .map(|&i| self.actions[i].clone())
            .collect()
    }

    pub fn anomalies_by_agent(&self, agent_id: &str) -> Vec<AnomalyEvent> {
        self.anomalies_by_agent
            .get(agent_id)
            .into_iter()
            .flatten()
            .map(|&i| self.anomalies[i].clone())
            .collect()
    }

    pub fn all_actions(&self) -> &[Action] {
        &self.actions
    }

    /// Records the digest chain's link hashes back onto the stored
    /// action (spec.md 3: `digest`/`priorDigest` are "set when
    /// appended"). `sequence` is 1-based and assigned by `add_action`,
    /// so `sequence - 1` is always a valid index into `actions` at the
    /// point this is called.
    pub fn record_digest(&mut self, sequence: u64, digest: String, prior_digest: String) {
        let idx = (sequence - 1) as usize;
        let action = &mut self.actions[idx];
        action.digest = Some(digest);
        action.prior_digest = Some(prior_digest);
    }

    pub fn all_tasks(&self) -> Vec<Task> {
        self.tasks.values().cloned().collect()
    }

    pub fn all_anomalies(&self) -> &[AnomalyEvent] {
        &self.anomalies
    }

    pub fn agent_view(&self, agent_id: &str) -> AgentView {
        AgentView {
            agent_id: agent_id.to_string(),
            action_count: self.actions_by_agent.get(agent_id).map(|v| v.len()).unwrap_or(0),
            transaction_count: self
                .transactions_by_agent
                .get(agent_id)
                .map(|v| v.len())
                .unwrap_or(0),
            anomaly_count: self.anomalies_by_agent.get(agent_id).map(|v| v.len()).unwrap_or(0),
            task_count: self.tasks.values().filter(|t| t.agent_id == agent_id).count(),
        }
    }

    /// Test/demo-only: clears all indexes, mirroring the teacher's
    /// `db.clear()` idiom in `tests/scenarios.rs`.
    pub fn reset(&mut self) {
        *self = ActionStore::new();
    }
}
