//! End-to-end Context scenarios (spec.md 8), exercising `verify` as a
//! caller would rather than reaching into individual subsystems.

use std::collections::BTreeMap;

use kontext_core::action_store::{Action, Severity, TaskStatus};
use kontext_core::compliance::RiskLevel;
use kontext_core::config::ContextConfig;
use kontext_core::error::KontextError;
use kontext_core::trust::anomaly::ALL_RULES;
use kontext_core::value::Value;
use kontext_core::{Context, VerifyInput};
use serde::Deserialize;

fn config_without_off_hours() -> ContextConfig {
    let mut config = ContextConfig::default();
    config.anomaly.enabled_rules = ALL_RULES.iter().copied().filter(|r| *r != "offHoursActivity").collect();
    config
}

fn clean_input(agent_id: &str, amount: &str) -> VerifyInput {
    VerifyInput {
        agent_id: agent_id.to_string(),
        tx_hash: None,
        chain: "base".to_string(),
        amount: amount.to_string(),
        token: "USDC".to_string(),
        from: "0x1111111111111111111111111111111111111".to_string(),
        to: "0x2222222222222222222222222222222222222".to_string(),
        description: None,
        from_name: None,
        to_name: None,
    }
}

#[derive(Deserialize)]
struct AuditBundle {
    actions: Vec<Action>,
}

#[test]
fn sanctioned_counterparty_name_blocks_only_when_general_payments_enabled() {
    let mut config = config_without_off_hours();
    let mut input = clean_input("agent-1", "100");
    input.to_name = Some("Lazarus Group Holdings".to_string());

    let ctx_disabled = Context::with_config("proj-1", config.clone());
    let result_disabled = ctx_disabled.verify(input.clone()).unwrap();
    assert!(result_disabled.compliant, "name screening is off by default");

    config.compliance.general_payments = true;
    let ctx_enabled = Context::with_config("proj-2", config);
    let result_enabled = ctx_enabled.verify(input).unwrap();
    assert!(!result_enabled.compliant);
    assert_eq!(result_enabled.risk_level, RiskLevel::Critical);
}

#[test]
fn scenario_2_sanctioned_recipient_blocks_at_the_facade() {
    let ctx = Context::with_config("proj-1", config_without_off_hours());
    let mut input = clean_input("agent-1", "100");
    input.to = "0x722122dF12D4e14e13Ac3b6895a86e84145b6967".to_string();

    let result = ctx.verify(input).unwrap();
    assert!(!result.compliant);
    assert_eq!(result.risk_level, RiskLevel::Critical);
    assert!(result.task.is_none(), "sanctioned transfers are blocked, not queued for approval");
}

#[test]
fn scenario_5_task_confirmation_round_trip_via_context() {
    let ctx = Context::with_config("proj-1", config_without_off_hours());
    let mut input = clean_input("agent-1", "30000");
    input.description = Some("large transfer requiring sign-off".to_string());
    let result = ctx.verify(input).unwrap();

    let task = result.task.expect("amount exceeds the default approval threshold");
    assert_eq!(task.status, TaskStatus::Pending);

    ctx.start_task(&task.id).unwrap();
    let mut evidence = BTreeMap::new();
    evidence.insert("approverId".to_string(), Value::str("approver-7"));
    let confirmed = ctx.confirm_task(&task.id, "approver-7", evidence).unwrap();
    assert_eq!(confirmed.status, TaskStatus::Confirmed);

    let pending = ctx.tasks_with_status(TaskStatus::Pending);
    assert!(pending.iter().all(|t| t.id != task.id));

    // Confirming appends an `approval` action the digest chain now covers.
    let report = ctx.verify_chain();
    assert!(report.valid);
}

#[test]
fn scenario_6_tamper_detection_flags_the_mutated_action() {
    let ctx = Context::with_config("proj-1", config_without_off_hours());
    for i in 0..10 {
        ctx.verify(clean_input("agent-1", &format!("{}", 100 + i))).unwrap();
    }

    let report_before = ctx.verify_chain();
    assert!(report_before.valid);
    assert_eq!(report_before.links_verified, 40);

    let bundle: AuditBundle = serde_json::from_str(&ctx.export_audit_json()).unwrap();
    let mut actions = bundle.actions;
    // The 5th link (index 4) is the second verify call's `verify_start`
    // action; rewriting its id breaks the digest-chain lookup the same
    // way an external auditor tampering with an exported bundle would.
    actions[4].id = "tampered-action-id".to_string();

    let report_after = ctx.verify_content(&actions);
    assert!(!report_after.valid);
    assert_eq!(report_after.failed_at, Some(5));
}

#[test]
fn rejected_task_appends_a_reject_approval_action() {
    let ctx = Context::with_config("proj-1", config_without_off_hours());
    let task = ctx.create_task("agent-1", "wire a large transfer", vec!["approverId".to_string()], None);

    let before = ctx.verify_chain().links_verified;
    ctx.fail_task(&task.id, "approver-2", "amount looks wrong").unwrap();
    let after = ctx.verify_chain().links_verified;
    assert_eq!(after, before + 1);

    let failed = ctx.tasks_with_status(TaskStatus::Failed);
    assert!(failed.iter().any(|t| t.id == task.id));
}

#[test]
fn tool_call_entries_are_appended_to_the_chain() {
    let ctx = Context::with_config("proj-1", config_without_off_hours());
    ctx.append_tool_call(
        "agent-1",
        "getBalance",
        Value::Map(std::collections::BTreeMap::new()),
        Value::number(1000),
        42,
    )
    .unwrap();
    let report = ctx.verify_chain();
    assert!(report.valid);
    assert_eq!(report.links_verified, 1);
}

#[test]
fn repeated_verify_calls_grow_the_chain_monotonically() {
    let ctx = Context::with_config("proj-1", config_without_off_hours());
    ctx.verify(clean_input("agent-1", "50")).unwrap();
    let after_one = ctx.verify_chain().links_verified;
    ctx.verify(clean_input("agent-1", "75")).unwrap();
    let after_two = ctx.verify_chain().links_verified;
    assert!(after_two > after_one);
}

#[test]
fn malformed_amount_is_rejected_before_any_mutation() {
    let ctx = Context::with_config("proj-1", config_without_off_hours());
    let mut input = clean_input("agent-1", "100");
    input.amount = "not-a-number".to_string();
    let err = ctx.verify(input).unwrap_err();
    assert!(matches!(err, KontextError::Validation(_)));
    assert_eq!(ctx.verify_chain().links_verified, 0);
}

#[test]
fn reasoning_entries_interleave_with_transactions_in_one_chain() {
    let ctx = Context::with_config("proj-1", config_without_off_hours());
    ctx.append_reasoning("agent-1", "deciding whether to transfer", 0.8, Some(1), None)
        .unwrap();
    ctx.verify(clean_input("agent-1", "100")).unwrap();
    ctx.append_reasoning("agent-1", "transfer completed", 0.9, Some(2), None)
        .unwrap();

    let report = ctx.verify_chain();
    assert!(report.valid);
    assert_eq!(report.links_verified, 6);
}

#[test]
fn audit_export_is_valid_json_containing_every_action_type_emitted() {
    let ctx = Context::with_config("proj-1", config_without_off_hours());
    ctx.verify(clean_input("agent-1", "100")).unwrap();

    let audit = ctx.export_audit_json();
    let parsed: serde_json::Value = serde_json::from_str(&audit).unwrap();
    assert!(parsed.get("actions").is_some());
    assert!(parsed.get("tasks").is_some());

    let actions = parsed["actions"].as_array().unwrap();
    let types: std::collections::BTreeSet<&str> =
        actions.iter().map(|a| a["action_type"].as_str().unwrap()).collect();
    assert!(types.contains("VerifyStart"));
    assert!(types.contains("ComplianceCheck"));
    assert!(types.contains("Transaction"));
    assert!(types.contains("TrustSnapshot"));
}

#[test]
fn certificate_reflects_agent_trust_and_verifies_its_own_hash() {
    let ctx = Context::with_config("proj-1", config_without_off_hours());
    ctx.verify(clean_input("agent-1", "100")).unwrap();

    let certificate = ctx.export_certificate("agent-1");
    assert!(kontext_core::export::verify_certificate_hash(&certificate));
    assert_eq!(certificate["agentId"], "agent-1");
}

#[test]
fn cancel_returns_cancelled_at_entry_without_touching_the_chain() {
    let ctx = Context::with_config("proj-1", config_without_off_hours());
    ctx.cancel();

    let err = ctx.verify(clean_input("agent-1", "100")).unwrap_err();
    assert!(matches!(err, KontextError::Cancelled));
    assert_eq!(ctx.verify_chain().links_verified, 0);

    let err = ctx.append_tool_call("agent-1", "getBalance", Value::Null, Value::Null, 1).unwrap_err();
    assert!(matches!(err, KontextError::Cancelled));
}

#[test]
fn deadline_bounded_csv_export_reports_partial_progress() {
    let ctx = Context::with_config("proj-1", config_without_off_hours());
    ctx.verify(clean_input("agent-1", "100")).unwrap();

    let already_passed = std::time::Instant::now() - std::time::Duration::from_secs(1);
    let partial = ctx.export_csv_with_deadline(Some(already_passed));
    assert!(partial.error.is_some());
    assert_eq!(partial.sections_completed, 0);

    let complete = ctx.export_csv_with_deadline(None);
    assert!(complete.error.is_none());
    assert_eq!(complete.sections_completed, 4);
}

#[test]
fn anomaly_observer_receives_high_severity_unusual_amount() {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    let mut config = config_without_off_hours();
    config.anomaly.max_amount = rust_decimal::Decimal::from(1_000);
    config.anomaly.enabled_rules = ["unusualAmount"].into_iter().collect();
    let ctx = Context::with_config("proj-1", config);

    let saw_critical = Arc::new(AtomicBool::new(false));
    let saw_critical_clone = Arc::clone(&saw_critical);
    ctx.register_anomaly_observer(Box::new(move |event| {
        if event.severity == Severity::Critical {
            saw_critical_clone.store(true, Ordering::SeqCst);
        }
    }));

    ctx.verify(clean_input("agent-1", "50000")).unwrap();
    assert!(saw_critical.load(Ordering::SeqCst));
}
