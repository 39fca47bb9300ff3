//! Stateless screening against sanctions and policy thresholds (spec.md
//! 4.3). Pure: identical inputs always yield an identical verdict,
//! including check ordering and recommendation text.

pub mod sdn;

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::Serialize;

use crate::action_store::Severity;
use crate::decimal::Amount;
use crate::value::Value;

#[derive(Debug, Clone)]
pub struct ComplianceInput {
    pub tx_hash: Option<String>,
    pub chain: String,
    pub amount: String,
    pub token: String,
    pub from: String,
    pub to: String,
    pub agent_id: String,
    /// Counterparty names for the general (non-crypto) payments path
    /// (spec.md 4.3: "a separate name-based screening path ... exact
    /// case-insensitive substring match against from/to names"). Only
    /// screened when [`ComplianceConfig::general_payments`] is set.
    pub from_name: Option<String>,
    pub to_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ComplianceCheck {
    pub name: &'static str,
    pub passed: bool,
    pub description: String,
    pub severity: Severity,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComplianceVerdict {
    pub compliant: bool,
    pub risk_level: RiskLevel,
    pub checks: Vec<ComplianceCheck>,
    pub recommendations: Vec<String>,
    pub sdn_snapshot_version: &'static str,
}

impl ComplianceVerdict {
    /// Serializes this verdict into the action metadata [`Value`] shape
    /// the Trust Scorer's `compliance_adherence_factor` reads back out of
    /// a `compliance_check` action (`metadata["verdict"]["checks"][i]["passed"]`).
    pub fn to_value(&self) -> Value {
        let mut map = BTreeMap::new();
        map.insert("compliant".to_string(), Value::Bool(self.compliant));
        map.insert("riskLevel".to_string(), Value::str(self.risk_level.as_str()));
        map.insert(
            "checks".to_string(),
            Value::List(self.checks.iter().map(ComplianceCheck::to_value).collect()),
        );
        map.insert(
            "recommendations".to_string(),
            Value::List(self.recommendations.iter().map(|r| Value::str(r.clone())).collect()),
        );
        map.insert(
            "sdnSnapshotVersion".to_string(),
            Value::str(self.sdn_snapshot_version),
        );
        Value::Map(map)
    }
}

impl ComplianceCheck {
    fn to_value(&self) -> Value {
        let mut map = BTreeMap::new();
        map.insert("name".to_string(), Value::str(self.name));
        map.insert("passed".to_string(), Value::Bool(self.passed));
        map.insert("description".to_string(), Value::str(self.description.clone()));
        map.insert("severity".to_string(), Value::str(self.severity.as_str()));
        Value::Map(map)
    }
}

/// Configuration read-mostly at context construction (spec.md 5:
/// "loaded at context construction and treated as immutable until a new
/// reconfigure call").
#[derive(Debug, Clone)]
pub struct ComplianceConfig {
    pub supported_chains: Vec<String>,
    pub supported_tokens: Vec<String>,
    pub edd_threshold: Decimal,
    pub reporting_threshold: Decimal,
    pub reporting_high_threshold: Decimal,
    pub general_payments: bool,
}

impl Default for ComplianceConfig {
    fn default() -> Self {
        Self {
            supported_chains: vec!["base".to_string()],
            supported_tokens: vec![
                "USDC".to_string(),
                "USDT".to_string(),
                "DAI".to_string(),
                "EURC".to_string(),
                "USDP".to_string(),
                "USDG".to_string(),
            ],
            edd_threshold: Decimal::from(3_000),
            reporting_threshold: Decimal::from(10_000),
            reporting_high_threshold: Decimal::from(50_000),
            general_payments: false,
        }
    }
}

pub struct ComplianceEngine {
    config: ComplianceConfig,
}

impl ComplianceEngine {
    pub fn new(config: ComplianceConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ComplianceConfig {
        &self.config
    }

    pub fn evaluate(&self, input: &ComplianceInput) -> ComplianceVerdict {
        let mut checks = Vec::with_capacity(9);

        checks.push(self.check_chain_support(&input.chain));
        checks.push(self.check_token_type(&input.token));
        checks.push(check_address_format("address_format_sender", &input.from));
        checks.push(check_address_format("address_format_recipient", &input.to));

        let amount = Amount::parse(&input.amount);
        checks.push(check_amount_valid(&input.amount, amount.is_ok()));

        let sender_match = sdn::screen_address(&input.from);
        let recipient_match = sdn::screen_address(&input.to);
        checks.push(check_sanctions("sanctions_sender", &sender_match));
        checks.push(check_sanctions("sanctions_recipient", &recipient_match));

        let decimal_amount = amount.as_ref().ok().map(|a| a.as_decimal());
        checks.push(self.check_edd(decimal_amount));
        checks.push(self.check_reporting_threshold(decimal_amount));

        if let Some(check) = self.check_name_screening(&input.from_name, &input.to_name) {
            checks.push(check);
        }

        let any_sanctions_failed = checks.iter().any(|c| {
            (c.name == "sanctions_sender" || c.name == "sanctions_recipient" || c.name == "name_screening")
                && !c.passed
        });
        let any_high_failed = checks.iter().any(|c| c.severity >= Severity::High && !c.passed);
        let any_medium_failed = checks.iter().any(|c| c.severity == Severity::Medium && !c.passed);

        let risk_level = if any_sanctions_failed {
            RiskLevel::Critical
        } else if any_high_failed {
            RiskLevel::High
        } else if any_medium_failed {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        };

        let compliant = !any_sanctions_failed && !any_high_failed;

        let recommendations = build_recommendations(&checks, &sender_match, &recipient_match);

        ComplianceVerdict {
            compliant,
            risk_level,
            checks,
            recommendations,
            sdn_snapshot_version: sdn::SDN_SNAPSHOT_VERSION,
        }
    }

    fn check_chain_support(&self, chain: &str) -> ComplianceCheck {
        let passed = self
            .config
            .supported_chains
            .iter()
            .any(|c| c.eq_ignore_ascii_case(chain));
        ComplianceCheck {
            name: "chain_support",
            passed,
            description: if passed {
                format!("chain {chain} is supported")
            } else {
                format!("chain {chain} is not in the supported chain set")
            },
            severity: Severity::High,
        }
    }

    fn check_token_type(&self, token: &str) -> ComplianceCheck {
        let passed = self
            .config
            .supported_tokens
            .iter()
            .any(|t| t.eq_ignore_ascii_case(token));
        ComplianceCheck {
            name: "token_type",
            passed,
            description: if passed {
                format!("{token} is a supported stablecoin")
            } else {
                format!("{token} is not a supported stablecoin")
            },
            severity: Severity::High,
        }
    }

    fn check_edd(&self, amount: Option<Decimal>) -> ComplianceCheck {
        let triggered = amount.map(|a| a >= self.config.edd_threshold).unwrap_or(false);
        ComplianceCheck {
            name: "enhanced_due_diligence",
            passed: !triggered,
            description: if triggered {
                format!("amount meets or exceeds the ${} enhanced due diligence threshold", self.config.edd_threshold)
            } else {
                "amount is below the enhanced due diligence threshold".to_string()
            },
            severity: Severity::Medium,
        }
    }

    /// Optional secondary screening path for general payments (spec.md
    /// 4.3, 9 Open Question: "treat name-based screening as optional;
    /// the crypto-address path is mandatory"). Returns `None` when the
    /// plan doesn't enable it or the caller supplied no names, so it
    /// never appears as a check for the crypto-transfer path this
    /// crate's default config targets.
    fn check_name_screening(&self, from_name: &Option<String>, to_name: &Option<String>) -> Option<ComplianceCheck> {
        if !self.config.general_payments {
            return None;
        }
        if from_name.is_none() && to_name.is_none() {
            return None;
        }
        let hit = from_name
            .as_deref()
            .and_then(sdn::screen_name)
            .or_else(|| to_name.as_deref().and_then(sdn::screen_name));
        Some(ComplianceCheck {
            name: "name_screening",
            passed: hit.is_none(),
            description: match hit {
                Some(entity) => format!("matched {entity} on the sanctioned-names list"),
                None => "no sanctioned-name match".to_string(),
            },
            severity: Severity::Critical,
        })
    }

    fn check_reporting_threshold(&self, amount: Option<Decimal>) -> ComplianceCheck {
        let Some(amount) = amount else {
            return ComplianceCheck {
                name: "reporting_threshold",
                passed: true,
                description: "amount could not be parsed; reporting check skipped".to_string(),
                severity: Severity::Medium,
            };
        };
        if amount >= self.config.reporting_high_threshold {
            ComplianceCheck {
                name: "reporting_threshold",
                passed: false,
                description: format!(
                    "amount meets or exceeds the ${} high-severity reporting threshold",
                    self.config.reporting_high_threshold
                ),
                severity: Severity::High,
            }
        } else if amount >= self.config.reporting_threshold {
            ComplianceCheck {
                name: "reporting_threshold",
                passed: false,
                description: format!(
                    "amount meets or exceeds the ${} currency transaction reporting threshold",
                    self.config.reporting_threshold
                ),
                severity: Severity::Medium,
            }
        } else {
            ComplianceCheck {
                name: "reporting_threshold",
                passed: true,
                description: "amount is below the reporting threshold".to_string(),
                severity: Severity::Medium,
            }
        }
    }
}

fn check_amount_valid(raw: &str, ok: bool) -> ComplianceCheck {
    ComplianceCheck {
        name: "amount_valid",
        passed: ok,
        description: if ok {
            "amount is a positive decimal with at most 18 fractional digits".to_string()
        } else {
            format!("amount {raw:?} is not a valid positive decimal")
        },
        severity: Severity::High,
    }
}

fn check_sanctions(name: &'static str, found: &Option<sdn::SdnMatch>) -> ComplianceCheck {
    ComplianceCheck {
        name,
        passed: found.is_none(),
        description: match found {
            Some(m) => format!("matched {} on {} ({})", m.entity, m.list_name, m.matched_address),
            None => "no sanctions match".to_string(),
        },
        severity: Severity::Critical,
    }
}

fn check_address_format(name: &'static str, address: &str) -> ComplianceCheck {
    let passed = is_valid_address(address);
    ComplianceCheck {
        name,
        passed,
        description: if passed {
            "address format is valid".to_string()
        } else {
            format!("{address:?} is not a valid 0x or base58 address")
        },
        severity: Severity::High,
    }
}

fn is_valid_address(address: &str) -> bool {
    is_valid_evm_address(address) || is_valid_solana_address(address)
}

fn is_valid_evm_address(address: &str) -> bool {
    address.len() == 42
        && address.starts_with("0x")
        && address[2..].chars().all(|c| c.is_ascii_hexdigit())
}

fn is_valid_solana_address(address: &str) -> bool {
    const ALPHABET: &str = "123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";
    (32..=44).contains(&address.len()) && address.chars().all(|c| ALPHABET.contains(c))
}

fn build_recommendations(
    checks: &[ComplianceCheck],
    sender_match: &Option<sdn::SdnMatch>,
    recipient_match: &Option<sdn::SdnMatch>,
) -> Vec<String> {
    let mut recs = Vec::new();
    if let Some(m) = sender_match {
        recs.push(format!("BLOCK: sender matches {} on {}", m.entity, m.list_name));
    }
    if let Some(m) = recipient_match {
        recs.push(format!("BLOCK: recipient matches {} on {}", m.entity, m.list_name));
    }
    for check in checks {
        if check.passed {
            continue;
        }
        match check.name {
            "chain_support" => recs.push("reject: unsupported chain".to_string()),
            "token_type" => recs.push("reject: unsupported token".to_string()),
            "address_format_sender" | "address_format_recipient" => {
                recs.push(format!("reject: {}", check.description))
            }
            "amount_valid" => recs.push("reject: amount failed validation".to_string()),
            "enhanced_due_diligence" => {
                recs.push("file enhanced due diligence documentation".to_string())
            }
            "reporting_threshold" if check.severity == Severity::High => {
                recs.push("file a currency transaction report before settlement".to_string())
            }
            "reporting_threshold" => recs.push("file a currency transaction report".to_string()),
            "name_screening" => recs.push(format!("BLOCK: {}", check.description)),
            _ => {}
        }
    }
    recs
}
