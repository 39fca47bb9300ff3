//! The append-only hash chain that makes every action tamper-evident
//! (spec.md 4.1). Grounded on the teacher's `TradeContext`/`Witness`
//! append pattern (`src/context.rs`), generalized from one witness_set
//! per trade to one chain per `Context`, and on acteon's
//! `HashChainAuditStore::verify_chain` for the "recompute and compare"
//! replay loop.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::action_store::Action;
use crate::error::DigestError;

/// 64 lowercase hex characters encoding 32 zero bytes (spec.md glossary:
/// "Genesis hash"). Computed rather than hand-typed to guarantee length.
pub fn genesis_hash() -> String {
    hex::encode([0u8; 32])
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DigestLink {
    pub sequence: u64,
    pub digest: String,
    pub prior_digest: String,
    pub action_id: String,
    pub action_type: String,
    /// ISO-8601 timestamp plus the monotonic suffix rendered as
    /// `<rfc3339>+<n>`, matching `PreciseTimestamp`'s `Display`.
    pub timestamp: String,
    pub content_fingerprint: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerifyReport {
    pub valid: bool,
    pub links_verified: u64,
    pub failed_at: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainExport {
    pub genesis_hash: String,
    pub terminal_digest: String,
    pub links: Vec<DigestLink>,
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[derive(Default)]
pub struct DigestChain {
    links: Vec<DigestLink>,
    seen_action_ids: std::collections::HashSet<String>,
}

impl DigestChain {
    pub fn new() -> Self {
        Self::default()
    }

    fn tail_digest(&self) -> String {
        self.links.last().map(|l| l.digest.clone()).unwrap_or_else(genesis_hash)
    }

    /// Computes the content fingerprint and digest for `action` and
    /// appends a new link. Fails only if `action.id` is empty or the
    /// action was already appended (I-4); never mutates the tail on
    /// failure.
    pub fn append(&mut self, action: &Action) -> Result<DigestLink, DigestError> {
        if action.id.trim().is_empty() {
            return Err(DigestError::EmptyActionId);
        }
        if self.seen_action_ids.contains(&action.id) {
            return Err(DigestError::DuplicateAction(action.id.clone()));
        }

        let canonical = action.to_canonical_value().to_canonical_json();
        let content_fingerprint = sha256_hex(canonical.as_bytes());
        let prior_digest = self.tail_digest();
        let digest = sha256_hex(format!("{prior_digest}{content_fingerprint}").as_bytes());

        let link = DigestLink {
            sequence: self.links.len() as u64 + 1,
            digest,
            prior_digest,
            action_id: action.id.clone(),
            action_type: action.action_type.as_str().to_string(),
            timestamp: action.timestamp.to_string(),
            content_fingerprint,
        };

        self.seen_action_ids.insert(action.id.clone());
        self.links.push(link.clone());
        Ok(link)
    }

    /// O(1): last link's digest, or genesis if empty.
    pub fn terminal_digest(&self) -> String {
        self.tail_digest()
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Replays the chain, recomputing `digest = SHA256(priorDigest ||
    /// contentFingerprint)` for each link and checking it against both
    /// the stored digest and the previous link's digest (I-1, I-3).
    pub fn verify(&self) -> VerifyReport {
        let mut prior = genesis_hash();
        for link in &self.links {
            if link.prior_digest != prior {
                return VerifyReport {
                    valid: false,
                    links_verified: link.sequence - 1,
                    failed_at: Some(link.sequence),
                };
            }
            let recomputed = sha256_hex(format!("{}{}", link.prior_digest, link.content_fingerprint).as_bytes());
            if recomputed != link.digest {
                return VerifyReport {
                    valid: false,
                    links_verified: link.sequence - 1,
                    failed_at: Some(link.sequence),
                };
            }
            prior = link.digest.clone();
        }
        VerifyReport {
            valid: true,
            links_verified: self.links.len() as u64,
            failed_at: None,
        }
    }

    /// Stronger check: also recomputes `contentFingerprint` from the
    /// provided action bodies and compares, for verifying exported
    /// chains where the caller supplies the action bodies independently.
    pub fn verify_content(&self, actions: &[Action]) -> VerifyReport {
        use std::collections::HashMap;
        let by_id: HashMap<&str, &Action> = actions.iter().map(|a| (a.id.as_str(), a)).collect();

        let mut prior = genesis_hash();
        for link in &self.links {
            if link.prior_digest != prior {
                return VerifyReport {
                    valid: false,
                    links_verified: link.sequence - 1,
                    failed_at: Some(link.sequence),
                };
            }
            let Some(action) = by_id.get(link.action_id.as_str()) else {
                return VerifyReport {
                    valid: false,
                    links_verified: link.sequence - 1,
                    failed_at: Some(link.sequence),
                };
            };
            let canonical = action.to_canonical_value().to_canonical_json();
            let recomputed_fingerprint = sha256_hex(canonical.as_bytes());
            if recomputed_fingerprint != link.content_fingerprint {
                return VerifyReport {
                    valid: false,
                    links_verified: link.sequence - 1,
                    failed_at: Some(link.sequence),
                };
            }
            let recomputed_digest =
                sha256_hex(format!("{}{}", link.prior_digest, recomputed_fingerprint).as_bytes());
            if recomputed_digest != link.digest {
                return VerifyReport {
                    valid: false,
                    links_verified: link.sequence - 1,
                    failed_at: Some(link.sequence),
                };
            }
            prior = link.digest.clone();
        }
        VerifyReport {
            valid: true,
            links_verified: self.links.len() as u64,
            failed_at: None,
        }
    }

    pub fn export(&self) -> ChainExport {
        ChainExport {
            genesis_hash: genesis_hash(),
            terminal_digest: self.terminal_digest(),
            links: self.links.clone(),
        }
    }

    /// Read-only range access; does not mutate. `from`/`to` are 1-based
    /// sequence numbers, inclusive.
    pub fn slice(&self, from: u64, to: u64) -> Vec<DigestLink> {
        self.links
            .iter()
            .filter(|l| l.sequence >= from && l.sequence <= to)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action_store::ActionType;

    fn action(id: &str) -> Action {
        Action::new(id, "proj-1", "agent-1", ActionType::Reasoning, "test")
    }

    #[test]
    fn empty_chain_terminal_is_genesis() {
        let chain = DigestChain::new();
        assert_eq!(chain.terminal_digest(), genesis_hash());
        let report = chain.verify();
        assert!(report.valid);
        assert_eq!(report.links_verified, 0);
    }

    #[test]
    fn append_links_chain_continuity() {
        let mut chain = DigestChain::new();
        let mut a1 = action("a1");
        a1.sequence = 1;
        let mut a2 = action("a2");
        a2.sequence = 2;

        let l1 = chain.append(&a1).unwrap();
        let l2 = chain.append(&a2).unwrap();

        assert_eq!(l1.prior_digest, genesis_hash());
        assert_eq!(l2.prior_digest, l1.digest);
        assert!(chain.verify().valid);
    }

    #[test]
    fn rejects_empty_action_id() {
        let mut chain = DigestChain::new();
        let a = action("");
        assert!(matches!(chain.append(&a), Err(DigestError::EmptyActionId)));
    }

    #[test]
    fn rejects_duplicate_action_id() {
        let mut chain = DigestChain::new();
        chain.append(&action("dup")).unwrap();
        let err = chain.append(&action("dup")).unwrap_err();
        assert!(matches!(err, DigestError::DuplicateAction(_)));
    }

    #[test]
    fn append_failure_does_not_alter_tail() {
        let mut chain = DigestChain::new();
        chain.append(&action("a1")).unwrap();
        let tail_before = chain.terminal_digest();
        let _ = chain.append(&action("a1"));
        assert_eq!(chain.terminal_digest(), tail_before);
    }

    #[test]
    fn verify_content_detects_tampered_action() {
        let mut chain = DigestChain::new();
        for i in 0..10 {
            chain.append(&action(&format!("a{i}"))).unwrap();
        }
        let mut actions: Vec<Action> = (0..10).map(|i| action(&format!("a{i}"))).collect();
        // Tamper with the 5th action's id field content (index 4, sequence 5).
        actions[4].description = "tampered".to_string();

        let report = chain.verify_content(&actions);
        assert!(!report.valid);
        assert_eq!(report.failed_at, Some(5));
    }

    #[test]
    fn export_round_trips_to_valid_chain() {
        let mut chain = DigestChain::new();
        for i in 0..5 {
            chain.append(&action(&format!("a{i}"))).unwrap();
        }
        let export = chain.export();
        assert_eq!(export.links.len(), 5);
        assert_eq!(export.terminal_digest, chain.terminal_digest());

        // Re-hydrate a chain purely from exported links and verify.
        let mut rebuilt = DigestChain::new();
        rebuilt.links = export.links.clone();
        assert!(rebuilt.verify().valid);
    }

    #[test]
    fn slice_is_read_only_range_access() {
        let mut chain = DigestChain::new();
        for i in 0..5 {
            chain.append(&action(&format!("a{i}"))).unwrap();
        }
        let mid = chain.slice(2, 4);
        assert_eq!(mid.len(), 3);
        assert_eq!(mid[0].sequence, 2);
        assert_eq!(mid[2].sequence, 4);
        assert_eq!(chain.len(), 5);
    }
}
