//! # Verification Gateway
//!
//! Seven quality gates applied to retrieve and store operations before the
//! result leaves the engine. Soft failures adjust confidence and remediate
//! (drop items, cap lists, mark degraded); hard failures (dimension,
//! cardinality) abort the operation with `VerificationFailed`.

use crate::error::{Error, Result};
use crate::observer::{DecisionRecord, Observer};
use crate::types::VerifyConfig;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

/// Operation class a verification applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Retrieve,
    Store,
}

/// Normalized view of one item under verification
#[derive(Debug, Clone)]
pub struct VerifyItem {
    pub id: Uuid,
    pub score: f32,
    /// Set for consolidated semantic results: provenance must be non-empty
    pub consolidated_semantic: bool,
    pub provenance_count: usize,
    /// Pairwise contradiction flag set upstream
    pub contradiction: bool,
    /// Embedding length when the item was scored through a vector
    pub vector_len: Option<usize>,
    /// Age of prospective/active items
    pub age_seconds: Option<i64>,
    /// Durable items are exempt from freshness
    pub durable: bool,
}

impl VerifyItem {
    #[must_use]
    pub fn scored(id: Uuid, score: f32) -> Self {
        Self {
            id,
            score,
            consolidated_semantic: false,
            provenance_count: 0,
            contradiction: false,
            vector_len: None,
            age_seconds: None,
            durable: true,
        }
    }
}

/// A verification request assembled by the caller
#[derive(Debug, Clone)]
pub struct VerifyRequest {
    pub op: OpKind,
    /// Operation name for the decision log
    pub operation: String,
    pub items: Vec<VerifyItem>,
    /// Declared result budget (k)
    pub k: usize,
    /// Payload size for store operations
    pub payload_bytes: Option<usize>,
    /// Batch length for store operations
    pub batch_len: Option<usize>,
    /// Expected embedding dimension
    pub expected_dimension: usize,
    /// Latency of the operation being verified
    pub latency_ms: Option<u64>,
}

/// Verification verdict with the remediation plan
#[derive(Debug, Clone, Serialize)]
pub struct Verification {
    pub passed: bool,
    pub violations: Vec<String>,
    pub confidence: f32,
    /// Item indices to drop from the result
    pub drop_indices: Vec<usize>,
    /// Cap the result list to this length, when set
    pub cap_to: Option<usize>,
    /// Suggest re-running with query expansion
    pub suggest_expansion: bool,
    pub decision_id: Uuid,
}

const ALL_GATES: [&str; 7] = [
    "grounding",
    "consistency",
    "dimension",
    "confidence_floor",
    "freshness",
    "quota",
    "cardinality",
];

/// The gateway: gate evaluation plus decision logging
pub struct Gateway {
    config: VerifyConfig,
    observer: Arc<Observer>,
}

impl Gateway {
    pub fn new(config: VerifyConfig, observer: Arc<Observer>) -> Self {
        Self { config, observer }
    }

    fn gate_enabled(&self, gate: &str) -> bool {
        self.config.enabled_gates.is_empty()
            || self.config.enabled_gates.iter().any(|g| g == gate)
    }

    /// Run all enabled gates. Hard failures return `VerificationFailed`;
    /// soft failures return a passing-or-failing verdict with remediation.
    pub fn verify(&self, request: &VerifyRequest) -> Result<Verification> {
        let mut violations: Vec<String> = Vec::new();
        let mut confidence: f32 = 1.0;
        let mut drop_indices: Vec<usize> = Vec::new();
        let mut cap_to: Option<usize> = None;
        let mut suggest_expansion = false;
        let gates_run: Vec<String> = ALL_GATES
            .iter()
            .filter(|g| self.gate_enabled(g))
            .map(ToString::to_string)
            .collect();

        // Hard gates first: dimension and cardinality abort outright
        if self.gate_enabled("dimension") {
            for item in &request.items {
                if let Some(len) = item.vector_len {
                    if len != request.expected_dimension {
                        violations.push("hard:dimension".to_string());
                        break;
                    }
                }
            }
        }
        if self.gate_enabled("cardinality") && request.op == OpKind::Store {
            if let Some(bytes) = request.payload_bytes {
                if bytes > self.config.max_payload_bytes {
                    violations.push("hard:cardinality".to_string());
                }
            }
            if let Some(len) = request.batch_len {
                if len > self.config.max_batch_len {
                    violations.push("hard:cardinality".to_string());
                }
            }
        }
        if violations.iter().any(|v| v.starts_with("hard:")) {
            self.log_decision(request, &gates_run, &violations, 0.0, false);
            return Err(Error::VerificationFailed { violations });
        }

        // Grounding: consolidated semantic items need provenance
        if self.gate_enabled("grounding") {
            for (i, item) in request.items.iter().enumerate() {
                if item.consolidated_semantic && item.provenance_count == 0 {
                    violations.push("grounding".to_string());
                    drop_indices.push(i);
                }
            }
            if violations.iter().any(|v| v == "grounding") {
                confidence -= 0.2;
            }
        }

        // Consistency: drop contradicted items
        if self.gate_enabled("consistency") {
            for (i, item) in request.items.iter().enumerate() {
                if item.contradiction && !drop_indices.contains(&i) {
                    violations.push("consistency".to_string());
                    drop_indices.push(i);
                }
            }
            if violations.iter().any(|v| v == "consistency") {
                confidence -= 0.15;
            }
        }

        // Confidence floor: soft failure reduces confidence, suggests
        // expansion rather than dropping results
        if self.gate_enabled("confidence_floor") && request.op == OpKind::Retrieve {
            let top = request
                .items
                .iter()
                .enumerate()
                .filter(|(i, _)| !drop_indices.contains(i))
                .map(|(_, item)| item.score)
                .fold(f32::NEG_INFINITY, f32::max);
            if request.items.is_empty() || top < self.config.confidence_floor {
                violations.push("confidence_floor".to_string());
                confidence -= 0.25;
                suggest_expansion = true;
            }
        }

        // Freshness: stale prospective/active items are dropped unless durable
        if self.gate_enabled("freshness") {
            for (i, item) in request.items.iter().enumerate() {
                if !item.durable {
                    if let Some(age) = item.age_seconds {
                        if age > self.config.freshness_ttl_s && !drop_indices.contains(&i) {
                            violations.push("freshness".to_string());
                            drop_indices.push(i);
                        }
                    }
                }
            }
            if violations.iter().any(|v| v == "freshness") {
                confidence -= 0.1;
            }
        }

        // Quota: cap to k and to the global cap
        if self.gate_enabled("quota") {
            let surviving = request.items.len() - drop_indices.len();
            let cap = request.k.min(self.config.global_cap.max(1));
            if surviving > cap {
                violations.push("quota".to_string());
                cap_to = Some(cap);
                confidence -= 0.05;
            }
        }

        let confidence = confidence.clamp(0.0, 1.0);
        let passed = violations.is_empty();
        drop_indices.sort_unstable();
        drop_indices.dedup();

        let decision_id =
            self.log_decision(request, &gates_run, &violations, confidence, passed);

        Ok(Verification {
            passed,
            violations,
            confidence,
            drop_indices,
            cap_to,
            suggest_expansion,
            decision_id,
        })
    }

    fn log_decision(
        &self,
        request: &VerifyRequest,
        gates_run: &[String],
        violations: &[String],
        confidence: f32,
        passed: bool,
    ) -> Uuid {
        let record = DecisionRecord {
            id: Uuid::new_v4(),
            operation: request.operation.clone(),
            timestamp: Utc::now(),
            gates_run: gates_run.to_vec(),
            violations: violations.to_vec(),
            confidence,
            passed,
            latency_ms: request.latency_ms,
            outcome: None,
            correct: None,
        };
        let id = record.id;
        self.observer.record(record);
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway() -> Gateway {
        Gateway::new(VerifyConfig::default(), Arc::new(Observer::default()))
    }

    fn retrieve_request(items: Vec<VerifyItem>) -> VerifyRequest {
        VerifyRequest {
            op: OpKind::Retrieve,
            operation: "recall".to_string(),
            items,
            k: 5,
            payload_bytes: None,
            batch_len: None,
            expected_dimension: 768,
            latency_ms: Some(40),
        }
    }

    #[test]
    fn test_clean_result_passes_all_gates() {
        let gw = gateway();
        let items = vec![VerifyItem::scored(Uuid::new_v4(), 0.9)];
        let verdict = gw.verify(&retrieve_request(items)).unwrap();
        assert!(verdict.passed);
        assert!(verdict.violations.is_empty());
        assert_eq!(verdict.confidence, 1.0);
    }

    #[test]
    fn test_dimension_mismatch_is_hard_failure() {
        let gw = gateway();
        let mut item = VerifyItem::scored(Uuid::new_v4(), 0.9);
        item.vector_len = Some(384);
        let err = gw.verify(&retrieve_request(vec![item])).unwrap_err();
        assert!(matches!(err, Error::VerificationFailed { .. }));
    }

    #[test]
    fn test_cardinality_over_payload_is_hard_failure() {
        let gw = gateway();
        let request = VerifyRequest {
            op: OpKind::Store,
            operation: "remember".to_string(),
            items: vec![],
            k: 1,
            payload_bytes: Some(10_000_000),
            batch_len: None,
            expected_dimension: 768,
            latency_ms: None,
        };
        assert!(gw.verify(&request).is_err());
    }

    #[test]
    fn test_ungrounded_consolidated_semantic_dropped() {
        let gw = gateway();
        let mut bad = VerifyItem::scored(Uuid::new_v4(), 0.9);
        bad.consolidated_semantic = true;
        bad.provenance_count = 0;
        let good = VerifyItem::scored(Uuid::new_v4(), 0.8);

        let verdict = gw.verify(&retrieve_request(vec![bad, good])).unwrap();
        assert!(!verdict.passed);
        assert_eq!(verdict.drop_indices, vec![0]);
        assert!(verdict.violations.contains(&"grounding".to_string()));
        assert!(verdict.confidence < 1.0);
    }

    #[test]
    fn test_low_top_score_suggests_expansion() {
        let gw = gateway();
        let items = vec![VerifyItem::scored(Uuid::new_v4(), 0.1)];
        let verdict = gw.verify(&retrieve_request(items)).unwrap();
        assert!(!verdict.passed);
        assert!(verdict.suggest_expansion);
        assert!(verdict.violations.contains(&"confidence_floor".to_string()));
    }

    #[test]
    fn test_quota_caps_result() {
        let gw = gateway();
        let items: Vec<VerifyItem> = (0..12)
            .map(|_| VerifyItem::scored(Uuid::new_v4(), 0.9))
            .collect();
        let verdict = gw.verify(&retrieve_request(items)).unwrap();
        assert_eq!(verdict.cap_to, Some(5));
        assert!(verdict.violations.contains(&"quota".to_string()));
    }

    #[test]
    fn test_stale_non_durable_item_dropped() {
        let gw = gateway();
        let mut stale = VerifyItem::scored(Uuid::new_v4(), 0.9);
        stale.durable = false;
        stale.age_seconds = Some(10_000_000);
        let verdict = gw.verify(&retrieve_request(vec![stale])).unwrap();
        assert_eq!(verdict.drop_indices, vec![0]);
        assert!(verdict.violations.contains(&"freshness".to_string()));
    }

    #[test]
    fn test_disabled_gate_skipped() {
        let config = VerifyConfig {
            enabled_gates: vec!["quota".to_string()],
            ..Default::default()
        };
        let gw = Gateway::new(config, Arc::new(Observer::default()));
        // Would fail grounding if enabled
        let mut bad = VerifyItem::scored(Uuid::new_v4(), 0.9);
        bad.consolidated_semantic = true;
        let verdict = gw.verify(&retrieve_request(vec![bad])).unwrap();
        assert!(verdict.passed);
    }

    #[test]
    fn test_decisions_reach_observer() {
        let observer = Arc::new(Observer::default());
        let gw = Gateway::new(VerifyConfig::default(), observer.clone());
        let items = vec![VerifyItem::scored(Uuid::new_v4(), 0.9)];
        let verdict = gw.verify(&retrieve_request(items)).unwrap();

        let recent = observer.recent(1);
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].id, verdict.decision_id);
        assert_eq!(recent[0].operation, "recall");
    }
}
