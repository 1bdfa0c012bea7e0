//! # Observer & Metrics
//!
//! Records every verification decision in a bounded ring buffer and derives
//! operational signals from it: per-operation pass rates, linear-regression
//! trends, two-sigma anomalies, a weighted system health score, and a
//! feedback loop that proposes (never applies) gate threshold adjustments.

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use uuid::Uuid;

/// Default ring-buffer retention
pub const DEFAULT_RETENTION: usize = 10_000;
/// Labeled outcomes required before a threshold proposal
pub const PROPOSAL_MIN_OUTCOMES: usize = 50;

/// One recorded gate decision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub id: Uuid,
    pub operation: String,
    pub timestamp: DateTime<Utc>,
    pub gates_run: Vec<String>,
    pub violations: Vec<String>,
    pub confidence: f32,
    pub passed: bool,
    /// Latency of the guarded operation, when measured
    pub latency_ms: Option<u64>,
    /// Filled in by the feedback loop
    pub outcome: Option<String>,
    pub correct: Option<bool>,
}

/// Trend classification over a window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendClass {
    Improving,
    Flat,
    Degrading,
}

/// Pass-rate health for one operation kind
#[derive(Debug, Clone, Serialize)]
pub struct OperationHealth {
    pub operation: String,
    pub total: usize,
    pub passed: usize,
    pub pass_rate: f32,
    pub trend: TrendClass,
}

/// An observation outside the two-sigma band
#[derive(Debug, Clone, Serialize)]
pub struct Anomaly {
    pub decision_id: Uuid,
    pub operation: String,
    pub confidence: f32,
    pub mean: f32,
    pub stddev: f32,
}

/// Proposed (not applied) gate threshold adjustment
#[derive(Debug, Clone, Serialize)]
pub struct ThresholdProposal {
    pub gate: String,
    pub current: f32,
    pub proposed: f32,
    pub supporting_outcomes: usize,
}

/// Weighted system health score inputs
#[derive(Debug, Clone, Copy, Serialize)]
pub struct HealthBreakdown {
    pub gate_pass_rate: f32,
    pub decision_accuracy: f32,
    pub latency_sla: f32,
    pub error_rate_inverse: f32,
    pub score: f32,
}

/// Decision log with derived metrics
pub struct Observer {
    retention: usize,
    window: Duration,
    /// Latency SLA used for the health score, in milliseconds
    latency_sla_ms: u64,
    records: RwLock<VecDeque<DecisionRecord>>,
}

impl Observer {
    #[must_use]
    pub fn new(retention: usize) -> Self {
        Self {
            retention: retention.max(1),
            window: Duration::hours(1),
            latency_sla_ms: 300,
            records: RwLock::new(VecDeque::new()),
        }
    }

    /// Record a decision, evicting the oldest past retention
    pub fn record(&self, record: DecisionRecord) {
        let mut records = self.records.write();
        if records.len() >= self.retention {
            records.pop_front();
        }
        records.push_back(record);
    }

    /// Record a failure outside the gate path (e.g. a consolidation
    /// promotion failure) so operational problems land in the same log
    pub fn record_failure(&self, operation: &str, violation: &str) {
        self.record(DecisionRecord {
            id: Uuid::new_v4(),
            operation: operation.to_string(),
            timestamp: Utc::now(),
            gates_run: Vec::new(),
            violations: vec![violation.to_string()],
            confidence: 0.0,
            passed: false,
            latency_ms: None,
            outcome: None,
            correct: None,
        });
    }

    /// Most recent decisions, newest first
    #[must_use]
    pub fn recent(&self, limit: usize) -> Vec<DecisionRecord> {
        let records = self.records.read();
        records.iter().rev().take(limit).cloned().collect()
    }

    /// Decisions with violations, newest first
    #[must_use]
    pub fn violations(&self, limit: usize) -> Vec<DecisionRecord> {
        let records = self.records.read();
        records
            .iter()
            .rev()
            .filter(|r| !r.violations.is_empty())
            .take(limit)
            .cloned()
            .collect()
    }

    /// Attach a labeled outcome to a decision; returns false when unknown
    pub fn record_outcome(&self, decision_id: Uuid, actual: &str, correct: bool) -> bool {
        let mut records = self.records.write();
        for record in records.iter_mut() {
            if record.id == decision_id {
                record.outcome = Some(actual.to_string());
                record.correct = Some(correct);
                return true;
            }
        }
        false
    }

    /// Pass-rate health per operation over the window
    #[must_use]
    pub fn operation_health(&self, now: DateTime<Utc>) -> Vec<OperationHealth> {
        let records = self.records.read();
        let cutoff = now - self.window;
        let mut by_op: HashMap<&str, Vec<&DecisionRecord>> = HashMap::new();
        for record in records.iter().filter(|r| r.timestamp >= cutoff) {
            by_op.entry(record.operation.as_str()).or_default().push(record);
        }

        let mut health: Vec<OperationHealth> = by_op
            .into_iter()
            .map(|(operation, group)| {
                let total = group.len();
                let passed = group.iter().filter(|r| r.passed).count();
                let trend = trend_of(&group);
                OperationHealth {
                    operation: operation.to_string(),
                    total,
                    passed,
                    pass_rate: passed as f32 / total.max(1) as f32,
                    trend,
                }
            })
            .collect();
        health.sort_by(|a, b| a.operation.cmp(&b.operation));
        health
    }

    /// Confidence values outside mean ± 2 sigma over the window
    #[must_use]
    pub fn anomalies(&self, now: DateTime<Utc>) -> Vec<Anomaly> {
        let records = self.records.read();
        let cutoff = now - self.window;
        let window: Vec<&DecisionRecord> =
            records.iter().filter(|r| r.timestamp >= cutoff).collect();
        if window.len() < 4 {
            return Vec::new();
        }

        let values: Vec<f32> = window.iter().map(|r| r.confidence).collect();
        let mean = values.iter().sum::<f32>() / values.len() as f32;
        let variance =
            values.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / values.len() as f32;
        let stddev = variance.sqrt();
        if stddev == 0.0 {
            return Vec::new();
        }

        window
            .into_iter()
            .filter(|r| (r.confidence - mean).abs() > 2.0 * stddev)
            .map(|r| Anomaly {
                decision_id: r.id,
                operation: r.operation.clone(),
                confidence: r.confidence,
                mean,
                stddev,
            })
            .collect()
    }

    /// Weighted system health score:
    /// 0.4 gate pass rate + 0.3 decision accuracy + 0.2 latency SLA +
    /// 0.1 inverse error rate
    #[must_use]
    pub fn health_score(&self, now: DateTime<Utc>) -> HealthBreakdown {
        let records = self.records.read();
        let cutoff = now - self.window;
        let window: Vec<&DecisionRecord> =
            records.iter().filter(|r| r.timestamp >= cutoff).collect();

        if window.is_empty() {
            // No evidence: healthy by default
            return HealthBreakdown {
                gate_pass_rate: 1.0,
                decision_accuracy: 1.0,
                latency_sla: 1.0,
                error_rate_inverse: 1.0,
                score: 1.0,
            };
        }

        let gate_pass_rate =
            window.iter().filter(|r| r.passed).count() as f32 / window.len() as f32;

        let labeled: Vec<&&DecisionRecord> =
            window.iter().filter(|r| r.correct.is_some()).collect();
        let decision_accuracy = if labeled.is_empty() {
            1.0
        } else {
            labeled.iter().filter(|r| r.correct == Some(true)).count() as f32
                / labeled.len() as f32
        };

        let timed: Vec<u64> = window.iter().filter_map(|r| r.latency_ms).collect();
        let latency_sla = if timed.is_empty() {
            1.0
        } else {
            timed.iter().filter(|&&ms| ms <= self.latency_sla_ms).count() as f32
                / timed.len() as f32
        };

        let hard_errors = window
            .iter()
            .filter(|r| !r.passed && r.violations.iter().any(|v| v.starts_with("hard:")))
            .count();
        let error_rate_inverse = 1.0 - hard_errors as f32 / window.len() as f32;

        let score = 0.4 * gate_pass_rate
            + 0.3 * decision_accuracy
            + 0.2 * latency_sla
            + 0.1 * error_rate_inverse;

        HealthBreakdown {
            gate_pass_rate,
            decision_accuracy,
            latency_sla,
            error_rate_inverse,
            score,
        }
    }

    /// Propose a confidence-floor adjustment when accuracy improved
    /// monotonically over at least [`PROPOSAL_MIN_OUTCOMES`] labeled
    /// outcomes. Proposal only; callers decide whether to apply.
    #[must_use]
    pub fn threshold_proposal(&self, current_floor: f32) -> Option<ThresholdProposal> {
        let records = self.records.read();
        let labeled: Vec<&DecisionRecord> =
            records.iter().filter(|r| r.correct.is_some()).collect();
        if labeled.len() < PROPOSAL_MIN_OUTCOMES {
            return None;
        }

        // Accuracy per consecutive chunk must be non-decreasing
        let chunk = labeled.len() / 5;
        if chunk == 0 {
            return None;
        }
        let accuracies: Vec<f32> = labeled
            .chunks(chunk)
            .map(|c| {
                c.iter().filter(|r| r.correct == Some(true)).count() as f32 / c.len() as f32
            })
            .collect();
        let monotone = accuracies.windows(2).all(|w| w[1] >= w[0] - 1e-6);
        if !monotone {
            return None;
        }

        Some(ThresholdProposal {
            gate: "confidence_floor".to_string(),
            current: current_floor,
            proposed: (current_floor * 0.9).max(0.05),
            supporting_outcomes: labeled.len(),
        })
    }
}

impl Default for Observer {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION)
    }
}

/// Least-squares slope of pass/fail (1/0) over observation index
fn trend_of(records: &[&DecisionRecord]) -> TrendClass {
    if records.len() < 4 {
        return TrendClass::Flat;
    }
    let n = records.len() as f32;
    let mean_x = (n - 1.0) / 2.0;
    let mean_y =
        records.iter().filter(|r| r.passed).count() as f32 / n;

    let mut num = 0.0f32;
    let mut den = 0.0f32;
    for (i, record) in records.iter().enumerate() {
        let x = i as f32 - mean_x;
        let y = f32::from(u8::from(record.passed)) - mean_y;
        num += x * y;
        den += x * x;
    }
    if den == 0.0 {
        return TrendClass::Flat;
    }
    let slope = num / den;
    if slope > 0.005 {
        TrendClass::Improving
    } else if slope < -0.005 {
        TrendClass::Degrading
    } else {
        TrendClass::Flat
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decision(operation: &str, passed: bool, confidence: f32) -> DecisionRecord {
        DecisionRecord {
            id: Uuid::new_v4(),
            operation: operation.to_string(),
            timestamp: Utc::now(),
            gates_run: vec!["confidence_floor".to_string()],
            violations: if passed { vec![] } else { vec!["confidence_floor".to_string()] },
            confidence,
            passed,
            latency_ms: Some(50),
            outcome: None,
            correct: None,
        }
    }

    #[test]
    fn test_ring_buffer_retention() {
        let observer = Observer::new(3);
        for i in 0..5 {
            observer.record(decision(&format!("op{i}"), true, 0.9));
        }
        let recent = observer.recent(10);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].operation, "op4");
    }

    #[test]
    fn test_operation_health_pass_rate() {
        let observer = Observer::default();
        for _ in 0..8 {
            observer.record(decision("recall", true, 0.8));
        }
        for _ in 0..2 {
            observer.record(decision("recall", false, 0.2));
        }
        let health = observer.operation_health(Utc::now());
        let recall = health.iter().find(|h| h.operation == "recall").unwrap();
        assert_eq!(recall.total, 10);
        assert!((recall.pass_rate - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_trend_degrading() {
        let observer = Observer::default();
        for i in 0..20 {
            observer.record(decision("store", i < 10, 0.5));
        }
        let health = observer.operation_health(Utc::now());
        let store = health.iter().find(|h| h.operation == "store").unwrap();
        assert_eq!(store.trend, TrendClass::Degrading);
    }

    #[test]
    fn test_anomaly_detection() {
        let observer = Observer::default();
        for _ in 0..30 {
            observer.record(decision("recall", true, 0.80));
        }
        // Tight cluster with a mild spread, then a far outlier
        for _ in 0..5 {
            observer.record(decision("recall", true, 0.78));
        }
        observer.record(decision("recall", true, 0.05));

        let anomalies = observer.anomalies(Utc::now());
        assert_eq!(anomalies.len(), 1);
        assert!((anomalies[0].confidence - 0.05).abs() < 1e-6);
    }

    #[test]
    fn test_health_score_weights() {
        let observer = Observer::default();
        for _ in 0..10 {
            observer.record(decision("recall", true, 0.9));
        }
        let health = observer.health_score(Utc::now());
        assert!((health.score - 1.0).abs() < 1e-6);

        for _ in 0..10 {
            observer.record(decision("recall", false, 0.1));
        }
        let degraded = observer.health_score(Utc::now());
        assert!(degraded.score < health.score);
        assert!((degraded.gate_pass_rate - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_feedback_loop_and_proposal() {
        let observer = Observer::default();
        let mut ids = Vec::new();
        for _ in 0..60 {
            let d = decision("recall", true, 0.8);
            ids.push(d.id);
            observer.record(d);
        }
        // Label outcomes with improving accuracy: early chunk mixed, later
        // chunks perfect
        for (i, id) in ids.iter().enumerate() {
            let correct = i >= 10 || i % 2 == 0;
            assert!(observer.record_outcome(*id, "served", correct));
        }

        let proposal = observer.threshold_proposal(0.3).unwrap();
        assert_eq!(proposal.gate, "confidence_floor");
        assert!(proposal.proposed < proposal.current);
        assert_eq!(proposal.supporting_outcomes, 60);
    }

    #[test]
    fn test_no_proposal_below_minimum_outcomes() {
        let observer = Observer::default();
        for _ in 0..10 {
            let d = decision("recall", true, 0.8);
            let id = d.id;
            observer.record(d);
            observer.record_outcome(id, "served", true);
        }
        assert!(observer.threshold_proposal(0.3).is_none());
    }

    #[test]
    fn test_record_outcome_unknown_id() {
        let observer = Observer::default();
        assert!(!observer.record_outcome(Uuid::new_v4(), "x", true));
    }
}
