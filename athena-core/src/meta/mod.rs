//! # Meta-Memory Store
//!
//! Quality bookkeeping about the memory itself: per-item quality metrics,
//! domain expertise, and attention budgets. Retrieval consults this layer to
//! penalize layers whose recent quality fell below the attention threshold.

use crate::error::{Error, Result};
use crate::types::SubjectKind;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default half-life for quality decay, in days
pub const DEFAULT_QUALITY_HALF_LIFE_DAYS: f32 = 30.0;

/// Quality metrics tracked per subject
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub compression: f32,
    pub recall: f32,
    pub consistency: f32,
}

impl QualityMetrics {
    #[must_use]
    pub fn new(compression: f32, recall: f32, consistency: f32) -> Self {
        Self {
            compression: compression.clamp(0.0, 1.0),
            recall: recall.clamp(0.0, 1.0),
            consistency: consistency.clamp(0.0, 1.0),
        }
    }

    /// Scalar summary used for attention decisions
    #[must_use]
    pub fn composite(&self) -> f32 {
        (self.compression + self.recall + self.consistency) / 3.0
    }
}

impl Default for QualityMetrics {
    fn default() -> Self {
        // Neutral prior: unknown subjects are neither penalized nor boosted
        Self {
            compression: 0.5,
            recall: 0.5,
            consistency: 0.5,
        }
    }
}

/// A quality record about one subject
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaRecord {
    pub subject_kind: SubjectKind,
    /// Uuid string for item subjects, layer/domain name for domain subjects
    pub subject_id: String,
    pub project_id: String,
    pub quality: QualityMetrics,
    pub attention_weight: f32,
    pub last_evaluated: DateTime<Utc>,
}

impl MetaRecord {
    #[must_use]
    pub fn new(
        project_id: impl Into<String>,
        subject_kind: SubjectKind,
        subject_id: impl Into<String>,
    ) -> Self {
        Self {
            subject_kind,
            subject_id: subject_id.into(),
            project_id: project_id.into(),
            quality: QualityMetrics::default(),
            attention_weight: 0.5,
            last_evaluated: Utc::now(),
        }
    }

    /// Fold a new observation into the record: exponential moving average
    /// whose effective alpha grows with elapsed time, so stale records
    /// converge to new evidence faster than fresh ones.
    pub fn observe(&mut self, observed: QualityMetrics, now: DateTime<Utc>) {
        let alpha = ema_alpha(self.last_evaluated, now, DEFAULT_QUALITY_HALF_LIFE_DAYS);
        self.quality = QualityMetrics {
            compression: lerp(self.quality.compression, observed.compression, alpha),
            recall: lerp(self.quality.recall, observed.recall, alpha),
            consistency: lerp(self.quality.consistency, observed.consistency, alpha),
        };
        self.last_evaluated = now;
    }

    /// Quality as seen at `now`, decayed toward the neutral prior with the
    /// configured half-life
    #[must_use]
    pub fn decayed_quality(&self, now: DateTime<Utc>, half_life_days: f32) -> QualityMetrics {
        let days = (now - self.last_evaluated).num_seconds().max(0) as f32 / 86_400.0;
        let retain = 0.5f32.powf(days / half_life_days.max(f32::EPSILON));
        QualityMetrics {
            compression: lerp(0.5, self.quality.compression, retain),
            recall: lerp(0.5, self.quality.recall, retain),
            consistency: lerp(0.5, self.quality.consistency, retain),
        }
    }
}

fn lerp(from: f32, to: f32, alpha: f32) -> f32 {
    from + (to - from) * alpha.clamp(0.0, 1.0)
}

/// EMA alpha from elapsed time: half the distance is covered per half-life,
/// floored so back-to-back observations still register
fn ema_alpha(last: DateTime<Utc>, now: DateTime<Utc>, half_life_days: f32) -> f32 {
    let days = (now - last).num_seconds().max(0) as f32 / 86_400.0;
    let alpha = 1.0 - 0.5f32.powf(days / half_life_days.max(f32::EPSILON));
    alpha.max(0.2)
}

/// Storage interface for the meta layer
#[async_trait]
pub trait MetaStore: Send + Sync {
    /// Record observed quality for a subject (EMA fold)
    async fn record_quality(
        &self,
        project_id: &str,
        subject_kind: SubjectKind,
        subject_id: &str,
        metrics: QualityMetrics,
    ) -> Result<()>;

    /// Current (decayed) quality for a subject; neutral prior when absent
    async fn get_quality(
        &self,
        project_id: &str,
        subject_kind: SubjectKind,
        subject_id: &str,
    ) -> Result<QualityMetrics>;

    /// Expertise for a domain: decayed composite quality
    async fn domain_expertise(&self, project_id: &str, domain: &str) -> Result<f32>;

    /// Attention budget for a project, bounded [0, 1]
    async fn attention_budget(&self, project_id: &str) -> Result<f32>;

    /// Shift the attention budget by `delta`, clamped to [0, 1]
    async fn update_attention(&self, project_id: &str, delta: f32) -> Result<f32>;
}

/// Attention weight for a memory layer given its recent quality.
///
/// Layers at or above the threshold keep full weight; below it the weight
/// scales down proportionally, bottoming out at 0.25 so a degraded layer is
/// demoted rather than silenced.
#[must_use]
pub fn layer_attention_weight(quality: f32, threshold: f32) -> f32 {
    if quality >= threshold {
        1.0
    } else {
        (0.25 + 0.75 * (quality / threshold.max(f32::EPSILON))).clamp(0.25, 1.0)
    }
}

/// Validate an attention delta before applying
pub fn validate_attention_delta(delta: f32) -> Result<()> {
    if !(-1.0..=1.0).contains(&delta) {
        return Err(Error::InvalidInput(
            "attention delta must be in [-1, 1]".into(),
        ));
    }
    Ok(())
}
