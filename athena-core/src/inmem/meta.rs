//! In-memory meta-memory store.

use crate::error::Result;
use crate::meta::{
    MetaRecord, MetaStore, QualityMetrics, DEFAULT_QUALITY_HALF_LIFE_DAYS,
};
use crate::types::SubjectKind;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;

type SubjectKey = (String, SubjectKind, String);

/// Quality records and attention budgets held in process memory
#[derive(Default)]
pub struct InMemoryMetaStore {
    records: RwLock<HashMap<SubjectKey, MetaRecord>>,
    attention: RwLock<HashMap<String, f32>>,
}

impl InMemoryMetaStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetaStore for InMemoryMetaStore {
    async fn record_quality(
        &self,
        project_id: &str,
        subject_kind: SubjectKind,
        subject_id: &str,
        metrics: QualityMetrics,
    ) -> Result<()> {
        let key = (
            project_id.to_string(),
            subject_kind,
            subject_id.to_string(),
        );
        let mut records = self.records.write();
        let record = records
            .entry(key)
            .or_insert_with(|| MetaRecord::new(project_id, subject_kind, subject_id));
        record.observe(metrics, Utc::now());
        Ok(())
    }

    async fn get_quality(
        &self,
        project_id: &str,
        subject_kind: SubjectKind,
        subject_id: &str,
    ) -> Result<QualityMetrics> {
        let key = (
            project_id.to_string(),
            subject_kind,
            subject_id.to_string(),
        );
        let records = self.records.read();
        Ok(records
            .get(&key)
            .map(|r| r.decayed_quality(Utc::now(), DEFAULT_QUALITY_HALF_LIFE_DAYS))
            .unwrap_or_default())
    }

    async fn domain_expertise(&self, project_id: &str, domain: &str) -> Result<f32> {
        let quality = self
            .get_quality(project_id, SubjectKind::Domain, domain)
            .await?;
        Ok(quality.composite())
    }

    async fn attention_budget(&self, project_id: &str) -> Result<f32> {
        Ok(self
            .attention
            .read()
            .get(project_id)
            .copied()
            .unwrap_or(0.5))
    }

    async fn update_attention(&self, project_id: &str, delta: f32) -> Result<f32> {
        crate::meta::validate_attention_delta(delta)?;
        let mut attention = self.attention.write();
        let budget = attention.entry(project_id.to_string()).or_insert(0.5);
        *budget = (*budget + delta).clamp(0.0, 1.0);
        Ok(*budget)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unknown_subject_gets_neutral_prior() {
        let store = InMemoryMetaStore::new();
        let quality = store
            .get_quality("proj", SubjectKind::Domain, "semantic")
            .await
            .unwrap();
        assert!((quality.composite() - 0.5).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_record_quality_moves_composite() {
        let store = InMemoryMetaStore::new();
        store
            .record_quality(
                "proj",
                SubjectKind::Domain,
                "semantic",
                QualityMetrics::new(0.9, 0.9, 0.9),
            )
            .await
            .unwrap();
        let quality = store
            .get_quality("proj", SubjectKind::Domain, "semantic")
            .await
            .unwrap();
        assert!(quality.composite() > 0.5);
    }

    #[tokio::test]
    async fn test_attention_budget_clamped() {
        let store = InMemoryMetaStore::new();
        assert!((store.attention_budget("proj").await.unwrap() - 0.5).abs() < 1e-6);

        let up = store.update_attention("proj", 0.9).await.unwrap();
        assert!((up - 1.0).abs() < 1e-6);

        let down = store.update_attention("proj", -1.0).await.unwrap();
        assert!(down.abs() < 1e-6);

        assert!(store.update_attention("proj", 2.0).await.is_err());
    }

    #[tokio::test]
    async fn test_domain_expertise_tracks_quality() {
        let store = InMemoryMetaStore::new();
        store
            .record_quality(
                "proj",
                SubjectKind::Domain,
                "rust",
                QualityMetrics::new(1.0, 1.0, 1.0),
            )
            .await
            .unwrap();
        let expertise = store.domain_expertise("proj", "rust").await.unwrap();
        assert!(expertise > 0.5);
    }
}
