//! libSQL meta-memory store.

use super::{from_millis, to_millis};
use crate::pool::DbPool;
use athena_core::error::Result;
use athena_core::meta::{
    validate_attention_delta, MetaRecord, MetaStore, QualityMetrics,
    DEFAULT_QUALITY_HALF_LIFE_DAYS,
};
use athena_core::types::SubjectKind;
use async_trait::async_trait;
use chrono::Utc;
use libsql::params;
use std::sync::Arc;

/// Quality records and attention budgets over libSQL
pub struct LibsqlMetaStore {
    pool: Arc<DbPool>,
}

impl LibsqlMetaStore {
    #[must_use]
    pub fn new(pool: Arc<DbPool>) -> Self {
        Self { pool }
    }

    async fn load(
        &self,
        project_id: &str,
        subject_kind: SubjectKind,
        subject_id: &str,
    ) -> Result<Option<MetaRecord>> {
        let conn = self.pool.acquire().await?;
        let mut rows = conn
            .query(
                "SELECT compression, recall, consistency, attention_weight, last_evaluated \
                 FROM meta_records WHERE project_id = ? AND subject_kind = ? AND subject_id = ?",
                params![project_id, subject_kind.as_str(), subject_id],
            )
            .await?;
        match rows.next().await.map_err(crate::migrations::driver)? {
            Some(row) => {
                let mut record = MetaRecord::new(project_id, subject_kind, subject_id);
                record.quality = QualityMetrics::new(
                    row.get::<f64>(0).map_err(crate::migrations::driver)? as f32,
                    row.get::<f64>(1).map_err(crate::migrations::driver)? as f32,
                    row.get::<f64>(2).map_err(crate::migrations::driver)? as f32,
                );
                record.attention_weight =
                    row.get::<f64>(3).map_err(crate::migrations::driver)? as f32;
                record.last_evaluated =
                    from_millis(row.get(4).map_err(crate::migrations::driver)?);
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    async fn save(&self, record: &MetaRecord) -> Result<()> {
        let conn = self.pool.acquire().await?;
        conn.execute(
            "INSERT OR REPLACE INTO meta_records (project_id, subject_kind, subject_id, \
             compression, recall, consistency, attention_weight, last_evaluated) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                record.project_id.clone(),
                record.subject_kind.as_str(),
                record.subject_id.clone(),
                f64::from(record.quality.compression),
                f64::from(record.quality.recall),
                f64::from(record.quality.consistency),
                f64::from(record.attention_weight),
                to_millis(record.last_evaluated),
            ],
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl MetaStore for LibsqlMetaStore {
    async fn record_quality(
        &self,
        project_id: &str,
        subject_kind: SubjectKind,
        subject_id: &str,
        metrics: QualityMetrics,
    ) -> Result<()> {
        let mut record = self
            .load(project_id, subject_kind, subject_id)
            .await?
            .unwrap_or_else(|| MetaRecord::new(project_id, subject_kind, subject_id));
        record.observe(metrics, Utc::now());
        self.save(&record).await
    }

    async fn get_quality(
        &self,
        project_id: &str,
        subject_kind: SubjectKind,
        subject_id: &str,
    ) -> Result<QualityMetrics> {
        Ok(self
            .load(project_id, subject_kind, subject_id)
            .await?
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
        let conn = self.pool.acquire().await?;
        let mut rows = conn
            .query(
                "SELECT budget FROM attention_budgets WHERE project_id = ?",
                params![project_id],
            )
            .await?;
        match rows.next().await.map_err(crate::migrations::driver)? {
            Some(row) => Ok(row.get::<f64>(0).map_err(crate::migrations::driver)? as f32),
            None => Ok(0.5),
        }
    }

    async fn update_attention(&self, project_id: &str, delta: f32) -> Result<f32> {
        validate_attention_delta(delta)?;
        let current = self.attention_budget(project_id).await?;
        let updated = (current + delta).clamp(0.0, 1.0);
        let conn = self.pool.acquire().await?;
        conn.execute(
            "INSERT OR REPLACE INTO attention_budgets (project_id, budget, updated_at) \
             VALUES (?, ?, ?)",
            params![project_id, f64::from(updated), to_millis(Utc::now())],
        )
        .await?;
        Ok(updated)
    }
}
