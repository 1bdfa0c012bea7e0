//! In-memory procedural store.

use crate::error::{Error, Result};
use crate::procedural::{Procedure, ProceduralStore, ProcedureStep};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use uuid::Uuid;

/// Versioned procedures held in process memory
#[derive(Default)]
pub struct InMemoryProceduralStore {
    rows: RwLock<HashMap<Uuid, Procedure>>,
}

impl InMemoryProceduralStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProceduralStore for InMemoryProceduralStore {
    async fn create(&self, procedure: Procedure) -> Result<Uuid> {
        procedure.validate()?;
        let mut rows = self.rows.write();
        let exists = rows.values().any(|p| {
            p.project_id == procedure.project_id
                && p.name == procedure.name
                && p.version == procedure.version
        });
        if exists {
            return Err(Error::InvalidInput(format!(
                "procedure {} version {} already exists",
                procedure.name, procedure.version
            )));
        }
        let id = procedure.id;
        rows.insert(id, procedure);
        Ok(id)
    }

    async fn new_version(
        &self,
        project_id: &str,
        name: &str,
        steps: Vec<ProcedureStep>,
        rationale: &str,
    ) -> Result<Procedure> {
        let mut rows = self.rows.write();
        let latest = rows
            .values()
            .filter(|p| p.project_id == project_id && p.name == name)
            .max_by_key(|p| p.version)
            .cloned()
            .ok_or_else(|| Error::InvalidInput(format!("unknown procedure '{name}'")))?;

        let mut next = Procedure::new(project_id, name, steps);
        next.version = latest.version + 1;
        next.category = latest.category.clone();
        next.trigger_pattern = latest.trigger_pattern.clone();
        next.description = if rationale.is_empty() {
            latest.description.clone()
        } else {
            rationale.to_string()
        };
        next.validate()?;
        rows.insert(next.id, next.clone());
        Ok(next)
    }

    async fn record_execution(&self, id: Uuid, success: bool, duration_ms: u64) -> Result<()> {
        let _ = duration_ms;
        let mut rows = self.rows.write();
        let procedure = rows.get_mut(&id).ok_or(Error::NotFound(id))?;
        procedure.execution_count += 1;
        if success {
            procedure.success_count += 1;
        }
        procedure.last_executed = Some(Utc::now());
        procedure.updated_at = Utc::now();
        Ok(())
    }

    async fn find(
        &self,
        project_id: &str,
        trigger_context: &str,
        limit: usize,
    ) -> Result<Vec<Procedure>> {
        let rows = self.rows.read();
        // Only the latest version of each name competes
        let mut latest: HashMap<&str, &Procedure> = HashMap::new();
        for procedure in rows.values().filter(|p| p.project_id == project_id) {
            match latest.get(procedure.name.as_str()) {
                Some(existing) if existing.version >= procedure.version => {}
                _ => {
                    latest.insert(procedure.name.as_str(), procedure);
                }
            }
        }

        let now = Utc::now();
        let mut matched: Vec<Procedure> = latest
            .into_values()
            .filter(|p| p.trigger_matches(trigger_context))
            .cloned()
            .collect();
        matched.sort_by(|a, b| {
            b.ranking_score(now)
                .partial_cmp(&a.ranking_score(now))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        matched.truncate(limit);
        Ok(matched)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Procedure>> {
        Ok(self.rows.read().get(&id).cloned())
    }

    async fn versions(&self, project_id: &str, name: &str) -> Result<Vec<Procedure>> {
        let rows = self.rows.read();
        let mut versions: Vec<Procedure> = rows
            .values()
            .filter(|p| p.project_id == project_id && p.name == name)
            .cloned()
            .collect();
        versions.sort_by_key(|p| p.version);
        Ok(versions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn procedure(name: &str, trigger: &str) -> Procedure {
        Procedure::new("proj", name, vec![ProcedureStep::new("step one")]).with_trigger(trigger)
    }

    #[tokio::test]
    async fn test_versions_are_monotone_and_immutable() {
        let store = InMemoryProceduralStore::new();
        let v1_id = store.create(procedure("deploy", "deploy")).await.unwrap();

        let v2 = store
            .new_version(
                "proj",
                "deploy",
                vec![ProcedureStep::new("build"), ProcedureStep::new("ship")],
                "added build step",
            )
            .await
            .unwrap();
        assert_eq!(v2.version, 2);

        let versions = store.versions("proj", "deploy").await.unwrap();
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[0].version, 1);
        assert_eq!(versions[1].version, 2);

        // v1 remains untouched by the new version
        let v1 = store.get(v1_id).await.unwrap().unwrap();
        assert_eq!(v1.steps.len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_version_rejected() {
        let store = InMemoryProceduralStore::new();
        store.create(procedure("deploy", "deploy")).await.unwrap();
        let err = store.create(procedure("deploy", "deploy")).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_find_returns_latest_version_only() {
        let store = InMemoryProceduralStore::new();
        store.create(procedure("deploy", "deploy")).await.unwrap();
        store
            .new_version("proj", "deploy", vec![ProcedureStep::new("v2 step")], "")
            .await
            .unwrap();

        let found = store.find("proj", "time to deploy the service", 10).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].version, 2);
    }

    #[tokio::test]
    async fn test_execution_updates_effectiveness() {
        let store = InMemoryProceduralStore::new();
        let id = store.create(procedure("retry", "retry")).await.unwrap();
        store.record_execution(id, true, 120).await.unwrap();
        store.record_execution(id, true, 100).await.unwrap();
        store.record_execution(id, false, 400).await.unwrap();

        let loaded = store.get(id).await.unwrap().unwrap();
        assert_eq!(loaded.execution_count, 3);
        assert_eq!(loaded.success_count, 2);
        // Beta(1,1) smoothing: (2+1)/(3+2)
        assert!((loaded.effectiveness() - 0.6).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_find_orders_by_effectiveness() {
        let store = InMemoryProceduralStore::new();
        let good = store.create(procedure("good", "incident")).await.unwrap();
        let bad = store.create(procedure("bad", "incident")).await.unwrap();
        for _ in 0..4 {
            store.record_execution(good, true, 10).await.unwrap();
            store.record_execution(bad, false, 10).await.unwrap();
        }

        let found = store.find("proj", "incident response", 10).await.unwrap();
        assert_eq!(found[0].name, "good");
        assert_eq!(found[1].name, "bad");
    }
}
