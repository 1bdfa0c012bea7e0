//! In-memory working-memory store.

use crate::error::{Error, Result};
use crate::working::{
    plan_insert, InsertPlan, WorkingMemoryItem, WorkingStore, ACTIVE_FLOOR, HARD_CAPACITY,
    TARGET_CAPACITY,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use uuid::Uuid;

/// Bounded activation set held in process memory
#[derive(Default)]
pub struct InMemoryWorkingStore {
    items: RwLock<HashMap<Uuid, WorkingMemoryItem>>,
}

impl InMemoryWorkingStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn weakest_id(
        items: &HashMap<Uuid, WorkingMemoryItem>,
        project_id: &str,
        now: DateTime<Utc>,
    ) -> Option<Uuid> {
        items
            .values()
            .filter(|i| i.project_id == project_id)
            .min_by(|a, b| {
                a.current_activation(now)
                    .partial_cmp(&b.current_activation(now))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|i| i.id)
    }
}

#[async_trait]
impl WorkingStore for InMemoryWorkingStore {
    async fn insert(&self, item: WorkingMemoryItem, eviction_enabled: bool) -> Result<Uuid> {
        item.validate()?;
        let now = Utc::now();
        let mut items = self.items.write();
        let count = items
            .values()
            .filter(|i| i.project_id == item.project_id)
            .count();

        match plan_insert(count, eviction_enabled) {
            InsertPlan::Insert => {}
            InsertPlan::EvictWeakestThenInsert => {
                if let Some(weakest) = Self::weakest_id(&items, &item.project_id, now) {
                    items.remove(&weakest);
                }
            }
            InsertPlan::Reject => {
                return Err(Error::CapacityExceeded(item.project_id));
            }
        }

        debug_assert!(
            items
                .values()
                .filter(|i| i.project_id == item.project_id)
                .count()
                < HARD_CAPACITY
        );
        let id = item.id;
        items.insert(id, item);
        Ok(id)
    }

    async fn touch(&self, id: Uuid) -> Result<()> {
        let mut items = self.items.write();
        let item = items.get_mut(&id).ok_or(Error::NotFound(id))?;
        item.touch(Utc::now());
        Ok(())
    }

    async fn get_current(&self, project_id: &str) -> Result<Vec<WorkingMemoryItem>> {
        let now = Utc::now();
        let items = self.items.read();
        let mut current: Vec<WorkingMemoryItem> = items
            .values()
            .filter(|i| i.project_id == project_id)
            .cloned()
            .collect();
        current.sort_by(|a, b| {
            b.current_activation(now)
                .partial_cmp(&a.current_activation(now))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(current)
    }

    async fn evict_weakest(&self, project_id: &str) -> Result<Option<WorkingMemoryItem>> {
        let now = Utc::now();
        let mut items = self.items.write();
        Ok(Self::weakest_id(&items, project_id, now).and_then(|id| items.remove(&id)))
    }

    async fn apply_decay(&self, project_id: &str, now: DateTime<Utc>) -> Result<usize> {
        let mut items = self.items.write();
        let mut dropped: Vec<Uuid> = items
            .values()
            .filter(|i| i.project_id == project_id && i.current_activation(now) < ACTIVE_FLOOR)
            .map(|i| i.id)
            .collect();
        for id in &dropped {
            items.remove(id);
        }

        // The sweep also restores the target: at most 7 items stay active
        let mut survivors: Vec<(f32, Uuid)> = items
            .values()
            .filter(|i| i.project_id == project_id)
            .map(|i| (i.current_activation(now), i.id))
            .collect();
        if survivors.len() > TARGET_CAPACITY {
            survivors.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
            for (_, id) in survivors.split_off(TARGET_CAPACITY) {
                items.remove(&id);
                dropped.push(id);
            }
        }
        Ok(dropped.len())
    }

    async fn clear(&self, project_id: &str) -> Result<()> {
        let mut items = self.items.write();
        items.retain(|_, item| item.project_id != project_id);
        Ok(())
    }
}
