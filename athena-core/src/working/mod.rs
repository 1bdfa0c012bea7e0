//! # Working Memory
//!
//! Bounded active set modeled after Baddeley's components: 7±2 items per
//! project with exponential activation decay. Decay is applied lazily at
//! read and by a periodic sweep; eviction removes the weakest item when the
//! target capacity is reached.

use crate::error::{Error, Result};
use crate::types::WmComponent;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Target capacity per project; inserts beyond this evict the weakest item
pub const TARGET_CAPACITY: usize = 7;
/// Hard capacity per project; inserts beyond this are rejected
pub const HARD_CAPACITY: usize = 9;
/// Activation below this counts as inactive for the 7-active invariant
pub const ACTIVE_FLOOR: f32 = 0.1;

/// An item held in working memory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkingMemoryItem {
    pub id: Uuid,
    pub project_id: String,
    pub content: String,
    pub component: WmComponent,
    /// Base activation at `last_accessed`
    pub activation: f32,
    /// Decay rate per second; must be positive
    pub decay_rate: f32,
    pub importance: f32,
    pub last_accessed: DateTime<Utc>,
    pub embedding: Option<Vec<f32>>,
}

impl WorkingMemoryItem {
    #[must_use]
    pub fn new(
        project_id: impl Into<String>,
        content: impl Into<String>,
        component: WmComponent,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            project_id: project_id.into(),
            content: content.into(),
            component,
            activation: 1.0,
            decay_rate: 0.001,
            importance: 0.5,
            last_accessed: Utc::now(),
            embedding: None,
        }
    }

    #[must_use]
    pub fn with_importance(mut self, importance: f32) -> Self {
        self.importance = importance.clamp(0.0, 1.0);
        self
    }

    /// Activation as seen at `now`:
    /// `activation * exp(-decay_rate * (1 - importance * 0.5) * dt_seconds)`.
    ///
    /// Importance halves the effective decay at most, so important items
    /// linger without becoming immortal.
    #[must_use]
    pub fn current_activation(&self, now: DateTime<Utc>) -> f32 {
        let dt = (now - self.last_accessed).num_milliseconds().max(0) as f32 / 1000.0;
        let effective_rate = self.decay_rate * (1.0 - self.importance * 0.5);
        self.activation * (-effective_rate * dt).exp()
    }

    /// Refresh the item: fold decay into the base activation, bump it for
    /// the access, and reset the clock
    pub fn touch(&mut self, now: DateTime<Utc>) {
        let current = self.current_activation(now);
        self.activation = (current + 0.3).min(1.0);
        self.last_accessed = now;
    }

    pub fn validate(&self) -> Result<()> {
        if self.content.is_empty() {
            return Err(Error::InvalidInput("working memory content is empty".into()));
        }
        if self.decay_rate <= 0.0 {
            return Err(Error::InvalidInput("decay_rate must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.activation) {
            return Err(Error::InvalidInput("activation out of [0, 1]".into()));
        }
        Ok(())
    }
}

/// What an insert should do given the current project occupancy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertPlan {
    /// Room available, insert directly
    Insert,
    /// At or above target capacity: evict the weakest item first
    EvictWeakestThenInsert,
    /// At hard capacity with eviction disabled
    Reject,
}

/// Decide how an insert proceeds.
///
/// At or above the target the weakest item makes room; the hard capacity is
/// only reachable with eviction disabled, and then inserts are rejected.
#[must_use]
pub fn plan_insert(current_count: usize, eviction_enabled: bool) -> InsertPlan {
    if current_count < TARGET_CAPACITY {
        InsertPlan::Insert
    } else if eviction_enabled {
        InsertPlan::EvictWeakestThenInsert
    } else if current_count < HARD_CAPACITY {
        InsertPlan::Insert
    } else {
        InsertPlan::Reject
    }
}

/// Storage interface for working memory
#[async_trait]
pub trait WorkingStore: Send + Sync {
    /// Insert an item, evicting the weakest when at target capacity.
    /// Fails with `CapacityExceeded` at the hard capacity when eviction is
    /// disabled.
    async fn insert(&self, item: WorkingMemoryItem, eviction_enabled: bool) -> Result<Uuid>;

    /// Refresh an item's activation
    async fn touch(&self, id: Uuid) -> Result<()>;

    /// Current items for a project, strongest first, with lazy decay applied
    async fn get_current(&self, project_id: &str) -> Result<Vec<WorkingMemoryItem>>;

    /// Remove and return the weakest item, if any
    async fn evict_weakest(&self, project_id: &str) -> Result<Option<WorkingMemoryItem>>;

    /// Apply decay at `now`: items below the active floor are dropped, and
    /// anything beyond the target capacity is trimmed weakest-first so at
    /// most seven items stay active. Returns the number dropped.
    async fn apply_decay(&self, project_id: &str, now: DateTime<Utc>) -> Result<usize>;

    /// Clear a project's working memory (session teardown)
    async fn clear(&self, project_id: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_activation_decays_over_time() {
        let mut item = WorkingMemoryItem::new("proj", "current task", WmComponent::CentralExecutive);
        item.decay_rate = 0.01;
        let now = item.last_accessed;

        let at_start = item.current_activation(now);
        let later = item.current_activation(now + chrono::Duration::seconds(120));
        assert!((at_start - 1.0).abs() < 1e-6);
        assert!(later < at_start);
    }

    #[test]
    fn test_importance_slows_decay() {
        let now = Utc::now();
        let mut plain = WorkingMemoryItem::new("proj", "x", WmComponent::Phonological);
        plain.decay_rate = 0.01;
        plain.importance = 0.0;
        plain.last_accessed = now;

        let mut important = plain.clone();
        important.importance = 1.0;

        let t = now + chrono::Duration::seconds(300);
        assert!(important.current_activation(t) > plain.current_activation(t));
    }

    #[test]
    fn test_touch_restores_activation() {
        let mut item = WorkingMemoryItem::new("proj", "x", WmComponent::EpisodicBuffer);
        item.decay_rate = 0.05;
        let later = item.last_accessed + chrono::Duration::seconds(600);

        let decayed = item.current_activation(later);
        item.touch(later);
        assert!(item.activation > decayed);
        assert!(item.activation <= 1.0);
        assert_eq!(item.last_accessed, later);
    }

    #[test]
    fn test_plan_insert_capacity_ladder() {
        assert_eq!(plan_insert(0, true), InsertPlan::Insert);
        assert_eq!(plan_insert(6, true), InsertPlan::Insert);
        assert_eq!(plan_insert(7, true), InsertPlan::EvictWeakestThenInsert);
        assert_eq!(plan_insert(8, true), InsertPlan::EvictWeakestThenInsert);
        // Eviction disabled: hard capacity applies
        assert_eq!(plan_insert(7, false), InsertPlan::Insert);
        assert_eq!(plan_insert(8, false), InsertPlan::Insert);
        assert_eq!(plan_insert(9, false), InsertPlan::Reject);
    }

    #[test]
    fn test_validate_rejects_zero_decay() {
        let mut item = WorkingMemoryItem::new("proj", "x", WmComponent::Visuospatial);
        item.decay_rate = 0.0;
        assert!(item.validate().is_err());
    }
}
