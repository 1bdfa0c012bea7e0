//! # Graph Store
//!
//! Typed knowledge graph: entities, weighted relations, and communities.
//! Relation weights are evidence counters smoothed by an EMA over observed
//! co-occurrences; duplicate edges update weight instead of inserting.

pub mod community;

pub use community::{detect_communities, CommunityParams};

use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use uuid::Uuid;

/// EMA factor applied when a relation is re-observed
pub const RELATION_WEIGHT_ALPHA: f32 = 0.3;

/// A named node in the knowledge graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: Uuid,
    pub project_id: String,
    pub name: String,
    pub entity_type: String,
    pub description: String,
    pub properties: serde_json::Map<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity {
    #[must_use]
    pub fn new(
        project_id: impl Into<String>,
        name: impl Into<String>,
        entity_type: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            project_id: project_id.into(),
            name: name.into(),
            entity_type: entity_type.into(),
            description: String::new(),
            properties: serde_json::Map::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::InvalidInput("entity name is empty".into()));
        }
        if self.entity_type.is_empty() {
            return Err(Error::InvalidInput("entity type is empty".into()));
        }
        Ok(())
    }
}

/// Relation types where `from == to` is meaningful
const SYMMETRIC_RELATION_TYPES: [&str; 3] = ["similar_to", "related_to", "co_occurs_with"];

/// A typed, weighted edge between two entities
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relation {
    pub id: Uuid,
    pub project_id: String,
    pub from_entity: Uuid,
    pub to_entity: Uuid,
    pub relation_type: String,
    /// Evidence strength in [0, 1]
    pub weight: f32,
    /// Number of observations folded into the weight
    pub observation_count: u64,
    pub temporal_bounds: Option<(DateTime<Utc>, DateTime<Utc>)>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Relation {
    #[must_use]
    pub fn new(
        project_id: impl Into<String>,
        from_entity: Uuid,
        to_entity: Uuid,
        relation_type: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            project_id: project_id.into(),
            from_entity,
            to_entity,
            relation_type: relation_type.into(),
            weight: 0.5,
            observation_count: 1,
            temporal_bounds: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Fold one more observation into the weight: EMA toward 1.0
    pub fn observe(&mut self) {
        self.weight = self.weight + RELATION_WEIGHT_ALPHA * (1.0 - self.weight);
        self.observation_count += 1;
        self.updated_at = Utc::now();
    }

    pub fn validate(&self) -> Result<()> {
        if self.relation_type.is_empty() {
            return Err(Error::InvalidInput("relation type is empty".into()));
        }
        if self.from_entity == self.to_entity
            && !SYMMETRIC_RELATION_TYPES.contains(&self.relation_type.as_str())
        {
            return Err(Error::InvalidInput(format!(
                "self-relation not permitted for type '{}'",
                self.relation_type
            )));
        }
        if !(0.0..=1.0).contains(&self.weight) {
            return Err(Error::InvalidInput("relation weight out of [0, 1]".into()));
        }
        Ok(())
    }
}

/// A cluster of entities produced by community detection; rebuilt, never
/// mutated in place
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Community {
    pub id: Uuid,
    pub project_id: String,
    pub level: u32,
    pub member_entities: Vec<Uuid>,
    pub summary: String,
    pub created_at: DateTime<Utc>,
}

/// Subgraph returned by neighborhood queries
#[derive(Debug, Clone, Default)]
pub struct Neighborhood {
    pub entities: Vec<Entity>,
    pub relations: Vec<Relation>,
}

/// Community detection algorithm selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommunityAlgorithm {
    Louvain,
    Leiden,
}

/// BFS shortest path over an undirected adjacency view.
///
/// Returns the entity id sequence from `a` to `b` inclusive, or `None` when
/// unreachable within `max_depth` hops.
#[must_use]
pub fn shortest_path_bfs(
    adjacency: &HashMap<Uuid, Vec<Uuid>>,
    a: Uuid,
    b: Uuid,
    max_depth: usize,
) -> Option<Vec<Uuid>> {
    if a == b {
        return Some(vec![a]);
    }
    let mut queue = VecDeque::from([(a, 0usize)]);
    let mut parent: HashMap<Uuid, Uuid> = HashMap::new();
    let mut seen: HashSet<Uuid> = HashSet::from([a]);

    while let Some((node, depth)) = queue.pop_front() {
        if depth >= max_depth {
            continue;
        }
        for &next in adjacency.get(&node).into_iter().flatten() {
            if !seen.insert(next) {
                continue;
            }
            parent.insert(next, node);
            if next == b {
                let mut path = vec![b];
                let mut cursor = b;
                while let Some(&p) = parent.get(&cursor) {
                    path.push(p);
                    cursor = p;
                }
                path.reverse();
                return Some(path);
            }
            queue.push_back((next, depth + 1));
        }
    }
    None
}

/// Storage interface for the graph layer
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Insert or update an entity by `(project_id, name)`
    async fn upsert_entity(&self, entity: Entity) -> Result<Uuid>;

    /// Insert a relation or fold an observation into an existing
    /// `(project, from, to, type)` edge; creates missing endpoints by id
    /// reference is an error, but unnamed endpoints may be auto-created by
    /// name through `upsert_relation_by_names`
    async fn upsert_relation(&self, relation: Relation) -> Result<Uuid>;

    /// Convenience: resolve or create endpoints by name, then upsert
    async fn upsert_relation_by_names(
        &self,
        project_id: &str,
        from_name: &str,
        to_name: &str,
        relation_type: &str,
    ) -> Result<Uuid>;

    async fn get_entity(&self, id: Uuid) -> Result<Option<Entity>>;

    async fn find_entity_by_name(&self, project_id: &str, name: &str) -> Result<Option<Entity>>;

    /// Entities and relations within `depth` hops of `entity`
    async fn get_neighborhood(
        &self,
        entity: Uuid,
        depth: usize,
        relation_filter: Option<&str>,
    ) -> Result<Neighborhood>;

    /// Shortest undirected path between two entities
    async fn shortest_path(&self, a: Uuid, b: Uuid, max_depth: usize)
        -> Result<Option<Vec<Uuid>>>;

    /// Rebuild communities for a project; queries during recomputation serve
    /// the previous partition
    async fn compute_communities(
        &self,
        project_id: &str,
        algorithm: CommunityAlgorithm,
        resolution: f64,
    ) -> Result<Vec<Community>>;

    /// Community containing the entity, from the current partition
    async fn community_of(&self, entity: Uuid) -> Result<Option<Community>>;

    /// Count of entities in a project
    async fn entity_count(&self, project_id: &str) -> Result<usize>;

    /// Entities matching a name/description query (lexical), for retrieval
    async fn search_entities(
        &self,
        project_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<Entity>>;
}
