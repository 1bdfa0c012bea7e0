//! In-memory graph store.

use crate::error::{Error, Result};
use crate::graph::{
    detect_communities, shortest_path_bfs, Community, CommunityAlgorithm, CommunityParams, Entity,
    GraphStore, Neighborhood, Relation,
};
use crate::search::keyword_boost;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet, VecDeque};
use uuid::Uuid;

/// Entities, relations, and the current community partition
#[derive(Default)]
pub struct InMemoryGraphStore {
    entities: RwLock<HashMap<Uuid, Entity>>,
    /// `(project_id, name)` -> entity id
    by_name: RwLock<HashMap<(String, String), Uuid>>,
    relations: RwLock<HashMap<Uuid, Relation>>,
    /// `(project, from, to, type)` -> relation id
    by_edge: RwLock<HashMap<(String, Uuid, Uuid, String), Uuid>>,
    /// Current partition per project; replaced wholesale on recompute
    communities: RwLock<HashMap<String, Vec<Community>>>,
}

impl InMemoryGraphStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn adjacency(&self, project_id: &str) -> HashMap<Uuid, Vec<Uuid>> {
        let relations = self.relations.read();
        let mut adjacency: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
        for relation in relations.values().filter(|r| r.project_id == project_id) {
            adjacency
                .entry(relation.from_entity)
                .or_default()
                .push(relation.to_entity);
            adjacency
                .entry(relation.to_entity)
                .or_default()
                .push(relation.from_entity);
        }
        adjacency
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn upsert_entity(&self, entity: Entity) -> Result<Uuid> {
        entity.validate()?;
        let mut entities = self.entities.write();
        let mut by_name = self.by_name.write();
        let key = (entity.project_id.clone(), entity.name.clone());
        if let Some(&existing) = by_name.get(&key) {
            // Update in place, keeping the original id
            if let Some(stored) = entities.get_mut(&existing) {
                stored.entity_type = entity.entity_type;
                if !entity.description.is_empty() {
                    stored.description = entity.description;
                }
                for (k, v) in entity.properties {
                    stored.properties.insert(k, v);
                }
                stored.updated_at = Utc::now();
            }
            return Ok(existing);
        }
        let id = entity.id;
        by_name.insert(key, id);
        entities.insert(id, entity);
        Ok(id)
    }

    async fn upsert_relation(&self, relation: Relation) -> Result<Uuid> {
        relation.validate()?;
        {
            let entities = self.entities.read();
            for endpoint in [relation.from_entity, relation.to_entity] {
                if !entities.contains_key(&endpoint) {
                    return Err(Error::NotFound(endpoint));
                }
            }
        }
        let mut relations = self.relations.write();
        let mut by_edge = self.by_edge.write();
        let key = (
            relation.project_id.clone(),
            relation.from_entity,
            relation.to_entity,
            relation.relation_type.clone(),
        );
        if let Some(&existing) = by_edge.get(&key) {
            if let Some(stored) = relations.get_mut(&existing) {
                stored.observe();
            }
            return Ok(existing);
        }
        let id = relation.id;
        by_edge.insert(key, id);
        relations.insert(id, relation);
        Ok(id)
    }

    async fn upsert_relation_by_names(
        &self,
        project_id: &str,
        from_name: &str,
        to_name: &str,
        relation_type: &str,
    ) -> Result<Uuid> {
        let from = self
            .upsert_entity(Entity::new(project_id, from_name, "concept"))
            .await?;
        let to = self
            .upsert_entity(Entity::new(project_id, to_name, "concept"))
            .await?;
        self.upsert_relation(Relation::new(project_id, from, to, relation_type))
            .await
    }

    async fn get_entity(&self, id: Uuid) -> Result<Option<Entity>> {
        Ok(self.entities.read().get(&id).cloned())
    }

    async fn find_entity_by_name(&self, project_id: &str, name: &str) -> Result<Option<Entity>> {
        let by_name = self.by_name.read();
        let entities = self.entities.read();
        Ok(by_name
            .get(&(project_id.to_string(), name.to_string()))
            .and_then(|id| entities.get(id).cloned()))
    }

    async fn get_neighborhood(
        &self,
        entity: Uuid,
        depth: usize,
        relation_filter: Option<&str>,
    ) -> Result<Neighborhood> {
        let start = self
            .entities
            .read()
            .get(&entity)
            .cloned()
            .ok_or(Error::NotFound(entity))?;
        let project_id = start.project_id.clone();

        let relations = self.relations.read();
        let project_relations: Vec<&Relation> = relations
            .values()
            .filter(|r| {
                r.project_id == project_id
                    && relation_filter.is_none_or(|f| r.relation_type == f)
            })
            .collect();

        let mut visited: HashSet<Uuid> = HashSet::from([entity]);
        let mut frontier = VecDeque::from([(entity, 0usize)]);
        let mut edge_ids: HashSet<Uuid> = HashSet::new();
        while let Some((node, d)) = frontier.pop_front() {
            if d >= depth {
                continue;
            }
            for relation in &project_relations {
                let next = if relation.from_entity == node {
                    Some(relation.to_entity)
                } else if relation.to_entity == node {
                    Some(relation.from_entity)
                } else {
                    None
                };
                if let Some(next) = next {
                    edge_ids.insert(relation.id);
                    if visited.insert(next) {
                        frontier.push_back((next, d + 1));
                    }
                }
            }
        }

        let entities = self.entities.read();
        Ok(Neighborhood {
            entities: visited
                .iter()
                .filter_map(|id| entities.get(id).cloned())
                .collect(),
            relations: edge_ids
                .iter()
                .filter_map(|id| relations.get(id).cloned())
                .collect(),
        })
    }

    async fn shortest_path(
        &self,
        a: Uuid,
        b: Uuid,
        max_depth: usize,
    ) -> Result<Option<Vec<Uuid>>> {
        let project_id = {
            let entities = self.entities.read();
            let entity = entities.get(&a).ok_or(Error::NotFound(a))?;
            if !entities.contains_key(&b) {
                return Err(Error::NotFound(b));
            }
            entity.project_id.clone()
        };
        let adjacency = self.adjacency(&project_id);
        Ok(shortest_path_bfs(&adjacency, a, b, max_depth))
    }

    async fn compute_communities(
        &self,
        project_id: &str,
        algorithm: CommunityAlgorithm,
        resolution: f64,
    ) -> Result<Vec<Community>> {
        let nodes: Vec<Uuid> = {
            let entities = self.entities.read();
            entities
                .values()
                .filter(|e| e.project_id == project_id)
                .map(|e| e.id)
                .collect()
        };
        let edges: Vec<(Uuid, Uuid, f32)> = {
            let relations = self.relations.read();
            relations
                .values()
                .filter(|r| r.project_id == project_id)
                .map(|r| (r.from_entity, r.to_entity, r.weight))
                .collect()
        };

        let params = CommunityParams {
            algorithm,
            resolution,
            ..Default::default()
        };
        let partition = detect_communities(&nodes, &edges, &params);

        let entities = self.entities.read();
        let built: Vec<Community> = partition
            .into_iter()
            .map(|members| {
                let mut names: Vec<&str> = members
                    .iter()
                    .filter_map(|id| entities.get(id).map(|e| e.name.as_str()))
                    .collect();
                names.sort_unstable();
                Community {
                    id: Uuid::new_v4(),
                    project_id: project_id.to_string(),
                    level: 0,
                    summary: names.join(", "),
                    member_entities: members,
                    created_at: Utc::now(),
                }
            })
            .collect();
        drop(entities);

        // Swap in the new partition; readers meanwhile saw the previous one
        self.communities
            .write()
            .insert(project_id.to_string(), built.clone());
        Ok(built)
    }

    async fn community_of(&self, entity: Uuid) -> Result<Option<Community>> {
        let project_id = {
            let entities = self.entities.read();
            entities
                .get(&entity)
                .ok_or(Error::NotFound(entity))?
                .project_id
                .clone()
        };
        let communities = self.communities.read();
        Ok(communities.get(&project_id).and_then(|partition| {
            partition
                .iter()
                .find(|c| c.member_entities.contains(&entity))
                .cloned()
        }))
    }

    async fn entity_count(&self, project_id: &str) -> Result<usize> {
        Ok(self
            .entities
            .read()
            .values()
            .filter(|e| e.project_id == project_id)
            .count())
    }

    async fn search_entities(
        &self,
        project_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<Entity>> {
        let entities = self.entities.read();
        let mut scored: Vec<(f32, Entity)> = entities
            .values()
            .filter(|e| e.project_id == project_id)
            .map(|e| {
                let text = format!("{} {} {}", e.name, e.entity_type, e.description);
                (keyword_boost(query, &text), e.clone())
            })
            .filter(|(score, _)| *score > 0.0)
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        Ok(scored.into_iter().take(limit).map(|(_, e)| e).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_duplicate_relation_updates_weight() {
        let store = InMemoryGraphStore::new();
        let first = store
            .upsert_relation_by_names("proj", "A", "B", "depends_on")
            .await
            .unwrap();
        let second = store
            .upsert_relation_by_names("proj", "A", "B", "depends_on")
            .await
            .unwrap();
        assert_eq!(first, second);

        let relations = store.relations.read();
        assert_eq!(relations.len(), 1);
        let relation = relations.values().next().unwrap();
        assert_eq!(relation.observation_count, 2);
        assert!(relation.weight > 0.5);
    }

    #[tokio::test]
    async fn test_entity_upsert_by_name_is_stable() {
        let store = InMemoryGraphStore::new();
        let first = store
            .upsert_entity(Entity::new("proj", "Postgres", "service"))
            .await
            .unwrap();
        let mut updated = Entity::new("proj", "Postgres", "database");
        updated.description = "primary datastore".to_string();
        let second = store.upsert_entity(updated).await.unwrap();
        assert_eq!(first, second);

        let entity = store.get_entity(first).await.unwrap().unwrap();
        assert_eq!(entity.entity_type, "database");
        assert_eq!(entity.description, "primary datastore");
    }

    #[tokio::test]
    async fn test_relation_requires_endpoints() {
        let store = InMemoryGraphStore::new();
        let relation = Relation::new("proj", Uuid::new_v4(), Uuid::new_v4(), "depends_on");
        assert!(matches!(
            store.upsert_relation(relation).await.unwrap_err(),
            Error::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_neighborhood_depth() {
        let store = InMemoryGraphStore::new();
        store
            .upsert_relation_by_names("proj", "A", "B", "depends_on")
            .await
            .unwrap();
        store
            .upsert_relation_by_names("proj", "B", "C", "depends_on")
            .await
            .unwrap();
        let a = store.find_entity_by_name("proj", "A").await.unwrap().unwrap();

        let one_hop = store.get_neighborhood(a.id, 1, None).await.unwrap();
        assert_eq!(one_hop.entities.len(), 2);

        let two_hop = store.get_neighborhood(a.id, 2, None).await.unwrap();
        assert_eq!(two_hop.entities.len(), 3);
        assert_eq!(two_hop.relations.len(), 2);
    }

    #[tokio::test]
    async fn test_shortest_path_across_chain() {
        let store = InMemoryGraphStore::new();
        store
            .upsert_relation_by_names("proj", "A", "B", "depends_on")
            .await
            .unwrap();
        store
            .upsert_relation_by_names("proj", "B", "C", "depends_on")
            .await
            .unwrap();
        let a = store.find_entity_by_name("proj", "A").await.unwrap().unwrap();
        let c = store.find_entity_by_name("proj", "C").await.unwrap().unwrap();

        let path = store.shortest_path(a.id, c.id, 5).await.unwrap().unwrap();
        assert_eq!(path.len(), 3);
    }

    #[tokio::test]
    async fn test_communities_and_lookup() {
        let store = InMemoryGraphStore::new();
        for (from, to) in [("A", "B"), ("B", "C"), ("A", "C"), ("X", "Y")] {
            for _ in 0..3 {
                store
                    .upsert_relation_by_names("proj", from, to, "related_to")
                    .await
                    .unwrap();
            }
        }

        let communities = store
            .compute_communities("proj", CommunityAlgorithm::Louvain, 1.0)
            .await
            .unwrap();
        assert_eq!(communities.len(), 2);

        let a = store.find_entity_by_name("proj", "A").await.unwrap().unwrap();
        let community = store.community_of(a.id).await.unwrap().unwrap();
        assert_eq!(community.member_entities.len(), 3);
        assert!(community.summary.contains('A') || community.summary.contains("A,"));
    }

    #[tokio::test]
    async fn test_search_entities_lexical() {
        let store = InMemoryGraphStore::new();
        store
            .upsert_entity(Entity::new("proj", "auth-gateway", "service"))
            .await
            .unwrap();
        store
            .upsert_entity(Entity::new("proj", "billing", "service"))
            .await
            .unwrap();

        let found = store.search_entities("proj", "auth gateway", 10).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "auth-gateway");
    }
}
