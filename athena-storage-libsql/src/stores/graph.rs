//! libSQL graph store.

use super::{from_millis, parse_json, parse_uuid, to_json, to_millis};
use crate::pool::DbPool;
use athena_core::error::{Error, Result};
use athena_core::graph::{
    detect_communities, shortest_path_bfs, Community, CommunityAlgorithm, CommunityParams, Entity,
    GraphStore, Neighborhood, Relation,
};
use athena_core::search::keyword_boost;
use async_trait::async_trait;
use chrono::Utc;
use libsql::params;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use uuid::Uuid;

/// Entities, relations, and communities over libSQL
pub struct LibsqlGraphStore {
    pool: Arc<DbPool>,
}

impl LibsqlGraphStore {
    #[must_use]
    pub fn new(pool: Arc<DbPool>) -> Self {
        Self { pool }
    }

    const ENTITY_COLUMNS: &'static str =
        "id, project_id, name, entity_type, description, properties, created_at, updated_at";
    const RELATION_COLUMNS: &'static str = "id, project_id, from_entity, to_entity, \
         relation_type, weight, observation_count, temporal_start, temporal_end, created_at, \
         updated_at";

    fn row_to_entity(row: &libsql::Row) -> Result<Entity> {
        let id_raw: String = row.get(0).map_err(crate::migrations::driver)?;
        let properties_raw: String = row.get(5).map_err(crate::migrations::driver)?;
        Ok(Entity {
            id: parse_uuid(&id_raw)?,
            project_id: row.get(1).map_err(crate::migrations::driver)?,
            name: row.get(2).map_err(crate::migrations::driver)?,
            entity_type: row.get(3).map_err(crate::migrations::driver)?,
            description: row.get(4).map_err(crate::migrations::driver)?,
            properties: parse_json(&properties_raw)?,
            created_at: from_millis(row.get(6).map_err(crate::migrations::driver)?),
            updated_at: from_millis(row.get(7).map_err(crate::migrations::driver)?),
        })
    }

    fn row_to_relation(row: &libsql::Row) -> Result<Relation> {
        let id_raw: String = row.get(0).map_err(crate::migrations::driver)?;
        let from_raw: String = row.get(2).map_err(crate::migrations::driver)?;
        let to_raw: String = row.get(3).map_err(crate::migrations::driver)?;
        let start: Option<i64> = row.get(7).map_err(crate::migrations::driver)?;
        let end: Option<i64> = row.get(8).map_err(crate::migrations::driver)?;
        Ok(Relation {
            id: parse_uuid(&id_raw)?,
            project_id: row.get(1).map_err(crate::migrations::driver)?,
            from_entity: parse_uuid(&from_raw)?,
            to_entity: parse_uuid(&to_raw)?,
            relation_type: row.get(4).map_err(crate::migrations::driver)?,
            weight: row.get::<f64>(5).map_err(crate::migrations::driver)? as f32,
            observation_count: row.get::<i64>(6).map_err(crate::migrations::driver)? as u64,
            temporal_bounds: match (start, end) {
                (Some(s), Some(e)) => Some((from_millis(s), from_millis(e))),
                _ => None,
            },
            created_at: from_millis(row.get(9).map_err(crate::migrations::driver)?),
            updated_at: from_millis(row.get(10).map_err(crate::migrations::driver)?),
        })
    }

    async fn project_of_entity(&self, id: Uuid) -> Result<String> {
        let conn = self.pool.acquire().await?;
        let mut rows = conn
            .query(
                "SELECT project_id FROM entities WHERE id = ?",
                params![id.to_string()],
            )
            .await?;
        let row = rows
            .next()
            .await
            .map_err(crate::migrations::driver)?
            .ok_or(Error::NotFound(id))?;
        row.get(0).map_err(crate::migrations::driver)
    }

    async fn project_relations(&self, project_id: &str) -> Result<Vec<Relation>> {
        let conn = self.pool.acquire().await?;
        let sql = format!(
            "SELECT {} FROM relations WHERE project_id = ?",
            Self::RELATION_COLUMNS
        );
        let mut rows = conn.query(&sql, params![project_id]).await?;
        let mut relations = Vec::new();
        while let Some(row) = rows.next().await.map_err(crate::migrations::driver)? {
            relations.push(Self::row_to_relation(&row)?);
        }
        Ok(relations)
    }
}

#[async_trait]
impl GraphStore for LibsqlGraphStore {
    async fn upsert_entity(&self, entity: Entity) -> Result<Uuid> {
        entity.validate()?;
        let conn = self.pool.acquire().await?;

        let mut existing = conn
            .query(
                "SELECT id FROM entities WHERE project_id = ? AND name = ?",
                params![entity.project_id.clone(), entity.name.clone()],
            )
            .await?;
        if let Some(row) = existing.next().await.map_err(crate::migrations::driver)? {
            let id_raw: String = row.get(0).map_err(crate::migrations::driver)?;
            let id = parse_uuid(&id_raw)?;
            conn.execute(
                "UPDATE entities SET entity_type = ?, \
                 description = CASE WHEN ? = '' THEN description ELSE ? END, \
                 updated_at = ? WHERE id = ?",
                params![
                    entity.entity_type.clone(),
                    entity.description.clone(),
                    entity.description.clone(),
                    to_millis(Utc::now()),
                    id.to_string()
                ],
            )
            .await?;
            return Ok(id);
        }

        conn.execute(
            "INSERT INTO entities (id, project_id, name, entity_type, description, properties, \
             created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                entity.id.to_string(),
                entity.project_id.clone(),
                entity.name.clone(),
                entity.entity_type.clone(),
                entity.description.clone(),
                to_json(&entity.properties)?,
                to_millis(entity.created_at),
                to_millis(entity.updated_at),
            ],
        )
        .await?;
        Ok(entity.id)
    }

    async fn upsert_relation(&self, relation: Relation) -> Result<Uuid> {
        relation.validate()?;
        let conn = self.pool.acquire().await?;

        for endpoint in [relation.from_entity, relation.to_entity] {
            let mut rows = conn
                .query(
                    "SELECT 1 FROM entities WHERE id = ?",
                    params![endpoint.to_string()],
                )
                .await?;
            if rows
                .next()
                .await
                .map_err(crate::migrations::driver)?
                .is_none()
            {
                return Err(Error::NotFound(endpoint));
            }
        }

        let mut existing = conn
            .query(
                "SELECT id, weight FROM relations WHERE project_id = ? AND from_entity = ? \
                 AND to_entity = ? AND relation_type = ?",
                params![
                    relation.project_id.clone(),
                    relation.from_entity.to_string(),
                    relation.to_entity.to_string(),
                    relation.relation_type.clone()
                ],
            )
            .await?;
        if let Some(row) = existing.next().await.map_err(crate::migrations::driver)? {
            let id_raw: String = row.get(0).map_err(crate::migrations::driver)?;
            let weight: f64 = row.get(1).map_err(crate::migrations::driver)?;
            let id = parse_uuid(&id_raw)?;
            let new_weight = weight
                + f64::from(athena_core::graph::RELATION_WEIGHT_ALPHA) * (1.0 - weight);
            conn.execute(
                "UPDATE relations SET weight = ?, observation_count = observation_count + 1, \
                 updated_at = ? WHERE id = ?",
                params![new_weight, to_millis(Utc::now()), id.to_string()],
            )
            .await?;
            return Ok(id);
        }

        conn.execute(
            "INSERT INTO relations (id, project_id, from_entity, to_entity, relation_type, \
             weight, observation_count, temporal_start, temporal_end, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                relation.id.to_string(),
                relation.project_id.clone(),
                relation.from_entity.to_string(),
                relation.to_entity.to_string(),
                relation.relation_type.clone(),
                f64::from(relation.weight),
                relation.observation_count as i64,
                relation.temporal_bounds.map(|(s, _)| to_millis(s)),
                relation.temporal_bounds.map(|(_, e)| to_millis(e)),
                to_millis(relation.created_at),
                to_millis(relation.updated_at),
            ],
        )
        .await?;
        Ok(relation.id)
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
        let conn = self.pool.acquire().await?;
        let sql = format!("SELECT {} FROM entities WHERE id = ?", Self::ENTITY_COLUMNS);
        let mut rows = conn.query(&sql, params![id.to_string()]).await?;
        match rows.next().await.map_err(crate::migrations::driver)? {
            Some(row) => Ok(Some(Self::row_to_entity(&row)?)),
            None => Ok(None),
        }
    }

    async fn find_entity_by_name(&self, project_id: &str, name: &str) -> Result<Option<Entity>> {
        let conn = self.pool.acquire().await?;
        let sql = format!(
            "SELECT {} FROM entities WHERE project_id = ? AND name = ?",
            Self::ENTITY_COLUMNS
        );
        let mut rows = conn.query(&sql, params![project_id, name]).await?;
        match rows.next().await.map_err(crate::migrations::driver)? {
            Some(row) => Ok(Some(Self::row_to_entity(&row)?)),
            None => Ok(None),
        }
    }

    async fn get_neighborhood(
        &self,
        entity: Uuid,
        depth: usize,
        relation_filter: Option<&str>,
    ) -> Result<Neighborhood> {
        let project_id = self.project_of_entity(entity).await?;
        let relations: Vec<Relation> = self
            .project_relations(&project_id)
            .await?
            .into_iter()
            .filter(|r| relation_filter.is_none_or(|f| r.relation_type == f))
            .collect();

        let mut visited: HashSet<Uuid> = HashSet::from([entity]);
        let mut frontier = VecDeque::from([(entity, 0usize)]);
        let mut edges: Vec<&Relation> = Vec::new();
        while let Some((node, d)) = frontier.pop_front() {
            if d >= depth {
                continue;
            }
            for relation in &relations {
                let next = if relation.from_entity == node {
                    Some(relation.to_entity)
                } else if relation.to_entity == node {
                    Some(relation.from_entity)
                } else {
                    None
                };
                if let Some(next) = next {
                    if !edges.iter().any(|e| e.id == relation.id) {
                        edges.push(relation);
                    }
                    if visited.insert(next) {
                        frontier.push_back((next, d + 1));
                    }
                }
            }
        }

        let mut entities = Vec::new();
        for id in &visited {
            if let Some(entity) = self.get_entity(*id).await? {
                entities.push(entity);
            }
        }
        Ok(Neighborhood {
            entities,
            relations: edges.into_iter().cloned().collect(),
        })
    }

    async fn shortest_path(
        &self,
        a: Uuid,
        b: Uuid,
        max_depth: usize,
    ) -> Result<Option<Vec<Uuid>>> {
        let project_id = self.project_of_entity(a).await?;
        self.project_of_entity(b).await?;
        let relations = self.project_relations(&project_id).await?;
        let mut adjacency: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
        for relation in &relations {
            adjacency
                .entry(relation.from_entity)
                .or_default()
                .push(relation.to_entity);
            adjacency
                .entry(relation.to_entity)
                .or_default()
                .push(relation.from_entity);
        }
        Ok(shortest_path_bfs(&adjacency, a, b, max_depth))
    }

    async fn compute_communities(
        &self,
        project_id: &str,
        algorithm: CommunityAlgorithm,
        resolution: f64,
    ) -> Result<Vec<Community>> {
        let conn = self.pool.acquire().await?;
        let mut rows = conn
            .query(
                "SELECT id FROM entities WHERE project_id = ?",
                params![project_id],
            )
            .await?;
        let mut nodes = Vec::new();
        while let Some(row) = rows.next().await.map_err(crate::migrations::driver)? {
            let id_raw: String = row.get(0).map_err(crate::migrations::driver)?;
            nodes.push(parse_uuid(&id_raw)?);
        }
        let edges: Vec<(Uuid, Uuid, f32)> = self
            .project_relations(project_id)
            .await?
            .into_iter()
            .map(|r| (r.from_entity, r.to_entity, r.weight))
            .collect();

        let params_in = CommunityParams {
            algorithm,
            resolution,
            ..Default::default()
        };
        let partition = detect_communities(&nodes, &edges, &params_in);

        let generation = to_millis(Utc::now());
        let mut built = Vec::new();
        for members in partition {
            let mut names = Vec::new();
            for member in &members {
                if let Some(entity) = self.get_entity(*member).await? {
                    names.push(entity.name);
                }
            }
            names.sort();
            built.push(Community {
                id: Uuid::new_v4(),
                project_id: project_id.to_string(),
                level: 0,
                summary: names.join(", "),
                member_entities: members,
                created_at: Utc::now(),
            });
        }

        // Write the new generation, then retire the previous one; readers
        // in between still see a complete partition
        let member_lists: Vec<(String, String, String)> = built
            .iter()
            .map(|c| {
                let members: Vec<String> =
                    c.member_entities.iter().map(Uuid::to_string).collect();
                Ok((
                    c.id.to_string(),
                    to_json(&members)?,
                    c.summary.clone(),
                ))
            })
            .collect::<Result<_>>()?;
        for (id, members, summary) in member_lists {
            conn.execute(
                "INSERT INTO communities (id, project_id, level, member_entities, summary, \
                 generation, created_at) VALUES (?, ?, 0, ?, ?, ?, ?)",
                params![id, project_id, members, summary, generation, generation],
            )
            .await?;
        }
        conn.execute(
            "DELETE FROM communities WHERE project_id = ? AND generation < ?",
            params![project_id, generation],
        )
        .await?;

        Ok(built)
    }

    async fn community_of(&self, entity: Uuid) -> Result<Option<Community>> {
        let project_id = self.project_of_entity(entity).await?;
        let conn = self.pool.acquire().await?;
        let mut rows = conn
            .query(
                "SELECT id, member_entities, summary, level, created_at FROM communities \
                 WHERE project_id = ? AND generation = \
                 (SELECT MAX(generation) FROM communities WHERE project_id = ?)",
                params![project_id.clone(), project_id.clone()],
            )
            .await?;
        while let Some(row) = rows.next().await.map_err(crate::migrations::driver)? {
            let members_raw: String = row.get(1).map_err(crate::migrations::driver)?;
            let member_ids: Vec<String> = parse_json(&members_raw)?;
            if member_ids.iter().any(|m| m == &entity.to_string()) {
                let id_raw: String = row.get(0).map_err(crate::migrations::driver)?;
                return Ok(Some(Community {
                    id: parse_uuid(&id_raw)?,
                    project_id,
                    level: row.get::<i64>(3).map_err(crate::migrations::driver)? as u32,
                    member_entities: member_ids
                        .iter()
                        .map(|s| parse_uuid(s))
                        .collect::<Result<Vec<Uuid>>>()?,
                    summary: row.get(2).map_err(crate::migrations::driver)?,
                    created_at: from_millis(row.get(4).map_err(crate::migrations::driver)?),
                }));
            }
        }
        Ok(None)
    }

    async fn entity_count(&self, project_id: &str) -> Result<usize> {
        let conn = self.pool.acquire().await?;
        let mut rows = conn
            .query(
                "SELECT COUNT(*) FROM entities WHERE project_id = ?",
                params![project_id],
            )
            .await?;
        let row = rows
            .next()
            .await
            .map_err(crate::migrations::driver)?
            .ok_or_else(|| Error::Storage("count query returned no rows".into()))?;
        let count: i64 = row.get(0).map_err(crate::migrations::driver)?;
        Ok(count as usize)
    }

    async fn search_entities(
        &self,
        project_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<Entity>> {
        let conn = self.pool.acquire().await?;
        let sql = format!(
            "SELECT {} FROM entities WHERE project_id = ?",
            Self::ENTITY_COLUMNS
        );
        let mut rows = conn.query(&sql, params![project_id]).await?;
        let mut scored: Vec<(f32, Entity)> = Vec::new();
        while let Some(row) = rows.next().await.map_err(crate::migrations::driver)? {
            let entity = Self::row_to_entity(&row)?;
            let text = format!("{} {} {}", entity.name, entity.entity_type, entity.description);
            let score = keyword_boost(query, &text);
            if score > 0.0 {
                scored.push((score, entity));
            }
        }
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        Ok(scored.into_iter().take(limit).map(|(_, e)| e).collect())
    }
}
