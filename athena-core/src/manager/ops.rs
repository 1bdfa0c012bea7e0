//! Transport-neutral operation surface.
//!
//! Every operation returns a structured [`OperationResult`] envelope with a
//! short summary and a drill-down hint; a thin adapter (HTTP, MCP) can relay
//! these without knowing the domain types. List-returning operations accept
//! `limit`/`offset` pagination with a hard limit cap.

use super::{AthenaMemory, RememberKind};
use crate::consolidation::ConsolidationParams;
use crate::episodic::{EpisodicEvent, EventFilter, TimeWindow};
use crate::error::{Error, Result};
use crate::graph::{CommunityAlgorithm, Entity};
use crate::prospective::Task;
use crate::retrieval::RecallOptions;
use crate::semantic::SemanticFilter;
use crate::types::{EventType, Strategy, TaskStatus};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

/// Pagination defaults and bounds
pub const DEFAULT_LIMIT: usize = 10;
pub const MAX_LIMIT: usize = 100;

/// Pagination block in list envelopes
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Pagination {
    pub limit: usize,
    pub offset: usize,
    pub total: usize,
    pub has_more: bool,
}

/// Envelope metadata
#[derive(Debug, Clone, Serialize)]
pub struct OperationMeta {
    pub operation: String,
    pub degraded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pagination: Option<Pagination>,
}

/// The operation envelope
#[derive(Debug, Clone, Serialize)]
pub struct OperationResult {
    pub status: String,
    pub data: serde_json::Value,
    /// Short human summary with a drill-down hint
    pub summary: String,
    pub metadata: OperationMeta,
}

impl OperationResult {
    fn ok(operation: &str, data: serde_json::Value, summary: String) -> Self {
        Self {
            status: "ok".to_string(),
            data,
            summary,
            metadata: OperationMeta {
                operation: operation.to_string(),
                degraded: false,
                pagination: None,
            },
        }
    }

    fn with_pagination(mut self, pagination: Pagination) -> Self {
        self.metadata.pagination = Some(pagination);
        self
    }

    fn with_degraded(mut self, degraded: bool) -> Self {
        self.metadata.degraded = degraded;
        self
    }
}

/// Clamp pagination inputs to the allowed bounds
#[must_use]
pub fn clamp_pagination(limit: Option<usize>, offset: Option<usize>) -> (usize, usize) {
    let limit = limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    (limit, offset.unwrap_or(0))
}

impl AthenaMemory {
    /// `remember` operation
    pub async fn op_remember(
        &self,
        project_id: &str,
        content: &str,
        kind: RememberKind,
        metadata: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> Result<OperationResult> {
        let id = self.remember(project_id, content, kind, metadata).await?;
        Ok(OperationResult::ok(
            "remember",
            json!({ "id": id }),
            format!("Stored new memory {id}; recall it with the recall operation."),
        ))
    }

    /// `recall` operation
    pub async fn op_recall(
        &self,
        query: &str,
        options: &RecallOptions,
    ) -> Result<OperationResult> {
        let response = self.recall(query, options).await?;
        let summary = format!(
            "Found {} result(s) at tier {} (cache_hit={}); inspect decisions for gate detail.",
            response.results.len(),
            response.used_tier,
            response.cache_hit
        );
        let degraded = response.degraded;
        Ok(
            OperationResult::ok("recall", serde_json::to_value(&response)?, summary)
                .with_degraded(degraded),
        )
    }

    /// `forget` operation
    pub async fn op_forget(&self, project_id: &str, id: Uuid) -> Result<OperationResult> {
        self.forget(project_id, id).await?;
        Ok(OperationResult::ok(
            "forget",
            json!({ "id": id }),
            format!("Forgot {id}; archived events remain for provenance."),
        ))
    }

    /// `list_memories` operation
    pub async fn op_list_memories(
        &self,
        project_id: &str,
        limit: Option<usize>,
        offset: Option<usize>,
    ) -> Result<OperationResult> {
        let (limit, offset) = clamp_pagination(limit, offset);
        let total = self
            .stores()
            .semantic
            .count(project_id, &SemanticFilter::default())
            .await?;
        let all = self
            .stores()
            .semantic
            .list_all(project_id, offset + limit)
            .await?;
        let page: Vec<_> = all.into_iter().skip(offset).take(limit).collect();
        let shown = page.len();

        Ok(OperationResult::ok(
            "list_memories",
            serde_json::to_value(&page)?,
            format!("Listing {shown} of {total} semantic memories; page with offset={}.", offset + shown),
        )
        .with_pagination(Pagination {
            limit,
            offset,
            total,
            has_more: offset + shown < total,
        }))
    }

    /// `optimize` operation
    pub async fn op_optimize(&self, project_id: &str) -> Result<OperationResult> {
        let report = self.optimize(project_id).await?;
        Ok(OperationResult::ok(
            "optimize",
            serde_json::to_value(&report)?,
            format!(
                "Dropped {} decayed working-memory item(s), archived {} old event(s).",
                report.working_memory_dropped, report.events_archived
            ),
        ))
    }

    /// `consolidate` operation
    pub async fn op_consolidate(&self, params: &ConsolidationParams) -> Result<OperationResult> {
        let report = self.consolidate(params).await?;
        let summary = format!(
            "Consolidated {} event(s) into {} semantic and {} procedural item(s); see consolidation_status for history.",
            report.selected_events, report.promoted_semantic, report.promoted_procedures
        );
        let degraded = report.degraded;
        Ok(
            OperationResult::ok("consolidate", serde_json::to_value(&report)?, summary)
                .with_degraded(degraded),
        )
    }

    /// `schedule_consolidation` operation
    pub fn op_schedule_consolidation(
        &self,
        project_id: &str,
        strategy: Strategy,
    ) -> OperationResult {
        self.schedule_consolidation(project_id, strategy);
        OperationResult::ok(
            "schedule_consolidation",
            json!({ "project_id": project_id, "strategy": strategy.as_str() }),
            format!(
                "Scheduled {} consolidation every {} second(s).",
                strategy.as_str(),
                self.config().consol.window_s
            ),
        )
    }

    /// `consolidation_status` operation
    pub fn op_consolidation_status(&self) -> Result<OperationResult> {
        let status = self.consolidation_status();
        Ok(OperationResult::ok(
            "consolidation_status",
            serde_json::to_value(&status)?,
            format!(
                "{} run(s) completed, currently {}.",
                status.runs_completed,
                if status.running { "running" } else { "idle" }
            ),
        ))
    }

    /// `record_event` operation
    pub async fn op_record_event(&self, event: EpisodicEvent) -> Result<OperationResult> {
        event.validate()?;
        let project_id = event.project_id.clone();
        let outcome = self.stores().episodic.append(event).await?;
        if outcome.inserted {
            self.invalidate_recall(&project_id);
        }
        Ok(OperationResult::ok(
            "record_event",
            json!({ "id": outcome.id, "inserted": outcome.inserted }),
            if outcome.inserted {
                format!("Recorded event {}; recall_events lists it.", outcome.id)
            } else {
                format!("Duplicate content; existing event {} returned.", outcome.id)
            },
        ))
    }

    /// `recall_events` operation
    pub async fn op_recall_events(
        &self,
        project_id: &str,
        event_types: Vec<EventType>,
        limit: Option<usize>,
        offset: Option<usize>,
    ) -> Result<OperationResult> {
        let (limit, offset) = clamp_pagination(limit, offset);
        let filter = EventFilter {
            event_types,
            ..Default::default()
        };
        let total = self.stores().episodic.count(project_id, &filter).await?;
        let events = self
            .stores()
            .episodic
            .list(project_id, &filter, limit, offset)
            .await?;
        let shown = events.len();

        Ok(OperationResult::ok(
            "recall_events",
            serde_json::to_value(&events)?,
            format!("Listing {shown} of {total} event(s); use timeline for a windowed view."),
        )
        .with_pagination(Pagination {
            limit,
            offset,
            total,
            has_more: offset + shown < total,
        }))
    }

    /// `timeline` operation
    pub async fn op_timeline(
        &self,
        project_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: Option<usize>,
    ) -> Result<OperationResult> {
        let (limit, _) = clamp_pagination(limit, None);
        let window = TimeWindow { start, end };
        let events = self
            .stores()
            .episodic
            .recall_temporal(project_id, window, limit)
            .await?;
        Ok(OperationResult::ok(
            "timeline",
            serde_json::to_value(&events)?,
            format!(
                "{} event(s) between {start} and {end}; widen the window for more.",
                events.len()
            ),
        ))
    }

    /// `create_task` operation
    pub async fn op_create_task(&self, task: Task) -> Result<OperationResult> {
        let id = self.stores().prospective.create_task(task).await?;
        Ok(OperationResult::ok(
            "create_task",
            json!({ "id": id }),
            format!("Created task {id}; list_tasks shows its status."),
        ))
    }

    /// `update_task` operation
    pub async fn op_update_task(
        &self,
        id: Uuid,
        status: Option<TaskStatus>,
        phase: Option<crate::types::TaskPhase>,
    ) -> Result<OperationResult> {
        if let Some(status) = status {
            self.stores().prospective.update_status(id, status).await?;
        }
        if let Some(phase) = phase {
            self.stores().prospective.set_phase(id, phase).await?;
        }
        Ok(OperationResult::ok(
            "update_task",
            json!({ "id": id }),
            format!("Updated task {id}."),
        ))
    }

    /// `list_tasks` operation
    pub async fn op_list_tasks(
        &self,
        project_id: &str,
        status: Option<TaskStatus>,
        limit: Option<usize>,
        offset: Option<usize>,
    ) -> Result<OperationResult> {
        let (limit, offset) = clamp_pagination(limit, offset);
        let total = self.stores().prospective.count(project_id, status).await?;
        let tasks = self
            .stores()
            .prospective
            .list(project_id, status, limit, offset)
            .await?;
        let shown = tasks.len();

        Ok(OperationResult::ok(
            "list_tasks",
            serde_json::to_value(&tasks)?,
            format!("Listing {shown} of {total} task(s); active_goals filters to goals."),
        )
        .with_pagination(Pagination {
            limit,
            offset,
            total,
            has_more: offset + shown < total,
        }))
    }

    /// `set_goal` operation: a goal is a high-priority task in planning
    pub async fn op_set_goal(
        &self,
        project_id: &str,
        title: &str,
        description: &str,
    ) -> Result<OperationResult> {
        let mut task = Task::new(project_id, title).with_priority(9);
        task.description = description.to_string();
        let id = self.stores().prospective.create_task(task).await?;
        Ok(OperationResult::ok(
            "set_goal",
            json!({ "id": id }),
            format!("Goal {id} created at priority 9; active_goals lists open goals."),
        ))
    }

    /// `active_goals` operation
    pub async fn op_active_goals(&self, project_id: &str) -> Result<OperationResult> {
        let tasks = self.stores().prospective.list_active(project_id, MAX_LIMIT).await?;
        let goals: Vec<&Task> = tasks.iter().filter(|t| t.priority >= 8).collect();
        Ok(OperationResult::ok(
            "active_goals",
            serde_json::to_value(&goals)?,
            format!("{} active goal(s); list_tasks shows everything else.", goals.len()),
        ))
    }

    /// `create_entity` operation
    pub async fn op_create_entity(&self, entity: Entity) -> Result<OperationResult> {
        let id = self.stores().graph.upsert_entity(entity).await?;
        Ok(OperationResult::ok(
            "create_entity",
            json!({ "id": id }),
            format!("Entity {id} upserted; neighborhood explores its relations."),
        ))
    }

    /// `create_relation` operation
    pub async fn op_create_relation(
        &self,
        project_id: &str,
        from_name: &str,
        to_name: &str,
        relation_type: &str,
    ) -> Result<OperationResult> {
        let id = self
            .stores()
            .graph
            .upsert_relation_by_names(project_id, from_name, to_name, relation_type)
            .await?;
        Ok(OperationResult::ok(
            "create_relation",
            json!({ "id": id }),
            format!("Relation {from_name} -{relation_type}-> {to_name} recorded."),
        ))
    }

    /// `search_graph` operation
    pub async fn op_search_graph(
        &self,
        project_id: &str,
        query: &str,
        limit: Option<usize>,
    ) -> Result<OperationResult> {
        let (limit, _) = clamp_pagination(limit, None);
        let entities = self
            .stores()
            .graph
            .search_entities(project_id, query, limit)
            .await?;
        Ok(OperationResult::ok(
            "search_graph",
            serde_json::to_value(&entities)?,
            format!("{} entity match(es); neighborhood expands any of them.", entities.len()),
        ))
    }

    /// `neighborhood` operation
    pub async fn op_neighborhood(
        &self,
        entity: Uuid,
        depth: usize,
        relation_filter: Option<&str>,
    ) -> Result<OperationResult> {
        let neighborhood = self
            .stores()
            .graph
            .get_neighborhood(entity, depth.clamp(1, 5), relation_filter)
            .await?;
        Ok(OperationResult::ok(
            "neighborhood",
            json!({
                "entities": neighborhood.entities,
                "relations": neighborhood.relations,
            }),
            format!(
                "{} entities and {} relations within {depth} hop(s).",
                neighborhood.entities.len(),
                neighborhood.relations.len()
            ),
        ))
    }

    /// `communities` operation
    pub async fn op_communities(
        &self,
        project_id: &str,
        algorithm: CommunityAlgorithm,
        resolution: f64,
    ) -> Result<OperationResult> {
        let communities = self
            .stores()
            .graph
            .compute_communities(project_id, algorithm, resolution)
            .await?;
        Ok(OperationResult::ok(
            "communities",
            serde_json::to_value(&communities)?,
            format!("Partitioned the graph into {} communit(ies).", communities.len()),
        ))
    }

    /// `verify` operation: run the gates over a caller-assembled request
    pub fn op_verify(
        &self,
        request: &crate::verify::VerifyRequest,
    ) -> Result<OperationResult> {
        let verification = self.gateway().verify(request)?;
        let summary = if verification.passed {
            format!(
                "All gates passed at confidence {:.2}.",
                verification.confidence
            )
        } else {
            format!(
                "{} violation(s) at confidence {:.2}; decisions has the record.",
                verification.violations.len(),
                verification.confidence
            )
        };
        Ok(OperationResult::ok(
            "verify",
            serde_json::to_value(&verification)?,
            summary,
        ))
    }

    /// `health_detailed` operation
    pub async fn op_health_detailed(&self) -> Result<OperationResult> {
        let health = self.health().await;
        let breakdown = self.observer().health_score(Utc::now());
        let operations = self.observer().operation_health(Utc::now());
        Ok(OperationResult::ok(
            "health_detailed",
            json!({
                "health": health,
                "breakdown": breakdown,
                "operations": operations,
                "cache": format!("{:?}", self.recall_cache_metrics()),
                "ingest": self.pipeline().stats().snapshot(),
            }),
            format!(
                "System health {:.2}; decisions and violations drill into gate outcomes.",
                breakdown.score
            ),
        ))
    }

    /// `violations` operation
    pub fn op_violations(&self, limit: Option<usize>) -> Result<OperationResult> {
        let (limit, _) = clamp_pagination(limit, None);
        let violations = self.observer().violations(limit);
        Ok(OperationResult::ok(
            "violations",
            serde_json::to_value(&violations)?,
            format!("{} recent decision(s) carried violations.", violations.len()),
        ))
    }

    /// `decisions` operation
    pub fn op_decisions(&self, limit: Option<usize>) -> Result<OperationResult> {
        let (limit, _) = clamp_pagination(limit, None);
        let decisions = self.observer().recent(limit);
        Ok(OperationResult::ok(
            "decisions",
            serde_json::to_value(&decisions)?,
            format!("{} recent decision record(s); record_outcome labels them.", decisions.len()),
        ))
    }

    /// `recommendations` operation: threshold proposals from the feedback loop
    pub fn op_recommendations(&self) -> Result<OperationResult> {
        let proposal = self
            .observer()
            .threshold_proposal(self.config().verify.confidence_floor);
        let summary = match &proposal {
            Some(p) => format!(
                "Proposing {} {:.2} -> {:.2} from {} labeled outcome(s); not auto-applied.",
                p.gate, p.current, p.proposed, p.supporting_outcomes
            ),
            None => "No threshold adjustments supported by current outcomes.".to_string(),
        };
        Ok(OperationResult::ok(
            "recommendations",
            serde_json::to_value(&proposal)?,
            summary,
        ))
    }

    /// `record_outcome` operation for the feedback loop
    pub fn op_record_outcome(
        &self,
        decision_id: Uuid,
        actual: &str,
        correct: bool,
    ) -> Result<OperationResult> {
        if !self.observer().record_outcome(decision_id, actual, correct) {
            return Err(Error::NotFound(decision_id));
        }
        Ok(OperationResult::ok(
            "record_outcome",
            json!({ "decision_id": decision_id, "correct": correct }),
            "Outcome recorded; recommendations reflects accumulated accuracy.".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::AthenaMemory;

    #[test]
    fn test_pagination_clamping() {
        assert_eq!(clamp_pagination(None, None), (10, 0));
        assert_eq!(clamp_pagination(Some(500), Some(20)), (100, 20));
        assert_eq!(clamp_pagination(Some(0), None), (1, 0));
    }

    #[tokio::test]
    async fn test_list_memories_pagination_envelope() {
        let memory = AthenaMemory::new();
        for i in 0..15 {
            memory
                .remember(
                    "proj",
                    &format!("distinct fact number {i} about the system"),
                    RememberKind::Semantic(crate::types::MemoryType::Fact),
                    None,
                )
                .await
                .unwrap();
        }

        let result = memory
            .op_list_memories("proj", Some(10), Some(0))
            .await
            .unwrap();
        assert_eq!(result.status, "ok");
        let pagination = result.metadata.pagination.unwrap();
        assert_eq!(pagination.total, 15);
        assert!(pagination.has_more);

        let last_page = memory
            .op_list_memories("proj", Some(10), Some(10))
            .await
            .unwrap();
        let pagination = last_page.metadata.pagination.unwrap();
        assert!(!pagination.has_more);
    }

    #[tokio::test]
    async fn test_record_event_envelope_reports_duplicate() {
        let memory = AthenaMemory::new();
        let event =
            EpisodicEvent::new("proj", EventType::UserInput, "login failed for admin user");
        let duplicate = EpisodicEvent::new("proj", EventType::UserInput, "login failed for admin user");

        let first = memory.op_record_event(event).await.unwrap();
        assert!(first.data["inserted"].as_bool().unwrap());

        let second = memory.op_record_event(duplicate).await.unwrap();
        assert!(!second.data["inserted"].as_bool().unwrap());
        assert_eq!(first.data["id"], second.data["id"]);
    }

    #[tokio::test]
    async fn test_goal_round_trip() {
        let memory = AthenaMemory::new();
        memory
            .op_set_goal("proj", "reduce recall latency", "keep tier-1 under 100ms")
            .await
            .unwrap();
        let goals = memory.op_active_goals("proj").await.unwrap();
        let listed = goals.data.as_array().unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn test_graph_ops_round_trip() {
        let memory = AthenaMemory::new();
        memory
            .op_create_relation("proj", "api", "postgres", "depends_on")
            .await
            .unwrap();
        let found = memory
            .op_search_graph("proj", "postgres", None)
            .await
            .unwrap();
        assert_eq!(found.data.as_array().unwrap().len(), 1);
    }
}
