// ============================================================================
// Shared enums
// ============================================================================

use serde::{Deserialize, Serialize};

/// Kind of an observed episodic event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    ToolExecution,
    UserInput,
    AgentOutput,
    Error,
    Decision,
    FileChange,
    External,
}

impl EventType {
    /// Stable string form used in storage and hashing
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::ToolExecution => "tool_execution",
            EventType::UserInput => "user_input",
            EventType::AgentOutput => "agent_output",
            EventType::Error => "error",
            EventType::Decision => "decision",
            EventType::FileChange => "file_change",
            EventType::External => "external",
        }
    }

    /// Parse the stable string form
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "tool_execution" => Some(EventType::ToolExecution),
            "user_input" => Some(EventType::UserInput),
            "agent_output" => Some(EventType::AgentOutput),
            "error" => Some(EventType::Error),
            "decision" => Some(EventType::Decision),
            "file_change" => Some(EventType::FileChange),
            "external" => Some(EventType::External),
            _ => None,
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of an episodic event.
///
/// Transitions move forward only: `Active` -> `Consolidating` ->
/// `Consolidated`; any state may move to `Archived`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    Active,
    Consolidating,
    Consolidated,
    Archived,
}

impl Lifecycle {
    /// Check whether a transition to `next` is allowed
    #[must_use]
    pub fn can_transition_to(&self, next: Lifecycle) -> bool {
        matches!(
            (self, next),
            (Lifecycle::Active, Lifecycle::Consolidating)
                | (Lifecycle::Consolidating, Lifecycle::Consolidated)
                | (Lifecycle::Consolidating, Lifecycle::Active)
                | (_, Lifecycle::Archived)
        )
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Lifecycle::Active => "active",
            Lifecycle::Consolidating => "consolidating",
            Lifecycle::Consolidated => "consolidated",
            Lifecycle::Archived => "archived",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Lifecycle::Active),
            "consolidating" => Some(Lifecycle::Consolidating),
            "consolidated" => Some(Lifecycle::Consolidated),
            "archived" => Some(Lifecycle::Archived),
            _ => None,
        }
    }
}

impl std::fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of durable semantic knowledge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    Fact,
    Pattern,
    Insight,
    Rule,
}

impl MemoryType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryType::Fact => "fact",
            MemoryType::Pattern => "pattern",
            MemoryType::Insight => "insight",
            MemoryType::Rule => "rule",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "fact" => Some(MemoryType::Fact),
            "pattern" => Some(MemoryType::Pattern),
            "insight" => Some(MemoryType::Insight),
            "rule" => Some(MemoryType::Rule),
            _ => None,
        }
    }
}

/// Consolidation state of a semantic memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsolidationState {
    Unconsolidated,
    Consolidated,
}

impl ConsolidationState {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsolidationState::Unconsolidated => "unconsolidated",
            ConsolidationState::Consolidated => "consolidated",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "unconsolidated" => Some(ConsolidationState::Unconsolidated),
            "consolidated" => Some(ConsolidationState::Consolidated),
            _ => None,
        }
    }
}

/// Status of a prospective task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Active,
    Blocked,
    Completed,
    Cancelled,
}

impl TaskStatus {
    /// `Completed` is terminal; everything else may still move
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Cancelled)
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Active => "active",
            TaskStatus::Blocked => "blocked",
            TaskStatus::Completed => "completed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TaskStatus::Pending),
            "active" => Some(TaskStatus::Active),
            "blocked" => Some(TaskStatus::Blocked),
            "completed" => Some(TaskStatus::Completed),
            "cancelled" => Some(TaskStatus::Cancelled),
            _ => None,
        }
    }
}

/// Phase of a prospective task's execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPhase {
    Planning,
    Executing,
    Verifying,
    Completed,
}

impl TaskPhase {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskPhase::Planning => "planning",
            TaskPhase::Executing => "executing",
            TaskPhase::Verifying => "verifying",
            TaskPhase::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "planning" => Some(TaskPhase::Planning),
            "executing" => Some(TaskPhase::Executing),
            "verifying" => Some(TaskPhase::Verifying),
            "completed" => Some(TaskPhase::Completed),
            _ => None,
        }
    }
}

/// Baddeley working-memory component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WmComponent {
    Phonological,
    Visuospatial,
    EpisodicBuffer,
    CentralExecutive,
}

impl WmComponent {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            WmComponent::Phonological => "phonological",
            WmComponent::Visuospatial => "visuospatial",
            WmComponent::EpisodicBuffer => "episodic_buffer",
            WmComponent::CentralExecutive => "central_executive",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "phonological" => Some(WmComponent::Phonological),
            "visuospatial" => Some(WmComponent::Visuospatial),
            "episodic_buffer" => Some(WmComponent::EpisodicBuffer),
            "central_executive" => Some(WmComponent::CentralExecutive),
            _ => None,
        }
    }
}

/// Subject kind for meta-memory quality records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectKind {
    Event,
    Semantic,
    Procedure,
    Entity,
    Domain,
}

impl SubjectKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SubjectKind::Event => "event",
            SubjectKind::Semantic => "semantic",
            SubjectKind::Procedure => "procedure",
            SubjectKind::Entity => "entity",
            SubjectKind::Domain => "domain",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "event" => Some(SubjectKind::Event),
            "semantic" => Some(SubjectKind::Semantic),
            "procedure" => Some(SubjectKind::Procedure),
            "entity" => Some(SubjectKind::Entity),
            "domain" => Some(SubjectKind::Domain),
            _ => None,
        }
    }
}

/// Consolidation strategy controlling the speed/quality trade-off
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Speed,
    Balanced,
    Quality,
}

impl Strategy {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Speed => "speed",
            Strategy::Balanced => "balanced",
            Strategy::Quality => "quality",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "speed" => Some(Strategy::Speed),
            "balanced" => Some(Strategy::Balanced),
            "quality" => Some(Strategy::Quality),
            _ => None,
        }
    }
}

/// Memory layer a retrieval result originated from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryLayer {
    Episodic,
    Semantic,
    Procedural,
    Prospective,
    Graph,
    Working,
}

impl MemoryLayer {
    /// All layers probed by the retrieval planner, in probe order
    pub const ALL: [MemoryLayer; 6] = [
        MemoryLayer::Episodic,
        MemoryLayer::Semantic,
        MemoryLayer::Procedural,
        MemoryLayer::Prospective,
        MemoryLayer::Graph,
        MemoryLayer::Working,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryLayer::Episodic => "episodic",
            MemoryLayer::Semantic => "semantic",
            MemoryLayer::Procedural => "procedural",
            MemoryLayer::Prospective => "prospective",
            MemoryLayer::Graph => "graph",
            MemoryLayer::Working => "working",
        }
    }
}

impl std::fmt::Display for MemoryLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
