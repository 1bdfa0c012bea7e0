//! Common types shared across the memory system.

pub mod config;
pub mod enums;

pub use config::{
    AthenaConfig, ConsolConfig, DbConfig, EmbedConfig, EmbedProviderKind, IngestConfig, LlmConfig,
    RecallConfig, VerifyConfig,
};
pub use enums::{
    ConsolidationState, EventType, Lifecycle, MemoryLayer, MemoryType, Strategy, SubjectKind,
    TaskPhase, TaskStatus, WmComponent,
};
