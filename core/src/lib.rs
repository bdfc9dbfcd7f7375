//! Persistent, dependency-aware, priority-scheduled task queue core.
//!
//! `store` owns persistence, `resolver` is pure dependency-graph math,
//! `scorer` computes `calculated_priority`, and `queue_service` ties them
//! together behind the single-writer `QueueService`. `tool_server` exposes
//! `QueueService` as the six-tool JSON protocol used by callers over stdio.

pub mod config;
pub mod errors;
pub mod queue_service;
pub mod resolver;
pub mod scorer;
pub mod store;
pub mod tool_server;
pub mod types;

pub use config::Config;
pub use errors::{ConfigError, QueueError, QueueResult, ResolverError, StoreError};
pub use queue_service::QueueService;
pub use resolver::DependencyGraph;
pub use scorer::{PriorityScorer, ScoringWeights};
pub use store::Store;
pub use tool_server::{dispatch, list_tools, ToolRequest, ToolResponse};
pub use types::{
    DependencyEdge, DependencyKind, EnqueueInput, PruneFilter, QueueStatus, Task, TaskFilter,
    TaskPatch, TaskSource, TaskStatus,
};
