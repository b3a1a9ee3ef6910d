// crates/core/src/jobs/mod.rs
//! Research job engine: registry, state, sanitizer, broadcaster, executor
//! and supervisor.

pub mod broadcast;
pub mod pipeline;
pub mod registry;
pub mod sanitize;
pub mod state;
pub mod supervisor;
pub mod types;

pub use broadcast::{JobPublisher, StatusBroadcaster, Subscription, DEFAULT_SUBSCRIBER_BUFFER};
pub use pipeline::{fallback_report, stage_fn, FnStage, PipelineExecutor, PipelineOutcome, Stage, StageList};
pub use registry::JobRegistry;
pub use sanitize::{find_reserved_key, sanitize, sanitize_state};
pub use state::{AccumulatedState, OpaqueValue, StatePatch, StateValue};
pub use supervisor::JobSupervisor;
pub use types::{JobId, JobRecord, JobStatus, JobUpdate, ResearchParams, StatusEvent};
