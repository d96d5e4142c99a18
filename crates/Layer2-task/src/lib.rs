//! # jobexec-task
//!
//! Turns Keptn trigger events into cluster jobs and reports their outcome.
//!
//! ## Features
//!
//! - Resource envelope resolution (task overrides over service defaults)
//! - Deterministic job materialization (init stage + main stage)
//! - Job dispatch with deadline, log capture and cleanup
//! - Bounded, supervised handling with per-event de-duplication
//! - `.started` / `.finished` event emission

pub mod cluster;
pub mod coordinator;
pub mod dedup;
pub mod dispatcher;
pub mod emitter;
pub mod job;
pub mod materializer;
pub mod resources;
pub mod settings;
pub mod state;

// Coordination
pub use coordinator::{ExecutionCoordinator, Intake};
pub use dedup::{DedupRegistry, InFlightGuard};

// Job model
pub use job::{
    derive_job_name, ExitDiagnostics, InitStage, JobOutcome, JobSpec, MainStage, OutcomeStatus,
    StageKind, TaskContext,
};
pub use materializer::{materialize, materialize_payload, JobDefinition, TaskPayload};
pub use resources::{resolve, Quantity, ResourceEnvelope, ResourceField};
pub use settings::JobSettings;
pub use state::JobState;

// Cluster
pub use cluster::{JobApi, JobObservation, KubeJobApi, Submission};
pub use dispatcher::JobDispatcher;

// Events
pub use emitter::{
    finished_data, finished_event, started_event, status_of, EventSink, HttpEventSink,
    DEFAULT_EVENT_ENDPOINT, EVENT_SOURCE,
};
