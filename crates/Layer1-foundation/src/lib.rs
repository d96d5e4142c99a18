//! # jobexec-foundation
//!
//! Foundation layer for the job executor:
//! - Error: shared error taxonomy and `Result` alias
//! - Event: CloudEvent envelope, trigger records and Keptn event naming

pub mod error;
pub mod event;

// ============================================================================
// Error
// ============================================================================
pub use error::{Error, Result};

// ============================================================================
// Event
// ============================================================================
pub use event::{
    event_type_for, reply_type_for, task_type_of, CloudEvent, CorrelationContext, EventData, EventKind,
    EventResult, EventStatus, TriggerEvent,
};
