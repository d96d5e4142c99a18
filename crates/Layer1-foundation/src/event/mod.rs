//! Event types exchanged with the automation control plane
//!
//! Inbound triggers and outbound notifications are structured CloudEvents
//! carrying Keptn extension attributes (`shkeptncontext`, `triggeredid`,
//! `gitcommitid`).
//!
//! ```text
//! sh.keptn.event.<task>.triggered  ──▶  job  ──▶  sh.keptn.event.<task>.started
//!                                              └▶  sh.keptn.event.<task>.finished
//! ```

pub mod cloud;
pub mod types;

pub use cloud::{CloudEvent, CorrelationContext, TriggerEvent, CLOUD_EVENTS_SPEC_VERSION};
pub use types::{
    event_type_for, reply_type_for, task_type_of, EventData, EventKind, EventResult, EventStatus,
    KEPTN_EVENT_PREFIX, KEPTN_SPEC_VERSION,
};
