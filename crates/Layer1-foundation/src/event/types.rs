//! Event Types - Keptn event naming and common payload fields

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Prefix shared by every Keptn task event type
pub const KEPTN_EVENT_PREFIX: &str = "sh.keptn.event.";

/// Keptn event specification version stamped on outbound events
pub const KEPTN_SPEC_VERSION: &str = "0.2.4";

// ============================================================================
// Event Kind
// ============================================================================

/// Lifecycle phase encoded in the suffix of an event type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Triggered,
    Started,
    StatusChanged,
    Finished,
}

impl EventKind {
    /// Event type suffix, including the leading dot
    pub fn suffix(&self) -> &'static str {
        match self {
            Self::Triggered => ".triggered",
            Self::Started => ".started",
            Self::StatusChanged => ".status.changed",
            Self::Finished => ".finished",
        }
    }

    /// Detect the kind of an event type string
    pub fn of(event_type: &str) -> Option<Self> {
        [
            Self::Triggered,
            Self::Started,
            Self::StatusChanged,
            Self::Finished,
        ]
        .into_iter()
        .find(|kind| event_type.ends_with(kind.suffix()))
    }
}

/// Extract the task name from a `.triggered` event type
///
/// `sh.keptn.event.deployment.triggered` yields `deployment`. Types without
/// the Keptn prefix keep everything before the suffix. Returns `None` for
/// non-triggered types or an empty task name.
pub fn task_type_of(event_type: &str) -> Option<&str> {
    let without_suffix = event_type.strip_suffix(EventKind::Triggered.suffix())?;
    let task = without_suffix
        .strip_prefix(KEPTN_EVENT_PREFIX)
        .unwrap_or(without_suffix);

    if task.is_empty() {
        None
    } else {
        Some(task)
    }
}

/// Build the event type for a task and lifecycle phase
pub fn event_type_for(task: &str, kind: EventKind) -> String {
    format!("{}{}{}", KEPTN_EVENT_PREFIX, task, kind.suffix())
}

/// Event type answering `trigger_type` with the given lifecycle phase
///
/// Only the `.triggered` suffix is replaced, so the reply keeps whatever
/// namespace the trigger used: `com.example.build.triggered` is answered
/// with `com.example.build.finished`.
pub fn reply_type_for(trigger_type: &str, kind: EventKind) -> String {
    let stem = trigger_type
        .strip_suffix(EventKind::Triggered.suffix())
        .unwrap_or(trigger_type);
    format!("{}{}", stem, kind.suffix())
}

// ============================================================================
// Status / Result
// ============================================================================

/// Processing status reported in outbound events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Succeeded,
    Errored,
    Unknown,
}

/// Task result reported in outbound events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventResult {
    Pass,
    Warning,
    Fail,
}

// ============================================================================
// Common event data
// ============================================================================

/// Fields every Keptn event payload carries
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventData {
    #[serde(default)]
    pub project: String,

    #[serde(default)]
    pub stage: String,

    #[serde(default)]
    pub service: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<EventStatus>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<EventResult>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl EventData {
    /// Copy the routing fields (project/stage/service/labels) of another payload
    pub fn routed_like(other: &EventData) -> Self {
        Self {
            project: other.project.clone(),
            stage: other.stage.clone(),
            service: other.service.clone(),
            labels: other.labels.clone(),
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: EventStatus, result: EventResult) -> Self {
        self.status = Some(status);
        self.result = Some(result);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}
