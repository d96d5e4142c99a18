//! CloudEvent envelope and the trigger record derived from it

use super::types::{reply_type_for, task_type_of, EventKind, KEPTN_SPEC_VERSION};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// CloudEvents specification version used for outbound events
pub const CLOUD_EVENTS_SPEC_VERSION: &str = "1.0";

/// Structured-mode CloudEvent with Keptn extension attributes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudEvent {
    pub specversion: String,

    pub id: String,

    pub source: String,

    #[serde(rename = "type")]
    pub event_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datacontenttype: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shkeptncontext: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triggeredid: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gitcommitid: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shkeptnspecversion: Option<String>,

    #[serde(default)]
    pub data: Value,
}

impl CloudEvent {
    /// Build an event answering `trigger` with the given lifecycle phase
    ///
    /// The type mirrors the trigger's own type with its suffix replaced.
    /// The Keptn context and git commit are carried over and `triggeredid`
    /// points at the trigger's own id, so the control plane can correlate it.
    pub fn reply_to(
        trigger: &TriggerEvent,
        kind: EventKind,
        source: impl Into<String>,
        data: Value,
    ) -> Self {
        Self {
            specversion: CLOUD_EVENTS_SPEC_VERSION.to_string(),
            id: uuid::Uuid::new_v4().to_string(),
            source: source.into(),
            event_type: reply_type_for(&trigger.event_type, kind),
            time: Some(Utc::now()),
            datacontenttype: Some("application/json".to_string()),
            shkeptncontext: Some(trigger.correlation.keptn_context.clone()),
            triggeredid: Some(trigger.id.clone()),
            gitcommitid: trigger.correlation.git_commit_id.clone(),
            shkeptnspecversion: Some(KEPTN_SPEC_VERSION.to_string()),
            data,
        }
    }
}

/// Chain of identifiers linking this trigger to its workflow
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelationContext {
    /// Workflow-wide context id (`shkeptncontext`)
    pub keptn_context: String,

    /// Id of the event this trigger itself answers, if any
    pub triggered_id: Option<String>,

    /// Commit the workflow runs against
    pub git_commit_id: Option<String>,
}

/// Inbound request to execute one task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerEvent {
    /// Unique event identity
    pub id: String,

    /// Full event type, e.g. `sh.keptn.event.test.triggered`
    pub event_type: String,

    /// Correlation chain
    pub correlation: CorrelationContext,

    /// Opaque task payload (the CloudEvent `data`)
    pub payload: Value,

    /// Source timestamp
    pub time: DateTime<Utc>,
}

impl TriggerEvent {
    /// Convert a received CloudEvent
    ///
    /// Fails with `InvalidEvent` when the identity or the Keptn context is
    /// missing, since neither de-duplication nor correlation would be
    /// possible.
    pub fn from_cloud_event(event: CloudEvent) -> Result<Self> {
        if event.id.trim().is_empty() {
            return Err(Error::InvalidEvent("event id is empty".to_string()));
        }

        let keptn_context = event
            .shkeptncontext
            .filter(|ctx| !ctx.trim().is_empty())
            .ok_or_else(|| {
                Error::InvalidEvent(format!("event {} has no shkeptncontext", event.id))
            })?;

        Ok(Self {
            id: event.id,
            event_type: event.event_type,
            correlation: CorrelationContext {
                keptn_context,
                triggered_id: event.triggeredid,
                git_commit_id: event.gitcommitid,
            },
            payload: event.data,
            time: event.time.unwrap_or_else(Utc::now),
        })
    }

    /// Whether the type denotes a "task triggered" event for a named task
    pub fn is_triggered(&self) -> bool {
        self.task_type().is_some()
    }

    /// Task name parsed from the event type
    pub fn task_type(&self) -> Option<&str> {
        task_type_of(&self.event_type)
    }
}
