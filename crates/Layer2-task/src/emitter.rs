//! Outbound Keptn events
//!
//! Every accepted trigger is answered with a `.started` event and exactly
//! one `.finished` event carrying the job outcome.

use crate::job::{JobOutcome, OutcomeStatus};
use async_trait::async_trait;
use jobexec_foundation::{
    CloudEvent, Error, EventData, EventKind, EventResult, EventStatus, Result, TriggerEvent,
};
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

/// `source` of every event this service emits
pub const EVENT_SOURCE: &str = "job-executor-service";

/// Default Keptn distributor endpoint
pub const DEFAULT_EVENT_ENDPOINT: &str = "http://localhost:8081/event";

const CLOUDEVENTS_CONTENT_TYPE: &str = "application/cloudevents+json";
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Logs beyond this size are cut to their tail
const MAX_LOG_BYTES: usize = 64 * 1024;

/// Destination of outbound events
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn send(&self, event: &CloudEvent) -> Result<()>;
}

/// Posts structured CloudEvents to the Keptn event endpoint
#[derive(Clone)]
pub struct HttpEventSink {
    client: Client,
    endpoint: String,
    api_token: Option<String>,
}

impl HttpEventSink {
    pub fn new(endpoint: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_token: None,
        })
    }

    /// Send the token as `x-token` on every request; empty means none
    pub fn with_api_token(mut self, token: impl Into<String>) -> Self {
        let token = token.into();
        self.api_token = (!token.is_empty()).then_some(token);
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl EventSink for HttpEventSink {
    async fn send(&self, event: &CloudEvent) -> Result<()> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", CLOUDEVENTS_CONTENT_TYPE)
            .json(event);
        if let Some(token) = &self.api_token {
            request = request.header("x-token", token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Emit(format!("failed to send {}: {}", event.event_type, e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Emit(format!(
                "event endpoint rejected {} ({}): {}",
                event.event_type, status, body
            )));
        }

        debug!(event_type = %event.event_type, id = %event.id, "Event sent");
        Ok(())
    }
}

/// Keptn status and result for an outcome
pub fn status_of(outcome: &JobOutcome) -> (EventStatus, EventResult) {
    match outcome.status {
        OutcomeStatus::Succeeded => (EventStatus::Succeeded, EventResult::Pass),
        OutcomeStatus::Failed | OutcomeStatus::TimedOut | OutcomeStatus::Errored => {
            (EventStatus::Errored, EventResult::Fail)
        }
    }
}

/// `.started` event for a trigger
pub fn started_event(trigger: &TriggerEvent, routing: &EventData) -> CloudEvent {
    let data = EventData::routed_like(routing).with_status(EventStatus::Succeeded, EventResult::Pass);
    CloudEvent::reply_to(trigger, EventKind::Started, EVENT_SOURCE, json!(data))
}

/// `.finished` event reporting the outcome of a trigger
pub fn finished_event(trigger: &TriggerEvent, routing: &EventData, outcome: &JobOutcome) -> CloudEvent {
    CloudEvent::reply_to(
        trigger,
        EventKind::Finished,
        EVENT_SOURCE,
        finished_data(routing, outcome),
    )
}

/// Data of a `.finished` event
pub fn finished_data(routing: &EventData, outcome: &JobOutcome) -> Value {
    let (status, result) = status_of(outcome);
    let data = EventData::routed_like(routing)
        .with_status(status, result)
        .with_message(outcome.message.clone());

    let mut value = json!(data);
    value["job"] = json!({
        "name": outcome.job_name,
        "outcome": outcome.status,
        "exitCode": outcome.exit_code(),
        "durationSeconds": outcome.duration.as_secs_f64(),
        "logs": log_tail(&outcome.output),
        "diagnostics": outcome.diagnostics,
    });
    value
}

fn log_tail(output: &str) -> &str {
    if output.len() <= MAX_LOG_BYTES {
        return output;
    }
    let mut start = output.len() - MAX_LOG_BYTES;
    while !output.is_char_boundary(start) {
        start += 1;
    }
    &output[start..]
}
