//! In-memory cluster and event sink shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use jobexec_foundation::{CloudEvent, CorrelationContext, Error, Result, TriggerEvent};
use jobexec_task::{EventSink, JobApi, JobObservation, JobSettings, JobSpec, Submission};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashSet, VecDeque};
use std::time::Duration;

/// Cluster replaying scripted observations
///
/// Once the script runs out, every further poll returns `idle`.
pub struct FakeJobApi {
    script: Mutex<VecDeque<JobObservation>>,
    idle: JobObservation,
    existing: Mutex<HashSet<String>>,
    create_error: Mutex<Option<String>>,
    logs: String,
    pub created: Mutex<Vec<JobSpec>>,
    pub deleted: Mutex<Vec<String>>,
    pub observations: Mutex<usize>,
    running: Mutex<usize>,
    peak: Mutex<usize>,
}

impl FakeJobApi {
    pub fn new(script: Vec<JobObservation>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            idle: JobObservation::Running,
            existing: Mutex::new(HashSet::new()),
            create_error: Mutex::new(None),
            logs: String::new(),
            created: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
            observations: Mutex::new(0),
            running: Mutex::new(0),
            peak: Mutex::new(0),
        }
    }

    /// Observation returned once the script runs out
    pub fn with_idle(mut self, idle: JobObservation) -> Self {
        self.idle = idle;
        self
    }

    pub fn with_logs(mut self, logs: &str) -> Self {
        self.logs = logs.to_string();
        self
    }

    pub fn with_existing(self, name: &str) -> Self {
        self.existing.lock().insert(name.to_string());
        self
    }

    pub fn failing_create(self, message: &str) -> Self {
        *self.create_error.lock() = Some(message.to_string());
        self
    }

    pub fn created_names(&self) -> Vec<String> {
        self.created.lock().iter().map(|s| s.name.clone()).collect()
    }

    pub fn deleted_names(&self) -> Vec<String> {
        self.deleted.lock().clone()
    }

    /// Most jobs alive at once, counted from create to delete
    pub fn peak_running(&self) -> usize {
        *self.peak.lock()
    }
}

#[async_trait]
impl JobApi for FakeJobApi {
    async fn create(&self, spec: &JobSpec, _namespace: &str) -> Result<Submission> {
        if let Some(message) = self.create_error.lock().clone() {
            return Err(Error::Dispatch(message));
        }
        self.created.lock().push(spec.clone());
        {
            let mut running = self.running.lock();
            *running += 1;
            let mut peak = self.peak.lock();
            *peak = (*peak).max(*running);
        }
        if self.existing.lock().insert(spec.name.clone()) {
            Ok(Submission::Created)
        } else {
            Ok(Submission::AlreadyExists)
        }
    }

    async fn observe(&self, _name: &str, _namespace: &str) -> Result<JobObservation> {
        *self.observations.lock() += 1;
        Ok(self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.idle.clone()))
    }

    async fn logs(&self, _name: &str, _namespace: &str) -> Result<String> {
        Ok(self.logs.clone())
    }

    async fn delete(&self, name: &str, _namespace: &str) -> Result<()> {
        self.deleted.lock().push(name.to_string());
        {
            let mut running = self.running.lock();
            *running = running.saturating_sub(1);
        }
        self.existing.lock().remove(name);
        Ok(())
    }
}

/// Sink keeping every event it is sent
#[derive(Default)]
pub struct RecordingSink {
    pub events: Mutex<Vec<CloudEvent>>,
}

impl RecordingSink {
    pub fn of_type(&self, suffix: &str) -> Vec<CloudEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.event_type.ends_with(suffix))
            .cloned()
            .collect()
    }

    pub fn finished(&self) -> Vec<CloudEvent> {
        self.of_type(".finished")
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn send(&self, event: &CloudEvent) -> Result<()> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}

pub fn settings() -> JobSettings {
    JobSettings::new("keptn-jobs", "http://config:8080", "job-executor-init:1.0")
        .with_api_token("token")
        .with_poll_interval(Duration::from_secs(2))
}

pub fn task_payload() -> Value {
    json!({
        "project": "sockshop",
        "stage": "dev",
        "service": "carts",
        "job": {
            "image": "alpine:3.19",
            "cmd": ["sh", "-c"],
            "args": ["echo done"]
        }
    })
}

pub fn trigger(id: &str) -> TriggerEvent {
    trigger_with(id, "sh.keptn.event.test.triggered", task_payload())
}

pub fn trigger_with(id: &str, event_type: &str, payload: Value) -> TriggerEvent {
    TriggerEvent {
        id: id.to_string(),
        event_type: event_type.to_string(),
        correlation: CorrelationContext {
            keptn_context: format!("ctx-{}", id),
            triggered_id: None,
            git_commit_id: None,
        },
        payload,
        time: chrono::Utc::now(),
    }
}
