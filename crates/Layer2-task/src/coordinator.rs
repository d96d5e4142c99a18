//! Execution coordinator
//!
//! Entry point for trigger events. Each accepted trigger is handled on its
//! own supervised task:
//!
//! ```text
//! submit ─▶ filter ─▶ dedup ─▶ started ─▶ materialize ─▶ dispatch ─▶ finished
//! ```
//!
//! Concurrency is bounded by a semaphore; every handler ends with exactly
//! one `.finished` event.

use crate::dedup::{DedupRegistry, InFlightGuard};
use crate::dispatcher::JobDispatcher;
use crate::emitter::{finished_event, started_event, EventSink};
use crate::job::JobOutcome;
use crate::materializer::{materialize_payload, TaskPayload};
use crate::settings::JobSettings;
use jobexec_foundation::{Error, EventData, TriggerEvent};
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// What happened to a submitted event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intake {
    /// Handler spawned
    Accepted,

    /// Not a `.triggered` event
    Ignored,

    /// Same event identity already in flight
    Duplicate,

    /// Intake closed by [`ExecutionCoordinator::shutdown`]
    ShuttingDown,
}

/// Coordinates the handling of trigger events
#[derive(Clone)]
pub struct ExecutionCoordinator {
    settings: Arc<JobSettings>,
    dispatcher: JobDispatcher,
    sink: Arc<dyn EventSink>,
    registry: DedupRegistry,
    semaphore: Arc<Semaphore>,
    tracker: TaskTracker,
    accepting: Arc<AtomicBool>,
}

impl ExecutionCoordinator {
    pub fn new(
        settings: Arc<JobSettings>,
        dispatcher: JobDispatcher,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let permits = settings.max_concurrent_jobs.max(1);
        Self {
            settings,
            dispatcher,
            sink,
            registry: DedupRegistry::new(),
            semaphore: Arc::new(Semaphore::new(permits)),
            tracker: TaskTracker::new(),
            accepting: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn settings(&self) -> &JobSettings {
        &self.settings
    }

    pub fn registry(&self) -> &DedupRegistry {
        &self.registry
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Accept an event and handle it in the background
    pub fn submit(&self, event: TriggerEvent) -> Intake {
        if !self.is_accepting() {
            return Intake::ShuttingDown;
        }
        if !event.is_triggered() {
            debug!(event_id = %event.id, event_type = %event.event_type, "Ignoring event");
            return Intake::Ignored;
        }
        let Some(guard) = self.registry.try_acquire(&event.id) else {
            info!(event_id = %event.id, "Event already in flight");
            return Intake::Duplicate;
        };

        let this = self.clone();
        self.tracker.spawn(async move {
            let _permit = this.semaphore.clone().acquire_owned().await.ok();
            this.execute(event, guard).await;
        });
        Intake::Accepted
    }

    /// Handle an event to completion on the current task
    pub async fn handle(&self, event: TriggerEvent) {
        if !self.is_accepting() {
            debug!(event_id = %event.id, "Intake closed, dropping event");
            return;
        }
        if !event.is_triggered() {
            debug!(event_id = %event.id, event_type = %event.event_type, "Ignoring event");
            return;
        }
        let Some(guard) = self.registry.try_acquire(&event.id) else {
            info!(event_id = %event.id, "Event already in flight");
            return;
        };

        let _permit = self.semaphore.acquire().await.ok();
        self.execute(event, guard).await;
    }

    /// Stop intake and wait for in-flight handlers up to `grace`
    ///
    /// Returns `false` if handlers were still running when the grace period
    /// elapsed.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.accepting.store(false, Ordering::SeqCst);
        self.tracker.close();

        info!(in_flight = self.registry.len(), "Draining handlers");
        match tokio::time::timeout(grace, self.tracker.wait()).await {
            Ok(()) => {
                info!("All handlers finished");
                true
            }
            Err(_) => {
                warn!(
                    in_flight = self.registry.len(),
                    "Shutdown grace period elapsed with handlers still running"
                );
                false
            }
        }
    }

    async fn execute(&self, event: TriggerEvent, _guard: InFlightGuard) {
        let task = event.task_type().unwrap_or_default().to_string();
        let routing = EventData::deserialize(&event.payload).unwrap_or_default();
        info!(event_id = %event.id, task = %task, "Handling trigger");

        if let Err(e) = self.sink.send(&started_event(&event, &routing)).await {
            warn!(event_id = %event.id, error = %e, "Failed to send started event");
        }

        let outcome = self.run(&event).await;
        info!(
            event_id = %event.id,
            task = %task,
            status = %outcome.status,
            duration = ?outcome.duration,
            "Trigger handled"
        );

        if let Err(e) = self.sink.send(&finished_event(&event, &routing, &outcome)).await {
            error!(event_id = %event.id, error = %e, "Failed to send finished event");
        }
    }

    async fn run(&self, event: &TriggerEvent) -> JobOutcome {
        let started = Instant::now();

        let payload = match TaskPayload::decode(&event.payload) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(event_id = %event.id, error = %e, "Invalid task payload");
                return JobOutcome::errored(
                    None,
                    format!("invalid task payload: {}", e),
                    started.elapsed(),
                );
            }
        };

        let spec = match materialize_payload(event, &payload, &self.settings) {
            Ok(spec) => spec,
            Err(e) => return errored(event, None, e, started),
        };

        match self.dispatcher.run(&spec, &spec.namespace).await {
            Ok(outcome) => outcome,
            Err(e) => errored(event, Some(spec.name.clone()), e, started),
        }
    }
}

fn errored(event: &TriggerEvent, job: Option<String>, e: Error, started: Instant) -> JobOutcome {
    if e.is_infrastructure() {
        error!(event_id = %event.id, job = ?job, error = %e, kind = e.kind(), "Job could not run");
    } else {
        warn!(event_id = %event.id, job = ?job, error = %e, kind = e.kind(), "Job rejected");
    }
    JobOutcome::errored(job, e.to_string(), started.elapsed())
}
