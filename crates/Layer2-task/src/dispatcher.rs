//! Job dispatcher
//!
//! Submits a materialized job, follows it to a terminal state within its
//! deadline, collects the main stage logs and removes the job afterwards.

use crate::cluster::{JobApi, JobObservation, Submission};
use crate::job::{JobOutcome, JobSpec};
use crate::state::JobState;
use jobexec_foundation::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Consecutive failed status reads tolerated before giving up
const MAX_OBSERVE_FAILURES: u32 = 3;

/// Drives jobs on the cluster through [`JobApi`]
#[derive(Clone)]
pub struct JobDispatcher {
    api: Arc<dyn JobApi>,
    poll_interval: Duration,
}

impl JobDispatcher {
    pub fn new(api: Arc<dyn JobApi>, poll_interval: Duration) -> Self {
        Self { api, poll_interval }
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Run a job to completion
    ///
    /// Task failures are reported as a `Failed` or `TimedOut` outcome. Only
    /// infrastructure failures (unreachable API, admission rejection,
    /// missing namespace) return `Error::Dispatch`.
    pub async fn run(&self, spec: &JobSpec, namespace: &str) -> Result<JobOutcome> {
        let started = Instant::now();

        let mut state = match self.api.create(spec, namespace).await? {
            Submission::Created => JobState::Submitted,
            Submission::AlreadyExists => {
                info!(job = %spec.name, "Attaching to existing job");
                JobState::AttachedExisting
            }
        };
        info!(job = %spec.name, namespace, state = %state, deadline = ?spec.deadline, "Job dispatched");

        let watched =
            tokio::time::timeout(spec.deadline, self.watch(&spec.name, namespace, &mut state))
                .await;

        match watched {
            Ok(Ok(JobObservation::Succeeded)) => {
                advance(&mut state, JobState::Succeeded, &spec.name);
                let output = self.collect_logs(&spec.name, namespace).await;
                self.cleanup(&spec.name, namespace).await;
                Ok(JobOutcome::succeeded(&spec.name, output, started.elapsed()))
            }
            Ok(Ok(JobObservation::Failed(diagnostics))) => {
                advance(&mut state, JobState::Failed, &spec.name);
                let output = self.collect_logs(&spec.name, namespace).await;
                self.cleanup(&spec.name, namespace).await;
                Ok(JobOutcome::failed(&spec.name, diagnostics, output, started.elapsed()))
            }
            Ok(Ok(_)) => {
                // DeadlineExceeded enforced by the cluster
                advance(&mut state, JobState::TimedOut, &spec.name);
                self.cleanup(&spec.name, namespace).await;
                Ok(JobOutcome::timed_out(&spec.name, spec.deadline, started.elapsed()))
            }
            Ok(Err(e)) => {
                error!(job = %spec.name, error = %e, "Lost track of job");
                self.cleanup(&spec.name, namespace).await;
                Err(e)
            }
            Err(_) => {
                warn!(job = %spec.name, deadline = ?spec.deadline, "Job exceeded its deadline");
                advance(&mut state, JobState::TimedOut, &spec.name);
                self.cleanup(&spec.name, namespace).await;
                Ok(JobOutcome::timed_out(&spec.name, spec.deadline, started.elapsed()))
            }
        }
    }

    /// Poll until the job reaches a terminal observation
    async fn watch(
        &self,
        name: &str,
        namespace: &str,
        state: &mut JobState,
    ) -> Result<JobObservation> {
        let mut failures = 0;

        loop {
            match self.api.observe(name, namespace).await {
                Ok(observation) if observation.is_terminal() => return Ok(observation),
                Ok(JobObservation::Running) => {
                    failures = 0;
                    advance(state, JobState::Running, name);
                }
                Ok(observation) => {
                    failures = 0;
                    debug!(job = name, ?observation, "Job not started yet");
                }
                Err(e) => {
                    failures += 1;
                    if failures >= MAX_OBSERVE_FAILURES {
                        return Err(e);
                    }
                    warn!(job = name, error = %e, attempt = failures, "Failed to observe job");
                }
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn collect_logs(&self, name: &str, namespace: &str) -> String {
        match self.api.logs(name, namespace).await {
            Ok(logs) => logs,
            Err(e) => {
                warn!(job = name, error = %e, "Failed to read job logs");
                String::new()
            }
        }
    }

    /// Best-effort deletion; the job's TTL collects it if this fails
    async fn cleanup(&self, name: &str, namespace: &str) {
        if let Err(e) = self.api.delete(name, namespace).await {
            warn!(job = name, error = %e, "Failed to delete job");
        }
    }
}

fn advance(state: &mut JobState, next: JobState, job: &str) {
    if *state == next {
        return;
    }
    if state.can_transition_to(next) {
        debug!(job, from = %state, to = %next, "Job state changed");
        *state = next;
    } else {
        warn!(job, from = %state, to = %next, "Ignoring invalid job state transition");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance_follows_state_machine() {
        let mut state = JobState::Submitted;
        advance(&mut state, JobState::Running, "jes-test");
        assert_eq!(state, JobState::Running);

        advance(&mut state, JobState::AttachedExisting, "jes-test");
        assert_eq!(state, JobState::Running);

        advance(&mut state, JobState::Succeeded, "jes-test");
        advance(&mut state, JobState::Running, "jes-test");
        assert_eq!(state, JobState::Succeeded);
    }
}
