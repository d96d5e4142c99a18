//! Job materialization
//!
//! Builds a [`JobSpec`] from a trigger and the service settings:
//! - deterministic name from the event identity
//! - init stage fetching task files from the configuration service
//! - main stage from the payload's `job` section
//! - resource envelope (task overrides over service defaults)
//! - execution deadline

use crate::job::{derive_job_name, InitStage, JobSpec, MainStage, TaskContext};
use crate::resources::resolve;
use crate::settings::JobSettings;
use jobexec_foundation::{Error, EventData, Result, TriggerEvent};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

/// Label identifying jobs created by this service
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY_VALUE: &str = "job-executor-service";

pub const EVENT_ID_ANNOTATION: &str = "keptn.sh/event-id";
pub const CONTEXT_ANNOTATION: &str = "keptn.sh/context";

/// Decoded task payload of a trigger
#[derive(Debug, Clone, Deserialize)]
pub struct TaskPayload {
    #[serde(flatten)]
    pub data: EventData,

    #[serde(default)]
    pub job: Option<JobDefinition>,
}

/// Task-specific job description carried in the payload
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDefinition {
    #[serde(default)]
    pub image: String,

    #[serde(default)]
    pub cmd: Vec<String>,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default)]
    pub env: BTreeMap<String, String>,

    #[serde(default)]
    pub working_dir: Option<String>,

    /// Files the init stage fetches from the configuration service
    #[serde(default)]
    pub files: Vec<String>,

    #[serde(default)]
    pub resources: Option<ResourceOverrides>,

    /// Deadline in seconds
    #[serde(default)]
    pub max_poll_duration: Option<u64>,
}

/// Task-level resource overrides, in quantity notation
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResourceOverrides {
    #[serde(default)]
    pub limits: QuantityPair,

    #[serde(default)]
    pub requests: QuantityPair,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct QuantityPair {
    #[serde(default)]
    pub cpu: String,

    #[serde(default)]
    pub memory: String,
}

impl TaskPayload {
    /// Decode the opaque payload of a trigger
    pub fn decode(payload: &serde_json::Value) -> Result<Self> {
        Ok(Self::deserialize(payload)?)
    }
}

/// Materialize the job for a trigger
pub fn materialize(event: &TriggerEvent, settings: &JobSettings) -> Result<JobSpec> {
    let payload = TaskPayload::decode(&event.payload)
        .map_err(|e| Error::Materialization(format!("invalid task payload: {}", e)))?;
    materialize_payload(event, &payload, settings)
}

/// Materialize the job for a trigger whose payload is already decoded
pub fn materialize_payload(
    event: &TriggerEvent,
    payload: &TaskPayload,
    settings: &JobSettings,
) -> Result<JobSpec> {
    let task_type = event.task_type().ok_or_else(|| {
        Error::Materialization(format!("event type '{}' names no task", event.event_type))
    })?;

    if settings.init_container_image.trim().is_empty() {
        return Err(Error::Materialization(
            "no init container image configured".to_string(),
        ));
    }

    require("project", &payload.data.project)?;
    require("stage", &payload.data.stage)?;
    require("service", &payload.data.service)?;

    let job = payload.job.as_ref().ok_or_else(|| {
        Error::Materialization(format!("payload for task '{}' has no job section", task_type))
    })?;
    require("job.image", &job.image)?;

    let resources = match &job.resources {
        Some(overrides) => resolve(
            &overrides.limits.cpu,
            &overrides.limits.memory,
            &overrides.requests.cpu,
            &overrides.requests.memory,
        )?
        .merge_over(&settings.default_resources)?,
        None => settings.default_resources.clone(),
    };

    let deadline = match job.max_poll_duration {
        Some(0) => {
            return Err(Error::Materialization(
                "job.maxPollDuration must be positive".to_string(),
            ))
        }
        Some(secs) if i64::try_from(secs).is_err() => {
            return Err(Error::Materialization(format!(
                "job.maxPollDuration {} exceeds {} seconds",
                secs,
                i64::MAX
            )))
        }
        Some(secs) => Duration::from_secs(secs),
        None => settings.default_timeout,
    };

    let context = TaskContext {
        project: payload.data.project.clone(),
        stage: payload.data.stage.clone(),
        service: payload.data.service.clone(),
        keptn_context: event.correlation.keptn_context.clone(),
        git_commit_id: event.correlation.git_commit_id.clone(),
    };

    let init = InitStage {
        image: settings.init_container_image.clone(),
        configuration_service_url: settings.configuration_service_url.clone(),
        api_token: settings.api_token.clone(),
        context: context.clone(),
        files: job.files.clone(),
    };

    let main = MainStage {
        image: job.image.clone(),
        command: job.cmd.clone(),
        args: job.args.clone(),
        env: main_env(event, task_type, &context, &job.env)?,
        working_dir: job.working_dir.clone(),
        payload: event.payload.clone(),
    };

    let name = derive_job_name(&event.id, task_type);
    debug!(event_id = %event.id, job = %name, "Materialized job");

    Ok(JobSpec {
        name,
        namespace: settings.namespace.clone(),
        event_id: event.id.clone(),
        task_type: task_type.to_string(),
        init,
        main,
        resources,
        deadline,
        ttl_after_finished: settings.ttl_after_finished,
        labels: BTreeMap::from([(MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string())]),
        annotations: BTreeMap::from([
            (EVENT_ID_ANNOTATION.to_string(), event.id.clone()),
            (CONTEXT_ANNOTATION.to_string(), context.keptn_context),
        ]),
    })
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        Err(Error::Materialization(format!("missing required field '{}'", field)))
    } else {
        Ok(())
    }
}

/// Main stage environment: task env first, reserved `KEPTN_*` values win
fn main_env(
    event: &TriggerEvent,
    task_type: &str,
    context: &TaskContext,
    task_env: &BTreeMap<String, String>,
) -> Result<BTreeMap<String, String>> {
    let mut env = task_env.clone();
    env.insert("KEPTN_EVENT".to_string(), serde_json::to_string(&event.payload)?);
    env.insert("KEPTN_EVENT_ID".to_string(), event.id.clone());
    env.insert("KEPTN_CONTEXT".to_string(), context.keptn_context.clone());
    env.insert("KEPTN_TASK".to_string(), task_type.to_string());
    env.insert("KEPTN_PROJECT".to_string(), context.project.clone());
    env.insert("KEPTN_STAGE".to_string(), context.stage.clone());
    env.insert("KEPTN_SERVICE".to_string(), context.service.clone());
    Ok(env)
}
