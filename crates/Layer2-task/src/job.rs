//! Job definition and outcome types

use crate::resources::ResourceEnvelope;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::time::Duration;

/// Prefix of every job name
pub const JOB_NAME_PREFIX: &str = "jes";

/// Kubernetes object names (and the `job-name` label) must fit a DNS label
const MAX_JOB_NAME_LEN: usize = 63;

/// Hex characters of the event hash kept in the name
const HASH_LEN: usize = 16;

/// Shared volume the init stage populates
pub const CONFIG_VOLUME_NAME: &str = "job-volume";

/// Mount point of the shared volume in both stages
pub const CONFIG_MOUNT_PATH: &str = "/keptn";

pub const INIT_CONTAINER_NAME: &str = "init-job-executor";
pub const MAIN_CONTAINER_NAME: &str = "job";

/// Derive the job name for an event identity
///
/// The same identity always yields the same name, so a redelivered trigger
/// collides with the job already submitted for it instead of starting a
/// second one.
pub fn derive_job_name(event_id: &str, task_type: &str) -> String {
    let digest = format!("{:x}", Sha256::digest(event_id.as_bytes()));
    let hash = &digest[..HASH_LEN];

    let tag = task_tag(task_type, MAX_JOB_NAME_LEN - JOB_NAME_PREFIX.len() - HASH_LEN - 2);
    if tag.is_empty() {
        format!("{}-{}", JOB_NAME_PREFIX, hash)
    } else {
        format!("{}-{}-{}", JOB_NAME_PREFIX, tag, hash)
    }
}

/// Reduce a task type to lower-case `[a-z0-9-]`, at most `max_len` chars
fn task_tag(task_type: &str, max_len: usize) -> String {
    let mut tag = String::with_capacity(task_type.len());
    for c in task_type.chars() {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            tag.push(c);
        } else if !tag.ends_with('-') {
            tag.push('-');
        }
    }

    let mut tag: String = tag.trim_matches('-').chars().take(max_len).collect();
    while tag.ends_with('-') {
        tag.pop();
    }
    tag
}

/// Scope the configuration service is queried with
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskContext {
    pub project: String,
    pub stage: String,
    pub service: String,
    pub keptn_context: String,
    pub git_commit_id: Option<String>,
}

/// Init stage: fetches task files into the shared volume
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitStage {
    pub image: String,
    pub configuration_service_url: String,
    #[serde(skip_serializing, default)]
    pub api_token: String,
    pub context: TaskContext,
    pub files: Vec<String>,
}

impl InitStage {
    /// Environment the init container runs with
    pub fn env(&self) -> Vec<(String, String)> {
        let mut env = vec![
            (
                "CONFIGURATION_SERVICE_URL".to_string(),
                self.configuration_service_url.clone(),
            ),
            ("KEPTN_API_TOKEN".to_string(), self.api_token.clone()),
            ("KEPTN_PROJECT".to_string(), self.context.project.clone()),
            ("KEPTN_STAGE".to_string(), self.context.stage.clone()),
            ("KEPTN_SERVICE".to_string(), self.context.service.clone()),
            ("KEPTN_CONTEXT".to_string(), self.context.keptn_context.clone()),
            ("JOB_FILES".to_string(), self.files.join(",")),
            ("TARGET_DIR".to_string(), CONFIG_MOUNT_PATH.to_string()),
        ];
        if let Some(commit) = &self.context.git_commit_id {
            env.push(("KEPTN_GIT_COMMIT_ID".to_string(), commit.clone()));
        }
        env
    }
}

/// Main stage: the task body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MainStage {
    pub image: String,
    pub command: Vec<String>,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub working_dir: Option<String>,
    pub payload: serde_json::Value,
}

/// Fully materialized job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    pub name: String,
    pub namespace: String,
    pub event_id: String,
    pub task_type: String,
    pub init: InitStage,
    pub main: MainStage,
    pub resources: ResourceEnvelope,
    pub deadline: Duration,
    pub ttl_after_finished: Duration,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
}

/// Terminal status of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Succeeded,
    Failed,
    Errored,
    TimedOut,
}

impl OutcomeStatus {
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
            Self::Errored => "Errored",
            Self::TimedOut => "TimedOut",
        }
    }
}

impl std::fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Which stage a container belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Init,
    Main,
}

/// Why a container terminated unsuccessfully
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExitDiagnostics {
    pub stage: StageKind,
    pub container: String,
    pub exit_code: i32,
    pub reason: Option<String>,
    pub message: Option<String>,
}

impl std::fmt::Display for ExitDiagnostics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stage = match self.stage {
            StageKind::Init => "init stage",
            StageKind::Main => "main stage",
        };
        write!(
            f,
            "{} container '{}' exited with code {}",
            stage, self.container, self.exit_code
        )?;
        if let Some(reason) = &self.reason {
            write!(f, " ({})", reason)?;
        }
        if let Some(message) = &self.message {
            write!(f, ": {}", message)?;
        }
        Ok(())
    }
}

/// Result of running one job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobOutcome {
    pub status: OutcomeStatus,

    /// Job the outcome belongs to (absent when no job was materialized)
    pub job_name: Option<String>,

    /// Human-readable summary
    pub message: String,

    /// Main stage logs
    pub output: String,

    /// Exit diagnostics for failed jobs
    pub diagnostics: Option<ExitDiagnostics>,

    pub duration: Duration,
}

impl JobOutcome {
    pub fn succeeded(job_name: impl Into<String>, output: String, duration: Duration) -> Self {
        let job_name = job_name.into();
        Self {
            status: OutcomeStatus::Succeeded,
            message: format!("Job {} finished successfully", job_name),
            job_name: Some(job_name),
            output,
            diagnostics: None,
            duration,
        }
    }

    pub fn failed(
        job_name: impl Into<String>,
        diagnostics: Option<ExitDiagnostics>,
        output: String,
        duration: Duration,
    ) -> Self {
        let job_name = job_name.into();
        let message = match &diagnostics {
            Some(diag) => format!("Job {} failed: {}", job_name, diag),
            None => format!("Job {} failed", job_name),
        };
        Self {
            status: OutcomeStatus::Failed,
            job_name: Some(job_name),
            message,
            output,
            diagnostics,
            duration,
        }
    }

    pub fn timed_out(job_name: impl Into<String>, deadline: Duration, duration: Duration) -> Self {
        let job_name = job_name.into();
        Self {
            status: OutcomeStatus::TimedOut,
            message: format!(
                "Job {} did not finish within {}s and was deleted",
                job_name,
                deadline.as_secs()
            ),
            job_name: Some(job_name),
            output: String::new(),
            diagnostics: None,
            duration,
        }
    }

    pub fn errored(job_name: Option<String>, message: impl Into<String>, duration: Duration) -> Self {
        Self {
            status: OutcomeStatus::Errored,
            job_name,
            message: message.into(),
            output: String::new(),
            diagnostics: None,
            duration,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Succeeded
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self.status {
            OutcomeStatus::Succeeded => Some(0),
            _ => self.diagnostics.as_ref().map(|d| d.exit_code),
        }
    }
}
