//! Kubernetes implementation of [`JobApi`]
//!
//! Jobs run as `batch/v1` Jobs with one init container (task file fetch)
//! and one main container, sharing an `emptyDir` volume. `backoffLimit` is
//! zero so a failure is final, and `ttlSecondsAfterFinished` lets the
//! cluster collect anything the dispatcher could not delete.

use super::{JobApi, JobObservation, Submission};
use crate::job::{
    ExitDiagnostics, JobSpec, StageKind, CONFIG_MOUNT_PATH, CONFIG_VOLUME_NAME,
    INIT_CONTAINER_NAME, MAIN_CONTAINER_NAME,
};
use crate::resources::{Quantity, ResourceEnvelope};
use async_trait::async_trait;
use jobexec_foundation::{Error, Result};
use k8s_openapi::api::batch::v1::{Job, JobSpec as K8sJobSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerStatus, EmptyDirVolumeSource, EnvVar, Pod, PodSpec, PodTemplateSpec,
    ResourceRequirements, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity as K8sQuantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, ListParams, LogParams, PostParams};
use kube::Client;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Label the job controller puts on every pod of a job
const JOB_NAME_LABEL: &str = "job-name";

/// Kubernetes-backed job API
#[derive(Clone)]
pub struct KubeJobApi {
    client: Client,
}

impl KubeJobApi {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect using in-cluster config or the local kubeconfig
    pub async fn try_default() -> Result<Self> {
        let client = Client::try_default()
            .await
            .map_err(|e| Error::Config(format!("failed to create Kubernetes client: {}", e)))?;
        Ok(Self::new(client))
    }

    fn jobs(&self, namespace: &str) -> Api<Job> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn job_pods(&self, name: &str, namespace: &str) -> Result<Vec<Pod>> {
        let params = ListParams::default().labels(&format!("{}={}", JOB_NAME_LABEL, name));
        let pods = self
            .pods(namespace)
            .list(&params)
            .await
            .map_err(|e| Error::Dispatch(format!("failed to list pods of job {}: {}", name, e)))?;
        Ok(pods.items)
    }
}

#[async_trait]
impl JobApi for KubeJobApi {
    async fn create(&self, spec: &JobSpec, namespace: &str) -> Result<Submission> {
        let job = build_job(spec, namespace);

        match self.jobs(namespace).create(&PostParams::default(), &job).await {
            Ok(_) => {
                info!(job = %spec.name, namespace, "Created job");
                Ok(Submission::Created)
            }
            Err(kube::Error::Api(response)) if response.code == 409 => {
                info!(job = %spec.name, namespace, "Job already exists");
                Ok(Submission::AlreadyExists)
            }
            Err(kube::Error::Api(response)) if response.code == 404 => Err(Error::Dispatch(
                format!("namespace '{}' does not exist: {}", namespace, response.message),
            )),
            Err(kube::Error::Api(response)) if matches!(response.code, 400 | 403 | 422) => {
                Err(Error::Dispatch(format!(
                    "job {} rejected at admission ({}): {}",
                    spec.name, response.code, response.message
                )))
            }
            Err(e) => Err(Error::Dispatch(format!(
                "failed to create job {}: {}",
                spec.name, e
            ))),
        }
    }

    async fn observe(&self, name: &str, namespace: &str) -> Result<JobObservation> {
        let job = self
            .jobs(namespace)
            .get(name)
            .await
            .map_err(|e| Error::Dispatch(format!("failed to get job {}: {}", name, e)))?;
        let pods = self.job_pods(name, namespace).await?;

        let observation = classify(&job, &pods);
        debug!(job = name, ?observation, "Observed job");
        Ok(observation)
    }

    async fn logs(&self, name: &str, namespace: &str) -> Result<String> {
        let pods = self.job_pods(name, namespace).await?;
        let Some(pod_name) = latest_pod(&pods).and_then(|pod| pod.metadata.name.clone()) else {
            return Ok(String::new());
        };

        let params = LogParams {
            container: Some(MAIN_CONTAINER_NAME.to_string()),
            ..LogParams::default()
        };
        self.pods(namespace)
            .logs(&pod_name, &params)
            .await
            .map_err(|e| Error::Dispatch(format!("failed to read logs of {}: {}", pod_name, e)))
    }

    async fn delete(&self, name: &str, namespace: &str) -> Result<()> {
        match self
            .jobs(namespace)
            .delete(name, &DeleteParams::background())
            .await
        {
            Ok(_) => {
                info!(job = name, namespace, "Deleted job");
                Ok(())
            }
            Err(kube::Error::Api(response)) if response.code == 404 => {
                debug!(job = name, "Job already gone");
                Ok(())
            }
            Err(e) => Err(Error::Dispatch(format!("failed to delete job {}: {}", name, e))),
        }
    }
}

/// Translate a materialized spec into a Kubernetes Job
pub fn build_job(spec: &JobSpec, namespace: &str) -> Job {
    let resources = requirements(&spec.resources);

    let init = Container {
        name: INIT_CONTAINER_NAME.to_string(),
        image: Some(spec.init.image.clone()),
        env: Some(env_vars(spec.init.env())),
        volume_mounts: Some(vec![VolumeMount {
            name: CONFIG_VOLUME_NAME.to_string(),
            mount_path: CONFIG_MOUNT_PATH.to_string(),
            ..VolumeMount::default()
        }]),
        resources: resources.clone(),
        ..Container::default()
    };

    let main = Container {
        name: MAIN_CONTAINER_NAME.to_string(),
        image: Some(spec.main.image.clone()),
        command: non_empty(&spec.main.command),
        args: non_empty(&spec.main.args),
        working_dir: spec.main.working_dir.clone(),
        env: Some(env_vars(
            spec.main
                .env
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )),
        volume_mounts: Some(vec![VolumeMount {
            name: CONFIG_VOLUME_NAME.to_string(),
            mount_path: CONFIG_MOUNT_PATH.to_string(),
            read_only: Some(true),
            ..VolumeMount::default()
        }]),
        resources,
        ..Container::default()
    };

    let pod_spec = PodSpec {
        restart_policy: Some("Never".to_string()),
        init_containers: Some(vec![init]),
        containers: vec![main],
        volumes: Some(vec![Volume {
            name: CONFIG_VOLUME_NAME.to_string(),
            empty_dir: Some(EmptyDirVolumeSource::default()),
            ..Volume::default()
        }]),
        ..PodSpec::default()
    };

    Job {
        metadata: ObjectMeta {
            name: Some(spec.name.clone()),
            namespace: Some(namespace.to_string()),
            labels: Some(spec.labels.clone()),
            annotations: Some(spec.annotations.clone()),
            ..ObjectMeta::default()
        },
        spec: Some(K8sJobSpec {
            backoff_limit: Some(0),
            active_deadline_seconds: Some(
                i64::try_from(spec.deadline.as_secs()).unwrap_or(i64::MAX).max(1),
            ),
            ttl_seconds_after_finished: Some(
                i32::try_from(spec.ttl_after_finished.as_secs()).unwrap_or(i32::MAX),
            ),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(spec.labels.clone()),
                    ..ObjectMeta::default()
                }),
                spec: Some(pod_spec),
            },
            ..K8sJobSpec::default()
        }),
        ..Job::default()
    }
}

fn requirements(envelope: &ResourceEnvelope) -> Option<ResourceRequirements> {
    if envelope.is_empty() {
        return None;
    }

    let pair = |cpu: &Option<Quantity>, memory: &Option<Quantity>| {
        let mut map = BTreeMap::new();
        if let Some(cpu) = cpu {
            map.insert("cpu".to_string(), K8sQuantity(cpu.as_str().to_string()));
        }
        if let Some(memory) = memory {
            map.insert("memory".to_string(), K8sQuantity(memory.as_str().to_string()));
        }
        if map.is_empty() {
            None
        } else {
            Some(map)
        }
    };

    Some(ResourceRequirements {
        limits: pair(&envelope.limits_cpu, &envelope.limits_memory),
        requests: pair(&envelope.requests_cpu, &envelope.requests_memory),
        ..ResourceRequirements::default()
    })
}

fn env_vars(pairs: Vec<(String, String)>) -> Vec<EnvVar> {
    pairs
        .into_iter()
        .map(|(name, value)| EnvVar {
            name,
            value: Some(value),
            ..EnvVar::default()
        })
        .collect()
}

fn non_empty(values: &[String]) -> Option<Vec<String>> {
    if values.is_empty() {
        None
    } else {
        Some(values.to_vec())
    }
}

/// Classify a job from its status and its pods
pub fn classify(job: &Job, pods: &[Pod]) -> JobObservation {
    let status = job.status.clone().unwrap_or_default();

    for condition in status.conditions.iter().flatten() {
        if condition.status != "True" {
            continue;
        }
        match condition.type_.as_str() {
            "Complete" | "SuccessCriteriaMet" => return JobObservation::Succeeded,
            "Failed" | "FailureTarget" => {
                if condition.reason.as_deref() == Some("DeadlineExceeded") {
                    return JobObservation::DeadlineExceeded;
                }
                return JobObservation::Failed(exit_diagnostics(pods));
            }
            _ => {}
        }
    }

    if status.succeeded.unwrap_or(0) > 0 {
        return JobObservation::Succeeded;
    }

    let diagnostics = exit_diagnostics(pods);
    if status.failed.unwrap_or(0) > 0 || diagnostics.is_some() {
        return JobObservation::Failed(diagnostics);
    }

    let running = pods.iter().any(|pod| {
        pod.status.as_ref().and_then(|s| s.phase.as_deref()) == Some("Running")
    });
    if running {
        JobObservation::Running
    } else {
        JobObservation::Pending
    }
}

/// First non-zero container termination, init stage before main stage
fn exit_diagnostics(pods: &[Pod]) -> Option<ExitDiagnostics> {
    pods.iter().filter_map(|pod| pod.status.as_ref()).find_map(|status| {
        status
            .init_container_statuses
            .iter()
            .flatten()
            .find_map(|c| failed_termination(c, StageKind::Init))
            .or_else(|| {
                status
                    .container_statuses
                    .iter()
                    .flatten()
                    .find_map(|c| failed_termination(c, StageKind::Main))
            })
    })
}

fn failed_termination(container: &ContainerStatus, stage: StageKind) -> Option<ExitDiagnostics> {
    let terminated = container
        .state
        .as_ref()
        .and_then(|s| s.terminated.as_ref())
        .or_else(|| {
            container
                .last_state
                .as_ref()
                .and_then(|s| s.terminated.as_ref())
        })?;

    if terminated.exit_code == 0 {
        return None;
    }

    Some(ExitDiagnostics {
        stage,
        container: container.name.clone(),
        exit_code: terminated.exit_code,
        reason: terminated.reason.clone(),
        message: terminated.message.clone(),
    })
}

fn latest_pod(pods: &[Pod]) -> Option<&Pod> {
    let latest = pods
        .iter()
        .max_by_key(|pod| pod.metadata.creation_timestamp.as_ref().map(|t| t.0));
    if latest.is_none() {
        warn!("Job has no pods to read logs from");
    }
    latest
}
