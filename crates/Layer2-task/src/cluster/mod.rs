//! Cluster scheduling API seam
//!
//! The dispatcher only talks to the cluster through [`JobApi`], which keeps
//! it independent of the Kubernetes client and lets tests drive it with an
//! in-memory cluster.

pub mod kubernetes;

use crate::job::{ExitDiagnostics, JobSpec};
use async_trait::async_trait;
use jobexec_foundation::Result;

pub use kubernetes::KubeJobApi;

/// Result of a create request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// A new job was created
    Created,

    /// A job with the same name already exists
    AlreadyExists,
}

/// Snapshot of a job's progress as seen by the cluster
#[derive(Debug, Clone, PartialEq)]
pub enum JobObservation {
    /// Pods not yet running (scheduling, pulling images, init stage running)
    Pending,

    /// At least one pod running
    Running,

    /// All containers completed successfully
    Succeeded,

    /// Init or main stage failed
    Failed(Option<ExitDiagnostics>),

    /// The cluster enforced the job's own active deadline
    DeadlineExceeded,
}

impl JobObservation {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed(_) | Self::DeadlineExceeded
        )
    }
}

/// Job operations scoped to a namespace
///
/// Implementations report infrastructure problems (unreachable API,
/// admission rejection, missing namespace) as `Error::Dispatch`.
#[async_trait]
pub trait JobApi: Send + Sync {
    /// Create the job unless one with the same name exists
    async fn create(&self, spec: &JobSpec, namespace: &str) -> Result<Submission>;

    /// Observe the job's current state
    async fn observe(&self, name: &str, namespace: &str) -> Result<JobObservation>;

    /// Read the main stage logs
    async fn logs(&self, name: &str, namespace: &str) -> Result<String>;

    /// Delete the job together with its pods; deleting a missing job is not an error
    async fn delete(&self, name: &str, namespace: &str) -> Result<()>;
}
