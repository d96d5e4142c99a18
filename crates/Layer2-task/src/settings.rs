//! Process-wide job settings
//!
//! Built once at startup, then shared read-only (`Arc<JobSettings>`) with
//! every component that needs it.

use crate::resources::{resolve, ResourceEnvelope};
use jobexec_foundation::{Error, Result};
use std::time::Duration;

/// Settings applied to every materialized job
#[derive(Debug, Clone)]
pub struct JobSettings {
    /// Namespace the jobs run in
    pub namespace: String,

    /// Configuration service endpoint handed to the init stage
    pub configuration_service_url: String,

    /// Service credential for the configuration service
    pub api_token: String,

    /// Image of the init stage that fetches task files
    pub init_container_image: String,

    /// Resource envelope applied where tasks set nothing
    pub default_resources: ResourceEnvelope,

    /// Deadline for jobs that do not request their own
    pub default_timeout: Duration,

    /// Interval between job status polls
    pub poll_interval: Duration,

    /// How long finished jobs stay around before the cluster collects them
    pub ttl_after_finished: Duration,

    /// Upper bound on concurrently running jobs
    pub max_concurrent_jobs: usize,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            namespace: "keptn".to_string(),
            configuration_service_url: String::new(),
            api_token: String::new(),
            init_container_image: String::new(),
            default_resources: ResourceEnvelope::default(),
            default_timeout: Duration::from_secs(300),
            poll_interval: Duration::from_secs(2),
            ttl_after_finished: Duration::from_secs(600),
            max_concurrent_jobs: 8,
        }
    }
}

impl JobSettings {
    pub fn new(
        namespace: impl Into<String>,
        configuration_service_url: impl Into<String>,
        init_container_image: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            configuration_service_url: configuration_service_url.into(),
            init_container_image: init_container_image.into(),
            ..Default::default()
        }
    }

    pub fn with_api_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = token.into();
        self
    }

    /// Resolve and set the default resource envelope
    pub fn with_default_resources(
        mut self,
        limits_cpu: &str,
        limits_memory: &str,
        requests_cpu: &str,
        requests_memory: &str,
    ) -> Result<Self> {
        self.default_resources = resolve(limits_cpu, limits_memory, requests_cpu, requests_memory)?;
        Ok(self)
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_ttl_after_finished(mut self, ttl: Duration) -> Self {
        self.ttl_after_finished = ttl;
        self
    }

    pub fn with_max_concurrent_jobs(mut self, max: usize) -> Self {
        self.max_concurrent_jobs = max;
        self
    }

    /// Check that every value required before accepting events is present
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("job namespace", &self.namespace),
            (
                "configuration service endpoint",
                &self.configuration_service_url,
            ),
            ("init container image", &self.init_container_image),
        ];

        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(Error::Config(format!("{} is required", name)));
            }
        }

        if self.default_timeout.is_zero() {
            return Err(Error::Config("job timeout must be positive".to_string()));
        }
        if self.poll_interval.is_zero() {
            return Err(Error::Config("poll interval must be positive".to_string()));
        }
        if self.max_concurrent_jobs == 0 {
            return Err(Error::Config(
                "max concurrent jobs must be at least 1".to_string(),
            ));
        }

        self.default_resources.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> JobSettings {
        JobSettings::new(
            "keptn-jobs",
            "http://resource-service:8080",
            "keptn/job-executor-init:latest",
        )
    }

    #[test]
    fn test_valid_settings() {
        let settings = valid()
            .with_default_resources("1", "512Mi", "50m", "128Mi")
            .unwrap();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.default_timeout, Duration::from_secs(300));
    }

    #[test]
    fn test_missing_required_value() {
        let settings = JobSettings::new("keptn-jobs", "", "init:latest");
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("configuration service endpoint"));
    }

    #[test]
    fn test_invalid_default_quantity_fails() {
        assert!(valid().with_default_resources("one", "", "", "").is_err());
        assert!(valid().with_default_resources("1", "", "2", "").is_err());
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        assert!(valid().with_max_concurrent_jobs(0).validate().is_err());
    }
}
