//! Job executor service - main entry point

mod receiver;

use clap::Parser;
use jobexec_task::{
    ExecutionCoordinator, HttpEventSink, JobDispatcher, JobSettings, KubeJobApi,
    DEFAULT_EVENT_ENDPOINT,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Runs Keptn tasks as Kubernetes jobs
#[derive(Parser, Debug)]
#[command(name = "job-executor")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port the event receiver listens on
    #[arg(long, env = "RCV_PORT", default_value_t = 8080)]
    port: u16,

    /// Path the event receiver accepts events on
    #[arg(long, env = "RCV_PATH", default_value = "/")]
    path: String,

    /// Endpoint outbound events are posted to
    #[arg(long, env = "KEPTN_EVENT_ENDPOINT", default_value = DEFAULT_EVENT_ENDPOINT)]
    event_endpoint: String,

    /// Configuration service endpoint used by the init stage
    #[arg(long, env = "INIT_CONTAINER_CONFIGURATION_SERVICE_API_ENDPOINT")]
    config_service_endpoint: String,

    /// Namespace jobs are created in
    #[arg(long, env = "JOB_NAMESPACE")]
    job_namespace: String,

    /// Keptn API token
    #[arg(long, env = "KEPTN_API_TOKEN", default_value = "", hide_env_values = true)]
    api_token: String,

    /// Image of the init stage
    #[arg(long, env = "INIT_CONTAINER_IMAGE", default_value = "")]
    init_image: String,

    #[arg(long, env = "DEFAULT_RESOURCE_LIMITS_CPU", default_value = "")]
    default_limits_cpu: String,

    #[arg(long, env = "DEFAULT_RESOURCE_LIMITS_MEMORY", default_value = "")]
    default_limits_memory: String,

    #[arg(long, env = "DEFAULT_RESOURCE_REQUESTS_CPU", default_value = "")]
    default_requests_cpu: String,

    #[arg(long, env = "DEFAULT_RESOURCE_REQUESTS_MEMORY", default_value = "")]
    default_requests_memory: String,

    /// Deadline for jobs that do not set `maxPollDuration`
    #[arg(long, env = "JOB_TIMEOUT_SECONDS", default_value_t = 300)]
    job_timeout_secs: u64,

    #[arg(long, env = "JOB_POLL_INTERVAL_MS", default_value_t = 2000)]
    poll_interval_ms: u64,

    #[arg(long, env = "JOB_TTL_SECONDS_AFTER_FINISHED", default_value_t = 600)]
    ttl_after_finished_secs: u64,

    #[arg(long, env = "MAX_CONCURRENT_JOBS", default_value_t = 8)]
    max_concurrent_jobs: usize,

    /// How long to wait for running jobs on shutdown
    #[arg(long, env = "SHUTDOWN_GRACE_SECONDS", default_value_t = 10)]
    shutdown_grace_secs: u64,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

impl Args {
    fn job_settings(&self) -> jobexec_foundation::Result<JobSettings> {
        let settings = JobSettings::new(
            &self.job_namespace,
            &self.config_service_endpoint,
            &self.init_image,
        )
        .with_api_token(&self.api_token)
        .with_default_resources(
            &self.default_limits_cpu,
            &self.default_limits_memory,
            &self.default_requests_cpu,
            &self.default_requests_memory,
        )?
        .with_default_timeout(Duration::from_secs(self.job_timeout_secs))
        .with_poll_interval(Duration::from_millis(self.poll_interval_ms))
        .with_ttl_after_finished(Duration::from_secs(self.ttl_after_finished_secs))
        .with_max_concurrent_jobs(self.max_concurrent_jobs);

        settings.validate()?;
        Ok(settings)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let settings = args.job_settings()?;
    info!(
        namespace = %settings.namespace,
        init_image = %settings.init_container_image,
        max_concurrent_jobs = settings.max_concurrent_jobs,
        "Job settings loaded"
    );

    let cluster = KubeJobApi::try_default().await?;
    let sink = HttpEventSink::new(&args.event_endpoint)?.with_api_token(&args.api_token);
    info!(endpoint = %sink.endpoint(), "Sending events");

    let dispatcher = JobDispatcher::new(Arc::new(cluster), settings.poll_interval);
    let coordinator = ExecutionCoordinator::new(Arc::new(settings), dispatcher, Arc::new(sink));

    receiver::serve(
        coordinator,
        args.port,
        &args.path,
        Duration::from_secs(args.shutdown_grace_secs),
    )
    .await
}
