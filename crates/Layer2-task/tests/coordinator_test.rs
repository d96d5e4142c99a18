//! End-to-end trigger handling with an in-memory cluster and sink
//!
//! `cargo test -p jobexec-task --test coordinator_test`

mod common;

use common::{settings, trigger, trigger_with, FakeJobApi, RecordingSink};
use jobexec_task::{
    derive_job_name, ExecutionCoordinator, ExitDiagnostics, Intake, JobDispatcher, JobObservation,
    JobSettings, StageKind,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const GRACE: Duration = Duration::from_secs(3600);

fn coordinator(api: &Arc<FakeJobApi>, sink: &Arc<RecordingSink>) -> ExecutionCoordinator {
    coordinator_with(api, sink, settings())
}

fn coordinator_with(
    api: &Arc<FakeJobApi>,
    sink: &Arc<RecordingSink>,
    settings: JobSettings,
) -> ExecutionCoordinator {
    let dispatcher = JobDispatcher::new(api.clone(), settings.poll_interval);
    ExecutionCoordinator::new(Arc::new(settings), dispatcher, sink.clone())
}

#[tokio::test(start_paused = true)]
async fn test_accepted_trigger_emits_started_and_finished() {
    let api = Arc::new(FakeJobApi::new(vec![JobObservation::Succeeded]).with_logs("ok"));
    let sink = Arc::new(RecordingSink::default());
    let coordinator = coordinator(&api, &sink);

    assert_eq!(coordinator.submit(trigger("evt-1")), Intake::Accepted);
    assert!(coordinator.shutdown(GRACE).await);

    assert_eq!(sink.of_type(".started").len(), 1);
    let finished = sink.finished();
    assert_eq!(finished.len(), 1);

    let event = &finished[0];
    assert_eq!(event.event_type, "sh.keptn.event.test.finished");
    assert_eq!(event.shkeptncontext.as_deref(), Some("ctx-evt-1"));
    assert_eq!(event.triggeredid.as_deref(), Some("evt-1"));
    assert_eq!(event.data["status"], "succeeded");
    assert_eq!(event.data["result"], "pass");
    assert_eq!(event.data["job"]["logs"], "ok");
    assert!(coordinator.registry().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_in_flight_is_noop() {
    let api = Arc::new(FakeJobApi::new(vec![
        JobObservation::Running,
        JobObservation::Running,
        JobObservation::Succeeded,
    ]));
    let sink = Arc::new(RecordingSink::default());
    let coordinator = coordinator(&api, &sink);

    assert_eq!(coordinator.submit(trigger("evt-1")), Intake::Accepted);
    assert_eq!(coordinator.submit(trigger("evt-1")), Intake::Duplicate);
    assert!(coordinator.registry().contains("evt-1"));

    assert!(coordinator.shutdown(GRACE).await);

    assert_eq!(api.created_names().len(), 1);
    assert_eq!(sink.finished().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_handle_of_same_event() {
    let api = Arc::new(FakeJobApi::new(vec![JobObservation::Running, JobObservation::Succeeded]));
    let sink = Arc::new(RecordingSink::default());
    let coordinator = coordinator(&api, &sink);

    tokio::join!(
        coordinator.handle(trigger("evt-1")),
        coordinator.handle(trigger("evt-1"))
    );

    assert_eq!(api.created_names().len(), 1);
    assert_eq!(sink.finished().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_redelivery_after_completion_reuses_name() {
    let api = Arc::new(FakeJobApi::new(vec![JobObservation::Succeeded, JobObservation::Succeeded]));
    let sink = Arc::new(RecordingSink::default());
    let coordinator = coordinator(&api, &sink);

    coordinator.handle(trigger("evt-1")).await;
    coordinator.handle(trigger("evt-1")).await;

    let expected = derive_job_name("evt-1", "test");
    assert_eq!(api.created_names(), vec![expected.clone(), expected]);
    assert_eq!(sink.finished().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_non_trigger_events_are_ignored() {
    let api = Arc::new(FakeJobApi::new(vec![]));
    let sink = Arc::new(RecordingSink::default());
    let coordinator = coordinator(&api, &sink);

    let event = trigger_with("evt-1", "sh.keptn.event.test.finished", json!({}));
    assert_eq!(coordinator.submit(event), Intake::Ignored);
    assert!(coordinator.shutdown(GRACE).await);

    assert!(api.created_names().is_empty());
    assert!(sink.events.lock().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_failed_job_reports_exit_code() {
    let diag = ExitDiagnostics {
        stage: StageKind::Main,
        container: "job".to_string(),
        exit_code: 137,
        reason: Some("OOMKilled".to_string()),
        message: None,
    };
    let api = Arc::new(FakeJobApi::new(vec![JobObservation::Failed(Some(diag))]));
    let sink = Arc::new(RecordingSink::default());
    let coordinator = coordinator(&api, &sink);

    coordinator.handle(trigger("evt-1")).await;

    let finished = sink.finished();
    assert_eq!(finished.len(), 1);
    assert_eq!(finished[0].data["status"], "errored");
    assert_eq!(finished[0].data["result"], "fail");
    assert_eq!(finished[0].data["job"]["outcome"], "failed");
    assert_eq!(finished[0].data["job"]["exitCode"], 137);
}

#[tokio::test(start_paused = true)]
async fn test_undecodable_payload_reports_error() {
    let api = Arc::new(FakeJobApi::new(vec![]));
    let sink = Arc::new(RecordingSink::default());
    let coordinator = coordinator(&api, &sink);

    let event = trigger_with(
        "evt-1",
        "sh.keptn.event.test.triggered",
        json!({ "project": "sockshop", "job": "not-an-object" }),
    );
    coordinator.handle(event).await;

    assert!(api.created_names().is_empty());
    let finished = sink.finished();
    assert_eq!(finished.len(), 1);
    assert_eq!(finished[0].data["status"], "errored");
    assert_eq!(finished[0].data["job"]["outcome"], "errored");
    assert!(finished[0].data["message"]
        .as_str()
        .unwrap()
        .starts_with("invalid task payload"));
}

#[tokio::test(start_paused = true)]
async fn test_invalid_override_quantity_reports_error() {
    let api = Arc::new(FakeJobApi::new(vec![]));
    let sink = Arc::new(RecordingSink::default());
    let coordinator = coordinator(&api, &sink);

    let mut payload = common::task_payload();
    payload["job"]["resources"] = json!({ "limits": { "cpu": "1" }, "requests": { "cpu": "2" } });
    coordinator
        .handle(trigger_with("evt-1", "sh.keptn.event.test.triggered", payload))
        .await;

    assert!(api.created_names().is_empty());
    let finished = sink.finished();
    assert_eq!(finished.len(), 1);
    assert_eq!(finished[0].data["result"], "fail");
}

#[tokio::test(start_paused = true)]
async fn test_dispatch_failure_reports_error() {
    let api = Arc::new(FakeJobApi::new(vec![]).failing_create("cluster unreachable"));
    let sink = Arc::new(RecordingSink::default());
    let coordinator = coordinator(&api, &sink);

    coordinator.handle(trigger("evt-1")).await;

    let finished = sink.finished();
    assert_eq!(finished.len(), 1);
    assert_eq!(finished[0].data["status"], "errored");
    assert!(finished[0].data["message"]
        .as_str()
        .unwrap()
        .contains("cluster unreachable"));
    assert!(coordinator.registry().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_timed_out_job_reports_once() {
    let api = Arc::new(FakeJobApi::new(vec![]));
    let sink = Arc::new(RecordingSink::default());
    let coordinator = coordinator(&api, &sink);

    coordinator.handle(trigger("evt-1")).await;

    let finished = sink.finished();
    assert_eq!(finished.len(), 1);
    assert_eq!(finished[0].data["job"]["outcome"], "timed_out");
    assert_eq!(api.deleted_names(), vec![derive_job_name("evt-1", "test")]);
}

#[tokio::test(start_paused = true)]
async fn test_intake_closed_after_shutdown() {
    let api = Arc::new(FakeJobApi::new(vec![]));
    let sink = Arc::new(RecordingSink::default());
    let coordinator = coordinator(&api, &sink);

    assert!(coordinator.shutdown(Duration::from_secs(1)).await);
    assert!(!coordinator.is_accepting());
    assert_eq!(coordinator.submit(trigger("evt-1")), Intake::ShuttingDown);
}

#[tokio::test(start_paused = true)]
async fn test_handle_after_shutdown_is_noop() {
    let api = Arc::new(FakeJobApi::new(vec![JobObservation::Succeeded]));
    let sink = Arc::new(RecordingSink::default());
    let coordinator = coordinator(&api, &sink);

    assert!(coordinator.shutdown(Duration::from_secs(1)).await);
    coordinator.handle(trigger("evt-1")).await;

    assert!(api.created_names().is_empty());
    assert!(sink.events.lock().is_empty());
    assert!(coordinator.registry().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_running_jobs_bounded_by_max_concurrent() {
    let api = Arc::new(
        FakeJobApi::new(vec![JobObservation::Running; 6]).with_idle(JobObservation::Succeeded),
    );
    let sink = Arc::new(RecordingSink::default());
    let coordinator = coordinator_with(&api, &sink, settings().with_max_concurrent_jobs(2));

    for i in 0..5 {
        assert_eq!(coordinator.submit(trigger(&format!("evt-{}", i))), Intake::Accepted);
    }
    assert!(coordinator.shutdown(GRACE).await);

    assert_eq!(api.created_names().len(), 5);
    assert_eq!(api.peak_running(), 2);
    assert_eq!(sink.finished().len(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_every_trigger_gets_one_finished_event() {
    let api = Arc::new(FakeJobApi::new(vec![]));
    let sink = Arc::new(RecordingSink::default());
    let coordinator = coordinator(&api, &sink);

    for i in 0..20 {
        assert_eq!(coordinator.submit(trigger(&format!("evt-{}", i))), Intake::Accepted);
    }
    assert!(coordinator.shutdown(GRACE).await);

    let finished = sink.finished();
    assert_eq!(finished.len(), 20);
    for i in 0..20 {
        let id = format!("evt-{}", i);
        let matching = finished
            .iter()
            .filter(|e| e.triggeredid.as_deref() == Some(id.as_str()))
            .count();
        assert_eq!(matching, 1);
    }
}
