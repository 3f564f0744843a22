mod common;
use common::*;

use std::time::Duration;

use serde_json::json;
use steploom::endpoints::{EndpointError, EndpointManager, EndpointStatus};
use steploom::event::FlowEvent;
use steploom::observer::{FlowNotice, MemorySink, NoticePublisher, ObserverHub};
use steploom::registry::StepId;

fn manager() -> EndpointManager {
    EndpointManager::new(fast_supervision(), NoticePublisher::disabled())
}

#[tokio::test]
async fn healthy_endpoint_becomes_ready() {
    let control = WorkerControl::new();
    let (url, _server) = spawn_worker(control.clone()).await;
    let manager = manager();

    manager.register_endpoint("py", &url, "python").await.unwrap();
    assert_eq!(manager.endpoint_status("py"), Some(EndpointStatus::Ready));
    assert_eq!(control.health_count(), 1);
}

#[tokio::test]
async fn startup_probe_budget_is_exact() {
    let control = WorkerControl::new();
    control.set_healthy(false);
    let (url, _server) = spawn_worker(control.clone()).await;
    let manager = manager();

    let err = manager
        .register_endpoint("py", &url, "python")
        .await
        .unwrap_err();
    match err {
        EndpointError::NeverHealthy { name, attempts } => {
            assert_eq!(name, "py");
            assert_eq!(attempts, 3);
        }
        other => panic!("expected NeverHealthy, got {other:?}"),
    }
    assert_eq!(control.health_count(), 3);
    assert_eq!(
        manager.endpoint_status("py"),
        Some(EndpointStatus::Unhealthy)
    );
}

#[tokio::test]
async fn component_upload_requires_ready_endpoint() {
    let control = WorkerControl::new();
    control.set_healthy(false);
    let (url, _server) = spawn_worker(control.clone()).await;
    let manager = manager();
    let _ = manager.register_endpoint("py", &url, "python").await;

    let code = code_file("def handler(event): ...");
    let err = manager
        .register_component(code.path().to_str().unwrap(), "py", &StepId::from("s1"))
        .await
        .unwrap_err();
    assert!(matches!(err, EndpointError::NotReady { .. }));
    assert_eq!(control.register_count(), 0);
}

#[tokio::test]
async fn component_upload_retries_then_succeeds() {
    let control = WorkerControl::new();
    let (url, _server) = spawn_worker(control.clone()).await;
    let manager = manager();
    manager.register_endpoint("py", &url, "python").await.unwrap();

    control.fail_next_registrations(2);
    let code = code_file("def handler(event): ...");
    manager
        .register_component(code.path().to_str().unwrap(), "py", &StepId::from("s1"))
        .await
        .unwrap();

    assert_eq!(control.register_count(), 3);
    assert_eq!(control.uploaded_names(), vec!["s1"]);
}

#[tokio::test]
async fn component_upload_gives_up_after_budget() {
    let control = WorkerControl::new();
    let (url, _server) = spawn_worker(control.clone()).await;
    let manager = manager();
    manager.register_endpoint("py", &url, "python").await.unwrap();

    control.fail_next_registrations(3);
    let code = code_file("def handler(event): ...");
    let err = manager
        .register_component(code.path().to_str().unwrap(), "py", &StepId::from("s1"))
        .await
        .unwrap_err();

    match err {
        EndpointError::UploadFailed { attempts, .. } => assert_eq!(attempts, 3),
        other => panic!("expected UploadFailed, got {other:?}"),
    }
    assert_eq!(control.register_count(), 3);
    assert!(control.uploaded_names().is_empty());

    // Nothing was recorded, so execution cannot route to it.
    let event = FlowEvent::trigger("any", json!({}), "t1");
    let err = manager
        .execute_component(&StepId::from("s1"), &event)
        .await
        .unwrap_err();
    assert!(matches!(err, EndpointError::Unregistered { .. }));
}

#[tokio::test]
async fn unreadable_code_fails_before_any_request() {
    let control = WorkerControl::new();
    let (url, _server) = spawn_worker(control.clone()).await;
    let manager = manager();
    manager.register_endpoint("py", &url, "python").await.unwrap();

    let err = manager
        .register_component("/definitely/not/here.py", "py", &StepId::from("s1"))
        .await
        .unwrap_err();
    assert!(matches!(err, EndpointError::CodeUnreadable { .. }));
    assert_eq!(control.register_count(), 0);
}

#[tokio::test]
async fn execute_round_trips_data_and_collects_events() {
    let control = WorkerControl::new();
    control.respond_with_events(json!([
        { "type": "invoice.created", "data": { "total": 42 } }
    ]));
    let (url, _server) = spawn_worker(control.clone()).await;
    let manager = manager();
    manager.register_endpoint("py", &url, "python").await.unwrap();

    let code = code_file("def handler(event): ...");
    let step = StepId::from("billing");
    manager
        .register_component(code.path().to_str().unwrap(), "py", &step)
        .await
        .unwrap();

    let event = FlowEvent::trigger("order.created", json!({"orderId": 7}), "t1");
    let drafts = manager.execute_component(&step, &event).await.unwrap();
    assert_eq!(drafts.len(), 1);
    assert_eq!(drafts[0].topic, "invoice.created");
    assert_eq!(drafts[0].data, json!({"total": 42}));

    let (step_id, body) = control.last_execute().unwrap();
    assert_eq!(step_id, "billing");
    assert_eq!(body["data"], json!({"orderId": 7}));
    assert_eq!(body["metadata"]["traceId"], json!("t1"));
}

#[tokio::test]
async fn unhealthy_endpoint_blocks_execution_without_a_request() {
    let control = WorkerControl::new();
    let (url, _server) = spawn_worker(control.clone()).await;
    let manager = manager();
    manager.register_endpoint("py", &url, "python").await.unwrap();

    let code = code_file("def handler(event): ...");
    let step = StepId::from("s1");
    manager
        .register_component(code.path().to_str().unwrap(), "py", &step)
        .await
        .unwrap();

    control.set_healthy(false);
    manager.probe_endpoints().await;
    assert_eq!(
        manager.endpoint_status("py"),
        Some(EndpointStatus::Unhealthy)
    );

    let event = FlowEvent::trigger("order.created", json!({}), "t1");
    let err = manager.execute_component(&step, &event).await.unwrap_err();
    assert!(matches!(err, EndpointError::Unavailable { .. }));
    assert_eq!(control.execute_count(), 0);
}

#[tokio::test]
async fn monitor_probe_recovers_an_endpoint() {
    let control = WorkerControl::new();
    let (url, _server) = spawn_worker(control.clone()).await;
    let manager = manager();
    manager.register_endpoint("py", &url, "python").await.unwrap();

    control.set_healthy(false);
    manager.probe_endpoints().await;
    assert_eq!(
        manager.endpoint_status("py"),
        Some(EndpointStatus::Unhealthy)
    );

    control.set_healthy(true);
    manager.probe_endpoints().await;
    assert_eq!(manager.endpoint_status("py"), Some(EndpointStatus::Ready));
}

#[tokio::test]
async fn execution_failure_carries_the_http_status() {
    let control = WorkerControl::new();
    let (url, _server) = spawn_worker(control.clone()).await;
    let manager = manager();
    manager.register_endpoint("py", &url, "python").await.unwrap();

    let code = code_file("def handler(event): ...");
    let step = StepId::from("s1");
    manager
        .register_component(code.path().to_str().unwrap(), "py", &step)
        .await
        .unwrap();

    control.fail_executes(true);
    let event = FlowEvent::trigger("order.created", json!({}), "t1");
    let err = manager.execute_component(&step, &event).await.unwrap_err();
    match err {
        EndpointError::ExecutionFailed { status, .. } => assert_eq!(status, 500),
        other => panic!("expected ExecutionFailed, got {other:?}"),
    }
    assert_eq!(control.execute_count(), 1);
}

#[tokio::test]
async fn reload_component_reuploads_recorded_code() {
    let control = WorkerControl::new();
    let (url, _server) = spawn_worker(control.clone()).await;
    let manager = manager();
    manager.register_endpoint("py", &url, "python").await.unwrap();

    let code = code_file("def handler(event): ...");
    let step = StepId::from("s1");
    manager
        .register_component(code.path().to_str().unwrap(), "py", &step)
        .await
        .unwrap();

    manager.reload_component(&step).await.unwrap();
    assert_eq!(control.uploaded_names(), vec!["s1", "s1"]);

    let err = manager
        .reload_component(&StepId::from("never-registered"))
        .await
        .unwrap_err();
    assert!(matches!(err, EndpointError::Unregistered { .. }));
}

#[tokio::test]
async fn status_changes_reach_the_observer() {
    let sink = MemorySink::new();
    let hub = ObserverHub::with_sink(sink.clone());
    hub.listen();

    let control = WorkerControl::new();
    let (url, _server) = spawn_worker(control.clone()).await;
    let manager = EndpointManager::new(fast_supervision(), hub.publisher());
    manager.register_endpoint("py", &url, "python").await.unwrap();

    control.set_healthy(false);
    manager.probe_endpoints().await;
    // A second failing probe is not a transition and must not re-notify.
    manager.probe_endpoints().await;

    wait_until("status notices", || sink.snapshot().len() >= 2).await;
    hub.stop().await;

    let statuses: Vec<EndpointStatus> = sink
        .snapshot()
        .iter()
        .filter_map(|notice| match notice {
            FlowNotice::EndpointStatusChanged { endpoint, status } if endpoint == "py" => {
                Some(*status)
            }
            _ => None,
        })
        .collect();
    assert_eq!(
        statuses,
        vec![EndpointStatus::Ready, EndpointStatus::Unhealthy]
    );
}

#[tokio::test]
async fn background_monitor_ticks_on_its_own() {
    let control = WorkerControl::new();
    let (url, _server) = spawn_worker(control.clone()).await;
    let manager = EndpointManager::new(
        fast_supervision().with_health_interval(Duration::from_millis(20)),
        NoticePublisher::disabled(),
    );
    manager.register_endpoint("py", &url, "python").await.unwrap();
    let after_registration = control.health_count();

    manager.start_monitor();
    wait_until("monitor probes", || {
        control.health_count() > after_registration + 1
    })
    .await;
    manager.shutdown().await;
}
