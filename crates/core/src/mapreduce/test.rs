use super::*;
use crate::broadcast::DepartureReceiver;
use crate::factories::{ChannelSession, FrameRecv};
use crate::registry::{ClientEntry, ClientRegistry};
use serde_json::json;

struct Harness {
    coordinator: MapReduceCoordinator,
    registry: Arc<ClientRegistry>,
    #[allow(dead_code)]
    departures: DepartureReceiver,
    workers: Vec<FrameRecv>,
}

fn harness(clients: &[&str]) -> Harness {
    let registry = Arc::new(ClientRegistry::new());
    let (tx, departures) = tokio::sync::mpsc::unbounded_channel();
    let broadcaster = Broadcaster::new(registry.clone(), tx);
    let mut workers = Vec::new();
    for id in clients {
        let (session, recv) = ChannelSession::create();
        registry
            .insert(ClientEntry {
                session,
                descriptor: Arc::new(ClientDescriptor {
                    id: (*id).into(),
                    joined_at: "t".into(),
                    vector: vec![],
                }),
                joined: Timestamp::now(),
            })
            .unwrap();
        workers.push(recv);
    }
    Harness {
        coordinator: MapReduceCoordinator::new(
            broadcaster,
            MapReduceConfig::default(),
        ),
        registry,
        departures,
        workers,
    }
}

async fn recv_task(recv: &mut FrameRecv) -> serde_json::Value {
    let frame = recv.recv().await.unwrap();
    let msg: serde_json::Value = serde_json::from_slice(&frame).unwrap();
    assert_eq!("mapreduce-task", msg["type"]);
    msg
}

/// Report the task's own payload back as its result.
fn echo(coordinator: &MapReduceCoordinator, task: &serde_json::Value) {
    let request_id: RequestId = task["requestId"].as_str().unwrap().into();
    let task_id: TaskId = task["taskId"].as_str().unwrap().into();
    let ack = coordinator.report(
        &request_id,
        &task_id,
        None,
        Some(task["payload"].clone()),
        None,
        None,
    );
    assert_eq!(true, ack["accepted"], "echo report rejected: {ack}");
}

#[tokio::test]
async fn start_validations_fail_fast() {
    let h = harness(&[]);
    assert!(matches!(
        h.coordinator
            .start(None, "[1]", Reducer::Collect, None)
            .await,
        Err(CxError::NoClients),
    ));

    let h = harness(&["w"]);
    assert!(matches!(
        h.coordinator.start(None, "[]", Reducer::Collect, None).await,
        Err(CxError::NoTasks),
    ));
    assert!(matches!(
        h.coordinator
            .start(None, "definitely not json!", Reducer::Sum, None)
            .await,
        Err(CxError::Malformed { .. }),
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn sum_over_echoing_workers() {
    let mut h = harness(&["w1", "w2", "w3"]);
    let coordinator = h.coordinator.clone();

    let request = tokio::task::spawn(async move {
        coordinator
            .start(Some(&"w1".into()), "[1,2,3,4]", Reducer::Sum, None)
            .await
            .unwrap()
    });

    // round-robin: w1, w2, w3, then w1 again
    for (worker, _) in [(0, "1"), (1, "2"), (2, "3"), (0, "4")] {
        let task = recv_task(&mut h.workers[worker]).await;
        echo(&h.coordinator, &task);
    }

    let summary = request.await.unwrap();
    assert_eq!("completed", summary.message);
    assert_eq!(json!(10), summary.reduced_value);
    assert_eq!(4, summary.total_tasks);
    assert_eq!(4, summary.completed_tasks);
    assert_eq!(0, summary.failed_tasks);
    assert_eq!(0, summary.pending_tasks);
    for entry in &summary.results {
        assert!(entry.duration_ms.is_some());
        assert_eq!(1, entry.attempts);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn round_robin_carries_task_metadata() {
    let mut h = harness(&["w1", "w2"]);
    let coordinator = h.coordinator.clone();

    let request = tokio::task::spawn(async move {
        coordinator
            .start(
                None,
                r#"[{"taskId":"a","payload":1,"metadata":{"m":1}},{"taskId":"b","payload":2}]"#,
                Reducer::Collect,
                None,
            )
            .await
            .unwrap()
    });

    let task_a = recv_task(&mut h.workers[0]).await;
    assert_eq!("a", task_a["taskId"]);
    assert_eq!(json!({ "m": 1 }), task_a["metadata"]);
    assert_eq!(2, task_a["totalTasks"]);
    assert_eq!("collect", task_a["reducer"]);
    echo(&h.coordinator, &task_a);

    let task_b = recv_task(&mut h.workers[1]).await;
    assert_eq!("b", task_b["taskId"]);
    assert!(task_b["metadata"].is_null());
    echo(&h.coordinator, &task_b);

    let summary = request.await.unwrap();
    assert_eq!(json!([1, 2]), summary.reduced_value);
}

#[tokio::test(flavor = "multi_thread")]
async fn departed_worker_tasks_are_reassigned() {
    let mut h = harness(&["w1", "w2"]);
    let coordinator = h.coordinator.clone();

    let request = tokio::task::spawn(async move {
        coordinator
            .start(
                None,
                r#"[{"taskId":"a","payload":1},{"taskId":"b","payload":2}]"#,
                Reducer::Collect,
                None,
            )
            .await
            .unwrap()
    });

    let task_a = recv_task(&mut h.workers[0]).await;
    assert_eq!("a", task_a["taskId"]);
    assert_eq!(1, task_a["attempts"]);
    let task_b = recv_task(&mut h.workers[1]).await;
    assert_eq!("b", task_b["taskId"]);

    // w1 disconnects before reporting
    h.registry.remove_by_id(&"w1".into());
    drop(h.workers.remove(0));
    h.coordinator.departure(&"w1".into());

    // task a arrives at w2 on its second attempt
    let task_a2 = recv_task(&mut h.workers[0]).await;
    assert_eq!("a", task_a2["taskId"]);
    assert_eq!(2, task_a2["attempts"]);

    echo(&h.coordinator, &task_a2);
    echo(&h.coordinator, &task_b);

    let summary = request.await.unwrap();
    assert_eq!(0, summary.failed_tasks);
    assert_eq!(2, summary.completed_tasks);
    let a = summary
        .results
        .iter()
        .find(|e| e.task_id == TaskId::from("a"))
        .unwrap();
    assert_eq!(2, a.attempts);
    assert_eq!(Some(ClientId::from("w2")), a.assigned_to);
}

#[tokio::test(flavor = "multi_thread")]
async fn reassignment_without_candidates_fails_the_task() {
    let mut h = harness(&["only"]);
    let coordinator = h.coordinator.clone();

    let request = tokio::task::spawn(async move {
        coordinator
            .start(None, "[1]", Reducer::Collect, None)
            .await
            .unwrap()
    });

    let task = recv_task(&mut h.workers[0]).await;
    assert_eq!("task-1", task["taskId"]);

    h.registry.remove_by_id(&"only".into());
    drop(h.workers.remove(0));
    h.coordinator.departure(&"only".into());

    let summary = request.await.unwrap();
    assert_eq!(1, summary.failed_tasks);
    assert_eq!(
        Some("Failed to reassign after client departure".to_string()),
        summary.results[0].error,
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn timeout_fails_unreported_tasks() {
    let mut h = harness(&["w1"]);
    let coordinator = h.coordinator.clone();

    let request = tokio::task::spawn(async move {
        coordinator
            .start(None, "[1,2]", Reducer::Collect, Some(80))
            .await
            .unwrap()
    });

    let task1 = recv_task(&mut h.workers[0]).await;
    echo(&h.coordinator, &task1);
    // never report the second task

    let summary = request.await.unwrap();
    assert_eq!("timed out", summary.message);
    assert_eq!(2, summary.completed_tasks);
    assert_eq!(1, summary.failed_tasks);
    assert_eq!(0, summary.pending_tasks);
    let failed = summary
        .results
        .iter()
        .find(|e| e.error.is_some())
        .unwrap();
    assert_eq!(Some("No response received".to_string()), failed.error);
    // the successful result still reduces
    assert_eq!(json!([1]), summary.reduced_value);
}

#[tokio::test(flavor = "multi_thread")]
async fn cancel_resolves_with_pending_tasks() {
    let mut h = harness(&["w1"]);
    let coordinator = h.coordinator.clone();

    let request = tokio::task::spawn(async move {
        coordinator
            .start(None, "[1,2]", Reducer::Collect, None)
            .await
            .unwrap()
    });

    let task = recv_task(&mut h.workers[0]).await;
    let request_id: RequestId = task["requestId"].as_str().unwrap().into();
    echo(&h.coordinator, &task);

    let ack = h.coordinator.cancel(&request_id);
    assert_eq!(true, ack["cancelled"]);

    let summary = request.await.unwrap();
    assert_eq!("cancelled", summary.message);
    assert_eq!(1, summary.completed_tasks);
    assert_eq!(1, summary.pending_tasks);
    assert_eq!(0, summary.failed_tasks);

    // cancelling again is an unknown request
    let ack = h.coordinator.cancel(&request_id);
    assert_eq!("unknown requestId", ack["error"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn duplicate_task_reports_are_rejected() {
    let mut h = harness(&["w1"]);
    let coordinator = h.coordinator.clone();

    let request = tokio::task::spawn(async move {
        coordinator
            .start(None, "[7]", Reducer::Collect, None)
            .await
            .unwrap()
    });

    let task = recv_task(&mut h.workers[0]).await;
    let request_id: RequestId = task["requestId"].as_str().unwrap().into();
    echo(&h.coordinator, &task);

    let ack = h.coordinator.report(
        &request_id,
        &"task-1".into(),
        None,
        Some(json!(99)),
        None,
        None,
    );
    assert_eq!(false, ack["accepted"]);
    assert_eq!("already reported", ack["error"]);

    let summary = request.await.unwrap();
    // the first report won
    assert_eq!(json!([7]), summary.reduced_value);
}

#[tokio::test(flavor = "multi_thread")]
async fn error_reports_fail_the_task_and_skip_reduction() {
    let mut h = harness(&["w1", "w2"]);
    let coordinator = h.coordinator.clone();

    let request = tokio::task::spawn(async move {
        coordinator
            .start(None, "[1,2]", Reducer::Sum, None)
            .await
            .unwrap()
    });

    let task1 = recv_task(&mut h.workers[0]).await;
    echo(&h.coordinator, &task1);

    let task2 = recv_task(&mut h.workers[1]).await;
    let request_id: RequestId = task2["requestId"].as_str().unwrap().into();
    let task_id: TaskId = task2["taskId"].as_str().unwrap().into();
    let ack = h.coordinator.report(
        &request_id,
        &task_id,
        Some(&"w2".into()),
        None,
        Some("worker exploded".into()),
        None,
    );
    assert_eq!(true, ack["accepted"]);

    let summary = request.await.unwrap();
    assert_eq!(1, summary.failed_tasks);
    assert_eq!(2, summary.completed_tasks);
    assert_eq!(json!(1), summary.reduced_value);
    let failed = summary
        .results
        .iter()
        .find(|e| e.error.is_some())
        .unwrap();
    assert_eq!(Some("worker exploded".to_string()), failed.error);
}

#[tokio::test(flavor = "multi_thread")]
async fn status_reports_progress_without_resolving() {
    let mut h = harness(&["w1"]);
    let coordinator = h.coordinator.clone();

    let request = tokio::task::spawn(async move {
        coordinator
            .start(None, "[1,2]", Reducer::Count, None)
            .await
            .unwrap()
    });

    let task = recv_task(&mut h.workers[0]).await;
    let request_id: RequestId = task["requestId"].as_str().unwrap().into();
    echo(&h.coordinator, &task);

    let status = h.coordinator.status(&request_id);
    assert_eq!(2, status["totalTasks"]);
    assert_eq!(1, status["completedTasks"]);
    assert_eq!(1, status["pendingTasks"]);
    assert_eq!("count", status["reducer"]);

    let task2 = recv_task(&mut h.workers[0]).await;
    echo(&h.coordinator, &task2);
    let summary = request.await.unwrap();
    assert_eq!(json!(2), summary.reduced_value);

    let status = h.coordinator.status(&request_id);
    assert_eq!("unknown requestId", status["error"]);
}
