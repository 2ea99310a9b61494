//! End-to-end tests driving a full hub through its public surface.

use cortex_api::*;
use cortex_core::default_builder;
use cortex_core::hub::Hub;
use cortex_test_utils::{
    client::join_payload,
    enable_tracing,
    session::{SessionMode, TestSession},
};
use serde_json::json;
use std::sync::Arc;

async fn make_hub() -> Arc<Hub> {
    enable_tracing();
    let builder = default_builder().with_default_config().unwrap().build();
    Hub::create(builder).await.unwrap()
}

async fn join(
    hub: &Hub,
    id: &str,
    vector: &[f64],
) -> (Arc<TestSession>, usize) {
    let session = TestSession::create();
    let total = hub
        .join(session.as_dyn(), &join_payload(id, vector))
        .await
        .unwrap();
    (session, total)
}

#[tokio::test(flavor = "multi_thread")]
async fn two_peer_nearest_match() {
    let hub = make_hub().await;

    let (a, total) = join(&hub, "A", &[0.0, 0.0, 0.0]).await;
    assert_eq!(1, total);
    let a_list = a.messages_of_type("client-list");
    assert_eq!(1, a_list.len());
    assert!(a_list[0]["match"].is_null());
    assert_eq!(1, a_list[0]["clients"].as_array().unwrap().len());

    let (b, total) = join(&hub, "B", &[3.0, 4.0, 0.0]).await;
    assert_eq!(2, total);
    assert_eq!(2, hub.client_count());

    // B's client-list carries the match hint toward A at distance 5
    let b_list = &b.messages_of_type("client-list")[0];
    assert_eq!("A", b_list["match"]["peer"]["id"]);
    assert_eq!(5.0, b_list["match"]["distance"]);
    assert_eq!(2, b_list["clients"].as_array().unwrap().len());
    // and the advertised command surface includes the group operations
    let commands = b_list["commands"].as_array().unwrap();
    assert!(commands.contains(&json!("benchmark")));
    assert!(commands.contains(&json!("mapreduce")));

    // A received exactly one client-match, then the client-joined
    let hello = a.wait_for("client-match").await;
    assert_eq!("B", hello["client"]["id"]);
    assert_eq!(5.0, hello["distance"]);
    assert_eq!("hello", hello["message"]);

    // A's first client-joined was its own; B's follows the match
    for _ in 0..200 {
        if a.messages_of_type("client-joined").len() >= 2 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    let joined = a.messages_of_type("client-joined");
    assert_eq!(2, joined.len());
    assert_eq!("A", joined[0]["client"]["id"]);
    assert_eq!("B", joined[1]["client"]["id"]);
    assert_eq!(2, joined[1]["total"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn join_rejects_malformed_descriptors() {
    let hub = make_hub().await;
    let session = TestSession::create();
    for payload in [
        json!({}),
        json!({ "id": "x", "joinedAt": "t" }),
        json!({ "id": "x", "vector": [1] }),
        json!({ "id": "x", "joinedAt": "t", "vector": "not-a-list" }),
    ] {
        assert!(matches!(
            hub.join(session.as_dyn(), &payload).await,
            Err(CxError::Malformed { .. }),
        ));
    }
    assert_eq!(0, hub.client_count());
}

#[tokio::test(flavor = "multi_thread")]
async fn join_failure_removes_the_client() {
    let hub = make_hub().await;
    let session = TestSession::create();
    session.set_mode(SessionMode::Dead);
    assert!(hub
        .join(session.as_dyn(), &join_payload("X", &[]))
        .await
        .is_err());
    assert_eq!(0, hub.client_count());
}

#[tokio::test(flavor = "multi_thread")]
async fn registry_size_tracks_joins_and_leaves() {
    let hub = make_hub().await;
    let (a, _) = join(&hub, "A", &[0.0]).await;
    let (_b, _) = join(&hub, "B", &[1.0]).await;
    let (c, _) = join(&hub, "C", &[2.0]).await;
    assert_eq!(3, hub.client_count());

    // explicit disconnect
    assert!(hub.disconnect(&a.as_dyn()).await);
    assert!(!hub.disconnect(&a.as_dyn()).await);

    // dead-session eviction via broadcast
    c.set_mode(SessionMode::Dead);
    hub.handle_command("broadcast hi", None).await;
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(1, hub.client_count());

    // B heard that C left
    let lefts = _b.messages_of_type("client-left");
    assert!(lefts.iter().any(|m| m["client"]["id"] == "C"));
}

#[tokio::test(flavor = "multi_thread")]
async fn broadcast_wraps_user_messages() {
    let hub = make_hub().await;
    let (a, _) = join(&hub, "A", &[]).await;
    let (b, _) = join(&hub, "B", &[]).await;

    let resp = hub
        .handle_command("broadcast hello   spaced world", Some(&"A".into()))
        .await;
    assert_eq!("broadcast", resp["command"]);
    assert_eq!(2, resp["recipients"]);

    for session in [&a, &b] {
        let msg = session.wait_for("user-message").await;
        assert_eq!("A", msg["from"]);
        assert_eq!("hello   spaced world", msg["message"]);
        assert!(msg["timestamp"].is_i64());
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn arbitrary_envelopes_pass_through_unchanged() {
    let hub = make_hub().await;
    let (a, _) = join(&hub, "A", &[]).await;

    let envelope = json!({
        "type": "play-audio",
        "file": "song.mp3",
        "volume": 0.8,
    });
    let n = hub.broadcast_value(&envelope).await.unwrap();
    assert_eq!(1, n);
    assert_eq!(envelope, a.wait_for("play-audio").await);
}

#[tokio::test(flavor = "multi_thread")]
async fn kv_lazy_expiry_end_to_end() {
    let hub = make_hub().await;
    join(&hub, "A", &[]).await;

    let resp = hub.handle_command("put foo bar 1", None).await;
    assert_eq!(true, resp["ok"]);
    assert!(resp["expiresAt"].is_i64());

    let resp = hub.handle_command("get foo", None).await;
    assert_eq!("bar", resp["value"]);
    assert!(resp.get("expired").is_none());

    let resp = hub.handle_command("ttl foo", None).await;
    assert_eq!(1, resp["ttl"]);

    tokio::time::sleep(std::time::Duration::from_millis(1100)).await;

    // whichever of the lazy read and the alarm sweep won, the value is
    // gone; the lazy-read `expired` flag itself is pinned down in the
    // kv unit tests where the sweep cannot race
    let resp = hub.handle_command("get foo", None).await;
    assert!(resp["value"].is_null());

    let resp = hub.handle_command("keys", None).await;
    assert!(!resp["keys"]
        .as_array()
        .unwrap()
        .contains(&json!("foo")));
}

#[tokio::test(flavor = "multi_thread")]
async fn kv_commands_round_trip() {
    let hub = make_hub().await;

    let resp = hub.handle_command("put n 42", None).await;
    assert_eq!(true, resp["ok"]);
    // JSON values are stored as JSON, not as strings
    let resp = hub.handle_command("get n", None).await;
    assert_eq!(42, resp["value"]);

    let resp = hub.handle_command("ttl n", None).await;
    assert_eq!(-1, resp["ttl"]);
    let resp = hub.handle_command("ttl missing", None).await;
    assert_eq!(-2, resp["ttl"]);

    let resp = hub.handle_command("expire n 30", None).await;
    assert_eq!(true, resp["ok"]);
    let resp = hub.handle_command("ttl n", None).await;
    assert_eq!(30, resp["ttl"]);
    let resp = hub.handle_command("expire missing 30", None).await;
    assert_eq!("key not found", resp["error"]);

    let resp = hub.handle_command("keys", None).await;
    assert_eq!(1, resp["count"]);
    assert_eq!(1, resp["size"]);

    let resp = hub.handle_command("delete n", None).await;
    assert_eq!(true, resp["deleted"]);
    let resp = hub.handle_command("delete n", None).await;
    assert_eq!(false, resp["deleted"]);

    let resp = hub.handle_command("storage", None).await;
    assert_eq!("memory", resp["backend"]);
    assert_eq!(0, resp["keys"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn benchmark_with_one_departure() {
    let hub = make_hub().await;
    let (a, _) = join(&hub, "A", &[]).await;
    let (b, _) = join(&hub, "B", &[]).await;
    let (c, _) = join(&hub, "C", &[]).await;

    let round = {
        let hub = hub.clone();
        tokio::task::spawn(async move {
            hub.handle_command("benchmark iterations=10", Some(&"A".into()))
                .await
        })
    };

    let req = a.wait_for("benchmark-request").await;
    let request_id = req["requestId"].as_str().unwrap().to_string();
    assert_eq!(10, req["iterations"]);
    b.wait_for("benchmark-request").await;
    c.wait_for("benchmark-request").await;

    let ack = hub
        .handle_command(
            &format!("benchmark report {request_id} 7"),
            Some(&"A".into()),
        )
        .await;
    assert_eq!(true, ack["accepted"]);

    hub.disconnect(&b.as_dyn()).await;

    let ack = hub
        .handle_command(
            &format!("benchmark report {request_id} 11 release build"),
            Some(&"C".into()),
        )
        .await;
    assert_eq!(true, ack["accepted"]);

    let summary = round.await.unwrap();
    assert_eq!("benchmark", summary["command"]);
    assert_eq!("completed", summary["message"]);
    assert_eq!(3, summary["participants"]);
    assert_eq!(2, summary["responded"]);
    assert_eq!(0, summary["pending"].as_array().unwrap().len());
    let results = summary["results"].as_array().unwrap();
    assert_eq!("A", results[0]["clientId"]);
    assert_eq!("C", results[1]["clientId"]);
    assert_eq!("release build", results[1]["details"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn benchmark_timeout_reports_pending() {
    let hub = make_hub().await;
    let (a, _) = join(&hub, "A", &[]).await;

    let summary = hub
        .handle_command("benchmark timeout=50", Some(&"A".into()))
        .await;
    assert!(summary["message"]
        .as_str()
        .unwrap()
        .contains("timed out"));
    assert_eq!(0, summary["responded"]);
    assert_eq!(1, summary["participants"]);
    assert_eq!(json!(["A"]), summary["pending"]);
    drop(a);
}

#[tokio::test(flavor = "multi_thread")]
async fn benchmark_second_report_is_idempotent() {
    let hub = make_hub().await;
    let (a, _) = join(&hub, "A", &[]).await;
    let (b, _) = join(&hub, "B", &[]).await;

    let round = {
        let hub = hub.clone();
        tokio::task::spawn(async move {
            hub.handle_command("benchmark 10", Some(&"A".into())).await
        })
    };

    let req = a.wait_for("benchmark-request").await;
    let request_id = req["requestId"].as_str().unwrap().to_string();
    b.wait_for("benchmark-request").await;

    hub.handle_command(
        &format!("benchmark report {request_id} 5"),
        Some(&"A".into()),
    )
    .await;
    let dup = hub
        .handle_command(
            &format!("benchmark report {request_id} 500"),
            Some(&"A".into()),
        )
        .await;
    assert_eq!(true, dup["accepted"]);
    assert_eq!(true, dup["alreadyReported"]);

    hub.handle_command(
        &format!("benchmark report {request_id} 6"),
        Some(&"B".into()),
    )
    .await;

    let summary = round.await.unwrap();
    let results = summary["results"].as_array().unwrap();
    assert_eq!(2, results.len());
    assert_eq!(5.0, results[0]["durationMs"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn benchmark_without_clients_is_structured() {
    let hub = make_hub().await;
    let resp = hub.handle_command("benchmark", None).await;
    assert_eq!("no clients connected", resp["error"]);
}

/// Echo workers: report each received mapreduce task's payload back.
fn spawn_echo(hub: &Arc<Hub>, session: &Arc<TestSession>, id: &str) {
    let hub = hub.clone();
    let session = session.clone();
    let id: ClientId = id.into();
    tokio::task::spawn(async move {
        let mut seen = 0;
        loop {
            let tasks = session.messages_of_type("mapreduce-task");
            for task in tasks.iter().skip(seen) {
                let request_id = task["requestId"].as_str().unwrap();
                let task_id = task["taskId"].as_str().unwrap();
                let payload = task["payload"].clone();
                hub.handle_command(
                    &format!(
                        "mapreduce report {request_id} {task_id} result={payload}"
                    ),
                    Some(&id),
                )
                .await;
            }
            seen = tasks.len();
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    });
}

#[tokio::test(flavor = "multi_thread")]
async fn mapreduce_sum_across_three_workers() {
    let hub = make_hub().await;
    let mut sessions = Vec::new();
    for id in ["W1", "W2", "W3"] {
        let (session, _) = join(&hub, id, &[]).await;
        spawn_echo(&hub, &session, id);
        sessions.push(session);
    }

    let summary = hub
        .handle_command(
            "mapreduce start tasks=[1,2,3,4] reducer=sum",
            Some(&"W1".into()),
        )
        .await;
    assert_eq!("mapreduce", summary["command"]);
    assert_eq!(10, summary["reducedValue"]);
    assert_eq!(4, summary["completedTasks"]);
    assert_eq!(0, summary["pendingTasks"]);
    assert_eq!(0, summary["failedTasks"]);
    for entry in summary["results"].as_array().unwrap() {
        assert!(entry["durationMs"].is_i64());
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn mapreduce_reassigns_after_departure() {
    let hub = make_hub().await;
    let (w1, _) = join(&hub, "W1", &[]).await;
    let (w2, _) = join(&hub, "W2", &[]).await;

    let request = {
        let hub = hub.clone();
        tokio::task::spawn(async move {
            hub.handle_command(
                concat!(
                    "mapreduce start ",
                    r#"tasks=[{"taskId":"a","payload":1},{"taskId":"b","payload":2}]"#,
                ),
                Some(&"W2".into()),
            )
            .await
        })
    };

    let task_a = w1.wait_for("mapreduce-task").await;
    assert_eq!("a", task_a["taskId"]);
    assert_eq!(1, task_a["attempts"]);
    let request_id = task_a["requestId"].as_str().unwrap().to_string();
    let task_b = w2.wait_for("mapreduce-task").await;
    assert_eq!("b", task_b["taskId"]);

    // W1 disconnects before reporting; task a moves to W2
    hub.disconnect(&w1.as_dyn()).await;
    let reassigned = loop {
        let tasks = w2.messages_of_type("mapreduce-task");
        if let Some(t) = tasks.iter().find(|t| t["taskId"] == "a") {
            break t.clone();
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    };
    assert_eq!(2, reassigned["attempts"]);

    hub.handle_command(
        &format!("mapreduce report {request_id} a result=1"),
        Some(&"W2".into()),
    )
    .await;
    hub.handle_command(
        &format!("mapreduce report {request_id} b result=2"),
        Some(&"W2".into()),
    )
    .await;

    let summary = request.await.unwrap();
    assert_eq!(0, summary["failedTasks"]);
    let a = summary["results"]
        .as_array()
        .unwrap()
        .iter()
        .find(|e| e["taskId"] == "a")
        .unwrap()
        .clone();
    assert_eq!(2, a["attempts"]);
    assert_eq!("W2", a["assignedTo"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn mapreduce_status_and_cancel() {
    let hub = make_hub().await;
    let (w1, _) = join(&hub, "W1", &[]).await;

    let request = {
        let hub = hub.clone();
        tokio::task::spawn(async move {
            hub.handle_command(
                "mapreduce start tasks=[1,2] reducer=count",
                Some(&"W1".into()),
            )
            .await
        })
    };

    let task = w1.wait_for("mapreduce-task").await;
    let request_id = task["requestId"].as_str().unwrap().to_string();

    let status = hub
        .handle_command(
            &format!("mapreduce status {request_id}"),
            Some(&"W1".into()),
        )
        .await;
    assert_eq!(2, status["totalTasks"]);
    assert_eq!(2, status["pendingTasks"]);

    let cancel = hub
        .handle_command(
            &format!("mapreduce cancel {request_id}"),
            Some(&"W1".into()),
        )
        .await;
    assert_eq!(true, cancel["cancelled"]);

    let summary = request.await.unwrap();
    assert_eq!("cancelled", summary["message"]);
    assert_eq!(2, summary["pendingTasks"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn audio_round_trip_and_unknown_subverb() {
    let hub = make_hub().await;

    let resp = hub.handle_command("audio list", None).await;
    assert_eq!(0, resp["count"]);

    // "hello audio" base64-encoded
    let resp = hub
        .handle_command("audio upload clip.mp3 aGVsbG8gYXVkaW8=", None)
        .await;
    assert_eq!(true, resp["ok"]);
    assert_eq!("audio/mpeg", resp["contentType"]);

    let resp = hub.handle_command("audio get clip.mp3", None).await;
    assert_eq!(11, resp["size"]);
    assert_eq!("aGVsbG8gYXVkaW8=", resp["dataBase64"]);

    let resp = hub.handle_command("audio get nope.wav", None).await;
    assert_eq!("not found", resp["error"]);

    // unknown subverbs answer explicitly instead of falling through
    let resp = hub.handle_command("audio frobnicate", None).await;
    assert_eq!(
        "unknown audio subcommand: frobnicate",
        resp["error"],
    );
    let resp = hub.handle_command("audio", None).await;
    assert_eq!("missing audio subcommand", resp["error"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn whoami_and_peers() {
    let hub = make_hub().await;
    join(&hub, "A", &[1.0, 2.0]).await;
    join(&hub, "B", &[3.0]).await;
    hub.handle_command("put k v", None).await;

    let resp = hub.handle_command("whoami", Some(&"A".into())).await;
    assert_eq!("A", resp["client"]["id"]);
    assert_eq!(json!([1.0, 2.0]), resp["client"]["vector"]);
    assert_eq!(2, resp["totalPeers"]);
    assert_eq!(1, resp["kvKeys"]);
    assert_eq!("memory", resp["backend"]);
    assert!(resp["serverTime"].is_i64());

    let resp = hub.handle_command("whoami", Some(&"ghost".into())).await;
    assert!(resp["error"].as_str().unwrap().contains("not registered"));

    let resp = hub.handle_command("peers", Some(&"B".into())).await;
    assert_eq!(2, resp["count"]);
    let peers = resp["peers"].as_array().unwrap();
    assert_eq!(false, peers[0]["isMe"]);
    assert_eq!(true, peers[1]["isMe"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn router_error_shapes() {
    let hub = make_hub().await;

    let resp = hub.handle_command("frobnicate", None).await;
    assert_eq!("Unknown command: frobnicate", resp["error"]);
    assert!(resp["available"]
        .as_array()
        .unwrap()
        .contains(&json!("mapreduce")));

    let resp = hub.handle_command("put onlykey", None).await;
    assert!(resp["error"].as_str().unwrap().contains("usage"));
    assert!(resp["example"].is_string());

    let resp = hub.handle_command("expire k notanumber", None).await;
    assert!(resp["error"].is_string());

    let resp = hub.handle_command("mapreduce start reducer=sum", None).await;
    assert!(resp["error"].as_str().unwrap().contains("tasks"));

    let resp = hub
        .handle_command("mapreduce start tasks=[1] reducer=bogus", None)
        .await;
    assert_eq!("unknown reducer: bogus", resp["error"]);

    let resp = hub.handle_command("", None).await;
    assert_eq!("empty command", resp["error"]);

    let resp = hub.handle_command("HELP", None).await;
    assert_eq!("help", resp["command"]);
    assert_eq!(14, resp["commands"].as_array().unwrap().len());
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_stops_background_tasks() {
    let hub = make_hub().await;
    let (a, _) = join(&hub, "A", &[]).await;
    hub.shutdown();

    // departures are no longer pumped after shutdown
    a.set_mode(SessionMode::Dead);
    hub.handle_command("broadcast bye", None).await;
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    // the dead session was still evicted from the registry directly
    assert_eq!(0, hub.client_count());
}
