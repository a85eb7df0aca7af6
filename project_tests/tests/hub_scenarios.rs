//! End-to-end behaviour of the hub as a client sees it: handshake,
//! subscriptions, poll sweeps and in-band provider errors.

use serde_json::json;

use lib_hub::core::router::NOT_READY_REASON;
use lib_hub::core::FetchOutcome;
use lib_hub::provider::memory::UNKNOWN_FEED_MESSAGE;
use lib_hub::ProviderError;
use project_tests::{track, TestHub};

fn subscribe(user: &str) -> serde_json::Value {
    json!({"op": 2, "d": {"user": user}})
}

fn unsubscribe(user: &str) -> serde_json::Value {
    json!({"op": 3, "d": {"user": user}})
}

#[tokio::test]
async fn test_message_before_ready_terminates_without_effect() {
    let harness = TestHub::new();
    let mut client = harness.connect_pending();

    client.send(subscribe("alice"));

    client.expect_closed(NOT_READY_REASON);
    assert!(harness.hub.feeds().is_empty());
    assert_eq!(harness.hub.connections().subscription_count(client.id), 0);
    assert_eq!(harness.hub.bus().listener_count("alice"), 0);
}

#[tokio::test]
async fn test_duplicate_subscriptions_collapse() {
    let harness = TestHub::new();
    let mut client = harness.connect();
    assert_eq!(client.next_json(), json!({"op": 0, "d": {"pingInterval": 30000}}));

    let mut last_ack = json!(null);
    for user in ["alice", "bob", "alice", "carol", "bob"] {
        client.send(subscribe(user));
        last_ack = client.next_json();
        assert_eq!(last_ack["op"], 2);
    }

    assert_eq!(last_ack["d"]["subscriptions"], json!(["alice", "bob", "carol"]));
    assert_eq!(harness.hub.connections().subscription_count(client.id), 3);
    assert_eq!(harness.hub.bus().listener_count("alice"), 1);
    assert!(client.is_drained());
}

#[tokio::test]
async fn test_song_a_then_identical_then_song_b() {
    let harness = TestHub::new();
    let mut client = harness.connect();
    assert_eq!(client.next_json(), json!({"op": 0, "d": {"pingInterval": 30000}}));

    client.send(subscribe("alice"));
    assert_eq!(client.next_json(), json!({"op": 2, "d": {"subscriptions": ["alice"]}}));

    harness.provider.set("alice", Ok(track("Song A")));
    harness.scheduler.sweep().await;
    let update = client.next_json();
    assert_eq!(update["op"], 3);
    assert_eq!(update["d"]["user"], "alice");
    assert_eq!(update["d"]["track"]["name"], "Song A");
    assert_eq!(update["d"]["track"]["nowplaying"], false);

    let report = harness.scheduler.sweep().await;
    assert_eq!(report.outcome("alice"), Some(FetchOutcome::Unchanged));
    assert!(client.is_drained());

    harness.provider.set("alice", Ok(track("Song B")));
    harness.scheduler.sweep().await;
    let update = client.next_json();
    assert_eq!(update["op"], 3);
    assert_eq!(update["d"]["track"]["name"], "Song B");
    assert!(client.is_drained());
}

#[tokio::test]
async fn test_shared_feed_survives_until_last_subscriber_leaves() {
    let harness = TestHub::new();
    let mut first = harness.connect();
    let mut second = harness.connect();
    first.next_json();
    second.next_json();

    first.send(subscribe("alice"));
    second.send(subscribe("alice"));
    first.next_json();
    second.next_json();

    harness.provider.set("alice", Ok(track("Song A")));
    harness.scheduler.sweep().await;
    assert_eq!(first.next_json()["d"]["track"]["name"], "Song A");
    assert_eq!(second.next_json()["d"]["track"]["name"], "Song A");

    first.disconnect();
    let report = harness.scheduler.sweep().await;
    assert!(report.pruned.is_empty());
    assert!(harness.hub.feeds().contains("alice"));

    harness.provider.set("alice", Ok(track("Song B")));
    harness.scheduler.sweep().await;
    assert_eq!(second.next_json()["d"]["track"]["name"], "Song B");

    let second_id = second.id;
    second.disconnect();
    assert!(!harness.hub.connections().contains(second_id));
    let report = harness.scheduler.sweep().await;
    assert_eq!(report.pruned, vec!["alice".to_string()]);
    assert!(report.outcomes.is_empty());
    assert!(!harness.hub.feeds().contains("alice"));
    assert!(harness.hub.cache().get("alice").is_none());
}

#[tokio::test]
async fn test_unsubscribe_acks_and_feed_is_pruned_next_sweep() {
    let harness = TestHub::new();
    let mut client = harness.connect();
    client.next_json();

    client.send(subscribe("alice"));
    client.send(subscribe("bob"));
    client.next_json();
    client.next_json();

    client.send(unsubscribe("alice"));
    assert_eq!(client.next_json(), json!({"op": 3, "d": {"subscriptions": ["bob"]}}));
    assert!(harness.hub.feeds().contains("alice"));

    harness.provider.set("bob", Ok(track("Song A")));
    let report = harness.scheduler.sweep().await;
    assert_eq!(report.pruned, vec!["alice".to_string()]);
    assert_eq!(harness.provider.calls("alice"), 0);
    assert_eq!(client.next_json()["d"]["user"], "bob");
}

#[tokio::test]
async fn test_unsubscribe_without_subscription_is_fatal() {
    let harness = TestHub::new();
    let mut client = harness.connect();
    client.next_json();

    client.send(unsubscribe("alice"));
    client.expect_closed("User is not subscribed");
}

#[tokio::test]
async fn test_unknown_user_reports_error_then_empty_ack() {
    let harness = TestHub::new();
    let mut client = harness.connect();
    client.next_json();

    client.send(subscribe("nobody"));
    assert_eq!(client.next_json(), json!({"op": 2, "d": {"subscriptions": ["nobody"]}}));

    let report = harness.scheduler.sweep().await;
    assert_eq!(report.outcome("nobody"), Some(FetchOutcome::Removed));

    assert_eq!(
        client.next_json(),
        json!({"op": 3, "d": {"user": "nobody", "error": UNKNOWN_FEED_MESSAGE}})
    );
    assert_eq!(client.next_json(), json!({"op": 2, "d": {"subscriptions": []}}));
    assert!(client.is_drained());
    assert!(!harness.hub.feeds().contains("nobody"));
    assert_eq!(harness.hub.bus().listener_count("nobody"), 0);
}

#[tokio::test]
async fn test_domain_error_only_affects_that_feed() {
    let harness = TestHub::new();
    let mut client = harness.connect();
    client.next_json();

    client.send(subscribe("alice"));
    client.send(subscribe("nobody"));
    client.next_json();
    client.next_json();
    harness.provider.set("alice", Ok(track("Song A")));

    harness.scheduler.sweep().await;

    // Fetches for different feeds complete in any order.
    let frames = vec![client.next_json(), client.next_json(), client.next_json()];
    assert!(frames.contains(&json!({"op": 2, "d": {"subscriptions": ["alice"]}})));
    assert!(frames.iter().any(|frame| frame["d"]["track"]["name"] == "Song A"));
    assert!(frames.iter().any(|frame| frame["d"]["error"] == UNKNOWN_FEED_MESSAGE));
    assert_eq!(harness.hub.connections().subscriptions(client.id), vec!["alice"]);
}

#[tokio::test]
async fn test_no_data_reports_error_then_unsubscribes() {
    let harness = TestHub::new();
    let mut client = harness.connect();
    client.next_json();
    client.send(subscribe("alice"));
    client.next_json();

    harness
        .provider
        .set("alice", Err(ProviderError::NoData("User has no recent tracks".into())));

    let report = harness.scheduler.sweep().await;
    assert_eq!(report.outcome("alice"), Some(FetchOutcome::NoData));
    assert_eq!(
        client.next_json(),
        json!({"op": 3, "d": {"user": "alice", "error": "User has no recent tracks"}})
    );
    assert_eq!(client.next_json(), json!({"op": 2, "d": {"subscriptions": []}}));
    assert!(client.is_drained());
    assert!(harness.hub.connections().subscriptions(client.id).is_empty());
    assert_eq!(harness.hub.bus().listener_count("alice"), 0);

    // Nobody is left on the feed, so the next sweep prunes it without a fetch.
    let report = harness.scheduler.sweep().await;
    assert_eq!(report.pruned, vec!["alice".to_string()]);
    assert_eq!(harness.provider.calls("alice"), 1);
    assert!(client.is_drained());
}

#[tokio::test]
async fn test_client_op_zero_is_a_missing_op() {
    let harness = TestHub::new();
    let mut client = harness.connect();
    client.next_json();

    client.send(json!({"op": 0}));
    client.expect_closed("Message must have an op property");
}

#[tokio::test]
async fn test_transient_failure_is_silent_and_keeps_cache() {
    let harness = TestHub::new();
    let mut client = harness.connect();
    client.next_json();
    client.send(subscribe("alice"));
    client.next_json();

    harness.provider.set("alice", Ok(track("Song A")));
    harness.scheduler.sweep().await;
    client.next_json();

    harness
        .provider
        .push("alice", Err(ProviderError::Transient("connection reset".into())));
    let report = harness.scheduler.sweep().await;
    assert_eq!(report.outcome("alice"), Some(FetchOutcome::Transient));
    assert!(client.is_drained());
    assert!(harness.hub.feeds().contains("alice"));

    // The cached snapshot survived, so the same track is not re-sent.
    let report = harness.scheduler.sweep().await;
    assert_eq!(report.outcome("alice"), Some(FetchOutcome::Unchanged));
    assert!(client.is_drained());
}

#[tokio::test]
async fn test_binary_and_malformed_frames_are_fatal() {
    let harness = TestHub::new();

    let mut client = harness.connect();
    client.next_json();
    client.send_binary(&[0x08, 0x01]);
    client.expect_closed("Message must be a string");

    let mut client = harness.connect();
    client.next_json();
    client.send_text("{\"op\": ");
    client.expect_closed("Message must be a JSON object");

    let mut client = harness.connect();
    client.next_json();
    client.send(json!({"op": 7}));
    client.expect_closed("Unknown op code 7");
}
