use crate::common::{bearer, register, send_dm, test_client};
use clawlink::events::{ChatEvent, EventBus};
use rocket::http::ContentType;

fn activate_timer(client: &crate::common::TestClient, a: &str, b: &str, a_id: &str, b_id: &str) {
    for (key, other) in [(a, b_id), (b, a_id)] {
        client
            .post(format!("/api/dm/{other}/disappear"))
            .header(ContentType::JSON)
            .header(bearer(key))
            .body(r#"{"seconds": 3600}"#)
            .dispatch();
    }
}

#[test]
fn test_sweep_purges_expired_and_notifies_both_sides() {
    let client = test_client();
    let (ava_body, ava) = register(&client, "Ava", "ava");
    let (bo_body, bo) = register(&client, "Bo", "bo");
    let ava_id = ava_body["agent"]["id"].as_str().unwrap();
    let bo_id = bo_body["agent"]["id"].as_str().unwrap();

    activate_timer(&client, &ava, &bo, ava_id, bo_id);
    let msg = send_dm(&client, &ava, bo_id, "ephemeral");
    let msg_id = msg["id"].as_str().unwrap();
    assert!(msg["expiresAt"].is_string());

    // Force the expiry into the past, then run one sweep directly
    let conn = rusqlite::Connection::open(&client.db_path).unwrap();
    let past = (chrono::Utc::now() - chrono::Duration::seconds(5)).to_rfc3339();
    conn.execute(
        "UPDATE direct_messages SET expires_at = ?1 WHERE id = ?2",
        rusqlite::params![&past, msg_id],
    )
    .unwrap();

    let bus = EventBus::new();
    let mut rx = bus.sender.subscribe();
    let result = clawlink::expiry::run_sweep(&conn, &bus);
    assert_eq!(result.purged, 1);

    // Both participants are notified
    let mut notified = Vec::new();
    while let Ok(bus_event) = rx.try_recv() {
        if let ChatEvent::DmExpired { message_id } = &bus_event.event {
            assert_eq!(message_id, msg_id);
            notified.push(bus_event.room.clone());
        }
    }
    assert!(notified.contains(&format!("agent:{ava_id}")));
    assert!(notified.contains(&format!("agent:{bo_id}")));

    // Subsequent thread reads omit the purged message
    let thread: serde_json::Value = client
        .get(format!("/api/dm/{bo_id}"))
        .header(bearer(&ava))
        .dispatch()
        .into_json()
        .unwrap();
    assert_eq!(thread["count"], 0);
}

#[test]
fn test_sweep_ignores_unexpired_messages() {
    let client = test_client();
    let (ava_body, ava) = register(&client, "Ava", "ava");
    let (bo_body, bo) = register(&client, "Bo", "bo");
    let ava_id = ava_body["agent"]["id"].as_str().unwrap();
    let bo_id = bo_body["agent"]["id"].as_str().unwrap();

    activate_timer(&client, &ava, &bo, ava_id, bo_id);
    send_dm(&client, &ava, bo_id, "not yet");
    send_dm(&client, &bo, ava_id, "this one is fresh too");

    let conn = rusqlite::Connection::open(&client.db_path).unwrap();
    let bus = EventBus::new();
    let result = clawlink::expiry::run_sweep(&conn, &bus);
    assert_eq!(result.purged, 0);

    let thread: serde_json::Value = client
        .get(format!("/api/dm/{bo_id}"))
        .header(bearer(&ava))
        .dispatch()
        .into_json()
        .unwrap();
    assert_eq!(thread["count"], 2);
}

#[test]
fn test_expired_messages_hidden_even_before_sweep() {
    let client = test_client();
    let (ava_body, ava) = register(&client, "Ava", "ava");
    let (bo_body, bo) = register(&client, "Bo", "bo");
    let ava_id = ava_body["agent"]["id"].as_str().unwrap();
    let bo_id = bo_body["agent"]["id"].as_str().unwrap();

    activate_timer(&client, &ava, &bo, ava_id, bo_id);
    let msg = send_dm(&client, &ava, bo_id, "already gone");
    let msg_id = msg["id"].as_str().unwrap();

    let conn = rusqlite::Connection::open(&client.db_path).unwrap();
    let past = (chrono::Utc::now() - chrono::Duration::seconds(5)).to_rfc3339();
    conn.execute(
        "UPDATE direct_messages SET expires_at = ?1 WHERE id = ?2",
        rusqlite::params![&past, msg_id],
    )
    .unwrap();

    // The read model filters on expiry before any sweep runs
    let thread: serde_json::Value = client
        .get(format!("/api/dm/{bo_id}"))
        .header(bearer(&ava))
        .dispatch()
        .into_json()
        .unwrap();
    assert_eq!(thread["count"], 0);
}
