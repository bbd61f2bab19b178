use crate::common::{bearer, register, send_dm, test_client};
use rocket::http::{ContentType, Status};

fn set_disappear(
    client: &crate::common::TestClient,
    key: &str,
    other: &str,
    seconds: i64,
) -> serde_json::Value {
    let res = client
        .post(format!("/api/dm/{other}/disappear"))
        .header(ContentType::JSON)
        .header(bearer(key))
        .body(format!(r#"{{"seconds": {seconds}}}"#))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    body["settings"].clone()
}

fn two_agents(client: &crate::common::TestClient) -> (String, String, String, String) {
    let (ava_body, ava) = register(client, "Ava", "ava");
    let (bo_body, bo) = register(client, "Bo", "bo");
    (
        ava,
        bo,
        ava_body["agent"]["id"].as_str().unwrap().to_string(),
        bo_body["agent"]["id"].as_str().unwrap().to_string(),
    )
}

#[test]
fn test_proposal_starts_pending() {
    let client = test_client();
    let (ava, _bo, ava_id, bo_id) = two_agents(&client);
    let _ = ava_id;

    let settings = set_disappear(&client, &ava, &bo_id, 3600);
    assert_eq!(settings["pendingApproval"], true);
    assert_eq!(settings["proposedValue"], 3600);
    assert!(settings.get("disappearTimer").is_none() || settings["disappearTimer"].is_null());
}

#[test]
fn test_matching_counter_proposal_activates() {
    let client = test_client();
    let (ava, bo, ava_id, bo_id) = two_agents(&client);

    set_disappear(&client, &ava, &bo_id, 7200);
    let settings = set_disappear(&client, &bo, &ava_id, 7200);
    assert_eq!(settings["pendingApproval"], false);
    assert_eq!(settings["disappearTimer"], 7200);
    assert!(settings.get("proposedValue").is_none() || settings["proposedValue"].is_null());
}

#[test]
fn test_negotiation_scenario() {
    // A proposes 3600, B counters 7200, A agrees to 7200 → Active(7200)
    let client = test_client();
    let (ava, bo, ava_id, bo_id) = two_agents(&client);

    let s = set_disappear(&client, &ava, &bo_id, 3600);
    assert_eq!(s["pendingApproval"], true);
    assert_eq!(s["proposedValue"], 3600);

    let s = set_disappear(&client, &bo, &ava_id, 7200);
    assert_eq!(s["pendingApproval"], true);
    assert_eq!(s["proposedValue"], 7200);

    let s = set_disappear(&client, &ava, &bo_id, 7200);
    assert_eq!(s["pendingApproval"], false);
    assert_eq!(s["disappearTimer"], 7200);

    // A DM sent now carries expiresAt ≈ now + 7200s
    let msg = send_dm(&client, &ava, &bo_id, "self destructing");
    let expires = chrono::DateTime::parse_from_rfc3339(msg["expiresAt"].as_str().unwrap())
        .unwrap()
        .with_timezone(&chrono::Utc);
    let delta = expires - chrono::Utc::now();
    assert!(delta.num_seconds() > 7100 && delta.num_seconds() <= 7200);
}

#[test]
fn test_confluence_regardless_of_mover_order() {
    // Same matching proposals, either party moving last, reach the same state
    let client = test_client();
    let (ava, bo, ava_id, bo_id) = two_agents(&client);

    set_disappear(&client, &bo, &ava_id, 600);
    let settings = set_disappear(&client, &ava, &bo_id, 600);
    assert_eq!(settings["pendingApproval"], false);
    assert_eq!(settings["disappearTimer"], 600);
}

#[test]
fn test_own_proposal_overwrite() {
    let client = test_client();
    let (ava, _bo, _ava_id, bo_id) = two_agents(&client);

    set_disappear(&client, &ava, &bo_id, 3600);
    let settings = set_disappear(&client, &ava, &bo_id, 60);
    // Still pending, with the newer value; no self-agreement
    assert_eq!(settings["pendingApproval"], true);
    assert_eq!(settings["proposedValue"], 60);
}

#[test]
fn test_messages_sent_while_pending_never_expire() {
    let client = test_client();
    let (ava, _bo, _ava_id, bo_id) = two_agents(&client);

    set_disappear(&client, &ava, &bo_id, 3600);
    let msg = send_dm(&client, &ava, &bo_id, "permanent");
    assert!(msg.get("expiresAt").is_none() || msg["expiresAt"].is_null());
}

#[test]
fn test_activation_is_not_retroactive() {
    let client = test_client();
    let (ava, bo, ava_id, bo_id) = two_agents(&client);

    let before = send_dm(&client, &ava, &bo_id, "sent before activation");
    assert!(before.get("expiresAt").is_none() || before["expiresAt"].is_null());

    set_disappear(&client, &ava, &bo_id, 3600);
    set_disappear(&client, &bo, &ava_id, 3600);

    // The earlier message is still visible and still has no expiry
    let thread: serde_json::Value = client
        .get(format!("/api/dm/{bo_id}"))
        .header(bearer(&ava))
        .dispatch()
        .into_json()
        .unwrap();
    let found = thread["messages"]
        .as_array()
        .unwrap()
        .iter()
        .find(|m| m["id"] == before["id"])
        .unwrap();
    assert!(found.get("expiresAt").is_none() || found["expiresAt"].is_null());
}

#[test]
fn test_zero_disables() {
    let client = test_client();
    let (ava, bo, ava_id, bo_id) = two_agents(&client);

    set_disappear(&client, &ava, &bo_id, 3600);
    set_disappear(&client, &bo, &ava_id, 3600);

    let settings = set_disappear(&client, &ava, &bo_id, 0);
    assert_eq!(settings["pendingApproval"], false);
    assert!(settings.get("disappearTimer").is_none() || settings["disappearTimer"].is_null());

    // New messages no longer expire
    let msg = send_dm(&client, &ava, &bo_id, "durable again");
    assert!(msg.get("expiresAt").is_none() || msg["expiresAt"].is_null());
}

#[test]
fn test_active_timer_requires_renegotiation() {
    let client = test_client();
    let (ava, bo, ava_id, bo_id) = two_agents(&client);

    set_disappear(&client, &ava, &bo_id, 3600);
    set_disappear(&client, &bo, &ava_id, 3600);

    // A new different proposal drops back to pending
    let settings = set_disappear(&client, &ava, &bo_id, 60);
    assert_eq!(settings["pendingApproval"], true);
    assert_eq!(settings["proposedValue"], 60);

    // While pending, messages do not expire
    let msg = send_dm(&client, &ava, &bo_id, "limbo");
    assert!(msg.get("expiresAt").is_none() || msg["expiresAt"].is_null());
}

#[test]
fn test_negative_seconds_rejected() {
    let client = test_client();
    let (ava, _bo, _ava_id, bo_id) = two_agents(&client);

    let res = client
        .post(format!("/api/dm/{bo_id}/disappear"))
        .header(ContentType::JSON)
        .header(bearer(&ava))
        .body(r#"{"seconds": -5}"#)
        .dispatch();
    assert_eq!(res.status(), Status::BadRequest);
}

#[test]
fn test_settings_endpoint() {
    let client = test_client();
    let (ava, _bo, _ava_id, bo_id) = two_agents(&client);

    set_disappear(&client, &ava, &bo_id, 900);
    let res = client
        .get(format!("/api/dm/{bo_id}/settings"))
        .header(bearer(&ava))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["settings"]["pendingApproval"], true);
    assert_eq!(body["settings"]["proposedValue"], 900);
}
