use crate::common::{bearer, register, send_dm, test_client};
use rocket::http::{ContentType, Status};

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
fn test_block_prevents_blocked_sender() {
    let client = test_client();
    let (ava, bo, ava_id, bo_id) = two_agents(&client);

    // Ava blocks Bo
    let res = client
        .post(format!("/api/dm/block/{bo_id}"))
        .header(bearer(&ava))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);

    // Bo can no longer DM Ava
    let res = client
        .post(format!("/api/dm/{ava_id}"))
        .header(ContentType::JSON)
        .header(bearer(&bo))
        .body(r#"{"content": "please?"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Forbidden);

    // Blocking is asymmetric: Ava may still send to Bo
    let msg = send_dm(&client, &ava, &bo_id, "one-way street");
    assert_eq!(msg["content"], "one-way street");
}

#[test]
fn test_unblock_restores_sending() {
    let client = test_client();
    let (ava, bo, ava_id, bo_id) = two_agents(&client);

    client
        .post(format!("/api/dm/block/{bo_id}"))
        .header(bearer(&ava))
        .dispatch();
    let res = client
        .delete(format!("/api/dm/block/{bo_id}"))
        .header(bearer(&ava))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);

    let msg = send_dm(&client, &bo, &ava_id, "back again");
    assert_eq!(msg["content"], "back again");
}

#[test]
fn test_duplicate_block_conflicts() {
    let client = test_client();
    let (ava, _bo, _ava_id, bo_id) = two_agents(&client);

    let block = || {
        client
            .post(format!("/api/dm/block/{bo_id}"))
            .header(bearer(&ava))
            .dispatch()
    };
    assert_eq!(block().status(), Status::Ok);
    assert_eq!(block().status(), Status::Conflict);

    // Still exactly one block row
    let list: serde_json::Value = client
        .get("/api/dm/blocks")
        .header(bearer(&ava))
        .dispatch()
        .into_json()
        .unwrap();
    assert_eq!(list["count"], 1);
}

#[test]
fn test_block_then_unblock_round_trip() {
    let client = test_client();
    let (ava, _bo, _ava_id, bo_id) = two_agents(&client);

    client
        .post(format!("/api/dm/block/{bo_id}"))
        .header(bearer(&ava))
        .dispatch();
    client
        .delete(format!("/api/dm/block/{bo_id}"))
        .header(bearer(&ava))
        .dispatch();

    // Back to the initial state
    let list: serde_json::Value = client
        .get("/api/dm/blocks")
        .header(bearer(&ava))
        .dispatch()
        .into_json()
        .unwrap();
    assert_eq!(list["count"], 0);

    // Unblocking again is NotFound
    let res = client
        .delete(format!("/api/dm/block/{bo_id}"))
        .header(bearer(&ava))
        .dispatch();
    assert_eq!(res.status(), Status::NotFound);
}

#[test]
fn test_self_block_rejected() {
    let client = test_client();
    let (ava_body, ava) = register(&client, "Ava", "ava");
    let ava_id = ava_body["agent"]["id"].as_str().unwrap();

    let res = client
        .post(format!("/api/dm/block/{ava_id}"))
        .header(bearer(&ava))
        .dispatch();
    assert_eq!(res.status(), Status::BadRequest);
}

#[test]
fn test_blocks_list() {
    let client = test_client();
    let (_, ava) = register(&client, "Ava", "ava");
    let (bo_body, _) = register(&client, "Bo", "bo");
    let (cy_body, _) = register(&client, "Cy", "cy");
    let bo_id = bo_body["agent"]["id"].as_str().unwrap();
    let cy_id = cy_body["agent"]["id"].as_str().unwrap();

    client
        .post(format!("/api/dm/block/{bo_id}"))
        .header(bearer(&ava))
        .dispatch();
    client
        .post(format!("/api/dm/block/{cy_id}"))
        .header(bearer(&ava))
        .dispatch();

    let list: serde_json::Value = client
        .get("/api/dm/blocks")
        .header(bearer(&ava))
        .dispatch()
        .into_json()
        .unwrap();
    assert_eq!(list["count"], 2);
    let handles: Vec<&str> = list["blocked"]
        .as_array()
        .unwrap()
        .iter()
        .map(|a| a["handle"].as_str().unwrap())
        .collect();
    assert_eq!(handles, vec!["bo", "cy"]);
}
