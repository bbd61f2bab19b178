use crate::common::{bearer, create_group, join_group, register, send_message, test_client};
use rocket::http::{ContentType, Status};

#[test]
fn test_send_and_list_messages() {
    let client = test_client();
    let (_, ava) = register(&client, "Ava", "ava");
    let group_id = create_group(&client, &ava, "Commons");

    let msg = send_message(&client, &ava, &group_id, "Hello world!");
    assert_eq!(msg["content"], "Hello world!");
    assert_eq!(msg["groupId"], group_id.as_str());
    assert_eq!(msg["author"]["handle"], "ava");

    let res = client
        .get(format!("/api/messages/{group_id}"))
        .header(bearer(&ava))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["count"], 1);
    assert_eq!(body["messages"][0]["content"], "Hello world!");
}

#[test]
fn test_messages_chronological_order() {
    let client = test_client();
    let (_, ava) = register(&client, "Ava", "ava");
    let group_id = create_group(&client, &ava, "Commons");

    for content in ["first", "second", "third"] {
        send_message(&client, &ava, &group_id, content);
        std::thread::sleep(std::time::Duration::from_millis(10));
    }

    let res = client
        .get(format!("/api/messages/{group_id}"))
        .header(bearer(&ava))
        .dispatch();
    let body: serde_json::Value = res.into_json().unwrap();
    let contents: Vec<&str> = body["messages"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["content"].as_str().unwrap())
        .collect();
    assert_eq!(contents, vec!["first", "second", "third"]);
}

#[test]
fn test_messages_limit_and_clamp() {
    let client = test_client();
    let (_, ava) = register(&client, "Ava", "ava");
    let group_id = create_group(&client, &ava, "Commons");

    for i in 0..5 {
        send_message(&client, &ava, &group_id, &format!("msg {i}"));
        std::thread::sleep(std::time::Duration::from_millis(5));
    }

    // limit=2 returns the two newest, in order
    let res = client
        .get(format!("/api/messages/{group_id}?limit=2"))
        .header(bearer(&ava))
        .dispatch();
    let body: serde_json::Value = res.into_json().unwrap();
    let contents: Vec<&str> = body["messages"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["content"].as_str().unwrap())
        .collect();
    assert_eq!(contents, vec!["msg 3", "msg 4"]);

    // Oversized limit clamps (no error)
    let res = client
        .get(format!("/api/messages/{group_id}?limit=100000"))
        .header(bearer(&ava))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
}

#[test]
fn test_messages_before_cursor() {
    let client = test_client();
    let (_, ava) = register(&client, "Ava", "ava");
    let group_id = create_group(&client, &ava, "Commons");

    let first = send_message(&client, &ava, &group_id, "first");
    std::thread::sleep(std::time::Duration::from_millis(10));
    send_message(&client, &ava, &group_id, "second");

    let cursor = first["createdAt"].as_str().unwrap();
    let res = client
        .get(format!(
            "/api/messages/{group_id}?before={}",
            urlencoding::encode(cursor)
        ))
        .header(bearer(&ava))
        .dispatch();
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["count"], 0);
}

#[test]
fn test_messages_membership_required() {
    let client = test_client();
    let (_, ava) = register(&client, "Ava", "ava");
    let (_, bo) = register(&client, "Bo", "bo");
    let group_id = create_group(&client, &ava, "Commons");

    let res = client
        .get(format!("/api/messages/{group_id}"))
        .header(bearer(&bo))
        .dispatch();
    assert_eq!(res.status(), Status::Forbidden);

    let res = client
        .post(format!("/api/messages/{group_id}"))
        .header(ContentType::JSON)
        .header(bearer(&bo))
        .body(r#"{"content": "let me in"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Forbidden);
}

#[test]
fn test_send_message_empty_content() {
    let client = test_client();
    let (_, ava) = register(&client, "Ava", "ava");
    let group_id = create_group(&client, &ava, "Commons");

    let res = client
        .post(format!("/api/messages/{group_id}"))
        .header(ContentType::JSON)
        .header(bearer(&ava))
        .body(r#"{"content": "   "}"#)
        .dispatch();
    assert_eq!(res.status(), Status::BadRequest);
}

#[test]
fn test_send_message_4000_chars_accepted() {
    let client = test_client();
    let (_, ava) = register(&client, "Ava", "ava");
    let group_id = create_group(&client, &ava, "Commons");

    let long = "a".repeat(4000);
    let body = serde_json::json!({"content": long});
    let res = client
        .post(format!("/api/messages/{group_id}"))
        .header(ContentType::JSON)
        .header(bearer(&ava))
        .body(body.to_string())
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
}

#[test]
fn test_send_message_unknown_group() {
    let client = test_client();
    let (_, ava) = register(&client, "Ava", "ava");
    let res = client
        .post("/api/messages/nonexistent")
        .header(ContentType::JSON)
        .header(bearer(&ava))
        .body(r#"{"content": "hello"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::NotFound);
}

// --- Replies ---

#[test]
fn test_reply_preview_enrichment() {
    let client = test_client();
    let (_, ava) = register(&client, "Ava", "ava");
    let group_id = create_group(&client, &ava, "Commons");

    let long = "x".repeat(150);
    let body = serde_json::json!({"content": long});
    let res = client
        .post(format!("/api/messages/{group_id}"))
        .header(ContentType::JSON)
        .header(bearer(&ava))
        .body(body.to_string())
        .dispatch();
    let target: serde_json::Value = res.into_json().unwrap();
    let target_id = target["message"]["id"].as_str().unwrap();

    let res = client
        .post(format!("/api/messages/{group_id}"))
        .header(ContentType::JSON)
        .header(bearer(&ava))
        .body(format!(r#"{{"content": "re", "replyToId": "{target_id}"}}"#))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let reply: serde_json::Value = res.into_json().unwrap();
    let preview = &reply["message"]["replyTo"];
    assert_eq!(preview["id"], target_id);
    assert_eq!(preview["authorHandle"], "ava");
    // Preview is truncated to 100 chars
    assert_eq!(preview["content"].as_str().unwrap().len(), 100);
}

#[test]
fn test_reply_must_be_in_same_group() {
    let client = test_client();
    let (_, ava) = register(&client, "Ava", "ava");
    let group_a = create_group(&client, &ava, "Alpha");
    let group_b = create_group(&client, &ava, "Beta");

    let other = send_message(&client, &ava, &group_a, "in alpha");
    let other_id = other["id"].as_str().unwrap();

    let res = client
        .post(format!("/api/messages/{group_b}"))
        .header(ContentType::JSON)
        .header(bearer(&ava))
        .body(format!(r#"{{"content": "re", "replyToId": "{other_id}"}}"#))
        .dispatch();
    assert_eq!(res.status(), Status::BadRequest);
}

// --- Deletion ---

#[test]
fn test_author_deletes_own_message() {
    let client = test_client();
    let (_, ava) = register(&client, "Ava", "ava");
    let (_, bo) = register(&client, "Bo", "bo");
    let group_id = create_group(&client, &ava, "Commons");
    join_group(&client, &bo, &group_id);

    let msg = send_message(&client, &bo, &group_id, "mine");
    let msg_id = msg["id"].as_str().unwrap();

    let res = client
        .delete(format!("/api/messages/{group_id}/{msg_id}"))
        .header(bearer(&bo))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);

    let res = client
        .get(format!("/api/messages/{group_id}"))
        .header(bearer(&bo))
        .dispatch();
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["count"], 0);
}

#[test]
fn test_plain_member_cannot_delete_others_message() {
    let client = test_client();
    let (_, ava) = register(&client, "Ava", "ava");
    let (_, bo) = register(&client, "Bo", "bo");
    let group_id = create_group(&client, &ava, "Commons");
    join_group(&client, &bo, &group_id);

    let msg = send_message(&client, &ava, &group_id, "admin words");
    let msg_id = msg["id"].as_str().unwrap();

    let res = client
        .delete(format!("/api/messages/{group_id}/{msg_id}"))
        .header(bearer(&bo))
        .dispatch();
    assert_eq!(res.status(), Status::Forbidden);
}

#[test]
fn test_moderator_deletes_any_message() {
    let client = test_client();
    let (_, ava) = register(&client, "Ava", "ava");
    let (bo_body, bo) = register(&client, "Bo", "bo");
    let group_id = create_group(&client, &ava, "Commons");
    join_group(&client, &bo, &group_id);
    let bo_id = bo_body["agent"]["id"].as_str().unwrap();

    client
        .patch(format!("/api/groups/{group_id}/members/{bo_id}/role"))
        .header(ContentType::JSON)
        .header(bearer(&ava))
        .body(r#"{"role": "moderator"}"#)
        .dispatch();

    let msg = send_message(&client, &ava, &group_id, "anyone can go");
    let msg_id = msg["id"].as_str().unwrap();

    let res = client
        .delete(format!("/api/messages/{group_id}/{msg_id}"))
        .header(bearer(&bo))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
}

#[test]
fn test_delete_message_not_found() {
    let client = test_client();
    let (_, ava) = register(&client, "Ava", "ava");
    let group_id = create_group(&client, &ava, "Commons");

    let res = client
        .delete(format!("/api/messages/{group_id}/nonexistent"))
        .header(bearer(&ava))
        .dispatch();
    assert_eq!(res.status(), Status::NotFound);
}

// --- Enrichment determinism ---

#[test]
fn test_two_reads_return_identical_payloads() {
    let client = test_client();
    let (_, ava) = register(&client, "Ava", "ava");
    let group_id = create_group(&client, &ava, "Commons");
    let msg = send_message(&client, &ava, &group_id, "stable");
    let msg_id = msg["id"].as_str().unwrap();

    client
        .post(format!("/api/messages/{group_id}/{msg_id}/reactions"))
        .header(ContentType::JSON)
        .header(bearer(&ava))
        .body(r#"{"reaction": "like"}"#)
        .dispatch();

    let first: serde_json::Value = client
        .get(format!("/api/messages/{group_id}"))
        .header(bearer(&ava))
        .dispatch()
        .into_json()
        .unwrap();
    let second: serde_json::Value = client
        .get(format!("/api/messages/{group_id}"))
        .header(bearer(&ava))
        .dispatch()
        .into_json()
        .unwrap();
    assert_eq!(first, second);
}
