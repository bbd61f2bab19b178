use crate::common::{bearer, create_group, join_group, register, send_message, test_client};
use rocket::http::{ContentType, Status};

#[test]
fn test_react_by_name_echoes_emoji() {
    let client = test_client();
    let (_, ava) = register(&client, "Ava", "ava");
    let group_id = create_group(&client, &ava, "Commons");
    let msg = send_message(&client, &ava, &group_id, "React to this!");
    let msg_id = msg["id"].as_str().unwrap();

    let res = client
        .post(format!("/api/messages/{group_id}/{msg_id}/reactions"))
        .header(ContentType::JSON)
        .header(bearer(&ava))
        .body(r#"{"reaction": "like"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["emoji"], "👍");
}

#[test]
fn test_react_by_emoji_accepted() {
    let client = test_client();
    let (_, ava) = register(&client, "Ava", "ava");
    let group_id = create_group(&client, &ava, "Commons");
    let msg = send_message(&client, &ava, &group_id, "hearts");
    let msg_id = msg["id"].as_str().unwrap();

    let res = client
        .post(format!("/api/messages/{group_id}/{msg_id}/reactions"))
        .header(ContentType::JSON)
        .header(bearer(&ava))
        .body(r#"{"reaction": "❤️"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["emoji"], "❤️");
}

#[test]
fn test_react_outside_closed_set_rejected() {
    let client = test_client();
    let (_, ava) = register(&client, "Ava", "ava");
    let group_id = create_group(&client, &ava, "Commons");
    let msg = send_message(&client, &ava, &group_id, "no party");
    let msg_id = msg["id"].as_str().unwrap();

    for bad in ["party", "🎉", "thumbsup", ""] {
        let res = client
            .post(format!("/api/messages/{group_id}/{msg_id}/reactions"))
            .header(ContentType::JSON)
            .header(bearer(&ava))
            .body(format!(r#"{{"reaction": "{bad}"}}"#))
            .dispatch();
        assert_eq!(res.status(), Status::BadRequest, "reaction {bad:?}");
    }
}

#[test]
fn test_duplicate_reaction_conflicts() {
    let client = test_client();
    let (_, ava) = register(&client, "Ava", "ava");
    let group_id = create_group(&client, &ava, "Commons");
    let msg = send_message(&client, &ava, &group_id, "once only");
    let msg_id = msg["id"].as_str().unwrap();

    let react = || {
        client
            .post(format!("/api/messages/{group_id}/{msg_id}/reactions"))
            .header(ContentType::JSON)
            .header(bearer(&ava))
            .body(r#"{"reaction": "like"}"#)
            .dispatch()
    };
    assert_eq!(react().status(), Status::Ok);
    assert_eq!(react().status(), Status::Conflict);

    // Name and emoji are the same reaction
    let res = client
        .post(format!("/api/messages/{group_id}/{msg_id}/reactions"))
        .header(ContentType::JSON)
        .header(bearer(&ava))
        .body(r#"{"reaction": "👍"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Conflict);

    // Still exactly one reaction row
    let list: serde_json::Value = client
        .get(format!("/api/messages/{group_id}"))
        .header(bearer(&ava))
        .dispatch()
        .into_json()
        .unwrap();
    let reactions = list["messages"][0]["reactions"].as_array().unwrap();
    assert_eq!(reactions.len(), 1);
    assert_eq!(reactions[0]["count"], 1);
}

#[test]
fn test_reactions_aggregate_in_listing() {
    let client = test_client();
    let (_, ava) = register(&client, "Ava", "ava");
    let (_, bo) = register(&client, "Bo", "bo");
    let group_id = create_group(&client, &ava, "Commons");
    join_group(&client, &bo, &group_id);
    let msg = send_message(&client, &ava, &group_id, "popular");
    let msg_id = msg["id"].as_str().unwrap();

    for key in [&ava, &bo] {
        client
            .post(format!("/api/messages/{group_id}/{msg_id}/reactions"))
            .header(ContentType::JSON)
            .header(bearer(key))
            .body(r#"{"reaction": "like"}"#)
            .dispatch();
    }
    client
        .post(format!("/api/messages/{group_id}/{msg_id}/reactions"))
        .header(ContentType::JSON)
        .header(bearer(&bo))
        .body(r#"{"reaction": "sad"}"#)
        .dispatch();

    let list: serde_json::Value = client
        .get(format!("/api/messages/{group_id}"))
        .header(bearer(&ava))
        .dispatch()
        .into_json()
        .unwrap();
    let reactions = list["messages"][0]["reactions"].as_array().unwrap();
    assert_eq!(reactions.len(), 2);

    let thumbs = reactions.iter().find(|r| r["emoji"] == "👍").unwrap();
    assert_eq!(thumbs["count"], 2);
    let agents: Vec<&str> = thumbs["agents"]
        .as_array()
        .unwrap()
        .iter()
        .map(|a| a.as_str().unwrap())
        .collect();
    assert!(agents.contains(&"ava"));
    assert!(agents.contains(&"bo"));

    let sad = reactions.iter().find(|r| r["emoji"] == "😢").unwrap();
    assert_eq!(sad["count"], 1);
}

#[test]
fn test_non_member_cannot_react() {
    let client = test_client();
    let (_, ava) = register(&client, "Ava", "ava");
    let (_, bo) = register(&client, "Bo", "bo");
    let group_id = create_group(&client, &ava, "Commons");
    let msg = send_message(&client, &ava, &group_id, "members only");
    let msg_id = msg["id"].as_str().unwrap();

    let res = client
        .post(format!("/api/messages/{group_id}/{msg_id}/reactions"))
        .header(ContentType::JSON)
        .header(bearer(&bo))
        .body(r#"{"reaction": "like"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Forbidden);
}

#[test]
fn test_remove_reaction() {
    let client = test_client();
    let (_, ava) = register(&client, "Ava", "ava");
    let group_id = create_group(&client, &ava, "Commons");
    let msg = send_message(&client, &ava, &group_id, "fleeting");
    let msg_id = msg["id"].as_str().unwrap();

    client
        .post(format!("/api/messages/{group_id}/{msg_id}/reactions"))
        .header(ContentType::JSON)
        .header(bearer(&ava))
        .body(r#"{"reaction": "love"}"#)
        .dispatch();

    // Remove by name (URL-encoded emoji works too)
    let res = client
        .delete(format!("/api/messages/{group_id}/{msg_id}/reactions/love"))
        .header(bearer(&ava))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);

    // Gone: removing again is NotFound
    let res = client
        .delete(format!("/api/messages/{group_id}/{msg_id}/reactions/love"))
        .header(bearer(&ava))
        .dispatch();
    assert_eq!(res.status(), Status::NotFound);
}

#[test]
fn test_react_to_deleted_message() {
    let client = test_client();
    let (_, ava) = register(&client, "Ava", "ava");
    let group_id = create_group(&client, &ava, "Commons");
    let msg = send_message(&client, &ava, &group_id, "going away");
    let msg_id = msg["id"].as_str().unwrap();

    client
        .delete(format!("/api/messages/{group_id}/{msg_id}"))
        .header(bearer(&ava))
        .dispatch();

    // The delete+react race resolves to NotFound
    let res = client
        .post(format!("/api/messages/{group_id}/{msg_id}/reactions"))
        .header(ContentType::JSON)
        .header(bearer(&ava))
        .body(r#"{"reaction": "like"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::NotFound);
}
