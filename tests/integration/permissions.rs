use crate::common::{bearer, create_group, join_group, register, test_client};
use clawlink::permissions::{can_modify_role, has_permission, GroupAction, Role};
use rocket::http::{ContentType, Status};

// --- Pure role/action layer ---

#[test]
fn test_role_hierarchy() {
    assert!(has_permission(Role::Admin, Role::Member));
    assert!(has_permission(Role::Admin, Role::Admin));
    assert!(has_permission(Role::Moderator, Role::Member));
    assert!(has_permission(Role::Member, Role::Member));
    assert!(!has_permission(Role::Member, Role::Moderator));
    assert!(!has_permission(Role::Moderator, Role::Admin));
}

#[test]
fn test_can_modify_role_is_strict() {
    assert!(can_modify_role(Role::Admin, Role::Moderator));
    assert!(can_modify_role(Role::Admin, Role::Member));
    assert!(can_modify_role(Role::Moderator, Role::Member));
    assert!(!can_modify_role(Role::Admin, Role::Admin));
    assert!(!can_modify_role(Role::Moderator, Role::Moderator));
    assert!(!can_modify_role(Role::Member, Role::Admin));
}

#[test]
fn test_role_parsing() {
    assert_eq!(Role::parse("admin"), Some(Role::Admin));
    assert_eq!(Role::parse("moderator"), Some(Role::Moderator));
    assert_eq!(Role::parse("member"), Some(Role::Member));
    assert_eq!(Role::parse("Admin"), None);
    assert_eq!(Role::parse("owner"), None);
}

#[test]
fn test_action_defaults() {
    assert_eq!(GroupAction::RenameGroup.default_role(), Role::Admin);
    assert_eq!(GroupAction::EditDescription.default_role(), Role::Admin);
    assert_eq!(GroupAction::EditAvatar.default_role(), Role::Admin);
    assert_eq!(GroupAction::DeleteGroup.default_role(), Role::Admin);
    assert_eq!(GroupAction::RemoveMembers.default_role(), Role::Moderator);
    assert_eq!(GroupAction::SetRoles.default_role(), Role::Admin);
    assert_eq!(GroupAction::InviteMembers.default_role(), Role::Member);
    assert_eq!(GroupAction::PinMessages.default_role(), Role::Moderator);
    assert_eq!(GroupAction::DeleteAnyMessage.default_role(), Role::Moderator);
    assert!(GroupAction::DeleteGroup.locked());
    assert_eq!(GroupAction::ALL.len(), 9);
}

// --- Per-group overrides over HTTP ---

#[test]
fn test_override_lets_member_rename() {
    let client = test_client();
    let (_, ava) = register(&client, "Ava", "ava");
    let (_, bo) = register(&client, "Bo", "bo");
    let group_id = create_group(&client, &ava, "Commons");
    join_group(&client, &bo, &group_id);

    let res = client
        .put(format!("/api/groups/{group_id}/permissions"))
        .header(ContentType::JSON)
        .header(bearer(&ava))
        .body(r#"{"renameGroup": "member"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["permissions"]["renameGroup"], "member");
    // Unlisted actions reset to defaults
    assert_eq!(body["permissions"]["deleteGroup"], "admin");
    assert_eq!(body["permissions"]["removeMembers"], "moderator");

    // A plain member can now rename
    let res = client
        .patch(format!("/api/groups/{group_id}/settings"))
        .header(ContentType::JSON)
        .header(bearer(&bo))
        .body(r#"{"name": "New"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["group"]["name"], "New");
}

#[test]
fn test_delete_group_lock_cannot_be_lowered() {
    let client = test_client();
    let (_, ava) = register(&client, "Ava", "ava");
    let group_id = create_group(&client, &ava, "Commons");

    let res = client
        .put(format!("/api/groups/{group_id}/permissions"))
        .header(ContentType::JSON)
        .header(bearer(&ava))
        .body(r#"{"deleteGroup": "member"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::BadRequest);

    let res = client
        .put(format!("/api/groups/{group_id}/permissions"))
        .header(ContentType::JSON)
        .header(bearer(&ava))
        .body(r#"{"deleteGroup": "moderator"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::BadRequest);

    // Stating admin explicitly is fine
    let res = client
        .put(format!("/api/groups/{group_id}/permissions"))
        .header(ContentType::JSON)
        .header(bearer(&ava))
        .body(r#"{"deleteGroup": "admin"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
}

#[test]
fn test_permissions_update_admin_only() {
    let client = test_client();
    let (_, ava) = register(&client, "Ava", "ava");
    let (_, bo) = register(&client, "Bo", "bo");
    let group_id = create_group(&client, &ava, "Commons");
    join_group(&client, &bo, &group_id);

    let res = client
        .put(format!("/api/groups/{group_id}/permissions"))
        .header(ContentType::JSON)
        .header(bearer(&bo))
        .body(r#"{"renameGroup": "member"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Forbidden);
}

#[test]
fn test_invalid_role_in_overrides() {
    let client = test_client();
    let (_, ava) = register(&client, "Ava", "ava");
    let group_id = create_group(&client, &ava, "Commons");

    let res = client
        .put(format!("/api/groups/{group_id}/permissions"))
        .header(ContentType::JSON)
        .header(bearer(&ava))
        .body(r#"{"pinMessages": "emperor"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::BadRequest);
}

#[test]
fn test_override_replacement_resets_previous() {
    let client = test_client();
    let (_, ava) = register(&client, "Ava", "ava");
    let group_id = create_group(&client, &ava, "Commons");

    client
        .put(format!("/api/groups/{group_id}/permissions"))
        .header(ContentType::JSON)
        .header(bearer(&ava))
        .body(r#"{"renameGroup": "member", "pinMessages": "admin"}"#)
        .dispatch();

    // Replace with a body that no longer mentions renameGroup
    let res = client
        .put(format!("/api/groups/{group_id}/permissions"))
        .header(ContentType::JSON)
        .header(bearer(&ava))
        .body(r#"{"pinMessages": "admin"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["permissions"]["renameGroup"], "admin");
    assert_eq!(body["permissions"]["pinMessages"], "admin");
}
