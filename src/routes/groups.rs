use crate::db::Db;
use crate::error::{ApiError, ApiResult};
use crate::events::{agent_room, group_room, ChatEvent, EventBus};
use crate::models::{
    AgentSummary, CreateGroupRequest, Group, GroupMember, PermissionOverridesRequest,
    SetRoleRequest, UpdateGroupSettingsRequest,
};
use crate::permissions::{
    can_modify_role, check_group_permission, member_role, resolved_permissions, GroupAction, Role,
};
use crate::rate_limit::{RateLimitConfig, RateLimited, RateLimiter};
use rocket::serde::json::Json;
use rocket::{delete, get, patch, post, put, State};
use rusqlite::params;

use super::{AuthedAgent, ClientIp};

pub(crate) fn load_group(conn: &rusqlite::Connection, group_id: &str) -> ApiResult<Group> {
    conn.query_row(
        &format!("SELECT {} FROM groups WHERE id = ?1", Group::COLUMNS),
        params![group_id],
        Group::from_row,
    )
    .map_err(|_| ApiError::NotFound("Group not found".to_string()))
}

fn load_members(conn: &rusqlite::Connection, group_id: &str) -> Vec<GroupMember> {
    let mut stmt = match conn.prepare(
        "SELECT a.id, a.name, a.handle, a.avatar_url, gm.role, gm.joined_at
         FROM group_members gm JOIN agents a ON a.id = gm.agent_id
         WHERE gm.group_id = ?1
         ORDER BY gm.joined_at ASC",
    ) {
        Ok(s) => s,
        Err(_) => return Vec::new(),
    };
    stmt.query_map(params![group_id], |row| {
        Ok(GroupMember {
            agent: AgentSummary {
                id: row.get(0)?,
                name: row.get(1)?,
                handle: row.get(2)?,
                avatar_url: row.get(3)?,
            },
            role: row.get(4)?,
            joined_at: row.get(5)?,
        })
    })
    .map(|rows| rows.filter_map(|r| r.ok()).collect())
    .unwrap_or_default()
}

fn admin_count(conn: &rusqlite::Connection, group_id: &str) -> i64 {
    conn.query_row(
        "SELECT COUNT(*) FROM group_members WHERE group_id = ?1 AND role = 'admin'",
        params![group_id],
        |r| r.get(0),
    )
    .unwrap_or(0)
}

/// Create a group. The creator becomes its admin in the same transaction.
#[post("/api/groups", format = "json", data = "<body>")]
pub fn create_group(
    db: &State<Db>,
    events: &State<EventBus>,
    rate_limiter: &State<RateLimiter>,
    rate_config: &State<RateLimitConfig>,
    ip: ClientIp,
    actor: AuthedAgent,
    body: Json<CreateGroupRequest>,
) -> Result<RateLimited<serde_json::Value>, ApiError> {
    let rl = rate_limiter.enforce(
        &format!("create_group:{}", ip.0),
        rate_config.groups_max,
        rate_config.groups_window_secs,
        "groups",
    )?;

    let name = body.name.trim().to_string();
    if name.is_empty() || name.len() > 100 {
        return Err(ApiError::Invalid(
            "Group name must be 1-100 characters".to_string(),
        ));
    }
    let description = body
        .description
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty());

    let group_id = db
        .create_group_with_admin(&actor.id, &name, description, body.is_public)
        .map_err(|e| ApiError::from_sqlite(e, &format!("A group named '{name}' already exists")))?;

    let conn = db.conn();
    let group = load_group(&conn, &group_id)?;
    events.publish_all(ChatEvent::GroupCreated(group.clone()));

    Ok(RateLimited::new(
        Json(serde_json::json!({
            "success": true,
            "group": group,
            "yourRole": "admin",
        })),
        rl,
    ))
}

/// List public groups with member counts.
#[get("/api/groups")]
pub fn list_groups(db: &State<Db>, _actor: AuthedAgent) -> ApiResult<Json<serde_json::Value>> {
    let conn = db.conn();
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {}, (SELECT COUNT(*) FROM group_members WHERE group_id = g.id) AS member_count
             FROM groups g WHERE g.is_public = 1 ORDER BY g.name",
            Group::COLUMNS
        ))
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    let groups: Vec<serde_json::Value> = stmt
        .query_map([], |row| {
            let group = Group::from_row(row)?;
            let member_count: i64 = row.get(8)?;
            Ok((group, member_count))
        })
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .filter_map(|r| r.ok())
        .map(|(group, member_count)| {
            let mut v = serde_json::to_value(&group).unwrap_or_default();
            v["memberCount"] = serde_json::json!(member_count);
            v
        })
        .collect();

    Ok(Json(serde_json::json!({
        "success": true,
        "groups": groups,
        "count": groups.len(),
    })))
}

/// Group detail with members. Private groups are visible to members only.
#[get("/api/groups/<group_id>")]
pub fn get_group(
    db: &State<Db>,
    actor: AuthedAgent,
    group_id: &str,
) -> ApiResult<Json<serde_json::Value>> {
    let conn = db.conn();
    let group = load_group(&conn, group_id)?;
    if !group.is_public && member_role(&conn, group_id, &actor.id).is_none() {
        return Err(ApiError::NotFound("Group not found".to_string()));
    }
    let members = load_members(&conn, group_id);

    Ok(Json(serde_json::json!({
        "success": true,
        "group": group,
        "members": members,
    })))
}

/// Join a public group.
#[post("/api/groups/<group_id>/join")]
pub fn join_group(
    db: &State<Db>,
    events: &State<EventBus>,
    actor: AuthedAgent,
    group_id: &str,
) -> ApiResult<Json<serde_json::Value>> {
    let conn = db.conn();
    let group = load_group(&conn, group_id)?;
    if !group.is_public {
        return Err(ApiError::Forbidden(
            "This group is private; you must be invited".to_string(),
        ));
    }

    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO group_members (group_id, agent_id, role, joined_at) VALUES (?1, ?2, 'member', ?3)",
        params![group_id, &actor.id, &now],
    )
    .map_err(|e| ApiError::from_sqlite(e, "You are already a member of this group"))?;

    let agent = AgentSummary {
        id: actor.id.clone(),
        name: actor.name.clone(),
        handle: actor.handle.clone(),
        avatar_url: conn
            .query_row(
                "SELECT avatar_url FROM agents WHERE id = ?1",
                params![&actor.id],
                |r| r.get(0),
            )
            .ok()
            .flatten(),
    };
    events.publish(
        group_room(group_id),
        ChatEvent::MemberJoined {
            group_id: group_id.to_string(),
            agent,
        },
    );

    Ok(Json(
        serde_json::json!({"success": true, "role": "member"}),
    ))
}

/// Leave a group. The last admin cannot leave; promote someone or delete
/// the group instead.
#[post("/api/groups/<group_id>/leave")]
pub fn leave_group(
    db: &State<Db>,
    events: &State<EventBus>,
    actor: AuthedAgent,
    group_id: &str,
) -> ApiResult<Json<serde_json::Value>> {
    let conn = db.conn();
    load_group(&conn, group_id)?;
    let role = member_role(&conn, group_id, &actor.id)
        .ok_or_else(|| ApiError::NotFound("You are not a member of this group".to_string()))?;

    if role == Role::Admin && admin_count(&conn, group_id) <= 1 {
        return Err(ApiError::PreconditionFailed(
            "The last admin cannot leave; promote another member or delete the group".to_string(),
        ));
    }

    conn.execute(
        "DELETE FROM group_members WHERE group_id = ?1 AND agent_id = ?2",
        params![group_id, &actor.id],
    )
    .map_err(|e| ApiError::Internal(e.to_string()))?;

    events.publish(
        group_room(group_id),
        ChatEvent::MemberLeft {
            group_id: group_id.to_string(),
            agent_id: actor.id.clone(),
        },
    );

    Ok(Json(serde_json::json!({"success": true})))
}

/// Resolved settings for members: role counts, permissions, pinned messages
/// and the caller's role.
#[get("/api/groups/<group_id>/settings")]
pub fn get_group_settings(
    db: &State<Db>,
    actor: AuthedAgent,
    group_id: &str,
) -> ApiResult<Json<serde_json::Value>> {
    let conn = db.conn();
    let group = load_group(&conn, group_id)?;
    let role = member_role(&conn, group_id, &actor.id)
        .ok_or_else(|| ApiError::Forbidden("You are not a member of this group".to_string()))?;

    let mut role_counts = serde_json::Map::new();
    for r in [Role::Admin, Role::Moderator, Role::Member] {
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM group_members WHERE group_id = ?1 AND role = ?2",
                params![group_id, r.as_str()],
                |row| row.get(0),
            )
            .unwrap_or(0);
        role_counts.insert(r.as_str().to_string(), serde_json::json!(count));
    }

    let pinned = super::messages::pinned_messages(&conn, group_id);

    Ok(Json(serde_json::json!({
        "success": true,
        "group": group,
        "roleCounts": role_counts,
        "permissions": resolved_permissions(&conn, group_id),
        "pinned": pinned,
        "yourRole": role.as_str(),
    })))
}

/// Update name/description/avatar. Each field is gated by its own action.
#[patch("/api/groups/<group_id>/settings", format = "json", data = "<body>")]
pub fn update_group_settings(
    db: &State<Db>,
    events: &State<EventBus>,
    actor: AuthedAgent,
    group_id: &str,
    body: Json<UpdateGroupSettingsRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let conn = db.conn();
    load_group(&conn, group_id)?;

    let fields: [(Option<&str>, GroupAction); 3] = [
        (body.name.as_deref(), GroupAction::RenameGroup),
        (body.description.as_deref(), GroupAction::EditDescription),
        (body.avatar_url.as_deref(), GroupAction::EditAvatar),
    ];
    for (value, action) in fields {
        if value.is_none() {
            continue;
        }
        let check = check_group_permission(&conn, group_id, &actor.id, action);
        if !check.allowed {
            return Err(ApiError::Forbidden(
                check
                    .reason
                    .unwrap_or_else(|| "Permission denied".to_string()),
            ));
        }
    }

    if let Some(name) = body.name.as_deref().map(str::trim) {
        if name.is_empty() || name.len() > 100 {
            return Err(ApiError::Invalid(
                "Group name must be 1-100 characters".to_string(),
            ));
        }
        conn.execute(
            "UPDATE groups SET name = ?1 WHERE id = ?2",
            params![name, group_id],
        )
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    }
    if let Some(description) = body.description.as_deref().map(str::trim) {
        conn.execute(
            "UPDATE groups SET description = ?1 WHERE id = ?2",
            params![description, group_id],
        )
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    }
    if let Some(avatar) = body.avatar_url.as_deref().map(str::trim) {
        if !(avatar.starts_with("http://") || avatar.starts_with("https://")) {
            return Err(ApiError::Invalid(
                "Avatar must be an http(s) URL".to_string(),
            ));
        }
        conn.execute(
            "UPDATE groups SET avatar_url = ?1 WHERE id = ?2",
            params![avatar, group_id],
        )
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    }

    let group = load_group(&conn, group_id)?;
    events.publish(group_room(group_id), ChatEvent::GroupUpdated(group.clone()));

    Ok(Json(serde_json::json!({"success": true, "group": group})))
}

/// Replace permission overrides. Admin only; `deleteGroup` stays admin.
#[put("/api/groups/<group_id>/permissions", format = "json", data = "<body>")]
pub fn update_permissions(
    db: &State<Db>,
    events: &State<EventBus>,
    actor: AuthedAgent,
    group_id: &str,
    body: Json<PermissionOverridesRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let conn = db.conn();
    load_group(&conn, group_id)?;
    let role = member_role(&conn, group_id, &actor.id)
        .ok_or_else(|| ApiError::Forbidden("You are not a member of this group".to_string()))?;
    if role != Role::Admin {
        return Err(ApiError::Forbidden(
            "Only admins can change group permissions".to_string(),
        ));
    }

    let requested: [(GroupAction, &Option<String>); 9] = [
        (GroupAction::RenameGroup, &body.rename_group),
        (GroupAction::EditDescription, &body.edit_description),
        (GroupAction::EditAvatar, &body.edit_avatar),
        (GroupAction::DeleteGroup, &body.delete_group),
        (GroupAction::RemoveMembers, &body.remove_members),
        (GroupAction::SetRoles, &body.set_roles),
        (GroupAction::InviteMembers, &body.invite_members),
        (GroupAction::PinMessages, &body.pin_messages),
        (GroupAction::DeleteAnyMessage, &body.delete_any_message),
    ];

    let mut resolved: Vec<(GroupAction, Role)> = Vec::with_capacity(9);
    for (action, value) in requested {
        let required = match value.as_deref() {
            Some(v) => Role::parse(v).ok_or_else(|| {
                ApiError::Invalid(format!("'{v}' is not a valid role for {}", action.key()))
            })?,
            None => action.default_role(),
        };
        if action.locked() && required != Role::Admin {
            return Err(ApiError::Invalid(
                "deleteGroup is locked to the admin role".to_string(),
            ));
        }
        resolved.push((action, required));
    }

    let set_clause = resolved
        .iter()
        .map(|(action, role)| format!("{} = '{}'", action.column(), role.as_str()))
        .collect::<Vec<_>>()
        .join(", ");
    conn.execute(
        "INSERT OR IGNORE INTO group_permissions (group_id) VALUES (?1)",
        params![group_id],
    )
    .map_err(|e| ApiError::Internal(e.to_string()))?;
    conn.execute(
        &format!("UPDATE group_permissions SET {set_clause} WHERE group_id = ?1"),
        params![group_id],
    )
    .map_err(|e| ApiError::Internal(e.to_string()))?;

    let permissions = resolved_permissions(&conn, group_id);
    events.publish(
        group_room(group_id),
        ChatEvent::GroupPermissionsUpdated {
            group_id: group_id.to_string(),
            permissions: permissions.clone(),
        },
    );

    Ok(Json(serde_json::json!({
        "success": true,
        "permissions": permissions,
    })))
}

/// Delete the group; cascades to members, messages, reactions and pins.
#[delete("/api/groups/<group_id>")]
pub fn delete_group(
    db: &State<Db>,
    events: &State<EventBus>,
    actor: AuthedAgent,
    group_id: &str,
) -> ApiResult<Json<serde_json::Value>> {
    {
        let conn = db.conn();
        load_group(&conn, group_id)?;
        let check = check_group_permission(&conn, group_id, &actor.id, GroupAction::DeleteGroup);
        if !check.allowed {
            return Err(ApiError::Forbidden(
                check
                    .reason
                    .unwrap_or_else(|| "Only admins can delete a group".to_string()),
            ));
        }
    }

    db.delete_group(group_id)
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    events.publish_all(ChatEvent::GroupDeleted {
        group_id: group_id.to_string(),
    });

    Ok(Json(serde_json::json!({"success": true})))
}

/// Remove a member. Requires the removeMembers action and strict role
/// dominance over the target.
#[delete("/api/groups/<group_id>/members/<agent_id>")]
pub fn remove_member(
    db: &State<Db>,
    events: &State<EventBus>,
    actor: AuthedAgent,
    group_id: &str,
    agent_id: &str,
) -> ApiResult<Json<serde_json::Value>> {
    if agent_id == actor.id {
        return Err(ApiError::Invalid(
            "Use the leave endpoint to remove yourself".to_string(),
        ));
    }

    let conn = db.conn();
    load_group(&conn, group_id)?;
    let check = check_group_permission(&conn, group_id, &actor.id, GroupAction::RemoveMembers);
    if !check.allowed {
        return Err(ApiError::Forbidden(
            check
                .reason
                .unwrap_or_else(|| "Permission denied".to_string()),
        ));
    }
    let actor_role = check.actor_role.unwrap_or(Role::Member);
    let target_role = member_role(&conn, group_id, agent_id)
        .ok_or_else(|| ApiError::NotFound("That agent is not a member of this group".to_string()))?;
    if !can_modify_role(actor_role, target_role) {
        return Err(ApiError::PreconditionFailed(
            "You can only remove members below your own role".to_string(),
        ));
    }

    conn.execute(
        "DELETE FROM group_members WHERE group_id = ?1 AND agent_id = ?2",
        params![group_id, agent_id],
    )
    .map_err(|e| ApiError::Internal(e.to_string()))?;

    events.publish(
        group_room(group_id),
        ChatEvent::MemberRemoved {
            group_id: group_id.to_string(),
            agent_id: agent_id.to_string(),
            removed_by: actor.id.clone(),
        },
    );
    // The removed agent may not be subscribed to the group room anymore.
    events.publish(
        agent_room(agent_id),
        ChatEvent::MemberRemoved {
            group_id: group_id.to_string(),
            agent_id: agent_id.to_string(),
            removed_by: actor.id.clone(),
        },
    );

    Ok(Json(serde_json::json!({"success": true})))
}

/// Change a member's role. Requires setRoles, strict dominance over both the
/// target's current role and the new role; own role is immutable.
#[patch(
    "/api/groups/<group_id>/members/<agent_id>/role",
    format = "json",
    data = "<body>"
)]
pub fn set_member_role(
    db: &State<Db>,
    events: &State<EventBus>,
    actor: AuthedAgent,
    group_id: &str,
    agent_id: &str,
    body: Json<SetRoleRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let new_role = Role::parse(body.role.trim())
        .ok_or_else(|| ApiError::Invalid(format!("'{}' is not a valid role", body.role)))?;
    if agent_id == actor.id {
        return Err(ApiError::PreconditionFailed(
            "You cannot change your own role".to_string(),
        ));
    }

    let conn = db.conn();
    load_group(&conn, group_id)?;
    let check = check_group_permission(&conn, group_id, &actor.id, GroupAction::SetRoles);
    if !check.allowed {
        return Err(ApiError::Forbidden(
            check
                .reason
                .unwrap_or_else(|| "Permission denied".to_string()),
        ));
    }
    let actor_role = check.actor_role.unwrap_or(Role::Member);
    let target_role = member_role(&conn, group_id, agent_id)
        .ok_or_else(|| ApiError::NotFound("That agent is not a member of this group".to_string()))?;
    if !can_modify_role(actor_role, target_role) || !can_modify_role(actor_role, new_role) {
        return Err(ApiError::PreconditionFailed(
            "You can only assign roles strictly below your own".to_string(),
        ));
    }

    conn.execute(
        "UPDATE group_members SET role = ?1 WHERE group_id = ?2 AND agent_id = ?3",
        params![new_role.as_str(), group_id, agent_id],
    )
    .map_err(|e| ApiError::Internal(e.to_string()))?;

    events.publish(
        group_room(group_id),
        ChatEvent::MemberRoleChanged {
            group_id: group_id.to_string(),
            agent_id: agent_id.to_string(),
            role: new_role.as_str().to_string(),
        },
    );

    Ok(Json(
        serde_json::json!({"success": true, "role": new_role.as_str()}),
    ))
}
