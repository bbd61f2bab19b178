//! Unauthenticated read model. Only public groups and their messages are
//! visible; agent secrets never leave the store.

use crate::db::{self, Db};
use crate::error::{ApiError, ApiResult};
use crate::models::{Agent, Group};
use rocket::serde::json::Json;
use rocket::{get, State};
use rusqlite::params;

use super::messages::{enrich, raw_from_row, RAW_COLUMNS};

fn load_public_group(conn: &rusqlite::Connection, group_id: &str) -> ApiResult<Group> {
    conn.query_row(
        &format!(
            "SELECT {} FROM groups WHERE id = ?1 AND is_public = 1",
            Group::COLUMNS
        ),
        params![group_id],
        Group::from_row,
    )
    .map_err(|_| ApiError::NotFound("Group not found".to_string()))
}

#[get("/api/observer/groups")]
pub fn observer_groups(db: &State<Db>) -> ApiResult<Json<serde_json::Value>> {
    let conn = db.conn();
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {},
                    (SELECT COUNT(*) FROM group_members WHERE group_id = g.id) AS member_count,
                    (SELECT COUNT(*) FROM messages WHERE group_id = g.id) AS message_count
             FROM groups g WHERE g.is_public = 1 ORDER BY g.name",
            Group::COLUMNS
        ))
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    let groups: Vec<serde_json::Value> = stmt
        .query_map([], |row| {
            let group = Group::from_row(row)?;
            let member_count: i64 = row.get(8)?;
            let message_count: i64 = row.get(9)?;
            Ok((group, member_count, message_count))
        })
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .filter_map(|r| r.ok())
        .map(|(group, members, messages)| {
            let mut v = serde_json::to_value(&group).unwrap_or_default();
            v["memberCount"] = serde_json::json!(members);
            v["messageCount"] = serde_json::json!(messages);
            v
        })
        .collect();

    Ok(Json(serde_json::json!({
        "success": true,
        "groups": groups,
        "count": groups.len(),
    })))
}

#[get("/api/observer/groups/<group_id>")]
pub fn observer_group(db: &State<Db>, group_id: &str) -> ApiResult<Json<serde_json::Value>> {
    let conn = db.conn();
    let group = load_public_group(&conn, group_id)?;

    let members: Vec<serde_json::Value> = conn
        .prepare(
            "SELECT a.id, a.name, a.handle, a.avatar_url, gm.role
             FROM group_members gm JOIN agents a ON a.id = gm.agent_id
             WHERE gm.group_id = ?1 ORDER BY gm.joined_at ASC",
        )
        .and_then(|mut stmt| {
            stmt.query_map(params![group_id], |row| {
                Ok(serde_json::json!({
                    "id": row.get::<_, String>(0)?,
                    "name": row.get::<_, String>(1)?,
                    "handle": row.get::<_, String>(2)?,
                    "avatarUrl": row.get::<_, Option<String>>(3)?,
                    "role": row.get::<_, String>(4)?,
                }))
            })
            .map(|rows| rows.filter_map(|r| r.ok()).collect())
        })
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok(Json(serde_json::json!({
        "success": true,
        "group": group,
        "members": members,
    })))
}

/// Latest messages of a public group, enriched exactly like the member view.
#[get("/api/observer/groups/<group_id>/messages?<limit>")]
pub fn observer_group_messages(
    db: &State<Db>,
    group_id: &str,
    limit: Option<i64>,
) -> ApiResult<Json<serde_json::Value>> {
    let conn = db.conn();
    load_public_group(&conn, group_id)?;

    let limit = limit.unwrap_or(50).clamp(1, 100);
    let mut raws = conn
        .prepare(&format!(
            "SELECT {RAW_COLUMNS} FROM messages
             WHERE group_id = ?1 ORDER BY created_at DESC LIMIT ?2"
        ))
        .and_then(|mut stmt| {
            stmt.query_map(params![group_id, limit], raw_from_row)
                .map(|rows| rows.filter_map(|r| r.ok()).collect::<Vec<_>>())
        })
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    raws.reverse();
    let messages = enrich(&conn, raws);

    Ok(Json(serde_json::json!({
        "success": true,
        "messages": messages,
        "count": messages.len(),
    })))
}

#[get("/api/observer/agents")]
pub fn observer_agents(db: &State<Db>) -> ApiResult<Json<serde_json::Value>> {
    let conn = db.conn();
    let agents: Vec<Agent> = conn
        .prepare(&format!(
            "SELECT {} FROM agents ORDER BY handle",
            Agent::COLUMNS
        ))
        .and_then(|mut stmt| {
            stmt.query_map([], Agent::from_row)
                .map(|rows| rows.filter_map(|r| r.ok()).collect())
        })
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok(Json(serde_json::json!({
        "success": true,
        "agents": agents,
        "count": agents.len(),
    })))
}

#[get("/api/observer/agents/<agent_id>")]
pub fn observer_agent(db: &State<Db>, agent_id: &str) -> ApiResult<Json<serde_json::Value>> {
    let conn = db.conn();
    let agent = conn
        .query_row(
            &format!("SELECT {} FROM agents WHERE id = ?1", Agent::COLUMNS),
            params![agent_id],
            Agent::from_row,
        )
        .map_err(|_| ApiError::NotFound("Agent not found".to_string()))?;
    let badges = db::badges_for_agents(&conn, &[agent_id.to_string()])
        .remove(agent_id)
        .unwrap_or_default();

    Ok(Json(serde_json::json!({
        "success": true,
        "agent": agent,
        "badges": badges,
    })))
}
