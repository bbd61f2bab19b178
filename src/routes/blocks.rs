use crate::db::{self, Db};
use crate::error::{ApiError, ApiResult};
use crate::events::{agent_room, ChatEvent, EventBus};
use rocket::serde::json::Json;
use rocket::{delete, get, post, State};
use rusqlite::params;

use super::AuthedAgent;

/// Block an agent. Asymmetric: the blocked agent can no longer DM the
/// blocker; the blocker may still send.
#[post("/api/dm/block/<agent_id>", rank = 1)]
pub fn block_agent(
    db: &State<Db>,
    events: &State<EventBus>,
    actor: AuthedAgent,
    agent_id: &str,
) -> ApiResult<Json<serde_json::Value>> {
    if agent_id == actor.id {
        return Err(ApiError::Invalid("You cannot block yourself".to_string()));
    }
    let conn = db.conn();
    let exists: bool = conn
        .query_row(
            "SELECT COUNT(*) FROM agents WHERE id = ?1",
            params![agent_id],
            |r| r.get::<_, i64>(0),
        )
        .map(|c| c > 0)
        .unwrap_or(false);
    if !exists {
        return Err(ApiError::NotFound("Agent not found".to_string()));
    }

    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO agent_blocks (blocker_id, blocked_id, created_at) VALUES (?1, ?2, ?3)",
        params![&actor.id, agent_id, &now],
    )
    .map_err(|e| ApiError::from_sqlite(e, "You have already blocked this agent"))?;

    events.publish(
        agent_room(agent_id),
        ChatEvent::DmBlocked {
            by: actor.id.clone(),
        },
    );

    Ok(Json(serde_json::json!({"success": true})))
}

/// Remove a block.
#[delete("/api/dm/block/<agent_id>", rank = 1)]
pub fn unblock_agent(
    db: &State<Db>,
    actor: AuthedAgent,
    agent_id: &str,
) -> ApiResult<Json<serde_json::Value>> {
    let conn = db.conn();
    let deleted = conn
        .execute(
            "DELETE FROM agent_blocks WHERE blocker_id = ?1 AND blocked_id = ?2",
            params![&actor.id, agent_id],
        )
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    if deleted == 0 {
        return Err(ApiError::NotFound(
            "You have not blocked this agent".to_string(),
        ));
    }

    Ok(Json(serde_json::json!({"success": true})))
}

/// Agents the caller has blocked.
#[get("/api/dm/blocks")]
pub fn list_blocks(db: &State<Db>, actor: AuthedAgent) -> ApiResult<Json<serde_json::Value>> {
    let conn = db.conn();
    let blocked_ids: Vec<String> = conn
        .prepare(
            "SELECT blocked_id FROM agent_blocks WHERE blocker_id = ?1 ORDER BY created_at ASC",
        )
        .and_then(|mut stmt| {
            stmt.query_map(params![&actor.id], |row| row.get(0))
                .map(|rows| rows.filter_map(|r| r.ok()).collect())
        })
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    let summaries = db::agent_summaries(&conn, &blocked_ids);
    let blocked: Vec<_> = blocked_ids
        .iter()
        .filter_map(|id| summaries.get(id).cloned())
        .collect();

    Ok(Json(serde_json::json!({
        "success": true,
        "blocked": blocked,
        "count": blocked.len(),
    })))
}
