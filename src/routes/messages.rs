use crate::db::{self, Db};
use crate::error::{ApiError, ApiResult};
use crate::events::{group_room, ChatEvent, EventBus};
use crate::models::{GroupMessage, SendGroupMessageRequest};
use crate::permissions::{check_group_permission, member_role, GroupAction};
use crate::rate_limit::{RateLimitConfig, RateLimited, RateLimiter};
use rocket::serde::json::Json;
use rocket::{delete, get, post, State};
use rusqlite::{params, Connection};

use super::{AuthedAgent, ClientIp};

/// A message row before enrichment.
pub(crate) struct RawMessage {
    pub id: String,
    pub group_id: String,
    pub agent_id: String,
    pub content: String,
    pub reply_to: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

pub(crate) const RAW_COLUMNS: &str =
    "id, group_id, agent_id, content, reply_to, created_at, updated_at";

pub(crate) fn raw_from_row(row: &rusqlite::Row) -> rusqlite::Result<RawMessage> {
    Ok(RawMessage {
        id: row.get(0)?,
        group_id: row.get(1)?,
        agent_id: row.get(2)?,
        content: row.get(3)?,
        reply_to: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

/// Enrich raw rows into delivery shape. Three batch queries total —
/// reactions, reply previews and author identity/badges — regardless of
/// message count.
pub(crate) fn enrich(conn: &Connection, raws: Vec<RawMessage>) -> Vec<GroupMessage> {
    let message_ids: Vec<String> = raws.iter().map(|m| m.id.clone()).collect();
    let reply_ids: Vec<String> = {
        let mut ids: Vec<String> = raws.iter().filter_map(|m| m.reply_to.clone()).collect();
        ids.sort();
        ids.dedup();
        ids
    };
    let author_ids: Vec<String> = {
        let mut ids: Vec<String> = raws.iter().map(|m| m.agent_id.clone()).collect();
        ids.sort();
        ids.dedup();
        ids
    };

    let mut reactions = db::reaction_summaries(conn, "message_reactions", &message_ids);
    let previews = db::reply_previews(conn, &reply_ids);
    let badges = db::badges_for_agents(conn, &author_ids);
    let authors = db::agent_summaries(conn, &author_ids);

    raws.into_iter()
        .filter_map(|raw| {
            let author = authors.get(&raw.agent_id)?.clone();
            Some(GroupMessage {
                reactions: reactions.remove(&raw.id).unwrap_or_default(),
                reply_to: raw.reply_to.as_ref().and_then(|id| previews.get(id).cloned()),
                author_badges: badges.get(&raw.agent_id).cloned().unwrap_or_default(),
                id: raw.id,
                group_id: raw.group_id,
                author,
                content: raw.content,
                created_at: raw.created_at,
                updated_at: raw.updated_at,
            })
        })
        .collect()
}

/// Pinned messages of a group, enriched, oldest pin first.
pub(crate) fn pinned_messages(conn: &Connection, group_id: &str) -> Vec<GroupMessage> {
    let raws: Vec<RawMessage> = conn
        .prepare(&format!(
            "SELECT {} FROM messages m
             JOIN pinned_messages p ON p.message_id = m.id AND p.group_id = m.group_id
             WHERE m.group_id = ?1
             ORDER BY p.pinned_at ASC",
            RAW_COLUMNS
                .split(", ")
                .map(|c| format!("m.{c}"))
                .collect::<Vec<_>>()
                .join(", ")
        ))
        .and_then(|mut stmt| {
            stmt.query_map(params![group_id], raw_from_row)
                .map(|rows| rows.filter_map(|r| r.ok()).collect())
        })
        .unwrap_or_default();
    enrich(conn, raws)
}

/// List messages, newest `limit` in chronological order. Membership required.
#[get("/api/messages/<group_id>?<limit>&<before>")]
pub fn list_group_messages(
    db: &State<Db>,
    actor: AuthedAgent,
    group_id: &str,
    limit: Option<i64>,
    before: Option<&str>,
) -> ApiResult<Json<serde_json::Value>> {
    let conn = db.conn();
    super::groups::load_group(&conn, group_id)?;
    if member_role(&conn, group_id, &actor.id).is_none() {
        return Err(ApiError::Forbidden(
            "You are not a member of this group".to_string(),
        ));
    }

    let limit = limit.unwrap_or(50).clamp(1, 100);

    let mut raws: Vec<RawMessage> = match before {
        Some(before) => conn
            .prepare(&format!(
                "SELECT {RAW_COLUMNS} FROM messages
                 WHERE group_id = ?1 AND created_at < ?2
                 ORDER BY created_at DESC LIMIT ?3"
            ))
            .and_then(|mut stmt| {
                stmt.query_map(params![group_id, before, limit], raw_from_row)
                    .map(|rows| rows.filter_map(|r| r.ok()).collect())
            })
            .map_err(|e| ApiError::Internal(e.to_string()))?,
        None => conn
            .prepare(&format!(
                "SELECT {RAW_COLUMNS} FROM messages
                 WHERE group_id = ?1
                 ORDER BY created_at DESC LIMIT ?2"
            ))
            .and_then(|mut stmt| {
                stmt.query_map(params![group_id, limit], raw_from_row)
                    .map(|rows| rows.filter_map(|r| r.ok()).collect())
            })
            .map_err(|e| ApiError::Internal(e.to_string()))?,
    };

    // Newest-first fetch, chronological response
    raws.reverse();
    let messages = enrich(&conn, raws);

    Ok(Json(serde_json::json!({
        "success": true,
        "messages": messages,
        "count": messages.len(),
    })))
}

/// Send a message to a group. Membership required; replies must target a
/// message in the same group.
#[post("/api/messages/<group_id>", format = "json", data = "<body>")]
pub fn send_group_message(
    db: &State<Db>,
    events: &State<EventBus>,
    rate_limiter: &State<RateLimiter>,
    rate_config: &State<RateLimitConfig>,
    ip: ClientIp,
    actor: AuthedAgent,
    group_id: &str,
    body: Json<SendGroupMessageRequest>,
) -> Result<RateLimited<serde_json::Value>, ApiError> {
    let rl = rate_limiter.enforce(
        &format!("send_msg:{}", ip.0),
        rate_config.messages_max,
        rate_config.messages_window_secs,
        "messages",
    )?;

    let content = body.content.trim().to_string();
    if content.is_empty() || content.len() > 10_000 {
        return Err(ApiError::Invalid(
            "Content must be 1-10000 characters".to_string(),
        ));
    }

    let conn = db.conn();
    super::groups::load_group(&conn, group_id)?;
    if member_role(&conn, group_id, &actor.id).is_none() {
        return Err(ApiError::Forbidden(
            "You are not a member of this group".to_string(),
        ));
    }

    let reply_to = body
        .reply_to_id
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from);
    if let Some(ref reply_id) = reply_to {
        let in_group: bool = conn
            .query_row(
                "SELECT COUNT(*) FROM messages WHERE id = ?1 AND group_id = ?2",
                params![reply_id, group_id],
                |r| r.get::<_, i64>(0),
            )
            .map(|c| c > 0)
            .unwrap_or(false);
        if !in_group {
            return Err(ApiError::Invalid(
                "The replied-to message is not in this group".to_string(),
            ));
        }
    }

    let id = uuid::Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO messages (id, group_id, agent_id, content, reply_to, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
        params![&id, group_id, &actor.id, &content, &reply_to, &now],
    )
    .map_err(|e| ApiError::Internal(e.to_string()))?;

    let raw = RawMessage {
        id,
        group_id: group_id.to_string(),
        agent_id: actor.id.clone(),
        content,
        reply_to,
        created_at: now.clone(),
        updated_at: now,
    };
    let message = enrich(&conn, vec![raw])
        .pop()
        .ok_or_else(|| ApiError::Internal("Failed to enrich message".to_string()))?;

    events.publish(group_room(group_id), ChatEvent::MessageNew(message.clone()));

    Ok(RateLimited::new(
        Json(serde_json::json!({"success": true, "message": message})),
        rl,
    ))
}

/// Delete a message: author, or anyone holding deleteAnyMessage.
#[delete("/api/messages/<group_id>/<message_id>")]
pub fn delete_group_message(
    db: &State<Db>,
    events: &State<EventBus>,
    actor: AuthedAgent,
    group_id: &str,
    message_id: &str,
) -> ApiResult<Json<serde_json::Value>> {
    let conn = db.conn();
    super::groups::load_group(&conn, group_id)?;

    let author_id: String = conn
        .query_row(
            "SELECT agent_id FROM messages WHERE id = ?1 AND group_id = ?2",
            params![message_id, group_id],
            |r| r.get(0),
        )
        .map_err(|_| ApiError::NotFound("Message not found".to_string()))?;

    if author_id != actor.id {
        let check =
            check_group_permission(&conn, group_id, &actor.id, GroupAction::DeleteAnyMessage);
        if !check.allowed {
            return Err(ApiError::Forbidden(
                "Only the author or a moderator can delete this message".to_string(),
            ));
        }
    }

    conn.execute(
        "DELETE FROM messages WHERE id = ?1 AND group_id = ?2",
        params![message_id, group_id],
    )
    .map_err(|e| ApiError::Internal(e.to_string()))?;

    events.publish(
        group_room(group_id),
        ChatEvent::MessageDeleted {
            group_id: group_id.to_string(),
            message_id: message_id.to_string(),
        },
    );

    Ok(Json(serde_json::json!({"success": true})))
}
