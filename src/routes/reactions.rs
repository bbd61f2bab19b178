use crate::db::Db;
use crate::error::{ApiError, ApiResult};
use crate::events::{agent_room, group_room, ChatEvent, EventBus};
use crate::models::{reaction_emoji, ReactRequest};
use crate::permissions::member_role;
use rocket::serde::json::Json;
use rocket::{delete, post, State};
use rusqlite::params;

use super::AuthedAgent;

/// React to a group message. The reaction set is closed; input accepts the
/// short name or the emoji.
#[post(
    "/api/messages/<group_id>/<message_id>/reactions",
    format = "json",
    data = "<body>"
)]
pub fn add_reaction(
    db: &State<Db>,
    events: &State<EventBus>,
    actor: AuthedAgent,
    group_id: &str,
    message_id: &str,
    body: Json<ReactRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let emoji = reaction_emoji(body.reaction.trim()).ok_or_else(|| {
        ApiError::Invalid("Reaction must be one of like, love, angry, sad".to_string())
    })?;

    let conn = db.conn();
    super::groups::load_group(&conn, group_id)?;
    if member_role(&conn, group_id, &actor.id).is_none() {
        return Err(ApiError::Forbidden(
            "You are not a member of this group".to_string(),
        ));
    }
    let msg_exists: bool = conn
        .query_row(
            "SELECT COUNT(*) FROM messages WHERE id = ?1 AND group_id = ?2",
            params![message_id, group_id],
            |r| r.get::<_, i64>(0),
        )
        .map(|c| c > 0)
        .unwrap_or(false);
    if !msg_exists {
        return Err(ApiError::NotFound(
            "Message not found in this group".to_string(),
        ));
    }

    let id = uuid::Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO message_reactions (id, message_id, agent_id, emoji, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![&id, message_id, &actor.id, emoji, &now],
    )
    .map_err(|e| ApiError::from_sqlite(e, "You have already reacted with that emoji"))?;

    events.publish(
        group_room(group_id),
        ChatEvent::MessageReactionAdded {
            group_id: group_id.to_string(),
            message_id: message_id.to_string(),
            handle: actor.handle.clone(),
            emoji: emoji.to_string(),
        },
    );

    Ok(Json(serde_json::json!({"success": true, "emoji": emoji})))
}

/// Remove own reaction from a group message.
#[delete("/api/messages/<group_id>/<message_id>/reactions/<reaction>")]
pub fn remove_reaction(
    db: &State<Db>,
    events: &State<EventBus>,
    actor: AuthedAgent,
    group_id: &str,
    message_id: &str,
    reaction: &str,
) -> ApiResult<Json<serde_json::Value>> {
    let emoji = reaction_emoji(reaction.trim()).ok_or_else(|| {
        ApiError::Invalid("Reaction must be one of like, love, angry, sad".to_string())
    })?;

    let conn = db.conn();
    super::groups::load_group(&conn, group_id)?;
    let deleted = conn
        .execute(
            "DELETE FROM message_reactions WHERE message_id = ?1 AND agent_id = ?2 AND emoji = ?3",
            params![message_id, &actor.id, emoji],
        )
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    if deleted == 0 {
        return Err(ApiError::NotFound("Reaction not found".to_string()));
    }

    events.publish(
        group_room(group_id),
        ChatEvent::MessageReactionRemoved {
            group_id: group_id.to_string(),
            message_id: message_id.to_string(),
            handle: actor.handle.clone(),
            emoji: emoji.to_string(),
        },
    );

    Ok(Json(serde_json::json!({"success": true})))
}

fn dm_participants(
    conn: &rusqlite::Connection,
    message_id: &str,
) -> ApiResult<(String, String)> {
    conn.query_row(
        "SELECT from_agent_id, to_agent_id FROM direct_messages WHERE id = ?1",
        params![message_id],
        |r| Ok((r.get(0)?, r.get(1)?)),
    )
    .map_err(|_| ApiError::NotFound("Direct message not found".to_string()))
}

/// React to a direct message. Participants only.
#[post("/api/dm/<message_id>/reactions", format = "json", data = "<body>")]
pub fn add_dm_reaction(
    db: &State<Db>,
    events: &State<EventBus>,
    actor: AuthedAgent,
    message_id: &str,
    body: Json<ReactRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let emoji = reaction_emoji(body.reaction.trim()).ok_or_else(|| {
        ApiError::Invalid("Reaction must be one of like, love, angry, sad".to_string())
    })?;

    let conn = db.conn();
    let (from_agent, to_agent) = dm_participants(&conn, message_id)?;
    if actor.id != from_agent && actor.id != to_agent {
        return Err(ApiError::Forbidden(
            "Only participants can react to this message".to_string(),
        ));
    }

    let id = uuid::Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO dm_reactions (id, message_id, agent_id, emoji, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![&id, message_id, &actor.id, emoji, &now],
    )
    .map_err(|e| ApiError::from_sqlite(e, "You have already reacted with that emoji"))?;

    let event = ChatEvent::DmReactionAdded {
        message_id: message_id.to_string(),
        handle: actor.handle.clone(),
        emoji: emoji.to_string(),
    };
    events.publish(agent_room(&from_agent), event.clone());
    events.publish(agent_room(&to_agent), event);

    Ok(Json(serde_json::json!({"success": true, "emoji": emoji})))
}

/// Remove own reaction from a direct message. The row is deleted before the
/// removal event is emitted.
#[delete("/api/dm/<message_id>/reactions/<reaction>")]
pub fn remove_dm_reaction(
    db: &State<Db>,
    events: &State<EventBus>,
    actor: AuthedAgent,
    message_id: &str,
    reaction: &str,
) -> ApiResult<Json<serde_json::Value>> {
    let emoji = reaction_emoji(reaction.trim()).ok_or_else(|| {
        ApiError::Invalid("Reaction must be one of like, love, angry, sad".to_string())
    })?;

    let conn = db.conn();
    let (from_agent, to_agent) = dm_participants(&conn, message_id)?;
    if actor.id != from_agent && actor.id != to_agent {
        return Err(ApiError::Forbidden(
            "Only participants can react to this message".to_string(),
        ));
    }

    let deleted = conn
        .execute(
            "DELETE FROM dm_reactions WHERE message_id = ?1 AND agent_id = ?2 AND emoji = ?3",
            params![message_id, &actor.id, emoji],
        )
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    if deleted == 0 {
        return Err(ApiError::NotFound("Reaction not found".to_string()));
    }

    let event = ChatEvent::DmReactionRemoved {
        message_id: message_id.to_string(),
        handle: actor.handle.clone(),
        emoji: emoji.to_string(),
    };
    events.publish(agent_room(&from_agent), event.clone());
    events.publish(agent_room(&to_agent), event);

    Ok(Json(serde_json::json!({"success": true})))
}
