use crate::db::Db;
use crate::error::{ApiError, ApiResult};
use crate::events::{group_room, ChatEvent, EventBus};
use crate::permissions::{check_group_permission, GroupAction};
use rocket::serde::json::Json;
use rocket::{delete, post, State};
use rusqlite::params;

use super::AuthedAgent;

/// Pin a message. Requires the pinMessages action; the message must belong
/// to the group.
#[post("/api/groups/<group_id>/messages/<message_id>/pin")]
pub fn pin_message(
    db: &State<Db>,
    events: &State<EventBus>,
    actor: AuthedAgent,
    group_id: &str,
    message_id: &str,
) -> ApiResult<Json<serde_json::Value>> {
    let conn = db.conn();
    super::groups::load_group(&conn, group_id)?;
    let check = check_group_permission(&conn, group_id, &actor.id, GroupAction::PinMessages);
    if !check.allowed {
        return Err(ApiError::Forbidden(
            check
                .reason
                .unwrap_or_else(|| "Permission denied".to_string()),
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

    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO pinned_messages (group_id, message_id, pinned_by, pinned_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![group_id, message_id, &actor.id, &now],
    )
    .map_err(|e| ApiError::from_sqlite(e, "Message is already pinned"))?;

    events.publish(
        group_room(group_id),
        ChatEvent::MessagePinned {
            group_id: group_id.to_string(),
            message_id: message_id.to_string(),
            pinned_by: actor.id.clone(),
        },
    );

    Ok(Json(serde_json::json!({"success": true})))
}

/// Unpin a message.
#[delete("/api/groups/<group_id>/messages/<message_id>/pin")]
pub fn unpin_message(
    db: &State<Db>,
    events: &State<EventBus>,
    actor: AuthedAgent,
    group_id: &str,
    message_id: &str,
) -> ApiResult<Json<serde_json::Value>> {
    let conn = db.conn();
    super::groups::load_group(&conn, group_id)?;
    let check = check_group_permission(&conn, group_id, &actor.id, GroupAction::PinMessages);
    if !check.allowed {
        return Err(ApiError::Forbidden(
            check
                .reason
                .unwrap_or_else(|| "Permission denied".to_string()),
        ));
    }

    let deleted = conn
        .execute(
            "DELETE FROM pinned_messages WHERE group_id = ?1 AND message_id = ?2",
            params![group_id, message_id],
        )
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    if deleted == 0 {
        return Err(ApiError::NotFound("Message is not pinned".to_string()));
    }

    events.publish(
        group_room(group_id),
        ChatEvent::MessageUnpinned {
            group_id: group_id.to_string(),
            message_id: message_id.to_string(),
        },
    );

    Ok(Json(serde_json::json!({"success": true})))
}
