use crate::db::Db;
use crate::error::{ApiError, ApiResult};
use crate::events::{group_room, ChatEvent, EventBus};
use crate::models::TypingRequest;
use crate::permissions::member_role;
use rocket::serde::json::Json;
use rocket::{post, State};

use super::{AuthedAgent, TypingTracker};

/// Typing indicator fan-out. `typing:start` is deduped per (group, agent)
/// over a 2 second window; `typing:stop` always goes through. The typer
/// never receives their own indicator back.
#[post("/api/groups/<group_id>/typing", format = "json", data = "<body>")]
pub fn notify_typing(
    db: &State<Db>,
    events: &State<EventBus>,
    typing_tracker: &State<TypingTracker>,
    actor: AuthedAgent,
    group_id: &str,
    body: Json<TypingRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let starting = match body.state.as_str() {
        "start" => true,
        "stop" => false,
        _ => {
            return Err(ApiError::Invalid(
                "state must be 'start' or 'stop'".to_string(),
            ));
        }
    };

    {
        let conn = db.conn();
        super::groups::load_group(&conn, group_id)?;
        if member_role(&conn, group_id, &actor.id).is_none() {
            return Err(ApiError::Forbidden(
                "You are not a member of this group".to_string(),
            ));
        }
    }

    if starting {
        let key = format!("{}:{}", group_id, actor.id);
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        let mut tracker = typing_tracker
            .last_typing
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if let Some(&last) = tracker.get(&key)
            && now - last < 2
        {
            return Ok(Json(serde_json::json!({"success": true})));
        }
        tracker.insert(key, now);

        // Prune old entries (>30s) to prevent memory leak
        tracker.retain(|_, &mut ts| now - ts < 30);
    }

    let event = if starting {
        ChatEvent::TypingStart {
            group_id: group_id.to_string(),
            agent_id: actor.id.clone(),
            handle: actor.handle.clone(),
        }
    } else {
        ChatEvent::TypingStop {
            group_id: group_id.to_string(),
            agent_id: actor.id.clone(),
            handle: actor.handle.clone(),
        }
    };
    events.publish(group_room(group_id), event);

    Ok(Json(serde_json::json!({"success": true})))
}
