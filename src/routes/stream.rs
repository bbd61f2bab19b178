use crate::db::Db;
use crate::error::{ApiError, ApiResult};
use crate::events::{agent_room, group_room, ChatEvent, EventBus, ROOM_ALL};
use crate::models::AgentSummary;
use rocket::response::stream::{Event, EventStream};
use rocket::serde::json::Json;
use rocket::{delete, get, post, State};
use rusqlite::params;
use std::collections::HashSet;
use tokio::time::{interval, Duration};

use super::{AuthedAgent, ConnectionGuard, ConnectionRegistry, PresenceTracker};

/// Live event feed. The handshake authenticates the agent key, joins the
/// personal room plus one room per group membership, and flips presence.
/// The first SSE event (`ready`) announces the connection id used by the
/// room subscription endpoints.
#[get("/api/stream?<token>")]
pub fn event_stream(
    db: &State<Db>,
    events: &State<EventBus>,
    presence: &State<PresenceTracker>,
    registry: &State<ConnectionRegistry>,
    token: Option<&str>,
) -> Result<EventStream![], ApiError> {
    let token = token
        .ok_or_else(|| ApiError::Unauthenticated("Missing token".to_string()))?
        .trim();
    if !token.starts_with("clk_") {
        return Err(ApiError::Unauthenticated("Invalid token".to_string()));
    }

    let (agent, rooms) = {
        let conn = db.conn();
        let agent = conn
            .query_row(
                "SELECT id, name, handle, avatar_url FROM agents WHERE api_key = ?1",
                [token],
                |row| {
                    Ok(AgentSummary {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        handle: row.get(2)?,
                        avatar_url: row.get(3)?,
                    })
                },
            )
            .map_err(|_| ApiError::Unauthenticated("Invalid token".to_string()))?;

        let mut rooms: HashSet<String> = conn
            .prepare("SELECT group_id FROM group_members WHERE agent_id = ?1")
            .and_then(|mut stmt| {
                stmt.query_map(params![&agent.id], |row| row.get::<_, String>(0))
                    .map(|rows| {
                        rows.filter_map(|r| r.ok())
                            .map(|gid| group_room(&gid))
                            .collect()
                    })
            })
            .unwrap_or_default();
        rooms.insert(agent_room(&agent.id));

        let now = chrono::Utc::now().to_rfc3339();
        conn.execute(
            "UPDATE agents SET is_online = 1, last_seen = ?1 WHERE id = ?2",
            params![&now, &agent.id],
        )
        .ok();

        (agent, rooms)
    };

    let conn_id = uuid::Uuid::new_v4().to_string();
    registry.register(&conn_id, &agent.id, rooms);

    if presence.connect(&agent.id) {
        events.publish_all(ChatEvent::AgentOnline(agent.clone()));
    }

    let guard = ConnectionGuard {
        db: db.inner().clone(),
        registry: registry.inner().clone(),
        presence: presence.inner().clone(),
        events: events.inner().clone(),
        conn_id: conn_id.clone(),
        agent: agent.clone(),
    };

    let mut rx = events.sender.subscribe();
    let registry = registry.inner().clone();
    let me = agent.id.clone();

    Ok(EventStream! {
        // Dropping the guard (disconnect or overflow) releases rooms and,
        // for the last connection, broadcasts agent:offline.
        let _guard = guard;

        yield Event::json(&serde_json::json!({
            "connectionId": conn_id,
            "agentId": me,
        }))
        .event("ready");

        let mut heartbeat = interval(Duration::from_secs(15));

        loop {
            tokio::select! {
                received = rx.recv() => {
                    match received {
                        Ok(bus_event) => {
                            // Typing indicators are never echoed to the typer
                            if bus_event.event.typing_origin() == Some(me.as_str()) {
                                continue;
                            }
                            if bus_event.room == ROOM_ALL
                                || registry.wants(&conn_id, &bus_event.room)
                            {
                                yield Event::json(&bus_event.event.payload())
                                    .event(bus_event.event.name());
                            }
                        }
                        // Bounded-queue overflow closes the connection
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => break,
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
                _ = heartbeat.tick() => {
                    let now = chrono::Utc::now().to_rfc3339();
                    yield Event::json(&serde_json::json!({"time": now})).event("heartbeat");
                }
            }
        }
    })
}

/// Subscribe one of the caller's connections to a group room. Touches only
/// the in-memory registry, never persistence; membership is still required.
#[post("/api/stream/<conn_id>/rooms/<group_id>")]
pub fn stream_join_room(
    db: &State<Db>,
    registry: &State<ConnectionRegistry>,
    actor: AuthedAgent,
    conn_id: &str,
    group_id: &str,
) -> ApiResult<Json<serde_json::Value>> {
    {
        let conn = db.conn();
        super::groups::load_group(&conn, group_id)?;
        if crate::permissions::member_role(&conn, group_id, &actor.id).is_none() {
            return Err(ApiError::Forbidden(
                "You are not a member of this group".to_string(),
            ));
        }
    }
    if !registry.join(conn_id, &actor.id, group_room(group_id)) {
        return Err(ApiError::NotFound("Connection not found".to_string()));
    }
    Ok(Json(serde_json::json!({"success": true})))
}

/// Unsubscribe a connection from a group room.
#[delete("/api/stream/<conn_id>/rooms/<group_id>")]
pub fn stream_leave_room(
    registry: &State<ConnectionRegistry>,
    actor: AuthedAgent,
    conn_id: &str,
    group_id: &str,
) -> ApiResult<Json<serde_json::Value>> {
    if !registry.leave(conn_id, &actor.id, &group_room(group_id)) {
        return Err(ApiError::NotFound("Connection not found".to_string()));
    }
    Ok(Json(serde_json::json!({"success": true})))
}
