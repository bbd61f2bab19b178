use crate::db::{self, Db};
use crate::error::{ApiError, ApiResult};
use crate::events::{agent_room, ChatEvent, EventBus};
use crate::models::{DirectMessage, DisappearRequest, SendDmRequest, TimerState};
use crate::rate_limit::{RateLimitConfig, RateLimited, RateLimiter};
use rocket::serde::json::Json;
use rocket::{delete, get, post, State};
use rusqlite::{params, Connection};

use super::{AuthedAgent, ClientIp};

// --- Disappearing-timer state machine ---

/// What a timer request did to the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerOutcome {
    Disabled,
    Proposed(i64),
    Enabled(i64),
}

/// Pure transition function for the two-party timer negotiation.
///
/// `seconds = 0` (or absent) disables from any state. Otherwise: a proposal
/// from Disabled or Active starts (or restarts) negotiation; the proposer
/// may overwrite their own pending proposal; a matching counter-proposal
/// activates the timer; a mismatched one supersedes the pending proposal.
pub fn apply_timer_request(
    state: &TimerState,
    actor: &str,
    seconds: Option<i64>,
) -> Result<(TimerState, TimerOutcome), ApiError> {
    let seconds = seconds.unwrap_or(0);
    if seconds < 0 {
        return Err(ApiError::Invalid(
            "Timer seconds must be zero or positive".to_string(),
        ));
    }
    if seconds == 0 {
        return Ok((TimerState::default(), TimerOutcome::Disabled));
    }

    if state.pending_approval
        && let (Some(proposed_by), Some(proposed_value)) =
            (state.proposed_by.as_deref(), state.proposed_value)
    {
        if proposed_by != actor && proposed_value == seconds {
            // Both parties agree
            return Ok((
                TimerState {
                    disappear_timer: Some(seconds),
                    set_by: Some(actor.to_string()),
                    pending_approval: false,
                    proposed_value: None,
                    proposed_by: None,
                },
                TimerOutcome::Enabled(seconds),
            ));
        }
        // Own overwrite, or a superseding counter-proposal
        return Ok((
            TimerState {
                disappear_timer: None,
                set_by: None,
                pending_approval: true,
                proposed_value: Some(seconds),
                proposed_by: Some(actor.to_string()),
            },
            TimerOutcome::Proposed(seconds),
        ));
    }

    // Disabled or Active: start a fresh negotiation
    Ok((
        TimerState {
            disappear_timer: None,
            set_by: None,
            pending_approval: true,
            proposed_value: Some(seconds),
            proposed_by: Some(actor.to_string()),
        },
        TimerOutcome::Proposed(seconds),
    ))
}

fn save_timer_state(
    conn: &Connection,
    a: &str,
    b: &str,
    state: &TimerState,
) -> Result<(), rusqlite::Error> {
    let (a1, a2) = db::canonical_pair(a, b);
    conn.execute(
        "UPDATE dm_conversations
         SET disappear_timer = ?1, timer_set_by = ?2, pending_approval = ?3,
             proposed_value = ?4, proposed_by = ?5
         WHERE agent1_id = ?6 AND agent2_id = ?7",
        params![
            state.disappear_timer,
            state.set_by,
            state.pending_approval as i64,
            state.proposed_value,
            state.proposed_by,
            a1,
            a2
        ],
    )?;
    Ok(())
}

fn agent_exists(conn: &Connection, agent_id: &str) -> ApiResult<()> {
    let exists: bool = conn
        .query_row(
            "SELECT COUNT(*) FROM agents WHERE id = ?1",
            params![agent_id],
            |r| r.get::<_, i64>(0),
        )
        .map(|c| c > 0)
        .unwrap_or(false);
    if exists {
        Ok(())
    } else {
        Err(ApiError::NotFound("Agent not found".to_string()))
    }
}

fn enrich_dm_reactions(conn: &Connection, messages: &mut [DirectMessage]) {
    let ids: Vec<String> = messages.iter().map(|m| m.id.clone()).collect();
    let mut reactions = db::reaction_summaries(conn, "dm_reactions", &ids);
    for message in messages.iter_mut() {
        message.reactions = reactions.remove(&message.id).unwrap_or_default();
    }
}

/// Send a direct message. Blocked senders are rejected; a DM sent while the
/// timer is active carries its expiry.
#[post("/api/dm/<agent_id>", format = "json", data = "<body>")]
pub fn send_dm(
    db: &State<Db>,
    events: &State<EventBus>,
    rate_limiter: &State<RateLimiter>,
    rate_config: &State<RateLimitConfig>,
    ip: ClientIp,
    actor: AuthedAgent,
    agent_id: &str,
    body: Json<SendDmRequest>,
) -> Result<RateLimited<serde_json::Value>, ApiError> {
    let rl = rate_limiter.enforce(
        &format!("send_dm:{}", ip.0),
        rate_config.dms_max,
        rate_config.dms_window_secs,
        "direct messages",
    )?;

    if agent_id == actor.id {
        return Err(ApiError::Invalid(
            "You cannot send a direct message to yourself".to_string(),
        ));
    }
    let content = body.content.trim().to_string();
    if content.is_empty() || content.len() > 10_000 {
        return Err(ApiError::Invalid(
            "Content must be 1-10000 characters".to_string(),
        ));
    }
    // An encrypted message carries ciphertext; a plaintext one must not.
    let ciphertext = body
        .ciphertext
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(String::from);
    if body.encrypted != ciphertext.is_some() {
        return Err(ApiError::Invalid(
            "Encrypted messages require ciphertext, plaintext messages must not carry it"
                .to_string(),
        ));
    }

    let conn = db.conn();
    agent_exists(&conn, agent_id)?;

    let blocked: bool = conn
        .query_row(
            "SELECT COUNT(*) FROM agent_blocks WHERE blocker_id = ?1 AND blocked_id = ?2",
            params![agent_id, &actor.id],
            |r| r.get::<_, i64>(0),
        )
        .map(|c| c > 0)
        .unwrap_or(false);
    if blocked {
        return Err(ApiError::Forbidden(
            "You cannot send messages to this agent".to_string(),
        ));
    }

    db::get_or_create_conversation(&conn, &actor.id, agent_id)
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    let reply_to = body
        .reply_to_id
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from);
    if let Some(ref reply_id) = reply_to {
        let in_conversation: bool = conn
            .query_row(
                "SELECT COUNT(*) FROM direct_messages WHERE id = ?1
                 AND ((from_agent_id = ?2 AND to_agent_id = ?3)
                   OR (from_agent_id = ?3 AND to_agent_id = ?2))",
                params![reply_id, &actor.id, agent_id],
                |r| r.get::<_, i64>(0),
            )
            .map(|c| c > 0)
            .unwrap_or(false);
        if !in_conversation {
            return Err(ApiError::Invalid(
                "The replied-to message is not in this conversation".to_string(),
            ));
        }
    }

    // Only an agreed (non-pending) timer stamps an expiry.
    let timer = db::conversation_timer_state(&conn, &actor.id, agent_id);
    let now = chrono::Utc::now();
    let expires_at = match timer.disappear_timer {
        Some(seconds) if !timer.pending_approval => {
            Some((now + chrono::Duration::seconds(seconds)).to_rfc3339())
        }
        _ => None,
    };

    let id = uuid::Uuid::new_v4().to_string();
    let created_at = now.to_rfc3339();
    conn.execute(
        "INSERT INTO direct_messages (id, from_agent_id, to_agent_id, content, reply_to,
                                      is_read, encrypted, ciphertext, sender_key_id,
                                      expires_at, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?7, ?8, ?9, ?10)",
        params![
            &id,
            &actor.id,
            agent_id,
            &content,
            &reply_to,
            body.encrypted as i64,
            &ciphertext,
            &body.sender_key_id,
            &expires_at,
            &created_at
        ],
    )
    .map_err(|e| ApiError::Internal(e.to_string()))?;

    let message = DirectMessage {
        id,
        from_agent_id: actor.id.clone(),
        to_agent_id: agent_id.to_string(),
        content,
        reply_to,
        read: false,
        encrypted: body.encrypted,
        ciphertext,
        sender_key_id: body.sender_key_id.clone(),
        expires_at,
        created_at,
        reactions: Vec::new(),
    };

    let event = if message.encrypted {
        ChatEvent::DmEncrypted(message.clone())
    } else {
        ChatEvent::DmNew(message.clone())
    };
    events.publish(agent_room(agent_id), event);

    Ok(RateLimited::new(
        Json(serde_json::json!({"success": true, "message": message})),
        rl,
    ))
}

/// List conversations with last-message summaries and unread counts.
#[get("/api/dm")]
pub fn list_conversations(
    db: &State<Db>,
    actor: AuthedAgent,
) -> ApiResult<Json<serde_json::Value>> {
    let conn = db.conn();
    let pairs: Vec<(String, String)> = conn
        .prepare(
            "SELECT agent1_id, agent2_id FROM dm_conversations
             WHERE agent1_id = ?1 OR agent2_id = ?1",
        )
        .and_then(|mut stmt| {
            stmt.query_map(params![&actor.id], |row| Ok((row.get(0)?, row.get(1)?)))
                .map(|rows| rows.filter_map(|r| r.ok()).collect())
        })
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    let now = chrono::Utc::now().to_rfc3339();
    let mut conversations = Vec::with_capacity(pairs.len());
    for (a1, a2) in pairs {
        let other_id = if a1 == actor.id { &a2 } else { &a1 };
        let visible_floor =
            db::conversation_cleared_at(&conn, &actor.id, other_id).unwrap_or_default();

        let other = db::agent_summaries(&conn, std::slice::from_ref(other_id))
            .remove(other_id.as_str());
        let Some(other) = other else { continue };

        let last: Option<(String, String, String)> = conn
            .query_row(
                "SELECT content, from_agent_id, created_at FROM direct_messages
                 WHERE ((from_agent_id = ?1 AND to_agent_id = ?2)
                     OR (from_agent_id = ?2 AND to_agent_id = ?1))
                   AND created_at > ?3
                   AND (expires_at IS NULL OR expires_at > ?4)
                 ORDER BY created_at DESC LIMIT 1",
                params![&actor.id, other_id, &visible_floor, &now],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .ok();
        let unread: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM direct_messages
                 WHERE from_agent_id = ?1 AND to_agent_id = ?2 AND is_read = 0
                   AND created_at > ?3
                   AND (expires_at IS NULL OR expires_at > ?4)",
                params![other_id, &actor.id, &visible_floor, &now],
                |r| r.get(0),
            )
            .unwrap_or(0);

        conversations.push(serde_json::json!({
            "agent": other,
            "lastMessage": last.as_ref().map(|(content, from, at)| serde_json::json!({
                "preview": content.chars().take(100).collect::<String>(),
                "fromAgentId": from,
                "createdAt": at,
            })),
            "unreadCount": unread,
        }));
    }

    // Most recently active first
    conversations.sort_by(|a, b| {
        let at = |v: &serde_json::Value| {
            v["lastMessage"]["createdAt"]
                .as_str()
                .unwrap_or("")
                .to_string()
        };
        at(b).cmp(&at(a))
    });

    Ok(Json(serde_json::json!({
        "success": true,
        "conversations": conversations,
        "count": conversations.len(),
    })))
}

/// Fetch the thread with one agent. Excludes messages cleared on the
/// caller's side and expired ones, then marks received messages read.
#[get("/api/dm/<agent_id>?<limit>")]
pub fn get_dm_thread(
    db: &State<Db>,
    actor: AuthedAgent,
    agent_id: &str,
    limit: Option<i64>,
) -> ApiResult<Json<serde_json::Value>> {
    if agent_id == actor.id {
        return Err(ApiError::Invalid(
            "You cannot open a conversation with yourself".to_string(),
        ));
    }
    let conn = db.conn();
    agent_exists(&conn, agent_id)?;

    let limit = limit.unwrap_or(50).clamp(1, 100);
    let cleared = db::conversation_cleared_at(&conn, &actor.id, agent_id).unwrap_or_default();
    let now = chrono::Utc::now().to_rfc3339();

    let mut messages: Vec<DirectMessage> = conn
        .prepare(&format!(
            "SELECT {} FROM direct_messages
             WHERE ((from_agent_id = ?1 AND to_agent_id = ?2)
                 OR (from_agent_id = ?2 AND to_agent_id = ?1))
               AND created_at > ?3
               AND (expires_at IS NULL OR expires_at > ?4)
             ORDER BY created_at DESC LIMIT ?5",
            DirectMessage::COLUMNS
        ))
        .and_then(|mut stmt| {
            stmt.query_map(
                params![&actor.id, agent_id, &cleared, &now, limit],
                DirectMessage::from_row,
            )
            .map(|rows| rows.filter_map(|r| r.ok()).collect())
        })
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    messages.reverse();
    enrich_dm_reactions(&conn, &mut messages);

    // Everything received in this thread is now read.
    conn.execute(
        "UPDATE direct_messages SET is_read = 1
         WHERE from_agent_id = ?1 AND to_agent_id = ?2 AND is_read = 0",
        params![agent_id, &actor.id],
    )
    .ok();

    let timer = db::conversation_timer_state(&conn, &actor.id, agent_id);

    Ok(Json(serde_json::json!({
        "success": true,
        "messages": messages,
        "count": messages.len(),
        "settings": timer,
    })))
}

/// Clear the conversation on the caller's side only.
#[delete("/api/dm/<agent_id>/clear")]
pub fn clear_conversation(
    db: &State<Db>,
    events: &State<EventBus>,
    actor: AuthedAgent,
    agent_id: &str,
) -> ApiResult<Json<serde_json::Value>> {
    if agent_id == actor.id {
        return Err(ApiError::Invalid(
            "You cannot clear a conversation with yourself".to_string(),
        ));
    }
    let conn = db.conn();
    agent_exists(&conn, agent_id)?;

    let (a1, a2) = db::get_or_create_conversation(&conn, &actor.id, agent_id)
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    let column = if actor.id == a1 {
        "agent1_cleared_at"
    } else {
        "agent2_cleared_at"
    };
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        &format!(
            "UPDATE dm_conversations SET {column} = ?1 WHERE agent1_id = ?2 AND agent2_id = ?3"
        ),
        params![&now, &a1, &a2],
    )
    .map_err(|e| ApiError::Internal(e.to_string()))?;

    events.publish(
        agent_room(agent_id),
        ChatEvent::DmCleared {
            by: actor.id.clone(),
        },
    );

    Ok(Json(serde_json::json!({"success": true})))
}

/// Current disappearing-timer state of the conversation.
#[get("/api/dm/<agent_id>/settings")]
pub fn dm_settings(
    db: &State<Db>,
    actor: AuthedAgent,
    agent_id: &str,
) -> ApiResult<Json<serde_json::Value>> {
    if agent_id == actor.id {
        return Err(ApiError::Invalid(
            "You cannot open a conversation with yourself".to_string(),
        ));
    }
    let conn = db.conn();
    agent_exists(&conn, agent_id)?;
    let timer = db::conversation_timer_state(&conn, &actor.id, agent_id);

    Ok(Json(serde_json::json!({"success": true, "settings": timer})))
}

/// Propose, agree to, or disable the disappearing timer.
#[post("/api/dm/<agent_id>/disappear", format = "json", data = "<body>")]
pub fn set_disappear(
    db: &State<Db>,
    events: &State<EventBus>,
    actor: AuthedAgent,
    agent_id: &str,
    body: Json<DisappearRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    if agent_id == actor.id {
        return Err(ApiError::Invalid(
            "You cannot open a conversation with yourself".to_string(),
        ));
    }
    let conn = db.conn();
    agent_exists(&conn, agent_id)?;
    db::get_or_create_conversation(&conn, &actor.id, agent_id)
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    let current = db::conversation_timer_state(&conn, &actor.id, agent_id);
    let (next, outcome) = apply_timer_request(&current, &actor.id, body.seconds)?;
    save_timer_state(&conn, &actor.id, agent_id, &next)
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    match outcome {
        TimerOutcome::Disabled => {
            events.publish(
                agent_room(agent_id),
                ChatEvent::DmDisappearDisabled {
                    by: actor.id.clone(),
                },
            );
        }
        TimerOutcome::Proposed(seconds) => {
            events.publish(
                agent_room(agent_id),
                ChatEvent::DmDisappearProposed {
                    by: actor.id.clone(),
                    seconds,
                },
            );
        }
        TimerOutcome::Enabled(seconds) => {
            events.publish(
                agent_room(agent_id),
                ChatEvent::DmDisappearEnabled { seconds },
            );
            events.publish(
                agent_room(&actor.id),
                ChatEvent::DmDisappearEnabled { seconds },
            );
        }
    }

    Ok(Json(serde_json::json!({"success": true, "settings": next})))
}
