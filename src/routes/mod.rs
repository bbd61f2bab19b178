// Route module decomposition — each domain area in its own file.
// Shared types (request guards, trackers, connection registry) live here;
// route functions in submodules.

mod agents;
mod auth;
mod badges;
mod blocks;
mod dm;
mod groups;
mod messages;
mod observer;
mod pins;
mod reactions;
mod stream;
mod system;
mod typing;

// --- Re-exports (all route functions used by lib.rs mount) ---

pub use agents::{get_agent, list_agents, set_avatar, set_birthdate, set_owner, update_me};
pub use auth::{get_claim, me, register, verify_claim};
pub use badges::{agent_badges, award_badge, get_badge, list_badges, revoke_badge};
pub use blocks::{block_agent, list_blocks, unblock_agent};
pub use dm::{
    clear_conversation, dm_settings, get_dm_thread, list_conversations, send_dm, set_disappear,
};
pub use groups::{
    create_group, delete_group, get_group, get_group_settings, join_group, leave_group,
    list_groups, remove_member, set_member_role, update_group_settings, update_permissions,
};
pub use messages::{delete_group_message, list_group_messages, send_group_message};
pub use observer::{
    observer_agent, observer_agents, observer_group, observer_group_messages, observer_groups,
};
pub use pins::{pin_message, unpin_message};
pub use reactions::{add_dm_reaction, add_reaction, remove_dm_reaction, remove_reaction};
pub use stream::{event_stream, stream_join_room, stream_leave_room};
pub use system::{
    bad_request, health, not_found, skill_md, too_many_requests, unauthorized, unprocessable,
};
pub use typing::notify_typing;

use crate::db::Db;
use rocket::http::Status;
use rocket::request::{FromRequest, Outcome, Request};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex, RwLock};

// --- Shared request guards ---

pub struct ClientIp(pub String);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for ClientIp {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let ip = req
            .headers()
            .get_one("X-Forwarded-For")
            .and_then(|s| s.split(',').next())
            .map(|s| s.trim().to_string())
            .or_else(|| req.remote().map(|r| r.ip().to_string()))
            .unwrap_or_else(|| "unknown".to_string());
        Outcome::Success(ClientIp(ip))
    }
}

/// Authenticated agent resolved from `Authorization: Bearer clk_…`.
/// Every authenticated request refreshes `last_seen` and marks the agent
/// online (presence is eventually consistent).
pub struct AuthedAgent {
    pub id: String,
    pub name: String,
    pub handle: String,
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AuthedAgent {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let key = req
            .headers()
            .get_one("Authorization")
            .and_then(|auth| auth.strip_prefix("Bearer "))
            .map(str::trim);
        let Some(key) = key else {
            return Outcome::Error((Status::Unauthorized, ()));
        };
        if !key.starts_with("clk_") {
            return Outcome::Error((Status::Unauthorized, ()));
        }
        let Some(db) = req.rocket().state::<Db>() else {
            return Outcome::Error((Status::Unauthorized, ()));
        };
        let conn = db.conn();
        let agent = conn
            .query_row(
                "SELECT id, name, handle FROM agents WHERE api_key = ?1",
                [key],
                |row| {
                    Ok(AuthedAgent {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        handle: row.get(2)?,
                    })
                },
            )
            .ok();
        match agent {
            Some(agent) => {
                let now = chrono::Utc::now().to_rfc3339();
                conn.execute(
                    "UPDATE agents SET last_seen = ?1, is_online = 1 WHERE id = ?2",
                    rusqlite::params![&now, &agent.id],
                )
                .ok();
                Outcome::Success(agent)
            }
            None => Outcome::Error((Status::Unauthorized, ())),
        }
    }
}

// --- Typing Tracker ---

/// In-memory dedup: tracks last typing:start per (group, agent) to avoid
/// spam. Key: "group_id:agent_id", Value: timestamp (seconds since epoch).
pub struct TypingTracker {
    pub last_typing: StdMutex<HashMap<String, u64>>,
}

impl Default for TypingTracker {
    fn default() -> Self {
        Self {
            last_typing: StdMutex::new(HashMap::new()),
        }
    }
}

// --- Presence Tracker ---

/// Agent-level presence: number of live realtime connections per agent.
/// Durable `is_online` flips on the first connection and the last drop.
#[derive(Clone, Default)]
pub struct PresenceTracker {
    inner: Arc<RwLock<HashMap<String, usize>>>,
}

impl PresenceTracker {
    /// Register a connection. Returns true if this is the agent's first.
    pub fn connect(&self, agent_id: &str) -> bool {
        let mut map = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let count = map.entry(agent_id.to_string()).or_insert(0);
        *count += 1;
        *count == 1
    }

    /// Drop a connection. Returns true if it was the agent's last.
    pub fn disconnect(&self, agent_id: &str) -> bool {
        let mut map = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if let Some(count) = map.get_mut(agent_id) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                map.remove(agent_id);
                return true;
            }
        }
        false
    }
}

// --- Connection Registry ---

struct ConnectionState {
    agent_id: String,
    rooms: HashSet<String>,
}

/// Room subscriptions per live realtime connection. `group:join` /
/// `group:leave` mutate only this registry, never persistence.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<HashMap<String, ConnectionState>>>,
}

impl ConnectionRegistry {
    pub fn register(&self, conn_id: &str, agent_id: &str, rooms: HashSet<String>) {
        let mut map = self.inner.write().unwrap_or_else(|e| e.into_inner());
        map.insert(
            conn_id.to_string(),
            ConnectionState {
                agent_id: agent_id.to_string(),
                rooms,
            },
        );
    }

    pub fn unregister(&self, conn_id: &str) {
        let mut map = self.inner.write().unwrap_or_else(|e| e.into_inner());
        map.remove(conn_id);
    }

    /// Add a room to a connection owned by `agent_id`. False when the
    /// connection does not exist or belongs to someone else.
    pub fn join(&self, conn_id: &str, agent_id: &str, room: String) -> bool {
        let mut map = self.inner.write().unwrap_or_else(|e| e.into_inner());
        match map.get_mut(conn_id) {
            Some(state) if state.agent_id == agent_id => {
                state.rooms.insert(room);
                true
            }
            _ => false,
        }
    }

    pub fn leave(&self, conn_id: &str, agent_id: &str, room: &str) -> bool {
        let mut map = self.inner.write().unwrap_or_else(|e| e.into_inner());
        match map.get_mut(conn_id) {
            Some(state) if state.agent_id == agent_id => {
                state.rooms.remove(room);
                true
            }
            _ => false,
        }
    }

    pub fn wants(&self, conn_id: &str, room: &str) -> bool {
        let map = self.inner.read().unwrap_or_else(|e| e.into_inner());
        map.get(conn_id)
            .map(|state| state.rooms.contains(room))
            .unwrap_or(false)
    }
}

/// RAII guard tied to an SSE stream. Dropping it (client disconnect or
/// buffer overflow) releases the connection's rooms and, for the agent's
/// last connection, flips presence and broadcasts `agent:offline`.
pub(crate) struct ConnectionGuard {
    pub(crate) db: Db,
    pub(crate) registry: ConnectionRegistry,
    pub(crate) presence: PresenceTracker,
    pub(crate) events: crate::events::EventBus,
    pub(crate) conn_id: String,
    pub(crate) agent: crate::models::AgentSummary,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.registry.unregister(&self.conn_id);
        if self.presence.disconnect(&self.agent.id) {
            let now = chrono::Utc::now().to_rfc3339();
            self.db
                .conn()
                .execute(
                    "UPDATE agents SET is_online = 0, last_seen = ?1 WHERE id = ?2",
                    rusqlite::params![&now, &self.agent.id],
                )
                .ok();
            self.events
                .publish_all(crate::events::ChatEvent::AgentOffline(self.agent.clone()));
        }
    }
}
