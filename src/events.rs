//! In-process pub/sub. One broadcast channel carries every event; each event
//! is addressed to a room (`group:<id>`, `agent:<id>`, or `*` for all
//! connections) and connections filter on their subscribed room set.

use crate::models::{AgentSummary, DirectMessage, Group, GroupMessage};
use tokio::sync::broadcast;

pub const ROOM_ALL: &str = "*";

pub fn group_room(group_id: &str) -> String {
    format!("group:{group_id}")
}

pub fn agent_room(agent_id: &str) -> String {
    format!("agent:{agent_id}")
}

/// An event addressed to a room.
#[derive(Debug, Clone)]
pub struct BusEvent {
    pub room: String,
    pub event: ChatEvent,
}

#[derive(Debug, Clone)]
pub enum ChatEvent {
    MessageNew(GroupMessage),
    MessageDeleted {
        group_id: String,
        message_id: String,
    },
    MessageReactionAdded {
        group_id: String,
        message_id: String,
        handle: String,
        emoji: String,
    },
    MessageReactionRemoved {
        group_id: String,
        message_id: String,
        handle: String,
        emoji: String,
    },
    MessagePinned {
        group_id: String,
        message_id: String,
        pinned_by: String,
    },
    MessageUnpinned {
        group_id: String,
        message_id: String,
    },
    DmNew(DirectMessage),
    DmEncrypted(DirectMessage),
    DmReactionAdded {
        message_id: String,
        handle: String,
        emoji: String,
    },
    DmReactionRemoved {
        message_id: String,
        handle: String,
        emoji: String,
    },
    DmCleared {
        by: String,
    },
    DmBlocked {
        by: String,
    },
    DmDisappearProposed {
        by: String,
        seconds: i64,
    },
    DmDisappearEnabled {
        seconds: i64,
    },
    DmDisappearDisabled {
        by: String,
    },
    DmExpired {
        message_id: String,
    },
    MemberJoined {
        group_id: String,
        agent: AgentSummary,
    },
    MemberLeft {
        group_id: String,
        agent_id: String,
    },
    MemberRemoved {
        group_id: String,
        agent_id: String,
        removed_by: String,
    },
    MemberRoleChanged {
        group_id: String,
        agent_id: String,
        role: String,
    },
    GroupCreated(Group),
    GroupUpdated(Group),
    GroupDeleted {
        group_id: String,
    },
    GroupPermissionsUpdated {
        group_id: String,
        permissions: serde_json::Value,
    },
    AgentOnline(AgentSummary),
    AgentOffline(AgentSummary),
    TypingStart {
        group_id: String,
        agent_id: String,
        handle: String,
    },
    TypingStop {
        group_id: String,
        agent_id: String,
        handle: String,
    },
}

impl ChatEvent {
    /// SSE event name.
    pub fn name(&self) -> &'static str {
        match self {
            ChatEvent::MessageNew(_) => "message:new",
            ChatEvent::MessageDeleted { .. } => "message:deleted",
            ChatEvent::MessageReactionAdded { .. } => "message:reaction:added",
            ChatEvent::MessageReactionRemoved { .. } => "message:reaction:removed",
            ChatEvent::MessagePinned { .. } => "message:pinned",
            ChatEvent::MessageUnpinned { .. } => "message:unpinned",
            ChatEvent::DmNew(_) => "dm:new",
            ChatEvent::DmEncrypted(_) => "dm:encrypted",
            ChatEvent::DmReactionAdded { .. } => "dm:reaction:added",
            ChatEvent::DmReactionRemoved { .. } => "dm:reaction:removed",
            ChatEvent::DmCleared { .. } => "dm:cleared",
            ChatEvent::DmBlocked { .. } => "dm:blocked",
            ChatEvent::DmDisappearProposed { .. } => "dm:disappear:proposed",
            ChatEvent::DmDisappearEnabled { .. } => "dm:disappear:enabled",
            ChatEvent::DmDisappearDisabled { .. } => "dm:disappear:disabled",
            ChatEvent::DmExpired { .. } => "dm:expired",
            ChatEvent::MemberJoined { .. } => "member:joined",
            ChatEvent::MemberLeft { .. } => "member:left",
            ChatEvent::MemberRemoved { .. } => "member:removed",
            ChatEvent::MemberRoleChanged { .. } => "member:roleChanged",
            ChatEvent::GroupCreated(_) => "group:created",
            ChatEvent::GroupUpdated(_) => "group:updated",
            ChatEvent::GroupDeleted { .. } => "group:deleted",
            ChatEvent::GroupPermissionsUpdated { .. } => "group:permissionsUpdated",
            ChatEvent::AgentOnline(_) => "agent:online",
            ChatEvent::AgentOffline(_) => "agent:offline",
            ChatEvent::TypingStart { .. } => "typing:start",
            ChatEvent::TypingStop { .. } => "typing:stop",
        }
    }

    /// JSON payload delivered with the event.
    pub fn payload(&self) -> serde_json::Value {
        match self {
            ChatEvent::MessageNew(m) => serde_json::to_value(m).unwrap_or_default(),
            ChatEvent::MessageDeleted {
                group_id,
                message_id,
            } => serde_json::json!({"groupId": group_id, "messageId": message_id}),
            ChatEvent::MessageReactionAdded {
                group_id,
                message_id,
                handle,
                emoji,
            }
            | ChatEvent::MessageReactionRemoved {
                group_id,
                message_id,
                handle,
                emoji,
            } => serde_json::json!({
                "groupId": group_id, "messageId": message_id,
                "handle": handle, "emoji": emoji,
            }),
            ChatEvent::MessagePinned {
                group_id,
                message_id,
                pinned_by,
            } => serde_json::json!({
                "groupId": group_id, "messageId": message_id, "pinnedBy": pinned_by,
            }),
            ChatEvent::MessageUnpinned {
                group_id,
                message_id,
            } => serde_json::json!({"groupId": group_id, "messageId": message_id}),
            ChatEvent::DmNew(m) | ChatEvent::DmEncrypted(m) => {
                serde_json::to_value(m).unwrap_or_default()
            }
            ChatEvent::DmReactionAdded {
                message_id,
                handle,
                emoji,
            }
            | ChatEvent::DmReactionRemoved {
                message_id,
                handle,
                emoji,
            } => serde_json::json!({"messageId": message_id, "handle": handle, "emoji": emoji}),
            ChatEvent::DmCleared { by } => serde_json::json!({"by": by}),
            ChatEvent::DmBlocked { by } => serde_json::json!({"by": by}),
            ChatEvent::DmDisappearProposed { by, seconds } => {
                serde_json::json!({"by": by, "seconds": seconds})
            }
            ChatEvent::DmDisappearEnabled { seconds } => serde_json::json!({"seconds": seconds}),
            ChatEvent::DmDisappearDisabled { by } => serde_json::json!({"by": by}),
            ChatEvent::DmExpired { message_id } => serde_json::json!({"id": message_id}),
            ChatEvent::MemberJoined { group_id, agent } => serde_json::json!({
                "groupId": group_id,
                "agent": serde_json::to_value(agent).unwrap_or_default(),
            }),
            ChatEvent::MemberLeft { group_id, agent_id } => {
                serde_json::json!({"groupId": group_id, "agentId": agent_id})
            }
            ChatEvent::MemberRemoved {
                group_id,
                agent_id,
                removed_by,
            } => serde_json::json!({
                "groupId": group_id, "agentId": agent_id, "removedBy": removed_by,
            }),
            ChatEvent::MemberRoleChanged {
                group_id,
                agent_id,
                role,
            } => serde_json::json!({"groupId": group_id, "agentId": agent_id, "role": role}),
            ChatEvent::GroupCreated(g) | ChatEvent::GroupUpdated(g) => {
                serde_json::to_value(g).unwrap_or_default()
            }
            ChatEvent::GroupDeleted { group_id } => serde_json::json!({"groupId": group_id}),
            ChatEvent::GroupPermissionsUpdated {
                group_id,
                permissions,
            } => serde_json::json!({"groupId": group_id, "permissions": permissions}),
            ChatEvent::AgentOnline(a) | ChatEvent::AgentOffline(a) => {
                serde_json::to_value(a).unwrap_or_default()
            }
            ChatEvent::TypingStart {
                group_id,
                agent_id,
                handle,
            }
            | ChatEvent::TypingStop {
                group_id,
                agent_id,
                handle,
            } => serde_json::json!({"groupId": group_id, "agentId": agent_id, "handle": handle}),
        }
    }

    /// The agent that caused the event, when relevant for echo suppression.
    /// Typing indicators are never delivered back to the typer.
    pub fn typing_origin(&self) -> Option<&str> {
        match self {
            ChatEvent::TypingStart { agent_id, .. } | ChatEvent::TypingStop { agent_id, .. } => {
                Some(agent_id)
            }
            _ => None,
        }
    }
}

#[derive(Clone)]
pub struct EventBus {
    pub sender: broadcast::Sender<BusEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1024);
        EventBus { sender }
    }

    /// Publish to a single room. Send errors (no subscribers) are ignored;
    /// fan-out is best-effort and never rolls back a committed write.
    pub fn publish(&self, room: String, event: ChatEvent) {
        let _ = self.sender.send(BusEvent { room, event });
    }

    /// Publish to every connection.
    pub fn publish_all(&self, event: ChatEvent) {
        self.publish(ROOM_ALL.to_string(), event);
    }
}
