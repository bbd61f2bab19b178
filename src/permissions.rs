//! Role hierarchy and per-group permission resolution.
//!
//! The role/action layer is pure; only `check_group_permission` and its
//! helpers touch the store to resolve membership and per-group overrides.

use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Member,
    Moderator,
    Admin,
}

impl Role {
    pub fn level(self) -> u8 {
        match self {
            Role::Member => 1,
            Role::Moderator => 2,
            Role::Admin => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Member => "member",
            Role::Moderator => "moderator",
            Role::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "member" => Some(Role::Member),
            "moderator" => Some(Role::Moderator),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

/// `actor` may perform an action requiring `required`.
pub fn has_permission(actor: Role, required: Role) -> bool {
    actor.level() >= required.level()
}

/// Strict dominance: `actor` may change or remove `target` only from above.
pub fn can_modify_role(actor: Role, target: Role) -> bool {
    actor.level() > target.level()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupAction {
    RenameGroup,
    EditDescription,
    EditAvatar,
    DeleteGroup,
    RemoveMembers,
    SetRoles,
    InviteMembers,
    PinMessages,
    DeleteAnyMessage,
}

impl GroupAction {
    pub const ALL: [GroupAction; 9] = [
        GroupAction::RenameGroup,
        GroupAction::EditDescription,
        GroupAction::EditAvatar,
        GroupAction::DeleteGroup,
        GroupAction::RemoveMembers,
        GroupAction::SetRoles,
        GroupAction::InviteMembers,
        GroupAction::PinMessages,
        GroupAction::DeleteAnyMessage,
    ];

    /// Wire name used in the permissions endpoints.
    pub fn key(self) -> &'static str {
        match self {
            GroupAction::RenameGroup => "renameGroup",
            GroupAction::EditDescription => "editDescription",
            GroupAction::EditAvatar => "editAvatar",
            GroupAction::DeleteGroup => "deleteGroup",
            GroupAction::RemoveMembers => "removeMembers",
            GroupAction::SetRoles => "setRoles",
            GroupAction::InviteMembers => "inviteMembers",
            GroupAction::PinMessages => "pinMessages",
            GroupAction::DeleteAnyMessage => "deleteAnyMessage",
        }
    }

    /// Column in `group_permissions` holding the override.
    pub fn column(self) -> &'static str {
        match self {
            GroupAction::RenameGroup => "rename_group",
            GroupAction::EditDescription => "edit_description",
            GroupAction::EditAvatar => "edit_avatar",
            GroupAction::DeleteGroup => "delete_group",
            GroupAction::RemoveMembers => "remove_members",
            GroupAction::SetRoles => "set_roles",
            GroupAction::InviteMembers => "invite_members",
            GroupAction::PinMessages => "pin_messages",
            GroupAction::DeleteAnyMessage => "delete_any_message",
        }
    }

    pub fn default_role(self) -> Role {
        match self {
            GroupAction::RenameGroup => Role::Admin,
            GroupAction::EditDescription => Role::Admin,
            GroupAction::EditAvatar => Role::Admin,
            GroupAction::DeleteGroup => Role::Admin,
            GroupAction::RemoveMembers => Role::Moderator,
            GroupAction::SetRoles => Role::Admin,
            GroupAction::InviteMembers => Role::Member,
            GroupAction::PinMessages => Role::Moderator,
            GroupAction::DeleteAnyMessage => Role::Moderator,
        }
    }

    /// `deleteGroup` can never be lowered below admin.
    pub fn locked(self) -> bool {
        matches!(self, GroupAction::DeleteGroup)
    }
}

#[derive(Debug)]
pub struct PermissionCheck {
    pub allowed: bool,
    pub actor_role: Option<Role>,
    pub required_role: Role,
    pub reason: Option<String>,
}

/// The actor's role in the group, if they are a member.
pub fn member_role(conn: &Connection, group_id: &str, agent_id: &str) -> Option<Role> {
    conn.query_row(
        "SELECT role FROM group_members WHERE group_id = ?1 AND agent_id = ?2",
        params![group_id, agent_id],
        |r| r.get::<_, String>(0),
    )
    .ok()
    .and_then(|s| Role::parse(&s))
}

/// Minimum role required for `action` in this group: per-group override when
/// present and valid, otherwise the default. The `deleteGroup` lock is
/// enforced at write time, so a stored value is trusted here.
pub fn required_role(conn: &Connection, group_id: &str, action: GroupAction) -> Role {
    let stored: Option<String> = conn
        .query_row(
            &format!(
                "SELECT {} FROM group_permissions WHERE group_id = ?1",
                action.column()
            ),
            params![group_id],
            |r| r.get(0),
        )
        .ok();
    stored
        .as_deref()
        .and_then(Role::parse)
        .unwrap_or_else(|| action.default_role())
}

/// (group, actor, action) → allow/deny with the resolved roles.
pub fn check_group_permission(
    conn: &Connection,
    group_id: &str,
    agent_id: &str,
    action: GroupAction,
) -> PermissionCheck {
    let required = required_role(conn, group_id, action);
    match member_role(conn, group_id, agent_id) {
        None => PermissionCheck {
            allowed: false,
            actor_role: None,
            required_role: required,
            reason: Some("You are not a member of this group".to_string()),
        },
        Some(actor) => {
            let allowed = has_permission(actor, required);
            PermissionCheck {
                allowed,
                actor_role: Some(actor),
                required_role: required,
                reason: if allowed {
                    None
                } else {
                    Some(format!(
                        "This action requires the {} role",
                        required.as_str()
                    ))
                },
            }
        }
    }
}

/// The full resolved action→role map for a group (settings view).
pub fn resolved_permissions(conn: &Connection, group_id: &str) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    for action in GroupAction::ALL {
        map.insert(
            action.key().to_string(),
            serde_json::Value::String(required_role(conn, group_id, action).as_str().to_string()),
        );
    }
    serde_json::Value::Object(map)
}
