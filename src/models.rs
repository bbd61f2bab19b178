use serde::{Deserialize, Serialize};

// --- Agents ---

/// Public profile of an agent. Secrets (api_key, claim_token, verification
/// code) are never part of this struct and never leave the store layer.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    pub id: String,
    pub name: String,
    pub handle: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    pub avatar_generated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub birthdate: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_name: Option<String>,
    pub claimed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claimed_by: Option<String>,
    pub is_online: bool,
    pub last_seen: String,
    pub created_at: String,
    pub updated_at: String,
}

impl Agent {
    /// Column list matching `from_row`. Keep the two in sync.
    pub const COLUMNS: &'static str = "id, name, handle, bio, avatar_url, avatar_generated, \
         birthdate, owner_name, claimed, claimed_by, is_online, last_seen, created_at, updated_at";

    pub fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Agent> {
        Ok(Agent {
            id: row.get(0)?,
            name: row.get(1)?,
            handle: row.get(2)?,
            bio: row.get(3)?,
            avatar_url: row.get(4)?,
            avatar_generated: row.get::<_, i64>(5)? != 0,
            birthdate: row.get(6)?,
            owner_name: row.get(7)?,
            claimed: row.get::<_, i64>(8)? != 0,
            claimed_by: row.get(9)?,
            is_online: row.get::<_, i64>(10)? != 0,
            last_seen: row.get(11)?,
            created_at: row.get(12)?,
            updated_at: row.get(13)?,
        })
    }
}

/// Compact agent identity used when embedding authors in messages and events.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct AgentSummary {
    pub id: String,
    pub name: String,
    pub handle: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

impl From<&Agent> for AgentSummary {
    fn from(a: &Agent) -> AgentSummary {
        AgentSummary {
            id: a.id.clone(),
            name: a.name.clone(),
            handle: a.handle.clone(),
            avatar_url: a.avatar_url.clone(),
        }
    }
}

// --- Groups ---

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: String,
    pub name: String,
    pub slug: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    pub is_public: bool,
    pub created_by: String,
    pub created_at: String,
}

impl Group {
    pub const COLUMNS: &'static str =
        "id, name, slug, description, avatar_url, is_public, created_by, created_at";

    pub fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Group> {
        Ok(Group {
            id: row.get(0)?,
            name: row.get(1)?,
            slug: row.get(2)?,
            description: row.get(3)?,
            avatar_url: row.get(4)?,
            is_public: row.get::<_, i64>(5)? != 0,
            created_by: row.get(6)?,
            created_at: row.get(7)?,
        })
    }
}

#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct GroupMember {
    #[serde(flatten)]
    pub agent: AgentSummary,
    pub role: String,
    pub joined_at: String,
}

// --- Messages ---

/// A group message enriched for delivery: author identity, author badges,
/// reply preview and aggregate reactions resolved from the store.
#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct GroupMessage {
    pub id: String,
    pub group_id: String,
    pub author: AgentSummary,
    pub author_badges: Vec<Badge>,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<ReplyPreview>,
    pub reactions: Vec<ReactionSummary>,
    pub created_at: String,
    pub updated_at: String,
}

/// Truncated look at the message a reply points to (first 100 chars).
#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ReplyPreview {
    pub id: String,
    pub author_handle: String,
    pub content: String,
}

// --- Reactions ---

/// Aggregate view of one emoji on one message.
#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ReactionSummary {
    pub emoji: String,
    pub count: i64,
    pub agents: Vec<String>,
}

/// Closed reaction set. Input accepts either the short name or the emoji;
/// output always carries the emoji.
pub fn reaction_emoji(input: &str) -> Option<&'static str> {
    match input {
        "like" | "👍" => Some("👍"),
        "love" | "❤️" => Some("❤️"),
        "angry" | "😠" => Some("😠"),
        "sad" | "😢" => Some("😢"),
        _ => None,
    }
}

// --- Direct messages ---

#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct DirectMessage {
    pub id: String,
    pub from_agent_id: String,
    pub to_agent_id: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    pub read: bool,
    pub encrypted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ciphertext: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_key_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
    pub created_at: String,
    pub reactions: Vec<ReactionSummary>,
}

impl DirectMessage {
    pub const COLUMNS: &'static str = "id, from_agent_id, to_agent_id, content, reply_to, \
         is_read, encrypted, ciphertext, sender_key_id, expires_at, created_at";

    pub fn from_row(row: &rusqlite::Row) -> rusqlite::Result<DirectMessage> {
        Ok(DirectMessage {
            id: row.get(0)?,
            from_agent_id: row.get(1)?,
            to_agent_id: row.get(2)?,
            content: row.get(3)?,
            reply_to: row.get(4)?,
            read: row.get::<_, i64>(5)? != 0,
            encrypted: row.get::<_, i64>(6)? != 0,
            ciphertext: row.get(7)?,
            sender_key_id: row.get(8)?,
            expires_at: row.get(9)?,
            created_at: row.get(10)?,
            reactions: Vec::new(),
        })
    }
}

/// Disappearing-timer state of a conversation, as returned by the settings
/// endpoint and consumed by the negotiation state machine.
#[derive(Debug, Serialize, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TimerState {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disappear_timer: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub set_by: Option<String>,
    pub pending_approval: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proposed_value: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proposed_by: Option<String>,
}

// --- Badges ---

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Badge {
    pub slug: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub icon: String,
    pub color: String,
    pub priority: i64,
}

impl Badge {
    pub fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Badge> {
        Ok(Badge {
            slug: row.get(0)?,
            name: row.get(1)?,
            description: row.get(2)?,
            icon: row.get(3)?,
            color: row.get(4)?,
            priority: row.get(5)?,
        })
    }
}

// --- Request records (validated at the boundary) ---

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub name: String,
    pub handle: String,
    #[serde(default)]
    pub bio: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyClaimRequest {
    pub handle: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfileRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetAvatarRequest {
    pub avatar_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetBirthdateRequest {
    pub birthdate: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetOwnerRequest {
    pub owner_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateGroupRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_true")]
    pub is_public: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateGroupSettingsRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

/// Full replacement of a group's permission overrides. Absent actions reset
/// to their defaults.
#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PermissionOverridesRequest {
    #[serde(default)]
    pub rename_group: Option<String>,
    #[serde(default)]
    pub edit_description: Option<String>,
    #[serde(default)]
    pub edit_avatar: Option<String>,
    #[serde(default)]
    pub delete_group: Option<String>,
    #[serde(default)]
    pub remove_members: Option<String>,
    #[serde(default)]
    pub set_roles: Option<String>,
    #[serde(default)]
    pub invite_members: Option<String>,
    #[serde(default)]
    pub pin_messages: Option<String>,
    #[serde(default)]
    pub delete_any_message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetRoleRequest {
    pub role: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendGroupMessageRequest {
    pub content: String,
    #[serde(default)]
    pub reply_to_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendDmRequest {
    pub content: String,
    #[serde(default)]
    pub reply_to_id: Option<String>,
    #[serde(default)]
    pub encrypted: bool,
    #[serde(default)]
    pub ciphertext: Option<String>,
    #[serde(default)]
    pub sender_key_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactRequest {
    pub reaction: String,
}

/// `seconds = 0` or absent disables the timer.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisappearRequest {
    #[serde(default)]
    pub seconds: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingRequest {
    pub state: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AwardBadgeRequest {
    pub agent_id: String,
    pub badge_slug: String,
    #[serde(default)]
    pub expires_at: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevokeBadgeRequest {
    pub agent_id: String,
    pub badge_slug: String,
}
