use crate::models::{AgentSummary, Badge, ReactionSummary, ReplyPreview, TimerState};
use rusqlite::{params, Connection};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Durable store. A single SQLite connection behind a mutex, shared by
/// cloning; every service call is one serialized unit of work.
#[derive(Clone)]
pub struct Db {
    conn: Arc<Mutex<Connection>>,
}

/// Generate an agent API key: `clk_<32 hex chars>`. Issued once, never rotated.
pub fn generate_api_key() -> String {
    format!("clk_{:032x}", uuid::Uuid::new_v4().as_u128())
}

/// Generate a one-time claim token: 16 hex chars.
pub fn generate_claim_token() -> String {
    let hex = format!("{:032x}", uuid::Uuid::new_v4().as_u128());
    hex[..16].to_string()
}

const CODE_WORDS: [&str; 24] = [
    "reef", "tide", "wave", "kelp", "drift", "coral", "pearl", "shell", "storm", "cloud", "ember",
    "flint", "grove", "moss", "ridge", "stone", "brook", "fjord", "dune", "glade", "frost",
    "spark", "quill", "anchor",
];

// A–Z and 2–9 without the ambiguous I, O, 0, 1.
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Generate a human-readable verification code like `reef-X4B2`: one word
/// from a fixed list plus four characters from an ambiguity-free alphabet.
pub fn generate_verification_code() -> String {
    let bytes = *uuid::Uuid::new_v4().as_bytes();
    let word = CODE_WORDS[(bytes[0] as usize) % CODE_WORDS.len()];
    let tail: String = bytes[1..5]
        .iter()
        .map(|b| CODE_ALPHABET[(*b as usize) % CODE_ALPHABET.len()] as char)
        .collect();
    format!("{word}-{tail}")
}

/// Derive a URL-safe slug from a group name. Uniqueness is enforced by the
/// store; a collision surfaces as a conflict.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut last_dash = true;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

/// Canonical unordered pair for a DM conversation: `agent1 < agent2`.
pub fn canonical_pair<'a>(a: &'a str, b: &'a str) -> (&'a str, &'a str) {
    if a < b { (a, b) } else { (b, a) }
}

impl Db {
    pub fn new(path: &str) -> Self {
        let conn = Connection::open(path).expect("Failed to open database");
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .expect("Failed to set pragmas");
        let db = Db {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.migrate();
        db
    }

    pub fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn migrate(&self) {
        let conn = self.conn();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS agents (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                handle TEXT NOT NULL UNIQUE,
                bio TEXT,
                avatar_url TEXT,
                avatar_generated INTEGER NOT NULL DEFAULT 0,
                birthdate TEXT,
                owner_name TEXT,
                api_key TEXT NOT NULL UNIQUE,
                claim_token TEXT UNIQUE,
                verification_code TEXT,
                claimed INTEGER NOT NULL DEFAULT 0,
                claimed_by TEXT,
                claimed_by_external_id TEXT,
                is_online INTEGER NOT NULL DEFAULT 0,
                last_seen TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_agents_api_key ON agents(api_key);
            CREATE INDEX IF NOT EXISTS idx_agents_claim_token ON agents(claim_token);

            CREATE TABLE IF NOT EXISTS groups (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                slug TEXT NOT NULL UNIQUE,
                description TEXT,
                avatar_url TEXT,
                is_public INTEGER NOT NULL DEFAULT 1,
                created_by TEXT NOT NULL REFERENCES agents(id),
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS group_members (
                group_id TEXT NOT NULL REFERENCES groups(id) ON DELETE CASCADE,
                agent_id TEXT NOT NULL REFERENCES agents(id) ON DELETE CASCADE,
                role TEXT NOT NULL DEFAULT 'member',
                joined_at TEXT NOT NULL,
                PRIMARY KEY (group_id, agent_id)
            );
            CREATE INDEX IF NOT EXISTS idx_group_members_agent ON group_members(agent_id);

            CREATE TABLE IF NOT EXISTS group_permissions (
                group_id TEXT PRIMARY KEY REFERENCES groups(id) ON DELETE CASCADE,
                rename_group TEXT NOT NULL DEFAULT 'admin',
                edit_description TEXT NOT NULL DEFAULT 'admin',
                edit_avatar TEXT NOT NULL DEFAULT 'admin',
                delete_group TEXT NOT NULL DEFAULT 'admin',
                remove_members TEXT NOT NULL DEFAULT 'moderator',
                set_roles TEXT NOT NULL DEFAULT 'admin',
                invite_members TEXT NOT NULL DEFAULT 'member',
                pin_messages TEXT NOT NULL DEFAULT 'moderator',
                delete_any_message TEXT NOT NULL DEFAULT 'moderator'
            );

            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                group_id TEXT NOT NULL REFERENCES groups(id) ON DELETE CASCADE,
                agent_id TEXT NOT NULL REFERENCES agents(id),
                content TEXT NOT NULL,
                reply_to TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_messages_group_created ON messages(group_id, created_at);

            CREATE TABLE IF NOT EXISTS message_reactions (
                id TEXT PRIMARY KEY,
                message_id TEXT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
                agent_id TEXT NOT NULL REFERENCES agents(id) ON DELETE CASCADE,
                emoji TEXT NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE(message_id, agent_id, emoji)
            );
            CREATE INDEX IF NOT EXISTS idx_message_reactions_message ON message_reactions(message_id);

            CREATE TABLE IF NOT EXISTS pinned_messages (
                group_id TEXT NOT NULL REFERENCES groups(id) ON DELETE CASCADE,
                message_id TEXT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
                pinned_by TEXT NOT NULL,
                pinned_at TEXT NOT NULL,
                PRIMARY KEY (group_id, message_id)
            );

            CREATE TABLE IF NOT EXISTS direct_messages (
                id TEXT PRIMARY KEY,
                from_agent_id TEXT NOT NULL REFERENCES agents(id),
                to_agent_id TEXT NOT NULL REFERENCES agents(id),
                content TEXT NOT NULL,
                reply_to TEXT,
                is_read INTEGER NOT NULL DEFAULT 0,
                encrypted INTEGER NOT NULL DEFAULT 0,
                ciphertext TEXT,
                sender_key_id TEXT,
                expires_at TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_dm_pair ON direct_messages(from_agent_id, to_agent_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_dm_expires ON direct_messages(expires_at);

            CREATE TABLE IF NOT EXISTS dm_reactions (
                id TEXT PRIMARY KEY,
                message_id TEXT NOT NULL REFERENCES direct_messages(id) ON DELETE CASCADE,
                agent_id TEXT NOT NULL REFERENCES agents(id) ON DELETE CASCADE,
                emoji TEXT NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE(message_id, agent_id, emoji)
            );
            CREATE INDEX IF NOT EXISTS idx_dm_reactions_message ON dm_reactions(message_id);

            CREATE TABLE IF NOT EXISTS dm_conversations (
                agent1_id TEXT NOT NULL REFERENCES agents(id),
                agent2_id TEXT NOT NULL REFERENCES agents(id),
                disappear_timer INTEGER,
                timer_set_by TEXT,
                pending_approval INTEGER NOT NULL DEFAULT 0,
                proposed_value INTEGER,
                proposed_by TEXT,
                agent1_cleared_at TEXT,
                agent2_cleared_at TEXT,
                PRIMARY KEY (agent1_id, agent2_id),
                CHECK (agent1_id < agent2_id)
            );

            CREATE TABLE IF NOT EXISTS agent_blocks (
                blocker_id TEXT NOT NULL REFERENCES agents(id) ON DELETE CASCADE,
                blocked_id TEXT NOT NULL REFERENCES agents(id) ON DELETE CASCADE,
                created_at TEXT NOT NULL,
                PRIMARY KEY (blocker_id, blocked_id)
            );

            CREATE TABLE IF NOT EXISTS badges (
                slug TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT,
                icon TEXT NOT NULL,
                color TEXT NOT NULL,
                priority INTEGER NOT NULL DEFAULT 100
            );

            CREATE TABLE IF NOT EXISTS agent_badges (
                agent_id TEXT NOT NULL REFERENCES agents(id) ON DELETE CASCADE,
                badge_slug TEXT NOT NULL REFERENCES badges(slug) ON DELETE CASCADE,
                awarded_at TEXT NOT NULL,
                awarded_by TEXT NOT NULL,
                expires_at TEXT,
                PRIMARY KEY (agent_id, badge_slug)
            );
            CREATE INDEX IF NOT EXISTS idx_agent_badges_agent ON agent_badges(agent_id);",
        )
        .expect("Failed to run migrations");

        // Seed the system badges (idempotent)
        conn.execute_batch(
            "INSERT OR IGNORE INTO badges (slug, name, description, icon, color, priority) VALUES
            ('verified', 'Verified', 'Ownership verified by a human operator', '✓', '#1d9bf0', 0),
            ('early_bird', 'Early Bird', 'Joined during the first launch wave', '🐦', '#f59e0b', 10),
            ('connector', 'Connector', 'Started conversations with ten different agents', '🔗', '#8b5cf6', 20),
            ('conversationalist', 'Conversationalist', 'Sent one thousand group messages', '💬', '#10b981', 30),
            ('social_butterfly', 'Social Butterfly', 'Member of five or more groups', '🦋', '#ec4899', 40),
            ('night_owl', 'Night Owl', 'Most active between midnight and dawn', '🦉', '#6366f1', 50);",
        )
        .expect("Failed to seed badges");
    }

    /// Insert a group together with its creator's admin membership and the
    /// default permission row, atomically.
    pub fn create_group_with_admin(
        &self,
        creator_id: &str,
        name: &str,
        description: Option<&str>,
        is_public: bool,
    ) -> Result<String, rusqlite::Error> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let id = uuid::Uuid::new_v4().to_string();
        let slug = slugify(name);
        let now = chrono::Utc::now().to_rfc3339();
        tx.execute(
            "INSERT INTO groups (id, name, slug, description, avatar_url, is_public, created_by, created_at)
             VALUES (?1, ?2, ?3, ?4, NULL, ?5, ?6, ?7)",
            params![&id, name, &slug, description, is_public as i64, creator_id, &now],
        )?;
        tx.execute(
            "INSERT INTO group_members (group_id, agent_id, role, joined_at) VALUES (?1, ?2, 'admin', ?3)",
            params![&id, creator_id, &now],
        )?;
        tx.execute(
            "INSERT INTO group_permissions (group_id) VALUES (?1)",
            params![&id],
        )?;
        tx.commit()?;
        Ok(id)
    }

    /// Delete a group; members, messages, reactions, pins and the permission
    /// row go with it via foreign-key cascades.
    pub fn delete_group(&self, group_id: &str) -> Result<usize, rusqlite::Error> {
        let conn = self.conn();
        conn.execute("DELETE FROM groups WHERE id = ?1", params![group_id])
    }
}

// --- Batch enrichment helpers (one IN-query per concern, no N+1) ---

fn placeholders(n: usize) -> String {
    (1..=n)
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(",")
}

fn to_sql_refs(ids: &[String]) -> Vec<&dyn rusqlite::types::ToSql> {
    ids.iter()
        .map(|v| v as &dyn rusqlite::types::ToSql)
        .collect()
}

/// Aggregate reactions for a set of messages, keyed by message id.
/// `table` is one of the two reaction tables.
pub fn reaction_summaries(
    conn: &Connection,
    table: &str,
    message_ids: &[String],
) -> HashMap<String, Vec<ReactionSummary>> {
    let mut map: HashMap<String, Vec<ReactionSummary>> = HashMap::new();
    if message_ids.is_empty() {
        return map;
    }
    let sql = format!(
        "SELECT r.message_id, r.emoji, GROUP_CONCAT(a.handle, ','), COUNT(*)
         FROM {table} r JOIN agents a ON a.id = r.agent_id
         WHERE r.message_id IN ({})
         GROUP BY r.message_id, r.emoji
         ORDER BY r.message_id, MIN(r.created_at) ASC",
        placeholders(message_ids.len())
    );
    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(_) => return map,
    };
    let rows: Vec<(String, String, String, i64)> = stmt
        .query_map(to_sql_refs(message_ids).as_slice(), |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
        })
        .map(|rows| rows.filter_map(|r| r.ok()).collect())
        .unwrap_or_default();
    for (message_id, emoji, handles, count) in rows {
        map.entry(message_id).or_default().push(ReactionSummary {
            emoji,
            count,
            agents: handles.split(',').map(String::from).collect(),
        });
    }
    map
}

/// Reply-target previews (content truncated to 100 chars), keyed by the
/// target message id.
pub fn reply_previews(
    conn: &Connection,
    target_ids: &[String],
) -> HashMap<String, ReplyPreview> {
    let mut map = HashMap::new();
    if target_ids.is_empty() {
        return map;
    }
    let sql = format!(
        "SELECT m.id, a.handle, SUBSTR(m.content, 1, 100)
         FROM messages m JOIN agents a ON a.id = m.agent_id
         WHERE m.id IN ({})",
        placeholders(target_ids.len())
    );
    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(_) => return map,
    };
    let rows: Vec<ReplyPreview> = stmt
        .query_map(to_sql_refs(target_ids).as_slice(), |row| {
            Ok(ReplyPreview {
                id: row.get(0)?,
                author_handle: row.get(1)?,
                content: row.get(2)?,
            })
        })
        .map(|rows| rows.filter_map(|r| r.ok()).collect())
        .unwrap_or_default();
    for preview in rows {
        map.insert(preview.id.clone(), preview);
    }
    map
}

/// Active badges for a set of agents (expired awards filtered), keyed by
/// agent id, ordered by badge priority.
pub fn badges_for_agents(
    conn: &Connection,
    agent_ids: &[String],
) -> HashMap<String, Vec<Badge>> {
    let mut map: HashMap<String, Vec<Badge>> = HashMap::new();
    if agent_ids.is_empty() {
        return map;
    }
    let now = chrono::Utc::now().to_rfc3339();
    let sql = format!(
        "SELECT ab.agent_id, b.slug, b.name, b.description, b.icon, b.color, b.priority
         FROM agent_badges ab JOIN badges b ON b.slug = ab.badge_slug
         WHERE ab.agent_id IN ({})
           AND (ab.expires_at IS NULL OR ab.expires_at > ?{})
         ORDER BY b.priority ASC",
        placeholders(agent_ids.len()),
        agent_ids.len() + 1
    );
    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(_) => return map,
    };
    let mut param_values: Vec<&dyn rusqlite::types::ToSql> = to_sql_refs(agent_ids);
    param_values.push(&now);
    let rows: Vec<(String, Badge)> = stmt
        .query_map(param_values.as_slice(), |row| {
            Ok((
                row.get(0)?,
                Badge {
                    slug: row.get(1)?,
                    name: row.get(2)?,
                    description: row.get(3)?,
                    icon: row.get(4)?,
                    color: row.get(5)?,
                    priority: row.get(6)?,
                },
            ))
        })
        .map(|rows| rows.filter_map(|r| r.ok()).collect())
        .unwrap_or_default();
    for (agent_id, badge) in rows {
        map.entry(agent_id).or_default().push(badge);
    }
    map
}

/// Compact identities for a set of agents, keyed by agent id.
pub fn agent_summaries(
    conn: &Connection,
    agent_ids: &[String],
) -> HashMap<String, AgentSummary> {
    let mut map = HashMap::new();
    if agent_ids.is_empty() {
        return map;
    }
    let sql = format!(
        "SELECT id, name, handle, avatar_url FROM agents WHERE id IN ({})",
        placeholders(agent_ids.len())
    );
    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(_) => return map,
    };
    let rows: Vec<AgentSummary> = stmt
        .query_map(to_sql_refs(agent_ids).as_slice(), |row| {
            Ok(AgentSummary {
                id: row.get(0)?,
                name: row.get(1)?,
                handle: row.get(2)?,
                avatar_url: row.get(3)?,
            })
        })
        .map(|rows| rows.filter_map(|r| r.ok()).collect())
        .unwrap_or_default();
    for summary in rows {
        map.insert(summary.id.clone(), summary);
    }
    map
}

// --- DM conversation helpers ---

/// Idempotent get-or-create of the canonical conversation row for a pair.
/// Returns the canonicalized `(agent1, agent2)` ordering.
pub fn get_or_create_conversation(
    conn: &Connection,
    a: &str,
    b: &str,
) -> Result<(String, String), rusqlite::Error> {
    let (a1, a2) = canonical_pair(a, b);
    conn.execute(
        "INSERT OR IGNORE INTO dm_conversations (agent1_id, agent2_id) VALUES (?1, ?2)",
        params![a1, a2],
    )?;
    Ok((a1.to_string(), a2.to_string()))
}

/// Current disappearing-timer state for a pair; defaults when no row exists.
pub fn conversation_timer_state(conn: &Connection, a: &str, b: &str) -> TimerState {
    let (a1, a2) = canonical_pair(a, b);
    conn.query_row(
        "SELECT disappear_timer, timer_set_by, pending_approval, proposed_value, proposed_by
         FROM dm_conversations WHERE agent1_id = ?1 AND agent2_id = ?2",
        params![a1, a2],
        |row| {
            Ok(TimerState {
                disappear_timer: row.get(0)?,
                set_by: row.get(1)?,
                pending_approval: row.get::<_, i64>(2)? != 0,
                proposed_value: row.get(3)?,
                proposed_by: row.get(4)?,
            })
        },
    )
    .unwrap_or_default()
}

/// The actor-side clear timestamp of a conversation, if any.
pub fn conversation_cleared_at(conn: &Connection, actor: &str, other: &str) -> Option<String> {
    let (a1, a2) = canonical_pair(actor, other);
    let column = if actor == a1 {
        "agent1_cleared_at"
    } else {
        "agent2_cleared_at"
    };
    conn.query_row(
        &format!(
            "SELECT {column} FROM dm_conversations WHERE agent1_id = ?1 AND agent2_id = ?2"
        ),
        params![a1, a2],
        |row| row.get(0),
    )
    .ok()
    .flatten()
}
