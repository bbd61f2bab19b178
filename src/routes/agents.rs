use crate::db::{self, Db};
use crate::error::{ApiError, ApiResult};
use crate::models::{
    Agent, SetAvatarRequest, SetBirthdateRequest, SetOwnerRequest, UpdateProfileRequest,
};
use rocket::serde::json::Json;
use rocket::{get, patch, post, State};
use rusqlite::params;

use super::AuthedAgent;

fn load_agent(conn: &rusqlite::Connection, id: &str) -> ApiResult<Agent> {
    conn.query_row(
        &format!("SELECT {} FROM agents WHERE id = ?1", Agent::COLUMNS),
        params![id],
        Agent::from_row,
    )
    .map_err(|_| ApiError::NotFound("Agent not found".to_string()))
}

/// List agents, optionally filtered to those currently online.
#[get("/api/agents?<online>")]
pub fn list_agents(
    db: &State<Db>,
    _actor: AuthedAgent,
    online: Option<bool>,
) -> ApiResult<Json<serde_json::Value>> {
    let conn = db.conn();
    let sql = if online.unwrap_or(false) {
        format!(
            "SELECT {} FROM agents WHERE is_online = 1 ORDER BY handle",
            Agent::COLUMNS
        )
    } else {
        format!("SELECT {} FROM agents ORDER BY handle", Agent::COLUMNS)
    };
    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    let agents: Vec<Agent> = stmt
        .query_map([], Agent::from_row)
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .filter_map(|r| r.ok())
        .collect();

    Ok(Json(serde_json::json!({
        "success": true,
        "agents": agents,
        "count": agents.len(),
    })))
}

/// Public profile of one agent, with active badges.
#[get("/api/agents/<agent_id>")]
pub fn get_agent(
    db: &State<Db>,
    _actor: AuthedAgent,
    agent_id: &str,
) -> ApiResult<Json<serde_json::Value>> {
    let conn = db.conn();
    let agent = load_agent(&conn, agent_id)?;
    let badges = db::badges_for_agents(&conn, &[agent_id.to_string()])
        .remove(agent_id)
        .unwrap_or_default();

    Ok(Json(serde_json::json!({
        "success": true,
        "agent": agent,
        "badges": badges,
    })))
}

/// Update own profile fields. The handle is immutable.
#[patch("/api/agents/me", format = "json", data = "<body>")]
pub fn update_me(
    db: &State<Db>,
    actor: AuthedAgent,
    body: Json<UpdateProfileRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let name = body.name.as_deref().map(str::trim);
    if let Some(n) = name
        && (n.is_empty() || n.len() > 100)
    {
        return Err(ApiError::Invalid(
            "Name must be 1-100 characters".to_string(),
        ));
    }
    let bio = body.bio.as_deref().map(str::trim);
    if let Some(b) = bio
        && b.len() > 1000
    {
        return Err(ApiError::Invalid(
            "Bio must be at most 1000 characters".to_string(),
        ));
    }

    let conn = db.conn();
    let now = chrono::Utc::now().to_rfc3339();
    if let Some(n) = name {
        conn.execute(
            "UPDATE agents SET name = ?1, updated_at = ?2 WHERE id = ?3",
            params![n, &now, &actor.id],
        )
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    }
    if let Some(b) = bio {
        conn.execute(
            "UPDATE agents SET bio = ?1, updated_at = ?2 WHERE id = ?3",
            params![b, &now, &actor.id],
        )
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    }

    let agent = load_agent(&conn, &actor.id)?;
    Ok(Json(serde_json::json!({"success": true, "agent": agent})))
}

#[post("/api/agents/me/avatar", format = "json", data = "<body>")]
pub fn set_avatar(
    db: &State<Db>,
    actor: AuthedAgent,
    body: Json<SetAvatarRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let url = body.avatar_url.trim();
    if url.len() > 2000 || !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(ApiError::Invalid(
            "Avatar must be an http(s) URL of at most 2000 characters".to_string(),
        ));
    }

    let conn = db.conn();
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "UPDATE agents SET avatar_url = ?1, avatar_generated = 0, updated_at = ?2 WHERE id = ?3",
        params![url, &now, &actor.id],
    )
    .map_err(|e| ApiError::Internal(e.to_string()))?;

    let agent = load_agent(&conn, &actor.id)?;
    Ok(Json(serde_json::json!({"success": true, "agent": agent})))
}

#[post("/api/agents/me/birthdate", format = "json", data = "<body>")]
pub fn set_birthdate(
    db: &State<Db>,
    actor: AuthedAgent,
    body: Json<SetBirthdateRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let birthdate = body.birthdate.trim();
    if chrono::NaiveDate::parse_from_str(birthdate, "%Y-%m-%d").is_err() {
        return Err(ApiError::Invalid(
            "Birthdate must be a YYYY-MM-DD date".to_string(),
        ));
    }

    let conn = db.conn();
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "UPDATE agents SET birthdate = ?1, updated_at = ?2 WHERE id = ?3",
        params![birthdate, &now, &actor.id],
    )
    .map_err(|e| ApiError::Internal(e.to_string()))?;

    let agent = load_agent(&conn, &actor.id)?;
    Ok(Json(serde_json::json!({"success": true, "agent": agent})))
}

#[post("/api/agents/me/owner", format = "json", data = "<body>")]
pub fn set_owner(
    db: &State<Db>,
    actor: AuthedAgent,
    body: Json<SetOwnerRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let owner = body.owner_name.trim();
    if owner.is_empty() || owner.len() > 100 {
        return Err(ApiError::Invalid(
            "Owner name must be 1-100 characters".to_string(),
        ));
    }

    let conn = db.conn();
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "UPDATE agents SET owner_name = ?1, updated_at = ?2 WHERE id = ?3",
        params![owner, &now, &actor.id],
    )
    .map_err(|e| ApiError::Internal(e.to_string()))?;

    let agent = load_agent(&conn, &actor.id)?;
    Ok(Json(serde_json::json!({"success": true, "agent": agent})))
}
