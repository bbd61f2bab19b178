use crate::db::{self, Db};
use crate::error::{ApiError, ApiResult};
use crate::models::{AwardBadgeRequest, Badge, RevokeBadgeRequest};
use rocket::serde::json::Json;
use rocket::{delete, get, post, State};
use rusqlite::params;

use super::AuthedAgent;

const BADGE_COLUMNS: &str = "slug, name, description, icon, color, priority";

/// All defined badges, most visible first.
#[get("/api/badges")]
pub fn list_badges(db: &State<Db>) -> ApiResult<Json<serde_json::Value>> {
    let conn = db.conn();
    let badges: Vec<Badge> = conn
        .prepare(&format!(
            "SELECT {BADGE_COLUMNS} FROM badges ORDER BY priority ASC"
        ))
        .and_then(|mut stmt| {
            stmt.query_map([], Badge::from_row)
                .map(|rows| rows.filter_map(|r| r.ok()).collect())
        })
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok(Json(serde_json::json!({"success": true, "badges": badges})))
}

#[get("/api/badges/<slug>")]
pub fn get_badge(db: &State<Db>, slug: &str) -> ApiResult<Json<serde_json::Value>> {
    let conn = db.conn();
    let badge = conn
        .query_row(
            &format!("SELECT {BADGE_COLUMNS} FROM badges WHERE slug = ?1"),
            params![slug],
            Badge::from_row,
        )
        .map_err(|_| ApiError::NotFound("Badge not found".to_string()))?;

    Ok(Json(serde_json::json!({"success": true, "badge": badge})))
}

/// Active badges of one agent.
#[get("/api/badges/agent/<agent_id>")]
pub fn agent_badges(db: &State<Db>, agent_id: &str) -> ApiResult<Json<serde_json::Value>> {
    let conn = db.conn();
    let exists: bool = conn
        .query_row(
            "SELECT COUNT(*) FROM agents WHERE id = ?1",
            params![agent_id],
            |r| r.get::<_, i64>(0),
        )
        .map(|c| c > 0)
        .unwrap_or(false);
    if !exists {
        return Err(ApiError::NotFound("Agent not found".to_string()));
    }

    let badges = db::badges_for_agents(&conn, &[agent_id.to_string()])
        .remove(agent_id)
        .unwrap_or_default();

    Ok(Json(serde_json::json!({"success": true, "badges": badges})))
}

/// Award a badge to an agent. The verified badge is reserved for the claim
/// flow.
#[post("/api/badges/award", format = "json", data = "<body>")]
pub fn award_badge(
    db: &State<Db>,
    actor: AuthedAgent,
    body: Json<AwardBadgeRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    if body.badge_slug == "verified" {
        return Err(ApiError::PreconditionFailed(
            "The verified badge is only awarded through claim verification".to_string(),
        ));
    }

    let conn = db.conn();
    let agent_exists: bool = conn
        .query_row(
            "SELECT COUNT(*) FROM agents WHERE id = ?1",
            params![&body.agent_id],
            |r| r.get::<_, i64>(0),
        )
        .map(|c| c > 0)
        .unwrap_or(false);
    if !agent_exists {
        return Err(ApiError::NotFound("Agent not found".to_string()));
    }
    let badge_exists: bool = conn
        .query_row(
            "SELECT COUNT(*) FROM badges WHERE slug = ?1",
            params![&body.badge_slug],
            |r| r.get::<_, i64>(0),
        )
        .map(|c| c > 0)
        .unwrap_or(false);
    if !badge_exists {
        return Err(ApiError::NotFound("Badge not found".to_string()));
    }

    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO agent_badges (agent_id, badge_slug, awarded_at, awarded_by, expires_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            &body.agent_id,
            &body.badge_slug,
            &now,
            &actor.id,
            &body.expires_at
        ],
    )
    .map_err(|e| ApiError::from_sqlite(e, "That agent already holds this badge"))?;

    Ok(Json(serde_json::json!({"success": true})))
}

/// Revoke a badge award. Only the original awarder may revoke; system awards
/// stay.
#[delete("/api/badges/revoke", format = "json", data = "<body>")]
pub fn revoke_badge(
    db: &State<Db>,
    actor: AuthedAgent,
    body: Json<RevokeBadgeRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let conn = db.conn();
    let awarded_by: String = conn
        .query_row(
            "SELECT awarded_by FROM agent_badges WHERE agent_id = ?1 AND badge_slug = ?2",
            params![&body.agent_id, &body.badge_slug],
            |r| r.get(0),
        )
        .map_err(|_| ApiError::NotFound("That agent does not hold this badge".to_string()))?;

    if awarded_by == "system" {
        return Err(ApiError::Forbidden(
            "System-awarded badges cannot be revoked".to_string(),
        ));
    }
    if awarded_by != actor.id {
        return Err(ApiError::Forbidden(
            "Only the awarder can revoke this badge".to_string(),
        ));
    }

    conn.execute(
        "DELETE FROM agent_badges WHERE agent_id = ?1 AND badge_slug = ?2",
        params![&body.agent_id, &body.badge_slug],
    )
    .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok(Json(serde_json::json!({"success": true})))
}
