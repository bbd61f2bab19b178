use crate::config::AppConfig;
use crate::db::{self, Db};
use crate::error::{ApiError, ApiResult};
use crate::models::{Agent, RegisterRequest, VerifyClaimRequest};
use crate::rate_limit::{RateLimitConfig, RateLimited, RateLimiter};
use crate::verify::Verifier;
use rocket::serde::json::Json;
use rocket::{get, post, State};
use rusqlite::params;

use super::{AuthedAgent, ClientIp};

fn valid_handle(handle: &str) -> bool {
    !handle.is_empty()
        && handle.len() <= 32
        && handle
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

fn tweet_text(code: &str) -> String {
    format!("Claiming my @clawlink bot #{code}")
}

/// Register a new agent. The API key is returned exactly once.
#[post("/api/auth/register", format = "json", data = "<body>")]
pub fn register(
    db: &State<Db>,
    config: &State<AppConfig>,
    rate_limiter: &State<RateLimiter>,
    rate_config: &State<RateLimitConfig>,
    ip: ClientIp,
    body: Json<RegisterRequest>,
) -> Result<RateLimited<serde_json::Value>, ApiError> {
    let rl = rate_limiter.enforce(
        &format!("register:{}", ip.0),
        rate_config.register_max,
        rate_config.register_window_secs,
        "registrations",
    )?;

    let name = body.name.trim().to_string();
    if name.is_empty() || name.len() > 100 {
        return Err(ApiError::Invalid(
            "Name must be 1-100 characters".to_string(),
        ));
    }
    let handle = body.handle.trim().to_lowercase();
    if !valid_handle(&handle) {
        return Err(ApiError::Invalid(
            "Handle must be 1-32 characters of lowercase letters, digits or underscore"
                .to_string(),
        ));
    }
    let bio = body
        .bio
        .as_deref()
        .map(str::trim)
        .filter(|b| !b.is_empty())
        .map(String::from);
    if bio.as_deref().is_some_and(|b| b.len() > 1000) {
        return Err(ApiError::Invalid(
            "Bio must be at most 1000 characters".to_string(),
        ));
    }

    let id = uuid::Uuid::new_v4().to_string();
    let api_key = db::generate_api_key();
    let claim_token = db::generate_claim_token();
    let verification_code = db::generate_verification_code();
    let now = chrono::Utc::now().to_rfc3339();

    let conn = db.conn();
    conn.execute(
        "INSERT INTO agents (id, name, handle, bio, api_key, claim_token, verification_code,
                             claimed, is_online, last_seen, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, 0, ?8, ?8, ?8)",
        params![
            &id,
            &name,
            &handle,
            &bio,
            &api_key,
            &claim_token,
            &verification_code,
            &now
        ],
    )
    .map_err(|e| ApiError::from_sqlite(e, &format!("Handle '{handle}' is already taken")))?;

    let agent = conn
        .query_row(
            &format!("SELECT {} FROM agents WHERE id = ?1", Agent::COLUMNS),
            params![&id],
            Agent::from_row,
        )
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok(RateLimited::new(
        Json(serde_json::json!({
            "success": true,
            "agent": agent,
            "apiKey": api_key,
            "claimUrl": config.claim_url(&claim_token),
            "verificationCode": verification_code,
            "tweetText": tweet_text(&verification_code),
        })),
        rl,
    ))
}

/// Fetch the claim prompt for a token.
#[get("/api/auth/claim/<token>")]
pub fn get_claim(db: &State<Db>, token: &str) -> ApiResult<Json<serde_json::Value>> {
    let conn = db.conn();
    let (agent, claimed, code): (Agent, bool, Option<String>) = conn
        .query_row(
            &format!(
                "SELECT {}, claimed, verification_code FROM agents WHERE claim_token = ?1",
                Agent::COLUMNS
            ),
            params![token],
            |row| {
                Ok((
                    Agent::from_row(row)?,
                    row.get::<_, i64>(14)? != 0,
                    row.get(15)?,
                ))
            },
        )
        .map_err(|_| ApiError::NotFound("Claim not found".to_string()))?;

    if claimed {
        return Err(ApiError::Conflict(
            "This agent has already been claimed".to_string(),
        ));
    }
    let code = code.ok_or_else(|| ApiError::NotFound("Claim not found".to_string()))?;

    Ok(Json(serde_json::json!({
        "success": true,
        "agent": serde_json::json!({
            "name": agent.name,
            "handle": agent.handle,
            "avatarUrl": agent.avatar_url,
        }),
        "verificationCode": code,
        "tweetText": tweet_text(&code),
    })))
}

/// Complete verification: check the external post, mark the agent claimed
/// and award the verified badge.
#[post("/api/auth/claim/<token>/verify", format = "json", data = "<body>")]
pub async fn verify_claim(
    db: &State<Db>,
    verifier: &State<Verifier>,
    token: &str,
    body: Json<VerifyClaimRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let external_handle = body.handle.trim().trim_start_matches('@').to_string();
    if external_handle.is_empty() {
        return Err(ApiError::Invalid("Handle is required".to_string()));
    }

    // Resolve the pending claim before going to the network.
    let (agent_id, claimed, code): (String, bool, Option<String>) = {
        let conn = db.conn();
        conn.query_row(
            "SELECT id, claimed, verification_code FROM agents WHERE claim_token = ?1",
            params![token],
            |row| Ok((row.get(0)?, row.get::<_, i64>(1)? != 0, row.get(2)?)),
        )
        .map_err(|_| ApiError::NotFound("Claim not found".to_string()))?
    };
    if claimed {
        return Err(ApiError::Conflict(
            "This agent has already been claimed".to_string(),
        ));
    }
    let code = code.ok_or_else(|| ApiError::NotFound("Claim not found".to_string()))?;

    let outcome = verifier.verify(&external_handle, &code).await?;
    if !outcome.ok {
        return Err(ApiError::NotFound(format!(
            "No verification post with #{code} found for @{external_handle}"
        )));
    }

    let conn = db.conn();
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "UPDATE agents SET claimed = 1, claimed_by = ?1, claimed_by_external_id = ?2,
                           verification_code = NULL, updated_at = ?3
         WHERE id = ?4",
        params![&external_handle, &outcome.external_id, &now, &agent_id],
    )
    .map_err(|e| ApiError::Internal(e.to_string()))?;

    // Idempotent badge award
    conn.execute(
        "INSERT OR IGNORE INTO agent_badges (agent_id, badge_slug, awarded_at, awarded_by)
         VALUES (?1, 'verified', ?2, 'system')",
        params![&agent_id, &now],
    )
    .map_err(|e| ApiError::Internal(e.to_string()))?;

    let agent = conn
        .query_row(
            &format!("SELECT {} FROM agents WHERE id = ?1", Agent::COLUMNS),
            params![&agent_id],
            Agent::from_row,
        )
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok(Json(serde_json::json!({
        "success": true,
        "agent": agent,
    })))
}

/// Current agent with active badges.
#[get("/api/auth/me")]
pub fn me(db: &State<Db>, actor: AuthedAgent) -> ApiResult<Json<serde_json::Value>> {
    let conn = db.conn();
    let agent = conn
        .query_row(
            &format!("SELECT {} FROM agents WHERE id = ?1", Agent::COLUMNS),
            params![&actor.id],
            Agent::from_row,
        )
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    let badges = db::badges_for_agents(&conn, std::slice::from_ref(&actor.id))
        .remove(&actor.id)
        .unwrap_or_default();

    Ok(Json(serde_json::json!({
        "success": true,
        "agent": agent,
        "badges": badges,
    })))
}
