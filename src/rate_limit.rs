use std::collections::HashMap;
use std::env;
use std::sync::Mutex;
use std::time::Instant;

use crate::error::ApiError;
use rocket::http::Header;
use rocket::response::{self, Responder, Response};
use rocket::serde::json::Json;
use rocket::Request;

/// Configurable rate limit values. All read from environment variables with
/// sensible defaults.
///
/// Environment variables:
/// - `RATE_LIMIT_REGISTER` — Max registrations per hour per IP (default: 5)
/// - `RATE_LIMIT_GROUPS` — Max group creations per hour per IP (default: 10)
/// - `RATE_LIMIT_MESSAGES` — Max group messages per minute per IP (default: 60)
/// - `RATE_LIMIT_DMS` — Max DMs per minute per IP (default: 60)
pub struct RateLimitConfig {
    /// Registrations per hour per IP
    pub register_max: usize,
    pub register_window_secs: u64,
    /// Group creations per hour per IP
    pub groups_max: usize,
    pub groups_window_secs: u64,
    /// Group messages per minute per IP
    pub messages_max: usize,
    pub messages_window_secs: u64,
    /// DMs per minute per IP
    pub dms_max: usize,
    pub dms_window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            register_max: 5,
            register_window_secs: 3600,
            groups_max: 10,
            groups_window_secs: 3600,
            messages_max: 60,
            messages_window_secs: 60,
            dms_max: 60,
            dms_window_secs: 60,
        }
    }
}

impl RateLimitConfig {
    /// Create a new RateLimitConfig from environment variables, with defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = env::var("RATE_LIMIT_REGISTER")
            && let Ok(n) = val.parse::<usize>()
        {
            config.register_max = n;
        }
        if let Ok(val) = env::var("RATE_LIMIT_GROUPS")
            && let Ok(n) = val.parse::<usize>()
        {
            config.groups_max = n;
        }
        if let Ok(val) = env::var("RATE_LIMIT_MESSAGES")
            && let Ok(n) = val.parse::<usize>()
        {
            config.messages_max = n;
        }
        if let Ok(val) = env::var("RATE_LIMIT_DMS")
            && let Ok(n) = val.parse::<usize>()
        {
            config.dms_max = n;
        }

        config
    }
}

pub struct RateLimiter {
    limits: Mutex<HashMap<String, Vec<Instant>>>,
}

/// Information about rate limit status for a given key.
#[derive(Debug, Clone)]
pub struct RateLimitInfo {
    pub allowed: bool,
    pub limit: usize,
    pub remaining: usize,
    /// Seconds until the oldest request in the window expires (i.e. a slot
    /// opens). 0 if there's remaining capacity.
    pub retry_after_secs: u64,
}

/// Wrapper that adds standard rate limit headers to any JSON response.
/// Headers: X-RateLimit-Limit, X-RateLimit-Remaining, X-RateLimit-Reset
pub struct RateLimited<T> {
    pub inner: Json<T>,
    pub info: RateLimitInfo,
}

impl<T> RateLimited<T> {
    pub fn new(inner: Json<T>, info: RateLimitInfo) -> Self {
        Self { inner, info }
    }
}

impl<'r, 'o: 'r, T: serde::Serialize + 'o> Responder<'r, 'o> for RateLimited<T> {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'o> {
        let response = Response::build_from(self.inner.respond_to(req)?)
            .header(Header::new(
                "X-RateLimit-Limit",
                self.info.limit.to_string(),
            ))
            .header(Header::new(
                "X-RateLimit-Remaining",
                self.info.remaining.to_string(),
            ))
            .header(Header::new(
                "X-RateLimit-Reset",
                self.info.retry_after_secs.to_string(),
            ))
            .finalize();
        Ok(response)
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        RateLimiter {
            limits: Mutex::new(HashMap::new()),
        }
    }

    /// Check rate limit and return detailed info for response headers.
    /// `key` is typically "action:ip".
    pub fn check_with_info(&self, key: &str, max: usize, window_secs: u64) -> RateLimitInfo {
        let mut limits = self.limits.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        let window = std::time::Duration::from_secs(window_secs);

        let entries = limits.entry(key.to_string()).or_default();

        // Remove expired entries
        entries.retain(|t| now.duration_since(*t) < window);

        if entries.len() >= max {
            let oldest = match entries.iter().min() {
                Some(t) => t,
                None => {
                    return RateLimitInfo {
                        allowed: false,
                        remaining: 0,
                        limit: max,
                        retry_after_secs: 1,
                    };
                }
            };
            let elapsed = now.duration_since(*oldest);
            let retry_after = if elapsed < window {
                (window - elapsed).as_secs() + 1 // +1 so the slot is actually open
            } else {
                1
            };

            return RateLimitInfo {
                allowed: false,
                limit: max,
                remaining: 0,
                retry_after_secs: retry_after,
            };
        }

        entries.push(now);
        let remaining = max - entries.len();

        RateLimitInfo {
            allowed: true,
            limit: max,
            remaining,
            retry_after_secs: 0,
        }
    }

    /// Check and convert a denial into the gateway's 429 error.
    pub fn enforce(
        &self,
        key: &str,
        max: usize,
        window_secs: u64,
        what: &str,
    ) -> Result<RateLimitInfo, ApiError> {
        let info = self.check_with_info(key, max, window_secs);
        if info.allowed {
            Ok(info)
        } else {
            Err(ApiError::RateLimited {
                message: format!("Rate limited: max {max} {what} per {window_secs} seconds"),
                limit: info.limit,
                retry_after_secs: info.retry_after_secs,
            })
        }
    }
}
