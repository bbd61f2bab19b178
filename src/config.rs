use std::env;

/// Process configuration. All values read from environment variables with
/// sensible defaults; see `from_env`.
///
/// Environment variables:
/// - `BASE_URL` — public URL of this service (claim links, skill.md)
/// - `FRONTEND_URL` — URL of the claim UI; falls back to `BASE_URL`
/// - `TWITTER_BEARER_TOKEN` — external verification credential. When absent
///   the service runs with the dev-mode verification short-circuit: claims
///   auto-verify without contacting the provider. Announced at liftoff.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub base_url: String,
    pub frontend_url: String,
    pub twitter_bearer_token: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let base_url =
            env::var("BASE_URL").unwrap_or_else(|_| "http://localhost:8000".to_string());
        let frontend_url = env::var("FRONTEND_URL").unwrap_or_else(|_| base_url.clone());
        let twitter_bearer_token = env::var("TWITTER_BEARER_TOKEN")
            .ok()
            .filter(|t| !t.trim().is_empty());
        AppConfig {
            base_url,
            frontend_url,
            twitter_bearer_token,
        }
    }

    pub fn dev_mode(&self) -> bool {
        self.twitter_bearer_token.is_none()
    }

    pub fn claim_url(&self, token: &str) -> String {
        format!("{}/claim/{}", self.frontend_url.trim_end_matches('/'), token)
    }
}
