//! External ownership verification: does a public post by `handle` contain
//! the agent's verification code?

use crate::config::AppConfig;
use crate::error::ApiError;
use std::time::Duration;

/// Bound on each call to the verification provider.
const VERIFY_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone)]
pub struct VerificationOutcome {
    pub ok: bool,
    pub external_id: Option<String>,
}

/// Verification strategy resolved from configuration at startup.
pub enum Verifier {
    /// Looks the handle up on the Twitter API and scans recent posts for
    /// `#<code>`.
    Twitter {
        client: reqwest::Client,
        bearer: String,
    },
    /// Dev-mode short-circuit: every claim verifies. Only active when no
    /// provider credential is configured; logged at liftoff.
    DevMode,
}

impl Verifier {
    pub fn from_config(config: &AppConfig) -> Self {
        match &config.twitter_bearer_token {
            Some(bearer) => Verifier::Twitter {
                client: reqwest::Client::builder()
                    .timeout(Duration::from_secs(VERIFY_TIMEOUT_SECS))
                    .build()
                    .expect("Failed to create verification HTTP client"),
                bearer: bearer.clone(),
            },
            None => Verifier::DevMode,
        }
    }

    pub async fn verify(
        &self,
        handle: &str,
        code: &str,
    ) -> Result<VerificationOutcome, ApiError> {
        match self {
            Verifier::DevMode => Ok(VerificationOutcome {
                ok: true,
                external_id: None,
            }),
            Verifier::Twitter { client, bearer } => {
                let handle = handle.trim_start_matches('@');

                let user: serde_json::Value = client
                    .get(format!(
                        "https://api.twitter.com/2/users/by/username/{handle}"
                    ))
                    .bearer_auth(bearer)
                    .send()
                    .await
                    .map_err(unavailable)?
                    .json()
                    .await
                    .map_err(unavailable)?;

                let Some(user_id) = user["data"]["id"].as_str() else {
                    return Ok(VerificationOutcome {
                        ok: false,
                        external_id: None,
                    });
                };

                let tweets: serde_json::Value = client
                    .get(format!("https://api.twitter.com/2/users/{user_id}/tweets"))
                    .query(&[("max_results", "10")])
                    .bearer_auth(bearer)
                    .send()
                    .await
                    .map_err(unavailable)?
                    .json()
                    .await
                    .map_err(unavailable)?;

                let needle = format!("#{code}");
                let found = tweets["data"]
                    .as_array()
                    .map(|posts| {
                        posts.iter().any(|t| {
                            t["text"].as_str().is_some_and(|text| text.contains(&needle))
                        })
                    })
                    .unwrap_or(false);

                Ok(VerificationOutcome {
                    ok: found,
                    external_id: Some(user_id.to_string()),
                })
            }
        }
    }
}

fn unavailable(e: reqwest::Error) -> ApiError {
    if e.is_timeout() {
        ApiError::ExternalUnavailable("Verification provider timed out".to_string())
    } else {
        ApiError::ExternalUnavailable(format!("Verification provider unavailable: {e}"))
    }
}
