use rocket::http::{Header, Status};
use rocket::response::{self, Responder, Response};
use rocket::serde::json::Json;
use rocket::Request;

/// Error taxonomy shared by every service. Routes return `ApiResult<T>` and
/// the responder shapes the body as `{"success": false, "error": "..."}`
/// with the matching HTTP status.
#[derive(Debug)]
pub enum ApiError {
    Unauthenticated(String),
    Forbidden(String),
    NotFound(String),
    Conflict(String),
    Invalid(String),
    PreconditionFailed(String),
    ExternalUnavailable(String),
    Internal(String),
    RateLimited {
        message: String,
        limit: usize,
        retry_after_secs: u64,
    },
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn status(&self) -> Status {
        match self {
            ApiError::Unauthenticated(_) => Status::Unauthorized,
            ApiError::Forbidden(_) => Status::Forbidden,
            ApiError::NotFound(_) => Status::NotFound,
            ApiError::Conflict(_) => Status::Conflict,
            ApiError::Invalid(_) => Status::BadRequest,
            ApiError::PreconditionFailed(_) => Status::PreconditionFailed,
            ApiError::ExternalUnavailable(_) => Status::BadGateway,
            ApiError::Internal(_) => Status::InternalServerError,
            ApiError::RateLimited { .. } => Status::TooManyRequests,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ApiError::Unauthenticated(m)
            | ApiError::Forbidden(m)
            | ApiError::NotFound(m)
            | ApiError::Conflict(m)
            | ApiError::Invalid(m)
            | ApiError::PreconditionFailed(m)
            | ApiError::ExternalUnavailable(m)
            | ApiError::Internal(m) => m,
            ApiError::RateLimited { message, .. } => message,
        }
    }

    /// Translate a store error: UNIQUE violations become `Conflict`, anything
    /// else is `Internal`.
    pub fn from_sqlite(e: rusqlite::Error, conflict_msg: &str) -> ApiError {
        if e.to_string().contains("UNIQUE") {
            ApiError::Conflict(conflict_msg.to_string())
        } else {
            ApiError::Internal(e.to_string())
        }
    }
}

impl<'r, 'o: 'r> Responder<'r, 'o> for ApiError {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'o> {
        let status = self.status();
        let body = Json(serde_json::json!({
            "success": false,
            "error": self.message(),
        }));

        let mut response = Response::build_from(body.respond_to(req)?)
            .status(status)
            .finalize();

        if let ApiError::RateLimited {
            limit,
            retry_after_secs,
            ..
        } = self
        {
            response.set_header(Header::new("X-RateLimit-Limit", limit.to_string()));
            response.set_header(Header::new("X-RateLimit-Remaining", "0"));
            response.set_header(Header::new("Retry-After", retry_after_secs.to_string()));
        }

        Ok(response)
    }
}
