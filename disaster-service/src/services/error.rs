use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use service_core::error::AppError;
use service_core::pool::PoolError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("Email already registered")]
    EmailAlreadyRegistered,

    #[error("Google account already linked to another user")]
    GoogleAccountAlreadyLinked,

    #[error("Email already registered; Google has not verified it, so it cannot be linked")]
    UnverifiedEmailLink,

    #[error("User not found")]
    UserNotFound,

    #[error("Report not found")]
    ReportNotFound,

    #[error("Subscription not found")]
    SubscriptionNotFound,

    #[error("Cannot move a report from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("{0}")]
    Forbidden(String),

    #[error("Daily chat limit of {limit} requests reached")]
    QuotaExceeded { limit: u64, retry_after: u64 },

    #[error("Assistant error: {0}")]
    Assistant(String),

    #[error("Email error: {0}")]
    EmailError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Database(e) => AppError::DatabaseError(anyhow::Error::new(e)),
            ServiceError::Pool(e) => e.into(),
            ServiceError::Redis(e) => AppError::RedisError(e),
            ServiceError::Internal(e) => AppError::InternalError(e),
            ServiceError::Auth(e) => e.into(),
            ServiceError::EmailAlreadyRegistered => {
                AppError::Conflict(anyhow::anyhow!("Email already registered"))
            }
            e @ (ServiceError::GoogleAccountAlreadyLinked | ServiceError::UnverifiedEmailLink) => {
                AppError::Conflict(anyhow::anyhow!(e.to_string()))
            }
            ServiceError::UserNotFound => AppError::NotFound(anyhow::anyhow!("User not found")),
            ServiceError::ReportNotFound => AppError::NotFound(anyhow::anyhow!("Report not found")),
            ServiceError::SubscriptionNotFound => {
                AppError::NotFound(anyhow::anyhow!("Subscription not found"))
            }
            e @ ServiceError::InvalidTransition { .. } => {
                AppError::Conflict(anyhow::anyhow!(e.to_string()))
            }
            ServiceError::Forbidden(msg) => AppError::Forbidden(anyhow::anyhow!(msg)),
            e @ ServiceError::QuotaExceeded { .. } => {
                let retry = match &e {
                    ServiceError::QuotaExceeded { retry_after, .. } => Some(*retry_after),
                    _ => None,
                };
                AppError::TooManyRequests(e.to_string(), retry)
            }
            ServiceError::Assistant(e) => AppError::BadGateway(e),
            ServiceError::EmailError(e) => AppError::EmailError(e),
            ServiceError::ValidationError(e) => AppError::BadRequest(anyhow::anyhow!(e)),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        AppError::from(self).into_response()
    }
}

/// Why a request failed authentication or authorization.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    #[error("Missing or malformed Authorization header")]
    MissingToken,

    #[error("Invalid session token")]
    MalformedToken,

    #[error("Session token has expired")]
    ExpiredToken,

    #[error("Session token has no user id")]
    MissingSubject,

    #[error("Admin role required")]
    InsufficientRole,

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Invalid identity token")]
    InvalidToken,
}

impl AuthError {
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::MissingToken => "missing_token",
            AuthError::MalformedToken => "malformed_token",
            AuthError::ExpiredToken => "expired_token",
            AuthError::MissingSubject => "missing_subject",
            AuthError::InsufficientRole => "insufficient_role",
            AuthError::InvalidCredentials => "invalid_credentials",
            AuthError::InvalidToken => "invalid_token",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::InsufficientRole => StatusCode::FORBIDDEN,
            _ => StatusCode::UNAUTHORIZED,
        }
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        metrics::counter!("auth_rejections_total", "reason" => err.code()).increment(1);
        AppError::Rejected {
            status: err.status(),
            code: err.code(),
            message: err.to_string(),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        AppError::from(self).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_insufficient_role_is_forbidden() {
        for err in [
            AuthError::MissingToken,
            AuthError::MalformedToken,
            AuthError::ExpiredToken,
            AuthError::MissingSubject,
            AuthError::InvalidCredentials,
            AuthError::InvalidToken,
        ] {
            assert_eq!(err.status(), StatusCode::UNAUTHORIZED, "{err:?}");
        }
        assert_eq!(AuthError::InsufficientRole.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_service_error_mapping() {
        let resp = AppError::from(ServiceError::InvalidTransition {
            from: "resolved".into(),
            to: "pending".into(),
        })
        .into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let resp = AppError::from(ServiceError::QuotaExceeded {
            limit: 3,
            retry_after: 60,
        })
        .into_response();
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(resp.headers()["retry-after"], "60");

        let resp = AppError::from(ServiceError::Pool(PoolError::Closed)).into_response();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
