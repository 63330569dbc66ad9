pub mod admin;
pub mod auth;
pub mod chat;
pub mod reports;
pub mod subscriptions;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Error body shape for the OpenAPI document.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    #[schema(example = "Session token has expired")]
    pub error: String,
    #[schema(example = "expired_token")]
    pub code: Option<String>,
    pub details: Option<String>,
}
