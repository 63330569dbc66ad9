use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::services::assistant::ChatMessage;

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ChatRequest {
    #[validate(length(min = 1, max = 4000, message = "Message must be 1 to 4000 characters"))]
    #[schema(example = "Is it safe to drive through Aluva tonight?")]
    pub message: String,

    /// Earlier turns of this conversation, oldest first.
    #[serde(default)]
    #[validate(length(max = 50))]
    pub history: Vec<ChatMessage>,

    /// Hand recent verified reports to the assistant as context.
    #[serde(default = "default_include_reports")]
    pub include_reports: bool,
}

fn default_include_reports() -> bool {
    true
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ChatResponse {
    pub reply: String,
    pub model: String,
    /// Reports passed to the assistant as context.
    pub context_reports: usize,
    /// Requests left today; absent when no daily limit applies.
    pub remaining_today: Option<u64>,
}
