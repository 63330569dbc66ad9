use axum::{extract::State, Json};
use service_core::error::AppError;
use std::time::Instant;

use crate::{
    dtos::chat::{ChatRequest, ChatResponse},
    middleware::AuthUser,
    models::DisasterReport,
    services::{
        chat::{build_conversation, CONTEXT_REPORT_LIMIT},
        ServiceError,
    },
    utils::ValidatedJson,
    AppState,
};

/// Ask the disaster assistant a question
#[utoipa::path(
    post,
    path = "/chat",
    request_body = ChatRequest,
    responses(
        (status = 200, description = "Assistant reply", body = ChatResponse),
        (status = 401, description = "Not authenticated", body = ErrorResponse),
        (status = 429, description = "Daily chat limit reached", body = ErrorResponse),
        (status = 502, description = "Assistant backend failed", body = ErrorResponse)
    ),
    tag = "Chat",
    security(("bearer_auth" = []))
)]
pub async fn chat(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    ValidatedJson(req): ValidatedJson<ChatRequest>,
) -> Result<Json<ChatResponse>, AppError> {
    let usage = state.quota.consume(claims.user_id).await?;

    let reports = if req.include_reports {
        context_reports(&state).await
    } else {
        Vec::new()
    };

    let conversation = build_conversation(&reports, &req.history, &req.message);

    let started = Instant::now();
    let reply = state
        .assistant
        .complete(&conversation)
        .await
        .map_err(ServiceError::from)?;
    metrics::histogram!("assistant_request_duration_seconds")
        .record(started.elapsed().as_secs_f64());

    tracing::info!(
        user_id = claims.user_id,
        model = %reply.model,
        context_reports = reports.len(),
        prompt_tokens = ?reply.prompt_tokens,
        completion_tokens = ?reply.completion_tokens,
        "Assistant replied"
    );

    Ok(Json(ChatResponse {
        reply: reply.content,
        model: reply.model,
        context_reports: reports.len(),
        remaining_today: usage.remaining,
    }))
}

/// Recent verified reports, or none if they cannot be loaded.
async fn context_reports(state: &AppState) -> Vec<DisasterReport> {
    match state.db.recent_verified_reports(CONTEXT_REPORT_LIMIT).await {
        Ok(reports) => reports,
        Err(e) => {
            metrics::counter!("chat_context_failures_total").increment(1);
            tracing::warn!(error = %e, "Could not load report context, answering without it");
            Vec::new()
        }
    }
}
