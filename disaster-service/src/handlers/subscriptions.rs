use axum::{extract::State, http::StatusCode, Json};
use service_core::error::AppError;

use crate::{
    dtos::subscriptions::UpsertSubscriptionRequest,
    middleware::AuthUser,
    models::Subscription,
    services::ServiceError,
    utils::ValidatedJson,
    AppState,
};

/// Current notification preferences
#[utoipa::path(
    get,
    path = "/subscriptions/me",
    responses(
        (status = 200, description = "Subscription", body = Subscription),
        (status = 404, description = "No subscription", body = ErrorResponse)
    ),
    tag = "Subscriptions",
    security(("bearer_auth" = []))
)]
pub async fn get_subscription(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
) -> Result<Json<Subscription>, AppError> {
    let subscription = state
        .db
        .find_subscription(claims.user_id)
        .await?
        .ok_or(ServiceError::SubscriptionNotFound)?;
    Ok(Json(subscription))
}

/// Create or replace notification preferences
#[utoipa::path(
    put,
    path = "/subscriptions/me",
    request_body = UpsertSubscriptionRequest,
    responses(
        (status = 200, description = "Saved subscription", body = Subscription),
        (status = 422, description = "Validation error", body = ErrorResponse)
    ),
    tag = "Subscriptions",
    security(("bearer_auth" = []))
)]
pub async fn upsert_subscription(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    ValidatedJson(req): ValidatedJson<UpsertSubscriptionRequest>,
) -> Result<Json<Subscription>, AppError> {
    let subscription = state
        .db
        .upsert_subscription(claims.user_id, &req.into_input())
        .await?;

    tracing::info!(
        user_id = claims.user_id,
        min_severity = %subscription.min_severity,
        types = subscription.disaster_types.len(),
        "Subscription saved"
    );
    Ok(Json(subscription))
}

/// Stop all notifications
#[utoipa::path(
    delete,
    path = "/subscriptions/me",
    responses(
        (status = 204, description = "Subscription removed"),
        (status = 404, description = "No subscription", body = ErrorResponse)
    ),
    tag = "Subscriptions",
    security(("bearer_auth" = []))
)]
pub async fn delete_subscription(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
) -> Result<StatusCode, AppError> {
    if !state.db.delete_subscription(claims.user_id).await? {
        return Err(ServiceError::SubscriptionNotFound.into());
    }
    Ok(StatusCode::NO_CONTENT)
}
