use axum::{
    extract::{Path, State},
    Json,
};
use service_core::error::AppError;

use crate::{
    dtos::{
        admin::{ListUsersQuery, PoolStatsResponse, SetRoleRequest},
        reports::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE},
    },
    middleware::AuthUser,
    models::UserResponse,
    services::ServiceError,
    utils::{ValidatedJson, ValidatedQuery},
    AppState,
};

/// List registered users
#[utoipa::path(
    get,
    path = "/admin/users",
    params(ListUsersQuery),
    responses(
        (status = 200, description = "Users, oldest first", body = Vec<UserResponse>),
        (status = 403, description = "Admin role required", body = ErrorResponse)
    ),
    tag = "Admin",
    security(("bearer_auth" = []))
)]
pub async fn list_users(
    State(state): State<AppState>,
    ValidatedQuery(query): ValidatedQuery<ListUsersQuery>,
) -> Result<Json<Vec<UserResponse>>, AppError> {
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let offset = query.offset.unwrap_or(0).max(0);

    let users = state.db.list_users(limit, offset).await?;
    Ok(Json(users.into_iter().map(UserResponse::from).collect()))
}

/// Grant or revoke the admin role
#[utoipa::path(
    patch,
    path = "/admin/users/{id}/role",
    params(("id" = i64, Path, description = "User id")),
    request_body = SetRoleRequest,
    responses(
        (status = 200, description = "Updated user", body = UserResponse),
        (status = 400, description = "Unknown role or self-demotion", body = ErrorResponse),
        (status = 403, description = "Admin role required", body = ErrorResponse),
        (status = 404, description = "User not found", body = ErrorResponse)
    ),
    tag = "Admin",
    security(("bearer_auth" = []))
)]
pub async fn set_user_role(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    Path(user_id): Path<i64>,
    ValidatedJson(req): ValidatedJson<SetRoleRequest>,
) -> Result<Json<UserResponse>, AppError> {
    let role = req.normalized_role().ok_or_else(|| {
        ServiceError::ValidationError(format!("Unknown role '{}'", req.role))
    })?;

    if user_id == claims.user_id && role != claims.role {
        return Err(ServiceError::ValidationError(
            "Admins cannot change their own role".to_string(),
        )
        .into());
    }

    let user = state.db.set_user_role(user_id, role).await?;
    tracing::info!(
        admin_id = claims.user_id,
        user_id,
        role,
        "User role changed"
    );
    Ok(Json(user.into()))
}

/// Connection pool statistics
#[utoipa::path(
    get,
    path = "/admin/pool/stats",
    responses(
        (status = 200, description = "Pool statistics", body = PoolStatsResponse),
        (status = 403, description = "Admin role required", body = ErrorResponse)
    ),
    tag = "Admin",
    security(("bearer_auth" = []))
)]
pub async fn pool_stats(State(state): State<AppState>) -> Json<PoolStatsResponse> {
    Json(state.db.pool().stats().into())
}
