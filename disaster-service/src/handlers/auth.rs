use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use service_core::error::AppError;

use crate::{
    dtos::auth::{
        AdminVerifyResponse, GoogleLoginRequest, LoginRequest, RegisterRequest,
        VerifyTokenResponse,
    },
    middleware::AuthUser,
    models::UserResponse,
    services::ServiceError,
    utils::ValidatedJson,
    AppState,
};

/// Register a local account
#[utoipa::path(
    post,
    path = "/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created", body = AuthResponse),
        (status = 409, description = "Email already registered", body = ErrorResponse),
        (status = 422, description = "Validation error", body = ErrorResponse),
        (status = 429, description = "Too many attempts", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn register(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<RegisterRequest>,
) -> Result<impl IntoResponse, AppError> {
    let res = state.auth.register(req).await?;
    Ok((StatusCode::CREATED, Json(res)))
}

/// Login with email and password
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = AuthResponse),
        (status = 401, description = "Invalid credentials", body = ErrorResponse),
        (status = 422, description = "Validation error", body = ErrorResponse),
        (status = 429, description = "Too many attempts", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn login(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let res = state.auth.login(req).await?;
    Ok(Json(res))
}

/// Exchange a Google ID token for a session
#[utoipa::path(
    post,
    path = "/auth/google",
    request_body = GoogleLoginRequest,
    responses(
        (status = 200, description = "Login successful", body = AuthResponse),
        (status = 401, description = "Invalid identity token", body = ErrorResponse),
        (status = 429, description = "Too many attempts", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn google_login(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<GoogleLoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let res = state.auth.google_login(req).await?;
    let status = if res.is_new_user {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(res)))
}

/// Current user profile
#[utoipa::path(
    get,
    path = "/auth/me",
    responses(
        (status = 200, description = "Current user", body = UserResponse),
        (status = 401, description = "Not authenticated", body = ErrorResponse),
        (status = 404, description = "User no longer exists", body = ErrorResponse)
    ),
    tag = "Authentication",
    security(("bearer_auth" = []))
)]
pub async fn me(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
) -> Result<Json<UserResponse>, AppError> {
    let user = state
        .db
        .find_user_by_id(claims.user_id)
        .await?
        .ok_or(ServiceError::UserNotFound)?;

    Ok(Json(user.into()))
}

/// Echo the decoded session claims
#[utoipa::path(
    get,
    path = "/auth/verify-token",
    responses(
        (status = 200, description = "Token is valid", body = VerifyTokenResponse),
        (status = 401, description = "Missing, malformed or expired token", body = ErrorResponse)
    ),
    tag = "Authentication",
    security(("bearer_auth" = []))
)]
pub async fn verify_token(AuthUser(claims): AuthUser) -> Json<VerifyTokenResponse> {
    Json(VerifyTokenResponse {
        valid: true,
        claims,
    })
}

/// Confirm the caller holds the admin role
#[utoipa::path(
    get,
    path = "/auth/admin/verify",
    responses(
        (status = 200, description = "Caller is an admin", body = AdminVerifyResponse),
        (status = 401, description = "Not authenticated", body = ErrorResponse),
        (status = 403, description = "Admin role required", body = ErrorResponse)
    ),
    tag = "Authentication",
    security(("bearer_auth" = []))
)]
pub async fn admin_verify(AuthUser(claims): AuthUser) -> Json<AdminVerifyResponse> {
    Json(AdminVerifyResponse {
        is_admin: claims.is_admin(),
        user_id: claims.user_id,
        email: claims.email,
    })
}
