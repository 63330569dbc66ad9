use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use service_core::error::AppError;

use crate::{
    services::{AuthError, SessionClaims},
    AppState,
};

/// What an endpoint demands of the caller's session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequiredRole {
    /// Any valid session.
    Authenticated,
    /// A session whose role is `admin`.
    Admin,
}

/// Admit or deny decoded claims.
pub fn authorize(claims: &SessionClaims, required: RequiredRole) -> Result<(), AuthError> {
    match required {
        RequiredRole::Authenticated => Ok(()),
        RequiredRole::Admin if claims.is_admin() => Ok(()),
        RequiredRole::Admin => Err(AuthError::InsufficientRole),
    }
}

/// Token from `Authorization: Bearer <token>`.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or(AuthError::MissingToken)?;

    let (scheme, token) = value.split_once(' ').ok_or(AuthError::MissingToken)?;
    let token = token.trim();
    if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() || token.contains(' ') {
        return Err(AuthError::MissingToken);
    }
    Ok(token)
}

fn gate(state: &AppState, req: &mut Request, required: RequiredRole) -> Result<(), AuthError> {
    let token = bearer_token(req.headers())?;
    let claims = state.jwt.validate(token)?;
    authorize(&claims, required)?;

    tracing::debug!(user_id = claims.user_id, role = %claims.role, "Request authorized");
    req.extensions_mut().insert(claims);
    Ok(())
}

/// Any authenticated caller. Claims are stored in request extensions.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AuthError> {
    gate(&state, &mut req, RequiredRole::Authenticated)?;
    Ok(next.run(req).await)
}

/// Admin callers only.
pub async fn admin_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AuthError> {
    if let Err(e) = gate(&state, &mut req, RequiredRole::Admin) {
        if e == AuthError::InsufficientRole {
            tracing::warn!(path = %req.uri().path(), "Non-admin denied admin endpoint");
        }
        return Err(e);
    }
    Ok(next.run(req).await)
}

/// Claims placed by `auth_middleware` or `admin_middleware`.
pub struct AuthUser(pub SessionClaims);

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let claims = parts.extensions.get::<SessionClaims>().ok_or_else(|| {
            AppError::InternalError(anyhow::anyhow!(
                "Auth claims missing from request extensions"
            ))
        })?;

        Ok(AuthUser(claims.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn claims(role: &str) -> SessionClaims {
        SessionClaims {
            user_id: 1,
            email: None,
            role: role.to_string(),
            name: None,
            exp: 0,
            iat: 0,
        }
    }

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(value).expect("header"));
        headers
    }

    #[test]
    fn test_authorize() {
        assert!(authorize(&claims("admin"), RequiredRole::Admin).is_ok());
        assert!(authorize(&claims("admin"), RequiredRole::Authenticated).is_ok());
        assert!(authorize(&claims("Public"), RequiredRole::Authenticated).is_ok());
        assert_eq!(
            authorize(&claims("Public"), RequiredRole::Admin),
            Err(AuthError::InsufficientRole)
        );
        assert_eq!(
            authorize(&claims("Admin"), RequiredRole::Admin),
            Err(AuthError::InsufficientRole)
        );
    }

    #[test]
    fn test_bearer_token_parsing() {
        assert_eq!(bearer_token(&headers("Bearer abc.def.ghi")), Ok("abc.def.ghi"));
        assert_eq!(bearer_token(&headers("bearer abc")), Ok("abc"));
        assert_eq!(bearer_token(&HeaderMap::new()), Err(AuthError::MissingToken));
        assert_eq!(bearer_token(&headers("Basic dXNlcjpwdw==")), Err(AuthError::MissingToken));
        assert_eq!(bearer_token(&headers("Bearer")), Err(AuthError::MissingToken));
        assert_eq!(bearer_token(&headers("Bearer ")), Err(AuthError::MissingToken));
        assert_eq!(bearer_token(&headers("abc.def.ghi")), Err(AuthError::MissingToken));
    }
}
