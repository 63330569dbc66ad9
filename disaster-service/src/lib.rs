pub mod config;
pub mod db;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;

use axum::{
    http::{header, HeaderName, HeaderValue, Method, Request},
    middleware::{from_fn, from_fn_with_state},
    routing::{get, patch, post},
    Json, Router,
};
use service_core::middleware::{
    metrics::metrics_middleware,
    rate_limit::{create_ip_rate_limiter, ip_rate_limit_middleware, IpRateLimiter},
    security_headers::security_headers_middleware,
    tracing::request_id_middleware,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

use crate::config::{DisasterConfig, Environment, SwaggerMode};
use crate::services::{
    AssistantProvider, AuthService, ChatQuota, Database, IdentityVerifier, Notifier,
    SessionTokenService, UsageStore,
};

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health::health_check,
        handlers::metrics::metrics,
        handlers::auth::register,
        handlers::auth::login,
        handlers::auth::google_login,
        handlers::auth::me,
        handlers::auth::verify_token,
        handlers::auth::admin_verify,
        handlers::reports::list_reports,
        handlers::reports::create_report,
        handlers::reports::get_report,
        handlers::reports::update_report,
        handlers::reports::delete_report,
        handlers::reports::update_report_status,
        handlers::subscriptions::get_subscription,
        handlers::subscriptions::upsert_subscription,
        handlers::subscriptions::delete_subscription,
        handlers::chat::chat,
        handlers::admin::list_users,
        handlers::admin::set_user_role,
        handlers::admin::pool_stats,
    ),
    components(
        schemas(
            dtos::ErrorResponse,
            dtos::auth::RegisterRequest,
            dtos::auth::LoginRequest,
            dtos::auth::GoogleLoginRequest,
            dtos::auth::AuthResponse,
            dtos::auth::VerifyTokenResponse,
            dtos::auth::AdminVerifyResponse,
            dtos::reports::CreateReportRequest,
            dtos::reports::UpdateReportRequest,
            dtos::reports::UpdateReportStatusRequest,
            dtos::reports::ReportListResponse,
            dtos::reports::StatusChangeResponse,
            dtos::subscriptions::UpsertSubscriptionRequest,
            dtos::chat::ChatRequest,
            dtos::chat::ChatResponse,
            dtos::admin::SetRoleRequest,
            dtos::admin::PoolStatsResponse,
            services::SessionClaims,
            services::assistant::ChatMessage,
            services::assistant::ChatRole,
            models::UserResponse,
            models::DisasterReport,
            models::Severity,
            models::ReportStatus,
            models::Subscription,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Authentication", description = "Sign-up, sign-in and session checks"),
        (name = "Reports", description = "Disaster reports"),
        (name = "Subscriptions", description = "Alert preferences"),
        (name = "Chat", description = "Disaster assistant"),
        (name = "Admin", description = "Administrative operations"),
        (name = "Observability", description = "Service health and monitoring"),
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<DisasterConfig>,
    pub db: Database,
    pub jwt: SessionTokenService,
    pub auth: AuthService,
    pub assistant: Arc<dyn AssistantProvider>,
    pub quota: ChatQuota,
    pub notifier: Arc<dyn Notifier>,
    pub auth_rate_limiter: IpRateLimiter,
    pub ip_rate_limiter: IpRateLimiter,
}

impl AppState {
    /// Wire the services around the given backends.
    pub fn new(
        config: DisasterConfig,
        db: Database,
        verifier: Arc<dyn IdentityVerifier>,
        assistant: Arc<dyn AssistantProvider>,
        usage: Arc<dyn UsageStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, anyhow::Error> {
        let jwt = SessionTokenService::new(&config.jwt)?;
        let auth = AuthService::new(
            db.clone(),
            jwt.clone(),
            verifier,
            config.security.admin_emails.clone(),
        );
        let quota = ChatQuota::new(usage, config.assistant.daily_limit);

        let auth_rate_limiter = create_ip_rate_limiter(
            config.rate_limit.auth_attempts,
            config.rate_limit.auth_window_seconds,
        );
        let ip_rate_limiter = create_ip_rate_limiter(
            config.rate_limit.global_ip_limit,
            config.rate_limit.global_ip_window_seconds,
        );

        Ok(Self {
            config: Arc::new(config),
            db,
            jwt,
            auth,
            assistant,
            quota,
            notifier,
            auth_rate_limiter,
            ip_rate_limiter,
        })
    }
}

pub fn build_router(state: AppState) -> Router {
    // Credential endpoints share one per-IP limiter
    let credential_routes = Router::new()
        .route("/auth/register", post(handlers::auth::register))
        .route("/auth/login", post(handlers::auth::login))
        .route("/auth/google", post(handlers::auth::google_login))
        .layer(from_fn_with_state(
            state.auth_rate_limiter.clone(),
            ip_rate_limit_middleware,
        ));

    let authenticated_routes = Router::new()
        .route("/auth/me", get(handlers::auth::me))
        .route("/auth/verify-token", get(handlers::auth::verify_token))
        .route(
            "/reports",
            get(handlers::reports::list_reports).post(handlers::reports::create_report),
        )
        .route(
            "/reports/:id",
            get(handlers::reports::get_report)
                .patch(handlers::reports::update_report)
                .delete(handlers::reports::delete_report),
        )
        .route(
            "/subscriptions/me",
            get(handlers::subscriptions::get_subscription)
                .put(handlers::subscriptions::upsert_subscription)
                .delete(handlers::subscriptions::delete_subscription),
        )
        .route("/chat", post(handlers::chat::chat))
        .layer(from_fn_with_state(
            state.clone(),
            middleware::auth_middleware,
        ));

    let admin_routes = Router::new()
        .route("/auth/admin/verify", get(handlers::auth::admin_verify))
        .route(
            "/admin/reports/:id/status",
            patch(handlers::reports::update_report_status),
        )
        .route("/admin/users", get(handlers::admin::list_users))
        .route(
            "/admin/users/:id/role",
            patch(handlers::admin::set_user_role),
        )
        .route("/admin/pool/stats", get(handlers::admin::pool_stats))
        .layer(from_fn_with_state(
            state.clone(),
            middleware::admin_middleware,
        ));

    let mut app = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/metrics", get(handlers::metrics::metrics));

    let swagger_enabled = match state.config.environment {
        Environment::Dev => true,
        Environment::Prod => state.config.swagger.enabled == SwaggerMode::Public,
    };

    if swagger_enabled {
        app = app.merge(SwaggerUi::new("/docs").url("/.well-known/openapi.json", ApiDoc::openapi()));
    } else {
        app = app.route(
            "/.well-known/openapi.json",
            get(|| async { Json(ApiDoc::openapi()) }),
        );
    }

    let cors = CorsLayer::new()
        .allow_origin(allowed_origins(&state.config.security.allowed_origins))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static("x-request-id"),
        ]);

    app.merge(credential_routes)
        .merge(authenticated_routes)
        .merge(admin_routes)
        .with_state(state.clone())
        .layer(from_fn_with_state(
            state.ip_rate_limiter.clone(),
            ip_rate_limit_middleware,
        ))
        .layer(from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(|request: &Request<_>| {
            let request_id = request
                .headers()
                .get("x-request-id")
                .and_then(|value| value.to_str().ok())
                .unwrap_or("-");

            tracing::info_span!(
                "http_request",
                request_id = %request_id,
                method = %request.method(),
                uri = %request.uri(),
                version = ?request.version(),
            )
        }))
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(cors)
}

fn allowed_origins(origins: &[String]) -> Vec<HeaderValue> {
    origins
        .iter()
        .filter(|o| o.as_str() != "*")
        .filter_map(|o| match o.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::error!(origin = %o, error = %e, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect()
}
