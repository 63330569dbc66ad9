pub mod auth;

pub use auth::{admin_middleware, auth_middleware, authorize, bearer_token, AuthUser, RequiredRole};
