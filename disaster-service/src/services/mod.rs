pub mod alerts;
pub mod assistant;
pub mod auth;
pub mod chat;
pub mod database;
pub mod email;
pub mod error;
pub mod google;
pub mod jwt;
pub mod usage;

pub use assistant::{AssistantProvider, MockAssistant, OpenAiCompatibleProvider};
pub use auth::AuthService;
pub use database::Database;
pub use email::{EmailNotifier, LoggingNotifier, MockNotifier, Notifier};
pub use error::{AuthError, ServiceError};
pub use google::{GoogleIdentity, GoogleTokenVerifier, IdentityVerifier, StaticIdentityVerifier};
pub use jwt::{IssuedToken, SessionClaims, SessionTokenService};
pub use usage::{ChatQuota, InMemoryUsageStore, RedisUsageStore, UsageStore};
