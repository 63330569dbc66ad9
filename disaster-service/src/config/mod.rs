use secrecy::{ExposeSecret, Secret};
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct DisasterConfig {
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub jwt: JwtConfig,
    pub google: GoogleOAuthConfig,
    pub assistant: AssistantConfig,
    pub smtp: SmtpConfig,
    pub redis: Option<RedisConfig>,
    pub security: SecurityConfig,
    pub swagger: SwaggerConfig,
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: Secret<String>,
    pub max_connections: u32,
    pub acquire_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub test_on_acquire: bool,
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: Secret<String>,
    pub algorithm: String,
    pub expiry_hours: i64,
}

#[derive(Debug, Clone)]
pub struct GoogleOAuthConfig {
    pub client_id: String,
    pub certs_url: String,
    pub certs_cache_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct AssistantConfig {
    /// Base URL of an OpenAI-compatible API, e.g. `http://localhost:11434/v1`.
    pub base_url: String,
    pub api_key: Option<Secret<String>>,
    pub model: String,
    pub timeout_seconds: u64,
    /// Chat requests allowed per user per day; 0 disables the quota.
    pub daily_limit: u64,
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Secret<String>,
    pub from: String,
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
    /// Accounts created with one of these emails start out as admins.
    pub admin_emails: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct SwaggerConfig {
    pub enabled: SwaggerMode,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SwaggerMode {
    Public,
    Disabled,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub auth_attempts: u32,
    pub auth_window_seconds: u64,
    pub global_ip_limit: u32,
    pub global_ip_window_seconds: u64,
}

impl DisasterConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let environment: Environment = env::var("ENVIRONMENT")
            .unwrap_or_else(|_| "dev".to_string())
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let redis_url = env::var("REDIS_URL").ok().filter(|u| !u.is_empty());

        let config = DisasterConfig {
            common: common_config,
            environment: environment.clone(),
            service_name: get_env("SERVICE_NAME", Some("disaster-service"), is_prod)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            otlp_endpoint: env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
                .ok()
                .filter(|e| !e.is_empty()),
            database: DatabaseConfig {
                url: Secret::new(get_env("DATABASE_URL", None, is_prod)?),
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", "10", is_prod)?,
                acquire_retries: parse_env("DATABASE_ACQUIRE_RETRIES", "5", is_prod)?,
                initial_backoff_ms: parse_env("DATABASE_INITIAL_BACKOFF_MS", "50", is_prod)?,
                max_backoff_ms: parse_env("DATABASE_MAX_BACKOFF_MS", "2000", is_prod)?,
                test_on_acquire: parse_env("DATABASE_TEST_ON_ACQUIRE", "true", is_prod)?,
            },
            jwt: JwtConfig {
                secret: Secret::new(get_env("JWT_SECRET", None, is_prod)?),
                algorithm: get_env("JWT_ALGORITHM", Some("HS256"), is_prod)?,
                expiry_hours: parse_env("JWT_EXPIRY_HOURS", "168", is_prod)?,
            },
            google: GoogleOAuthConfig {
                client_id: get_env("GOOGLE_CLIENT_ID", None, is_prod)?,
                certs_url: get_env(
                    "GOOGLE_CERTS_URL",
                    Some("https://www.googleapis.com/oauth2/v3/certs"),
                    is_prod,
                )?,
                certs_cache_seconds: parse_env("GOOGLE_CERTS_CACHE_SECONDS", "3600", is_prod)?,
            },
            assistant: AssistantConfig {
                base_url: get_env(
                    "ASSISTANT_BASE_URL",
                    Some("http://localhost:11434/v1"),
                    is_prod,
                )?,
                api_key: env::var("ASSISTANT_API_KEY")
                    .ok()
                    .filter(|k| !k.is_empty())
                    .map(Secret::new),
                model: get_env("ASSISTANT_MODEL", Some("llama3.1"), is_prod)?,
                timeout_seconds: parse_env("ASSISTANT_TIMEOUT_SECONDS", "60", is_prod)?,
                daily_limit: parse_env("CHAT_DAILY_LIMIT", "50", is_prod)?,
            },
            smtp: {
                let enabled: bool = parse_env("NOTIFICATIONS_ENABLED", "false", is_prod)?;
                SmtpConfig {
                    enabled,
                    host: get_env("SMTP_HOST", Some("smtp.gmail.com"), is_prod && enabled)?,
                    port: parse_env("SMTP_PORT", "587", is_prod && enabled)?,
                    user: get_env("SMTP_USER", Some(""), is_prod && enabled)?,
                    password: Secret::new(get_env("SMTP_PASSWORD", Some(""), is_prod && enabled)?),
                    from: get_env(
                        "SMTP_FROM",
                        Some("alerts@localhost"),
                        is_prod && enabled,
                    )?,
                }
            },
            redis: redis_url.map(|url| RedisConfig { url }),
            security: SecurityConfig {
                allowed_origins: split_list(&get_env(
                    "ALLOWED_ORIGINS",
                    Some("http://localhost:3000"),
                    is_prod,
                )?),
                admin_emails: split_list(&get_env("ADMIN_EMAILS", Some(""), false)?)
                    .into_iter()
                    .map(|e| e.to_lowercase())
                    .collect(),
            },
            swagger: SwaggerConfig {
                enabled: get_env("ENABLE_SWAGGER", Some("public"), is_prod)?
                    .parse()
                    .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?,
            },
            rate_limit: RateLimitConfig {
                auth_attempts: parse_env("RATE_LIMIT_AUTH_ATTEMPTS", "10", is_prod)?,
                auth_window_seconds: parse_env("RATE_LIMIT_AUTH_WINDOW_SECONDS", "300", is_prod)?,
                global_ip_limit: parse_env("RATE_LIMIT_GLOBAL_IP_LIMIT", "200", is_prod)?,
                global_ip_window_seconds: parse_env(
                    "RATE_LIMIT_GLOBAL_IP_WINDOW_SECONDS",
                    "60",
                    is_prod,
                )?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PORT must be greater than 0"
            )));
        }

        if self.jwt.expiry_hours <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "JWT_EXPIRY_HOURS must be positive"
            )));
        }

        if jsonwebtoken::Algorithm::from_str(&self.jwt.algorithm).is_err() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "JWT_ALGORITHM '{}' is not a recognised algorithm",
                self.jwt.algorithm
            )));
        }

        if self.database.max_connections == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "DATABASE_MAX_CONNECTIONS must be at least 1"
            )));
        }

        if self.environment == Environment::Prod {
            if self.jwt.secret.expose_secret().len() < 32 {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "JWT_SECRET must be at least 32 bytes in production"
                )));
            }

            if self.security.allowed_origins.iter().any(|o| o == "*") {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "Wildcard CORS origin not allowed in production"
                )));
            }

            if self.swagger.enabled == SwaggerMode::Public {
                tracing::warn!("Swagger is publicly accessible in production");
            }
        }

        Ok(())
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required in production but not set",
                    key
                )))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required but not set",
                    key
                )))
            }
        }
    }
}

fn parse_env<T>(key: &str, default: &str, is_prod: bool) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get_env(key, Some(default), is_prod)?
        .trim()
        .parse()
        .map_err(|e: T::Err| AppError::ConfigError(anyhow::anyhow!("{}: {}", key, e)))
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}

impl FromStr for SwaggerMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "public" => Ok(SwaggerMode::Public),
            "disabled" => Ok(SwaggerMode::Disabled),
            _ => Err(format!("Invalid swagger mode: {}", s)),
        }
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> DisasterConfig {
    DisasterConfig {
        common: core_config::Config::default(),
        environment: Environment::Dev,
        service_name: "disaster-service".to_string(),
        service_version: "test".to_string(),
        log_level: "error".to_string(),
        otlp_endpoint: None,
        database: DatabaseConfig {
            url: Secret::new("postgres://localhost:1/disaster_test".to_string()),
            max_connections: 2,
            acquire_retries: 1,
            initial_backoff_ms: 5,
            max_backoff_ms: 10,
            test_on_acquire: true,
        },
        jwt: JwtConfig {
            secret: Secret::new("unit-test-secret-that-is-long-enough!!".to_string()),
            algorithm: "HS256".to_string(),
            expiry_hours: 168,
        },
        google: GoogleOAuthConfig {
            client_id: "test-client.apps.googleusercontent.com".to_string(),
            certs_url: "http://localhost:1/certs".to_string(),
            certs_cache_seconds: 3600,
        },
        assistant: AssistantConfig {
            base_url: "http://localhost:1/v1".to_string(),
            api_key: None,
            model: "test-model".to_string(),
            timeout_seconds: 5,
            daily_limit: 3,
        },
        smtp: SmtpConfig {
            enabled: false,
            host: "localhost".to_string(),
            port: 25,
            user: String::new(),
            password: Secret::new(String::new()),
            from: "alerts@localhost".to_string(),
        },
        redis: None,
        security: SecurityConfig {
            allowed_origins: vec!["http://localhost:3000".to_string()],
            admin_emails: vec!["chief@example.org".to_string()],
        },
        swagger: SwaggerConfig {
            enabled: SwaggerMode::Disabled,
        },
        rate_limit: RateLimitConfig {
            auth_attempts: 10,
            auth_window_seconds: 60,
            global_ip_limit: 100,
            global_ip_window_seconds: 60,
        },
    }
}
