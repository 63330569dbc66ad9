use chrono::{Duration, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use utoipa::ToSchema;

use crate::config::JwtConfig;
use crate::models::{ROLE_ADMIN, ROLE_PUBLIC};
use crate::services::error::AuthError;

/// Issues and verifies HMAC-signed session tokens.
#[derive(Clone)]
pub struct SessionTokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    algorithm: Algorithm,
    expiry_hours: i64,
}

/// Claims carried by a session token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SessionClaims {
    pub user_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Expiration time (Unix seconds)
    pub exp: i64,
    /// Issued at (Unix seconds)
    pub iat: i64,
}

impl SessionClaims {
    pub fn is_admin(&self) -> bool {
        self.role == ROLE_ADMIN
    }
}

/// Claims as they arrive on the wire, before required fields are checked.
#[derive(Debug, Deserialize)]
struct WireClaims {
    user_id: Option<i64>,
    email: Option<String>,
    role: Option<String>,
    name: Option<String>,
    exp: i64,
    #[serde(default)]
    iat: i64,
}

#[derive(Debug, Deserialize)]
struct ExpiryOnly {
    exp: Option<i64>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct IssuedToken {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

impl SessionTokenService {
    pub fn new(config: &JwtConfig) -> Result<Self, anyhow::Error> {
        let algorithm = Algorithm::from_str(&config.algorithm)
            .map_err(|e| anyhow::anyhow!("Invalid JWT algorithm {}: {}", config.algorithm, e))?;

        if !matches!(algorithm, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512) {
            return Err(anyhow::anyhow!(
                "Session tokens must use an HMAC algorithm, got {:?}",
                algorithm
            ));
        }

        let secret = config.secret.expose_secret().as_bytes();
        tracing::info!(algorithm = ?algorithm, expiry_hours = config.expiry_hours, "Session token service initialized");

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            algorithm,
            expiry_hours: config.expiry_hours,
        })
    }

    /// Mint a token for an authenticated identity.
    pub fn issue(
        &self,
        user_id: i64,
        email: &str,
        role: &str,
        name: Option<&str>,
    ) -> Result<IssuedToken, anyhow::Error> {
        let now = Utc::now();
        let exp = now + Duration::hours(self.expiry_hours);

        let claims = SessionClaims {
            user_id,
            email: Some(email.to_string()),
            role: role.to_string(),
            name: name.map(str::to_string),
            exp: exp.timestamp(),
            iat: now.timestamp(),
        };

        Ok(IssuedToken {
            access_token: self.encode_claims(&claims)?,
            token_type: "Bearer".to_string(),
            expires_in: self.expiry_seconds(),
        })
    }

    pub fn encode_claims(&self, claims: &SessionClaims) -> Result<String, anyhow::Error> {
        encode(&Header::new(self.algorithm), claims, &self.encoding_key)
            .map_err(|e| anyhow::anyhow!("Failed to encode session token: {}", e))
    }

    /// Verify signature, algorithm and expiry. A token whose `exp` is in the
    /// past is reported as expired even when its signature does not verify.
    pub fn validate(&self, token: &str) -> Result<SessionClaims, AuthError> {
        let mut validation = Validation::new(self.algorithm);
        validation.leeway = 0;
        validation.validate_exp = true;

        let data = match decode::<WireClaims>(token, &self.decoding_key, &validation) {
            Ok(data) => data,
            Err(e) => {
                return Err(match e.kind() {
                    ErrorKind::ExpiredSignature => AuthError::ExpiredToken,
                    _ if self.is_past_expiry(token) => AuthError::ExpiredToken,
                    _ => {
                        tracing::debug!(error = %e, "Rejected session token");
                        AuthError::MalformedToken
                    }
                });
            }
        };

        let claims = data.claims;
        let user_id = claims.user_id.ok_or(AuthError::MissingSubject)?;

        Ok(SessionClaims {
            user_id,
            email: claims.email,
            role: claims
                .role
                .filter(|r| !r.is_empty())
                .unwrap_or_else(|| ROLE_PUBLIC.to_string()),
            name: claims.name,
            exp: claims.exp,
            iat: claims.iat,
        })
    }

    /// `validate` plus the admin role requirement.
    pub fn validate_admin(&self, token: &str) -> Result<SessionClaims, AuthError> {
        let claims = self.validate(token)?;
        if !claims.is_admin() {
            return Err(AuthError::InsufficientRole);
        }
        Ok(claims)
    }

    pub fn expiry_seconds(&self) -> i64 {
        self.expiry_hours * 3600
    }

    /// Reads `exp` without trusting the token. Only used to classify an
    /// already-rejected token.
    fn is_past_expiry(&self, token: &str) -> bool {
        let mut validation = Validation::new(self.algorithm);
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.required_spec_claims.clear();

        decode::<ExpiryOnly>(token, &self.decoding_key, &validation)
            .ok()
            .and_then(|data| data.claims.exp)
            .is_some_and(|exp| exp < Utc::now().timestamp())
    }
}
