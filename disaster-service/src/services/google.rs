//! Google ID token verification against Google's published signing keys.

use async_trait::async_trait;
use jsonwebtoken::{decode, decode_header, jwk::JwkSet, Algorithm, DecodingKey, Validation};
use parking_lot::{Mutex, RwLock};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::GoogleOAuthConfig;
use crate::services::error::AuthError;

const GOOGLE_ISSUERS: [&str; 2] = ["accounts.google.com", "https://accounts.google.com"];

/// Floor between two network fetches of the key set, whatever triggered them.
const MIN_REFETCH_INTERVAL: Duration = Duration::from_secs(60);

/// Identity extracted from a verified Google ID token.
#[derive(Debug, Clone, PartialEq)]
pub struct GoogleIdentity {
    pub google_id: String,
    pub email: String,
    pub email_verified: bool,
    pub name: Option<String>,
    pub given_name: Option<String>,
    pub family_name: Option<String>,
    pub picture: Option<String>,
    pub locale: Option<String>,
}

#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, id_token: &str) -> Result<GoogleIdentity, AuthError>;
}

#[derive(Debug, Deserialize)]
struct GoogleIdTokenClaims {
    sub: String,
    email: Option<String>,
    #[serde(default)]
    email_verified: bool,
    name: Option<String>,
    given_name: Option<String>,
    family_name: Option<String>,
    picture: Option<String>,
    locale: Option<String>,
}

struct CachedKeys {
    keys: Arc<JwkSet>,
    fetched_at: Instant,
}

pub struct GoogleTokenVerifier {
    http: reqwest::Client,
    client_id: String,
    certs_url: String,
    cache_ttl: Duration,
    cache: RwLock<Option<CachedKeys>>,
    last_fetch: Mutex<Option<Instant>>,
}

impl GoogleTokenVerifier {
    pub fn new(config: &GoogleOAuthConfig) -> Result<Self, anyhow::Error> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build HTTP client: {}", e))?;

        Ok(Self {
            http,
            client_id: config.client_id.clone(),
            certs_url: config.certs_url.clone(),
            cache_ttl: Duration::from_secs(config.certs_cache_seconds),
            cache: RwLock::new(None),
            last_fetch: Mutex::new(None),
        })
    }

    /// Seed the key cache, e.g. with keys fetched out of band.
    pub fn with_keys(self, keys: JwkSet) -> Self {
        let now = Instant::now();
        *self.cache.write() = Some(CachedKeys {
            keys: Arc::new(keys),
            fetched_at: now,
        });
        *self.last_fetch.lock() = Some(now);
        self
    }

    /// Reserve the next network fetch, or refuse if one happened too recently.
    fn claim_fetch(&self) -> bool {
        let mut last = self.last_fetch.lock();
        match *last {
            Some(at) if at.elapsed() < MIN_REFETCH_INTERVAL => false,
            _ => {
                *last = Some(Instant::now());
                true
            }
        }
    }

    async fn keys(&self, force_refresh: bool) -> Result<Arc<JwkSet>, anyhow::Error> {
        let cached = self.cache.read().as_ref().map(|cached| {
            (
                Arc::clone(&cached.keys),
                cached.fetched_at.elapsed() < self.cache_ttl,
            )
        });

        if let Some((keys, true)) = &cached {
            if !force_refresh {
                return Ok(Arc::clone(keys));
            }
        }

        if !self.claim_fetch() {
            metrics::counter!("google_jwks_refetch_throttled_total").increment(1);
            return cached
                .map(|(keys, _)| keys)
                .ok_or_else(|| anyhow::anyhow!("Google signing keys unavailable, refetch throttled"));
        }

        let keys: JwkSet = self
            .http
            .get(&self.certs_url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let keys = Arc::new(keys);

        tracing::debug!(count = keys.keys.len(), "Refreshed Google signing keys");
        *self.cache.write() = Some(CachedKeys {
            keys: Arc::clone(&keys),
            fetched_at: Instant::now(),
        });
        Ok(keys)
    }

    async fn decoding_key(&self, kid: &str) -> Result<DecodingKey, AuthError> {
        let fetch_failed = |e: anyhow::Error| {
            tracing::error!(error = %e, "Failed to fetch Google signing keys");
            metrics::counter!("google_jwks_fetch_failures_total").increment(1);
            AuthError::InvalidToken
        };

        let mut keys = self.keys(false).await.map_err(fetch_failed)?;
        if keys.find(kid).is_none() {
            // Google rotates keys; an unknown kid means our copy is stale.
            keys = self.keys(true).await.map_err(fetch_failed)?;
        }

        let jwk = keys.find(kid).ok_or_else(|| {
            tracing::warn!(kid = %kid, "Google ID token signed with unknown key");
            AuthError::InvalidToken
        })?;

        DecodingKey::from_jwk(jwk).map_err(|e| {
            tracing::warn!(error = %e, "Unusable Google signing key");
            AuthError::InvalidToken
        })
    }
}

#[async_trait]
impl IdentityVerifier for GoogleTokenVerifier {
    #[tracing::instrument(skip_all)]
    async fn verify(&self, id_token: &str) -> Result<GoogleIdentity, AuthError> {
        let header = decode_header(id_token).map_err(|_| AuthError::InvalidToken)?;
        if header.alg != Algorithm::RS256 {
            return Err(AuthError::InvalidToken);
        }
        let kid = header.kid.ok_or(AuthError::InvalidToken)?;
        let key = self.decoding_key(&kid).await?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[self.client_id.as_str()]);
        validation.set_issuer(&GOOGLE_ISSUERS);

        let claims = decode::<GoogleIdTokenClaims>(id_token, &key, &validation)
            .map_err(|e| {
                tracing::warn!(error = %e, "Google ID token rejected");
                AuthError::InvalidToken
            })?
            .claims;

        let email = claims
            .email
            .filter(|e| !e.is_empty())
            .ok_or(AuthError::InvalidToken)?;

        Ok(GoogleIdentity {
            google_id: claims.sub,
            email: email.to_lowercase(),
            email_verified: claims.email_verified,
            name: claims.name,
            given_name: claims.given_name,
            family_name: claims.family_name,
            picture: claims.picture,
            locale: claims.locale,
        })
    }
}

/// Verifier backed by a fixed token table, for local development and tests.
#[derive(Default)]
pub struct StaticIdentityVerifier {
    identities: HashMap<String, GoogleIdentity>,
}

impl StaticIdentityVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_identity(mut self, id_token: &str, identity: GoogleIdentity) -> Self {
        self.identities.insert(id_token.to_string(), identity);
        self
    }
}

#[async_trait]
impl IdentityVerifier for StaticIdentityVerifier {
    async fn verify(&self, id_token: &str) -> Result<GoogleIdentity, AuthError> {
        self.identities
            .get(id_token)
            .cloned()
            .ok_or(AuthError::InvalidToken)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const CLIENT_ID: &str = "test-client.apps.googleusercontent.com";
    const TEST_KEY: &str = include_str!("../../tests/fixtures/google_test_key.pem");
    const TEST_JWKS: &str = include_str!("../../tests/fixtures/google_test_jwks.json");

    fn verifier() -> GoogleTokenVerifier {
        let keys: JwkSet = serde_json::from_str(TEST_JWKS).expect("jwks fixture");
        GoogleTokenVerifier::new(&GoogleOAuthConfig {
            client_id: CLIENT_ID.to_string(),
            // Unreachable: every test must be served from the seeded cache.
            certs_url: "http://127.0.0.1:9/certs".to_string(),
            certs_cache_seconds: 3600,
        })
        .expect("verifier")
        .with_keys(keys)
    }

    fn sign(kid: &str, claims: serde_json::Value) -> String {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(kid.to_string());
        let key = EncodingKey::from_rsa_pem(TEST_KEY.as_bytes()).expect("pem fixture");
        encode(&header, &claims, &key).expect("sign")
    }

    fn claims(aud: &str, iss: &str, email: Option<&str>) -> serde_json::Value {
        let now = Utc::now().timestamp();
        let mut claims = serde_json::json!({
            "sub": "1093847562",
            "aud": aud,
            "iss": iss,
            "iat": now,
            "exp": now + 600,
            "email_verified": true,
            "name": "Asha Rao",
            "given_name": "Asha",
            "family_name": "Rao",
            "picture": "https://example.org/asha.png",
            "locale": "en",
        });
        if let Some(email) = email {
            claims["email"] = serde_json::json!(email);
        }
        claims
    }

    #[tokio::test]
    async fn test_valid_token_yields_identity() {
        let token = sign(
            "test-key-1",
            claims(CLIENT_ID, "https://accounts.google.com", Some("Asha@Example.org")),
        );
        let identity = verifier().verify(&token).await.expect("verified");

        assert_eq!(identity.google_id, "1093847562");
        assert_eq!(identity.email, "asha@example.org");
        assert!(identity.email_verified);
        assert_eq!(identity.given_name.as_deref(), Some("Asha"));
        assert_eq!(identity.locale.as_deref(), Some("en"));
    }

    #[tokio::test]
    async fn test_bare_issuer_is_accepted() {
        let token = sign(
            "test-key-1",
            claims(CLIENT_ID, "accounts.google.com", Some("a@example.org")),
        );
        assert!(verifier().verify(&token).await.is_ok());
    }

    #[tokio::test]
    async fn test_wrong_audience_is_rejected() {
        let token = sign(
            "test-key-1",
            claims("someone-else", "https://accounts.google.com", Some("a@example.org")),
        );
        assert_eq!(verifier().verify(&token).await, Err(AuthError::InvalidToken));
    }

    #[tokio::test]
    async fn test_wrong_issuer_is_rejected() {
        let token = sign(
            "test-key-1",
            claims(CLIENT_ID, "https://evil.example", Some("a@example.org")),
        );
        assert_eq!(verifier().verify(&token).await, Err(AuthError::InvalidToken));
    }

    #[tokio::test]
    async fn test_missing_email_is_rejected() {
        let token = sign(
            "test-key-1",
            claims(CLIENT_ID, "https://accounts.google.com", None),
        );
        assert_eq!(verifier().verify(&token).await, Err(AuthError::InvalidToken));
    }

    #[tokio::test]
    async fn test_unknown_kid_with_unreachable_certs_is_rejected() {
        let token = sign(
            "rotated-away",
            claims(CLIENT_ID, "https://accounts.google.com", Some("a@example.org")),
        );
        assert_eq!(verifier().verify(&token).await, Err(AuthError::InvalidToken));
    }

    #[tokio::test]
    async fn test_unknown_kids_do_not_trigger_repeated_fetches() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        let fetches = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = Arc::clone(&fetches);
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                drop(socket);
            }
        });

        let verifier = GoogleTokenVerifier::new(&GoogleOAuthConfig {
            client_id: CLIENT_ID.to_string(),
            certs_url: format!("http://{addr}/certs"),
            certs_cache_seconds: 3600,
        })
        .expect("verifier");

        for kid in ["kid-a", "kid-b", "kid-c"] {
            let token = sign(
                kid,
                claims(CLIENT_ID, "https://accounts.google.com", Some("a@example.org")),
            );
            assert_eq!(verifier.verify(&token).await, Err(AuthError::InvalidToken));
        }

        assert_eq!(fetches.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn test_seeded_keys_hold_off_forced_refresh() {
        let verifier = verifier();
        assert!(!verifier.claim_fetch());

        let Some(long_ago) = Instant::now().checked_sub(MIN_REFETCH_INTERVAL) else {
            return;
        };
        *verifier.last_fetch.lock() = Some(long_ago);
        assert!(verifier.claim_fetch());
        assert!(!verifier.claim_fetch());
    }

    #[tokio::test]
    async fn test_hmac_token_is_rejected() {
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims(CLIENT_ID, "https://accounts.google.com", Some("a@example.org")),
            &EncodingKey::from_secret(b"forged"),
        )
        .expect("sign");
        assert_eq!(verifier().verify(&token).await, Err(AuthError::InvalidToken));
    }

    #[tokio::test]
    async fn test_static_verifier() {
        let identity = GoogleIdentity {
            google_id: "g-1".to_string(),
            email: "a@example.org".to_string(),
            email_verified: true,
            name: None,
            given_name: None,
            family_name: None,
            picture: None,
            locale: None,
        };
        let verifier = StaticIdentityVerifier::new().with_identity("tok", identity.clone());
        assert_eq!(verifier.verify("tok").await, Ok(identity));
        assert_eq!(verifier.verify("nope").await, Err(AuthError::InvalidToken));
    }
}
