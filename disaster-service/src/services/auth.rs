use std::sync::Arc;

use crate::{
    dtos::auth::{AuthResponse, GoogleLoginRequest, LoginRequest, RegisterRequest},
    models::{AuthProvider, NewUser, User, ROLE_ADMIN, ROLE_PUBLIC},
    services::{
        error::AuthError,
        google::{GoogleIdentity, IdentityVerifier},
        Database, ServiceError, SessionTokenService,
    },
    utils::{hash_password, verify_password, Password, PasswordHashString},
};

/// Turns credentials into a session: local passwords or Google ID tokens.
#[derive(Clone)]
pub struct AuthService {
    db: Database,
    jwt: SessionTokenService,
    verifier: Arc<dyn IdentityVerifier>,
    admin_emails: Arc<Vec<String>>,
}

impl AuthService {
    pub fn new(
        db: Database,
        jwt: SessionTokenService,
        verifier: Arc<dyn IdentityVerifier>,
        admin_emails: Vec<String>,
    ) -> Self {
        Self {
            db,
            jwt,
            verifier,
            admin_emails: Arc::new(admin_emails),
        }
    }

    /// Role for a brand new account.
    pub fn initial_role(&self, email: &str) -> &'static str {
        if self.admin_emails.iter().any(|e| e.eq_ignore_ascii_case(email)) {
            ROLE_ADMIN
        } else {
            ROLE_PUBLIC
        }
    }

    #[tracing::instrument(skip_all)]
    pub async fn register(&self, req: RegisterRequest) -> Result<AuthResponse, ServiceError> {
        let email = req.email.trim().to_lowercase();

        if self.db.find_user_by_email(&email).await?.is_some() {
            return Err(ServiceError::EmailAlreadyRegistered);
        }

        let password_hash = hash_password(&Password::new(req.password))?;
        let role = self.initial_role(&email);

        let user = self
            .db
            .create_user(&NewUser {
                email,
                name: req
                    .name
                    .map(|n| n.trim().to_string())
                    .filter(|n| !n.is_empty()),
                password_hash: Some(password_hash.into_string()),
                role: role.to_string(),
                auth_provider: AuthProvider::Local,
                is_verified: false,
                google_id: None,
                given_name: None,
                family_name: None,
                avatar_url: None,
                locale: None,
            })
            .await?;

        metrics::counter!("auth_registrations_total", "provider" => "local").increment(1);
        tracing::info!(user_id = user.user_id, role, "User registered");

        self.session_for(user, true)
    }

    #[tracing::instrument(skip_all)]
    pub async fn login(&self, req: LoginRequest) -> Result<AuthResponse, ServiceError> {
        let user = self
            .db
            .find_user_by_email(req.email.trim())
            .await?
            .ok_or(AuthError::InvalidCredentials)?;

        // Google-only accounts have no password to check.
        let stored = user
            .password_hash
            .clone()
            .ok_or(AuthError::InvalidCredentials)?;

        verify_password(
            &Password::new(req.password),
            &PasswordHashString::new(stored),
        )
        .map_err(|_| {
            metrics::counter!("auth_login_failures_total").increment(1);
            AuthError::InvalidCredentials
        })?;

        self.db.touch_last_login(user.user_id).await?;
        tracing::info!(user_id = user.user_id, "User logged in");

        self.session_for(user, false)
    }

    /// First login creates the account, a matching local account is linked,
    /// later logins refresh the stored profile.
    #[tracing::instrument(skip_all)]
    pub async fn google_login(&self, req: GoogleLoginRequest) -> Result<AuthResponse, ServiceError> {
        let identity = self.verifier.verify(&req.id_token).await?;

        if let Some(user) = self.db.find_user_by_google_id(&identity.google_id).await? {
            let user = self.db.apply_google_login(user.user_id, &identity).await?;
            tracing::info!(user_id = user.user_id, "Google login");
            return self.session_for(user, false);
        }

        if let Some(existing) = self.db.find_user_by_email(&identity.email).await? {
            ensure_linkable(&identity).inspect_err(|_| {
                metrics::counter!("auth_google_link_refusals_total").increment(1);
                tracing::warn!(user_id = existing.user_id, "Refused to link unverified Google email");
            })?;
            let user = self.db.apply_google_login(existing.user_id, &identity).await?;
            tracing::info!(user_id = user.user_id, "Linked Google account to existing user");
            return self.session_for(user, false);
        }

        let created = self
            .db
            .create_user(&NewUser {
                email: identity.email.clone(),
                name: identity.name.clone(),
                password_hash: None,
                role: self.initial_role(&identity.email).to_string(),
                auth_provider: AuthProvider::Google,
                is_verified: identity.email_verified,
                google_id: Some(identity.google_id.clone()),
                given_name: identity.given_name.clone(),
                family_name: identity.family_name.clone(),
                avatar_url: identity.picture.clone(),
                locale: identity.locale.clone(),
            })
            .await;

        let user = match created {
            Ok(user) => user,
            // A concurrent first login for the same Google account won the insert.
            Err(ServiceError::GoogleAccountAlreadyLinked) => {
                let user = self
                    .db
                    .find_user_by_google_id(&identity.google_id)
                    .await?
                    .ok_or(ServiceError::GoogleAccountAlreadyLinked)?;
                let user = self.db.apply_google_login(user.user_id, &identity).await?;
                return self.session_for(user, false);
            }
            Err(e) => return Err(e),
        };

        metrics::counter!("auth_registrations_total", "provider" => "google").increment(1);
        tracing::info!(user_id = user.user_id, "User registered via Google");

        self.session_for(user, true)
    }

    fn session_for(&self, user: User, is_new_user: bool) -> Result<AuthResponse, ServiceError> {
        let issued = self
            .jwt
            .issue(user.user_id, &user.email, &user.role, user.name.as_deref())?;

        Ok(AuthResponse {
            access_token: issued.access_token,
            token_type: issued.token_type,
            expires_in: issued.expires_in,
            user: user.into(),
            is_new_user,
        })
    }
}

/// Linking by email trusts Google's word that the caller owns the address.
fn ensure_linkable(identity: &GoogleIdentity) -> Result<(), ServiceError> {
    if identity.email_verified {
        Ok(())
    } else {
        Err(ServiceError::UnverifiedEmailLink)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(email_verified: bool) -> GoogleIdentity {
        GoogleIdentity {
            google_id: "g-77".to_string(),
            email: "chief@example.org".to_string(),
            email_verified,
            name: None,
            given_name: None,
            family_name: None,
            picture: None,
            locale: None,
        }
    }

    #[test]
    fn test_verified_google_email_may_link() {
        assert!(ensure_linkable(&identity(true)).is_ok());
    }

    #[test]
    fn test_unverified_google_email_may_not_link() {
        assert!(matches!(
            ensure_linkable(&identity(false)),
            Err(ServiceError::UnverifiedEmailLink)
        ));
    }
}
