use std::sync::Arc;

use rand::RngCore;
use time::{Duration, OffsetDateTime};
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::error::AuthError;
use crate::auth::jwt::JwtKeys;
use crate::auth::otp::{self, OtpEngine};
use crate::auth::password;
use crate::config::AppConfig;
use crate::mailer::OtpMailer;
use crate::state::AppState;
use crate::store::{CredentialStore, NewUser, OtpPurpose, ResetToken, StoreError, User};

/// Bound on optimistic-concurrency retries before a conflict is surfaced.
const CAS_RETRIES: usize = 3;

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Reset tokens are longer-lived secrets than OTP codes; 128 random bits,
/// handed out as hex.
fn generate_reset_token() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Orchestrates registration, login 2FA, and password reset as state
/// transitions over the credential store, delegating code handling to the
/// OTP engine and token issuance to the session issuer.
pub struct AuthService {
    store: Arc<dyn CredentialStore>,
    mailer: Arc<dyn OtpMailer>,
    otp: OtpEngine,
    jwt: JwtKeys,
    reset_token_ttl: Duration,
}

impl AuthService {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        mailer: Arc<dyn OtpMailer>,
        config: &AppConfig,
    ) -> Self {
        Self {
            store,
            mailer,
            otp: OtpEngine::new(&config.auth),
            jwt: JwtKeys::new(&config.jwt),
            reset_token_ttl: Duration::seconds(config.auth.reset_token_ttl_secs),
        }
    }

    pub fn from_state(state: &AppState) -> Self {
        Self::new(state.store.clone(), state.mailer.clone(), &state.config)
    }

    /// Read-modify-write with optimistic concurrency. `apply` runs against a
    /// fresh copy of the record each round; mutations are persisted through a
    /// conditional write even when `apply` fails, so attempt counters survive
    /// unsuccessful verifies. Losing a version race re-runs `apply` against
    /// the winner's state.
    async fn with_user<T, F>(&self, id: Uuid, mut apply: F) -> Result<T, AuthError>
    where
        F: FnMut(&mut User) -> Result<T, AuthError>,
    {
        for _ in 0..CAS_RETRIES {
            let mut user = self
                .store
                .find_by_id(id)
                .await?
                .ok_or(AuthError::NotFound)?;
            let expected = user.version;
            let before = user.clone();
            let outcome = apply(&mut user);
            if user == before {
                return outcome;
            }
            match self.store.atomic_update(id, expected, user).await {
                Ok(_) => return outcome,
                Err(StoreError::VersionConflict) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(AuthError::Store(StoreError::VersionConflict))
    }

    /// At-most-one-enqueue: a failed send is logged and never retried; the
    /// issued code stays valid.
    async fn deliver(&self, email: &str, purpose: OtpPurpose, code: &str) {
        if let Err(e) = self.mailer.send_otp(email, purpose, code).await {
            warn!(error = %e, email = %email, "otp delivery failed");
        }
    }

    /// Creates an unverified account and issues its registration code in one
    /// store insert. Duplicate email fails with `Conflict` at the store
    /// level, so concurrent registrations cannot both win.
    pub async fn register(
        &self,
        name: &str,
        email: &str,
        password_plain: &str,
    ) -> Result<Uuid, AuthError> {
        let email = normalize_email(email);
        let password_hash = password::hash_password(password_plain)?;
        let (pending, code) = self.otp.issue(OtpPurpose::Registration);
        let user = self
            .store
            .create_user(NewUser {
                email,
                name: name.trim().to_string(),
                password_hash,
                pending_otp: Some(pending),
            })
            .await?;
        info!(user_id = %user.id, "user registered, verification pending");
        self.deliver(&user.email, OtpPurpose::Registration, &code).await;
        Ok(user.id)
    }

    /// Consumes the registration code, marks the account verified, and logs
    /// the user straight in.
    pub async fn verify_registration(
        &self,
        user_id: Uuid,
        code: &str,
    ) -> Result<(String, User), AuthError> {
        let user = self
            .with_user(user_id, |user| {
                self.otp
                    .verify(&mut user.pending_otp, OtpPurpose::Registration, code)?;
                user.verified = true;
                Ok(user.clone())
            })
            .await?;
        let token = self.jwt.mint(user.id)?;
        info!(user_id = %user.id, "registration verified, session issued");
        Ok((token, user))
    }

    /// First login factor. On success a login code goes out and the caller
    /// gets the user id to pair with the code submission; no session yet.
    pub async fn login(&self, email: &str, password_plain: &str) -> Result<Uuid, AuthError> {
        let email = normalize_email(email);
        let user = self
            .store
            .find_by_email(&email)
            .await?
            .ok_or(AuthError::NotFound)?;
        if !password::verify_password(password_plain, &user.password_hash)? {
            warn!(user_id = %user.id, "login with invalid password");
            return Err(AuthError::Unauthorized);
        }
        if !user.verified {
            warn!(user_id = %user.id, "login on unverified account");
            return Err(AuthError::Unauthorized);
        }
        let (code, email) = self
            .with_user(user.id, |u| {
                let (pending, code) = self.otp.issue(OtpPurpose::Login);
                u.pending_otp = Some(pending);
                Ok((code, u.email.clone()))
            })
            .await?;
        self.deliver(&email, OtpPurpose::Login, &code).await;
        Ok(user.id)
    }

    /// Second login factor: consumes the login code and mints the session.
    pub async fn complete_login(
        &self,
        user_id: Uuid,
        code: &str,
    ) -> Result<(String, User), AuthError> {
        let user = self
            .with_user(user_id, |user| {
                self.otp
                    .verify(&mut user.pending_otp, OtpPurpose::Login, code)?;
                Ok(user.clone())
            })
            .await?;
        let token = self.jwt.mint(user.id)?;
        info!(user_id = %user.id, "login completed, session issued");
        Ok((token, user))
    }

    /// Issues a password-reset code. Whether the HTTP layer admits that the
    /// address was unknown is its decision; the core reports it.
    pub async fn forgot_password(&self, email: &str) -> Result<(), AuthError> {
        let email = normalize_email(email);
        let user = self
            .store
            .find_by_email(&email)
            .await?
            .ok_or(AuthError::NotFound)?;
        let (code, email) = self
            .with_user(user.id, |u| {
                let (pending, code) = self.otp.issue(OtpPurpose::PasswordReset);
                u.pending_otp = Some(pending);
                Ok((code, u.email.clone()))
            })
            .await?;
        self.deliver(&email, OtpPurpose::PasswordReset, &code).await;
        Ok(())
    }

    /// Consumes the reset code and hands back a fresh single-use reset
    /// token; only its hash is stored.
    pub async fn verify_reset_otp(&self, user_id: Uuid, code: &str) -> Result<String, AuthError> {
        let token = self
            .with_user(user_id, |user| {
                self.otp
                    .verify(&mut user.pending_otp, OtpPurpose::PasswordReset, code)?;
                let token = generate_reset_token();
                user.reset_token = Some(ResetToken {
                    token_hash: otp::hash_secret(&token),
                    expires_at: OffsetDateTime::now_utc() + self.reset_token_ttl,
                });
                Ok(token)
            })
            .await?;
        info!(user_id = %user_id, "reset otp verified, reset token issued");
        Ok(token)
    }

    /// Exchanges a valid reset token for a new password. The token is
    /// consumed either way once it expires or succeeds.
    pub async fn reset_password(
        &self,
        user_id: Uuid,
        reset_token: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        // Hashing is expensive; do it once outside the retry loop.
        let new_hash = password::hash_password(new_password)?;
        self.with_user(user_id, |user| {
            let current = user.reset_token.as_ref().ok_or(AuthError::NotFound)?;
            if OffsetDateTime::now_utc() > current.expires_at {
                user.reset_token = None;
                return Err(AuthError::Expired);
            }
            if current.token_hash != otp::hash_secret(reset_token) {
                return Err(AuthError::InvalidToken);
            }
            user.password_hash = new_hash.clone();
            user.reset_token = None;
            user.pending_otp = None;
            Ok(())
        })
        .await?;
        info!(user_id = %user_id, "password reset completed");
        Ok(())
    }

    /// Re-sends whatever code is currently pending, for its own purpose,
    /// superseding it with a fresh one outside the cooldown window.
    pub async fn resend_otp(&self, user_id: Uuid) -> Result<(), AuthError> {
        let (code, purpose, email) = self
            .with_user(user_id, |user| {
                let pending = user.pending_otp.as_ref().ok_or(AuthError::NotFound)?;
                let (fresh, code) = self.otp.resend(pending)?;
                let purpose = fresh.purpose;
                user.pending_otp = Some(fresh);
                Ok((code, purpose, user.email.clone()))
            })
            .await?;
        self.deliver(&email, purpose, &code).await;
        Ok(())
    }

    pub async fn user_profile(&self, user_id: Uuid) -> Result<User, AuthError> {
        self.store
            .find_by_id(user_id)
            .await?
            .ok_or(AuthError::NotFound)
    }
}
