use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

pub mod memory;
pub mod postgres;

/// Authentication flow an OTP is scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OtpPurpose {
    Registration,
    Login,
    PasswordReset,
}

impl OtpPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            OtpPurpose::Registration => "registration",
            OtpPurpose::Login => "login",
            OtpPurpose::PasswordReset => "password_reset",
        }
    }
}

impl std::str::FromStr for OtpPurpose {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "registration" => Ok(OtpPurpose::Registration),
            "login" => Ok(OtpPurpose::Login),
            "password_reset" => Ok(OtpPurpose::PasswordReset),
            other => Err(anyhow::anyhow!("unknown otp purpose: {other}")),
        }
    }
}

/// The single live code for a user. Issuing a new code for any purpose
/// replaces this record wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingOtp {
    pub code_hash: String,
    pub purpose: OtpPurpose,
    pub created_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
    pub attempts: i32,
    pub last_sent_at: OffsetDateTime,
}

/// Issued after a password-reset OTP is consumed; required to actually
/// change the password.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResetToken {
    pub token_hash: String,
    pub expires_at: OffsetDateTime,
}

/// User record. Only hashes of secrets are ever stored here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub verified: bool,
    pub pending_otp: Option<PendingOtp>,
    pub reset_token: Option<ResetToken>,
    /// Bumped on every write; guards conditional updates.
    pub version: i64,
    pub created_at: OffsetDateTime,
}

/// Input for user creation. Carries the initial pending OTP so a
/// registration is a single atomic insert.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub name: String,
    pub password_hash: String,
    pub pending_otp: Option<PendingOtp>,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("email already registered")]
    Conflict,
    #[error("user not found")]
    NotFound,
    #[error("record changed concurrently")]
    VersionConflict,
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Persistence contract for user credentials.
///
/// `atomic_update` is a conditional write: it persists `user` only when the
/// stored version still equals `expected_version`, bumping the version on
/// success. Concurrent writers lose with `VersionConflict` and must re-read.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError>;

    /// Inserts a new unverified user. Duplicate email (case-insensitive)
    /// fails with `Conflict`, distinct from `NotFound`.
    async fn create_user(&self, new: NewUser) -> Result<User, StoreError>;

    async fn atomic_update(
        &self,
        id: Uuid,
        expected_version: i64,
        user: User,
    ) -> Result<User, StoreError>;
}
