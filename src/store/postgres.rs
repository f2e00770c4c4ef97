use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use super::{CredentialStore, NewUser, OtpPurpose, PendingOtp, ResetToken, StoreError, User};

/// Postgres-backed credential store. Email uniqueness is enforced by a
/// unique index on `lower(email)`; conditional updates key on the `version`
/// column.
pub struct PgCredentialStore {
    pool: PgPool,
}

impl PgCredentialStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const USER_COLUMNS: &str = "id, email, name, password_hash, verified, \
     otp_code_hash, otp_purpose, otp_created_at, otp_expires_at, \
     otp_attempts, otp_last_sent_at, \
     reset_token_hash, reset_token_expires_at, \
     version, created_at";

#[derive(FromRow)]
struct UserRow {
    id: Uuid,
    email: String,
    name: String,
    password_hash: String,
    verified: bool,
    otp_code_hash: Option<String>,
    otp_purpose: Option<String>,
    otp_created_at: Option<OffsetDateTime>,
    otp_expires_at: Option<OffsetDateTime>,
    otp_attempts: i32,
    otp_last_sent_at: Option<OffsetDateTime>,
    reset_token_hash: Option<String>,
    reset_token_expires_at: Option<OffsetDateTime>,
    version: i64,
    created_at: OffsetDateTime,
}

impl TryFrom<UserRow> for User {
    type Error = StoreError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let pending_otp = match (
            row.otp_code_hash,
            row.otp_purpose,
            row.otp_created_at,
            row.otp_expires_at,
            row.otp_last_sent_at,
        ) {
            (Some(code_hash), Some(purpose), Some(created_at), Some(expires_at), Some(last_sent_at)) => {
                Some(PendingOtp {
                    code_hash,
                    purpose: purpose.parse::<OtpPurpose>().map_err(StoreError::Backend)?,
                    created_at,
                    expires_at,
                    attempts: row.otp_attempts,
                    last_sent_at,
                })
            }
            _ => None,
        };
        let reset_token = match (row.reset_token_hash, row.reset_token_expires_at) {
            (Some(token_hash), Some(expires_at)) => Some(ResetToken {
                token_hash,
                expires_at,
            }),
            _ => None,
        };
        Ok(User {
            id: row.id,
            email: row.email,
            name: row.name,
            password_hash: row.password_hash,
            verified: row.verified,
            pending_otp,
            reset_token,
            version: row.version,
            created_at: row.created_at,
        })
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => {
            matches!(db.kind(), sqlx::error::ErrorKind::UniqueViolation)
        }
        _ => false,
    }
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE lower(email) = lower($1)"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.into()))?;
        row.map(User::try_from).transpose()
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.into()))?;
        row.map(User::try_from).transpose()
    }

    async fn create_user(&self, new: NewUser) -> Result<User, StoreError> {
        let otp = new.pending_otp;
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "INSERT INTO users (email, name, password_hash, \
                 otp_code_hash, otp_purpose, otp_created_at, otp_expires_at, \
                 otp_attempts, otp_last_sent_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             RETURNING {USER_COLUMNS}"
        ))
        .bind(&new.email)
        .bind(&new.name)
        .bind(&new.password_hash)
        .bind(otp.as_ref().map(|o| o.code_hash.clone()))
        .bind(otp.as_ref().map(|o| o.purpose.as_str()))
        .bind(otp.as_ref().map(|o| o.created_at))
        .bind(otp.as_ref().map(|o| o.expires_at))
        .bind(otp.as_ref().map(|o| o.attempts).unwrap_or(0))
        .bind(otp.as_ref().map(|o| o.last_sent_at))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::Conflict
            } else {
                StoreError::Backend(e.into())
            }
        })?;
        User::try_from(row)
    }

    async fn atomic_update(
        &self,
        id: Uuid,
        expected_version: i64,
        user: User,
    ) -> Result<User, StoreError> {
        let otp = &user.pending_otp;
        let reset = &user.reset_token;
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "UPDATE users SET \
                 name = $3, password_hash = $4, verified = $5, \
                 otp_code_hash = $6, otp_purpose = $7, otp_created_at = $8, \
                 otp_expires_at = $9, otp_attempts = $10, otp_last_sent_at = $11, \
                 reset_token_hash = $12, reset_token_expires_at = $13, \
                 version = version + 1 \
             WHERE id = $1 AND version = $2 \
             RETURNING {USER_COLUMNS}"
        ))
        .bind(id)
        .bind(expected_version)
        .bind(&user.name)
        .bind(&user.password_hash)
        .bind(user.verified)
        .bind(otp.as_ref().map(|o| o.code_hash.clone()))
        .bind(otp.as_ref().map(|o| o.purpose.as_str()))
        .bind(otp.as_ref().map(|o| o.created_at))
        .bind(otp.as_ref().map(|o| o.expires_at))
        .bind(otp.as_ref().map(|o| o.attempts).unwrap_or(0))
        .bind(otp.as_ref().map(|o| o.last_sent_at))
        .bind(reset.as_ref().map(|r| r.token_hash.clone()))
        .bind(reset.as_ref().map(|r| r.expires_at))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.into()))?;

        match row {
            Some(row) => User::try_from(row),
            // No row matched: either the user is gone or the version moved.
            None => {
                let exists = sqlx::query_scalar::<_, bool>(
                    "SELECT EXISTS (SELECT 1 FROM users WHERE id = $1)",
                )
                .bind(id)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| StoreError::Backend(e.into()))?;
                if exists {
                    Err(StoreError::VersionConflict)
                } else {
                    Err(StoreError::NotFound)
                }
            }
        }
    }
}
