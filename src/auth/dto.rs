use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// Request body for registration.
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

/// Request body pairing a user id with an OTP submission. Shared by the
/// registration, login, and password-reset verification endpoints.
#[derive(Debug, Deserialize)]
pub struct OtpSubmission {
    pub user_id: Uuid,
    pub code: String,
}

/// Request body for login (first factor).
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    pub user_id: Uuid,
    pub reset_token: String,
    pub new_password: String,
}

#[derive(Debug, Deserialize)]
pub struct ResendOtpRequest {
    pub user_id: Uuid,
}

/// Returned when a flow issues an OTP and now waits for its submission.
#[derive(Debug, Serialize)]
pub struct OtpPendingResponse {
    pub user_id: Uuid,
}

/// Returned once a flow reaches its authenticated terminal state.
#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub token: String,
    pub user: PublicUser,
}

#[derive(Debug, Serialize)]
pub struct ResetTokenResponse {
    pub reset_token: String,
}

/// Public part of the user returned to the client.
#[derive(Debug, Serialize)]
pub struct PublicUser {
    pub id: Uuid,
    pub email: String,
    pub name: String,
}

impl From<&crate::store::User> for PublicUser {
    fn from(user: &crate::store::User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            name: user.name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_regex_accepts_and_rejects() {
        assert!(is_valid_email("ann@x.com"));
        assert!(is_valid_email("a.b+tag@sub.example.org"));
        assert!(!is_valid_email("annx.com"));
        assert!(!is_valid_email("ann@"));
        assert!(!is_valid_email("ann @x.com"));
    }

    #[test]
    fn public_user_hides_password_hash() {
        let user = crate::store::User {
            id: Uuid::new_v4(),
            email: "ann@x.com".into(),
            name: "Ann".into(),
            password_hash: "$argon2id$secret".into(),
            verified: true,
            pending_otp: None,
            reset_token: None,
            version: 0,
            created_at: time::OffsetDateTime::now_utc(),
        };
        let json = serde_json::to_string(&PublicUser::from(&user)).unwrap();
        assert!(json.contains("ann@x.com"));
        assert!(!json.contains("argon2id"));
    }
}
