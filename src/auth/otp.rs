use rand::distributions::Uniform;
use rand::Rng;
use sha2::{Digest, Sha256};
use time::{Duration, OffsetDateTime};

use crate::auth::error::AuthError;
use crate::config::AuthConfig;
use crate::store::{OtpPurpose, PendingOtp};

pub const OTP_LENGTH: usize = 6;

/// SHA-256 hex digest; the only form in which codes and reset tokens are
/// persisted.
pub(crate) fn hash_secret(value: &str) -> String {
    hex::encode(Sha256::digest(value.as_bytes()))
}

/// Uniformly random numeric code, leading zeros allowed.
fn generate_code() -> String {
    rand::thread_rng()
        .sample_iter(&Uniform::new(0, 10))
        .take(OTP_LENGTH)
        .map(|d: u8| d.to_string())
        .collect()
}

fn well_formed(candidate: &str) -> bool {
    candidate.len() == OTP_LENGTH && candidate.bytes().all(|b| b.is_ascii_digit())
}

/// Generates, validates, and expires one-time codes. Pure over the
/// `PendingOtp` state; the state machine persists the outcome through a
/// conditional write so the attempt counter stays consistent under
/// concurrent verifies.
pub struct OtpEngine {
    ttl: Duration,
    max_attempts: i32,
    resend_cooldown: Duration,
}

impl OtpEngine {
    pub fn new(cfg: &AuthConfig) -> Self {
        Self {
            ttl: Duration::seconds(cfg.otp_ttl_secs),
            max_attempts: cfg.otp_max_attempts,
            resend_cooldown: Duration::seconds(cfg.otp_resend_cooldown_secs),
        }
    }

    /// Builds a fresh pending OTP, superseding whatever code was live before
    /// regardless of purpose. Returns the record to persist together with the
    /// plaintext for out-of-band delivery; the plaintext is never stored.
    pub fn issue(&self, purpose: OtpPurpose) -> (PendingOtp, String) {
        let code = generate_code();
        let now = OffsetDateTime::now_utc();
        let pending = PendingOtp {
            code_hash: hash_secret(&code),
            purpose,
            created_at: now,
            expires_at: now + self.ttl,
            attempts: 0,
            last_sent_at: now,
        };
        (pending, code)
    }

    /// As `issue`, but refuses inside the cooldown window measured from the
    /// previous send.
    pub fn resend(&self, pending: &PendingOtp) -> Result<(PendingOtp, String), AuthError> {
        if OffsetDateTime::now_utc() - pending.last_sent_at < self.resend_cooldown {
            return Err(AuthError::Throttled);
        }
        Ok(self.issue(pending.purpose))
    }

    /// Checks `candidate` against the pending OTP, mutating the slot in
    /// place: the attempt counter advances on a mismatch and the slot clears
    /// on success. The caller must persist the slot even on failure.
    pub fn verify(
        &self,
        slot: &mut Option<PendingOtp>,
        purpose: OtpPurpose,
        candidate: &str,
    ) -> Result<(), AuthError> {
        // Shape is revalidated here even though the HTTP layer checks it.
        if !well_formed(candidate) {
            return Err(AuthError::InvalidCode);
        }
        let pending = slot.as_mut().ok_or(AuthError::NotFound)?;
        if OffsetDateTime::now_utc() > pending.expires_at {
            return Err(AuthError::Expired);
        }
        if pending.purpose != purpose {
            return Err(AuthError::PurposeMismatch);
        }
        if pending.attempts >= self.max_attempts {
            return Err(AuthError::Locked);
        }
        if pending.code_hash != hash_secret(candidate) {
            pending.attempts += 1;
            return Err(AuthError::InvalidCode);
        }
        *slot = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    fn engine() -> OtpEngine {
        OtpEngine::new(&AppConfig::for_tests().auth)
    }

    #[test]
    fn issued_codes_are_six_digits() {
        let (pending, code) = engine().issue(OtpPurpose::Login);
        assert_eq!(code.len(), OTP_LENGTH);
        assert!(code.bytes().all(|b| b.is_ascii_digit()));
        assert_eq!(pending.attempts, 0);
        assert_eq!(pending.code_hash, hash_secret(&code));
        assert!(pending.expires_at > pending.created_at);
    }

    #[test]
    fn verify_consumes_on_match() {
        let eng = engine();
        let (pending, code) = eng.issue(OtpPurpose::Registration);
        let mut slot = Some(pending);
        eng.verify(&mut slot, OtpPurpose::Registration, &code)
            .expect("correct code should verify");
        assert!(slot.is_none());

        // Replaying the same code finds nothing.
        let err = eng
            .verify(&mut slot, OtpPurpose::Registration, &code)
            .unwrap_err();
        assert!(matches!(err, AuthError::NotFound));
    }

    #[test]
    fn wrong_code_counts_attempts_then_locks() {
        let eng = engine();
        let (pending, code) = eng.issue(OtpPurpose::Login);
        let wrong = if code == "000000" { "000001" } else { "000000" };
        let mut slot = Some(pending);

        for expected in 1..=5 {
            let err = eng.verify(&mut slot, OtpPurpose::Login, wrong).unwrap_err();
            assert!(matches!(err, AuthError::InvalidCode));
            assert_eq!(slot.as_ref().unwrap().attempts, expected);
        }

        // Exhausted: even the correct code is refused now.
        let err = eng.verify(&mut slot, OtpPurpose::Login, &code).unwrap_err();
        assert!(matches!(err, AuthError::Locked));
        assert!(slot.is_some());
    }

    #[test]
    fn expired_code_is_rejected() {
        let eng = engine();
        let (mut pending, code) = eng.issue(OtpPurpose::Login);
        pending.expires_at = OffsetDateTime::now_utc() - Duration::seconds(1);
        let mut slot = Some(pending);
        let err = eng.verify(&mut slot, OtpPurpose::Login, &code).unwrap_err();
        assert!(matches!(err, AuthError::Expired));
    }

    #[test]
    fn purpose_mismatch_is_rejected() {
        let eng = engine();
        let (pending, code) = eng.issue(OtpPurpose::Login);
        let mut slot = Some(pending);
        let err = eng
            .verify(&mut slot, OtpPurpose::PasswordReset, &code)
            .unwrap_err();
        assert!(matches!(err, AuthError::PurposeMismatch));
        // The stored code survives untouched.
        assert_eq!(slot.as_ref().unwrap().attempts, 0);
    }

    #[test]
    fn malformed_candidates_never_reach_the_hash() {
        let eng = engine();
        let (pending, _) = eng.issue(OtpPurpose::Login);
        let mut slot = Some(pending);
        for bad in ["12345", "1234567", "12a456", ""] {
            let err = eng.verify(&mut slot, OtpPurpose::Login, bad).unwrap_err();
            assert!(matches!(err, AuthError::InvalidCode));
        }
        assert_eq!(slot.as_ref().unwrap().attempts, 0);
    }

    #[test]
    fn resend_inside_cooldown_is_throttled() {
        let eng = engine();
        let (pending, _) = eng.issue(OtpPurpose::PasswordReset);
        let err = eng.resend(&pending).unwrap_err();
        assert!(matches!(err, AuthError::Throttled));
    }

    #[test]
    fn resend_after_cooldown_supersedes_the_old_code() {
        let eng = engine();
        let (mut pending, old_code) = eng.issue(OtpPurpose::Login);
        pending.last_sent_at = OffsetDateTime::now_utc() - Duration::seconds(61);
        pending.attempts = 3;

        let (fresh, new_code) = eng.resend(&pending).expect("cooldown elapsed");
        assert_eq!(fresh.purpose, OtpPurpose::Login);
        assert_eq!(fresh.attempts, 0);
        assert_ne!(fresh.code_hash, hash_secret(&old_code));
        assert_eq!(fresh.code_hash, hash_secret(&new_code));
    }
}
