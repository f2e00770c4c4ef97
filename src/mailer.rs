use anyhow::Context;
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::info;

use crate::config::SmtpConfig;
use crate::store::OtpPurpose;

/// Out-of-band delivery channel for OTP codes. Failures are the caller's to
/// log; they never invalidate the code that was issued.
#[async_trait]
pub trait OtpMailer: Send + Sync {
    async fn send_otp(&self, email: &str, purpose: OtpPurpose, code: &str) -> anyhow::Result<()>;
}

fn subject(purpose: OtpPurpose) -> &'static str {
    match purpose {
        OtpPurpose::Registration => "Verify your taskhive account",
        OtpPurpose::Login => "Your taskhive sign-in code",
        OtpPurpose::PasswordReset => "Reset your taskhive password",
    }
}

fn body(purpose: OtpPurpose, code: &str) -> String {
    let action = match purpose {
        OtpPurpose::Registration => "verify your account",
        OtpPurpose::Login => "finish signing in",
        OtpPurpose::PasswordReset => "reset your password",
    };
    format!(
        "Hello,\n\n\
        Use the following code to {action}:\n\n\
        {code}\n\n\
        This code expires in 5 minutes. If you did not request it, you can\n\
        ignore this email.\n\n\
        The taskhive team"
    )
}

/// SMTP delivery via lettre.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(cfg: &SmtpConfig) -> anyhow::Result<Self> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(&cfg.host)
            .context("build smtp transport")?
            .credentials(Credentials::new(cfg.username.clone(), cfg.password.clone()))
            .port(cfg.port)
            .build();
        let from = cfg.from.parse::<Mailbox>().context("parse smtp from address")?;
        Ok(Self { transport, from })
    }
}

#[async_trait]
impl OtpMailer for SmtpMailer {
    async fn send_otp(&self, email: &str, purpose: OtpPurpose, code: &str) -> anyhow::Result<()> {
        let message = Message::builder()
            .from(self.from.clone())
            .to(email.parse().context("parse recipient address")?)
            .subject(subject(purpose))
            .header(ContentType::TEXT_PLAIN)
            .body(body(purpose, code))
            .context("build otp email")?;
        self.transport
            .send(message)
            .await
            .context("send otp email")?;
        info!(email = %email, purpose = %purpose.as_str(), "otp email sent");
        Ok(())
    }
}

/// Fallback sink for deployments without SMTP. Records that a code went out
/// but never the code itself.
pub struct LogMailer;

#[async_trait]
impl OtpMailer for LogMailer {
    async fn send_otp(&self, email: &str, purpose: OtpPurpose, _code: &str) -> anyhow::Result<()> {
        info!(email = %email, purpose = %purpose.as_str(), "otp issued (smtp disabled, code not delivered)");
        Ok(())
    }
}
