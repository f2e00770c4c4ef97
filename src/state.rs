use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use tracing::warn;

use crate::config::AppConfig;
use crate::mailer::{LogMailer, OtpMailer, SmtpMailer};
use crate::store::{postgres::PgCredentialStore, CredentialStore};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn CredentialStore>,
    pub mailer: Arc<dyn OtpMailer>,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let db = PgPoolOptions::new()
            .max_connections(10)
            .connect(&config.database_url)
            .await
            .context("connect to database")?;

        if let Err(e) = sqlx::migrate!("./migrations").run(&db).await {
            warn!(error = %e, "migration failed; continuing");
        }

        let mailer: Arc<dyn OtpMailer> = match &config.smtp {
            Some(smtp) => Arc::new(SmtpMailer::new(smtp)?),
            None => {
                warn!("smtp not configured; otp codes will not be delivered");
                Arc::new(LogMailer)
            }
        };

        Ok(Self {
            store: Arc::new(PgCredentialStore::new(db)),
            mailer,
            config,
        })
    }
}
