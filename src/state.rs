use std::sync::Arc;

use anyhow::Context;
use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::info;

use crate::{
    clock::{Clock, SystemClock},
    config::AppConfig,
    notify::{LogNotifier, Notifier, SmtpNotifier},
    store::{DataStore, PgStore},
};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn DataStore>,
    pub config: Arc<AppConfig>,
    pub notifier: Arc<dyn Notifier>,
    pub clock: Arc<dyn Clock>,
}

pub async fn connect(config: &AppConfig) -> anyhow::Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("connect to database")
}

impl AppState {
    pub fn init(config: Arc<AppConfig>, db: PgPool) -> anyhow::Result<Self> {
        let notifier: Arc<dyn Notifier> = match &config.mail {
            Some(mail) => {
                info!(host = %mail.host, port = mail.port, "smtp notifier configured");
                Arc::new(SmtpNotifier::new(mail)?)
            }
            None => {
                info!("SMTP_HOST not set, emails will only be logged");
                Arc::new(LogNotifier)
            }
        };
        Ok(Self {
            store: Arc::new(PgStore::new(db)),
            config,
            notifier,
            clock: Arc::new(SystemClock),
        })
    }
}

#[cfg(test)]
pub use fake::Fakes;
