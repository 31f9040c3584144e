use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::info;

use remedi_chat::controller::SessionController;
use remedi_chat::{HttpMediaResolver, HttpPromptSender, MediaError, SendError};
use remedi_core::audit::{AuditEvent, AuditSink};
use remedi_core::config::{AppConfig, ConfigError, LoadOptions};
use remedi_core::SessionPolicy;
use remedi_db::{connect_with_settings, migrations, DbPool};

use crate::services::{SqlAttachmentStore, SqlRecordService, SqlStateStore};

/// Concrete controller wiring for the server binary.
pub type AppController = SessionController<
    SqlStateStore,
    SqlRecordService,
    SqlAttachmentStore,
    HttpMediaResolver,
    HttpPromptSender,
>;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub controller: Arc<AppController>,
    pub audit: Arc<dyn AuditSink>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("chat transport setup failed: {0}")]
    Transport(#[from] SendError),
    #[error("media resolver setup failed: {0}")]
    Media(#[from] MediaError),
}

/// Sink that forwards engine audit events onto the tracing pipeline.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: AuditEvent) {
        info!(
            event_name = %event.event_type,
            correlation_id = %event.correlation_id,
            subject_id = event.subject_id.as_ref().map(|id| id.0.as_str()).unwrap_or("unknown"),
            category = ?event.category,
            outcome = ?event.outcome,
            actor = %event.actor,
            "audit event"
        );
    }
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        subject_id = "unknown",
        "starting application bootstrap"
    );

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        subject_id = "unknown",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        subject_id = "unknown",
        "database migrations applied"
    );

    let sender = HttpPromptSender::new(
        config.chat.base_url.clone(),
        config.chat.api_token.clone(),
        Duration::from_secs(config.chat.send_timeout_secs),
    )?;
    let media = HttpMediaResolver::new(
        config.chat.base_url.clone(),
        config.chat.api_token.clone(),
        Duration::from_secs(config.media.download_timeout_secs),
    )?;

    let audit: Arc<dyn AuditSink> = Arc::new(TracingAuditSink);
    let controller = Arc::new(SessionController::new(
        SqlStateStore::new(db_pool.clone()),
        SqlRecordService::new(db_pool.clone()),
        SqlAttachmentStore::new(db_pool.clone()),
        media,
        sender,
        SessionPolicy::from_minutes(config.session.timeout_minutes),
        audit.clone(),
    ));

    Ok(Application { config, db_pool, controller, audit })
}

#[cfg(test)]
mod tests {
    use remedi_core::config::{ConfigOverrides, LoadOptions};

    use super::bootstrap;

    fn valid_options(database_url: &str) -> LoadOptions {
        LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some(database_url.to_string()),
                chat_api_token: Some("tok-test".to_string()),
                chat_base_url: Some("https://chat.test/api".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }
    }

    #[tokio::test]
    async fn bootstrap_fails_fast_without_a_chat_token() {
        let result = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:".to_string()),
                chat_base_url: Some("https://chat.test/api".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await;

        assert!(result.is_err());
        let message = result.err().expect("error").to_string();
        assert!(message.contains("chat.api_token"));
    }

    #[tokio::test]
    async fn bootstrap_applies_migrations_and_wires_the_controller() {
        let app = bootstrap(valid_options("sqlite::memory:?cache=shared"))
            .await
            .expect("bootstrap should succeed with valid overrides");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN \
             ('subject', 'dependent', 'conversation_state', 'patient_order', \
              'order_attachment', 'pharmacy')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("expected foundation tables after bootstrap");
        assert_eq!(table_count, 6, "bootstrap should expose the baseline tables");

        app.db_pool.close().await;
    }
}
