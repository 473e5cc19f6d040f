use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::info;

use cadence_core::config::{AppConfig, ConfigError, LoadOptions};
use cadence_db::repositories::{
    ChannelRepository, ConversationRepository, MessageRepository, QueueRepository,
    ScheduleRepository, SqlChannelRepository, SqlConversationRepository, SqlMessageRepository,
    SqlQueueRepository, SqlScheduleRepository, SqlTriggerRepository, TriggerRepository,
};
use cadence_db::{connect_with_settings, migrations, DbPool};
use cadence_engine::{
    ConversationLifecycleManager, CrmSyncDispatcher, HttpCrmClient, HttpTransport,
    InboundProcessor, MessageDeliveryPipeline, NoopTransport, OutboundTransport, QueueScheduler,
    ResponseGenerator, ScriptedResponder, TriggerIngestor,
};

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub engine: EngineHandles,
}

/// The wired engine components the HTTP layer and scheduler run against.
pub struct EngineHandles {
    pub queue: Arc<dyn QueueRepository>,
    pub channels: Arc<dyn ChannelRepository>,
    pub transport: Arc<dyn OutboundTransport>,
    pub ingestor: Arc<TriggerIngestor>,
    pub scheduler: Arc<QueueScheduler>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(event_name = "bootstrap_start", "starting application bootstrap");

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(event_name = "bootstrap_database_connected", "database connection established");

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(event_name = "bootstrap_migrations_applied", "database migrations applied");

    let engine = wire_engine(&config, db_pool.clone());
    Ok(Application { config, db_pool, engine })
}

fn wire_engine(config: &AppConfig, db_pool: DbPool) -> EngineHandles {
    let triggers: Arc<dyn TriggerRepository> =
        Arc::new(SqlTriggerRepository::new(db_pool.clone()));
    let conversations: Arc<dyn ConversationRepository> =
        Arc::new(SqlConversationRepository::new(db_pool.clone()));
    let messages: Arc<dyn MessageRepository> =
        Arc::new(SqlMessageRepository::new(db_pool.clone()));
    let queue: Arc<dyn QueueRepository> = Arc::new(SqlQueueRepository::new(db_pool.clone()));
    let channels: Arc<dyn ChannelRepository> =
        Arc::new(SqlChannelRepository::new(db_pool.clone()));
    let schedules: Arc<dyn ScheduleRepository> = Arc::new(SqlScheduleRepository::new(db_pool));

    let transport: Arc<dyn OutboundTransport> = if config.transport.base_url.is_empty() {
        info!(event_name = "bootstrap_transport_noop", "no gateway configured, sends are no-ops");
        Arc::new(NoopTransport)
    } else {
        Arc::new(HttpTransport::new(
            http_client(config.transport.timeout_secs),
            config.transport.base_url.clone(),
            config.transport.api_token.clone(),
        ))
    };

    let crm = match (&config.crm.enabled, &config.crm.base_url, &config.crm.api_token) {
        (true, Some(base_url), Some(api_token)) => CrmSyncDispatcher::new(Arc::new(
            HttpCrmClient::new(http_client(30), base_url.clone(), api_token.clone()),
        )),
        _ => CrmSyncDispatcher::disabled(),
    };

    let lifecycle = Arc::new(ConversationLifecycleManager::new(
        Arc::clone(&conversations),
        Arc::clone(&queue),
        crm.clone(),
    ));
    let pipeline = Arc::new(MessageDeliveryPipeline::new(
        Arc::clone(&conversations),
        Arc::clone(&messages),
        Arc::clone(&channels),
        Arc::clone(&transport),
        crm,
        Duration::from_millis(config.scheduler.inter_bubble_delay_ms),
    ));
    let responder: Arc<dyn ResponseGenerator> = Arc::new(ScriptedResponder::default());
    let inbound = Arc::new(InboundProcessor::new(
        Arc::clone(&conversations),
        Arc::clone(&messages),
        Arc::clone(&schedules),
        Arc::clone(&queue),
        Arc::clone(&lifecycle),
        Arc::clone(&pipeline),
        responder,
    ));
    let ingestor = Arc::new(TriggerIngestor::new(
        triggers,
        Arc::clone(&lifecycle),
        Arc::clone(&pipeline),
        Arc::clone(&inbound),
    ));
    let scheduler = Arc::new(QueueScheduler::new(
        Arc::clone(&queue),
        conversations,
        schedules,
        inbound,
        Duration::from_secs(config.scheduler.drain_interval_secs),
    ));

    EngineHandles { queue, channels, transport, ingestor, scheduler }
}

fn http_client(timeout_secs: u64) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs.max(1)))
        .build()
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use cadence_core::config::{ConfigOverrides, LoadOptions};

    use super::bootstrap;

    #[tokio::test]
    async fn bootstrap_applies_migrations_and_wires_the_engine() {
        let app = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await
        .expect("bootstrap should succeed against an in-memory database");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' AND name IN \
             ('triggers', 'conversations', 'messages', 'message_queue', 'whatsapp_accounts')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("schema query");
        assert_eq!(table_count, 5);

        app.db_pool.close().await;
    }

    #[tokio::test]
    async fn bootstrap_fails_fast_on_an_unsupported_database_url() {
        let result = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("postgres://localhost/cadence".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await;

        assert!(result.is_err());
    }
}
