//! Relay service entry point.
//!
//! Wires configuration, the database pool, the Kafka producer and
//! consumers, the outbox relay, the monitor, the webhook schedulers and
//! the HTTP surface, then serves until interrupted.

mod config;
mod routes;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use relay_events::{
    consumer, EventProducer, KafkaConfig, OutboxRelay,
};
use relay_monitor::{
    AlertDispatcher, AnomalyConfig, AnomalyDetector, LogAlertChannel, MonitorScheduler,
    MonitorService,
};
use relay_transactions::{
    AdminFacade, IdempotencyResolver, StateManager, TransactionService,
};
use relay_webhooks::consumers::TRANSACTION_WORKER_GROUP;
use relay_webhooks::schedulers::WebhookSchedulers;
use relay_webhooks::{
    webhooks_router, DeliveryService, SubscriptionService, TransactionEventHandler,
    WebhookEventHandler, WebhooksState,
};

use config::AppConfig;
use routes::{api_router, ApiState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let app_config = AppConfig::from_env()?;
    let kafka_config = KafkaConfig::from_env()?;

    let pool = relay_db::connect_pool(
        &app_config.database_url,
        app_config.database_max_connections,
    )
    .await?;
    relay_db::migrations::run(&pool).await?;
    info!("Database ready");

    let producer = EventProducer::new(kafka_config.clone())?;

    // Transaction side.
    let resolver = IdempotencyResolver::new(
        app_config.idempotency_critical_fields.clone(),
        app_config.idempotency_ignored_fields.clone(),
        app_config.idempotency_similarity_threshold,
    );
    let state_manager = StateManager::new(app_config.transactions.clone());
    let transactions = Arc::new(TransactionService::new(
        pool.clone(),
        resolver,
        state_manager,
        app_config.transactions.clone(),
        kafka_config.transaction_topic.clone(),
    ));
    let admin = Arc::new(AdminFacade::new(transactions.clone()));

    // Monitoring.
    let alerts = AlertDispatcher::new(Arc::new(LogAlertChannel));
    let detector = AnomalyDetector::new(
        pool.clone(),
        AnomalyConfig {
            pending_threshold: chrono::Duration::minutes(app_config.anomaly_pending_minutes),
            processing_threshold: chrono::Duration::minutes(app_config.anomaly_processing_minutes),
            retry_threshold: app_config.anomaly_retry_threshold,
            state_change_threshold: app_config.anomaly_state_change_threshold,
            ..AnomalyConfig::default()
        },
    );
    let monitor = Arc::new(MonitorService::new(
        transactions.clone(),
        detector,
        alerts.clone(),
        app_config.transactions.clone(),
        app_config.max_auto_retries,
        0,
        kafka_config.transaction_topic.clone(),
    ));

    // Webhook side.
    let subscriptions = SubscriptionService::new(pool.clone(), &app_config.webhooks);
    let delivery = DeliveryService::new(
        pool.clone(),
        subscriptions.clone(),
        app_config.webhooks.clone(),
    )?;

    let token = CancellationToken::new();

    // Outbox relay: entity transactions publish through here.
    let outbox = OutboxRelay::new(pool.clone(), producer.clone(), app_config.outbox_poll);
    tokio::spawn(outbox.run(token.clone()));

    // Transaction-event consumer: expands state changes into webhook
    // events keyed by subscription.
    let txn_consumer = consumer::build_consumer(
        &kafka_config,
        &kafka_config.transaction_topic,
        TRANSACTION_WORKER_GROUP,
    )?;
    let txn_handler = TransactionEventHandler::new(
        pool.clone(),
        subscriptions.clone(),
        producer.clone(),
        kafka_config.transaction_topic.clone(),
    );
    tokio::spawn(consumer::run_consumer(txn_consumer, txn_handler, token.clone()));

    // Webhook-event consumer: materialises and executes deliveries.
    let webhook_consumer = consumer::build_consumer(
        &kafka_config,
        &kafka_config.webhook_topic,
        "delivery-worker",
    )?;
    let webhook_handler = WebhookEventHandler::new(delivery.clone());
    tokio::spawn(consumer::run_consumer(webhook_consumer, webhook_handler, token.clone()));

    // Periodic work.
    let monitor_scheduler = MonitorScheduler::new(monitor.clone(), app_config.monitor_interval);
    tokio::spawn(monitor_scheduler.run(token.clone()));

    let webhook_schedulers = WebhookSchedulers::new(
        delivery.clone(),
        alerts.clone(),
        app_config.scheduler_intervals.clone(),
    );
    webhook_schedulers.spawn(token.clone());

    // HTTP surface.
    let app = api_router(ApiState {
        transactions: transactions.clone(),
        admin,
        monitor,
        delivery: delivery.clone(),
    })
    .merge(webhooks_router(WebhooksState {
        subscriptions,
        delivery,
    }));

    let listener = tokio::net::TcpListener::bind(&app_config.bind_addr).await?;
    info!(addr = %app_config.bind_addr, "Relay service listening");

    let shutdown_token = token.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Shutdown requested");
            shutdown_token.cancel();
        })
        .await?;

    token.cancel();
    info!("Relay service stopped");
    Ok(())
}
