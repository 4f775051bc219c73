//! Inventory service binary: outbox publisher, the expiration sweeper, and
//! the three queue consumers that react to booking/payment events. Exposes
//! no external commands in the core (see the booking service for HTTP
//! ingress); only a metrics endpoint is served over HTTP here.

use booking_broker::BrokerEventBus;
use booking_core::environment::{Clock, SystemClock};
use booking_core::event_bus::EventBus;
use booking_postgres::{DeadLetterQueue, IdempotencyLedger, OutboxStore};
use booking_runtime::consumer::IdempotentConsumer;
use booking_runtime::metrics_server::MetricsServer;
use booking_runtime::outbox_publisher::{OutboxPublisher, OutboxPublisherConfig};
use inventory_service::config::Config;
use inventory_service::handlers;
use inventory_service::repository::InventoryRepository;
use inventory_service::sweeper::ExpirationSweeper;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,inventory_service=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    tracing::info!(
        postgres = %config.postgres.url,
        broker = %config.broker.url,
        "inventory service configuration loaded"
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.postgres.max_connections)
        .connect(&config.postgres.url)
        .await?;

    let repository = Arc::new(InventoryRepository::new(pool.clone()));
    let outbox = Arc::new(OutboxStore::new(pool.clone()));
    let ledger = Arc::new(IdempotencyLedger::new(pool.clone()));
    let dlq = Arc::new(DeadLetterQueue::new(pool.clone()));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let event_bus: Arc<dyn EventBus> = Arc::new(
        BrokerEventBus::builder()
            .brokers(&config.broker.url)
            .consumer_group("inventory-service")
            .build()?,
    );

    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    let mut metrics_server = MetricsServer::new(format!(
        "{}:{}",
        config.server.metrics_host, config.server.metrics_port
    )
    .parse()?);
    metrics_server.start()?;

    let publisher = OutboxPublisher::new(
        "inventory-outbox",
        outbox,
        Arc::clone(&event_bus),
        OutboxPublisherConfig {
            poll_interval: config.outbox.poll_interval,
            batch_size: config.outbox.batch_size,
            backoff_base: config.outbox.backoff_base,
            backoff_cap: config.outbox.backoff_cap,
        },
        shutdown_tx.subscribe(),
    );
    let publisher_handle = publisher.spawn();

    let reservation_ttl = chrono::Duration::from_std(config.inventory.reservation_ttl)
        .unwrap_or_else(|_| chrono::Duration::minutes(15));

    let booking_created_consumer = IdempotentConsumer::new(
        "inventory-on-booking-created",
        vec!["booking_created".to_string()],
        Arc::clone(&event_bus),
        Arc::clone(&ledger),
        Arc::clone(&dlq),
        Arc::new(handlers::BookingCreatedHandler::new(Arc::clone(&repository), reservation_ttl)),
        Arc::clone(&clock),
        "inventory-service",
        config.consumer.max_requeue,
        shutdown_tx.subscribe(),
    );
    let payment_succeeded_consumer = IdempotentConsumer::new(
        "inventory-on-payment-succeeded",
        vec!["payment_succeeded".to_string()],
        Arc::clone(&event_bus),
        Arc::clone(&ledger),
        Arc::clone(&dlq),
        Arc::new(handlers::PaymentSucceededHandler::new(Arc::clone(&repository))),
        Arc::clone(&clock),
        "inventory-service",
        config.consumer.max_requeue,
        shutdown_tx.subscribe(),
    );
    let payment_failed_consumer = IdempotentConsumer::new(
        "inventory-on-payment-failed",
        vec!["payment_failed".to_string()],
        Arc::clone(&event_bus),
        Arc::clone(&ledger),
        Arc::clone(&dlq),
        Arc::new(handlers::PaymentFailedHandler::new(Arc::clone(&repository))),
        Arc::clone(&clock),
        "inventory-service",
        config.consumer.max_requeue,
        shutdown_tx.subscribe(),
    );

    let consumer_handles = vec![
        booking_created_consumer.spawn(),
        payment_succeeded_consumer.spawn(),
        payment_failed_consumer.spawn(),
    ];

    let sweeper = ExpirationSweeper::new(
        Arc::clone(&repository),
        config.inventory.sweep_interval,
        config.inventory.sweep_batch_size,
        shutdown_tx.subscribe(),
    );
    let sweeper_handle = sweeper.spawn();

    tracing::info!("inventory service running");
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received, draining in-flight work");
    let _ = shutdown_tx.send(());

    publisher_handle.abort();
    sweeper_handle.abort();
    for handle in consumer_handles {
        handle.abort();
    }
    tracing::info!("inventory service shut down");

    Ok(())
}
