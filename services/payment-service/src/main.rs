//! Payment service binary: outbox publisher, and the two queue consumers
//! that drive the payment attempt lifecycle. Exposes no external commands.

use booking_broker::BrokerEventBus;
use booking_core::environment::{Clock, SystemClock};
use booking_core::event_bus::EventBus;
use booking_postgres::{DeadLetterQueue, IdempotencyLedger, OutboxStore};
use booking_runtime::consumer::IdempotentConsumer;
use booking_runtime::metrics_server::MetricsServer;
use booking_runtime::outbox_publisher::{OutboxPublisher, OutboxPublisherConfig};
use payment_service::config::Config;
use payment_service::gateway::{FakeGateway, PaymentGateway};
use payment_service::handlers;
use payment_service::repository::PaymentRepository;
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
                .unwrap_or_else(|_| "info,payment_service=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    tracing::info!(
        postgres = %config.postgres.url,
        broker = %config.broker.url,
        "payment service configuration loaded"
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.postgres.max_connections)
        .connect(&config.postgres.url)
        .await?;

    let repository = Arc::new(PaymentRepository::new(pool.clone()));
    let outbox = Arc::new(OutboxStore::new(pool.clone()));
    let ledger = Arc::new(IdempotencyLedger::new(pool.clone()));
    let dlq = Arc::new(DeadLetterQueue::new(pool.clone()));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    // No production gateway client ships in this crate; `FakeGateway` stands in
    // until one is wired. Swap this line for a real client behind the same
    // `PaymentGateway` trait without touching attempt logic.
    let gateway: Arc<dyn PaymentGateway> = Arc::new(FakeGateway::always_succeeds());

    let event_bus: Arc<dyn EventBus> = Arc::new(
        BrokerEventBus::builder()
            .brokers(&config.broker.url)
            .consumer_group("payment-service")
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
        "payment-outbox",
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

    let inventory_reserved_consumer = IdempotentConsumer::new(
        "payment-on-inventory-reserved",
        vec!["inventory_reserved".to_string()],
        Arc::clone(&event_bus),
        Arc::clone(&ledger),
        Arc::clone(&dlq),
        Arc::new(handlers::InventoryReservedHandler::new(
            Arc::clone(&repository),
            Arc::clone(&gateway),
            config.payment.max_attempts,
        )),
        Arc::clone(&clock),
        "payment-service",
        config.consumer.max_requeue,
        shutdown_tx.subscribe(),
    );
    let retry_payment_consumer = IdempotentConsumer::new(
        "payment-on-retry-payment",
        vec!["retry_payment".to_string()],
        Arc::clone(&event_bus),
        Arc::clone(&ledger),
        Arc::clone(&dlq),
        Arc::new(handlers::RetryPaymentHandler::new(
            Arc::clone(&repository),
            Arc::clone(&gateway),
            config.payment.max_attempts,
            config.payment.max_retry_delay,
        )),
        Arc::clone(&clock),
        "payment-service",
        config.consumer.max_requeue,
        shutdown_tx.subscribe(),
    );

    let consumer_handles = vec![
        inventory_reserved_consumer.spawn(),
        retry_payment_consumer.spawn(),
    ];

    tracing::info!("payment service running");
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received, draining in-flight work");
    let _ = shutdown_tx.send(());

    publisher_handle.abort();
    for handle in consumer_handles {
        handle.abort();
    }
    tracing::info!("payment service shut down");

    Ok(())
}
