//! Booking service binary: HTTP ingress, outbox publisher, and the three
//! queue consumers that react to inventory/payment events.

use booking_broker::BrokerEventBus;
use booking_core::environment::{Clock, SystemClock};
use booking_core::event_bus::EventBus;
use booking_postgres::{DeadLetterQueue, IdempotencyLedger, OutboxStore};
use booking_runtime::consumer::IdempotentConsumer;
use booking_runtime::metrics_server::MetricsServer;
use booking_runtime::outbox_publisher::{OutboxPublisher, OutboxPublisherConfig};
use booking_service::config::Config;
use booking_service::handlers;
use booking_service::http::{self, BookingAppState};
use booking_service::repository::BookingRepository;
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
                .unwrap_or_else(|_| "info,booking_service=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    tracing::info!(
        postgres = %config.postgres.url,
        broker = %config.broker.url,
        "booking service configuration loaded"
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.postgres.max_connections)
        .connect(&config.postgres.url)
        .await?;

    let repository = Arc::new(BookingRepository::new(pool.clone()));
    let outbox = Arc::new(OutboxStore::new(pool.clone()));
    let ledger = Arc::new(IdempotencyLedger::new(pool.clone()));
    let dlq = Arc::new(DeadLetterQueue::new(pool.clone()));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let event_bus: Arc<dyn EventBus> = Arc::new(
        BrokerEventBus::builder()
            .brokers(&config.broker.url)
            .consumer_group("booking-service")
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
        "booking-outbox",
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

    let inventory_failed_consumer = IdempotentConsumer::new(
        "booking-on-inventory-reservation-failed",
        vec!["inventory_reservation_failed".to_string()],
        Arc::clone(&event_bus),
        Arc::clone(&ledger),
        Arc::clone(&dlq),
        Arc::new(handlers::InventoryReservationFailedHandler::new(Arc::clone(&repository))),
        Arc::clone(&clock),
        "booking-service",
        config.consumer.max_requeue,
        shutdown_tx.subscribe(),
    );
    let payment_succeeded_consumer = IdempotentConsumer::new(
        "booking-on-payment-succeeded",
        vec!["payment_succeeded".to_string()],
        Arc::clone(&event_bus),
        Arc::clone(&ledger),
        Arc::clone(&dlq),
        Arc::new(handlers::PaymentSucceededHandler::new(Arc::clone(&repository))),
        Arc::clone(&clock),
        "booking-service",
        config.consumer.max_requeue,
        shutdown_tx.subscribe(),
    );
    let payment_failed_consumer = IdempotentConsumer::new(
        "booking-on-payment-failed",
        vec!["payment_failed".to_string()],
        Arc::clone(&event_bus),
        Arc::clone(&ledger),
        Arc::clone(&dlq),
        Arc::new(handlers::PaymentFailedHandler::new(
            Arc::clone(&repository),
            config.consumer.payment_max_attempts,
        )),
        Arc::clone(&clock),
        "booking-service",
        config.consumer.max_requeue,
        shutdown_tx.subscribe(),
    );

    let consumer_handles = vec![
        inventory_failed_consumer.spawn(),
        payment_succeeded_consumer.spawn(),
        payment_failed_consumer.spawn(),
    ];

    let state = BookingAppState { repository };
    let app = http::router(state);
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "booking service listening");

    let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal(shutdown_tx.clone()));
    if let Err(error) = server.await {
        tracing::error!(%error, "http server error");
    }

    publisher_handle.abort();
    for handle in consumer_handles {
        handle.abort();
    }
    tracing::info!("booking service shut down");

    Ok(())
}

async fn shutdown_signal(shutdown_tx: tokio::sync::broadcast::Sender<()>) {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received, draining in-flight work");
    let _ = shutdown_tx.send(());
}
