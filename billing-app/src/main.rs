//! # Billing Application
//!
//! Binary that wires together all the components:
//! - Load configuration from environment
//! - Open the SQLite unit of work and the Paystack adapter
//! - Create the billing service
//! - Spawn the outbox dispatcher
//! - Start the HTTP server

mod config;

use std::sync::Arc;

use opentelemetry::global;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{propagation::TraceContextPropagator, trace as sdktrace};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use billing_hex::{
    BillingService, DispatcherConfig, OutboxDispatcher, ServiceConfig, inbound::HttpServer,
};
use billing_repo::{PaystackConfig, PaystackGateway, SqliteStore};

use config::{Config, LogFormat};

fn init_tracer(endpoint: &str) -> anyhow::Result<(sdktrace::Tracer, sdktrace::SdkTracerProvider)> {
    global::set_text_map_propagator(TraceContextPropagator::new());

    // gRPC exporter with batch processing (non-blocking)
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;

    let provider = sdktrace::SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .build();

    global::set_tracer_provider(provider.clone());

    use opentelemetry::trace::TracerProvider as _;
    Ok((provider.tracer("billing-service"), provider))
}

fn init_tracing(config: &Config) -> anyhow::Result<Option<sdktrace::SdkTracerProvider>> {
    let (telemetry, provider) = match config.otlp_endpoint.as_deref() {
        Some(endpoint) => {
            let (tracer, provider) = init_tracer(endpoint)?;
            (
                Some(tracing_opentelemetry::layer().with_tracer(tracer)),
                Some(provider),
            )
        }
        None => (None, None),
    };

    let json = config.log_format == LogFormat::Json;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,billing_app=debug,billing_hex=debug".into()),
        )
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(tracing_subscriber::fmt::layer))
        .with(telemetry)
        .init();

    Ok(provider)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    let otel_provider = init_tracing(&config)?;

    tracing::info!("Starting billing server on port {}", config.port);
    tracing::info!("Using database: {}", config.database_url);

    // Opens the pool and applies the schema
    let store = SqliteStore::new(&config.database_url).await?;

    let gateway = PaystackGateway::new(PaystackConfig {
        secret_key: config.paystack_secret_key.clone(),
        base_url: config.paystack_base_url.clone(),
        timeout: config.gateway_timeout,
    })?;

    let service = Arc::new(BillingService::new(
        store,
        gateway,
        ServiceConfig {
            callback_url: config.payment_callback_url.clone(),
            payout_currency: config.payout_currency,
        },
    ));

    let dispatcher = OutboxDispatcher::new(
        service.clone(),
        DispatcherConfig {
            poll_interval: config.outbox_poll_interval,
            batch_size: config.outbox_batch_size,
            max_attempts: config.outbox_max_attempts,
        },
    );
    let dispatcher_handle = tokio::spawn(dispatcher.run());

    let server = HttpServer::new(service);
    let addr = format!("0.0.0.0:{}", config.port);
    let result = server.run(&addr).await;

    dispatcher_handle.abort();

    // Ensure traces are flushed before exit
    if let Some(provider) = otel_provider {
        let _ = provider.shutdown();
    }
    result
}
