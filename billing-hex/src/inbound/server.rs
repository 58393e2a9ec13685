//! HTTP Server configuration and startup.

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use billing_types::{PaymentGateway, UnitOfWork};

use super::handlers::{self, AppState};
use crate::BillingService;

/// HTTP Server for the Billing API.
pub struct HttpServer<U: UnitOfWork, G: PaymentGateway> {
    state: Arc<AppState<U, G>>,
}

impl<U: UnitOfWork, G: PaymentGateway> HttpServer<U, G> {
    /// Creates a new HTTP server sharing the given service.
    pub fn new(service: Arc<BillingService<U, G>>) -> Self {
        Self {
            state: Arc::new(AppState { service }),
        }
    }

    /// Builds the Axum router with all routes.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(handlers::health))
            .route("/api/wallets", post(handlers::create_wallet::<U, G>))
            .route("/api/wallets/{user_id}", get(handlers::get_wallet::<U, G>))
            .route(
                "/api/payments/initialize",
                post(handlers::initialize_payment::<U, G>),
            )
            .route(
                "/api/payments/verify/{reference}",
                get(handlers::verify_payment::<U, G>),
            )
            .route(
                "/api/webhooks/paystack",
                post(handlers::paystack_webhook::<U, G>),
            )
            .route("/api/escrows", post(handlers::create_escrow::<U, G>))
            .route("/api/escrows/{id}", get(handlers::get_escrow::<U, G>))
            .route("/api/escrows/{id}/fund", post(handlers::fund_escrow::<U, G>))
            .route(
                "/api/escrows/{id}/release",
                post(handlers::release_escrow::<U, G>),
            )
            .route(
                "/api/escrows/{id}/refund",
                post(handlers::refund_escrow::<U, G>),
            )
            .route(
                "/api/payout-accounts",
                post(handlers::register_payout_account::<U, G>),
            )
            .route(
                "/api/withdrawals",
                post(handlers::request_withdrawal::<U, G>),
            )
            .route("/internal/events", post(handlers::publish_event::<U, G>))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Runs the server on the given address with graceful shutdown.
    pub async fn run(self, addr: &str) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("Server listening on {}", listener.local_addr()?);

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown...");
}
