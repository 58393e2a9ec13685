//! Outbox dispatcher: polls pending domain events and applies them.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{error, info, instrument, warn};

use billing_types::{
    AppError, ConcurrencyKind, OutboxEvent, OutboxStatus, PaymentGateway, UnitOfWork,
};

use crate::BillingService;

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub poll_interval: Duration,
    pub batch_size: i64,
    pub max_attempts: i32,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1000),
            batch_size: 10,
            max_attempts: 5,
        }
    }
}

/// Counts from one pass over the outbox.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub completed: usize,
    pub retrying: usize,
    pub failed: usize,
}

pub struct OutboxDispatcher<U: UnitOfWork, G: PaymentGateway> {
    service: Arc<BillingService<U, G>>,
    config: DispatcherConfig,
}

impl<U: UnitOfWork, G: PaymentGateway> OutboxDispatcher<U, G> {
    pub fn new(service: Arc<BillingService<U, G>>, config: DispatcherConfig) -> Self {
        Self { service, config }
    }

    #[instrument(skip(self))]
    pub async fn run(self) {
        info!(
            "Starting outbox dispatcher (every {:?}, batch {})",
            self.config.poll_interval, self.config.batch_size
        );
        loop {
            match self.drain_once().await {
                Ok(report) if report != DrainReport::default() => {
                    info!(
                        completed = report.completed,
                        retrying = report.retrying,
                        failed = report.failed,
                        "Outbox batch processed"
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    error!("Failed to fetch outbox events: {}", e);
                }
            }
            sleep(self.config.poll_interval).await;
        }
    }

    /// Processes one batch of pending events in creation order.
    pub async fn drain_once(&self) -> Result<DrainReport, AppError> {
        let events = self.service.pending_events(self.config.batch_size).await?;

        let mut report = DrainReport::default();
        for event in events {
            match self.process_event(&event).await {
                Some(OutboxStatus::Completed) => report.completed += 1,
                Some(OutboxStatus::Pending) => report.retrying += 1,
                Some(OutboxStatus::Failed) => report.failed += 1,
                None => {}
            }
        }
        Ok(report)
    }

    #[instrument(skip(self, event), fields(event_id = %event.id, event_type = %event.event_type))]
    async fn process_event(&self, event: &OutboxEvent) -> Option<OutboxStatus> {
        match self.service.handle_event(event).await {
            Ok(()) => Some(OutboxStatus::Completed),
            // another dispatcher already handled it
            Err(AppError::Concurrency(ConcurrencyKind::EventModified)) => None,
            Err(e) => {
                warn!(attempt = event.attempts + 1, "Event handler failed: {}", e);
                match self
                    .service
                    .record_event_failure(event, &e.to_string(), self.config.max_attempts)
                    .await
                {
                    Ok(status) => {
                        if status == OutboxStatus::Failed {
                            error!("Giving up on event after {} attempts", event.attempts + 1);
                        }
                        Some(status)
                    }
                    Err(e) => {
                        error!("Failed to record event failure: {}", e);
                        None
                    }
                }
            }
        }
    }
}
