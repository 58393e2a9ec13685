//! # Billing Hex
//!
//! Application service layer, outbox dispatcher and HTTP adapter for the
//! billing service.
//!
//! ## Architecture
//!
//! - `service` - Application service (orchestrates domain operations)
//! - `dispatcher` - Drains the event outbox into the service
//! - `inbound/` - HTTP adapter (Axum server)
//!
//! The service is generic over `U: UnitOfWork` and `G: PaymentGateway`,
//! allowing different storage and provider adapters to be injected.

pub mod dispatcher;
pub mod inbound;
pub mod service;

#[cfg(test)]
mod service_tests;

pub use dispatcher::{DispatcherConfig, DrainReport, OutboxDispatcher};
pub use service::{BillingService, ServiceConfig};
