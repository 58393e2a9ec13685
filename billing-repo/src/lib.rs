//! # Billing Repository
//!
//! Concrete adapters for the billing service ports:
//!
//! - [`MemoryStore`] - in-process unit of work, always available
//! - [`SqliteStore`] - SQLite unit of work (feature `sqlite`)
//! - [`PaystackGateway`] - the `PaymentGateway` port over the Paystack REST API

pub mod memory;
pub mod paystack;
pub mod security;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "sqlite")]
mod types;


pub use memory::{MemoryScope, MemoryStore};
pub use paystack::{PaystackConfig, PaystackGateway};

#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteScope, SqliteStore};
