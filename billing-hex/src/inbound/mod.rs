//! HTTP Inbound Adapter
//!
//! Axum-based HTTP server that drives the application layer.

mod handlers;
mod server;

pub use handlers::{SIGNATURE_HEADER, USER_ID_HEADER, USER_ROLE_HEADER};
pub use server::HttpServer;
