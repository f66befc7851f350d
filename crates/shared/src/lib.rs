//! Shared library for the bombardier load harness
//!
//! This crate provides common functionality used by the orchestration
//! engine and any downstream admin surface:
//! - Data models for users, items, orders and target-service audit records
//! - Error handling types for the control surface
//! - Configuration management
//! - Logging infrastructure

pub mod config;
pub mod error;
pub mod models;

// Re-export commonly used types
pub use config::HarnessConfig;
pub use error::{Error, Result};
pub use models::{Order, OrderStatus, OrderStatusKind, TestParams, User};

/// Initialize tracing subscriber for structured logging
pub fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "shared=debug,bombardier=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
