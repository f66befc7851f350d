//! Bombardier: scenario-driven load and correctness harness
//!
//! Drives externally hosted e-commerce services through complete order
//! lifecycles (user selection, order creation, item collection,
//! finalization, payment, delivery) at a controlled launch rate, while
//! auditing every observable transition against the order state machine
//! and the financial bookkeeping invariants.
//!
//! The crate is a library: entrypoints (CLI, web admin) live downstream
//! and talk to [`controller::TestController`]. The HTTP adapter behind
//! [`api::ExternalServiceApi`] is likewise supplied by the caller;
//! [`sim::SimulatedTarget`] is the in-memory stand-in used by the
//! scenario suite and smoke runs.

pub mod api;
pub mod awaiter;
pub mod context;
pub mod controller;
pub mod error;
pub mod metrics;
pub mod order_cache;
pub mod pipeline;
pub mod rate_limiter;
pub mod sim;
pub mod stage;
pub mod stages;
pub mod state_machine;
pub mod user_pool;

// Re-export the surface most callers touch
pub use api::{ApiError, ExternalApiFactory, ExternalServiceApi, ServiceRegistry};
pub use context::TestContext;
pub use controller::{FlowSnapshot, TestController};
pub use error::{StageError, StageResult};
pub use stage::{Continuation, TestOutcome, TestStage};
