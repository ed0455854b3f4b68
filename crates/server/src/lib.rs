//! HTTP surface and process supervision for the Arbor pipeline.
//!
//! This crate provides:
//! - The admin router: health, bulk ingest, workspace and data endpoints,
//!   manual orphan sweeps, and Prometheus metrics
//! - Supervision of the stream consumer loops and the scheduled sweep

pub mod background;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod routes;
pub mod state;

pub use background::BackgroundTasks;
pub use error::ApiError;
pub use routes::create_router;
pub use state::AppState;
