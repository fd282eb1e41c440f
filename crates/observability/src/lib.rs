//! # raumfunk-observability
//!
//! Observability-Crate fuer Raumfunk:
//! - Prometheus-kompatible Metriken (`/metrics`)
//! - Structured Logging via tracing-subscriber (text oder JSON)
//! - Request-Timing Middleware

pub mod logging;
pub mod metrics;
pub mod middleware;

pub use logging::{log_format_gueltig, log_level_gueltig, logging_initialisieren};
pub use metrics::{metrics_router, RaumfunkMetrics};
pub use middleware::{request_timing_layer, timing_middleware};
