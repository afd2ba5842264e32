//! # Singlet Core
//!
//! Error type and tracing setup shared by the Singlet crates.

pub mod error;
pub mod telemetry;

pub use error::*;
pub use telemetry::{init_telemetry, TelemetryConfig};
