pub mod api;
pub mod config;
pub mod error;
pub mod ports;
pub mod runtime;
pub mod servers;
pub mod streams;
pub mod telemetry;
pub mod templates;

pub use error::{Error, Result};
