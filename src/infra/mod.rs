//! Infrastructure: HTTP surface, external actor clients, telemetry.

pub mod actor;
pub mod error;
pub mod http;
pub mod kv;
pub mod telemetry;
