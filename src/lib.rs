//! Library crate for netwarden: network discovery and health monitoring
//! behind a polling HTTP API.
pub mod config;
pub mod health;
pub mod notify;
pub mod ports;
pub mod probe;
pub mod runner;
pub mod scan;
pub mod server;
pub mod status;
pub mod subnet;
pub mod titles;
pub mod types;
