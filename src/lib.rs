//! # Scour Backend Library
//!
//! Scour exposes document scanners as an HTTP microservice: enumerate devices,
//! enable and disable them, inspect and set capture options, start scan jobs and
//! fetch the captured pages.
//!
//! ## Architecture
//!
//! - **Axum**: HTTP server and routing
//! - **Tokio**: async runtime; scanner I/O runs on the blocking pool
//! - **Serde**: JSON payloads
//!
//! ## Core Components
//!
//! - [`backend`]: scanning driver abstraction and the simulated driver
//! - [`device`]: device sessions and the disabled/idle/scanning/error state machine
//! - [`capture`]: background capture procedure filling a job
//! - [`job`]: scan jobs and page encoding
//! - [`registry`]: catalog of devices reported by the backend
//! - [`config`]: application configuration management
//! - [`error`]: device error taxonomy and HTTP error responses
//! - [`metrics`]: scan and device counters
//! - [`middleware`]: HTTP response hardening
//! - [`routes`]: HTTP API endpoint handlers
//! - [`state`]: shared application state
//! - [`types`]: data transfer objects

pub mod backend;
pub mod capture;
pub mod config;
pub mod device;
pub mod error;
pub mod job;
pub mod metrics;
pub mod middleware;
pub mod registry;
pub mod routes;
pub mod state;
pub mod types;

#[cfg(test)]
mod tests;
