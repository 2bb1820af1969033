//! Integration and unit tests for Scour.
//!
//! ## Test Modules
//!
//! - **support**: scripted backend and helpers shared by the other modules
//! - **device_tests**: device state machine, options and captures
//! - **job_tests**: job lifecycle and page encoding
//! - **registry_tests**: enumeration, refresh and lookup
//! - **api_tests**: HTTP endpoints and status code mapping
//! - **error_tests**: error conversion and response bodies
//! - **config_tests**: configuration loading and validation
//! - **health_api_tests**: health, version and metrics endpoints
//!
//! Individual test modules can be run with:
//! ```bash
//! cargo test device_tests
//! cargo test api_tests
//! # etc.
//! ```

pub mod support;
pub mod api_tests;
