//! HTTP route handlers for the Scour API.
//!
//! Thin marshaling over the registry and device operations:
//!
//! - `devices`: parameters, options, scans and jobs of one device
//! - `service`: backend version, device enablement and refresh
//! - `health`: liveness, build info and counters

use axum::{
    routing::{get, put},
    Router,
};

use crate::state::AppState;

pub mod devices;
pub mod health;
pub mod service;

/// Builds the API router. Middleware layers are added by the caller.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health::healthz))
        .route("/version", get(health::version))
        .route("/metrics", get(health::metrics))
        .route("/devices", get(devices::list_devices))
        .route("/devices/{name}/parameters", get(devices::get_parameters))
        .route("/devices/{name}/options", get(devices::get_options).put(devices::set_option))
        .route("/devices/{name}/scan", put(devices::scan))
        .route("/devices/{name}/jobs", get(devices::list_jobs))
        .route("/devices/{name}/jobs/{job_id}", get(devices::get_job))
        .route("/service", get(service::get_service))
        .route("/service/devices", get(devices::list_devices))
        .route("/service/devices/{name}", get(service::get_device))
        .route("/service/devices/{name}/enable", put(service::enable_device))
        .route("/service/devices/{name}/disable", put(service::disable_device))
        .route("/service/refresh_devices", get(service::refresh_devices))
        .route("/service/reinitialize", put(service::reinitialize))
        .with_state(state)
}
