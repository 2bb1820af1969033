use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};

use crate::{
    error::{AppError, AppResult},
    job::JobRecord,
    state::AppState,
    types::{DeviceSummary, SetOptionQuery},
};

pub async fn list_devices(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let devices = state.registry.devices().await;
    let mut items: Vec<DeviceSummary> = Vec::with_capacity(devices.len());
    for device in devices {
        items.push(device.summary().await);
    }
    Ok(Json(items))
}

pub async fn get_parameters(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> AppResult<impl IntoResponse> {
    let device = state.registry.get_device(&name).await?;
    Ok(Json(device.parameters().await?))
}

pub async fn get_options(State(state): State<AppState>, Path(name): Path<String>) -> AppResult<impl IntoResponse> {
    let device = state.registry.get_device(&name).await?;
    Ok(Json(device.options().await?))
}

pub async fn set_option(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(q): Query<SetOptionQuery>,
) -> AppResult<impl IntoResponse> {
    if q.option_name.trim().is_empty() {
        return Err(AppError::ValidationError {
            field: "option_name".into(),
            message: "option_name must not be empty".into(),
        });
    }
    let device = state.registry.get_device(&name).await?;
    let options = device.set_option(&q.option_name, &q.option_value).await?;
    tracing::info!("Set option {}={} on {}", q.option_name, q.option_value, name);
    Ok(Json(options))
}

/// Starts a scan. The returned job usually has no pages yet.
pub async fn scan(State(state): State<AppState>, Path(name): Path<String>) -> AppResult<impl IntoResponse> {
    let device = state.registry.get_device(&name).await?;
    let job = device.scan().await?;
    Ok(Json(job.snapshot().await))
}

pub async fn list_jobs(State(state): State<AppState>, Path(name): Path<String>) -> AppResult<impl IntoResponse> {
    let device = state.registry.get_device(&name).await?;
    let mut items: Vec<JobRecord> = Vec::new();
    for job in device.jobs().await {
        items.push(job.snapshot().await);
    }
    Ok(Json(items))
}

pub async fn get_job(
    State(state): State<AppState>,
    Path((name, job_id)): Path<(String, usize)>,
) -> AppResult<impl IntoResponse> {
    let device = state.registry.get_device(&name).await?;
    let job = device.get_job(job_id).await?;
    Ok(Json(job.snapshot().await))
}
