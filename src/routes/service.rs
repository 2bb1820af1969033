use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};

use crate::{error::AppResult, state::AppState, types::DeviceSummary};

/// Backend version string.
pub async fn get_service(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.registry.version().await)
}

pub async fn get_device(State(state): State<AppState>, Path(name): Path<String>) -> AppResult<impl IntoResponse> {
    let device = state.registry.get_device(&name).await?;
    Ok(Json(device.summary().await))
}

pub async fn enable_device(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> AppResult<impl IntoResponse> {
    let device = state.registry.get_device(&name).await?;
    device.enable().await?;
    Ok(Json(device.summary().await))
}

pub async fn disable_device(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> AppResult<impl IntoResponse> {
    let device = state.registry.get_device(&name).await?;
    device.disable().await?;
    Ok(Json(device.summary().await))
}

pub async fn refresh_devices(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let devices = state.registry.refresh_devices().await?;
    let mut items: Vec<DeviceSummary> = Vec::with_capacity(devices.len());
    for device in devices {
        items.push(device.summary().await);
    }
    Ok(Json(items))
}

// Resets the backend; the device list is kept until the next refresh
pub async fn reinitialize(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let version = state.registry.initialize().await?;
    Ok(Json(version))
}
