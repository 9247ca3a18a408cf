use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use shared::protocol::API_PREFIX;
use shared::types::Method;
use crate::catalog::{CatalogEntry, CatalogHandle, ScanStatus};
use crate::engine::registry::FindingInfo;
use crate::engine::EngineHandle;

#[derive(Clone)]
pub struct AppState {
    pub catalog: CatalogHandle,
    pub engine: EngineHandle,
}

#[derive(Deserialize)]
pub struct DeviceQuery {
    pub method: Option<Method>,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct MethodStatus {
    pub method: Method,
    pub service_type: &'static str,
    /// Reported to the catalog
    pub initial_scan_done: bool,
    /// Still gated inside the engine
    pub scanning: bool,
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub methods: Vec<MethodStatus>,
    pub published: usize,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(&format!("{API_PREFIX}/devices"), get(get_devices))
        .route(&format!("{API_PREFIX}/devices/:uuid"), get(get_device))
        .route(&format!("{API_PREFIX}/findings"), get(get_findings))
        .route(&format!("{API_PREFIX}/status"), get(get_status))
        .with_state(state)
}

fn internal_error(what: &str, e: anyhow::Error) -> StatusCode {
    tracing::error!("Failed to query {}: {}", what, e);
    StatusCode::INTERNAL_SERVER_ERROR
}

async fn get_devices(
    State(state): State<AppState>,
    Query(params): Query<DeviceQuery>,
) -> Result<Json<Vec<CatalogEntry>>, StatusCode> {
    let mut devices = state
        .catalog
        .devices()
        .await
        .map_err(|e| internal_error("devices", e))?;

    if let Some(method) = params.method {
        devices.retain(|entry| entry.device.method == method);
    }
    Ok(Json(devices))
}

/// One physical device may be published under several methods
async fn get_device(
    State(state): State<AppState>,
    Path(uuid): Path<String>,
) -> Result<Json<Vec<CatalogEntry>>, StatusCode> {
    let uuid = Uuid::parse_str(&uuid).map_err(|_| StatusCode::BAD_REQUEST)?;

    let devices = state
        .catalog
        .devices_by_uuid(uuid)
        .await
        .map_err(|e| internal_error("device", e))?;

    if devices.is_empty() {
        return Err(StatusCode::NOT_FOUND);
    }
    Ok(Json(devices))
}

async fn get_findings(State(state): State<AppState>) -> Result<Json<Vec<FindingInfo>>, StatusCode> {
    state
        .engine
        .findings()
        .await
        .map(Json)
        .map_err(|e| internal_error("findings", e))
}

async fn get_status(State(state): State<AppState>) -> Result<Json<StatusResponse>, StatusCode> {
    let scan = state
        .catalog
        .scan_status()
        .await
        .map_err(|e| internal_error("scan status", e))?;
    let pending = state
        .engine
        .initial_scan_pending()
        .await
        .map_err(|e| internal_error("engine status", e))?;
    let published = state
        .catalog
        .devices()
        .await
        .map_err(|e| internal_error("devices", e))?
        .len();

    Ok(Json(StatusResponse {
        methods: method_status(&scan, &pending),
        published,
    }))
}

fn method_status(scan: &[ScanStatus], pending: &[Method]) -> Vec<MethodStatus> {
    Method::ALL
        .iter()
        .map(|&method| MethodStatus {
            method,
            service_type: method.service_type(),
            initial_scan_done: scan
                .iter()
                .any(|s| s.method == method && s.initial_scan_done),
            scanning: pending.contains(&method),
        })
        .collect()
}
