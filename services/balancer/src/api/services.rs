//! Service and backend mutation endpoints.
//!
//! Request bodies carry ports as wide integers and modes/check types as
//! strings; everything is validated here before it reaches the store, so
//! a bad value is a 400 with a readable detail rather than a
//! deserialization failure.

use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::api::error::ApiError;
use crate::state::AppState;
use crate::store::{
    parse_ip, validate_port, BackendConfig, CheckType, Mode, ServiceConfig, DEFAULT_HTTP_PATH,
};

/// Success body for mutations.
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ListServicesResponse {
    pub services: Vec<ServiceConfig>,
}

#[derive(Debug, Serialize)]
pub struct ListServersResponse {
    pub servers: Vec<BackendConfig>,
}

#[derive(Debug, Deserialize)]
pub struct ListServersQuery {
    pub service: String,
}

#[derive(Debug, Deserialize)]
pub struct AddServiceRequest {
    pub name: String,
    pub listen_port: i64,
    #[serde(default)]
    pub mode: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct EditServiceRequest {
    pub name: String,
    #[serde(default)]
    pub new_name: Option<String>,
    #[serde(default)]
    pub listen_port: Option<i64>,
    #[serde(default)]
    pub mode: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RemoveServiceRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct SetServiceModeRequest {
    pub service: String,
    pub mode: String,
}

#[derive(Debug, Deserialize)]
pub struct AddServerRequest {
    pub service: String,
    pub ip: String,
    pub port: i64,
    #[serde(default)]
    pub check_type: Option<String>,
    #[serde(default)]
    pub http_path: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct EditServerRequest {
    pub service: String,
    pub ip: String,
    pub port: i64,
    #[serde(default)]
    pub new_ip: Option<String>,
    #[serde(default)]
    pub new_port: Option<i64>,
    #[serde(default)]
    pub check_type: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RemoveServerRequest {
    pub service: String,
    pub ip: String,
    pub port: i64,
}

fn message(text: String) -> Json<MessageResponse> {
    Json(MessageResponse { message: text })
}

/// GET /api/list_services
pub async fn list_services(State(state): State<AppState>) -> Json<ListServicesResponse> {
    Json(ListServicesResponse {
        services: state.store().list_services().await,
    })
}

/// GET /api/list_servers?service=NAME
pub async fn list_servers(
    State(state): State<AppState>,
    Query(query): Query<ListServersQuery>,
) -> Result<Json<ListServersResponse>, ApiError> {
    let servers = state.store().list_servers(&query.service).await?;
    Ok(Json(ListServersResponse { servers }))
}

/// POST /api/add_service
pub async fn add_service(
    State(state): State<AppState>,
    Json(body): Json<AddServiceRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let port = validate_port(body.listen_port)?;
    let mode = match body.mode.as_deref() {
        Some(mode) => Mode::parse(mode)?,
        None => Mode::default(),
    };

    state.store().add_service(&body.name, port, mode).await?;

    Ok(message(format!("Service '{}' added", body.name)))
}

/// POST /api/edit_service
pub async fn edit_service(
    State(state): State<AppState>,
    Json(body): Json<EditServiceRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let listen_port = body.listen_port.map(validate_port).transpose()?;
    let mode = body.mode.as_deref().map(Mode::parse).transpose()?;

    let final_name = state
        .store()
        .edit_service(&body.name, body.new_name.as_deref(), listen_port, mode)
        .await?;

    if final_name != body.name {
        state.forwarder().rename(&body.name, &final_name).await;
        state.stats().rename_service(&body.name, &final_name).await;
    }

    // A port or mode change restarts the service's listener; the next
    // tick rebinds with the fresh configuration.
    if listen_port.is_some() || mode.is_some() {
        state.forwarder().invalidate(&final_name).await;
    }

    Ok(message(format!("Service '{}' updated", final_name)))
}

/// POST /api/remove_service
pub async fn remove_service(
    State(state): State<AppState>,
    Json(body): Json<RemoveServiceRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.store().remove_service(&body.name).await?;
    state.forwarder().teardown(&body.name).await;
    state.stats().remove_service(&body.name).await;

    Ok(message(format!("Service '{}' removed", body.name)))
}

/// POST /api/set_service_mode
pub async fn set_service_mode(
    State(state): State<AppState>,
    Json(body): Json<SetServiceModeRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let mode = Mode::parse(&body.mode)?;
    state.store().set_service_mode(&body.service, mode).await?;
    state.forwarder().invalidate(&body.service).await;

    Ok(message(format!(
        "Service '{}' mode set to {}",
        body.service, mode
    )))
}

/// POST /api/add_server
pub async fn add_server(
    State(state): State<AppState>,
    Json(body): Json<AddServerRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let ip = parse_ip(&body.ip)?;
    let port = validate_port(body.port)?;
    let check_type = match body.check_type.as_deref() {
        Some(check_type) => CheckType::parse(check_type)?,
        None => CheckType::default(),
    };

    let backend = BackendConfig {
        ip,
        port,
        check_type,
        http_path: body
            .http_path
            .unwrap_or_else(|| DEFAULT_HTTP_PATH.to_string()),
    };
    let addr = backend.addr();

    state.store().add_server(&body.service, backend).await?;
    state.stats().ensure_backend(&body.service, addr).await;

    Ok(message(format!(
        "Server {} added to service '{}'",
        addr, body.service
    )))
}

/// POST /api/edit_server
pub async fn edit_server(
    State(state): State<AppState>,
    Json(body): Json<EditServerRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let ip = parse_ip(&body.ip)?;
    let port = validate_port(body.port)?;
    let new_ip = body.new_ip.as_deref().map(parse_ip).transpose()?;
    let new_port = body.new_port.map(validate_port).transpose()?;
    let check_type = body.check_type.as_deref().map(CheckType::parse).transpose()?;

    let (old_addr, new_addr) = state
        .store()
        .edit_server(&body.service, ip, port, new_ip, new_port, check_type)
        .await?;

    // Identity changes reset the backend's counters to zero.
    if old_addr != new_addr {
        state
            .stats()
            .reset_backend(&body.service, old_addr, new_addr)
            .await;
    }

    Ok(message(format!(
        "Server {} updated in service '{}'",
        new_addr, body.service
    )))
}

/// POST /api/remove_server
pub async fn remove_server(
    State(state): State<AppState>,
    Json(body): Json<RemoveServerRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let ip = parse_ip(&body.ip)?;
    let port = validate_port(body.port)?;

    let addr = std::net::SocketAddr::new(ip, port);
    state.store().remove_server(&body.service, ip, port).await?;
    state.stats().remove_backend(&body.service, addr).await;

    Ok(message(format!(
        "Server {} removed from service '{}'",
        addr, body.service
    )))
}
