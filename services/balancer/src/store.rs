//! Configuration store.
//!
//! In-memory authoritative state for services and their backends, with
//! JSON persistence on every accepted mutation:
//! - Snapshots take a read lock, mutations a write lock
//! - Writes use the write-to-temp + rename pattern for atomicity
//! - A failed disk write rolls the in-memory mutation back and reports
//!   a persistence error; memory and disk never diverge silently

use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Default health check path for HTTP backends.
pub const DEFAULT_HTTP_PATH: &str = "/";

/// Errors returned by store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Service or backend not present.
    #[error("{0}")]
    NotFound(String),

    /// Duplicate service name or backend identity.
    #[error("{0}")]
    Conflict(String),

    /// Bad IP, bad port, bad mode, or missing required fields.
    #[error("{0}")]
    Validation(String),

    /// The config file could not be written; the mutation was rolled back.
    #[error("failed to persist configuration: {0}")]
    Persistence(String),
}

/// Selection policy for a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Mode {
    #[default]
    #[serde(rename = "failover")]
    Failover,
    #[serde(rename = "round-robin")]
    RoundRobin,
}

impl Mode {
    /// Parse a mode from its wire spelling.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "failover" => Ok(Mode::Failover),
            "round-robin" => Ok(Mode::RoundRobin),
            other => Err(StoreError::Validation(format!(
                "Invalid mode '{}': must be 'failover' or 'round-robin'",
                other
            ))),
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Failover => write!(f, "failover"),
            Mode::RoundRobin => write!(f, "round-robin"),
        }
    }
}

/// Health check kind for a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckType {
    #[default]
    Tcp,
    Http,
    Smpp,
}

impl CheckType {
    /// Parse a check type from its wire spelling.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "tcp" => Ok(CheckType::Tcp),
            "http" => Ok(CheckType::Http),
            "smpp" => Ok(CheckType::Smpp),
            other => Err(StoreError::Validation(format!(
                "Invalid check_type '{}': must be 'tcp', 'http' or 'smpp'",
                other
            ))),
        }
    }
}

impl std::fmt::Display for CheckType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckType::Tcp => write!(f, "tcp"),
            CheckType::Http => write!(f, "http"),
            CheckType::Smpp => write!(f, "smpp"),
        }
    }
}

fn default_http_path() -> String {
    DEFAULT_HTTP_PATH.to_string()
}

/// One upstream destination with its health check configuration.
///
/// Identity within a service is `(ip, port)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendConfig {
    pub ip: IpAddr,
    pub port: u16,
    #[serde(default)]
    pub check_type: CheckType,
    /// Used only when `check_type` is `http`.
    #[serde(default = "default_http_path")]
    pub http_path: String,
}

impl BackendConfig {
    /// Socket address of this backend.
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }

    /// Key used in status snapshots: `"ip:port (check_type)"`.
    pub fn status_key(&self) -> String {
        format!("{} ({})", self.addr(), self.check_type)
    }
}

/// A named forwarding unit: listen port, selection mode, backends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub listen_port: u16,
    #[serde(default)]
    pub mode: Mode,
    #[serde(default)]
    pub servers: Vec<BackendConfig>,
}

/// On-disk file shape.
#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedConfig {
    services: Vec<ServiceConfig>,
}

/// Validate a port from an untrusted (wire) integer.
pub fn validate_port(port: i64) -> Result<u16, StoreError> {
    if (1..=65535).contains(&port) {
        Ok(port as u16)
    } else {
        Err(StoreError::Validation(format!(
            "Invalid port {}: must be between 1 and 65535",
            port
        )))
    }
}

/// Parse an IP address from its string form.
pub fn parse_ip(ip: &str) -> Result<IpAddr, StoreError> {
    ip.parse()
        .map_err(|_| StoreError::Validation(format!("Invalid IP address '{}'", ip)))
}

/// The in-memory configuration store.
pub struct ConfigStore {
    services: RwLock<Vec<ServiceConfig>>,
    data_path: PathBuf,
}

impl ConfigStore {
    /// Load the store from `data_path`.
    ///
    /// A missing file is an empty configuration; a present but invalid
    /// file is an error.
    pub fn load(data_path: PathBuf) -> anyhow::Result<Self> {
        let services = if data_path.exists() {
            let content = fs::read_to_string(&data_path)
                .with_context(|| format!("Failed to read config file: {}", data_path.display()))?;
            let persisted: PersistedConfig = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", data_path.display()))?;
            info!(
                path = %data_path.display(),
                service_count = persisted.services.len(),
                "Loaded configuration from disk"
            );
            persisted.services
        } else {
            debug!(path = %data_path.display(), "No config file, starting empty");
            Vec::new()
        };

        Ok(Self {
            services: RwLock::new(services),
            data_path,
        })
    }

    /// Path of the persisted config file.
    pub fn data_path(&self) -> &Path {
        &self.data_path
    }

    /// Snapshot of all services, in configured order.
    pub async fn list_services(&self) -> Vec<ServiceConfig> {
        self.services.read().await.clone()
    }

    /// Snapshot of one service.
    pub async fn get_service(&self, name: &str) -> Option<ServiceConfig> {
        self.services
            .read()
            .await
            .iter()
            .find(|s| s.name == name)
            .cloned()
    }

    /// Snapshot of one service's backends.
    pub async fn list_servers(&self, name: &str) -> Result<Vec<BackendConfig>, StoreError> {
        self.get_service(name)
            .await
            .map(|s| s.servers)
            .ok_or_else(|| service_not_found(name))
    }

    /// Add a new service with no backends.
    pub async fn add_service(
        &self,
        name: &str,
        listen_port: u16,
        mode: Mode,
    ) -> Result<(), StoreError> {
        if name.is_empty() {
            return Err(StoreError::Validation(
                "Service name must not be empty".to_string(),
            ));
        }

        self.mutate(|services| {
            if services.iter().any(|s| s.name == name) {
                return Err(StoreError::Conflict(format!(
                    "Service '{}' already exists",
                    name
                )));
            }
            services.push(ServiceConfig {
                name: name.to_string(),
                listen_port,
                mode,
                servers: Vec::new(),
            });
            Ok(())
        })
        .await
    }

    /// Edit a service's name, listen port, or mode.
    ///
    /// Returns the service's (possibly new) name.
    pub async fn edit_service(
        &self,
        name: &str,
        new_name: Option<&str>,
        listen_port: Option<u16>,
        mode: Option<Mode>,
    ) -> Result<String, StoreError> {
        if let Some(new_name) = new_name {
            if new_name.is_empty() {
                return Err(StoreError::Validation(
                    "Service name must not be empty".to_string(),
                ));
            }
        }

        self.mutate(|services| {
            // A missing target is NotFound even when the rename would
            // also collide.
            let target = services
                .iter()
                .position(|s| s.name == name)
                .ok_or_else(|| service_not_found(name))?;

            if let Some(new_name) = new_name {
                if new_name != name && services.iter().any(|s| s.name == new_name) {
                    return Err(StoreError::Conflict(format!(
                        "Service '{}' already exists",
                        new_name
                    )));
                }
            }

            let service = &mut services[target];

            if let Some(new_name) = new_name {
                service.name = new_name.to_string();
            }
            if let Some(port) = listen_port {
                service.listen_port = port;
            }
            if let Some(mode) = mode {
                service.mode = mode;
            }

            Ok(service.name.clone())
        })
        .await
    }

    /// Remove a service and all its backends.
    pub async fn remove_service(&self, name: &str) -> Result<(), StoreError> {
        self.mutate(|services| {
            let before = services.len();
            services.retain(|s| s.name != name);
            if services.len() == before {
                return Err(service_not_found(name));
            }
            Ok(())
        })
        .await
    }

    /// Set a service's selection mode.
    pub async fn set_service_mode(&self, name: &str, mode: Mode) -> Result<(), StoreError> {
        self.mutate(|services| {
            let service = services
                .iter_mut()
                .find(|s| s.name == name)
                .ok_or_else(|| service_not_found(name))?;
            service.mode = mode;
            Ok(())
        })
        .await
    }

    /// Add a backend to a service.
    pub async fn add_server(
        &self,
        service_name: &str,
        backend: BackendConfig,
    ) -> Result<(), StoreError> {
        self.mutate(|services| {
            let service = services
                .iter_mut()
                .find(|s| s.name == service_name)
                .ok_or_else(|| service_not_found(service_name))?;

            if service
                .servers
                .iter()
                .any(|b| b.ip == backend.ip && b.port == backend.port)
            {
                return Err(StoreError::Conflict(format!(
                    "Server {} already exists in service '{}'",
                    backend.addr(),
                    service_name
                )));
            }

            service.servers.push(backend);
            Ok(())
        })
        .await
    }

    /// Edit a backend identified by `(ip, port)`.
    ///
    /// Returns `(old_addr, new_addr)`; callers reset the backend's stats
    /// when the identity changed.
    pub async fn edit_server(
        &self,
        service_name: &str,
        ip: IpAddr,
        port: u16,
        new_ip: Option<IpAddr>,
        new_port: Option<u16>,
        check_type: Option<CheckType>,
    ) -> Result<(SocketAddr, SocketAddr), StoreError> {
        self.mutate(|services| {
            let service = services
                .iter_mut()
                .find(|s| s.name == service_name)
                .ok_or_else(|| service_not_found(service_name))?;

            let target_ip = new_ip.unwrap_or(ip);
            let target_port = new_port.unwrap_or(port);
            if (target_ip, target_port) != (ip, port)
                && service
                    .servers
                    .iter()
                    .any(|b| b.ip == target_ip && b.port == target_port)
            {
                return Err(StoreError::Conflict(format!(
                    "Server {} already exists in service '{}'",
                    SocketAddr::new(target_ip, target_port),
                    service_name
                )));
            }

            let backend = service
                .servers
                .iter_mut()
                .find(|b| b.ip == ip && b.port == port)
                .ok_or_else(|| server_not_found(service_name, ip, port))?;

            let old_addr = backend.addr();
            backend.ip = target_ip;
            backend.port = target_port;
            if let Some(check_type) = check_type {
                backend.check_type = check_type;
            }

            Ok((old_addr, backend.addr()))
        })
        .await
    }

    /// Remove a backend identified by `(ip, port)`.
    pub async fn remove_server(
        &self,
        service_name: &str,
        ip: IpAddr,
        port: u16,
    ) -> Result<(), StoreError> {
        self.mutate(|services| {
            let service = services
                .iter_mut()
                .find(|s| s.name == service_name)
                .ok_or_else(|| service_not_found(service_name))?;

            let before = service.servers.len();
            service.servers.retain(|b| !(b.ip == ip && b.port == port));
            if service.servers.len() == before {
                return Err(server_not_found(service_name, ip, port));
            }
            Ok(())
        })
        .await
    }

    /// Apply a mutation and persist; roll back on write failure.
    async fn mutate<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Vec<ServiceConfig>) -> Result<T, StoreError>,
    {
        let mut services = self.services.write().await;
        let previous = services.clone();

        let out = f(&mut services)?;

        if let Err(e) = self.persist(&services) {
            *services = previous;
            return Err(StoreError::Persistence(format!("{:#}", e)));
        }

        Ok(out)
    }

    /// Write the full configuration to disk atomically.
    fn persist(&self, services: &[ServiceConfig]) -> anyhow::Result<()> {
        if let Some(parent) = self.data_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
            }
        }

        let persisted = PersistedConfig {
            services: services.to_vec(),
        };
        let content =
            serde_json::to_string_pretty(&persisted).context("Failed to serialize config")?;

        let tmp_path = self.data_path.with_extension("tmp");
        fs::write(&tmp_path, &content)
            .with_context(|| format!("Failed to write temp file: {}", tmp_path.display()))?;

        fs::rename(&tmp_path, &self.data_path).with_context(|| {
            format!(
                "Failed to rename {} -> {}",
                tmp_path.display(),
                self.data_path.display()
            )
        })?;

        debug!(
            path = %self.data_path.display(),
            service_count = services.len(),
            "Persisted configuration"
        );

        Ok(())
    }
}

fn service_not_found(name: &str) -> StoreError {
    StoreError::NotFound(format!("Service '{}' not found", name))
}

fn server_not_found(service: &str, ip: IpAddr, port: u16) -> StoreError {
    StoreError::NotFound(format!(
        "Server {} not found in service '{}'",
        SocketAddr::new(ip, port),
        service
    ))
}
