//! Structured configuration for a Canal Instance. Loading from a
//! file/env is out of scope; this module owns the struct shape,
//! defaults, and validation.

use crate::error::{CdcError, Result};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub charset: String,
    pub server_id: u32,
    /// `SET @master_heartbeat_period = <nanos>`, issued before the dump.
    pub heartbeat_interval: Duration,
    /// Bounds every replication socket read.
    pub read_timeout: Duration,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        ConnectionSettings {
            host: "localhost".to_string(),
            port: 3306,
            username: "root".to_string(),
            password: String::new(),
            charset: "utf8mb4".to_string(),
            server_id: 1001,
            heartbeat_interval: Duration::from_secs(30),
            read_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BinlogSettings {
    pub filename: Option<String>,
    pub position: Option<u32>,
    pub gtid_enabled: bool,
}

#[derive(Debug, Clone, Default)]
pub struct WatchSettings {
    pub databases: Vec<String>,
    pub tables: Vec<String>,
    pub event_types: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ReconnectSettings {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        ReconnectSettings { max_attempts: 10, interval: Duration::from_secs(5) }
    }
}

#[derive(Debug, Clone)]
pub struct PerformanceSettings {
    pub event_buffer_size: usize,
    pub batch_size: usize,
}

impl Default for PerformanceSettings {
    fn default() -> Self {
        PerformanceSettings { event_buffer_size: 1000, batch_size: 100 }
    }
}

#[derive(Debug, Clone, Default)]
pub struct StorageSettings {
    pub database_storage_enabled: bool,
    pub meta_store_path: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CanalConfig {
    pub connection: ConnectionSettings,
    pub binlog: BinlogSettings,
    pub watch: WatchSettings,
    pub reconnect: ReconnectSettings,
    pub performance: PerformanceSettings,
    pub storage: StorageSettings,
}

impl CanalConfig {
    /// Checks the fields a Canal Instance cannot start without.
    pub fn validate(&self) -> Result<()> {
        if self.connection.host.is_empty() {
            return Err(CdcError::Config("connection.host must not be empty".to_string()));
        }
        if self.connection.username.is_empty() {
            return Err(CdcError::Config("connection.username must not be empty".to_string()));
        }
        if self.connection.server_id == 0 {
            return Err(CdcError::Config("connection.server_id must be non-zero".to_string()));
        }
        if self.performance.event_buffer_size == 0 {
            return Err(CdcError::Config("performance.event_buffer_size must be non-zero".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(CanalConfig::default().validate().is_ok());
    }

    #[test]
    fn empty_host_fails_validation() {
        let mut config = CanalConfig::default();
        config.connection.host = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_server_id_fails_validation() {
        let mut config = CanalConfig::default();
        config.connection.server_id = 0;
        assert!(config.validate().is_err());
    }
}
