//! Admin connection to the MySQL primary, used for status/schema queries
//! that sit outside the replication protocol itself (`SHOW BINARY LOG
//! STATUS`, `INFORMATION_SCHEMA.COLUMNS`, GTID mode, etc).

use crate::error::{CdcError, Result};
use crate::gtid::GtidSet;
use mysql_async::prelude::*;
use mysql_async::{Conn, Opts};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub hostname: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub database: Option<String>,
    pub server_id: u32,
    /// Bounds every replication socket read (`PacketChannel::read_packet`);
    /// a primary that goes silent past this surfaces as `CdcError::Timeout`.
    pub timeout: Duration,
    /// Sent to the primary as `SET @master_heartbeat_period = <nanos>`
    /// before the binlog dump starts.
    pub heartbeat_interval: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            hostname: "localhost".to_string(),
            port: 3306,
            username: "root".to_string(),
            password: String::new(),
            database: None,
            server_id: 1,
            timeout: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(30),
        }
    }
}

impl ConnectionConfig {
    pub fn new(hostname: impl Into<String>, username: impl Into<String>) -> Self {
        ConnectionConfig {
            hostname: hostname.into(),
            username: username.into(),
            ..Default::default()
        }
    }

    fn build_opts(&self) -> Result<Opts> {
        let connection_string = if let Some(ref db) = self.database {
            format!(
                "mysql://{}:{}@{}:{}/{}",
                self.username, self.password, self.hostname, self.port, db
            )
        } else {
            format!(
                "mysql://{}:{}@{}:{}",
                self.username, self.password, self.hostname, self.port
            )
        };

        connection_string
            .parse()
            .map_err(|_| CdcError::Config("failed to parse connection string".to_string()))
    }
}

/// Wraps `mysql_async::Conn` for the handful of admin queries the
/// engine needs before/around replication: where the binlog currently
/// is, whether GTID mode is on, and a table's column list.
pub struct MySqlConnection {
    conn: Conn,
    config: ConnectionConfig,
}

impl MySqlConnection {
    pub async fn connect(config: ConnectionConfig) -> Result<Self> {
        let opts = config.build_opts()?;
        let pool = mysql_async::Pool::new(opts);

        let conn = pool
            .get_conn()
            .await
            .map_err(|e| CdcError::Transport(format!("failed to connect to mysql: {e}")))?;

        Ok(MySqlConnection { conn, config })
    }

    pub async fn get_binlog_status(&mut self) -> Result<BinlogStatus> {
        let result: Vec<(String, u64, String, String, String)> = self
            .conn
            .query("SHOW BINARY LOG STATUS")
            .await
            .map_err(|e| CdcError::Transport(format!("failed to query binlog status: {e}")))?;

        if result.is_empty() {
            return Err(CdcError::Transport("no binlog status available".to_string()));
        }

        let (file, position, binlog_do_db, binlog_ignore_db, executed_gtid_set) = result[0].clone();

        Ok(BinlogStatus {
            file: file.clone(),
            position,
            binlog_do_db: if binlog_do_db.is_empty() { None } else { Some(binlog_do_db) },
            binlog_ignore_db: if binlog_ignore_db.is_empty() { None } else { Some(binlog_ignore_db) },
            executed_gtid_set: GtidSet::parse(&executed_gtid_set).unwrap_or_default(),
        })
    }

    pub async fn is_gtid_mode_enabled(&mut self) -> Result<bool> {
        let result: Vec<(String, String)> = self
            .conn
            .query("SHOW GLOBAL VARIABLES LIKE 'GTID_MODE'")
            .await
            .map_err(|e| CdcError::Transport(format!("failed to query gtid mode: {e}")))?;

        Ok(!result.is_empty() && result[0].1 == "ON")
    }

    pub async fn get_executed_gtid_set(&mut self) -> Result<GtidSet> {
        let result: Vec<(String,)> = self
            .conn
            .query("SELECT @@global.gtid_executed")
            .await
            .map_err(|e| CdcError::Transport(format!("failed to query gtid_executed: {e}")))?;

        if result.is_empty() {
            return Ok(GtidSet::new());
        }

        GtidSet::parse(&result[0].0)
    }

    pub async fn get_server_id(&mut self) -> Result<u32> {
        let result: Vec<(u32,)> = self
            .conn
            .query("SELECT @@server_id")
            .await
            .map_err(|e| CdcError::Transport(format!("failed to query server_id: {e}")))?;

        Ok(result.first().map(|(id,)| *id).unwrap_or(self.config.server_id))
    }

    pub async fn get_variable(&mut self, name: &str) -> Result<Option<String>> {
        let query = format!("SHOW GLOBAL VARIABLES LIKE '{}'", name);
        let result: Vec<(String, String)> = self
            .conn
            .query(&query)
            .await
            .map_err(|e| CdcError::Transport(format!("failed to query {name}: {e}")))?;

        Ok(result.first().map(|(_, v)| v.clone()))
    }

    pub async fn get_binlog_format(&mut self) -> Result<String> {
        self.get_variable("binlog_format")
            .await?
            .ok_or_else(|| CdcError::Transport("binlog format not found".to_string()))
    }

    pub async fn get_table_schema(&mut self, database: &str, table: &str) -> Result<Vec<ColumnInfo>> {
        let query = format!(
            "SELECT COLUMN_NAME, COLUMN_TYPE, IS_NULLABLE, COLUMN_KEY, EXTRA \
             FROM INFORMATION_SCHEMA.COLUMNS \
             WHERE TABLE_SCHEMA = '{}' AND TABLE_NAME = '{}' \
             ORDER BY ORDINAL_POSITION",
            database, table
        );

        let result: Vec<(String, String, String, String, String)> = self
            .conn
            .query(&query)
            .await
            .map_err(|e| CdcError::Transport(format!("failed to query table schema: {e}")))?;

        Ok(result
            .into_iter()
            .map(|(name, column_type, is_nullable, column_key, extra)| ColumnInfo {
                name,
                column_type,
                nullable: is_nullable == "YES",
                is_key: !column_key.is_empty(),
                extra,
            })
            .collect())
    }

    pub async fn get_databases(&mut self) -> Result<Vec<String>> {
        let result: Vec<(String,)> = self
            .conn
            .query("SHOW DATABASES")
            .await
            .map_err(|e| CdcError::Transport(format!("failed to query databases: {e}")))?;

        Ok(result.into_iter().map(|(db,)| db).collect())
    }

    pub async fn get_tables(&mut self, database: &str) -> Result<Vec<String>> {
        let query = format!("SHOW TABLES FROM `{}`", database);
        let result: Vec<(String,)> = self
            .conn
            .query(&query)
            .await
            .map_err(|e| CdcError::Transport(format!("failed to query tables: {e}")))?;

        Ok(result.into_iter().map(|(table,)| table).collect())
    }

    pub async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct BinlogStatus {
    pub file: String,
    pub position: u64,
    pub binlog_do_db: Option<String>,
    pub binlog_ignore_db: Option<String>,
    pub executed_gtid_set: GtidSet,
}

#[derive(Debug, Clone)]
pub struct ColumnInfo {
    pub name: String,
    pub column_type: String,
    pub nullable: bool,
    pub is_key: bool,
    pub extra: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_connection_config() {
        let config = ConnectionConfig::default();
        assert_eq!(config.hostname, "localhost");
        assert_eq!(config.port, 3306);
    }

    #[test]
    fn new_connection_config_overrides_host_and_user() {
        let config = ConnectionConfig::new("127.0.0.1", "root");
        assert_eq!(config.hostname, "127.0.0.1");
        assert_eq!(config.username, "root");
    }
}
