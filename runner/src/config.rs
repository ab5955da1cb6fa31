use crate::ingest::Engine;
use serde::{Deserialize, Serialize};
use std::{env, fs::File, io::Error, path::Path};
use thiserror::Error;
use tracing::{debug, error, info};

#[derive(Error, Debug)]
pub enum ConfigErrors {
    #[error("Configuration file could not be read")]
    FileNotFound(#[from] Error),
    #[error("Configuration file is malformed: {0}")]
    InvalidFormat(#[from] serde_yaml::Error),
    #[error("Environment variable {name} has an invalid value '{value}'")]
    InvalidEnvironment { name: String, value: String },
    #[error("Configuration failed the preflight checks")]
    PreflightFailed,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default)]
#[serde(deny_unknown_fields)]
pub struct BenchConfig {
    // table receiving the generated rows, shared by all engines
    #[serde(default)]
    pub target: TargetConfig,

    #[serde(default, alias = "pg")]
    pub postgres: ConnectionConfig,
    #[serde(default)]
    pub mysql: ConnectionConfig,
    #[serde(default)]
    pub mariadb: ConnectionConfig,
    #[serde(default)]
    pub mssql: ConnectionConfig,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct TargetConfig {
    #[serde(default = "default_table")]
    pub table: String,
    #[serde(default = "default_column")]
    pub column: String,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            table: default_table(),
            column: default_column(),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct ConnectionConfig {
    #[serde(default = "default_host")]
    pub host: String,
    // falls back to the engine's well-known port
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub user: String,
    #[serde(default, alias = "pass")]
    pub password: String,
    #[serde(default, alias = "db")]
    pub database: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
    // only honoured by pools that reap idle connections themselves (SQL Server)
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: None,
            user: String::new(),
            password: String::new(),
            database: String::new(),
            pool_size: default_pool_size(),
            idle_timeout_ms: default_idle_timeout_ms(),
        }
    }
}

impl ConnectionConfig {
    pub fn port_for(&self, engine: Engine) -> u16 {
        self.port.unwrap_or_else(|| engine.default_port())
    }
}

impl BenchConfig {
    /// Read the YAML file at `path` (if any) and layer the process environment on top
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigErrors> {
        let mut config = match path {
            Some(path) => {
                info!(path = ?path, "Loading configuration file");
                serde_yaml::from_reader(File::open(path)?)?
            }
            None => Self::default(),
        };

        config.apply_env(|name| env::var(name).ok())?;

        if config.preflight_checks() {
            Err(ConfigErrors::PreflightFailed)
        } else {
            Ok(config)
        }
    }

    pub fn connection(&self, engine: Engine) -> &ConnectionConfig {
        match engine {
            Engine::Postgres => &self.postgres,
            Engine::MySql => &self.mysql,
            Engine::MariaDb => &self.mariadb,
            Engine::MsSql => &self.mssql,
        }
    }

    fn connection_mut(&mut self, engine: Engine) -> &mut ConnectionConfig {
        match engine {
            Engine::Postgres => &mut self.postgres,
            Engine::MySql => &mut self.mysql,
            Engine::MariaDb => &mut self.mariadb,
            Engine::MsSql => &mut self.mssql,
        }
    }

    /// Override settings from `<PREFIX>_HOST`, `<PREFIX>_PORT`, `<PREFIX>_USER`,
    /// `<PREFIX>_PASS`, `<PREFIX>_DB` and `<PREFIX>_POOL_SIZE` for every engine,
    /// plus `INGEST_TABLE` / `INGEST_COLUMN` for the target.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigErrors>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(table) = lookup("INGEST_TABLE") {
            self.target.table = table;
        }
        if let Some(column) = lookup("INGEST_COLUMN") {
            self.target.column = column;
        }

        for engine in Engine::ALL {
            let prefix = engine.env_prefix();
            let connection = self.connection_mut(engine);

            if let Some(host) = lookup(&format!("{prefix}_HOST")) {
                connection.host = host;
            }
            if let Some(user) = lookup(&format!("{prefix}_USER")) {
                connection.user = user;
            }
            if let Some(password) = lookup(&format!("{prefix}_PASS")) {
                connection.password = password;
            }
            if let Some(database) = lookup(&format!("{prefix}_DB")) {
                connection.database = database;
            }

            let name = format!("{prefix}_PORT");
            if let Some(value) = lookup(&name) {
                connection.port = Some(
                    value
                        .trim()
                        .parse()
                        .map_err(|_| ConfigErrors::InvalidEnvironment { name, value })?,
                );
            }

            let name = format!("{prefix}_POOL_SIZE");
            if let Some(value) = lookup(&name) {
                connection.pool_size = value
                    .trim()
                    .parse()
                    .map_err(|_| ConfigErrors::InvalidEnvironment { name, value })?;
            }

            debug!(engine = %engine, host = %connection.host, "Resolved connection settings");
        }

        Ok(())
    }

    /// Returns `true` if any check failed, every failure is logged
    pub fn preflight_checks(&self) -> bool {
        // report everything at once instead of piece-by-piece to make debugging easier for users
        let mut contains_error = false;

        if !is_identifier(&self.target.table) {
            error!(
                "target.table '{}' must be a plain (optionally schema qualified) SQL identifier",
                self.target.table
            );
            contains_error = true;
        }

        if !is_identifier(&self.target.column) || self.target.column.contains('.') {
            error!(
                "target.column '{}' must be a plain SQL identifier",
                self.target.column
            );
            contains_error = true;
        }

        for engine in Engine::ALL {
            let connection = self.connection(engine);

            if connection.host.trim().is_empty() {
                error!("{engine}.host cannot be empty");
                contains_error = true;
            }

            if connection.port == Some(0) {
                error!("{engine}.port cannot be 0");
                contains_error = true;
            }

            if connection.pool_size == 0 {
                error!("{engine}.pool_size cannot be 0, no connection could ever be checked out");
                contains_error = true;
            }
        }

        contains_error
    }
}

// accepts `name` and `schema.name`, nothing that would need quoting
fn is_identifier(value: &str) -> bool {
    !value.is_empty()
        && value.split('.').all(|part| {
            let mut chars = part.chars();

            matches!(chars.next(), Some(first) if first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}

fn default_table() -> String {
    "ingest".to_owned()
}

fn default_column() -> String {
    "payload".to_owned()
}

fn default_host() -> String {
    "localhost".to_owned()
}

fn default_pool_size() -> u32 {
    20
}

fn default_idle_timeout_ms() -> u64 {
    30_000
}
