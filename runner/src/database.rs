pub mod mssql;
pub mod mysql;
pub mod postgres;

use crate::{config::BenchConfig, ingest::Engine};
use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, instrument};

#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("Failed to build the SQL Server pool: {0}")]
    MsSqlPool(#[from] bb8_tiberius::Error),
    #[error("SQL Server handshake failed: {0}")]
    MsSqlHandshake(#[from] bb8::RunError<bb8_tiberius::Error>),
}

/// Failure of a single write against one of the engines, never retried
#[derive(Error, Debug)]
pub enum WriteError {
    #[error("Statement failed: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("SQL Server write failed: {0}")]
    MsSql(#[from] tiberius::error::Error),
    #[error("Failed to check out a SQL Server connection: {0}")]
    MsSqlCheckout(#[from] bb8::RunError<bb8_tiberius::Error>),
    #[error("Partition worker did not run to completion: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

/// Something rows of a fixed payload can be written to.
///
/// Implementations check a connection out of their pool per call and hand it
/// back before returning, a connection is never held between two calls.
#[async_trait]
pub trait RowWriter: Send + Sync {
    /// insert a single row through one parameterized statement
    async fn write_row(&self, payload: &str) -> Result<(), WriteError>;

    /// insert `rows` copies of `payload` through the engine's bulk path in one round trip
    async fn write_chunk(&self, payload: &str, rows: usize) -> Result<(), WriteError>;
}

/// Hands out the writer for an engine, implemented by [`ConnectionPools`]
pub trait ClientProvider: Send + Sync + 'static {
    type Client: RowWriter;

    fn get_client(&self, engine: Engine) -> &Self::Client;
}

/// One pooled client per engine, dispatched by tag rather than through a vtable
#[derive(Debug)]
pub enum PooledClient {
    Postgres(postgres::PostgresClient),
    MySql(mysql::MySqlClient),
    MariaDb(mysql::MySqlClient),
    MsSql(mssql::MsSqlClient),
}

#[async_trait]
impl RowWriter for PooledClient {
    async fn write_row(&self, payload: &str) -> Result<(), WriteError> {
        match self {
            Self::Postgres(client) => client.write_row(payload).await,
            Self::MySql(client) | Self::MariaDb(client) => client.write_row(payload).await,
            Self::MsSql(client) => client.write_row(payload).await,
        }
    }

    async fn write_chunk(&self, payload: &str, rows: usize) -> Result<(), WriteError> {
        match self {
            Self::Postgres(client) => client.write_chunk(payload, rows).await,
            Self::MySql(client) | Self::MariaDb(client) => client.write_chunk(payload, rows).await,
            Self::MsSql(client) => client.write_chunk(payload, rows).await,
        }
    }
}

/// Pools for all supported engines, built once and kept for the process lifetime
#[derive(Debug)]
pub struct ConnectionPools {
    postgres: PooledClient,
    mysql: PooledClient,
    mariadb: PooledClient,
    mssql: PooledClient,
}

impl ConnectionPools {
    /// Build every pool; SQL Server completes a handshake before this returns
    #[instrument(skip_all, level = "info")]
    pub async fn connect(config: &BenchConfig) -> Result<Self, ConnectionError> {
        let postgres = PooledClient::Postgres(postgres::PostgresClient::connect(
            &config.postgres,
            &config.target,
        ));
        let mysql = PooledClient::MySql(mysql::MySqlClient::connect(
            Engine::MySql,
            &config.mysql,
            &config.target,
        ));
        let mariadb = PooledClient::MariaDb(mysql::MySqlClient::connect(
            Engine::MariaDb,
            &config.mariadb,
            &config.target,
        ));
        let mssql =
            PooledClient::MsSql(mssql::MsSqlClient::connect(&config.mssql, &config.target).await?);

        info!("All connection pools are ready");

        Ok(Self {
            postgres,
            mysql,
            mariadb,
            mssql,
        })
    }

    /// Close the sqlx pools gracefully, bb8 connections are dropped with the pool
    pub async fn close(self) {
        if let PooledClient::Postgres(client) = &self.postgres {
            client.close().await;
        }

        for pool in [&self.mysql, &self.mariadb] {
            if let PooledClient::MySql(client) | PooledClient::MariaDb(client) = pool {
                client.close().await;
            }
        }

        info!("Closed connection pools");
    }
}

impl ClientProvider for ConnectionPools {
    type Client = PooledClient;

    fn get_client(&self, engine: Engine) -> &PooledClient {
        match engine {
            Engine::Postgres => &self.postgres,
            Engine::MySql => &self.mysql,
            Engine::MariaDb => &self.mariadb,
            Engine::MsSql => &self.mssql,
        }
    }
}
