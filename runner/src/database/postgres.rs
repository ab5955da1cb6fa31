use super::WriteError;
use crate::{
    config::{ConnectionConfig, TargetConfig},
    ingest::Engine,
};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use tracing::{info, trace};

#[derive(Debug)]
pub struct PostgresClient {
    pool: PgPool,
    insert_row: String,
    insert_unnest: String,
}

impl PostgresClient {
    /// Connections are opened on first use, the pool itself is ready immediately
    pub fn connect(config: &ConnectionConfig, target: &TargetConfig) -> Self {
        let port = config.port_for(Engine::Postgres);
        let options = PgConnectOptions::new()
            .host(&config.host)
            .port(port)
            .username(&config.user)
            .password(&config.password)
            .database(&config.database);

        let pool = PgPoolOptions::new()
            .max_connections(config.pool_size)
            .connect_lazy_with(options);

        info!(
            host = %config.host,
            port = port,
            pool_size = config.pool_size,
            "Created PostgreSQL pool"
        );

        Self {
            pool,
            insert_row: format!(
                "INSERT INTO {}({}) VALUES($1)",
                target.table, target.column
            ),
            insert_unnest: format!(
                "INSERT INTO {}({}) SELECT unnest($1::text[])",
                target.table, target.column
            ),
        }
    }

    pub async fn write_row(&self, payload: &str) -> Result<(), WriteError> {
        sqlx::query(&self.insert_row)
            .bind(payload)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// One statement per chunk, the rows travel as a single text[] parameter
    pub async fn write_chunk(&self, payload: &str, rows: usize) -> Result<(), WriteError> {
        let payloads = vec![payload.to_owned(); rows];

        let result = sqlx::query(&self.insert_unnest)
            .bind(payloads)
            .execute(&self.pool)
            .await?;

        trace!(rows = result.rows_affected(), "Unnested chunk into PostgreSQL");

        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
