use super::WriteError;
use crate::{
    config::{ConnectionConfig, TargetConfig},
    ingest::Engine,
};
use itertools::Itertools;
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions};
use std::iter;
use tracing::{info, trace};

/// Client for MySQL and MariaDB, both speak the same protocol and get identical statements
#[derive(Debug)]
pub struct MySqlClient {
    pool: MySqlPool,
    insert_row: String,
    insert_values: String,
}

impl MySqlClient {
    pub fn connect(engine: Engine, config: &ConnectionConfig, target: &TargetConfig) -> Self {
        let port = config.port_for(engine);
        let options = MySqlConnectOptions::new()
            .host(&config.host)
            .port(port)
            .username(&config.user)
            .password(&config.password)
            .database(&config.database);

        let pool = MySqlPoolOptions::new()
            .max_connections(config.pool_size)
            .connect_lazy_with(options);

        info!(
            engine = %engine,
            host = %config.host,
            port = port,
            pool_size = config.pool_size,
            "Created MySQL protocol pool"
        );

        Self {
            pool,
            insert_row: format!("INSERT INTO {}({}) VALUES(?)", target.table, target.column),
            insert_values: format!("INSERT INTO {}({}) VALUES ", target.table, target.column),
        }
    }

    pub async fn write_row(&self, payload: &str) -> Result<(), WriteError> {
        sqlx::query(&self.insert_row)
            .bind(payload)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// One multi-row `VALUES (?),(?),...` statement per chunk.
    ///
    /// The server caps a prepared statement at 65535 placeholders, larger chunks
    /// fail with the server's error.
    pub async fn write_chunk(&self, payload: &str, rows: usize) -> Result<(), WriteError> {
        let statement = insert_values_statement(&self.insert_values, rows);

        let mut query = sqlx::query(&statement);
        for _ in 0..rows {
            query = query.bind(payload);
        }

        let result = query.execute(&self.pool).await?;
        trace!(rows = result.rows_affected(), "Inserted multi-row chunk");

        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn insert_values_statement(prefix: &str, rows: usize) -> String {
    format!("{prefix}{}", iter::repeat("(?)").take(rows).join(","))
}
