use super::{ConnectionError, WriteError};
use crate::{
    config::{ConnectionConfig, TargetConfig},
    ingest::Engine,
};
use bb8_tiberius::ConnectionManager;
use std::time::Duration;
use tiberius::{AuthMethod, Config, EncryptionLevel, IntoSql, TokenRow};
use tracing::{debug, info, trace};

pub type MsSqlPool = bb8::Pool<ConnectionManager>;

#[derive(Debug)]
pub struct MsSqlClient {
    pool: MsSqlPool,
    insert_row: String,
    table: String,
}

impl MsSqlClient {
    /// Build the pool and complete one login handshake before reporting it ready
    pub async fn connect(
        config: &ConnectionConfig,
        target: &TargetConfig,
    ) -> Result<Self, ConnectionError> {
        let port = config.port_for(Engine::MsSql);

        let mut tds = Config::new();
        tds.host(&config.host);
        tds.port(port);
        tds.authentication(AuthMethod::sql_server(&config.user, &config.password));
        if !config.database.is_empty() {
            tds.database(&config.database);
        }
        tds.encryption(EncryptionLevel::NotSupported);
        tds.trust_cert();

        let pool = bb8::Pool::builder()
            .max_size(config.pool_size)
            .min_idle(Some(0))
            .idle_timeout(Some(Duration::from_millis(config.idle_timeout_ms)))
            .build(ConnectionManager::new(tds))
            .await?;

        debug!(host = %config.host, port = port, "Performing SQL Server handshake");
        drop(pool.get().await?);

        info!(
            host = %config.host,
            port = port,
            pool_size = config.pool_size,
            "Connected SQL Server pool"
        );

        Ok(Self {
            pool,
            insert_row: format!(
                "INSERT INTO {}({}) VALUES(@P1)",
                target.table, target.column
            ),
            table: target.table.clone(),
        })
    }

    pub async fn write_row(&self, payload: &str) -> Result<(), WriteError> {
        let mut connection = self.pool.get().await?;
        connection
            .execute(self.insert_row.as_str(), &[&payload])
            .await?;

        Ok(())
    }

    /// One TDS bulk load per chunk; the table is expected to hold only the payload column
    pub async fn write_chunk(&self, payload: &str, rows: usize) -> Result<(), WriteError> {
        let mut connection = self.pool.get().await?;
        let mut request = connection.bulk_insert(&self.table).await?;

        for _ in 0..rows {
            let mut row = TokenRow::new();
            row.push(payload.into_sql());
            request.send(row).await?;
        }

        let result = request.finalize().await?;
        trace!(rows = result.total(), "Bulk loaded chunk into SQL Server");

        Ok(())
    }
}
