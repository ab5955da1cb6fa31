pub mod partition;
pub mod strategy;


use crate::{
    database::{ClientProvider, WriteError},
    metrics::IngestMetrics,
};
use partition::{partition, WorkPartition};
use serde::{Deserialize, Serialize};
use std::{
    fmt::{self, Display, Formatter},
    str::FromStr,
    sync::Arc,
    time::Instant,
};
use strategy::InsertStrategy;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid db '{0}'. Must be one of: postgres, mysql, mariadb, mssql")]
    InvalidEngine(String),
    #[error("Invalid method '{0}'. Must be one of: single, batch")]
    InvalidMethod(String),
}

/// Target database engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    Postgres,
    MySql,
    MariaDb,
    MsSql,
}

impl Engine {
    pub const ALL: [Engine; 4] = [Self::Postgres, Self::MySql, Self::MariaDb, Self::MsSql];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::MySql => "mysql",
            Self::MariaDb => "mariadb",
            Self::MsSql => "mssql",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            Self::Postgres => 5432,
            Self::MySql | Self::MariaDb => 3306,
            Self::MsSql => 1433,
        }
    }

    /// prefix of the environment variables configuring this engine
    pub fn env_prefix(&self) -> &'static str {
        match self {
            Self::Postgres => "PG",
            Self::MySql => "MYSQL",
            Self::MariaDb => "MARIADB",
            Self::MsSql => "MSSQL",
        }
    }
}

impl Display for Engine {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Engine {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|engine| engine.as_str() == value)
            .ok_or_else(|| ValidationError::InvalidEngine(value.to_owned()))
    }
}

/// How rows are handed to the engine
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    /// one statement per row
    #[default]
    Single,
    /// one bulk write per chunk of `batch_size` rows
    Batch,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::Batch => "batch",
        }
    }
}

impl Display for Method {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "single" => Ok(Self::Single),
            "batch" => Ok(Self::Batch),
            other => Err(ValidationError::InvalidMethod(other.to_owned())),
        }
    }
}

/// A validated benchmark request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestRequest {
    pub engine: Engine,
    pub row_count: u64,
    pub payload_bytes: usize,
    pub concurrency: usize,
    pub method: Method,
    // only meaningful for `Method::Batch`
    pub batch_size: usize,
}

impl IngestRequest {
    pub const DEFAULT_ROWS: u64 = 100;
    pub const DEFAULT_PAYLOAD_BYTES: usize = 256;
    pub const DEFAULT_CONCURRENCY: usize = 1;
    pub const DEFAULT_BATCH_SIZE: usize = 100;

    pub fn new(engine: Engine, method: Method) -> Self {
        Self {
            engine,
            row_count: Self::DEFAULT_ROWS,
            payload_bytes: Self::DEFAULT_PAYLOAD_BYTES,
            concurrency: Self::DEFAULT_CONCURRENCY,
            method,
            batch_size: Self::DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_rows(mut self, rows: u64) -> Self {
        self.row_count = rows;
        self
    }

    pub fn with_payload_bytes(mut self, payload_bytes: usize) -> Self {
        self.payload_bytes = payload_bytes;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Treat a concurrency or batch size of 0 as 1
    pub fn normalized(mut self) -> Self {
        self.concurrency = self.concurrency.max(1);
        self.batch_size = self.batch_size.max(1);
        self
    }

    /// batch size actually used per write, 1 for single row inserts
    pub fn effective_batch_size(&self) -> usize {
        match self.method {
            Method::Single => 1,
            Method::Batch => self.batch_size.max(1),
        }
    }

    /// value of the `batch` label on the latency histogram
    pub fn batch_label(&self) -> String {
        self.effective_batch_size().to_string()
    }
}

/// Outcome of a successful request, serialized with the keys the HTTP API used
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestResult {
    pub success: bool,
    pub rows_inserted: u64,
    pub duration_ms: u64,
    #[serde(rename = "db")]
    pub engine: Engine,
    pub method: Method,
    #[serde(rename = "batchSize")]
    pub effective_batch_size: usize,
}

/// Runs ingestion requests against the pools of `P` and accounts them in the shared metrics
#[derive(Debug)]
pub struct Ingestor<P> {
    pools: Arc<P>,
    metrics: Arc<IngestMetrics>,
}

impl<P> Clone for Ingestor<P> {
    fn clone(&self) -> Self {
        Self {
            pools: Arc::clone(&self.pools),
            metrics: Arc::clone(&self.metrics),
        }
    }
}

impl<P: ClientProvider> Ingestor<P> {
    pub fn new(pools: Arc<P>, metrics: Arc<IngestMetrics>) -> Self {
        Self { pools, metrics }
    }

    pub fn metrics(&self) -> &Arc<IngestMetrics> {
        &self.metrics
    }

    pub fn pools(&self) -> &Arc<P> {
        &self.pools
    }

    /// Insert `row_count` rows split over `concurrency` concurrent partitions.
    ///
    /// All partitions are awaited even after one of them failed; the first failure is
    /// returned and rows written by other partitions stay in the table. Nothing
    /// cancels a partition once it has been dispatched.
    #[instrument(
        skip(self, request),
        level = "info",
        fields(engine = %request.engine, method = %request.method, rows = request.row_count)
    )]
    pub async fn perform_ingestion(
        &self,
        request: IngestRequest,
    ) -> Result<IngestResult, WriteError> {
        let request = request.normalized();
        let (engine, method) = (request.engine, request.method);

        let _inflight = self.metrics.track_inflight(engine, method);

        let payload: Arc<str> = Arc::from("x".repeat(request.payload_bytes));
        let partitions = partition(request.row_count, request.concurrency);
        let strategy = InsertStrategy::for_request(&request);

        debug!(
            partitions = partitions.len(),
            strategy = ?strategy,
            payload_bytes = request.payload_bytes,
            "Dispatching partitions"
        );

        let start = Instant::now();

        match self.dispatch(engine, strategy, partitions, payload).await {
            Ok(rows_inserted) => {
                let elapsed = start.elapsed();

                self.metrics
                    .observe_latency(engine, method, &request.batch_label(), elapsed);
                self.metrics.add_rows(engine, method, request.row_count);

                let result = IngestResult {
                    success: true,
                    rows_inserted,
                    duration_ms: elapsed.as_millis() as u64,
                    engine,
                    method,
                    effective_batch_size: request.effective_batch_size(),
                };

                info!(
                    rows_inserted = result.rows_inserted,
                    duration_ms = result.duration_ms,
                    "Ingestion finished"
                );

                Ok(result)
            }
            Err(error) => {
                self.metrics.record_failure(engine, method);
                error!(error = %error, "Ingestion failed");

                Err(error)
            }
        }
    }

    /// fan out one task per partition and wait for every one of them
    async fn dispatch(
        &self,
        engine: Engine,
        strategy: InsertStrategy,
        partitions: Vec<WorkPartition>,
        payload: Arc<str>,
    ) -> Result<u64, WriteError> {
        let mut workers = JoinSet::new();

        for work in partitions {
            let pools = Arc::clone(&self.pools);
            let payload = Arc::clone(&payload);

            workers.spawn(async move {
                debug!(start = work.start_row, end = work.end_row, "Partition started");

                strategy
                    .insert(pools.get_client(engine), work.rows(), &payload)
                    .await
            });
        }

        let mut written = 0;
        let mut failure = None;

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(Ok(rows)) => written += rows,
                Ok(Err(error)) => {
                    error!(error = %error, "Partition failed");
                    failure.get_or_insert(error);
                }
                Err(join_error) => {
                    error!(error = %join_error, "Partition worker died");
                    failure.get_or_insert(WriteError::Worker(join_error));
                }
            }
        }

        match failure {
            Some(error) => Err(error),
            None => Ok(written),
        }
    }
}
