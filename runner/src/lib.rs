//! Multi-backend ingestion benchmark harness.
//!
//! Drives write workloads against PostgreSQL, MySQL, MariaDB and SQL Server,
//! either row-at-a-time or through each engine's bulk path, and records
//! latency, throughput and failure metrics for every request.

pub mod config;
pub mod database;
pub mod ingest;
pub mod metrics;

pub use config::{BenchConfig, ConfigErrors};
pub use database::{ClientProvider, ConnectionError, ConnectionPools, RowWriter, WriteError};
pub use ingest::{Engine, IngestRequest, IngestResult, Ingestor, Method, ValidationError};
pub use metrics::IngestMetrics;
