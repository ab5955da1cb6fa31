use clap::Parser;
use ingest_bench::{
    BenchConfig, ConnectionPools, Engine, IngestMetrics, IngestRequest, Ingestor, Method,
};
use std::{path::PathBuf, process::ExitCode, sync::Arc};
use tokio::task::JoinSet;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use tracing_unwrap::ResultExt;

/// Drive insert workloads against PostgreSQL, MySQL, MariaDB or SQL Server
#[derive(Parser, Debug)]
#[command(name = "ingest-bench", version, about)]
struct Cli {
    /// YAML file with connection settings, environment variables take precedence
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Target engine: postgres, mysql, mariadb or mssql
    #[arg(long)]
    db: Engine,

    /// Number of rows to insert per request
    #[arg(long, default_value_t = IngestRequest::DEFAULT_ROWS)]
    rows: u64,

    /// Size of the payload written into every row
    #[arg(long, default_value_t = IngestRequest::DEFAULT_PAYLOAD_BYTES)]
    payload_bytes: usize,

    /// Number of concurrent workers the rows are split over
    #[arg(long, default_value_t = IngestRequest::DEFAULT_CONCURRENCY)]
    concurrency: usize,

    /// Insert method: single or batch
    #[arg(long, default_value_t = Method::Single)]
    method: Method,

    /// Rows per bulk write, only used with `--method batch`
    #[arg(long, default_value_t = IngestRequest::DEFAULT_BATCH_SIZE)]
    batch_size: usize,

    /// Run the request this many times one after another
    #[arg(long, default_value_t = 1)]
    repeat: usize,

    /// Run this many copies of the request at the same time in every round
    #[arg(long, default_value_t = 1)]
    parallel_requests: usize,

    /// Print the metrics registry in Prometheus text format before exiting
    #[arg(long)]
    metrics: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    // a missing .env file is fine, the environment may already be set up
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // startup failures are fatal
    let config = BenchConfig::load(cli.config.as_deref()).unwrap_or_log();
    let pools = Arc::new(ConnectionPools::connect(&config).await.unwrap_or_log());
    let metrics = Arc::new(IngestMetrics::new());
    let ingestor = Ingestor::new(Arc::clone(&pools), Arc::clone(&metrics));

    let request = IngestRequest::new(cli.db, cli.method)
        .with_rows(cli.rows)
        .with_payload_bytes(cli.payload_bytes)
        .with_concurrency(cli.concurrency)
        .with_batch_size(cli.batch_size);

    info!(
        request = ?request,
        repeat = cli.repeat,
        parallel = cli.parallel_requests,
        "Starting benchmark"
    );

    let mut failed = 0;

    for round in 1..=cli.repeat {
        let mut requests = JoinSet::new();

        for _ in 0..cli.parallel_requests.max(1) {
            let ingestor = ingestor.clone();
            let request = request.clone();

            requests.spawn(async move { ingestor.perform_ingestion(request).await });
        }

        while let Some(joined) = requests.join_next().await {
            match joined {
                Ok(Ok(result)) => match serde_json::to_string(&result) {
                    Ok(json) => println!("{json}"),
                    Err(error) => error!(error = ?error, "Failed to serialize result"),
                },
                Ok(Err(error)) => {
                    error!(round = round, error = %error, "Request failed");
                    failed += 1;
                }
                Err(error) => {
                    error!(round = round, error = %error, "Request task died");
                    failed += 1;
                }
            }
        }
    }

    if cli.metrics {
        print!("{}", metrics.render());
    }

    drop(ingestor);
    match Arc::try_unwrap(pools) {
        Ok(pools) => pools.close().await,
        Err(_) => error!("Connection pools are still in use, skipping graceful shutdown"),
    }

    if failed > 0 {
        error!("{failed} request(s) failed");
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
