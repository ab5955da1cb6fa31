//! Process-wide ingestion metrics.
//!
//! One [`IngestMetrics`] is created at startup and handed to every
//! [`Ingestor`](crate::ingest::Ingestor) by `Arc`. Each update is a single
//! atomic operation on an already registered series, so concurrent requests
//! never race on read-modify-write sequences. Series are registered lazily the
//! first time a label combination is seen.

use crate::ingest::{Engine, Method};
use parking_lot::RwLock;
use std::{
    collections::BTreeMap,
    fmt::{self, Display, Formatter},
    sync::{
        atomic::{AtomicI64, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

/// Upper bounds (inclusive, milliseconds) of the latency histogram buckets
pub const LATENCY_BUCKETS_MS: [f64; 12] = [
    1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0,
];

const LATENCY_NAME: &str = "ingest_latency_ms";
const ROWS_NAME: &str = "ingest_rows_total";
const INFLIGHT_NAME: &str = "ingest_inflight_writes";
const FAILURES_NAME: &str = "ingest_failures_total";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct SeriesKey {
    engine: Engine,
    method: Method,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct LatencyKey {
    engine: Engine,
    method: Method,
    batch: String,
}

#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn inc_by(&self, value: u64) {
        self.0.fetch_add(value, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default)]
pub struct Gauge(AtomicI64);

impl Gauge {
    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    pub fn dec(&self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn get(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Latency histogram; buckets hold non-cumulative counts and are summed up when rendered
#[derive(Debug, Default)]
pub struct Histogram {
    buckets: [AtomicU64; LATENCY_BUCKETS_MS.len()],
    count: AtomicU64,
    sum_micros: AtomicU64,
}

impl Histogram {
    pub fn observe(&self, elapsed: Duration) {
        let millis = elapsed.as_nanos() as f64 / 1_000_000.0;

        if let Some(bucket) = LATENCY_BUCKETS_MS.iter().position(|bound| millis <= *bound) {
            self.buckets[bucket].fetch_add(1, Ordering::Relaxed);
        }

        self.sum_micros
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn sum_ms(&self) -> f64 {
        self.sum_micros.load(Ordering::Relaxed) as f64 / 1000.0
    }

    /// cumulative count per bucket bound, `+Inf` excluded
    pub fn cumulative(&self) -> [u64; LATENCY_BUCKETS_MS.len()] {
        let mut running = 0;

        std::array::from_fn(|index| {
            running += self.buckets[index].load(Ordering::Relaxed);
            running
        })
    }
}

/// Labeled set of series sharing one metric name
#[derive(Debug)]
struct Family<K, S> {
    series: RwLock<BTreeMap<K, Arc<S>>>,
}

impl<K: Ord + Clone, S: Default> Family<K, S> {
    fn new() -> Self {
        Self {
            series: RwLock::new(BTreeMap::new()),
        }
    }

    fn get_or_register(&self, key: &K) -> Arc<S> {
        if let Some(series) = self.series.read().get(key) {
            return Arc::clone(series);
        }

        Arc::clone(self.series.write().entry(key.clone()).or_default())
    }

    fn get(&self, key: &K) -> Option<Arc<S>> {
        self.series.read().get(key).cloned()
    }

    fn snapshot(&self) -> Vec<(K, Arc<S>)> {
        self.series
            .read()
            .iter()
            .map(|(key, series)| (key.clone(), Arc::clone(series)))
            .collect()
    }
}

/// Registry of every series the ingestion harness exports
#[derive(Debug)]
pub struct IngestMetrics {
    latency: Family<LatencyKey, Histogram>,
    rows: Family<SeriesKey, Counter>,
    inflight: Family<SeriesKey, Gauge>,
    failures: Family<SeriesKey, Counter>,
}

impl Default for IngestMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl IngestMetrics {
    pub fn new() -> Self {
        Self {
            latency: Family::new(),
            rows: Family::new(),
            inflight: Family::new(),
            failures: Family::new(),
        }
    }

    /// Bump the in-flight gauge, it is decremented again when the guard drops
    pub fn track_inflight(&self, engine: Engine, method: Method) -> InflightGuard {
        let gauge = self.inflight.get_or_register(&SeriesKey { engine, method });
        gauge.inc();

        InflightGuard { gauge }
    }

    pub fn observe_latency(&self, engine: Engine, method: Method, batch: &str, elapsed: Duration) {
        self.latency
            .get_or_register(&LatencyKey {
                engine,
                method,
                batch: batch.to_owned(),
            })
            .observe(elapsed);
    }

    pub fn add_rows(&self, engine: Engine, method: Method, rows: u64) {
        self.rows
            .get_or_register(&SeriesKey { engine, method })
            .inc_by(rows);
    }

    pub fn record_failure(&self, engine: Engine, method: Method) {
        self.failures
            .get_or_register(&SeriesKey { engine, method })
            .inc_by(1);
    }

    pub fn rows_total(&self, engine: Engine, method: Method) -> u64 {
        self.rows
            .get(&SeriesKey { engine, method })
            .map_or(0, |counter| counter.get())
    }

    pub fn failures_total(&self, engine: Engine, method: Method) -> u64 {
        self.failures
            .get(&SeriesKey { engine, method })
            .map_or(0, |counter| counter.get())
    }

    pub fn inflight(&self, engine: Engine, method: Method) -> i64 {
        self.inflight
            .get(&SeriesKey { engine, method })
            .map_or(0, |gauge| gauge.get())
    }

    pub fn latency(&self, engine: Engine, method: Method, batch: &str) -> Option<Arc<Histogram>> {
        self.latency.get(&LatencyKey {
            engine,
            method,
            batch: batch.to_owned(),
        })
    }

    /// Prometheus text exposition of all registered series
    pub fn render(&self) -> String {
        self.to_string()
    }
}

/// Keeps the in-flight gauge of one `(engine, method)` raised while alive
#[derive(Debug)]
#[must_use = "the in-flight gauge is decremented as soon as the guard is dropped"]
pub struct InflightGuard {
    gauge: Arc<Gauge>,
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.gauge.dec();
    }
}

impl Display for IngestMetrics {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "# HELP {LATENCY_NAME} Histogram of ingestion latency in milliseconds"
        )?;
        writeln!(f, "# TYPE {LATENCY_NAME} histogram")?;
        for (key, histogram) in self.latency.snapshot() {
            let labels = format!(
                "db=\"{}\",method=\"{}\",batch=\"{}\"",
                key.engine, key.method, key.batch
            );

            for (bound, count) in LATENCY_BUCKETS_MS.iter().zip(histogram.cumulative()) {
                writeln!(f, "{LATENCY_NAME}_bucket{{{labels},le=\"{bound}\"}} {count}")?;
            }
            writeln!(
                f,
                "{LATENCY_NAME}_bucket{{{labels},le=\"+Inf\"}} {}",
                histogram.count()
            )?;
            writeln!(f, "{LATENCY_NAME}_sum{{{labels}}} {}", histogram.sum_ms())?;
            writeln!(f, "{LATENCY_NAME}_count{{{labels}}} {}", histogram.count())?;
        }

        render_family(
            f,
            ROWS_NAME,
            "Total number of rows ingested",
            "counter",
            self.rows.snapshot().into_iter().map(|(k, c)| (k, c.get() as i64)),
        )?;
        render_family(
            f,
            INFLIGHT_NAME,
            "Number of inflight write operations",
            "gauge",
            self.inflight.snapshot().into_iter().map(|(k, g)| (k, g.get())),
        )?;
        render_family(
            f,
            FAILURES_NAME,
            "Total number of ingestion failures",
            "counter",
            self.failures.snapshot().into_iter().map(|(k, c)| (k, c.get() as i64)),
        )
    }
}

fn render_family(
    f: &mut Formatter<'_>,
    name: &str,
    help: &str,
    kind: &str,
    series: impl Iterator<Item = (SeriesKey, i64)>,
) -> fmt::Result {
    writeln!(f, "# HELP {name} {help}")?;
    writeln!(f, "# TYPE {name} {kind}")?;

    for (key, value) in series {
        writeln!(
            f,
            "{name}{{db=\"{}\",method=\"{}\"}} {value}",
            key.engine, key.method
        )?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn histogram_places_samples_in_the_first_fitting_bucket() {
        let histogram = Histogram::default();
        histogram.observe(Duration::from_micros(400));
        histogram.observe(Duration::from_millis(5));
        histogram.observe(Duration::from_millis(7));
        histogram.observe(Duration::from_secs(30));

        let cumulative = histogram.cumulative();
        assert_eq!(cumulative[0], 1);
        assert_eq!(cumulative[1], 2);
        assert_eq!(cumulative[2], 3);
        assert_eq!(cumulative[LATENCY_BUCKETS_MS.len() - 1], 3);
        assert_eq!(histogram.count(), 4);
        assert!((histogram.sum_ms() - 30_012.4).abs() < 1e-6);
    }

    #[test]
    fn series_are_kept_apart_by_labels() {
        let metrics = IngestMetrics::new();
        metrics.add_rows(Engine::Postgres, Method::Single, 10);
        metrics.add_rows(Engine::Postgres, Method::Batch, 250);
        metrics.add_rows(Engine::MariaDb, Method::Batch, 5);
        metrics.record_failure(Engine::MsSql, Method::Batch);

        assert_eq!(metrics.rows_total(Engine::Postgres, Method::Single), 10);
        assert_eq!(metrics.rows_total(Engine::Postgres, Method::Batch), 250);
        assert_eq!(metrics.rows_total(Engine::MariaDb, Method::Batch), 5);
        assert_eq!(metrics.rows_total(Engine::MySql, Method::Batch), 0);
        assert_eq!(metrics.failures_total(Engine::MsSql, Method::Batch), 1);
        assert_eq!(metrics.failures_total(Engine::MsSql, Method::Single), 0);
    }

    #[test]
    fn inflight_guard_restores_the_gauge() {
        let metrics = IngestMetrics::new();

        let outer = metrics.track_inflight(Engine::MySql, Method::Batch);
        {
            let _inner = metrics.track_inflight(Engine::MySql, Method::Batch);
            assert_eq!(metrics.inflight(Engine::MySql, Method::Batch), 2);
        }
        assert_eq!(metrics.inflight(Engine::MySql, Method::Batch), 1);

        drop(outer);
        assert_eq!(metrics.inflight(Engine::MySql, Method::Batch), 0);
    }

    #[test]
    fn concurrent_updates_are_not_lost() {
        let metrics = IngestMetrics::new();

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..1000 {
                        let _guard = metrics.track_inflight(Engine::Postgres, Method::Batch);
                        metrics.add_rows(Engine::Postgres, Method::Batch, 3);
                        metrics.observe_latency(
                            Engine::Postgres,
                            Method::Batch,
                            "100",
                            Duration::from_millis(2),
                        );
                        assert!(metrics.inflight(Engine::Postgres, Method::Batch) >= 1);
                    }
                });
            }
        });

        assert_eq!(metrics.rows_total(Engine::Postgres, Method::Batch), 24_000);
        assert_eq!(metrics.inflight(Engine::Postgres, Method::Batch), 0);
        assert_eq!(
            metrics
                .latency(Engine::Postgres, Method::Batch, "100")
                .map(|histogram| histogram.count()),
            Some(8000)
        );
    }

    #[test]
    fn renders_text_exposition() {
        let metrics = IngestMetrics::new();
        metrics.observe_latency(Engine::MsSql, Method::Batch, "100", Duration::from_millis(30));
        metrics.add_rows(Engine::MsSql, Method::Batch, 100);
        drop(metrics.track_inflight(Engine::MsSql, Method::Batch));

        let text = metrics.render();

        assert!(text.contains("# TYPE ingest_latency_ms histogram"));
        assert!(text.contains(
            "ingest_latency_ms_bucket{db=\"mssql\",method=\"batch\",batch=\"100\",le=\"25\"} 0"
        ));
        assert!(text.contains(
            "ingest_latency_ms_bucket{db=\"mssql\",method=\"batch\",batch=\"100\",le=\"50\"} 1"
        ));
        assert!(text.contains(
            "ingest_latency_ms_bucket{db=\"mssql\",method=\"batch\",batch=\"100\",le=\"+Inf\"} 1"
        ));
        assert!(text.contains(
            "ingest_latency_ms_count{db=\"mssql\",method=\"batch\",batch=\"100\"} 1"
        ));
        assert!(text.contains("ingest_rows_total{db=\"mssql\",method=\"batch\"} 100"));
        assert!(text.contains("ingest_inflight_writes{db=\"mssql\",method=\"batch\"} 0"));
        assert!(text.contains("# TYPE ingest_failures_total counter"));
    }
}
