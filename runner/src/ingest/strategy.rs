use super::{IngestRequest, Method};
use crate::database::{RowWriter, WriteError};
use tracing::{debug, trace};

/// Per-method write loop for one partition, the engine specifics live in the [`RowWriter`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertStrategy {
    /// one statement per row, strictly sequential
    Single,
    /// one bulk write per chunk of at most `batch_size` rows
    Batch { batch_size: usize },
}

impl InsertStrategy {
    pub fn for_request(request: &IngestRequest) -> Self {
        match request.method {
            Method::Single => Self::Single,
            Method::Batch => Self::Batch {
                batch_size: request.batch_size.max(1),
            },
        }
    }

    /// Write `rows` rows of `payload`, returning how many were written.
    ///
    /// The first failing write aborts the partition, earlier writes are not undone.
    pub async fn insert<W>(&self, writer: &W, rows: u64, payload: &str) -> Result<u64, WriteError>
    where
        W: RowWriter + ?Sized,
    {
        if rows == 0 {
            return Ok(0);
        }

        match *self {
            Self::Single => {
                for row in 0..rows {
                    trace!(row = row, "Writing row");
                    writer.write_row(payload).await?;
                }

                Ok(rows)
            }
            Self::Batch { batch_size } => {
                let mut written = 0;

                for chunk in chunk_sizes(rows, batch_size) {
                    debug!(chunk = chunk, written = written, "Writing chunk");
                    writer.write_chunk(payload, chunk).await?;
                    written += chunk as u64;
                }

                Ok(written)
            }
        }
    }
}

/// Sizes of the chunks `rows` is cut into, only the last one may be smaller than `batch_size`
pub fn chunk_sizes(rows: u64, batch_size: usize) -> impl Iterator<Item = usize> {
    let batch_size = batch_size.max(1) as u64;

    (0..rows.div_ceil(batch_size)).map(move |chunk| {
        let start = chunk * batch_size;
        ((start + batch_size).min(rows) - start) as usize
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::Engine;
    use async_trait::async_trait;
    use itertools::Itertools;
    use parking_lot::Mutex;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Row,
        Chunk(usize),
    }

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<Call>>,
        fail_on_call: Option<usize>,
    }

    impl Recorder {
        fn failing_on(call: usize) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                fail_on_call: Some(call),
            }
        }

        fn record(&self, call: Call) -> Result<(), WriteError> {
            let mut calls = self.calls.lock();
            calls.push(call);

            if Some(calls.len()) == self.fail_on_call {
                Err(WriteError::Sqlx(sqlx::Error::Protocol("simulated".to_owned())))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl RowWriter for Recorder {
        async fn write_row(&self, _payload: &str) -> Result<(), WriteError> {
            self.record(Call::Row)
        }

        async fn write_chunk(&self, _payload: &str, rows: usize) -> Result<(), WriteError> {
            self.record(Call::Chunk(rows))
        }
    }

    #[test]
    fn chunks_keep_the_remainder_last() {
        assert_eq!(chunk_sizes(250, 100).collect_vec(), vec![100, 100, 50]);
        assert_eq!(chunk_sizes(200, 100).collect_vec(), vec![100, 100]);
        assert_eq!(chunk_sizes(7, 10).collect_vec(), vec![7]);
        assert_eq!(chunk_sizes(3, 0).collect_vec(), vec![1, 1, 1]);
        assert!(chunk_sizes(0, 100).next().is_none());
    }

    #[tokio::test]
    async fn batch_issues_one_write_per_chunk() {
        let recorder = Recorder::default();
        let strategy = InsertStrategy::Batch { batch_size: 100 };

        let written = strategy.insert(&recorder, 250, "xxxx").await.unwrap();

        assert_eq!(written, 250);
        assert_eq!(
            *recorder.calls.lock(),
            vec![Call::Chunk(100), Call::Chunk(100), Call::Chunk(50)]
        );
    }

    #[tokio::test]
    async fn single_issues_one_write_per_row() {
        let recorder = Recorder::default();

        let written = InsertStrategy::Single
            .insert(&recorder, 5, "xxxx")
            .await
            .unwrap();

        assert_eq!(written, 5);
        assert_eq!(*recorder.calls.lock(), vec![Call::Row; 5]);
    }

    #[tokio::test]
    async fn empty_partition_never_touches_the_writer() {
        let recorder = Recorder::default();

        assert_eq!(InsertStrategy::Single.insert(&recorder, 0, "x").await.unwrap(), 0);
        assert_eq!(
            InsertStrategy::Batch { batch_size: 10 }
                .insert(&recorder, 0, "x")
                .await
                .unwrap(),
            0
        );
        assert!(recorder.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn failure_stops_the_partition_without_retrying() {
        let recorder = Recorder::failing_on(2);
        let strategy = InsertStrategy::Batch { batch_size: 10 };

        let result = strategy.insert(&recorder, 45, "x").await;

        assert!(matches!(result, Err(WriteError::Sqlx(_))));
        assert_eq!(*recorder.calls.lock(), vec![Call::Chunk(10), Call::Chunk(10)]);

        let recorder = Recorder::failing_on(3);
        assert!(InsertStrategy::Single.insert(&recorder, 10, "x").await.is_err());
        assert_eq!(recorder.calls.lock().len(), 3);
    }

    #[test]
    fn strategy_follows_the_request_method() {
        let request = IngestRequest::new(Engine::MsSql, Method::Batch).with_batch_size(0);
        assert_eq!(
            InsertStrategy::for_request(&request),
            InsertStrategy::Batch { batch_size: 1 }
        );

        let request = IngestRequest::new(Engine::MsSql, Method::Single);
        assert_eq!(InsertStrategy::for_request(&request), InsertStrategy::Single);
    }
}
