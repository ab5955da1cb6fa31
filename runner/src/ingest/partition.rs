/// Contiguous, half-open range of rows `[start_row, end_row)` owned by one worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkPartition {
    pub start_row: u64,
    pub end_row: u64,
}

impl WorkPartition {
    pub fn rows(&self) -> u64 {
        self.end_row - self.start_row
    }
}

/// Split `row_count` rows over at most `concurrency` workers.
///
/// Every worker gets `ceil(row_count / concurrency)` rows except for the tail,
/// workers that would end up without rows are dropped. A concurrency of 0 is
/// treated as 1.
pub fn partition(row_count: u64, concurrency: usize) -> Vec<WorkPartition> {
    if row_count == 0 {
        return Vec::new();
    }

    let workers = concurrency.max(1) as u64;
    let rows_per_worker = row_count.div_ceil(workers);

    // only the workers that receive at least one row
    (0..row_count.div_ceil(rows_per_worker))
        .map(|worker| WorkPartition {
            start_row: worker * rows_per_worker,
            end_row: ((worker + 1) * rows_per_worker).min(row_count),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn covers_every_row_exactly_once() {
        for row_count in 0..=64 {
            for concurrency in 1..=16 {
                let partitions = partition(row_count, concurrency);

                assert!(partitions.len() <= concurrency);
                assert!(partitions.iter().all(|work| work.rows() > 0));
                assert_eq!(
                    partitions.iter().map(WorkPartition::rows).sum::<u64>(),
                    row_count
                );

                let mut next = 0;
                for work in &partitions {
                    assert_eq!(work.start_row, next, "gap or overlap at {work:?}");
                    next = work.end_row;
                }
                assert_eq!(next, row_count);

                if row_count > 0 {
                    let per_worker = row_count.div_ceil(concurrency as u64);
                    assert_eq!(partitions.len() as u64, row_count.div_ceil(per_worker));
                    assert!(partitions.len() as u64 <= row_count.min(concurrency as u64));
                }
            }
        }
    }

    #[test]
    fn splits_evenly_when_possible() {
        assert_eq!(
            partition(10, 2),
            vec![
                WorkPartition {
                    start_row: 0,
                    end_row: 5,
                },
                WorkPartition {
                    start_row: 5,
                    end_row: 10,
                },
            ]
        );
        assert_eq!(partition(8, 8).len(), 8);
    }

    #[test]
    fn tail_takes_the_remainder() {
        assert_eq!(
            partition(10, 4),
            vec![
                WorkPartition {
                    start_row: 0,
                    end_row: 3,
                },
                WorkPartition {
                    start_row: 3,
                    end_row: 6,
                },
                WorkPartition {
                    start_row: 6,
                    end_row: 9,
                },
                WorkPartition {
                    start_row: 9,
                    end_row: 10,
                },
            ]
        );
    }

    #[test]
    fn drops_workers_without_rows() {
        // 2 rows per worker leaves nothing for the fourth one
        assert_eq!(
            partition(5, 4),
            vec![
                WorkPartition {
                    start_row: 0,
                    end_row: 2,
                },
                WorkPartition {
                    start_row: 2,
                    end_row: 4,
                },
                WorkPartition {
                    start_row: 4,
                    end_row: 5,
                },
            ]
        );
        assert_eq!(partition(3, 10).len(), 3);
        assert!(partition(0, 4).is_empty());
    }

    #[test]
    fn zero_concurrency_runs_a_single_worker() {
        assert_eq!(
            partition(7, 0),
            vec![WorkPartition {
                start_row: 0,
                end_row: 7,
            }]
        );
    }

    #[test]
    fn huge_concurrency_only_builds_partitions_with_rows() {
        assert_eq!(partition(3, usize::MAX).len(), 3);
        assert_eq!(partition(3, 2_000_000_000).len(), 3);
        assert_eq!(
            partition(2, usize::MAX).last(),
            Some(&WorkPartition {
                start_row: 1,
                end_row: 2,
            })
        );
        assert!(partition(0, usize::MAX).is_empty());
    }

    #[test]
    fn is_deterministic() {
        assert_eq!(partition(1_000_003, 7), partition(1_000_003, 7));
    }
}
