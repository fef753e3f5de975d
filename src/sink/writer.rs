//! Batched, paced writes of a run's rows into a [`TabularSink`].
//!
//! Rows are split into contiguous batches of at most `batch_size`. Each batch
//! is inserted at a cursor that starts at `insert_row` and advances by the
//! batch's length, so the run keeps aggregation order and lands above
//! whatever earlier runs left in the sheet. Batches are separated by
//! `delay` to stay under the sheet API's write quota.
//!
//! A [`SinkError::Unauthorized`] triggers one credential refresh and one
//! retry of the same batch. Any other failure stops the write; batches
//! already written stay in the sheet.

use crate::config::SinkConfig;
use crate::error::SinkError;
use crate::models::{NormalizedRow, header_row};
use crate::sink::TabularSink;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{error, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPlan {
    pub batch_size: usize,
    pub delay: Duration,
    /// 1-based row the first batch is inserted at.
    pub insert_row: usize,
}

impl Default for BatchPlan {
    fn default() -> Self {
        Self {
            batch_size: 100,
            delay: Duration::from_secs(1),
            insert_row: 2,
        }
    }
}

impl From<&SinkConfig> for BatchPlan {
    fn from(c: &SinkConfig) -> Self {
        Self {
            batch_size: c.batch_size.max(1),
            delay: Duration::from_secs(c.batch_delay_secs),
            insert_row: c.insert_row.max(1),
        }
    }
}

#[derive(Debug)]
pub enum WriteOutcome {
    Complete {
        batches: usize,
        rows: usize,
    },
    /// Some batches made it before `error` stopped the write.
    Partial {
        written_batches: usize,
        written_rows: usize,
        error: SinkError,
    },
    /// Nothing was written.
    Failed(SinkError),
}

impl WriteOutcome {
    pub fn error(&self) -> Option<&SinkError> {
        match self {
            WriteOutcome::Complete { .. } => None,
            WriteOutcome::Partial { error, .. } | WriteOutcome::Failed(error) => Some(error),
        }
    }

    pub fn written_rows(&self) -> usize {
        match self {
            WriteOutcome::Complete { rows, .. } => *rows,
            WriteOutcome::Partial { written_rows, .. } => *written_rows,
            WriteOutcome::Failed(_) => 0,
        }
    }
}

pub struct BatchWriter<'a> {
    sink: &'a dyn TabularSink,
    plan: BatchPlan,
}

impl<'a> BatchWriter<'a> {
    pub fn new(sink: &'a dyn TabularSink, plan: BatchPlan) -> Self {
        Self { sink, plan }
    }

    /// Write `rows`, bootstrapping the header first when the sheet is empty.
    #[instrument(level = "info", skip_all, fields(rows = rows.len(), sink = %self.sink.location()))]
    pub async fn write(&self, rows: &[NormalizedRow], with_sentiment: bool) -> WriteOutcome {
        if rows.is_empty() {
            info!("Nothing to write");
            return WriteOutcome::Complete { batches: 0, rows: 0 };
        }
        if let Err(e) = self.ensure_header(with_sentiment).await {
            error!(error = %e, "Could not prepare sheet");
            return WriteOutcome::Failed(e);
        }

        let t0 = Instant::now();
        let mut cursor = self.plan.insert_row;
        let mut written_batches = 0usize;
        let mut written_rows = 0usize;

        for (index, batch) in rows.chunks(self.plan.batch_size.max(1)).enumerate() {
            if index > 0 {
                sleep(self.plan.delay).await;
            }
            let cells: Vec<Vec<String>> = batch.iter().map(NormalizedRow::cells).collect();
            let position = cursor;
            let result = self
                .with_refresh(|| self.sink.insert_rows(cells.clone(), position))
                .await;

            if let Err(e) = result {
                error!(
                    batch = index + 1,
                    position,
                    written_batches,
                    error = %e,
                    "Batch write failed; aborting remaining batches"
                );
                return if written_batches == 0 {
                    WriteOutcome::Failed(e)
                } else {
                    WriteOutcome::Partial {
                        written_batches,
                        written_rows,
                        error: e,
                    }
                };
            }

            info!(batch = index + 1, position, count = batch.len(), "Wrote batch");
            cursor += batch.len();
            written_batches += 1;
            written_rows += batch.len();
        }

        info!(
            batches = written_batches,
            rows = written_rows,
            elapsed_ms = t0.elapsed().as_millis(),
            "All batches written"
        );
        WriteOutcome::Complete {
            batches: written_batches,
            rows: written_rows,
        }
    }

    async fn ensure_header(&self, with_sentiment: bool) -> Result<(), SinkError> {
        let first = self.with_refresh(|| self.sink.first_row()).await?;
        if first.is_none_or(|row| row.iter().all(|c| c.is_empty())) {
            info!("Sheet is empty; writing header row");
            self.with_refresh(|| self.sink.append_row(header_row(with_sentiment)))
                .await?;
        }
        Ok(())
    }

    /// Run `op`, refreshing credentials and retrying once on `Unauthorized`.
    async fn with_refresh<T, F, Fut>(&self, mut op: F) -> Result<T, SinkError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SinkError>>,
    {
        match op().await {
            Err(SinkError::Unauthorized(msg)) => {
                warn!(error = %msg, "Sink credentials expired; refreshing once");
                self.sink.refresh_credentials().await?;
                op().await
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::mock::MemorySheet;

    fn rows(n: usize) -> Vec<NormalizedRow> {
        (0..n)
            .map(|i| NormalizedRow {
                title: format!("row {i}"),
                body_excerpt: String::new(),
                link: format!("https://www.reddit.com/r/sales/comments/{i}/"),
                source_label: "reddit/r/sales".into(),
                human_date: "2025-03-04 10:00:00".into(),
                keyword: "crm".into(),
                engagement: None,
            })
            .collect()
    }

    fn titles(sheet: &MemorySheet) -> Vec<String> {
        sheet.snapshot().into_iter().map(|r| r[0].clone()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_batches_are_split_paced_and_in_order() {
        let sheet = MemorySheet::default();
        let writer = BatchWriter::new(&sheet, BatchPlan::default());
        let start = tokio::time::Instant::now();

        let outcome = writer.write(&rows(250), false).await;

        assert!(matches!(outcome, WriteOutcome::Complete { batches: 3, rows: 250 }));
        assert_eq!(
            *sheet.inserts.lock().unwrap(),
            vec![(2, 100), (102, 100), (202, 50)]
        );
        assert!(start.elapsed() >= Duration::from_secs(2));

        let titles = titles(&sheet);
        assert_eq!(titles[0], "Title");
        assert_eq!(titles[1], "row 0");
        assert_eq!(titles[101], "row 100");
        assert_eq!(titles[250], "row 249");
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_run_lands_above_previous_rows() {
        let header = header_row(false);
        let old = vec!["old".to_string(); header.len()];
        let sheet = MemorySheet::with_rows(vec![header, old]);
        let writer = BatchWriter::new(&sheet, BatchPlan { batch_size: 2, ..BatchPlan::default() });

        writer.write(&rows(3), false).await;

        assert_eq!(titles(&sheet), vec!["Title", "row 0", "row 1", "row 2", "old"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unauthorized_refreshes_once_and_retries() {
        let sheet = MemorySheet::default();
        sheet.fail_next_insert(SinkError::Unauthorized("expired".into()));
        let writer = BatchWriter::new(&sheet, BatchPlan::default());

        let outcome = writer.write(&rows(5), true).await;

        assert!(matches!(outcome, WriteOutcome::Complete { batches: 1, rows: 5 }));
        assert_eq!(*sheet.refreshes.lock().unwrap(), 1);
        assert_eq!(*sheet.inserts.lock().unwrap(), vec![(2, 5)]);
        assert_eq!(sheet.snapshot().len(), 6);
        assert_eq!(sheet.snapshot()[0], header_row(true));
    }

    #[tokio::test(start_paused = true)]
    async fn test_header_check_reads_only_the_first_row() {
        let header = header_row(false);
        let sheet = MemorySheet::with_rows(vec![header.clone()]);
        let writer = BatchWriter::new(&sheet, BatchPlan::default());

        writer.write(&rows(2), false).await;

        assert_eq!(*sheet.full_reads.lock().unwrap(), 0);
        let snapshot = sheet.snapshot();
        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot[0], header);
        assert_eq!(snapshot[1][0], "row 0");
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_unauthorized_fails_the_batch() {
        let sheet = MemorySheet::default();
        sheet.fail_next_insert(SinkError::Unauthorized("expired".into()));
        sheet.fail_next_insert(SinkError::Unauthorized("still expired".into()));
        let writer = BatchWriter::new(&sheet, BatchPlan::default());

        let outcome = writer.write(&rows(5), false).await;

        assert!(matches!(outcome, WriteOutcome::Failed(SinkError::Unauthorized(_))));
        assert_eq!(*sheet.refreshes.lock().unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_failure_reports_partial() {
        let sheet = MemorySheet::default();
        sheet.pass_next_insert();
        sheet.fail_next_insert(SinkError::Write("quota exceeded".into()));
        let writer = BatchWriter::new(&sheet, BatchPlan { batch_size: 2, ..BatchPlan::default() });

        let outcome = writer.write(&rows(6), false).await;

        match outcome {
            WriteOutcome::Partial {
                written_batches,
                written_rows,
                error,
            } => {
                assert_eq!(written_batches, 1);
                assert_eq!(written_rows, 2);
                assert!(matches!(error, SinkError::Write(_)));
            }
            other => panic!("expected partial outcome, got {other:?}"),
        }
        assert_eq!(*sheet.inserts.lock().unwrap(), vec![(2, 2)]);
        assert_eq!(*sheet.refreshes.lock().unwrap(), 0);
    }

    #[test]
    fn test_plan_from_config() {
        let plan = BatchPlan::from(&SinkConfig {
            batch_size: 0,
            batch_delay_secs: 3,
            insert_row: 5,
            ..SinkConfig::default()
        });
        assert_eq!(plan.batch_size, 1);
        assert_eq!(plan.delay, Duration::from_secs(3));
        assert_eq!(plan.insert_row, 5);
    }
}
