//! Tabular sink the scraped rows end up in.
//!
//! The sink is a flat sheet with a header on row 1. Row positions are
//! 1-based, like the spreadsheet UI.
//!
//! - [`sheets`]: Google Sheets implementation
//! - [`writer`]: batched, paced writes with one credential refresh per batch

use crate::error::SinkError;
use async_trait::async_trait;

pub mod sheets;
pub mod writer;

#[async_trait]
pub trait TabularSink: Send + Sync {
    async fn append_row(&self, row: Vec<String>) -> Result<(), SinkError>;

    /// Insert `rows` so the first of them lands on row `position`, pushing
    /// existing rows down. Either every row lands or none does.
    async fn insert_rows(&self, rows: Vec<Vec<String>>, position: usize) -> Result<(), SinkError>;

    /// Row 1 of the sheet, `None` when the sheet is empty.
    async fn first_row(&self) -> Result<Option<Vec<String>>, SinkError>;

    async fn get_all_rows(&self) -> Result<Vec<Vec<String>>, SinkError>;

    async fn clear(&self, preserve_header: bool) -> Result<(), SinkError>;

    /// Obtain fresh credentials after an [`SinkError::Unauthorized`].
    async fn refresh_credentials(&self) -> Result<(), SinkError>;

    /// Human-facing location of the sink, for log lines.
    fn location(&self) -> String;
}

#[cfg(test)]
pub mod mock {
    //! In-memory sheet with scriptable failures.

    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct MemorySheet {
        pub rows: Mutex<Vec<Vec<String>>>,
        /// Scripted outcomes of the next `insert_rows` calls, in order;
        /// `None` lets the call through. Unscripted calls succeed.
        pub insert_script: Mutex<VecDeque<Option<SinkError>>>,
        /// `(position, row count)` of every successful insert.
        pub inserts: Mutex<Vec<(usize, usize)>>,
        pub refreshes: Mutex<usize>,
        /// Number of full-sheet reads.
        pub full_reads: Mutex<usize>,
    }

    impl MemorySheet {
        pub fn with_rows(rows: Vec<Vec<String>>) -> Self {
            Self {
                rows: Mutex::new(rows),
                ..Self::default()
            }
        }

        pub fn fail_next_insert(&self, err: SinkError) {
            self.insert_script.lock().unwrap().push_back(Some(err));
        }

        pub fn pass_next_insert(&self) {
            self.insert_script.lock().unwrap().push_back(None);
        }

        pub fn snapshot(&self) -> Vec<Vec<String>> {
            self.rows.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TabularSink for MemorySheet {
        async fn append_row(&self, row: Vec<String>) -> Result<(), SinkError> {
            self.rows.lock().unwrap().push(row);
            Ok(())
        }

        async fn insert_rows(
            &self,
            rows: Vec<Vec<String>>,
            position: usize,
        ) -> Result<(), SinkError> {
            if let Some(Some(err)) = self.insert_script.lock().unwrap().pop_front() {
                return Err(err);
            }
            let mut sheet = self.rows.lock().unwrap();
            let at = position.saturating_sub(1).min(sheet.len());
            self.inserts.lock().unwrap().push((position, rows.len()));
            sheet.splice(at..at, rows);
            Ok(())
        }

        async fn first_row(&self) -> Result<Option<Vec<String>>, SinkError> {
            Ok(self.rows.lock().unwrap().first().cloned())
        }

        async fn get_all_rows(&self) -> Result<Vec<Vec<String>>, SinkError> {
            *self.full_reads.lock().unwrap() += 1;
            Ok(self.snapshot())
        }

        async fn clear(&self, preserve_header: bool) -> Result<(), SinkError> {
            let mut sheet = self.rows.lock().unwrap();
            let keep = if preserve_header { 1.min(sheet.len()) } else { 0 };
            sheet.truncate(keep);
            Ok(())
        }

        async fn refresh_credentials(&self) -> Result<(), SinkError> {
            *self.refreshes.lock().unwrap() += 1;
            Ok(())
        }

        fn location(&self) -> String {
            "memory".to_string()
        }
    }
}
