//! Query results tied to the statement that produced them.

use crate::db::driver::ConnectionPool;
use crate::db::statement::StatementHandle;
use crate::models::{ColumnMetadata, Row};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Rows returned by a query plus the handle that must stay open while they
/// are read. Closing or dropping the cursor closes the handle.
pub struct ResultCursor<P: ConnectionPool> {
    columns: Arc<[ColumnMetadata]>,
    rows: VecDeque<Row>,
    handle: StatementHandle<P>,
}

impl<P: ConnectionPool> std::fmt::Debug for ResultCursor<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCursor")
            .field("columns", &self.columns)
            .field("remaining", &self.rows.len())
            .field("handle", &self.handle)
            .finish()
    }
}

impl<P: ConnectionPool> ResultCursor<P> {
    pub(crate) fn new(rows: Vec<Row>, handle: StatementHandle<P>) -> Self {
        let columns = rows
            .first()
            .map(Row::shared_columns)
            .unwrap_or_else(|| Arc::from(Vec::new()));
        Self {
            columns,
            rows: rows.into(),
            handle,
        }
    }

    /// Column metadata. Empty when the query returned no rows.
    pub fn columns(&self) -> &[ColumnMetadata] {
        &self.columns
    }

    /// Take the next row.
    pub fn next_row(&mut self) -> Option<Row> {
        self.rows.pop_front()
    }

    /// Rows not yet taken.
    pub fn rows(&self) -> impl Iterator<Item = &Row> {
        self.rows.iter()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// True when the query hit its row cap and rows were left unread.
    pub fn has_more(&self) -> bool {
        self.handle.is_truncated()
    }

    pub fn statement_id(&self) -> Uuid {
        self.handle.id()
    }

    /// Take every remaining row and close the cursor.
    pub fn collect_rows(mut self) -> Vec<Row> {
        let rows = std::mem::take(&mut self.rows);
        self.handle.close();
        rows.into()
    }

    pub fn close(mut self) {
        self.handle.close();
    }
}

impl<P: ConnectionPool> Iterator for ResultCursor<P> {
    type Item = Row;

    fn next(&mut self) -> Option<Row> {
        self.next_row()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.rows.len(), Some(self.rows.len()))
    }
}

impl<P: ConnectionPool> ExactSizeIterator for ResultCursor<P> {}

impl<P: ConnectionPool> Drop for ResultCursor<P> {
    fn drop(&mut self) {
        if !self.handle.is_closed() {
            debug!(statement_id = %self.handle.id(), "Closing cursor on drop");
            self.handle.close();
        }
    }
}
