use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::store::StoredRecord;

/// Lazy walk over a snapshot of the store, in sequence order.
///
/// The snapshot is fixed when the cursor is created, so appends made while
/// iterating are not observed. `rewind` (or cloning) restarts the walk.
#[derive(Debug, Clone)]
pub struct RecordCursor {
    snapshot: Arc<[Arc<StoredRecord>]>,
    since: DateTime<Utc>,
    pos: usize,
}

impl RecordCursor {
    pub(crate) fn new(snapshot: Arc<[Arc<StoredRecord>]>, since: DateTime<Utc>) -> Self {
        Self {
            snapshot,
            since,
            pos: 0,
        }
    }

    pub fn rewind(&mut self) {
        self.pos = 0;
    }
}

impl Iterator for RecordCursor {
    type Item = Arc<StoredRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(entry) = self.snapshot.get(self.pos) {
            self.pos += 1;
            if entry.record.timestamp_utc >= self.since {
                return Some(Arc::clone(entry));
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.snapshot.len().saturating_sub(self.pos)))
    }
}
