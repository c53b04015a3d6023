//! Progress bookkeeping for ingestion runs and delete operations

use serde::{Deserialize, Serialize};

/// Percentage of processed rows, clamped to `0..=100`, zero when nothing is expected
pub fn percent_complete(processed: i64, total: i64) -> f64 {
    if total <= 0 {
        return 0.0;
    }
    let pct = (processed.max(0) as f64 / total as f64) * 100.0;
    pct.min(100.0)
}

/// Number of chunks needed for `rows` rows at `chunk_size`
pub fn chunk_count(rows: i64, chunk_size: usize) -> i32 {
    if rows <= 0 || chunk_size == 0 {
        return 0;
    }
    let size = chunk_size as i64;
    ((rows + size - 1) / size) as i32
}

/// Phases of a deletion, each owning a fixed slice of the percentage range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletePhase {
    Notes,
    Rows,
    File,
    Record,
}

impl DeletePhase {
    pub fn stage(&self) -> &'static str {
        match self {
            DeletePhase::Notes => "deleting_notes",
            DeletePhase::Rows => "deleting_rows",
            DeletePhase::File => "removing_file",
            DeletePhase::Record => "deleting_record",
        }
    }

    /// Start and end percentage of the phase
    pub fn range(&self) -> (i16, i16) {
        match self {
            DeletePhase::Notes => (0, 50),
            DeletePhase::Rows => (50, 90),
            DeletePhase::File => (90, 95),
            DeletePhase::Record => (95, 100),
        }
    }

    /// Interpolate within the phase; an empty phase reports its end
    pub fn percent(&self, done: u64, total: u64) -> i16 {
        let (start, end) = self.range();
        if total == 0 || done >= total {
            return end;
        }
        let span = (end - start) as u64;
        start + ((done * span) / total) as i16
    }
}
