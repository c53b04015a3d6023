//! Virtual-column projector
//!
//! Pulls the fixed-position BMF fields out of each raw row so they can be
//! stored next to the JSON payload and used for lookup and filtering.

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::error::IngestResult;
use super::reader::{locate_ein_column, RawRow};
use crate::models::excel_data::{encode_payload, HEADER_MARKER_EIN};

pub const NAME_COLUMN: usize = 1;
pub const CITY_COLUMN: usize = 4;
pub const STATE_COLUMN: usize = 5;
pub const ZIP_COLUMN: usize = 6;
pub const NTEE_COLUMN: usize = 26;

/// Shape of a source derived from its header row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnLayout {
    /// Expected cell count of every data row
    pub width: usize,
    pub ein: usize,
}

impl ColumnLayout {
    pub fn from_header(header: &[String]) -> IngestResult<Self> {
        Ok(Self {
            width: header.len(),
            ein: locate_ein_column(header)?,
        })
    }
}

/// A row ready to be written
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectedRow {
    pub cells: Vec<String>,
    /// JSON-encoded `cells`
    pub payload: String,
    pub ein: Option<String>,
    pub name: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip: Option<String>,
    pub ntee_code: Option<String>,
    pub is_header: bool,
}

impl ProjectedRow {
    /// EIN usable as a dedup key
    pub fn key(&self) -> Option<&str> {
        if self.is_header {
            return None;
        }
        self.ein.as_deref().filter(|e| !e.is_empty())
    }
}

/// Projected rows of one chunk plus the count of rows dropped as malformed
#[derive(Debug, Clone, Default)]
pub struct ProjectedChunk {
    pub rows: Vec<ProjectedRow>,
    pub malformed: usize,
    /// Rows read from the source for this chunk, malformed ones included
    pub raw_count: usize,
}

fn field(cells: &[String], index: usize) -> Option<String> {
    cells
        .get(index)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Project one well-formed data row
pub fn project_row(layout: &ColumnLayout, cells: RawRow) -> IngestResult<ProjectedRow> {
    let payload = encode_payload(&cells)?;
    Ok(ProjectedRow {
        ein: field(&cells, layout.ein),
        name: field(&cells, NAME_COLUMN),
        city: field(&cells, CITY_COLUMN),
        state: field(&cells, STATE_COLUMN),
        zip: field(&cells, ZIP_COLUMN),
        ntee_code: field(&cells, NTEE_COLUMN),
        is_header: false,
        payload,
        cells,
    })
}

/// Marker row recording the header of an upload
pub fn project_header(header: &[String]) -> IngestResult<ProjectedRow> {
    Ok(ProjectedRow {
        cells: header.to_vec(),
        payload: encode_payload(header)?,
        ein: Some(HEADER_MARKER_EIN.to_string()),
        name: field(header, NAME_COLUMN),
        city: field(header, CITY_COLUMN),
        state: field(header, STATE_COLUMN),
        zip: field(header, ZIP_COLUMN),
        ntee_code: field(header, NTEE_COLUMN),
        is_header: true,
    })
}

/// Project a chunk, dropping rows whose width differs from the header
pub fn project_chunk(
    layout: &ColumnLayout,
    rows: Vec<RawRow>,
    first_row_number: usize,
) -> IngestResult<ProjectedChunk> {
    let raw_count = rows.len();
    let mut projected = Vec::with_capacity(raw_count);
    let mut malformed = 0;

    for (offset, cells) in rows.into_iter().enumerate() {
        if cells.len() != layout.width {
            malformed += 1;
            warn!(
                row = first_row_number + offset,
                expected = layout.width,
                actual = cells.len(),
                "Skipping malformed row"
            );
            continue;
        }
        projected.push(project_row(layout, cells)?);
    }

    Ok(ProjectedChunk {
        rows: projected,
        malformed,
        raw_count,
    })
}
