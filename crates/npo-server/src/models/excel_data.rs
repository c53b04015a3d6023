//! Ingested rows and their notes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// EIN value carried by the per-upload header marker row
pub const HEADER_MARKER_EIN: &str = "EIN";

/// One stored spreadsheet row (`excel_data`)
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ExcelDataRow {
    pub id: i64,
    pub file_id: Uuid,
    /// JSON array of the raw cell strings
    pub row_data: String,
    pub ein: Option<String>,
    pub name: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip: Option<String>,
    pub ntee_code: Option<String>,
    pub is_header: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExcelDataRow {
    /// Decoded cells, `None` when the stored text is not a JSON string array
    pub fn payload(&self) -> Option<Vec<String>> {
        decode_payload(&self.row_data)
    }
}

/// Annotation attached to a stored row (`excel_data_notes`)
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ExcelDataNote {
    pub id: i64,
    pub excel_data_id: i64,
    pub note: String,
    pub created_at: DateTime<Utc>,
}

pub fn encode_payload(cells: &[String]) -> Result<String, serde_json::Error> {
    serde_json::to_string(cells)
}

pub fn decode_payload(text: &str) -> Option<Vec<String>> {
    serde_json::from_str(text).ok()
}
