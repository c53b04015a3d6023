//! Domain models backed by the relational store

pub mod excel_data;
pub mod progress;
pub mod upload;

pub use excel_data::{ExcelDataNote, ExcelDataRow, HEADER_MARKER_EIN};
pub use progress::{DeleteProgress, DeleteStatus};
pub use upload::{NewUpload, SourceKind, UploadStatus, UploadedFile};
