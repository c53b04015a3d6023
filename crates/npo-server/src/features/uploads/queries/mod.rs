pub mod delete_progress;
pub mod get;
pub mod list;
pub mod list_rows;

pub use delete_progress::GetDeleteProgressQuery;
pub use get::GetUploadQuery;
pub use list::{ListUploadsQuery, ListUploadsResponse};
pub use list_rows::{ListRowsQuery, ListRowsResponse, RowItem};
