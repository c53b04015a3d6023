pub mod commands;
pub mod error;
pub mod queries;
pub mod routes;

pub use commands::{
    BulkDeleteRowsCommand, CancelUploadCommand, CreateUploadCommand, DeleteAccepted,
    DeleteUploadCommand, SyncIrsBmfCommand, SyncIrsBmfResponse,
};
pub use error::{UploadFeatureError, UploadView};
pub use queries::{
    GetDeleteProgressQuery, GetUploadQuery, ListRowsQuery, ListRowsResponse, ListUploadsQuery,
    ListUploadsResponse, RowItem,
};
pub use routes::uploads_routes;
