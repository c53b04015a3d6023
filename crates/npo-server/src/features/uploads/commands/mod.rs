pub mod bulk_delete;
pub mod cancel;
pub mod create;
pub mod delete;
pub mod sync_irs;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use bulk_delete::BulkDeleteRowsCommand;
pub use cancel::CancelUploadCommand;
pub use create::CreateUploadCommand;
pub use delete::DeleteUploadCommand;
pub use sync_irs::{SyncIrsBmfCommand, SyncIrsBmfResponse};

/// A queued delete; poll `delete_progress` with the operation id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteAccepted {
    pub operation_id: Uuid,
    pub job_id: Uuid,
}
