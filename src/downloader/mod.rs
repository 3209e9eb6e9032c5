pub mod batch;
pub mod error;
pub mod manager;
pub mod registry;
pub mod task;

pub use batch::{run_batch, BatchEntry, BatchEntryStatus, BatchReport};
pub use error::DownloadError;
pub use manager::{DownloadManager, DownloadOptions};
pub use registry::{RegistryStats, TaskRegistry};
pub use task::{DownloadTask, TaskStatus};
