//! reel-sync
//!
//! Keeps a film production's sequence/shot tree in step with a
//! media-collaboration service and merges generated naming suggestions back
//! into it.

pub mod ai;
pub mod cancel;
pub mod config;
pub mod model;
pub mod remote;
pub mod scan;
pub mod storage;
pub mod suggest;
pub mod sync;
pub mod upload;
pub mod utils;

pub use cancel::CancelToken;
pub use config::{AppConfig, ConfigError};
pub use model::{Project, ProjectStats};
pub use storage::{ProjectStore, StoreError};
pub use suggest::{SuggestError, SuggestionMerger};
pub use sync::{DriftReport, SyncEngine, SyncReport};
pub use upload::{UploadCoordinator, UploadReport};
