//! Resumable upload engine
//!
//! Sessions are created with a declared size, filled chunk by chunk at
//! server-acknowledged offsets, and sealed into a stored object once the
//! last byte arrives.

pub mod naming;
pub mod notifier;
pub mod registry;
pub mod service;
pub mod storage;
pub mod types;

pub use notifier::{
    CompletedUpload, CompletedUploads, CompletionEvent, CompletionHook, CompletionNotifier,
    CompletionObserver, DefaultCompletionHook, HookResponse,
};
pub use registry::{SessionRegistry, SweepReport};
pub use service::{ChunkOutcome, Completion, CreatedUpload, UploadLimits, UploadService};
pub use storage::{LocalUploadStorage, S3UploadStorage, UploadStorage};
pub use types::*;
