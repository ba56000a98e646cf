use thiserror::Error;

use crate::backend::SdkError;

/// Errors surfaced by the render session. All of them are unrecoverable in
/// practice; the viewer binary logs and exits on any of these, but the
/// library hands them back as values so the orchestration can be tested.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Sdk(#[from] SdkError),

    /// The resolved frame buffer's reported byte length does not match the
    /// staging buffer. Indicates SDK/display desynchronization; the pixel
    /// copy is never attempted.
    #[error("resolved frame buffer reports {actual} bytes, expected {expected}")]
    FrameSizeMismatch { expected: usize, actual: usize },

    #[error("failed to spawn render worker: {0}")]
    WorkerSpawn(#[from] std::io::Error),

    #[error("render worker is gone")]
    WorkerGone,
}
