pub mod backend;
pub mod error;
pub mod progress;
pub mod scene;
pub mod session;
pub mod software;

#[cfg(test)]
mod tests;

pub use backend::{DisplayTarget, FrameBufferId, ShapeId, TraceBackend};
pub use error::EngineError;
pub use progress::ProgressState;
pub use session::{BatchOutcome, RenderSession, SessionConfig};
pub use software::SoftwareTracer;
