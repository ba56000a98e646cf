use std::path::Path;

use glam::{Mat4, Vec3};
use thiserror::Error;

/// Opaque handle to an SDK-side accumulation target. Distinct from a
/// graphics-API framebuffer object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameBufferId(pub u64);

/// Opaque handle to an SDK-side shape (imported mesh or instance of one).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShapeId(pub u64);

/// Invoked from inside a blocking `render` call, on the calling thread,
/// whenever the SDK finishes a sampling iteration. The argument is the
/// SDK-reported progress of the current batch in `0.0..=1.0`.
pub type ProgressCallback = Box<dyn Fn(f32) + Send + Sync>;

#[derive(Debug, Error)]
pub enum SdkError {
    #[error("{call} failed with status {code}")]
    Status { call: &'static str, code: i32 },

    #[error("failed to import mesh {path}: {reason}")]
    MeshImport { path: String, reason: String },

    #[error("unknown handle {0}")]
    UnknownHandle(u64),
}

pub type SdkResult<T> = Result<T, SdkError>;

/// The slice of the external ray-tracing SDK this application actually
/// touches. Implementations take `&self` and synchronize internally; the
/// session layer additionally serializes `render` against `resolve` with
/// its own lock, so a backend never sees both at once.
pub trait TraceBackend: Send + Sync + 'static {
    // Frame buffers.
    fn create_frame_buffer(&self, width: u32, height: u32) -> SdkResult<FrameBufferId>;
    fn destroy_frame_buffer(&self, fb: FrameBufferId) -> SdkResult<()>;
    /// Convert the in-progress accumulation in `src` into a displayable
    /// image in `dst`.
    fn resolve(&self, src: FrameBufferId, dst: FrameBufferId) -> SdkResult<()>;
    /// Byte length of the frame buffer's pixel data as the SDK reports it.
    fn frame_buffer_len(&self, fb: FrameBufferId) -> SdkResult<usize>;
    fn read_frame_buffer(&self, fb: FrameBufferId, out: &mut [f32]) -> SdkResult<()>;

    // Scene construction. Issued once at startup; the scene is not a
    // first-class object on this side of the fence.
    fn set_camera_look_at(&self, eye: Vec3, target: Vec3, up: Vec3) -> SdkResult<()>;
    fn create_env_light(&self, intensity: f32) -> SdkResult<()>;
    fn import_mesh(&self, path: &Path) -> SdkResult<ShapeId>;
    fn create_instance(&self, of: ShapeId) -> SdkResult<ShapeId>;
    fn set_transform(&self, shape: ShapeId, transform: Mat4) -> SdkResult<()>;
    fn set_shape_color(&self, shape: ShapeId, color: Vec3) -> SdkResult<()>;
    fn create_floor(&self, extent: f32) -> SdkResult<()>;
    fn set_display_gamma(&self, gamma: f32) -> SdkResult<()>;

    // Rendering.
    /// Bind the color AOV to `fb`.
    fn set_color_output(&self, fb: FrameBufferId) -> SdkResult<()>;
    fn set_batch_iterations(&self, iterations: u32) -> SdkResult<()>;
    fn set_progress_callback(&self, callback: ProgressCallback) -> SdkResult<()>;
    /// Run one batch of sampling iterations. Blocks until the batch is done;
    /// fires the progress callback zero or more times along the way.
    fn render(&self) -> SdkResult<()>;

    // Teardown.
    fn collect_garbage(&self) -> SdkResult<()>;
    fn check_leaks(&self) -> SdkResult<()>;
}

/// Where resolved frames end up. The session drives this instead of talking
/// to the GPU directly so the orchestration stays testable; the viewer
/// implements it over a wgpu texture registered with imgui.
pub trait DisplayTarget {
    /// Drop the current display texture and make a new one at the given size.
    fn recreate(&mut self, width: u32, height: u32);
    /// Overwrite the display texture's contents with `width * height` RGBA
    /// f32 samples. Called at most once per `advance_one_batch`.
    fn upload(&mut self, width: u32, height: u32, pixels: &[f32]);
}
