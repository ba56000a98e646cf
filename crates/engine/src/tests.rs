//! Orchestration tests with the SDK replaced by a scripted stub and the GPU
//! texture replaced by a counting target.

use std::path::Path;
use std::sync::{Arc, Mutex};

use glam::{Mat4, Vec3};

use crate::backend::{
    DisplayTarget, FrameBufferId, ProgressCallback, SdkError, SdkResult, ShapeId, TraceBackend,
};
use crate::error::EngineError;
use crate::session::{BatchOutcome, RenderSession, SessionConfig};

#[derive(Default)]
struct StubState {
    next_id: u64,
    frame_buffers: std::collections::HashMap<u64, (u32, u32)>,
    render_calls: u32,
    read_calls: u32,
    /// Progress callbacks fired per render call.
    updates_per_render: u32,
    /// When set, reported instead of the true byte length.
    reported_len_override: Option<usize>,
    fail_next_render: bool,
}

#[derive(Default)]
struct StubSdk {
    state: Mutex<StubState>,
    callback: Mutex<Option<ProgressCallback>>,
}

impl StubSdk {
    fn with_updates(updates_per_render: u32) -> Arc<Self> {
        let stub = StubSdk::default();
        stub.state.lock().unwrap().updates_per_render = updates_per_render;
        Arc::new(stub)
    }

    fn render_calls(&self) -> u32 {
        self.state.lock().unwrap().render_calls
    }

    fn read_calls(&self) -> u32 {
        self.state.lock().unwrap().read_calls
    }

    fn set_len_override(&self, len: Option<usize>) {
        self.state.lock().unwrap().reported_len_override = len;
    }

    fn fail_next_render(&self) {
        self.state.lock().unwrap().fail_next_render = true;
    }
}

impl TraceBackend for StubSdk {
    fn create_frame_buffer(&self, width: u32, height: u32) -> SdkResult<FrameBufferId> {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = state.next_id;
        state.frame_buffers.insert(id, (width, height));
        Ok(FrameBufferId(id))
    }

    fn destroy_frame_buffer(&self, fb: FrameBufferId) -> SdkResult<()> {
        self.state
            .lock()
            .unwrap()
            .frame_buffers
            .remove(&fb.0)
            .map(|_| ())
            .ok_or(SdkError::UnknownHandle(fb.0))
    }

    fn resolve(&self, _src: FrameBufferId, _dst: FrameBufferId) -> SdkResult<()> {
        Ok(())
    }

    fn frame_buffer_len(&self, fb: FrameBufferId) -> SdkResult<usize> {
        let state = self.state.lock().unwrap();
        if let Some(len) = state.reported_len_override {
            return Ok(len);
        }
        let (w, h) = state
            .frame_buffers
            .get(&fb.0)
            .ok_or(SdkError::UnknownHandle(fb.0))?;
        Ok(*w as usize * *h as usize * 4 * std::mem::size_of::<f32>())
    }

    fn read_frame_buffer(&self, _fb: FrameBufferId, out: &mut [f32]) -> SdkResult<()> {
        self.state.lock().unwrap().read_calls += 1;
        out.fill(0.5);
        Ok(())
    }

    fn set_camera_look_at(&self, _eye: Vec3, _target: Vec3, _up: Vec3) -> SdkResult<()> {
        Ok(())
    }

    fn create_env_light(&self, _intensity: f32) -> SdkResult<()> {
        Ok(())
    }

    fn import_mesh(&self, _path: &Path) -> SdkResult<ShapeId> {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        Ok(ShapeId(state.next_id))
    }

    fn create_instance(&self, _of: ShapeId) -> SdkResult<ShapeId> {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        Ok(ShapeId(state.next_id))
    }

    fn set_transform(&self, _shape: ShapeId, _transform: Mat4) -> SdkResult<()> {
        Ok(())
    }

    fn set_shape_color(&self, _shape: ShapeId, _color: Vec3) -> SdkResult<()> {
        Ok(())
    }

    fn create_floor(&self, _extent: f32) -> SdkResult<()> {
        Ok(())
    }

    fn set_display_gamma(&self, _gamma: f32) -> SdkResult<()> {
        Ok(())
    }

    fn set_color_output(&self, _fb: FrameBufferId) -> SdkResult<()> {
        Ok(())
    }

    fn set_batch_iterations(&self, _iterations: u32) -> SdkResult<()> {
        Ok(())
    }

    fn set_progress_callback(&self, callback: ProgressCallback) -> SdkResult<()> {
        *self.callback.lock().unwrap() = Some(callback);
        Ok(())
    }

    fn render(&self) -> SdkResult<()> {
        let updates = {
            let mut state = self.state.lock().unwrap();
            state.render_calls += 1;
            if state.fail_next_render {
                state.fail_next_render = false;
                return Err(SdkError::Status {
                    call: "render",
                    code: -7,
                });
            }
            state.updates_per_render
        };
        let callback = self.callback.lock().unwrap();
        if let Some(cb) = callback.as_ref() {
            for i in 0..updates {
                cb((i + 1) as f32 / u32::max(updates, 1) as f32);
            }
        }
        Ok(())
    }

    fn collect_garbage(&self) -> SdkResult<()> {
        Ok(())
    }

    fn check_leaks(&self) -> SdkResult<()> {
        Ok(())
    }
}

/// The tests keep one handle to the stub while the session owns another.
impl TraceBackend for Arc<StubSdk> {
    fn create_frame_buffer(&self, width: u32, height: u32) -> SdkResult<FrameBufferId> {
        (**self).create_frame_buffer(width, height)
    }

    fn destroy_frame_buffer(&self, fb: FrameBufferId) -> SdkResult<()> {
        (**self).destroy_frame_buffer(fb)
    }

    fn resolve(&self, src: FrameBufferId, dst: FrameBufferId) -> SdkResult<()> {
        (**self).resolve(src, dst)
    }

    fn frame_buffer_len(&self, fb: FrameBufferId) -> SdkResult<usize> {
        (**self).frame_buffer_len(fb)
    }

    fn read_frame_buffer(&self, fb: FrameBufferId, out: &mut [f32]) -> SdkResult<()> {
        (**self).read_frame_buffer(fb, out)
    }

    fn set_camera_look_at(&self, eye: Vec3, target: Vec3, up: Vec3) -> SdkResult<()> {
        (**self).set_camera_look_at(eye, target, up)
    }

    fn create_env_light(&self, intensity: f32) -> SdkResult<()> {
        (**self).create_env_light(intensity)
    }

    fn import_mesh(&self, path: &Path) -> SdkResult<ShapeId> {
        (**self).import_mesh(path)
    }

    fn create_instance(&self, of: ShapeId) -> SdkResult<ShapeId> {
        (**self).create_instance(of)
    }

    fn set_transform(&self, shape: ShapeId, transform: Mat4) -> SdkResult<()> {
        (**self).set_transform(shape, transform)
    }

    fn set_shape_color(&self, shape: ShapeId, color: Vec3) -> SdkResult<()> {
        (**self).set_shape_color(shape, color)
    }

    fn create_floor(&self, extent: f32) -> SdkResult<()> {
        (**self).create_floor(extent)
    }

    fn set_display_gamma(&self, gamma: f32) -> SdkResult<()> {
        (**self).set_display_gamma(gamma)
    }

    fn set_color_output(&self, fb: FrameBufferId) -> SdkResult<()> {
        (**self).set_color_output(fb)
    }

    fn set_batch_iterations(&self, iterations: u32) -> SdkResult<()> {
        (**self).set_batch_iterations(iterations)
    }

    fn set_progress_callback(&self, callback: ProgressCallback) -> SdkResult<()> {
        (**self).set_progress_callback(callback)
    }

    fn render(&self) -> SdkResult<()> {
        (**self).render()
    }

    fn collect_garbage(&self) -> SdkResult<()> {
        (**self).collect_garbage()
    }

    fn check_leaks(&self) -> SdkResult<()> {
        (**self).check_leaks()
    }
}

#[derive(Default)]
struct CountingTarget {
    uploads: u32,
    recreates: u32,
    last_upload: Option<(u32, u32, usize)>,
}

impl DisplayTarget for CountingTarget {
    fn recreate(&mut self, _width: u32, _height: u32) {
        self.recreates += 1;
    }

    fn upload(&mut self, width: u32, height: u32, pixels: &[f32]) {
        self.uploads += 1;
        self.last_upload = Some((width, height, pixels.len()));
    }
}

fn config(width: u32, height: u32, max_samples: u32) -> SessionConfig {
    SessionConfig {
        width,
        height,
        max_samples,
        min_samples: 1,
        batch_size: 2,
        ..SessionConfig::default()
    }
}

#[test]
fn staging_buffer_matches_viewport() {
    let session =
        RenderSession::initialize(StubSdk::with_updates(1), config(640, 360, 8)).unwrap();
    assert_eq!(session.staging_len(), 640 * 360 * 4);
}

#[test]
fn resize_restarts_accumulation() {
    let mut session =
        RenderSession::initialize(StubSdk::with_updates(1), config(640, 360, 8)).unwrap();
    let mut target = CountingTarget::default();

    // get a couple of batches in first
    session.advance_one_batch(&mut target).unwrap();
    session.advance_one_batch(&mut target).unwrap();
    assert!(session.progress().sample_count() > 1);

    session.resize(320, 240, &mut target).unwrap();
    assert_eq!(session.progress().sample_count(), 1);
    assert!(session.progress().needs_more());
    assert_eq!(session.staging_len(), 320 * 240 * 4);
    assert_eq!(target.recreates, 1);
    assert_eq!(session.size(), (320, 240));
}

#[test]
fn at_most_one_upload_per_advance() {
    let mut session =
        RenderSession::initialize(StubSdk::with_updates(5), config(64, 48, 8)).unwrap();
    let mut target = CountingTarget::default();

    let outcome = session.advance_one_batch(&mut target).unwrap();
    assert_eq!(outcome, BatchOutcome::Published);
    assert_eq!(target.uploads, 1);
    assert_eq!(target.last_upload, Some((64, 48, 64 * 48 * 4)));
}

#[test]
fn silent_batch_publishes_nothing() {
    let mut session =
        RenderSession::initialize(StubSdk::with_updates(0), config(64, 48, 8)).unwrap();
    let mut target = CountingTarget::default();

    let outcome = session.advance_one_batch(&mut target).unwrap();
    assert_eq!(outcome, BatchOutcome::Silent);
    assert_eq!(target.uploads, 0);
    assert_eq!(session.progress().sample_count(), 1);
}

#[test]
fn byte_size_mismatch_is_fatal_without_copy() {
    let stub = StubSdk::with_updates(1);
    let mut session = RenderSession::initialize(Arc::clone(&stub), config(64, 48, 8)).unwrap();
    let mut target = CountingTarget::default();

    stub.set_len_override(Some(64 * 48 * 4 * 4 - 16));
    let err = session.advance_one_batch(&mut target).unwrap_err();
    assert!(matches!(err, EngineError::FrameSizeMismatch { .. }));

    // the pixel copy and the texture upload must never have happened
    assert_eq!(stub.read_calls(), 0);
    assert_eq!(target.uploads, 0);
}

#[test]
fn no_batches_once_complete() {
    let stub = StubSdk::with_updates(1);
    let mut session = RenderSession::initialize(Arc::clone(&stub), config(64, 48, 3)).unwrap();
    let mut target = CountingTarget::default();

    while session.progress().needs_more() {
        session.advance_one_batch(&mut target).unwrap();
    }
    assert!(session.progress().complete());

    // counter at max and dirty flag clear: no further render batches
    let renders = stub.render_calls();
    assert_eq!(session.advance_one_batch(&mut target).unwrap(), BatchOutcome::Idle);
    assert_eq!(session.advance_one_batch(&mut target).unwrap(), BatchOutcome::Idle);
    assert_eq!(stub.render_calls(), renders);
}

#[test]
fn mark_dirty_rearms_batching() {
    let mut session =
        RenderSession::initialize(StubSdk::with_updates(1), config(64, 48, 2)).unwrap();
    let mut target = CountingTarget::default();

    while session.progress().needs_more() {
        session.advance_one_batch(&mut target).unwrap();
    }
    assert_eq!(
        session.advance_one_batch(&mut target).unwrap(),
        BatchOutcome::Idle
    );

    session.mark_dirty();
    assert_eq!(session.progress().sample_count(), 1);
    assert_eq!(
        session.advance_one_batch(&mut target).unwrap(),
        BatchOutcome::Published
    );
}

#[test]
fn render_failure_surfaces_as_sdk_error() {
    let stub = StubSdk::with_updates(1);
    let mut session = RenderSession::initialize(Arc::clone(&stub), config(32, 32, 8)).unwrap();
    let mut target = CountingTarget::default();

    stub.fail_next_render();
    let err = session.advance_one_batch(&mut target).unwrap_err();
    assert!(matches!(err, EngineError::Sdk(SdkError::Status { code: -7, .. })));
    assert_eq!(target.uploads, 0);
}

#[test]
fn end_to_end_reaches_full_progress() {
    let mut session =
        RenderSession::initialize(StubSdk::with_updates(1), config(800, 600, 4)).unwrap();
    let mut target = CountingTarget::default();

    let mut advances = 0;
    while !session.progress().complete() {
        session.advance_one_batch(&mut target).unwrap();
        advances += 1;
        assert!(advances < 64, "session never converged");
    }

    assert_eq!(session.progress().ratio(), 100.0);
    assert_eq!(session.progress().sample_count(), 4);
    assert_eq!(target.last_upload, Some((800, 600, 800 * 600 * 4)));
}

#[test]
fn shutdown_tears_down_cleanly() {
    let session =
        RenderSession::initialize(StubSdk::with_updates(1), config(64, 48, 8)).unwrap();
    session.shutdown().unwrap();
}
