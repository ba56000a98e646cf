//! The render engine facade: owns the SDK frame buffers, the pixel staging
//! buffer and the sample bookkeeping, and moves resolved frames into the
//! display texture one batch at a time.

use std::path::PathBuf;
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use crate::backend::{DisplayTarget, FrameBufferId, SdkError, TraceBackend};
use crate::error::EngineError;
use crate::progress::ProgressState;
use crate::scene;

pub const RGBA_CHANNELS: usize = 4;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub width: u32,
    pub height: u32,
    /// Sampling iterations per `render` call once past the warm-up.
    pub batch_size: u32,
    /// Batches accumulated before the image is shown.
    pub min_samples: u32,
    /// Batches accumulated before the session stops issuing work.
    pub max_samples: u32,
    pub mesh_path: PathBuf,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            width: 800,
            height: 600,
            batch_size: 32,
            min_samples: 4,
            max_samples: 128,
            mesh_path: PathBuf::from("resources/meshes/teapot.obj"),
        }
    }
}

/// What a call to `advance_one_batch` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// No more samples were needed; nothing was submitted.
    Idle,
    /// A batch ran and a resolved frame was uploaded to the display target.
    Published,
    /// A batch ran to completion without reporting a progress update.
    Silent,
}

#[derive(Default)]
struct SignalState {
    has_update: bool,
    progress: f32,
    done: bool,
    error: Option<SdkError>,
}

/// Condvar-backed progress handoff between the SDK callback and the frame
/// loop. The callback sets `has_update`, the worker sets `done` when a
/// batch ends.
#[derive(Default)]
struct ProgressSignal {
    state: Mutex<SignalState>,
    cond: Condvar,
}

impl ProgressSignal {
    fn lock(&self) -> MutexGuard<'_, SignalState> {
        // A poisoned signal only means a callback panicked mid-store; the
        // flags are plain values and remain usable.
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn notify_update(&self, progress: f32) {
        let mut state = self.lock();
        state.has_update = true;
        state.progress = progress;
        self.cond.notify_all();
    }

    fn notify_done(&self, error: Option<SdkError>) {
        let mut state = self.lock();
        state.done = true;
        state.error = error;
        self.cond.notify_all();
    }

    fn clear(&self) {
        *self.lock() = SignalState::default();
    }

    /// Block until the batch finishes or, unless one was already taken this
    /// frame, a progress update arrives. Returns (take_update, done, error).
    fn wait_event(&self, update_taken: bool) -> (bool, bool, Option<SdkError>) {
        let mut state = self.lock();
        loop {
            if state.done || (state.has_update && !update_taken) {
                let take = state.has_update && !update_taken;
                state.has_update = false;
                return (take, state.done, state.error.take());
            }
            state = match self.cond.wait(state) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
    }
}

enum Job {
    Batch,
    Quit,
}

/// Persistent render thread fed over a channel, spawned once per session.
/// Holds the render lock only around the raw `render` call.
struct RenderWorker {
    jobs: Sender<Job>,
    handle: Option<JoinHandle<()>>,
}

impl RenderWorker {
    fn spawn<B: TraceBackend>(
        backend: Arc<B>,
        render_lock: Arc<Mutex<()>>,
        signal: Arc<ProgressSignal>,
    ) -> Result<Self, EngineError> {
        let (jobs, rx) = mpsc::channel();
        let handle = thread::Builder::new()
            .name("render-worker".into())
            .spawn(move || {
                while let Ok(Job::Batch) = rx.recv() {
                    let outcome = {
                        let _guard = match render_lock.lock() {
                            Ok(guard) => guard,
                            Err(poisoned) => poisoned.into_inner(),
                        };
                        backend.render()
                    };
                    signal.notify_done(outcome.err());
                }
            })?;

        Ok(RenderWorker {
            jobs,
            handle: Some(handle),
        })
    }

    fn submit(&self) -> Result<(), EngineError> {
        self.jobs.send(Job::Batch).map_err(|_| EngineError::WorkerGone)
    }

    fn stop(&mut self) {
        let _ = self.jobs.send(Job::Quit);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for RenderWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Owns every SDK-side resource the demo touches. Lifecycle: `initialize`,
/// then any number of `advance_one_batch` / `resize`, then `shutdown`.
pub struct RenderSession<B: TraceBackend> {
    backend: Arc<B>,
    render_lock: Arc<Mutex<()>>,
    signal: Arc<ProgressSignal>,
    worker: RenderWorker,

    raw: FrameBufferId,
    resolved: FrameBufferId,
    staging: Vec<f32>,
    width: u32,
    height: u32,

    progress: ProgressState,
    batch_in_flight: bool,
}

impl<B: TraceBackend> RenderSession<B> {
    /// Build the demo scene, create both frame buffers, run the synchronous
    /// single-iteration warm-up, then switch to batch iteration mode.
    pub fn initialize(backend: B, config: SessionConfig) -> Result<Self, EngineError> {
        let backend = Arc::new(backend);

        scene::build_demo_scene(backend.as_ref(), &config.mesh_path)?;

        let raw = backend.create_frame_buffer(config.width, config.height)?;
        let resolved = backend.create_frame_buffer(config.width, config.height)?;
        backend.set_color_output(raw)?;

        let signal = Arc::new(ProgressSignal::default());
        let callback_signal = Arc::clone(&signal);
        backend.set_progress_callback(Box::new(move |x| callback_signal.notify_update(x)))?;

        // Warm-up: one blocking iteration primes the SDK's kernels before
        // the interactive loop starts.
        backend.set_batch_iterations(1)?;
        backend.render()?;
        signal.clear();
        backend.set_batch_iterations(config.batch_size)?;

        let render_lock = Arc::new(Mutex::new(()));
        let worker = RenderWorker::spawn(
            Arc::clone(&backend),
            Arc::clone(&render_lock),
            Arc::clone(&signal),
        )?;

        let staging = vec![0.0; config.width as usize * config.height as usize * RGBA_CHANNELS];

        log::info!(
            "render session up: {}x{}, {} iterations per batch, {} batches max",
            config.width,
            config.height,
            config.batch_size,
            config.max_samples
        );

        Ok(RenderSession {
            backend,
            render_lock,
            signal,
            worker,
            raw,
            resolved,
            staging,
            width: config.width,
            height: config.height,
            progress: ProgressState::new(config.min_samples, config.max_samples),
            batch_in_flight: false,
        })
    }

    pub fn progress(&self) -> &ProgressState {
        &self.progress
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// CPU-side frame copy size, in f32 samples. Always `width * height * 4`.
    pub fn staging_len(&self) -> usize {
        self.staging.len()
    }

    /// Per-frame driver. Submits one batch to the worker (unless accumulation
    /// is complete), waits for it, and publishes at most one resolved frame
    /// into the display target even if several progress callbacks fired.
    /// The batch is always finished by the time this returns.
    pub fn advance_one_batch(
        &mut self,
        target: &mut dyn DisplayTarget,
    ) -> Result<BatchOutcome, EngineError> {
        if !self.batch_in_flight {
            if !self.progress.needs_more() {
                return Ok(BatchOutcome::Idle);
            }
            self.signal.clear();
            self.worker.submit()?;
            self.batch_in_flight = true;
        }

        let mut published = false;
        loop {
            let (take_update, done, error) = self.signal.wait_event(published);
            if let Some(err) = error {
                self.batch_in_flight = false;
                return Err(err.into());
            }
            if take_update {
                self.publish_frame(target)?;
                self.progress.record_batch();
                published = true;
            }
            if done {
                break;
            }
        }
        self.batch_in_flight = false;

        Ok(if published {
            BatchOutcome::Published
        } else {
            BatchOutcome::Silent
        })
    }

    /// Resolve, validate, copy, upload. Holds the render lock for the whole
    /// sequence so the accumulation buffer is never resolved mid-render.
    fn publish_frame(&mut self, target: &mut dyn DisplayTarget) -> Result<(), EngineError> {
        let _guard = self
            .render_lock
            .lock()
            .map_err(|_| EngineError::WorkerGone)?;

        self.backend.resolve(self.raw, self.resolved)?;

        let expected = self.staging.len() * std::mem::size_of::<f32>();
        let actual = self.backend.frame_buffer_len(self.resolved)?;
        if actual != expected {
            return Err(EngineError::FrameSizeMismatch { expected, actual });
        }

        self.backend.read_frame_buffer(self.resolved, &mut self.staging)?;
        target.upload(self.width, self.height, &self.staging);
        Ok(())
    }

    /// Recreate both frame buffers and the display texture at the new size
    /// and restart accumulation. Never called with a batch in flight;
    /// `advance_one_batch` always drains the current one before returning.
    pub fn resize(
        &mut self,
        width: u32,
        height: u32,
        target: &mut dyn DisplayTarget,
    ) -> Result<(), EngineError> {
        debug_assert!(!self.batch_in_flight);
        debug_assert!(width > 0 && height > 0);

        self.backend.destroy_frame_buffer(self.raw)?;
        self.backend.destroy_frame_buffer(self.resolved)?;
        self.raw = self.backend.create_frame_buffer(width, height)?;
        self.resolved = self.backend.create_frame_buffer(width, height)?;
        self.backend.set_color_output(self.raw)?;

        self.staging = vec![0.0; width as usize * height as usize * RGBA_CHANNELS];
        self.width = width;
        self.height = height;
        target.recreate(width, height);
        self.mark_dirty();

        log::info!("render target resized to {width}x{height}");
        Ok(())
    }

    /// Restart accumulation from sample 1.
    pub fn mark_dirty(&mut self) {
        self.progress.reset();
    }

    /// Join the worker, delete both frame buffers, then run the SDK's
    /// garbage collector and leak check.
    pub fn shutdown(mut self) -> Result<(), EngineError> {
        self.worker.stop();

        self.backend.destroy_frame_buffer(self.raw)?;
        self.backend.destroy_frame_buffer(self.resolved)?;
        self.backend.collect_garbage()?;
        self.backend.check_leaks()?;

        log::info!("render session shut down");
        Ok(())
    }
}
