//! Stand-in backend so the demo runs without the proprietary SDK. It is not
//! a faithful renderer: teapots are shaded as their bounding spheres, the
//! floor is a checkered plane, and the environment light is an analytic sky.
//! What it does do faithfully is accumulate jittered samples per iteration,
//! fire the progress callback, and resolve with the display gamma, so the
//! whole session/display pipeline is exercised for real.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use glam::{Mat4, Vec3};
use obj::Obj;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::backend::{
    FrameBufferId, ProgressCallback, SdkError, SdkResult, ShapeId, TraceBackend,
};

const VERTICAL_FOV_DEG: f32 = 45.0;
const FLOOR_HALF_EXTENT_PER_UNIT: f32 = 20.0;

#[derive(Debug, Clone, Copy)]
struct Bounds {
    center: Vec3,
    radius: f32,
}

#[derive(Debug, Clone, Copy)]
struct SwShape {
    bounds: Bounds,
    transform: Mat4,
    color: Vec3,
}

#[derive(Debug, Clone)]
struct SwFrameBuffer {
    width: u32,
    height: u32,
    /// RGBA accumulation, `width * height * 4` f32s.
    data: Vec<f32>,
    samples: u32,
}

#[derive(Debug, Clone, Copy)]
struct SwCamera {
    eye: Vec3,
    target: Vec3,
    up: Vec3,
}

struct SwState {
    next_handle: u64,
    camera: SwCamera,
    env_intensity: f32,
    gamma: f32,
    batch_iterations: u32,
    color_output: Option<FrameBufferId>,
    floor_extent: Option<f32>,
    frame_buffers: HashMap<u64, SwFrameBuffer>,
    shapes: HashMap<u64, SwShape>,
}

impl SwState {
    fn fresh_handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }
}

/// Flattened scene snapshot traced without holding the state lock.
struct TraceScene {
    camera: SwCamera,
    env_intensity: f32,
    floor_half_extent: Option<f32>,
    /// (world center, world radius, albedo)
    spheres: Vec<(Vec3, f32, Vec3)>,
    width: u32,
    height: u32,
}

pub struct SoftwareTracer {
    state: Mutex<SwState>,
    callback: Mutex<Option<ProgressCallback>>,
}

impl Default for SoftwareTracer {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftwareTracer {
    pub fn new() -> Self {
        SoftwareTracer {
            state: Mutex::new(SwState {
                next_handle: 0,
                camera: SwCamera {
                    eye: Vec3::new(0.0, 1.0, 10.0),
                    target: Vec3::ZERO,
                    up: Vec3::Y,
                },
                env_intensity: 1.0,
                gamma: 1.0,
                batch_iterations: 1,
                color_output: None,
                floor_extent: None,
                frame_buffers: HashMap::new(),
                shapes: HashMap::new(),
            }),
            callback: Mutex::new(None),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, SwState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn snapshot(state: &SwState, fb: &SwFrameBuffer) -> TraceScene {
        let spheres = state
            .shapes
            .values()
            .map(|shape| {
                let center = shape.transform.transform_point3(shape.bounds.center);
                // conservative world radius under non-uniform scale
                let scale = shape
                    .transform
                    .x_axis
                    .truncate()
                    .length()
                    .max(shape.transform.y_axis.truncate().length())
                    .max(shape.transform.z_axis.truncate().length());
                (center, shape.bounds.radius * scale, shape.color)
            })
            .collect();

        TraceScene {
            camera: state.camera,
            env_intensity: state.env_intensity,
            floor_half_extent: state.floor_extent.map(|e| e * FLOOR_HALF_EXTENT_PER_UNIT),
            spheres,
            width: fb.width,
            height: fb.height,
        }
    }
}

impl TraceBackend for SoftwareTracer {
    fn create_frame_buffer(&self, width: u32, height: u32) -> SdkResult<FrameBufferId> {
        let mut state = self.lock_state();
        let handle = state.fresh_handle();
        state.frame_buffers.insert(
            handle,
            SwFrameBuffer {
                width,
                height,
                data: vec![0.0; width as usize * height as usize * 4],
                samples: 0,
            },
        );
        Ok(FrameBufferId(handle))
    }

    fn destroy_frame_buffer(&self, fb: FrameBufferId) -> SdkResult<()> {
        let mut state = self.lock_state();
        if state.color_output == Some(fb) {
            state.color_output = None;
        }
        state
            .frame_buffers
            .remove(&fb.0)
            .map(|_| ())
            .ok_or(SdkError::UnknownHandle(fb.0))
    }

    fn resolve(&self, src: FrameBufferId, dst: FrameBufferId) -> SdkResult<()> {
        let mut state = self.lock_state();
        let gamma = state.gamma;
        let source = state
            .frame_buffers
            .get(&src.0)
            .ok_or(SdkError::UnknownHandle(src.0))?
            .clone();
        let dest = state
            .frame_buffers
            .get_mut(&dst.0)
            .ok_or(SdkError::UnknownHandle(dst.0))?;
        if dest.data.len() != source.data.len() {
            return Err(SdkError::Status {
                call: "resolve",
                code: -2,
            });
        }

        let inv_samples = 1.0 / u32::max(source.samples, 1) as f32;
        let inv_gamma = 1.0 / gamma;
        for (out, chunk) in dest.data.chunks_exact_mut(4).zip(source.data.chunks_exact(4)) {
            for c in 0..3 {
                out[c] = (chunk[c] * inv_samples).max(0.0).powf(inv_gamma);
            }
            out[3] = 1.0;
        }
        dest.samples = source.samples;
        Ok(())
    }

    fn frame_buffer_len(&self, fb: FrameBufferId) -> SdkResult<usize> {
        let state = self.lock_state();
        let buffer = state
            .frame_buffers
            .get(&fb.0)
            .ok_or(SdkError::UnknownHandle(fb.0))?;
        Ok(buffer.data.len() * std::mem::size_of::<f32>())
    }

    fn read_frame_buffer(&self, fb: FrameBufferId, out: &mut [f32]) -> SdkResult<()> {
        let state = self.lock_state();
        let buffer = state
            .frame_buffers
            .get(&fb.0)
            .ok_or(SdkError::UnknownHandle(fb.0))?;
        if out.len() != buffer.data.len() {
            return Err(SdkError::Status {
                call: "read_frame_buffer",
                code: -2,
            });
        }
        out.copy_from_slice(&buffer.data);
        Ok(())
    }

    fn set_camera_look_at(&self, eye: Vec3, target: Vec3, up: Vec3) -> SdkResult<()> {
        self.lock_state().camera = SwCamera { eye, target, up };
        Ok(())
    }

    fn create_env_light(&self, intensity: f32) -> SdkResult<()> {
        self.lock_state().env_intensity = intensity;
        Ok(())
    }

    fn import_mesh(&self, path: &Path) -> SdkResult<ShapeId> {
        let model: Obj = Obj::load(path).map_err(|e| SdkError::MeshImport {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let positions = &model.data.position;
        if positions.is_empty() {
            return Err(SdkError::MeshImport {
                path: path.display().to_string(),
                reason: "mesh has no vertices".into(),
            });
        }

        let mut min = Vec3::splat(f32::INFINITY);
        let mut max = Vec3::splat(f32::NEG_INFINITY);
        for p in positions {
            let v = Vec3::from_array(*p);
            min = min.min(v);
            max = max.max(v);
        }
        let center = (min + max) * 0.5;
        let radius = positions
            .iter()
            .map(|p| (Vec3::from_array(*p) - center).length())
            .fold(0.0f32, f32::max);

        let mut state = self.lock_state();
        let handle = state.fresh_handle();
        state.shapes.insert(
            handle,
            SwShape {
                bounds: Bounds { center, radius },
                transform: Mat4::IDENTITY,
                color: Vec3::splat(0.75),
            },
        );
        log::debug!(
            "imported {} ({} vertices, bounding radius {radius:.2})",
            path.display(),
            positions.len()
        );
        Ok(ShapeId(handle))
    }

    fn create_instance(&self, of: ShapeId) -> SdkResult<ShapeId> {
        let mut state = self.lock_state();
        let master = *state
            .shapes
            .get(&of.0)
            .ok_or(SdkError::UnknownHandle(of.0))?;
        let handle = state.fresh_handle();
        state.shapes.insert(handle, master);
        Ok(ShapeId(handle))
    }

    fn set_transform(&self, shape: ShapeId, transform: Mat4) -> SdkResult<()> {
        self.lock_state()
            .shapes
            .get_mut(&shape.0)
            .map(|s| s.transform = transform)
            .ok_or(SdkError::UnknownHandle(shape.0))
    }

    fn set_shape_color(&self, shape: ShapeId, color: Vec3) -> SdkResult<()> {
        self.lock_state()
            .shapes
            .get_mut(&shape.0)
            .map(|s| s.color = color)
            .ok_or(SdkError::UnknownHandle(shape.0))
    }

    fn create_floor(&self, extent: f32) -> SdkResult<()> {
        self.lock_state().floor_extent = Some(extent);
        Ok(())
    }

    fn set_display_gamma(&self, gamma: f32) -> SdkResult<()> {
        self.lock_state().gamma = gamma.max(1e-3);
        Ok(())
    }

    fn set_color_output(&self, fb: FrameBufferId) -> SdkResult<()> {
        let mut state = self.lock_state();
        if !state.frame_buffers.contains_key(&fb.0) {
            return Err(SdkError::UnknownHandle(fb.0));
        }
        state.color_output = Some(fb);
        Ok(())
    }

    fn set_batch_iterations(&self, iterations: u32) -> SdkResult<()> {
        self.lock_state().batch_iterations = u32::max(iterations, 1);
        Ok(())
    }

    fn set_progress_callback(&self, callback: ProgressCallback) -> SdkResult<()> {
        match self.callback.lock() {
            Ok(mut slot) => *slot = Some(callback),
            Err(poisoned) => *poisoned.into_inner() = Some(callback),
        }
        Ok(())
    }

    fn render(&self) -> SdkResult<()> {
        let (scene, iterations, fb_id, base_sample) = {
            let state = self.lock_state();
            let fb_id = state.color_output.ok_or(SdkError::Status {
                call: "render",
                code: -1,
            })?;
            let fb = state
                .frame_buffers
                .get(&fb_id.0)
                .ok_or(SdkError::UnknownHandle(fb_id.0))?;
            (
                Self::snapshot(&state, fb),
                state.batch_iterations,
                fb_id,
                fb.samples,
            )
        };

        for it in 0..iterations {
            let frame = trace_iteration(&scene, u64::from(base_sample + it));

            let mut state = self.lock_state();
            if let Some(fb) = state.frame_buffers.get_mut(&fb_id.0) {
                if fb.data.len() == frame.len() {
                    for (acc, sample) in fb.data.iter_mut().zip(&frame) {
                        *acc += sample;
                    }
                    fb.samples += 1;
                }
            }
            drop(state);

            let callback = match self.callback.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if let Some(cb) = callback.as_ref() {
                cb((it + 1) as f32 / iterations as f32);
            }
        }
        Ok(())
    }

    fn collect_garbage(&self) -> SdkResult<()> {
        let mut state = self.lock_state();
        state.shapes.clear();
        state.floor_extent = None;
        Ok(())
    }

    fn check_leaks(&self) -> SdkResult<()> {
        let state = self.lock_state();
        let leaked = state.frame_buffers.len() + state.shapes.len();
        if leaked != 0 {
            return Err(SdkError::Status {
                call: "check_leaks",
                code: leaked as i32,
            });
        }
        Ok(())
    }
}

/// One jittered primary-ray sample per pixel, returned as RGBA.
fn trace_iteration(scene: &TraceScene, sample_index: u64) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(sample_index);
    let mut frame = Vec::with_capacity(scene.width as usize * scene.height as usize * 4);

    let forward = (scene.camera.target - scene.camera.eye).normalize();
    let right = forward.cross(scene.camera.up).normalize();
    let up = right.cross(forward);
    let tan_half = (VERTICAL_FOV_DEG.to_radians() * 0.5).tan();
    let aspect = scene.width as f32 / scene.height as f32;

    for y in 0..scene.height {
        for x in 0..scene.width {
            let jx: f32 = rng.gen();
            let jy: f32 = rng.gen();
            let sx = ((x as f32 + jx) / scene.width as f32 * 2.0 - 1.0) * tan_half * aspect;
            let sy = (1.0 - 2.0 * (y as f32 + jy) / scene.height as f32) * tan_half;
            let dir = (forward + right * sx + up * sy).normalize();

            let color = shade(scene, scene.camera.eye, dir, &mut rng);
            frame.extend_from_slice(&[color.x, color.y, color.z, 1.0]);
        }
    }
    frame
}

fn sun_dir() -> Vec3 {
    Vec3::new(0.35, 1.0, 0.25).normalize()
}

fn sky(dir: Vec3) -> Vec3 {
    let t = 0.5 * (dir.y + 1.0);
    Vec3::ONE.lerp(Vec3::new(0.45, 0.65, 1.0), t)
}

struct Hit {
    t: f32,
    normal: Vec3,
    albedo: Vec3,
}

fn intersect_sphere(origin: Vec3, dir: Vec3, center: Vec3, radius: f32) -> Option<f32> {
    let oc = origin - center;
    let b = oc.dot(dir);
    let c = oc.dot(oc) - radius * radius;
    let disc = b * b - c;
    if disc < 0.0 {
        return None;
    }
    let t = -b - disc.sqrt();
    (t > 1e-3).then_some(t)
}

fn hit_scene(scene: &TraceScene, origin: Vec3, dir: Vec3) -> Option<Hit> {
    let mut best: Option<Hit> = None;

    for &(center, radius, albedo) in &scene.spheres {
        if let Some(t) = intersect_sphere(origin, dir, center, radius) {
            if best.as_ref().map_or(true, |h| t < h.t) {
                let normal = (origin + dir * t - center) / radius;
                best = Some(Hit { t, normal, albedo });
            }
        }
    }

    if let Some(half) = scene.floor_half_extent {
        if dir.y < -1e-4 {
            let t = -origin.y / dir.y;
            let p = origin + dir * t;
            if t > 1e-3
                && p.x.abs() <= half
                && p.z.abs() <= half
                && best.as_ref().map_or(true, |h| t < h.t)
            {
                let shade = if (p.x.floor() as i64 + p.z.floor() as i64) & 1 == 0 {
                    0.55
                } else {
                    0.35
                };
                best = Some(Hit {
                    t,
                    normal: Vec3::Y,
                    albedo: Vec3::splat(shade),
                });
            }
        }
    }

    best
}

fn shade(scene: &TraceScene, origin: Vec3, dir: Vec3, rng: &mut StdRng) -> Vec3 {
    let Some(hit) = hit_scene(scene, origin, dir) else {
        return sky(dir) * scene.env_intensity;
    };

    let point = origin + dir * hit.t + hit.normal * 1e-3;

    // jittered sun direction so shadows soften as samples accumulate
    let jitter = Vec3::new(
        rng.gen::<f32>() - 0.5,
        rng.gen::<f32>() - 0.5,
        rng.gen::<f32>() - 0.5,
    ) * 0.16;
    let light = (sun_dir() + jitter).normalize();

    let shadowed = scene
        .spheres
        .iter()
        .any(|&(center, radius, _)| intersect_sphere(point, light, center, radius).is_some());

    let direct = hit.normal.dot(light).max(0.0) * if shadowed { 0.15 } else { 1.0 };
    let ambient = 0.3 * scene.env_intensity * (0.5 * (hit.normal.y + 1.0));

    hit.albedo * (direct * scene.env_intensity + ambient)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::TraceBackend;

    #[test]
    fn resolve_averages_accumulation() {
        let tracer = SoftwareTracer::new();
        tracer.set_camera_look_at(Vec3::new(0.0, 2.0, 8.0), Vec3::ZERO, Vec3::Y).unwrap();
        tracer.create_env_light(0.8).unwrap();
        tracer.create_floor(1.0).unwrap();
        tracer.set_display_gamma(2.2).unwrap();

        let raw = tracer.create_frame_buffer(16, 8).unwrap();
        let resolved = tracer.create_frame_buffer(16, 8).unwrap();
        tracer.set_color_output(raw).unwrap();
        tracer.set_batch_iterations(4).unwrap();
        tracer.render().unwrap();
        tracer.resolve(raw, resolved).unwrap();

        assert_eq!(tracer.frame_buffer_len(resolved).unwrap(), 16 * 8 * 4 * 4);

        let mut pixels = vec![0.0f32; 16 * 8 * 4];
        tracer.read_frame_buffer(resolved, &mut pixels).unwrap();
        for chunk in pixels.chunks_exact(4) {
            // averaged and gamma-corrected sky/floor stays in display range
            assert!(chunk[..3].iter().all(|c| (0.0..=1.5).contains(c)));
            assert_eq!(chunk[3], 1.0);
        }
    }

    #[test]
    fn progress_callback_fires_once_per_iteration() {
        use std::sync::atomic::{AtomicU32, Ordering};
        use std::sync::Arc;

        let tracer = SoftwareTracer::new();
        let raw = tracer.create_frame_buffer(4, 4).unwrap();
        tracer.set_color_output(raw).unwrap();
        tracer.set_batch_iterations(3).unwrap();

        let fired = Arc::new(AtomicU32::new(0));
        let fired_in_cb = Arc::clone(&fired);
        tracer
            .set_progress_callback(Box::new(move |_| {
                fired_in_cb.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();

        tracer.render().unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn leak_check_reports_outstanding_handles() {
        let tracer = SoftwareTracer::new();
        let fb = tracer.create_frame_buffer(4, 4).unwrap();
        assert!(tracer.check_leaks().is_err());
        tracer.destroy_frame_buffer(fb).unwrap();
        tracer.collect_garbage().unwrap();
        tracer.check_leaks().unwrap();
    }
}
