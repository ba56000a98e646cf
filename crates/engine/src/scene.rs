//! The fixed demo scene: nine tinted teapots scattered on a floor under an
//! environment light. The first teapot is imported from the OBJ asset, the
//! other eight are instances of it.

use std::f32::consts::PI;
use std::path::Path;

use glam::{Mat4, Vec3};

use crate::backend::{SdkResult, ShapeId, TraceBackend};

pub const CAMERA_EYE: Vec3 = Vec3::new(4.0, 4.0, 15.0);
pub const CAMERA_TARGET: Vec3 = Vec3::new(1.5, 0.0, 0.0);
pub const ENV_LIGHT_INTENSITY: f32 = 0.8;
pub const FLOOR_EXTENT: f32 = 1.0;
pub const DISPLAY_GAMMA: f32 = 2.2;

/// Placement of one teapot: position on the floor, rotation around Y, and
/// a diffuse tint.
#[derive(Debug, Clone, Copy)]
pub struct TeapotDef {
    pub x: f32,
    pub z: f32,
    pub rot: f32,
    pub color: Vec3,
}

impl TeapotDef {
    fn new(x: f32, z: f32, rot: f32, r: f32, g: f32, b: f32) -> Self {
        TeapotDef {
            x,
            z,
            rot,
            color: Vec3::new(r / 255.0, g / 255.0, b / 255.0),
        }
    }
}

pub fn teapot_defs() -> [TeapotDef; 9] {
    [
        TeapotDef::new(5.0, 2.0, 1.6, 122.0, 63.0, 0.0), // brown
        TeapotDef::new(-5.0, 3.0, 5.6, 122.0, 0.0, 14.0),
        TeapotDef::new(0.0, -3.0, 3.2, 119.0, 0.0, 93.0),
        TeapotDef::new(1.0, 3.0, 1.2, 7.0, 0.0, 119.0),
        TeapotDef::new(3.0, 9.0, -1.7, 0.0, 59.0, 119.0),
        TeapotDef::new(-6.0, 12.0, 2.2, 0.0, 119.0, 99.0),
        TeapotDef::new(9.0, -6.0, 4.8, 0.0, 119.0, 1.0), // green
        TeapotDef::new(9.0, 7.0, 2.5, 219.0, 170.0, 0.0), // yellow
        TeapotDef::new(-9.0, -7.0, 5.8, 112.0, 216.0, 202.0),
    ]
}

/// World transform of teapot `i`. Every fourth pot sits upright (the mesh is
/// authored upside down, hence the X flip); the others are tipped over or
/// leaning in one of three fixed poses.
pub fn teapot_transform(i: usize, def: &TeapotDef) -> Mat4 {
    let place =
        Mat4::from_translation(Vec3::new(def.x, 0.0, def.z)) * Mat4::from_rotation_y(def.rot);

    match i % 4 {
        0 => place * Mat4::from_rotation_x(PI),
        1 => {
            place
                * Mat4::from_translation(Vec3::new(0.0, 2.65, 0.0))
                * Mat4::from_rotation_x(PI + 1.9)
                * Mat4::from_rotation_y(0.45)
        }
        2 => {
            place
                * Mat4::from_translation(Vec3::new(0.0, 2.65, 0.0))
                * Mat4::from_rotation_x(PI + 1.9)
                * Mat4::from_rotation_y(-0.57)
        }
        _ => {
            place
                * Mat4::from_translation(Vec3::new(0.0, 3.38, 0.0))
                * Mat4::from_rotation_x(0.42)
                * Mat4::from_rotation_z(-0.20)
        }
    }
}

/// Issue the scene-construction calls against the backend: camera, light,
/// teapots, floor, display gamma.
pub fn build_demo_scene<B: TraceBackend + ?Sized>(backend: &B, mesh_path: &Path) -> SdkResult<()> {
    backend.set_camera_look_at(CAMERA_EYE, CAMERA_TARGET, Vec3::Y)?;
    backend.create_env_light(ENV_LIGHT_INTENSITY)?;

    let mut master: Option<ShapeId> = None;
    for (i, def) in teapot_defs().iter().enumerate() {
        let shape = match master {
            None => {
                let imported = backend.import_mesh(mesh_path)?;
                master = Some(imported);
                imported
            }
            Some(of) => backend.create_instance(of)?,
        };
        backend.set_transform(shape, teapot_transform(i, def))?;
        backend.set_shape_color(shape, def.color)?;
    }

    backend.create_floor(FLOOR_EXTENT)?;
    backend.set_display_gamma(DISPLAY_GAMMA)?;
    Ok(())
}
