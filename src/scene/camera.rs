use bytemuck::{Pod, Zeroable};

use crate::backend::ProcedureId;
use crate::geometry::{Quaternion, Vec3};

/// Camera model handed to `Context::render`. The host only plumbs these
/// parameters through; ray generation happens in the engine kernels.
#[derive(Clone, Copy, Debug)]
pub enum Camera {
    Perspective {
        position: Vec3,
        orientation: Quaternion,
        aspect: f32,
        fov_y: f32,
        lens_radius: f32,
        image_plane_distance: f32,
        object_plane_distance: f32,
    },
}

/// Flat camera record written to the engine-side camera buffer each launch.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct CameraDescriptor {
    pub position: Vec3,
    /// Scalar-first quaternion.
    pub orientation: [f32; 4],
    pub aspect: f32,
    pub fov_y: f32,
    pub lens_radius: f32,
    pub image_plane_distance: f32,
    pub object_plane_distance: f32,
    /// Dispatch ids filled in by the context from its camera registration.
    pub prog_sample_lens_position: ProcedureId,
    pub prog_sample_idf: ProcedureId,
}

impl Camera {
    pub fn to_descriptor(&self) -> CameraDescriptor {
        match *self {
            Camera::Perspective {
                position,
                orientation,
                aspect,
                fov_y,
                lens_radius,
                image_plane_distance,
                object_plane_distance,
            } => {
                let u = orientation.pure();
                CameraDescriptor {
                    position,
                    orientation: [orientation.real(), u.x(), u.y(), u.z()],
                    aspect,
                    fov_y,
                    lens_radius,
                    image_plane_distance,
                    object_plane_distance,
                    ..CameraDescriptor::default()
                }
            }
        }
    }
}
