mod matrix4x4;
mod quaternion;
mod transform;
mod vec;

pub use matrix4x4::Matrix4x4;
pub use quaternion::Quaternion;
pub use transform::StaticTransform;
pub use vec::{Vec2, Vec3, Vec4};
