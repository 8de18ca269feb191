use std::ops::Mul;

use super::Vec3;

/// Unit quaternion for camera orientation. Scalar part first.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Quaternion(pub f32, pub Vec3);

impl Quaternion {
    pub fn identity() -> Quaternion {
        Quaternion(1.0, Vec3::zero())
    }

    pub fn from_axis_angle(axis: Vec3, angle: f32) -> Quaternion {
        let axis = Vec3::normalized(axis);
        let (s, c) = (angle / 2.0).sin_cos();
        Quaternion(c, axis * s)
    }

    pub fn real(&self) -> f32 {
        self.0
    }

    pub fn pure(&self) -> Vec3 {
        self.1
    }

    pub fn rotate(&self, v: Vec3) -> Vec3 {
        // v' = v + 2u x (u x v + w v)
        let u = self.1;
        let t = Vec3::cross(u, v) * 2.0;
        v + t * self.0 + Vec3::cross(u, t)
    }
}

impl Mul for Quaternion {
    type Output = Quaternion;

    fn mul(self, rhs: Quaternion) -> Quaternion {
        let (w1, v1) = (self.0, self.1);
        let (w2, v2) = (rhs.0, rhs.1);
        Quaternion(
            w1 * w2 - Vec3::dot(v1, v2),
            v2 * w1 + v1 * w2 + Vec3::cross(v1, v2),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f32 = 1e-5;

    fn assert_vec3_approx_eq(a: Vec3, b: Vec3) {
        assert!((a.0 - b.0).abs() < EPSILON, "{:?} vs {:?}", a, b);
        assert!((a.1 - b.1).abs() < EPSILON, "{:?} vs {:?}", a, b);
        assert!((a.2 - b.2).abs() < EPSILON, "{:?} vs {:?}", a, b);
    }

    #[test]
    fn rotate_90_degrees_about_x() {
        let q = Quaternion::from_axis_angle(Vec3(1.0, 0.0, 0.0), std::f32::consts::FRAC_PI_2);
        assert_vec3_approx_eq(q.rotate(Vec3(0.0, 1.0, 0.0)), Vec3(0.0, 0.0, 1.0));
        assert_vec3_approx_eq(q.rotate(Vec3(0.0, 0.0, 1.0)), Vec3(0.0, -1.0, 0.0));
    }

    #[test]
    fn identity_rotation_is_noop() {
        let q = Quaternion::identity();
        let v = Vec3(1.0, 2.0, 3.0);
        assert_vec3_approx_eq(q.rotate(v), v);
    }
}
