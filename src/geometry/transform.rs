use super::{Matrix4x4, Vec3};

/// A static local-to-world transform carrying its inverse alongside.
///
/// The inverse is needed by the execution engine for normal transformation
/// under non-uniform scale, so it is kept exact rather than recomputed from
/// the composed forward matrix.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StaticTransform {
    forward: Matrix4x4,
    inverse: Matrix4x4,
}

impl StaticTransform {
    pub fn identity() -> Self {
        StaticTransform {
            forward: Matrix4x4::identity(),
            inverse: Matrix4x4::identity(),
        }
    }

    pub fn translate(direction: Vec3) -> Self {
        StaticTransform {
            forward: Matrix4x4::translation(direction),
            inverse: Matrix4x4::translation(-direction),
        }
    }

    pub fn scale(scale: Vec3) -> Self {
        StaticTransform {
            forward: Matrix4x4::scale(scale),
            inverse: Matrix4x4::scale(Vec3(1.0 / scale.0, 1.0 / scale.1, 1.0 / scale.2)),
        }
    }

    pub fn rotate(theta: f32, axis: Vec3) -> Self {
        StaticTransform {
            forward: Matrix4x4::rotation(theta, axis),
            inverse: Matrix4x4::rotation(-theta, axis),
        }
    }

    pub fn forward(&self) -> &Matrix4x4 {
        &self.forward
    }

    pub fn inverse(&self) -> &Matrix4x4 {
        &self.inverse
    }

    /// self applied after other: (self * other)(p) == self(other(p))
    pub fn compose(&self, other: &StaticTransform) -> StaticTransform {
        StaticTransform {
            forward: Matrix4x4::matmul(self.forward, other.forward),
            inverse: Matrix4x4::matmul(other.inverse, self.inverse),
        }
    }

    pub fn apply_point(&self, point: Vec3) -> Vec3 {
        self.forward.apply_point(point)
    }
}

impl From<Matrix4x4> for StaticTransform {
    fn from(value: Matrix4x4) -> Self {
        StaticTransform {
            forward: value,
            inverse: value.invert().expect("transform matrix must be invertible"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compose_applies_right_to_left() {
        let t = StaticTransform::translate(Vec3(1.0, 0.0, 0.0));
        let s = StaticTransform::scale(Vec3(2.0, 2.0, 2.0));

        // translate after scale
        let ts = t.compose(&s);
        assert_eq!(ts.apply_point(Vec3(1.0, 0.0, 0.0)), Vec3(3.0, 0.0, 0.0));

        // inverse undoes the composition
        let p = ts.inverse().apply_point(Vec3(3.0, 0.0, 0.0));
        assert_eq!(p, Vec3(1.0, 0.0, 0.0));
    }
}
