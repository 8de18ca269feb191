use std::ops::{Index, IndexMut, Mul};

use super::Vec3;

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Matrix4x4 {
    // row-major
    pub data: [[f32; 4]; 4],
}

impl Index<usize> for Matrix4x4 {
    type Output = f32;

    fn index(&self, index: usize) -> &f32 {
        &self.data[index / 4][index % 4]
    }
}

impl IndexMut<usize> for Matrix4x4 {
    fn index_mut(&mut self, index: usize) -> &mut f32 {
        &mut self.data[index / 4][index % 4]
    }
}

impl Matrix4x4 {
    pub fn identity() -> Self {
        Matrix4x4 {
            data: [
                [1.0, 0.0, 0.0, 0.0],
                [0.0, 1.0, 0.0, 0.0],
                [0.0, 0.0, 1.0, 0.0],
                [0.0, 0.0, 0.0, 1.0],
            ],
        }
    }

    pub fn translation(direction: Vec3) -> Matrix4x4 {
        let mut me = Self::identity();
        me.data[0][3] = direction.0;
        me.data[1][3] = direction.1;
        me.data[2][3] = direction.2;
        me
    }

    pub fn scale(scale: Vec3) -> Matrix4x4 {
        let mut me = Self::identity();
        me.data[0][0] = scale.0;
        me.data[1][1] = scale.1;
        me.data[2][2] = scale.2;
        me
    }

    // rotate theta counterclockwise about a unit axis, right-handed
    pub fn rotation(theta: f32, axis: Vec3) -> Matrix4x4 {
        let Vec3(x, y, z) = Vec3::normalized(axis);
        let (s, c) = theta.sin_cos();
        let t = 1.0 - c;
        Matrix4x4 {
            data: [
                [t * x * x + c, t * x * y - s * z, t * x * z + s * y, 0.0],
                [t * x * y + s * z, t * y * y + c, t * y * z - s * x, 0.0],
                [t * x * z - s * y, t * y * z + s * x, t * z * z + c, 0.0],
                [0.0, 0.0, 0.0, 1.0],
            ],
        }
    }

    pub fn matmul(a: Matrix4x4, b: Matrix4x4) -> Self {
        let mut m = Matrix4x4::identity();
        for i in 0..4 {
            for j in 0..4 {
                let mut dot = 0.0;
                for k in 0..4 {
                    dot += a.data[i][k] * b.data[k][j];
                }
                m.data[i][j] = dot;
            }
        }
        m
    }

    pub fn apply_point(&self, p: Vec3) -> Vec3 {
        let m = &self.data;
        let w = m[3][0] * p.0 + m[3][1] * p.1 + m[3][2] * p.2 + m[3][3];
        Vec3(
            (m[0][0] * p.0 + m[0][1] * p.1 + m[0][2] * p.2 + m[0][3]) / w,
            (m[1][0] * p.0 + m[1][1] * p.1 + m[1][2] * p.2 + m[1][3]) / w,
            (m[2][0] * p.0 + m[2][1] * p.1 + m[2][2] * p.2 + m[2][3]) / w,
        )
    }

    /// Gauss-Jordan with partial pivoting; returns None for singular matrices.
    pub fn invert(&self) -> Option<Matrix4x4> {
        let mut a = *self;
        let mut inv = Matrix4x4::identity();

        for col in 0..4 {
            // pick the largest pivot in this column
            let mut pivot = col;
            for row in (col + 1)..4 {
                if a.data[row][col].abs() > a.data[pivot][col].abs() {
                    pivot = row;
                }
            }
            if a.data[pivot][col] == 0.0 {
                return None;
            }
            a.data.swap(col, pivot);
            inv.data.swap(col, pivot);

            let diag = a.data[col][col];
            for k in 0..4 {
                a.data[col][k] /= diag;
                inv.data[col][k] /= diag;
            }
            for row in 0..4 {
                if row == col {
                    continue;
                }
                let factor = a.data[row][col];
                for k in 0..4 {
                    a.data[row][k] -= factor * a.data[col][k];
                    inv.data[row][k] -= factor * inv.data[col][k];
                }
            }
        }

        Some(inv)
    }

    /// Row-major flattening, the layout descriptor records use.
    pub fn to_array(&self) -> [f32; 16] {
        let mut out = [0.0; 16];
        for i in 0..4 {
            out[i * 4..i * 4 + 4].copy_from_slice(&self.data[i]);
        }
        out
    }
}

impl Mul for Matrix4x4 {
    type Output = Matrix4x4;

    fn mul(self, rhs: Matrix4x4) -> Matrix4x4 {
        Matrix4x4::matmul(self, rhs)
    }
}

impl From<[f32; 16]> for Matrix4x4 {
    fn from(value: [f32; 16]) -> Self {
        let mut data = [[0.0; 4]; 4];
        for i in 0..4 {
            data[i].copy_from_slice(&value[i * 4..i * 4 + 4]);
        }
        Matrix4x4 { data }
    }
}
