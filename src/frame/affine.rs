//! 3D affine transforms stored as a 3×4 matrix (homogeneous row implied).

use serde::Serialize;

/// A 3D affine transform `x' = A·x + t`, stored row-major as `[A | t]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AffineTransform3D {
    m: [[f64; 4]; 3],
}

impl AffineTransform3D {
    pub fn identity() -> Self {
        Self::from_matrix([
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
        ])
    }

    pub fn from_matrix(m: [[f64; 4]; 3]) -> Self {
        Self { m }
    }

    /// Diagonal scaling.
    pub fn scale(s: [f64; 3]) -> Self {
        Self::from_matrix([
            [s[0], 0.0, 0.0, 0.0],
            [0.0, s[1], 0.0, 0.0],
            [0.0, 0.0, s[2], 0.0],
        ])
    }

    pub fn translation(t: [f64; 3]) -> Self {
        Self::from_matrix([
            [1.0, 0.0, 0.0, t[0]],
            [0.0, 1.0, 0.0, t[1]],
            [0.0, 0.0, 1.0, t[2]],
        ])
    }

    /// The 3×4 matrix.
    pub fn matrix(&self) -> [[f64; 4]; 3] {
        self.m
    }

    /// The full 4×4 homogeneous matrix.
    pub fn to_homogeneous(&self) -> [[f64; 4]; 4] {
        [self.m[0], self.m[1], self.m[2], [0.0, 0.0, 0.0, 1.0]]
    }

    /// `self ∘ other`: the transform that applies `other` first, then `self`.
    pub fn concatenate(&self, other: &AffineTransform3D) -> Self {
        let a = &self.m;
        let b = &other.m;
        let mut out = [[0.0; 4]; 3];
        for (r, row) in out.iter_mut().enumerate() {
            for c in 0..3 {
                row[c] = a[r][0] * b[0][c] + a[r][1] * b[1][c] + a[r][2] * b[2][c];
            }
            row[3] = a[r][0] * b[0][3] + a[r][1] * b[1][3] + a[r][2] * b[2][3] + a[r][3];
        }
        Self::from_matrix(out)
    }

    /// `other ∘ self`: apply `self` first, then `other`.
    pub fn then(&self, other: &AffineTransform3D) -> Self {
        other.concatenate(self)
    }

    /// Map a point.
    pub fn apply(&self, p: [f64; 3]) -> [f64; 3] {
        let m = &self.m;
        [
            m[0][0] * p[0] + m[0][1] * p[1] + m[0][2] * p[2] + m[0][3],
            m[1][0] * p[0] + m[1][1] * p[1] + m[1][2] * p[2] + m[1][3],
            m[2][0] * p[0] + m[2][1] * p[1] + m[2][2] * p[2] + m[2][3],
        ]
    }
}

impl Default for AffineTransform3D {
    fn default() -> Self {
        Self::identity()
    }
}
