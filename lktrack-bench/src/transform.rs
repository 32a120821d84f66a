/// Frame-to-frame motions applied to a synthetic scene.
///
/// Every motion maps a point of the **template frame** to where it appears in
/// the **next frame**, both in pixel coordinates. Similarity motions act about
/// a fixed pivot so that rotation and scale do not drag the target away.
use serde::{Deserialize, Serialize};

/// A motion from the template frame to the next frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Motion {
    /// Pure shift in pixels.
    Translation { dx: f64, dy: f64 },

    /// Rotate by `theta` and scale about `pivot`, then shift.
    Similarity {
        pivot: [f64; 2],
        dx: f64,
        dy: f64,
        scale: f64,
        /// In-plane rotation in radians.
        theta: f64,
    },

    /// Full projective motion via a 3×3 homography (row-major).
    Perspective {
        /// Homography matrix entries [h00, h01, h02, h10, h11, h12, h20, h21, h22].
        h: [f64; 9],
    },
}

impl Motion {
    pub fn identity() -> Self {
        Motion::Translation { dx: 0.0, dy: 0.0 }
    }

    /// Row-major homography of the motion.
    pub fn homography(&self) -> [f64; 9] {
        match self {
            Motion::Translation { dx, dy } => [1.0, 0.0, *dx, 0.0, 1.0, *dy, 0.0, 0.0, 1.0],
            Motion::Similarity {
                pivot,
                dx,
                dy,
                scale,
                theta,
            } => {
                let (sin, cos) = theta.sin_cos();
                let (a, b) = (scale * cos, -scale * sin);
                let (c, d) = (scale * sin, scale * cos);
                // x' = A (x - p) + p + t
                let tx = pivot[0] - a * pivot[0] - b * pivot[1] + dx;
                let ty = pivot[1] - c * pivot[0] - d * pivot[1] + dy;
                [a, b, tx, c, d, ty, 0.0, 0.0, 1.0]
            }
            Motion::Perspective { h } => *h,
        }
    }

    /// Where template-frame point `(x, y)` lands in the next frame.
    pub fn project(&self, x: f64, y: f64) -> (f64, f64) {
        apply_homography(&self.homography(), x, y)
    }

    /// Project four corners.
    pub fn project_corners(&self, corners: &[[f64; 2]; 4]) -> [[f64; 2]; 4] {
        corners.map(|[x, y]| {
            let (px, py) = self.project(x, y);
            [px, py]
        })
    }
}

pub(crate) fn apply_homography(h: &[f64; 9], x: f64, y: f64) -> (f64, f64) {
    let w = h[6] * x + h[7] * y + h[8];
    ((h[0] * x + h[1] * y + h[2]) / w, (h[3] * x + h[4] * y + h[5]) / w)
}

/// Invert a 3×3 matrix given as a row-major array.
pub(crate) fn invert_3x3(m: &[f64; 9]) -> [f64; 9] {
    let det = m[0] * (m[4] * m[8] - m[5] * m[7]) - m[1] * (m[3] * m[8] - m[5] * m[6])
        + m[2] * (m[3] * m[7] - m[4] * m[6]);

    let inv_det = 1.0 / det;

    [
        (m[4] * m[8] - m[5] * m[7]) * inv_det,
        (m[2] * m[7] - m[1] * m[8]) * inv_det,
        (m[1] * m[5] - m[2] * m[4]) * inv_det,
        (m[5] * m[6] - m[3] * m[8]) * inv_det,
        (m[0] * m[8] - m[2] * m[6]) * inv_det,
        (m[2] * m[3] - m[0] * m[5]) * inv_det,
        (m[3] * m[7] - m[4] * m[6]) * inv_det,
        (m[1] * m[6] - m[0] * m[7]) * inv_det,
        (m[0] * m[4] - m[1] * m[3]) * inv_det,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn translation_shifts_points() {
        let m = Motion::Translation { dx: 2.5, dy: -1.0 };
        let (x, y) = m.project(10.0, 20.0);
        assert!(approx_eq(x, 12.5) && approx_eq(y, 19.0));
    }

    #[test]
    fn similarity_keeps_pivot_fixed() {
        let m = Motion::Similarity {
            pivot: [50.0, 40.0],
            dx: 0.0,
            dy: 0.0,
            scale: 1.2,
            theta: 0.3,
        };
        let (x, y) = m.project(50.0, 40.0);
        assert!(approx_eq(x, 50.0) && approx_eq(y, 40.0), "({x}, {y})");
    }

    #[test]
    fn similarity_rotation_90() {
        let m = Motion::Similarity {
            pivot: [0.0, 0.0],
            dx: 1.0,
            dy: 0.0,
            scale: 1.0,
            theta: std::f64::consts::FRAC_PI_2,
        };
        let (x, y) = m.project(1.0, 0.0);
        assert!(approx_eq(x, 1.0) && approx_eq(y, 1.0), "({x}, {y})");
    }

    #[test]
    fn invert_round_trips_a_perspective_point() {
        let h = [1.1, 0.05, 3.0, -0.02, 0.97, -2.0, 0.0004, -0.0002, 1.0];
        let inv = invert_3x3(&h);
        let (x, y) = apply_homography(&h, 40.0, 25.0);
        let (bx, by) = apply_homography(&inv, x, y);
        assert!((bx - 40.0).abs() < 1e-9 && (by - 25.0).abs() < 1e-9);
    }
}
