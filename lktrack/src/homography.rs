use crate::geometry::Point;

/// Row-major 3×3 matrix.
pub type Mat3 = [[f32; 3]; 3];

pub const IDENTITY: Mat3 = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];

/// Projective normalizations smaller than this are treated as degenerate.
pub const MIN_PROJECTIVE_NORMALIZATION: f32 = 1e-6;

pub fn mat3_mul(a: &Mat3, b: &Mat3) -> Mat3 {
    let mut c = [[0.0; 3]; 3];
    for i in 0..3 {
        for j in 0..3 {
            c[i][j] = a[i][0] * b[0][j] + a[i][1] * b[1][j] + a[i][2] * b[2][j];
        }
    }
    c
}

/// Analytic 3×3 inverse, or `None` for a (nearly) singular matrix.
pub fn mat3_inverse(m: &Mat3) -> Option<Mat3> {
    let m: [[f64; 3]; 3] = m.map(|r| r.map(f64::from));
    let det = m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
        - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
        + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0]);

    if det.abs() < 1e-12 || !det.is_finite() {
        return None;
    }

    let inv_det = 1.0 / det;
    let inv = [
        [
            (m[1][1] * m[2][2] - m[1][2] * m[2][1]) * inv_det,
            (m[0][2] * m[2][1] - m[0][1] * m[2][2]) * inv_det,
            (m[0][1] * m[1][2] - m[0][2] * m[1][1]) * inv_det,
        ],
        [
            (m[1][2] * m[2][0] - m[1][0] * m[2][2]) * inv_det,
            (m[0][0] * m[2][2] - m[0][2] * m[2][0]) * inv_det,
            (m[0][2] * m[1][0] - m[0][0] * m[1][2]) * inv_det,
        ],
        [
            (m[1][0] * m[2][1] - m[1][1] * m[2][0]) * inv_det,
            (m[0][1] * m[2][0] - m[0][0] * m[2][1]) * inv_det,
            (m[0][0] * m[1][1] - m[0][1] * m[1][0]) * inv_det,
        ],
    ];
    Some(inv.map(|r| r.map(|v| v as f32)))
}

/// Divide every element by `m[2][2]`.
pub fn normalize(m: &Mat3) -> Mat3 {
    let s = m[2][2];
    m.map(|r| r.map(|v| v / s))
}

/// Apply a homography to `(x, y)`, or `None` if the normalization is degenerate.
#[inline]
pub fn project(h: &Mat3, x: f32, y: f32) -> Option<(f32, f32)> {
    let n = h[2][0] * x + h[2][1] * y + h[2][2];
    if n.abs() < MIN_PROJECTIVE_NORMALIZATION {
        return None;
    }
    let px = (h[0][0] * x + h[0][1] * y + h[0][2]) / n;
    let py = (h[1][0] * x + h[1][1] * y + h[1][2]) / n;
    Some((px, py))
}

/// Homography mapping each `from[i]` onto `to[i]`, with `h22 = 1`.
///
/// Solves the 8×9 DLT system by Gaussian elimination with partial pivoting.
/// Returns `None` when the correspondences are degenerate.
pub fn estimate_homography(from: &[Point<f32>; 4], to: &[Point<f32>; 4]) -> Option<Mat3> {
    let mut a = [[0.0f64; 9]; 8];
    for i in 0..4 {
        let (tx, ty) = (from[i].x as f64, from[i].y as f64);
        let (px, py) = (to[i].x as f64, to[i].y as f64);

        let row0 = i * 2;
        a[row0][0] = tx;
        a[row0][1] = ty;
        a[row0][2] = 1.0;
        a[row0][6] = -tx * px;
        a[row0][7] = -ty * px;
        a[row0][8] = px;

        let row1 = i * 2 + 1;
        a[row1][3] = tx;
        a[row1][4] = ty;
        a[row1][5] = 1.0;
        a[row1][6] = -tx * py;
        a[row1][7] = -ty * py;
        a[row1][8] = py;
    }

    for col in 0..8 {
        let mut max_val = a[col][col].abs();
        let mut max_row = col;
        for row in (col + 1)..8 {
            let v = a[row][col].abs();
            if v > max_val {
                max_val = v;
                max_row = row;
            }
        }
        if max_val < 1e-10 {
            return None;
        }
        if max_row != col {
            a.swap(col, max_row);
        }

        let pivot = a[col][col];
        for row in (col + 1)..8 {
            let factor = a[row][col] / pivot;
            for c in col..9 {
                a[row][c] -= factor * a[col][c];
            }
        }
    }

    // Back-substitute with h[8] = 1
    let mut h = [0.0f64; 9];
    h[8] = 1.0;
    for row in (0..8).rev() {
        let mut sum = a[row][8];
        for c in (row + 1)..8 {
            sum -= a[row][c] * h[c];
        }
        h[row] = sum / a[row][row];
    }

    if h.iter().any(|v| !v.is_finite()) {
        return None;
    }
    Some([
        [h[0] as f32, h[1] as f32, h[2] as f32],
        [h[3] as f32, h[4] as f32, h[5] as f32],
        [h[6] as f32, h[7] as f32, h[8] as f32],
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pts(v: [[f32; 2]; 4]) -> [Point<f32>; 4] {
        v.map(|p| Point::new(p[0], p[1]))
    }

    #[test]
    fn estimate_maps_all_corners() {
        let from = pts([[-1.0, -1.0], [1.0, -1.0], [1.0, 1.0], [-1.0, 1.0]]);
        let to = pts([[10.0, 20.0], [90.0, 15.0], [95.0, 85.0], [5.0, 90.0]]);
        let h = estimate_homography(&from, &to).unwrap();
        for i in 0..4 {
            let (px, py) = project(&h, from[i].x, from[i].y).unwrap();
            assert!(
                (px - to[i].x).abs() < 1e-3 && (py - to[i].y).abs() < 1e-3,
                "corner {i}: got ({px}, {py})"
            );
        }
    }

    #[test]
    fn inverse_roundtrip() {
        let h = [[1.2, 0.1, 5.0], [-0.2, 0.9, -3.0], [0.001, 0.002, 1.0]];
        let hinv = mat3_inverse(&h).unwrap();
        let (px, py) = project(&h, 12.0, -7.0).unwrap();
        let (x, y) = project(&hinv, px, py).unwrap();
        assert!((x - 12.0).abs() < 1e-3, "x={x}");
        assert!((y + 7.0).abs() < 1e-3, "y={y}");

        let id = mat3_mul(&h, &hinv);
        for i in 0..3 {
            for j in 0..3 {
                assert!((id[i][j] - IDENTITY[i][j]).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn degenerate_inputs() {
        let same = pts([[5.0, 5.0]; 4]);
        assert!(estimate_homography(&same, &same).is_none());
        assert!(mat3_inverse(&[[1.0, 2.0, 3.0], [2.0, 4.0, 6.0], [0.0, 0.0, 1.0]]).is_none());
        assert!(project(&[[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 0.0]], 1.0, 1.0).is_none());
    }
}
