//! Planar pose: rotation model, camera model and the initial pose solve
//! used to seed the 6-DoF tracker.
//!
//! Template points lie on the `z = 0` plane in millimetres, x right and y
//! down, so a fronto-parallel template has the identity rotation.

use crate::error::{Result, TrackerError};
use crate::geometry::{Point, Point3};
use crate::homography::estimate_homography;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Row-major 3×3 rotation.
pub type Rotation = [[f32; 3]; 3];

type Mat3d = [[f64; 3]; 3];

/// Pinhole intrinsics plus Brown-Conrady lens distortion.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CameraCalibration {
    pub focal_length_x: f32,
    pub focal_length_y: f32,
    pub center_x: f32,
    pub center_y: f32,
    /// `[k1, k2, p1, p2, k3]`
    pub distortion: [f32; 5],
}

impl CameraCalibration {
    pub fn new(focal_length_x: f32, focal_length_y: f32, center_x: f32, center_y: f32) -> Self {
        Self { focal_length_x, focal_length_y, center_x, center_y, distortion: [0.0; 5] }
    }

    pub fn with_distortion(mut self, distortion: [f32; 5]) -> Self {
        self.distortion = distortion;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.focal_length_x <= 0.0 || self.focal_length_y <= 0.0 {
            return Err(TrackerError::param("focal lengths must be greater than zero"));
        }
        Ok(())
    }

    /// Remove lens distortion from a pixel coordinate.
    ///
    /// Inverts the distortion model by fixed-point iteration in normalized
    /// coordinates, which converges for the mild distortion of small lenses.
    pub fn undistort(&self, p: Point<f32>) -> Point<f32> {
        let [k1, k2, p1, p2, k3] = self.distortion.map(f64::from);
        if k1 == 0.0 && k2 == 0.0 && p1 == 0.0 && p2 == 0.0 && k3 == 0.0 {
            return p;
        }
        let (fx, fy) = (self.focal_length_x as f64, self.focal_length_y as f64);
        let (cx, cy) = (self.center_x as f64, self.center_y as f64);
        let xd = (p.x as f64 - cx) / fx;
        let yd = (p.y as f64 - cy) / fy;

        let (mut x, mut y) = (xd, yd);
        for _ in 0..10 {
            let r2 = x * x + y * y;
            let radial = 1.0 + r2 * (k1 + r2 * (k2 + r2 * k3));
            let dx = 2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x);
            let dy = p1 * (r2 + 2.0 * y * y) + 2.0 * p2 * x * y;
            x = (xd - dx) / radial;
            y = (yd - dy) / radial;
        }
        Point::new((x * fx + cx) as f32, (y * fy + cy) as f32)
    }

    /// Project a camera-frame point to pixels, ignoring distortion.
    pub fn project(&self, p: &Point3<f32>) -> Option<Point<f32>> {
        if p.z.abs() < f32::EPSILON {
            return None;
        }
        Some(Point::new(
            self.focal_length_x * p.x / p.z + self.center_x,
            self.focal_length_y * p.y / p.z + self.center_y,
        ))
    }
}

/// Computes a template pose from four plane-to-image correspondences.
///
/// `plane` holds template points on `z = 0`; `image` their observed pixels.
pub trait PoseSolver {
    fn solve(
        &self,
        plane: &[Point3<f32>; 4],
        image: &[Point<f32>; 4],
        calibration: &CameraCalibration,
    ) -> Result<(Rotation, Point3<f32>)>;
}

/// Default [`PoseSolver`]: undistort, decompose the plane homography, then
/// polish with orthogonal iteration.
#[derive(Debug, Clone, Copy, Default)]
pub struct OrthogonalIterationSolver {
    pub iterations: u32,
}

impl PoseSolver for OrthogonalIterationSolver {
    fn solve(
        &self,
        plane: &[Point3<f32>; 4],
        image: &[Point<f32>; 4],
        calibration: &CameraCalibration,
    ) -> Result<(Rotation, Point3<f32>)> {
        calibration.validate()?;
        let undistorted = image.map(|p| calibration.undistort(p));
        let plane_2d = plane.map(|p| Point::new(p.x, p.y));

        let h = estimate_homography(&plane_2d, &undistorted)
            .ok_or_else(|| TrackerError::param("degenerate pose correspondences"))?;
        let h: Mat3d = h.map(|r| r.map(f64::from));
        let (r0, t0) = homography_to_pose(&h, calibration);

        let (fx, fy) = (calibration.focal_length_x as f64, calibration.focal_length_y as f64);
        let (cx, cy) = (calibration.center_x as f64, calibration.center_y as f64);
        let rays = undistorted.map(|p| [(p.x as f64 - cx) / fx, (p.y as f64 - cy) / fy, 1.0]);
        let pts = plane.map(|p| [p.x as f64, p.y as f64, p.z as f64]);

        let iterations = if self.iterations == 0 { 50 } else { self.iterations };
        let (r, t) = orthogonal_iteration(&rays, &pts, &r0, &t0, iterations);
        if t[2] <= 0.0 || !t[2].is_finite() || r.iter().flatten().any(|v| !v.is_finite()) {
            return Err(TrackerError::param("pose solve placed the template behind the camera"));
        }

        Ok((
            r.map(|row| row.map(|v| v as f32)),
            Point3::new(t[0] as f32, t[1] as f32, t[2] as f32),
        ))
    }
}

// ── rotation model ──

/// Rotation from the three tracker angles (radians).
pub fn rotation_from_euler(angle_x: f32, angle_y: f32, angle_z: f32) -> Rotation {
    let (sx, cx) = angle_x.sin_cos();
    let (sy, cy) = angle_y.sin_cos();
    let (sz, cz) = angle_z.sin_cos();
    [
        [cy * cz, cx * sz + sx * sy * cz, sx * sz - cx * sy * cz],
        [-cy * sz, cx * cz - sx * sy * sz, sx * cz + cx * sy * sz],
        [sy, -sx * cy, cx * cy],
    ]
}

/// Inverse of [`rotation_from_euler`]: returns `(angle_x, angle_y, angle_z)`.
///
/// At gimbal lock (`cos(angle_y) ≈ 0`) `angle_x` is fixed to zero.
pub fn euler_from_rotation(r: &Rotation) -> (f32, f32, f32) {
    let angle_y = r[2][0].clamp(-1.0, 1.0).asin();
    if angle_y.cos() > 1e-6 {
        let angle_x = (-r[2][1]).atan2(r[2][2]);
        let angle_z = (-r[1][0]).atan2(r[0][0]);
        (angle_x, angle_y, angle_z)
    } else {
        (0.0, angle_y, r[0][1].atan2(r[1][1]))
    }
}

/// Derivatives of the rotation entries used by the planar Jacobian, one
/// struct per angle. Entries that are identically zero for that angle are 0.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RotationDerivative {
    pub dr11: f32,
    pub dr12: f32,
    pub dr21: f32,
    pub dr22: f32,
    pub dr31: f32,
    pub dr32: f32,
}

/// `dR/dθx`, `dR/dθy`, `dR/dθz` (first two columns only).
pub fn rotation_derivatives(
    angle_x: f32,
    angle_y: f32,
    angle_z: f32,
) -> [RotationDerivative; 3] {
    let (sx, cx) = angle_x.sin_cos();
    let (sy, cy) = angle_y.sin_cos();
    let (sz, cz) = angle_z.sin_cos();
    let dx = RotationDerivative {
        dr12: -sx * sz + cx * sy * cz,
        dr22: -sx * cz - cx * sy * sz,
        dr32: -cx * cy,
        ..Default::default()
    };
    let dy = RotationDerivative {
        dr11: -sy * cz,
        dr12: sx * cy * cz,
        dr21: sy * sz,
        dr22: -sx * cy * sz,
        dr31: cy,
        dr32: sx * sy,
    };
    let dz = RotationDerivative {
        dr11: -cy * sz,
        dr12: cx * cz - sx * sy * sz,
        dr21: -cy * cz,
        dr22: -cx * sz - sx * sy * cz,
        ..Default::default()
    };
    [dx, dy, dz]
}

// ── 3x3 helpers ──

const IDENTITY_D: Mat3d = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];

fn mat_mul(a: &Mat3d, b: &Mat3d) -> Mat3d {
    let mut c = [[0.0; 3]; 3];
    for i in 0..3 {
        for j in 0..3 {
            c[i][j] = a[i][0] * b[0][j] + a[i][1] * b[1][j] + a[i][2] * b[2][j];
        }
    }
    c
}

fn mat_vec(m: &Mat3d, v: &[f64; 3]) -> [f64; 3] {
    [
        m[0][0] * v[0] + m[0][1] * v[1] + m[0][2] * v[2],
        m[1][0] * v[0] + m[1][1] * v[1] + m[1][2] * v[2],
        m[2][0] * v[0] + m[2][1] * v[1] + m[2][2] * v[2],
    ]
}

fn transpose(m: &Mat3d) -> Mat3d {
    [
        [m[0][0], m[1][0], m[2][0]],
        [m[0][1], m[1][1], m[2][1]],
        [m[0][2], m[1][2], m[2][2]],
    ]
}

fn det(m: &Mat3d) -> f64 {
    m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
        - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
        + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
}

fn inverse(m: &Mat3d) -> Option<Mat3d> {
    let d = det(m);
    if d.abs() < 1e-10 {
        return None;
    }
    let s = 1.0 / d;
    Some([
        [
            (m[1][1] * m[2][2] - m[1][2] * m[2][1]) * s,
            (m[0][2] * m[2][1] - m[0][1] * m[2][2]) * s,
            (m[0][1] * m[1][2] - m[0][2] * m[1][1]) * s,
        ],
        [
            (m[1][2] * m[2][0] - m[1][0] * m[2][2]) * s,
            (m[0][0] * m[2][2] - m[0][2] * m[2][0]) * s,
            (m[0][2] * m[1][0] - m[0][0] * m[1][2]) * s,
        ],
        [
            (m[1][0] * m[2][1] - m[1][1] * m[2][0]) * s,
            (m[0][1] * m[2][0] - m[0][0] * m[2][1]) * s,
            (m[0][0] * m[1][1] - m[0][1] * m[1][0]) * s,
        ],
    ])
}

fn norm(v: &[f64; 3]) -> f64 {
    (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt()
}

fn cross(a: &[f64; 3], b: &[f64; 3]) -> [f64; 3] {
    [a[1] * b[2] - a[2] * b[1], a[2] * b[0] - a[0] * b[2], a[0] * b[1] - a[1] * b[0]]
}

fn outer(a: &[f64; 3], b: &[f64; 3]) -> Mat3d {
    [
        [a[0] * b[0], a[0] * b[1], a[0] * b[2]],
        [a[1] * b[0], a[1] * b[1], a[1] * b[2]],
        [a[2] * b[0], a[2] * b[1], a[2] * b[2]],
    ]
}

/// SVD of a 3×3 matrix by Jacobi eigendecomposition of `MᵀM`:
/// `M = U diag(S) Vᵀ`, singular values in decreasing order.
fn svd_3x3(m: &Mat3d) -> (Mat3d, [f64; 3], Mat3d) {
    let mut ata = mat_mul(&transpose(m), m);
    let mut v = IDENTITY_D;

    for _ in 0..100 {
        let (mut p, mut q, mut max) = (0, 1, 0.0);
        for i in 0..3 {
            for j in (i + 1)..3 {
                if ata[i][j].abs() > max {
                    max = ata[i][j].abs();
                    p = i;
                    q = j;
                }
            }
        }
        if max < 1e-15 {
            break;
        }

        let theta = 0.5 * f64::atan2(2.0 * ata[p][q], ata[p][p] - ata[q][q]);
        let (s, c) = theta.sin_cos();

        let mut next = ata;
        for i in 0..3 {
            next[i][p] = c * ata[i][p] + s * ata[i][q];
            next[i][q] = -s * ata[i][p] + c * ata[i][q];
        }
        let tmp = next;
        for j in 0..3 {
            next[p][j] = c * tmp[p][j] + s * tmp[q][j];
            next[q][j] = -s * tmp[p][j] + c * tmp[q][j];
        }
        ata = next;

        let prev = v;
        for i in 0..3 {
            v[i][p] = c * prev[i][p] + s * prev[i][q];
            v[i][q] = -s * prev[i][p] + c * prev[i][q];
        }
    }

    let eig = [ata[0][0], ata[1][1], ata[2][2]];
    let mut order = [0usize, 1, 2];
    order.sort_by(|&a, &b| eig[b].total_cmp(&eig[a]));
    let sigma = order.map(|i| eig[i].max(0.0).sqrt());

    let mut vs = [[0.0; 3]; 3];
    for i in 0..3 {
        for j in 0..3 {
            vs[i][j] = v[i][order[j]];
        }
    }
    if det(&vs) < 0.0 {
        for row in &mut vs {
            row[2] = -row[2];
        }
    }

    let mv = mat_mul(m, &vs);
    let mut u = [[0.0; 3]; 3];
    for j in 0..3 {
        if sigma[j] > 1e-10 {
            for i in 0..3 {
                u[i][j] = mv[i][j] / sigma[j];
            }
        }
    }
    // rank-deficient: complete U to an orthonormal basis
    if sigma[2] < 1e-10 {
        let u0 = [u[0][0], u[1][0], u[2][0]];
        let mut u1 = [u[0][1], u[1][1], u[2][1]];
        if sigma[1] < 1e-10 {
            let perp = if u0[0].abs() < 0.9 { [1.0, 0.0, 0.0] } else { [0.0, 1.0, 0.0] };
            let raw = cross(&u0, &perp);
            let n = norm(&raw);
            if n > 1e-10 {
                u1 = raw.map(|v| v / n);
                for i in 0..3 {
                    u[i][1] = u1[i];
                }
            }
        }
        let u2 = cross(&u0, &u1);
        for i in 0..3 {
            u[i][2] = u2[i];
        }
    }
    (u, sigma, vs)
}

/// Nearest rotation to `m` in the Frobenius sense.
fn project_to_so3(m: &Mat3d) -> Mat3d {
    let (mut u, _, v) = svd_3x3(m);
    let vt = transpose(&v);
    let r = mat_mul(&u, &vt);
    if det(&r) >= 0.0 {
        return r;
    }
    for row in &mut u {
        row[2] = -row[2];
    }
    mat_mul(&u, &vt)
}

/// Rotation and translation from a plane-to-pixel homography `H ∝ K [r1 r2 t]`.
fn homography_to_pose(h: &Mat3d, cal: &CameraCalibration) -> (Mat3d, [f64; 3]) {
    let (fx, fy) = (cal.focal_length_x as f64, cal.focal_length_y as f64);
    let (cx, cy) = (cal.center_x as f64, cal.center_y as f64);
    let col = |j: usize| {
        [(h[0][j] - cx * h[2][j]) / fx, (h[1][j] - cy * h[2][j]) / fy, h[2][j]]
    };
    let (c0, c1, c2) = (col(0), col(1), col(2));

    let mut scale = (norm(&c0) + norm(&c1)) / 2.0;
    // the template must be in front of the camera
    if c2[2] < 0.0 {
        scale = -scale;
    }
    let r0 = c0.map(|v| v / scale);
    let r1 = c1.map(|v| v / scale);
    let r2 = cross(&r0, &r1);
    let raw = [[r0[0], r1[0], r2[0]], [r0[1], r1[1], r2[1]], [r0[2], r1[2], r2[2]]];
    (project_to_so3(&raw), c2.map(|v| v / scale))
}

/// Orthogonal iteration (Lu, Hager and Mjolsness): alternately solve the
/// optimal translation and project the rotation onto SO(3).
fn orthogonal_iteration(
    rays: &[[f64; 3]; 4],
    pts: &[[f64; 3]; 4],
    r_init: &Mat3d,
    t_init: &[f64; 3],
    iterations: u32,
) -> (Mat3d, [f64; 3]) {
    let n = 4.0;
    let f: [Mat3d; 4] = rays.map(|v| {
        let vv = v[0] * v[0] + v[1] * v[1] + v[2] * v[2];
        outer(&v, &v).map(|row| row.map(|e| e / vv))
    });

    let mut p_mean = [0.0; 3];
    for p in pts {
        for j in 0..3 {
            p_mean[j] += p[j] / n;
        }
    }
    let p_res = pts.map(|p| [p[0] - p_mean[0], p[1] - p_mean[1], p[2] - p_mean[2]]);

    let mut i_minus_fmean = IDENTITY_D;
    for fi in &f {
        for r in 0..3 {
            for c in 0..3 {
                i_minus_fmean[r][c] -= fi[r][c] / n;
            }
        }
    }
    let Some(m1_inv) = inverse(&i_minus_fmean) else {
        return (*r_init, *t_init);
    };

    let mut r = *r_init;
    let mut t = *t_init;
    for _ in 0..iterations {
        let mut m2 = [0.0; 3];
        for i in 0..4 {
            let rp = mat_vec(&r, &pts[i]);
            let frp = mat_vec(&f[i], &rp);
            for j in 0..3 {
                m2[j] += (frp[j] - rp[j]) / n;
            }
        }
        t = mat_vec(&m1_inv, &m2);

        let mut q = [[0.0; 3]; 4];
        let mut q_mean = [0.0; 3];
        for i in 0..4 {
            let rp = mat_vec(&r, &pts[i]);
            q[i] = mat_vec(&f[i], &[rp[0] + t[0], rp[1] + t[1], rp[2] + t[2]]);
            for j in 0..3 {
                q_mean[j] += q[i][j] / n;
            }
        }

        let mut m3 = [[0.0; 3]; 3];
        for i in 0..4 {
            let qr = [q[i][0] - q_mean[0], q[i][1] - q_mean[1], q[i][2] - q_mean[2]];
            let op = outer(&qr, &p_res[i]);
            for a in 0..3 {
                for b in 0..3 {
                    m3[a][b] += op[a][b];
                }
            }
        }
        r = project_to_so3(&m3);
    }
    (r, t)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_rot_close(a: &Rotation, b: &Rotation, tol: f32) {
        for i in 0..3 {
            for j in 0..3 {
                assert!((a[i][j] - b[i][j]).abs() < tol, "{a:?} vs {b:?}");
            }
        }
    }

    #[test]
    fn euler_round_trip() {
        for &(x, y, z) in &[(0.0, 0.0, 0.0), (0.3, -0.2, 1.1), (-1.0, 0.7, -2.5)] {
            let r = rotation_from_euler(x, y, z);
            let (ax, ay, az) = euler_from_rotation(&r);
            assert_rot_close(&rotation_from_euler(ax, ay, az), &r, 1e-5);
        }
    }

    #[test]
    fn euler_rotation_is_orthonormal() {
        let r = rotation_from_euler(0.4, -0.9, 0.2);
        for i in 0..3 {
            for j in 0..3 {
                let d: f32 = (0..3).map(|k| r[i][k] * r[j][k]).sum();
                let expect = if i == j { 1.0 } else { 0.0 };
                assert!((d - expect).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn derivatives_match_finite_differences() {
        let (x, y, z) = (0.3f32, -0.4f32, 0.8f32);
        let d = rotation_derivatives(x, y, z);
        let eps = 1e-3f32;
        let fd = |dx: f32, dy: f32, dz: f32| {
            let a = rotation_from_euler(x + dx, y + dy, z + dz);
            let b = rotation_from_euler(x - dx, y - dy, z - dz);
            let mut out = [[0.0f32; 3]; 3];
            for i in 0..3 {
                for j in 0..3 {
                    out[i][j] = (a[i][j] - b[i][j]) / (2.0 * eps);
                }
            }
            out
        };
        let steps = [(eps, 0.0, 0.0), (0.0, eps, 0.0), (0.0, 0.0, eps)];
        for (k, &(a, b, c)) in steps.iter().enumerate() {
            let n = fd(a, b, c);
            let got = [
                [d[k].dr11, d[k].dr12],
                [d[k].dr21, d[k].dr22],
                [d[k].dr31, d[k].dr32],
            ];
            for i in 0..3 {
                for j in 0..2 {
                    assert!((got[i][j] - n[i][j]).abs() < 1e-2, "angle {k} entry {i}{j}");
                }
            }
        }
    }

    #[test]
    fn solver_recovers_synthetic_pose() {
        let cal = CameraCalibration::new(300.0, 300.0, 160.0, 120.0);
        let r = rotation_from_euler(0.1, -0.15, 0.05);
        let t = Point3::new(5.0f32, -3.0, 200.0);
        let plane = [
            Point3::new(-15.0, -15.0, 0.0),
            Point3::new(-15.0, 15.0, 0.0),
            Point3::new(15.0, -15.0, 0.0),
            Point3::new(15.0, 15.0, 0.0),
        ];
        let image = plane.map(|p| {
            let c = Point3::new(
                r[0][0] * p.x + r[0][1] * p.y + t.x,
                r[1][0] * p.x + r[1][1] * p.y + t.y,
                r[2][0] * p.x + r[2][1] * p.y + t.z,
            );
            cal.project(&c).unwrap()
        });
        let (r_est, t_est) = OrthogonalIterationSolver::default().solve(&plane, &image, &cal).unwrap();
        assert_rot_close(&r_est, &r, 1e-2);
        assert!((t_est.z - 200.0).abs() < 1.0, "{t_est:?}");
        assert!((t_est.x - 5.0).abs() < 0.5);
    }

    #[test]
    fn undistort_inverts_radial_model() {
        let cal = CameraCalibration::new(300.0, 300.0, 160.0, 120.0)
            .with_distortion([-0.1, 0.02, 0.0, 0.0, 0.0]);
        // distort a known point forward
        let (x, y) = (0.3f64, -0.2f64);
        let r2 = x * x + y * y;
        let radial = 1.0 - 0.1 * r2 + 0.02 * r2 * r2;
        let p = Point::new((x * radial * 300.0 + 160.0) as f32, (y * radial * 300.0 + 120.0) as f32);
        let u = cal.undistort(p);
        assert!((u.x - (x * 300.0 + 160.0) as f32).abs() < 1e-2);
        assert!((u.y - (y * 300.0 + 120.0) as f32).abs() < 1e-2);
    }

    #[test]
    fn solver_rejects_bad_calibration() {
        let cal = CameraCalibration::new(0.0, 300.0, 160.0, 120.0);
        let plane = [Point3::new(0.0, 0.0, 0.0); 4];
        let image = [Point::new(0.0, 0.0); 4];
        assert!(OrthogonalIterationSolver::default().solve(&plane, &image, &cal).is_err());
    }
}
