//! Sparse tracker parameterized directly by the template's 6-DoF pose.
//!
//! The template is a physical square of known size on the `z = 0` plane.
//! Instead of refining homography entries, every iteration refines three
//! rotation angles and a translation (millimetres), then rebuilds the
//! homography `K [r1 r2 t]` from them. Sample coordinates are template
//! millimetres, so the per-sample Jacobian rows and their normal matrix can be
//! computed once at construction; out-of-bounds samples are subtracted from
//! the cached matrix instead of rebuilding it.

use log::{debug, trace, warn};

use crate::array::{Array2, ImageU8};
use crate::error::{Result, TrackerError};
use crate::geometry::{Point, Point3, Quadrilateral};
use crate::gradient::squared_magnitude;
use crate::grid::{linspace, Meshgrid};
use crate::homography::{Mat3, MIN_PROJECTIVE_NORMALIZATION};
use crate::interp::{bilinear_in_bounds, interp2_projective};
use crate::pose::{
    euler_from_rotation, rotation_derivatives, rotation_from_euler, PoseSolver, Rotation,
    RotationDerivative,
};
use crate::pyramid::{ImagePyramid, PyramidKind};
use crate::select::{approximate_select_regions, nlms, NUM_SELECT_BINS};
use crate::solve::{accumulate_rhs, SymmetricMatrix};
use crate::transform::{PlanarTransformation, TransformType};
use crate::verify::{VerifyAccumulator, VerifyResult};

use super::config::{
    validate_iterations, ConvergenceCriterion, Planar6dofConfig, Planar6dofUpdateParams,
};
use super::driver::{run_levels, LevelPolicy};
use super::{
    image_scale, template_gradients, template_grid, template_region, validate_level, validate_next_image,
    validate_template, CornerHistory, Refiner, ScaledHomography, TrackResult, MIN_IN_BOUNDS_SAMPLES,
};

/// Side of the verification grid.
pub const VERIFY_GRID_SIZE: usize = 32;

/// Step gain used when gain scheduling is off.
pub const DEFAULT_GAIN: f32 = 0.25;

/// Rotation angles (radians) and translation (millimetres) of the template
/// in the camera frame.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Pose {
    pub angle_x: f32,
    pub angle_y: f32,
    pub angle_z: f32,
    pub translation: Point3<f32>,
}

impl Pose {
    pub fn rotation(&self) -> Rotation {
        rotation_from_euler(self.angle_x, self.angle_y, self.angle_z)
    }
}

/// A template sample with its precomputed Jacobian row w.r.t.
/// `[angle_x, angle_y, angle_z, tx, ty, tz]`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PoseSample {
    /// Template millimetres.
    pub x: f32,
    pub y: f32,
    pub grayvalue: f32,
    pub jacobian: [f32; 6],
}

impl PoseSample {
    /// The translation part of the row (`N == 3`) or the full row (`N == 6`).
    #[inline]
    fn row<const N: usize>(&self) -> [f32; N] {
        let mut row = [0.0f32; N];
        row.copy_from_slice(&self.jacobian[6 - N..]);
        row
    }
}

/// Verification sample at quantized template coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VerifySample {
    pub x: i8,
    pub y: i8,
    pub grayvalue: u8,
}

/// Linear gain in `translation.z`, clamped to `[kp_min, kp_max]` outside `[z_min, z_max]`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct GainSchedule {
    z_min: f32,
    z_max: f32,
    kp_min: f32,
    kp_max: f32,
}

impl GainSchedule {
    fn gain(&self, z: f32) -> f32 {
        if z <= self.z_min {
            self.kp_min
        } else if z >= self.z_max {
            self.kp_max
        } else {
            (z - self.z_min) / (self.z_max - self.z_min) * (self.kp_max - self.kp_min) + self.kp_min
        }
    }
}

/// Chain rule from the pose parameters through the pinhole projection, at
/// one fixed pose.
struct PoseJacobian {
    h: Mat3,
    focal_length_x: f32,
    focal_length_y: f32,
    derivatives: [RotationDerivative; 3],
}

impl PoseJacobian {
    fn sample(&self, x: f32, y: f32, x_gradient: f32, y_gradient: f32, grayvalue: f32) -> PoseSample {
        let h = &self.h;
        let (fx, fy) = (self.focal_length_x, self.focal_length_y);
        let mut jacobian = [0.0f32; 6];

        let n = h[2][0] * x + h[2][1] * y + h[2][2];
        if n.abs() >= MIN_PROJECTIVE_NORMALIZATION {
            let xr = h[0][0] * x + h[0][1] * y + h[0][2];
            let yr = h[1][0] * x + h[1][1] * y + h[1][2];
            let inv_sq = 1.0 / (n * n);

            for (k, d) in self.derivatives.iter().enumerate() {
                let r1 = d.dr11 * x + d.dr12 * y;
                let r2 = d.dr21 * x + d.dr22 * y;
                let r3 = d.dr31 * x + d.dr32 * y;
                let du = (fx * n * r1 - r3 * xr) * inv_sq;
                let dv = (fy * n * r2 - r3 * yr) * inv_sq;
                jacobian[k] = x_gradient * du + y_gradient * dv;
            }
            jacobian[3] = x_gradient * fx / n;
            jacobian[4] = y_gradient * fy / n;
            jacobian[5] = -(x_gradient * xr + y_gradient * yr) * inv_sq;
        }
        PoseSample { x, y, grayvalue, jacobian }
    }
}

/// Geometry of the implicit dark square border, in millimetres.
#[derive(Debug, Clone, Copy)]
struct FiducialSquare {
    size: Point<f32>,
    thickness: Point<f32>,
    rounding: Point<f32>,
}

impl FiducialSquare {
    fn from_config(config: &Planar6dofConfig) -> Self {
        Self {
            size: config.template_size_mm,
            thickness: config.fiducial_square_thickness_fraction,
            rounding: config.rounded_corners_fraction,
        }
    }

    /// `8 * per_edge` synthetic edge samples `(x, y, gx, gy)`, in the order
    /// outer top, outer bottom, inner top, inner bottom, outer left, outer
    /// right, inner left, inner right.
    ///
    /// `gradient` is the edge gradient magnitude per pixel along each axis.
    fn edge_samples(&self, per_edge: usize, gradient: Point<f32>) -> Vec<(f32, f32, f32, f32)> {
        let (hw, hh) = (self.size.x / 2.0, self.size.y / 2.0);
        let inner_hw = (1.0 - 2.0 * self.thickness.x) * hw;
        let inner_hh = (1.0 - 2.0 * self.thickness.y) * hh;
        let (dx, dy) = (gradient.x, gradient.y);
        let rounded = self.rounding.x != 0.0 || self.rounding.y != 0.0;

        let outer_x = edge_positions((1.0 - self.rounding.x) * hw, per_edge);
        let outer_y = edge_positions((1.0 - self.rounding.y) * hh, per_edge);
        let inner_x = edge_positions((1.0 - self.rounding.x.max(self.thickness.x)) * inner_hw, per_edge);
        let inner_y = edge_positions((1.0 - self.rounding.y.max(self.thickness.y)) * inner_hh, per_edge);

        // Along-edge gradient of the two end samples of an unrounded edge.
        let end = |i: usize, p: f32, d: f32| -> f32 {
            if !rounded && per_edge > 1 && (i == 0 || i == per_edge - 1) {
                p.signum() * d
            } else {
                0.0
            }
        };

        let mut out = Vec::with_capacity(8 * per_edge);
        // (positions, fixed coordinate, horizontal edge, normal sign, outer edge)
        let edges: [(&[f32], f32, bool, f32, bool); 8] = [
            (&outer_x, -hh, true, -1.0, true),
            (&outer_x, hh, true, 1.0, true),
            (&inner_x, -inner_hh, true, 1.0, false),
            (&inner_x, inner_hh, true, -1.0, false),
            (&outer_y, -hw, false, -1.0, true),
            (&outer_y, hw, false, 1.0, true),
            (&inner_y, -inner_hw, false, 1.0, false),
            (&inner_y, inner_hw, false, -1.0, false),
        ];
        for (positions, fixed, horizontal, normal, outer) in edges {
            let along_sign = if outer { 1.0 } else { -1.0 };
            for (i, &p) in positions.iter().enumerate() {
                if horizontal {
                    out.push((p, fixed, along_sign * end(i, p, dx), normal * dy));
                } else {
                    out.push((fixed, p, normal * dx, along_sign * end(i, p, dy)));
                }
            }
        }
        out
    }

    /// Sub-grids of the verification layout: both square bars, both bars of
    /// the gap inside them, then the interior. `VERIFY_GRID_SIZE²` points.
    fn verification_layout(&self) -> Vec<Meshgrid> {
        let n = VERIFY_GRID_SIZE;
        let (w, h) = (self.size.x, self.size.y);
        let (tx, ty) = (self.thickness.x, self.thickness.y);
        let bar = Point::new(0.5 * (1.0 - tx) * w, 0.5 * (1.0 - ty) * h);
        let gap = Point::new(0.5 * (1.0 - 3.0 * tx) * w, 0.5 * (1.0 - 3.0 * ty) * h);
        let inner = Point::new(0.5 * (1.0 - 4.0 * tx) * w, 0.5 * (1.0 - 4.0 * ty) * h);
        vec![
            Meshgrid::new(linspace(-bar.x, bar.x, n), linspace(-bar.y, bar.y, 2)),
            Meshgrid::new(linspace(-bar.x, bar.x, 2), linspace(-gap.y, gap.y, n - 2)),
            Meshgrid::new(linspace(-gap.x, gap.x, n - 2), linspace(-gap.y, gap.y, 2)),
            Meshgrid::new(linspace(-gap.x, gap.x, 2), linspace(-inner.y, inner.y, n - 4)),
            Meshgrid::new(linspace(-inner.x, inner.x, n - 4), linspace(-inner.y, inner.y, n - 4)),
        ]
    }
}

/// `n` positions symmetric about zero spanning `±half`; the centre when `n == 1`.
fn edge_positions(half: f32, n: usize) -> Vec<f32> {
    if n == 1 {
        vec![0.0]
    } else {
        linspace(-half, half, n).iter().collect()
    }
}

#[derive(Debug, Clone)]
pub struct Planar6dofTracker {
    config: Planar6dofConfig,
    template_width: u32,
    template_height: u32,
    image_scale: f32,
    transformation: PlanarTransformation,
    pose: Pose,
    gain_schedule: Option<GainSchedule>,
    /// Fiducial edge samples first, then the selected interior samples.
    samples: Vec<Vec<PoseSample>>,
    /// `AᵀA` over every sample of each level, mirrored.
    normal_matrices: Vec<SymmetricMatrix<6>>,
    verification_samples: Vec<VerifySample>,
    verify_coordinate_scale: f32,
}

impl Planar6dofTracker {
    /// Seed the pose from `quad` with `solver`, then sample the template.
    pub fn new(
        template: &ImageU8,
        quad: Quadrilateral<f32>,
        config: Planar6dofConfig,
        solver: &impl PoseSolver,
    ) -> Result<Self> {
        config.validate()?;
        validate_template(template, config.num_pyramid_levels)?;
        let image_scale = image_scale(config.base_image_width, template.width)?;
        let region = template_region(&quad, image_scale, config.scale_template_region_percent, template)?;

        let hw = config.template_size_mm.x / 2.0;
        let hh = config.template_size_mm.y / 2.0;
        // Clockwise corners are TL, TR, BR, BL.
        let image_corners = quad.compute_clockwise_corners().corners;
        let plane_corners = [
            Point3::new(-hw, -hh, 0.0),
            Point3::new(hw, -hh, 0.0),
            Point3::new(hw, hh, 0.0),
            Point3::new(-hw, hh, 0.0),
        ];
        let (rotation, translation) = solver.solve(&plane_corners, &image_corners, &config.calibration)?;
        let (angle_x, angle_y, angle_z) = euler_from_rotation(&rotation);
        let pose = Pose { angle_x, angle_y, angle_z, translation };
        debug!("6-DoF seed pose: {pose:?}");

        let cal = &config.calibration;
        let mut transformation = PlanarTransformation::new(
            TransformType::Projective,
            Quadrilateral::new(
                Point::new(-hw, -hh),
                Point::new(hw, -hh),
                Point::new(-hw, hh),
                Point::new(hw, hh),
            ),
            Point::new(cal.center_x, cal.center_y),
        );
        transformation.set_initial_points_are_zero_centered(true);
        transformation.set_homography(pose_homography(&pose, cal.focal_length_x, cal.focal_length_y));

        let mut tracker = Self {
            template_width: template.width,
            template_height: template.height,
            image_scale,
            transformation,
            pose,
            gain_schedule: None,
            samples: Vec::with_capacity(config.num_pyramid_levels),
            normal_matrices: Vec::with_capacity(config.num_pyramid_levels),
            verification_samples: Vec::new(),
            verify_coordinate_scale: 1.0,
            config,
        };

        let kind = if tracker.config.blur_levels { PyramidKind::Blurred } else { PyramidKind::Shared };
        let pyramid = ImagePyramid::with_kind(template, tracker.config.num_pyramid_levels, kind);
        for level in 0..tracker.config.num_pyramid_levels {
            let (samples, ata) = tracker.level_samples(&pyramid, level, region.width() + 1.0, region.height() + 1.0)?;
            debug!("6-DoF level {level}: {} samples", samples.len());
            tracker.samples.push(samples);
            tracker.normal_matrices.push(ata);
        }
        tracker.build_verification_samples(template)?;
        Ok(tracker)
    }

    fn scaled_map(&self) -> ScaledHomography {
        let (h, offset) = self.scaled_homography();
        ScaledHomography::from_parts(h, offset)
    }

    /// Homography from template millimetres to template-image pixels.
    fn scaled_homography(&self) -> (Mat3, Point<f32>) {
        let s = self.image_scale;
        let h = self.transformation.homography();
        (
            [
                [h[0][0] / s, h[0][1] / s, h[0][2] / s],
                [h[1][0] / s, h[1][1] / s, h[1][2] / s],
                h[2],
            ],
            self.transformation.center_offset(s),
        )
    }

    fn pose_jacobian(&self) -> PoseJacobian {
        let (h, _) = self.scaled_homography();
        let p = &self.pose;
        PoseJacobian {
            h,
            focal_length_x: self.config.calibration.focal_length_x / self.image_scale,
            focal_length_y: self.config.calibration.focal_length_y / self.image_scale,
            derivatives: rotation_derivatives(p.angle_x, p.angle_y, p.angle_z),
        }
    }

    fn level_samples(
        &self,
        pyramid: &ImagePyramid,
        level: usize,
        region_width: f32,
        region_height: f32,
    ) -> Result<(Vec<PoseSample>, SymmetricMatrix<6>)> {
        let config = &self.config;
        let (h, offset) = self.scaled_homography();
        let jacobian = self.pose_jacobian();

        // Pixel grid only fixes the sample counts and the pixel spacing.
        let pixel_grid = template_grid(region_width, region_height, level)?;
        let pct = config.scale_template_region_percent;
        let hw = pct * config.template_size_mm.x / 2.0;
        let hh = pct * config.template_size_mm.y / 2.0;
        let grid = Meshgrid::new(
            linspace(-hw, hw, pixel_grid.width()),
            linspace(-hh, hh, pixel_grid.height()),
        );
        let step = Point::new(pixel_grid.x.increment(), pixel_grid.y.increment());

        let mut template = Array2::<u8>::new(grid.width() as u32, grid.height() as u32);
        interp2_projective(pyramid.level(level), &grid, &h, offset, &mut template, 0)?;

        let num_fiducial = config.num_fiducial_edge_samples >> level;
        let mut samples = Vec::new();
        if num_fiducial > 0 {
            let (dark, bright) = template
                .min_max()
                .ok_or_else(|| TrackerError::size("empty template sample grid"))?;
            if bright <= dark {
                return Err(TrackerError::param(format!(
                    "Bright value ({bright}) should be larger than dark value ({dark})"
                )));
            }
            let gray = (bright as f32 + dark as f32) / 2.0;
            let contrast = (bright - dark) as f32;
            let gradient = Point::new(contrast / (2.0 * 255.0 * step.x), contrast / (2.0 * 255.0 * step.y));
            let per_edge = num_fiducial.div_ceil(8);
            samples.extend(
                FiducialSquare::from_config(config)
                    .edge_samples(per_edge, gradient)
                    .into_iter()
                    .map(|(x, y, gx, gy)| jacobian.sample(x, y, gx, gy, gray)),
            );
        }

        let (gx, gy) = template_gradients(&template.map(f32::from), &pixel_grid)?;

        let mut magnitude = squared_magnitude(&gx, &gy);
        nlms(&mut magnitude);
        let num_points = magnitude.len();
        let wanted = num_points.min(config.max_samples_at_base_level >> level);
        let selected: Vec<usize> = if wanted >= num_points {
            (0..num_points).collect()
        } else {
            let mut indexes = vec![0usize; num_points];
            let n = approximate_select_regions(
                &magnitude,
                NUM_SELECT_BINS,
                config.num_sampling_regions,
                wanted,
                &mut indexes,
            )?;
            indexes.truncate(n);
            indexes
        };
        if selected.is_empty() {
            warn!("No samples found within given quad at scale {level}");
        }

        let width = template.width as usize;
        samples.extend(selected.into_iter().map(|i| {
            let (ix, iy) = ((i % width) as u32, (i / width) as u32);
            jacobian.sample(
                grid.x.get(ix as usize),
                grid.y.get(iy as usize),
                gx.get(ix, iy),
                gy.get(ix, iy),
                template.get(ix, iy) as f32,
            )
        }));

        let mut ata = SymmetricMatrix::<6>::zeros();
        for s in &samples {
            ata.accumulate_outer_product(&s.jacobian);
        }
        ata.mirror_upper();
        Ok((samples, ata))
    }

    fn build_verification_samples(&mut self, template: &ImageU8) -> Result<()> {
        let config = &self.config;
        let square = FiducialSquare::from_config(config);
        let (layout, extent) = if config.num_fiducial_edge_samples > 0 {
            (square.verification_layout(), Point::new(config.template_size_mm.x / 2.0, config.template_size_mm.y / 2.0))
        } else {
            let pct = config.scale_template_region_percent;
            let hw = pct * config.template_size_mm.x / 2.0;
            let hh = pct * config.template_size_mm.y / 2.0;
            (
                vec![Meshgrid::new(
                    linspace(-hw, hw, VERIFY_GRID_SIZE),
                    linspace(-hh, hh, VERIFY_GRID_SIZE),
                )],
                Point::new(hw, hh),
            )
        };
        let scale = extent.x.max(extent.y) / i8::MAX as f32;
        if scale <= 0.0 {
            return Err(TrackerError::param("verification extent must be positive"));
        }

        let map = self.scaled_map();
        let quantize = |v: f32| (v / scale).round().clamp(i8::MIN as f32, i8::MAX as f32) as i8;
        let mut samples = Vec::with_capacity(VERIFY_GRID_SIZE * VERIFY_GRID_SIZE);
        for grid in &layout {
            for (x, y) in grid.points() {
                let (qx, qy) = (quantize(x), quantize(y));
                let (u, v) = map.map(qx as f32 * scale, qy as f32 * scale);
                match bilinear_in_bounds(template, u, v) {
                    Some(g) => samples.push(VerifySample { x: qx, y: qy, grayvalue: g as u8 }),
                    None => trace!("verification sample ({x}, {y}) falls outside the template"),
                }
            }
        }
        self.verification_samples = samples;
        self.verify_coordinate_scale = scale;
        Ok(())
    }

    pub fn config(&self) -> &Planar6dofConfig {
        &self.config
    }

    pub fn transformation(&self) -> &PlanarTransformation {
        &self.transformation
    }

    /// Template corners in base-image pixels under the current pose.
    pub fn transformed_corners(&self) -> Quadrilateral<f32> {
        self.transformation.transformed_corners()
    }

    pub fn pose(&self) -> &Pose {
        &self.pose
    }

    pub fn rotation_matrix(&self) -> Rotation {
        self.pose.rotation()
    }

    pub fn translation(&self) -> Point3<f32> {
        self.pose.translation
    }

    pub fn angle_x(&self) -> f32 {
        self.pose.angle_x
    }

    pub fn angle_y(&self) -> f32 {
        self.pose.angle_y
    }

    pub fn angle_z(&self) -> f32 {
        self.pose.angle_z
    }

    /// Replace the pose, e.g. with one from an external pose source.
    pub fn update_rotation_and_translation(&mut self, rotation: &Rotation, translation: Point3<f32>) {
        let (angle_x, angle_y, angle_z) = euler_from_rotation(rotation);
        self.pose = Pose { angle_x, angle_y, angle_z, translation };
        self.update_transformation();
    }

    fn update_transformation(&mut self) {
        let cal = &self.config.calibration;
        let h = pose_homography(&self.pose, cal.focal_length_x, cal.focal_length_y);
        self.transformation.set_homography(h);
    }

    /// Interpolate the step gain between `kp_min` at `z_min` and `kp_max` at `z_max`.
    pub fn set_gain_scheduling(&mut self, z_min: f32, z_max: f32, kp_min: f32, kp_max: f32) -> Result<()> {
        if !(z_max > z_min) || !(kp_min > 0.0) || !(kp_max >= kp_min) {
            return Err(TrackerError::param(
                "gain scheduling needs z_min < z_max and 0 < kp_min <= kp_max",
            ));
        }
        self.gain_schedule = Some(GainSchedule { z_min, z_max, kp_min, kp_max });
        Ok(())
    }

    pub fn current_gain(&self) -> f32 {
        self.gain_schedule
            .map_or(DEFAULT_GAIN, |g| g.gain(self.pose.translation.z))
    }

    /// Samples of `level`, empty for an invalid level.
    pub fn template_samples(&self, level: usize) -> &[PoseSample] {
        self.samples.get(level).map_or(&[], Vec::as_slice)
    }

    pub fn num_template_pixels(&self, level: usize) -> usize {
        self.template_samples(level).len()
    }

    pub fn verification_samples(&self) -> &[VerifySample] {
        &self.verification_samples
    }

    /// Millimetres per quantized verification coordinate step.
    pub fn verify_coordinate_scale(&self) -> f32 {
        self.verify_coordinate_scale
    }

    pub fn update_track(&mut self, next: &ImageU8, params: &Planar6dofUpdateParams) -> Result<TrackResult> {
        validate_params(params)?;
        validate_next_image(next, self.template_width, self.template_height)?;
        let kind = if self.config.blur_levels { PyramidKind::Blurred } else { PyramidKind::Shared };
        let pyramid = ImagePyramid::with_kind(next, self.samples.len(), kind);

        let converged = run_levels(self, &pyramid, params, LevelPolicy::RevertUnconverged)?;
        let verify = self.verify_track(next, params.verify_max_pixel_difference)?;
        Ok(TrackResult { converged, verify })
    }

    pub fn iteratively_refine_track(
        &mut self,
        next: &ImageU8,
        level: usize,
        update_type: TransformType,
        params: &Planar6dofUpdateParams,
    ) -> Result<bool> {
        validate_params(params)?;
        validate_next_image(next, self.template_width, self.template_height)?;
        validate_level(level, self.samples.len())?;
        let kind = if self.config.blur_levels { PyramidKind::Blurred } else { PyramidKind::Shared };
        let pyramid = ImagePyramid::with_kind(next, self.samples.len(), kind);
        self.refine_level(&pyramid, level, update_type, params)
    }

    /// Nearest-neighbour comparison of the verification samples against `next`.
    ///
    /// With `update_verification_samples`, each in-bounds sample then takes
    /// the observed grayvalue as its new reference.
    pub fn verify_track(&mut self, next: &ImageU8, max_pixel_difference: u8) -> Result<VerifyResult> {
        validate_next_image(next, self.template_width, self.template_height)?;
        let map = self.scaled_map();
        let scale = self.verify_coordinate_scale;
        let (max_x, max_y) = (next.width as f32 - 1.0, next.height as f32 - 1.0);
        let update = self.config.update_verification_samples;

        let mut acc = VerifyAccumulator::new(max_pixel_difference);
        for sample in &mut self.verification_samples {
            let (u, v) = map.map(sample.x as f32 * scale, sample.y as f32 * scale);
            if !(u >= 0.0 && u <= max_x && v >= 0.0 && v <= max_y) {
                continue;
            }
            let observed = next.get(u.round() as u32, v.round() as u32);
            acc.add(observed as i32, sample.grayvalue as i32);
            if update {
                sample.grayvalue = observed;
            }
        }
        Ok(acc.finish())
    }

    fn refine_n<const N: usize>(
        &mut self,
        next: &ImagePyramid,
        level: usize,
        params: &Planar6dofUpdateParams,
    ) -> Result<bool> {
        let level_scale = (1u32 << level) as f32;
        let full = self.normal_matrices[level];
        let offset = 6 - N;
        let mut cached = SymmetricMatrix::<N>::zeros();
        for i in 0..N {
            for j in 0..N {
                cached.a[i][j] = full.a[i + offset][j + offset];
            }
        }
        let mut history = match self.config.convergence {
            ConvergenceCriterion::CornerChange => {
                Some(CornerHistory::new(*self.transformation.initial_corners()))
            }
            ConvergenceCriterion::ParameterChange => None,
        };

        for iteration in 0..params.max_iterations {
            let map = self.scaled_map();
            let mut ata = cached;
            let mut b = [0.0f32; N];
            let mut num_in_bounds = 0usize;

            for s in &self.samples[level] {
                let row = s.row::<N>();
                let (x, y) = map.map(s.x, s.y);
                match next.sample(level, x, y) {
                    Some(v) => {
                        num_in_bounds += 1;
                        accumulate_rhs(&mut b, &row, (v - s.grayvalue) / 255.0);
                    }
                    None => ata.remove_outer_product(&row),
                }
            }
            if num_in_bounds < MIN_IN_BOUNDS_SAMPLES {
                warn!("Template drifted too far out of image.");
                return Ok(false);
            }
            ata.mirror_upper();

            let Some(delta) = ata.solve_cholesky(&b) else {
                warn!("numericalFailure");
                return Ok(false);
            };

            let kp = self.current_gain();
            let t = &mut self.pose.translation;
            t.x -= kp * delta[N - 3];
            t.y -= kp * delta[N - 2];
            t.z -= kp * delta[N - 1];
            if N == 6 {
                self.pose.angle_x -= kp * delta[0];
                self.pose.angle_y -= kp * delta[1];
                self.pose.angle_z -= kp * delta[2];
            }
            self.update_transformation();
            trace!("6-DoF level {level} iteration {iteration}: {num_in_bounds} in bounds, step {delta:?}");

            let converged = match history.as_mut() {
                Some(history) => history.update(&self.transformation) < params.convergence_tolerance_distance,
                None => {
                    let angle_tol = level_scale * params.convergence_tolerance_angle;
                    let dist_tol = level_scale * params.convergence_tolerance_distance;
                    delta.iter().enumerate().all(|(i, d)| {
                        let tol = if i + 3 < N { angle_tol } else { dist_tol };
                        d.abs() < tol
                    })
                }
            };
            if converged {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

impl Refiner for Planar6dofTracker {
    type Snapshot = (PlanarTransformation, Pose);
    type Params = Planar6dofUpdateParams;

    fn num_levels(&self) -> usize {
        self.samples.len()
    }

    fn transform_type(&self) -> TransformType {
        TransformType::Projective
    }

    fn snapshot(&self) -> Self::Snapshot {
        (self.transformation.clone(), self.pose)
    }

    fn restore(&mut self, (transformation, pose): Self::Snapshot) {
        self.transformation = transformation;
        self.pose = pose;
    }

    fn refine_level(
        &mut self,
        next: &ImagePyramid,
        level: usize,
        update_type: TransformType,
        params: &Planar6dofUpdateParams,
    ) -> Result<bool> {
        let converged = match update_type {
            TransformType::Translation => self.refine_n::<3>(next, level, params)?,
            TransformType::Projective => self.refine_n::<6>(next, level, params)?,
            TransformType::Affine => {
                return Err(TrackerError::param(
                    "the 6-DoF tracker refines translation or the full pose",
                ))
            }
        };
        debug!("6-DoF level {level} {update_type}: converged {converged}");
        Ok(converged)
    }
}

/// `[[fx r00, fx r01, fx tx], [fy r10, fy r11, fy ty], [r20, r21, tz]]`
fn pose_homography(pose: &Pose, focal_length_x: f32, focal_length_y: f32) -> Mat3 {
    let r = pose.rotation();
    let t = pose.translation;
    [
        [focal_length_x * r[0][0], focal_length_x * r[0][1], focal_length_x * t.x],
        [focal_length_y * r[1][0], focal_length_y * r[1][1], focal_length_y * t.y],
        [r[2][0], r[2][1], t.z],
    ]
}

fn validate_params(params: &Planar6dofUpdateParams) -> Result<()> {
    validate_iterations(params.max_iterations)?;
    if !(params.convergence_tolerance_angle > 0.0) || !(params.convergence_tolerance_distance > 0.0) {
        return Err(TrackerError::param("convergenceTolerances must be greater than zero"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::{CameraCalibration, OrthogonalIterationSolver};

    const FOCAL: f32 = 300.0;

    fn calibration() -> CameraCalibration {
        CameraCalibration::new(FOCAL, FOCAL, 160.0, 120.0)
    }

    /// Plane texture in millimetres: a dark square border of 3 mm on a
    /// 30 mm target, textured interior, bright surround.
    fn plane_intensity(x: f32, y: f32) -> f32 {
        let (ax, ay) = (x.abs(), y.abs());
        if ax > 15.0 || ay > 15.0 {
            200.0
        } else if ax > 12.0 || ay > 12.0 {
            30.0
        } else {
            130.0 + 50.0 * (x * 0.5).sin() * (y * 0.4).cos()
        }
    }

    /// Fronto-parallel view of the plane at translation `t`.
    fn render(t: Point3<f32>) -> ImageU8 {
        ImageU8::from_fn(320, 240, |u, v| {
            let x = (u as f32 - 160.0) * t.z / FOCAL - t.x;
            let y = (v as f32 - 120.0) * t.z / FOCAL - t.y;
            plane_intensity(x, y).round() as u8
        })
    }

    fn projected_quad(t: Point3<f32>) -> Quadrilateral<f32> {
        let p = |x: f32, y: f32| Point::new(FOCAL * (x + t.x) / t.z + 160.0, FOCAL * (y + t.y) / t.z + 120.0);
        Quadrilateral::new(p(-15.0, -15.0), p(15.0, -15.0), p(-15.0, 15.0), p(15.0, 15.0))
    }

    fn config() -> Planar6dofConfig {
        Planar6dofConfig {
            num_pyramid_levels: 2,
            calibration: calibration(),
            template_size_mm: Point::new(30.0, 30.0),
            max_samples_at_base_level: 400,
            num_sampling_regions: 3,
            ..Planar6dofConfig::default()
        }
    }

    fn tracker(cfg: Planar6dofConfig, t: Point3<f32>) -> Planar6dofTracker {
        Planar6dofTracker::new(&render(t), projected_quad(t), cfg, &OrthogonalIterationSolver::default()).unwrap()
    }

    #[test]
    fn seed_pose_matches_the_rendered_plane() {
        let t = Point3::new(2.0, -1.0, 150.0);
        let tracker = tracker(config(), t);
        let p = tracker.translation();
        assert!((p.x - t.x).abs() < 0.5, "{p:?}");
        assert!((p.y - t.y).abs() < 0.5, "{p:?}");
        assert!((p.z - t.z).abs() < 3.0, "{p:?}");
        let corners = tracker.transformed_corners();
        let expected = projected_quad(t);
        assert!(corners.mean_corner_distance(&expected) < 1.0, "{corners:?}");
    }

    #[test]
    fn tracks_a_lateral_shift() {
        let t = Point3::new(0.0, 0.0, 150.0);
        let mut tracker = tracker(config(), t);
        let moved = Point3::new(1.0, -0.5, 150.0);
        let result = tracker.update_track(&render(moved), &Planar6dofUpdateParams::default()).unwrap();
        let p = tracker.translation();
        assert!((p.x - moved.x).abs() < 0.3, "{p:?}");
        assert!((p.y - moved.y).abs() < 0.3, "{p:?}");
        assert!(result.verify.similar_fraction() > 0.9, "{:?}", result.verify);
    }

    #[test]
    fn fiducial_samples_come_first() {
        let mut cfg = config();
        cfg.num_fiducial_edge_samples = 60;
        let tracker = tracker(cfg, Point3::new(0.0, 0.0, 150.0));

        let level0 = tracker.template_samples(0);
        let per_edge = 60usize.div_ceil(8);
        assert!(level0.len() > 8 * per_edge);
        // outer top edge sits on y = -15 with an upward gradient
        for s in &level0[..per_edge] {
            assert!((s.y + 15.0).abs() < 1e-4);
            assert!(s.grayvalue > 30.0 && s.grayvalue < 200.0, "{s:?}");
        }
        // contrast is spread evenly, so every outer-top row carries the same gray
        assert!(level0[..per_edge].iter().all(|s| s.grayvalue == level0[0].grayvalue));
        let per_edge_1 = 30usize.div_ceil(8);
        assert!(tracker.template_samples(1).len() > 8 * per_edge_1);
    }

    #[test]
    fn edge_samples_point_across_the_border() {
        let square = FiducialSquare {
            size: Point::new(30.0, 30.0),
            thickness: Point::new(0.1, 0.1),
            rounding: Point::new(0.0, 0.0),
        };
        let s = square.edge_samples(5, Point::new(1.0, 2.0));
        assert_eq!(s.len(), 40);
        // outer top: first sample is a corner with both components outward
        assert_eq!(s[0], (-15.0, -15.0, -1.0, -2.0));
        assert_eq!(s[2], (0.0, -15.0, 0.0, -2.0));
        // inner top points down into the interior, corners point inward
        assert_eq!(s[10].3, 2.0);
        assert_eq!(s[10].2, 1.0);
        // outer right edge runs along y at x = 15
        assert!(s[25..30].iter().all(|&(x, _, gx, _)| x == 15.0 && gx == 1.0));

        let rounded = FiducialSquare { rounding: Point::new(0.2, 0.2), ..square };
        let s = rounded.edge_samples(5, Point::new(1.0, 2.0));
        assert!(s[..10].iter().all(|&(_, _, gx, _)| gx == 0.0));
        assert!((s[0].0 + 12.0).abs() < 1e-5);
    }

    #[test]
    fn verification_grid_has_a_thousand_samples() {
        let plain = tracker(config(), Point3::new(0.0, 0.0, 150.0));
        assert_eq!(plain.verification_samples().len(), VERIFY_GRID_SIZE * VERIFY_GRID_SIZE);

        let mut cfg = config();
        cfg.num_fiducial_edge_samples = 40;
        let fid = tracker(cfg, Point3::new(0.0, 0.0, 150.0));
        assert_eq!(fid.verification_samples().len(), VERIFY_GRID_SIZE * VERIFY_GRID_SIZE);
        let max = fid.verification_samples().iter().map(|s| s.x.unsigned_abs()).max().unwrap();
        assert!(max <= 127);
    }

    #[test]
    fn verification_follows_observations() {
        let t = Point3::new(0.0, 0.0, 150.0);
        let mut tracker = tracker(config(), t);
        let same = tracker.verify_track(&render(t), 10).unwrap();
        assert!(same.similar_fraction() > 0.85, "{same:?}");

        let dark = ImageU8::filled(320, 240, 0);
        let first = tracker.verify_track(&dark, 10).unwrap();
        assert!(first.similar_fraction() < 0.2, "{first:?}");
        // the reference now holds the dark frame
        let second = tracker.verify_track(&dark, 10).unwrap();
        assert_eq!(second.num_similar_pixels, second.num_in_bounds);
        assert_eq!(second.mean_absolute_difference, 0);
    }

    #[test]
    fn gain_schedule_interpolates_in_depth() {
        let mut tracker = tracker(config(), Point3::new(0.0, 0.0, 150.0));
        assert_eq!(tracker.current_gain(), DEFAULT_GAIN);
        assert!(tracker.set_gain_scheduling(200.0, 100.0, 0.1, 0.5).is_err());
        tracker.set_gain_scheduling(100.0, 200.0, 0.1, 0.5).unwrap();

        let identity = rotation_from_euler(0.0, 0.0, 0.0);
        tracker.update_rotation_and_translation(&identity, Point3::new(0.0, 0.0, 150.0));
        assert!((tracker.current_gain() - 0.3).abs() < 1e-6);
        tracker.update_rotation_and_translation(&identity, Point3::new(0.0, 0.0, 50.0));
        assert_eq!(tracker.current_gain(), 0.1);
        tracker.update_rotation_and_translation(&identity, Point3::new(0.0, 0.0, 500.0));
        assert_eq!(tracker.current_gain(), 0.5);
    }

    #[test]
    fn flat_template_cannot_place_fiducial_samples() {
        let mut cfg = config();
        cfg.num_fiducial_edge_samples = 16;
        let flat = ImageU8::filled(320, 240, 90);
        let quad = projected_quad(Point3::new(0.0, 0.0, 150.0));
        let err = Planar6dofTracker::new(&flat, quad, cfg, &OrthogonalIterationSolver::default()).unwrap_err();
        assert!(matches!(err, TrackerError::InvalidParameter(_)));
    }

    #[test]
    fn affine_increments_are_rejected() {
        let t = Point3::new(0.0, 0.0, 150.0);
        let mut tracker = tracker(config(), t);
        let err = tracker
            .iteratively_refine_track(&render(t), 0, TransformType::Affine, &Planar6dofUpdateParams::default())
            .unwrap_err();
        assert!(matches!(err, TrackerError::InvalidParameter(_)));
    }

    #[test]
    fn jacobian_translation_terms_follow_the_projection() {
        let pose = Pose { translation: Point3::new(0.0, 0.0, 100.0), ..Pose::default() };
        let j = PoseJacobian {
            h: pose_homography(&pose, FOCAL, FOCAL),
            focal_length_x: FOCAL,
            focal_length_y: FOCAL,
            derivatives: rotation_derivatives(0.0, 0.0, 0.0),
        };
        let s = j.sample(10.0, 0.0, 1.0, 0.0, 0.0);
        // du/dtx = f / z, du/dtz = -f x / z²
        assert!((s.jacobian[3] - 3.0).abs() < 1e-5);
        assert!((s.jacobian[5] + 0.3).abs() < 1e-5);
        assert_eq!(s.jacobian[4], 0.0);
        assert_eq!(s.row::<3>(), [s.jacobian[3], s.jacobian[4], s.jacobian[5]]);
    }

    #[test]
    fn pose_off_image_abandons_the_level() {
        let t = Point3::new(0.0, 0.0, 150.0);
        let mut tracker = tracker(config(), t);
        let identity = rotation_from_euler(0.0, 0.0, 0.0);
        // the plane's centre now projects to u = 960
        tracker.update_rotation_and_translation(&identity, Point3::new(400.0, 0.0, 150.0));
        let pose = *tracker.pose();
        let homography = *tracker.transformation().homography();

        for update_type in [TransformType::Translation, TransformType::Projective] {
            let converged = tracker
                .iteratively_refine_track(&render(t), 0, update_type, &Planar6dofUpdateParams::default())
                .unwrap();
            assert!(!converged, "{update_type}");
            assert_eq!(*tracker.pose(), pose);
            assert_eq!(*tracker.transformation().homography(), homography);
        }
    }
}
