//! Pyramidal Lucas-Kanade template trackers.
//!
//! Every tracker aligns a template against a new frame coarse to fine. The
//! per-level work is behind the [`Refiner`] trait; the level loop itself lives
//! in [`driver`] and is shared by all variants.

pub mod config;
pub mod dense;
mod driver;
pub mod planar6dof;
pub mod sampled;
pub mod slow;

use log::{trace, warn};

use crate::arena::Arena;
use crate::array::{Array2, ImageU8};
use crate::error::{Result, TrackerError};
use crate::geometry::{Point, Quadrilateral, Rectangle};
use crate::gradient::{compute_x_gradient, compute_y_gradient};
use crate::grid::{linspace, Meshgrid};
use crate::homography::{Mat3, MIN_PROJECTIVE_NORMALIZATION};
use crate::interp::{bilinear_in_bounds, interp2_affine};
use crate::pyramid::{ImagePyramid, PyramidKind};
use crate::solve::{accumulate_rhs, SymmetricMatrix};
use crate::transform::{PlanarTransformation, TransformType};
use crate::verify::VerifyResult;

use config::UpdateParams;

/// Iterations compared when deciding whether the warp stopped moving.
pub const NUM_PREVIOUS_QUADS_TO_COMPARE: usize = 2;

/// Fewer in-bounds samples than this abandons the current refinement.
pub(crate) const MIN_IN_BOUNDS_SAMPLES: usize = 16;

/// Outcome of one `update_track` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackResult {
    /// Whether the last refinement at the finest level converged.
    pub converged: bool,
    pub verify: VerifyResult,
}

/// One template sample: position relative to the template centre (template
/// pixels), intensity gradient per pixel (grayvalues / 255) and grayvalue.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TemplateSample {
    pub x: f32,
    pub y: f32,
    pub x_gradient: f32,
    pub y_gradient: f32,
    pub grayvalue: f32,
}

impl TemplateSample {
    /// Partial derivatives of intensity w.r.t. the `N` parameters of a
    /// translation (2), affine (6) or projective (8) increment.
    #[inline]
    pub(crate) fn jacobian<const N: usize>(&self) -> [f32; N] {
        let (x, y) = (self.x, self.y);
        let (gx, gy) = (self.x_gradient, self.y_gradient);
        let mut row = [0.0f32; N];
        if N == 2 {
            row[0] = gx;
            row[1] = gy;
            return row;
        }
        let full = [
            x * gx,
            y * gx,
            gx,
            x * gy,
            y * gy,
            gy,
            -x * x * gx - x * y * gy,
            -x * y * gx - y * y * gy,
        ];
        row.copy_from_slice(&full[..N]);
        row
    }
}

/// A homography rewritten for frames `image_scale` times smaller than the
/// base image, applied to zero-centred template coordinates.
///
/// Points whose projective normalization vanishes map to NaN, which every
/// bounds check rejects.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ScaledHomography {
    h: Mat3,
    offset: Point<f32>,
}

impl ScaledHomography {
    pub fn new(transformation: &PlanarTransformation, image_scale: f32) -> Self {
        let h = transformation.homography();
        let s = image_scale;
        Self {
            h: [
                [h[0][0], h[0][1], h[0][2] / s],
                [h[1][0], h[1][1], h[1][2] / s],
                [h[2][0] * s, h[2][1] * s, h[2][2]],
            ],
            offset: transformation.center_offset(s),
        }
    }

    pub fn from_parts(h: Mat3, offset: Point<f32>) -> Self {
        Self { h, offset }
    }

    #[inline]
    pub fn map(&self, x: f32, y: f32) -> (f32, f32) {
        let h = &self.h;
        let n = h[2][0] * x + h[2][1] * y + h[2][2];
        if n.abs() < MIN_PROJECTIVE_NORMALIZATION {
            return (f32::NAN, f32::NAN);
        }
        let xt = (h[0][0] * x + h[0][1] * y + h[0][2]) / n + self.offset.x;
        let yt = (h[1][0] * x + h[1][1] * y + h[1][2]) / n + self.offset.y;
        (xt, yt)
    }
}

/// Sliding window of the reference quad's image over the last iterations.
#[derive(Debug, Clone)]
pub(crate) struct CornerHistory {
    reference: Quadrilateral<f32>,
    previous: [Quadrilateral<f32>; NUM_PREVIOUS_QUADS_TO_COMPARE],
}

impl CornerHistory {
    /// `reference` is zero-centred in the transformation's input units.
    pub fn new(reference: Quadrilateral<f32>) -> Self {
        Self { reference, previous: [Quadrilateral::splat(-1e10); NUM_PREVIOUS_QUADS_TO_COMPARE] }
    }

    /// Reference quad spanning a `width x height` base image.
    pub fn for_base_image(width: u32, height: u32) -> Self {
        let hw = width as f32 / 2.0;
        let hh = height as f32 / 2.0;
        Self::new(Quadrilateral::new(
            Point::new(-hw, -hh),
            Point::new(hw, -hh),
            Point::new(hw, hh),
            Point::new(-hw, hh),
        ))
    }

    /// Record the current warp and return the smallest mean corner
    /// displacement, in base-image pixels, against the remembered iterations.
    pub fn update(&mut self, transformation: &PlanarTransformation) -> f32 {
        let current = transformation.transform_centered_quad(&self.reference, 1.0);
        let min_change = self
            .previous
            .iter()
            .map(|q| q.mean_corner_distance(&current))
            .fold(f32::MAX, f32::min);
        self.previous.rotate_left(1);
        self.previous[NUM_PREVIOUS_QUADS_TO_COMPARE - 1] = current;
        min_change
    }
}

/// Per-level refinement, driven coarse to fine by [`driver::run_levels`].
pub(crate) trait Refiner {
    type Snapshot;
    type Params;

    fn num_levels(&self) -> usize;
    fn transform_type(&self) -> TransformType;
    fn snapshot(&self) -> Self::Snapshot;
    fn restore(&mut self, snapshot: Self::Snapshot);

    /// Refine at `level` with increments of `update_type`; returns whether it converged.
    fn refine_level(
        &mut self,
        next: &ImagePyramid,
        level: usize,
        update_type: TransformType,
        params: &Self::Params,
    ) -> Result<bool>;
}

// ── validation ──

/// Base-image pixels per template pixel, which must be a power of two.
pub(crate) fn image_scale(base_width: u32, image_width: u32) -> Result<f32> {
    if image_width == 0 || base_width % image_width != 0 || !(base_width / image_width).is_power_of_two() {
        return Err(TrackerError::size(
            "The template image must be a power of two smaller than the base image",
        ));
    }
    Ok((base_width / image_width) as f32)
}

pub(crate) fn validate_template(template: &ImageU8, num_levels: usize) -> Result<()> {
    if template.width == 0 || template.height == 0 {
        return Err(TrackerError::size("template widths and heights must be greater than zero"));
    }
    for level in 0..num_levels.saturating_sub(1) {
        if (template.width >> level) % 2 != 0 || (template.height >> level) % 2 != 0 {
            return Err(TrackerError::size(format!(
                "template widths and heights must be divisible by 2^{}",
                num_levels - 1
            )));
        }
    }
    Ok(())
}

pub(crate) fn validate_next_image(next: &ImageU8, width: u32, height: u32) -> Result<()> {
    if next.width != width || next.height != height {
        return Err(TrackerError::size(format!(
            "next image is {}x{}, must be the same size as the template ({width}x{height})",
            next.width, next.height
        )));
    }
    Ok(())
}

pub(crate) fn validate_update_params(params: &UpdateParams) -> Result<()> {
    config::validate_iterations(params.max_iterations)?;
    if params.convergence_tolerance <= 0.0 || !params.convergence_tolerance.is_finite() {
        return Err(TrackerError::param("convergence_tolerance must be greater than zero"));
    }
    Ok(())
}

pub(crate) fn validate_level(level: usize, num_levels: usize) -> Result<()> {
    if level >= num_levels {
        return Err(TrackerError::param(format!(
            "pyramid level {level} is invalid, the tracker has {num_levels}"
        )));
    }
    Ok(())
}

/// Bounding box of `quad` grown by `percent`, in template-image pixels.
///
/// The box must lie inside the template image.
pub(crate) fn template_region(
    quad: &Quadrilateral<f32>,
    image_scale: f32,
    percent: f32,
    template: &ImageU8,
) -> Result<Rectangle<f32>> {
    let r = quad.bounding_rect().scaled(percent);
    let region = Rectangle::new(
        r.left / image_scale,
        r.right / image_scale,
        r.top / image_scale,
        r.bottom / image_scale,
    );
    if region.left < 0.0
        || region.top < 0.0
        || region.right > template.width as f32 - 1.0
        || region.bottom > template.height as f32 - 1.0
    {
        return Err(TrackerError::param(format!(
            "template region {region:?} extends outside the {}x{} template image",
            template.width, template.height
        )));
    }
    Ok(region)
}

/// Sample grid of `level`: `floor(size / 2^level)` points spanning the
/// region, centred on zero.
pub(crate) fn template_grid(region_width: f32, region_height: f32, level: usize) -> Result<Meshgrid> {
    let scale = (1u32 << level) as f32;
    let nx = (region_width / scale).floor() as usize;
    let ny = (region_height / scale).floor() as usize;
    if nx < 3 || ny < 3 {
        return Err(TrackerError::size(format!(
            "template region {region_width}x{region_height} is too small for pyramid level {level}"
        )));
    }
    Ok(Meshgrid::new(
        linspace(-region_width / 2.0, region_width / 2.0, nx),
        linspace(-region_height / 2.0, region_height / 2.0, ny),
    ))
}

/// Resample `level` of a template pyramid on a grid centred at `center`
/// (template-image pixels).
///
/// Grid points whose support falls off a decimated level are read from the
/// full-resolution image instead.
pub(crate) fn sample_template(
    pyramid: &ImagePyramid,
    level: usize,
    grid: &Meshgrid,
    center: Point<f32>,
) -> Result<Array2<f32>> {
    let f = pyramid.factor(level);
    let (ox, oy) = pyramid.to_level(level, center.x, center.y);
    let h = [[1.0 / f, 0.0, 0.0], [0.0, 1.0 / f, 0.0], [0.0, 0.0, 1.0]];
    let mut out = Array2::new(grid.width() as u32, grid.height() as u32);
    interp2_affine(pyramid.level(level), grid, &h, Point::new(ox, oy), &mut out, f32::NAN)?;

    if pyramid.kind() == PyramidKind::Decimated && level > 0 {
        let base = pyramid.level(0);
        for (iy, gy) in grid.y.iter().enumerate() {
            for (ix, gx) in grid.x.iter().enumerate() {
                if out.get(ix as u32, iy as u32).is_nan() {
                    let v = bilinear_in_bounds(base, gx + center.x, gy + center.y)
                        .unwrap_or(0.0);
                    out.set(ix as u32, iy as u32, v);
                }
            }
        }
    }
    Ok(out)
}

/// Central-difference gradients of a sampled template, in grayvalues / 255
/// per template pixel.
pub(crate) fn template_gradients(
    template: &Array2<f32>,
    grid: &Meshgrid,
) -> Result<(Array2<f32>, Array2<f32>)> {
    let mut gx = Array2::new(template.width, template.height);
    let mut gy = Array2::new(template.width, template.height);
    compute_x_gradient(template, &mut gx)?;
    compute_y_gradient(template, &mut gy)?;
    let fx = 1.0 / (2.0 * 255.0 * grid.x.increment());
    let fy = 1.0 / (2.0 * 255.0 * grid.y.increment());
    Ok((gx.map(|g| g * fx), gy.map(|g| g * fy)))
}

/// Shared Gauss-Newton loop of the dense and sampled trackers.
pub(crate) struct LevelRefinement<'a> {
    pub next: &'a ImagePyramid,
    pub level: usize,
    pub image_scale: f32,
    pub params: &'a UpdateParams,
}

impl LevelRefinement<'_> {
    /// Iterate until the reference quad stops moving, `max_iterations` is
    /// reached, or a soft failure abandons the level.
    ///
    /// `samples` must yield the same `num_samples` samples on every call.
    pub fn run<F, I>(
        &self,
        transformation: &mut PlanarTransformation,
        history: &mut CornerHistory,
        scratch: &mut Arena<f32>,
        update_type: TransformType,
        samples: F,
        num_samples: usize,
    ) -> Result<bool>
    where
        F: Fn() -> I,
        I: Iterator<Item = TemplateSample>,
    {
        if !transformation.transform_type().can_update_with(update_type) {
            return Err(TrackerError::param(format!(
                "cannot refine a {} transformation with {update_type} increments",
                transformation.transform_type()
            )));
        }
        let ctx = (transformation, history, scratch);
        match update_type {
            TransformType::Translation => self.run_n::<2, _, _>(ctx, update_type, samples, num_samples),
            TransformType::Affine => self.run_n::<6, _, _>(ctx, update_type, samples, num_samples),
            TransformType::Projective => self.run_n::<8, _, _>(ctx, update_type, samples, num_samples),
        }
    }

    fn run_n<const N: usize, F, I>(
        &self,
        (transformation, history, scratch): (&mut PlanarTransformation, &mut CornerHistory, &mut Arena<f32>),
        update_type: TransformType,
        samples: F,
        num_samples: usize,
    ) -> Result<bool>
    where
        F: Fn() -> I,
        I: Iterator<Item = TemplateSample>,
    {
        for iteration in 0..self.params.max_iterations {
            let map = ScaledHomography::new(transformation, self.image_scale);
            let mut scope = scratch.scope();
            let warped = scope.alloc(num_samples)?;

            let mut num_in_bounds = 0usize;
            for (w, s) in warped.iter_mut().zip(samples()) {
                let (x, y) = map.map(s.x, s.y);
                *w = match self.next.sample(self.level, x, y) {
                    Some(v) => {
                        num_in_bounds += 1;
                        v
                    }
                    None => f32::NAN,
                };
            }
            if num_in_bounds < MIN_IN_BOUNDS_SAMPLES {
                warn!("Template drifted too far out of image.");
                return Ok(false);
            }

            let mut ata = SymmetricMatrix::<N>::zeros();
            let mut b = [0.0f32; N];
            for (&w, s) in warped.iter().zip(samples()) {
                if w.is_nan() {
                    continue;
                }
                let row = s.jacobian::<N>();
                ata.accumulate_outer_product(&row);
                accumulate_rhs(&mut b, &row, (w - s.grayvalue) / 255.0);
            }
            ata.mirror_upper();

            let Some(update) = ata.solve_cholesky(&b) else {
                warn!("numericalFailure");
                return Ok(false);
            };
            // the family was checked up front, so only a singular increment can fail here
            if let Err(e) = transformation.update(&update, self.image_scale, update_type) {
                warn!("numericalFailure: {e}");
                return Ok(false);
            }

            let change = history.update(transformation);
            trace!(
                "level {} {update_type} iteration {iteration}: {num_in_bounds} in bounds, change {change}",
                self.level
            );
            if change < self.params.convergence_tolerance {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_quad() -> Quadrilateral<f32> {
        Quadrilateral::new(
            Point::new(10.0, 10.0),
            Point::new(50.0, 10.0),
            Point::new(50.0, 40.0),
            Point::new(10.0, 40.0),
        )
    }

    #[test]
    fn image_scale_must_be_power_of_two() {
        assert_eq!(image_scale(320, 320).unwrap(), 1.0);
        assert_eq!(image_scale(320, 80).unwrap(), 4.0);
        assert!(image_scale(320, 0).is_err());
        assert!(image_scale(320, 107).is_err());
        assert!(image_scale(300, 100).is_err());
    }

    #[test]
    fn template_dims_must_halve_evenly() {
        let img = ImageU8::new(80, 60);
        assert!(validate_template(&img, 3).is_ok());
        // 60 >> 2 = 15 is only a problem at a fourth level
        assert!(validate_template(&img, 4).is_err());
        assert!(validate_template(&ImageU8::new(0, 10), 1).is_err());
    }

    #[test]
    fn scaled_homography_matches_transform_points() {
        let mut t = PlanarTransformation::from_quad(TransformType::Projective, unit_quad());
        t.set_homography([[1.1, 0.05, 4.0], [-0.02, 0.95, -2.0], [0.001, -0.0005, 1.0]]);
        let map = ScaledHomography::new(&t, 2.0);
        let (x, y) = map.map(3.0, -5.0);

        let mut xo = [0.0];
        let mut yo = [0.0];
        t.transform_points(&[3.0], &[-5.0], 2.0, true, false, &mut xo, &mut yo).unwrap();
        assert!((x - xo[0]).abs() < 1e-4, "{x} vs {}", xo[0]);
        assert!((y - yo[0]).abs() < 1e-4, "{y} vs {}", yo[0]);
    }

    #[test]
    fn degenerate_normalization_maps_to_nan() {
        let map = ScaledHomography::from_parts(
            [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [1.0, 0.0, 0.0]],
            Point::new(0.0, 0.0),
        );
        let (x, y) = map.map(0.0, 4.0);
        assert!(x.is_nan() && y.is_nan());
    }

    #[test]
    fn corner_history_detects_standstill() {
        let t = PlanarTransformation::from_quad(TransformType::Affine, unit_quad());
        let mut history = CornerHistory::for_base_image(320, 240);
        assert!(history.update(&t) > 1e9);
        assert_eq!(history.update(&t), 0.0);

        let moved = t.clone().with_homography([[1.0, 0.0, 2.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]]);
        let change = history.update(&moved);
        assert!((change - 2.0).abs() < 1e-3, "{change}");
    }

    #[test]
    fn corner_change_is_in_base_pixels_on_every_level() {
        let t = PlanarTransformation::from_quad(TransformType::Translation, unit_quad());
        let mut history = CornerHistory::for_base_image(320, 240);
        history.update(&t);
        // a 0.2 px step must not pass a 0.1 px tolerance, whatever level produced it
        let stepped = t.clone().with_homography([[1.0, 0.0, 0.2], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]]);
        let change = history.update(&stepped);
        assert!((change - 0.2).abs() < 1e-3, "{change}");
        assert!(change >= 0.1);
    }

    #[test]
    fn jacobian_rows_by_family() {
        let s = TemplateSample { x: 2.0, y: 3.0, x_gradient: 0.5, y_gradient: -1.0, grayvalue: 0.0 };
        assert_eq!(s.jacobian::<2>(), [0.5, -1.0]);
        assert_eq!(s.jacobian::<6>(), [1.0, 1.5, 0.5, -2.0, -3.0, -1.0]);
        let p = s.jacobian::<8>();
        assert_eq!(p[6], -4.0 * 0.5 + 6.0);
        assert_eq!(p[7], -6.0 * 0.5 + 9.0);
    }

    #[test]
    fn template_region_must_fit() {
        let img = ImageU8::new(80, 60);
        let r = template_region(&unit_quad(), 1.0, 1.0, &img).unwrap();
        assert_eq!(r.width(), 40.0);
        assert!(template_region(&unit_quad(), 1.0, 3.0, &img).is_err());
        assert!(template_grid(4.0, 4.0, 1).is_err());
    }

    #[test]
    fn sampled_template_uses_pixel_centres() {
        let img = ImageU8::from_fn(16, 16, |x, _| (x * 10) as u8);
        let grid = template_grid(8.0, 8.0, 0).unwrap();
        let shared = ImagePyramid::build(&img, 1, false);
        let t = sample_template(&shared, 0, &grid, Point::new(7.5, 7.5)).unwrap();
        // leftmost column sits at x = 3.5
        assert!((t.get(0, 0) - 35.0).abs() < 1e-3);

        let decimated = ImagePyramid::build(&img, 2, true);
        let grid = template_grid(8.0, 8.0, 1).unwrap();
        let t = sample_template(&decimated, 1, &grid, Point::new(7.5, 7.5)).unwrap();
        assert!(t.iter().all(|v| v.is_finite()));
    }
}
