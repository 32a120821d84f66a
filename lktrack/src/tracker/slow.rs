//! Reference dense tracker.
//!
//! Built from the generic array primitives only: explicit coordinate arrays,
//! `transform_points` and per-pixel sampling, with optional Gaussian × mask
//! weighting and a ridge term on the normal equations. Slower than
//! [`DenseTracker`](super::dense::DenseTracker) but easy to reason about,
//! which makes it the baseline the fast variants are compared against.

use log::{debug, trace, warn};

use crate::arena::Arena;
use crate::array::{Array2, ImageU8};
use crate::error::{Result, TrackerError};
use crate::geometry::{Point, Quadrilateral};
use crate::grid::Meshgrid;
use crate::interp::{bilinear_in_bounds, interp2};
use crate::pyramid::ImagePyramid;
use crate::solve::{accumulate_rhs, SymmetricMatrix};
use crate::transform::{PlanarTransformation, TransformType};

use super::config::{SlowConfig, UpdateParams};
use super::driver::{run_levels, LevelPolicy};
use super::{
    image_scale, template_gradients, template_grid, template_region, validate_level,
    validate_next_image, validate_template, validate_update_params, CornerHistory, Refiner,
    TemplateSample, MIN_IN_BOUNDS_SAMPLES,
};

/// Grayvalue marking a template or frame sample without full bilinear support.
const INVALID_SAMPLE: f32 = -1.0;

#[derive(Debug, Clone)]
struct SlowLevel {
    /// Zero-centred template coordinates, row-major.
    xs: Vec<f32>,
    ys: Vec<f32>,
    template: Array2<f32>,
    x_gradient: Array2<f32>,
    y_gradient: Array2<f32>,
    weights: Array2<f32>,
}

impl SlowLevel {
    fn sample(&self, i: usize) -> TemplateSample {
        let w = self.template.width as usize;
        let (x, y) = ((i % w) as u32, (i / w) as u32);
        TemplateSample {
            x: self.xs[i],
            y: self.ys[i],
            x_gradient: self.x_gradient.get(x, y),
            y_gradient: self.y_gradient.get(x, y),
            grayvalue: self.template.get(x, y),
        }
    }

    fn weight(&self, i: usize) -> f32 {
        let w = self.template.width as usize;
        self.weights.get((i % w) as u32, (i / w) as u32)
    }
}

/// Per-call knobs of [`SlowTracker`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlowParams {
    pub update: UpdateParams,
    /// Weight samples by the Gaussian × template mask computed at construction.
    pub use_weights: bool,
}

impl Default for SlowParams {
    fn default() -> Self {
        Self { update: UpdateParams::default(), use_weights: false }
    }
}

#[derive(Debug, Clone)]
pub struct SlowTracker {
    config: SlowConfig,
    template_width: u32,
    template_height: u32,
    image_scale: f32,
    transformation: PlanarTransformation,
    levels: Vec<SlowLevel>,
    scratch: Arena<f32>,
}

impl SlowTracker {
    pub fn new(template: &ImageU8, quad: Quadrilateral<f32>, config: SlowConfig) -> Result<Self> {
        config.validate()?;
        validate_template(template, config.num_pyramid_levels)?;
        let image_scale = image_scale(config.base_image_width, template.width)?;
        let region = template_region(&quad, image_scale, config.scale_template_region_percent, template)?;
        let region_width = region.width() + 1.0;
        let region_height = region.height() + 1.0;
        let sigma = (region_width * region_width + region_height * region_height).sqrt() / 2.0;

        let transformation = PlanarTransformation::from_quad(config.transform_type, quad);
        let center = transformation.center_offset(image_scale);

        let mut levels = Vec::with_capacity(config.num_pyramid_levels);
        for level in 0..config.num_pyramid_levels {
            let grid = template_grid(region_width, region_height, level)?;
            let (gx_coords, gy_coords) = grid.evaluate();
            let xs: Vec<f32> = gx_coords.iter().collect();
            let ys: Vec<f32> = gy_coords.iter().collect();

            let mut template_values = Array2::new(gx_coords.width, gx_coords.height);
            interp2(
                template,
                &gx_coords.map(|x| x + center.x),
                &gy_coords.map(|y| y + center.y),
                &mut template_values,
                INVALID_SAMPLE,
            )?;
            let (x_gradient, y_gradient) = valid_template_gradients(&template_values, &grid)?;

            let weights = gaussian_mask_weights(&gx_coords, &gy_coords, sigma, |x, y| {
                let p = Point::new((x + center.x) * image_scale, (y + center.y) * image_scale);
                point_in_quad(&quad, p)
            });

            levels.push(SlowLevel { xs, ys, template: template_values, x_gradient, y_gradient, weights });
        }

        let scratch = Arena::with_capacity(3 * levels[0].xs.len());
        Ok(Self {
            config,
            template_width: template.width,
            template_height: template.height,
            image_scale,
            transformation,
            levels,
            scratch,
        })
    }

    pub fn transformation(&self) -> &PlanarTransformation {
        &self.transformation
    }

    pub fn set_transformation(&mut self, transformation: &PlanarTransformation) {
        self.transformation.set(transformation);
    }

    pub fn transformed_corners(&self) -> Quadrilateral<f32> {
        self.transformation.transformed_corners()
    }

    pub fn ridge_weight(&self) -> f32 {
        self.config.ridge_weight
    }

    /// Weights of `level`, row-major over the template grid.
    pub fn weights(&self, level: usize) -> Option<&Array2<f32>> {
        self.levels.get(level).map(|l| &l.weights)
    }

    /// Refine every level coarse to fine. There is no verification step.
    pub fn update_track(&mut self, next: &ImageU8, params: &SlowParams) -> Result<bool> {
        validate_update_params(&params.update)?;
        validate_next_image(next, self.template_width, self.template_height)?;
        let pyramid = ImagePyramid::build(next, 1, false);
        run_levels(self, &pyramid, params, LevelPolicy::KeepLast)
    }

    pub fn iteratively_refine_track(
        &mut self,
        next: &ImageU8,
        level: usize,
        update_type: TransformType,
        params: &SlowParams,
    ) -> Result<bool> {
        validate_update_params(&params.update)?;
        validate_next_image(next, self.template_width, self.template_height)?;
        validate_level(level, self.levels.len())?;
        let pyramid = ImagePyramid::build(next, 1, false);
        self.refine_level(&pyramid, level, update_type, params)
    }

    fn refine_n<const N: usize>(
        &mut self,
        next: &ImageU8,
        level: usize,
        update_type: TransformType,
        params: &SlowParams,
    ) -> Result<bool> {
        let Self { config, image_scale, transformation, levels, scratch, .. } = self;
        let cached = &levels[level];
        let n = cached.xs.len();
        let mut history = CornerHistory::for_base_image(config.base_image_width, config.base_image_height);

        for iteration in 0..params.update.max_iterations {
            let mut scope = scratch.scope();
            let x_out = scope.alloc(n)?;
            let y_out = scope.alloc(n)?;
            let warped = scope.alloc(n)?;

            transformation.transform_points(&cached.xs, &cached.ys, *image_scale, true, false, x_out, y_out)?;
            let mut num_in_bounds = 0usize;
            for i in 0..n {
                warped[i] = match bilinear_in_bounds(next, x_out[i], y_out[i]) {
                    Some(v) => {
                        num_in_bounds += 1;
                        v
                    }
                    None => INVALID_SAMPLE,
                };
            }
            if num_in_bounds < MIN_IN_BOUNDS_SAMPLES {
                warn!("Template drifted too far out of image.");
                return Ok(false);
            }

            let mut awat = SymmetricMatrix::<N>::zeros();
            let mut b = [0.0f32; N];
            for i in 0..n {
                let s = cached.sample(i);
                if warped[i] == INVALID_SAMPLE || s.grayvalue == INVALID_SAMPLE {
                    continue;
                }
                let w = if params.use_weights { cached.weight(i) } else { 1.0 };
                if w == 0.0 {
                    continue;
                }
                let row = s.jacobian::<N>();
                awat.accumulate_weighted(&row, w);
                accumulate_rhs(&mut b, &row, w * (warped[i] - s.grayvalue) / 255.0);
            }
            awat.add_ridge(config.ridge_weight);
            awat.mirror_upper();

            let Some(update) = awat.solve_cholesky(&b) else {
                warn!("numericalFailure");
                return Ok(false);
            };
            if let Err(e) = transformation.update(&update, *image_scale, update_type) {
                warn!("numericalFailure: {e}");
                return Ok(false);
            }

            let change = history.update(transformation);
            trace!("slow level {level} {update_type} iteration {iteration}: change {change}");
            if change < params.update.convergence_tolerance {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

impl Refiner for SlowTracker {
    type Snapshot = PlanarTransformation;
    type Params = SlowParams;

    fn num_levels(&self) -> usize {
        self.levels.len()
    }

    fn transform_type(&self) -> TransformType {
        self.transformation.transform_type()
    }

    fn snapshot(&self) -> PlanarTransformation {
        self.transformation.clone()
    }

    fn restore(&mut self, snapshot: PlanarTransformation) {
        self.transformation = snapshot;
    }

    fn refine_level(
        &mut self,
        next: &ImagePyramid,
        level: usize,
        update_type: TransformType,
        params: &SlowParams,
    ) -> Result<bool> {
        if !self.transformation.transform_type().can_update_with(update_type) {
            return Err(TrackerError::param(format!(
                "cannot refine a {} transformation with {update_type} increments",
                self.transformation.transform_type()
            )));
        }
        let next = next.level(0);
        let converged = match update_type {
            TransformType::Translation => self.refine_n::<2>(next, level, update_type, params)?,
            TransformType::Affine => self.refine_n::<6>(next, level, update_type, params)?,
            TransformType::Projective => self.refine_n::<8>(next, level, update_type, params)?,
        };
        debug!("slow level {level} {update_type}: converged {converged}");
        Ok(converged)
    }
}

/// Template gradients with every difference that touches an `INVALID_SAMPLE` zeroed.
fn valid_template_gradients(template: &Array2<f32>, grid: &Meshgrid) -> Result<(Array2<f32>, Array2<f32>)> {
    let (mut gx, mut gy) = template_gradients(template, grid)?;
    let (w, h) = (template.width, template.height);
    if w < 3 || h < 3 {
        return Ok((gx, gy));
    }
    let invalid = |x: u32, y: u32| template.get(x, y) == INVALID_SAMPLE;
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let centre = invalid(x, y);
            if centre || invalid(x - 1, y) || invalid(x + 1, y) {
                gx.set(x, y, 0.0);
            }
            if centre || invalid(x, y - 1) || invalid(x, y + 1) {
                gy.set(x, y, 0.0);
            }
        }
    }
    Ok((gx, gy))
}

/// `exp(-r² / 2σ²)` × mask on a coordinate grid, with the four grid corners zeroed.
fn gaussian_mask_weights(
    xs: &Array2<f32>,
    ys: &Array2<f32>,
    sigma: f32,
    inside: impl Fn(f32, f32) -> bool,
) -> Array2<f32> {
    let two_sigma_sq = 2.0 * sigma * sigma;
    let mut weights = Array2::from_fn(xs.width, xs.height, |ix, iy| {
        let (x, y) = (xs.get(ix, iy), ys.get(ix, iy));
        if inside(x, y) {
            (-(x * x + y * y) / two_sigma_sq).exp()
        } else {
            0.0
        }
    });
    let (w, h) = (weights.width, weights.height);
    if w > 0 && h > 0 {
        for (x, y) in [(0, 0), (w - 1, 0), (0, h - 1), (w - 1, h - 1)] {
            weights.set(x, y, 0.0);
        }
    }
    weights
}

/// Point-in-convex-quad test; points on an edge count as inside.
fn point_in_quad(quad: &Quadrilateral<f32>, p: Point<f32>) -> bool {
    let cw = quad.compute_clockwise_corners();
    let mut sign = 0.0f32;
    for i in 0..4 {
        let a = cw[i];
        let b = cw[(i + 1) % 4];
        let cross = (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x);
        if cross.abs() <= 1e-4 {
            continue;
        }
        if sign == 0.0 {
            sign = cross.signum();
        } else if cross.signum() != sign {
            return false;
        }
    }
    true
}
