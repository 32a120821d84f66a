//! Dense tracker with per-level cached template gradients.
//!
//! Every template pixel of a level contributes to the normal equations.
//! Template images and gradients are computed once at construction; each
//! iteration only samples the new frame.

use log::debug;

use crate::arena::Arena;
use crate::array::{Array2, ImageU8};
use crate::error::Result;
use crate::geometry::{Quadrilateral, Rectangle};
use crate::grid::Meshgrid;
use crate::interp::bilinear_in_bounds;
use crate::pyramid::ImagePyramid;
use crate::transform::{PlanarTransformation, TransformType};
use crate::verify::{VerifyAccumulator, VerifyResult};

use super::config::{TrackerConfig, UpdateParams};
use super::driver::{run_levels, LevelPolicy};
use super::{
    image_scale, sample_template, template_gradients, template_grid, template_region,
    validate_level, validate_next_image, validate_template, validate_update_params, CornerHistory,
    LevelRefinement, Refiner, ScaledHomography, TemplateSample, TrackResult,
};

/// Cached template data for one pyramid level.
#[derive(Debug, Clone)]
struct DenseLevel {
    grid: Meshgrid,
    template: Array2<f32>,
    x_gradient: Array2<f32>,
    y_gradient: Array2<f32>,
}

impl DenseLevel {
    fn samples(&self) -> impl Iterator<Item = TemplateSample> + '_ {
        self.grid.y.iter().enumerate().flat_map(move |(iy, y)| {
            self.grid.x.iter().enumerate().map(move |(ix, x)| {
                let (ix, iy) = (ix as u32, iy as u32);
                TemplateSample {
                    x,
                    y,
                    x_gradient: self.x_gradient.get(ix, iy),
                    y_gradient: self.y_gradient.get(ix, iy),
                    grayvalue: self.template.get(ix, iy),
                }
            })
        })
    }
}

/// Dense Lucas-Kanade tracker for translation, affine or projective motion.
#[derive(Debug, Clone)]
pub struct DenseTracker {
    config: TrackerConfig,
    template_width: u32,
    template_height: u32,
    image_scale: f32,
    region: Rectangle<f32>,
    transformation: PlanarTransformation,
    levels: Vec<DenseLevel>,
    scratch: Arena<f32>,
}

impl DenseTracker {
    /// Build the template pyramid for `quad` (base-image coordinates) in `template`.
    pub fn new(template: &ImageU8, quad: Quadrilateral<f32>, config: TrackerConfig) -> Result<Self> {
        config.validate()?;
        validate_template(template, config.num_pyramid_levels)?;
        let image_scale = image_scale(config.base_image_width, template.width)?;
        let region = template_region(&quad, image_scale, config.scale_template_region_percent, template)?;
        let region_width = region.width() + 1.0;
        let region_height = region.height() + 1.0;

        let transformation = PlanarTransformation::from_quad(config.transform_type, quad);
        let center = transformation.center_offset(image_scale);
        let pyramid = ImagePyramid::build(template, config.num_pyramid_levels, config.smooth_pyramid);

        let levels = (0..config.num_pyramid_levels)
            .map(|level| {
                let grid = template_grid(region_width, region_height, level)?;
                let template = sample_template(&pyramid, level, &grid, center)?;
                let (x_gradient, y_gradient) = template_gradients(&template, &grid)?;
                Ok(DenseLevel { grid, template, x_gradient, y_gradient })
            })
            .collect::<Result<Vec<_>>>()?;

        let scratch = Arena::with_capacity(levels[0].grid.num_points());
        debug!(
            "dense {} tracker: {}x{} template, {} levels, {} samples at level 0",
            config.transform_type,
            template.width,
            template.height,
            levels.len(),
            levels[0].grid.num_points()
        );

        Ok(Self {
            config,
            template_width: template.width,
            template_height: template.height,
            image_scale,
            region,
            transformation,
            levels,
            scratch,
        })
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn transformation(&self) -> &PlanarTransformation {
        &self.transformation
    }

    /// Replace the current estimate, e.g. to re-seed from a new detection.
    pub fn set_transformation(&mut self, transformation: &PlanarTransformation) {
        self.transformation.set(transformation);
    }

    pub fn transformed_corners(&self) -> Quadrilateral<f32> {
        self.transformation.transformed_corners()
    }

    /// Template region in template-image pixels.
    pub fn template_region(&self) -> Rectangle<f32> {
        self.region
    }

    pub fn num_template_pixels(&self, level: usize) -> usize {
        self.levels.get(level).map_or(0, |l| l.grid.num_points())
    }

    /// Track `template` into `next`: refine every level coarse to fine, then verify.
    pub fn update_track(&mut self, next: &ImageU8, params: &UpdateParams) -> Result<TrackResult> {
        validate_update_params(params)?;
        validate_next_image(next, self.template_width, self.template_height)?;
        let pyramid = ImagePyramid::build(next, self.levels.len(), self.config.smooth_pyramid);

        let converged = run_levels(self, &pyramid, params, LevelPolicy::KeepLast)?;
        let verify = self.verify_track(next, params.verify_max_pixel_difference)?;
        Ok(TrackResult { converged, verify })
    }

    /// Refine a single level with increments of `update_type`.
    pub fn iteratively_refine_track(
        &mut self,
        next: &ImageU8,
        level: usize,
        update_type: TransformType,
        params: &UpdateParams,
    ) -> Result<bool> {
        validate_update_params(params)?;
        validate_next_image(next, self.template_width, self.template_height)?;
        validate_level(level, self.levels.len())?;
        let pyramid = ImagePyramid::build(next, self.levels.len(), self.config.smooth_pyramid);
        self.refine_level(&pyramid, level, update_type, params)
    }

    /// Compare the finest template against `next` under the current warp.
    pub fn verify_track(&self, next: &ImageU8, max_pixel_difference: u8) -> Result<VerifyResult> {
        validate_next_image(next, self.template_width, self.template_height)?;
        let map = ScaledHomography::new(&self.transformation, self.image_scale);
        let mut acc = VerifyAccumulator::new(max_pixel_difference);
        for s in self.levels[0].samples() {
            let (x, y) = map.map(s.x, s.y);
            if let Some(v) = bilinear_in_bounds(next, x, y) {
                acc.add(v.round() as i32, s.grayvalue.round() as i32);
            }
        }
        Ok(acc.finish())
    }
}

impl Refiner for DenseTracker {
    type Snapshot = PlanarTransformation;
    type Params = UpdateParams;

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
        params: &UpdateParams,
    ) -> Result<bool> {
        let Self { config, image_scale, transformation, levels, scratch, .. } = self;
        let cached = &levels[level];
        let mut history = CornerHistory::for_base_image(config.base_image_width, config.base_image_height);
        let refinement = LevelRefinement { next, level, image_scale: *image_scale, params };
        let converged = refinement.run(
            transformation,
            &mut history,
            scratch,
            update_type,
            || cached.samples(),
            cached.grid.num_points(),
        )?;
        debug!("dense level {level} {update_type}: converged {converged}");
        Ok(converged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TrackerError;
    use crate::geometry::Point;

    fn blobs(w: u32, h: u32, dx: f32, dy: f32) -> ImageU8 {
        ImageU8::from_fn(w, h, |x, y| {
            let (x, y) = (x as f32 - dx, y as f32 - dy);
            let v = 128.0
                + 60.0 * (x * 0.21).sin() * (y * 0.17).cos()
                + 40.0 * ((x + 2.0 * y) * 0.09).sin();
            v.clamp(0.0, 255.0) as u8
        })
    }

    fn quad() -> Quadrilateral<f32> {
        Quadrilateral::new(
            Point::new(24.0, 16.0),
            Point::new(72.0, 16.0),
            Point::new(72.0, 56.0),
            Point::new(24.0, 56.0),
        )
    }

    fn config(t: TransformType, levels: usize) -> TrackerConfig {
        TrackerConfig::for_image(96, 72).with_transform_type(t).with_levels(levels)
    }

    #[test]
    fn identity_frame_converges_in_place() {
        let img = blobs(96, 72, 0.0, 0.0);
        let mut tracker = DenseTracker::new(&img, quad(), config(TransformType::Projective, 2)).unwrap();
        let result = tracker.update_track(&img, &UpdateParams::default()).unwrap();
        assert!(result.converged);
        let h = tracker.transformation().homography();
        assert!(h[0][2].abs() < 0.05 && h[1][2].abs() < 0.05, "{h:?}");
        assert!(result.verify.similar_fraction() > 0.99);
        assert!(result.verify.mean_absolute_difference <= 1);
    }

    #[test]
    fn recovers_small_translation() {
        let img = blobs(96, 72, 0.0, 0.0);
        let next = blobs(96, 72, 2.0, 1.0);
        for family in [TransformType::Translation, TransformType::Affine] {
            let mut tracker = DenseTracker::new(&img, quad(), config(family, 2)).unwrap();
            let result = tracker.update_track(&next, &UpdateParams::default()).unwrap();
            let h = tracker.transformation().homography();
            assert!((h[0][2] - 2.0).abs() < 0.2, "{family}: {h:?}");
            assert!((h[1][2] - 1.0).abs() < 0.2, "{family}: {h:?}");
            assert!(result.verify.similar_fraction() > 0.9, "{family}: {:?}", result.verify);
        }
    }

    #[test]
    fn next_image_must_match_template_size() {
        let img = blobs(96, 72, 0.0, 0.0);
        let mut tracker = DenseTracker::new(&img, quad(), config(TransformType::Affine, 1)).unwrap();
        let err = tracker.update_track(&ImageU8::new(48, 36), &UpdateParams::default()).unwrap_err();
        assert!(matches!(err, TrackerError::InvalidSize(_)));
    }

    #[test]
    fn refine_preconditions() {
        let img = blobs(96, 72, 0.0, 0.0);
        let mut tracker = DenseTracker::new(&img, quad(), config(TransformType::Affine, 2)).unwrap();
        let bad_iterations = UpdateParams { max_iterations: 0, ..UpdateParams::default() };
        assert!(tracker.update_track(&img, &bad_iterations).is_err());
        let bad_tolerance = UpdateParams { convergence_tolerance: 0.0, ..UpdateParams::default() };
        assert!(tracker.update_track(&img, &bad_tolerance).is_err());
        let err = tracker
            .iteratively_refine_track(&img, 2, TransformType::Translation, &UpdateParams::default())
            .unwrap_err();
        assert!(matches!(err, TrackerError::InvalidParameter(_)));
        // an affine tracker cannot take projective increments
        assert!(tracker
            .iteratively_refine_track(&img, 0, TransformType::Projective, &UpdateParams::default())
            .is_err());
    }

    #[test]
    fn blank_frame_is_a_soft_failure() {
        let img = blobs(96, 72, 0.0, 0.0);
        let mut tracker = DenseTracker::new(&img, quad(), config(TransformType::Affine, 1)).unwrap();
        let flat = ImageU8::filled(96, 72, 128);
        // whatever the refinement does on a featureless frame, it is not an error
        assert!(tracker.update_track(&flat, &UpdateParams::default()).is_ok());
    }

    #[test]
    fn drifted_template_reports_no_convergence() {
        let img = blobs(96, 72, 0.0, 0.0);
        let mut tracker = DenseTracker::new(&img, quad(), config(TransformType::Translation, 1)).unwrap();
        let far = tracker
            .transformation()
            .clone()
            .with_homography([[1.0, 0.0, 500.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]]);
        tracker.set_transformation(&far);
        let result = tracker.update_track(&img, &UpdateParams::default()).unwrap();
        assert!(!result.converged);
        assert_eq!(result.verify.num_in_bounds, 0);
        assert_eq!(result.verify.mean_absolute_difference, i32::MAX);
    }

    #[test]
    fn construction_rejects_bad_input() {
        let img = blobs(96, 72, 0.0, 0.0);
        // 72 >> 3 is odd
        assert!(DenseTracker::new(&img, quad(), config(TransformType::Affine, 5)).is_err());
        // base width not a power-of-two multiple
        let cfg = TrackerConfig { base_image_width: 100, ..config(TransformType::Affine, 1) };
        assert!(DenseTracker::new(&img, quad(), cfg).is_err());
        let outside = Quadrilateral::new(
            Point::new(-5.0, 0.0),
            Point::new(50.0, 0.0),
            Point::new(50.0, 40.0),
            Point::new(-5.0, 40.0),
        );
        assert!(DenseTracker::new(&img, outside, config(TransformType::Affine, 1)).is_err());
    }

    #[test]
    fn template_pushed_off_image_abandons_the_level() {
        let img = blobs(96, 72, 0.0, 0.0);
        let mut tracker = DenseTracker::new(&img, quad(), config(TransformType::Affine, 2)).unwrap();
        let off_image = tracker
            .transformation()
            .clone()
            .with_homography([[1.0, 0.0, 500.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]]);
        tracker.set_transformation(&off_image);

        for level in 0..2 {
            let converged = tracker
                .iteratively_refine_track(&img, level, TransformType::Affine, &UpdateParams::default())
                .unwrap();
            assert!(!converged, "level {level}");
            assert_eq!(tracker.transformation().homography(), off_image.homography());
        }
    }
}
