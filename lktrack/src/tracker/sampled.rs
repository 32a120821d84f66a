//! Sparse projective tracker.
//!
//! Only the strongest template gradients of each level are kept, so an
//! iteration costs `O(samples)` instead of `O(template pixels)`.

use log::{debug, warn};

use crate::arena::Arena;
use crate::array::{Array2, ImageU8};
use crate::error::Result;
use crate::geometry::{Quadrilateral, Rectangle};
use crate::gradient::squared_magnitude;
use crate::interp::bilinear_in_bounds;
use crate::pyramid::ImagePyramid;
use crate::select::{approximate_select, approximate_select_regions, nlms, NUM_SELECT_BINS};
use crate::transform::{PlanarTransformation, TransformType};
use crate::verify::{VerifyAccumulator, VerifyResult};

use super::config::{SamplingConfig, TrackerConfig, UpdateParams};
use super::driver::{run_levels, LevelPolicy};
use super::{
    image_scale, sample_template, template_gradients, template_grid, template_region,
    validate_level, validate_next_image, validate_template, validate_update_params, CornerHistory,
    LevelRefinement, Refiner, ScaledHomography, TemplateSample, TrackResult,
};

/// Sparse Lucas-Kanade tracker over magnitude-selected template samples.
#[derive(Debug, Clone)]
pub struct SampledProjectiveTracker {
    config: TrackerConfig,
    template_width: u32,
    template_height: u32,
    image_scale: f32,
    region: Rectangle<f32>,
    transformation: PlanarTransformation,
    samples: Vec<Vec<TemplateSample>>,
    scratch: Arena<f32>,
}

impl SampledProjectiveTracker {
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

        let mut samples = Vec::with_capacity(config.num_pyramid_levels);
        for level in 0..config.num_pyramid_levels {
            let grid = template_grid(region_width, region_height, level)?;
            let template = sample_template(&pyramid, level, &grid, center)?;
            let (gx, gy) = template_gradients(&template, &grid)?;
            let mut magnitude = squared_magnitude(&gx, &gy);
            if config.sampling.suppress_non_maxima {
                nlms(&mut magnitude);
            }

            let max_samples = config.sampling.max_samples_at_base_level >> level;
            let selected = select_samples(&magnitude, &config.sampling, max_samples)?;
            if selected.is_empty() {
                warn!("No samples found within given quad at scale {level}");
            }
            debug!("sampled level {level}: kept {} of {} template pixels", selected.len(), grid.num_points());

            let width = magnitude.width as usize;
            let level_samples = selected
                .into_iter()
                .map(|i| {
                    let (ix, iy) = ((i % width) as u32, (i / width) as u32);
                    TemplateSample {
                        x: grid.x.get(ix as usize),
                        y: grid.y.get(iy as usize),
                        x_gradient: gx.get(ix, iy),
                        y_gradient: gy.get(ix, iy),
                        grayvalue: template.get(ix, iy),
                    }
                })
                .collect();
            samples.push(level_samples);
        }

        let capacity = samples.iter().map(Vec::len).max().unwrap_or(0);
        Ok(Self {
            config,
            template_width: template.width,
            template_height: template.height,
            image_scale,
            region,
            transformation,
            samples,
            scratch: Arena::with_capacity(capacity),
        })
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
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

    pub fn template_region(&self) -> Rectangle<f32> {
        self.region
    }

    /// Selected samples of `level`, empty for an invalid level.
    pub fn template_samples(&self, level: usize) -> &[TemplateSample] {
        self.samples.get(level).map_or(&[], Vec::as_slice)
    }

    pub fn update_track(&mut self, next: &ImageU8, params: &UpdateParams) -> Result<TrackResult> {
        validate_update_params(params)?;
        validate_next_image(next, self.template_width, self.template_height)?;
        let pyramid = ImagePyramid::build(next, self.samples.len(), self.config.smooth_pyramid);

        let converged = run_levels(self, &pyramid, params, LevelPolicy::KeepLast)?;
        let verify = self.verify_track(next, params.verify_max_pixel_difference)?;
        Ok(TrackResult { converged, verify })
    }

    pub fn iteratively_refine_track(
        &mut self,
        next: &ImageU8,
        level: usize,
        update_type: TransformType,
        params: &UpdateParams,
    ) -> Result<bool> {
        validate_update_params(params)?;
        validate_next_image(next, self.template_width, self.template_height)?;
        validate_level(level, self.samples.len())?;
        let pyramid = ImagePyramid::build(next, self.samples.len(), self.config.smooth_pyramid);
        self.refine_level(&pyramid, level, update_type, params)
    }

    /// Compare the level-0 samples against `next` under the current warp.
    pub fn verify_track(&self, next: &ImageU8, max_pixel_difference: u8) -> Result<VerifyResult> {
        validate_next_image(next, self.template_width, self.template_height)?;
        let map = ScaledHomography::new(&self.transformation, self.image_scale);
        let mut acc = VerifyAccumulator::new(max_pixel_difference);
        for s in self.template_samples(0) {
            let (x, y) = map.map(s.x, s.y);
            if let Some(v) = bilinear_in_bounds(next, x, y) {
                acc.add(v.round() as i32, s.grayvalue.round() as i32);
            }
        }
        Ok(acc.finish())
    }
}

/// Indices (row-major) of at most `max_samples` of the strongest magnitudes.
fn select_samples(
    magnitude: &Array2<f32>,
    sampling: &SamplingConfig,
    max_samples: usize,
) -> Result<Vec<usize>> {
    let num_points = magnitude.len();
    let wanted = max_samples.min(num_points);
    if wanted >= num_points {
        return Ok((0..num_points).collect());
    }
    if sampling.num_select_regions > 1 {
        let mut indexes = vec![0usize; num_points];
        let n = approximate_select_regions(
            magnitude,
            NUM_SELECT_BINS,
            sampling.num_select_regions,
            wanted,
            &mut indexes,
        )?;
        indexes.truncate(n);
        Ok(indexes)
    } else {
        let values: Vec<f32> = magnitude.iter().collect();
        let mut indexes = Vec::with_capacity(wanted);
        approximate_select(&values, NUM_SELECT_BINS, wanted, &mut indexes);
        Ok(indexes)
    }
}

impl Refiner for SampledProjectiveTracker {
    type Snapshot = PlanarTransformation;
    type Params = UpdateParams;

    fn num_levels(&self) -> usize {
        self.samples.len()
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
        let Self { config, image_scale, transformation, samples, scratch, .. } = self;
        let level_samples = &samples[level];
        let mut history = CornerHistory::for_base_image(config.base_image_width, config.base_image_height);
        let refinement = LevelRefinement { next, level, image_scale: *image_scale, params };
        refinement.run(
            transformation,
            &mut history,
            scratch,
            update_type,
            || level_samples.iter().copied(),
            level_samples.len(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Point;

    fn texture(w: u32, h: u32, dx: f32, dy: f32) -> ImageU8 {
        ImageU8::from_fn(w, h, |x, y| {
            let (x, y) = (x as f32 - dx, y as f32 - dy);
            let v = 120.0 + 70.0 * (x * 0.25).sin() * (y * 0.19).sin() + 30.0 * (y * 0.11).cos();
            v.clamp(0.0, 255.0) as u8
        })
    }

    fn quad() -> Quadrilateral<f32> {
        Quadrilateral::new(
            Point::new(32.0, 24.0),
            Point::new(96.0, 24.0),
            Point::new(96.0, 72.0),
            Point::new(32.0, 72.0),
        )
    }

    fn config() -> TrackerConfig {
        let mut c = TrackerConfig::for_image(128, 96).with_levels(2);
        c.sampling.max_samples_at_base_level = 400;
        c
    }

    #[test]
    fn sample_budget_halves_per_level() {
        let tracker = SampledProjectiveTracker::new(&texture(128, 96, 0.0, 0.0), quad(), config()).unwrap();
        let n0 = tracker.template_samples(0).len();
        let n1 = tracker.template_samples(1).len();
        assert!(n0 > 0 && n0 <= 400, "{n0}");
        assert!(n1 > 0 && n1 <= 200, "{n1}");
        assert!(tracker.template_samples(2).is_empty());
    }

    #[test]
    fn region_selection_and_suppression_stay_within_budget() {
        let mut cfg = config();
        cfg.sampling.num_select_regions = 3;
        cfg.sampling.suppress_non_maxima = true;
        let tracker = SampledProjectiveTracker::new(&texture(128, 96, 0.0, 0.0), quad(), cfg).unwrap();
        assert!(tracker.template_samples(0).len() <= 400);
        assert!(!tracker.template_samples(0).is_empty());
    }

    #[test]
    fn recovers_small_translation() {
        let img = texture(128, 96, 0.0, 0.0);
        let next = texture(128, 96, -1.5, 2.0);
        let mut tracker = SampledProjectiveTracker::new(&img, quad(), config()).unwrap();
        let result = tracker.update_track(&next, &UpdateParams::default()).unwrap();
        let h = tracker.transformation().homography();
        assert!((h[0][2] + 1.5).abs() < 0.25, "{h:?}");
        assert!((h[1][2] - 2.0).abs() < 0.25, "{h:?}");
        assert!(result.verify.similar_fraction() > 0.9, "{:?}", result.verify);
    }

    #[test]
    fn small_budget_takes_strongest_gradients() {
        let mut cfg = config();
        cfg.sampling.max_samples_at_base_level = 40;
        let tracker = SampledProjectiveTracker::new(&texture(128, 96, 0.0, 0.0), quad(), cfg).unwrap();
        let strong = tracker.template_samples(0);
        let weakest_kept = strong
            .iter()
            .map(|s| s.x_gradient * s.x_gradient + s.y_gradient * s.y_gradient)
            .fold(f32::MAX, f32::min);
        assert!(weakest_kept > 0.0);
        assert!(strong.len() <= 40);
    }

    #[test]
    fn template_pushed_off_image_abandons_the_level() {
        let img = texture(128, 96, 0.0, 0.0);
        let mut tracker = SampledProjectiveTracker::new(&img, quad(), config()).unwrap();
        let off_image = tracker
            .transformation()
            .clone()
            .with_homography([[1.0, 0.0, 0.0], [0.0, 1.0, -400.0], [0.0, 0.0, 1.0]]);
        tracker.set_transformation(&off_image);

        let converged = tracker
            .iteratively_refine_track(&img, 0, TransformType::Projective, &UpdateParams::default())
            .unwrap();
        assert!(!converged);
        assert_eq!(tracker.transformation().homography(), off_image.homography());
    }
}
