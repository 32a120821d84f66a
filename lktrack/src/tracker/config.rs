#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Result, TrackerError};
use crate::geometry::Point;
use crate::pose::CameraCalibration;
use crate::transform::TransformType;

/// Largest supported number of pyramid levels.
pub const MAX_PYRAMID_LEVELS: usize = 5;

/// Configuration shared by the dense and sampled trackers.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(default))]
pub struct TrackerConfig {
    pub transform_type: TransformType,
    pub num_pyramid_levels: usize,
    /// Width of the image the seed quad was detected in. The template and
    /// every tracked frame must be a power-of-two fraction of it.
    pub base_image_width: u32,
    pub base_image_height: u32,
    /// Grow (> 1) or shrink (< 1) the quad's bounding box before sampling.
    pub scale_template_region_percent: f32,
    /// Blur and decimate template and frames per level instead of sampling
    /// the full-resolution image at every level.
    pub smooth_pyramid: bool,
    /// Sampled trackers only.
    pub sampling: SamplingConfig,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            transform_type: TransformType::Projective,
            num_pyramid_levels: 3,
            base_image_width: 320,
            base_image_height: 240,
            scale_template_region_percent: 1.0,
            smooth_pyramid: true,
            sampling: SamplingConfig::default(),
        }
    }
}

impl TrackerConfig {
    /// Config for a `width x height` base image, other fields at their defaults.
    pub fn for_image(width: u32, height: u32) -> Self {
        Self { base_image_width: width, base_image_height: height, ..Self::default() }
    }

    pub fn with_transform_type(mut self, transform_type: TransformType) -> Self {
        self.transform_type = transform_type;
        self
    }

    pub fn with_levels(mut self, num_pyramid_levels: usize) -> Self {
        self.num_pyramid_levels = num_pyramid_levels;
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        validate_levels(self.num_pyramid_levels)?;
        if self.scale_template_region_percent <= 0.0 {
            return Err(TrackerError::param("scale_template_region_percent must be greater than zero"));
        }
        if self.sampling.max_samples_at_base_level == 0 {
            return Err(TrackerError::param("max_samples_at_base_level must be greater than zero"));
        }
        Ok(())
    }

    #[cfg(feature = "serde")]
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| TrackerError::param(e.to_string()))
    }
}

/// Sparse sample selection.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(default))]
pub struct SamplingConfig {
    /// Sample budget at level 0; halved at every coarser level.
    pub max_samples_at_base_level: usize,
    /// Split selection into `n x n` regions when greater than one.
    pub num_select_regions: usize,
    /// Run non-local-maxima suppression on the magnitudes before selecting.
    pub suppress_non_maxima: bool,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self { max_samples_at_base_level: 500, num_select_regions: 1, suppress_non_maxima: false }
    }
}

/// How the 6-DoF tracker decides an iteration has converged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(rename_all = "snake_case"))]
pub enum ConvergenceCriterion {
    /// Every parameter step is below its (level-scaled) tolerance.
    #[default]
    ParameterChange,
    /// The canonical base-image quad stopped moving.
    CornerChange,
}

/// Configuration of the 6-DoF planar tracker.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(default))]
pub struct Planar6dofConfig {
    pub num_pyramid_levels: usize,
    pub base_image_width: u32,
    pub base_image_height: u32,
    pub scale_template_region_percent: f32,
    /// Physical template size in millimetres.
    pub template_size_mm: Point<f32>,
    pub calibration: CameraCalibration,
    pub max_samples_at_base_level: usize,
    pub num_sampling_regions: usize,
    /// Synthetic samples along the fiducial square edges at level 0; 0 disables them.
    pub num_fiducial_edge_samples: usize,
    /// Fiducial border thickness as a fraction of the template size.
    pub fiducial_square_thickness_fraction: Point<f32>,
    /// Corner rounding as a fraction of the template size.
    pub rounded_corners_fraction: Point<f32>,
    /// Overwrite stored verification grayvalues with each new observation.
    pub update_verification_samples: bool,
    pub convergence: ConvergenceCriterion,
    /// Blur template and frames with `sigma = 2^level / 3` at each level.
    pub blur_levels: bool,
}

impl Default for Planar6dofConfig {
    fn default() -> Self {
        Self {
            num_pyramid_levels: 3,
            base_image_width: 320,
            base_image_height: 240,
            scale_template_region_percent: 1.0,
            template_size_mm: Point::new(30.0, 30.0),
            calibration: CameraCalibration::new(300.0, 300.0, 160.0, 120.0),
            max_samples_at_base_level: 500,
            num_sampling_regions: 5,
            num_fiducial_edge_samples: 0,
            fiducial_square_thickness_fraction: Point::new(0.1, 0.1),
            rounded_corners_fraction: Point::new(0.0, 0.0),
            update_verification_samples: true,
            convergence: ConvergenceCriterion::ParameterChange,
            blur_levels: false,
        }
    }
}

impl Planar6dofConfig {
    pub(crate) fn validate(&self) -> Result<()> {
        validate_levels(self.num_pyramid_levels)?;
        if self.scale_template_region_percent <= 0.0 {
            return Err(TrackerError::param("scale_template_region_percent must be greater than zero"));
        }
        if self.template_size_mm.x <= 0.0 || self.template_size_mm.y <= 0.0 {
            return Err(TrackerError::param("template_size_mm must be positive"));
        }
        if self.max_samples_at_base_level == 0 || self.num_sampling_regions == 0 {
            return Err(TrackerError::param(
                "max_samples_at_base_level and num_sampling_regions must be greater than zero",
            ));
        }
        let t = self.fiducial_square_thickness_fraction;
        let r = self.rounded_corners_fraction;
        if !(0.0..0.25).contains(&t.x) || !(0.0..0.25).contains(&t.y) {
            return Err(TrackerError::param("fiducial thickness fraction must be in [0, 0.25)"));
        }
        if !(0.0..0.5).contains(&r.x) || !(0.0..0.5).contains(&r.y) {
            return Err(TrackerError::param("rounded corners fraction must be in [0, 0.5)"));
        }
        Ok(())
    }

    #[cfg(feature = "serde")]
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| TrackerError::param(e.to_string()))
    }
}

/// Configuration of the reference (slow) tracker.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(default))]
pub struct SlowConfig {
    pub transform_type: TransformType,
    pub num_pyramid_levels: usize,
    pub base_image_width: u32,
    pub base_image_height: u32,
    pub scale_template_region_percent: f32,
    /// Added to the diagonal of the normal equations; must be `>= 0`.
    pub ridge_weight: f32,
}

impl Default for SlowConfig {
    fn default() -> Self {
        Self {
            transform_type: TransformType::Projective,
            num_pyramid_levels: 3,
            base_image_width: 320,
            base_image_height: 240,
            scale_template_region_percent: 1.0,
            ridge_weight: 0.0,
        }
    }
}

impl SlowConfig {
    pub(crate) fn validate(&self) -> Result<()> {
        validate_levels(self.num_pyramid_levels)?;
        if self.ridge_weight < 0.0 || !self.ridge_weight.is_finite() {
            return Err(TrackerError::param("ridge_weight must be greater or equal to zero"));
        }
        if self.scale_template_region_percent <= 0.0 {
            return Err(TrackerError::param("scale_template_region_percent must be greater than zero"));
        }
        Ok(())
    }
}

/// Per-frame knobs of the dense, sampled and slow trackers.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(default))]
pub struct UpdateParams {
    pub max_iterations: usize,
    /// Base-image pixels the canonical quad may still move when converged.
    pub convergence_tolerance: f32,
    pub verify_max_pixel_difference: u8,
}

impl Default for UpdateParams {
    fn default() -> Self {
        Self { max_iterations: 50, convergence_tolerance: 0.05, verify_max_pixel_difference: 30 }
    }
}

/// Per-frame knobs of the 6-DoF tracker.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(default))]
pub struct Planar6dofUpdateParams {
    pub max_iterations: usize,
    /// Radians, at level 0.
    pub convergence_tolerance_angle: f32,
    /// Millimetres at level 0, growing with the level. Under
    /// [`ConvergenceCriterion::CornerChange`] it is instead the corner
    /// movement in base-image pixels, on every level.
    pub convergence_tolerance_distance: f32,
    pub verify_max_pixel_difference: u8,
}

impl Default for Planar6dofUpdateParams {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            convergence_tolerance_angle: 0.001,
            convergence_tolerance_distance: 0.05,
            verify_max_pixel_difference: 30,
        }
    }
}

pub(crate) fn validate_levels(n: usize) -> Result<()> {
    if n == 0 || n > MAX_PYRAMID_LEVELS {
        return Err(TrackerError::param(format!(
            "num_pyramid_levels must be in 1..={MAX_PYRAMID_LEVELS}, got {n}"
        )));
    }
    Ok(())
}

pub(crate) fn validate_iterations(max_iterations: usize) -> Result<()> {
    if max_iterations == 0 || max_iterations >= 1000 {
        return Err(TrackerError::param(
            "max_iterations must be greater than zero and less than 1000",
        ));
    }
    Ok(())
}
