#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Residual-based confidence score for a tracked transformation.
///
/// Advisory only: callers decide whether to keep tracking from these numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct VerifyResult {
    /// Mean absolute grayvalue difference over in-bounds samples, or
    /// `i32::MAX` if no sample was in bounds.
    pub mean_absolute_difference: i32,
    pub num_in_bounds: i32,
    /// In-bounds samples within the maximum pixel difference.
    pub num_similar_pixels: i32,
}

impl VerifyResult {
    /// Fraction of in-bounds samples that were similar, 0 when none were in bounds.
    pub fn similar_fraction(&self) -> f32 {
        if self.num_in_bounds > 0 {
            self.num_similar_pixels as f32 / self.num_in_bounds as f32
        } else {
            0.0
        }
    }
}

/// Running totals for a verification pass.
#[derive(Debug, Clone, Copy)]
pub(crate) struct VerifyAccumulator {
    max_pixel_difference: i32,
    total_difference: i64,
    num_in_bounds: i32,
    num_similar: i32,
}

impl VerifyAccumulator {
    pub fn new(max_pixel_difference: u8) -> Self {
        Self {
            max_pixel_difference: max_pixel_difference as i32,
            total_difference: 0,
            num_in_bounds: 0,
            num_similar: 0,
        }
    }

    #[inline]
    pub fn add(&mut self, observed: i32, expected: i32) {
        let diff = (observed - expected).abs();
        self.num_in_bounds += 1;
        self.total_difference += diff as i64;
        if diff <= self.max_pixel_difference {
            self.num_similar += 1;
        }
    }

    pub fn finish(self) -> VerifyResult {
        let mean_absolute_difference = if self.num_in_bounds > 0 {
            (self.total_difference / self.num_in_bounds as i64) as i32
        } else {
            i32::MAX
        };
        VerifyResult {
            mean_absolute_difference,
            num_in_bounds: self.num_in_bounds,
            num_similar_pixels: self.num_similar,
        }
    }
}
