//! The coarse-to-fine level loop shared by every tracker.

use log::debug;

use crate::error::Result;
use crate::pyramid::ImagePyramid;
use crate::transform::TransformType;

use super::Refiner;

/// What happens to a level whose refinement did not converge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LevelPolicy {
    /// Keep whatever the refinement produced.
    KeepLast,
    /// Roll a non-converged translation refine back to the state before the
    /// level, and a non-converged full refine back to the translation result.
    RevertUnconverged,
}

/// Refine every level from the coarsest to the finest, translation first.
///
/// Returns whether the final refinement converged.
pub(crate) fn run_levels<R: Refiner>(
    refiner: &mut R,
    next: &ImagePyramid,
    params: &R::Params,
    policy: LevelPolicy,
) -> Result<bool> {
    let family = refiner.transform_type();
    let mut converged = false;

    for level in (0..refiner.num_levels()).rev() {
        let before_level = match policy {
            LevelPolicy::RevertUnconverged => Some(refiner.snapshot()),
            LevelPolicy::KeepLast => None,
        };

        converged = refiner.refine_level(next, level, TransformType::Translation, params)?;

        if let Some(before_level) = before_level {
            if !converged {
                debug!("level {level}: translation did not converge, reverting");
                refiner.restore(before_level);
                continue;
            }
        }
        if family == TransformType::Translation {
            continue;
        }

        let after_translation = match policy {
            LevelPolicy::RevertUnconverged => Some(refiner.snapshot()),
            LevelPolicy::KeepLast => None,
        };

        converged = refiner.refine_level(next, level, family, params)?;

        if let Some(after_translation) = after_translation {
            if !converged {
                debug!("level {level}: {family} did not converge, keeping the translation result");
                refiner.restore(after_translation);
                // the translation refine of this level did converge
                converged = true;
            }
        }
    }
    Ok(converged)
}
