/// Seed a tracker on a scene's template frame and track into the next frame.
use std::time::Instant;

use lktrack::{
    DenseTracker, Result, SampledProjectiveTracker, SlowConfig, SlowParams, SlowTracker, TrackerConfig,
    TransformType, UpdateParams,
};
use serde::{Deserialize, Serialize};

use crate::metrics::{self, TrackOutcome};
use crate::scene::Scene;

/// Which tracker variant a scenario exercises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackerKind {
    Dense,
    Sampled,
    Slow,
}

impl TrackerKind {
    pub fn name(&self) -> &'static str {
        match self {
            TrackerKind::Dense => "dense",
            TrackerKind::Sampled => "sampled",
            TrackerKind::Slow => "slow",
        }
    }

    pub fn from_name(name: &str) -> Option<TrackerKind> {
        [TrackerKind::Dense, TrackerKind::Sampled, TrackerKind::Slow]
            .into_iter()
            .find(|k| k.name() == name)
    }
}

/// Tracker configuration for one run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackerSetup {
    pub kind: TrackerKind,
    pub transform_type: TransformType,
    pub num_levels: usize,
    /// Sampled tracker sample budget at level 0.
    pub max_samples: usize,
    pub params: UpdateParams,
}

impl Default for TrackerSetup {
    fn default() -> Self {
        Self {
            kind: TrackerKind::Dense,
            transform_type: TransformType::Affine,
            num_levels: 3,
            max_samples: 500,
            params: UpdateParams {
                verify_max_pixel_difference: 10,
                ..UpdateParams::default()
            },
        }
    }
}

/// Track `scene` from its template frame into its next frame.
pub fn track(scene: &Scene, setup: &TrackerSetup) -> Result<TrackOutcome> {
    let (width, height) = (scene.template.width, scene.template.height);
    let quad = scene.seed_quad();

    let start = Instant::now();
    let (corners, converged, verify) = match setup.kind {
        TrackerKind::Dense => {
            let config = TrackerConfig::for_image(width, height)
                .with_transform_type(setup.transform_type)
                .with_levels(setup.num_levels);
            let mut tracker = DenseTracker::new(&scene.template, quad, config)?;
            let result = tracker.update_track(&scene.next, &setup.params)?;
            (tracker.transformed_corners(), result.converged, Some(result.verify))
        }
        TrackerKind::Sampled => {
            let mut config = TrackerConfig::for_image(width, height)
                .with_transform_type(setup.transform_type)
                .with_levels(setup.num_levels);
            config.sampling.max_samples_at_base_level = setup.max_samples;
            let mut tracker = SampledProjectiveTracker::new(&scene.template, quad, config)?;
            let result = tracker.update_track(&scene.next, &setup.params)?;
            (tracker.transformed_corners(), result.converged, Some(result.verify))
        }
        TrackerKind::Slow => {
            let config = SlowConfig {
                transform_type: setup.transform_type,
                num_pyramid_levels: setup.num_levels,
                base_image_width: width,
                base_image_height: height,
                ..SlowConfig::default()
            };
            let mut tracker = SlowTracker::new(&scene.template, quad, config)?;
            let params = SlowParams {
                update: setup.params,
                use_weights: false,
            };
            let converged = tracker.update_track(&scene.next, &params)?;
            (tracker.transformed_corners(), converged, None)
        }
    };
    let elapsed = start.elapsed();

    log::debug!(
        "{} {} tracker: converged={converged} in {:.2} ms",
        setup.kind.name(),
        setup.transform_type,
        elapsed.as_secs_f64() * 1000.0
    );
    Ok(metrics::evaluate(
        &scene.truth,
        &corners,
        converged,
        verify.as_ref(),
        elapsed.as_micros() as u64,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracker_kind_names_round_trip() {
        for kind in [TrackerKind::Dense, TrackerKind::Sampled, TrackerKind::Slow] {
            assert_eq!(TrackerKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(TrackerKind::from_name("fast"), None);
    }
}
