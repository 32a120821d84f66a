/// Pre-defined tracking scenarios with pass thresholds.
use lktrack::TransformType;

use crate::distortion::{self, Distortion};
use crate::runner::{TrackerKind, TrackerSetup};
use crate::scene::{Background, Scene, SceneBuilder};
use crate::transform::Motion;

const WIDTH: u32 = 160;
const HEIGHT: u32 = 120;

/// A category of test scenarios.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Translation,
    Similarity,
    Perspective,
    LargeMotion,
    Noise,
    Contrast,
    Blur,
    Occlusion,
    Sampling,
}

impl Category {
    pub fn all() -> &'static [Category] {
        &[
            Category::Translation,
            Category::Similarity,
            Category::Perspective,
            Category::LargeMotion,
            Category::Noise,
            Category::Contrast,
            Category::Blur,
            Category::Occlusion,
            Category::Sampling,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            Category::Translation => "translation",
            Category::Similarity => "similarity",
            Category::Perspective => "perspective",
            Category::LargeMotion => "large-motion",
            Category::Noise => "noise",
            Category::Contrast => "contrast",
            Category::Blur => "blur",
            Category::Occlusion => "occlusion",
            Category::Sampling => "sampling",
        }
    }

    pub fn from_name(name: &str) -> Option<Category> {
        Category::all().iter().find(|c| c.name() == name).copied()
    }
}

/// A scene generator plus the tracker setup and thresholds it is judged by.
pub struct Scenario {
    pub name: String,
    pub description: String,
    pub category: Category,
    pub setup: TrackerSetup,
    /// Maximum acceptable corner RMSE in pixels.
    pub max_corner_rmse: f64,
    /// Minimum verification similar fraction, when the tracker verifies.
    pub min_similar_fraction: f64,
    build_fn: Box<dyn Fn() -> Scene + Send + Sync>,
}

impl Scenario {
    pub fn build(&self) -> Scene {
        (self.build_fn)()
    }
}

/// Build the full catalog of test scenarios.
pub fn all_scenarios() -> Vec<Scenario> {
    let mut scenarios = Vec::new();
    scenarios.extend(translation_scenarios());
    scenarios.extend(similarity_scenarios());
    scenarios.extend(perspective_scenarios());
    scenarios.extend(large_motion_scenarios());
    scenarios.extend(noise_scenarios());
    scenarios.extend(contrast_scenarios());
    scenarios.extend(blur_scenarios());
    scenarios.extend(occlusion_scenarios());
    scenarios.extend(sampling_scenarios());
    scenarios
}

/// Filter scenarios by category.
pub fn scenarios_for_category(category: Category) -> Vec<Scenario> {
    all_scenarios()
        .into_iter()
        .filter(|s| s.category == category)
        .collect()
}

fn textured() -> Background {
    Background::Blobs { count: 60, seed: 11 }
}

fn scene(background: Background, motion: Motion, distortions: Vec<Distortion>) -> Scene {
    let mut scene = SceneBuilder::new(WIDTH, HEIGHT)
        .background(background)
        .target_rect(40.0, 30.0, 120.0, 90.0)
        .motion(motion)
        .build();
    distortion::apply(&mut scene.next, &distortions);
    scene
}

fn scenario(
    name: String,
    description: String,
    category: Category,
    setup: TrackerSetup,
    max_corner_rmse: f64,
    build: impl Fn() -> Scene + Send + Sync + 'static,
) -> Scenario {
    Scenario {
        name,
        description,
        category,
        setup,
        max_corner_rmse,
        min_similar_fraction: 0.8,
        build_fn: Box::new(build),
    }
}

fn setup(kind: TrackerKind, transform_type: TransformType) -> TrackerSetup {
    TrackerSetup {
        kind,
        transform_type,
        ..TrackerSetup::default()
    }
}

fn pivot() -> [f64; 2] {
    [WIDTH as f64 / 2.0, HEIGHT as f64 / 2.0]
}

fn translation_scenarios() -> Vec<Scenario> {
    let kinds = [TrackerKind::Dense, TrackerKind::Sampled, TrackerKind::Slow];
    let shifts = [(1.5, -0.5), (-2.25, 1.75)];
    kinds
        .iter()
        .flat_map(|&kind| {
            shifts.iter().map(move |&(dx, dy)| {
                scenario(
                    format!("shift-{}-{dx}-{dy}", kind.name()),
                    format!("Sub-pixel shift ({dx}, {dy}) with the {} tracker", kind.name()),
                    Category::Translation,
                    setup(kind, TransformType::Translation),
                    0.3,
                    move || scene(textured(), Motion::Translation { dx, dy }, vec![]),
                )
            })
        })
        .collect()
}

fn similarity_scenarios() -> Vec<Scenario> {
    let cases = [("rotate-3deg", 1.0, 3.0f64), ("scale-1.04", 1.04, 0.0), ("rotate-scale", 0.97, -2.0)];
    cases
        .iter()
        .map(|&(name, scale, degrees)| {
            scenario(
                format!("{name}-affine"),
                format!("Scale {scale}, rotation {degrees}° about the image centre"),
                Category::Similarity,
                setup(TrackerKind::Dense, TransformType::Affine),
                0.5,
                move || {
                    let motion = Motion::Similarity {
                        pivot: pivot(),
                        dx: 0.5,
                        dy: -0.5,
                        scale,
                        theta: degrees.to_radians(),
                    };
                    scene(textured(), motion, vec![])
                },
            )
        })
        .collect()
}

fn perspective_scenarios() -> Vec<Scenario> {
    let tilts = [0.0004, -0.0003];
    [TrackerKind::Dense, TrackerKind::Sampled]
        .iter()
        .flat_map(|&kind| {
            tilts.iter().map(move |&tilt| {
                scenario(
                    format!("perspective-{}-{tilt}", kind.name()),
                    format!("Mild keystone (h20 = {tilt}) with the {} tracker", kind.name()),
                    Category::Perspective,
                    setup(kind, TransformType::Projective),
                    0.75,
                    move || {
                        // keystone about the image centre
                        let [cx, cy] = pivot();
                        let h = [
                            1.0 + tilt * cx,
                            0.0,
                            -tilt * cx * cx,
                            tilt * cy,
                            1.0,
                            -tilt * cx * cy,
                            tilt,
                            0.0,
                            1.0 - tilt * cx,
                        ];
                        scene(textured(), Motion::Perspective { h }, vec![])
                    },
                )
            })
        })
        .collect()
}

fn large_motion_scenarios() -> Vec<Scenario> {
    [1usize, 3]
        .iter()
        .map(|&levels| {
            let mut s = scenario(
                format!("shift-6px-{levels}-levels"),
                format!("Six pixel shift tracked with {levels} pyramid level(s)"),
                Category::LargeMotion,
                TrackerSetup {
                    num_levels: levels,
                    ..setup(TrackerKind::Dense, TransformType::Translation)
                },
                0.5,
                || {
                    scene(
                        Background::Blobs { count: 25, seed: 5 },
                        Motion::Translation { dx: 6.0, dy: -4.0 },
                        vec![],
                    )
                },
            );
            if levels == 1 {
                // reported for comparison only, a single level is not expected to get there
                s.max_corner_rmse = f64::INFINITY;
                s.min_similar_fraction = 0.0;
            }
            s
        })
        .collect()
}

fn noise_scenarios() -> Vec<Scenario> {
    [4.0, 10.0]
        .iter()
        .map(|&sigma| {
            scenario(
                format!("noise-sigma-{sigma}"),
                format!("Gaussian noise sigma {sigma} on the next frame"),
                Category::Noise,
                setup(TrackerKind::Dense, TransformType::Affine),
                0.6,
                move || {
                    scene(
                        textured(),
                        Motion::Translation { dx: 1.0, dy: 1.0 },
                        vec![Distortion::GaussianNoise { sigma, seed: 42 }],
                    )
                },
            )
        })
        .map(|mut s| {
            s.min_similar_fraction = 0.3;
            s
        })
        .collect()
}

fn contrast_scenarios() -> Vec<Scenario> {
    let cases = [
        ("contrast-0.8", Distortion::ContrastScale { factor: 0.8 }),
        ("brightness+15", Distortion::BrightnessShift { offset: 15 }),
    ];
    cases
        .into_iter()
        .map(|(name, d)| {
            let description = format!("{d:?} on the next frame");
            let mut s = scenario(
                name.to_string(),
                description,
                Category::Contrast,
                setup(TrackerKind::Dense, TransformType::Affine),
                0.6,
                move || scene(textured(), Motion::Translation { dx: -1.0, dy: 0.5 }, vec![d.clone()]),
            );
            // intensity changes are not modelled, only geometry is judged
            s.min_similar_fraction = 0.0;
            s
        })
        .collect()
}

fn blur_scenarios() -> Vec<Scenario> {
    [1.0f32, 2.0]
        .iter()
        .map(|&sigma| {
            scenario(
                format!("blur-sigma-{sigma}"),
                format!("Gaussian blur sigma {sigma} on the next frame"),
                Category::Blur,
                setup(TrackerKind::Dense, TransformType::Affine),
                0.75,
                move || {
                    scene(
                        Background::Checkerboard {
                            cell_size: 10,
                            light: 210,
                            dark: 50,
                        },
                        Motion::Translation { dx: 1.25, dy: -0.75 },
                        vec![Distortion::GaussianBlur { sigma }],
                    )
                },
            )
        })
        .map(|mut s| {
            s.min_similar_fraction = 0.3;
            s
        })
        .collect()
}

fn occlusion_scenarios() -> Vec<Scenario> {
    vec![{
        let mut s = scenario(
            "occlude-corner".to_string(),
            "A tenth of the target hidden behind a dark patch".to_string(),
            Category::Occlusion,
            setup(TrackerKind::Dense, TransformType::Affine),
            1.0,
            || {
                scene(
                    textured(),
                    Motion::Translation { dx: 1.0, dy: -1.0 },
                    vec![Distortion::Occlude {
                        rect: [100, 70, 122, 92],
                        value: 0,
                    }],
                )
            },
        );
        s.min_similar_fraction = 0.6;
        s
    }]
}

fn sampling_scenarios() -> Vec<Scenario> {
    [100usize, 250, 1000]
        .iter()
        .map(|&max_samples| {
            scenario(
                format!("sampled-{max_samples}"),
                format!("Sampled projective tracker with {max_samples} samples at level 0"),
                Category::Sampling,
                TrackerSetup {
                    max_samples,
                    ..setup(TrackerKind::Sampled, TransformType::Projective)
                },
                0.6,
                || {
                    scene(
                        Background::RandomCells { cell_size: 4, seed: 3 },
                        Motion::Translation { dx: 1.5, dy: 1.0 },
                        vec![],
                    )
                },
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_category_has_scenarios() {
        for &cat in Category::all() {
            assert!(!scenarios_for_category(cat).is_empty(), "no scenarios for {}", cat.name());
        }
    }

    #[test]
    fn scenario_names_are_unique() {
        let scenarios = all_scenarios();
        let mut names: Vec<&str> = scenarios.iter().map(|s| s.name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), scenarios.len());
    }

    #[test]
    fn scenes_fit_the_image() {
        for s in all_scenarios() {
            let scene = s.build();
            assert_eq!(scene.template.width, WIDTH, "{}", s.name);
            assert_eq!(scene.next.height, HEIGHT, "{}", s.name);
            for [x, y] in scene.truth {
                assert!(x > 0.0 && x < WIDTH as f64 && y > 0.0 && y < HEIGHT as f64, "{}", s.name);
            }
        }
    }

    #[test]
    fn category_from_name_roundtrip() {
        for &cat in Category::all() {
            assert_eq!(Category::from_name(cat.name()), Some(cat));
        }
    }
}
