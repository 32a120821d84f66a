/// Scene synthesis: a textured template frame, a moved next frame and the
/// ground-truth position of the tracked quad in both.
use lktrack::{ImageU8, Point, Quadrilateral};
use serde::{Deserialize, Serialize};

use crate::distortion::Rng;
use crate::transform::{apply_homography, invert_3x3, Motion};

/// Subsamples per pixel along each axis when rendering.
const SUPERSAMPLING: u32 = 4;

/// A template frame and the frame after `motion`.
#[derive(Debug, Clone)]
pub struct Scene {
    pub template: ImageU8,
    pub next: ImageU8,
    /// Tracked quad in the template frame: [TL, TR, BL, BR].
    pub quad: [[f64; 2]; 4],
    /// The same corners in the next frame.
    pub truth: [[f64; 2]; 4],
    pub motion: Motion,
}

impl Scene {
    /// The template-frame quad in the tracker's corner order.
    pub fn seed_quad(&self) -> Quadrilateral<f32> {
        to_quad(&self.quad)
    }

    pub fn truth_quad(&self) -> Quadrilateral<f32> {
        to_quad(&self.truth)
    }
}

fn to_quad(c: &[[f64; 2]; 4]) -> Quadrilateral<f32> {
    let p = |i: usize| Point::new(c[i][0] as f32, c[i][1] as f32);
    Quadrilateral::new(p(0), p(1), p(2), p(3))
}

/// Texture of the scene plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Background {
    /// Uniform gray value.
    Solid(u8),
    /// Vertical gradient from top to bottom.
    Gradient { top: u8, bottom: u8 },
    /// Checkerboard pattern.
    Checkerboard {
        cell_size: u32,
        light: u8,
        dark: u8,
    },
    /// Random Gaussian blobs on a mid-gray base.
    Blobs { count: usize, seed: u64 },
    /// Square cells of random grayvalue.
    RandomCells { cell_size: u32, seed: u64 },
    /// Four octaves of smoothly interpolated lattice noise, the coarsest
    /// with lattice spacing `scale` pixels.
    SmoothNoise { scale: f64, seed: u64 },
}

/// Pattern evaluated at continuous plane coordinates.
enum Pattern {
    Solid(f64),
    Gradient { top: f64, bottom: f64, height: f64 },
    Checkerboard { cell: f64, light: f64, dark: f64 },
    Blobs(Vec<Blob>),
    RandomCells { cell: f64, seed: u64 },
    SmoothNoise { scale: f64, seed: u64 },
}

/// Relative amplitude of each smooth-noise octave, coarse to fine.
const OCTAVE_AMPLITUDES: [f64; 4] = [1.0, 0.7, 0.5, 0.35];

#[derive(Debug, Clone, Copy)]
struct Blob {
    x: f64,
    y: f64,
    sigma: f64,
    amplitude: f64,
}

impl Pattern {
    fn new(bg: &Background, width: u32, height: u32) -> Self {
        match bg {
            Background::Solid(v) => Pattern::Solid(*v as f64),
            Background::Gradient { top, bottom } => Pattern::Gradient {
                top: *top as f64,
                bottom: *bottom as f64,
                height: (height.max(2) - 1) as f64,
            },
            Background::Checkerboard {
                cell_size,
                light,
                dark,
            } => Pattern::Checkerboard {
                cell: (*cell_size).max(1) as f64,
                light: *light as f64,
                dark: *dark as f64,
            },
            Background::Blobs { count, seed } => {
                let mut rng = Rng::new(*seed);
                let blobs = (0..*count)
                    .map(|_| Blob {
                        x: rng.next_f64() * width as f64,
                        y: rng.next_f64() * height as f64,
                        sigma: 3.0 + rng.next_f64() * 9.0,
                        amplitude: (rng.next_f64() - 0.5) * 200.0,
                    })
                    .collect();
                Pattern::Blobs(blobs)
            }
            Background::RandomCells { cell_size, seed } => Pattern::RandomCells {
                cell: (*cell_size).max(1) as f64,
                seed: *seed,
            },
            Background::SmoothNoise { scale, seed } => Pattern::SmoothNoise {
                scale: scale.max(1.0),
                seed: *seed,
            },
        }
    }

    fn intensity(&self, x: f64, y: f64) -> f64 {
        match self {
            Pattern::Solid(v) => *v,
            Pattern::Gradient { top, bottom, height } => {
                let t = (y / height).clamp(0.0, 1.0);
                top * (1.0 - t) + bottom * t
            }
            Pattern::Checkerboard { cell, light, dark } => {
                let cx = (x / cell).floor() as i64;
                let cy = (y / cell).floor() as i64;
                if (cx + cy).rem_euclid(2) == 0 {
                    *light
                } else {
                    *dark
                }
            }
            Pattern::Blobs(blobs) => {
                let v: f64 = blobs
                    .iter()
                    .map(|b| {
                        let d2 = (x - b.x).powi(2) + (y - b.y).powi(2);
                        b.amplitude * (-0.5 * d2 / (b.sigma * b.sigma)).exp()
                    })
                    .sum();
                128.0 + v
            }
            Pattern::RandomCells { cell, seed } => {
                let cx = (x / cell).floor() as i64;
                let cy = (y / cell).floor() as i64;
                (cell_hash(cx, cy, *seed) % 256) as f64
            }
            Pattern::SmoothNoise { scale, seed } => {
                let total: f64 = OCTAVE_AMPLITUDES.iter().sum();
                let v: f64 = OCTAVE_AMPLITUDES
                    .iter()
                    .enumerate()
                    .map(|(octave, a)| {
                        let spacing = scale / (1u32 << octave) as f64;
                        a * lattice_noise(x / spacing, y / spacing, seed.wrapping_add(octave as u64))
                    })
                    .sum();
                128.0 + 110.0 * v / total
            }
        }
    }
}

/// Smoothstep interpolation of random lattice values in [-1, 1].
fn lattice_noise(x: f64, y: f64, seed: u64) -> f64 {
    let (x0, y0) = (x.floor(), y.floor());
    let smooth = |t: f64| t * t * (3.0 - 2.0 * t);
    let (tx, ty) = (smooth(x - x0), smooth(y - y0));
    let value = |dx: i64, dy: i64| {
        let h = cell_hash(x0 as i64 + dx, y0 as i64 + dy, seed);
        (h % 2001) as f64 / 1000.0 - 1.0
    };
    let top = value(0, 0) * (1.0 - tx) + value(1, 0) * tx;
    let bottom = value(0, 1) * (1.0 - tx) + value(1, 1) * tx;
    top * (1.0 - ty) + bottom * ty
}

fn cell_hash(x: i64, y: i64, seed: u64) -> u64 {
    let mut h = seed ^ 0x9e37_79b9_7f4a_7c15;
    for v in [x as u64, y as u64] {
        h ^= v.wrapping_mul(0xbf58_476d_1ce4_e5b9);
        h = h.rotate_left(31).wrapping_mul(0x94d0_49bb_1331_11eb);
    }
    h ^ (h >> 29)
}

/// Builder for constructing scenes.
pub struct SceneBuilder {
    width: u32,
    height: u32,
    background: Background,
    quad: [[f64; 2]; 4],
    motion: Motion,
}

impl SceneBuilder {
    pub fn new(width: u32, height: u32) -> Self {
        let (w, h) = (width as f64, height as f64);
        Self {
            width,
            height,
            background: Background::Checkerboard {
                cell_size: 8,
                light: 200,
                dark: 60,
            },
            quad: rect_quad(w * 0.25, h * 0.25, w * 0.75, h * 0.75),
            motion: Motion::identity(),
        }
    }

    pub fn background(mut self, bg: Background) -> Self {
        self.background = bg;
        self
    }

    /// Track the axis-aligned rectangle `[left, top] .. [right, bottom]`.
    pub fn target_rect(mut self, left: f64, top: f64, right: f64, bottom: f64) -> Self {
        self.quad = rect_quad(left, top, right, bottom);
        self
    }

    /// Track an arbitrary quad, corners [TL, TR, BL, BR].
    pub fn target_quad(mut self, quad: [[f64; 2]; 4]) -> Self {
        self.quad = quad;
        self
    }

    pub fn motion(mut self, motion: Motion) -> Self {
        self.motion = motion;
        self
    }

    /// Render both frames and project the target into the next frame.
    pub fn build(self) -> Scene {
        let pattern = Pattern::new(&self.background, self.width, self.height);
        let identity = [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0];
        let template = render(&pattern, self.width, self.height, &identity);
        let inverse = invert_3x3(&self.motion.homography());
        let next = render(&pattern, self.width, self.height, &inverse);
        let truth = self.motion.project_corners(&self.quad);

        Scene {
            template,
            next,
            quad: self.quad,
            truth,
            motion: self.motion,
        }
    }
}

fn rect_quad(left: f64, top: f64, right: f64, bottom: f64) -> [[f64; 2]; 4] {
    [[left, top], [right, top], [left, bottom], [right, bottom]]
}

/// Render the pattern seen through `frame_to_plane`, box-filtered over each pixel.
///
/// Pixel `(x, y)` covers `[x - 0.5, x + 0.5] × [y - 0.5, y + 0.5]`.
fn render(pattern: &Pattern, width: u32, height: u32, frame_to_plane: &[f64; 9]) -> ImageU8 {
    let n = SUPERSAMPLING;
    let offsets: Vec<f64> = (0..n).map(|i| (i as f64 + 0.5) / n as f64 - 0.5).collect();
    ImageU8::from_fn(width, height, |x, y| {
        let mut acc = 0.0;
        for oy in &offsets {
            for ox in &offsets {
                let (px, py) = apply_homography(frame_to_plane, x as f64 + ox, y as f64 + oy);
                acc += pattern.intensity(px, py);
            }
        }
        (acc / (n * n) as f64).round().clamp(0.0, 255.0) as u8
    })
}
