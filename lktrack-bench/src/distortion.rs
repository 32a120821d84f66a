/// Photometric distortions applied to the next frame of a scene.
use lktrack::pyramid::gaussian_blur;
use lktrack::ImageU8;
use serde::{Deserialize, Serialize};

/// An image distortion to apply after rendering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Distortion {
    /// Additive Gaussian noise with the given standard deviation.
    GaussianNoise { sigma: f64, seed: u64 },
    /// Gaussian blur with the given sigma (in pixels).
    GaussianBlur { sigma: f32 },
    /// Scale contrast around the mean: pixel = mean + factor * (pixel - mean).
    ContrastScale { factor: f64 },
    /// Shift brightness by a fixed offset (clamped to 0–255).
    BrightnessShift { offset: i16 },
    /// Rectangle `[x0, y0, x1, y1)` painted with a constant grayvalue.
    Occlude { rect: [u32; 4], value: u8 },
}

/// Apply a sequence of distortions to an image in-place.
pub fn apply(img: &mut ImageU8, distortions: &[Distortion]) {
    for d in distortions {
        apply_one(img, d);
    }
}

fn apply_one(img: &mut ImageU8, d: &Distortion) {
    match d {
        Distortion::GaussianNoise { sigma, seed } => apply_gaussian_noise(img, *sigma, *seed),
        Distortion::GaussianBlur { sigma } => {
            if *sigma > 0.0 {
                *img = gaussian_blur(img, *sigma);
            }
        }
        Distortion::ContrastScale { factor } => apply_contrast_scale(img, *factor),
        Distortion::BrightnessShift { offset } => {
            map_pixels(img, |v| (v as i16 + offset).clamp(0, 255) as u8)
        }
        Distortion::Occlude { rect, value } => apply_occlude(img, rect, *value),
    }
}

/// Simple LCG pseudo-random number generator (deterministic across platforms).
pub(crate) struct Rng {
    state: u64,
}

impl Rng {
    pub fn new(seed: u64) -> Self {
        Self {
            state: seed.wrapping_add(1),
        }
    }

    fn next_u64(&mut self) -> u64 {
        // LCG with Knuth's constants
        self.state = self
            .state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.state
    }

    /// Uniform f64 in [0, 1).
    pub fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Approximately Gaussian random number (Box-Muller).
    pub fn next_gaussian(&mut self) -> f64 {
        let u1 = self.next_f64().max(1e-15);
        let u2 = self.next_f64();
        (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
    }
}

fn map_pixels(img: &mut ImageU8, mut f: impl FnMut(u8) -> u8) {
    for y in 0..img.height {
        for v in img.row_mut(y) {
            *v = f(*v);
        }
    }
}

fn apply_gaussian_noise(img: &mut ImageU8, sigma: f64, seed: u64) {
    let mut rng = Rng::new(seed);
    map_pixels(img, |v| (v as f64 + rng.next_gaussian() * sigma).round().clamp(0.0, 255.0) as u8);
}

fn apply_contrast_scale(img: &mut ImageU8, factor: f64) {
    if img.is_empty() {
        return;
    }
    let mean = img.iter().map(|v| v as f64).sum::<f64>() / img.len() as f64;
    map_pixels(img, |v| (mean + factor * (v as f64 - mean)).round().clamp(0.0, 255.0) as u8);
}

fn apply_occlude(img: &mut ImageU8, rect: &[u32; 4], value: u8) {
    let [x0, y0, x1, y1] = *rect;
    let (x0, x1) = (x0.min(img.width), x1.min(img.width));
    let (y0, y1) = (y0.min(img.height), y1.min(img.height));
    for y in y0..y1 {
        for x in x0..x1 {
            img.set(x, y, value);
        }
    }
}
