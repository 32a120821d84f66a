use crate::array::ImageU8;
use crate::interp::bilinear_in_bounds;

/// Average each 2×2 block.
pub fn decimate(img: &ImageU8) -> ImageU8 {
    let out_w = img.width / 2;
    let out_h = img.height / 2;
    let mut out = ImageU8::new(out_w, out_h);

    for oy in 0..out_h {
        for ox in 0..out_w {
            let sum = img.get(2 * ox, 2 * oy) as u32
                + img.get(2 * ox + 1, 2 * oy) as u32
                + img.get(2 * ox, 2 * oy + 1) as u32
                + img.get(2 * ox + 1, 2 * oy + 1) as u32;
            out.set(ox, oy, ((sum + 2) / 4) as u8);
        }
    }
    out
}

/// Build a 1D Gaussian kernel with the given sigma and kernel size.
///
/// Returns normalized kernel values. `ksz` must be odd.
fn gaussian_kernel(sigma: f32, ksz: usize) -> Vec<f32> {
    let half = ksz as i32 / 2;
    let mut kernel = Vec::with_capacity(ksz);
    let mut sum = 0.0f32;
    for i in 0..ksz as i32 {
        let x = (i - half) as f32;
        let v = (-x * x / (2.0 * sigma * sigma)).exp();
        kernel.push(v);
        sum += v;
    }
    for v in &mut kernel {
        *v /= sum;
    }
    kernel
}

/// Separable Gaussian blur with clamped borders.
///
/// The kernel spans `±2σ`, rounded up to an odd size; sigmas too small for a
/// three-tap kernel return a copy.
pub fn gaussian_blur(img: &ImageU8, sigma: f32) -> ImageU8 {
    let mut ksz = (4.0 * sigma).ceil() as usize;
    if ksz % 2 == 0 {
        ksz += 1;
    }
    if ksz <= 1 || img.is_empty() {
        return img.clone();
    }

    let kernel = gaussian_kernel(sigma, ksz);
    let half = ksz as i32 / 2;
    let w = img.width as i32;
    let h = img.height as i32;

    // Horizontal pass
    let mut tmp = vec![0.0f32; (w * h) as usize];
    for y in 0..h {
        for x in 0..w {
            let mut sum = 0.0f32;
            for (k, kv) in kernel.iter().enumerate() {
                let sx = (x + k as i32 - half).clamp(0, w - 1);
                sum += img.get(sx as u32, y as u32) as f32 * kv;
            }
            tmp[(y * w + x) as usize] = sum;
        }
    }

    // Vertical pass
    let mut out = ImageU8::new(img.width, img.height);
    for y in 0..h {
        for x in 0..w {
            let mut sum = 0.0f32;
            for (k, kv) in kernel.iter().enumerate() {
                let sy = (y + k as i32 - half).clamp(0, h - 1);
                sum += tmp[(sy * w + x) as usize] * kv;
            }
            out.set(x as u32, y as u32, sum.round().clamp(0.0, 255.0) as u8);
        }
    }
    out
}

/// How the levels of an [`ImagePyramid`] relate to the base image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PyramidKind {
    /// Every level is the base image, sampled directly at base resolution.
    Shared,
    /// Level `l` is level `l-1` blurred and decimated by two.
    Decimated,
    /// Level `l` is the base image blurred with `sigma = 2^l / 3`, kept at full resolution.
    Blurred,
}

/// Per-level images used while tracking.
///
/// Only decimated levels change resolution; their coordinates map to base
/// image coordinates through the pixel centres.
#[derive(Debug, Clone)]
pub struct ImagePyramid {
    levels: Vec<ImageU8>,
    kind: PyramidKind,
}

/// Sigma of the anti-aliasing blur applied before each decimation.
const DECIMATION_SIGMA: f32 = 0.8;

impl ImagePyramid {
    /// A decimated pyramid when `smoothed`, otherwise a shared one.
    pub fn build(img: &ImageU8, num_levels: usize, smoothed: bool) -> Self {
        let kind = if smoothed { PyramidKind::Decimated } else { PyramidKind::Shared };
        Self::with_kind(img, num_levels, kind)
    }

    pub fn with_kind(img: &ImageU8, num_levels: usize, kind: PyramidKind) -> Self {
        let mut levels = Vec::with_capacity(num_levels);
        levels.push(img.clone());
        match kind {
            PyramidKind::Shared => {}
            PyramidKind::Decimated => {
                for l in 1..num_levels {
                    let blurred = gaussian_blur(&levels[l - 1], DECIMATION_SIGMA);
                    levels.push(decimate(&blurred));
                }
            }
            PyramidKind::Blurred => {
                for l in 1..num_levels {
                    levels.push(gaussian_blur(img, (1u32 << l) as f32 / 3.0));
                }
            }
        }
        Self { levels, kind }
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    pub fn kind(&self) -> PyramidKind {
        self.kind
    }

    /// Image used at `level`.
    pub fn level(&self, level: usize) -> &ImageU8 {
        match self.kind {
            PyramidKind::Shared => &self.levels[0],
            _ => &self.levels[level.min(self.levels.len() - 1)],
        }
    }

    /// Base-image pixels per level pixel.
    #[inline]
    pub fn factor(&self, level: usize) -> f32 {
        match self.kind {
            PyramidKind::Decimated => (1u32 << level) as f32,
            _ => 1.0,
        }
    }

    /// Map base-image coordinates to `level` pixel coordinates.
    #[inline]
    pub fn to_level(&self, level: usize, x: f32, y: f32) -> (f32, f32) {
        let f = self.factor(level);
        if f == 1.0 {
            (x, y)
        } else {
            ((x + 0.5) / f - 0.5, (y + 0.5) / f - 0.5)
        }
    }

    /// Bilinear sample at base-image coordinates `(x, y)` from `level`, or
    /// `None` when the support falls outside that level.
    #[inline]
    pub fn sample(&self, level: usize, x: f32, y: f32) -> Option<f32> {
        let (lx, ly) = self.to_level(level, x, y);
        bilinear_in_bounds(self.level(level), lx, ly)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decimate_averages_blocks() {
        let mut img = ImageU8::new(4, 4);
        img.set(0, 0, 100);
        img.set(1, 0, 200);
        img.set(0, 1, 0);
        img.set(1, 1, 100);
        let out = decimate(&img);
        assert_eq!(out.width, 2);
        assert_eq!(out.height, 2);
        assert_eq!(out.get(0, 0), 100);
        assert_eq!(out.get(1, 1), 0);
    }

    #[test]
    fn gaussian_kernel_is_normalized() {
        let k = gaussian_kernel(1.0, 5);
        let sum: f32 = k.iter().sum();
        assert!((sum - 1.0).abs() < 1e-6);
        assert!(k[2] > k[1] && k[1] > k[0]);
    }

    #[test]
    fn blur_preserves_constant_image() {
        let img = ImageU8::filled(9, 7, 123);
        let out = gaussian_blur(&img, 1.5);
        assert!(out.iter().all(|v| v == 123));
    }

    #[test]
    fn unsmoothed_pyramid_samples_base_image() {
        let img = ImageU8::from_fn(16, 16, |x, y| (x + 16 * y) as u8);
        let pyr = ImagePyramid::build(&img, 3, false);
        assert_eq!(pyr.factor(2), 1.0);
        assert_eq!(pyr.level(2).width, 16);
        assert_eq!(pyr.sample(2, 3.0, 1.0), Some(19.0));
    }

    #[test]
    fn blurred_pyramid_keeps_resolution() {
        let img = ImageU8::from_fn(16, 16, |x, _| if x < 8 { 0 } else { 200 });
        let pyr = ImagePyramid::with_kind(&img, 3, PyramidKind::Blurred);
        assert_eq!(pyr.level(2).width, 16);
        assert_eq!(pyr.factor(2), 1.0);
        assert_eq!(pyr.level(0).get(7, 3), 0);
        assert!(pyr.level(2).get(7, 3) > 0);
    }

    #[test]
    fn smoothed_pyramid_maps_pixel_centres() {
        let img = ImageU8::filled(16, 16, 80);
        let pyr = ImagePyramid::build(&img, 3, true);
        assert_eq!(pyr.level(1).width, 8);
        assert_eq!(pyr.level(2).width, 4);
        assert_eq!(pyr.to_level(1, 1.5, 0.5), (0.5, 0.0));
        assert_eq!(pyr.to_level(2, 1.5, 1.5), (0.0, 0.0));
        assert_eq!(pyr.sample(2, 1.5, 1.5), Some(80.0));
        // base x = 14 maps to 3.125 at level 2, past the last pixel
        assert_eq!(pyr.sample(2, 14.0, 1.5), None);
    }
}
