//! Bilinear sampling of an image at explicit or homography-mapped coordinates.
//!
//! A destination sample whose four support pixels are not all inside
//! `[0, W-1] x [0, H-1]` gets the caller's invalid value instead.

use crate::array::{aliased, Array2};
use crate::error::{Result, TrackerError};
use crate::geometry::Point;
use crate::grid::Meshgrid;
use crate::homography::{project, Mat3};

/// Conversion from an interpolated value to an output element.
pub trait InterpOutput: Copy + Default {
    fn from_interpolated(v: f32) -> Self;
}

impl InterpOutput for u8 {
    #[inline]
    fn from_interpolated(v: f32) -> Self {
        v.round().clamp(0.0, 255.0) as u8
    }
}

impl InterpOutput for f32 {
    #[inline]
    fn from_interpolated(v: f32) -> Self {
        v
    }
}

/// Pixel source for the sampler.
pub trait Pixel: Copy + Default {
    fn to_f32(self) -> f32;
}

impl Pixel for u8 {
    #[inline]
    fn to_f32(self) -> f32 {
        self as f32
    }
}

impl Pixel for f32 {
    #[inline]
    fn to_f32(self) -> f32 {
        self
    }
}

/// True if `(x, y)` has a full bilinear support inside a `width x height` image.
///
/// NaN coordinates are never in bounds.
#[inline]
pub fn in_bounds(x: f32, y: f32, width: u32, height: u32) -> bool {
    let x_max = width as f32 - 1.0;
    let y_max = height as f32 - 1.0;
    x.floor() >= 0.0 && x.ceil() <= x_max && y.floor() >= 0.0 && y.ceil() <= y_max
}

/// Bilinear interpolation at `(x, y)` with no bounds check beyond clamping the
/// far support pixel, which only carries weight when the coordinate is not integral.
#[inline]
pub fn bilinear<T: Pixel>(img: &Array2<T>, x: f32, y: f32) -> f32 {
    let x0 = x.floor();
    let y0 = y.floor();
    let ax = x - x0;
    let ay = y - y0;
    let xi = x0 as u32;
    let yi = y0 as u32;
    let xi1 = (xi + 1).min(img.width - 1);
    let yi1 = (yi + 1).min(img.height - 1);

    let tl = img.get(xi, yi).to_f32();
    let tr = img.get(xi1, yi).to_f32();
    let bl = img.get(xi, yi1).to_f32();
    let br = img.get(xi1, yi1).to_f32();

    (1.0 - ay) * ((1.0 - ax) * tl + ax * tr) + ay * ((1.0 - ax) * bl + ax * br)
}

/// Bilinear interpolation at `(x, y)`, or `None` when the support is not in bounds.
#[inline]
pub fn bilinear_in_bounds<T: Pixel>(img: &Array2<T>, x: f32, y: f32) -> Option<f32> {
    if in_bounds(x, y, img.width, img.height) {
        Some(bilinear(img, x, y))
    } else {
        None
    }
}

/// Sample `reference` at explicit per-element coordinates.
pub fn interp2<T: Pixel, O: InterpOutput>(
    reference: &Array2<T>,
    x_coordinates: &Array2<f32>,
    y_coordinates: &Array2<f32>,
    out: &mut Array2<O>,
    invalid_value: O,
) -> Result<()> {
    if !x_coordinates.same_size(y_coordinates) || !x_coordinates.same_size(out) {
        return Err(TrackerError::size(
            "coordinate and output arrays must be the same size",
        ));
    }
    if aliased(reference, out) {
        return Err(TrackerError::AliasedBuffers);
    }

    for y in 0..out.height {
        for x in 0..out.width {
            let sx = x_coordinates.get(x, y);
            let sy = y_coordinates.get(x, y);
            let v = match bilinear_in_bounds(reference, sx, sy) {
                Some(v) => O::from_interpolated(v),
                None => invalid_value,
            };
            out.set(x, y, v);
        }
    }
    Ok(())
}

/// Sample `reference` at the affine image of a meshgrid.
///
/// Each grid point `(x, y)` maps to `H[0..2] * (x, y, 1) + center_offset`.
pub fn interp2_affine<T: Pixel, O: InterpOutput>(
    reference: &Array2<T>,
    grid: &Meshgrid,
    homography: &Mat3,
    center_offset: Point<f32>,
    out: &mut Array2<O>,
    invalid_value: O,
) -> Result<()> {
    check_grid_output(reference, grid, out)?;
    let h = homography;

    for (iy, gy) in grid.y.iter().enumerate() {
        for (ix, gx) in grid.x.iter().enumerate() {
            let sx = h[0][0] * gx + h[0][1] * gy + h[0][2] + center_offset.x;
            let sy = h[1][0] * gx + h[1][1] * gy + h[1][2] + center_offset.y;
            let v = match bilinear_in_bounds(reference, sx, sy) {
                Some(v) => O::from_interpolated(v),
                None => invalid_value,
            };
            out.set(ix as u32, iy as u32, v);
        }
    }
    Ok(())
}

/// Sample `reference` at the projective image of a meshgrid.
///
/// Like [`interp2_affine`], with the result divided by `h20*x + h21*y + h22`.
/// Grid points whose normalization is below
/// [`MIN_PROJECTIVE_NORMALIZATION`](crate::homography::MIN_PROJECTIVE_NORMALIZATION)
/// in magnitude get the invalid value.
pub fn interp2_projective<T: Pixel, O: InterpOutput>(
    reference: &Array2<T>,
    grid: &Meshgrid,
    homography: &Mat3,
    center_offset: Point<f32>,
    out: &mut Array2<O>,
    invalid_value: O,
) -> Result<()> {
    check_grid_output(reference, grid, out)?;
    let h = homography;

    for (iy, gy) in grid.y.iter().enumerate() {
        for (ix, gx) in grid.x.iter().enumerate() {
            let v = project(h, gx, gy)
                .and_then(|(px, py)| {
                    bilinear_in_bounds(reference, px + center_offset.x, py + center_offset.y)
                })
                .map_or(invalid_value, O::from_interpolated);
            out.set(ix as u32, iy as u32, v);
        }
    }
    Ok(())
}

fn check_grid_output<T, O>(reference: &Array2<T>, grid: &Meshgrid, out: &Array2<O>) -> Result<()> {
    if out.width as usize != grid.width() || out.height as usize != grid.height() {
        return Err(TrackerError::size(format!(
            "output is {}x{}, grid is {}x{}",
            out.width,
            out.height,
            grid.width(),
            grid.height()
        )));
    }
    if aliased(reference, out) {
        return Err(TrackerError::AliasedBuffers);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::ImageU8;
    use crate::grid::linspace;
    use crate::homography::IDENTITY;

    fn ramp() -> ImageU8 {
        ImageU8::from_fn(8, 6, |x, y| (x * 10 + y) as u8)
    }

    #[test]
    fn bilinear_between_pixels() {
        let img = ramp();
        let v = bilinear(&img, 1.5, 2.0);
        assert!((v - 17.0).abs() < 1e-5);
        let v = bilinear(&img, 1.0, 2.5);
        assert!((v - 12.5).abs() < 1e-5);
    }

    #[test]
    fn bounds_rule_accepts_last_pixel_exactly() {
        assert!(in_bounds(7.0, 5.0, 8, 6));
        assert!(!in_bounds(7.01, 5.0, 8, 6));
        assert!(!in_bounds(-0.01, 0.0, 8, 6));
        assert!(!in_bounds(f32::NAN, 1.0, 8, 6));
        let img = ramp();
        assert_eq!(bilinear_in_bounds(&img, 7.0, 5.0), Some(75.0));
    }

    #[test]
    fn interp2_writes_invalid_outside() {
        let img = ramp();
        let xs = Array2::from_buf(3, 1, 3, vec![1.0, -0.5, 7.5]).unwrap();
        let ys = Array2::from_buf(3, 1, 3, vec![1.0, 1.0, 1.0]).unwrap();
        let mut out = Array2::<f32>::new(3, 1);
        interp2(&img, &xs, &ys, &mut out, -1.0).unwrap();
        assert_eq!(out.get(0, 0), 11.0);
        assert_eq!(out.get(1, 0), -1.0);
        assert_eq!(out.get(2, 0), -1.0);
    }

    #[test]
    fn interp2_rejects_size_mismatch() {
        let img = ramp();
        let xs = Array2::<f32>::new(3, 1);
        let ys = Array2::<f32>::new(2, 1);
        let mut out = Array2::<f32>::new(3, 1);
        let err = interp2(&img, &xs, &ys, &mut out, 0.0).unwrap_err();
        assert!(matches!(err, TrackerError::InvalidSize(_)));
    }

    #[test]
    fn affine_identity_with_center_offset() {
        let img = ramp();
        let grid = Meshgrid::new(linspace(-1.0, 1.0, 3), linspace(-1.0, 1.0, 3));
        let mut out = ImageU8::new(3, 3);
        interp2_affine(&img, &grid, &IDENTITY, Point::new(3.0, 2.0), &mut out, 0).unwrap();
        assert_eq!(out.get(0, 0), 21);
        assert_eq!(out.get(2, 2), 43);
    }

    #[test]
    fn projective_matches_affine_when_bottom_row_trivial() {
        let img = ramp();
        let grid = Meshgrid::new(linspace(0.0, 4.0, 9), linspace(0.0, 3.0, 7));
        let h = [[1.1, 0.1, 0.5], [-0.05, 0.9, 0.25], [0.0, 0.0, 1.0]];
        let mut a = Array2::<f32>::new(9, 7);
        let mut p = Array2::<f32>::new(9, 7);
        interp2_affine(&img, &grid, &h, Point::new(0.0, 0.0), &mut a, -1.0).unwrap();
        interp2_projective(&img, &grid, &h, Point::new(0.0, 0.0), &mut p, -1.0).unwrap();
        for (va, vp) in a.iter().zip(p.iter()) {
            assert!((va - vp).abs() < 1e-4);
        }
    }

    #[test]
    fn projective_degenerate_normalization_is_invalid() {
        let img = ramp();
        let grid = Meshgrid::new(linspace(0.0, 1.0, 2), linspace(0.0, 0.0, 1));
        // normalization = 1 - x vanishes at x = 1
        let h = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [-1.0, 0.0, 1.0]];
        let mut out = Array2::<f32>::new(2, 1);
        interp2_projective(&img, &grid, &h, Point::new(0.0, 0.0), &mut out, -7.0).unwrap();
        assert_eq!(out.get(0, 0), 0.0);
        assert_eq!(out.get(1, 0), -7.0);
    }
}
