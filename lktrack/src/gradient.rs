use crate::array::Array2;
use crate::error::{Result, TrackerError};
use crate::interp::Pixel;

/// Horizontal central difference `in[x+1] - in[x-1]`, zero on all four borders.
pub fn compute_x_gradient<T: Pixel>(input: &Array2<T>, out: &mut Array2<f32>) -> Result<()> {
    central_difference(input, out, 1, 0)
}

/// Vertical central difference `in[y+1] - in[y-1]`, zero on all four borders.
pub fn compute_y_gradient<T: Pixel>(input: &Array2<T>, out: &mut Array2<f32>) -> Result<()> {
    central_difference(input, out, 0, 1)
}

fn central_difference<T: Pixel>(
    input: &Array2<T>,
    out: &mut Array2<f32>,
    dx: u32,
    dy: u32,
) -> Result<()> {
    if !input.same_size(out) {
        return Err(TrackerError::size("gradient input and output sizes don't match"));
    }
    out.fill(0.0);
    let (w, h) = (input.width, input.height);
    if w < 3 || h < 3 {
        return Ok(());
    }
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let next = input.get(x + dx, y + dy).to_f32();
            let prev = input.get(x - dx, y - dy).to_f32();
            out.set(x, y, next - prev);
        }
    }
    Ok(())
}

/// Squared gradient magnitude `gx² + gy²`.
pub fn squared_magnitude(gx: &Array2<f32>, gy: &Array2<f32>) -> Array2<f32> {
    Array2::from_fn(gx.width, gx.height, |x, y| {
        let a = gx.get(x, y);
        let b = gy.get(x, y);
        a * a + b * b
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::ImageU8;

    #[test]
    fn x_gradient_of_ramp_with_zero_border() {
        let img = ImageU8::from_fn(5, 4, |x, _| (x * 3) as u8);
        let mut gx = Array2::new(5, 4);
        compute_x_gradient(&img, &mut gx).unwrap();
        assert_eq!(gx.get(2, 1), 6.0);
        assert_eq!(gx.get(0, 1), 0.0);
        assert_eq!(gx.get(4, 1), 0.0);
        assert_eq!(gx.get(2, 0), 0.0);
        assert_eq!(gx.get(2, 3), 0.0);
    }

    #[test]
    fn y_gradient_ignores_horizontal_ramp() {
        let img = ImageU8::from_fn(5, 4, |x, y| (x * 3 + y * 10) as u8);
        let mut gy = Array2::new(5, 4);
        compute_y_gradient(&img, &mut gy).unwrap();
        assert_eq!(gy.get(1, 1), 20.0);
        assert_eq!(gy.get(3, 2), 20.0);
    }

    #[test]
    fn mismatched_sizes_rejected() {
        let img = ImageU8::new(5, 4);
        let mut gx = Array2::new(4, 4);
        assert!(compute_x_gradient(&img, &mut gx).is_err());
    }

    #[test]
    fn magnitude_sums_squares() {
        let gx = Array2::filled(2, 2, 3.0f32);
        let gy = Array2::filled(2, 2, 4.0f32);
        assert_eq!(squared_magnitude(&gx, &gy).get(1, 1), 25.0);
    }
}
