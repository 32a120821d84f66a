use crate::error::{Result, TrackerError};

/// Dense row-major 2D buffer.
///
/// `stride` is the distance between rows in elements and is always `>= width`.
#[derive(Debug, Clone, PartialEq)]
pub struct Array2<T> {
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub buf: Vec<T>,
}

/// Grayscale image with row-major pixel data.
pub type ImageU8 = Array2<u8>;

impl<T: Copy + Default> Array2<T> {
    /// Create a new array filled with `T::default()`.
    pub fn new(width: u32, height: u32) -> Self {
        Self::filled(width, height, T::default())
    }

    /// Create a new array with every element set to `value`.
    pub fn filled(width: u32, height: u32, value: T) -> Self {
        let stride = width;
        let buf = vec![value; (stride * height) as usize];
        Self { width, height, stride, buf }
    }

    /// Create an array from existing data.
    ///
    /// `stride` must be >= `width`, and `buf` must contain at least `stride * height` elements.
    pub fn from_buf(width: u32, height: u32, stride: u32, buf: Vec<T>) -> Result<Self> {
        if stride < width {
            return Err(TrackerError::size(format!(
                "stride {stride} is smaller than width {width}"
            )));
        }
        if buf.len() < (stride * height) as usize {
            return Err(TrackerError::size(format!(
                "buffer holds {} elements, {}x{} with stride {stride} needs {}",
                buf.len(),
                width,
                height,
                stride * height
            )));
        }
        Ok(Self { width, height, stride, buf })
    }

    /// Build an array by evaluating `f(x, y)` at every element.
    pub fn from_fn(width: u32, height: u32, mut f: impl FnMut(u32, u32) -> T) -> Self {
        let mut out = Self::new(width, height);
        for y in 0..height {
            for x in 0..width {
                out.set(x, y, f(x, y));
            }
        }
        out
    }

    #[inline]
    pub fn get(&self, x: u32, y: u32) -> T {
        self.buf[(y * self.stride + x) as usize]
    }

    #[inline]
    pub fn set(&mut self, x: u32, y: u32, val: T) {
        self.buf[(y * self.stride + x) as usize] = val;
    }

    /// The `width` valid elements of row `y`.
    #[inline]
    pub fn row(&self, y: u32) -> &[T] {
        let start = (y * self.stride) as usize;
        &self.buf[start..start + self.width as usize]
    }

    #[inline]
    pub fn row_mut(&mut self, y: u32) -> &mut [T] {
        let start = (y * self.stride) as usize;
        &mut self.buf[start..start + self.width as usize]
    }

    pub fn fill(&mut self, value: T) {
        for y in 0..self.height {
            self.row_mut(y).fill(value);
        }
    }

    /// Number of valid elements (`width * height`).
    pub fn len(&self) -> usize {
        (self.width * self.height) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn same_size<U>(&self, other: &Array2<U>) -> bool {
        self.width == other.width && self.height == other.height
    }

    /// Iterate the valid elements in row-major order, skipping stride padding.
    pub fn iter(&self) -> impl Iterator<Item = T> + '_ {
        (0..self.height).flat_map(move |y| self.row(y).iter().copied())
    }

    /// Element-wise conversion into a new array.
    pub fn map<U: Copy + Default>(&self, mut f: impl FnMut(T) -> U) -> Array2<U> {
        Array2::from_fn(self.width, self.height, |x, y| f(self.get(x, y)))
    }
}

impl<T: Copy + Default + PartialOrd> Array2<T> {
    /// Minimum and maximum element, or `None` for an empty array.
    pub fn min_max(&self) -> Option<(T, T)> {
        let mut it = self.iter();
        let first = it.next()?;
        Some(it.fold((first, first), |(lo, hi), v| {
            (if v < lo { v } else { lo }, if v > hi { v } else { hi })
        }))
    }
}

/// True if two arrays share backing storage.
pub fn aliased<T, U>(a: &Array2<T>, b: &Array2<U>) -> bool {
    let a_start = a.buf.as_ptr() as usize;
    let a_end = a_start + std::mem::size_of_val(a.buf.as_slice());
    let b_start = b.buf.as_ptr() as usize;
    let b_end = b_start + std::mem::size_of_val(b.buf.as_slice());
    a_start < b_end && b_start < a_end
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_creates_zeroed_image() {
        let img = ImageU8::new(10, 8);
        assert_eq!(img.width, 10);
        assert_eq!(img.height, 8);
        assert_eq!(img.stride, 10);
        assert_eq!(img.buf.len(), 80);
        assert!(img.buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn get_set_pixel() {
        let mut img = ImageU8::new(4, 4);
        img.set(2, 3, 128);
        assert_eq!(img.get(2, 3), 128);
        assert_eq!(img.get(0, 0), 0);
    }

    #[test]
    fn from_buf_with_stride() {
        let buf = vec![1, 2, 3, 0, 4, 5, 6, 0]; // stride=4, width=3
        let img = ImageU8::from_buf(3, 2, 4, buf).unwrap();
        assert_eq!(img.get(2, 0), 3);
        assert_eq!(img.get(0, 1), 4);
        assert_eq!(img.row(1), &[4, 5, 6]);
        assert_eq!(img.iter().collect::<Vec<_>>(), vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn from_buf_rejects_short_buffer() {
        let err = ImageU8::from_buf(4, 4, 4, vec![0; 15]).unwrap_err();
        assert!(matches!(err, TrackerError::InvalidSize(_)));
        let err = ImageU8::from_buf(4, 1, 3, vec![0; 16]).unwrap_err();
        assert!(matches!(err, TrackerError::InvalidSize(_)));
    }

    #[test]
    fn min_max_over_valid_region() {
        let img = Array2::from_buf(2, 2, 3, vec![5.0f32, -1.0, 99.0, 3.0, 7.0, 99.0]).unwrap();
        assert_eq!(img.min_max(), Some((-1.0, 7.0)));
        assert_eq!(Array2::<f32>::new(0, 0).min_max(), None);
    }

    #[test]
    fn distinct_arrays_do_not_alias() {
        let a = ImageU8::new(4, 4);
        let b = ImageU8::new(4, 4);
        assert!(!aliased(&a, &b));
        assert!(aliased(&a, &a));
    }
}
