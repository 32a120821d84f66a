use crate::array::Array2;

/// Lazy arithmetic progression `start, start + increment, ...` of `len` values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearSequence {
    start: f32,
    increment: f32,
    len: usize,
}

impl LinearSequence {
    pub fn new(start: f32, increment: f32, len: usize) -> Self {
        Self { start, increment, len }
    }

    #[inline]
    pub fn start(&self) -> f32 {
        self.start
    }

    #[inline]
    pub fn increment(&self) -> f32 {
        self.increment
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Last value of the sequence (`start` when empty).
    pub fn end(&self) -> f32 {
        if self.len == 0 {
            self.start
        } else {
            self.get(self.len - 1)
        }
    }

    #[inline]
    pub fn get(&self, i: usize) -> f32 {
        self.start + self.increment * i as f32
    }

    pub fn iter(&self) -> impl Iterator<Item = f32> + '_ {
        (0..self.len).map(move |i| self.get(i))
    }
}

/// `n` evenly spaced values from `start` to `end` inclusive.
pub fn linspace(start: f32, end: f32, n: usize) -> LinearSequence {
    let increment = if n > 1 { (end - start) / (n - 1) as f32 } else { 0.0 };
    LinearSequence::new(start, increment, n)
}

/// Regular 2D sample grid: every combination of an x and a y sequence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Meshgrid {
    pub x: LinearSequence,
    pub y: LinearSequence,
}

impl Meshgrid {
    pub fn new(x: LinearSequence, y: LinearSequence) -> Self {
        Self { x, y }
    }

    pub fn width(&self) -> usize {
        self.x.len()
    }

    pub fn height(&self) -> usize {
        self.y.len()
    }

    pub fn num_points(&self) -> usize {
        self.x.len() * self.y.len()
    }

    /// Write the grid into explicit coordinate arrays.
    pub fn evaluate(&self) -> (Array2<f32>, Array2<f32>) {
        let w = self.width() as u32;
        let h = self.height() as u32;
        let xs = Array2::from_fn(w, h, |x, _| self.x.get(x as usize));
        let ys = Array2::from_fn(w, h, |_, y| self.y.get(y as usize));
        (xs, ys)
    }

    /// Row-major iterator of `(x, y)` grid coordinates.
    pub fn points(&self) -> impl Iterator<Item = (f32, f32)> + '_ {
        self.y.iter().flat_map(move |y| self.x.iter().map(move |x| (x, y)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linspace_is_inclusive() {
        let s = linspace(-2.0, 2.0, 5);
        assert_eq!(s.iter().collect::<Vec<_>>(), vec![-2.0, -1.0, 0.0, 1.0, 2.0]);
        assert_eq!(s.increment(), 1.0);
        assert_eq!(s.end(), 2.0);
    }

    #[test]
    fn linspace_degenerate_lengths() {
        let one = linspace(3.0, 9.0, 1);
        assert_eq!(one.iter().collect::<Vec<_>>(), vec![3.0]);
        assert!(linspace(0.0, 1.0, 0).is_empty());
    }

    #[test]
    fn meshgrid_evaluates_row_major() {
        let g = Meshgrid::new(linspace(0.0, 2.0, 3), linspace(10.0, 11.0, 2));
        let (xs, ys) = g.evaluate();
        assert_eq!(xs.width, 3);
        assert_eq!(xs.height, 2);
        assert_eq!(xs.get(2, 1), 2.0);
        assert_eq!(ys.get(2, 1), 11.0);
        let pts: Vec<_> = g.points().collect();
        assert_eq!(pts[0], (0.0, 10.0));
        assert_eq!(pts[4], (1.0, 11.0));
        assert_eq!(g.num_points(), 6);
    }
}
