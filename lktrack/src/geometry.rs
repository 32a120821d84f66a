use std::ops::{Index, IndexMut};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Point<T> {
    pub x: T,
    pub y: T,
}

impl<T> Point<T> {
    pub const fn new(x: T, y: T) -> Self {
        Self { x, y }
    }
}

impl Point<f32> {
    pub fn distance(&self, other: &Point<f32>) -> f32 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Point3<T> {
    pub x: T,
    pub y: T,
    pub z: T,
}

impl<T> Point3<T> {
    pub const fn new(x: T, y: T, z: T) -> Self {
        Self { x, y, z }
    }
}

/// Corner order used throughout: top-left, top-right, bottom-left, bottom-right.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Corner {
    TopLeft = 0,
    TopRight = 1,
    BottomLeft = 2,
    BottomRight = 3,
}

/// Four ordered 2D corners.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Quadrilateral<T> {
    pub corners: [Point<T>; 4],
}

impl<T> Quadrilateral<T> {
    pub const fn new(c0: Point<T>, c1: Point<T>, c2: Point<T>, c3: Point<T>) -> Self {
        Self { corners: [c0, c1, c2, c3] }
    }
}

impl<T> Index<usize> for Quadrilateral<T> {
    type Output = Point<T>;

    fn index(&self, i: usize) -> &Point<T> {
        &self.corners[i]
    }
}

impl<T> IndexMut<usize> for Quadrilateral<T> {
    fn index_mut(&mut self, i: usize) -> &mut Point<T> {
        &mut self.corners[i]
    }
}

impl<T> Index<Corner> for Quadrilateral<T> {
    type Output = Point<T>;

    fn index(&self, c: Corner) -> &Point<T> {
        &self.corners[c as usize]
    }
}

impl Quadrilateral<f32> {
    /// Quad with every corner at `(v, v)`.
    pub const fn splat(v: f32) -> Self {
        let p = Point::new(v, v);
        Self::new(p, p, p, p)
    }

    /// Mean of the four corners.
    pub fn compute_center(&self) -> Point<f32> {
        let sx: f32 = self.corners.iter().map(|p| p.x).sum();
        let sy: f32 = self.corners.iter().map(|p| p.y).sum();
        Point::new(sx / 4.0, sy / 4.0)
    }

    pub fn bounding_rect(&self) -> Rectangle<f32> {
        let mut r = Rectangle::new(f32::MAX, f32::MIN, f32::MAX, f32::MIN);
        for p in &self.corners {
            r.left = r.left.min(p.x);
            r.right = r.right.max(p.x);
            r.top = r.top.min(p.y);
            r.bottom = r.bottom.max(p.y);
        }
        r
    }

    /// Corners sorted by angle around the centre, clockwise in image
    /// coordinates (y down), starting from the corner closest to top-left.
    pub fn compute_clockwise_corners(&self) -> Quadrilateral<f32> {
        let c = self.compute_center();
        let mut idx = [0usize, 1, 2, 3];
        let angle = |p: &Point<f32>| (p.y - c.y).atan2(p.x - c.x);
        idx.sort_by(|&a, &b| angle(&self.corners[a]).total_cmp(&angle(&self.corners[b])));

        // Rotate so the corner with the smallest x + y comes first.
        let start = (0..4)
            .min_by(|&a, &b| {
                let pa = self.corners[idx[a]];
                let pb = self.corners[idx[b]];
                (pa.x + pa.y).total_cmp(&(pb.x + pb.y))
            })
            .unwrap_or(0);
        let p = |k: usize| self.corners[idx[(start + k) % 4]];
        Quadrilateral::new(p(0), p(1), p(2), p(3))
    }

    /// True if the quad, taken in clockwise order, is strictly convex.
    pub fn is_convex(&self) -> bool {
        let cw = self.compute_clockwise_corners();
        let mut sign = 0.0f32;
        for i in 0..4 {
            let a = cw[i];
            let b = cw[(i + 1) % 4];
            let c = cw[(i + 2) % 4];
            let cross = (b.x - a.x) * (c.y - b.y) - (b.y - a.y) * (c.x - b.x);
            if cross.abs() < 1e-6 {
                return false;
            }
            if sign == 0.0 {
                sign = cross.signum();
            } else if cross.signum() != sign {
                return false;
            }
        }
        true
    }

    /// Mean Euclidean distance between corresponding corners.
    pub fn mean_corner_distance(&self, other: &Quadrilateral<f32>) -> f32 {
        (0..4).map(|i| self[i].distance(&other[i])).sum::<f32>() / 4.0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Rectangle<T> {
    pub left: T,
    pub right: T,
    pub top: T,
    pub bottom: T,
}

impl<T> Rectangle<T> {
    pub const fn new(left: T, right: T, top: T, bottom: T) -> Self {
        Self { left, right, top, bottom }
    }
}

impl Rectangle<f32> {
    pub fn width(&self) -> f32 {
        self.right - self.left
    }

    pub fn height(&self) -> f32 {
        self.bottom - self.top
    }

    pub fn center(&self) -> Point<f32> {
        Point::new((self.left + self.right) / 2.0, (self.top + self.bottom) / 2.0)
    }

    /// Grow or shrink about the centre by `percent` (1.0 = unchanged).
    pub fn scaled(&self, percent: f32) -> Rectangle<f32> {
        let c = self.center();
        let hw = self.width() * percent / 2.0;
        let hh = self.height() * percent / 2.0;
        Rectangle::new(c.x - hw, c.x + hw, c.y - hh, c.y + hh)
    }

    pub fn contains(&self, p: Point<f32>) -> bool {
        p.x >= self.left && p.x <= self.right && p.y >= self.top && p.y <= self.bottom
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Quadrilateral<f32> {
        Quadrilateral::new(
            Point::new(10.0, 10.0),
            Point::new(70.0, 10.0),
            Point::new(10.0, 50.0),
            Point::new(70.0, 50.0),
        )
    }

    #[test]
    fn center_and_bounds() {
        let q = square();
        assert_eq!(q.compute_center(), Point::new(40.0, 30.0));
        let r = q.bounding_rect();
        assert_eq!(r, Rectangle::new(10.0, 70.0, 10.0, 50.0));
        assert_eq!(r.width(), 60.0);
        assert_eq!(r.height(), 40.0);
    }

    #[test]
    fn clockwise_corners_from_scrambled_order() {
        let q = square();
        let cw = q.compute_clockwise_corners();
        assert_eq!(cw[0], Point::new(10.0, 10.0));
        assert_eq!(cw[1], Point::new(70.0, 10.0));
        assert_eq!(cw[2], Point::new(70.0, 50.0));
        assert_eq!(cw[3], Point::new(10.0, 50.0));
    }

    #[test]
    fn convexity() {
        assert!(square().is_convex());
        let dart = Quadrilateral::new(
            Point::new(0.0, 0.0),
            Point::new(10.0, 5.0),
            Point::new(0.0, 10.0),
            Point::new(3.0, 5.0),
        );
        assert!(!dart.is_convex());
        assert!(!Quadrilateral::splat(1.0).is_convex());
    }

    #[test]
    fn scaled_rectangle_keeps_center() {
        let r = Rectangle::new(0.0, 10.0, 0.0, 20.0).scaled(0.5);
        assert_eq!(r, Rectangle::new(2.5, 7.5, 5.0, 15.0));
        assert!(r.contains(Point::new(5.0, 10.0)));
        assert!(!r.contains(Point::new(1.0, 10.0)));
    }

    #[test]
    fn corner_distance() {
        let a = square();
        let mut b = a;
        for i in 0..4 {
            b[i].x += 3.0;
            b[i].y += 4.0;
        }
        assert!((a.mean_corner_distance(&b) - 5.0).abs() < 1e-6);
        assert_eq!(b[Corner::TopLeft], Point::new(13.0, 14.0));
    }
}
