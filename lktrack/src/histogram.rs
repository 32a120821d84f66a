use crate::array::ImageU8;

/// Histogram of 8-bit grayvalues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegerCounts {
    counts: [u32; 256],
    total: u64,
}

impl IntegerCounts {
    pub fn from_image(img: &ImageU8) -> Self {
        let mut counts = [0u32; 256];
        for v in img.iter() {
            counts[v as usize] += 1;
        }
        Self { counts, total: img.len() as u64 }
    }

    pub fn count(&self, value: u8) -> u32 {
        self.counts[value as usize]
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    /// Smallest grayvalue whose cumulative count reaches `percentile` of the total.
    pub fn compute_percentile(&self, percentile: f32) -> i32 {
        let target = (percentile.clamp(0.0, 1.0) as f64 * self.total as f64).ceil() as u64;
        let mut cumulative = 0u64;
        for (v, &c) in self.counts.iter().enumerate() {
            cumulative += c as u64;
            if cumulative >= target.max(1) {
                return v as i32;
            }
        }
        255
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentile_of_ramp() {
        let img = ImageU8::from_fn(100, 1, |x, _| x as u8);
        let h = IntegerCounts::from_image(&img);
        assert_eq!(h.total(), 100);
        assert_eq!(h.count(42), 1);
        assert_eq!(h.compute_percentile(0.95), 94);
        assert_eq!(h.compute_percentile(0.0), 0);
        assert_eq!(h.compute_percentile(1.0), 99);
    }
}
