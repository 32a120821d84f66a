//! Sparse sample selection over gradient-magnitude images.
//!
//! Selection is approximate: a threshold is searched over a fixed number of
//! histogram bins, and every sample strictly above the chosen threshold is
//! taken. The count can therefore fall short of the request, but never exceeds it.

use log::{debug, warn};

use crate::array::Array2;
use crate::error::{Result, TrackerError};

/// Threshold bins used by the trackers.
pub const NUM_SELECT_BINS: usize = 20;

/// Non-local-maxima suppression.
///
/// An interior pixel survives if it is strictly greater than both neighbours
/// along at least one of the horizontal, vertical or two diagonal axes.
/// Suppressed interior pixels are set to zero; the one-pixel border is left as is.
pub fn nlms(magnitude: &mut Array2<f32>) {
    let (w, h) = (magnitude.width, magnitude.height);
    if w < 3 || h < 3 {
        return;
    }
    let src = magnitude.clone();
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let c = src.get(x, y);
            let peak = |dx: i32, dy: i32| {
                let a = src.get((x as i32 + dx) as u32, (y as i32 + dy) as u32);
                let b = src.get((x as i32 - dx) as u32, (y as i32 - dy) as u32);
                c > a && c > b
            };
            if !(peak(1, 0) || peak(0, 1) || peak(1, 1) || peak(1, -1)) {
                magnitude.set(x, y, 0.0);
            }
        }
    }
}

/// Select the indices of at most `num_to_select` of the largest `magnitudes`.
///
/// Thresholds `0, max/num_bins, 2*max/num_bins, ...` are tried in order; the
/// first one leaving at most `num_to_select` values strictly above it wins.
/// `indexes` is cleared and filled in increasing index order. Returns the
/// number selected, which is 0 when no threshold qualifies.
pub fn approximate_select(
    magnitudes: &[f32],
    num_bins: usize,
    num_to_select: usize,
    indexes: &mut Vec<usize>,
) -> usize {
    indexes.clear();
    let max = magnitudes.iter().copied().fold(0.0f32, f32::max);
    let bins = num_bins.max(1);
    let increment = max / bins as f32;

    let count_above = |th: f32| magnitudes.iter().filter(|&&m| m > th).count();
    let threshold = (0..bins)
        .map(|i| i as f32 * increment)
        .take_while(|&th| th < max || max == 0.0)
        .find(|&th| count_above(th) <= num_to_select);

    let Some(threshold) = threshold else {
        warn!("Could not find valid threshold");
        return 0;
    };

    indexes.extend(
        magnitudes
            .iter()
            .enumerate()
            .filter(|(_, &m)| m > threshold)
            .map(|(i, _)| i),
    );
    debug!("selected {} of {num_to_select} samples above {threshold}", indexes.len());
    indexes.len()
}

/// Region-stratified variant of [`approximate_select`].
///
/// The image is split into `num_regions x num_regions` tiles. Each tile gets
/// the remaining quota divided by the number of tiles still to visit, so
/// tiles that under-fill pass their share on. Within a tile the threshold is
/// searched between half the tile maximum and the maximum; flat tiles are
/// skipped. Selected indices are row-major `y * width + x` and are written to
/// the front of `indexes`, which must be `width * height` long.
///
/// Returns the number of indices written.
pub fn approximate_select_regions(
    magnitude: &Array2<f32>,
    num_bins: usize,
    num_regions: usize,
    num_to_select: usize,
    indexes: &mut [usize],
) -> Result<usize> {
    let (w, h) = (magnitude.width as usize, magnitude.height as usize);
    if indexes.len() != w * h {
        return Err(TrackerError::size(format!(
            "index buffer holds {} entries, magnitude image has {}",
            indexes.len(),
            w * h
        )));
    }
    if num_regions == 0 {
        return Err(TrackerError::param("num_regions must be greater than zero"));
    }
    let region_h = h / num_regions;
    let region_w = w / num_regions;
    let bins = num_bins.max(1);
    let num_to_select = num_to_select.min(indexes.len());

    let mut selected = 0usize;
    let mut regions_left = num_regions * num_regions;

    for ry in 0..num_regions {
        for rx in 0..num_regions {
            let rows = ry * region_h..(ry + 1) * region_h;
            let cols = rx * region_w..(rx + 1) * region_w;
            let tile = || {
                rows.clone().flat_map({
                    let cols = cols.clone();
                    move |y| cols.clone().map(move |x| (x, y))
                })
            };

            let max = tile()
                .map(|(x, y)| magnitude.get(x as u32, y as u32))
                .fold(0.0f32, f32::max);
            let min = 0.5 * max;
            let quota = (num_to_select - selected) / regions_left;
            regions_left -= 1;
            if max == min || quota == 0 {
                continue;
            }

            let increment = (max - min) / bins as f32;
            let count_above = |th: f32| {
                tile().filter(|&(x, y)| magnitude.get(x as u32, y as u32) > th).count()
            };
            let threshold = (0..bins)
                .map(|i| min + i as f32 * increment)
                .find(|&th| count_above(th) <= quota);

            if let Some(threshold) = threshold.filter(|&th| th > 0.0) {
                let mut taken = 0;
                for (x, y) in tile() {
                    if taken == quota {
                        break;
                    }
                    if magnitude.get(x as u32, y as u32) > threshold {
                        indexes[selected] = y * w + x;
                        selected += 1;
                        taken += 1;
                    }
                }
            }
        }
    }
    debug!("selected {selected} of {num_to_select} samples over {num_regions}x{num_regions} regions");
    Ok(selected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nlms_keeps_ridge_and_zeroes_plateau_neighbours() {
        let mut m = Array2::from_fn(5, 5, |x, _| match x {
            2 => 10.0,
            1 | 3 => 5.0,
            _ => 1.0,
        });
        nlms(&mut m);
        assert_eq!(m.get(2, 2), 10.0);
        assert_eq!(m.get(1, 2), 0.0);
        assert_eq!(m.get(3, 2), 0.0);
        // border untouched
        assert_eq!(m.get(0, 2), 1.0);
    }

    #[test]
    fn nlms_keeps_diagonal_peaks() {
        let mut m = Array2::from_fn(3, 3, |x, y| if x == y { 4.0 } else { 0.0 });
        m.set(1, 1, 2.0);
        m.set(0, 2, 1.0);
        m.set(2, 0, 1.0);
        nlms(&mut m);
        // anti-diagonal neighbours are smaller
        assert_eq!(m.get(1, 1), 2.0);
    }

    #[test]
    fn global_select_never_exceeds_request() {
        let mags: Vec<f32> = (0..100).map(|i| i as f32).collect();
        let mut idx = Vec::new();
        for want in [1, 7, 30, 99, 200] {
            let n = approximate_select(&mags, NUM_SELECT_BINS, want, &mut idx);
            assert!(n <= want, "want {want}, got {n}");
            assert_eq!(n, idx.len());
            assert!(idx.windows(2).all(|w| w[0] < w[1]));
        }
        let n = approximate_select(&mags, NUM_SELECT_BINS, 30, &mut idx);
        assert!(n >= 25, "got {n}");
        assert!(idx.iter().all(|&i| i >= 70));
    }

    #[test]
    fn global_select_without_threshold_returns_nothing() {
        // every threshold leaves too many samples above it
        let mags = vec![5.0f32; 50];
        let mut idx = vec![3];
        assert_eq!(approximate_select(&mags, NUM_SELECT_BINS, 10, &mut idx), 0);
        assert!(idx.is_empty());
    }

    #[test]
    fn region_select_respects_per_region_quota() {
        // strong texture only in the top-left quarter
        let m = Array2::from_fn(40, 40, |x, y| {
            if x < 20 && y < 20 {
                ((x * 7 + y * 13) % 17) as f32 + 1.0
            } else {
                0.0
            }
        });
        let mut idx = vec![0usize; 1600];
        let n = approximate_select_regions(&m, NUM_SELECT_BINS, 2, 40, &mut idx).unwrap();
        assert!(n <= 10, "first region quota is 40/4, got {n}");
        assert!(idx[..n].iter().all(|&i| i % 40 < 20 && i / 40 < 20));
    }

    #[test]
    fn region_select_spreads_samples() {
        let m = Array2::from_fn(40, 40, |x, y| ((x * 31 + y * 17) % 23) as f32 + 1.0);
        let mut idx = vec![0usize; 1600];
        let n = approximate_select_regions(&m, NUM_SELECT_BINS, 2, 100, &mut idx).unwrap();
        assert!(n <= 100);
        let mut per_region = [0usize; 4];
        for &i in &idx[..n] {
            let (x, y) = (i % 40, i / 40);
            per_region[(y / 20) * 2 + x / 20] += 1;
        }
        assert!(per_region.iter().all(|&c| c > 0), "{per_region:?}");
    }

    #[test]
    fn region_select_checks_buffer_size() {
        let m = Array2::<f32>::new(8, 8);
        let mut idx = vec![0usize; 10];
        let err = approximate_select_regions(&m, NUM_SELECT_BINS, 2, 5, &mut idx).unwrap_err();
        assert!(matches!(err, TrackerError::InvalidSize(_)));
    }
}
