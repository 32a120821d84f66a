/// Tracking quality metrics: corner accuracy, translation error, verification.
use lktrack::{Quadrilateral, VerifyResult};
use serde::{Deserialize, Serialize};

/// Result of tracking one scene.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackOutcome {
    /// Whether the final refinement converged.
    pub converged: bool,
    /// Tracked corners in the next frame: [TL, TR, BL, BR].
    pub corners: [[f64; 2]; 4],
    /// Per-corner Euclidean distance to ground truth (pixels).
    pub corner_errors: [f64; 4],
    /// Root mean square of the per-corner errors.
    pub corner_rmse: f64,
    pub max_corner_error: f64,
    /// Distance between tracked and true quad centres (pixels).
    pub translation_error: f64,
    /// Fraction of verification samples within the pixel tolerance, if the
    /// tracker verifies.
    pub similar_fraction: Option<f64>,
    /// Tracking time in microseconds.
    pub track_time_us: u64,
}

/// Score tracked corners against ground truth.
pub fn evaluate(
    truth: &[[f64; 2]; 4],
    tracked: &Quadrilateral<f32>,
    converged: bool,
    verify: Option<&VerifyResult>,
    track_time_us: u64,
) -> TrackOutcome {
    let corners = tracked.corners.map(|p| [p.x as f64, p.y as f64]);
    let mut corner_errors = [0.0; 4];
    for (i, err) in corner_errors.iter_mut().enumerate() {
        *err = distance(&truth[i], &corners[i]);
    }

    let sum_sq: f64 = corner_errors.iter().map(|e| e * e).sum();
    let corner_rmse = (sum_sq / 4.0).sqrt();
    let max_corner_error = corner_errors.iter().cloned().fold(0.0_f64, f64::max);
    let translation_error = distance(&center(truth), &center(&corners));

    TrackOutcome {
        converged,
        corners,
        corner_errors,
        corner_rmse,
        max_corner_error,
        translation_error,
        similar_fraction: verify.map(|v| v.similar_fraction() as f64),
        track_time_us,
    }
}

fn center(c: &[[f64; 2]; 4]) -> [f64; 2] {
    [
        c.iter().map(|p| p[0]).sum::<f64>() / 4.0,
        c.iter().map(|p| p[1]).sum::<f64>() / 4.0,
    ]
}

fn distance(a: &[f64; 2], b: &[f64; 2]) -> f64 {
    ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2)).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use lktrack::Point;

    fn quad(c: [[f32; 2]; 4]) -> Quadrilateral<f32> {
        let p = |i: usize| Point::new(c[i][0], c[i][1]);
        Quadrilateral::new(p(0), p(1), p(2), p(3))
    }

    #[test]
    fn perfect_track_has_zero_error() {
        let truth = [[10.0, 10.0], [50.0, 10.0], [10.0, 40.0], [50.0, 40.0]];
        let tracked = quad([[10.0, 10.0], [50.0, 10.0], [10.0, 40.0], [50.0, 40.0]]);
        let outcome = evaluate(&truth, &tracked, true, None, 0);
        assert_eq!(outcome.corner_rmse, 0.0);
        assert_eq!(outcome.translation_error, 0.0);
        assert!(outcome.similar_fraction.is_none());
    }

    #[test]
    fn shifted_track_reports_the_shift() {
        let truth = [[10.0, 10.0], [50.0, 10.0], [10.0, 40.0], [50.0, 40.0]];
        let tracked = quad([[13.0, 14.0], [53.0, 14.0], [13.0, 44.0], [53.0, 44.0]]);
        let verify = VerifyResult {
            mean_absolute_difference: 3,
            num_in_bounds: 100,
            num_similar_pixels: 75,
        };
        let outcome = evaluate(&truth, &tracked, false, Some(&verify), 12);
        assert!((outcome.corner_rmse - 5.0).abs() < 1e-9);
        assert!((outcome.max_corner_error - 5.0).abs() < 1e-9);
        assert!((outcome.translation_error - 5.0).abs() < 1e-9);
        assert_eq!(outcome.similar_fraction, Some(0.75));
        assert!(!outcome.converged);
    }

    #[test]
    fn single_bad_corner_dominates_max() {
        let truth = [[0.0, 0.0], [10.0, 0.0], [0.0, 10.0], [10.0, 10.0]];
        let tracked = quad([[0.0, 0.0], [10.0, 0.0], [0.0, 10.0], [14.0, 13.0]]);
        let outcome = evaluate(&truth, &tracked, true, None, 0);
        assert!((outcome.max_corner_error - 5.0).abs() < 1e-9);
        assert!((outcome.corner_rmse - 2.5).abs() < 1e-9);
    }
}
