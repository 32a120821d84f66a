//! Fixed-size normal equations.
//!
//! Rows are accumulated into the upper triangle only; [`SymmetricMatrix::mirror_upper`]
//! fills the lower triangle before solving.

/// Pivots at or below this are treated as a numerical failure.
const MIN_PIVOT: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SymmetricMatrix<const N: usize> {
    pub a: [[f32; N]; N],
}

impl<const N: usize> Default for SymmetricMatrix<N> {
    fn default() -> Self {
        Self::zeros()
    }
}

impl<const N: usize> SymmetricMatrix<N> {
    pub const fn zeros() -> Self {
        Self { a: [[0.0; N]; N] }
    }

    /// Add `row * rowᵀ` to the upper triangle.
    #[inline]
    pub fn accumulate_outer_product(&mut self, row: &[f32; N]) {
        for i in 0..N {
            let ri = row[i];
            for j in i..N {
                self.a[i][j] += ri * row[j];
            }
        }
    }

    /// Add `weight * row * rowᵀ` to the upper triangle.
    #[inline]
    pub fn accumulate_weighted(&mut self, row: &[f32; N], weight: f32) {
        for i in 0..N {
            let ri = row[i] * weight;
            for j in i..N {
                self.a[i][j] += ri * row[j];
            }
        }
    }

    /// Subtract `row * rowᵀ` from the upper triangle.
    #[inline]
    pub fn remove_outer_product(&mut self, row: &[f32; N]) {
        for i in 0..N {
            let ri = row[i];
            for j in i..N {
                self.a[i][j] -= ri * row[j];
            }
        }
    }

    /// Copy the upper triangle into the lower triangle.
    pub fn mirror_upper(&mut self) {
        for i in 0..N {
            for j in 0..i {
                self.a[i][j] = self.a[j][i];
            }
        }
    }

    /// Add `weight` to every diagonal element.
    pub fn add_ridge(&mut self, weight: f32) {
        for i in 0..N {
            self.a[i][i] += weight;
        }
    }

    /// Solve `A x = b` by Cholesky factorization of the full (mirrored) matrix.
    ///
    /// Returns `None` when the matrix is not numerically positive definite.
    pub fn solve_cholesky(&self, b: &[f32; N]) -> Option<[f32; N]> {
        let mut l = [[0.0f64; N]; N];
        for i in 0..N {
            for j in 0..=i {
                let mut sum = self.a[i][j] as f64;
                for k in 0..j {
                    sum -= l[i][k] * l[j][k];
                }
                if i == j {
                    if sum <= MIN_PIVOT || !sum.is_finite() {
                        return None;
                    }
                    l[i][i] = sum.sqrt();
                } else {
                    l[i][j] = sum / l[j][j];
                }
            }
        }

        // L y = b
        let mut y = [0.0f64; N];
        for i in 0..N {
            let mut sum = b[i] as f64;
            for k in 0..i {
                sum -= l[i][k] * y[k];
            }
            y[i] = sum / l[i][i];
        }

        // Lᵀ x = y
        let mut x = [0.0f32; N];
        let mut xd = [0.0f64; N];
        for i in (0..N).rev() {
            let mut sum = y[i];
            for k in i + 1..N {
                sum -= l[k][i] * xd[k];
            }
            xd[i] = sum / l[i][i];
            x[i] = xd[i] as f32;
        }
        Some(x)
    }
}

/// Right-hand side `Aᵀ r` accumulator.
#[inline]
pub fn accumulate_rhs<const N: usize>(b: &mut [f32; N], row: &[f32; N], residual: f32) {
    for i in 0..N {
        b[i] += row[i] * residual;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solves_spd_system() {
        let mut m = SymmetricMatrix::<3>::zeros();
        let rows = [[1.0, 0.0, 1.0], [0.0, 2.0, 1.0], [1.0, 1.0, 0.0], [3.0, 0.0, 0.0]];
        let x_true = [0.5f32, -1.0, 2.0];
        let mut b = [0.0; 3];
        for r in &rows {
            m.accumulate_outer_product(r);
            let rhs = r[0] * x_true[0] + r[1] * x_true[1] + r[2] * x_true[2];
            accumulate_rhs(&mut b, r, rhs);
        }
        assert_eq!(m.a[2][0], 0.0);
        m.mirror_upper();
        assert_eq!(m.a[2][0], m.a[0][2]);
        let x = m.solve_cholesky(&b).unwrap();
        for i in 0..3 {
            assert!((x[i] - x_true[i]).abs() < 1e-4, "{x:?}");
        }
    }

    #[test]
    fn singular_system_reports_failure() {
        let mut m = SymmetricMatrix::<2>::zeros();
        m.accumulate_outer_product(&[1.0, 2.0]);
        m.accumulate_outer_product(&[2.0, 4.0]);
        m.mirror_upper();
        assert!(m.solve_cholesky(&[1.0, 2.0]).is_none());
    }

    #[test]
    fn ridge_regularizes_singular_system() {
        let mut m = SymmetricMatrix::<2>::zeros();
        m.accumulate_outer_product(&[1.0, 2.0]);
        m.mirror_upper();
        m.add_ridge(0.1);
        assert!(m.solve_cholesky(&[1.0, 2.0]).is_some());
    }

    #[test]
    fn remove_undoes_accumulate() {
        let mut m = SymmetricMatrix::<2>::zeros();
        m.accumulate_outer_product(&[1.0, 2.0]);
        m.accumulate_weighted(&[3.0, 1.0], 2.0);
        m.remove_outer_product(&[1.0, 2.0]);
        assert_eq!(m.a[0][0], 18.0);
        assert_eq!(m.a[0][1], 6.0);
        assert_eq!(m.a[1][1], 2.0);
    }
}
