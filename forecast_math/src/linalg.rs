//! Dense least squares for small regression problems
//!
//! The ARIMA estimator only ever regresses on a handful of columns
//! (constant, lags, lagged innovations, exogenous regressors), so the normal
//! equations are formed explicitly and solved with a Cholesky factorization.

use crate::{MathError, Result};

/// Relative ridge added to the diagonal of the normal equations.
///
/// Keeps collinear designs (e.g. a constant next to a constant lag column)
/// solvable without visibly biasing well-conditioned fits.
pub const DEFAULT_RIDGE: f64 = 1e-10;

/// Solve `min ||X b - y||^2 + ridge * scale * ||b||^2` for `b`
///
/// `rows` holds the design matrix row by row. Every row must have the same
/// number of columns and `rows.len()` must equal `y.len()`.
pub fn least_squares(rows: &[Vec<f64>], y: &[f64], ridge: f64) -> Result<Vec<f64>> {
    if rows.is_empty() {
        return Err(MathError::InsufficientData(
            "Least squares needs at least one observation".to_string(),
        ));
    }
    if rows.len() != y.len() {
        return Err(MathError::InvalidInput(format!(
            "Design matrix has {} rows but target has {} values",
            rows.len(),
            y.len()
        )));
    }

    let k = rows[0].len();
    if k == 0 {
        return Ok(Vec::new());
    }
    if rows.iter().any(|r| r.len() != k) {
        return Err(MathError::InvalidInput(
            "Design matrix rows have inconsistent widths".to_string(),
        ));
    }

    let mut xtx = vec![vec![0.0; k]; k];
    let mut xty = vec![0.0; k];
    for (row, &target) in rows.iter().zip(y) {
        for i in 0..k {
            xty[i] += row[i] * target;
            for j in 0..=i {
                xtx[i][j] += row[i] * row[j];
            }
        }
    }
    for i in 0..k {
        for j in 0..i {
            xtx[j][i] = xtx[i][j];
        }
    }

    let diag_scale = (0..k).map(|i| xtx[i][i]).sum::<f64>() / k as f64;
    let penalty = ridge * diag_scale.max(1.0);
    for (i, row) in xtx.iter_mut().enumerate() {
        row[i] += penalty;
    }

    if xtx.iter().flatten().chain(&xty).any(|v| !v.is_finite()) {
        return Err(MathError::CalculationError(
            "Normal equations contain non-finite values".to_string(),
        ));
    }

    let lower = cholesky(&xtx)?;
    Ok(cholesky_solve(&lower, &xty))
}

/// Cholesky factor `L` of a symmetric positive definite matrix (`A = L L^T`)
pub fn cholesky(a: &[Vec<f64>]) -> Result<Vec<Vec<f64>>> {
    let n = a.len();
    let mut l = vec![vec![0.0; n]; n];

    for i in 0..n {
        for j in 0..=i {
            let mut sum = a[i][j];
            for k in 0..j {
                sum -= l[i][k] * l[j][k];
            }

            if i == j {
                if sum <= 0.0 || !sum.is_finite() {
                    return Err(MathError::CalculationError(
                        "Matrix is not positive definite".to_string(),
                    ));
                }
                l[i][i] = sum.sqrt();
            } else {
                l[i][j] = sum / l[j][j];
            }
        }
    }

    Ok(l)
}

/// Solve `L L^T x = b` given the Cholesky factor `L`
pub fn cholesky_solve(lower: &[Vec<f64>], b: &[f64]) -> Vec<f64> {
    let n = b.len();

    // Forward substitution: L z = b
    let mut z = vec![0.0; n];
    for i in 0..n {
        let mut sum = b[i];
        for k in 0..i {
            sum -= lower[i][k] * z[k];
        }
        z[i] = sum / lower[i][i];
    }

    // Back substitution: L^T x = z
    let mut x = vec![0.0; n];
    for i in (0..n).rev() {
        let mut sum = z[i];
        for k in (i + 1)..n {
            sum -= lower[k][i] * x[k];
        }
        x[i] = sum / lower[i][i];
    }

    x
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_exact_line_fit() {
        // y = 2 + 3x
        let rows: Vec<Vec<f64>> = (0..10).map(|i| vec![1.0, i as f64]).collect();
        let y: Vec<f64> = (0..10).map(|i| 2.0 + 3.0 * i as f64).collect();

        let beta = least_squares(&rows, &y, DEFAULT_RIDGE).unwrap();
        assert_relative_eq!(beta[0], 2.0, epsilon = 1e-6);
        assert_relative_eq!(beta[1], 3.0, epsilon = 1e-6);
    }

    #[test]
    fn test_collinear_columns_still_solve() {
        let rows: Vec<Vec<f64>> = (0..20).map(|_| vec![1.0, 1.0]).collect();
        let y = vec![4.0; 20];

        let beta = least_squares(&rows, &y, DEFAULT_RIDGE).unwrap();
        assert_relative_eq!(beta[0] + beta[1], 4.0, epsilon = 1e-6);
    }

    #[test]
    fn test_shape_mismatch() {
        let rows = vec![vec![1.0], vec![1.0]];
        assert!(least_squares(&rows, &[1.0], DEFAULT_RIDGE).is_err());
        assert!(least_squares(&[], &[], DEFAULT_RIDGE).is_err());
    }

    #[test]
    fn test_cholesky_rejects_indefinite() {
        let a = vec![vec![1.0, 2.0], vec![2.0, 1.0]];
        assert!(cholesky(&a).is_err());
    }
}
