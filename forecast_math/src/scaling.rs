//! Affine feature scaling

use crate::{MathError, Result};
use serde::{Deserialize, Serialize};

/// Column-wise min-max scaler mapping the fitted range onto `[0, 1]`
///
/// Parameters are fixed once fitted; values outside the fitted range map
/// outside `[0, 1]` rather than being clipped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinMaxScaler {
    min: Vec<f64>,
    range: Vec<f64>,
}

impl MinMaxScaler {
    /// Fit the scaler on row-major data
    pub fn fit(rows: &[Vec<f64>]) -> Result<Self> {
        let width = rows
            .first()
            .map(|r| r.len())
            .ok_or_else(|| MathError::InsufficientData("Cannot fit scaler on no rows".to_string()))?;

        let mut min = vec![f64::INFINITY; width];
        let mut max = vec![f64::NEG_INFINITY; width];
        for row in rows {
            if row.len() != width {
                return Err(MathError::InvalidInput(
                    "Rows have inconsistent widths".to_string(),
                ));
            }
            for (j, &v) in row.iter().enumerate() {
                if !v.is_finite() {
                    return Err(MathError::InvalidInput(format!(
                        "Non-finite value in column {}",
                        j
                    )));
                }
                min[j] = min[j].min(v);
                max[j] = max[j].max(v);
            }
        }

        // Constant columns scale to zero
        let range = min
            .iter()
            .zip(&max)
            .map(|(lo, hi)| if hi - lo > 0.0 { hi - lo } else { 1.0 })
            .collect();

        Ok(Self { min, range })
    }

    /// Number of columns the scaler was fitted on
    pub fn width(&self) -> usize {
        self.min.len()
    }

    /// Scale one row
    pub fn transform_row(&self, row: &[f64]) -> Result<Vec<f64>> {
        if row.len() != self.width() {
            return Err(MathError::InvalidInput(format!(
                "Expected {} columns, got {}",
                self.width(),
                row.len()
            )));
        }
        Ok(row
            .iter()
            .enumerate()
            .map(|(j, v)| (v - self.min[j]) / self.range[j])
            .collect())
    }

    /// Scale a single value of column `column`
    pub fn transform_value(&self, column: usize, value: f64) -> Result<f64> {
        self.check_column(column)?;
        Ok((value - self.min[column]) / self.range[column])
    }

    /// Map a scaled value of column `column` back to original units
    pub fn inverse_value(&self, column: usize, scaled: f64) -> Result<f64> {
        self.check_column(column)?;
        Ok(scaled * self.range[column] + self.min[column])
    }

    /// Width of the fitted range of `column` in original units
    pub fn range_of(&self, column: usize) -> Result<f64> {
        self.check_column(column)?;
        Ok(self.range[column])
    }

    fn check_column(&self, column: usize) -> Result<()> {
        if column >= self.width() {
            return Err(MathError::InvalidInput(format!(
                "Column {} out of range for scaler of width {}",
                column,
                self.width()
            )));
        }
        Ok(())
    }
}
