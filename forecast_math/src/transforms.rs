//! Differencing and integration of series

/// Apply `d` rounds of first differencing
///
/// The result is `d` elements shorter than the input (empty if the input is
/// too short).
pub fn difference(values: &[f64], d: usize) -> Vec<f64> {
    let mut current = values.to_vec();
    for _ in 0..d {
        if current.len() < 2 {
            return Vec::new();
        }
        current = current.windows(2).map(|w| w[1] - w[0]).collect();
    }
    current
}

/// Last value of every differencing level below `d`
///
/// Returns `[y_T, Δy_T, ..., Δ^{d-1} y_T]`, which is all that is needed to
/// integrate a one-step forecast of `Δ^d y` back to the original scale.
/// Returns `None` when the series is shorter than `d + 1`.
pub fn last_levels(values: &[f64], d: usize) -> Option<Vec<f64>> {
    if values.len() < d + 1 {
        return None;
    }

    let mut levels = Vec::with_capacity(d);
    let mut current = values.to_vec();
    for _ in 0..d {
        levels.push(*current.last()?);
        current = current.windows(2).map(|w| w[1] - w[0]).collect();
    }
    Some(levels)
}

/// Undo differencing for a single forecast step
///
/// `Δ^k y_{T+1} = Δ^{k+1} y_{T+1} + Δ^k y_T`, applied from the deepest level
/// up, reduces to adding every stored level to the differenced forecast.
pub fn integrate_one_step(differenced_forecast: f64, levels: &[f64]) -> f64 {
    levels
        .iter()
        .rev()
        .fold(differenced_forecast, |acc, level| acc + level)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_difference_orders() {
        let values = vec![1.0, 4.0, 9.0, 16.0, 25.0];
        assert_eq!(difference(&values, 0), values);
        assert_eq!(difference(&values, 1), vec![3.0, 5.0, 7.0, 9.0]);
        assert_eq!(difference(&values, 2), vec![2.0, 2.0, 2.0]);
        assert!(difference(&[1.0], 1).is_empty());
    }

    #[test]
    fn test_integrate_second_order() {
        let values = vec![1.0, 4.0, 9.0, 16.0, 25.0];
        let levels = last_levels(&values, 2).unwrap();
        assert_eq!(levels, vec![25.0, 9.0]);

        // Next second difference of squares is 2, next value is 36
        assert_eq!(integrate_one_step(2.0, &levels), 36.0);
    }

    #[test]
    fn test_last_levels_too_short() {
        assert!(last_levels(&[1.0, 2.0], 2).is_none());
        assert_eq!(last_levels(&[1.0], 0), Some(Vec::new()));
    }
}
