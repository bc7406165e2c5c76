//! Ensemble moving-average smoothing of sentiment sequences.
//!
//! Presentation helper for charting how sentiment evolves through a long
//! text. Not used by any artifact protocol.

/// Centered moving average (a zero-order Savitzky-Golay filter).
///
/// Even windows are widened by one so the window stays centered. Positions
/// closer than half a window to either edge take the mean of the first or last
/// full window. Returns `None` when the window does not fit the data.
pub fn moving_average(data: &[f64], window: usize) -> Option<Vec<f64>> {
    if window == 0 || data.is_empty() {
        return None;
    }
    let window = if window % 2 == 0 { window + 1 } else { window };
    if window > data.len() {
        return None;
    }

    let half = window / 2;
    let width = window as f64;
    let mut prefix = Vec::with_capacity(data.len() + 1);
    prefix.push(0.0);
    for value in data {
        let last = prefix.last().copied().unwrap_or(0.0);
        prefix.push(last + value);
    }
    let mean_at = |center: usize| (prefix[center + half + 1] - prefix[center - half]) / width;

    let first = mean_at(half);
    let last = mean_at(data.len() - 1 - half);
    let smoothed = (0..data.len())
        .map(|i| {
            if i < half {
                first
            } else if i + half >= data.len() {
                last
            } else {
                mean_at(i)
            }
        })
        .collect();
    Some(smoothed)
}

/// Average of moving averages over a spread of window lengths.
///
/// Window lengths run from a tenth to a quarter of the sequence length. Only
/// windows that fit the data contribute. A sequence too short for any window
/// is returned unchanged.
pub fn ensemble_filter(data: &[f64], number_of_filters: usize) -> Vec<f64> {
    let start = data.len() / 10;
    let stop = data.len() / 4;
    if number_of_filters == 0 || stop <= start {
        return data.to_vec();
    }
    let step = ((stop - start) / number_of_filters).max(1);

    let mut total = vec![0.0; data.len()];
    let mut applied = 0usize;
    for window in (start..stop).step_by(step) {
        if let Some(smoothed) = moving_average(data, window) {
            for (acc, value) in total.iter_mut().zip(smoothed) {
                *acc += value;
            }
            applied += 1;
        }
    }

    if applied == 0 {
        return data.to_vec();
    }
    total.into_iter().map(|sum| sum / applied as f64).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_moving_average_interior_and_edges() {
        let data = [0.0, 3.0, 6.0, 3.0, 0.0];
        let smoothed = moving_average(&data, 3).unwrap();
        assert_eq!(smoothed, vec![3.0, 3.0, 4.0, 3.0, 3.0]);
    }

    #[test]
    fn test_even_window_is_widened() {
        let data = [1.0, 2.0, 3.0];
        assert_eq!(moving_average(&data, 2), moving_average(&data, 3));
    }

    #[test]
    fn test_window_larger_than_data_is_rejected() {
        assert_eq!(moving_average(&[1.0, 2.0], 5), None);
        assert_eq!(moving_average(&[1.0, 2.0], 0), None);
    }

    #[test]
    fn test_short_sequences_pass_through() {
        let data = vec![0.5, -0.5, 0.25];
        assert_eq!(ensemble_filter(&data, 100), data);
    }

    #[test]
    fn test_ensemble_flattens_alternating_signal() {
        let data: Vec<f64> = (0..40).map(|i| if i % 2 == 0 { 1.0 } else { -1.0 }).collect();
        let smoothed = ensemble_filter(&data, 10);
        let peak = smoothed.iter().fold(0.0f64, |acc, v| acc.max(v.abs()));
        assert!(peak < 0.5);
    }

    proptest! {
        #[test]
        fn prop_length_is_preserved(data in proptest::collection::vec(-1.0f64..=1.0, 0..200), filters in 1usize..50) {
            prop_assert_eq!(ensemble_filter(&data, filters).len(), data.len());
        }

        #[test]
        fn prop_output_stays_within_input_bounds(data in proptest::collection::vec(-1.0f64..=1.0, 1..200)) {
            let lo = data.iter().copied().fold(f64::INFINITY, f64::min);
            let hi = data.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            for value in ensemble_filter(&data, 20) {
                prop_assert!(value >= lo - 1e-9 && value <= hi + 1e-9);
            }
        }
    }
}
