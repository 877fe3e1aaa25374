//! Nearest-sample selection

use crate::types::Sample;

/// Pick the sample whose timestamp is closest to `target_secs`
///
/// When two samples are equally close the one appearing first in `samples`
/// wins. Returns `None` only for an empty slice.
pub fn select_nearest(samples: &[Sample], target_secs: i64) -> Option<&Sample> {
    let mut best: Option<(&Sample, u64)> = None;
    for sample in samples {
        let diff = sample.timestamp_secs.abs_diff(target_secs);
        match best {
            Some((_, best_diff)) if diff >= best_diff => {}
            _ => best = Some((sample, diff)),
        }
    }
    best.map(|(sample, _)| sample)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples() -> Vec<Sample> {
        vec![
            Sample::new(1000, 1.0, 10.0),
            Sample::new(1050, 1.1, 20.0),
            Sample::new(1200, 0.9, 5.0),
            Sample::new(1300, 1.2, 8.0),
            Sample::new(900, 0.8, 3.0),
        ]
    }

    #[test]
    fn picks_closest_timestamp() {
        let samples = samples();
        assert_eq!(select_nearest(&samples, 1040), Some(&Sample::new(1050, 1.1, 20.0)));
        assert_eq!(select_nearest(&samples, 0), Some(&Sample::new(900, 0.8, 3.0)));
        assert_eq!(select_nearest(&samples, 5000), Some(&Sample::new(1300, 1.2, 8.0)));
    }

    #[test]
    fn first_of_equidistant_samples_wins() {
        let samples = vec![Sample::new(110, 2.0, 1.0), Sample::new(90, 1.0, 1.0)];
        assert_eq!(select_nearest(&samples, 100).map(|s| s.open), Some(2.0));

        let reversed: Vec<Sample> = samples.iter().rev().copied().collect();
        assert_eq!(select_nearest(&reversed, 100).map(|s| s.open), Some(1.0));
    }

    #[test]
    fn selection_is_deterministic() {
        let samples = samples();
        let first = select_nearest(&samples, 1111).copied();
        for _ in 0..5 {
            assert_eq!(select_nearest(&samples, 1111).copied(), first);
        }
    }

    #[test]
    fn empty_input_has_no_selection() {
        assert_eq!(select_nearest(&[], 100), None);
    }
}
