//! Epoch baseline correction.
//!
//! For every channel: `epoch[c, :] -= mean(epoch[c, b0..b1])`, where
//! `b0..b1` covers the baseline interval (matches
//! `epochs.apply_baseline((bmin, bmax))`, both ends inclusive).
use std::ops::Range;

use ndarray::{s, Array2};

use crate::config::{Baseline, EpochWindow};
use crate::error::{ErpError, Result};
use crate::segment::seconds_to_samples;

/// Sample range of `baseline` inside an epoch cut with `window` at `sfreq`.
///
/// Missing bounds default to the window start and the event (t = 0); both
/// are clamped to the epoch.
pub fn baseline_range(baseline: &Baseline, window: &EpochWindow, sfreq: f64) -> Result<Range<usize>> {
    let (start_offset, len) = window.samples(sfreq);
    let bmin = baseline.start.unwrap_or(window.tmin);
    let bmax = baseline.end.unwrap_or(0.0);

    let lo = (seconds_to_samples(bmin, sfreq) - start_offset).max(0);
    let hi = (seconds_to_samples(bmax, sfreq) - start_offset + 1).min(len as i64);
    if lo >= hi {
        return Err(ErpError::config(format!(
            "baseline interval [{bmin}, {bmax}] s contains no samples of the epoch window [{}, {}) s",
            window.tmin, window.tmax
        )));
    }
    Ok(lo as usize..hi as usize)
}

/// Subtract each channel's mean over `range` from the whole channel.
pub fn baseline_correct_inplace(epoch: &mut Array2<f32>, range: Range<usize>) {
    for mut row in epoch.rows_mut() {
        let base = row.slice(s![range.clone()]);
        let m = base.iter().map(|&v| v as f64).sum::<f64>() / base.len().max(1) as f64;
        let m = m as f32;
        row.mapv_inplace(|v| v - m);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_baseline_is_pre_event() {
        let w = EpochWindow { tmin: -0.1, tmax: 0.4 };
        // 25 pre-event samples plus the event sample itself.
        assert_eq!(baseline_range(&Baseline::default(), &w, 250.0).unwrap(), 0..26);
    }

    #[test]
    fn baseline_clamped_to_window() {
        let w = EpochWindow { tmin: -0.1, tmax: 0.4 };
        let b = Baseline { start: Some(-1.0), end: Some(-0.05) };
        assert_eq!(baseline_range(&b, &w, 100.0).unwrap(), 0..6);
    }

    #[test]
    fn baseline_outside_window_rejected() {
        let w = EpochWindow { tmin: 0.1, tmax: 0.4 };
        let err = baseline_range(&Baseline::default(), &w, 100.0).unwrap_err();
        assert!(matches!(err, ErpError::Configuration(_)));
    }

    #[test]
    fn removes_baseline_mean_only() {
        // Channel 0: 1 1 | 5 5 → baseline mean 1.
        let mut epoch = Array2::from_shape_vec((2, 4), vec![1.0, 1.0, 5.0, 5.0, 2.0, 4.0, 0.0, 0.0]).unwrap();
        baseline_correct_inplace(&mut epoch, 0..2);
        assert_eq!(epoch.row(0).to_vec(), vec![0.0, 0.0, 4.0, 4.0]);
        assert_eq!(epoch.row(1).to_vec(), vec![-1.0, 1.0, -3.0, -3.0]);
    }

    #[test]
    fn constant_signal_becomes_zero() {
        let mut epoch = Array2::from_elem((4, 125), 3.0_f32);
        baseline_correct_inplace(&mut epoch, 0..26);
        for &v in epoch.iter() {
            approx::assert_abs_diff_eq!(v, 0.0, epsilon = 1e-6_f32);
        }
    }
}
