//! Peak-to-peak artifact detection.
//!
//! A channel is bad within an epoch when `max - min > |criterion|` (strict).
//! An epoch is rejected when any channel is bad.
use ndarray::ArrayView2;

use crate::segment::Epoch;

/// Per-channel `max - min`.
pub fn peak_to_peak(data: ArrayView2<'_, f32>) -> Vec<f32> {
    data.rows()
        .into_iter()
        .map(|row| {
            let (lo, hi) = row
                .iter()
                .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
            if row.is_empty() { 0.0 } else { hi - lo }
        })
        .collect()
}

/// 0-based indices of channels whose peak-to-peak exceeds `|criterion|`.
pub fn detect_bad_channels(data: ArrayView2<'_, f32>, criterion: f32) -> Vec<usize> {
    let limit = criterion.abs();
    peak_to_peak(data)
        .into_iter()
        .enumerate()
        .filter(|&(_, p2p)| p2p > limit)
        .map(|(c, _)| c)
        .collect()
}

/// Mark epochs with any bad channel as rejected; returns how many were
/// newly flagged.  Already-rejected epochs stay rejected.
pub fn reject_epochs(epochs: &mut [Epoch], threshold: f32) -> usize {
    let mut flagged = 0;
    for ep in epochs.iter_mut().filter(|e| !e.rejected) {
        let bad = detect_bad_channels(ep.data.view(), threshold);
        if !bad.is_empty() {
            log::debug!(
                "epoch '{}' at sample {} rejected: {} bad channel(s)",
                ep.code,
                ep.sample,
                bad.len()
            );
            ep.rejected = true;
            flagged += 1;
        }
    }
    flagged
}
