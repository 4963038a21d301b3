//! Event-locked segmentation.
//!
//! Cuts the continuous [C, T] signal into fixed-length epochs around every
//! event whose code is mapped to a category.  For an event at sample `c`
//! and a window `[tmin, tmax)`:
//!
//! ```text
//! start = c + round(tmin · sfreq)
//! stop  = c + round(tmax · sfreq)        (exclusive)
//! ```
//!
//! Events whose window runs off either end of the recording are dropped
//! (never truncated) and reported.  Epochs keep the chronological order of
//! their events.
use ndarray::{s, Array2, ArrayView2};

use crate::baseline::{baseline_correct_inplace, baseline_range};
use crate::config::{Baseline, CategoryRule, EpochWindow, ErpConfig};
use crate::error::{ErpError, Result};
use crate::recording::Recording;

/// Convert seconds to samples, rounding half to even like `numpy.round`.
pub fn seconds_to_samples(seconds: f64, sfreq: f64) -> i64 {
    (seconds * sfreq).round_ties_even() as i64
}

/// One event-locked segment.
#[derive(Debug, Clone)]
pub struct Epoch {
    pub code: String,
    pub category: String,
    /// Sample of the anchoring event in the continuous recording.
    pub sample: usize,
    /// [C, L]
    pub data: Array2<f32>,
    pub rejected: bool,
}

/// An event whose window did not fit inside the recording.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedEvent {
    pub code: String,
    pub category: String,
    pub sample: usize,
}

/// Output of the segmenter.
#[derive(Debug, Clone, Default)]
pub struct Segmentation {
    pub epochs: Vec<Epoch>,
    pub dropped: Vec<DroppedEvent>,
    /// Samples per epoch.
    pub epoch_len: usize,
    /// Sample of the event inside each epoch.
    pub event_offset: usize,
}

impl Segmentation {
    pub fn epochs_in(&self, category: &str) -> impl Iterator<Item = &Epoch> + '_ {
        let category = category.to_owned();
        self.epochs.iter().filter(move |e| e.category == category)
    }

    pub fn dropped_in(&self, category: &str) -> usize {
        self.dropped.iter().filter(|d| d.category == category).count()
    }
}

/// Slice `[start, start + len)` out of `data`, or `None` if it does not fit.
pub fn extract_segment(data: &Array2<f32>, start: i64, len: usize) -> Option<ArrayView2<'_, f32>> {
    let stop = start.checked_add(len as i64)?;
    if start < 0 || stop > data.ncols() as i64 {
        return None;
    }
    Some(data.slice(s![.., start as usize..stop as usize]))
}

/// Cuts epochs around mapped events.
#[derive(Debug, Clone)]
pub struct Segmenter {
    pub window: EpochWindow,
    pub baseline: Option<Baseline>,
    pub rules: Vec<CategoryRule>,
}

impl Segmenter {
    pub fn new(window: EpochWindow, rules: Vec<CategoryRule>) -> Self {
        Self { window, baseline: None, rules }
    }

    pub fn with_baseline(mut self, baseline: Option<Baseline>) -> Self {
        self.baseline = baseline;
        self
    }

    pub fn from_config(cfg: &ErpConfig) -> Self {
        Self::new(cfg.window, cfg.categories.clone()).with_baseline(cfg.baseline)
    }

    fn category_of(&self, code: &str) -> Option<&str> {
        self.rules.iter().find(|r| r.code == code).map(|r| r.label.as_str())
    }

    pub fn segment(&self, recording: &Recording) -> Result<Segmentation> {
        let (start_offset, len) = self.window.samples(recording.sfreq);
        if len == 0 {
            return Err(ErpError::config(format!(
                "epoch window [{}, {}) s is shorter than one sample",
                self.window.tmin, self.window.tmax
            )));
        }
        let baseline = self
            .baseline
            .as_ref()
            .map(|b| baseline_range(b, &self.window, recording.sfreq))
            .transpose()?;

        let mut out = Segmentation {
            epoch_len: len,
            event_offset: (-start_offset).max(0) as usize,
            ..Segmentation::default()
        };
        for ev in &recording.events {
            let Some(category) = self.category_of(&ev.code) else { continue };
            let start = ev.sample as i64 + start_offset;
            match extract_segment(&recording.data, start, len) {
                Some(view) => {
                    let mut data = view.to_owned();
                    if let Some(range) = &baseline {
                        baseline_correct_inplace(&mut data, range.clone());
                    }
                    out.epochs.push(Epoch {
                        code: ev.code.clone(),
                        category: category.to_owned(),
                        sample: ev.sample,
                        data,
                        rejected: false,
                    });
                }
                None => {
                    log::warn!(
                        "event '{}' at sample {} ({:.3} s): segment extends beyond data range, dropped",
                        ev.code,
                        ev.sample,
                        ev.sample as f64 / recording.sfreq
                    );
                    out.dropped.push(DroppedEvent {
                        code: ev.code.clone(),
                        category: category.to_owned(),
                        sample: ev.sample,
                    });
                }
            }
        }
        Ok(out)
    }
}
