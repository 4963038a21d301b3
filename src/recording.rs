//! Continuous recording and its event markers.
use chrono::{DateTime, Utc};
use ndarray::Array2;

use crate::error::{ErpError, Result};
use crate::history::HistoryEntry;

/// A marker in the recording, anchored to a sample index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub code: String,
    pub sample: usize,
}

impl Event {
    pub fn new(code: impl Into<String>, sample: usize) -> Self {
        Self { code: code.into(), sample }
    }
}

/// A continuous multi-channel recording.
#[derive(Debug, Clone)]
pub struct Recording {
    /// [C, T] in native units (µV for EGI-style containers).
    pub data: Array2<f32>,
    /// Sampling rate (Hz).
    pub sfreq: f64,
    /// Channel names (empty if the container did not store any).
    pub ch_names: Vec<String>,
    /// Bad channels as 1-based channel numbers.
    pub bad_channels: Vec<usize>,
    /// Events, sorted by sample.
    pub events: Vec<Event>,
    pub start_time: Option<DateTime<Utc>>,
    /// Recording device, e.g. `"HydroCel GSN 256 1.0"`.
    pub device: Option<String>,
    /// Processing history carried over from the input container.
    pub history: Vec<HistoryEntry>,
}

impl Recording {
    /// Build a recording, checking shape invariants and sorting `events`
    /// chronologically (stable, so simultaneous events keep their order).
    pub fn new(data: Array2<f32>, sfreq: f64, mut events: Vec<Event>) -> Result<Self> {
        if !(sfreq > 0.0 && sfreq.is_finite()) {
            return Err(ErpError::data(format!("invalid sampling rate: {sfreq}")));
        }
        let n_t = data.ncols();
        if let Some(ev) = events.iter().find(|e| e.sample >= n_t) {
            return Err(ErpError::data(format!(
                "event '{}' at sample {} is outside the recording ({n_t} samples)",
                ev.code, ev.sample
            )));
        }
        events.sort_by_key(|e| e.sample);
        Ok(Self {
            data,
            sfreq,
            ch_names: vec![],
            bad_channels: vec![],
            events,
            start_time: None,
            device: None,
            history: vec![],
        })
    }

    pub fn with_ch_names(mut self, ch_names: Vec<String>) -> Result<Self> {
        if !ch_names.is_empty() && ch_names.len() != self.n_channels() {
            return Err(ErpError::data(format!(
                "{} channel names for {} channels",
                ch_names.len(),
                self.n_channels()
            )));
        }
        self.ch_names = ch_names;
        Ok(self)
    }

    #[inline]
    pub fn n_channels(&self) -> usize {
        self.data.nrows()
    }

    #[inline]
    pub fn n_samples(&self) -> usize {
        self.data.ncols()
    }

    #[inline]
    pub fn nyquist(&self) -> f64 {
        self.sfreq / 2.0
    }

    pub fn duration_secs(&self) -> f64 {
        self.n_samples() as f64 / self.sfreq
    }

    /// Distinct event codes in order of first appearance.
    pub fn event_codes(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for ev in &self.events {
            if !out.contains(&ev.code.as_str()) {
                out.push(&ev.code);
            }
        }
        out
    }
}
