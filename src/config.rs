//! Pipeline configuration.
//!
//! [`ErpConfig`] holds every tunable parameter of the ERP workflow.  It is a
//! plain value handed to [`crate::pipeline::run`]; nothing is read from
//! process-wide state.  Call [`ErpConfig::validate`] once before running
//! (the pipeline does this for you) and [`ErpConfig::check_sampling_rate`]
//! once the recording's sampling rate is known.
use std::fmt;
use std::str::FromStr;

use chrono_tz::Tz;

use crate::error::{ErpError, Result};
use crate::segment::seconds_to_samples;

/// Half width (Hz) of the band-stop built by [`FilterBand::notch`].
pub const NOTCH_HALF_WIDTH: f64 = 1.0;

/// Frequency response of one filter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FilterBand {
    Highpass(f64),
    Lowpass(f64),
    /// `(low, high)` with `low < high`.
    Bandpass(f64, f64),
    /// `(low, high)` with `low < high`.
    Bandstop(f64, f64),
}

impl FilterBand {
    /// Build a band from optional highpass / lowpass cutoffs.
    ///
    /// * both, `hp < lp` → band-pass `(hp, lp)`
    /// * both, `hp > lp` → band-stop `(lp, hp)`
    /// * one             → high- or low-pass
    /// * none            → `None` (no filtering)
    pub fn from_cutoffs(highpass: Option<f64>, lowpass: Option<f64>) -> Result<Option<Self>> {
        match (highpass, lowpass) {
            (Some(hp), Some(lp)) if hp < lp => Ok(Some(Self::Bandpass(hp, lp))),
            (Some(hp), Some(lp)) if hp > lp => Ok(Some(Self::Bandstop(lp, hp))),
            (Some(_), Some(_)) => Err(ErpError::config("highpass and lowpass cutoffs cannot be equal")),
            (Some(hp), None) => Ok(Some(Self::Highpass(hp))),
            (None, Some(lp)) => Ok(Some(Self::Lowpass(lp))),
            (None, None) => Ok(None),
        }
    }

    /// Narrow band-stop centred on `freq` (line-noise removal).
    pub fn notch(freq: f64) -> Self {
        Self::Bandstop(freq - NOTCH_HALF_WIDTH, freq + NOTCH_HALF_WIDTH)
    }

    pub fn cutoffs(&self) -> Vec<f64> {
        match *self {
            Self::Highpass(f) | Self::Lowpass(f) => vec![f],
            Self::Bandpass(lo, hi) | Self::Bandstop(lo, hi) => vec![lo, hi],
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Highpass(_) => "Highpass",
            Self::Lowpass(_) => "Lowpass",
            Self::Bandpass(..) => "Bandpass",
            Self::Bandstop(..) => "Bandstop",
        }
    }

    fn validate(&self) -> Result<()> {
        for f in self.cutoffs() {
            if !(f > 0.0 && f.is_finite()) {
                return Err(ErpError::config(format!("non-positive {} cutoff: {f} Hz", self.name())));
            }
        }
        if let Self::Bandpass(lo, hi) | Self::Bandstop(lo, hi) = *self {
            if lo >= hi {
                return Err(ErpError::config(format!(
                    "{} band edges out of order: {lo} Hz >= {hi} Hz",
                    self.name()
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Display for FilterBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Highpass(c) | Self::Lowpass(c) => write!(f, "{c} Hz {}", self.name()),
            Self::Bandpass(lo, hi) | Self::Bandstop(lo, hi) => {
                write!(f, "{lo}-{hi} Hz {}", self.name())
            }
        }
    }
}

/// Filter implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterMethod {
    /// Butterworth, applied forward and backward (`sosfiltfilt`).
    #[default]
    Iir,
    /// Zero-phase Hamming-windowed sinc, applied by FFT overlap-add.
    Fir,
}

impl FilterMethod {
    pub fn description(self) -> &'static str {
        match self {
            Self::Iir => "IIR Butterworth",
            Self::Fir => "FIR Hamming",
        }
    }
}

impl FromStr for FilterMethod {
    type Err = ErpError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "iir" => Ok(Self::Iir),
            "fir" => Ok(Self::Fir),
            other => Err(ErpError::config(format!("unknown filter method '{other}' (expected iir or fir)"))),
        }
    }
}

/// One filter applied to the continuous signal before segmentation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterSpec {
    pub band: FilterBand,
    /// Butterworth order.  Forward-backward application doubles the
    /// effective order (and band filters double it again).  Ignored by FIR.
    pub order: usize,
    pub method: FilterMethod,
}

impl FilterSpec {
    pub fn iir(band: FilterBand, order: usize) -> Self {
        Self { band, order, method: FilterMethod::Iir }
    }

    pub fn fir(band: FilterBand) -> Self {
        Self { band, order: 0, method: FilterMethod::Fir }
    }
}

/// Epoch window relative to the anchoring event, in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochWindow {
    /// Start of the window; negative means before the event.
    pub tmin: f64,
    /// End of the window (exclusive).
    pub tmax: f64,
}

impl EpochWindow {
    /// Window from the left/right paddings around the event (both ≥ 0).
    pub fn from_padding(left: f64, right: f64) -> Self {
        Self { tmin: -left, tmax: right }
    }

    /// `(start offset, length)` in samples at `sfreq`.
    pub fn samples(&self, sfreq: f64) -> (i64, usize) {
        let start = seconds_to_samples(self.tmin, sfreq);
        let stop = seconds_to_samples(self.tmax, sfreq);
        (start, (stop - start).max(0) as usize)
    }
}

impl Default for EpochWindow {
    fn default() -> Self {
        Self::from_padding(1.0, 1.0)
    }
}

/// Baseline interval relative to the event, in seconds.
///
/// `None` bounds default to the window start / the event itself.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Baseline {
    pub start: Option<f64>,
    pub end: Option<f64>,
}

/// Maps one event code to a category label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryRule {
    pub code: String,
    pub label: String,
}

impl CategoryRule {
    pub fn new(code: impl Into<String>, label: impl Into<String>) -> Self {
        Self { code: code.into(), label: label.into() }
    }
}

/// Configuration for one run of the ERP workflow.
///
/// ```
/// use eegw::{CategoryRule, EpochWindow, ErpConfig};
///
/// let cfg = ErpConfig {
///     window: EpochWindow { tmin: -0.1, tmax: 0.4 },
///     reject_threshold: Some(100.0),
///     categories: vec![CategoryRule::new("A", "target")],
///     ..ErpConfig::default()
/// };
/// cfg.validate().unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct ErpConfig {
    /// Filters applied in order to the continuous signal.
    ///
    /// Default: none.
    pub filters: Vec<FilterSpec>,

    /// Segment window around each event.
    ///
    /// Default: `[-1.0, 1.0)` s.
    pub window: EpochWindow,

    /// Per-epoch baseline correction.  Default: off.
    pub baseline: Option<Baseline>,

    /// Peak-to-peak rejection criterion in the recording's native units.
    ///
    /// An epoch is dropped if **any** channel exceeds it.  The absolute value
    /// is used.  Default: `None` (no artifact rejection).
    pub reject_threshold: Option<f32>,

    /// Event code → category label, in output order.  Several codes may
    /// share one label.
    pub categories: Vec<CategoryRule>,

    /// Re-reference the finished averages to the average of good channels.
    pub average_reference: bool,

    /// Zone for history timestamps.  Default: UTC.
    pub timezone: Tz,

    /// Log every history entry as it is produced.
    pub verbose: bool,
}

impl Default for ErpConfig {
    fn default() -> Self {
        Self {
            filters: vec![],
            window: EpochWindow::default(),
            baseline: None,
            reject_threshold: None,
            categories: vec![],
            average_reference: false,
            timezone: Tz::UTC,
            verbose: false,
        }
    }
}

impl ErpConfig {
    /// Check every invariant that does not depend on the recording.
    pub fn validate(&self) -> Result<()> {
        if self.categories.is_empty() {
            return Err(ErpError::config("empty category mapping"));
        }
        for (i, rule) in self.categories.iter().enumerate() {
            if rule.code.trim().is_empty() || rule.label.trim().is_empty() {
                return Err(ErpError::config("empty event code or category label"));
            }
            if self.categories[..i].iter().any(|r| r.code == rule.code) {
                return Err(ErpError::config(format!("event code '{}' mapped twice", rule.code)));
            }
        }

        let EpochWindow { tmin, tmax } = self.window;
        if !(tmin.is_finite() && tmax.is_finite()) || tmin >= tmax {
            return Err(ErpError::config(format!("invalid epoch window: [{tmin}, {tmax})")));
        }
        if tmin > 0.0 || tmax < 0.0 {
            return Err(ErpError::config(format!("epoch window [{tmin}, {tmax}) does not contain the event")));
        }

        if let Some(b) = self.baseline {
            let start = b.start.unwrap_or(tmin).max(tmin);
            let end = b.end.unwrap_or(0.0).min(tmax);
            if start > end {
                return Err(ErpError::config(format!(
                    "baseline interval [{start}, {end}] lies outside the epoch window"
                )));
            }
        }

        if let Some(t) = self.reject_threshold {
            if !t.is_finite() {
                return Err(ErpError::config(format!("invalid rejection threshold: {t}")));
            }
        }

        for f in &self.filters {
            f.band.validate()?;
            if f.method == FilterMethod::Iir && f.order < 1 {
                return Err(ErpError::config(format!("filter order < 1: {}", f.order)));
            }
        }
        Ok(())
    }

    /// Check the invariants that depend on the recording's sampling rate.
    pub fn check_sampling_rate(&self, sfreq: f64) -> Result<()> {
        let nyquist = sfreq / 2.0;
        for f in &self.filters {
            for c in f.band.cutoffs() {
                if c >= nyquist {
                    return Err(ErpError::config(format!(
                        "{} cutoff {c} Hz is not below Nyquist ({nyquist} Hz)",
                        f.band.name()
                    )));
                }
            }
        }
        let (_, len) = self.window.samples(sfreq);
        if len == 0 {
            return Err(ErpError::config(format!(
                "epoch window [{}, {}) is shorter than one sample at {sfreq} Hz",
                self.window.tmin, self.window.tmax
            )));
        }
        Ok(())
    }

    /// Category of an event code, if the code is mapped.
    pub fn category_of(&self, code: &str) -> Option<&str> {
        self.categories.iter().find(|r| r.code == code).map(|r| r.label.as_str())
    }

    /// Distinct category labels in mapping order.
    pub fn category_labels(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for r in &self.categories {
            if !out.contains(&r.label.as_str()) {
                out.push(&r.label);
            }
        }
        out
    }

    /// Event codes mapped to `label`.
    pub fn codes_for(&self, label: &str) -> Vec<&str> {
        self.categories.iter().filter(|r| r.label == label).map(|r| r.code.as_str()).collect()
    }
}

/// Pair event labels with category names.
///
/// Without `names` each label is its own category.
pub fn category_rules(labels: &[String], names: Option<&[String]>) -> Result<Vec<CategoryRule>> {
    let names = names.unwrap_or(labels);
    if labels.len() != names.len() {
        return Err(ErpError::config(format!(
            "number of event labels {labels:?} does not equal number of categories {names:?}"
        )));
    }
    Ok(labels.iter().zip(names).map(|(l, n)| CategoryRule::new(l.clone(), n.clone())).collect())
}

/// Split a comma-separated list, trimming entries and dropping empty ones.
pub fn parse_label_list(s: &str) -> Result<Vec<String>> {
    let labels: Vec<String> = s
        .split(',')
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect();
    if labels.is_empty() {
        return Err(ErpError::config("no labels specified"));
    }
    Ok(labels)
}

/// Parse an IANA timezone name.
pub fn parse_timezone(name: &str) -> Result<Tz> {
    name.parse::<Tz>()
        .map_err(|_| ErpError::config(format!("unknown timezone \"{name}\"")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> ErpConfig {
        ErpConfig { categories: vec![CategoryRule::new("A", "target")], ..ErpConfig::default() }
    }

    #[test]
    fn cutoffs_select_band_type() {
        assert_eq!(FilterBand::from_cutoffs(Some(1.0), Some(40.0)).unwrap(), Some(FilterBand::Bandpass(1.0, 40.0)));
        assert_eq!(FilterBand::from_cutoffs(Some(40.0), Some(1.0)).unwrap(), Some(FilterBand::Bandstop(1.0, 40.0)));
        assert_eq!(FilterBand::from_cutoffs(Some(1.0), None).unwrap(), Some(FilterBand::Highpass(1.0)));
        assert_eq!(FilterBand::from_cutoffs(None, Some(40.0)).unwrap(), Some(FilterBand::Lowpass(40.0)));
        assert_eq!(FilterBand::from_cutoffs(None, None).unwrap(), None);
        assert!(FilterBand::from_cutoffs(Some(1.0), Some(1.0)).is_err());
    }

    #[test]
    fn empty_mapping_rejected() {
        let cfg = ErpConfig::default();
        assert!(matches!(cfg.validate(), Err(ErpError::Configuration(_))));
    }

    #[test]
    fn duplicate_code_rejected() {
        let mut cfg = base();
        cfg.categories.push(CategoryRule::new("A", "other"));
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn shared_label_allowed() {
        let mut cfg = base();
        cfg.categories.push(CategoryRule::new("B", "target"));
        cfg.validate().unwrap();
        assert_eq!(cfg.category_labels(), ["target"]);
        assert_eq!(cfg.codes_for("target"), ["A", "B"]);
    }

    #[test]
    fn window_must_contain_event() {
        for (tmin, tmax) in [(-0.5, -0.1), (0.1, 0.4)] {
            let cfg = ErpConfig { window: EpochWindow { tmin, tmax }, ..base() };
            assert!(matches!(cfg.validate(), Err(ErpError::Configuration(_))), "[{tmin}, {tmax})");
        }
        for (tmin, tmax) in [(0.0, 0.4), (-0.5, 0.0)] {
            let cfg = ErpConfig { window: EpochWindow { tmin, tmax }, ..base() };
            cfg.validate().unwrap();
        }
    }

    #[test]
    fn inverted_window_rejected() {
        let cfg = ErpConfig { window: EpochWindow { tmin: 0.4, tmax: -0.1 }, ..base() };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn nyquist_enforced() {
        let cfg = ErpConfig { filters: vec![FilterSpec::iir(FilterBand::Lowpass(125.0), 4)], ..base() };
        cfg.validate().unwrap();
        assert!(matches!(cfg.check_sampling_rate(250.0), Err(ErpError::Configuration(_))));
        cfg.check_sampling_rate(500.0).unwrap();
    }

    #[test]
    fn zero_order_iir_rejected() {
        let cfg = ErpConfig { filters: vec![FilterSpec::iir(FilterBand::Highpass(0.1), 0)], ..base() };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn window_samples_at_250hz() {
        let w = EpochWindow { tmin: -0.1, tmax: 0.4 };
        assert_eq!(w.samples(250.0), (-25, 125));
    }

    #[test]
    fn label_lists() {
        assert_eq!(parse_label_list(" A, ,B ,").unwrap(), ["A", "B"]);
        assert!(parse_label_list(" , ").is_err());
        let rules = category_rules(&["A".into(), "B".into()], None).unwrap();
        assert_eq!(rules[1], CategoryRule::new("B", "B"));
        assert!(category_rules(&["A".into()], Some(&["x".into(), "y".into()])).is_err());
    }

    #[test]
    fn timezones() {
        assert_eq!(parse_timezone("America/Los_Angeles").unwrap(), Tz::America__Los_Angeles);
        assert!(parse_timezone("Mars/Olympus_Mons").is_err());
    }
}
