//! # eegw: ERP averaging for continuous EEG recordings
//!
//! `eegw` turns one continuous multi-channel recording into event-related
//! potentials: one averaged waveform per category of event marker.  Filter
//! designs match `scipy.signal` (Butterworth SOS, `sosfiltfilt`) and
//! MNE-Python (Hamming FIR) so results line up with the Python tooling.
//!
//! ## Pipeline overview
//!
//! ```text
//! recording.safetensors
//!   │
//!   ├─ io::read_recording        data [C, T], sfreq, events, bads, history
//!   ├─ filter                    Butterworth (forward-backward) or FIR
//!   ├─ segment                   [tmin, tmax) around every mapped event
//!   │    └─ baseline (optional)  per-epoch per-channel mean removed
//!   ├─ artifact                  max − min > threshold on any channel → drop
//!   ├─ average                   mean per category, empty categories kept
//!   │    └─ reference (optional) average of good channels removed
//!   └─ io::StWriter              averages back to back + category layout
//! ```
//!
//! ## Quick start
//!
//! ```no_run
//! use eegw::io::{SafetensorsReader, SafetensorsWriter};
//! use eegw::{CategoryRule, EpochWindow, ErpConfig, FilterBand, FilterSpec};
//!
//! let cfg = ErpConfig {
//!     filters: vec![FilterSpec::iir(FilterBand::Bandpass(0.1, 30.0), 4)],
//!     window: EpochWindow { tmin: -0.1, tmax: 0.4 },
//!     reject_threshold: Some(100.0),
//!     categories: vec![CategoryRule::new("A", "target"), CategoryRule::new("B", "standard")],
//!     ..ErpConfig::default()
//! };
//!
//! let mut reader = SafetensorsReader::new("sub-01.safetensors");
//! let mut writer = SafetensorsWriter::new("sub-01_erp.safetensors").unwrap();
//! let report = eegw::run(&cfg, &mut reader, &mut writer).unwrap();
//! for c in &report.categories {
//!     println!("{}: {} segments averaged", c.label, c.retained);
//! }
//! ```
//!
//! ## Running individual steps
//!
//! ```no_run
//! use eegw::filter::apply_filter;
//! use eegw::artifact::detect_bad_channels;
//! use eegw::reference::average_reference_inplace;
//! use eegw::{FilterBand, FilterSpec};
//! use ndarray::Array2;
//!
//! let data: Array2<f32> = Array2::zeros((32, 2500)); // [C, T] at 250 Hz
//!
//! let spec = FilterSpec::iir(FilterBand::Lowpass(30.0), 4);
//! let mut filtered = apply_filter(&data, &spec, 250.0).unwrap();
//!
//! let bad = detect_bad_channels(filtered.view(), 100.0);
//! average_reference_inplace(&mut filtered, &[]).unwrap();
//! ```

pub mod artifact;
pub mod average;
pub mod baseline;
pub mod config;
pub mod error;
pub mod filter;
pub mod history;
pub mod io;
pub mod pipeline;
pub mod recording;
pub mod reference;
pub mod segment;

// ── Crate-root re-exports ─────────────────────────────────────────────────

pub use config::{
    Baseline, CategoryRule, EpochWindow, ErpConfig, FilterBand, FilterMethod, FilterSpec,
};
pub use error::{ErpError, Stage, StageError};
pub use recording::{Event, Recording};

pub use artifact::{detect_bad_channels, reject_epochs};
pub use average::{average_epochs, AveragedRecording, Averages, CategoryAverage, CategoryEntry};
pub use filter::{apply_filter, butter, design_fir, filter_recording, sosfiltfilt};
pub use history::{Clock, FixedClock, HistoryEntry, SystemClock};
pub use io::{read_recording, RecordingReader, RecordingWriter, StWriter};
pub use pipeline::{process, run, run_with_clock, CategorySummary, ErpReport};
pub use reference::average_reference_inplace;
pub use segment::{seconds_to_samples, Epoch, Segmentation, Segmenter};
