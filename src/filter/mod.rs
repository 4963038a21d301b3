//! Filter design and application.
//!
//! - [`design`]: Butterworth SOS design (matching `scipy.signal.butter`) and
//!   Hamming-windowed sinc FIR design (MNE-style auto length).
//! - [`apply`]: forward-backward SOS filtering (`sosfiltfilt`) and
//!   overlap-add zero-phase FIR convolution.

pub mod apply;
pub mod design;

pub use apply::{
    apply_filter, apply_filter_inplace, apply_fir_zero_phase, apply_sos_zero_phase, filter_1d,
    sosfilt, sosfilt_zi, sosfiltfilt,
};
pub use design::{
    auto_filter_length, auto_trans_bandwidth, auto_upper_trans_bandwidth, butter, design_fir,
    firwin, hamming, zpk2sos, Sos,
};

use crate::config::FilterSpec;
use crate::error::Result;
use crate::recording::Recording;

/// Run every filter in `specs`, in order, over a copy of `recording`.
///
/// The input recording is left untouched; shape, events and metadata carry
/// over unchanged.
pub fn filter_recording(recording: &Recording, specs: &[FilterSpec]) -> Result<Recording> {
    let mut out = recording.clone();
    for spec in specs {
        log::debug!("applying {} ({})", spec.band, spec.method.description());
        apply_filter_inplace(&mut out.data, spec, recording.sfreq)?;
    }
    Ok(out)
}
