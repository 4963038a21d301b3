//! Per-category averaging.
//!
//! [`Averages`] collects one [`CategoryAverage`] per category label, all
//! sharing a sampling rate, a block shape `[C, L]`, the position of the
//! event inside the block (`center`) and the recording's bad channels.
//! Empty categories are kept as explicit entries with no data.
//!
//! The finished averages are laid out back to back along time for the
//! output container; [`Averages::category_content`] describes where each
//! block sits (times in µs).
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use ndarray::{concatenate, Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::config::ErpConfig;
use crate::error::{ErpError, Result};
use crate::reference::average_reference_inplace;
use crate::segment::{seconds_to_samples, Segmentation};

/// Average of one category.
#[derive(Debug, Clone)]
pub struct CategoryAverage {
    pub label: String,
    pub codes: Vec<String>,
    /// `None` iff `retained == 0`.
    pub data: Option<Array2<f32>>,
    pub retained: usize,
    pub rejected: usize,
    pub out_of_range: usize,
}

impl CategoryAverage {
    pub fn is_empty(&self) -> bool {
        self.data.is_none()
    }
}

/// Mean of equally shaped segments, accumulated in f64.
pub fn mean_segments(segments: &[ArrayView2<'_, f32>]) -> Result<Option<Array2<f32>>> {
    let Some(first) = segments.first() else { return Ok(None) };
    let shape = first.dim();
    let mut acc = Array2::<f64>::zeros(shape);
    for seg in segments {
        if seg.dim() != shape {
            return Err(ErpError::processing(format!(
                "Segments have different shapes: {:?} vs {:?}",
                shape,
                seg.dim()
            )));
        }
        acc.zip_mut_with(seg, |a, &v| *a += v as f64);
    }
    let n = segments.len() as f64;
    Ok(Some(acc.mapv(|a| (a / n) as f32)))
}

/// Ordered set of category averages.
#[derive(Debug, Clone)]
pub struct Averages {
    sfreq: f64,
    /// Event position inside each block, in samples.
    center: usize,
    bads: Vec<usize>,
    categories: Vec<CategoryAverage>,
    average_reference: bool,
}

impl Averages {
    /// `center` is the event offset inside each block in seconds; `bads`
    /// are 1-based channel numbers.
    pub fn new(center: f64, sfreq: f64, bads: Vec<usize>) -> Self {
        let center = seconds_to_samples(center, sfreq).max(0) as usize;
        Self { sfreq, center, bads, categories: vec![], average_reference: false }
    }

    pub fn sfreq(&self) -> f64 {
        self.sfreq
    }

    pub fn center_samples(&self) -> usize {
        self.center
    }

    pub fn center_secs(&self) -> f64 {
        self.center as f64 / self.sfreq
    }

    pub fn bads(&self) -> &[usize] {
        &self.bads
    }

    pub fn categories(&self) -> &[CategoryAverage] {
        &self.categories
    }

    pub fn category(&self, label: &str) -> Option<&CategoryAverage> {
        self.categories.iter().find(|c| c.label == label)
    }

    /// Non-empty averages, in order.
    pub fn non_empty(&self) -> impl Iterator<Item = &CategoryAverage> + '_ {
        self.categories.iter().filter(|c| !c.is_empty())
    }

    /// `[C, L]` shared by every non-empty average.
    pub fn block_shape(&self) -> Option<(usize, usize)> {
        self.non_empty().find_map(|c| c.data.as_ref().map(|d| d.dim()))
    }

    pub fn is_average_referenced(&self) -> bool {
        self.average_reference
    }

    /// Average `segments` and append the result under `label`.
    pub fn add(
        &mut self,
        label: impl Into<String>,
        codes: Vec<String>,
        segments: &[ArrayView2<'_, f32>],
    ) -> Result<&CategoryAverage> {
        let data = mean_segments(segments)?;
        self.push(CategoryAverage {
            label: label.into(),
            codes,
            retained: segments.len(),
            data,
            rejected: 0,
            out_of_range: 0,
        })
    }

    /// Append a finished average (or an empty category when `data` is `None`).
    pub fn push(&mut self, mut category: CategoryAverage) -> Result<&CategoryAverage> {
        if self.categories.iter().any(|c| c.label == category.label) {
            return Err(ErpError::processing(format!("category \"{}\" added twice", category.label)));
        }
        if let Some(d) = category.data.as_mut() {
            self.check_block(&category.label, d)?;
            if self.average_reference {
                average_reference_inplace(d, &self.bads)?;
            }
        }
        let idx = self.categories.len();
        self.categories.push(category);
        Ok(&self.categories[idx])
    }

    fn check_block(&self, label: &str, data: &Array2<f32>) -> Result<()> {
        let (_, len) = data.dim();
        if self.center > len {
            return Err(ErpError::processing(format!(
                "Center ({} samples) cannot be larger than length ({len} samples)",
                self.center
            )));
        }
        if let Some(shape) = self.block_shape() {
            if shape != data.dim() {
                return Err(ErpError::processing(format!(
                    "average for \"{label}\" has shape {:?}, expected {shape:?}",
                    data.dim()
                )));
            }
        }
        Ok(())
    }

    /// Re-reference every current average, and every one added later, to
    /// the mean of the good channels.  Calling it twice is a no-op.
    pub fn set_average_reference(&mut self) -> Result<()> {
        if self.average_reference {
            return Ok(());
        }
        for cat in &mut self.categories {
            if let Some(d) = cat.data.as_mut() {
                average_reference_inplace(d, &self.bads)?;
            }
        }
        self.average_reference = true;
        Ok(())
    }

    /// Placement of each non-empty average in the concatenated output.
    pub fn category_content(&self) -> Result<Vec<CategoryEntry>> {
        let mut out = Vec::new();
        let mut begin = 0_i64;
        for cat in self.non_empty() {
            let Some(data) = cat.data.as_ref() else { continue };
            let duration = samples_to_micros(data.ncols(), self.sfreq);
            let evt = begin + samples_to_micros(self.center, self.sfreq);
            let mut keys = BTreeMap::new();
            keys.insert("#seg".to_owned(), KeyValue { kind: "long".into(), data: cat.retained as i64 });
            out.push(CategoryEntry {
                label: cat.label.clone(),
                status: "unedited".into(),
                name: "Average".into(),
                begin_time: begin,
                end_time: begin + duration,
                evt_begin: evt,
                evt_end: evt,
                channel_status: vec![ChannelStatus {
                    signal_bin: 1,
                    exclusion: "badChannels".into(),
                    channels: self.bads.clone(),
                }],
                keys,
            });
            begin += duration;
        }
        if out.is_empty() {
            return Err(ErpError::processing("No averages have been added"));
        }
        Ok(out)
    }

    /// Concatenate the non-empty averages along time, in category order.
    pub fn concatenated(&self) -> Result<Array2<f32>> {
        let views: Vec<ArrayView2<'_, f32>> =
            self.non_empty().filter_map(|c| c.data.as_ref().map(|d| d.view())).collect();
        if views.is_empty() {
            return Err(ErpError::processing("No averages have been added"));
        }
        concatenate(Axis(1), &views).map_err(|e| ErpError::processing(format!("concatenating averages: {e}")))
    }
}

fn samples_to_micros(samples: usize, sfreq: f64) -> i64 {
    (1e6 * samples as f64 / sfreq) as i64
}

/// Where one average sits in the concatenated output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryEntry {
    pub label: String,
    pub status: String,
    pub name: String,
    /// µs from the start of the output.
    pub begin_time: i64,
    pub end_time: i64,
    pub evt_begin: i64,
    pub evt_end: i64,
    pub channel_status: Vec<ChannelStatus>,
    pub keys: BTreeMap<String, KeyValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelStatus {
    pub signal_bin: u32,
    pub exclusion: String,
    pub channels: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyValue {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: i64,
}

/// Average the surviving epochs of `segmentation` per configured category.
///
/// Categories without any surviving epoch are kept as empty entries and
/// logged.  Counts of rejected and out-of-range epochs are filled in.
/// The average reference is left to the caller ([`Averages::set_average_reference`]).
pub fn average_epochs(segmentation: &Segmentation, cfg: &ErpConfig, sfreq: f64, bads: &[usize]) -> Result<Averages> {
    let center = segmentation.event_offset as f64 / sfreq;
    let mut averages = Averages::new(center, sfreq, bads.to_vec());

    for label in cfg.category_labels() {
        let codes: Vec<String> = cfg.codes_for(label).into_iter().map(String::from).collect();
        let (kept, rejected): (Vec<_>, Vec<_>) = segmentation.epochs_in(label).partition(|e| !e.rejected);
        let views: Vec<ArrayView2<'_, f32>> = kept.iter().map(|e| e.data.view()).collect();

        let data = mean_segments(&views)?;
        if data.is_none() {
            log::warn!("category \"{label}\" has no surviving segments, leaving it empty");
        }
        averages.push(CategoryAverage {
            label: label.to_owned(),
            codes,
            data,
            retained: kept.len(),
            rejected: rejected.len(),
            out_of_range: segmentation.dropped_in(label),
        })?;
    }
    Ok(averages)
}

/// Output payload: concatenated averages plus their layout.
#[derive(Debug, Clone)]
pub struct AveragedRecording {
    /// [C, Σ L]
    pub data: Array2<f32>,
    pub sfreq: f64,
    pub ch_names: Vec<String>,
    pub bad_channels: Vec<usize>,
    pub categories: Vec<CategoryEntry>,
    pub start_time: Option<DateTime<Utc>>,
    pub device: Option<String>,
}

impl AveragedRecording {
    pub fn from_averages(
        averages: &Averages,
        ch_names: Vec<String>,
        start_time: Option<DateTime<Utc>>,
        device: Option<String>,
    ) -> Result<Self> {
        Ok(Self {
            data: averages.concatenated()?,
            sfreq: averages.sfreq(),
            ch_names,
            bad_channels: averages.bads().to_vec(),
            categories: averages.category_content()?,
            start_time,
            device,
        })
    }

    /// Sample index of each category's event marker.
    pub fn event_samples(&self) -> Vec<usize> {
        self.categories
            .iter()
            .map(|c| (c.evt_begin as f64 * self.sfreq / 1e6).round() as usize)
            .collect()
    }
}
