//! End-to-end ERP workflow.
//!
//! ```text
//! read → configure → filter → segment → reject → average → write
//! ```
//!
//! Each stage consumes the previous stage's output only.  A failure aborts
//! the run with a [`StageError`] naming the stage and the recording; the
//! writer is never called unless every earlier stage succeeded.
use crate::artifact::reject_epochs;
use crate::average::{average_epochs, AveragedRecording, Averages};
use crate::config::{ErpConfig, FilterMethod, FilterSpec};
use crate::error::{ErpError, Result, Stage, StageError};
use crate::filter::filter_recording;
use crate::history::{Clock, HistoryEntry, Stopwatch, SystemClock, TimeSpan};
use crate::io::{RecordingReader, RecordingWriter};
use crate::recording::Recording;
use crate::segment::{Segmentation, Segmenter};

/// Outcome of one category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategorySummary {
    pub label: String,
    pub retained: usize,
    pub rejected: usize,
    pub out_of_range: usize,
}

/// What a successful run produced.
#[derive(Debug, Clone)]
pub struct ErpReport {
    pub recording: String,
    /// Samples per average.
    pub epoch_len: usize,
    pub categories: Vec<CategorySummary>,
    /// Prior history followed by the entries of this run.
    pub history: Vec<HistoryEntry>,
}

impl ErpReport {
    pub fn category(&self, label: &str) -> Option<&CategorySummary> {
        self.categories.iter().find(|c| c.label == label)
    }
}

/// Run the workflow with wall-clock history timestamps.
pub fn run(
    cfg: &ErpConfig,
    reader: &mut dyn RecordingReader,
    writer: &mut dyn RecordingWriter,
) -> Result<ErpReport, StageError> {
    run_with_clock(cfg, reader, writer, &SystemClock)
}

pub fn run_with_clock(
    cfg: &ErpConfig,
    reader: &mut dyn RecordingReader,
    writer: &mut dyn RecordingWriter,
    clock: &dyn Clock,
) -> Result<ErpReport, StageError> {
    let source = reader.source();
    let at = |stage: Stage| {
        let source = source.clone();
        move |e: ErpError| StageError::new(stage, source, e)
    };

    cfg.validate().map_err(at(Stage::Configure))?;

    log::info!("reading {source}");
    let recording = reader.read().map_err(at(Stage::Read))?;
    log::info!(
        "{source}: {} channels, {} samples at {} Hz, {} events",
        recording.n_channels(),
        recording.n_samples(),
        recording.sfreq,
        recording.events.len()
    );
    cfg.check_sampling_rate(recording.sfreq).map_err(at(Stage::Configure))?;

    let processed = process(cfg, &recording, &source, clock)?;

    let output = AveragedRecording::from_averages(
        &processed.averages,
        recording.ch_names.clone(),
        recording.start_time,
        recording.device.clone(),
    )
    .map_err(at(Stage::Write))?;

    let mut history = recording.history.clone();
    history.extend(processed.history);
    writer.write(&output, &history).map_err(at(Stage::Write))?;

    Ok(ErpReport {
        recording: source,
        epoch_len: processed.segmentation.epoch_len,
        categories: processed
            .averages
            .categories()
            .iter()
            .map(|c| CategorySummary {
                label: c.label.clone(),
                retained: c.retained,
                rejected: c.rejected,
                out_of_range: c.out_of_range,
            })
            .collect(),
        history,
    })
}

/// Output of the in-memory stages.
pub struct Processed {
    pub segmentation: Segmentation,
    pub averages: Averages,
    /// Entries produced by this run only.
    pub history: Vec<HistoryEntry>,
}

/// Filter, segment, reject and average an already loaded recording.
pub fn process(
    cfg: &ErpConfig,
    recording: &Recording,
    source: &str,
    clock: &dyn Clock,
) -> Result<Processed, StageError> {
    let at = |stage: Stage| move |e: ErpError| StageError::new(stage, source, e);
    let sw = Stopwatch::new(clock, cfg.timezone);
    let mut history = Vec::new();
    let mut record = |entry: HistoryEntry| {
        if cfg.verbose {
            match serde_json::to_string(&entry) {
                Ok(json) => log::info!("{json}"),
                Err(e) => log::warn!("could not render history entry: {e}"),
            }
        }
        history.push(entry);
    };

    // Filter
    let mut filtered = recording.clone();
    for spec in &cfg.filters {
        let (res, span) = sw.time(|| filter_recording(&filtered, std::slice::from_ref(spec)));
        filtered = res.map_err(at(Stage::Filter))?;
        record(filter_entry(spec, source, span));
    }

    // Segment
    let present = recording.event_codes();
    for code in cfg.categories.iter().map(|r| r.code.as_str()) {
        if !present.contains(&code) {
            log::warn!("{source}: event code '{code}' not found in recording");
        }
    }
    let (res, span) = sw.time(|| Segmenter::from_config(cfg).segment(&filtered));
    let mut segmentation = res.map_err(at(Stage::Segment))?;
    drop(filtered);
    if segmentation.epochs.is_empty() {
        return Err(at(Stage::Segment)(ErpError::processing(
            "no segments could be created for any category",
        )));
    }
    record(segmentation_entry(cfg, &segmentation, source, span));
    log::info!(
        "{source}: {} segments of {} samples, {} out of range",
        segmentation.epochs.len(),
        segmentation.epoch_len,
        segmentation.dropped.len()
    );

    // Reject
    if let Some(threshold) = cfg.reject_threshold {
        let (dropped, span) = sw.time(|| reject_epochs(&mut segmentation.epochs, threshold));
        log::info!("{source}: {dropped} of {} segments rejected", segmentation.epochs.len());
        record(artifact_entry(cfg, &segmentation, threshold, source, span));
    }

    // Average
    let (res, span) = sw.time(|| -> Result<Averages> {
        let averages = average_epochs(&segmentation, cfg, recording.sfreq, &recording.bad_channels)?;
        if averages.non_empty().next().is_none() {
            return Err(ErpError::processing("every category is empty after artifact rejection"));
        }
        Ok(averages)
    });
    let mut averages = res.map_err(at(Stage::Average))?;
    record(averaging_entry(&averages, source, span));
    if cfg.average_reference {
        let (res, span) = sw.time(|| averages.set_average_reference());
        res.map_err(at(Stage::Average))?;
        record(
            HistoryEntry::new("ERP Workflow Average Reference", "Montage Operations Tool", span)
                .source_file(source)
                .settings(["Average Reference"]),
        );
    }

    Ok(Processed { segmentation, averages, history })
}

fn filter_entry(spec: &FilterSpec, source: &str, span: TimeSpan) -> HistoryEntry {
    let mut settings = vec![
        format!("Filter Setting: {}", spec.band),
        format!("Filter Type: {}", spec.method.description()),
    ];
    if spec.method == FilterMethod::Iir {
        settings.push(format!("Filter Order: {}", spec.order));
    }
    HistoryEntry::new(format!("ERP Workflow {} Filter", spec.band.name()), "Filtering", span)
        .kind("Transformation")
        .source_file(source)
        .settings(settings)
}

fn segmentation_entry(
    cfg: &ErpConfig,
    seg: &Segmentation,
    source: &str,
    span: TimeSpan,
) -> HistoryEntry {
    let ms = |s: f64| (s * 1000.0).round() as i64;
    let mut settings = Vec::new();
    let mut results = Vec::new();
    for label in cfg.category_labels() {
        settings.push(format!(
            "Category \"{label}\": codes {}; {} ms before, {} ms after",
            cfg.codes_for(label).join(", "),
            ms(-cfg.window.tmin),
            ms(cfg.window.tmax)
        ));
        results.push(format!(
            "{} segments created for category \"{label}\"",
            seg.epochs_in(label).count()
        ));
        let dropped = seg.dropped_in(label);
        if dropped > 0 {
            results.push(format!("{dropped} segments out of range for category \"{label}\""));
        }
    }
    if let Some(b) = cfg.baseline {
        settings.push(format!(
            "Baseline Correction: {} to {} s",
            b.start.unwrap_or(cfg.window.tmin),
            b.end.unwrap_or(0.0)
        ));
    }
    HistoryEntry::new("ERP Workflow Segmentation", "Segmentation", span)
        .source_file(source)
        .settings(settings)
        .results(results)
}

fn artifact_entry(
    cfg: &ErpConfig,
    seg: &Segmentation,
    threshold: f32,
    source: &str,
    span: TimeSpan,
) -> HistoryEntry {
    let results = cfg.category_labels().into_iter().map(|label| {
        let total = seg.epochs_in(label).count();
        let dropped = seg.epochs_in(label).filter(|e| e.rejected).count();
        format!("{dropped} out of {total} segments dropped for category \"{label}\"")
    });
    HistoryEntry::new("ERP Workflow Artifact Detection", "Artifact Detection", span)
        .source_file(source)
        .settings([
            format!("Bad Channel Threshold: Max - Min > {} μV", threshold.abs()),
            "Mark segment bad if it contains any bad channels".to_owned(),
        ])
        .results(results)
}

fn averaging_entry(averages: &Averages, source: &str, span: TimeSpan) -> HistoryEntry {
    HistoryEntry::new("ERP Workflow Averaging", "Averaging", span)
        .source_file(source)
        .settings(["Handle source files separately", "Subjects are not averaged together"])
        .results(
            averages
                .categories()
                .iter()
                .map(|c| format!("{} segments averaged for category \"{}\"", c.retained, c.label)),
        )
}
