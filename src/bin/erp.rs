use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use eegw::config::{category_rules, parse_label_list, parse_timezone};
use eegw::io::{SafetensorsReader, SafetensorsWriter};
use eegw::{Baseline, EpochWindow, ErpConfig, ErpError, FilterBand, FilterMethod, FilterSpec, Stage, StageError};

#[derive(Debug, Parser)]
#[command(name = "erp", about = "Average event-related potentials from a continuous EEG recording")]
struct Args {
    /// Input recording (.safetensors)
    input: PathBuf,

    /// Output file for the averages; must not exist
    output: PathBuf,

    /// Event codes to segment around (comma-separated)
    #[arg(long)]
    labels: String,

    /// Category name per event code (comma-separated, same count as --labels)
    #[arg(long)]
    categories: Option<String>,

    /// Window start relative to the event (s)
    #[arg(long, default_value_t = -1.0, allow_negative_numbers = true)]
    tmin: f64,

    /// Window end relative to the event (s)
    #[arg(long, default_value_t = 1.0, allow_negative_numbers = true)]
    tmax: f64,

    /// Highpass cutoff (Hz); above --lowpass makes a band-stop
    #[arg(long)]
    highpass: Option<f64>,

    /// Lowpass cutoff (Hz)
    #[arg(long)]
    lowpass: Option<f64>,

    /// Line-noise frequency to notch out (Hz)
    #[arg(long)]
    notch: Option<f64>,

    /// Butterworth order
    #[arg(long, default_value_t = 4)]
    filter_order: usize,

    /// iir (Butterworth, forward-backward) or fir (windowed sinc)
    #[arg(long, default_value = "iir")]
    filter_method: FilterMethod,

    /// Drop a segment if max - min on any channel exceeds this (µV)
    #[arg(long)]
    artifact_detection: Option<f32>,

    /// Subtract the pre-event mean from every segment
    #[arg(long)]
    baseline: bool,

    /// Baseline start (s); defaults to --tmin
    #[arg(long, allow_negative_numbers = true)]
    baseline_start: Option<f64>,

    /// Baseline end (s); defaults to 0
    #[arg(long, allow_negative_numbers = true)]
    baseline_end: Option<f64>,

    /// Re-reference the averages to the mean of good channels
    #[arg(long)]
    average_ref: bool,

    /// IANA timezone for history timestamps
    #[arg(long, default_value = "UTC")]
    timezone: String,

    /// Log progress and every history entry
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn config(&self) -> eegw::error::Result<ErpConfig> {
        let labels = parse_label_list(&self.labels)?;
        let names = self.categories.as_deref().map(parse_label_list).transpose()?;

        let spec = |band| match self.filter_method {
            FilterMethod::Iir => FilterSpec::iir(band, self.filter_order),
            FilterMethod::Fir => FilterSpec::fir(band),
        };
        let mut filters = Vec::new();
        if let Some(band) = FilterBand::from_cutoffs(self.highpass, self.lowpass)? {
            filters.push(spec(band));
        }
        if let Some(freq) = self.notch {
            filters.push(spec(FilterBand::notch(freq)));
        }

        let baseline = (self.baseline || self.baseline_start.is_some() || self.baseline_end.is_some())
            .then_some(Baseline { start: self.baseline_start, end: self.baseline_end });

        Ok(ErpConfig {
            filters,
            window: EpochWindow { tmin: self.tmin, tmax: self.tmax },
            baseline,
            reject_threshold: self.artifact_detection,
            categories: category_rules(&labels, names.as_deref())?,
            average_reference: self.average_ref,
            timezone: parse_timezone(&self.timezone)?,
            verbose: self.verbose,
        })
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose { log::LevelFilter::Info } else { log::LevelFilter::Warn };
    env_logger::Builder::new()
        .filter_level(level)
        .format_timestamp(None)
        .parse_default_env()
        .init();

    let configure = |e: ErpError| StageError::new(Stage::Configure, args.input.display().to_string(), e);
    let cfg = args.config().map_err(configure)?;
    let mut reader = SafetensorsReader::new(&args.input);
    let mut writer = SafetensorsWriter::new(&args.output).map_err(configure)?;

    let report = eegw::run(&cfg, &mut reader, &mut writer)?;
    for c in &report.categories {
        println!(
            "{:<16} {:>4} averaged  {:>4} rejected  {:>4} out of range",
            c.label, c.retained, c.rejected, c.out_of_range
        );
    }
    println!("Written → {}", args.output.display());
    Ok(())
}
