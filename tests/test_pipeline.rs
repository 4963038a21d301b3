mod common;
use common::{evenly_spaced, fixed_clock, sine_recording, write_recording, MemoryReader, MemoryWriter, TickingClock};
use eegw::io::{SafetensorsReader, SafetensorsWriter};
use eegw::{
    read_recording, run, run_with_clock, CategoryRule, EpochWindow, ErpConfig, ErpError, Event, FilterBand,
    FilterSpec, Stage,
};

fn target_config() -> ErpConfig {
    ErpConfig {
        window: EpochWindow { tmin: -0.1, tmax: 0.4 },
        reject_threshold: Some(100.0),
        categories: vec![CategoryRule::new("A", "target")],
        ..ErpConfig::default()
    }
}

/// 10 evenly spaced "A" events, 8 channels at 250 Hz.
fn ten_events() -> eegw::Recording {
    sine_recording(8, 5000, 250.0, evenly_spaced("A", 10, 250, 400))
}

#[test]
fn end_to_end_single_category() {
    let mut reader = MemoryReader::new("synthetic", ten_events());
    let mut writer = MemoryWriter::default();
    let report = run_with_clock(&target_config(), &mut reader, &mut writer, &fixed_clock()).unwrap();

    assert_eq!(report.categories.len(), 1);
    let target = report.category("target").unwrap();
    assert_eq!((target.retained, target.rejected, target.out_of_range), (10, 0, 0));
    assert_eq!(report.epoch_len, 125);

    let (out, history) = writer.written.unwrap();
    assert_eq!(out.data.dim(), (8, 125));
    assert_eq!(out.categories.len(), 1);
    assert_eq!(out.categories[0].keys["#seg"].data, 10);
    assert_eq!(out.event_samples(), vec![25]);

    let names: Vec<_> = history.iter().map(|h| h.name.as_str()).collect();
    assert_eq!(
        names,
        ["ERP Workflow Segmentation", "ERP Workflow Artifact Detection", "ERP Workflow Averaging"]
    );
    assert_eq!(history[2].results, ["10 segments averaged for category \"target\""]);
    assert_eq!(history[0].begin_time.to_rfc3339(), "2024-01-15T12:00:00+00:00");
}

#[test]
fn filters_and_reference_recorded_in_history() {
    let cfg = ErpConfig {
        filters: vec![
            FilterSpec::iir(FilterBand::Highpass(0.1), 4),
            FilterSpec::iir(FilterBand::Lowpass(30.0), 4),
        ],
        average_reference: true,
        timezone: chrono_tz::America::New_York,
        ..target_config()
    };
    let mut reader = MemoryReader::new("synthetic", ten_events());
    let mut writer = MemoryWriter::default();
    let report = run_with_clock(&cfg, &mut reader, &mut writer, &fixed_clock()).unwrap();

    let names: Vec<_> = report.history.iter().map(|h| h.name.as_str()).collect();
    assert_eq!(
        names,
        [
            "ERP Workflow Highpass Filter",
            "ERP Workflow Lowpass Filter",
            "ERP Workflow Segmentation",
            "ERP Workflow Artifact Detection",
            "ERP Workflow Averaging",
            "ERP Workflow Average Reference",
        ]
    );
    let hp = &report.history[0];
    assert_eq!(hp.kind.as_deref(), Some("Transformation"));
    assert_eq!(hp.method, "Filtering");
    assert_eq!(
        hp.settings,
        ["Filter Setting: 0.1 Hz Highpass", "Filter Type: IIR Butterworth", "Filter Order: 4"]
    );
    assert_eq!(hp.begin_time.to_rfc3339(), "2024-01-15T07:00:00-05:00");
    assert_eq!(report.history[5].method, "Montage Operations Tool");

    // Average-referenced output: channels sum to zero at every sample.
    let (out, _) = writer.written.unwrap();
    for col in out.data.columns() {
        approx::assert_abs_diff_eq!(col.sum(), 0.0, epsilon = 1e-3);
    }
}

#[test]
fn average_reference_is_timed_on_its_own() {
    let cfg = ErpConfig { average_reference: true, ..target_config() };
    let mut reader = MemoryReader::new("synthetic", ten_events());
    let mut writer = MemoryWriter::default();
    let report = run_with_clock(&cfg, &mut reader, &mut writer, &TickingClock::new()).unwrap();

    let averaging = &report.history[2];
    let reference = &report.history[3];
    assert_eq!(averaging.name, "ERP Workflow Averaging");
    assert_eq!(reference.name, "ERP Workflow Average Reference");
    assert!(reference.begin_time >= averaging.end_time);
    assert!(reference.end_time > reference.begin_time);
}

#[test]
fn prior_history_is_carried_over() {
    let mut rec = ten_events();
    let mut reader = MemoryReader::new("first", rec.clone());
    let mut writer = MemoryWriter::default();
    let first = run_with_clock(&target_config(), &mut reader, &mut writer, &fixed_clock()).unwrap();

    rec.history = first.history.clone();
    let mut reader = MemoryReader::new("second", rec);
    let second = run_with_clock(&target_config(), &mut reader, &mut writer, &fixed_clock()).unwrap();
    assert_eq!(second.history.len(), 2 * first.history.len());
    assert_eq!(&second.history[..first.history.len()], &first.history[..]);
}

#[test]
fn artifacts_are_rejected() {
    let mut rec = ten_events();
    // Large spike inside the third epoch (event at 1050).
    rec.data[[5, 1100]] = 400.0;
    let mut reader = MemoryReader::new("synthetic", rec);
    let mut writer = MemoryWriter::default();
    let report = run_with_clock(&target_config(), &mut reader, &mut writer, &fixed_clock()).unwrap();
    let t = report.category("target").unwrap();
    assert_eq!((t.retained, t.rejected), (9, 1));
    assert_eq!(
        report.history[1].results,
        ["1 out of 10 segments dropped for category \"target\""]
    );
}

#[test]
fn missing_category_is_kept_empty() {
    let cfg = ErpConfig {
        categories: vec![CategoryRule::new("A", "target"), CategoryRule::new("B", "standard")],
        ..target_config()
    };
    let mut reader = MemoryReader::new("synthetic", ten_events());
    let mut writer = MemoryWriter::default();
    let report = run_with_clock(&cfg, &mut reader, &mut writer, &fixed_clock()).unwrap();
    assert_eq!(report.category("standard").unwrap().retained, 0);
    let (out, _) = writer.written.unwrap();
    assert_eq!(out.categories.len(), 1);
    assert_eq!(out.data.dim(), (8, 125));
}

// ── Failures ─────────────────────────────────────────────────────────────────

#[test]
fn cutoff_above_nyquist_fails_before_filtering() {
    let cfg = ErpConfig { filters: vec![FilterSpec::iir(FilterBand::Lowpass(200.0), 4)], ..target_config() };
    let mut reader = MemoryReader::new("sub-01", ten_events());
    let mut writer = MemoryWriter::default();
    let err = run(&cfg, &mut reader, &mut writer).unwrap_err();
    assert_eq!(err.stage, Stage::Configure);
    assert!(matches!(err.source, ErpError::Configuration(_)));
    assert!(err.to_string().starts_with("[configure] sub-01:"), "{err}");
    assert!(writer.written.is_none());
}

#[test]
fn window_without_event_fails_before_reading() {
    for (tmin, tmax) in [(-0.5, -0.1), (0.1, 0.4)] {
        let cfg = ErpConfig { window: EpochWindow { tmin, tmax }, ..target_config() };
        let mut reader = MemoryReader::new("sub-01", ten_events());
        let mut writer = MemoryWriter::default();
        let err = run(&cfg, &mut reader, &mut writer).unwrap_err();
        assert_eq!(err.stage, Stage::Configure);
        assert!(matches!(err.source, ErpError::Configuration(_)));
        assert!(writer.written.is_none());
    }
}

#[test]
fn empty_mapping_is_configuration_error() {
    let cfg = ErpConfig { categories: vec![], ..target_config() };
    let mut reader = MemoryReader::new("sub-01", ten_events());
    let mut writer = MemoryWriter::default();
    let err = run(&cfg, &mut reader, &mut writer).unwrap_err();
    assert_eq!(err.stage, Stage::Configure);
    assert!(writer.written.is_none());
}

#[test]
fn no_segments_is_processing_error() {
    // Only event sits too close to the end.
    let rec = sine_recording(4, 1000, 250.0, vec![Event::new("A", 990)]);
    let mut reader = MemoryReader::new("sub-01", rec);
    let mut writer = MemoryWriter::default();
    let err = run(&target_config(), &mut reader, &mut writer).unwrap_err();
    assert_eq!(err.stage, Stage::Segment);
    assert!(matches!(err.source, ErpError::Processing(_)));
    assert!(writer.written.is_none());
}

#[test]
fn everything_rejected_is_processing_error() {
    let cfg = ErpConfig { reject_threshold: Some(1.0), ..target_config() };
    let mut reader = MemoryReader::new("sub-01", ten_events());
    let mut writer = MemoryWriter::default();
    let err = run(&cfg, &mut reader, &mut writer).unwrap_err();
    assert_eq!(err.stage, Stage::Average);
    assert!(writer.written.is_none());
}

#[test]
fn recording_too_short_to_filter() {
    // 20 samples; an order-4 band-pass needs more than 27 for edge padding.
    let rec = sine_recording(2, 20, 250.0, vec![Event::new("A", 15)]);
    let cfg = ErpConfig {
        window: EpochWindow { tmin: -0.04, tmax: 0.02 },
        filters: vec![FilterSpec::iir(FilterBand::Bandpass(1.0, 40.0), 4)],
        ..target_config()
    };
    let mut reader = MemoryReader::new("short", rec);
    let mut writer = MemoryWriter::default();
    let err = run(&cfg, &mut reader, &mut writer).unwrap_err();
    assert_eq!(err.stage, Stage::Filter);
    assert!(matches!(err.source, ErpError::Processing(_)));
}

// ── On disk ──────────────────────────────────────────────────────────────────

#[test]
fn safetensors_round_trip_through_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("sub-01.safetensors");
    let output = dir.path().join("sub-01_erp.safetensors");
    let mut rec = ten_events().with_ch_names((1..=8).map(|i| format!("E{i}")).collect()).unwrap();
    rec.device = Some("HydroCel GSN 256 1.0".into());
    write_recording(&rec, &input);

    let mut reader = SafetensorsReader::new(&input);
    let mut writer = SafetensorsWriter::new(&output).unwrap();
    run(&target_config(), &mut reader, &mut writer).unwrap();

    let averaged = read_recording(&output).unwrap();
    assert_eq!(averaged.data.dim(), (8, 125));
    assert_eq!(averaged.sfreq, 250.0);
    assert_eq!(averaged.ch_names[7], "E8");
    assert_eq!(averaged.events, vec![Event::new("target", 25)]);
    assert_eq!(averaged.device.as_deref(), Some("HydroCel GSN 256 1.0"));
    assert_eq!(averaged.history.len(), 3);
}

#[test]
fn failed_run_leaves_no_output() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.safetensors");
    let output = dir.path().join("out.safetensors");
    write_recording(&ten_events(), &input);

    let cfg = ErpConfig { reject_threshold: Some(1.0), ..target_config() };
    let mut reader = SafetensorsReader::new(&input);
    let mut writer = SafetensorsWriter::new(&output).unwrap();
    assert!(run(&cfg, &mut reader, &mut writer).is_err());
    assert!(!output.exists());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
}

#[test]
fn existing_output_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("out.safetensors");
    std::fs::write(&output, b"keep me").unwrap();
    let err = SafetensorsWriter::new(&output).unwrap_err();
    assert!(matches!(err, ErpError::Configuration(_)));
    assert_eq!(std::fs::read(&output).unwrap(), b"keep me");
}

#[test]
fn unreadable_input_is_read_stage_error() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("garbage.safetensors");
    std::fs::write(&input, b"not a container").unwrap();
    let mut reader = SafetensorsReader::new(&input);
    let mut writer = SafetensorsWriter::new(dir.path().join("out.safetensors")).unwrap();
    let err = run(&target_config(), &mut reader, &mut writer).unwrap_err();
    assert_eq!(err.stage, Stage::Read);
    assert!(matches!(err.source, ErpError::Data(_)));
}
