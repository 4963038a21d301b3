/// Shared helpers: synthetic recordings and in-memory reader/writer.
use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use eegw::{
    AveragedRecording, Clock, ErpError, Event, FixedClock, HistoryEntry, Recording, RecordingReader,
    RecordingWriter, StWriter,
};
use ndarray::Array2;
use std::cell::Cell;
use std::path::Path;

#[allow(unused)]
pub fn fixed_clock() -> FixedClock {
    FixedClock(Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap())
}

/// Advances one second on every reading, starting at the fixed clock's instant.
#[allow(unused)]
pub struct TickingClock(Cell<DateTime<Utc>>);

#[allow(unused)]
impl TickingClock {
    pub fn new() -> Self {
        Self(Cell::new(fixed_clock().0))
    }
}

impl Clock for TickingClock {
    fn now(&self) -> DateTime<Utc> {
        let t = self.0.get();
        self.0.set(t + TimeDelta::seconds(1));
        t
    }
}

#[allow(unused)]
/// `n_ch` channels of low-amplitude sinusoids with `events` at the given
/// samples.  Each channel has its own frequency and phase; peak-to-peak
/// stays below 10.
pub fn sine_recording(n_ch: usize, n_t: usize, sfreq: f64, events: Vec<Event>) -> Recording {
    let data = Array2::from_shape_fn((n_ch, n_t), |(c, t)| {
        let f = 3.0 + c as f64;
        let ph = c as f64 * 0.7;
        (4.0 * (2.0 * std::f64::consts::PI * f * t as f64 / sfreq + ph).sin()) as f32
    });
    Recording::new(data, sfreq, events).unwrap()
}

#[allow(unused)]
/// `n` events of `code`, evenly spaced by `spacing` samples starting at `first`.
pub fn evenly_spaced(code: &str, n: usize, first: usize, spacing: usize) -> Vec<Event> {
    (0..n).map(|i| Event::new(code, first + i * spacing)).collect()
}

#[allow(unused)]
/// Store `rec` as an input container at `path`.
pub fn write_recording(rec: &Recording, path: &Path) {
    let mut w = StWriter::new();
    w.add_f32_arr2("data", &rec.data);
    w.add_f64("sfreq", &[rec.sfreq], &[1]);
    if !rec.ch_names.is_empty() {
        w.add_lines("ch_names", &rec.ch_names);
    }
    if !rec.events.is_empty() {
        let samples: Vec<i64> = rec.events.iter().map(|e| e.sample as i64).collect();
        let codes: Vec<&str> = rec.events.iter().map(|e| e.code.as_str()).collect();
        w.add_i64("event_samples", &samples, &[samples.len()]);
        w.add_lines("event_codes", &codes);
    }
    if !rec.bad_channels.is_empty() {
        let bads: Vec<i32> = rec.bad_channels.iter().map(|&b| b as i32).collect();
        w.add_i32("bad_channels", &bads, &[bads.len()]);
    }
    if let Some(t) = rec.start_time {
        w.set_metadata("start_time", t.to_rfc3339());
    }
    if let Some(d) = &rec.device {
        w.set_metadata("device", d.clone());
    }
    if !rec.history.is_empty() {
        w.set_metadata("history", serde_json::to_string(&rec.history).unwrap());
    }
    w.write(path).unwrap();
}

#[allow(unused)]
/// Hands out a recording held in memory.
pub struct MemoryReader {
    pub name: String,
    pub recording: Recording,
}

#[allow(unused)]
impl MemoryReader {
    pub fn new(name: &str, recording: Recording) -> Self {
        Self { name: name.to_owned(), recording }
    }
}

impl RecordingReader for MemoryReader {
    fn source(&self) -> String {
        self.name.clone()
    }

    fn read(&mut self) -> Result<Recording, ErpError> {
        Ok(self.recording.clone())
    }
}

#[allow(unused)]
/// Keeps whatever the pipeline writes.
#[derive(Default)]
pub struct MemoryWriter {
    pub written: Option<(AveragedRecording, Vec<HistoryEntry>)>,
}

impl RecordingWriter for MemoryWriter {
    fn write(&mut self, output: &AveragedRecording, history: &[HistoryEntry]) -> Result<(), ErpError> {
        self.written = Some((output.clone(), history.to_vec()));
        Ok(())
    }
}

