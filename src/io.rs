//! Safetensors container I/O.
//!
//! Both the input recording and the averaged output are safetensors files:
//! an 8-byte little-endian header length, a JSON header, then raw
//! little-endian tensor bytes.  String tensors (`ch_names`, `event_codes`)
//! are stored as newline-joined UTF-8 in a `U8` tensor.  Scalar metadata
//! lives in the header's `__metadata__` map.
//!
//! | tensor          | dtype      | shape   | required |
//! |-----------------|------------|---------|----------|
//! | `data`          | F32        | [C, T]  | yes      |
//! | `sfreq`         | F32 / F64  | [1]     | yes      |
//! | `ch_names`      | U8         | [bytes] | no       |
//! | `event_samples` | I32 / I64  | [N]     | no       |
//! | `event_codes`   | U8         | [bytes] | with `event_samples` |
//! | `bad_channels`  | I32        | [K]     | no (1-based) |
//! | `nave`          | I32        | [K]     | output only |
//!
//! Metadata keys: `start_time` (RFC 3339), `device`, `history` (JSON) and,
//! on output, `categories` (JSON).
use std::path::{Path, PathBuf};

use anyhow::{bail, ensure, Context};
use chrono::{DateTime, Utc};
use ndarray::Array2;
use serde_json::Value;

use crate::average::AveragedRecording;
use crate::error::{ErpError, Result};
use crate::history::HistoryEntry;
use crate::recording::{Event, Recording};

const METADATA_KEY: &str = "__metadata__";

/// Anything that can produce a [`Recording`].
pub trait RecordingReader {
    /// Identifier used in error messages and history (usually the path).
    fn source(&self) -> String;

    fn read(&mut self) -> Result<Recording>;
}

/// Anything that can store the averaged output.
pub trait RecordingWriter {
    fn write(&mut self, output: &AveragedRecording, history: &[HistoryEntry]) -> Result<()>;
}

// ── Low-level parser ─────────────────────────────────────────────────────────

struct Tensor<'a> {
    dtype: String,
    shape: Vec<usize>,
    raw: &'a [u8],
}

impl Tensor<'_> {
    fn numel(&self) -> Option<usize> {
        self.shape.iter().try_fold(1usize, |a, &d| a.checked_mul(d))
    }

    fn check_len(&self, width: usize) -> anyhow::Result<()> {
        let Some(expected) = self.numel().and_then(|n| n.checked_mul(width)) else {
            bail!("{} tensor of shape {:?} is too large", self.dtype, self.shape);
        };
        ensure!(
            self.raw.len() == expected,
            "{} tensor of shape {:?} has {} bytes",
            self.dtype,
            self.shape,
            self.raw.len()
        );
        Ok(())
    }

    fn to_f32(&self) -> anyhow::Result<Vec<f32>> {
        ensure!(self.dtype == "F32", "expected F32, found {}", self.dtype);
        self.check_len(4)?;
        Ok(self.raw.chunks_exact(4).map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]])).collect())
    }

    fn to_f64(&self) -> anyhow::Result<Vec<f64>> {
        match self.dtype.as_str() {
            "F32" => Ok(self.to_f32()?.into_iter().map(f64::from).collect()),
            "F64" => {
                self.check_len(8)?;
                Ok(self
                    .raw
                    .chunks_exact(8)
                    .map(|b| f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
                    .collect())
            }
            other => bail!("expected F32 or F64, found {other}"),
        }
    }

    fn to_i64(&self) -> anyhow::Result<Vec<i64>> {
        match self.dtype.as_str() {
            "I32" => {
                self.check_len(4)?;
                Ok(self
                    .raw
                    .chunks_exact(4)
                    .map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as i64)
                    .collect())
            }
            "I64" => {
                self.check_len(8)?;
                Ok(self
                    .raw
                    .chunks_exact(8)
                    .map(|b| i64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
                    .collect())
            }
            other => bail!("expected I32 or I64, found {other}"),
        }
    }

    fn to_lines(&self) -> anyhow::Result<Vec<String>> {
        ensure!(self.dtype == "U8", "expected U8, found {}", self.dtype);
        let text = std::str::from_utf8(self.raw).context("string tensor is not UTF-8")?;
        Ok(text.split('\n').filter(|s| !s.is_empty()).map(String::from).collect())
    }
}

struct Container {
    header: serde_json::Map<String, Value>,
    bytes: Vec<u8>,
    data_start: usize,
}

impl Container {
    fn parse(bytes: Vec<u8>) -> anyhow::Result<Self> {
        ensure!(bytes.len() >= 8, "safetensors file too small");
        let mut len = [0u8; 8];
        len.copy_from_slice(&bytes[..8]);
        let n = usize::try_from(u64::from_le_bytes(len)).context("header length overflows")?;
        let data_start = n.checked_add(8).context("header length overflows")?;
        ensure!(data_start <= bytes.len(), "header length {n} exceeds file size");
        let header: serde_json::Map<String, Value> =
            serde_json::from_slice(&bytes[8..data_start]).context("failed to parse safetensors header")?;
        Ok(Self { header, bytes, data_start })
    }

    fn tensor(&self, name: &str) -> anyhow::Result<Option<Tensor<'_>>> {
        let Some(entry) = self.header.get(name) else { return Ok(None) };
        let dtype = entry["dtype"].as_str().with_context(|| format!("'{name}': missing dtype"))?;
        let shape = entry["shape"]
            .as_array()
            .with_context(|| format!("'{name}': missing shape"))?
            .iter()
            .map(|v| v.as_u64().map(|d| d as usize))
            .collect::<Option<Vec<_>>>()
            .with_context(|| format!("'{name}': malformed shape"))?;
        let offsets = entry["data_offsets"]
            .as_array()
            .filter(|o| o.len() == 2)
            .with_context(|| format!("'{name}': missing data_offsets"))?;
        let (s, e) = match (offsets[0].as_u64(), offsets[1].as_u64()) {
            (Some(s), Some(e)) if s <= e => (s as usize, e as usize),
            _ => bail!("'{name}': malformed data_offsets"),
        };
        let (Some(start), Some(end)) = (self.data_start.checked_add(s), self.data_start.checked_add(e)) else {
            bail!("'{name}': data_offsets out of bounds");
        };
        let raw = self
            .bytes
            .get(start..end)
            .with_context(|| format!("'{name}': data_offsets out of bounds"))?;
        Ok(Some(Tensor { dtype: dtype.to_owned(), shape, raw }))
    }

    fn require(&self, name: &str) -> anyhow::Result<Tensor<'_>> {
        self.tensor(name)?.with_context(|| format!("missing '{name}' tensor"))
    }

    fn metadata(&self, key: &str) -> Option<&str> {
        self.header.get(METADATA_KEY)?.get(key)?.as_str()
    }
}

fn parse_recording(bytes: Vec<u8>) -> anyhow::Result<Recording> {
    let c = Container::parse(bytes)?;

    let data_t = c.require("data")?;
    let [n_ch, n_t] = data_t.shape[..] else {
        bail!("'data' must be 2-D, found shape {:?}", data_t.shape);
    };
    let data = Array2::from_shape_vec((n_ch, n_t), data_t.to_f32().context("'data'")?)?;

    let sfreq = *c.require("sfreq")?.to_f64().context("'sfreq'")?.first().context("'sfreq' is empty")?;

    let events = match c.tensor("event_samples")? {
        Some(t) => {
            let samples = t.to_i64().context("'event_samples'")?;
            let codes = c.require("event_codes")?.to_lines().context("'event_codes'")?;
            ensure!(
                samples.len() == codes.len(),
                "{} event samples but {} event codes",
                samples.len(),
                codes.len()
            );
            samples
                .into_iter()
                .zip(codes)
                .map(|(s, code)| {
                    let s = usize::try_from(s).with_context(|| format!("event '{code}' has negative sample {s}"))?;
                    Ok(Event::new(code, s))
                })
                .collect::<anyhow::Result<Vec<_>>>()?
        }
        None => vec![],
    };

    let mut rec = Recording::new(data, sfreq, events)?;

    if let Some(t) = c.tensor("ch_names")? {
        rec = rec.with_ch_names(t.to_lines().context("'ch_names'")?)?;
    }
    if let Some(t) = c.tensor("bad_channels")? {
        let n = rec.n_channels();
        rec.bad_channels = t
            .to_i64()
            .context("'bad_channels'")?
            .into_iter()
            .map(|b| match usize::try_from(b) {
                Ok(b) if (1..=n).contains(&b) => Ok(b),
                _ => bail!("bad channel {b} outside 1..={n}"),
            })
            .collect::<anyhow::Result<_>>()?;
    }
    if let Some(s) = c.metadata("start_time") {
        let t = DateTime::parse_from_rfc3339(s).with_context(|| format!("invalid start_time \"{s}\""))?;
        rec.start_time = Some(t.with_timezone(&Utc));
    }
    rec.device = c.metadata("device").map(String::from);
    if let Some(h) = c.metadata("history") {
        rec.history = serde_json::from_str(h).context("invalid history metadata")?;
    }
    Ok(rec)
}

/// Read a recording container from `path`.
pub fn read_recording(path: &Path) -> Result<Recording> {
    let bytes = std::fs::read(path)
        .map_err(|e| ErpError::data(format!("reading {}: {e}", path.display())))?;
    parse_recording(bytes).map_err(|e| match e.downcast::<ErpError>() {
        Ok(inner) => inner,
        Err(e) => ErpError::data(format!("{}: {e:#}", path.display())),
    })
}

// ── Generic safetensors builder ──────────────────────────────────────────────

/// Safetensors file writer for F32, F64, I32, I64 and U8 (text) tensors.
///
/// ```rust,no_run
/// use eegw::io::StWriter;
/// use std::path::Path;
/// let mut w = StWriter::new();
/// w.add_f32("signal", &[1.0f32, 2.0, 3.0], &[1, 3]);
/// w.add_f64("sfreq", &[250.0], &[1]);
/// w.set_metadata("device", "HydroCel GSN 256 1.0");
/// w.write(Path::new("/tmp/out.safetensors")).unwrap();
/// ```
#[derive(Default)]
pub struct StWriter {
    entries: Vec<(String, Vec<u8>, &'static str, Vec<usize>)>,
    metadata: serde_json::Map<String, Value>,
}

impl StWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_f32(&mut self, name: &str, data: &[f32], shape: &[usize]) {
        let bytes: Vec<u8> = data.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.entries.push((name.to_string(), bytes, "F32", shape.to_vec()));
    }

    pub fn add_f32_arr2(&mut self, name: &str, arr: &Array2<f32>) {
        let data: Vec<f32> = arr.iter().copied().collect();
        self.add_f32(name, &data, &[arr.nrows(), arr.ncols()]);
    }

    pub fn add_f64(&mut self, name: &str, data: &[f64], shape: &[usize]) {
        let bytes: Vec<u8> = data.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.entries.push((name.to_string(), bytes, "F64", shape.to_vec()));
    }

    pub fn add_i32(&mut self, name: &str, data: &[i32], shape: &[usize]) {
        let bytes: Vec<u8> = data.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.entries.push((name.to_string(), bytes, "I32", shape.to_vec()));
    }

    pub fn add_i64(&mut self, name: &str, data: &[i64], shape: &[usize]) {
        let bytes: Vec<u8> = data.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.entries.push((name.to_string(), bytes, "I64", shape.to_vec()));
    }

    /// Store `lines` newline-joined as a U8 tensor.
    pub fn add_lines<S: AsRef<str>>(&mut self, name: &str, lines: &[S]) {
        let bytes = lines.iter().map(AsRef::as_ref).collect::<Vec<_>>().join("\n").into_bytes();
        let len = bytes.len();
        self.entries.push((name.to_string(), bytes, "U8", vec![len]));
    }

    pub fn set_metadata(&mut self, key: &str, value: impl Into<String>) {
        self.metadata.insert(key.to_owned(), Value::String(value.into()));
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut header_map = serde_json::Map::new();
        if !self.metadata.is_empty() {
            header_map.insert(METADATA_KEY.to_owned(), Value::Object(self.metadata.clone()));
        }
        let mut offset: usize = 0;
        for (name, data, dtype, shape) in &self.entries {
            header_map.insert(
                name.clone(),
                serde_json::json!({
                    "dtype": dtype,
                    "shape": shape,
                    "data_offsets": [offset, offset + data.len()],
                }),
            );
            offset += data.len();
        }
        let hdr_bytes =
            serde_json::to_vec(&header_map).map_err(|e| ErpError::data(format!("encoding header: {e}")))?;
        let pad = (8 - hdr_bytes.len() % 8) % 8;
        let mut out = Vec::with_capacity(8 + hdr_bytes.len() + pad + offset);
        out.extend_from_slice(&((hdr_bytes.len() + pad) as u64).to_le_bytes());
        out.extend_from_slice(&hdr_bytes);
        out.extend(std::iter::repeat(b' ').take(pad));
        for (_, data, _, _) in &self.entries {
            out.extend_from_slice(data);
        }
        Ok(out)
    }

    /// Write to `path` via a sibling temporary file, so a failed write never
    /// leaves a partial file at `path`.
    pub fn write(&self, path: &Path) -> Result<()> {
        let bytes = self.to_bytes()?;
        let tmp = temp_sibling(path);
        let res = std::fs::write(&tmp, &bytes).and_then(|()| std::fs::rename(&tmp, path));
        if let Err(e) = res {
            let _ = std::fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }
}

fn temp_sibling(path: &Path) -> PathBuf {
    let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    path.with_file_name(format!(".{name}.{}.tmp", std::process::id()))
}

/// Serialize averaged output (plus the full history) into a safetensors buffer.
pub fn encode_averaged(out: &AveragedRecording, history: &[HistoryEntry]) -> Result<StWriter> {
    if let Some(c) = out.categories.iter().find(|c| c.label.contains('\n')) {
        return Err(ErpError::data(format!("category label {:?} contains a newline", c.label)));
    }
    let mut w = StWriter::new();
    w.add_f32_arr2("data", &out.data);
    w.add_f64("sfreq", &[out.sfreq], &[1]);
    if !out.ch_names.is_empty() {
        w.add_lines("ch_names", &out.ch_names);
    }
    let samples: Vec<i64> = out.event_samples().into_iter().map(|s| s as i64).collect();
    let labels: Vec<&str> = out.categories.iter().map(|c| c.label.as_str()).collect();
    w.add_i64("event_samples", &samples, &[samples.len()]);
    w.add_lines("event_codes", &labels);
    let nave: Vec<i32> = out
        .categories
        .iter()
        .map(|c| c.keys.get("#seg").map_or(0, |k| k.data as i32))
        .collect();
    w.add_i32("nave", &nave, &[nave.len()]);
    if !out.bad_channels.is_empty() {
        let bads: Vec<i32> = out.bad_channels.iter().map(|&b| b as i32).collect();
        w.add_i32("bad_channels", &bads, &[bads.len()]);
    }

    w.set_metadata("categories", to_json(&out.categories)?);
    w.set_metadata("history", to_json(history)?);
    if let Some(t) = out.start_time {
        w.set_metadata("start_time", t.to_rfc3339());
    }
    if let Some(d) = &out.device {
        w.set_metadata("device", d.clone());
    }
    Ok(w)
}

fn to_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| ErpError::data(format!("encoding metadata: {e}")))
}

// ── Capability implementations ───────────────────────────────────────────────

/// Reads a recording container from disk.
#[derive(Debug, Clone)]
pub struct SafetensorsReader {
    path: PathBuf,
}

impl SafetensorsReader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl RecordingReader for SafetensorsReader {
    fn source(&self) -> String {
        self.path.display().to_string()
    }

    fn read(&mut self) -> Result<Recording> {
        read_recording(&self.path)
    }
}

/// Writes the averaged output to a path that must not exist yet.
#[derive(Debug, Clone)]
pub struct SafetensorsWriter {
    path: PathBuf,
}

impl SafetensorsWriter {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        check_output_free(&path)?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn check_output_free(path: &Path) -> Result<()> {
    if path.exists() {
        return Err(ErpError::config(format!("output {} already exists", path.display())));
    }
    Ok(())
}

impl RecordingWriter for SafetensorsWriter {
    fn write(&mut self, output: &AveragedRecording, history: &[HistoryEntry]) -> Result<()> {
        check_output_free(&self.path)?;
        encode_averaged(output, history)?.write(&self.path)?;
        log::info!("wrote {}", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_writer() -> StWriter {
        let mut w = StWriter::new();
        let data = Array2::from_shape_fn((2, 5), |(c, t)| (c * 10 + t) as f32);
        w.add_f32_arr2("data", &data);
        w.add_f32("sfreq", &[100.0], &[1]);
        w.add_lines("ch_names", &["Cz", "Pz"]);
        w.add_i32("event_samples", &[3, 1], &[2]);
        w.add_lines("event_codes", &["B", "A"]);
        w.add_i32("bad_channels", &[2], &[1]);
        w.set_metadata("start_time", "2024-01-15T12:00:00+01:00");
        w.set_metadata("device", "HydroCel GSN 256 1.0");
        w
    }

    #[test]
    fn header_is_eight_byte_aligned() {
        let bytes = sample_writer().to_bytes().unwrap();
        let n = u64::from_le_bytes(bytes[..8].try_into().unwrap()) as usize;
        assert_eq!(n % 8, 0);
    }

    #[test]
    fn parses_all_fields() {
        let rec = parse_recording(sample_writer().to_bytes().unwrap()).unwrap();
        assert_eq!(rec.data.dim(), (2, 5));
        assert_eq!(rec.data[[1, 4]], 14.0);
        assert_eq!(rec.sfreq, 100.0);
        assert_eq!(rec.ch_names, ["Cz", "Pz"]);
        assert_eq!(rec.events, vec![Event::new("A", 1), Event::new("B", 3)]);
        assert_eq!(rec.bad_channels, vec![2]);
        assert_eq!(rec.start_time.unwrap().to_rfc3339(), "2024-01-15T11:00:00+00:00");
        assert_eq!(rec.device.as_deref(), Some("HydroCel GSN 256 1.0"));
        assert!(rec.history.is_empty());
    }

    #[test]
    fn missing_data_is_an_error() {
        let mut w = StWriter::new();
        w.add_f32("sfreq", &[100.0], &[1]);
        let err = parse_recording(w.to_bytes().unwrap()).unwrap_err();
        assert!(format!("{err:#}").contains("missing 'data'"));
    }

    #[test]
    fn truncated_file_is_an_error() {
        let mut bytes = sample_writer().to_bytes().unwrap();
        bytes.truncate(bytes.len() - 4);
        assert!(parse_recording(bytes).is_err());
    }

    #[test]
    fn bad_channel_out_of_range() {
        let mut w = sample_writer();
        w.add_i32("bad_channels", &[3], &[1]);
        assert!(parse_recording(w.to_bytes().unwrap()).is_err());
    }

    fn raw_container(header: &str, payload: &[u8]) -> Vec<u8> {
        let mut bytes = (header.len() as u64).to_le_bytes().to_vec();
        bytes.extend_from_slice(header.as_bytes());
        bytes.extend_from_slice(payload);
        bytes
    }

    #[test]
    fn oversized_shape_is_an_error() {
        let header = r#"{"data":{"dtype":"F32","shape":[4294967296,4294967296],"data_offsets":[0,8]},"sfreq":{"dtype":"F32","shape":[1],"data_offsets":[8,12]}}"#;
        let err = parse_recording(raw_container(header, &[0; 12])).unwrap_err();
        assert!(format!("{err:#}").contains("too large"), "{err:#}");
    }

    #[test]
    fn overflowing_offsets_are_an_error() {
        let max = u64::MAX;
        let header = format!(r#"{{"data":{{"dtype":"F32","shape":[1,1],"data_offsets":[{max},{max}]}}}}"#);
        let err = parse_recording(raw_container(&header, &[0; 4])).unwrap_err();
        assert!(format!("{err:#}").contains("out of bounds"), "{err:#}");
    }
}
