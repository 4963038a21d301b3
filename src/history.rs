//! Provenance history.
//!
//! Every stage that changes the data appends a [`HistoryEntry`] describing
//! what it did.  Entries from the input container are carried through, so
//! the output holds the full processing trail.
use chrono::{DateTime, FixedOffset, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// One step of the processing trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub method: String,
    pub begin_time: DateTime<FixedOffset>,
    pub end_time: DateTime<FixedOffset>,
    #[serde(default)]
    pub source_files: Vec<String>,
    #[serde(default)]
    pub settings: Vec<String>,
    #[serde(default)]
    pub results: Vec<String>,
}

impl HistoryEntry {
    pub fn new(name: impl Into<String>, method: impl Into<String>, span: TimeSpan) -> Self {
        Self {
            name: name.into(),
            kind: None,
            method: method.into(),
            begin_time: span.begin,
            end_time: span.end,
            source_files: vec![],
            settings: vec![],
            results: vec![],
        }
    }

    pub fn kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn source_file(mut self, file: impl Into<String>) -> Self {
        self.source_files.push(file.into());
        self
    }

    pub fn settings<I, S>(mut self, settings: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.settings.extend(settings.into_iter().map(Into::into));
        self
    }

    pub fn results<I, S>(mut self, results: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.results.extend(results.into_iter().map(Into::into));
        self
    }
}

/// Source of wall-clock time for history timestamps.
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Always returns the same instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Begin and end of a stage, already shifted into the output timezone.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeSpan {
    pub begin: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
}

/// Measures stage spans against a [`Clock`] in a fixed timezone.
pub struct Stopwatch<'a> {
    clock: &'a dyn Clock,
    tz: Tz,
}

impl<'a> Stopwatch<'a> {
    pub fn new(clock: &'a dyn Clock, tz: Tz) -> Self {
        Self { clock, tz }
    }

    pub fn now(&self) -> DateTime<FixedOffset> {
        self.clock.now().with_timezone(&self.tz).fixed_offset()
    }

    /// Run `f`, returning its output and the span it took.
    pub fn time<T>(&self, f: impl FnOnce() -> T) -> (T, TimeSpan) {
        let begin = self.now();
        let out = f();
        (out, TimeSpan { begin, end: self.now() })
    }
}
