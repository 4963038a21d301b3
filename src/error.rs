//! Error taxonomy for the ERP workflow.
//!
//! Every library function returns [`ErpError`].  The pipeline wraps whatever
//! fails in a [`StageError`] so the caller learns which stage broke and on
//! which recording.
use std::fmt;

use thiserror::Error;

/// Failure of a single operation.
#[derive(Debug, Error)]
pub enum ErpError {
    /// An invalid parameter, e.g. a cutoff at or above Nyquist.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Malformed or unreadable recording container.
    #[error("data error: {0}")]
    Data(String),

    /// A stage could not produce its output, e.g. no epoch survived.
    #[error("processing error: {0}")]
    Processing(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl ErpError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn data(msg: impl Into<String>) -> Self {
        Self::Data(msg.into())
    }

    pub fn processing(msg: impl Into<String>) -> Self {
        Self::Processing(msg.into())
    }
}

pub type Result<T, E = ErpError> = std::result::Result<T, E>;

/// The pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    Configure,
    Read,
    Filter,
    Segment,
    Reject,
    Average,
    Write,
}

impl Stage {
    pub fn name(self) -> &'static str {
        match self {
            Stage::Configure => "configure",
            Stage::Read => "read",
            Stage::Filter => "filter",
            Stage::Segment => "segment",
            Stage::Reject => "reject",
            Stage::Average => "average",
            Stage::Write => "write",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A pipeline failure tagged with the stage and the recording identifier.
#[derive(Debug, Error)]
#[error("[{stage}] {recording}: {source}")]
pub struct StageError {
    pub stage: Stage,
    pub recording: String,
    #[source]
    pub source: ErpError,
}

impl StageError {
    pub fn new(stage: Stage, recording: impl Into<String>, source: ErpError) -> Self {
        Self { stage, recording: recording.into(), source }
    }
}
