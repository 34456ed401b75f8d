//! Error taxonomy for the processing pipeline
//!
//! `PipelineError` covers everything that can abort a process run. Per-token
//! metadata failures have their own type (`EnrichmentError`) because they are
//! absorbed by the enricher and never reach the runner.

use super::runner::RunStage;

#[derive(Debug)]
pub enum PipelineError {
    /// Reading from the source schema failed or returned a malformed row
    SourceRead(String),
    /// A row could not be transformed as recorded. Raised by the pairing
    /// engine as a non-fatal data-quality issue and counted in the run report
    Transform(String),
    /// Writing processed rows to the destination failed
    Write(String),
    /// Reading or advancing a cursor failed
    Tracker(String),
    /// Another run of the same process holds the run lock
    AlreadyRunning(String),
    /// No process is registered under this name
    UnknownProcess(String),
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineError::SourceRead(e) => write!(f, "Source read error: {}", e),
            PipelineError::Transform(e) => write!(f, "Transform error: {}", e),
            PipelineError::Write(e) => write!(f, "Write error: {}", e),
            PipelineError::Tracker(e) => write!(f, "Tracker error: {}", e),
            PipelineError::AlreadyRunning(p) => {
                write!(f, "Process {} is already running", p)
            }
            PipelineError::UnknownProcess(p) => write!(f, "Unknown process: {}", p),
        }
    }
}

impl std::error::Error for PipelineError {}

/// Failure of a single metadata lookup
#[derive(Debug)]
pub enum EnrichmentError {
    /// Service answered with a non-success status
    Http(u16),
    /// Request never completed (connect error, timeout)
    Request(String),
    /// Payload could not be decoded
    Decode(String),
    /// Service answered but knows nothing about the token
    NotFound(String),
}

impl std::fmt::Display for EnrichmentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EnrichmentError::Http(status) => write!(f, "HTTP status {}", status),
            EnrichmentError::Request(e) => write!(f, "Request failed: {}", e),
            EnrichmentError::Decode(e) => write!(f, "Malformed payload: {}", e),
            EnrichmentError::NotFound(token) => write!(f, "No metadata for {}", token),
        }
    }
}

impl std::error::Error for EnrichmentError {}

impl From<reqwest::Error> for EnrichmentError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            EnrichmentError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            EnrichmentError::Http(status.as_u16())
        } else {
            EnrichmentError::Request(err.to_string())
        }
    }
}

/// A process run that ended in the FAILED state
#[derive(Debug)]
pub struct RunFailure {
    pub process: String,
    pub stage: RunStage,
    pub error: PipelineError,
}

impl std::fmt::Display for RunFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} failed during {}: {}",
            self.process,
            self.stage.as_str(),
            self.error
        )
    }
}

impl std::error::Error for RunFailure {}
