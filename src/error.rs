//! Error taxonomy.
//!
//! Each layer of the pipeline owns a narrow `thiserror` enum; library
//! code returns these typed errors so callers can match on cause.
//! Application entry points (the CLI binaries, the failure handler)
//! collapse everything into `anyhow::Result`, the same split the
//! teacher crate draws between its typed `IpcError` variants and the
//! `anyhow::Result` used at `main.rs`/`benchmark.rs` call sites.

use thiserror::Error;

/// Malformed configuration, unknown action type, missing required
/// keys. Fatal at startup (spec.md §7.1).
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("plan \"{0}\" must define at least one action")]
    EmptyActionList(String),
    #[error("unknown action type \"{0}\"")]
    UnknownActionType(String),
    #[error("missing required configuration key \"{0}\"")]
    MissingKey(String),
    #[error("unknown transport kind \"{0}\"")]
    UnknownTransport(String),
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("failed to read configuration file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// `KeyNotFound`, `TypeMismatch`, parse failure. Local to the action
/// that triggered it (spec.md §7.2).
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MetadataError {
    #[error("metadata key \"{0}\" not found")]
    KeyNotFound(String),
    #[error("metadata key \"{key}\" has type {actual}, expected {expected}")]
    TypeMismatch {
        key: String,
        expected: &'static str,
        actual: &'static str,
    },
    #[error("failed to parse metadata: {0}")]
    Parse(String),
}

/// `UnknownDomain`, `MalformedDomain`, `DomainMismatch`,
/// `InconsistentCoverage`. Warning on first occurrence, promoted to
/// fatal when `strict` is set (spec.md §7.3).
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DomainError {
    #[error("no domain registered for peer {peer} under name \"{name}\"")]
    UnknownDomain { name: String, peer: String },
    #[error("malformed domain descriptor: {0}")]
    MalformedDomain(String),
    #[error("domain \"{name}\" re-registered by {peer} with a different descriptor")]
    DomainMismatch { name: String, peer: String },
    #[error("domain \"{0}\" coverage is inconsistent with its declared global size")]
    InconsistentCoverage(String),
}

/// `DuplicatePart` (warning), `UnexpectedLatePart` (drop + log),
/// `IncompleteAggregation` at flush (log, do not emit) — spec.md §7.4.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AggregationError {
    #[error("field \"{0}\" received more than one partial from the same peer")]
    DuplicatePart(String),
    #[error("field \"{0}\" received a partial after its aggregation already completed")]
    UnexpectedLatePart(String),
    #[error("field \"{0}\" flushed with {have}/{expected} parts received")]
    IncompleteAggregation {
        field_id: String,
        have: usize,
        expected: usize,
    },
}

/// `PeerUnreachable`, `FrameTooLarge`, `ProtocolViolation` — spec.md
/// §7.5.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("peer {0} is unreachable")]
    PeerUnreachable(String),
    #[error("frame of {size} bytes exceeds the maximum of {max} bytes")]
    FrameTooLarge { size: usize, max: usize },
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    #[error("transport aborted: {0}")]
    Aborted(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// I/O failure on write. Propagated; the Plan continues processing
/// subsequent messages (spec.md §7.6).
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink \"{sink}\" failed to write: {source}")]
    Write {
        sink: String,
        #[source]
        source: std::io::Error,
    },
    #[error("no sink registered named \"{0}\"")]
    UnknownSink(String),
}

/// Umbrella error used wherever a pipeline stage needs to return one
/// of several layers' errors to its caller (the Plan, the Server's
/// failure handler).
#[derive(Debug, Error)]
pub enum SimioError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    Metadata(#[from] MetadataError),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Aggregation(#[from] AggregationError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Sink(#[from] SinkError),
}

/// Outcome the Server's failure handler chooses for an error that
/// bubbled up from a Plan (spec.md §7, "Propagation policy").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureAction {
    /// Propagate the error to the caller (or, for background threads,
    /// terminate the process after logging).
    Rethrow,
    /// Log and continue processing subsequent messages.
    Ignore,
    /// Retry the operation that failed, if it is idempotent to do so.
    Retry,
    /// Call `transport.abort(cause)` and stop accepting new work.
    AbortTransport,
}
