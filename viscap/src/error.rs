//! Error types for the viscap storage engine.
//!
//! There is deliberately no lock-conflict variant: the advisory lock files
//! in [`lock`](crate::lock) signal writer ownership but the engine does not
//! detect concurrent writers. Single-writer access per file is an invariant
//! the deployment upholds, not a runtime check.

use thiserror::Error;

/// The main error type for all viscap operations.
///
/// This enum covers the error conditions that can surface from the capture
/// engine, from file creation through per-sample writes and bundle routing.
#[derive(Error, Debug)]
pub enum ViscapError {
    /// Axis or payload shape violated the file's fixed schema.
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    /// Underlying file I/O failed.
    #[error("file I/O error: {0}")]
    Io(#[from] FileIoError),

    /// Sample routing through a file bundle failed.
    #[error("bundle error: {0}")]
    Bundle(#[from] BundleError),

    /// Requested writer kind is not one of the registered keys.
    #[error("unknown writer kind '{0}' (expected 'structured' or 'raw')")]
    UnknownWriterKind(String),
}

/// Schema violations, surfaced synchronously to the caller.
///
/// These abort the operation that triggered them and never leave a partial
/// write behind.
#[derive(Error, Debug)]
pub enum SchemaError {
    /// A required axis was empty at file creation.
    #[error("axis '{axis}' must not be empty")]
    EmptyAxis {
        /// Name of the offending axis.
        axis: &'static str,
    },

    /// A payload vector does not match the axis cardinality it is written
    /// against.
    #[error("'{dataset}' length mismatch: expected {expected} elements, got {actual}")]
    LengthMismatch {
        /// The dataset the payload was destined for.
        dataset: &'static str,
        /// Expected element count (the axis cardinality).
        expected: usize,
        /// Element count actually supplied.
        actual: usize,
    },

    /// The file was created with an eigenvector axis but the sample carries
    /// no eigen data.
    #[error("file has {num_ev} eigenvectors but the sample carries no eigen data")]
    MissingEigenData {
        /// Number of eigenvectors in the file's fixed axes.
        num_ev: u32,
    },

    /// A metadata key the schema requires was not supplied at creation.
    #[error("required metadata key '{key}' missing")]
    MissingMetadataKey {
        /// The missing key.
        key: &'static str,
    },
}

/// Failures in the container file itself: create, map, read, write, sync.
#[derive(Error, Debug)]
pub enum FileIoError {
    /// Failed to create or preallocate a capture file.
    #[error("failed to create '{path}': {source}")]
    Create {
        /// The file path.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to open an existing capture file.
    #[error("failed to open '{path}': {source}")]
    Open {
        /// The file path.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Memory mapping failed.
    #[error("failed to map '{path}': {source}")]
    Map {
        /// The file path.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A positioned read failed.
    #[error("failed to read '{path}' at offset {offset}: {source}")]
    Read {
        /// The file path.
        path: String,
        /// Byte offset of the failed read.
        offset: u64,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A positioned write failed.
    #[error("failed to write '{path}' at offset {offset}: {source}")]
    Write {
        /// The file path.
        path: String,
        /// Byte offset of the failed write.
        offset: u64,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to sync file contents to disk.
    #[error("failed to sync '{path}': {source}")]
    Sync {
        /// The file path.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not a valid capture container.
    #[error("'{path}' is corrupted: {reason}")]
    Corrupted {
        /// The file path.
        path: String,
        /// What was invalid about the file.
        reason: String,
    },

    /// A cell access fell outside a dataset's preallocated extent.
    #[error("access beyond dataset '{dataset}': element {element} + count {count} > capacity {capacity}")]
    OutOfBounds {
        /// The dataset name.
        dataset: String,
        /// First element index of the attempted access.
        element: u64,
        /// Number of elements in the attempted access.
        count: u64,
        /// The dataset's preallocated element capacity.
        capacity: u64,
    },

    /// The time axis is full; the file was preallocated for fewer samples.
    #[error("time axis full: file was preallocated for {capacity} samples")]
    CapacityExhausted {
        /// Preallocated time capacity of the file.
        capacity: u32,
    },

    /// The container cannot guarantee one contiguous extent per dataset,
    /// which the raw-offset write path requires.
    #[error("'{path}' does not guarantee contiguous dataset extents; raw writes unavailable")]
    RawLayoutUnsupported {
        /// The file path.
        path: String,
    },

    /// Failed to serialize or parse the embedded schema block.
    #[error("schema block error for '{path}': {source}")]
    SchemaBlock {
        /// The file path.
        path: String,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },
}

/// Failures in routing a sample through a [`FileBundle`](crate::FileBundle).
#[derive(Error, Debug)]
pub enum BundleError {
    /// The sample's window was already evicted from the sliding set.
    ///
    /// The sample is dropped, not retried. Callers should log and keep the
    /// stream running.
    #[error(
        "sample at seq {seq} (logical {logical}) precedes earliest writable index {earliest}; dropped"
    )]
    EvictionDataLoss {
        /// Sequence count of the rejected sample.
        seq: u64,
        /// Logical sample index the sequence count maps to.
        logical: u64,
        /// Earliest logical index still covered by an open window.
        earliest: u64,
    },

    /// The bundle configuration is unusable.
    #[error("invalid bundle configuration: {reason}")]
    InvalidConfig {
        /// What was wrong with the configuration.
        reason: &'static str,
    },
}

/// Type alias for `Result<T, ViscapError>`.
pub type Result<T> = std::result::Result<T, ViscapError>;
