//! Write-strategy selection.
//!
//! The two file implementations are deliberately structurally parallel and
//! produce identical containers; the only choice is the write mechanism.
//! That choice is a configuration string — `"structured"` or `"raw"` —
//! parsed into a [`WriterKind`] and dispatched through the [`SampleWriter`]
//! tagged variant. No trait objects, no registry: schema parity between the
//! two paths stays easy to verify because both arms are visible at every
//! call site.

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

use tracing::warn;

use crate::axes::{FreqChannel, InputDesc, Product, TimeSample};
use crate::error::{FileIoError, Result, ViscapError};
use crate::fast::FastVisFile;
use crate::file::{SamplePayload, VisFile};

/// Which write mechanism a capture file uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriterKind {
    /// Bounds-checked writes through the mapped container.
    Structured,
    /// Positioned writes at precomputed raw offsets. The capture default.
    #[default]
    Raw,
}

impl WriterKind {
    /// The configuration key for this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            WriterKind::Structured => "structured",
            WriterKind::Raw => "raw",
        }
    }
}

impl FromStr for WriterKind {
    type Err = ViscapError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "structured" => Ok(WriterKind::Structured),
            "raw" => Ok(WriterKind::Raw),
            other => Err(ViscapError::UnknownWriterKind(other.to_string())),
        }
    }
}

/// A capture file behind either write strategy.
///
/// Created by [`SampleWriter::create`], which also owns the raw-capability
/// fallback: if the container cannot guarantee contiguous extents, a
/// requested raw writer silently becomes a structured one (with a warning)
/// rather than failing the acquisition.
#[derive(Debug)]
pub enum SampleWriter {
    /// The structured path.
    Structured(VisFile),
    /// The raw-offset path.
    Raw(FastVisFile),
}

impl SampleWriter {
    /// Creates a capture file with the requested write strategy.
    ///
    /// # Errors
    ///
    /// Everything the underlying `create` can return, except
    /// [`FileIoError::RawLayoutUnsupported`], which triggers the
    /// structured fallback instead.
    #[allow(clippy::too_many_arguments)]
    pub fn create<P: AsRef<Path>>(
        kind: WriterKind,
        path: P,
        metadata: &BTreeMap<String, String>,
        freqs: &[FreqChannel],
        inputs: &[InputDesc],
        prods: &[Product],
        num_ev: u32,
        time_capacity: u32,
    ) -> Result<Self> {
        let path = path.as_ref();
        match kind {
            WriterKind::Structured => Ok(Self::Structured(VisFile::create(
                path,
                metadata,
                freqs,
                inputs,
                prods,
                num_ev,
                time_capacity,
            )?)),
            WriterKind::Raw => {
                match FastVisFile::create(
                    path,
                    metadata,
                    freqs,
                    inputs,
                    prods,
                    num_ev,
                    time_capacity,
                ) {
                    Ok(file) => Ok(Self::Raw(file)),
                    Err(ViscapError::Io(FileIoError::RawLayoutUnsupported { path: p })) => {
                        warn!(file = %p, "raw layout unavailable; falling back to structured writes");
                        Ok(Self::Structured(VisFile::create(
                            path,
                            metadata,
                            freqs,
                            inputs,
                            prods,
                            num_ev,
                            time_capacity,
                        )?))
                    }
                    Err(e) => Err(e),
                }
            }
        }
    }

    /// The strategy this writer ended up with (after any fallback).
    pub fn kind(&self) -> WriterKind {
        match self {
            Self::Structured(_) => WriterKind::Structured,
            Self::Raw(_) => WriterKind::Raw,
        }
    }

    /// Appends one row to the time axis. See the path-specific docs.
    ///
    /// # Errors
    ///
    /// Returns [`FileIoError::CapacityExhausted`] once the preallocated
    /// time capacity is used up.
    pub fn extend_time(&mut self, time: TimeSample) -> Result<u32> {
        match self {
            Self::Structured(f) => f.extend_time(time),
            Self::Raw(f) => f.extend_time(time),
        }
    }

    /// Writes one (time, frequency) slab. See the path-specific docs.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError`](crate::error::SchemaError) for payload
    /// shape violations and [`FileIoError`] for index violations.
    pub fn write_sample(
        &mut self,
        time_ind: u32,
        freq_ind: u32,
        payload: &SamplePayload<'_>,
    ) -> Result<()> {
        match self {
            Self::Structured(f) => f.write_sample(time_ind, freq_ind, payload),
            Self::Raw(f) => f.write_sample(time_ind, freq_ind, payload),
        }
    }

    /// Current extent of the time axis.
    pub fn num_time(&self) -> u32 {
        match self {
            Self::Structured(f) => f.num_time(),
            Self::Raw(f) => f.num_time(),
        }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        match self {
            Self::Structured(f) => f.path(),
            Self::Raw(f) => f.path(),
        }
    }
}
