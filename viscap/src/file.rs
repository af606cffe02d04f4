//! Structured write path for visibility capture files.
//!
//! [`VisFile`] is the safe, fully-checked way to fill a capture container:
//! every cell write goes through the mapped container's bounds-checked API,
//! the time axis grows one validated row at a time, and the schema block is
//! kept current on every extension. The raw-offset path in
//! [`fast`](crate::fast) trades this bookkeeping for latency while
//! producing an identical file.
//!
//! A `VisFile` owns its advisory [`LockGuard`]: the lock appears before the
//! container is created and disappears only after the mapping is flushed,
//! on every exit path.

use std::collections::BTreeMap;
use std::path::Path;

use tracing::{debug, info};

use crate::axes::{Complex32, FreqChannel, InputDesc, Product, TimeSample, Wire, encode_slice};
use crate::container::{
    AxisSizes, Container, CreateParams, DS_EVAL, DS_EVEC, DS_ERMS, DS_FREQ, DS_GAIN_COEFF,
    DS_GAIN_EXP, DS_TIME, DS_VIS, DS_WEIGHT, FileSchema, MappedContainer,
};
use crate::error::{FileIoError, Result, SchemaError};
use crate::lock::LockGuard;

/// One (time, frequency) slab of sample data.
///
/// Vector lengths are validated against the file's fixed axes before any
/// byte is written: `vis` and `weight` carry one element per product,
/// `gain_coeff` and `gain_exp` one per input.
#[derive(Debug, Clone, Copy)]
pub struct SamplePayload<'a> {
    /// Visibilities, one per product.
    pub vis: &'a [Complex32],
    /// Visibility weights, one per product.
    pub weight: &'a [f32],
    /// Gain coefficients, one per input.
    pub gain_coeff: &'a [Complex32],
    /// Gain exponents, one per input.
    pub gain_exp: &'a [i32],
    /// Eigen data; required iff the file was created with eigenvectors.
    pub eigen: Option<EigenPayload<'a>>,
}

/// Eigen-decomposition results accompanying a sample.
#[derive(Debug, Clone, Copy)]
pub struct EigenPayload<'a> {
    /// Eigenvalues, one per eigenvector.
    pub eval: &'a [f32],
    /// Eigenvectors, `num_ev * num_inputs` elements, eigenvector-major.
    pub evec: &'a [Complex32],
    /// RMS residual of the decomposition.
    pub erms: f32,
}

/// Resolved dataset table positions, looked up once at creation so the
/// write paths never search by name per sample.
#[derive(Debug, Clone, Copy)]
pub(crate) struct DatasetIndices {
    pub(crate) time: usize,
    pub(crate) vis: usize,
    pub(crate) weight: usize,
    pub(crate) gain_coeff: usize,
    pub(crate) gain_exp: usize,
    pub(crate) eval: Option<usize>,
    pub(crate) evec: Option<usize>,
    pub(crate) erms: Option<usize>,
}

impl DatasetIndices {
    pub(crate) fn from_schema(schema: &FileSchema) -> Result<Self> {
        let find = |name: &str| {
            schema
                .datasets
                .iter()
                .position(|d| d.name == name)
                .ok_or_else(|| FileIoError::Corrupted {
                    path: String::new(),
                    reason: format!("dataset '{name}' missing from schema"),
                })
        };

        let eigen = schema.axes.ev > 0;
        Ok(Self {
            time: find(DS_TIME)?,
            vis: find(DS_VIS)?,
            weight: find(DS_WEIGHT)?,
            gain_coeff: find(DS_GAIN_COEFF)?,
            gain_exp: find(DS_GAIN_EXP)?,
            eval: if eigen { Some(find(DS_EVAL)?) } else { None },
            evec: if eigen { Some(find(DS_EVEC)?) } else { None },
            erms: if eigen { Some(find(DS_ERMS)?) } else { None },
        })
    }
}

/// Validates a payload's shape against the file's fixed axes.
///
/// Called before any byte is written so a mismatch never leaves a partial
/// sample behind.
pub(crate) fn validate_payload(axes: AxisSizes, payload: &SamplePayload<'_>) -> Result<()> {
    let check = |dataset: &'static str, expected: usize, actual: usize| {
        if expected != actual {
            Err(SchemaError::LengthMismatch {
                dataset,
                expected,
                actual,
            })
        } else {
            Ok(())
        }
    };

    check(DS_VIS, axes.prod as usize, payload.vis.len())?;
    check(DS_WEIGHT, axes.prod as usize, payload.weight.len())?;
    check(DS_GAIN_COEFF, axes.input as usize, payload.gain_coeff.len())?;
    check(DS_GAIN_EXP, axes.input as usize, payload.gain_exp.len())?;

    if axes.ev > 0 {
        let eigen = payload
            .eigen
            .as_ref()
            .ok_or(SchemaError::MissingEigenData { num_ev: axes.ev })?;
        check(DS_EVAL, axes.ev as usize, eigen.eval.len())?;
        check(DS_EVEC, (axes.ev * axes.input) as usize, eigen.evec.len())?;
    }

    Ok(())
}

/// A visibility capture file on the structured write path.
#[derive(Debug)]
pub struct VisFile {
    container: MappedContainer,
    datasets: DatasetIndices,
    axes: AxisSizes,
    ntime: u32,
    time_capacity: u32,
    // Dropped after the container, so the data is flushed while the lock
    // still marks the file as busy.
    _lock: LockGuard,
}

impl VisFile {
    /// Creates a new capture file and acquires its advisory lock.
    ///
    /// The lock file exists before the container does, so there is no
    /// instant at which the data file is visible but unlocked. `metadata`
    /// becomes the file-level attribute map and must carry `weight_type`,
    /// which is duplicated onto the weight dataset where archive readers
    /// expect it.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError`] for an empty required axis or missing
    /// weight type, [`FileIoError`] for creation failures.
    pub fn create<P: AsRef<Path>>(
        path: P,
        metadata: &BTreeMap<String, String>,
        freqs: &[FreqChannel],
        inputs: &[InputDesc],
        prods: &[Product],
        num_ev: u32,
        time_capacity: u32,
    ) -> Result<Self> {
        let path = path.as_ref();
        let lock = LockGuard::acquire(path)?;

        let params = CreateParams {
            metadata,
            freqs,
            inputs,
            prods,
            num_ev,
            time_capacity,
        };
        let container = Container::create(path, &params)?.into_mapped()?;
        let datasets = DatasetIndices::from_schema(container.schema())?;
        let axes = container.schema().axes;

        info!(file = %path.display(), time_capacity, "created visibility file");

        Ok(Self {
            container,
            datasets,
            axes,
            ntime: 0,
            time_capacity,
            _lock: lock,
        })
    }

    /// Appends one row to the time axis and returns its index.
    ///
    /// Indices are allocated strictly in call order — 0, 1, 2, … —
    /// regardless of the wall-clock value of `time`. Call exactly once per
    /// distinct timestamp before writing at that index.
    ///
    /// # Errors
    ///
    /// Returns [`FileIoError::CapacityExhausted`] once the preallocated
    /// time capacity is used up.
    pub fn extend_time(&mut self, time: TimeSample) -> Result<u32> {
        if self.ntime == self.time_capacity {
            return Err(FileIoError::CapacityExhausted {
                capacity: self.time_capacity,
            }
            .into());
        }

        let index = self.ntime;
        let mut buf = Vec::with_capacity(TimeSample::WIRE_SIZE);
        time.encode_into(&mut buf);
        self.container
            .write_cells(self.datasets.time, u64::from(index), &buf)?;

        self.ntime += 1;
        self.container.set_num_time(self.ntime)?;
        Ok(index)
    }

    /// Writes one (time, frequency) slab at a previously extended index.
    ///
    /// The payload is validated in full before any byte lands, so a shape
    /// mismatch performs no partial write. Eigen data is required iff the
    /// file carries eigenvectors; otherwise it is ignored.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError`] for payload shape violations and
    /// [`FileIoError`] for out-of-range indices.
    pub fn write_sample(
        &mut self,
        time_ind: u32,
        freq_ind: u32,
        payload: &SamplePayload<'_>,
    ) -> Result<()> {
        validate_payload(self.axes, payload)?;
        self.check_indices(time_ind, freq_ind)?;

        if self.axes.ev == 0 && payload.eigen.is_some() {
            debug!("ignoring eigen data for a file without eigenvectors");
        }

        let t = u64::from(time_ind);
        let f = u64::from(freq_ind);
        let nfreq = u64::from(self.axes.freq);
        let ninput = u64::from(self.axes.input);
        let nprod = u64::from(self.axes.prod);
        let nev = u64::from(self.axes.ev);
        let cell = t * nfreq + f;

        let mut buf = Vec::new();

        encode_slice(payload.vis, &mut buf);
        self.container
            .write_cells(self.datasets.vis, cell * nprod, &buf)?;

        buf.clear();
        encode_slice(payload.weight, &mut buf);
        self.container
            .write_cells(self.datasets.weight, cell * nprod, &buf)?;

        buf.clear();
        encode_slice(payload.gain_coeff, &mut buf);
        self.container
            .write_cells(self.datasets.gain_coeff, cell * ninput, &buf)?;

        buf.clear();
        encode_slice(payload.gain_exp, &mut buf);
        self.container
            .write_cells(self.datasets.gain_exp, t * ninput, &buf)?;

        if let (Some(eval_idx), Some(evec_idx), Some(erms_idx), Some(eigen)) = (
            self.datasets.eval,
            self.datasets.evec,
            self.datasets.erms,
            payload.eigen,
        ) {
            buf.clear();
            encode_slice(eigen.eval, &mut buf);
            self.container.write_cells(eval_idx, cell * nev, &buf)?;

            buf.clear();
            encode_slice(eigen.evec, &mut buf);
            self.container
                .write_cells(evec_idx, cell * nev * ninput, &buf)?;

            buf.clear();
            eigen.erms.encode_into(&mut buf);
            self.container.write_cells(erms_idx, cell, &buf)?;
        }

        Ok(())
    }

    /// Current extent of the time axis.
    pub fn num_time(&self) -> u32 {
        self.ntime
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        self.container.path()
    }

    /// Flushes the mapping to disk.
    ///
    /// # Errors
    ///
    /// Returns [`FileIoError::Sync`] if the flush fails.
    pub fn flush(&self) -> Result<()> {
        self.container.flush()
    }

    fn check_indices(&self, time_ind: u32, freq_ind: u32) -> Result<()> {
        if time_ind >= self.ntime {
            return Err(FileIoError::OutOfBounds {
                dataset: DS_TIME.to_string(),
                element: u64::from(time_ind),
                count: 1,
                capacity: u64::from(self.ntime),
            }
            .into());
        }
        if freq_ind >= self.axes.freq {
            return Err(FileIoError::OutOfBounds {
                dataset: DS_FREQ.to_string(),
                element: u64::from(freq_ind),
                count: 1,
                capacity: u64::from(self.axes.freq),
            }
            .into());
        }
        Ok(())
    }
}

impl Drop for VisFile {
    fn drop(&mut self) {
        if let Err(e) = self.container.flush() {
            tracing::warn!(file = %self.container.path().display(), error = %e,
                "flush on close failed");
        }
        info!(file = %self.container.path().display(), num_time = self.ntime,
            "closed visibility file");
    }
}
