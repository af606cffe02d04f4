//! Raw-offset write path for visibility capture files.
//!
//! [`FastVisFile`] produces a file indistinguishable from the structured
//! path — the two share container creation outright — but writes every cell
//! with a single positioned syscall at a precomputed byte offset. No schema
//! bookkeeping happens per sample: extending the time axis is a counter
//! increment plus one write, and the logical extent is recorded once, at
//! close.
//!
//! Per-sample I/O failures are contained: a failed cell write is logged and
//! counted, the sample is dropped, and capture continues. The instrument
//! never stops because one write misfired.
//!
//! Because every write targets a disjoint, bounds-checked byte range,
//! [`FastVisFile::write_sample`] takes `&self`: callers that shard cells
//! across threads may write concurrently without locks, provided no two
//! writers target the same cell.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{error, info};

use crate::axes::{FreqChannel, InputDesc, Product, TimeSample, Wire, encode_slice};
use crate::container::{AxisSizes, Container, CreateParams, DS_FREQ, DS_TIME};
use crate::error::{FileIoError, Result, ViscapError};
use crate::file::{DatasetIndices, SamplePayload, validate_payload};
use crate::lock::LockGuard;

/// A visibility capture file on the raw-offset write path.
#[derive(Debug)]
pub struct FastVisFile {
    container: Container,
    datasets: DatasetIndices,
    axes: AxisSizes,
    ntime: u32,
    time_capacity: u32,
    write_errors: AtomicU64,
    // Dropped after the container, so the final schema rewrite and sync
    // happen while the lock still marks the file as busy.
    _lock: LockGuard,
}

impl FastVisFile {
    /// Creates a new capture file for raw-offset writing.
    ///
    /// The container preallocates every extent at creation, so no write
    /// issued later can trigger block allocation. Creation probes the
    /// container's layout capability and refuses to engage unless every
    /// dataset is one contiguous extent at a stable offset; callers that
    /// want automatic fallback go through
    /// [`SampleWriter::create`](crate::writer::SampleWriter::create).
    ///
    /// # Errors
    ///
    /// Returns [`FileIoError::RawLayoutUnsupported`] if the layout probe
    /// fails, plus everything [`VisFile::create`](crate::VisFile::create)
    /// can return.
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
        let container = Container::create(path, &params)?;

        if !container.is_contiguous() {
            return Err(FileIoError::RawLayoutUnsupported {
                path: path.display().to_string(),
            }
            .into());
        }

        let datasets = DatasetIndices::from_schema(container.schema())?;
        let axes = container.schema().axes;

        info!(file = %path.display(), time_capacity, "created visibility file (raw path)");

        Ok(Self {
            container,
            datasets,
            axes,
            ntime: 0,
            time_capacity,
            write_errors: AtomicU64::new(0),
            _lock: lock,
        })
    }

    /// Appends one row to the time axis and returns its index.
    ///
    /// One counter increment and one positioned write; the schema block is
    /// untouched until close. Indices are strictly increasing in call
    /// order. A failed timestamp write is contained like any other cell
    /// write — the index is still allocated.
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
        if let Err(e) = self
            .container
            .write_cells(self.datasets.time, u64::from(index), &buf)
        {
            self.report_write_error(DS_TIME, &e);
        }

        self.ntime += 1;
        Ok(index)
    }

    /// Writes one (time, frequency) slab with positioned writes.
    ///
    /// Payload shape violations and out-of-range indices are surfaced
    /// synchronously, exactly as on the structured path. I/O failures are
    /// not: each dataset write that fails is logged, counted and skipped,
    /// so one bad cell never aborts the file.
    ///
    /// Takes `&self`; concurrent calls targeting disjoint cells are safe.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError`](crate::error::SchemaError) for payload
    /// shape violations and [`FileIoError::OutOfBounds`] for index
    /// violations.
    pub fn write_sample(
        &self,
        time_ind: u32,
        freq_ind: u32,
        payload: &SamplePayload<'_>,
    ) -> Result<()> {
        validate_payload(self.axes, payload)?;
        self.check_indices(time_ind, freq_ind)?;

        let t = u64::from(time_ind);
        let f = u64::from(freq_ind);
        let nfreq = u64::from(self.axes.freq);
        let ninput = u64::from(self.axes.input);
        let nprod = u64::from(self.axes.prod);
        let nev = u64::from(self.axes.ev);
        let cell = t * nfreq + f;

        let mut buf = Vec::new();

        encode_slice(payload.vis, &mut buf);
        self.write_isolated(self.datasets.vis, cell * nprod, &buf, "vis");

        buf.clear();
        encode_slice(payload.weight, &mut buf);
        self.write_isolated(self.datasets.weight, cell * nprod, &buf, "vis_weight");

        buf.clear();
        encode_slice(payload.gain_coeff, &mut buf);
        self.write_isolated(self.datasets.gain_coeff, cell * ninput, &buf, "gain_coeff");

        buf.clear();
        encode_slice(payload.gain_exp, &mut buf);
        self.write_isolated(self.datasets.gain_exp, t * ninput, &buf, "gain_exp");

        if let (Some(eval_idx), Some(evec_idx), Some(erms_idx), Some(eigen)) = (
            self.datasets.eval,
            self.datasets.evec,
            self.datasets.erms,
            payload.eigen,
        ) {
            buf.clear();
            encode_slice(eigen.eval, &mut buf);
            self.write_isolated(eval_idx, cell * nev, &buf, "eval");

            buf.clear();
            encode_slice(eigen.evec, &mut buf);
            self.write_isolated(evec_idx, cell * nev * ninput, &buf, "evec");

            buf.clear();
            eigen.erms.encode_into(&mut buf);
            self.write_isolated(erms_idx, cell, &buf, "erms");
        }

        Ok(())
    }

    /// Current extent of the time axis.
    pub fn num_time(&self) -> u32 {
        self.ntime
    }

    /// Number of cell writes dropped because of isolated I/O failures.
    pub fn write_errors(&self) -> u64 {
        self.write_errors.load(Ordering::Relaxed)
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        self.container.path()
    }

    fn write_isolated(&self, index: usize, element: u64, bytes: &[u8], what: &'static str) {
        if let Err(e) = self.container.write_cells(index, element, bytes) {
            self.report_write_error(what, &e);
        }
    }

    fn report_write_error(&self, what: &str, e: &ViscapError) {
        self.write_errors.fetch_add(1, Ordering::Relaxed);
        error!(file = %self.container.path().display(), dataset = what, error = %e,
            "cell write failed; sample data dropped");
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

impl Drop for FastVisFile {
    fn drop(&mut self) {
        // Record how many samples actually landed; readers must not take
        // the preallocated capacity for the logical extent.
        if let Err(e) = self.container.set_num_time(self.ntime) {
            error!(file = %self.container.path().display(), error = %e,
                "failed to record final sample count");
        }
        if let Err(e) = self.container.sync() {
            error!(file = %self.container.path().display(), error = %e,
                "sync on close failed");
        }
        info!(file = %self.container.path().display(), num_time = self.ntime,
            dropped_writes = self.write_errors(), "closed visibility file (raw path)");
    }
}

#[cfg(test)]
#[allow(clippy::cast_precision_loss)]
mod tests {
    use super::*;
    use crate::axes::{Complex32, decode_vec};
    use crate::container::DS_VIS;

    fn axes_2x2() -> (
        BTreeMap<String, String>,
        Vec<FreqChannel>,
        Vec<InputDesc>,
        Vec<Product>,
    ) {
        let mut metadata = BTreeMap::new();
        metadata.insert("weight_type".to_string(), "uniform".to_string());

        let freqs = vec![
            FreqChannel {
                centre: 400.0,
                width: 0.39,
            },
            FreqChannel {
                centre: 400.39,
                width: 0.39,
            },
        ];
        let inputs = vec![InputDesc::new(0, "a"), InputDesc::new(1, "b")];
        let prods = vec![
            Product {
                input_a: 0,
                input_b: 0,
            },
            Product {
                input_a: 0,
                input_b: 1,
            },
            Product {
                input_a: 1,
                input_b: 1,
            },
        ];
        (metadata, freqs, inputs, prods)
    }

    #[test]
    fn test_raw_write_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("raw.vis");
        let (metadata, freqs, inputs, prods) = axes_2x2();

        let mut file =
            FastVisFile::create(&path, &metadata, &freqs, &inputs, &prods, 0, 4).unwrap();

        let idx = file
            .extend_time(TimeSample {
                seq: 7,
                ctime: 123.5,
            })
            .unwrap();
        assert_eq!(idx, 0);

        let vis = vec![
            Complex32::new(1.0, 2.0),
            Complex32::new(3.0, 4.0),
            Complex32::new(5.0, 6.0),
        ];
        let weight = vec![0.5f32; 3];
        let gain_coeff = vec![Complex32::new(1.0, 0.0); 2];
        let gain_exp = vec![1i32, -1];

        // Second frequency of the chunk.
        file.write_sample(
            0,
            1,
            &SamplePayload {
                vis: &vis,
                weight: &weight,
                gain_coeff: &gain_coeff,
                gain_exp: &gain_exp,
                eigen: None,
            },
        )
        .unwrap();
        assert_eq!(file.write_errors(), 0);
        drop(file);

        let reader = Container::open(&path).unwrap();
        assert_eq!(reader.num_time(), 1);

        // (time 0, freq 1) lands at element (0 * 2 + 1) * 3 of vis.
        let vis_idx = reader.dataset_index(DS_VIS).unwrap();
        let raw = reader.read_cells(vis_idx, 3, 3).unwrap();
        assert_eq!(decode_vec::<Complex32>(&raw), vis);

        // Timestamp record landed at index 0.
        let time_idx = reader.dataset_index(DS_TIME).unwrap();
        let raw = reader.read_cells(time_idx, 0, 1).unwrap();
        let t = decode_vec::<TimeSample>(&raw)[0];
        assert_eq!(t.seq, 7);
        assert_eq!(t.ctime, 123.5);
    }

    #[test]
    fn test_num_time_records_actual_not_capacity() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.vis");
        let (metadata, freqs, inputs, prods) = axes_2x2();

        let mut file =
            FastVisFile::create(&path, &metadata, &freqs, &inputs, &prods, 0, 100).unwrap();
        for i in 0..3 {
            file.extend_time(TimeSample {
                seq: i,
                ctime: i as f64,
            })
            .unwrap();
        }
        drop(file);

        let reader = Container::open(&path).unwrap();
        assert_eq!(reader.num_time(), 3);
        assert_eq!(reader.schema().time_capacity, 100);
    }

    #[test]
    fn test_index_violations_are_synchronous() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("strict.vis");
        let (metadata, freqs, inputs, prods) = axes_2x2();

        let mut file =
            FastVisFile::create(&path, &metadata, &freqs, &inputs, &prods, 0, 4).unwrap();
        file.extend_time(TimeSample { seq: 0, ctime: 0.0 }).unwrap();

        let vis = vec![Complex32::default(); 3];
        let weight = vec![0.0f32; 3];
        let gain_coeff = vec![Complex32::default(); 2];
        let gain_exp = vec![0i32; 2];
        let payload = SamplePayload {
            vis: &vis,
            weight: &weight,
            gain_coeff: &gain_coeff,
            gain_exp: &gain_exp,
            eigen: None,
        };

        // Frequency index past the chunk's axis.
        let err = file.write_sample(0, 2, &payload).unwrap_err();
        assert!(err.to_string().contains("beyond dataset"));

        // Time index never extended.
        let err = file.write_sample(1, 0, &payload).unwrap_err();
        assert!(err.to_string().contains("beyond dataset"));

        // Neither counted as an isolated I/O failure.
        assert_eq!(file.write_errors(), 0);
    }

    #[test]
    fn test_capacity_exhaustion_matches_structured_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cap.vis");
        let (metadata, freqs, inputs, prods) = axes_2x2();

        let mut file =
            FastVisFile::create(&path, &metadata, &freqs, &inputs, &prods, 0, 1).unwrap();
        file.extend_time(TimeSample { seq: 0, ctime: 0.0 }).unwrap();

        let err = file
            .extend_time(TimeSample { seq: 1, ctime: 1.0 })
            .unwrap_err();
        assert!(matches!(
            err,
            ViscapError::Io(FileIoError::CapacityExhausted { capacity: 1 })
        ));
    }
}
