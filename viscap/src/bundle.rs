//! Routing of a continuous sample stream into a rolling set of files.
//!
//! A [`FileBundle`] owns the capture files of one frequency chunk within
//! one acquisition. Files roll over every `rollover` logical samples, and
//! up to `window_size` of them stay open simultaneously so that samples
//! arriving mildly out of order — different frequency chunks are delivered
//! with independent, loosely-synchronized timing — still find their file.
//! A sample whose window has already been evicted is data loss by policy:
//! it is counted, logged and rejected, never retried, so the real-time
//! pipeline keeps moving.
//!
//! # Window arithmetic
//!
//! Sequence counts advance by a fixed, caller-supplied `seq_stride` per
//! sample frame. The logical sample position is `seq / seq_stride`, its
//! window starts at `logical - logical % rollover`, and each open file
//! covers exactly `rollover` consecutive logical positions. `freq_ind`
//! always indexes the bundle's own ordered frequency list, never a global
//! channel numbering — global channel ids live in the frequency index map
//! of each file.

use std::collections::BTreeMap;
use std::path::PathBuf;

use tracing::{info, warn};

use crate::axes::{FreqChannel, InputDesc, Product, TimeSample};
use crate::container::WEIGHT_TYPE_KEY;
use crate::error::{BundleError, Result, SchemaError};
use crate::file::SamplePayload;
use crate::writer::{SampleWriter, WriterKind};

/// Default number of logical samples per file.
pub const DEFAULT_ROLLOVER: u32 = 1024;

/// Default number of simultaneously open files.
pub const DEFAULT_WINDOW_SIZE: usize = 10;

/// Configuration of a [`FileBundle`].
#[derive(Debug, Clone)]
pub struct BundleConfig {
    /// Acquisition name, recorded in every file's attributes.
    pub acq_name: String,
    /// Identifier of the frequency chunk this bundle writes.
    pub freq_chunk: u32,
    /// Write strategy for every file the bundle opens.
    pub writer: WriterKind,
    /// Logical samples per file before rolling over.
    pub rollover: u32,
    /// Maximum number of simultaneously open files.
    pub window_size: usize,
    /// Sequence counts per sample frame (the correlator cadence).
    pub seq_stride: u64,
}

impl BundleConfig {
    /// A configuration with the default rollover, window size, stride and
    /// write strategy.
    pub fn new(acq_name: impl Into<String>, freq_chunk: u32) -> Self {
        Self {
            acq_name: acq_name.into(),
            freq_chunk,
            writer: WriterKind::default(),
            rollover: DEFAULT_ROLLOVER,
            window_size: DEFAULT_WINDOW_SIZE,
            seq_stride: 1,
        }
    }
}

/// One open file plus the per-file mapping from sequence count to the time
/// index allocated for it.
#[derive(Debug)]
struct Window {
    writer: SampleWriter,
    time_index: BTreeMap<u64, u32>,
}

/// The set of capture files being actively written for one frequency chunk.
///
/// All writes funnel through [`FileBundle::add_sample`]; the bundle opens
/// files on rollover, bounds the open-file count by evicting the oldest
/// window, and drops samples that arrive after their window is gone.
/// Dropping the bundle flushes and closes every open file and removes every
/// lock.
#[derive(Debug)]
pub struct FileBundle {
    root: PathBuf,
    config: BundleConfig,
    metadata: BTreeMap<String, String>,
    freqs: Vec<FreqChannel>,
    inputs: Vec<InputDesc>,
    prods: Vec<Product>,
    num_ev: u32,
    windows: BTreeMap<u64, Window>,
    /// Earliest logical position still writable; advanced on every eviction.
    earliest_acceptable: u64,
    files_created: u64,
    samples_dropped: u64,
}

impl FileBundle {
    /// Creates a bundle writing into `root`.
    ///
    /// The directory must already exist — the bundle will not create it.
    /// `metadata` seeds every file's attribute map and must carry
    /// `weight_type`; the acquisition name and frequency chunk id are added
    /// to it here.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError`] for empty axes or missing weight type and
    /// [`BundleError::InvalidConfig`] for zero rollover, window size or
    /// stride.
    pub fn new(
        root: impl Into<PathBuf>,
        config: BundleConfig,
        mut metadata: BTreeMap<String, String>,
        freqs: Vec<FreqChannel>,
        inputs: Vec<InputDesc>,
        prods: Vec<Product>,
        num_ev: u32,
    ) -> Result<Self> {
        if config.rollover == 0 {
            return Err(BundleError::InvalidConfig {
                reason: "rollover must be at least 1",
            }
            .into());
        }
        if config.window_size == 0 {
            return Err(BundleError::InvalidConfig {
                reason: "window_size must be at least 1",
            }
            .into());
        }
        if config.seq_stride == 0 {
            return Err(BundleError::InvalidConfig {
                reason: "seq_stride must be at least 1",
            }
            .into());
        }
        if freqs.is_empty() {
            return Err(SchemaError::EmptyAxis { axis: "freq" }.into());
        }
        if inputs.is_empty() {
            return Err(SchemaError::EmptyAxis { axis: "input" }.into());
        }
        if prods.is_empty() {
            return Err(SchemaError::EmptyAxis { axis: "prod" }.into());
        }
        if !metadata.contains_key(WEIGHT_TYPE_KEY) {
            return Err(SchemaError::MissingMetadataKey {
                key: WEIGHT_TYPE_KEY,
            }
            .into());
        }

        metadata.insert("acquisition_name".to_string(), config.acq_name.clone());
        metadata.insert("freq_chunk".to_string(), config.freq_chunk.to_string());

        Ok(Self {
            root: root.into(),
            config,
            metadata,
            freqs,
            inputs,
            prods,
            num_ev,
            windows: BTreeMap::new(),
            earliest_acceptable: 0,
            files_created: 0,
            samples_dropped: 0,
        })
    }

    /// Routes one sample to its file, opening and evicting as needed.
    ///
    /// The first sample seen for a (window, sequence) pair extends the
    /// file's time axis; later samples of other frequencies reuse the
    /// recorded index.
    ///
    /// # Errors
    ///
    /// Returns [`BundleError::EvictionDataLoss`] when the sample's window
    /// was already evicted (the sample is dropped and counted), plus
    /// whatever file creation and the write paths can return.
    pub fn add_sample(
        &mut self,
        time: TimeSample,
        freq_ind: u32,
        payload: &SamplePayload<'_>,
    ) -> Result<()> {
        let logical = time.seq / self.config.seq_stride;
        let window = logical - logical % u64::from(self.config.rollover);

        if !self.windows.contains_key(&window) {
            if logical < self.earliest_acceptable {
                return self.reject(time.seq, logical);
            }

            while self.windows.len() >= self.config.window_size {
                self.evict_oldest();
            }
            // Eviction may have slid the watermark past a late window.
            if logical < self.earliest_acceptable {
                return self.reject(time.seq, logical);
            }

            let writer = self.open_file(window)?;
            self.windows.insert(
                window,
                Window {
                    writer,
                    time_index: BTreeMap::new(),
                },
            );
            self.files_created += 1;
        }

        let Some(win) = self.windows.get_mut(&window) else {
            return self.reject(time.seq, logical);
        };

        let index = match win.time_index.get(&time.seq) {
            Some(&i) => i,
            None => {
                let i = win.writer.extend_time(time)?;
                win.time_index.insert(time.seq, i);
                i
            }
        };

        win.writer.write_sample(index, freq_ind, payload)
    }

    /// Number of files currently open.
    pub fn open_files(&self) -> usize {
        self.windows.len()
    }

    /// Total number of files opened over the bundle's lifetime.
    pub fn files_created(&self) -> u64 {
        self.files_created
    }

    /// Number of samples dropped to eviction data loss.
    pub fn samples_dropped(&self) -> u64 {
        self.samples_dropped
    }

    fn open_file(&self, window: u64) -> Result<SampleWriter> {
        let name = format!("{window:08}_{:04}.vis", self.config.freq_chunk);
        let path = self.root.join(name);

        info!(acq = %self.config.acq_name, window, file = %path.display(),
            "opening capture file");

        SampleWriter::create(
            self.config.writer,
            path,
            &self.metadata,
            &self.freqs,
            &self.inputs,
            &self.prods,
            self.num_ev,
            self.config.rollover,
        )
    }

    fn evict_oldest(&mut self) {
        if let Some((start, win)) = self.windows.pop_first() {
            let end = start + u64::from(self.config.rollover);
            self.earliest_acceptable = self.earliest_acceptable.max(end);
            info!(acq = %self.config.acq_name, window = start,
                num_time = win.writer.num_time(), "evicting oldest capture file");
        }
    }

    fn reject(&mut self, seq: u64, logical: u64) -> Result<()> {
        self.samples_dropped += 1;
        warn!(acq = %self.config.acq_name, seq, logical,
            earliest = self.earliest_acceptable, "sample window already evicted; dropping");
        Err(BundleError::EvictionDataLoss {
            seq,
            logical,
            earliest: self.earliest_acceptable,
        }
        .into())
    }
}
