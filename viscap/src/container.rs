//! Fixed-layout container format backing every capture file.
//!
//! Both write paths produce the same container: a self-describing file in
//! which every dataset occupies one contiguous, preallocated extent at a
//! byte offset fixed at creation time. Stable offsets are what make the
//! raw-offset write path possible without introspecting a third-party
//! library, and preallocation means a crash never leaves half-allocated
//! blocks behind.
//!
//! # File Format
//!
//! ```text
//! [0..24)              Superblock: magic, version, schema capacity,
//!                      schema length, data offset
//! [24..24+cap)         Schema block: JSON self-description, zero padded
//! [data_off..size)     Dataset extents, contiguous, 8-byte aligned starts
//! ```
//!
//! The schema block carries the file-level attribute map, the per-dataset
//! attribute maps, axis cardinalities, the preallocated time capacity and
//! the current logical time extent (`num_time`). Only `num_time` ever
//! changes after creation, so in-place header rewrites always fit the
//! reserved capacity.
//!
//! Dataset names keep the hierarchical spelling of the archive convention
//! (`index_map/freq`, `flags/vis_weight`) so downstream tooling sees the
//! same namespace regardless of which write path produced the file.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use memmap2::MmapMut;
use serde::{Deserialize, Serialize};

use crate::axes::{FreqChannel, InputDesc, Product, encode_slice};
use crate::error::{FileIoError, Result, SchemaError};

/// Magic bytes identifying a viscap container file.
const CONTAINER_MAGIC: [u8; 4] = *b"VCAP";

/// Current container format version.
const CONTAINER_VERSION: u32 = 1;

/// Size of the superblock in bytes.
const SUPERBLOCK_SIZE: usize = 24;

/// Alignment of the data region and of each dataset extent.
const DATA_ALIGN: u64 = 8;

/// Slack reserved in the schema block beyond the initial serialization, so
/// the `num_time` field can grow to its widest decimal form in place.
const SCHEMA_SLACK: usize = 512;

/// Chunk size used to zero-fill the file at creation.
const PREALLOC_CHUNK: usize = 1 << 20;

/// Frequency axis index map.
pub const DS_FREQ: &str = "index_map/freq";
/// Input axis index map.
pub const DS_INPUT: &str = "index_map/input";
/// Product axis index map.
pub const DS_PROD: &str = "index_map/prod";
/// Eigenvector axis index map (present only when the file has eigen data).
pub const DS_EV: &str = "index_map/ev";
/// Time axis index map.
pub const DS_TIME: &str = "index_map/time";
/// Visibility dataset.
pub const DS_VIS: &str = "vis";
/// Visibility weight dataset.
pub const DS_WEIGHT: &str = "flags/vis_weight";
/// Gain coefficient dataset.
pub const DS_GAIN_COEFF: &str = "gain_coeff";
/// Gain exponent dataset.
pub const DS_GAIN_EXP: &str = "gain_exp";
/// Eigenvalue dataset.
pub const DS_EVAL: &str = "eval";
/// Eigenvector dataset.
pub const DS_EVEC: &str = "evec";
/// Eigen-decomposition RMS residual dataset.
pub const DS_ERMS: &str = "erms";

/// Metadata key whose value is duplicated onto the weight dataset.
pub const WEIGHT_TYPE_KEY: &str = "weight_type";

/// Element type of a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dtype {
    /// Frequency channel record (2 × f64).
    Freq,
    /// Time sample record (u64 + f64).
    Time,
    /// Input record (u16 + 32-byte label).
    Input,
    /// Product record (2 × u16).
    Prod,
    /// Complex sample (2 × f32).
    Complex32,
    /// Plain f32.
    Float32,
    /// Plain i32.
    Int32,
    /// Plain u32.
    Uint32,
}

impl Dtype {
    /// Encoded element size in bytes.
    pub fn elem_size(self) -> u64 {
        match self {
            Dtype::Freq | Dtype::Time => 16,
            Dtype::Input => 34,
            Dtype::Prod => 4,
            Dtype::Complex32 => 8,
            Dtype::Float32 | Dtype::Int32 | Dtype::Uint32 => 4,
        }
    }
}

/// Physical layout of the dataset extents.
///
/// Version 1 files are always contiguous; the field exists so the raw write
/// path can probe the capability instead of assuming it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayoutKind {
    /// Every dataset is one contiguous extent at a stable offset.
    Contiguous,
}

/// One dataset's entry in the schema block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetDef {
    /// Dataset name, hierarchical spelling.
    pub name: String,
    /// Axis names indexing this dataset, outermost first.
    pub axes: Vec<String>,
    /// Element type.
    pub dtype: Dtype,
    /// Dataset-level attributes.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
    /// Byte offset of the extent from the start of the file.
    pub offset: u64,
    /// Preallocated element capacity of the extent.
    pub capacity: u64,
}

impl DatasetDef {
    fn extent_bytes(&self) -> u64 {
        self.capacity * self.dtype.elem_size()
    }
}

/// Cardinality of each fixed axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxisSizes {
    /// Number of frequency channels.
    pub freq: u32,
    /// Number of correlator inputs.
    pub input: u32,
    /// Number of correlation products.
    pub prod: u32,
    /// Number of eigenvectors (0 disables the eigen datasets).
    pub ev: u32,
}

/// The schema block: a capture file's complete self-description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileSchema {
    /// Container format version.
    pub version: u32,
    /// File-level attributes supplied by the caller at creation.
    pub attributes: BTreeMap<String, String>,
    /// Fixed axis cardinalities.
    pub axes: AxisSizes,
    /// Current logical extent of the time axis.
    pub num_time: u32,
    /// Preallocated time capacity.
    pub time_capacity: u32,
    /// Physical layout of the dataset extents.
    pub layout: LayoutKind,
    /// Dataset table in file order.
    pub datasets: Vec<DatasetDef>,
}

impl FileSchema {
    /// Total file size implied by the dataset table.
    fn file_size(&self) -> u64 {
        self.datasets
            .iter()
            .map(|d| d.offset + d.extent_bytes())
            .max()
            .unwrap_or(0)
    }
}

/// Arguments for creating a new container.
#[derive(Debug)]
pub struct CreateParams<'a> {
    /// File-level attributes; must include [`WEIGHT_TYPE_KEY`].
    pub metadata: &'a BTreeMap<String, String>,
    /// Ordered frequency channels of this file's chunk.
    pub freqs: &'a [FreqChannel],
    /// Ordered correlator inputs.
    pub inputs: &'a [InputDesc],
    /// Ordered correlation products.
    pub prods: &'a [Product],
    /// Number of eigenvectors; 0 omits all eigen datasets.
    pub num_ev: u32,
    /// Number of time samples to preallocate.
    pub time_capacity: u32,
}

/// A capture container: the open file plus its parsed schema block.
///
/// Cell access is bounds-checked against the dataset table and performed
/// with positioned I/O, so `&self` suffices for reads and disjoint-cell
/// writers can share a handle across threads.
#[derive(Debug)]
pub struct Container {
    file: File,
    path: PathBuf,
    schema: FileSchema,
    schema_cap: u32,
}

impl Container {
    /// Creates a new container file, preallocating every extent.
    ///
    /// The whole file is zero-filled in chunks so the filesystem assigns
    /// blocks up front; late allocation during capture is what the raw
    /// write path must never hit. The fixed axis index maps are written
    /// before this returns, leaving only time-indexed cells to fill.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError`] if a required axis is empty or the metadata
    /// lacks the weight-type key, and [`FileIoError`] on any create or
    /// write failure.
    pub fn create<P: AsRef<Path>>(path: P, params: &CreateParams<'_>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        validate_params(params)?;
        let (schema, schema_cap) = build_schema(params)?;
        let file_size = schema.file_size();

        let file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| FileIoError::Create {
                path: path.display().to_string(),
                source: e,
            })?;

        // Zero-fill the full extent; also serves as the preallocation.
        let zeros = vec![0u8; PREALLOC_CHUNK];
        let mut written = 0u64;
        while written < file_size {
            #[allow(clippy::cast_possible_truncation)] // bounded by PREALLOC_CHUNK
            let n = (file_size - written).min(PREALLOC_CHUNK as u64) as usize;
            file.write_all_at(&zeros[..n], written)
                .map_err(|e| FileIoError::Create {
                    path: path.display().to_string(),
                    source: e,
                })?;
            written += n as u64;
        }

        let container = Self {
            file,
            path,
            schema,
            schema_cap,
        };

        container.write_superblock()?;
        container.write_schema_block()?;
        container.write_index_maps(params)?;

        Ok(container)
    }

    /// Opens an existing container read-only and validates it.
    ///
    /// # Errors
    ///
    /// Returns [`FileIoError::Corrupted`] if the superblock or schema block
    /// is invalid, or the file is shorter than its dataset table claims.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let path_str = path.display().to_string();

        let file = OpenOptions::new()
            .read(true)
            .open(&path)
            .map_err(|e| FileIoError::Open {
                path: path_str.clone(),
                source: e,
            })?;

        let actual_size = file
            .metadata()
            .map_err(|e| FileIoError::Open {
                path: path_str.clone(),
                source: e,
            })?
            .len();

        let mut superblock = [0u8; SUPERBLOCK_SIZE];
        if actual_size < SUPERBLOCK_SIZE as u64 {
            return Err(FileIoError::Corrupted {
                path: path_str,
                reason: format!("file too small: {actual_size} bytes"),
            }
            .into());
        }
        file.read_exact_at(&mut superblock, 0)
            .map_err(|e| FileIoError::Read {
                path: path_str.clone(),
                offset: 0,
                source: e,
            })?;

        if superblock[0..4] != CONTAINER_MAGIC {
            return Err(FileIoError::Corrupted {
                path: path_str,
                reason: format!(
                    "invalid magic bytes: expected {:?}, found {:?}",
                    CONTAINER_MAGIC,
                    &superblock[0..4]
                ),
            }
            .into());
        }

        let version = u32::from_le_bytes(superblock[4..8].try_into().unwrap());
        if version != CONTAINER_VERSION {
            return Err(FileIoError::Corrupted {
                path: path_str,
                reason: format!(
                    "unsupported version: expected {CONTAINER_VERSION}, found {version}"
                ),
            }
            .into());
        }

        let schema_cap = u32::from_le_bytes(superblock[8..12].try_into().unwrap());
        let schema_len = u32::from_le_bytes(superblock[12..16].try_into().unwrap());
        if schema_len > schema_cap
            || (SUPERBLOCK_SIZE as u64 + u64::from(schema_cap)) > actual_size
        {
            return Err(FileIoError::Corrupted {
                path: path_str,
                reason: format!(
                    "schema block length {schema_len} exceeds capacity {schema_cap}"
                ),
            }
            .into());
        }

        let mut schema_buf = vec![0u8; schema_len as usize];
        file.read_exact_at(&mut schema_buf, SUPERBLOCK_SIZE as u64)
            .map_err(|e| FileIoError::Read {
                path: path_str.clone(),
                offset: SUPERBLOCK_SIZE as u64,
                source: e,
            })?;

        let schema: FileSchema =
            serde_json::from_slice(&schema_buf).map_err(|e| FileIoError::SchemaBlock {
                path: path_str.clone(),
                source: e,
            })?;

        let file_size = schema.file_size();
        if file_size > actual_size {
            return Err(FileIoError::Corrupted {
                path: path_str,
                reason: format!(
                    "dataset table needs {file_size} bytes but file has {actual_size}"
                ),
            }
            .into());
        }

        Ok(Self {
            file,
            path,
            schema,
            schema_cap,
        })
    }

    /// The parsed schema block.
    pub fn schema(&self) -> &FileSchema {
        &self.schema
    }

    /// File-level attributes.
    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.schema.attributes
    }

    /// Current logical extent of the time axis.
    pub fn num_time(&self) -> u32 {
        self.schema.num_time
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Index of a dataset in the schema table.
    pub fn dataset_index(&self, name: &str) -> Option<usize> {
        self.schema.datasets.iter().position(|d| d.name == name)
    }

    /// A dataset's schema entry.
    pub fn dataset(&self, index: usize) -> &DatasetDef {
        &self.schema.datasets[index]
    }

    /// Whether every dataset is one contiguous extent at a stable offset.
    ///
    /// The raw write path refuses to engage unless this holds.
    pub fn is_contiguous(&self) -> bool {
        matches!(self.schema.layout, LayoutKind::Contiguous)
            && self.schema.datasets.iter().all(|d| d.offset >= SUPERBLOCK_SIZE as u64)
    }

    /// Resolves a cell access to an absolute byte range, bounds-checked
    /// against the dataset's preallocated extent.
    #[allow(clippy::cast_possible_truncation)] // cell ranges are far below usize::MAX
    pub(crate) fn byte_range(&self, index: usize, element: u64, count: u64) -> Result<(u64, usize)> {
        let def = &self.schema.datasets[index];
        if element + count > def.capacity {
            return Err(FileIoError::OutOfBounds {
                dataset: def.name.clone(),
                element,
                count,
                capacity: def.capacity,
            }
            .into());
        }
        let elem_size = def.dtype.elem_size();
        Ok((def.offset + element * elem_size, (count * elem_size) as usize))
    }

    /// Writes encoded cells with positioned I/O.
    ///
    /// `write_all_at` retries interrupted syscalls and short writes; any
    /// other failure surfaces as [`FileIoError::Write`].
    pub fn write_cells(&self, index: usize, element: u64, bytes: &[u8]) -> Result<()> {
        let elem_size = self.schema.datasets[index].dtype.elem_size();
        debug_assert_eq!(bytes.len() as u64 % elem_size, 0);
        let (offset, len) = self.byte_range(index, element, bytes.len() as u64 / elem_size)?;
        debug_assert_eq!(len, bytes.len());

        self.file
            .write_all_at(bytes, offset)
            .map_err(|e| FileIoError::Write {
                path: self.path.display().to_string(),
                offset,
                source: e,
            })?;
        Ok(())
    }

    /// Reads `count` elements starting at `element`.
    pub fn read_cells(&self, index: usize, element: u64, count: u64) -> Result<Vec<u8>> {
        let (offset, len) = self.byte_range(index, element, count)?;
        let mut buf = vec![0u8; len];
        self.file
            .read_exact_at(&mut buf, offset)
            .map_err(|e| FileIoError::Read {
                path: self.path.display().to_string(),
                offset,
                source: e,
            })?;
        Ok(buf)
    }

    /// Updates the logical time extent and rewrites the schema block.
    pub fn set_num_time(&mut self, num_time: u32) -> Result<()> {
        self.schema.num_time = num_time;
        self.write_schema_block()
    }

    /// Syncs file contents to disk.
    pub fn sync(&self) -> Result<()> {
        self.file.sync_all().map_err(|e| {
            FileIoError::Sync {
                path: self.path.display().to_string(),
                source: e,
            }
            .into()
        })
    }

    /// Maps the container for in-memory cell writes (the structured path).
    pub fn into_mapped(self) -> Result<MappedContainer> {
        // SAFETY: the container holds the sole writable handle to a file it
        // created at its final size; no other mapping of it exists in this
        // process and the single-writer contract forbids external mutation.
        let mmap = unsafe {
            MmapMut::map_mut(&self.file).map_err(|e| FileIoError::Map {
                path: self.path.display().to_string(),
                source: e,
            })?
        };
        Ok(MappedContainer { inner: self, mmap })
    }

    fn write_superblock(&self) -> Result<()> {
        let mut block = [0u8; SUPERBLOCK_SIZE];
        block[0..4].copy_from_slice(&CONTAINER_MAGIC);
        block[4..8].copy_from_slice(&CONTAINER_VERSION.to_le_bytes());
        block[8..12].copy_from_slice(&self.schema_cap.to_le_bytes());
        // schema length is filled in by write_schema_block
        let data_offset = self.schema.datasets.first().map_or(0, |d| d.offset);
        block[16..24].copy_from_slice(&data_offset.to_le_bytes());

        self.file
            .write_all_at(&block, 0)
            .map_err(|e| FileIoError::Write {
                path: self.path.display().to_string(),
                offset: 0,
                source: e,
            })?;
        Ok(())
    }

    #[allow(clippy::cast_possible_truncation)] // length bounded by schema_cap
    fn write_schema_block(&self) -> Result<()> {
        let json = serde_json::to_vec(&self.schema).map_err(|e| FileIoError::SchemaBlock {
            path: self.path.display().to_string(),
            source: e,
        })?;
        if json.len() > self.schema_cap as usize {
            return Err(FileIoError::Corrupted {
                path: self.path.display().to_string(),
                reason: format!(
                    "schema block grew past its reserved capacity ({} > {})",
                    json.len(),
                    self.schema_cap
                ),
            }
            .into());
        }

        self.file
            .write_all_at(&json, SUPERBLOCK_SIZE as u64)
            .map_err(|e| FileIoError::Write {
                path: self.path.display().to_string(),
                offset: SUPERBLOCK_SIZE as u64,
                source: e,
            })?;

        let len = (json.len() as u32).to_le_bytes();
        self.file
            .write_all_at(&len, 12)
            .map_err(|e| FileIoError::Write {
                path: self.path.display().to_string(),
                offset: 12,
                source: e,
            })?;
        Ok(())
    }

    fn write_index_maps(&self, params: &CreateParams<'_>) -> Result<()> {
        // index_map/time stays zeroed; num_time marks the logical extent.
        let mut scratch = Vec::new();
        for index in 0..self.schema.datasets.len() {
            scratch.clear();
            match self.schema.datasets[index].name.as_str() {
                DS_FREQ => encode_slice(params.freqs, &mut scratch),
                DS_INPUT => encode_slice(params.inputs, &mut scratch),
                DS_PROD => encode_slice(params.prods, &mut scratch),
                DS_EV => {
                    let ev: Vec<u32> = (0..params.num_ev).collect();
                    encode_slice(&ev, &mut scratch);
                }
                _ => continue,
            }
            self.write_cells(index, 0, &scratch)?;
        }
        Ok(())
    }
}

/// A container mapped into memory for the structured write path.
///
/// Cell writes are bounds-checked slice copies into the mapping; the page
/// cache absorbs them and [`MappedContainer::flush`] (or drop of the file
/// wrapper) syncs to disk.
#[derive(Debug)]
pub struct MappedContainer {
    inner: Container,
    mmap: MmapMut,
}

impl MappedContainer {
    /// The parsed schema block.
    pub fn schema(&self) -> &FileSchema {
        self.inner.schema()
    }

    /// Current logical extent of the time axis.
    pub fn num_time(&self) -> u32 {
        self.inner.num_time()
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        self.inner.path()
    }

    /// Index of a dataset in the schema table.
    pub fn dataset_index(&self, name: &str) -> Option<usize> {
        self.inner.dataset_index(name)
    }

    /// Writes encoded cells into the mapping.
    pub fn write_cells(&mut self, index: usize, element: u64, bytes: &[u8]) -> Result<()> {
        let elem_size = self.inner.schema.datasets[index].dtype.elem_size();
        debug_assert_eq!(bytes.len() as u64 % elem_size, 0);
        let (offset, len) = self
            .inner
            .byte_range(index, element, bytes.len() as u64 / elem_size)?;
        #[allow(clippy::cast_possible_truncation)] // the whole file is mapped
        let offset = offset as usize;
        self.mmap[offset..offset + len].copy_from_slice(bytes);
        Ok(())
    }

    /// Updates the logical time extent, rewriting the schema block in the
    /// mapping.
    #[allow(clippy::cast_possible_truncation)] // length bounded by schema_cap
    pub fn set_num_time(&mut self, num_time: u32) -> Result<()> {
        self.inner.schema.num_time = num_time;

        let json =
            serde_json::to_vec(&self.inner.schema).map_err(|e| FileIoError::SchemaBlock {
                path: self.inner.path.display().to_string(),
                source: e,
            })?;
        if json.len() > self.inner.schema_cap as usize {
            return Err(FileIoError::Corrupted {
                path: self.inner.path.display().to_string(),
                reason: format!(
                    "schema block grew past its reserved capacity ({} > {})",
                    json.len(),
                    self.inner.schema_cap
                ),
            }
            .into());
        }

        self.mmap[SUPERBLOCK_SIZE..SUPERBLOCK_SIZE + json.len()].copy_from_slice(&json);
        self.mmap[12..16].copy_from_slice(&(json.len() as u32).to_le_bytes());
        Ok(())
    }

    /// Flushes the mapping to disk.
    pub fn flush(&self) -> Result<()> {
        self.mmap.flush().map_err(|e| {
            FileIoError::Sync {
                path: self.inner.path.display().to_string(),
                source: e,
            }
            .into()
        })
    }
}

fn validate_params(params: &CreateParams<'_>) -> Result<()> {
    if params.freqs.is_empty() {
        return Err(SchemaError::EmptyAxis { axis: "freq" }.into());
    }
    if params.inputs.is_empty() {
        return Err(SchemaError::EmptyAxis { axis: "input" }.into());
    }
    if params.prods.is_empty() {
        return Err(SchemaError::EmptyAxis { axis: "prod" }.into());
    }
    if params.time_capacity == 0 {
        return Err(SchemaError::EmptyAxis { axis: "time" }.into());
    }
    if !params.metadata.contains_key(WEIGHT_TYPE_KEY) {
        return Err(SchemaError::MissingMetadataKey {
            key: WEIGHT_TYPE_KEY,
        }
        .into());
    }
    Ok(())
}

/// Builds the schema block and reserves its on-disk capacity.
///
/// Offsets are assigned in two passes: the dataset table is serialized once
/// with zero offsets to size the schema block, then laid out for real after
/// the data offset is known.
#[allow(clippy::cast_possible_truncation)] // axis counts and block sizes fit u32
fn build_schema(params: &CreateParams<'_>) -> Result<(FileSchema, u32)> {
    let axes = AxisSizes {
        freq: params.freqs.len() as u32,
        input: params.inputs.len() as u32,
        prod: params.prods.len() as u32,
        ev: params.num_ev,
    };

    let mut schema = FileSchema {
        version: CONTAINER_VERSION,
        attributes: params.metadata.clone(),
        axes,
        num_time: 0,
        time_capacity: params.time_capacity,
        layout: LayoutKind::Contiguous,
        datasets: dataset_table(axes, params.time_capacity, params.metadata),
    };

    let estimate = serde_json::to_vec(&schema)
        .map_err(|e| FileIoError::SchemaBlock {
            path: String::new(),
            source: e,
        })?
        .len();
    let schema_cap = (estimate + SCHEMA_SLACK).next_multiple_of(4096) as u32;

    let mut offset =
        (SUPERBLOCK_SIZE as u64 + u64::from(schema_cap)).next_multiple_of(4096);
    for ds in &mut schema.datasets {
        ds.offset = offset;
        offset = (offset + ds.extent_bytes()).next_multiple_of(DATA_ALIGN);
    }

    Ok((schema, schema_cap))
}

fn dataset_table(
    axes: AxisSizes,
    time_capacity: u32,
    metadata: &BTreeMap<String, String>,
) -> Vec<DatasetDef> {
    let t = u64::from(time_capacity);
    let f = u64::from(axes.freq);
    let i = u64::from(axes.input);
    let p = u64::from(axes.prod);
    let e = u64::from(axes.ev);

    let def = |name: &str, ax: &[&str], dtype: Dtype, capacity: u64| DatasetDef {
        name: name.to_string(),
        axes: ax.iter().map(|s| (*s).to_string()).collect(),
        dtype,
        attributes: BTreeMap::new(),
        offset: 0,
        capacity,
    };

    let mut table = vec![
        def(DS_FREQ, &["freq"], Dtype::Freq, f),
        def(DS_INPUT, &["input"], Dtype::Input, i),
        def(DS_PROD, &["prod"], Dtype::Prod, p),
    ];
    if e > 0 {
        table.push(def(DS_EV, &["ev"], Dtype::Uint32, e));
    }
    table.push(def(DS_TIME, &["time"], Dtype::Time, t));

    table.push(def(DS_VIS, &["time", "freq", "prod"], Dtype::Complex32, t * f * p));

    let mut weight = def(
        DS_WEIGHT,
        &["time", "freq", "prod"],
        Dtype::Float32,
        t * f * p,
    );
    // Duplicate of the file-level weight_type, where archive readers expect it.
    weight.attributes.insert(
        "type".to_string(),
        metadata.get(WEIGHT_TYPE_KEY).cloned().unwrap_or_default(),
    );
    table.push(weight);

    table.push(def(
        DS_GAIN_COEFF,
        &["time", "freq", "input"],
        Dtype::Complex32,
        t * f * i,
    ));
    table.push(def(DS_GAIN_EXP, &["time", "input"], Dtype::Int32, t * i));

    if e > 0 {
        table.push(def(DS_EVAL, &["time", "freq", "ev"], Dtype::Float32, t * f * e));
        table.push(def(
            DS_EVEC,
            &["time", "freq", "ev", "input"],
            Dtype::Complex32,
            t * f * e * i,
        ));
        table.push(def(DS_ERMS, &["time", "freq"], Dtype::Float32, t * f));
    }

    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::axes::{Complex32, decode_vec};

    fn test_params() -> (
        BTreeMap<String, String>,
        Vec<FreqChannel>,
        Vec<InputDesc>,
        Vec<Product>,
    ) {
        let mut metadata = BTreeMap::new();
        metadata.insert("weight_type".to_string(), "inverse_var".to_string());
        metadata.insert("instrument_name".to_string(), "pathfinder".to_string());

        let freqs = vec![
            FreqChannel {
                centre: 800.0,
                width: 0.4,
            },
            FreqChannel {
                centre: 800.4,
                width: 0.4,
            },
        ];
        let inputs = vec![InputDesc::new(0, "inp0"), InputDesc::new(1, "inp1")];
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
    fn test_layout_offsets_are_aligned_and_disjoint() {
        let (metadata, freqs, inputs, prods) = test_params();
        let params = CreateParams {
            metadata: &metadata,
            freqs: &freqs,
            inputs: &inputs,
            prods: &prods,
            num_ev: 2,
            time_capacity: 16,
        };

        let (schema, cap) = build_schema(&params).unwrap();
        assert_eq!(cap % 4096, 0);

        let mut prev_end = SUPERBLOCK_SIZE as u64 + u64::from(cap);
        for ds in &schema.datasets {
            assert_eq!(ds.offset % DATA_ALIGN, 0, "{} misaligned", ds.name);
            assert!(ds.offset >= prev_end, "{} overlaps its predecessor", ds.name);
            prev_end = ds.offset + ds.extent_bytes();
        }

        // evec capacity is time * freq * ev * input
        let evec = schema.datasets.iter().find(|d| d.name == DS_EVEC).unwrap();
        assert_eq!(evec.capacity, 16 * 2 * 2 * 2);
    }

    #[test]
    fn test_ev_datasets_omitted_without_eigenvectors() {
        let (metadata, freqs, inputs, prods) = test_params();
        let params = CreateParams {
            metadata: &metadata,
            freqs: &freqs,
            inputs: &inputs,
            prods: &prods,
            num_ev: 0,
            time_capacity: 4,
        };

        let (schema, _) = build_schema(&params).unwrap();
        let names: Vec<&str> = schema.datasets.iter().map(|d| d.name.as_str()).collect();
        assert!(!names.contains(&DS_EV));
        assert!(!names.contains(&DS_EVAL));
        assert!(!names.contains(&DS_EVEC));
        assert!(!names.contains(&DS_ERMS));
        assert!(names.contains(&DS_VIS));
        assert!(names.contains(&DS_WEIGHT));
    }

    #[test]
    fn test_create_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.vis");
        let (metadata, freqs, inputs, prods) = test_params();

        let params = CreateParams {
            metadata: &metadata,
            freqs: &freqs,
            inputs: &inputs,
            prods: &prods,
            num_ev: 0,
            time_capacity: 8,
        };

        let container = Container::create(&path, &params).unwrap();
        assert_eq!(container.num_time(), 0);
        assert!(container.is_contiguous());
        drop(container);

        let reopened = Container::open(&path).unwrap();
        assert_eq!(reopened.schema().time_capacity, 8);
        assert_eq!(reopened.schema().axes.prod, 3);
        assert_eq!(
            reopened.attributes().get("instrument_name").unwrap(),
            "pathfinder"
        );

        // Axis index maps round-trip.
        let idx = reopened.dataset_index(DS_FREQ).unwrap();
        let raw = reopened.read_cells(idx, 0, 2).unwrap();
        assert_eq!(decode_vec::<FreqChannel>(&raw), freqs);

        let idx = reopened.dataset_index(DS_INPUT).unwrap();
        let raw = reopened.read_cells(idx, 0, 2).unwrap();
        assert_eq!(decode_vec::<InputDesc>(&raw)[1].label(), "inp1");
    }

    #[test]
    fn test_weight_dataset_carries_type_attribute() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attr.vis");
        let (metadata, freqs, inputs, prods) = test_params();

        let params = CreateParams {
            metadata: &metadata,
            freqs: &freqs,
            inputs: &inputs,
            prods: &prods,
            num_ev: 0,
            time_capacity: 4,
        };

        let container = Container::create(&path, &params).unwrap();
        let idx = container.dataset_index(DS_WEIGHT).unwrap();
        assert_eq!(
            container.dataset(idx).attributes.get("type").unwrap(),
            "inverse_var"
        );
    }

    #[test]
    fn test_out_of_bounds_write_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("oob.vis");
        let (metadata, freqs, inputs, prods) = test_params();

        let params = CreateParams {
            metadata: &metadata,
            freqs: &freqs,
            inputs: &inputs,
            prods: &prods,
            num_ev: 0,
            time_capacity: 2,
        };

        let container = Container::create(&path, &params).unwrap();
        let vis_idx = container.dataset_index(DS_VIS).unwrap();
        let capacity = container.dataset(vis_idx).capacity;

        let one_cell = vec![0u8; 8];
        let err = container
            .write_cells(vis_idx, capacity, &one_cell)
            .unwrap_err();
        assert!(err.to_string().contains("beyond dataset"));
    }

    #[test]
    fn test_num_time_rewrite_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ntime.vis");
        let (metadata, freqs, inputs, prods) = test_params();

        let params = CreateParams {
            metadata: &metadata,
            freqs: &freqs,
            inputs: &inputs,
            prods: &prods,
            num_ev: 0,
            time_capacity: 8,
        };

        let mut container = Container::create(&path, &params).unwrap();
        container.set_num_time(5).unwrap();
        container.sync().unwrap();
        drop(container);

        let reopened = Container::open(&path).unwrap();
        assert_eq!(reopened.num_time(), 5);
        assert_eq!(reopened.schema().time_capacity, 8);
    }

    #[test]
    fn test_mapped_writes_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mapped.vis");
        let (metadata, freqs, inputs, prods) = test_params();

        let params = CreateParams {
            metadata: &metadata,
            freqs: &freqs,
            inputs: &inputs,
            prods: &prods,
            num_ev: 0,
            time_capacity: 4,
        };

        let mut mapped = Container::create(&path, &params).unwrap().into_mapped().unwrap();
        let vis_idx = mapped.dataset_index(DS_VIS).unwrap();

        let cells = vec![
            Complex32::new(1.0, -1.0),
            Complex32::new(2.0, -2.0),
            Complex32::new(3.0, -3.0),
        ];
        let mut buf = Vec::new();
        encode_slice(&cells, &mut buf);
        mapped.write_cells(vis_idx, 0, &buf).unwrap();
        mapped.set_num_time(1).unwrap();
        mapped.flush().unwrap();
        drop(mapped);

        let reopened = Container::open(&path).unwrap();
        assert_eq!(reopened.num_time(), 1);
        let raw = reopened
            .read_cells(reopened.dataset_index(DS_VIS).unwrap(), 0, 3)
            .unwrap();
        assert_eq!(decode_vec::<Complex32>(&raw), cells);
    }

    #[test]
    fn test_open_rejects_foreign_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("foreign.vis");
        std::fs::write(&path, b"not a capture file, definitely").unwrap();

        let err = Container::open(&path).unwrap_err();
        assert!(err.to_string().contains("invalid magic bytes"));
    }

    #[test]
    fn test_empty_axis_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.vis");
        let (metadata, freqs, inputs, _) = test_params();

        let params = CreateParams {
            metadata: &metadata,
            freqs: &freqs,
            inputs: &inputs,
            prods: &[],
            num_ev: 0,
            time_capacity: 4,
        };

        let err = Container::create(&path, &params).unwrap_err();
        assert!(matches!(
            err,
            crate::error::ViscapError::Schema(SchemaError::EmptyAxis { axis: "prod" })
        ));
        assert!(!path.exists());
    }
}
