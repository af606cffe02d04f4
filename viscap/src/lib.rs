//! # viscap
//!
//! Visibility capture engine for radio-telescope correlator pipelines.
//!
//! viscap is the data-capture backend of a correlator: a continuous stream
//! of cross-correlation samples, produced at fixed cadence by upstream GPU
//! stages, is persisted as structured, growable time-series files without
//! ever stalling the real-time pipeline.
//!
//! **Status**: This crate is in early development. The API is not yet stable.
//!
//! ## Key Properties
//!
//! - Two on-disk-identical write strategies: a safe structured path and a
//!   raw-offset path with one positioned write per cell
//! - Fully preallocated, fixed-layout container files — no late block
//!   allocation on the capture path
//! - A sliding window of concurrently open files tolerates mildly
//!   out-of-order sample arrival while bounding descriptor usage
//! - Advisory lock files scoped to each capture file's lifetime
//! - Per-sample I/O failures on the raw path are isolated, never fatal
//!
//! Positioned I/O makes this crate Unix-only.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::collections::BTreeMap;
//! use viscap::{
//!     BundleConfig, Complex32, FileBundle, FreqChannel, InputDesc, Product,
//!     SamplePayload, TimeSample,
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let freqs = vec![FreqChannel { centre: 800.0, width: 0.4 }];
//! let inputs = vec![InputDesc::new(0, "inp0"), InputDesc::new(1, "inp1")];
//! let prods = vec![
//!     Product { input_a: 0, input_b: 0 },
//!     Product { input_a: 0, input_b: 1 },
//!     Product { input_a: 1, input_b: 1 },
//! ];
//!
//! let mut metadata = BTreeMap::new();
//! metadata.insert("weight_type".to_string(), "inverse_var".to_string());
//!
//! let mut bundle = FileBundle::new(
//!     "./acq_20260805T120000Z",
//!     BundleConfig::new("acq_20260805T120000Z", 0),
//!     metadata,
//!     freqs,
//!     inputs,
//!     prods,
//!     0,
//! )?;
//!
//! let vis = vec![Complex32::new(1.0, 0.0); 3];
//! let weight = vec![1.0f32; 3];
//! let gain_coeff = vec![Complex32::new(1.0, 0.0); 2];
//! let gain_exp = vec![0i32; 2];
//!
//! bundle.add_sample(
//!     TimeSample { seq: 0, ctime: 1_754_395_200.0 },
//!     0,
//!     &SamplePayload {
//!         vis: &vis,
//!         weight: &weight,
//!         gain_coeff: &gain_coeff,
//!         gain_exp: &gain_exp,
//!         eigen: None,
//!     },
//! )?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`FileBundle`] — routes (timestamp, frequency) samples to the right
//!   open file, rolling over and evicting to bound open-file count
//! - [`VisFile`] / [`FastVisFile`] — the two write strategies over one
//!   container format
//! - [`SampleWriter`] — tagged variant selecting a strategy from a
//!   configuration string
//! - [`Container`](container::Container) — the fixed-layout file format
//!   both strategies share
//!
//! ## Modules
//!
//! For lower-level access, the individual modules are also public:
//!
//! - [`bundle`] — sample routing, rollover and eviction
//! - [`file`] — structured write path
//! - [`fast`] — raw-offset write path
//! - [`writer`] — write-strategy selection
//! - [`container`] — fixed-layout container format
//! - [`axes`] — axis records and wire encodings
//! - [`lock`] — advisory lock files
//! - [`error`] — error types

pub mod axes;
pub mod bundle;
pub mod container;
pub mod error;
pub mod fast;
pub mod file;
pub mod lock;
pub mod writer;

// Re-export primary API types at crate root for convenience.
pub use axes::{Complex32, FreqChannel, InputDesc, Product, TimeSample};
pub use bundle::{BundleConfig, FileBundle};
pub use error::{Result, ViscapError};
pub use fast::FastVisFile;
pub use file::{EigenPayload, SamplePayload, VisFile};
pub use lock::LockGuard;
pub use writer::{SampleWriter, WriterKind};
