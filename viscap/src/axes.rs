//! Fixed axis record types and their on-disk encodings.
//!
//! A capture file is indexed by four fixed axes (frequency, input, product
//! and optionally eigenvector) plus one growing time axis. The records here
//! describe single entries of those axes and the complex visibility samples
//! stored in the data cells.
//!
//! All records are packed little-endian with explicit byte-level
//! serialization — the input record is 34 bytes, so `repr(C)` casts are not
//! an option, and explicit encoding keeps the wire layout bit-exact across
//! platforms:
//!
//! | record        | layout                          | size |
//! |---------------|---------------------------------|------|
//! | `FreqChannel` | centre f64, width f64           | 16   |
//! | `TimeSample`  | seq u64, ctime f64              | 16   |
//! | `InputDesc`   | chan_id u16, label `[u8; 32]`   | 34   |
//! | `Product`     | input_a u16, input_b u16        | 4    |
//! | `Complex32`   | re f32, im f32                  | 8    |

/// Byte width of the fixed input label field.
pub const INPUT_LABEL_LEN: usize = 32;

/// A record with a fixed little-endian wire encoding.
///
/// Implemented by every axis record and cell scalar the container stores.
/// Encoding appends exactly [`Wire::WIRE_SIZE`] bytes; decoding reads the
/// same from the front of the buffer.
pub trait Wire: Sized {
    /// Encoded size in bytes.
    const WIRE_SIZE: usize;

    /// Appends the encoded record to `out`.
    fn encode_into(&self, out: &mut Vec<u8>);

    /// Decodes one record from the front of `buf`.
    ///
    /// # Panics
    ///
    /// Panics if `buf` is shorter than [`Wire::WIRE_SIZE`]. Callers slice
    /// buffers they have already bounds-checked against the dataset extent.
    fn decode(buf: &[u8]) -> Self;
}

/// One spectral channel: centre frequency and channel width, both in MHz.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FreqChannel {
    /// Centre frequency of the channel.
    pub centre: f64,
    /// Width of the channel.
    pub width: f64,
}

impl Wire for FreqChannel {
    const WIRE_SIZE: usize = 16;

    fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.centre.to_le_bytes());
        out.extend_from_slice(&self.width.to_le_bytes());
    }

    fn decode(buf: &[u8]) -> Self {
        Self {
            centre: f64::from_le_bytes(buf[0..8].try_into().unwrap()),
            width: f64::from_le_bytes(buf[8..16].try_into().unwrap()),
        }
    }
}

/// One row of the time axis: a correlator sequence count and the matching
/// wall-clock time in Unix seconds.
///
/// The sequence count is the authoritative ordering; the wall-clock value is
/// informational and plays no part in index allocation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeSample {
    /// Monotonic sequence count assigned by the correlator.
    pub seq: u64,
    /// Wall-clock time of the sample in Unix seconds.
    pub ctime: f64,
}

impl Wire for TimeSample {
    const WIRE_SIZE: usize = 16;

    fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.seq.to_le_bytes());
        out.extend_from_slice(&self.ctime.to_le_bytes());
    }

    fn decode(buf: &[u8]) -> Self {
        Self {
            seq: u64::from_le_bytes(buf[0..8].try_into().unwrap()),
            ctime: f64::from_le_bytes(buf[8..16].try_into().unwrap()),
        }
    }
}

/// One correlator input: channel id plus a fixed 32-byte label.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InputDesc {
    /// Hardware channel id of the input.
    pub chan_id: u16,
    label: [u8; INPUT_LABEL_LEN],
}

impl InputDesc {
    /// Creates an input record, truncating or zero-padding `label` to the
    /// fixed 32-byte field.
    pub fn new(chan_id: u16, label: &str) -> Self {
        let mut buf = [0u8; INPUT_LABEL_LEN];
        let bytes = label.as_bytes();
        let n = bytes.len().min(INPUT_LABEL_LEN);
        buf[..n].copy_from_slice(&bytes[..n]);
        Self { chan_id, label: buf }
    }

    /// The label with trailing NUL padding stripped.
    pub fn label(&self) -> &str {
        let end = self
            .label
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(INPUT_LABEL_LEN);
        std::str::from_utf8(&self.label[..end]).unwrap_or("")
    }
}

impl Wire for InputDesc {
    const WIRE_SIZE: usize = 2 + INPUT_LABEL_LEN;

    fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.chan_id.to_le_bytes());
        out.extend_from_slice(&self.label);
    }

    fn decode(buf: &[u8]) -> Self {
        let mut label = [0u8; INPUT_LABEL_LEN];
        label.copy_from_slice(&buf[2..2 + INPUT_LABEL_LEN]);
        Self {
            chan_id: u16::from_le_bytes(buf[0..2].try_into().unwrap()),
            label,
        }
    }
}

/// One correlation product: the pair of input indices it correlates.
///
/// Autocorrelations have `input_a == input_b`. For a full upper triangle
/// over `n` inputs the product list has `n * (n + 1) / 2` entries, but the
/// engine accepts any caller-supplied list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Product {
    /// First input of the pair.
    pub input_a: u16,
    /// Second input of the pair.
    pub input_b: u16,
}

impl Wire for Product {
    const WIRE_SIZE: usize = 4;

    fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.input_a.to_le_bytes());
        out.extend_from_slice(&self.input_b.to_le_bytes());
    }

    fn decode(buf: &[u8]) -> Self {
        Self {
            input_a: u16::from_le_bytes(buf[0..2].try_into().unwrap()),
            input_b: u16::from_le_bytes(buf[2..4].try_into().unwrap()),
        }
    }
}

/// A single-precision complex visibility or gain value.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Complex32 {
    /// Real part.
    pub re: f32,
    /// Imaginary part.
    pub im: f32,
}

impl Complex32 {
    /// Creates a complex value.
    pub fn new(re: f32, im: f32) -> Self {
        Self { re, im }
    }
}

impl Wire for Complex32 {
    const WIRE_SIZE: usize = 8;

    fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.re.to_le_bytes());
        out.extend_from_slice(&self.im.to_le_bytes());
    }

    fn decode(buf: &[u8]) -> Self {
        Self {
            re: f32::from_le_bytes(buf[0..4].try_into().unwrap()),
            im: f32::from_le_bytes(buf[4..8].try_into().unwrap()),
        }
    }
}

impl Wire for f32 {
    const WIRE_SIZE: usize = 4;

    fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }

    fn decode(buf: &[u8]) -> Self {
        f32::from_le_bytes(buf[0..4].try_into().unwrap())
    }
}

impl Wire for i32 {
    const WIRE_SIZE: usize = 4;

    fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }

    fn decode(buf: &[u8]) -> Self {
        i32::from_le_bytes(buf[0..4].try_into().unwrap())
    }
}

impl Wire for u32 {
    const WIRE_SIZE: usize = 4;

    fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }

    fn decode(buf: &[u8]) -> Self {
        u32::from_le_bytes(buf[0..4].try_into().unwrap())
    }
}

/// Encodes a slice of records into `out`, appending.
pub fn encode_slice<T: Wire>(records: &[T], out: &mut Vec<u8>) {
    out.reserve(records.len() * T::WIRE_SIZE);
    for r in records {
        r.encode_into(out);
    }
}

/// Decodes a buffer of consecutive records.
///
/// # Panics
///
/// Panics if `buf` is not a whole number of records.
pub fn decode_vec<T: Wire>(buf: &[u8]) -> Vec<T> {
    assert_eq!(buf.len() % T::WIRE_SIZE, 0, "partial record in buffer");
    buf.chunks_exact(T::WIRE_SIZE).map(T::decode).collect()
}
