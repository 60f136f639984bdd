//! Payload buffer with a cursor.
//!
//! [`Payload`] is the one buffer type shared by the frame write path, the
//! frame read path and received-message accumulation. Writes append up to a
//! fixed capacity; reads advance a cursor from the start.
//!
//! Primitives are written through [`WireValue`] in either byte order. The
//! domain messages use big-endian (the Qt data-stream convention) while
//! per-node packets such as pings use little-endian.

use crate::error::{FrameError, ProtocolError};

/// Byte order of a primitive on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Endian {
    /// Least significant byte first
    #[default]
    Little,
    /// Most significant byte first (network order)
    Big,
}

/// Fixed-width primitive that can be written to and read from a payload
pub trait WireValue: Sized + Copy {
    /// Encoded width in bytes
    const WIDTH: usize;

    /// Encode into `out`, which is exactly `WIDTH` bytes long
    fn put(self, out: &mut [u8], endian: Endian);

    /// Decode from `bytes`, which is exactly `WIDTH` bytes long
    fn get(bytes: &[u8], endian: Endian) -> Self;
}

macro_rules! impl_wire_value {
    ($($ty:ty),+) => {
        $(
            impl WireValue for $ty {
                const WIDTH: usize = std::mem::size_of::<$ty>();

                fn put(self, out: &mut [u8], endian: Endian) {
                    let bytes = match endian {
                        Endian::Little => self.to_le_bytes(),
                        Endian::Big => self.to_be_bytes(),
                    };
                    out.copy_from_slice(&bytes);
                }

                fn get(bytes: &[u8], endian: Endian) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$ty>()];
                    raw.copy_from_slice(bytes);
                    match endian {
                        Endian::Little => <$ty>::from_le_bytes(raw),
                        Endian::Big => <$ty>::from_be_bytes(raw),
                    }
                }
            }
        )+
    };
}

impl_wire_value!(u8, i8, u16, i16, u32, i32, u64, i64, f32, f64);

/// Length sentinel for a null UTF-16 string
pub const NULL_STRING_LENGTH: u32 = u32::MAX;

/// Growable-to-capacity byte buffer with a read cursor
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Payload {
    data: Vec<u8>,
    capacity: usize,
    cursor: usize,
}

impl Payload {
    /// Empty payload accepting up to `capacity` bytes
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            capacity,
            cursor: 0,
        }
    }

    /// Payload holding received bytes, cursor at the start
    #[must_use]
    pub fn from_bytes(data: Vec<u8>) -> Self {
        let capacity = data.len();
        Self {
            data,
            capacity,
            cursor: 0,
        }
    }

    /// Bytes written so far
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether nothing has been written
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Maximum number of bytes this payload accepts
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes that can still be written
    #[must_use]
    pub fn remaining_capacity(&self) -> usize {
        self.capacity - self.data.len()
    }

    /// Everything written so far
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Consume into the written bytes
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Read cursor position
    #[must_use]
    pub fn pos(&self) -> usize {
        self.cursor
    }

    /// Move the read cursor, clamped to the written length
    pub fn seek(&mut self, pos: usize) {
        self.cursor = pos.min(self.data.len());
    }

    /// Bytes between the cursor and the end
    #[must_use]
    pub fn bytes_left_to_read(&self) -> usize {
        self.data.len() - self.cursor
    }

    /// Append `bytes` if they fit.
    ///
    /// # Errors
    /// Returns [`FrameError::PayloadOverflow`] and writes nothing otherwise
    pub fn write(&mut self, bytes: &[u8]) -> Result<usize, FrameError> {
        if bytes.len() > self.remaining_capacity() {
            return Err(FrameError::PayloadOverflow {
                requested: bytes.len(),
                available: self.remaining_capacity(),
            });
        }
        self.data.extend_from_slice(bytes);
        Ok(bytes.len())
    }

    /// Append one primitive.
    ///
    /// # Errors
    /// Returns [`FrameError::PayloadOverflow`] if it does not fit
    pub fn write_value<T: WireValue>(&mut self, value: T, endian: Endian) -> Result<(), FrameError> {
        let mut buf = [0u8; 8];
        value.put(&mut buf[..T::WIDTH], endian);
        self.write(&buf[..T::WIDTH]).map(|_| ())
    }

    /// Drop everything from `len` on; the cursor is clamped
    pub fn truncate(&mut self, len: usize) {
        self.data.truncate(len);
        self.cursor = self.cursor.min(self.data.len());
    }

    /// Remove and return everything from `at` on
    #[must_use]
    pub fn split_off(&mut self, at: usize) -> Vec<u8> {
        let at = at.min(self.data.len());
        let tail = self.data.split_off(at);
        self.cursor = self.cursor.min(self.data.len());
        tail
    }

    /// Append bytes beyond the original capacity, growing it.
    ///
    /// Used when accumulating the parts of a received message.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
        self.capacity = self.capacity.max(self.data.len());
    }

    /// Read `len` bytes at the cursor.
    ///
    /// # Errors
    /// Returns [`FrameError::ReadPastEnd`] if fewer bytes remain
    pub fn read(&mut self, len: usize) -> Result<&[u8], FrameError> {
        if len > self.bytes_left_to_read() {
            return Err(FrameError::ReadPastEnd {
                requested: len,
                available: self.bytes_left_to_read(),
            });
        }
        let start = self.cursor;
        self.cursor += len;
        Ok(&self.data[start..self.cursor])
    }

    /// Read one primitive at the cursor.
    ///
    /// # Errors
    /// Returns [`FrameError::ReadPastEnd`] if it is not fully present
    pub fn read_value<T: WireValue>(&mut self, endian: Endian) -> Result<T, FrameError> {
        self.read(T::WIDTH).map(|bytes| T::get(bytes, endian))
    }

    /// Read everything left
    pub fn read_remaining(&mut self) -> &[u8] {
        let start = self.cursor;
        self.cursor = self.data.len();
        &self.data[start..]
    }

    /// Whether the cursor reached the end
    #[must_use]
    pub fn at_end(&self) -> bool {
        self.cursor >= self.data.len()
    }
}

/// Encode a string as u32 big-endian byte length plus UTF-16BE code units.
///
/// `None` encodes as the null sentinel length with no body.
#[must_use]
pub fn encode_utf16_string(value: Option<&str>) -> Vec<u8> {
    match value {
        None => NULL_STRING_LENGTH.to_be_bytes().to_vec(),
        Some(s) => {
            let units: Vec<u16> = s.encode_utf16().collect();
            let mut out = Vec::with_capacity(4 + units.len() * 2);
            out.extend_from_slice(&((units.len() * 2) as u32).to_be_bytes());
            for unit in units {
                out.extend_from_slice(&unit.to_be_bytes());
            }
            out
        }
    }
}

/// Decode a string written by [`encode_utf16_string`].
///
/// # Errors
/// Returns [`ProtocolError`] on truncation or invalid UTF-16
pub fn read_utf16_string(payload: &mut Payload) -> Result<Option<String>, ProtocolError> {
    let len: u32 = payload.read_value(Endian::Big)?;
    if len == NULL_STRING_LENGTH {
        return Ok(None);
    }
    if len % 2 != 0 {
        return Err(ProtocolError::InvalidUtf16);
    }
    let bytes = payload.read(len as usize)?;
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16(&units)
        .map(Some)
        .map_err(|_| ProtocolError::InvalidUtf16)
}
