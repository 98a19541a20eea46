//! # Wirepack
//!
//! A small, sequential, position-tracked binary codec.
//!
//! ## Philosophy
//!
//! - **Untagged**: Values carry no per-field type bytes. Reader and writer agree on
//!   the shape out of band (a message code, a contract member).
//! - **Strict**: Reads consume exactly what was written. Over-reading is an error,
//!   never zero-fill.
//! - **Polymorphic on demand**: `tagged` values carry a `u16` type tag followed by the
//!   type's own encoding, so a registry can rebuild them without outside type info.
//!
//! ## Format
//!
//! - **Integers/floats**: fixed width, Little-Endian.
//! - **Bool**: one byte, `0` or `1`.
//! - **Strings/Blobs**: `[Len: u32][Data: Len]`.
//! - **Tagged objects**: `[Tag: u16][Body]`.

mod object;
mod traits;

#[cfg(test)]
mod tests;

pub use object::ObjectRegistry;
pub use object::WireObject;
pub use traits::Pack;
pub use traits::Unpack;
pub use traits::pack_list;
pub use traits::unpack_list;

/// Wirepack serialization and deserialization errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Buffer exhausted while reading.
    UnexpectedEnd { needed: usize, remaining: usize },
    /// Bytes were left over after a value that should have filled the buffer.
    TrailingBytes(usize),
    /// A bool byte that is neither 0 nor 1.
    InvalidBool(u8),
    /// String data is not valid UTF-8.
    InvalidUtf8,
    /// Blob, string or list length exceeds `u32::MAX`.
    TooLarge(usize),
    /// No decoder registered for a tagged object.
    UnknownTag(u16),
    /// A decoder was already registered for this tag.
    DuplicateTag(u16),
    /// The object decoded under `tag` reports a different `wire_type`.
    TagMismatch { tag: u16, wire_type: u16 },
    /// Value decoded but is not valid for the target type.
    Invalid(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::UnexpectedEnd { needed, remaining } => {
                write!(f, "Unexpected end: needed {} bytes, {} remaining", needed, remaining)
            }
            Error::TrailingBytes(n) => write!(f, "{} trailing bytes after value", n),
            Error::InvalidBool(b) => write!(f, "Invalid bool byte: {:#04x}", b),
            Error::InvalidUtf8 => write!(f, "String is not valid UTF-8"),
            Error::TooLarge(n) => write!(f, "Length {} exceeds u32::MAX", n),
            Error::UnknownTag(t) => write!(f, "No decoder registered for tag {}", t),
            Error::DuplicateTag(t) => write!(f, "Tag {} registered twice", t),
            Error::TagMismatch { tag, wire_type } => {
                write!(f, "Object decoded under tag {} reports wire type {}", tag, wire_type)
            }
            Error::Invalid(msg) => write!(f, "Invalid value: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

/// Specialized `Result` for Wirepack operations.
pub type Result<T> = std::result::Result<T, Error>;

/// An append-only encoder.
///
/// Encoding is pure: the only state is the output buffer.
#[derive(Debug, Default, Clone)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    /// Creates a new writer with default capacity.
    pub fn new() -> Self {
        Self { buf: Vec::with_capacity(256) }
    }

    /// Creates a writer with a capacity hint.
    pub fn with_capacity(capacity: usize) -> Self {
        Self { buf: Vec::with_capacity(capacity) }
    }

    /// Number of bytes written so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Returns a view of the bytes written so far.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Consumes the writer and returns the final byte vector.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    fn write_len(&mut self, len: usize) -> Result<()> {
        if len > u32::MAX as usize {
            return Err(Error::TooLarge(len));
        }
        self.buf.extend_from_slice(&(len as u32).to_le_bytes());
        Ok(())
    }

    /// Encodes a boolean as a single byte.
    pub fn bool(&mut self, v: bool) -> &mut Self { self.buf.push(v as u8); self }

    /// Encodes an unsigned 8-bit integer.
    pub fn u8(&mut self, v: u8) -> &mut Self { self.buf.push(v); self }
    /// Encodes a signed 8-bit integer.
    pub fn i8(&mut self, v: i8) -> &mut Self { self.buf.push(v as u8); self }

    /// Encodes an unsigned 16-bit integer (LE).
    pub fn u16(&mut self, v: u16) -> &mut Self { self.buf.extend_from_slice(&v.to_le_bytes()); self }
    /// Encodes a signed 16-bit integer (LE).
    pub fn i16(&mut self, v: i16) -> &mut Self { self.buf.extend_from_slice(&v.to_le_bytes()); self }

    /// Encodes an unsigned 32-bit integer (LE).
    pub fn u32(&mut self, v: u32) -> &mut Self { self.buf.extend_from_slice(&v.to_le_bytes()); self }
    /// Encodes a signed 32-bit integer (LE).
    pub fn i32(&mut self, v: i32) -> &mut Self { self.buf.extend_from_slice(&v.to_le_bytes()); self }

    /// Encodes an unsigned 64-bit integer (LE).
    pub fn u64(&mut self, v: u64) -> &mut Self { self.buf.extend_from_slice(&v.to_le_bytes()); self }
    /// Encodes a signed 64-bit integer (LE).
    pub fn i64(&mut self, v: i64) -> &mut Self { self.buf.extend_from_slice(&v.to_le_bytes()); self }

    /// Encodes a 32-bit float (LE).
    pub fn f32(&mut self, v: f32) -> &mut Self { self.buf.extend_from_slice(&v.to_le_bytes()); self }
    /// Encodes a 64-bit float (LE).
    pub fn f64(&mut self, v: f64) -> &mut Self { self.buf.extend_from_slice(&v.to_le_bytes()); self }

    /// Encodes a length-prefixed UTF-8 string.
    pub fn str(&mut self, v: &str) -> Result<&mut Self> {
        self.write_len(v.len())?;
        self.buf.extend_from_slice(v.as_bytes());
        Ok(self)
    }

    /// Encodes a length-prefixed byte blob.
    pub fn bytes(&mut self, v: &[u8]) -> Result<&mut Self> {
        self.write_len(v.len())?;
        self.buf.extend_from_slice(v);
        Ok(self)
    }

    /// Appends bytes with no length prefix.
    ///
    /// The reader must know how many bytes to take.
    pub fn raw(&mut self, v: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(v);
        self
    }

    /// Encodes any `Pack` value.
    pub fn pack<T: Pack + ?Sized>(&mut self, v: &T) -> Result<&mut Self> {
        v.pack(self)?;
        Ok(self)
    }

    /// Encodes a polymorphic object: its tag, then its own encoding.
    pub fn tagged(&mut self, obj: &dyn WireObject) -> Result<&mut Self> {
        self.u16(obj.wire_type());
        obj.pack_object(self)?;
        Ok(self)
    }
}

/// A bounds-checked, position-tracked cursor over a byte slice.
///
/// A buffer is decoded once, sequentially, by one consumer. Reads advance the
/// position; nothing else is mutated.
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    /// Creates a reader positioned at the start of the slice.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Current read position from the start of the slice.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left to read.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }

    /// Fails with `TrailingBytes` unless every byte has been consumed.
    pub fn finish(&self) -> Result<()> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(Error::TrailingBytes(n)),
        }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let remaining = self.remaining();
        if n > remaining {
            return Err(Error::UnexpectedEnd { needed: n, remaining });
        }
        let bytes = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let bytes = self.take(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    fn read_len(&mut self) -> Result<usize> {
        Ok(u32::from_le_bytes(self.take_array()?) as usize)
    }

    /// Decodes a single-byte bool.
    pub fn bool(&mut self) -> Result<bool> {
        match self.u8()? {
            0 => Ok(false),
            1 => Ok(true),
            b => Err(Error::InvalidBool(b)),
        }
    }

    /// Decodes u8.
    pub fn u8(&mut self) -> Result<u8> { Ok(self.take_array::<1>()?[0]) }
    /// Decodes i8.
    pub fn i8(&mut self) -> Result<i8> { Ok(self.take_array::<1>()?[0] as i8) }

    /// Decodes u16 (LE).
    pub fn u16(&mut self) -> Result<u16> { Ok(u16::from_le_bytes(self.take_array()?)) }
    /// Decodes i16 (LE).
    pub fn i16(&mut self) -> Result<i16> { Ok(i16::from_le_bytes(self.take_array()?)) }

    /// Decodes u32 (LE).
    pub fn u32(&mut self) -> Result<u32> { Ok(u32::from_le_bytes(self.take_array()?)) }
    /// Decodes i32 (LE).
    pub fn i32(&mut self) -> Result<i32> { Ok(i32::from_le_bytes(self.take_array()?)) }

    /// Decodes u64 (LE).
    pub fn u64(&mut self) -> Result<u64> { Ok(u64::from_le_bytes(self.take_array()?)) }
    /// Decodes i64 (LE).
    pub fn i64(&mut self) -> Result<i64> { Ok(i64::from_le_bytes(self.take_array()?)) }

    /// Decodes f32 (LE).
    pub fn f32(&mut self) -> Result<f32> { Ok(f32::from_le_bytes(self.take_array()?)) }
    /// Decodes f64 (LE).
    pub fn f64(&mut self) -> Result<f64> { Ok(f64::from_le_bytes(self.take_array()?)) }

    /// Decodes a length-prefixed string slice (UTF-8).
    pub fn str(&mut self) -> Result<&'a str> {
        let len = self.read_len()?;
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes).map_err(|_| Error::InvalidUtf8)
    }

    /// Decodes a length-prefixed byte slice.
    pub fn bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.read_len()?;
        self.take(len)
    }

    /// Takes exactly `n` raw bytes.
    pub fn raw(&mut self, n: usize) -> Result<&'a [u8]> {
        self.take(n)
    }

    /// Decodes any `Unpack` value.
    pub fn unpack<T: Unpack>(&mut self) -> Result<T> {
        T::unpack(self)
    }

    /// Decodes a tagged object using the registry to find its decoder.
    pub fn tagged(&mut self, registry: &ObjectRegistry) -> Result<Box<dyn WireObject>> {
        let tag = self.u16()?;
        registry.decode(tag, self)
    }
}
