//! Explicit field layouts for kernel ABI structs.
//!
//! Kernel structs are never read through Rust's own struct layout. Each one is
//! described by a [`Layout`]: an ordered list of named fields with fixed
//! widths, padding included. A [`FieldReader`] walks a byte buffer against the
//! layout, decoding every field little-endian and refusing any read that does
//! not match the next declared field.

use crate::error::{Result, StatError};

/// Width and interpretation of one field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    I32,
    U32,
    I64,
    U64,
    F64,
    /// Fixed-size byte array (names, spare space).
    Bytes(usize),
    /// Alignment padding; skipped implicitly by the reader.
    Pad(usize),
}

impl FieldKind {
    /// Width in bytes.
    pub const fn width(self) -> usize {
        match self {
            FieldKind::I32 | FieldKind::U32 => 4,
            FieldKind::I64 | FieldKind::U64 | FieldKind::F64 => 8,
            FieldKind::Bytes(n) | FieldKind::Pad(n) => n,
        }
    }

    fn same_kind(self, other: FieldKind) -> bool {
        std::mem::discriminant(&self) == std::mem::discriminant(&other)
    }
}

/// A named field.
#[derive(Debug, Clone, Copy)]
pub struct Field {
    pub name: &'static str,
    pub kind: FieldKind,
}

impl Field {
    pub const fn new(name: &'static str, kind: FieldKind) -> Self {
        Self { name, kind }
    }
}

/// Ordered field list of one kernel struct.
#[derive(Debug)]
pub struct Layout {
    /// C name of the struct, used in error messages.
    pub name: &'static str,
    /// Kernel structure version this layout was written against.
    pub version: u32,
    pub fields: &'static [Field],
}

impl Layout {
    /// Total size in bytes, padding included.
    pub const fn size(&self) -> usize {
        let mut total = 0;
        let mut i = 0;
        while i < self.fields.len() {
            total += self.fields[i].kind.width();
            i += 1;
        }
        total
    }

    /// Fail with `BufferTooShort` unless `buf` holds a whole record.
    pub fn check_len(&self, buf: &[u8]) -> Result<()> {
        let needed = self.size();
        if buf.len() < needed {
            return Err(StatError::too_short(self.name, needed, buf.len()));
        }
        Ok(())
    }
}

/// Cursor over one record, checked against its layout.
pub struct FieldReader<'a> {
    layout: &'static Layout,
    buf: &'a [u8],
    pos: usize,
    index: usize,
}

impl<'a> FieldReader<'a> {
    /// Start reading a record; `buf` must hold at least `layout.size()` bytes.
    pub fn new(layout: &'static Layout, buf: &'a [u8]) -> Result<Self> {
        layout.check_len(buf)?;
        Ok(Self {
            layout,
            buf,
            pos: 0,
            index: 0,
        })
    }

    fn take(&mut self, name: &'static str, kind: Option<FieldKind>) -> Result<&'a [u8]> {
        while let Some(Field {
            kind: FieldKind::Pad(n),
            ..
        }) = self.layout.fields.get(self.index)
        {
            self.pos += n;
            self.index += 1;
        }

        let field = self
            .layout
            .fields
            .get(self.index)
            .filter(|f| f.name == name && kind.is_none_or(|k| f.kind.same_kind(k)))
            .ok_or(StatError::LayoutMismatch {
                layout: self.layout.name,
                field: name,
            })?;

        let end = self.pos + field.kind.width();
        let bytes = self
            .buf
            .get(self.pos..end)
            .ok_or_else(|| StatError::too_short(self.layout.name, end, self.buf.len()))?;
        self.pos = end;
        self.index += 1;
        Ok(bytes)
    }

    pub fn i32(&mut self, name: &'static str) -> Result<i32> {
        self.take(name, Some(FieldKind::I32))
            .map(|b| i32::from_le_bytes(le(b)))
    }

    pub fn u32(&mut self, name: &'static str) -> Result<u32> {
        self.take(name, Some(FieldKind::U32))
            .map(|b| u32::from_le_bytes(le(b)))
    }

    pub fn i64(&mut self, name: &'static str) -> Result<i64> {
        self.take(name, Some(FieldKind::I64))
            .map(|b| i64::from_le_bytes(le(b)))
    }

    pub fn u64(&mut self, name: &'static str) -> Result<u64> {
        self.take(name, Some(FieldKind::U64))
            .map(|b| u64::from_le_bytes(le(b)))
    }

    pub fn f64(&mut self, name: &'static str) -> Result<f64> {
        self.take(name, Some(FieldKind::F64))
            .map(|b| f64::from_le_bytes(le(b)))
    }

    /// Borrow a fixed-size byte array field.
    pub fn bytes(&mut self, name: &'static str) -> Result<&'a [u8]> {
        self.take(name, Some(FieldKind::Bytes(0)))
    }

    /// Skip a field of any kind (spares, fields the caller ignores).
    pub fn skip(&mut self, name: &'static str) -> Result<()> {
        self.take(name, None).map(|_| ())
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> usize {
        self.pos
    }
}

/// Copy a slice of exactly `N` bytes into an array.
///
/// Callers only pass slices cut to the field width.
fn le<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    out
}

/// Decode a NUL-terminated (or NUL-padded) byte array as text.
pub fn c_string(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: Layout = Layout {
        name: "sample",
        version: 1,
        fields: &[
            Field::new("a", FieldKind::U32),
            Field::new("pad0", FieldKind::Pad(4)),
            Field::new("b", FieldKind::I64),
            Field::new("name", FieldKind::Bytes(4)),
        ],
    };

    const _: () = assert!(SAMPLE.size() == 20);

    fn sample_bytes() -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&7u32.to_le_bytes());
        buf.extend_from_slice(&[0xff; 4]);
        buf.extend_from_slice(&(-2i64).to_le_bytes());
        buf.extend_from_slice(b"hfs\0");
        buf
    }

    #[test]
    fn test_reads_fields_in_order() {
        let buf = sample_bytes();
        let mut r = FieldReader::new(&SAMPLE, &buf).unwrap();
        assert_eq!(r.u32("a").unwrap(), 7);
        assert_eq!(r.i64("b").unwrap(), -2);
        assert_eq!(c_string(r.bytes("name").unwrap()), "hfs");
        assert_eq!(r.position(), 20);
    }

    #[test]
    fn test_short_buffer_is_rejected_up_front() {
        let buf = sample_bytes();
        let err = FieldReader::new(&SAMPLE, &buf[..19]).err().unwrap();
        assert!(matches!(
            err,
            StatError::BufferTooShort {
                needed: 20,
                actual: 19,
                ..
            }
        ));
    }

    #[test]
    fn test_out_of_order_read_is_a_mismatch() {
        let buf = sample_bytes();
        let mut r = FieldReader::new(&SAMPLE, &buf).unwrap();
        let err = r.i64("b").unwrap_err();
        assert!(matches!(err, StatError::LayoutMismatch { field: "b", .. }));
    }

    #[test]
    fn test_wrong_width_is_a_mismatch() {
        let buf = sample_bytes();
        let mut r = FieldReader::new(&SAMPLE, &buf).unwrap();
        assert!(r.u64("a").is_err());
    }

    #[test]
    fn test_skip_accepts_any_kind() {
        let buf = sample_bytes();
        let mut r = FieldReader::new(&SAMPLE, &buf).unwrap();
        r.skip("a").unwrap();
        r.skip("b").unwrap();
        assert_eq!(r.bytes("name").unwrap(), b"hfs\0");
    }

    #[test]
    fn test_c_string() {
        assert_eq!(c_string(b"/\0\0\0"), "/");
        assert_eq!(c_string(b"devfs"), "devfs");
        assert_eq!(c_string(b"\0junk"), "");
    }
}
