//! Generic sysctl-by-name reader.
//!
//! A sysctl attribute is an untyped byte buffer. The destination type decides
//! how it is decoded: the four scalar kinds read the leading bytes directly,
//! anything else is a struct with a declared [`Layout`] walked field by field.
//! Both paths are little-endian.

use std::io;

use tracing::debug;

use crate::error::{Result, StatError};
use crate::kernel::Kernel;
use crate::layout::{Layout, c_string};

/// Fixed-width scalar kinds a sysctl attribute can be decoded as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    Int32,
    Int64,
    UInt64,
    Float64,
}

impl ScalarKind {
    pub const fn width(self) -> usize {
        match self {
            ScalarKind::Int32 => 4,
            ScalarKind::Int64 | ScalarKind::UInt64 | ScalarKind::Float64 => 8,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            ScalarKind::Int32 => "int32",
            ScalarKind::Int64 => "int64",
            ScalarKind::UInt64 => "uint64",
            ScalarKind::Float64 => "float64",
        }
    }

    /// Decode the leading bytes of `buf` as this kind.
    pub fn decode(self, buf: &[u8]) -> Result<DecodedScalar> {
        Ok(match self {
            ScalarKind::Int32 => DecodedScalar::Int32(i32::decode(buf)?),
            ScalarKind::Int64 => DecodedScalar::Int64(i64::decode(buf)?),
            ScalarKind::UInt64 => DecodedScalar::UInt64(u64::decode(buf)?),
            ScalarKind::Float64 => DecodedScalar::Float64(f64::decode(buf)?),
        })
    }
}

/// A scalar decoded with a kind chosen at runtime.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DecodedScalar {
    Int32(i32),
    Int64(i64),
    UInt64(u64),
    Float64(f64),
}

/// Destination shape of a sysctl read.
#[derive(Debug, Clone, Copy)]
pub enum Shape {
    Scalar(ScalarKind),
    Struct(&'static Layout),
}

impl Shape {
    /// Minimum number of bytes the kernel must return.
    pub const fn size(&self) -> usize {
        match self {
            Shape::Scalar(kind) => kind.width(),
            Shape::Struct(layout) => layout.size(),
        }
    }

    pub const fn name(&self) -> &'static str {
        match self {
            Shape::Scalar(kind) => kind.name(),
            Shape::Struct(layout) => layout.name,
        }
    }
}

/// A type a sysctl attribute can be decoded into.
pub trait SysctlValue: Sized {
    const SHAPE: Shape;

    /// Decode from `buf`, which may be longer than `SHAPE.size()`.
    fn decode(buf: &[u8]) -> Result<Self>;
}

macro_rules! scalar_value {
    ($ty:ty, $kind:ident) => {
        const _: () = assert!(ScalarKind::$kind.width() == std::mem::size_of::<$ty>());

        impl SysctlValue for $ty {
            const SHAPE: Shape = Shape::Scalar(ScalarKind::$kind);

            fn decode(buf: &[u8]) -> Result<Self> {
                const WIDTH: usize = ScalarKind::$kind.width();
                let lead: [u8; WIDTH] = buf
                    .get(..WIDTH)
                    .and_then(|b| b.try_into().ok())
                    .ok_or_else(|| StatError::too_short(Self::SHAPE.name(), WIDTH, buf.len()))?;
                Ok(<$ty>::from_le_bytes(lead))
            }
        }
    };
}

scalar_value!(i32, Int32);
scalar_value!(i64, Int64);
scalar_value!(u64, UInt64);
scalar_value!(f64, Float64);

fn fetch<K: Kernel + ?Sized>(kernel: &K, name: &str) -> Result<Vec<u8>> {
    kernel.sysctl_by_name(name).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => StatError::AttributeNotFound {
            name: name.to_string(),
        },
        _ => StatError::Sysctl {
            name: name.to_string(),
            source: e,
        },
    })
}

/// Read a sysctl attribute and decode it as `T`.
pub fn read_attribute<T, K>(kernel: &K, name: &str) -> Result<T>
where
    T: SysctlValue,
    K: Kernel + ?Sized,
{
    let buf = fetch(kernel, name)?;
    let needed = T::SHAPE.size();
    debug!(name, len = buf.len(), shape = T::SHAPE.name(), "sysctl read");
    if buf.len() < needed {
        return Err(StatError::too_short(T::SHAPE.name(), needed, buf.len()));
    }
    T::decode(&buf)
}

/// Read a sysctl attribute as a scalar of a kind chosen at runtime.
pub fn read_scalar<K: Kernel + ?Sized>(
    kernel: &K,
    name: &str,
    kind: ScalarKind,
) -> Result<DecodedScalar> {
    let buf = fetch(kernel, name)?;
    kind.decode(&buf)
}

/// Read a NUL-terminated string attribute.
pub fn read_string<K: Kernel + ?Sized>(kernel: &K, name: &str) -> Result<String> {
    let buf = fetch(kernel, name)?;
    Ok(c_string(&buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockKernel;

    #[test]
    fn test_scalars_are_little_endian() {
        let kernel = MockKernel::new()
            .with_sysctl("t.i32", (-5i32).to_le_bytes().to_vec())
            .with_sysctl("t.i64", 0x0102_0304_0506_0708i64.to_le_bytes().to_vec())
            .with_sysctl("t.u64", u64::MAX.to_le_bytes().to_vec())
            .with_sysctl("t.f64", 2.5f64.to_le_bytes().to_vec());

        assert_eq!(read_attribute::<i32, _>(&kernel, "t.i32").unwrap(), -5);
        assert_eq!(
            read_attribute::<i64, _>(&kernel, "t.i64").unwrap(),
            0x0102_0304_0506_0708
        );
        assert_eq!(read_attribute::<u64, _>(&kernel, "t.u64").unwrap(), u64::MAX);
        assert_eq!(read_attribute::<f64, _>(&kernel, "t.f64").unwrap(), 2.5);
    }

    #[test]
    fn test_explicit_byte_order() {
        let kernel = MockKernel::new().with_sysctl("t.bytes", vec![0x01, 0x00, 0x00, 0x00]);
        assert_eq!(read_attribute::<i32, _>(&kernel, "t.bytes").unwrap(), 1);
    }

    #[test]
    fn test_longer_buffer_uses_leading_bytes() {
        let mut bytes = 42u64.to_le_bytes().to_vec();
        bytes.extend_from_slice(&[0xaa; 8]);
        let kernel = MockKernel::new().with_sysctl("t.long", bytes);
        assert_eq!(read_attribute::<u64, _>(&kernel, "t.long").unwrap(), 42);
    }

    #[test]
    fn test_every_short_buffer_is_rejected() {
        for kind in [
            ScalarKind::Int32,
            ScalarKind::Int64,
            ScalarKind::UInt64,
            ScalarKind::Float64,
        ] {
            for len in 0..kind.width() {
                let kernel = MockKernel::new().with_sysctl("t.short", vec![0xff; len]);
                let err = read_scalar(&kernel, "t.short", kind).unwrap_err();
                assert!(
                    matches!(err, StatError::BufferTooShort { needed, actual, .. }
                        if needed == kind.width() && actual == len),
                    "{:?} with {} bytes gave {:?}",
                    kind,
                    len,
                    err
                );
            }
        }
    }

    #[test]
    fn test_short_buffer_through_typed_read() {
        let kernel = MockKernel::new().with_sysctl("hw.memsize", vec![0; 4]);
        let err = read_attribute::<u64, _>(&kernel, "hw.memsize").unwrap_err();
        assert!(matches!(
            err,
            StatError::BufferTooShort {
                needed: 8,
                actual: 4,
                ..
            }
        ));
    }

    #[test]
    fn test_runtime_kind_dispatch() {
        let kernel = MockKernel::new().with_sysctl("t.v", 7i64.to_le_bytes().to_vec());
        assert_eq!(
            read_scalar(&kernel, "t.v", ScalarKind::Int64).unwrap(),
            DecodedScalar::Int64(7)
        );
        assert_eq!(
            read_scalar(&kernel, "t.v", ScalarKind::Int32).unwrap(),
            DecodedScalar::Int32(7)
        );
    }

    #[test]
    fn test_unknown_name() {
        let kernel = MockKernel::new();
        let err = read_attribute::<u64, _>(&kernel, "hw.nonexistent").unwrap_err();
        assert!(err.is_not_found());
        assert!(err.to_string().contains("hw.nonexistent"));
    }

    #[test]
    fn test_read_string_trims_nul() {
        let kernel = MockKernel::new().with_sysctl("kern.osrelease", b"23.4.0\0".to_vec());
        assert_eq!(read_string(&kernel, "kern.osrelease").unwrap(), "23.4.0");
    }

    #[test]
    fn test_shape_sizes() {
        assert_eq!(<i32 as SysctlValue>::SHAPE.size(), 4);
        assert_eq!(<f64 as SysctlValue>::SHAPE.size(), 8);
        assert_eq!(<u64 as SysctlValue>::SHAPE.name(), "uint64");
    }
}
