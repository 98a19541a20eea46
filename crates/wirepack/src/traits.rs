//! `Pack`/`Unpack`: the typed interface over `Writer` and `Reader`.

use crate::Error;
use crate::Reader;
use crate::Result;
use crate::Writer;

/// A value that knows how to write itself.
pub trait Pack {
    fn pack(&self, w: &mut Writer) -> Result<()>;
}

/// A value that knows how to read itself back.
///
/// Must consume exactly the bytes `Pack` produced.
pub trait Unpack: Sized {
    fn unpack(r: &mut Reader<'_>) -> Result<Self>;
}

/// Implements `Pack`/`Unpack` for fixed-width scalars.
/// Arguments: Rust type, Writer method, Reader method.
macro_rules! scalar {
    ($ty:ty, $write:ident, $read:ident) => {
        impl Pack for $ty {
            #[inline]
            fn pack(&self, w: &mut Writer) -> Result<()> {
                w.$write(*self);
                Ok(())
            }
        }

        impl Unpack for $ty {
            #[inline]
            fn unpack(r: &mut Reader<'_>) -> Result<Self> {
                r.$read()
            }
        }
    };
}

scalar!(bool, bool, bool);
scalar!(u8, u8, u8);
scalar!(i8, i8, i8);
scalar!(u16, u16, u16);
scalar!(i16, i16, i16);
scalar!(u32, u32, u32);
scalar!(i32, i32, i32);
scalar!(u64, u64, u64);
scalar!(i64, i64, i64);
scalar!(f32, f32, f32);
scalar!(f64, f64, f64);

impl Pack for () {
    fn pack(&self, _w: &mut Writer) -> Result<()> { Ok(()) }
}

impl Unpack for () {
    fn unpack(_r: &mut Reader<'_>) -> Result<Self> { Ok(()) }
}

impl Pack for str {
    fn pack(&self, w: &mut Writer) -> Result<()> {
        w.str(self)?;
        Ok(())
    }
}

impl Pack for String {
    fn pack(&self, w: &mut Writer) -> Result<()> {
        w.str(self)?;
        Ok(())
    }
}

impl Unpack for String {
    fn unpack(r: &mut Reader<'_>) -> Result<Self> {
        Ok(r.str()?.to_owned())
    }
}

impl Pack for [u8] {
    fn pack(&self, w: &mut Writer) -> Result<()> {
        w.bytes(self)?;
        Ok(())
    }
}

/// `Vec<u8>` is a blob. Lists of other types go through `pack_list`.
impl Pack for Vec<u8> {
    fn pack(&self, w: &mut Writer) -> Result<()> {
        w.bytes(self)?;
        Ok(())
    }
}

impl Unpack for Vec<u8> {
    fn unpack(r: &mut Reader<'_>) -> Result<Self> {
        Ok(r.bytes()?.to_vec())
    }
}

impl<T: Pack + ?Sized> Pack for &T {
    fn pack(&self, w: &mut Writer) -> Result<()> {
        (**self).pack(w)
    }
}

/// `Option<T>` is a presence flag followed by the value when present.
impl<T: Pack> Pack for Option<T> {
    fn pack(&self, w: &mut Writer) -> Result<()> {
        match self {
            Some(v) => {
                w.bool(true);
                v.pack(w)
            }
            None => {
                w.bool(false);
                Ok(())
            }
        }
    }
}

impl<T: Unpack> Unpack for Option<T> {
    fn unpack(r: &mut Reader<'_>) -> Result<Self> {
        if r.bool()? {
            Ok(Some(T::unpack(r)?))
        } else {
            Ok(None)
        }
    }
}

/// Writes `[Count: u32]` then each item.
pub fn pack_list<T: Pack>(w: &mut Writer, items: &[T]) -> Result<()> {
    if items.len() > u32::MAX as usize {
        return Err(Error::TooLarge(items.len()));
    }
    w.u32(items.len() as u32);
    for item in items {
        item.pack(w)?;
    }
    Ok(())
}

/// Reads a list written by `pack_list`.
///
/// The count is checked against the remaining bytes before allocating, so a
/// corrupt count cannot request a huge buffer.
pub fn unpack_list<T: Unpack>(r: &mut Reader<'_>) -> Result<Vec<T>> {
    let count = r.u32()? as usize;
    if count > r.remaining() && std::mem::size_of::<T>() > 0 {
        return Err(Error::UnexpectedEnd { needed: count, remaining: r.remaining() });
    }
    let mut items = Vec::with_capacity(count);
    for _ in 0..count {
        items.push(T::unpack(r)?);
    }
    Ok(items)
}

/// Tuples pack their elements in order; this is how argument lists are written.
macro_rules! tuple {
    ($($name:ident),+) => {
        impl<$($name: Pack),+> Pack for ($($name,)+) {
            #[allow(non_snake_case)]
            fn pack(&self, w: &mut Writer) -> Result<()> {
                let ($($name,)+) = self;
                $($name.pack(w)?;)+
                Ok(())
            }
        }

        impl<$($name: Unpack),+> Unpack for ($($name,)+) {
            fn unpack(r: &mut Reader<'_>) -> Result<Self> {
                Ok(($($name::unpack(r)?,)+))
            }
        }
    };
}

tuple!(A);
tuple!(A, B);
tuple!(A, B, C);
tuple!(A, B, C, D);
tuple!(A, B, C, D, E);
tuple!(A, B, C, D, E, F);
