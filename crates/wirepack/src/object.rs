//! Tagged objects: polymorphic values rebuilt from a `u16` tag.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;

use crate::Error;
use crate::Reader;
use crate::Result;
use crate::Unpack;
use crate::Writer;

/// A value that can be written behind a type tag and rebuilt by an `ObjectRegistry`.
pub trait WireObject: fmt::Debug + Send + Sync + 'static {
    /// The tag written before the object's body. Unique per registry.
    fn wire_type(&self) -> u16;

    /// Writes the body (not the tag).
    fn pack_object(&self, w: &mut Writer) -> Result<()>;

    fn as_any(&self) -> &dyn Any;
}

impl dyn WireObject {
    /// Downcasts a decoded object to its concrete type.
    pub fn downcast_ref<T: WireObject>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }
}

type DecodeFn = fn(&mut Reader<'_>) -> Result<Box<dyn WireObject>>;

fn decode_as<T: WireObject + Unpack>(r: &mut Reader<'_>) -> Result<Box<dyn WireObject>> {
    Ok(Box::new(T::unpack(r)?))
}

/// Maps type tags to decoders.
///
/// Built once, then shared read-only by every consumer.
#[derive(Default, Clone)]
pub struct ObjectRegistry {
    decoders: HashMap<u16, (DecodeFn, &'static str)>,
}

impl ObjectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `T` under `tag`, which must be the tag `T::wire_type` reports.
    ///
    /// # Errors
    /// Returns `Error::DuplicateTag` if the tag is taken. Decoding fails with
    /// `Error::TagMismatch` when the decoded value reports another tag.
    pub fn register<T: WireObject + Unpack>(&mut self, tag: u16) -> Result<()> {
        if self.decoders.contains_key(&tag) {
            return Err(Error::DuplicateTag(tag));
        }
        self.decoders.insert(tag, (decode_as::<T>, std::any::type_name::<T>()));
        Ok(())
    }

    pub fn contains(&self, tag: u16) -> bool {
        self.decoders.contains_key(&tag)
    }

    /// Name of the Rust type registered under `tag`, for diagnostics.
    pub fn type_name(&self, tag: u16) -> Option<&'static str> {
        self.decoders.get(&tag).map(|(_, name)| *name)
    }

    pub(crate) fn decode(&self, tag: u16, r: &mut Reader<'_>) -> Result<Box<dyn WireObject>> {
        let (decode, _) = self.decoders.get(&tag).ok_or(Error::UnknownTag(tag))?;
        let object = decode(r)?;
        if object.wire_type() != tag {
            return Err(Error::TagMismatch { tag, wire_type: object.wire_type() });
        }
        Ok(object)
    }
}

impl fmt::Debug for ObjectRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tags: Vec<_> = self.decoders.iter().map(|(t, (_, n))| (*t, *n)).collect();
        tags.sort_unstable();
        f.debug_struct("ObjectRegistry").field("tags", &tags).finish()
    }
}
