//! # distobj
//!
//! Stable numeric ids for the methods and properties of distributed object
//! contracts, so replication payloads never carry member names.
//!
//! ```
//! use distobj::CatalogEntry;
//! use distobj::DefinitionBuilder;
//! use distobj::DistributedContract;
//! use distobj::DistributedObject;
//! use distobj::Repository;
//! use distobj::RepositoryOptions;
//! use distobj::ValueKind;
//!
//! struct Door { id: u64 }
//!
//! impl DistributedObject for Door {
//!     fn object_id(&self) -> u64 { self.id }
//! }
//!
//! impl DistributedContract for Door {
//!     const NAME: &'static str = "Door";
//!     const TYPE_ID: u16 = 7;
//!     fn describe(b: &mut DefinitionBuilder) {
//!         b.property_with_id(1, "Open", ValueKind::Bool)
//!             .method_with_id(2, "Toggle", &[], None);
//!     }
//! }
//!
//! let repo = Repository::initialize([CatalogEntry::of::<Door>()], &RepositoryOptions::default()).unwrap();
//! let door = repo.definition::<Door>().unwrap();
//! assert_eq!(door.method_id("Toggle"), Some(2));
//! ```
//!
//! ## Invariants
//!
//! - Ids are unique within a contract, across methods and properties.
//! - A repository never changes after `initialize` returns.

pub mod definition;
pub mod error;
pub mod repository;

#[cfg(test)]
mod tests;

pub use definition::DefinitionBuilder;
pub use definition::DistributedObjectDefinition;
pub use definition::MemberRef;
pub use definition::MethodDescriptor;
pub use definition::PropertyDescriptor;
pub use definition::ValueKind;
pub use error::Error;
pub use error::Result;
pub use repository::CatalogEntry;
pub use repository::Repository;
pub use repository::RepositoryOptions;

/// Base capability every replicated object has.
pub trait DistributedObject: Send + Sync {
    fn object_id(&self) -> u64;
}

/// Marks a type as a distributed contract and declares its members.
pub trait DistributedContract: DistributedObject + 'static {
    const NAME: &'static str;
    const TYPE_ID: u16;

    fn describe(b: &mut DefinitionBuilder);
}
