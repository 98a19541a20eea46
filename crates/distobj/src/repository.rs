//! # Repository
//!
//! Built once at startup from an explicit catalog, then shared read-only.
//! Nothing here is global: whoever needs member ids is handed the
//! `Arc<Repository>`.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

use wirepack::Reader;

use crate::DistributedContract;
use crate::definition::DefinitionBuilder;
use crate::definition::DistributedObjectDefinition;
use crate::definition::MemberRef;
use crate::error::Error;
use crate::error::Result;

/// One contract to be registered.
#[derive(Clone)]
pub struct CatalogEntry {
    name: &'static str,
    type_id: u16,
    rust_type: Option<TypeId>,
    implements_base: bool,
    describe: fn(&mut DefinitionBuilder),
}

impl CatalogEntry {
    /// A contract checked by the compiler.
    pub fn of<T: DistributedContract>() -> Self {
        Self {
            name: T::NAME,
            type_id: T::TYPE_ID,
            rust_type: Some(TypeId::of::<T>()),
            implements_base: true,
            describe: T::describe,
        }
    }

    /// A contract from a generated table. `implements_base` is whatever the
    /// generator claims; the repository rejects the entry when it is false.
    pub fn from_table(
        name: &'static str,
        type_id: u16,
        implements_base: bool,
        describe: fn(&mut DefinitionBuilder),
    ) -> Self {
        Self { name, type_id, rust_type: None, implements_base, describe }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn type_id(&self) -> u16 {
        self.type_id
    }
}

impl std::fmt::Debug for CatalogEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogEntry")
            .field("name", &self.name)
            .field("type_id", &self.type_id)
            .field("implements_base", &self.implements_base)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct RepositoryOptions {
    pub require_explicit_ids: bool,
}

impl Default for RepositoryOptions {
    fn default() -> Self {
        Self { require_explicit_ids: true }
    }
}

impl RepositoryOptions {
    /// Lets members without an explicit id get one from the declaration order.
    pub fn allow_auto_ids(mut self) -> Self {
        self.require_explicit_ids = false;
        self
    }
}

#[derive(Debug)]
pub struct Repository {
    definitions: Vec<DistributedObjectDefinition>,
    by_rust_type: HashMap<TypeId, usize>,
    by_type_id: HashMap<u16, usize>,
    by_name: HashMap<&'static str, usize>,
}

impl Repository {
    /// Builds a definition for every catalog entry. Any invalid entry fails
    /// the whole repository.
    pub fn initialize(
        catalog: impl IntoIterator<Item = CatalogEntry>,
        options: &RepositoryOptions,
    ) -> Result<Arc<Self>> {
        let mut repo = Self {
            definitions: Vec::new(),
            by_rust_type: HashMap::new(),
            by_type_id: HashMap::new(),
            by_name: HashMap::new(),
        };

        for entry in catalog {
            if !entry.implements_base {
                return Err(Error::MissingBaseCapability { contract: entry.name });
            }
            if let Some(&existing) = repo.by_type_id.get(&entry.type_id) {
                return Err(Error::DuplicateTypeId {
                    type_id: entry.type_id,
                    first: repo.definitions[existing].name(),
                    second: entry.name,
                });
            }
            if repo.by_name.contains_key(entry.name) {
                return Err(Error::DuplicateContractName(entry.name));
            }

            let mut builder = DefinitionBuilder::new();
            (entry.describe)(&mut builder);
            let definition =
                builder.build(entry.name, entry.type_id, entry.rust_type, !options.require_explicit_ids)?;

            let index = repo.definitions.len();
            if let Some(rust_type) = definition.rust_type() {
                repo.by_rust_type.insert(rust_type, index);
            }
            repo.by_type_id.insert(entry.type_id, index);
            repo.by_name.insert(entry.name, index);
            tracing::debug!(
                contract = entry.name,
                type_id = entry.type_id,
                methods = definition.methods().len(),
                properties = definition.properties().len(),
                "contract registered"
            );
            repo.definitions.push(definition);
        }

        tracing::info!(contracts = repo.definitions.len(), "distributed object repository ready");
        Ok(Arc::new(repo))
    }

    pub fn definition<T: DistributedContract>(&self) -> Option<&DistributedObjectDefinition> {
        self.by_rust_type.get(&TypeId::of::<T>()).map(|&i| &self.definitions[i])
    }

    pub fn definition_by_type_id(&self, type_id: u16) -> Option<&DistributedObjectDefinition> {
        self.by_type_id.get(&type_id).map(|&i| &self.definitions[i])
    }

    pub fn definition_by_name(&self, name: &str) -> Option<&DistributedObjectDefinition> {
        self.by_name.get(name).map(|&i| &self.definitions[i])
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Definitions in catalog order.
    pub fn iter(&self) -> impl Iterator<Item = &DistributedObjectDefinition> {
        self.definitions.iter()
    }

    /// Reads a `[type_id][member_id]` header and checks it names a known member.
    pub fn decode_call(&self, r: &mut Reader<'_>) -> Result<(&DistributedObjectDefinition, MemberRef)> {
        let member: MemberRef = r.unpack()?;
        let definition = self.definition_by_type_id(member.type_id).ok_or(Error::UnknownType(member.type_id))?;
        if !definition.has_member(member.member_id) {
            return Err(Error::UnknownMember { type_id: member.type_id, member_id: member.member_id });
        }
        Ok((definition, member))
    }
}
