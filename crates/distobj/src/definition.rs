//! # Definitions
//!
//! A contract describes its members through a [`DefinitionBuilder`]; the
//! repository turns those declarations into a frozen
//! [`DistributedObjectDefinition`] with a numeric id per member.
//!
//! ## Id assignment
//!
//! Declaration order in the builder is canonical:
//!
//! 1. Properties first: explicit id, else `200 + counter`.
//! 2. Methods next, skipping accessor names (`get_*`, `set_*`): explicit id,
//!    else `100 + counter`.
//! 3. `counter` is shared by both kinds and bumped once per member before use,
//!    so property `Name` followed by method `Hello` gets 201 and 102.

use std::any::TypeId;
use std::collections::HashMap;
use std::collections::HashSet;

use wirepack::Pack;
use wirepack::Reader;
use wirepack::Unpack;
use wirepack::Writer;

use crate::error::Error;
use crate::error::Result;

pub const METHOD_ID_BASE: u32 = 100;
pub const PROPERTY_ID_BASE: u32 = 200;

/// Shape of a value crossing the wire as a method argument, return or property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Bool,
    I32,
    I64,
    U32,
    U64,
    F32,
    F64,
    Str,
    Bytes,
    /// Another distributed object, sent as its id.
    Object(u16),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor {
    id: u16,
    name: String,
    params: Vec<ValueKind>,
    returns: Option<ValueKind>,
}

impl MethodDescriptor {
    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[ValueKind] {
        &self.params
    }

    pub fn returns(&self) -> Option<ValueKind> {
        self.returns
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyDescriptor {
    id: u16,
    name: String,
    kind: ValueKind,
}

impl PropertyDescriptor {
    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ValueKind {
        self.kind
    }
}

struct PropertyDecl {
    id: Option<u16>,
    name: String,
    kind: ValueKind,
}

struct MethodDecl {
    id: Option<u16>,
    name: String,
    params: Vec<ValueKind>,
    returns: Option<ValueKind>,
}

/// Collects a contract's member declarations, in order.
#[derive(Default)]
pub struct DefinitionBuilder {
    properties: Vec<PropertyDecl>,
    methods: Vec<MethodDecl>,
}

impl DefinitionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn property(&mut self, name: &str, kind: ValueKind) -> &mut Self {
        self.properties.push(PropertyDecl { id: None, name: name.to_string(), kind });
        self
    }

    pub fn property_with_id(&mut self, id: u16, name: &str, kind: ValueKind) -> &mut Self {
        self.properties.push(PropertyDecl { id: Some(id), name: name.to_string(), kind });
        self
    }

    pub fn method(&mut self, name: &str, params: &[ValueKind], returns: Option<ValueKind>) -> &mut Self {
        self.methods.push(MethodDecl { id: None, name: name.to_string(), params: params.to_vec(), returns });
        self
    }

    pub fn method_with_id(
        &mut self,
        id: u16,
        name: &str,
        params: &[ValueKind],
        returns: Option<ValueKind>,
    ) -> &mut Self {
        self.methods.push(MethodDecl { id: Some(id), name: name.to_string(), params: params.to_vec(), returns });
        self
    }

    /// Assigns ids and indexes the members.
    pub(crate) fn build(
        self,
        contract: &'static str,
        type_id: u16,
        rust_type: Option<TypeId>,
        allow_auto_ids: bool,
    ) -> Result<DistributedObjectDefinition> {
        let mut counter: u32 = 0;
        let mut used_ids = HashSet::new();
        let mut assign = |explicit: Option<u16>, base: u32, member: &str| -> Result<u16> {
            counter += 1;
            let id = match explicit {
                Some(id) => id,
                None => {
                    if !allow_auto_ids {
                        return Err(Error::ImplicitId { contract, member: member.to_string() });
                    }
                    let id = u16::try_from(base + counter)
                        .map_err(|_| Error::IdOverflow { contract, member: member.to_string() })?;
                    tracing::warn!(contract, member, id, "auto-assigned member id, declare it explicitly");
                    id
                }
            };
            if !used_ids.insert(id) {
                return Err(Error::DuplicateMemberId { contract, id });
            }
            Ok(id)
        };

        let mut properties = Vec::with_capacity(self.properties.len());
        for decl in self.properties {
            let id = assign(decl.id, PROPERTY_ID_BASE, &decl.name)?;
            properties.push(PropertyDescriptor { id, name: decl.name, kind: decl.kind });
        }

        let mut methods = Vec::with_capacity(self.methods.len());
        for decl in self.methods {
            if is_accessor(&decl.name) {
                tracing::debug!(contract, method = %decl.name, "skipping accessor");
                continue;
            }
            let id = assign(decl.id, METHOD_ID_BASE, &decl.name)?;
            methods.push(MethodDescriptor { id, name: decl.name, params: decl.params, returns: decl.returns });
        }

        let mut method_ids = HashMap::new();
        let mut method_names = HashMap::new();
        for (index, method) in methods.iter().enumerate() {
            method_ids.insert(method.id, index);
            if method_names.insert(method.name.clone(), index).is_some() {
                return Err(Error::DuplicateMemberName { contract, name: method.name.clone() });
            }
        }

        let mut property_ids = HashMap::new();
        let mut property_names = HashMap::new();
        for (index, property) in properties.iter().enumerate() {
            property_ids.insert(property.id, index);
            if property_names.insert(property.name.clone(), index).is_some() {
                return Err(Error::DuplicateMemberName { contract, name: property.name.clone() });
            }
        }

        Ok(DistributedObjectDefinition {
            name: contract,
            type_id,
            rust_type,
            methods,
            properties,
            method_ids,
            method_names,
            property_ids,
            property_names,
        })
    }
}

fn is_accessor(name: &str) -> bool {
    name.starts_with("get_") || name.starts_with("set_")
}

/// Frozen id mapping for one contract.
#[derive(Debug)]
pub struct DistributedObjectDefinition {
    name: &'static str,
    type_id: u16,
    rust_type: Option<TypeId>,
    methods: Vec<MethodDescriptor>,
    properties: Vec<PropertyDescriptor>,
    method_ids: HashMap<u16, usize>,
    method_names: HashMap<String, usize>,
    property_ids: HashMap<u16, usize>,
    property_names: HashMap<String, usize>,
}

impl DistributedObjectDefinition {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn type_id(&self) -> u16 {
        self.type_id
    }

    pub(crate) fn rust_type(&self) -> Option<TypeId> {
        self.rust_type
    }

    /// Methods in declaration order, accessors excluded.
    pub fn methods(&self) -> &[MethodDescriptor] {
        &self.methods
    }

    pub fn properties(&self) -> &[PropertyDescriptor] {
        &self.properties
    }

    pub fn method(&self, id: u16) -> Option<&MethodDescriptor> {
        self.method_ids.get(&id).map(|&i| &self.methods[i])
    }

    pub fn method_id(&self, name: &str) -> Option<u16> {
        self.method_names.get(name).map(|&i| self.methods[i].id)
    }

    pub fn property(&self, id: u16) -> Option<&PropertyDescriptor> {
        self.property_ids.get(&id).map(|&i| &self.properties[i])
    }

    pub fn property_id(&self, name: &str) -> Option<u16> {
        self.property_names.get(name).map(|&i| self.properties[i].id)
    }

    pub fn has_member(&self, id: u16) -> bool {
        self.method_ids.contains_key(&id) || self.property_ids.contains_key(&id)
    }

    /// Reference to a method or property by name; methods are checked first.
    pub fn member_ref(&self, name: &str) -> Option<MemberRef> {
        self.method_id(name)
            .or_else(|| self.property_id(name))
            .map(|member_id| MemberRef { type_id: self.type_id, member_id })
    }

    /// Writes `[type_id u16][member_id u16]` for a member of this contract.
    pub fn encode_call(&self, w: &mut Writer, member_id: u16) -> Result<()> {
        if !self.has_member(member_id) {
            return Err(Error::UnknownMember { type_id: self.type_id, member_id });
        }
        w.pack(&MemberRef { type_id: self.type_id, member_id })?;
        Ok(())
    }
}

/// A member addressed by numbers only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemberRef {
    pub type_id: u16,
    pub member_id: u16,
}

impl Pack for MemberRef {
    fn pack(&self, w: &mut Writer) -> wirepack::Result<()> {
        w.u16(self.type_id).u16(self.member_id);
        Ok(())
    }
}

impl Unpack for MemberRef {
    fn unpack(r: &mut Reader<'_>) -> wirepack::Result<Self> {
        Ok(Self { type_id: r.u16()?, member_id: r.u16()? })
    }
}
