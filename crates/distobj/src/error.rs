/// Registry errors. Every one of them is fatal at startup except the lookup
/// failures (`UnknownType`, `UnknownMember`), which come from bad wire input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A catalogued contract does not implement the base distributed-object capability.
    MissingBaseCapability { contract: &'static str },
    DuplicateTypeId { type_id: u16, first: &'static str, second: &'static str },
    DuplicateContractName(&'static str),
    DuplicateMemberId { contract: &'static str, id: u16 },
    DuplicateMemberName { contract: &'static str, name: String },
    /// A member has no explicit id and auto ids are not allowed.
    ImplicitId { contract: &'static str, member: String },
    /// An auto id does not fit in `u16`.
    IdOverflow { contract: &'static str, member: String },
    UnknownType(u16),
    UnknownMember { type_id: u16, member_id: u16 },
    Wire(wirepack::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingBaseCapability { contract } => {
                write!(f, "contract '{}' is not a distributed object", contract)
            }
            Self::DuplicateTypeId { type_id, first, second } => {
                write!(f, "type id {} claimed by both '{}' and '{}'", type_id, first, second)
            }
            Self::DuplicateContractName(name) => write!(f, "contract '{}' catalogued twice", name),
            Self::DuplicateMemberId { contract, id } => write!(f, "'{}': member id {} used twice", contract, id),
            Self::DuplicateMemberName { contract, name } => {
                write!(f, "'{}': member '{}' declared twice", contract, name)
            }
            Self::ImplicitId { contract, member } => {
                write!(f, "'{}': member '{}' needs an explicit id", contract, member)
            }
            Self::IdOverflow { contract, member } => {
                write!(f, "'{}': auto id for '{}' does not fit in u16", contract, member)
            }
            Self::UnknownType(id) => write!(f, "no contract with type id {}", id),
            Self::UnknownMember { type_id, member_id } => {
                write!(f, "type {} has no member {}", type_id, member_id)
            }
            Self::Wire(e) => write!(f, "wire error: {}", e),
        }
    }
}

impl std::error::Error for Error {}

impl From<wirepack::Error> for Error {
    fn from(e: wirepack::Error) -> Self {
        Self::Wire(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
