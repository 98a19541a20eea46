//! # Service Contracts
//!
//! A contract is the table of messages a service understands: each member has a
//! name, a direction, a message code and, for calls that answer, a reply code.
//!
//! Contracts are built once per service type and shared by every owner and
//! client of that type, typically from a `LazyLock`.

use std::collections::HashMap;

use crate::envelope::MessageCode;
use crate::envelope::codes;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Sent by clients, handled by the owner.
    ToOwner,
    /// Pushed by the owner to client channels.
    ToClients,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Member {
    name: &'static str,
    direction: Direction,
    code: MessageCode,
    reply: Option<MessageCode>,
}

impl Member {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn code(&self) -> MessageCode {
        self.code
    }

    /// Reply code, if this member answers. `None` means fire-and-forget.
    pub fn reply(&self) -> Option<MessageCode> {
        self.reply
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    DuplicateName { service: &'static str, name: &'static str },
    DuplicateCode { service: &'static str, code: MessageCode },
    DuplicateReplyCode { service: &'static str, code: MessageCode },
    ReservedCode { service: &'static str, name: &'static str, code: MessageCode },
    /// Owners push without expecting an answer.
    ReplyOnPush { service: &'static str, name: &'static str },
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateName { service, name } => write!(f, "{}: member {} declared twice", service, name),
            Self::DuplicateCode { service, code } => write!(f, "{}: code {} used twice", service, code),
            Self::DuplicateReplyCode { service, code } => write!(f, "{}: reply code {} used twice", service, code),
            Self::ReservedCode { service, name, code } => {
                write!(f, "{}: member {} uses reserved code {} (first free is {})", service, name, code, codes::FIRST_APPLICATION)
            }
            Self::ReplyOnPush { service, name } => write!(f, "{}: push member {} cannot have a reply", service, name),
        }
    }
}

impl std::error::Error for Error {}

#[derive(Debug, Clone)]
pub struct ServiceContract {
    service: &'static str,
    members: Vec<Member>,
    by_name: HashMap<&'static str, usize>,
    by_code: HashMap<MessageCode, usize>,
}

impl ServiceContract {
    pub fn builder(service: &'static str) -> ContractBuilder {
        ContractBuilder { service, members: Vec::new() }
    }

    /// Service name, also the name owners advertise for discovery.
    pub fn service(&self) -> &'static str {
        self.service
    }

    pub fn members(&self) -> &[Member] {
        &self.members
    }

    pub fn member(&self, name: &str) -> Option<&Member> {
        self.by_name.get(name).map(|&i| &self.members[i])
    }

    pub fn member_by_code(&self, code: MessageCode) -> Option<&Member> {
        self.by_code.get(&code).map(|&i| &self.members[i])
    }
}

pub struct ContractBuilder {
    service: &'static str,
    members: Vec<Member>,
}

impl ContractBuilder {
    /// A client-to-owner member that answers with `reply`.
    pub fn call(mut self, name: &'static str, code: MessageCode, reply: MessageCode) -> Self {
        self.members.push(Member { name, direction: Direction::ToOwner, code, reply: Some(reply) });
        self
    }

    /// A fire-and-forget client-to-owner member.
    pub fn send(mut self, name: &'static str, code: MessageCode) -> Self {
        self.members.push(Member { name, direction: Direction::ToOwner, code, reply: None });
        self
    }

    /// An owner-to-clients push.
    pub fn push(mut self, name: &'static str, code: MessageCode) -> Self {
        self.members.push(Member { name, direction: Direction::ToClients, code, reply: None });
        self
    }

    pub fn member(mut self, name: &'static str, direction: Direction, code: MessageCode, reply: Option<MessageCode>) -> Self {
        self.members.push(Member { name, direction, code, reply });
        self
    }

    pub fn build(self) -> Result<ServiceContract, Error> {
        let service = self.service;
        let mut by_name = HashMap::with_capacity(self.members.len());
        let mut by_code = HashMap::with_capacity(self.members.len());
        let mut replies: HashMap<MessageCode, &'static str> = HashMap::new();

        for (index, member) in self.members.iter().enumerate() {
            if member.code < codes::FIRST_APPLICATION {
                return Err(Error::ReservedCode { service, name: member.name, code: member.code });
            }
            if by_name.insert(member.name, index).is_some() {
                return Err(Error::DuplicateName { service, name: member.name });
            }
            if by_code.insert(member.code, index).is_some() {
                return Err(Error::DuplicateCode { service, code: member.code });
            }
            if let Some(reply) = member.reply {
                if member.direction == Direction::ToClients {
                    return Err(Error::ReplyOnPush { service, name: member.name });
                }
                if reply < codes::FIRST_APPLICATION {
                    return Err(Error::ReservedCode { service, name: member.name, code: reply });
                }
                if replies.insert(reply, member.name).is_some() {
                    return Err(Error::DuplicateReplyCode { service, code: reply });
                }
            }
        }

        Ok(ServiceContract { service, members: self.members, by_name, by_code })
    }
}
