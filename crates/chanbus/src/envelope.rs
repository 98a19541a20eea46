//! # Envelope
//!
//! The unit of routing: a code, a set of destination channels, the origin
//! channel (where replies go), and an opaque payload.
//!
//! ## Frame
//!
//! `[Code: u32][DestCount: u16][Dest: u64 * DestCount][Origin: u64][PayloadLen: u32][Payload]`
//!
//! All Little-Endian, written with `wirepack`.

use std::collections::HashSet;

use wirepack::Pack;
use wirepack::Reader;
use wirepack::Writer;

use crate::channel::Channel;

/// Identifies what a message means to its receiver.
pub type MessageCode = u32;

/// Codes with a fixed meaning on every node.
pub mod codes {
    use super::MessageCode;

    pub const DISCOVER_SERVICE: MessageCode = 1;
    pub const DISCOVER_SERVICE_RESP: MessageCode = 2;
    pub const BATCH: MessageCode = 3;

    /// Contract members must use codes at or above this.
    pub const FIRST_APPLICATION: MessageCode = 16;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    NoDestinations,
    TooManyDestinations(usize),
    Wire(wirepack::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoDestinations => write!(f, "Envelope has no destinations"),
            Self::TooManyDestinations(n) => write!(f, "Envelope has {} destinations (max {})", n, u16::MAX),
            Self::Wire(e) => write!(f, "Envelope encoding: {}", e),
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

/// An immutable routed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    destinations: Vec<Channel>,
    origin: Channel,
    code: MessageCode,
    payload: Vec<u8>,
}

impl Envelope {
    /// Builds an envelope for one or more destinations.
    ///
    /// Repeated destinations are collapsed, keeping first-seen order.
    pub fn new(
        destinations: impl IntoIterator<Item = Channel>,
        origin: Channel,
        code: MessageCode,
        payload: Vec<u8>,
    ) -> Result<Self> {
        let destinations = destinations.into_iter();
        let mut unique: Vec<Channel> = Vec::with_capacity(destinations.size_hint().0);
        let mut seen = HashSet::with_capacity(destinations.size_hint().0);
        for dest in destinations {
            if seen.insert(dest) {
                unique.push(dest);
            }
        }
        if unique.is_empty() {
            return Err(Error::NoDestinations);
        }
        if unique.len() > u16::MAX as usize {
            return Err(Error::TooManyDestinations(unique.len()));
        }
        Ok(Self { destinations: unique, origin, code, payload })
    }

    /// Single-destination envelope. Cannot fail.
    pub fn direct(destination: Channel, origin: Channel, code: MessageCode, payload: Vec<u8>) -> Self {
        Self { destinations: vec![destination], origin, code, payload }
    }

    /// Single-destination envelope with a packed payload.
    pub fn packed<T: Pack + ?Sized>(
        destination: Channel,
        origin: Channel,
        code: MessageCode,
        value: &T,
    ) -> Result<Self> {
        let mut w = Writer::new();
        value.pack(&mut w)?;
        Ok(Self::direct(destination, origin, code, w.into_bytes()))
    }

    pub fn destinations(&self) -> &[Channel] {
        &self.destinations
    }

    pub fn origin(&self) -> Channel {
        self.origin
    }

    pub fn code(&self) -> MessageCode {
        self.code
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// A reader positioned at the start of the payload.
    pub fn reader(&self) -> Reader<'_> {
        Reader::new(&self.payload)
    }

    pub fn is_addressed_to(&self, channel: Channel) -> bool {
        self.destinations.contains(&channel)
    }

    /// Appends the frame encoding to `w`.
    pub fn encode(&self, w: &mut Writer) -> Result<()> {
        w.u32(self.code);
        w.u16(self.destinations.len() as u16);
        for dest in &self.destinations {
            w.u64(dest.0);
        }
        w.u64(self.origin.0);
        w.bytes(&self.payload)?;
        Ok(())
    }

    pub fn to_frame(&self) -> Result<Vec<u8>> {
        let mut w = Writer::with_capacity(18 + 8 * self.destinations.len() + self.payload.len());
        self.encode(&mut w)?;
        Ok(w.into_bytes())
    }

    /// Reads one envelope from `r`.
    pub fn decode(r: &mut Reader<'_>) -> Result<Self> {
        let code = r.u32()?;
        let count = r.u16()? as usize;
        let mut destinations = Vec::with_capacity(count.min(r.remaining() / 8));
        for _ in 0..count {
            destinations.push(Channel(r.u64()?));
        }
        let origin = Channel(r.u64()?);
        let payload = r.bytes()?.to_vec();
        Self::new(destinations, origin, code, payload)
    }

    /// Decodes a frame that must contain exactly one envelope.
    pub fn from_frame(frame: &[u8]) -> Result<Self> {
        let mut r = Reader::new(frame);
        let envelope = Self::decode(&mut r)?;
        r.finish()?;
        Ok(envelope)
    }
}
