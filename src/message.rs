use std::fmt::{self, Display};

use bytes::Bytes;

use crate::address::Address;
use crate::correlator::RequestHeader;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u16)]
/// Per-message delivery hints understood by the channel.
pub enum Flag {
    /// Deliver out of band, outside the ordered delivery path.
    Oob = 1,
    /// Never bundle the message with others.
    DontBundle = 1 << 1,
    /// Exempt the message from flow control.
    NoFc = 1 << 2,
    /// Ask the transport to confirm delivery.
    Rsvp = 1 << 3,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
/// A compact set of [`Flag`]s carried on every message.
pub struct Flags(u16);

impl Flags {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn with(self, flag: Flag) -> Self {
        Self(self.0 | flag as u16)
    }

    pub const fn without(self, flag: Flag) -> Self {
        Self(self.0 & !(flag as u16))
    }

    pub const fn is_set(self, flag: Flag) -> bool {
        self.0 & flag as u16 != 0
    }

    pub const fn bits(self) -> u16 {
        self.0
    }
}

impl From<Flag> for Flags {
    fn from(flag: Flag) -> Self {
        Self(flag as u16)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u16)]
/// Flags which only exist while a message travels through the local stack
/// and are never put on the wire.
pub enum TransientFlag {
    /// Do not deliver the node's own multicast back to itself.
    DontLoopback = 1,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
/// A compact set of [`TransientFlag`]s.
pub struct TransientFlags(u16);

impl TransientFlags {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn with(self, flag: TransientFlag) -> Self {
        Self(self.0 | flag as u16)
    }

    pub const fn without(self, flag: TransientFlag) -> Self {
        Self(self.0 & !(flag as u16))
    }

    pub const fn is_set(self, flag: TransientFlag) -> bool {
        self.0 & flag as u16 != 0
    }
}

impl From<TransientFlag> for TransientFlags {
    fn from(flag: TransientFlag) -> Self {
        Self(flag as u16)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
/// Where a message should be delivered.
pub enum Destination {
    /// Every member of the current view.
    Broadcast,
    /// A single member.
    Member(Address),
    /// A subset of members carried in the message itself.
    Anycast(Vec<Address>),
}

#[derive(Clone, Debug)]
/// A message travelling through the channel.
///
/// The payload is an opaque byte range; the core never looks inside it.
/// Messages are built immutably, except for the source address which the
/// transport stamps on the way out.
pub struct Message {
    dest: Destination,
    src: Option<Address>,
    payload: Bytes,
    flags: Flags,
    transient_flags: TransientFlags,
    header: Option<RequestHeader>,
}

impl Message {
    pub fn new(dest: Destination, payload: Bytes) -> Self {
        Self {
            dest,
            src: None,
            payload,
            flags: Flags::empty(),
            transient_flags: TransientFlags::empty(),
            header: None,
        }
    }

    pub fn with_flags(mut self, flags: Flags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_transient_flags(mut self, flags: TransientFlags) -> Self {
        self.transient_flags = flags;
        self
    }

    pub fn with_header(mut self, header: RequestHeader) -> Self {
        self.header = Some(header);
        self
    }

    pub fn dest(&self) -> &Destination {
        &self.dest
    }

    pub fn src(&self) -> Option<&Address> {
        self.src.as_ref()
    }

    /// Stamps the sender. Called by the transport on the way down.
    pub fn set_src(&mut self, src: Address) {
        self.src = Some(src);
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn flags(&self) -> Flags {
        self.flags
    }

    pub fn transient_flags(&self) -> TransientFlags {
        self.transient_flags
    }

    pub fn header(&self) -> Option<RequestHeader> {
        self.header
    }
}

impl Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let src = self
            .src
            .as_ref()
            .map(|s| s.to_string())
            .unwrap_or_else(|| "<unset>".to_string());
        match &self.dest {
            Destination::Broadcast => write!(f, "{src} -> <all>"),
            Destination::Member(dest) => write!(f, "{src} -> {dest}"),
            Destination::Anycast(dests) => write!(f, "{src} -> <{} members>", dests.len()),
        }?;
        write!(f, " ({} bytes)", self.payload.len())
    }
}

#[derive(Debug, Default)]
/// Several messages delivered up from the transport as one unit.
pub struct MessageBatch {
    messages: Vec<Message>,
}

impl MessageBatch {
    pub fn new(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

impl IntoIterator for MessageBatch {
    type Item = Message;
    type IntoIter = std::vec::IntoIter<Message>;

    fn into_iter(self) -> Self::IntoIter {
        self.messages.into_iter()
    }
}
