use std::fmt::{self, Display};

use bytes::Bytes;

use crate::address::Address;

#[derive(Clone, Debug, Default, PartialEq)]
/// The outcome recorded for one expected responder.
pub enum RspValue {
    /// Nothing has arrived for the responder yet.
    #[default]
    NotReceived,
    /// The responder's handler produced a value.
    Value(Bytes),
    /// The responder's handler failed; the failure text travelled back.
    Exception(String),
    /// The responder was suspected or left the view before replying.
    Suspected,
    /// The transport could not reach the responder.
    Unreachable,
}

impl RspValue {
    /// Whether an actual reply (value or failure) came back from the member.
    pub fn is_received(&self) -> bool {
        matches!(self, Self::Value(_) | Self::Exception(_))
    }

    /// Whether the slot counts toward completion. Everything except
    /// [`RspValue::NotReceived`] does.
    pub fn is_resolved(&self) -> bool {
        !matches!(self, Self::NotReceived)
    }

    pub fn is_suspected(&self) -> bool {
        matches!(self, Self::Suspected)
    }

    /// The value, if one was received.
    pub fn value(&self) -> Option<&Bytes> {
        match self {
            Self::Value(bytes) => Some(bytes),
            _ => None,
        }
    }
}

impl Display for RspValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotReceived => f.write_str("not-received"),
            Self::Value(bytes) => write!(f, "value({} bytes)", bytes.len()),
            Self::Exception(text) => write!(f, "exception({text})"),
            Self::Suspected => f.write_str("suspected"),
            Self::Unreachable => f.write_str("unreachable"),
        }
    }
}

#[derive(Clone, Debug)]
/// One responder slot: the responder's address plus whatever outcome has
/// been recorded for it so far.
pub struct Rsp {
    sender: Address,
    value: RspValue,
}

impl Rsp {
    pub(crate) fn new(sender: Address) -> Self {
        Self {
            sender,
            value: RspValue::NotReceived,
        }
    }

    pub fn sender(&self) -> &Address {
        &self.sender
    }

    pub fn value(&self) -> &RspValue {
        &self.value
    }

    pub fn is_received(&self) -> bool {
        self.value.is_received()
    }

    pub fn is_suspected(&self) -> bool {
        self.value.is_suspected()
    }

    pub(crate) fn set_value(&mut self, value: RspValue) {
        self.value = value;
    }
}

impl Display for Rsp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.sender, self.value)
    }
}

#[derive(Clone, Debug, Default)]
/// One [`Rsp`] per expected responder, in send order.
pub struct RspList {
    rsps: Vec<Rsp>,
}

impl RspList {
    pub(crate) fn new(rsps: Vec<Rsp>) -> Self {
        Self { rsps }
    }

    /// The slot recorded for `member`, if it was an expected responder.
    pub fn get(&self, member: &Address) -> Option<&Rsp> {
        self.rsps.iter().find(|rsp| rsp.sender() == member)
    }

    pub fn first(&self) -> Option<&Rsp> {
        self.rsps.first()
    }

    /// The first value that actually arrived, if any.
    pub fn first_value(&self) -> Option<&Bytes> {
        self.rsps.iter().find_map(|rsp| rsp.value().value())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Rsp> {
        self.rsps.iter()
    }

    /// All values that actually arrived, in send order.
    pub fn values(&self) -> impl Iterator<Item = &Bytes> {
        self.rsps.iter().filter_map(|rsp| rsp.value().value())
    }

    pub fn num_received(&self) -> usize {
        self.rsps.iter().filter(|rsp| rsp.is_received()).count()
    }

    pub fn num_suspected(&self) -> usize {
        self.rsps.iter().filter(|rsp| rsp.is_suspected()).count()
    }

    pub fn num_not_received(&self) -> usize {
        self.rsps
            .iter()
            .filter(|rsp| !rsp.value().is_resolved())
            .count()
    }

    pub fn len(&self) -> usize {
        self.rsps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rsps.is_empty()
    }
}

impl Display for RspList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, rsp) in self.rsps.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{rsp}")?;
        }
        f.write_str("}")
    }
}

impl<'a> IntoIterator for &'a RspList {
    type Item = &'a Rsp;
    type IntoIter = std::slice::Iter<'a, Rsp>;

    fn into_iter(self) -> Self::IntoIter {
        self.rsps.iter()
    }
}
