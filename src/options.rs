use std::fmt::{self, Debug};
use std::sync::Arc;
use std::time::Duration;

use crate::address::Address;
use crate::message::{Flag, Flags, TransientFlag, TransientFlags};
use crate::rsp::RspValue;

/// The default deadline used by [`RequestOptions::sync`].
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
/// How many responses a request needs before it is considered done.
pub enum ResponseMode {
    /// Fire and forget. The request completes as soon as it is sent.
    GetNone,
    /// The first value or failure completes the request.
    GetFirst,
    /// A simple majority of the expected responders completes the request.
    GetMajority,
    /// Every expected responder has to be accounted for.
    #[default]
    GetAll,
}

/// Lets callers drop individual responses or cut a request short.
///
/// The filter runs on the requester, once per incoming response, before the
/// response is recorded.
pub trait RspFilter: Send + Sync {
    /// Whether the response should be recorded for `sender`. Rejected
    /// responses leave the slot untouched.
    fn is_acceptable(&self, sender: &Address, rsp: &RspValue) -> bool;

    /// Returning `false` completes the request early, regardless of the
    /// completion mode.
    fn needs_more_responses(&self) -> bool {
        true
    }
}

#[derive(Clone, Default)]
/// Everything that governs a single request: completion mode, deadline,
/// delivery flags, anycast behavior, response filtering and exclusions.
pub struct RequestOptions {
    mode: ResponseMode,
    timeout: Duration,
    anycasting: bool,
    use_anycast_addresses: bool,
    filter: Option<Arc<dyn RspFilter>>,
    flags: Flags,
    transient_flags: TransientFlags,
    exclusion_list: Vec<Address>,
}

impl RequestOptions {
    pub fn new(mode: ResponseMode, timeout: Duration) -> Self {
        Self {
            mode,
            timeout,
            ..Default::default()
        }
    }

    /// A synchronous call waiting for all responses, with the default
    /// deadline.
    pub fn sync() -> Self {
        Self::new(ResponseMode::GetAll, DEFAULT_TIMEOUT)
    }

    /// An asynchronous call which completes at send time.
    pub fn fire_and_forget() -> Self {
        Self::new(ResponseMode::GetNone, DEFAULT_TIMEOUT)
    }

    pub fn with_mode(mut self, mode: ResponseMode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets the deadline for the blocking wait. Zero waits indefinitely.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Turns a group call into multiple unicasts instead of one multicast.
    pub fn with_anycasting(mut self, anycasting: bool) -> Self {
        self.anycasting = anycasting;
        self
    }

    /// When anycasting, send one message carrying the destination list
    /// instead of a unicast per destination.
    pub fn with_anycast_addresses(mut self, flag: bool) -> Self {
        self.use_anycast_addresses = flag;
        self
    }

    pub fn with_rsp_filter(mut self, filter: Arc<dyn RspFilter>) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_flag(mut self, flag: Flag) -> Self {
        self.flags = self.flags.with(flag);
        self
    }

    pub fn with_transient_flag(mut self, flag: TransientFlag) -> Self {
        self.transient_flags = self.transient_flags.with(flag);
        self
    }

    /// Members which must never be part of the destination set.
    pub fn with_exclusion_list(mut self, members: impl IntoIterator<Item = Address>) -> Self {
        self.exclusion_list.extend(members);
        self
    }

    pub fn mode(&self) -> ResponseMode {
        self.mode
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn anycasting(&self) -> bool {
        self.anycasting
    }

    pub fn use_anycast_addresses(&self) -> bool {
        self.use_anycast_addresses
    }

    pub fn rsp_filter(&self) -> Option<&Arc<dyn RspFilter>> {
        self.filter.as_ref()
    }

    pub fn flags(&self) -> Flags {
        self.flags
    }

    pub fn transient_flags(&self) -> TransientFlags {
        self.transient_flags
    }

    pub fn exclusion_list(&self) -> &[Address] {
        &self.exclusion_list
    }
}

impl Debug for RequestOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestOptions")
            .field("mode", &self.mode)
            .field("timeout", &self.timeout)
            .field("anycasting", &self.anycasting)
            .field("use_anycast_addresses", &self.use_anycast_addresses)
            .field("has_filter", &self.filter.is_some())
            .field("flags", &self.flags)
            .field("transient_flags", &self.transient_flags)
            .field("exclusion_list", &self.exclusion_list)
            .finish()
    }
}
