use std::time::Duration;

use thiserror::Error;

use crate::address::Address;
use crate::channel::ChannelError;

#[derive(Debug, Error)]
/// Failures surfaced by the dispatch entry points.
pub enum DispatchError {
    #[error("channel is not connected")]
    NotConnected,

    #[error("no response within {0:?}")]
    /// The deadline elapsed before the target replied. Only raised by
    /// blocking unicast calls; group calls report partial results through
    /// the response list instead.
    Timeout(Duration),

    #[error("{0} was suspected before it replied")]
    Suspected(Address),

    #[error("{0} could not be reached")]
    Unreachable(Address),

    #[error("remote handler failed: {0}")]
    /// The handler on the responder produced a failure.
    Remote(String),

    #[error("failed to hand the request to the channel: {0}")]
    Send(#[from] ChannelError),
}
