use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::address::Address;
use crate::event::UpHandler;
use crate::message::Message;
use crate::view::View;

#[derive(Debug, Error)]
/// Failures surfaced by the channel when handing a message down.
pub enum ChannelError {
    #[error("channel is not connected")]
    NotConnected,

    #[error("{0} cannot be reached")]
    Unreachable(Address),

    #[error("{0}")]
    Io(#[from] io::Error),

    #[error("{0}")]
    /// A transport-specific failure.
    Transport(String),
}

#[async_trait]
/// The messaging channel the dispatcher sits on.
///
/// The channel is expected to provide ordered delivery to a dynamically
/// changing member set and to feed views, suspicions and messages back
/// through the installed [`UpHandler`]. Everything else (retransmission,
/// flow control, ordering) is the channel's business.
pub trait GroupChannel: Send + Sync + 'static {
    /// Hands a message down to the transport. May apply backpressure.
    async fn send(&self, msg: Message) -> Result<(), ChannelError>;

    /// The current view, if one has been installed yet.
    fn view(&self) -> Option<View>;

    /// The address of the local member, once known.
    fn local_addr(&self) -> Option<Address>;

    /// Whether the channel swallows the node's own multicasts instead of
    /// looping them back.
    fn discard_own_messages(&self) -> bool {
        false
    }

    fn is_connected(&self) -> bool;

    /// Installs the consumer for everything flowing up from the channel.
    fn set_up_handler(&self, handler: Arc<dyn UpHandler>);
}
