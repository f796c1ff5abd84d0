use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::DuplexStream;
use tokio::sync::oneshot;

use crate::address::Address;
use crate::message::{Message, MessageBatch};
use crate::view::View;

#[derive(Debug)]
/// Everything a channel can deliver to its up-handler.
pub enum Event {
    /// A message delivered by the transport.
    Message(Message),

    /// A new view has been installed by the membership protocol.
    ViewChange(View),

    /// The failure detector believes a member is gone.
    Suspect(Address),

    /// The transport has determined the local member's address.
    SetLocalAddress(Address),

    /// A joiner asked for the application state; the reply carries the
    /// serialized state, or `None` when no state provider is installed.
    GetApplState(oneshot::Sender<Option<Bytes>>),

    /// State received from an existing member, to be installed locally.
    GetStateOk(Bytes),

    /// A stream the application state should be written to.
    StateTransferOutput(DuplexStream),

    /// A stream the application state should be read from.
    StateTransferInput(DuplexStream),

    /// The flush protocol asked members to stop sending.
    Block,

    /// Sending may resume.
    Unblock,
}

#[async_trait]
/// The consumer a channel feeds events into.
///
/// A dispatcher installs itself as the channel's up-handler; other event
/// consumers can be layered the same way.
pub trait UpHandler: Send + Sync {
    /// Handles one event delivered by the channel.
    async fn up(&self, event: Event);

    /// Handles a batch of messages delivered together.
    async fn up_batch(&self, batch: MessageBatch);
}
