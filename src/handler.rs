use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::address::Address;
use crate::message::Message;
use crate::view::View;

#[async_trait]
/// The application side of an incoming call.
///
/// The handler runs on the delivery task when dispatching is synchronous, or
/// on its own task when the dispatcher was built with asynchronous
/// dispatching. Returning an error sends the failure text back to the caller
/// instead of a value.
pub trait RequestHandler: Send + Sync {
    async fn on_request(&self, request: Message) -> anyhow::Result<Bytes>;
}

/// Callbacks for membership activity observed by the dispatcher.
///
/// Failures must stay inside the listener; the dispatcher does not guard
/// against panics here.
pub trait MembershipListener: Send + Sync {
    /// A new view was installed.
    fn view_accepted(&self, _view: &View) {}

    /// A member is believed to be unreachable.
    fn suspect(&self, _member: &Address) {}

    /// The flush protocol asked the node to stop sending.
    fn block(&self) {}

    /// Sending may resume.
    fn unblock(&self) {}
}

impl<T: MembershipListener + ?Sized> MembershipListener for Arc<T> {
    fn view_accepted(&self, view: &View) {
        (**self).view_accepted(view)
    }

    fn suspect(&self, member: &Address) {
        (**self).suspect(member)
    }

    fn block(&self) {
        (**self).block()
    }

    fn unblock(&self) {
        (**self).unblock()
    }
}

#[async_trait]
/// Provides and installs the application state during state transfer.
pub trait StateListener: Send + Sync {
    /// Serializes the current application state.
    async fn get_state(&self) -> io::Result<Bytes>;

    /// Installs state received from another member.
    async fn set_state(&self, state: Bytes) -> io::Result<()>;
}

#[async_trait]
impl<T: StateListener + ?Sized> StateListener for Arc<T> {
    async fn get_state(&self) -> io::Result<Bytes> {
        (**self).get_state().await
    }

    async fn set_state(&self, state: Bytes) -> io::Result<()> {
        (**self).set_state(state).await
    }
}

/// Callbacks for channel lifecycle changes.
pub trait ChannelListener: Send + Sync {
    fn channel_connected(&self) {}

    fn channel_disconnected(&self) {}

    fn channel_closed(&self) {}
}
