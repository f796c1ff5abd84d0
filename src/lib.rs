//! # Convoke
//!
//! Synchronous and asynchronous group request/response dispatching on top of
//! a virtual-synchrony channel.
//!
//! A channel gives you one-way, ordered delivery to a dynamically changing
//! set of peers. Most group-communication patterns need more than that: send
//! a request to the group and wait for all responses, or for a majority, or
//! just for the first one. Convoke layers exactly that on top of any channel:
//! it correlates responses back to outstanding requests across view changes,
//! suspicions and deadlines, and hands incoming calls to your request
//! handler.
//!
//! ## Features
//! - Unicast, multicast and anycast calls, blocking or future-returning.
//! - Completion modes: all, majority, first, or fire-and-forget.
//! - Per-request deadlines, response filters and exclusion lists.
//! - Membership-aware: suspected or departed members resolve their slots
//!   instead of stalling callers.
//! - Live call statistics with an operational probe surface.
//!
//! ## Getting started
//!
//! ```rust
//! use bytes::Bytes;
//! use convoke::test_utils::{EchoHandler, LocalSwitch};
//! use convoke::{Address, DispatcherBuilder, RequestOptions};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     // An in-process switch stands in for a real transport here.
//!     let switch = LocalSwitch::new();
//!     let a = Address::from("a");
//!     let b = Address::from("b");
//!
//!     let node_a = DispatcherBuilder::new(switch.attach(a.clone()))
//!         .with_request_handler(EchoHandler)
//!         .build();
//!     let _node_b = DispatcherBuilder::new(switch.attach(b.clone()))
//!         .with_request_handler(EchoHandler)
//!         .build();
//!     switch.install_view(&[a, b.clone()]).await;
//!
//!     let reply = node_a
//!         .send_message(b, Bytes::from_static(b"ping"), RequestOptions::sync())
//!         .await?;
//!     assert_eq!(reply, Some(Bytes::from_static(b"ping")));
//!     Ok(())
//! }
//! ```

mod address;
mod channel;
mod collector;
mod correlator;
mod dispatcher;
mod error;
mod event;
mod handler;
mod message;
mod options;
mod probe;
mod request;
mod rsp;
mod stats;
pub mod test_utils;
mod view;

pub(crate) const SCRATCH_SPACE: usize = 4096;

pub use address::Address;
pub use channel::{ChannelError, GroupChannel};
pub use collector::ResponseCollector;
pub use correlator::{HeaderKind, InvalidHeader, RequestCorrelator, RequestHeader};
pub use dispatcher::{Dispatcher, DispatcherBuilder};
pub use error::DispatchError;
pub use event::{Event, UpHandler};
pub use handler::{ChannelListener, MembershipListener, RequestHandler, StateListener};
pub use message::{
    Destination,
    Flag,
    Flags,
    Message,
    MessageBatch,
    TransientFlag,
    TransientFlags,
};
pub use options::{RequestOptions, ResponseMode, RspFilter, DEFAULT_TIMEOUT};
pub use probe::{ProbeHandler, RpcProbeHandler};
pub use request::{GroupRequest, UnicastRequest};
pub use rsp::{Rsp, RspList, RspValue};
pub use stats::{Counter, DestinationTiming, RpcStats};
pub use view::{View, ViewId};
