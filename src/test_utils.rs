//! In-process channel plumbing for exercising dispatchers without a real
//! transport.
//!
//! A [`LocalSwitch`] connects any number of [`LocalChannel`]s living in the
//! same process: broadcasts fan out to every member of the installed view,
//! unicasts go to one member, anycast-address messages expand to their
//! carried list. Views and suspicions are injected through the switch.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};

use crate::address::Address;
use crate::channel::{ChannelError, GroupChannel};
use crate::event::{Event, UpHandler};
use crate::handler::RequestHandler;
use crate::message::{Destination, Message, TransientFlag};
use crate::view::View;

#[derive(Default)]
/// Routes messages and events between the channels attached to it.
pub struct LocalSwitch {
    channels: Mutex<HashMap<Address, Arc<LocalChannel>>>,
    next_view_id: AtomicU64,
}

impl LocalSwitch {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Creates a channel for `addr` and connects it to the switch.
    pub fn attach(self: &Arc<Self>, addr: Address) -> Arc<LocalChannel> {
        let channel = Arc::new(LocalChannel {
            switch: Arc::downgrade(self),
            local: addr.clone(),
            view: RwLock::new(Arc::new(View::default())),
            handler: RwLock::new(None),
            connected: AtomicBool::new(true),
            discard_own: AtomicBool::new(false),
            sends: AtomicU64::new(0),
        });
        self.channels.lock().insert(addr, channel.clone());
        channel
    }

    /// Installs a view with the given members on every attached channel and
    /// delivers the view event to each of them, in attach order.
    pub async fn install_view(&self, members: &[Address]) -> View {
        let id = self.next_view_id.fetch_add(1, Ordering::Relaxed) + 1;
        let view = View::new(id, members.iter().cloned());

        let channels: Vec<Arc<LocalChannel>> =
            self.channels.lock().values().cloned().collect();
        for channel in channels {
            *channel.view.write() = Arc::new(view.clone());
            let handler = channel.handler.read().clone();
            if let Some(handler) = handler {
                handler.up(Event::ViewChange(view.clone())).await;
            }
        }
        view
    }

    /// Delivers a suspicion for `member` to every attached channel.
    pub async fn suspect(&self, member: &Address) {
        let channels: Vec<Arc<LocalChannel>> =
            self.channels.lock().values().cloned().collect();
        for channel in channels {
            let handler = channel.handler.read().clone();
            if let Some(handler) = handler {
                handler.up(Event::Suspect(member.clone())).await;
            }
        }
    }

    /// Detaches `member`, making it unreachable for subsequent sends.
    pub fn detach(&self, member: &Address) {
        self.channels.lock().remove(member);
    }

    fn deliver(&self, target: &Address, event: Event) -> Result<(), ChannelError> {
        let handler = self
            .channels
            .lock()
            .get(target)
            .and_then(|channel| channel.handler.read().clone());

        match handler {
            Some(handler) => {
                tokio::spawn(async move {
                    handler.up(event).await;
                });
                Ok(())
            },
            None => Err(ChannelError::Unreachable(target.clone())),
        }
    }
}

/// One member's view of the [`LocalSwitch`].
pub struct LocalChannel {
    switch: Weak<LocalSwitch>,
    local: Address,
    view: RwLock<Arc<View>>,
    handler: RwLock<Option<Arc<dyn UpHandler>>>,
    connected: AtomicBool,
    discard_own: AtomicBool,
    sends: AtomicU64,
}

impl LocalChannel {
    pub fn set_connected(&self, flag: bool) {
        self.connected.store(flag, Ordering::Relaxed);
    }

    pub fn set_discard_own_messages(&self, flag: bool) {
        self.discard_own.store(flag, Ordering::Relaxed);
    }

    /// How many messages were handed to this channel so far.
    pub fn messages_sent(&self) -> u64 {
        self.sends.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl GroupChannel for LocalChannel {
    async fn send(&self, mut msg: Message) -> Result<(), ChannelError> {
        if !self.is_connected() {
            return Err(ChannelError::NotConnected);
        }
        let Some(switch) = self.switch.upgrade() else {
            return Err(ChannelError::Transport("switch is gone".to_string()));
        };

        self.sends.fetch_add(1, Ordering::Relaxed);
        msg.set_src(self.local.clone());

        let skip_loopback = self.discard_own_messages()
            || msg.transient_flags().is_set(TransientFlag::DontLoopback);

        match msg.dest().clone() {
            Destination::Member(target) => switch.deliver(&target, Event::Message(msg)),
            Destination::Anycast(targets) => {
                for target in targets {
                    if skip_loopback && target == self.local {
                        continue;
                    }
                    // a missing member is the failure detector's problem
                    let _ = switch.deliver(&target, Event::Message(msg.clone()));
                }
                Ok(())
            },
            Destination::Broadcast => {
                let members = self.view.read().members().to_vec();
                for target in members {
                    if skip_loopback && target == self.local {
                        continue;
                    }
                    let _ = switch.deliver(&target, Event::Message(msg.clone()));
                }
                Ok(())
            },
        }
    }

    fn view(&self) -> Option<View> {
        Some(self.view.read().as_ref().clone())
    }

    fn local_addr(&self) -> Option<Address> {
        Some(self.local.clone())
    }

    fn discard_own_messages(&self) -> bool {
        self.discard_own.load(Ordering::Relaxed)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    fn set_up_handler(&self, handler: Arc<dyn UpHandler>) {
        *self.handler.write() = Some(handler);
    }
}

/// Replies to every request with the request payload.
pub struct EchoHandler;

#[async_trait]
impl RequestHandler for EchoHandler {
    async fn on_request(&self, request: Message) -> anyhow::Result<Bytes> {
        Ok(request.payload().clone())
    }
}

/// Accepts requests but never produces a reply.
pub struct SilentHandler;

#[async_trait]
impl RequestHandler for SilentHandler {
    async fn on_request(&self, _request: Message) -> anyhow::Result<Bytes> {
        std::future::pending().await
    }
}

/// Fails every request with the configured message.
pub struct FailingHandler(pub &'static str);

#[async_trait]
impl RequestHandler for FailingHandler {
    async fn on_request(&self, _request: Message) -> anyhow::Result<Bytes> {
        anyhow::bail!(self.0)
    }
}
