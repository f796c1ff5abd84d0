use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tracing::{trace, warn};

use crate::address::Address;
use crate::channel::GroupChannel;
use crate::correlator::RequestCorrelator;
use crate::error::DispatchError;
use crate::event::{Event, UpHandler};
use crate::handler::{ChannelListener, MembershipListener, RequestHandler, StateListener};
use crate::message::{MessageBatch, TransientFlag};
use crate::options::{RequestOptions, ResponseMode};
use crate::probe::RpcProbeHandler;
use crate::request::{GroupRequest, UnicastRequest};
use crate::rsp::RspList;
use crate::stats::{RpcKind, RpcStats};
use crate::view::{Membership, View};

/// Builds a [`Dispatcher`] over a channel.
pub struct DispatcherBuilder {
    channel: Arc<dyn GroupChannel>,
    request_handler: Option<Arc<dyn RequestHandler>>,
    membership_listener: Option<Arc<dyn MembershipListener>>,
    state_listener: Option<Arc<dyn StateListener>>,
    async_dispatching: bool,
    extended_stats: bool,
    corr_id: u16,
}

impl DispatcherBuilder {
    pub fn new(channel: Arc<dyn GroupChannel>) -> Self {
        Self {
            channel,
            request_handler: None,
            membership_listener: None,
            state_listener: None,
            async_dispatching: false,
            extended_stats: false,
            corr_id: 0,
        }
    }

    /// The handler invoked for every incoming call.
    pub fn with_request_handler<H>(mut self, handler: H) -> Self
    where
        H: RequestHandler + 'static,
    {
        self.request_handler = Some(Arc::new(handler));
        self
    }

    pub fn with_membership_listener<L>(mut self, listener: L) -> Self
    where
        L: MembershipListener + 'static,
    {
        self.membership_listener = Some(Arc::new(listener));
        self
    }

    pub fn with_state_listener<L>(mut self, listener: L) -> Self
    where
        L: StateListener + 'static,
    {
        self.state_listener = Some(Arc::new(listener));
        self
    }

    /// Runs incoming request handlers on their own tasks instead of the
    /// delivery task.
    pub fn with_async_dispatching(mut self, flag: bool) -> Self {
        self.async_dispatching = flag;
        self
    }

    /// Starts with per-destination timing collection enabled.
    pub fn with_extended_stats(mut self, flag: bool) -> Self {
        self.extended_stats = flag;
        self
    }

    /// Distinguishes this dispatcher's traffic when several dispatchers
    /// share one channel.
    pub fn with_correlator_id(mut self, corr_id: u16) -> Self {
        self.corr_id = corr_id;
        self
    }

    /// Wires everything together and installs the dispatcher as the
    /// channel's up-handler.
    pub fn build(self) -> Arc<Dispatcher> {
        let correlator = Arc::new(RequestCorrelator::new(self.channel.clone(), self.corr_id));
        if let Some(handler) = self.request_handler {
            correlator.set_request_handler(handler);
        }
        correlator.set_async_dispatching(self.async_dispatching);
        correlator.start();

        let stats = RpcStats::default();
        stats.set_extended_stats(self.extended_stats);

        let membership = Membership::new();
        if let Some(view) = self.channel.view() {
            membership.install(view);
        }
        let local_addr = self.channel.local_addr();

        let dispatcher = Arc::new(Dispatcher {
            channel: self.channel.clone(),
            correlator,
            membership,
            local_addr: RwLock::new(local_addr),
            membership_listener: self.membership_listener,
            state_listener: self.state_listener,
            channel_listeners: RwLock::new(Vec::new()),
            stats,
        });

        self.channel.set_up_handler(dispatcher.clone());
        dispatcher
    }
}

/// The application-facing side of the dispatch core.
///
/// A dispatcher owns a [`RequestCorrelator`], tracks the membership view and
/// provides the group and unicast call entry points. It receives everything
/// the channel delivers through the [`UpHandler`] interface and forwards
/// non-response events to the registered listeners.
pub struct Dispatcher {
    channel: Arc<dyn GroupChannel>,
    correlator: Arc<RequestCorrelator>,
    membership: Membership,
    local_addr: RwLock<Option<Address>>,
    membership_listener: Option<Arc<dyn MembershipListener>>,
    state_listener: Option<Arc<dyn StateListener>>,
    // copy-on-write: iterated on every notification, mutated rarely
    channel_listeners: RwLock<Vec<Arc<dyn ChannelListener>>>,
    stats: RpcStats,
}

impl Dispatcher {
    /// Sends `payload` to the group and waits for responses from `dests`
    /// (or from every current member when `dests` is `None`) according to
    /// the options.
    pub async fn cast_message(
        &self,
        dests: Option<&[Address]>,
        payload: Bytes,
        opts: RequestOptions,
    ) -> Result<RspList, DispatchError> {
        let request = self.cast(dests, payload, opts, true).await?;
        Ok(request.get_now().unwrap_or_default())
    }

    /// Like [`Dispatcher::cast_message`] but returns the in-flight request
    /// instead of waiting; await [`GroupRequest::results`] for the outcome.
    pub async fn cast_message_with_future(
        &self,
        dests: Option<&[Address]>,
        payload: Bytes,
        opts: RequestOptions,
    ) -> Result<GroupRequest, DispatchError> {
        self.cast(dests, payload, opts, false).await
    }

    async fn cast(
        &self,
        dests: Option<&[Address]>,
        payload: Bytes,
        opts: RequestOptions,
        block_for_results: bool,
    ) -> Result<GroupRequest, DispatchError> {
        let real_dests = self.compute_dests(dests, &opts);
        if real_dests.is_empty() {
            trace!("destination list is empty, not sending the request");
            return Ok(GroupRequest::completed_empty(self.correlator.clone()));
        }

        let sync = opts.mode() != ResponseMode::GetNone;
        let anycast = opts.anycasting();
        let non_blocking = !sync || !block_for_results;
        if non_blocking {
            self.update_stats(&real_dests, anycast, sync, None);
        }

        if !sync {
            self.correlator
                .send_request(&real_dests, payload, None, &opts)
                .await?;
            return Ok(GroupRequest::completed_empty(self.correlator.clone()));
        }

        let request = GroupRequest::new(self.correlator.clone(), real_dests.clone(), &opts);
        let started_at = (!non_blocking && self.stats.extended_stats()).then(Instant::now);
        request.execute(payload, block_for_results).await?;
        if !non_blocking {
            self.update_stats(&real_dests, anycast, true, started_at.map(|s| s.elapsed()));
        }
        Ok(request)
    }

    /// Sends a unicast request and waits for the response value. Returns
    /// `Ok(None)` for a fire-and-forget call.
    pub async fn send_message(
        &self,
        dest: Address,
        payload: Bytes,
        opts: RequestOptions,
    ) -> Result<Option<Bytes>, DispatchError> {
        if opts.mode() == ResponseMode::GetNone {
            self.stats.add(RpcKind::Unicast, false, Some(&dest), None);
            self.correlator
                .send_request(std::slice::from_ref(&dest), payload, None, &opts)
                .await?;
            return Ok(None);
        }

        let request = UnicastRequest::new(self.correlator.clone(), dest.clone(), &opts);
        let started_at = self.stats.extended_stats().then(Instant::now);
        let result = request.execute(payload, true).await;
        self.stats
            .add(RpcKind::Unicast, true, Some(&dest), started_at.map(|s| s.elapsed()));
        result
    }

    /// Like [`Dispatcher::send_message`] but returns the in-flight request;
    /// `Ok(None)` for a fire-and-forget call, which registers nothing.
    pub async fn send_message_with_future(
        &self,
        dest: Address,
        payload: Bytes,
        opts: RequestOptions,
    ) -> Result<Option<UnicastRequest>, DispatchError> {
        self.stats.add(
            RpcKind::Unicast,
            opts.mode() != ResponseMode::GetNone,
            Some(&dest),
            None,
        );

        if opts.mode() == ResponseMode::GetNone {
            self.correlator
                .send_request(std::slice::from_ref(&dest), payload, None, &opts)
                .await?;
            return Ok(None);
        }

        let request = UnicastRequest::new(self.correlator.clone(), dest.clone(), &opts);
        request.execute(payload, false).await?;
        Ok(Some(request))
    }

    /// Tells the correlator the caller is done with `req_id`; used by
    /// callers that took a partial result through a filter and want the
    /// bookkeeping released. Safe to call twice.
    pub fn done(&self, req_id: u64) {
        self.correlator.done(req_id);
    }

    /// Resolves the expected responders for a group call: the caller's
    /// destinations filtered against the view (site members always pass),
    /// deduplicated in order, minus the local member when loopback is off,
    /// minus the exclusion list.
    fn compute_dests(&self, dests: Option<&[Address]>, opts: &RequestOptions) -> Vec<Address> {
        let view = self.membership.snapshot();
        let mut real_dests: Vec<Address> = Vec::new();
        match dests {
            Some(list) => {
                for dest in list {
                    if (dest.is_site_member() || view.contains(dest))
                        && !real_dests.contains(dest)
                    {
                        real_dests.push(dest.clone());
                    }
                }
            },
            None => real_dests.extend_from_slice(view.members()),
        }

        if self.channel.discard_own_messages()
            || opts.transient_flags().is_set(TransientFlag::DontLoopback)
        {
            let local_addr = self.local_addr.read();
            if let Some(local) = local_addr.as_ref() {
                real_dests.retain(|dest| dest != local);
            }
        }

        for excluded in opts.exclusion_list() {
            real_dests.retain(|dest| dest != excluded);
        }
        real_dests
    }

    fn update_stats(&self, dests: &[Address], anycast: bool, sync: bool, time: Option<Duration>) {
        if anycast {
            self.stats.add_anycast(sync, dests, time);
        } else {
            self.stats.add(RpcKind::Multicast, sync, None, time);
        }
    }

    #[inline]
    /// The current membership snapshot.
    pub fn view(&self) -> Arc<View> {
        self.membership.snapshot()
    }

    /// A stream of membership snapshots, yielding whenever a view is
    /// installed.
    pub fn membership_changes(&self) -> WatchStream<Arc<View>> {
        WatchStream::new(self.membership.subscribe())
    }

    /// A handle to the same watch channel, for callers that prefer polling.
    pub fn membership_watcher(&self) -> watch::Receiver<Arc<View>> {
        self.membership.subscribe()
    }

    #[inline]
    pub fn local_addr(&self) -> Option<Address> {
        self.local_addr.read().clone()
    }

    #[inline]
    /// Live statistics for the calls issued through this dispatcher.
    pub fn stats(&self) -> RpcStats {
        self.stats.clone()
    }

    pub fn extended_stats(&self) -> bool {
        self.stats.extended_stats()
    }

    pub fn set_extended_stats(&self, flag: bool) {
        self.stats.set_extended_stats(flag);
    }

    /// The probe handler exposing this dispatcher's statistics.
    pub fn probe_handler(&self) -> RpcProbeHandler {
        RpcProbeHandler::new(self.stats.clone())
    }

    /// The number of requests currently waiting for responses.
    pub fn outstanding_requests(&self) -> usize {
        self.correlator.outstanding_requests()
    }

    pub fn add_channel_listener(&self, listener: Arc<dyn ChannelListener>) {
        self.channel_listeners.write().push(listener);
    }

    pub fn remove_channel_listener(&self, listener: &Arc<dyn ChannelListener>) {
        self.channel_listeners
            .write()
            .retain(|existing| !Arc::ptr_eq(existing, listener));
    }

    /// Invoked by the embedding channel when it connects.
    pub fn channel_connected(&self) {
        let listeners = self.channel_listeners.read().clone();
        for listener in listeners {
            listener.channel_connected();
        }
    }

    /// Invoked by the embedding channel when it disconnects. Outstanding
    /// requests are completed so no caller stays blocked.
    pub fn channel_disconnected(&self) {
        self.stop();
        let listeners = self.channel_listeners.read().clone();
        for listener in listeners {
            listener.channel_disconnected();
        }
    }

    /// Invoked by the embedding channel when it closes for good.
    pub fn channel_closed(&self) {
        self.stop();
        let listeners = self.channel_listeners.read().clone();
        for listener in listeners {
            listener.channel_closed();
        }
    }

    /// Stops the correlator, waking every waiter with whatever responses
    /// have arrived.
    pub fn stop(&self) {
        self.correlator.stop();
    }
}

#[async_trait]
impl UpHandler for Dispatcher {
    async fn up(&self, event: Event) {
        match event {
            Event::Message(msg) => self.correlator.receive_message(msg).await,

            Event::ViewChange(view) => {
                // the membership snapshot must be current before any
                // collector observes the view
                self.membership.install(view.clone());
                self.correlator.receive_view(&view);
                if let Some(listener) = &self.membership_listener {
                    listener.view_accepted(&view);
                }
            },

            Event::Suspect(member) => {
                self.correlator.receive_suspect(&member);
                if let Some(listener) = &self.membership_listener {
                    listener.suspect(&member);
                }
            },

            Event::SetLocalAddress(addr) => {
                trace!(local_addr = %addr, "local address assigned");
                *self.local_addr.write() = Some(addr);
            },

            Event::GetApplState(reply) => {
                let mut state = None;
                if let Some(listener) = &self.state_listener {
                    match listener.get_state().await {
                        Ok(bytes) => state = Some(bytes),
                        Err(error) => {
                            warn!(error = %error, "state listener failed to provide state")
                        },
                    }
                }
                let _ = reply.send(state);
            },

            Event::GetStateOk(state) => {
                if let Some(listener) = &self.state_listener {
                    if let Err(error) = listener.set_state(state).await {
                        warn!(error = %error, "state listener failed to install state");
                    }
                }
            },

            Event::StateTransferOutput(mut stream) => {
                if let Some(listener) = &self.state_listener {
                    match listener.get_state().await {
                        Ok(bytes) => {
                            if let Err(error) = stream.write_all(&bytes).await {
                                warn!(error = %error, "failed to write state to the transfer stream");
                            }
                        },
                        Err(error) => {
                            warn!(error = %error, "state listener failed to provide state")
                        },
                    }
                }
            },

            Event::StateTransferInput(mut stream) => {
                if let Some(listener) = &self.state_listener {
                    let mut buf = Vec::with_capacity(1024);
                    match stream.read_to_end(&mut buf).await {
                        Ok(_) => {
                            if let Err(error) = listener.set_state(Bytes::from(buf)).await {
                                warn!(error = %error, "state listener failed to install state");
                            }
                        },
                        Err(error) => {
                            warn!(error = %error, "failed to read state from the transfer stream")
                        },
                    }
                }
            },

            Event::Block => {
                if let Some(listener) = &self.membership_listener {
                    listener.block();
                }
            },

            Event::Unblock => {
                if let Some(listener) = &self.membership_listener {
                    listener.unblock();
                }
            },
        }
    }

    async fn up_batch(&self, batch: MessageBatch) {
        self.correlator.receive_batch(batch).await;
    }
}
