use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytecheck::CheckBytes;
use bytes::Bytes;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use rkyv::{AlignedVec, Archive, Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::address::Address;
use crate::channel::{ChannelError, GroupChannel};
use crate::collector::ResponseCollector;
use crate::error::DispatchError;
use crate::handler::RequestHandler;
use crate::message::{Destination, Message, MessageBatch};
use crate::options::{RequestOptions, ResponseMode};
use crate::rsp::RspValue;
use crate::view::View;
use crate::SCRATCH_SPACE;

#[derive(Debug, thiserror::Error)]
#[error("correlator header bytes failed validation")]
/// The buffer does not hold a valid encoded [`RequestHeader`].
pub struct InvalidHeader;

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Archive)]
#[archive(compare(PartialEq))]
#[archive_attr(derive(CheckBytes, Debug))]
/// What a correlated message is.
pub enum HeaderKind {
    /// An outgoing request.
    Req,
    /// A value produced by a request handler.
    Rsp,
    /// A failure produced by a request handler.
    ExceptionRsp,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Archive)]
#[archive(compare(PartialEq))]
#[archive_attr(derive(CheckBytes, Debug))]
/// The one header every correlated message carries.
///
/// The channel chooses how messages go on the wire; the encode/decode
/// helpers here give it a bit-exact representation of the header to embed.
pub struct RequestHeader {
    pub req_id: u64,
    pub kind: HeaderKind,
    pub rsp_expected: bool,
    /// Distinguishes several correlators multiplexed over one channel.
    pub corr_id: u16,
}

impl RequestHeader {
    pub fn request(req_id: u64, rsp_expected: bool, corr_id: u16) -> Self {
        Self {
            req_id,
            kind: HeaderKind::Req,
            rsp_expected,
            corr_id,
        }
    }

    pub fn response(kind: HeaderKind, req_id: u64, corr_id: u16) -> Self {
        Self {
            req_id,
            kind,
            rsp_expected: false,
            corr_id,
        }
    }

    pub fn to_bytes(&self) -> Result<AlignedVec, InvalidHeader> {
        rkyv::to_bytes::<_, SCRATCH_SPACE>(self).map_err(|_| InvalidHeader)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, InvalidHeader> {
        let archived =
            rkyv::check_archived_root::<Self>(bytes).map_err(|_| InvalidHeader)?;
        archived
            .deserialize(&mut rkyv::Infallible)
            .map_err(|_| InvalidHeader)
    }
}

#[derive(Clone, Default)]
/// Outstanding requests keyed by their id. Entries are added at send time
/// and removed when the request completes, times out or is cancelled.
pub(crate) struct OutstandingTable {
    entries: Arc<Mutex<HashMap<u64, Arc<ResponseCollector>>>>,
}

impl OutstandingTable {
    fn insert(&self, req_id: u64, collector: Arc<ResponseCollector>) {
        self.entries.lock().insert(req_id, collector);
    }

    fn remove(&self, req_id: u64) -> Option<Arc<ResponseCollector>> {
        self.entries.lock().remove(&req_id)
    }

    fn get(&self, req_id: u64) -> Option<Arc<ResponseCollector>> {
        self.entries.lock().get(&req_id).cloned()
    }

    fn snapshot(&self) -> Vec<(u64, Arc<ResponseCollector>)> {
        self.entries
            .lock()
            .iter()
            .map(|(id, collector)| (*id, collector.clone()))
            .collect()
    }

    fn drain(&self) -> Vec<Arc<ResponseCollector>> {
        self.entries.lock().drain().map(|(_, c)| c).collect()
    }

    fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

/// Matches responses back to outstanding requests.
///
/// The correlator stamps every outgoing request with a monotonically
/// increasing id, keeps the collector for it until the request resolves,
/// routes incoming responses to the right collector and feeds view changes
/// and suspicions through every live request. Incoming requests are handed
/// to the installed [`RequestHandler`] and their return values travel back
/// as responses on the same id.
pub struct RequestCorrelator {
    channel: Arc<dyn GroupChannel>,
    handler: RwLock<Option<Arc<dyn RequestHandler>>>,
    table: OutstandingTable,
    next_req_id: AtomicU64,
    corr_id: u16,
    async_dispatching: AtomicBool,
    started: AtomicBool,
}

impl RequestCorrelator {
    pub(crate) fn new(channel: Arc<dyn GroupChannel>, corr_id: u16) -> Self {
        Self {
            channel,
            handler: RwLock::new(None),
            table: OutstandingTable::default(),
            next_req_id: AtomicU64::new(1),
            corr_id,
            async_dispatching: AtomicBool::new(false),
            started: AtomicBool::new(false),
        }
    }

    pub(crate) fn set_request_handler(&self, handler: Arc<dyn RequestHandler>) {
        *self.handler.write() = Some(handler);
    }

    pub(crate) fn set_async_dispatching(&self, flag: bool) {
        self.async_dispatching.store(flag, Ordering::Relaxed);
    }

    pub(crate) fn start(&self) {
        self.started.store(true, Ordering::Release);
    }

    /// Stops the correlator, completing every outstanding request so no
    /// waiter is left hanging.
    pub(crate) fn stop(&self) {
        self.started.store(false, Ordering::Release);
        for collector in self.table.drain() {
            collector.complete();
        }
    }

    /// The number of requests currently waiting for responses.
    pub fn outstanding_requests(&self) -> usize {
        self.table.len()
    }

    /// Sends a request to `dests`, registering `collector` (if any) under a
    /// freshly assigned id. The deadline clock starts before the send.
    pub(crate) async fn send_request(
        &self,
        dests: &[Address],
        payload: Bytes,
        collector: Option<Arc<ResponseCollector>>,
        opts: &RequestOptions,
    ) -> Result<u64, DispatchError> {
        if !self.channel.is_connected() {
            return Err(DispatchError::NotConnected);
        }

        let req_id = self.next_req_id.fetch_add(1, Ordering::Relaxed);
        let rsp_expected = opts.mode() != ResponseMode::GetNone;
        if let Some(collector) = &collector {
            collector.assign_id(req_id);
            self.table.insert(req_id, collector.clone());
        }

        let header = RequestHeader::request(req_id, rsp_expected, self.corr_id);
        let started_at = Instant::now();
        trace!(req_id, dests = dests.len(), rsp_expected, "sending request");

        let sent = self
            .send_messages(req_id, dests, payload, header, opts, collector.as_deref())
            .await;
        match sent {
            Ok(()) => {
                if collector.is_some() && !opts.timeout().is_zero() {
                    self.arm_deadline(req_id, started_at + opts.timeout());
                }
                Ok(req_id)
            },
            Err(error) => {
                // a failed send must never leave the request outstanding
                if let Some(collector) = collector {
                    self.table.remove(req_id);
                    collector.fail_pending(&error.to_string());
                }
                Err(DispatchError::Send(error))
            },
        }
    }

    /// Spawns the task that completes the request at its deadline. Waiters
    /// then observe whatever responses have arrived by that point.
    fn arm_deadline(&self, req_id: u64, deadline: Instant) {
        let table = self.table.clone();
        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if let Some(collector) = table.remove(req_id) {
                trace!(req_id, "deadline reached before the request completed");
                collector.complete();
            }
        });
    }

    async fn send_messages(
        &self,
        req_id: u64,
        dests: &[Address],
        payload: Bytes,
        header: RequestHeader,
        opts: &RequestOptions,
        collector: Option<&ResponseCollector>,
    ) -> Result<(), ChannelError> {
        if dests.len() > 1 && !opts.anycasting() {
            let msg = Message::new(Destination::Broadcast, payload)
                .with_flags(opts.flags())
                .with_transient_flags(opts.transient_flags())
                .with_header(header);
            return self.channel.send(msg).await;
        }

        if opts.anycasting() && opts.use_anycast_addresses() {
            let msg = Message::new(Destination::Anycast(dests.to_vec()), payload)
                .with_flags(opts.flags())
                .with_transient_flags(opts.transient_flags())
                .with_header(header);
            return self.channel.send(msg).await;
        }

        // one unicast per destination
        let mut sends = FuturesUnordered::new();
        for dest in dests {
            let channel = self.channel.clone();
            let msg = Message::new(Destination::Member(dest.clone()), payload.clone())
                .with_flags(opts.flags())
                .with_transient_flags(opts.transient_flags())
                .with_header(header);
            sends.push(async move { (dest, channel.send(msg).await) });
        }

        let mut failures = 0;
        let mut last_error = None;
        while let Some((dest, result)) = sends.next().await {
            if let Err(error) = result {
                warn!(req_id, dest = %dest, error = %error, "failed to send request to destination");
                failures += 1;
                if let Some(collector) = collector {
                    if collector.unreachable(dest) {
                        self.table.remove(req_id);
                    }
                }
                last_error = Some(error);
            }
        }

        match last_error {
            // every destination failed; surface the send failure itself
            Some(error) if failures == dests.len() => Err(error),
            _ => Ok(()),
        }
    }

    /// Tells the correlator the caller is no longer interested in `req_id`.
    /// Waiters are woken with whatever responses have arrived. Calling this
    /// for an unknown or already-finished request is a no-op.
    pub(crate) fn done(&self, req_id: u64) {
        if let Some(collector) = self.table.remove(req_id) {
            trace!(req_id, "request cancelled");
            collector.complete();
        }
    }

    /// Routes one delivered message. Messages without a header, or stamped
    /// by a different correlator, are dropped.
    pub(crate) async fn receive_message(&self, msg: Message) {
        let Some(header) = msg.header() else {
            trace!("message without a correlator header, dropping");
            return;
        };
        if header.corr_id != self.corr_id {
            trace!(
                corr_id = header.corr_id,
                own_corr_id = self.corr_id,
                "message for a different correlator, dropping"
            );
            return;
        }

        match header.kind {
            HeaderKind::Req => self.dispatch_request(msg, header).await,
            HeaderKind::Rsp | HeaderKind::ExceptionRsp => self.receive_response(msg, header),
        }
    }

    /// Routes a batch of delivered messages, one at a time and in order.
    pub(crate) async fn receive_batch(&self, batch: MessageBatch) {
        for msg in batch {
            self.receive_message(msg).await;
        }
    }

    fn receive_response(&self, msg: Message, header: RequestHeader) {
        let Some(sender) = msg.src().cloned() else {
            warn!(req_id = header.req_id, "response without a source address, dropping");
            return;
        };
        let Some(collector) = self.table.get(header.req_id) else {
            trace!(req_id = header.req_id, sender = %sender, "response for an unknown or completed request, dropping");
            return;
        };

        let value = match header.kind {
            HeaderKind::ExceptionRsp => {
                RspValue::Exception(String::from_utf8_lossy(msg.payload()).into_owned())
            },
            _ => RspValue::Value(msg.payload().clone()),
        };

        if collector.add_response(&sender, value) {
            self.table.remove(header.req_id);
        }
    }

    async fn dispatch_request(&self, msg: Message, header: RequestHeader) {
        if !self.started.load(Ordering::Acquire) {
            trace!(req_id = header.req_id, "correlator is stopped, dropping request");
            return;
        }

        let handler = self.handler.read().clone();
        let reply_to = msg.src().cloned();

        let Some(handler) = handler else {
            warn!(req_id = header.req_id, "no request handler installed");
            if header.rsp_expected {
                if let Some(reply_to) = reply_to {
                    self.send_reply(
                        reply_to,
                        header.req_id,
                        HeaderKind::ExceptionRsp,
                        Bytes::from_static(b"no request handler installed"),
                    )
                    .await;
                }
            }
            return;
        };

        if !header.rsp_expected {
            let continuation = async move {
                if let Err(error) = handler.on_request(msg).await {
                    debug!(error = %error, "request handler failed");
                }
            };
            if self.async_dispatching.load(Ordering::Relaxed) {
                tokio::spawn(continuation);
            } else {
                continuation.await;
            }
            return;
        }

        let Some(reply_to) = reply_to else {
            warn!(
                req_id = header.req_id,
                "request expecting a response has no source address, dropping"
            );
            return;
        };

        let channel = self.channel.clone();
        let corr_id = self.corr_id;
        let req_id = header.req_id;
        let continuation = async move {
            let (kind, payload) = match handler.on_request(msg).await {
                Ok(payload) => (HeaderKind::Rsp, payload),
                Err(error) => (HeaderKind::ExceptionRsp, Bytes::from(error.to_string())),
            };
            let reply = Message::new(Destination::Member(reply_to.clone()), payload)
                .with_header(RequestHeader::response(kind, req_id, corr_id));
            if let Err(error) = channel.send(reply).await {
                warn!(req_id, dest = %reply_to, error = %error, "failed to send response");
            }
        };

        if self.async_dispatching.load(Ordering::Relaxed) {
            tokio::spawn(continuation);
        } else {
            continuation.await;
        }
    }

    async fn send_reply(&self, to: Address, req_id: u64, kind: HeaderKind, payload: Bytes) {
        let reply = Message::new(Destination::Member(to.clone()), payload)
            .with_header(RequestHeader::response(kind, req_id, self.corr_id));
        if let Err(error) = self.channel.send(reply).await {
            warn!(req_id, dest = %to, error = %error, "failed to send response");
        }
    }

    /// Applies a new view to every live request: expected members missing
    /// from the view become suspected. The caller has already refreshed the
    /// membership snapshot.
    pub(crate) fn receive_view(&self, view: &View) {
        for (req_id, collector) in self.table.snapshot() {
            if collector.view_change(view) {
                self.table.remove(req_id);
            }
        }
    }

    /// Marks `member` suspected in every live request.
    pub(crate) fn receive_suspect(&self, member: &Address) {
        for (req_id, collector) in self.table.snapshot() {
            if collector.suspect(member) {
                self.table.remove(req_id);
            }
        }
    }
}
