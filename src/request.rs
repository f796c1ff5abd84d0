use std::sync::Arc;

use bytes::Bytes;

use crate::address::Address;
use crate::collector::ResponseCollector;
use crate::correlator::RequestCorrelator;
use crate::error::DispatchError;
use crate::options::RequestOptions;
use crate::rsp::{RspList, RspValue};

/// A group call in flight.
///
/// The request owns its [`ResponseCollector`] for the waiting period while
/// the correlator keeps a shared handle to publish completion; whoever gets
/// there first wins, and every waiter observes the same final list.
pub struct GroupRequest {
    correlator: Arc<RequestCorrelator>,
    collector: Arc<ResponseCollector>,
    dests: Vec<Address>,
    opts: RequestOptions,
}

impl GroupRequest {
    pub(crate) fn new(
        correlator: Arc<RequestCorrelator>,
        dests: Vec<Address>,
        opts: &RequestOptions,
    ) -> Self {
        let collector = Arc::new(ResponseCollector::new(
            &dests,
            opts.mode(),
            opts.rsp_filter().cloned(),
        ));

        Self {
            correlator,
            collector,
            dests,
            opts: opts.clone(),
        }
    }

    /// The sentinel for a call whose destination set filtered down to
    /// nothing: already complete, with an empty response list.
    pub(crate) fn completed_empty(correlator: Arc<RequestCorrelator>) -> Self {
        Self::new(correlator, Vec::new(), &RequestOptions::default())
    }

    /// Sends the request. With `block_for_results` the call returns the
    /// final response list once the request resolves; without it, the send
    /// happens and the caller awaits [`GroupRequest::results`] later.
    pub async fn execute(
        &self,
        payload: Bytes,
        block_for_results: bool,
    ) -> Result<Option<RspList>, DispatchError> {
        if self.dests.is_empty() {
            return Ok(Some(self.collector.results()));
        }

        self.correlator
            .send_request(&self.dests, payload, Some(self.collector.clone()), &self.opts)
            .await?;

        if block_for_results {
            Ok(Some(self.results().await))
        } else {
            Ok(None)
        }
    }

    /// Waits for the request to resolve and returns the final list.
    pub async fn results(&self) -> RspList {
        self.collector.completed().await;
        self.collector.results()
    }

    /// The response list if the request has already resolved.
    pub fn get_now(&self) -> Option<RspList> {
        self.collector
            .is_complete()
            .then(|| self.collector.results())
    }

    pub fn is_complete(&self) -> bool {
        self.collector.is_complete()
    }

    /// The id assigned at send time; zero before the request was sent.
    pub fn req_id(&self) -> u64 {
        self.collector.req_id()
    }

    /// The members this request expects responses from.
    pub fn dests(&self) -> &[Address] {
        &self.dests
    }

    /// Gives up on the request, waking waiters with whatever has arrived.
    pub fn done(&self) {
        self.correlator.done(self.req_id());
    }
}

/// A unicast call in flight: a group request with exactly one expected
/// responder, resolving to a single value instead of a list.
pub struct UnicastRequest {
    correlator: Arc<RequestCorrelator>,
    collector: Arc<ResponseCollector>,
    dest: Address,
    opts: RequestOptions,
}

impl UnicastRequest {
    pub(crate) fn new(
        correlator: Arc<RequestCorrelator>,
        dest: Address,
        opts: &RequestOptions,
    ) -> Self {
        let collector = Arc::new(ResponseCollector::new(
            std::slice::from_ref(&dest),
            opts.mode(),
            opts.rsp_filter().cloned(),
        ));

        Self {
            correlator,
            collector,
            dest,
            opts: opts.clone(),
        }
    }

    /// Sends the request. With `block_for_results` the call returns the
    /// response value once it arrives; without it, the send happens and the
    /// caller awaits [`UnicastRequest::result`] later.
    pub async fn execute(
        &self,
        payload: Bytes,
        block_for_results: bool,
    ) -> Result<Option<Bytes>, DispatchError> {
        self.correlator
            .send_request(
                std::slice::from_ref(&self.dest),
                payload,
                Some(self.collector.clone()),
                &self.opts,
            )
            .await?;

        if block_for_results {
            self.result().await.map(Some)
        } else {
            Ok(None)
        }
    }

    /// Waits for the call to resolve and maps the single slot to a value or
    /// the failure that kept it from arriving.
    pub async fn result(&self) -> Result<Bytes, DispatchError> {
        self.collector.completed().await;
        let results = self.collector.results();
        let slot = results
            .get(&self.dest)
            .map(|rsp| rsp.value().clone())
            .unwrap_or_default();

        match slot {
            RspValue::Value(bytes) => Ok(bytes),
            RspValue::Exception(text) => Err(DispatchError::Remote(text)),
            RspValue::Suspected => Err(DispatchError::Suspected(self.dest.clone())),
            RspValue::Unreachable => Err(DispatchError::Unreachable(self.dest.clone())),
            RspValue::NotReceived => Err(DispatchError::Timeout(self.opts.timeout())),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.collector.is_complete()
    }

    /// The id assigned at send time; zero before the request was sent.
    pub fn req_id(&self) -> u64 {
        self.collector.req_id()
    }

    pub fn dest(&self) -> &Address {
        &self.dest
    }

    /// Gives up on the request, waking waiters.
    pub fn done(&self) {
        self.correlator.done(self.req_id());
    }
}
