use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::address::Address;

pub type Counter = AtomicU64;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum RpcKind {
    Unicast,
    Multicast,
    Anycast,
}

#[derive(Debug, Clone, Default)]
/// Live counters for the calls issued through a dispatcher.
pub struct RpcStats(Arc<RpcStatsInner>);

impl Deref for RpcStats {
    type Target = RpcStatsInner;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[derive(Debug, Default)]
pub struct RpcStatsInner {
    sync_unicasts: Counter,
    async_unicasts: Counter,
    sync_multicasts: Counter,
    async_multicasts: Counter,
    sync_anycasts: Counter,
    async_anycasts: Counter,
    /// Gates the per-destination timing bookkeeping below.
    extended: AtomicBool,
    timings: Mutex<BTreeMap<Address, DestinationTiming>>,
}

#[derive(Debug, Clone, Copy, Default)]
/// Accumulated latency of synchronous calls to one destination.
pub struct DestinationTiming {
    samples: u64,
    total: Duration,
}

impl DestinationTiming {
    pub fn samples(&self) -> u64 {
        self.samples
    }

    pub fn total(&self) -> Duration {
        self.total
    }

    pub fn average(&self) -> Duration {
        self.total / self.samples.max(1) as u32
    }
}

impl RpcStatsInner {
    /// The number of unicast calls issued so far.
    pub fn unicasts(&self, sync: bool) -> u64 {
        self.counter(RpcKind::Unicast, sync).load(Ordering::Relaxed)
    }

    /// The number of multicast calls issued so far.
    pub fn multicasts(&self, sync: bool) -> u64 {
        self.counter(RpcKind::Multicast, sync).load(Ordering::Relaxed)
    }

    /// The number of anycast calls issued so far.
    pub fn anycasts(&self, sync: bool) -> u64 {
        self.counter(RpcKind::Anycast, sync).load(Ordering::Relaxed)
    }

    pub fn extended_stats(&self) -> bool {
        self.extended.load(Ordering::Relaxed)
    }

    pub fn set_extended_stats(&self, flag: bool) {
        self.extended.store(flag, Ordering::Relaxed);
    }

    /// Zeros every counter and forgets the per-destination timings.
    pub fn reset(&self) {
        for sync in [true, false] {
            for kind in [RpcKind::Unicast, RpcKind::Multicast, RpcKind::Anycast] {
                self.counter(kind, sync).store(0, Ordering::Relaxed);
            }
        }
        self.timings.lock().clear();
    }

    /// A copy of the per-destination timings, keyed in stable address order.
    pub fn timings(&self) -> BTreeMap<Address, DestinationTiming> {
        self.timings.lock().clone()
    }

    /// A textual per-destination breakdown, sorted by destination.
    pub fn print_order_by_dest(&self) -> String {
        let timings = self.timings.lock();
        let mut out = String::new();
        for (dest, timing) in timings.iter() {
            let _ = writeln!(
                out,
                "{dest}: {} sync requests, avg {:?}",
                timing.samples,
                timing.average()
            );
        }
        out
    }

    pub(crate) fn add(
        &self,
        kind: RpcKind,
        sync: bool,
        dest: Option<&Address>,
        time: Option<Duration>,
    ) {
        self.counter(kind, sync).fetch_add(1, Ordering::Relaxed);
        if let (Some(dest), Some(time)) = (dest, time) {
            self.record_timing(dest, time);
        }
    }

    /// Anycasts count once but record a timing sample per destination.
    pub(crate) fn add_anycast(&self, sync: bool, dests: &[Address], time: Option<Duration>) {
        self.counter(RpcKind::Anycast, sync).fetch_add(1, Ordering::Relaxed);
        if let Some(time) = time {
            for dest in dests {
                self.record_timing(dest, time);
            }
        }
    }

    fn record_timing(&self, dest: &Address, time: Duration) {
        if !self.extended_stats() {
            return;
        }
        let mut timings = self.timings.lock();
        let timing = timings.entry(dest.clone()).or_default();
        timing.samples += 1;
        timing.total += time;
    }

    fn counter(&self, kind: RpcKind, sync: bool) -> &Counter {
        match (kind, sync) {
            (RpcKind::Unicast, true) => &self.sync_unicasts,
            (RpcKind::Unicast, false) => &self.async_unicasts,
            (RpcKind::Multicast, true) => &self.sync_multicasts,
            (RpcKind::Multicast, false) => &self.async_multicasts,
            (RpcKind::Anycast, true) => &self.sync_anycasts,
            (RpcKind::Anycast, false) => &self.async_anycasts,
        }
    }
}
