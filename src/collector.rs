use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::trace;

use crate::address::Address;
use crate::options::{ResponseMode, RspFilter};
use crate::rsp::{Rsp, RspList, RspValue};
use crate::view::View;

/// Per-request bookkeeping: the expected responders, whatever has arrived
/// for each of them, and the completion signal waiters block on.
///
/// A collector becomes complete exactly once. Completion is decided while
/// holding the slot lock, so concurrent responses, suspicions and view
/// changes cannot race it into firing twice; the signal itself is sent after
/// the lock is dropped.
pub struct ResponseCollector {
    req_id: AtomicU64,
    mode: ResponseMode,
    filter: Option<Arc<dyn RspFilter>>,
    slots: Mutex<SlotTable>,
    done: watch::Sender<bool>,
}

struct SlotTable {
    rsps: Vec<Rsp>,
    terminal: bool,
}

impl ResponseCollector {
    pub(crate) fn new(
        expected: &[Address],
        mode: ResponseMode,
        filter: Option<Arc<dyn RspFilter>>,
    ) -> Self {
        let rsps: Vec<Rsp> = expected.iter().cloned().map(Rsp::new).collect();
        // an empty expected set has nothing to wait for
        let terminal = rsps.is_empty();
        let (done, _) = watch::channel(terminal);

        Self {
            req_id: AtomicU64::new(0),
            mode,
            filter,
            slots: Mutex::new(SlotTable { rsps, terminal }),
            done,
        }
    }

    /// The id the correlator assigned at send time; zero until then.
    pub fn req_id(&self) -> u64 {
        self.req_id.load(Ordering::Acquire)
    }

    pub(crate) fn assign_id(&self, req_id: u64) {
        self.req_id.store(req_id, Ordering::Release);
    }

    pub fn is_complete(&self) -> bool {
        *self.done.borrow()
    }

    /// A snapshot of the slots in send order.
    pub fn results(&self) -> RspList {
        RspList::new(self.slots.lock().rsps.clone())
    }

    /// Waits until the collector is complete. Wakes on the completion
    /// predicate, a deadline, suspicion, a view change or an explicit
    /// cancel; all waiters observe the same final state.
    pub async fn completed(&self) {
        let mut rx = self.done.subscribe();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Records a response for `sender`. Returns `true` when this response
    /// completed the request.
    pub(crate) fn add_response(&self, sender: &Address, value: RspValue) -> bool {
        let mut slots = self.slots.lock();
        if slots.terminal {
            trace!(req_id = self.req_id(), sender = %sender, "response after completion, dropping");
            return false;
        }

        let Some(slot) = slots.rsps.iter_mut().find(|rsp| rsp.sender() == sender) else {
            trace!(req_id = self.req_id(), sender = %sender, "response from an unexpected member, dropping");
            return false;
        };
        if slot.is_received() {
            return false;
        }

        let acceptable = self
            .filter
            .as_ref()
            .map_or(true, |filter| filter.is_acceptable(sender, &value));
        if acceptable {
            slot.set_value(value);
        }

        let early = self
            .filter
            .as_ref()
            .map_or(false, |filter| !filter.needs_more_responses());
        let completed = Self::evaluate(self.mode, &mut slots, early);
        drop(slots);
        if completed {
            self.done.send_replace(true);
        }
        completed
    }

    /// Marks `member` suspected if it has not resolved yet. Returns `true`
    /// when this completed the request.
    pub(crate) fn suspect(&self, member: &Address) -> bool {
        let mut slots = self.slots.lock();
        if slots.terminal {
            return false;
        }

        let mut changed = false;
        for slot in &mut slots.rsps {
            if slot.sender() == member && !slot.value().is_resolved() {
                slot.set_value(RspValue::Suspected);
                changed = true;
            }
        }
        let completed = changed && Self::evaluate(self.mode, &mut slots, false);
        drop(slots);
        if completed {
            self.done.send_replace(true);
        }
        completed
    }

    /// Marks every expected member missing from `view` as suspected. Site
    /// members are exempt; they are never part of the local view. Returns
    /// `true` when this completed the request.
    pub(crate) fn view_change(&self, view: &View) -> bool {
        let mut slots = self.slots.lock();
        if slots.terminal {
            return false;
        }

        let mut changed = false;
        for slot in &mut slots.rsps {
            if slot.sender().is_site_member() || view.contains(slot.sender()) {
                continue;
            }
            if !slot.value().is_resolved() {
                slot.set_value(RspValue::Suspected);
                changed = true;
            }
        }
        let completed = changed && Self::evaluate(self.mode, &mut slots, false);
        drop(slots);
        if completed {
            self.done.send_replace(true);
        }
        completed
    }

    /// Marks `member` unreachable. Returns `true` when this completed the
    /// request.
    pub(crate) fn unreachable(&self, member: &Address) -> bool {
        let mut slots = self.slots.lock();
        if slots.terminal {
            return false;
        }

        let mut changed = false;
        for slot in &mut slots.rsps {
            if slot.sender() == member && !slot.value().is_resolved() {
                slot.set_value(RspValue::Unreachable);
                changed = true;
            }
        }
        let completed = changed && Self::evaluate(self.mode, &mut slots, false);
        drop(slots);
        if completed {
            self.done.send_replace(true);
        }
        completed
    }

    /// Fails every still-pending slot and completes the collector. Used when
    /// the send itself failed.
    pub(crate) fn fail_pending(&self, reason: &str) {
        let mut slots = self.slots.lock();
        if slots.terminal {
            return;
        }
        for slot in &mut slots.rsps {
            if !slot.value().is_resolved() {
                slot.set_value(RspValue::Exception(reason.to_string()));
            }
        }
        slots.terminal = true;
        drop(slots);
        self.done.send_replace(true);
    }

    /// Forces completion with whatever has arrived so far. Returns `true`
    /// when the collector was still live.
    pub(crate) fn complete(&self) -> bool {
        let mut slots = self.slots.lock();
        if slots.terminal {
            return false;
        }
        slots.terminal = true;
        drop(slots);
        self.done.send_replace(true);
        true
    }

    /// Applies the completion predicate and, when satisfied, flips the
    /// collector into its terminal state. The caller sends the completion
    /// signal once the lock is gone.
    fn evaluate(
        mode: ResponseMode,
        slots: &mut parking_lot::MutexGuard<'_, SlotTable>,
        early: bool,
    ) -> bool {
        if !(early || Self::satisfied(mode, &slots.rsps)) {
            return false;
        }
        slots.terminal = true;
        true
    }

    fn satisfied(mode: ResponseMode, rsps: &[Rsp]) -> bool {
        // once every slot is resolved there is nothing left to wait for,
        // whatever the mode
        if rsps.iter().all(|rsp| rsp.value().is_resolved()) {
            return true;
        }

        match mode {
            ResponseMode::GetNone => true,
            ResponseMode::GetFirst => rsps.iter().any(Rsp::is_received),
            ResponseMode::GetMajority => {
                let needed = rsps.len() / 2 + 1;
                rsps.iter().filter(|rsp| rsp.value().is_resolved()).count() >= needed
            },
            ResponseMode::GetAll => false,
        }
    }
}
