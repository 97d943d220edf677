//! Concurrency groups: at most one active run per group key.

use crate::cancel::RunCancellation;
use gantry_core::RunId;
use gantry_core::run::CancelReason;
use gantry_core::workflow::ConcurrencyMode;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use tokio::sync::oneshot;
use tracing::{debug, info};

/// Result of registering a run with its group.
#[derive(Debug)]
pub enum Admission {
    /// The run holds the slot. `superseded` lists runs cancelled to make room.
    Admitted { superseded: Vec<RunId> },
    /// An earlier run holds the slot; wait on the ticket.
    Queued(QueueTicket),
}

/// Handle for a run waiting in a queue-mode group.
#[derive(Debug)]
pub struct QueueTicket {
    run_id: RunId,
    position: usize,
    admit: oneshot::Receiver<()>,
    cancel: RunCancellation,
}

impl QueueTicket {
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Zero-based position in the group queue at registration time.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Wait for the slot. Returns `false` if the run was cancelled while queued.
    pub async fn wait(mut self) -> bool {
        tokio::select! {
            biased;
            admitted = &mut self.admit => admitted.is_ok(),
            _ = self.cancel.token().cancelled() => false,
        }
    }
}

struct Member {
    run_id: RunId,
    cancel: RunCancellation,
}

struct Waiter {
    member: Member,
    admit: oneshot::Sender<()>,
}

#[derive(Default)]
struct Slot {
    active: Option<Member>,
    queued: VecDeque<Waiter>,
}

#[derive(Default)]
struct SlotTable {
    groups: HashMap<String, Slot>,
    members: HashMap<RunId, String>,
}

/// Tracks the active and queued runs of every concurrency group.
#[derive(Default)]
pub struct ConcurrencyController {
    table: Mutex<SlotTable>,
}

impl ConcurrencyController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `run_id` under `group`.
    ///
    /// In cancel-in-progress mode the active run and every queued run are
    /// cancelled as superseded and the new run is admitted at once. In queue
    /// mode the run waits behind earlier runs and is admitted FIFO.
    pub fn register(
        &self,
        run_id: RunId,
        group: &str,
        mode: ConcurrencyMode,
        cancel: RunCancellation,
    ) -> Admission {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        table.members.insert(run_id, group.to_string());
        let slot = table.groups.entry(group.to_string()).or_default();
        let member = Member { run_id, cancel };

        match mode {
            ConcurrencyMode::CancelInProgress => {
                let mut superseded = Vec::new();
                if let Some(active) = slot.active.take() {
                    active.cancel.cancel(CancelReason::Superseded);
                    superseded.push(active.run_id);
                }
                for waiter in slot.queued.drain(..) {
                    waiter.member.cancel.cancel(CancelReason::Superseded);
                    superseded.push(waiter.member.run_id);
                }
                slot.active = Some(member);
                if !superseded.is_empty() {
                    info!(group, run_id = %run_id, superseded = superseded.len(), "Superseded runs in concurrency group");
                }
                Admission::Admitted { superseded }
            }
            ConcurrencyMode::Queue if slot.active.is_none() => {
                slot.active = Some(member);
                Admission::Admitted {
                    superseded: Vec::new(),
                }
            }
            ConcurrencyMode::Queue => {
                let (tx, rx) = oneshot::channel();
                let position = slot.queued.len();
                let ticket = QueueTicket {
                    run_id,
                    position,
                    admit: rx,
                    cancel: member.cancel.clone(),
                };
                slot.queued.push_back(Waiter { member, admit: tx });
                debug!(group, run_id = %run_id, position, "Run queued behind concurrency group");
                Admission::Queued(ticket)
            }
        }
    }

    /// Release whatever `run_id` holds: the active slot, which admits the
    /// next queued run, or its place in the queue. Unknown runs are ignored.
    pub fn release(&self, run_id: RunId) {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(group) = table.members.remove(&run_id) else {
            return;
        };
        let Some(slot) = table.groups.get_mut(&group) else {
            return;
        };

        if slot.active.as_ref().is_some_and(|m| m.run_id == run_id) {
            slot.active = None;
            while let Some(waiter) = slot.queued.pop_front() {
                if waiter.member.cancel.is_cancelled() || waiter.admit.send(()).is_err() {
                    continue;
                }
                debug!(group = %group, run_id = %waiter.member.run_id, "Admitted queued run");
                slot.active = Some(waiter.member);
                break;
            }
        } else {
            slot.queued.retain(|w| w.member.run_id != run_id);
        }

        if slot.active.is_none() && slot.queued.is_empty() {
            table.groups.remove(&group);
        }
    }

    pub fn active(&self, group: &str) -> Option<RunId> {
        let table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        table
            .groups
            .get(group)
            .and_then(|slot| slot.active.as_ref())
            .map(|m| m.run_id)
    }

    pub fn queued(&self, group: &str) -> Vec<RunId> {
        let table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        table
            .groups
            .get(group)
            .map(|slot| slot.queued.iter().map(|w| w.member.run_id).collect())
            .unwrap_or_default()
    }
}
