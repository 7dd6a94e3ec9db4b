//! Per-kind cancellation for user-initiated session tasks.
//!
//! Starting a task of some kind cancels the previous task of the same kind.
//! A cancelled task may still see its network call complete, but it must
//! check its [`TaskTicket`] before touching shared state.

use parking_lot::Mutex;
use std::collections::HashMap;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::debug;

/// Kinds of task that supersede each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Login,
    Refresh,
}

/// Handle for one task invocation.
#[derive(Debug, Clone)]
pub struct TaskTicket {
    kind: TaskKind,
    id: u64,
    token: CancellationToken,
}

impl TaskTicket {
    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once a newer task of the same kind started or all tasks were cancelled.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }
}

#[derive(Default)]
struct Slots {
    next_id: u64,
    running: HashMap<TaskKind, (u64, CancellationToken)>,
}

/// Current task per [`TaskKind`].
#[derive(Default)]
pub struct TaskSlots {
    slots: Mutex<Slots>,
}

impl TaskSlots {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a task of `kind`, cancelling whichever one was running.
    pub fn begin(&self, kind: TaskKind) -> TaskTicket {
        let token = CancellationToken::new();
        let (id, previous) = {
            let mut slots = self.slots.lock();
            slots.next_id += 1;
            let id = slots.next_id;
            (id, slots.running.insert(kind, (id, token.clone())))
        };
        if let Some((_, previous)) = previous {
            if !previous.is_cancelled() {
                debug!(kind = ?kind, "Superseding running task");
            }
            previous.cancel();
        }
        TaskTicket { kind, id, token }
    }

    /// Release the slot if `ticket` still owns it.
    pub fn finish(&self, ticket: &TaskTicket) {
        let mut slots = self.slots.lock();
        if slots
            .running
            .get(&ticket.kind)
            .is_some_and(|(id, _)| *id == ticket.id)
        {
            slots.running.remove(&ticket.kind);
        }
    }

    pub fn is_running(&self, kind: TaskKind) -> bool {
        self.slots.lock().running.contains_key(&kind)
    }

    /// Cancel every running task.
    pub fn cancel_all(&self) {
        let drained: Vec<CancellationToken> = self
            .slots
            .lock()
            .running
            .drain()
            .map(|(_, (_, token))| token)
            .collect();
        for token in drained {
            token.cancel();
        }
    }
}
