//! The parallel substrate's channel registry (spec §4.7, §5).
//!
//! A channel is a synchronous rendezvous: `send` blocks until a `receive`
//! actually takes the value, and vice versa (spec §4.7 "send blocks until a
//! matching receive is posted, and vice versa"). Channels are shared state
//! across nodes, so they're built on a `Mutex`/`Condvar` pair rather than
//! `std::sync::mpsc` — the two directions of a two-way channel are the same
//! rendezvous slot, usable from either side, which `mpsc`'s asymmetric
//! `Sender`/`Receiver` types don't model.

use crate::error::RuntimeError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};

struct Rendezvous {
    slot: Mutex<Option<i32>>,
    taken: Condvar,
    filled: Condvar,
}

impl Rendezvous {
    fn new() -> Rendezvous {
        Rendezvous { slot: Mutex::new(None), taken: Condvar::new(), filled: Condvar::new() }
    }

    /// Each iteration brackets exactly one `wait_timeout` cycle with
    /// `nodes.enter_blocked()`/`leave_blocked()`, so `blocked` only ever
    /// counts a node that is *actually* parked in this wait right now, not
    /// one that merely called `send`/`receive` and found the rendezvous
    /// already satisfied. Deadlock is declared only once such a cycle has
    /// run to completion without the slot changing state (spec §4.7
    /// "Deadlock (all nodes blocked)... reported at program exit", not at
    /// call entry) — see `NodeRegistry::all_blocked`.
    fn send(&self, value: i32, cancelled: &AtomicBool, nodes: &NodeRegistry) -> Result<(), RuntimeError> {
        let mut slot = self.slot.lock().unwrap();
        while slot.is_some() {
            if cancelled.load(Ordering::SeqCst) {
                return Err(RuntimeError::Cancelled);
            }
            nodes.enter_blocked();
            let (guard, _) = self
                .taken
                .wait_timeout(slot, std::time::Duration::from_millis(20))
                .unwrap();
            slot = guard;
            let deadlocked = slot.is_some() && nodes.all_blocked();
            nodes.leave_blocked();
            if deadlocked {
                return Err(RuntimeError::Deadlock);
            }
        }
        *slot = Some(value);
        self.filled.notify_all();
        while slot.is_some() {
            if cancelled.load(Ordering::SeqCst) {
                *slot = None;
                return Err(RuntimeError::Cancelled);
            }
            nodes.enter_blocked();
            let (guard, _) = self
                .taken
                .wait_timeout(slot, std::time::Duration::from_millis(20))
                .unwrap();
            slot = guard;
            let deadlocked = slot.is_some() && nodes.all_blocked();
            nodes.leave_blocked();
            if deadlocked {
                *slot = None;
                return Err(RuntimeError::Deadlock);
            }
        }
        Ok(())
    }

    fn receive(&self, cancelled: &AtomicBool, nodes: &NodeRegistry) -> Result<i32, RuntimeError> {
        let mut slot = self.slot.lock().unwrap();
        while slot.is_none() {
            if cancelled.load(Ordering::SeqCst) {
                return Err(RuntimeError::Cancelled);
            }
            nodes.enter_blocked();
            let (guard, _) = self
                .filled
                .wait_timeout(slot, std::time::Duration::from_millis(20))
                .unwrap();
            slot = guard;
            let deadlocked = slot.is_none() && nodes.all_blocked();
            nodes.leave_blocked();
            if deadlocked {
                return Err(RuntimeError::Deadlock);
            }
        }
        let value = slot.take().unwrap();
        self.taken.notify_all();
        Ok(value)
    }
}

/// Monotonic integer handles identifying channels, shared by every node
/// spawned off the same root program (spec §4.7 "sharing ... the channel
/// registry").
pub type ChannelHandle = i32;

/// Tracks how many nodes are alive versus blocked in a channel operation, to
/// detect deadlock (spec §4.7 "Deadlock (all nodes blocked) is reported at
/// program exit as a runtime error"). Every node registers itself on
/// startup and deregisters on its natural end; `blocked` is incremented only
/// for the duration of a single real wait cycle inside `Rendezvous::send`/
/// `receive` (spec §4.7/§5 frames deadlock as a terminal condition — "nodes
/// left blocked at termination" — not a snapshot taken the instant a channel
/// operation starts).
pub struct NodeRegistry {
    alive: AtomicUsize,
    blocked: AtomicUsize,
}

impl NodeRegistry {
    pub fn new() -> NodeRegistry {
        NodeRegistry { alive: AtomicUsize::new(1), blocked: AtomicUsize::new(0) }
    }

    pub fn node_started(&self) {
        self.alive.fetch_add(1, Ordering::SeqCst);
    }

    pub fn node_finished(&self) {
        self.alive.fetch_sub(1, Ordering::SeqCst);
    }

    fn enter_blocked(&self) {
        self.blocked.fetch_add(1, Ordering::SeqCst);
    }

    fn leave_blocked(&self) {
        self.blocked.fetch_sub(1, Ordering::SeqCst);
    }

    /// True iff every currently-alive node is, right now, blocked inside a
    /// channel wait. Callers only consult this after their own wait has
    /// already run one full `wait_timeout` cycle without the rendezvous
    /// changing state, so a node that simply hasn't been scheduled onto a
    /// thread yet is never mistaken for a deadlock participant.
    fn all_blocked(&self) -> bool {
        let blocked = self.blocked.load(Ordering::SeqCst);
        let alive = self.alive.load(Ordering::SeqCst);
        alive > 0 && blocked >= alive
    }
}

pub struct ChannelRegistry {
    channels: Mutex<HashMap<ChannelHandle, std::sync::Arc<Rendezvous>>>,
    next_handle: AtomicUsize,
    cancelled: AtomicBool,
    nodes: NodeRegistry,
}

impl ChannelRegistry {
    pub fn new() -> ChannelRegistry {
        ChannelRegistry {
            channels: Mutex::new(HashMap::new()),
            next_handle: AtomicUsize::new(1),
            cancelled: AtomicBool::new(false),
            nodes: NodeRegistry::new(),
        }
    }

    pub fn nodes(&self) -> &NodeRegistry {
        &self.nodes
    }

    pub fn open(&self) -> ChannelHandle {
        let handle = self.next_handle.fetch_add(1, Ordering::SeqCst) as ChannelHandle;
        self.channels.lock().unwrap().insert(handle, std::sync::Arc::new(Rendezvous::new()));
        handle
    }

    /// Cancels every open channel, waking any waiter blocked in `send` or
    /// `receive` with [`RuntimeError::Cancelled`] (spec §4.7
    /// "Cancellation").
    pub fn cancel_all(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Polled at instruction boundaries so a node notices a sibling's fatal
    /// error or a deadlock even between channel operations (spec §4.7
    /// "asked to stop at their next channel operation or instruction
    /// boundary").
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn lookup(&self, handle: ChannelHandle) -> Result<std::sync::Arc<Rendezvous>, RuntimeError> {
        self.channels
            .lock()
            .unwrap()
            .get(&handle)
            .cloned()
            .ok_or(RuntimeError::ChannelNotOpen)
    }

    pub fn send(&self, handle: ChannelHandle, value: i32) -> Result<(), RuntimeError> {
        let channel = self.lookup(handle)?;
        channel.send(value, &self.cancelled, &self.nodes)
    }

    pub fn receive(&self, handle: ChannelHandle) -> Result<i32, RuntimeError> {
        let channel = self.lookup(handle)?;
        channel.receive(&self.cancelled, &self.nodes)
    }
}

impl Default for ChannelRegistry {
    fn default() -> ChannelRegistry {
        ChannelRegistry::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn send_then_receive_round_trips() {
        let registry = Arc::new(ChannelRegistry::new());
        let handle = registry.open();
        registry.nodes().node_started();

        let sender = Arc::clone(&registry);
        let sender_thread = thread::spawn(move || {
            let result = sender.send(handle, 42);
            sender.nodes().node_finished();
            result.unwrap()
        });

        assert_eq!(registry.receive(handle).unwrap(), 42);
        sender_thread.join().unwrap();
    }

    #[test]
    fn receive_on_unopened_channel_is_an_error() {
        let registry = ChannelRegistry::new();
        assert_eq!(registry.receive(999), Err(RuntimeError::ChannelNotOpen));
    }

    #[test]
    fn pipeline_of_several_messages() {
        let registry = Arc::new(ChannelRegistry::new());
        let handle = registry.open();
        registry.nodes().node_started();

        let sender = Arc::clone(&registry);
        let sender_thread = thread::spawn(move || {
            for i in 0..5 {
                sender.send(handle, i).unwrap();
            }
            sender.nodes().node_finished();
        });

        let received: Vec<i32> = (0..5).map(|_| registry.receive(handle).unwrap()).collect();
        assert_eq!(received, vec![0, 1, 2, 3, 4]);
        sender_thread.join().unwrap();
    }

    #[test]
    fn all_nodes_blocked_reports_deadlock() {
        let registry = Arc::new(ChannelRegistry::new());
        let a = registry.open();
        let b = registry.open();

        // Only the root node is alive (alive == 1), and it blocks on a
        // receive with nobody left to send: blocked (1) >= alive (1).
        let result = registry.receive(a);
        assert_eq!(result, Err(RuntimeError::Deadlock));
        let _ = b;
    }
}
