//! Shared channels and lifecycle signals between sessions and the control
//! loop.
//!
//! # Architecture
//!
//! One [`Mailboxes`] value is created per coordinator and shared through an
//! [`Arc`](std::sync::Arc) by the control loop, every session, and the
//! server handle. It owns:
//!
//! - one unbounded inbound channel carrying [`Message`]s from all sessions;
//! - one unbounded outbound channel per participant carrying [`Reply`]s;
//! - the `started` and `finished` [`Signal`]s;
//! - the [`StopGate`] that makes concurrent stop requests idempotent;
//! - the slot in which the control loop records how it ended.
//!
//! The stop gate is a plain atomic rather than a lock: the party that
//! closes it (a stopper) is never the party that opens it again (the
//! control loop, as it exits).

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use consort_types::{CoordinatorId, Fault, Message, ParticipantId, Reply};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Condvar, Mutex};

/// How a control loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopExit {
    /// A shutdown was requested.
    Shutdown,
    /// An error was reported from outside the loop.
    Faulted(Fault),
}

impl LoopExit {
    /// Whether the loop ended through a shutdown request.
    pub const fn is_clean(&self) -> bool {
        matches!(self, Self::Shutdown)
    }
}

/// A one-way boolean that threads can block on.
#[derive(Debug, Default)]
pub struct Signal {
    state: Mutex<bool>,
    changed: Condvar,
}

impl Signal {
    /// Create a cleared signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the signal and wake every waiter.
    pub fn set(&self) {
        let mut state = self.state.lock();
        *state = true;
        self.changed.notify_all();
    }

    /// Clear the signal.
    pub fn clear(&self) {
        *self.state.lock() = false;
    }

    /// Whether the signal is currently set.
    pub fn is_set(&self) -> bool {
        *self.state.lock()
    }

    /// Block until the signal is set.
    pub fn wait(&self) {
        let mut state = self.state.lock();
        while !*state {
            self.changed.wait(&mut state);
        }
    }

    /// Block until the signal is set or `timeout` elapses. Returns whether
    /// the signal is set.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            self.wait();
            return true;
        };
        let mut state = self.state.lock();
        while !*state {
            if self.changed.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        *state
    }
}

/// Test-and-set gate guarding the stop procedure.
#[derive(Debug, Default)]
pub struct StopGate {
    held: AtomicBool,
}

impl StopGate {
    /// Close the gate. Returns `false` if it was already closed.
    pub fn try_acquire(&self) -> bool {
        self.held
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Open the gate, whoever closed it.
    pub fn release(&self) {
        self.held.store(false, Ordering::Release);
    }

    /// Whether a stop is currently in progress.
    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }
}

struct Outbox<O> {
    tx: Sender<Reply<O>>,
    rx: Receiver<Reply<O>>,
}

impl<O> Outbox<O> {
    fn new() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self { tx, rx }
    }

    fn drain(&self) -> usize {
        self.rx.try_iter().count()
    }
}

/// Channels and lifecycle state shared by one coordinator and its sessions.
pub struct Mailboxes<A, O> {
    id: CoordinatorId,
    inbound_tx: Sender<Message<A>>,
    inbound_rx: Receiver<Message<A>>,
    outbound: Vec<Outbox<O>>,
    started: Signal,
    finished: Signal,
    stop_gate: StopGate,
    stop_pending: AtomicBool,
    exit: Mutex<Option<LoopExit>>,
}

impl<A, O> std::fmt::Debug for Mailboxes<A, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mailboxes")
            .field("id", &self.id)
            .field("participants", &self.outbound.len())
            .field("inbound_pending", &self.inbound_rx.len())
            .field("started", &self.started.is_set())
            .field("finished", &self.finished.is_set())
            .field("stopping", &self.stop_gate.is_held())
            .finish_non_exhaustive()
    }
}

impl<A, O> Mailboxes<A, O> {
    /// Create mailboxes for `num_participants` participants.
    pub fn new(id: CoordinatorId, num_participants: usize) -> Self {
        let (inbound_tx, inbound_rx) = crossbeam_channel::unbounded();
        Self {
            id,
            inbound_tx,
            inbound_rx,
            outbound: (0..num_participants).map(|_| Outbox::new()).collect(),
            started: Signal::new(),
            finished: Signal::new(),
            stop_gate: StopGate::default(),
            stop_pending: AtomicBool::new(false),
            exit: Mutex::new(None),
        }
    }

    /// The coordinator these mailboxes belong to.
    pub const fn id(&self) -> CoordinatorId {
        self.id
    }

    /// Number of outbound channels.
    pub fn num_participants(&self) -> usize {
        self.outbound.len()
    }

    /// Push a message onto the inbound channel.
    pub fn send_in(&self, message: Message<A>) {
        // Both ends live in `self`, so the channel cannot be disconnected.
        let _ = self.inbound_tx.send(message);
    }

    /// Block until an inbound message arrives.
    pub fn recv_in(&self) -> Message<A> {
        self.inbound_rx
            .recv()
            .unwrap_or(Message::ShutdownRequested)
    }

    /// Wait up to `timeout` for an inbound message.
    pub fn recv_in_timeout(&self, timeout: Duration) -> Option<Message<A>> {
        self.inbound_rx.recv_timeout(timeout).ok()
    }

    /// Push a reply onto `participant`'s outbound channel.
    ///
    /// The channel is expected to be empty: each participant has at most one
    /// request outstanding. A non-empty channel is logged and the reply is
    /// queued anyway.
    pub fn send_out(&self, participant: ParticipantId, reply: Reply<O>) {
        let Some(outbox) = self.outbound.get(participant.index()) else {
            tracing::warn!(
                coordinator = %self.id,
                participant = %participant,
                "dropping reply for unknown participant"
            );
            return;
        };
        if !outbox.rx.is_empty() {
            tracing::warn!(
                coordinator = %self.id,
                participant = %participant,
                pending = outbox.rx.len(),
                "outbound channel not empty before send"
            );
        }
        let _ = outbox.tx.send(reply);
    }

    /// Block until a reply for `participant` arrives.
    ///
    /// An unknown participant gets [`Reply::Shutdown`] immediately.
    pub fn recv_out(&self, participant: ParticipantId) -> Reply<O> {
        self.outbound
            .get(participant.index())
            .and_then(|outbox| outbox.rx.recv().ok())
            .unwrap_or(Reply::Shutdown)
    }

    /// Wait up to `timeout` for a reply for `participant`.
    pub fn recv_out_timeout(&self, participant: ParticipantId, timeout: Duration) -> Option<Reply<O>> {
        self.outbound
            .get(participant.index())
            .and_then(|outbox| outbox.rx.recv_timeout(timeout).ok())
    }

    /// Number of replies waiting for `participant`.
    pub fn pending_out(&self, participant: ParticipantId) -> usize {
        self.outbound
            .get(participant.index())
            .map_or(0, |outbox| outbox.rx.len())
    }

    /// Discard everything queued on the inbound channel. Returns the number
    /// of discarded messages.
    pub fn drain_inbound(&self) -> usize {
        self.inbound_rx.try_iter().count()
    }

    /// Discard everything queued on every outbound channel.
    pub fn drain_outbound(&self) -> usize {
        self.outbound.iter().map(Outbox::drain).sum()
    }

    /// Replace the contents of every outbound channel with one reply built
    /// by `make`.
    pub fn refill_outbound<F>(&self, make: F)
    where
        F: Fn() -> Reply<O>,
    {
        for outbox in &self.outbound {
            outbox.drain();
            let _ = outbox.tx.send(make());
        }
    }

    /// Called by the control loop once it is ready to receive.
    pub fn mark_started(&self) {
        self.finished.clear();
        self.started.set();
    }

    /// Called by the control loop as its very last action.
    pub fn mark_finished(&self, exit: LoopExit) {
        *self.exit.lock() = Some(exit);
        self.stop_pending.store(false, Ordering::SeqCst);
        self.finished.set();
        self.started.clear();
        self.stop_gate.release();
    }

    /// Whether the control loop has started.
    pub fn is_started(&self) -> bool {
        self.started.is_set()
    }

    /// Whether the control loop has finished.
    pub fn is_finished(&self) -> bool {
        self.finished.is_set()
    }

    /// Started and not yet finished.
    pub fn is_running(&self) -> bool {
        self.is_started() && !self.is_finished()
    }

    /// Block until the control loop has started, or `timeout` elapses.
    pub fn wait_started(&self, timeout: Duration) -> bool {
        self.started.wait_timeout(timeout)
    }

    /// Block until the control loop has finished, or `timeout` elapses.
    pub fn wait_finished(&self, timeout: Duration) -> bool {
        self.finished.wait_timeout(timeout)
    }

    /// How the control loop ended, once it has.
    pub fn exit(&self) -> Option<LoopExit> {
        self.exit.lock().clone()
    }

    /// Close the stop gate. Returns `false` if a stop is already underway.
    pub fn try_acquire_stop(&self) -> bool {
        self.stop_gate.try_acquire()
    }

    /// Reopen the stop gate.
    pub fn release_stop(&self) {
        self.stop_gate.release();
    }

    /// Stop the coordinator.
    ///
    /// The first caller to get through the gate records the request. If the
    /// loop is running it also queues a shutdown request and replaces every
    /// participant's pending replies with [`Reply::Shutdown`], releasing
    /// blocked sessions. A loop that has not started yet ends as soon as it
    /// does, and the gate stays closed until then. Other callers do nothing.
    /// With `wait`, any caller blocks until the loop has finished, provided
    /// it has started.
    pub fn stop(&self, wait: bool) {
        if self.try_acquire_stop() {
            if self.is_finished() {
                self.release_stop();
            } else {
                // Recorded before the running check so that a loop starting
                // concurrently either sees the flag or is seen as running.
                self.stop_pending.store(true, Ordering::SeqCst);
                if self.is_running() {
                    tracing::debug!(coordinator = %self.id, "stop requested");
                    self.send_in(Message::ShutdownRequested);
                    self.refill_outbound(|| Reply::Shutdown);
                } else {
                    tracing::debug!(coordinator = %self.id, "stop requested before start");
                }
            }
        }

        if wait && self.is_started() {
            self.finished.wait();
        }
    }

    /// Called by the control loop right after [`mark_started`](Self::mark_started).
    /// Returns whether a stop was requested before the loop started, and
    /// clears the request.
    pub fn take_stop_pending(&self) -> bool {
        self.stop_pending.swap(false, Ordering::SeqCst)
    }

    /// Report an error from outside the control loop. The loop ends with
    /// [`LoopExit::Faulted`] once it reads the report.
    pub fn report_error(&self, message: impl Into<String>) {
        self.send_in(Message::ErrorReported {
            error: Fault::External {
                message: message.into(),
            },
        });
    }
}
