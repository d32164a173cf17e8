//! Poll driver.
//!
//! One driver per client. Each tick drains the transport in arrival order,
//! feeds the signaling machine, enforces its deadlines and honors release
//! requests under the client lock, queueing the resulting events. The
//! events are then delivered with the lock released, so a callback may call
//! back into its own client.
//!
//! # Delivery
//!
//! One thread at a time delivers; events queued meanwhile, including those
//! raised by a callback re-entering the client, are delivered by that same
//! thread in order. Ticks and `leave()` from other threads wait until the
//! queue is idle, so state transitions never overlap a callback from another
//! thread.
//!
//! # Shutdown
//!
//! The driver exits on its own once the stream is finished. `leave()`
//! cancels the token and then waits for any delivery in progress; the
//! driver re-checks the token under the lock, so no callback runs after
//! `leave()` returns.

use crate::config::{MediaConfig, MIN_POLL_INTERVAL};
use crate::demux::Demultiplexer;
use crate::signaling::{Event, SignalingMachine, SignalingState};
use crate::transport::{Transport, TransportEvent};
use rtms_protocol::{decode_binary, decode_text, Inbound, ProtocolError};
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Everything one client owns, guarded by a single lock.
#[derive(Default)]
pub(crate) struct Core {
    pub(crate) machine: Option<SignalingMachine>,
    pub(crate) transport: Option<Box<dyn Transport>>,
    pub(crate) demux: Demultiplexer,
    pub(crate) media: MediaConfig,
    /// Bumped by every `leave()`, so a join racing a leave can notice.
    pub(crate) leave_epoch: u64,
    /// A background driver is ticking this core.
    pub(crate) driver_active: bool,
    /// Events waiting for their callbacks, oldest first.
    pub(crate) pending: VecDeque<Event>,
    /// Thread currently delivering `pending`.
    delivering: Option<ThreadId>,
}

/// A core plus the signal that delivery went idle.
pub(crate) struct Shared {
    core: Mutex<Core>,
    idle: Condvar,
}

pub(crate) type SharedCore = Arc<Shared>;

/// Lock the core, recovering from a poisoned mutex.
///
/// Callbacks run outside the lock under `catch_unwind`, so poisoning only
/// follows a panic in this crate; the state is still consistent enough to
/// tear down.
pub(crate) fn lock(shared: &Shared) -> MutexGuard<'_, Core> {
    shared.core.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    pub(crate) fn new(core: Core) -> Self {
        Self {
            core: Mutex::new(core),
            idle: Condvar::new(),
        }
    }

    /// Lock the core once no other thread is delivering events.
    ///
    /// The delivering thread itself gets the lock straight away, so a
    /// callback can re-enter its client.
    pub(crate) fn lock_idle(&self) -> MutexGuard<'_, Core> {
        let me = thread::current().id();
        let guard = lock(self);
        self.idle
            .wait_while(guard, |core| {
                core.delivering.is_some_and(|owner| owner != me)
            })
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Deliver every queued event, releasing the lock around each callback.
    ///
    /// Returns at once if a delivery is already running; that delivery picks
    /// up whatever was queued.
    pub(crate) fn deliver<'a>(&'a self, mut core: MutexGuard<'a, Core>) {
        if core.delivering.is_some() {
            return;
        }
        core.delivering = Some(thread::current().id());

        while let Some(event) = core.pending.pop_front() {
            let Some(mut callback) = core.demux.checkout(&event) else {
                continue;
            };
            drop(core);
            let outcome = callback.call(&event);
            core = lock(self);
            core.demux.checkin(callback, &event, outcome);
        }

        core.delivering = None;
        drop(core);
        self.idle.notify_all();
    }
}

impl Core {
    /// Run one driver tick and queue the resulting events. Returns whether
    /// the stream still needs polling.
    pub(crate) fn tick(&mut self, now: Instant) -> bool {
        let Some(machine) = self.machine.as_mut() else {
            return false;
        };

        let mut events = Vec::new();
        if let Some(transport) = self.transport.as_mut() {
            while let Some(event) = transport.try_recv() {
                match event {
                    TransportEvent::Text(text) => {
                        if let Some(inbound) = decoded(decode_text(&text)) {
                            machine.handle(inbound, &mut **transport, now, &mut events);
                        }
                    }
                    TransportEvent::Binary(data) => {
                        if let Some(inbound) = decoded(decode_binary(&data)) {
                            machine.handle(inbound, &mut **transport, now, &mut events);
                        }
                    }
                    TransportEvent::Disconnected(reason) => {
                        machine.handle_disconnect(&reason, &mut events);
                    }
                }
                // Anything still queued belongs to a connection we are abandoning
                if machine.release_requested() {
                    break;
                }
            }
        }

        machine.check_timers(now, &mut events);

        if machine.release_requested() {
            if let Some(mut transport) = self.transport.take() {
                transport.close();
            }
            machine.transport_released();
        }

        let running = !machine.state().is_finished();
        self.pending.extend(events);
        running
    }

    /// Local leave: terminate, release the transport and queue the report.
    ///
    /// Returns `false` if there was nothing left to leave.
    pub(crate) fn leave(&mut self) -> bool {
        self.leave_epoch += 1;
        let Some(machine) = self.machine.as_mut() else {
            return false;
        };

        let mut events = Vec::new();
        let left = machine.leave(&mut events);
        if let Some(mut transport) = self.transport.take() {
            transport.close();
        }
        machine.transport_released();
        self.pending.extend(events);
        left
    }

    /// Current stream state, `None` before the first join.
    pub(crate) fn state(&self) -> Option<SignalingState> {
        self.machine.as_ref().map(SignalingMachine::state)
    }
}

fn decoded(result: Result<Inbound, ProtocolError>) -> Option<Inbound> {
    match result {
        Ok(inbound) => Some(inbound),
        Err(e) if e.is_unknown_type() => {
            trace!(target: "rtms.driver", error = %e, "Dropping message of unknown type");
            None
        }
        Err(e) => {
            warn!(target: "rtms.driver", error = %e, "Dropping malformed message");
            None
        }
    }
}

/// Background poll loop.
///
/// Ticks every `poll_interval` (never faster than [`MIN_POLL_INTERVAL`])
/// until the stream finishes or `cancel_token` is cancelled.
pub(crate) async fn run_poll_driver(
    shared: SharedCore,
    poll_interval: Duration,
    cancel_token: CancellationToken,
) {
    let period = poll_interval.max(MIN_POLL_INTERVAL);
    debug!(target: "rtms.driver", period = ?period, "Starting poll driver");

    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => {
                debug!(target: "rtms.driver", "Poll driver cancelled");
                break;
            }
            _ = interval.tick() => {
                if !tick_and_deliver(&shared, &cancel_token) {
                    break;
                }
            }
        }
    }
}

/// One scheduled tick plus delivery. Returns whether to keep going.
fn tick_and_deliver(shared: &Shared, cancel_token: &CancellationToken) -> bool {
    let mut core = shared.lock_idle();
    // leave() may have cancelled while we waited for the lock
    if cancel_token.is_cancelled() {
        return false;
    }
    let running = core.tick(Instant::now());
    if !running {
        core.driver_active = false;
        info!(
            target: "rtms.driver",
            state = ?core.state(),
            "Stream finished, poll driver stopping"
        );
    }
    shared.deliver(core);
    running
}
