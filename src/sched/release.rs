use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam::channel::{Receiver, RecvTimeoutError, Sender};
use tracing::warn;

use crate::clock::Clock;
use crate::engine::Shared;
use crate::note::ActivationSource;

// Granularity of the worker's wait. Bounds how late a release can fire and
// how often the worker re-reads a clock that may be driven externally.
const POLL_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug)]
struct PendingRelease {
    due: Duration,
    channel: u8,
    pitch: u8,
    velocity: u8,
    source: ActivationSource,
}

impl PartialEq for PendingRelease {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due
    }
}

impl Eq for PendingRelease {}

impl PartialOrd for PendingRelease {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PendingRelease {
    fn cmp(&self, other: &Self) -> Ordering {
        self.due.cmp(&other.due)
    }
}

enum TimerMsg {
    Arm(PendingRelease),
    Shutdown,
}

/// Owns the deferred-release worker: a thread holding a min-heap of pending
/// releases, fed over a channel. Every armed release corresponds to exactly
/// one issued begin. Releases that come due after teardown are discarded by
/// the Running check inside the shared lock.
pub(crate) struct ReleaseTimer {
    tx: Sender<TimerMsg>,
    handle: Option<JoinHandle<()>>,
}

impl ReleaseTimer {
    pub(crate) fn spawn(shared: Arc<Shared>, clock: Arc<dyn Clock>) -> Self {
        let (tx, rx) = crossbeam::channel::unbounded();
        let handle = std::thread::spawn(move || {
            release_worker(rx, shared, clock);
        });
        Self {
            tx,
            handle: Some(handle),
        }
    }

    /// Schedules a release no earlier than `now + delay`.
    pub(crate) fn arm(
        &self,
        delay: Duration,
        channel: u8,
        pitch: u8,
        velocity: u8,
        source: ActivationSource,
        now: Duration,
    ) {
        let _ = self.tx.send(TimerMsg::Arm(PendingRelease {
            due: now + delay,
            channel,
            pitch,
            velocity,
            source,
        }));
    }

    /// Stops the worker and waits for it to finish. Pending releases are
    /// dropped unfired. Idempotent; once this returns no device call can
    /// originate from the timer.
    pub(crate) fn shutdown(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = self.tx.send(TimerMsg::Shutdown);
            let _ = handle.join();
        }
    }
}

impl Drop for ReleaseTimer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn release_worker(rx: Receiver<TimerMsg>, shared: Arc<Shared>, clock: Arc<dyn Clock>) {
    let mut heap: BinaryHeap<Reverse<PendingRelease>> = BinaryHeap::new();

    loop {
        let now = clock.now();
        while heap.peek().is_some_and(|r| r.0.due <= now) {
            let Reverse(pending) = heap.pop().unwrap();
            fire(&shared, &pending);
        }

        let msg = match heap.peek() {
            Some(Reverse(next)) => {
                let wait = next.due.saturating_sub(now).min(POLL_INTERVAL);
                match rx.recv_timeout(wait) {
                    Ok(msg) => Some(msg),
                    Err(RecvTimeoutError::Timeout) => None,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            None => match rx.recv() {
                Ok(msg) => Some(msg),
                Err(_) => break,
            },
        };

        match msg {
            Some(TimerMsg::Arm(pending)) => heap.push(Reverse(pending)),
            Some(TimerMsg::Shutdown) => break,
            None => {}
        }
    }
}

fn fire(shared: &Shared, pending: &PendingRelease) {
    let mut inner = shared.inner.lock();
    if !inner.running {
        // stale release after teardown: no device call, no registry change
        return;
    }
    if let Err(e) = inner
        .sink
        .end(pending.pitch, pending.velocity, pending.channel)
    {
        warn!(
            channel = pending.channel,
            pitch = pending.pitch,
            error = %e,
            "note-end failed"
        );
    }
    inner
        .registry
        .remove(pending.channel, pending.source, pending.pitch);
}
