//! Background Expiry Reaper
//!
//! Each map owns one reaper task. Instead of scanning on a fixed interval it
//! sleeps until the soonest deadline in the expiration heap, so entries are
//! removed at the moment they expire and an idle map costs nothing.
//!
//! ## States
//!
//! ```text
//!            timer fired: sweep overdue, re-arm
//!            wakeup: re-arm only
//!              ┌──────┐
//!              ▼      │
//!          ┌─────────────┐  draining   ┌──────────┐  flushed  ┌────────────┐
//!  start ─>│   running   │────────────>│ draining │──────────>│ terminated │
//!          └─────────────┘             └──────────┘           └────────────┘
//! ```
//!
//! The wakeup signal is a `Notify` permit, so any number of mutations before
//! the reaper gets scheduled collapse into a single re-arm. The reaper only
//! ever needs to wake at least once after a change, not once per change.

use crate::storage::StorageEngine;
use std::fmt;
use std::future;
use std::panic;
use std::sync::Arc;
use std::time::Instant;
use tokio::runtime::Handle;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// A handle to the running expiry reaper.
///
/// The reaper runs until its engine starts draining; it then flushes the
/// remaining entries and publishes completion through this handle.
pub(crate) struct ExpiryReaper<V> {
    engine: Arc<StorageEngine<V>>,
    /// Cleared by the first caller that observes the task's exit
    task: Mutex<Option<JoinHandle<()>>>,
    /// Flips to `true` once the drain flush has finished
    done: Arc<watch::Sender<bool>>,
}

impl<V> ExpiryReaper<V>
where
    V: Send + Sync + 'static,
{
    /// Starts the reaper as a background task on `handle`.
    pub(crate) fn start(engine: Arc<StorageEngine<V>>, handle: &Handle) -> Self {
        let (done, _) = watch::channel(false);
        let done = Arc::new(done);
        let draining_rx = engine.subscribe_draining();

        let task = handle.spawn(reaper_loop(
            Arc::clone(&engine),
            draining_rx,
            Arc::clone(&done),
        ));

        debug!("Expiry reaper started");

        Self {
            engine,
            task: Mutex::new(Some(task)),
            done,
        }
    }
}

impl<V> ExpiryReaper<V> {
    /// Waits until the reaper has flushed the map and exited.
    ///
    /// Must only be called once draining has begun. Every caller resolves
    /// after the single flush.
    ///
    /// # Panics
    ///
    /// If a listener panicked on the reaper task, the flush is finished on
    /// the calling task and the listener's panic is then resumed here, in
    /// the first caller to observe it.
    pub(crate) async fn terminated(&self) {
        let mut task = self.task.lock().await;
        let Some(handle) = task.as_mut() else {
            return;
        };
        let result = handle.await;
        *task = None;

        let Err(err) = result else {
            return;
        };

        warn!(error = %err, "Expiry reaper died, flushing on the caller");
        let (expired, evicted) = self.engine.flush();
        info!(expired = expired, evicted = evicted, "Map drained");
        self.done.send_replace(true);
        drop(task);

        if let Ok(payload) = err.try_into_panic() {
            panic::resume_unwind(payload);
        }
    }

    pub(crate) fn is_terminated(&self) -> bool {
        *self.done.borrow()
    }
}

impl<V> fmt::Debug for ExpiryReaper<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExpiryReaper")
            .field("terminated", &self.is_terminated())
            .finish()
    }
}

/// Resolves once the watched flag is `true`.
///
/// Fails if the sender went away while the flag was still `false`.
pub(crate) async fn wait_until_set(
    rx: &mut watch::Receiver<bool>,
) -> Result<(), watch::error::RecvError> {
    loop {
        if *rx.borrow_and_update() {
            return Ok(());
        }
        rx.changed().await?;
    }
}

/// Sleeps until `deadline`, or forever when there is none.
async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(tokio::time::Instant::from_std(at)).await,
        None => future::pending().await,
    }
}

/// The main reaper loop.
async fn reaper_loop<V>(
    engine: Arc<StorageEngine<V>>,
    mut draining_rx: watch::Receiver<bool>,
    done: Arc<watch::Sender<bool>>,
) {
    loop {
        if *draining_rx.borrow_and_update() {
            break;
        }

        let deadline = engine.next_deadline();

        tokio::select! {
            biased;
            result = draining_rx.changed() => {
                if result.is_err() || *draining_rx.borrow() {
                    debug!("Expiry reaper received drain signal");
                    break;
                }
            }
            _ = engine.wakeup().notified() => {
                trace!("Heap root changed, re-arming reaper timer");
            }
            _ = sleep_until(deadline) => {
                let expired = engine.sweep_expired();
                if expired > 0 {
                    debug!(
                        expired = expired,
                        keys_remaining = engine.len(),
                        "Expired keys reaped"
                    );
                }
            }
        }
    }

    let (expired, evicted) = engine.flush();
    info!(expired = expired, evicted = evicted, "Map drained");

    done.send_replace(true);
}
