//! `SandboxReconciler` + the waiter map (spec §4.4): observes the
//! orchestrator's sandbox watch stream and routes exactly one "ready" event
//! to whichever waiter registered for that `(namespace, sandbox-name)`.
//!
//! The waiter map is the core race-freedom argument for the whole pipeline
//! (spec §5): `WatchOnce` must return *before* the declarative object is
//! created, so a `Ready` event racing the create can't be missed.

use k8s_client::{is_serving_ready, OrchestratorClient, Sandbox, SandboxEvent};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// One sandbox becoming ready. Carried rather than `()` so the pipeline
/// doesn't need a second round-trip to re-fetch the object it already just
/// received from the watch stream.
#[derive(Debug, Clone)]
pub struct ReadyEvent {
    pub sandbox: Sandbox,
}

type WaiterKey = (String, String);

/// `(namespace, sandbox-name) -> single-slot channel` (spec §3 "Waiter map").
/// At most one waiter per key; short-critical-section mutex per spec §5 --
/// the map lock is only ever held for the map mutation itself, never across
/// the channel send.
#[derive(Default)]
pub struct WaiterMap {
    waiters: Mutex<HashMap<WaiterKey, oneshot::Sender<ReadyEvent>>>,
}

impl WaiterMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a fresh channel, stores it under `(namespace, name)`, returns
    /// the receive half. Resolves spec §9's open question on
    /// double-registration as last-writer-wins: a second call for the same
    /// key drops (and thereby closes) the previous sender, so a stale
    /// waiter's `.await` observes channel closure instead of hanging
    /// forever.
    pub fn watch_once(&self, namespace: &str, name: &str) -> oneshot::Receiver<ReadyEvent> {
        let (tx, rx) = oneshot::channel();
        let mut waiters = self.waiters.lock();
        // Dropping the previous Sender (if any) here is what closes it.
        waiters.insert((namespace.to_string(), name.to_string()), tx);
        rx
    }

    /// Removes the waiter for `(namespace, name)` without signaling it.
    /// Called by the pipeline's timeout branch so a late `Ready` event
    /// doesn't race a waiter that has already given up (spec §4.4).
    pub fn unwatch(&self, namespace: &str, name: &str) {
        self.waiters.lock().remove(&(namespace.to_string(), name.to_string()));
    }

    /// Takes and removes the waiter for `(namespace, name)`, if any. The
    /// caller sends outside the lock (spec §5 "the send is outside the
    /// lock").
    fn take(&self, namespace: &str, name: &str) -> Option<oneshot::Sender<ReadyEvent>> {
        self.waiters.lock().remove(&(namespace.to_string(), name.to_string()))
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.waiters.lock().len()
    }
}

/// Consumes the orchestrator's sandbox watch stream and delivers at most one
/// `ReadyEvent` per registered waiter (spec §4.4).
pub struct SandboxReconciler {
    waiters: Arc<WaiterMap>,
}

impl SandboxReconciler {
    pub fn new(waiters: Arc<WaiterMap>) -> Self {
        Self { waiters }
    }

    pub fn waiters(&self) -> Arc<WaiterMap> {
        self.waiters.clone()
    }

    /// Handles a single watch event: computes serving-readiness (spec §4.7)
    /// and, if ready, delivers it to the matching waiter with a
    /// non-blocking send. A full/closed channel (the waiter already timed
    /// out and unregistered, or this is a duplicate at-least-once delivery)
    /// is dropped silently -- that is the expected, documented behavior,
    /// not an error.
    pub fn handle_event(&self, event: SandboxEvent) {
        let sandbox = match event {
            SandboxEvent::Applied(sandbox) => sandbox,
            SandboxEvent::Deleted(_) | SandboxEvent::Restarted => return,
        };
        let ready = sandbox
            .status
            .as_ref()
            .map(is_serving_ready)
            .unwrap_or(false);
        if !ready {
            return;
        }
        let namespace = sandbox.metadata.namespace.clone().unwrap_or_default();
        let name = sandbox.metadata.name.clone().unwrap_or_default();
        if let Some(tx) = self.waiters.take(&namespace, &name) {
            // oneshot::Sender::send is already non-blocking; failure here
            // just means the receiver was dropped (waiter gave up).
            let _ = tx.send(ReadyEvent { sandbox });
        } else {
            tracing::debug!(namespace = %namespace, name = %name, "ready event with no registered waiter");
        }
    }

    /// Drives the reconciler off a live watch stream until `cancel` fires.
    /// `_client` is accepted for symmetry with a future re-fetch-on-event
    /// design (spec §4.4 "fetch the current sandbox"); the watch stream
    /// already carries the current object so no extra GET is needed today.
    pub async fn run(
        self: Arc<Self>,
        mut events: impl futures::Stream<Item = Result<SandboxEvent, k8s_client::OrchestratorError>> + Unpin,
        _client: Arc<dyn OrchestratorClient>,
        cancel: CancellationToken,
    ) {
        use futures::StreamExt;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("sandbox reconciler shutting down");
                    return;
                }
                event = events.next() => {
                    match event {
                        Some(Ok(event)) => self.handle_event(event),
                        Some(Err(error)) => tracing::warn!(%error, "sandbox watch stream error"),
                        None => {
                            tracing::warn!("sandbox watch stream ended");
                            return;
                        }
                    }
                }
            }
        }
    }
}
