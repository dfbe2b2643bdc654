//! In-flight request tracking.
//!
//! Every dispatched request registers a completion keyed by its sync id.
//! The completion is resolved exactly once: by a matching response, by the
//! deadline sweep, by explicit cancellation, or by connection shutdown.

use crate::error::ClientError;
use rmpv::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;
use tokio::sync::oneshot;

/// Receiver half of a pending completion.
pub type CompletionReceiver = oneshot::Receiver<Result<Value, ClientError>>;

struct PendingRequest {
    tx: oneshot::Sender<Result<Value, ClientError>>,
    deadline: Instant,
}

struct Inner {
    entries: HashMap<u64, PendingRequest>,
    closed: bool,
}

/// Tracks pending requests by sync id.
pub struct RequestRegistry {
    inner: Mutex<Inner>,
    next_sync: AtomicU64,
}

impl RequestRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                closed: false,
            }),
            next_sync: AtomicU64::new(1),
        }
    }

    /// Returns the next sync id. Unsigned modular: wraps around at u64::MAX.
    pub fn next_sync(&self) -> u64 {
        self.next_sync.fetch_add(1, Ordering::Relaxed)
    }

    /// Registers a pending completion for `sync` expiring at `deadline`.
    pub fn register(
        &self,
        sync: u64,
        deadline: Instant,
    ) -> Result<CompletionReceiver, ClientError> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(ClientError::ConnectionClosed);
        }
        if inner.entries.contains_key(&sync) {
            return Err(ClientError::DuplicateSync(sync));
        }
        let (tx, rx) = oneshot::channel();
        inner.entries.insert(sync, PendingRequest { tx, deadline });
        Ok(rx)
    }

    /// Delivers a successful response body. A missing entry (late response
    /// after timeout or cancellation) is a silent no-op.
    pub fn complete(&self, sync: u64, body: Value) {
        if let Some(pending) = self.lock().entries.remove(&sync) {
            let _ = pending.tx.send(Ok(body));
        } else {
            tracing::debug!(sync, "dropping response with no pending request");
        }
    }

    /// Delivers a failure. A missing entry is a silent no-op.
    pub fn fail(&self, sync: u64, error: ClientError) {
        if let Some(pending) = self.lock().entries.remove(&sync) {
            let _ = pending.tx.send(Err(error));
        }
    }

    /// Cancels a pending completion. Any response arriving later for this
    /// sync is dropped.
    pub fn cancel(&self, sync: u64) {
        self.fail(sync, ClientError::Cancelled);
    }

    /// Expires every entry whose deadline has passed.
    pub fn tick(&self, now: Instant) {
        let mut inner = self.lock();
        let expired: Vec<u64> = inner
            .entries
            .iter()
            .filter(|(_, pending)| pending.deadline <= now)
            .map(|(sync, _)| *sync)
            .collect();
        for sync in expired {
            if let Some(pending) = inner.entries.remove(&sync) {
                tracing::debug!(sync, "request deadline elapsed");
                let _ = pending.tx.send(Err(ClientError::Timeout));
            }
        }
    }

    /// Fails every pending entry with `error` and refuses further
    /// registrations.
    pub fn shutdown(&self, error: ClientError) {
        let mut inner = self.lock();
        inner.closed = true;
        for (_, pending) in inner.entries.drain() {
            let _ = pending.tx.send(Err(error.replicate()));
        }
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Number of in-flight requests.
    pub fn pending_count(&self) -> usize {
        self.lock().entries.len()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for RequestRegistry {
    fn default() -> Self {
        Self::new()
    }
}
