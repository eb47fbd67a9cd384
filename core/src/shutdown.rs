//! Process-wide shutdown coordination.
//!
//! # Design
//! Every operation registers before doing work and deregisters when its
//! `Registration` guard drops, so early returns and cancellations are
//! counted exactly once. Registration increments first and checks the phase
//! second; a concurrent `request_shutdown` therefore either sees the new
//! registration in its drain wait or the registration sees the new phase and
//! backs out. Forced shutdown cancels a shared token that every suspension
//! point selects on.

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::error::{NetError, NetResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ShutdownPhase {
    Running = 0,
    ShutdownRequested = 1,
    Terminated = 2,
}

impl ShutdownPhase {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => ShutdownPhase::Running,
            1 => ShutdownPhase::ShutdownRequested,
            _ => ShutdownPhase::Terminated,
        }
    }
}

struct Inner {
    active: AtomicUsize,
    phase: AtomicU8,
    abort: CancellationToken,
    drained: Notify,
}

impl Inner {
    fn release(&self) {
        if self.active.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.drained.notify_waiters();
        }
    }
}

#[derive(Clone)]
pub struct ShutdownCoordinator {
    inner: Arc<Inner>,
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                active: AtomicUsize::new(0),
                phase: AtomicU8::new(ShutdownPhase::Running as u8),
                abort: CancellationToken::new(),
                drained: Notify::new(),
            }),
        }
    }

    /// Count a new operation, or reject it once shutdown has begun.
    pub fn register(&self) -> NetResult<Registration> {
        self.inner.active.fetch_add(1, Ordering::SeqCst);
        if self.phase() != ShutdownPhase::Running {
            self.inner.release();
            return Err(NetError::ShuttingDown);
        }
        Ok(Registration { inner: Arc::clone(&self.inner) })
    }

    pub fn phase(&self) -> ShutdownPhase {
        ShutdownPhase::from_u8(self.inner.phase.load(Ordering::SeqCst))
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.phase() != ShutdownPhase::Running
    }

    pub fn active_operations(&self) -> usize {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Stop accepting operations. Returns `false` if shutdown had already
    /// been requested.
    pub fn request_shutdown(&self) -> bool {
        self.inner
            .phase
            .compare_exchange(
                ShutdownPhase::Running as u8,
                ShutdownPhase::ShutdownRequested as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    /// Cancel all in-flight operations. They fail fast with `Aborted`.
    pub fn abort(&self) {
        self.request_shutdown();
        self.inner.abort.cancel();
    }

    pub fn is_aborted(&self) -> bool {
        self.inner.abort.is_cancelled()
    }

    pub fn mark_terminated(&self) {
        self.inner.phase.store(ShutdownPhase::Terminated as u8, Ordering::SeqCst);
    }

    /// Wait until no operation is registered. `None` waits without bound.
    /// Returns whether the count reached zero.
    pub async fn wait_drained(&self, limit: Option<Duration>) -> bool {
        let drain = async {
            loop {
                let notified = self.inner.drained.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if self.active_operations() == 0 {
                    return;
                }
                notified.await;
            }
        };
        match limit {
            Some(limit) => tokio::time::timeout(limit, drain).await.is_ok(),
            None => {
                drain.await;
                true
            }
        }
    }
}

/// Live registration of one operation.
pub struct Registration {
    inner: Arc<Inner>,
}

impl Registration {
    /// Resolves when a forced shutdown aborts this operation.
    pub async fn aborted(&self) {
        self.inner.abort.cancelled().await
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.inner.release();
    }
}
