//! Open tunnel accounting.
//!
//! Every WebSocket or SSH tunnel holds a [`TunnelGuard`] for its lifetime.
//! Shutdown waits on [`TunnelTracker::wait_idle`] so tunnels can finish
//! within the grace period.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::watch;

use crate::observability::metrics;

static NEXT_TUNNEL_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique tunnel number, used as a tracing field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TunnelId(u64);

impl TunnelId {
    fn next() -> Self {
        Self(NEXT_TUNNEL_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for TunnelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tunnel-{}", self.0)
    }
}

/// Shared count of open tunnels. Clones observe the same count.
#[derive(Debug, Clone)]
pub struct TunnelTracker {
    open: Arc<watch::Sender<usize>>,
}

impl TunnelTracker {
    pub fn new() -> Self {
        let (open, _) = watch::channel(0);
        Self { open: Arc::new(open) }
    }

    /// Count a new tunnel of `kind` until the returned guard drops.
    pub fn track(&self, kind: &'static str) -> TunnelGuard {
        self.open.send_modify(|n| *n += 1);
        metrics::tunnel_opened(kind);

        let id = TunnelId::next();
        tracing::trace!(tunnel = %id, kind, "Tunnel opened");
        TunnelGuard {
            open: Arc::clone(&self.open),
            id,
            kind,
        }
    }

    pub fn open_count(&self) -> usize {
        *self.open.borrow()
    }

    /// Resolve once no tunnel is open.
    pub async fn wait_idle(&self) {
        let mut rx = self.open.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}

impl Default for TunnelTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
pub struct TunnelGuard {
    open: Arc<watch::Sender<usize>>,
    id: TunnelId,
    kind: &'static str,
}

impl TunnelGuard {
    pub fn id(&self) -> TunnelId {
        self.id
    }
}

impl Drop for TunnelGuard {
    fn drop(&mut self) {
        self.open.send_modify(|n| *n = n.saturating_sub(1));
        metrics::tunnel_closed(self.kind);
        tracing::trace!(tunnel = %self.id, kind = self.kind, "Tunnel closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn guards_move_the_count() {
        let tracker = TunnelTracker::new();
        let ssh = tracker.track("ssh");
        let ws = tracker.clone().track("websocket");
        assert_ne!(ssh.id(), ws.id());
        assert_eq!(tracker.open_count(), 2);

        drop(ssh);
        assert_eq!(tracker.open_count(), 1);
        drop(ws);
        assert_eq!(tracker.open_count(), 0);
    }

    #[tokio::test]
    async fn wait_idle_returns_after_last_guard() {
        let tracker = TunnelTracker::new();
        let guard = tracker.track("ssh");

        let waiter = tokio::spawn({
            let tracker = tracker.clone();
            async move { tracker.wait_idle().await }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        drop(guard);

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn wait_idle_without_tunnels_is_immediate() {
        tokio::time::timeout(Duration::from_millis(100), TunnelTracker::new().wait_idle())
            .await
            .unwrap();
    }
}
