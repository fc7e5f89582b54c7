//! TCP listeners.
//!
//! HTTP listeners are plain tokio listeners handed to the server; tunnel
//! listeners (SSH) accept through [`Listener`] so every connection holds a slot.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error("invalid address {0}")]
    Address(String),
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to accept: {0}")]
    Accept(#[source] std::io::Error),
    #[error("connection slots closed")]
    Closed,
}

/// Parse and bind a TCP address.
pub async fn bind_tcp(address: &str) -> Result<TcpListener, ListenerError> {
    let addr: SocketAddr = address
        .parse()
        .map_err(|_| ListenerError::Address(address.to_string()))?;

    let listener = TcpListener::bind(addr).await.map_err(|source| ListenerError::Bind {
        address: address.to_string(),
        source,
    })?;

    if let Ok(local) = listener.local_addr() {
        tracing::info!(address = %local, "Listener bound");
    }
    Ok(listener)
}

/// TCP listener admitting at most `max_connections` live connections.
///
/// Once every slot is taken, `accept` stops pulling from the backlog until a
/// [`Slot`] is dropped.
#[derive(Debug)]
pub struct Listener {
    inner: TcpListener,
    slots: Arc<Semaphore>,
    max_connections: usize,
}

impl Listener {
    pub async fn bind(address: &str, max_connections: usize) -> Result<Self, ListenerError> {
        Ok(Self::from_tcp(bind_tcp(address).await?, max_connections))
    }

    pub fn from_tcp(inner: TcpListener, max_connections: usize) -> Self {
        let max_connections = max_connections.max(1);
        Self {
            inner,
            slots: Arc::new(Semaphore::new(max_connections)),
            max_connections,
        }
    }

    /// Wait for a free slot, then accept. Keep the slot alive with the connection.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr, Slot), ListenerError> {
        let slot = Arc::clone(&self.slots)
            .acquire_owned()
            .await
            .map_err(|_| ListenerError::Closed)?;
        let (stream, peer) = self.inner.accept().await.map_err(ListenerError::Accept)?;

        tracing::debug!(peer = %peer, free_slots = self.slots.available_permits(), "Connection accepted");
        Ok((stream, peer, Slot(slot)))
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    pub fn free_slots(&self) -> usize {
        self.slots.available_permits()
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }
}

/// An occupied connection slot. Dropping it frees the slot, panics included.
#[derive(Debug)]
pub struct Slot(#[allow(dead_code)] OwnedSemaphorePermit);

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn slots_are_released_on_drop() {
        let listener = Listener::bind("127.0.0.1:0", 1).await.unwrap();
        let addr = listener.local_addr().unwrap();

        let _client = TcpStream::connect(addr).await.unwrap();
        let (_stream, _peer, slot) = listener.accept().await.unwrap();
        assert_eq!(listener.free_slots(), 0);

        drop(slot);
        assert_eq!(listener.free_slots(), 1);
    }

    #[tokio::test]
    async fn bad_address_is_rejected() {
        assert!(matches!(
            bind_tcp("not-an-address").await,
            Err(ListenerError::Address(_))
        ));
    }
}
