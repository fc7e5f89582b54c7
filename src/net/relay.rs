//! Bidirectional byte relay.
//!
//! Both copy directions run inside one `select!`: the first to finish, by EOF
//! or error, drops the other, so no half of a tunnel outlives its peer.

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

/// Which side ended the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayEnd {
    Client,
    Backend,
}

/// Relay bytes between `client` and `backend` until either side closes.
pub async fn relay<C, B>(client: C, backend: B) -> std::io::Result<RelayEnd>
where
    C: AsyncRead + AsyncWrite,
    B: AsyncRead + AsyncWrite,
{
    let (mut client_rx, mut client_tx) = tokio::io::split(client);
    let (mut backend_rx, mut backend_tx) = tokio::io::split(backend);

    tokio::select! {
        res = copy_and_close(&mut client_rx, &mut backend_tx) => res.map(|_| RelayEnd::Client),
        res = copy_and_close(&mut backend_rx, &mut client_tx) => res.map(|_| RelayEnd::Backend),
    }
}

async fn copy_and_close<R, W>(reader: &mut R, writer: &mut W) -> std::io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let copied = tokio::io::copy(reader, writer).await?;
    writer.shutdown().await?;
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn bytes_flow_both_ways() {
        let (client, mut client_peer) = tokio::io::duplex(64);
        let (backend, mut backend_peer) = tokio::io::duplex(64);
        let relay = tokio::spawn(relay(client, backend));

        client_peer.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        backend_peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        backend_peer.write_all(b"pong").await.unwrap();
        client_peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");

        drop(client_peer);
        assert_eq!(relay.await.unwrap().unwrap(), RelayEnd::Client);
    }

    #[tokio::test]
    async fn backend_close_ends_both_directions() {
        let (client, mut client_peer) = tokio::io::duplex(64);
        let (backend, backend_peer) = tokio::io::duplex(64);
        let relay = tokio::spawn(relay(client, backend));

        drop(backend_peer);
        assert_eq!(relay.await.unwrap().unwrap(), RelayEnd::Backend);

        let mut buf = Vec::new();
        client_peer.read_to_end(&mut buf).await.unwrap();
        assert!(buf.is_empty());
    }
}
