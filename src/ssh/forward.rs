//! Channel forwarding to TCP backends.
//!
//! `first_reachable` relays the channel to the first backend accepting the
//! TCP connection. `fan_out` copies channel input to every reachable backend
//! and merges their output into the channel; it ends when the client closes
//! or every backend has closed.

use std::net::SocketAddr;
use std::time::Duration;

use russh::server::{Handle, Msg};
use russh::Channel;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::config::{SshStrategy, SshTargetConfig};
use crate::net::relay::relay;
use crate::net::TunnelTracker;
use crate::observability::metrics;

const CHUNK_SIZE: usize = 16 * 1024;

#[derive(Debug, Clone)]
pub struct Forwarder {
    targets: Vec<SshTargetConfig>,
    strategy: SshStrategy,
    connect_timeout: Option<Duration>,
}

impl Forwarder {
    pub fn new(targets: Vec<SshTargetConfig>, strategy: SshStrategy, connect_timeout: Option<Duration>) -> Self {
        Self {
            targets,
            strategy,
            connect_timeout,
        }
    }

    /// Forward one session channel until either side closes, then close it.
    pub async fn forward(&self, channel: Channel<Msg>, handle: Handle, peer: SocketAddr, tracker: TunnelTracker) {
        let id = channel.id();
        let _guard = tracker.track("ssh");

        match self.strategy {
            SshStrategy::FirstReachable => match self.dial_first().await {
                Some((target, backend)) => {
                    tracing::debug!(peer = %peer, backend = %target, "SSH channel forwarding");
                    match relay(channel.into_stream(), backend).await {
                        Ok(end) => tracing::debug!(peer = %peer, backend = %target, ended_by = ?end, "SSH channel closed"),
                        Err(e) => tracing::debug!(peer = %peer, backend = %target, error = %e, "SSH channel relay failed"),
                    }
                }
                None => {
                    metrics::record_upstream_error("ssh");
                    tracing::error!(peer = %peer, "No SSH backend reachable");
                }
            },
            SshStrategy::FanOut => {
                let backends = self.dial_all().await;
                if backends.is_empty() {
                    metrics::record_upstream_error("ssh");
                    tracing::error!(peer = %peer, "No SSH backend reachable");
                } else {
                    tracing::debug!(peer = %peer, backends = backends.len(), "SSH channel fanning out");
                    if let Err(e) = fan_out(channel.into_stream(), backends).await {
                        tracing::debug!(peer = %peer, error = %e, "SSH fan-out ended with error");
                    }
                }
            }
        }

        let _ = handle.close(id).await;
    }

    async fn dial(&self, target: &SshTargetConfig) -> std::io::Result<TcpStream> {
        let connect = TcpStream::connect((target.host.as_str(), target.port));
        match self.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, connect)
                .await
                .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out"))?,
            None => connect.await,
        }
    }

    async fn dial_first(&self) -> Option<(String, TcpStream)> {
        for target in &self.targets {
            let name = format!("{}:{}", target.host, target.port);
            match self.dial(target).await {
                Ok(stream) => return Some((name, stream)),
                Err(e) => tracing::warn!(backend = %name, error = %e, "SSH backend unreachable"),
            }
        }
        None
    }

    async fn dial_all(&self) -> Vec<TcpStream> {
        let attempts = self.targets.iter().map(|target| async move { (target, self.dial(target).await) });
        let mut streams = Vec::new();
        for (target, result) in futures_util::future::join_all(attempts).await {
            match result {
                Ok(stream) => streams.push(stream),
                Err(e) => tracing::warn!(
                    backend = %format!("{}:{}", target.host, target.port),
                    error = %e,
                    "SSH backend unreachable"
                ),
            }
        }
        streams
    }
}

/// Mirror `client` input to every backend and merge backend output back.
pub async fn fan_out<S>(client: S, backends: Vec<TcpStream>) -> std::io::Result<()>
where
    S: AsyncRead + AsyncWrite,
{
    let (mut client_rx, mut client_tx) = tokio::io::split(client);
    let (output_tx, mut output_rx) = mpsc::channel::<Vec<u8>>(64);
    let mut readers = JoinSet::new();
    let mut writers = Vec::with_capacity(backends.len());

    for backend in backends {
        let (mut reader, writer) = backend.into_split();
        writers.push(writer);
        let output_tx = output_tx.clone();
        readers.spawn(async move {
            let mut buf = vec![0u8; CHUNK_SIZE];
            loop {
                match reader.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if output_tx.send(buf[..n].to_vec()).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });
    }
    drop(output_tx);

    let input = async {
        let mut buf = vec![0u8; CHUNK_SIZE];
        loop {
            let n = client_rx.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            let mut alive = Vec::with_capacity(writers.len());
            for mut writer in writers.drain(..) {
                if writer.write_all(&buf[..n]).await.is_ok() {
                    alive.push(writer);
                }
            }
            writers = alive;
            if writers.is_empty() {
                break;
            }
        }
        for writer in writers.iter_mut() {
            let _ = writer.shutdown().await;
        }
        Ok::<(), std::io::Error>(())
    };

    let output = async {
        while let Some(chunk) = output_rx.recv().await {
            client_tx.write_all(&chunk).await?;
        }
        client_tx.shutdown().await
    };

    let result = tokio::select! {
        res = input => res,
        res = output => res,
    };
    readers.abort_all();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn echo_backend(prefix: &'static [u8]) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = [0u8; 64];
                    while let Ok(n) = stream.read(&mut buf).await {
                        if n == 0 {
                            break;
                        }
                        let mut reply = prefix.to_vec();
                        reply.extend_from_slice(&buf[..n]);
                        if stream.write_all(&reply).await.is_err() {
                            break;
                        }
                    }
                });
            }
        });
        addr
    }

    fn target(addr: SocketAddr) -> SshTargetConfig {
        SshTargetConfig {
            host: addr.ip().to_string(),
            port: addr.port(),
        }
    }

    async fn closed_port() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    }

    #[tokio::test]
    async fn first_reachable_skips_dead_backends() {
        let dead = closed_port().await;
        let live = echo_backend(b"").await;
        let forwarder = Forwarder::new(
            vec![target(dead), target(live)],
            SshStrategy::FirstReachable,
            Some(Duration::from_secs(1)),
        );

        let (name, _stream) = forwarder.dial_first().await.unwrap();
        assert_eq!(name, format!("127.0.0.1:{}", live.port()));
    }

    #[tokio::test]
    async fn no_backend_reachable() {
        let dead = closed_port().await;
        let forwarder = Forwarder::new(vec![target(dead)], SshStrategy::FirstReachable, None);
        assert!(forwarder.dial_first().await.is_none());
        assert!(forwarder.dial_all().await.is_empty());
    }

    #[tokio::test]
    async fn fan_out_mirrors_input_to_every_backend() {
        let a = echo_backend(b"a:").await;
        let b = echo_backend(b"b:").await;
        let forwarder = Forwarder::new(vec![target(a), target(b)], SshStrategy::FanOut, None);
        let backends = forwarder.dial_all().await;
        assert_eq!(backends.len(), 2);

        let (client, mut peer) = tokio::io::duplex(1024);
        let task = tokio::spawn(fan_out(client, backends));

        peer.write_all(b"x").await.unwrap();
        let mut buf = [0u8; 6];
        peer.read_exact(&mut buf).await.unwrap();
        let mut replies = [&buf[..3], &buf[3..]];
        replies.sort();
        assert_eq!(replies, [&b"a:x"[..], &b"b:x"[..]]);

        drop(peer);
        task.await.unwrap().unwrap();
    }
}
