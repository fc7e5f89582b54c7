//! Per-connection SSH handler.
//!
//! Authentication is not performed: the gateway forwards channels, the
//! backend authenticates. Only `session` channels are opened; every other
//! channel type and all global requests fall back to the library defaults,
//! which refuse them. Known types such as `direct-tcpip` are refused as
//! administratively prohibited, unrecognized ones as unknown channel type.

use std::net::SocketAddr;
use std::sync::Arc;

use russh::keys::PublicKey;
use russh::server::{Auth, Msg, Session};
use russh::{Channel, ChannelId, Pty};

use crate::net::TunnelTracker;
use crate::ssh::forward::Forwarder;

pub struct TunnelHandler {
    peer: SocketAddr,
    forwarder: Arc<Forwarder>,
    tracker: TunnelTracker,
}

impl TunnelHandler {
    pub fn new(peer: SocketAddr, forwarder: Arc<Forwarder>, tracker: TunnelTracker) -> Self {
        Self {
            peer,
            forwarder,
            tracker,
        }
    }
}

impl russh::server::Handler for TunnelHandler {
    type Error = russh::Error;

    async fn auth_none(&mut self, _user: &str) -> Result<Auth, Self::Error> {
        Ok(Auth::Accept)
    }

    async fn auth_password(&mut self, _user: &str, _password: &str) -> Result<Auth, Self::Error> {
        Ok(Auth::Accept)
    }

    async fn auth_publickey(&mut self, _user: &str, _public_key: &PublicKey) -> Result<Auth, Self::Error> {
        Ok(Auth::Accept)
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        session: &mut Session,
    ) -> Result<bool, Self::Error> {
        let forwarder = Arc::clone(&self.forwarder);
        let handle = session.handle();
        let peer = self.peer;
        let tracker = self.tracker.clone();

        tracing::debug!(peer = %peer, channel = ?channel.id(), "SSH session channel opened");
        tokio::spawn(async move {
            forwarder.forward(channel, handle, peer, tracker).await;
        });
        Ok(true)
    }

    #[allow(clippy::too_many_arguments)]
    async fn pty_request(
        &mut self,
        channel: ChannelId,
        _term: &str,
        _col_width: u32,
        _row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _modes: &[(Pty, u32)],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        session.channel_success(channel)?;
        Ok(())
    }

    async fn env_request(
        &mut self,
        channel: ChannelId,
        _variable_name: &str,
        _variable_value: &str,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        session.channel_success(channel)?;
        Ok(())
    }

    async fn shell_request(&mut self, channel: ChannelId, session: &mut Session) -> Result<(), Self::Error> {
        session.channel_success(channel)?;
        Ok(())
    }

    async fn exec_request(&mut self, channel: ChannelId, _data: &[u8], session: &mut Session) -> Result<(), Self::Error> {
        session.channel_success(channel)?;
        Ok(())
    }
}
