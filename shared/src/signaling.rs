//! Out-of-band signaling used to establish a data channel.
//!
//! Session establishment proper is an external concern; the channel only
//! needs one thing from it: the peer's endpoint for its freshly bound
//! socket. [`Signaling::exchange`] is that seam. The two implementations
//! here speak a tiny join-request/join-ack datagram protocol over the
//! server's public socket.

use crate::NetError;
use log::debug;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::timeout;

const JOIN_RETRY_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum SignalMessage {
    Join,
    JoinAck { player_id: u32, channel_port: u16 },
}

/// Exchanges the local channel socket for the remote peer's address.
pub trait Signaling: Send + Sync {
    fn exchange(
        &self,
        socket: &UdpSocket,
    ) -> impl Future<Output = Result<SocketAddr, NetError>> + Send;
}

/// Initiator-side signaling: sends join requests to the server's public
/// address from the channel socket (so the server learns our endpoint) and
/// waits for the ack naming our player id and the per-client channel port.
pub struct JoinRequest {
    server: SocketAddr,
    accepted: Mutex<Option<u32>>,
}

impl JoinRequest {
    pub fn new(server: SocketAddr) -> Self {
        Self {
            server,
            accepted: Mutex::new(None),
        }
    }

    /// Player id assigned by the server, available once `exchange` resolved.
    pub fn player_id(&self) -> Option<u32> {
        *self.accepted.lock().unwrap()
    }
}

impl Signaling for JoinRequest {
    async fn exchange(&self, socket: &UdpSocket) -> Result<SocketAddr, NetError> {
        let request = bincode::serialize(&SignalMessage::Join)
            .map_err(|e| NetError::MalformedMessage(e.to_string()))?;
        let mut buf = [0u8; 64];

        loop {
            socket.send_to(&request, self.server).await?;

            // Unanswered joins are retried until the channel-open timeout
            // cancels the whole exchange.
            let received = timeout(JOIN_RETRY_INTERVAL, socket.recv_from(&mut buf)).await;
            let (len, from) = match received {
                Ok(Ok(recv)) => recv,
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => continue,
            };

            if from != self.server {
                continue;
            }

            match bincode::deserialize(&buf[..len]) {
                Ok(SignalMessage::JoinAck {
                    player_id,
                    channel_port,
                }) => {
                    *self.accepted.lock().unwrap() = Some(player_id);
                    return Ok(SocketAddr::new(self.server.ip(), channel_port));
                }
                _ => debug!("ignoring unexpected signaling datagram from {}", from),
            }
        }
    }
}

/// Responder-side signaling: the join request already told us the client's
/// endpoint, so the exchange just acks with the allocated channel port.
pub struct JoinReply {
    main_socket: Arc<UdpSocket>,
    client_addr: SocketAddr,
    player_id: u32,
}

impl JoinReply {
    pub fn new(main_socket: Arc<UdpSocket>, client_addr: SocketAddr, player_id: u32) -> Self {
        Self {
            main_socket,
            client_addr,
            player_id,
        }
    }
}

impl Signaling for JoinReply {
    async fn exchange(&self, socket: &UdpSocket) -> Result<SocketAddr, NetError> {
        let channel_port = socket.local_addr()?.port();
        let ack = bincode::serialize(&SignalMessage::JoinAck {
            player_id: self.player_id,
            channel_port,
        })
        .map_err(|e| NetError::MalformedMessage(e.to_string()))?;

        self.main_socket.send_to(&ack, self.client_addr).await?;
        Ok(self.client_addr)
    }
}
