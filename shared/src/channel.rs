//! Unreliable, unordered data channel between one client and the server.
//!
//! A channel wraps one UDP socket pair. Datagrams may arrive out of order or
//! not at all; the channel performs zero retransmission, favoring recency
//! over completeness. Establishment runs through a [`Signaling`] exchange
//! followed by a probe/ack handshake, all bounded by a connect timeout.

use crate::codec::Codec;
use crate::signaling::Signaling;
use crate::{Message, NetError, CONNECT_TIMEOUT};
use log::{debug, warn};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

/// Handshake datagrams confirming the socket pair before traffic flows.
pub const PROBE: [u8; 2] = [0xb5, 0x01];
pub const PROBE_ACK: [u8; 2] = [0xb5, 0x02];
const PROBE_RETRY_INTERVAL: Duration = Duration::from_millis(200);

const RECV_BUFFER_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

pub struct Channel {
    socket: Arc<UdpSocket>,
    codec: Arc<Codec>,
    connected: Arc<AtomicBool>,
    incoming: Option<mpsc::UnboundedReceiver<Message>>,
    recv_task: Mutex<Option<JoinHandle<()>>>,
}

impl Channel {
    /// Opens a channel using the default connect timeout.
    pub async fn open<S: Signaling>(
        signaling: &S,
        role: Role,
        codec: Arc<Codec>,
    ) -> Result<Channel, NetError> {
        Self::open_with_timeout(signaling, role, codec, CONNECT_TIMEOUT).await
    }

    /// Opens a channel, failing with [`NetError::ConnectionTimeout`] if the
    /// signaling exchange plus handshake does not complete within `window`.
    pub async fn open_with_timeout<S: Signaling>(
        signaling: &S,
        role: Role,
        codec: Arc<Codec>,
        window: Duration,
    ) -> Result<Channel, NetError> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;

        let connect = async {
            let peer = signaling.exchange(&socket).await?;
            Self::handshake(&socket, peer, role).await?;
            Ok::<SocketAddr, NetError>(peer)
        };
        let peer = timeout(window, connect)
            .await
            .map_err(|_| NetError::ConnectionTimeout)??;

        socket.connect(peer).await?;
        let socket = Arc::new(socket);
        let connected = Arc::new(AtomicBool::new(true));

        let (tx, rx) = mpsc::unbounded_channel();
        let recv_task = tokio::spawn(Self::recv_loop(
            Arc::clone(&socket),
            Arc::clone(&codec),
            Arc::clone(&connected),
            tx,
        ));

        debug!("channel connected to {} as {:?}", peer, role);

        Ok(Channel {
            socket,
            codec,
            connected,
            incoming: Some(rx),
            recv_task: Mutex::new(Some(recv_task)),
        })
    }

    async fn handshake(socket: &UdpSocket, peer: SocketAddr, role: Role) -> Result<(), NetError> {
        let mut buf = [0u8; 16];

        match role {
            Role::Initiator => loop {
                socket.send_to(&PROBE, peer).await?;

                match timeout(PROBE_RETRY_INTERVAL, socket.recv_from(&mut buf)).await {
                    Ok(Ok((len, from))) if from == peer && buf[..len] == PROBE_ACK => {
                        return Ok(());
                    }
                    Ok(Err(e)) => return Err(e.into()),
                    _ => continue,
                }
            },
            Role::Responder => loop {
                let (len, from) = socket.recv_from(&mut buf).await?;
                if from == peer && buf[..len] == PROBE {
                    socket.send_to(&PROBE_ACK, peer).await?;
                    return Ok(());
                }
            },
        }
    }

    async fn recv_loop(
        socket: Arc<UdpSocket>,
        codec: Arc<Codec>,
        connected: Arc<AtomicBool>,
        tx: mpsc::UnboundedSender<Message>,
    ) {
        let mut buf = vec![0u8; RECV_BUFFER_SIZE];

        loop {
            let len = match socket.recv(&mut buf).await {
                Ok(len) => len,
                Err(e) => {
                    debug!("channel receive error: {}", e);
                    continue;
                }
            };

            // A lost ack leaves the initiator probing; keep answering.
            if buf[..len] == PROBE {
                let _ = socket.send(&PROBE_ACK).await;
                continue;
            }
            if buf[..len] == PROBE_ACK {
                continue;
            }

            match codec.decode(&buf[..len]).await {
                Ok(msg) => {
                    if tx.send(msg).is_err() {
                        break;
                    }
                }
                // Malformed datagrams are dropped, never fatal to the channel.
                Err(e) => warn!("dropping undecodable datagram: {}", e),
            }
        }

        connected.store(false, Ordering::SeqCst);
    }

    /// Sends a message, best effort. Silently drops the message when the
    /// channel is closed or the transport refuses it; callers must not
    /// assume delivery.
    pub async fn send(&self, msg: &Message) -> Result<(), NetError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Ok(());
        }

        let frame = self.codec.encode(msg).await?;
        if let Err(e) = self.socket.send(&frame).await {
            debug!("datagram dropped: {}", e);
        }
        Ok(())
    }

    /// Receives the next decoded message, or `None` once the channel closed.
    pub async fn recv(&mut self) -> Option<Message> {
        self.incoming.as_mut()?.recv().await
    }

    /// Detaches the incoming message stream, e.g. to pump it from a
    /// dedicated forwarder task. Subsequent `recv` calls return `None`.
    pub fn take_incoming(&mut self) -> Option<mpsc::UnboundedReceiver<Message>> {
        self.incoming.take()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn local_addr(&self) -> Result<SocketAddr, NetError> {
        Ok(self.socket.local_addr()?)
    }

    /// Stops sends and receives. Idempotent, callable from any state.
    pub fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        if let Some(task) = self.recv_task.lock().unwrap().take() {
            task.abort();
        }
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.close();
    }
}
