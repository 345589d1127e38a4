//! Integration tests exercising the full client/server netcode over real
//! UDP sockets on loopback.

use client::input::{InputFrame, InputSource};
use client::network::{Client, GameEvent};
use server::network::Server;
use shared::channel::{Channel, Role, PROBE, PROBE_ACK};
use shared::codec::Codec;
use shared::map::MapGeometry;
use shared::signaling::{JoinRequest, SignalMessage};
use std::net::SocketAddr;
use shared::{InputActions, InputPacket, Message, Snapshot, Team, Vec2};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::timeout;

async fn spawn_server(duration: Duration) -> std::net::SocketAddr {
    let server = Server::bind("127.0.0.1:0", MapGeometry::default_arena())
        .await
        .unwrap()
        .with_game_duration(duration);
    let addr = server.local_addr().unwrap();
    tokio::spawn(server.run());
    addr
}

/// Joins over raw signaling and returns the channel plus assigned player id.
async fn join_raw(server: std::net::SocketAddr) -> (Channel, u32) {
    let request = JoinRequest::new(server);
    let channel = Channel::open(
        &request,
        Role::Initiator,
        Arc::new(Codec::with_static_schema()),
    )
    .await
    .unwrap();
    let player_id = request.player_id().unwrap();
    (channel, player_id)
}

/// Joins by hand from an existing socket, so tests can control which
/// endpoint the server sees. Completes the channel handshake and returns
/// the assigned player id; the socket is left connected to nothing, so the
/// session goes silent afterwards.
async fn join_from_endpoint(endpoint: &UdpSocket, server: SocketAddr) -> u32 {
    let join = bincode::serialize(&SignalMessage::Join).unwrap();
    let mut buf = [0u8; 64];

    let (player_id, channel_port) = loop {
        endpoint.send_to(&join, server).await.unwrap();
        match timeout(Duration::from_millis(500), endpoint.recv_from(&mut buf)).await {
            Ok(Ok((len, from))) if from == server => {
                if let Ok(SignalMessage::JoinAck {
                    player_id,
                    channel_port,
                }) = bincode::deserialize(&buf[..len])
                {
                    break (player_id, channel_port);
                }
            }
            _ => continue,
        }
    };

    let channel_addr = SocketAddr::new(server.ip(), channel_port);
    loop {
        endpoint.send_to(&PROBE, channel_addr).await.unwrap();
        match timeout(Duration::from_millis(200), endpoint.recv_from(&mut buf)).await {
            Ok(Ok((len, from))) if from == channel_addr && buf[..len] == PROBE_ACK => break,
            _ => continue,
        }
    }

    player_id
}

async fn next_snapshot(channel: &mut Channel) -> Snapshot {
    loop {
        match timeout(Duration::from_secs(5), channel.recv())
            .await
            .expect("timed out waiting for a snapshot")
            .expect("channel closed")
        {
            Message::Snapshot(snapshot) => return snapshot,
            _ => continue,
        }
    }
}

/// PROTOCOL TESTS

#[tokio::test]
async fn snapshot_acks_latest_input_packet() {
    let server = spawn_server(Duration::from_secs(60)).await;
    let (mut channel, player_id) = join_raw(server).await;

    channel
        .send(&Message::Input(InputPacket {
            packet_id: 17,
            velocity: Vec2::new(0.0, 1.0),
            actions: InputActions::default(),
        }))
        .await
        .unwrap();

    // Inputs are folded in between broadcasts; wait until one reflects it.
    let snapshot = loop {
        let snapshot = next_snapshot(&mut channel).await;
        if snapshot.last_acked_packet_id == 17 {
            break snapshot;
        }
    };

    let me = snapshot.world.player(player_id).expect("present in snapshot");
    assert!(me.vel.y > 0.0);
}

#[tokio::test]
async fn garbage_on_the_public_socket_is_ignored() {
    let server = spawn_server(Duration::from_secs(60)).await;

    let rogue = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    rogue.send_to(&[0xde, 0xad, 0xbe, 0xef], server).await.unwrap();
    rogue.send_to(&[], server).await.unwrap();

    // The server must still accept a legitimate join afterwards.
    let (mut channel, player_id) = join_raw(server).await;
    let snapshot = next_snapshot(&mut channel).await;
    assert!(snapshot.world.player(player_id).is_some());
}

#[tokio::test]
async fn rejoining_endpoint_replaces_its_player() {
    let server = spawn_server(Duration::from_secs(60)).await;
    let (mut observer, _observer_id) = join_raw(server).await;

    // The same socket joins twice, as a restarted client would.
    let endpoint = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let first_id = join_from_endpoint(&endpoint, server).await;
    let second_id = join_from_endpoint(&endpoint, server).await;
    assert_ne!(first_id, second_id);

    let snapshot = loop {
        let snapshot = next_snapshot(&mut observer).await;
        if snapshot.world.player(second_id).is_some() {
            break snapshot;
        }
    };

    // The old incarnation is gone: observer plus the rejoined client.
    assert!(snapshot.world.player(first_id).is_none());
    assert_eq!(snapshot.world.players.len(), 2);
}

/// GAME LOGIC TESTS

#[tokio::test]
async fn two_clients_land_on_different_teams() {
    let server = spawn_server(Duration::from_secs(60)).await;

    let (mut first, first_id) = join_raw(server).await;
    let (_second, second_id) = join_raw(server).await;
    assert_ne!(first_id, second_id);

    let snapshot = loop {
        let snapshot = next_snapshot(&mut first).await;
        if snapshot.world.players.len() == 2 {
            break snapshot;
        }
    };

    let teams: HashSet<Team> = snapshot.world.players.iter().map(|p| p.team).collect();
    assert_eq!(teams.len(), 2);
}

#[tokio::test]
async fn bomb_press_produces_a_splash() {
    let server = spawn_server(Duration::from_secs(60)).await;
    let (mut channel, _player_id) = join_raw(server).await;

    channel
        .send(&Message::Input(InputPacket {
            packet_id: 0,
            velocity: Vec2::ZERO,
            actions: InputActions { place_bomb: true },
        }))
        .await
        .unwrap();

    // The bomb shows up armed first.
    let snapshot = loop {
        let snapshot = next_snapshot(&mut channel).await;
        if !snapshot.world.bombs.is_empty() {
            break snapshot;
        }
    };
    assert_eq!(snapshot.world.splashes.len(), 0);

    // After the fuse it becomes exactly one splash and scores territory.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(6);
    let snapshot = loop {
        assert!(tokio::time::Instant::now() < deadline, "fuse never fired");
        let snapshot = next_snapshot(&mut channel).await;
        if !snapshot.world.splashes.is_empty() {
            break snapshot;
        }
    };
    assert_eq!(snapshot.world.splashes.len(), 1);
    assert!(snapshot.world.bombs.is_empty());
    let team = snapshot.world.splashes[0].team;
    assert!(snapshot.world.scores[&team] > 0);
}

/// FULL SESSION TESTS

struct HoldRight;

impl InputSource for HoldRight {
    fn sample(&mut self) -> InputFrame {
        InputFrame {
            velocity: Vec2::new(1.0, 0.0),
            actions: InputActions::default(),
        }
    }
}

#[tokio::test]
async fn client_session_runs_to_game_end() {
    let server = spawn_server(Duration::from_secs(2)).await;

    let map = MapGeometry::default_arena();
    let client = Client::join(server, &map).await.unwrap();
    let player_id = client.player_id();

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let session = tokio::spawn(client.run(HoldRight, events_tx));

    let mut updates = 0u32;
    let mut scores = None;
    while let Ok(Some(event)) = timeout(Duration::from_secs(10), events_rx.recv()).await {
        match event {
            GameEvent::Update(state) => {
                assert!(state.player(player_id).is_some());
                updates += 1;
            }
            GameEvent::End(final_scores) => {
                scores = Some(final_scores);
                break;
            }
        }
    }

    assert!(updates > 10, "expected a stream of predicted frames");
    let scores = scores.expect("game should end");
    assert_eq!(scores.len(), Team::ALL.len());

    session.await.unwrap().unwrap();
}
