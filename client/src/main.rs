use clap::Parser;
use client::input::WanderInput;
use client::network::{Client, GameEvent};
use log::info;
use shared::map::MapGeometry;
use shared::NetError;
use std::net::SocketAddr;
use tokio::sync::mpsc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: SocketAddr,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    info!("Connecting to {}", args.server);

    let map = MapGeometry::default_arena();
    let client = match Client::join(args.server, &map).await {
        Ok(client) => client,
        Err(NetError::ConnectionTimeout) => {
            eprintln!("No answer from {} within the connect window", args.server);
            std::process::exit(1);
        }
        Err(e) => return Err(e.into()),
    };

    info!("Joined as player {}", client.player_id());

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let session = tokio::spawn(client.run(WanderInput::new(), events_tx));

    // Headless presentation: log a heartbeat and the final standings.
    let mut frames: u64 = 0;
    while let Some(event) = events_rx.recv().await {
        match event {
            GameEvent::Update(state) => {
                frames += 1;
                if frames % 300 == 0 {
                    info!(
                        "{} players, {} bombs, {} ms left",
                        state.players.len(),
                        state.bombs.len(),
                        state.remaining_time_ms
                    );
                }
            }
            GameEvent::End(scores) => {
                let mut standings: Vec<_> = scores.iter().collect();
                standings.sort_by(|a, b| b.1.cmp(a.1));
                for (team, score) in standings {
                    info!("{}: {}", team.name(), score);
                }
                break;
            }
        }
    }

    session.await??;
    Ok(())
}
