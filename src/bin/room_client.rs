use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::io::AsyncBufReadExt;
use tracing::info;
use tracing_subscriber::EnvFilter;

use lessonmesh::media::LocalMedia;
use lessonmesh::room::{RoomSession, RoomState};
use lessonmesh::signaling::SignalingClient;

/// Headless lesson-room client: joins a room, prints events, and sends
/// stdin lines as chat messages.
#[derive(Parser, Debug)]
#[command(name = "lessonmesh-client", version, about)]
struct Args {
    /// Relay endpoint.
    #[arg(long, default_value = "ws://127.0.0.1:8080")]
    server: String,

    /// Room to join.
    #[arg(long)]
    room: String,

    /// Name shown to other participants.
    #[arg(long)]
    nickname: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let client = SignalingClient::connect(&args.server).await?;

    let media = Arc::new(LocalMedia::new());
    let state = Arc::new(RoomState::new());
    let mut session = RoomSession::new(client, media, state);
    session.join(&args.room, &args.nickname).await?;
    info!(room = %args.room, id = %session.local_id(), "joined, type a line to chat, ctrl-d to leave");

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    loop {
        tokio::select! {
            event = session.next_event() => match event {
                Some(event) => session.handle_event(event).await,
                None => {
                    info!("signaling connection closed");
                    break;
                }
            },
            line = lines.next_line() => match line? {
                Some(line) if !line.trim().is_empty() => session.send_chat(line.trim()).await,
                Some(_) => {}
                None => break,
            },
        }
    }

    session.leave().await;
    Ok(())
}
