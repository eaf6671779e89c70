//! Smoke test against a running canvas gateway: both channel paths accept a
//! WebSocket handshake and any other path is cut off without a reply.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use futures_util::SinkExt;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};

use lib_canvas::core::{API_CHANNEL_PATH, USER_CHANNEL_PATH};

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Base WebSocket URL of the server
    #[clap(short, long, default_value = "ws://127.0.0.1:8080")]
    base_url: String,

    /// Seconds to wait for each handshake
    #[clap(short, long, default_value_t = 5)]
    timeout_secs: u64,
}

async fn expect_accepted(base: &str, path: &str, limit: Duration) -> Result<()> {
    let url = format!("{base}{path}");
    let (mut socket, response) = timeout(limit, connect_async(url.as_str()))
        .await
        .with_context(|| format!("{url}: handshake timed out"))?
        .with_context(|| format!("{url}: handshake failed"))?;
    println!("{url}: accepted with {}", response.status());
    socket.send(Message::Close(None)).await.ok();
    Ok(())
}

async fn expect_terminated(base: &str, path: &str, limit: Duration) -> Result<()> {
    let url = format!("{base}{path}");
    match timeout(limit, connect_async(url.as_str())).await {
        Ok(Ok(_)) => bail!("{url}: unexpectedly accepted"),
        Ok(Err(e)) => {
            println!("{url}: terminated ({e})");
            Ok(())
        }
        Err(_) => bail!("{url}: connection left hanging"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let base = args.base_url.trim_end_matches('/');
    let limit = Duration::from_secs(args.timeout_secs);

    expect_accepted(base, USER_CHANNEL_PATH, limit).await?;
    expect_accepted(base, &format!("{API_CHANNEL_PATH}?client=smoke"), limit).await?;
    expect_terminated(base, "/nope", limit).await?;
    expect_terminated(base, &format!("{USER_CHANNEL_PATH}/extra"), limit).await?;

    println!("all upgrade paths behave");
    Ok(())
}
