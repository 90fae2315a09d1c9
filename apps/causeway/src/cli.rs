use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;

use causeway_signal::Envelope;

#[derive(Parser)]
#[command(name = "causeway", about = "WebSocket call broker", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Connect to a running broker and exercise the wire protocol
    Probe {
        /// Broker base URL
        #[arg(long, default_value = "ws://localhost:8080")]
        url: String,

        #[command(subcommand)]
        command: ProbeCommands,
    },
}

#[derive(Subcommand)]
pub enum ProbeCommands {
    /// Register an id and report the broker's verdict
    Register { id: String },
    /// Request a call to a registered id
    Call {
        target: String,
        #[arg(long)]
        caller_name: Option<String>,
    },
}

pub async fn run_probe(url: &str, command: ProbeCommands) -> Result<()> {
    let ws_url = format!("{url}/ws");
    let (mut socket, _) = tokio::time::timeout(
        Duration::from_secs(5),
        tokio_tungstenite::connect_async(&ws_url),
    )
    .await
    .context("timed out connecting to broker")?
    .with_context(|| format!("failed to connect to {ws_url}"))?;

    let envelope = match command {
        ProbeCommands::Register { id } => Envelope::RegisterResponder { id },
        ProbeCommands::Call {
            target,
            caller_name,
        } => Envelope::CallRequest {
            target_id: target,
            session_id: None,
            caller_name,
        },
    };
    let json = serde_json::to_string(&envelope)?;
    socket.send(Message::Text(json.into())).await?;

    let reply = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(message) = socket.next().await {
            if let Message::Text(text) = message? {
                return Ok(serde_json::from_str::<Envelope>(&text)?);
            }
        }
        anyhow::bail!("broker closed the connection without replying")
    })
    .await
    .context("timed out waiting for broker reply")??;

    match reply {
        Envelope::RegisterAck { id, status } => {
            println!("registration of {id}: {status:?}");
        }
        Envelope::CallWaiting => println!("call request accepted, responder notified"),
        Envelope::Error { message } => println!("broker error: {message}"),
        other => println!("unexpected reply: {other:?}"),
    }

    socket.close(None).await.ok();
    Ok(())
}
