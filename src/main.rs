//! CLI for Topicast
//!
//! Subcommands:
//! - `server`: run the WebSocket broker
//! - `client`: run a simple smoke-test client against a running broker

use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{error, info};

use topicast::broker::Broker;
use topicast::config::load_config;
use topicast::transport::start_websocket_server;
use topicast::utils::logging;

#[derive(Parser)]
#[command(name = "topicast")]
enum Command {
    /// Start the WebSocket broker
    Server,
    /// Run the smoke-test client (subscribe, publish, ping)
    Client {
        /// WebSocket server URL to connect to
        #[arg(long, default_value = "ws://127.0.0.1:8080")]
        url: String,
        /// Topic used for the round trip
        #[arg(long, default_value = "chat")]
        topic: String,
    },
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cmd = Command::parse();

    match cmd {
        Command::Server => {
            if let Err(e) = run_server().await {
                logging::init("info");
                error!("Server failed: {e}");
            }
        }
        Command::Client { url, topic } => {
            logging::init("info");
            if let Err(e) = run_client(&url, &topic).await {
                error!("Client failed: {e}");
            }
        }
    }
}

async fn run_server() -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    logging::init(&config.logging.level);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let broker = Broker::new(&config.broker);

    tokio::select! {
        res = start_websocket_server(addr, broker.clone(), config.clone()) => {
            if let Err(e) = res {
                error!("WebSocket server exited: {e}");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Exiting gracefully.");
        }
    }

    let stats = broker.stats();
    info!(
        "Final stats: {} topic(s), {} subscriber(s), {} message(s), up {:.1}s",
        stats.summary.total_topics,
        stats.summary.total_subscribers,
        stats.summary.total_messages,
        stats.summary.uptime_sec
    );
    Ok(())
}

async fn run_client(url: &str, topic: &str) -> Result<(), Box<dyn std::error::Error>> {
    let (mut ws_stream, _response) = connect_async(url).await?;
    let client_id = format!("smoke-{}", uuid::Uuid::new_v4());

    let frames = [
        json!({
            "type": "subscribe",
            "topic": topic,
            "client_id": client_id,
            "last_n": 5,
            "request_id": "sub-1"
        }),
        json!({
            "type": "publish",
            "topic": topic,
            "message": { "id": "m1", "payload": "Hello from topicast" },
            "request_id": "pub-1"
        }),
        json!({ "type": "ping", "request_id": "ping-1" }),
    ];

    for frame in frames {
        ws_stream
            .send(WsMessage::Text(frame.to_string().into()))
            .await?;
    }

    // ack, event, ack, pong (plus any replayed history)
    let mut seen_pong = false;
    while !seen_pong {
        match ws_stream.next().await {
            Some(Ok(WsMessage::Text(incoming))) => {
                println!("{}", incoming.as_str());
                let v: serde_json::Value = serde_json::from_str(incoming.as_str())?;
                seen_pong = v["type"] == "pong";
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(e.into()),
            None => break,
        }
    }

    ws_stream.close(None).await?;
    Ok(())
}
