//! Chat Relay Server - Entry Point
//!
//! Loads the chat log, starts the listener and hands stdin to the admin
//! console (`stop`, `abort`, `clear`). Ctrl+C is a graceful stop.
//!
//! Run with:
//! ```not_rust
//! cargo run --bin chat_relay
//! cargo run --bin chat_relay -- --host 0.0.0.0 --port 7070 --storage storage.json
//! ```

use clap::Parser;
use tokio::io::BufReader;
use tracing::{info, warn};

use chat_relay::console::run_console;
use chat_relay::logger::setup_logger;
use chat_relay::{JsonFileLog, Listener, ServerConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = ServerConfig::parse();
    setup_logger(&config.log_level);

    // A log that cannot be loaded is fatal
    let log = JsonFileLog::load(&config.storage)?;

    let listener = Listener::start(&config, Box::new(log)).await?;
    info!("Type 'stop', 'abort' or 'clear' to manage the server");

    let stdin = BufReader::new(tokio::io::stdin());
    tokio::select! {
        ended_by = run_console(&listener, stdin) => match ended_by {
            Some(command) => info!("Console command {:?} ended the server", command),
            None => {
                // Without a console only Ctrl+C ends the server
                wait_for_ctrl_c().await;
                listener.stop().await;
            }
        },
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C");
            listener.stop().await;
        }
    }

    Ok(())
}

async fn wait_for_ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C"),
        Err(e) => warn!("Cannot listen for Ctrl+C: {}", e),
    }
}
