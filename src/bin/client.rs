//! Interactive terminal client for the chat relay.
//!
//! Run with:
//! ```not_rust
//! cargo run --bin chat_client
//! cargo run --bin chat_client -- --host 127.0.0.1 --port 7070 --username alice
//! ```

use std::io::Write;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error};

use chat_relay::client::format_entry;
use chat_relay::logger::setup_logger;
use chat_relay::{AppError, ChatClient};

#[derive(Parser, Debug)]
#[command(name = "chat_client")]
#[command(about = "Terminal client for the chat relay", long_about = None)]
struct Args {
    /// Server host
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port
    #[arg(short = 'p', long, default_value_t = 7070)]
    port: u16,

    /// Username; prompted for when omitted
    #[arg(short = 'u', long)]
    username: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    setup_logger("warn");
    let args = Args::parse();

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    let username = match args.username {
        Some(name) => name,
        None => {
            print!("Enter user name: ");
            std::io::stdout().flush()?;
            stdin.next_line().await?.unwrap_or_default().trim().to_string()
        }
    };

    let mut client = ChatClient::connect((args.host.as_str(), args.port)).await?;
    if !client.login(&username).await? {
        println!("Login refused: this username is already taken");
        return Ok(());
    }
    println!("= <{}> =======\n", username);

    let (mut incoming, mut outgoing) = client.into_split();

    // Print everything the server sends until the connection ends
    let printer = tokio::spawn(async move {
        loop {
            match incoming.read_frame().await {
                Ok(message) => {
                    for entry in message.chat_entries().unwrap_or_default() {
                        println!("{}", format_entry(entry));
                    }
                }
                Err(AppError::ConnectionClosed) => {
                    println!("Disconnected from server");
                    break;
                }
                Err(e) => {
                    error!("Bad frame from server: {}", e);
                    break;
                }
            }
        }
    });

    while let Some(line) = stdin.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "/quit" {
            outgoing.logout().await?;
            break;
        }
        if let Err(e) = outgoing.send(line).await {
            debug!("Send failed: {}", e);
            break;
        }
    }

    printer.abort();
    Ok(())
}
