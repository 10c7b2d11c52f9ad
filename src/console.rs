//! Administrative console
//!
//! Reads commands line by line (normally from stdin) and applies them to
//! the running listener.

use std::io::Write;
use std::str::FromStr;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{info, warn};

use crate::listener::Listener;

/// ANSI sequence: clear screen, cursor home
const CLEAR_SCREEN: &str = "\x1b[2J\x1b[H";

/// Console commands are a closed set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// Graceful shutdown
    Stop,
    /// Immediate shutdown
    Abort,
    /// Clear the terminal
    Clear,
}

impl FromStr for ConsoleCommand {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let cmd = input.split_whitespace().next().unwrap_or_default();
        match cmd {
            "stop" => Ok(ConsoleCommand::Stop),
            "abort" => Ok(ConsoleCommand::Abort),
            "clear" => Ok(ConsoleCommand::Clear),
            "" => Err("empty command".to_string()),
            other => Err(format!("unknown command: {other}")),
        }
    }
}

/// Process console input until `stop` or `abort`
///
/// Returns the command that ended the console, or None when the input
/// ran out first. A closed stdin (daemon, `< /dev/null`) leaves the relay
/// running.
pub async fn run_console<R>(listener: &Listener, input: R) -> Option<ConsoleCommand>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                info!("Console input closed; relay keeps running");
                return None;
            }
            Err(e) => {
                warn!("Console input unreadable, ignoring it from now on: {}", e);
                return None;
            }
        };

        match line.parse::<ConsoleCommand>() {
            Ok(ConsoleCommand::Stop) => {
                listener.stop().await;
                return Some(ConsoleCommand::Stop);
            }
            Ok(ConsoleCommand::Abort) => {
                listener.abort();
                return Some(ConsoleCommand::Abort);
            }
            Ok(ConsoleCommand::Clear) => {
                let mut stdout = std::io::stdout();
                let _ = stdout.write_all(CLEAR_SCREEN.as_bytes());
                let _ = stdout.flush();
            }
            Err(_) if line.trim().is_empty() => {}
            Err(e) => warn!("Console: {}", e),
        }
    }
}
