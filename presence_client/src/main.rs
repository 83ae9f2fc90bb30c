//! Standalone field client binary.
//!
//! Usage:
//!   cargo run -p presence_client -- [--config client.json] [--url ws://host/ws]
//!                                   [--width 800 --height 600]
//!
//! The client opens the field session, reports its position and keeps a
//! live world view, logging a summary of what is visible.
//!
//! Console commands:
//!   click <x> <y>    - Move toward a display-space point
//!   resize <w> <h>   - Change the field size
//!   status           - Show visible entity counts
//!   quit             - Exit client

use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use presence_client::{ClientCommand, FieldClient, WorldSnapshot};
use presence_shared::{
    config::ClientConfig,
    math::{FieldSize, Position},
};
use tokio::sync::{mpsc, watch};
use tracing::info;

/// How often the visible world summary is logged.
const SUMMARY_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
#[command(name = "field-client", about = "Shared presence field client", version)]
struct Args {
    /// JSON config file; every key is optional
    #[arg(long)]
    config: Option<PathBuf>,

    /// Field session endpoint, overrides the config
    #[arg(long, env = "FIELD_SERVER_URL")]
    url: Option<String>,

    /// Field width in display units
    #[arg(long, requires = "height")]
    width: Option<f64>,

    /// Field height in display units
    #[arg(long, requires = "width")]
    height: Option<f64>,
}

fn load_config(args: &Args) -> anyhow::Result<ClientConfig> {
    let mut cfg = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("read config {}", path.display()))?;
            ClientConfig::from_json_str(&text).context("parse config")?
        }
        None => ClientConfig::default(),
    };
    if let Some(url) = &args.url {
        cfg.server_url = url.clone();
    }
    if let (Some(width), Some(height)) = (args.width, args.height) {
        cfg.field_size = FieldSize::new(width, height);
    }
    Ok(cfg)
}

enum ConsoleLine {
    Command(ClientCommand),
    Status,
}

fn parse_line(line: &str) -> anyhow::Result<ConsoleLine> {
    let mut words = line.split_whitespace();
    let cmd = words.next().unwrap_or_default();
    let mut number = |what: &str| -> anyhow::Result<f64> {
        words
            .next()
            .with_context(|| format!("missing {what}"))?
            .parse()
            .with_context(|| format!("bad {what}"))
    };
    Ok(match cmd {
        "click" => {
            let x = number("x")?;
            let y = number("y")?;
            ConsoleLine::Command(ClientCommand::Click {
                display: Position::new(x, y),
            })
        }
        "resize" => {
            let width = number("width")?;
            let height = number("height")?;
            ConsoleLine::Command(ClientCommand::Resize(FieldSize::new(width, height)))
        }
        "status" => ConsoleLine::Status,
        "quit" | "exit" => ConsoleLine::Command(ClientCommand::Shutdown),
        other => bail!("unknown command: {other}"),
    })
}

fn status_lines(snap: &WorldSnapshot) -> Vec<String> {
    let position = snap
        .local_position
        .map(|p| format!("({:.0}, {:.0})", p.x, p.y))
        .unwrap_or_else(|| "unknown".to_string());
    vec![
        format!("position: {position}"),
        format!(
            "visible: {} messages, {} reactions, {} speaker phones, {} actors",
            snap.visible_messages().len(),
            snap.visible_reactions().len(),
            snap.visible_speaker_phones().len(),
            snap.visible_actors().len(),
        ),
        format!(
            "known: {} messages, {} reactions, {} speaker phones, {} actors",
            snap.messages.len(),
            snap.reactions.len(),
            snap.speaker_phones.len(),
            snap.actors.len(),
        ),
    ]
}

fn log_summary(snapshots: &watch::Receiver<WorldSnapshot>) {
    let snap = snapshots.borrow();
    info!(
        messages = snap.visible_messages().len(),
        reactions = snap.visible_reactions().len(),
        speaker_phones = snap.visible_speaker_phones().len(),
        actors = snap.visible_actors().len(),
        "Visible world"
    );
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let cfg = load_config(&args)?;
    info!(url = %cfg.server_url, width = cfg.field_size.width, height = cfg.field_size.height, "Starting field client");

    let mut client = FieldClient::new(cfg);
    client.connect().await.context("connect")?;
    let snapshots = client.subscribe_snapshots();

    let (cmd_tx, cmd_rx) = mpsc::channel::<ClientCommand>(32);
    let mut client_task = tokio::spawn(client.run(cmd_rx));

    // Set up console input channel.
    let (console_tx, mut console_rx) = mpsc::channel::<String>(32);

    // Spawn stdin reader thread.
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut stdout = std::io::stdout();
        loop {
            print!("] ");
            let _ = stdout.flush();
            let mut line = String::new();
            match stdin.lock().read_line(&mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            let line = line.trim().to_string();
            if !line.is_empty() && console_tx.blocking_send(line).is_err() {
                break;
            }
        }
    });

    println!("Client connected. Type 'status' for info, 'quit' to exit.");
    println!();

    let mut summary = tokio::time::interval(SUMMARY_INTERVAL);
    summary.tick().await;

    loop {
        tokio::select! {
            line = console_rx.recv() => {
                let Some(line) = line else {
                    // stdin closed; shut down cleanly.
                    let _ = cmd_tx.send(ClientCommand::Shutdown).await;
                    break;
                };
                match parse_line(&line) {
                    Ok(ConsoleLine::Status) => {
                        for line in status_lines(&snapshots.borrow()) {
                            println!("{line}");
                        }
                    }
                    Ok(ConsoleLine::Command(cmd)) => {
                        let quit = cmd == ClientCommand::Shutdown;
                        if cmd_tx.send(cmd).await.is_err() || quit {
                            break;
                        }
                    }
                    Err(e) => println!("Error: {e:#}"),
                }
            }
            _ = summary.tick() => log_summary(&snapshots),
            result = &mut client_task => {
                result.context("client task")??;
                return Ok(());
            }
        }
    }

    client_task.await.context("client task")??;
    info!("Field client exited");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_console_commands() {
        assert!(matches!(
            parse_line("click 10 20.5").unwrap(),
            ConsoleLine::Command(ClientCommand::Click { display }) if display == Position::new(10.0, 20.5)
        ));
        assert!(matches!(
            parse_line("resize 800 600").unwrap(),
            ConsoleLine::Command(ClientCommand::Resize(size)) if size == FieldSize::new(800.0, 600.0)
        ));
        assert!(matches!(parse_line("status").unwrap(), ConsoleLine::Status));
        assert!(matches!(
            parse_line("quit").unwrap(),
            ConsoleLine::Command(ClientCommand::Shutdown)
        ));
        assert!(parse_line("click 10").is_err());
        assert!(parse_line("dance").is_err());
    }

    #[test]
    fn cli_overrides_config() {
        let args = Args::parse_from([
            "field-client",
            "--url",
            "ws://example.test/ws",
            "--width",
            "640",
            "--height",
            "480",
        ]);
        let cfg = load_config(&args).unwrap();
        assert_eq!(cfg.server_url, "ws://example.test/ws");
        assert_eq!(cfg.field_size, FieldSize::new(640.0, 480.0));
    }
}
