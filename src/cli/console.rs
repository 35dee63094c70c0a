//! Local console transport
//!
//! Information Hiding:
//! - stdin lines become inbound turns on an in-memory transport
//! - Each line replies to the bot's previous answer, so context is rebuilt
//!   from history exactly as it would be on a real chat surface
//! - Image attachments are written to an output directory

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{self, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;

use crate::config::Settings;
use crate::control;
use crate::orchestrator::Outcome;
use crate::transport::{BotIdentity, InMemoryTransport, TransportEvent, TurnId};
use crate::utils;
use crate::Bridge;

const CONSOLE_CHANNEL: u64 = 1;
const CONSOLE_BOT_ID: u64 = 1;
const CONSOLE_USER_ID: u64 = 2;
const CONSOLE_USER_NAME: &str = "console";

pub async fn run_console(
    settings: &Settings,
    destination: Option<String>,
    output_dir: &Path,
    shutdown: CancellationToken,
) -> Result<()> {
    let bot = BotIdentity {
        id: CONSOLE_BOT_ID,
        name: settings.bot.name.clone(),
    };
    let mention = bot.mention_tokens()[0].clone();
    let (transport, mut events) = InMemoryTransport::with_listener(bot);
    let transport = Arc::new(transport);
    let bridge = Bridge::start(settings, transport.clone(), shutdown.clone())?;

    if settings.control.enabled {
        let bind = settings.control.bind.clone();
        let client = bridge.text_client().clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = control::serve(&bind, client, shutdown).await {
                tracing::error!("[Control] Server failed: {}", e);
            }
        });
    }

    tokio::fs::create_dir_all(output_dir).await?;

    utils::print_header(&format!("Console chat with {}", settings.bot.name));
    utils::print_info("Type your messages (/new starts a fresh thread, Ctrl+C to exit)\n");

    let mut lines = BufReader::new(io::stdin()).lines();
    let mut last_reply: Option<TurnId> = None;

    loop {
        utils::print_prompt("You: ");
        let line = tokio::select! {
            _ = shutdown.cancelled() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else { break };
        let line = line.trim();

        match line {
            "" => continue,
            "/new" => {
                last_reply = None;
                utils::print_success("Started a new thread");
                continue;
            }
            "/help" => {
                println!("Special commands:");
                println!("  /new    - Start a new thread");
                println!("  /help   - Show this help");
                println!("  Ctrl+C  - Exit\n");
                continue;
            }
            _ => {}
        }

        // The first turn of a thread has to address the bot explicitly.
        let content = match last_reply {
            Some(_) => line.to_string(),
            None => format!("{} {}", mention, line),
        };
        let mut inbound = transport
            .receive(
                CONSOLE_CHANNEL,
                CONSOLE_USER_ID,
                CONSOLE_USER_NAME,
                &content,
                last_reply,
            )
            .await;
        if let Some(destination) = &destination {
            inbound.destination = destination.clone();
        }

        // Turns run inline so each reply is printed before the next prompt.
        match bridge.orchestrator().handle_turn(&inbound).await {
            Ok(Outcome::Ignored) | Ok(Outcome::Aborted) => {
                utils::print_info("(no reply)");
            }
            Ok(_) => {}
            Err(e) => utils::print_error(&format!("Error: {:#}", e)),
        }

        if let Some(id) = drain_events(&mut events, &settings.bot.name, output_dir).await? {
            last_reply = Some(id);
        }
        println!();
    }

    bridge.shutdown().await
}

/// Prints what the bot did and returns the id of its latest turn.
async fn drain_events(
    events: &mut UnboundedReceiver<TransportEvent>,
    bot_name: &str,
    output_dir: &Path,
) -> Result<Option<TurnId>> {
    let mut latest = None;
    while let Ok(event) = events.try_recv() {
        match event {
            TransportEvent::Reply { id, text, .. } => {
                utils::print_bot(bot_name, &text);
                latest = Some(id);
            }
            TransportEvent::Placeholder { id, text, .. } => {
                utils::print_pending(&text);
                latest = Some(id);
            }
            TransportEvent::Edit {
                text, attachment, ..
            } => {
                utils::print_bot(bot_name, &text);
                if let Some(attachment) = attachment {
                    let path = output_dir.join(&attachment.file_name);
                    tokio::fs::write(&path, &attachment.payload.bytes).await?;
                    utils::print_success(&format!("Saved {}", path.display()));
                }
            }
            TransportEvent::Typing(_) => {}
        }
    }
    Ok(latest)
}
