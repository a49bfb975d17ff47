use anyhow::Result;
use std::io::{self, Write};
use std::path::Path;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::bot::{ChatRelay, IncomingMessage};
use crate::core::error::BotError;
use crate::core::message::ContentPart;
use crate::core::session::UserId;
use crate::core::ui::ChatId;

/// Who is typing at this terminal.
#[derive(Debug, Clone)]
pub struct Speaker {
    pub user_id: UserId,
    pub name: String,
    pub chat: ChatId,
}

pub async fn run(relay: &ChatRelay, speaker: &Speaker, model: &str) -> Result<()> {
    println!("\x1b[1mocto-chat\x1b[0m v{}", env!("CARGO_PKG_VERSION"));
    println!("Model: \x1b[36m{model}\x1b[0m");
    println!("Type \x1b[33m/help\x1b[0m for commands, \x1b[33mCtrl-C\x1b[0m cancels a reply, \x1b[33mCtrl-D\x1b[0m exits.\n");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        eprint!("\n\x1b[32;1mchat>\x1b[0m ");
        io::stderr().flush().ok();

        // Once a reply has been cancelled with Ctrl-C the default SIGINT
        // handling is gone, so the prompt listens for it too.
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            println!("\nGoodbye!");
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        let (text, images) = if input.starts_with('/') {
            match handle_command(input, relay, speaker).await {
                Ok(Command::Handled) => continue,
                Ok(Command::Quit) => break,
                Ok(Command::Send { text, images }) => (text, images),
                Err(e) => {
                    eprintln!("\x1b[31m{e}\x1b[0m");
                    continue;
                }
            }
        } else {
            (input.to_string(), Vec::new())
        };

        send(relay, speaker, text, images).await;
    }

    Ok(())
}

/// Runs one turn, cancelling the reply on Ctrl-C.
pub async fn send(relay: &ChatRelay, speaker: &Speaker, text: String, images: Vec<ContentPart>) {
    let turn = relay.handle_message(IncomingMessage {
        user_id: speaker.user_id,
        display_name: speaker.name.clone(),
        chat: speaker.chat,
        text,
        images,
    });
    tokio::pin!(turn);

    let result = loop {
        tokio::select! {
            result = &mut turn => break result,
            _ = tokio::signal::ctrl_c() => {
                relay.cancel(speaker.user_id);
            }
        }
    };

    match result {
        Ok(outcome) => {
            if let Some(cost) = outcome.cost {
                eprintln!("\n\x1b[90m[cost ${cost:.5}]\x1b[0m");
            } else {
                println!();
            }
        }
        Err(BotError::Cancelled) => eprintln!(),
        Err(e) => eprintln!("\n\x1b[31m{e}\x1b[0m"),
    }
}

enum Command {
    Handled,
    Quit,
    Send {
        text: String,
        images: Vec<ContentPart>,
    },
}

async fn handle_command(input: &str, relay: &ChatRelay, speaker: &Speaker) -> Result<Command> {
    let (name, rest) = input.split_once(' ').unwrap_or((input, ""));
    match name {
        "/quit" | "/exit" => Ok(Command::Quit),
        "/help" => {
            println!("  /reset              forget the conversation");
            println!("  /usage              show spending");
            println!("  /image <path> [msg] send an image with an optional message");
            println!("  /quit               exit (also Ctrl-C or Ctrl-D at the prompt)");
            println!("  Ctrl-C during a reply cancels it");
            Ok(Command::Handled)
        }
        "/reset" => {
            relay.sessions().get_or_create(speaker.user_id, &speaker.name);
            relay.sessions().clear_history(speaker.user_id)?;
            println!("Conversation cleared.");
            Ok(Command::Handled)
        }
        "/usage" => {
            match relay.sessions().usage(speaker.user_id) {
                Some(usage) => {
                    println!("  today:      ${:.5}", usage.day);
                    println!("  this month: ${:.5}", usage.month);
                    println!("  all time:   ${:.5}", usage.all_time);
                }
                None => println!("No usage yet."),
            }
            Ok(Command::Handled)
        }
        "/image" => {
            let (path, caption) = rest.trim().split_once(' ').unwrap_or((rest.trim(), ""));
            if path.is_empty() {
                println!("Usage: /image <path> [message]");
                return Ok(Command::Handled);
            }
            let data = tokio::fs::read(path).await?;
            Ok(Command::Send {
                text: caption.trim().to_string(),
                images: vec![ContentPart::image(media_type_for(Path::new(path)), data)],
            })
        }
        other => {
            println!("Unknown command: {other}. Type /help.");
            Ok(Command::Handled)
        }
    }
}

fn media_type_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "image/jpeg",
    }
}
