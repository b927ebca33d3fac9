use std::sync::Arc;

use anyhow::{Context, bail};
use chrono::Local;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use murmur_sync::transport::{self, TransportConfig};
use murmur_sync::{Gateway, HttpBackend, Room, SyncConfig, SyncSession, TimelineItem};
use murmur_types::Draft;
use murmur_types::events::{GatewayEvent, PresenceStatus};

/// One line of user input.
#[derive(Debug, PartialEq, Eq)]
enum Input {
    Say(String),
    Edit { id: String, content: String },
    Delete(String),
    React { id: String, emoji: String },
    Retry(String),
    Discard(String),
    Older,
    Show,
    Who,
    Help,
    Quit,
    Empty,
}

const HELP: &str = "\
plain text          send a message
/edit <id> <text>   edit one of your messages
/del <id>           delete one of your messages
/react <id> <emoji> toggle a reaction
/retry <temp_id>    resend a failed message
/discard <temp_id>  drop a failed message
/older              load the previous page
/show               print the room
/who                typists and watched peers
/quit";

fn parse(line: &str) -> Result<Input, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(Input::Empty);
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Input::Say(line.to_string()));
    };
    let (cmd, args) = rest.split_once(' ').unwrap_or((rest, ""));
    let args = args.trim();
    let one = |name: &str| -> Result<String, String> {
        if args.is_empty() || args.contains(' ') {
            Err(format!("usage: /{} <id>", name))
        } else {
            Ok(args.to_string())
        }
    };
    match cmd {
        "edit" => match args.split_once(' ') {
            Some((id, content)) if !content.trim().is_empty() => Ok(Input::Edit {
                id: id.to_string(),
                content: content.trim().to_string(),
            }),
            _ => Err("usage: /edit <id> <text>".into()),
        },
        "del" => one("del").map(Input::Delete),
        "react" => match args.split_once(' ') {
            Some((id, emoji)) if !emoji.trim().is_empty() => Ok(Input::React {
                id: id.to_string(),
                emoji: emoji.trim().to_string(),
            }),
            _ => Err("usage: /react <id> <emoji>".into()),
        },
        "retry" => one("retry").map(Input::Retry),
        "discard" => one("discard").map(Input::Discard),
        "older" => Ok(Input::Older),
        "show" => Ok(Input::Show),
        "who" => Ok(Input::Who),
        "help" => Ok(Input::Help),
        "quit" | "exit" => Ok(Input::Quit),
        other => Err(format!("unknown command /{} (try /help)", other)),
    }
}

fn required(key: &str) -> anyhow::Result<String> {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => bail!("{} must be set", key),
    }
}

fn print_room(room: &Room) {
    let view = room.layout(&Local);
    for item in &view.items {
        match item {
            TimelineItem::DateSeparator(day) => println!("---- {} ----", day),
            TimelineItem::Message {
                index,
                first_in_group,
            } => {
                let m = &view.messages[*index];
                let id = m.id.as_deref().or(m.temp_id.as_deref()).unwrap_or("?");
                let status = match m.delivery_status {
                    Some(murmur_types::DeliveryStatus::Pending) => " (sending)",
                    Some(murmur_types::DeliveryStatus::Failed) => " (failed)",
                    _ => "",
                };
                let edited = if m.edited { " (edited)" } else { "" };
                if *first_in_group {
                    println!(
                        "{} {}",
                        m.sender_id,
                        m.created_at.with_timezone(&Local).format("%H:%M")
                    );
                }
                println!("  [{}] {}{}{}", id, m.content, edited, status);
                let reactions: Vec<String> = m
                    .reactions
                    .visible()
                    .map(|g| format!("{} {}", g.emoji, g.count()))
                    .collect();
                if !reactions.is_empty() {
                    println!("      {}", reactions.join("  "));
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "murmur=debug".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    // Config
    let gateway_url = required("MURMUR_GATEWAY_URL")?;
    let api_url = required("MURMUR_API_URL")?;
    let token = required("MURMUR_TOKEN")?;
    let user_id = required("MURMUR_USER_ID")?;
    let display_name = std::env::var("MURMUR_DISPLAY_NAME").unwrap_or_else(|_| user_id.clone());
    let room_id = std::env::var("MURMUR_ROOM").unwrap_or_else(|_| "general".into());
    let watch: Vec<String> = std::env::var("MURMUR_WATCH")
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect();
    let config = SyncConfig::from_env().context("reading MURMUR_* tunables")?;

    // Session
    let (gateway, link) = Gateway::new(config.event_buffer);
    let backend = HttpBackend::new(&api_url, token.clone())?;
    let transport_config = TransportConfig {
        url: gateway_url,
        token,
        reconnect_delay: config.reconnect_delay,
    };
    let session = SyncSession::builder()
        .user_id(user_id)
        .display_name(display_name)
        .config(config)
        .gateway(gateway.clone())
        .backend(backend)
        .build()?;
    drop(gateway);

    let transport = tokio::spawn(async move {
        if let Err(e) = transport::run(link, transport_config).await {
            warn!("transport stopped: {}", e);
        }
    });

    let room = Arc::new(session.open_room(&room_id)?);
    let presence = if watch.is_empty() {
        None
    } else {
        Some(session.watch_presence(watch, PresenceStatus::Online)?)
    };
    if let Err(e) = room.load_older().await {
        warn!("initial history load failed: {}", e);
    }
    info!(room_id = %room_id, user_id = %session.user_id(), "ready");
    print_room(&room);

    // Failure notices
    let mut notices = session.subscribe_notices();
    tokio::spawn(async move {
        loop {
            match notices.recv().await {
                Ok(notice) => eprintln!("! {:?}", notice),
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    });

    // Live messages from others
    let mut events = session.gateway().subscribe();
    let me = session.user_id().to_string();
    let watched_room = room_id.clone();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(GatewayEvent::Message(m)) if m.room_id == watched_room && m.sender_id != me => {
                    println!("{}: {} [{}]", m.sender_id, m.content, m.id.unwrap_or_default());
                }
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let input = match parse(&line) {
            Ok(input) => input,
            Err(usage) => {
                eprintln!("{}", usage);
                continue;
            }
        };
        match input {
            Input::Empty => {}
            Input::Quit => break,
            Input::Help => println!("{}", HELP),
            Input::Show => print_room(&room),
            Input::Say(text) => {
                room.typing().trigger();
                let room = room.clone();
                tokio::spawn(async move {
                    if let Err(e) = room.send(Draft::text(text)).await {
                        eprintln!("! send: {}", e);
                    }
                });
            }
            Input::Edit { id, content } => {
                if let Err(e) = room.edit(&id, &content).await {
                    eprintln!("! edit: {}", e);
                }
            }
            Input::Delete(id) => {
                if let Err(e) = room.delete(&id).await {
                    eprintln!("! delete: {}", e);
                }
            }
            Input::React { id, emoji } => match room.toggle_reaction(&id, &emoji).await {
                Ok(true) => println!("reacted {} on {}", emoji, id),
                Ok(false) => println!("removed {} from {}", emoji, id),
                Err(e) => eprintln!("! react: {}", e),
            },
            Input::Retry(temp_id) => {
                if let Err(e) = room.retry(&temp_id).await {
                    eprintln!("! retry: {}", e);
                }
            }
            Input::Discard(temp_id) => {
                if let Err(e) = room.discard(&temp_id) {
                    eprintln!("! discard: {}", e);
                }
            }
            Input::Older => match room.load_older().await {
                Ok(added) => {
                    println!("loaded {} older messages", added);
                    print_room(&room);
                }
                Err(e) => eprintln!("! history: {}", e),
            },
            Input::Who => {
                let typists = room.typists();
                if !typists.is_empty() {
                    println!("typing: {}", typists.join(", "));
                }
                if let Some(watch) = &presence {
                    for record in watch.snapshot() {
                        let state = if record.online { "online" } else { "offline" };
                        println!("{} {}", record.user_id, state);
                    }
                }
            }
        }
    }

    info!("shutting down");
    room.close();
    if let Some(watch) = presence {
        watch.close();
    }
    drop(session);
    transport.abort();
    Ok(())
}
