mod config;
mod input;

use std::{path::PathBuf, sync::Arc};

use anyhow::Result;
use clap::Parser;
use client_core::{
    AttachmentTracker, ChatEvent, ChatSession, ConnectionManager, HttpUploadGateway,
    WebSocketTransport,
};
use shared::domain::{ChatMessage, ChatRole, ConnectionTarget};
use storage::{ChatStore, Storage};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::broadcast::error::RecvError,
};
use tracing::error;
use tracing_subscriber::EnvFilter;

use config::load_settings;
use input::{parse_input, Input, HELP};

#[derive(Parser, Debug)]
#[command(about = "Terminal client for a chat assistant server")]
struct Args {
    /// TOML settings file; defaults to ./client.toml when present.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    server_url: Option<String>,
    #[arg(long)]
    token: Option<String>,
    #[arg(long)]
    database_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();

    let mut settings = load_settings(args.config.as_deref())?;
    if let Some(v) = args.server_url {
        settings.server_url = v;
    }
    if let Some(v) = args.token {
        settings.token = v;
    }
    if let Some(v) = args.database_url {
        settings.database_url = v;
    }

    let database_url = settings.database_url.clone();
    let storage = Storage::new(&database_url).await.map_err(|error| {
        error!(%database_url, %error, "failed to open SQLite database");
        error
    })?;
    let store: Arc<dyn ChatStore> = Arc::new(storage);

    let transport = Arc::new(WebSocketTransport::with_connect_timeout(
        settings.connect_timeout(),
    ));
    let connection = Arc::new(ConnectionManager::new(
        transport,
        settings.reconnect_policy(),
    ));
    let uploads = Arc::new(AttachmentTracker::new(
        Arc::new(HttpUploadGateway::new()),
        ConnectionTarget::default(),
    ));
    let target = settings.target();
    let explicit = target.is_configured().then_some(target);
    let session = ChatSession::open(connection, store, uploads, explicit).await?;

    if !session.target().await.is_configured() {
        println!("no server configured; use /server <url> [token]");
    }
    for message in session.history().await {
        print_message(&message);
    }

    let mut events = session.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(ChatEvent::Message(message)) if message.role == ChatRole::Assistant => {
                    print_message(&message);
                }
                Ok(ChatEvent::StateChanged(state)) => println!("[{state}]"),
                Ok(ChatEvent::Typing(true)) => println!("[assistant is typing]"),
                Ok(ChatEvent::Error(err)) => println!("⚠️ {err}"),
                Ok(_) => {}
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match parse_input(&line) {
            Input::Message(text) => {
                if session.send(&text).await.is_none() && !text.is_empty() {
                    println!("nothing to send");
                }
            }
            Input::Attach(path) => attach(&session, path).await,
            Input::Remove(index) => match session.uploads().remove(index).await {
                Some(removed) => println!("removed {}", removed.name),
                None => println!("no attachment #{}", index + 1),
            },
            Input::Attachments => {
                for (i, attachment) in session.attachments().await.iter().enumerate() {
                    let status = match (&attachment.error, attachment.uploading) {
                        (Some(err), _) => format!("failed: {err}"),
                        (None, true) => "uploading".to_string(),
                        (None, false) => "ready".to_string(),
                    };
                    println!("{}. {} ({status})", i + 1, attachment.name);
                }
            }
            Input::Server { url, token } => {
                session
                    .reconfigure(ConnectionTarget::new(url, token))
                    .await?;
            }
            Input::Clear => {
                session.clear_history().await?;
                println!("history cleared");
            }
            Input::Help => println!("{HELP}"),
            Input::Quit => break,
            Input::Invalid(reason) => println!("{reason}"),
        }
    }

    printer.abort();
    session.close().await;
    Ok(())
}

async fn attach(session: &ChatSession, path: String) {
    let name = PathBuf::from(&path)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("attachment.bin")
        .to_string();
    let mime_type = mime_guess::from_path(&path)
        .first_or_octet_stream()
        .essence_str()
        .to_string();

    let ticket = session.uploads().add(path, name.clone(), mime_type).await;
    let uploads = Arc::clone(session.uploads());
    tokio::spawn(async move {
        if ticket.task.await.is_err() {
            return;
        }
        let outcome = uploads
            .snapshot()
            .await
            .into_iter()
            .find(|attachment| attachment.id == ticket.id);
        match outcome {
            Some(attachment) if attachment.is_ready() => println!("{name} uploaded"),
            Some(attachment) => println!(
                "{name} failed: {}",
                attachment.error.unwrap_or_default()
            ),
            None => {}
        }
    });
}

fn print_message(message: &ChatMessage) {
    let who = match message.role {
        ChatRole::User => "you",
        ChatRole::Assistant => "bot",
    };
    println!("{who}> {}", message.content);
}
