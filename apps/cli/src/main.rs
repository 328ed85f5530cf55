use std::{path::PathBuf, time::Duration};

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use client_core::{load_settings, ChatClient, ClientError, GroupOutcome, MessageSync, PhotoAttachment};
use shared::domain::{ConversationId, ConversationRecord, MessageId, UserId};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// How long edit and delete wait for the pushed event before giving up.
const SETTLE_TIMEOUT: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Parser, Debug)]
#[command(name = "chat", about = "Terminal client for the chat service")]
struct Args {
    /// Overrides the server from client.toml and the environment.
    #[arg(long)]
    server_url: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Log in and remember the session
    Login {
        #[arg(long)]
        username: String,
        #[arg(long)]
        password: String,
    },
    /// Forget the stored session
    Logout,
    /// List conversations, most recent first
    Conversations,
    /// Print a conversation and follow live updates until ctrl-c
    Watch { conversation_id: i64 },
    /// Replace the content of one of your messages
    Edit {
        conversation_id: i64,
        message_id: i64,
        content: String,
    },
    /// Delete a message
    Delete {
        conversation_id: i64,
        message_id: i64,
    },
    /// Create a group with at least two other members
    CreateGroup {
        /// User id of a member; repeat for each one
        #[arg(long = "member", required = true)]
        members: Vec<i64>,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        photo: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let args = Args::parse();

    let mut settings = load_settings();
    if let Some(server_url) = args.server_url {
        settings.server_url = server_url.trim_end_matches('/').to_string();
    }
    info!(server_url = %settings.server_url, "cli: starting");
    let client = ChatClient::from_settings(settings);

    match args.command {
        Command::Login { username, password } => {
            if let Some(session) = client.restore_session().await {
                println!(
                    "Already logged in as {}; run `chat logout` to switch users",
                    session.claims().username
                );
                return Ok(());
            }
            let session = client
                .login(&username, &password)
                .await
                .map_err(shown)?;
            println!(
                "Logged in as {} (user_id={})",
                session.claims().username,
                session.user_id()
            );
        }
        Command::Logout => {
            client.restore_session().await;
            client.logout().await?;
            println!("Logged out");
        }
        Command::Conversations => {
            require_session(&client).await?;
            let conversations = client.list_conversations().await.map_err(shown)?;
            for conversation in conversations.iter() {
                println!("{}", describe(conversation));
            }
        }
        Command::Watch { conversation_id } => {
            let conversation = find_conversation(&client, conversation_id).await?;
            let (sync, _subscription) = client
                .open_conversation(&conversation)
                .await
                .map_err(shown)?;
            watch(&sync).await?;
        }
        Command::Edit {
            conversation_id,
            message_id,
            content,
        } => {
            let conversation = find_conversation(&client, conversation_id).await?;
            let (sync, _subscription) = client
                .open_conversation(&conversation)
                .await
                .map_err(shown)?;
            let message_id = MessageId(message_id);
            sync.submit_edit(message_id, &content)
                .await
                .map_err(shown)?;
            let arrived = sync
                .wait_until(message_id, SETTLE_TIMEOUT, |held| {
                    held.is_some_and(|m| m.content == content)
                })
                .await;
            if !arrived {
                println!("Request accepted; the update has not arrived yet.");
            }
            match sync.message(message_id).await {
                Some(message) => println!("[{}] {}", message.id, message.content),
                None => println!("Message {message_id} is gone"),
            }
        }
        Command::Delete {
            conversation_id,
            message_id,
        } => {
            let conversation = find_conversation(&client, conversation_id).await?;
            let (sync, _subscription) = client
                .open_conversation(&conversation)
                .await
                .map_err(shown)?;
            let message_id = MessageId(message_id);
            sync.submit_delete(message_id).await.map_err(shown)?;
            if sync
                .wait_until(message_id, SETTLE_TIMEOUT, |held| held.is_none())
                .await
            {
                println!("Deleted message {message_id}");
            } else {
                println!("Request accepted; the deletion has not arrived yet.");
            }
        }
        Command::CreateGroup {
            members,
            name,
            photo,
        } => {
            require_session(&client).await?;
            let session = client
                .session()
                .await
                .ok_or_else(|| anyhow!("You need to log in first."))?;
            let mut conversations = client.list_conversations().await.map_err(shown)?;

            let mut flow = client.group_flow(conversations.contacts(session.user_id()));
            for member in members {
                if !flow.toggle_contact(UserId(member)) {
                    return Err(anyhow!("user {member} is not one of your contacts"));
                }
            }
            flow.next().map_err(shown)?;
            if let Some(name) = name {
                flow.set_name(name);
            }
            if let Some(path) = photo {
                flow.set_photo(Some(read_photo(&path).await?));
            }

            let outcome = client
                .create_group(flow, &mut conversations)
                .await
                .map_err(shown)?;
            match outcome {
                GroupOutcome::Existing(conversation) => {
                    println!("Group already exists: {}", describe(&conversation))
                }
                GroupOutcome::Created(conversation) => {
                    println!("Created {}", describe(&conversation))
                }
            }
        }
    }

    Ok(())
}

fn shown(err: ClientError) -> anyhow::Error {
    anyhow!(err.user_message())
}

async fn require_session(client: &ChatClient) -> Result<()> {
    client
        .restore_session()
        .await
        .map(|_| ())
        .ok_or_else(|| anyhow!("No active session. Run `chat login` first."))
}

async fn find_conversation(client: &ChatClient, id: i64) -> Result<ConversationRecord> {
    require_session(client).await?;
    let conversations = client.list_conversations().await.map_err(shown)?;
    conversations
        .get(ConversationId(id))
        .cloned()
        .ok_or_else(|| anyhow!("conversation {id} not found"))
}

fn describe(conversation: &ConversationRecord) -> String {
    let members = conversation
        .members
        .iter()
        .map(|m| m.username.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    let kind = if conversation.is_group() { "group" } else { "direct" };
    let name = if conversation.name.is_empty() {
        members.as_str()
    } else {
        conversation.name.as_str()
    };
    format!(
        "{:>6}  {kind:<6}  {name}  ({} messages; {members})",
        conversation.id.0,
        conversation.messages.len()
    )
}

async fn read_photo(path: &PathBuf) -> Result<PhotoAttachment> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read group photo {}", path.display()))?;
    let filename = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("photo")
        .to_string();
    let mime_type = match path.extension().and_then(|ext| ext.to_str()) {
        Some("png") => Some("image/png".to_string()),
        Some("jpg" | "jpeg") => Some("image/jpeg".to_string()),
        Some("gif") => Some("image/gif".to_string()),
        Some("webp") => Some("image/webp".to_string()),
        _ => None,
    };
    Ok(PhotoAttachment {
        filename,
        mime_type,
        bytes,
    })
}

async fn watch(sync: &MessageSync) -> Result<()> {
    let mut shown_messages = Vec::new();
    let mut shown_notice = None;
    let mut ticker = tokio::time::interval(POLL_INTERVAL);
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for ctrl-c")?;
                return Ok(());
            }
            _ = ticker.tick() => {
                let messages = sync.messages().await;
                if messages != shown_messages {
                    println!("--- conversation {} ---", sync.conversation_id());
                    for message in &messages {
                        let edited = if message.updated_at.is_some() { " (edited)" } else { "" };
                        println!(
                            "[{}] {} user {}: {}{edited}",
                            message.id,
                            message.created_at.format("%Y-%m-%d %H:%M"),
                            message.author_id,
                            message.content
                        );
                    }
                    shown_messages = messages;
                }
                let notice = sync.error_notice().await;
                if notice != shown_notice {
                    if let Some(text) = &notice {
                        eprintln!("! {text}");
                    }
                    shown_notice = notice;
                }
            }
        }
    }
}
