use std::{path::PathBuf, sync::Arc};

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use messaging_core::{
    load_settings, MessagingClient, Outcome, SessionSupplier, StaticSession, UploadFile,
};
use shared::{
    domain::{ConversationId, Message, MessageId, UserId},
    protocol::CreateConversationRequest,
};
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(about = "Inspect and drive the CRM messaging backend")]
struct Cli {
    /// Overrides `api_base` from messaging.toml / the environment.
    #[arg(long, env = "MESSAGING_API_BASE")]
    api_base: Option<String>,
    #[arg(long, env = "MESSAGING_USER_ID")]
    user_id: Option<String>,
    #[arg(long, env = "MESSAGING_TOKEN", hide_env_values = true)]
    token: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List conversations for the signed-in user.
    Conversations,
    /// Print a page of a conversation's thread.
    Open {
        conversation_id: String,
        #[arg(long)]
        before: Option<String>,
        #[arg(long)]
        limit: Option<u32>,
    },
    Send {
        conversation_id: String,
        #[arg(default_value = "")]
        text: String,
        #[arg(long = "attach")]
        attachments: Vec<PathBuf>,
    },
    Create {
        participants: Vec<String>,
        #[arg(long, conflicts_with = "participants")]
        project: Option<String>,
    },
    /// Mark every message in the loaded page that the user has not read.
    MarkRead { conversation_id: String },
    Edit { message_id: String, text: String },
    Delete { message_id: String },
    Upload { path: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let cli = Cli::parse();

    if let Err(err) = run(cli).await {
        error!("messaging_cli: {err:#}");
        return Err(err);
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let mut settings = load_settings();
    if let Some(api_base) = cli.api_base {
        settings.api_base = api_base;
    }
    let session = match (cli.user_id, cli.token) {
        (Some(user_id), Some(token)) => StaticSession::new(UserId::new(user_id), token),
        (None, None) => StaticSession::anonymous(),
        _ => return Err(anyhow!("--user-id and --token must be given together")),
    };
    let current_user = session.user_id();
    let client = MessagingClient::new(settings, Arc::new(session))?;

    match cli.command {
        Command::Conversations => {
            let Outcome::Applied(conversations) = client.load_conversations().await? else {
                return Err(anyhow!("not signed in: pass --user-id and --token"));
            };
            for conversation in conversations {
                let preview = conversation
                    .last_message
                    .as_ref()
                    .map(preview)
                    .unwrap_or_default();
                println!(
                    "{}\t{}\tunread={}\t{}",
                    conversation.id,
                    conversation.display_name(current_user.as_ref()),
                    conversation.unread_count,
                    preview
                );
            }
        }
        Command::Open {
            conversation_id,
            before,
            limit,
        } => {
            client
                .select_conversation(ConversationId::new(conversation_id))
                .await?;
            if before.is_some() || limit.is_some() {
                client.load_messages(before.as_deref(), limit).await?;
            }
            for message in client.selected_thread().await {
                print_message(&message);
            }
        }
        Command::Send {
            conversation_id,
            text,
            attachments,
        } => {
            client
                .select_conversation(ConversationId::new(conversation_id))
                .await?;
            let mut files = Vec::with_capacity(attachments.len());
            for path in &attachments {
                files.push(read_upload_file(path).await?);
            }
            match client.send_with_uploads(&text, &files).await? {
                Some(message) => print_message(&message),
                None => println!("nothing to send"),
            }
        }
        Command::Create {
            participants,
            project,
        } => {
            let request = match project {
                Some(project_id) => CreateConversationRequest::Project { project_id },
                None if participants.is_empty() => {
                    return Err(anyhow!("give participant ids or --project"));
                }
                None => CreateConversationRequest::with_participants(
                    participants.into_iter().map(UserId::new),
                ),
            };
            let conversation = client.create_conversation(request).await?;
            println!(
                "created {}\t{}",
                conversation.id,
                conversation.display_name(current_user.as_ref())
            );
        }
        Command::MarkRead { conversation_id } => {
            let user_id =
                current_user.ok_or_else(|| anyhow!("not signed in: pass --user-id and --token"))?;
            client
                .select_conversation(ConversationId::new(conversation_id))
                .await?;
            let unread: Vec<MessageId> = client
                .selected_thread()
                .await
                .into_iter()
                .filter(|message| message.is_visible() && !message.is_read_by(&user_id))
                .map(|message| message.id)
                .collect();
            if client.mark_read(&unread).await? {
                println!("marked {} message(s) read", unread.len());
            } else {
                println!("nothing to mark");
            }
        }
        Command::Edit { message_id, text } => {
            let message = client
                .edit_message(&MessageId::new(message_id), &text)
                .await?;
            print_message(&message);
        }
        Command::Delete { message_id } => {
            client.delete_message(&MessageId::new(message_id)).await?;
            println!("deleted");
        }
        Command::Upload { path } => {
            let attachment = client.upload(&read_upload_file(&path).await?).await?;
            println!("{}\t{}", attachment.url, attachment.name);
        }
    }

    Ok(())
}

async fn read_upload_file(path: &PathBuf) -> Result<UploadFile> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read '{}'", path.display()))?;
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| anyhow!("'{}' has no file name", path.display()))?;
    let mime_type = mime_guess::from_path(path)
        .first()
        .map(|mime| mime.essence_str().to_string());
    Ok(UploadFile::new(name, mime_type, bytes))
}

fn preview(message: &Message) -> String {
    if message.content.is_empty() && !message.attachments.is_empty() {
        format!("[{} attachment(s)]", message.attachments.len())
    } else {
        message.content.chars().take(60).collect()
    }
}

fn print_message(message: &Message) {
    if !message.is_visible() {
        println!("{}\t{}\t(deleted)", message.created_at.to_rfc3339(), message.id);
        return;
    }
    println!(
        "{}\t{}\t{}: {}",
        message.created_at.to_rfc3339(),
        message.id,
        message.sender.name,
        message.content
    );
    for attachment in &message.attachments {
        println!("\t  attachment: {} <{}>", attachment.name, attachment.url);
    }
}
