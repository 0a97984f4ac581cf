mod chat;
mod commands;
mod config;
mod error;
mod gateway;

use std::sync::Arc;

use avira_core::{ChatSession, MemoryGateway};
use avira_http::{AssistantClient, ChatsClient};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::config::{Overrides, Settings};
use crate::gateway::AnyGateway;

#[derive(Parser)]
#[command(name = "avira")]
#[command(about = "Chat with the avira assistant", long_about = None)]
struct Cli {
    /// Base URL of the assistant service
    #[arg(long, global = true)]
    backend_url: Option<String>,

    /// Base URL of the chats API
    #[arg(long, global = true)]
    store_url: Option<String>,

    /// Keep conversations in memory instead of the chats API
    #[arg(long, global = true)]
    offline: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start an interactive chat session
    Chat,

    /// Send one message and print the reply
    Send {
        /// Message text
        #[arg(required = true, trailing_var_arg = true)]
        text: Vec<String>,

        /// Continue an existing conversation (chat id)
        #[arg(long)]
        conversation: Option<String>,
    },

    /// List conversations in the chats API
    List,

    /// Check that the assistant service is up
    Health,
}

fn init_tracing(log_level: &str) {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => match log_level.parse::<EnvFilter>() {
            Ok(f) => f,
            Err(e) => {
                eprintln!(
                    "WARN: log_level '{}' is not a valid tracing filter ({}); falling back to 'warn'",
                    log_level, e
                );
                EnvFilter::new("warn")
            }
        },
    };

    // stdout carries the conversation.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let settings = Settings::resolve(Overrides {
        backend_url: cli.backend_url,
        store_url: cli.store_url,
    });
    init_tracing(&settings.log_level);

    let identity = settings.identity(cli.offline);
    let assistant = AssistantClient::with_base_url(&settings.backend_url);
    let gateway = if cli.offline {
        let memory = if identity.is_authenticated() {
            MemoryGateway::new()
        } else {
            MemoryGateway::anonymous()
        };
        AnyGateway::Offline(memory)
    } else {
        let client = ChatsClient::new(&settings.store_url);
        match &settings.session_token {
            Some(token) => AnyGateway::Remote(client.with_session_token(token)),
            None => AnyGateway::Remote(client),
        }
    };
    tracing::debug!(
        backend_url = %settings.backend_url,
        offline = gateway.is_offline(),
        signed_in = identity.is_authenticated(),
        "starting"
    );

    match cli.command {
        Command::Chat => {
            let session = Arc::new(ChatSession::new(assistant, gateway, identity));
            chat::run(session).await?;
        }
        Command::Send { text, conversation } => {
            let session = ChatSession::new(assistant, gateway, identity);
            commands::send(&session, &text.join(" "), conversation).await?;
        }
        Command::List => {
            let session = ChatSession::new(assistant, gateway, identity);
            commands::list(&session).await?;
        }
        Command::Health => commands::health(&assistant).await?,
    }

    Ok(())
}
