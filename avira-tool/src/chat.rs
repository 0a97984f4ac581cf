//! Line-based interactive chat.
//!
//! Each message is sent on its own task, so the user can switch
//! conversations or start new ones while the assistant is still replying.
//! Replies are printed by a task that follows the store's events.

use std::sync::Arc;

use avira_core::{ChatSession, Conversation, StoreEvent};
use avira_http::AssistantClient;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::debug;

use crate::error::AviraError;
use crate::gateway::AnyGateway;

pub type Session = ChatSession<AssistantClient, AnyGateway>;

const HELP: &str = "\
Commands:
  /new         start a new conversation
  /list        list conversations
  /select <n>  switch to conversation n
  /search <q>  find conversations by subject
  /cancel      stop the reply in the current conversation
  /quit        exit";

#[derive(Debug, PartialEq, Eq)]
enum Input {
    Empty,
    Message(String),
    New,
    List,
    Select(usize),
    Search(String),
    Cancel,
    Help,
    Quit,
    Invalid(String),
}

fn parse_input(line: &str) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }
    let Some(command) = line.strip_prefix('/') else {
        return Input::Message(line.to_string());
    };

    let (name, arg) = match command.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (command, ""),
    };
    match name {
        "new" => Input::New,
        "list" => Input::List,
        "select" => match arg.parse::<usize>() {
            Ok(n) if n > 0 => Input::Select(n),
            _ => Input::Invalid(format!("Usage: /select <n>, got '{}'", arg)),
        },
        "search" => Input::Search(arg.to_string()),
        "cancel" => Input::Cancel,
        "help" => Input::Help,
        "quit" | "exit" => Input::Quit,
        other => Input::Invalid(format!("Unknown command: /{}", other)),
    }
}

pub async fn run(session: Arc<Session>) -> Result<(), AviraError> {
    println!("{}", session.greeting());
    let loaded = session.load_history().await;
    if loaded > 0 {
        println!("{} conversations loaded.", loaded);
        if let Some(conversation) = session.selected().and_then(|key| session.conversation(key)) {
            print_transcript(&conversation);
        }
    }
    println!("{}", HELP);

    let printer = tokio::spawn(print_replies(Arc::clone(&session)));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        match parse_input(&line) {
            Input::Empty => {}
            Input::Message(text) => {
                let session = Arc::clone(&session);
                tokio::spawn(async move {
                    session.handle_send(&text).await;
                });
            }
            Input::New => {
                session.new_conversation();
                println!("Started a new conversation.");
            }
            Input::List => print_list(&session, &session.conversations()),
            Input::Select(n) => select(&session, n).await,
            Input::Search(query) => print_list(&session, &session.search(&query)),
            Input::Cancel => match session.selected() {
                Some(key) if session.cancel(key) => println!("Cancelled."),
                _ => println!("Nothing to cancel."),
            },
            Input::Help => println!("{}", HELP),
            Input::Quit => break,
            Input::Invalid(reason) => println!("{}", reason),
        }
    }

    printer.abort();
    Ok(())
}

async fn select(session: &Session, n: usize) {
    let Some(conversation) = session.conversations().into_iter().nth(n - 1) else {
        println!("No conversation {}.", n);
        return;
    };
    if let Err(e) = session.select(conversation.key()).await {
        println!("Cannot select conversation: {}", e);
        return;
    }
    if let Some(conversation) = session.conversation(conversation.key()) {
        print_transcript(&conversation);
    }
}

fn print_list(session: &Session, conversations: &[Conversation]) {
    if conversations.is_empty() {
        println!("No conversations.");
        return;
    }

    let all = session.conversations();
    let selected = session.selected();
    for conversation in conversations {
        let number = all
            .iter()
            .position(|c| c.key() == conversation.key())
            .map(|i| i + 1)
            .unwrap_or(0);
        let marker = if selected == Some(conversation.key()) { '*' } else { ' ' };
        let typing = if session.is_typing(conversation.key()) { " (typing)" } else { "" };
        println!(
            "{} {:>3}. {} [{} messages]{}",
            marker,
            number,
            conversation.subject(),
            conversation.messages().len(),
            typing
        );
    }
}

fn print_transcript(conversation: &Conversation) {
    println!("--- {} ---", conversation.subject());
    for message in conversation.messages() {
        println!("{}: {}", message.sender, message.text);
    }
}

/// The line printed when a round ends. Rounds overlapping in one
/// conversation each print their own reply.
fn reply_line(conversation: &Conversation, reply: Option<usize>) -> String {
    match reply.and_then(|index| conversation.messages().get(index)) {
        Some(message) => format!("[{}] {}: {}", conversation.subject(), message.sender, message.text),
        None => format!("[{}] no reply", conversation.subject()),
    }
}

async fn print_replies(session: Arc<Session>) {
    let mut events = session.subscribe();
    loop {
        match events.recv().await {
            Ok(StoreEvent::RoundStarted { key, .. }) => {
                if let Some(conversation) = session.conversation(key) {
                    println!("[{}] assistant is typing...", conversation.subject());
                }
            }
            Ok(StoreEvent::RoundFinished { key, reply, .. }) => {
                let Some(conversation) = session.conversation(key) else {
                    continue;
                };
                println!("{}", reply_line(&conversation, reply));
            }
            Ok(_) => {}
            Err(RecvError::Lagged(missed)) => debug!(missed, "reply printer fell behind"),
            Err(RecvError::Closed) => break,
        }
    }
}
