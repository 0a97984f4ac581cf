use avira_core::{ConversationGateway, RoundState};
use avira_http::AssistantClient;

use crate::chat::Session;
use crate::error::AviraError;

/// Sends one message and prints the reply.
///
/// Without `conversation` the message starts a new conversation.
pub async fn send(session: &Session, text: &str, conversation: Option<String>) -> Result<(), AviraError> {
    if let Some(id) = conversation {
        if !session.identity().is_authenticated() {
            return Err(AviraError::NotSignedIn);
        }
        session.load_history().await;
        if session.select_id(&id).await.is_err() {
            return Err(AviraError::UnknownConversation(id));
        }
    } else {
        session.new_conversation();
    }

    let Some(report) = session.handle_send(text).await else {
        return Ok(());
    };

    if let Some(id) = session.conversation(report.conversation).as_ref().and_then(|c| c.id()) {
        eprintln!("conversation: {}", id);
    }

    match report.state {
        RoundState::Failed => Err(AviraError::RoundFailed(report.text.unwrap_or_default())),
        _ => {
            println!("{}", report.text.unwrap_or_default());
            Ok(())
        }
    }
}

pub async fn list(session: &Session) -> Result<(), AviraError> {
    if !session.identity().is_authenticated() {
        return Err(AviraError::NotSignedIn);
    }

    for conversation in session.gateway().list().await? {
        println!(
            "{}\t{}\t{} messages",
            conversation.id,
            conversation.subject,
            conversation.messages.len()
        );
    }
    Ok(())
}

pub async fn health(client: &AssistantClient) -> Result<(), AviraError> {
    let status = client.health().await?;
    println!("{}: {}", client.base_url(), status.status);
    Ok(())
}
