//! Message thread of a stored conversation and agent replies.

use crate::error::ConsoleError;
use crate::gateway::{whatsapp_remote_jid, EvolutionClient};
use crate::store::ConsoleStore;
use crate::types::{Channel, ChatMessage, NewMessage, SenderType};

/// Messages of `conversation_id`, oldest first.
pub async fn load_thread(
    store: &dyn ConsoleStore,
    account_id: &str,
    conversation_id: &str,
) -> Result<Vec<ChatMessage>, ConsoleError> {
    if store
        .find_conversation(account_id, conversation_id)
        .await?
        .is_none()
    {
        return Err(ConsoleError::NotFound(format!(
            "conversation {conversation_id} not found"
        )));
    }
    Ok(store.list_messages(account_id, conversation_id).await?)
}

/// Persist an agent reply, relaying it through the gateway first when the
/// conversation is a WhatsApp one with a reachable phone.
pub async fn send_reply(
    store: &dyn ConsoleStore,
    gateway: Option<&EvolutionClient>,
    account_id: &str,
    agent_id: &str,
    conversation_id: &str,
    text: &str,
) -> Result<ChatMessage, ConsoleError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(ConsoleError::validation("message text is required"));
    }
    let summary = store
        .conversation_summary(account_id, conversation_id)
        .await?
        .ok_or_else(|| ConsoleError::NotFound(format!("conversation {conversation_id} not found")))?;

    let remote_jid = match summary.channel {
        Channel::Whatsapp => summary
            .contact
            .as_ref()
            .and_then(|c| c.phone.as_deref())
            .and_then(whatsapp_remote_jid),
        Channel::Instagram => None,
    };
    let mut delivery_status = None;
    if let (Some(jid), Some(gateway)) = (remote_jid.as_deref(), gateway) {
        if !gateway.send_text(jid, text).await {
            return Err(ConsoleError::Gateway("gateway rejected message".to_string()));
        }
        delivery_status = Some("sent".to_string());
    }

    let mut message = store
        .insert_message(
            account_id,
            &NewMessage {
                conversation_id: conversation_id.to_string(),
                content: text.to_string(),
                sender_type: SenderType::Agent,
                sender_id: Some(agent_id.to_string()),
            },
        )
        .await?;
    message.delivery_status = delivery_status;
    tracing::info!(
        conversation_id,
        message_id = %message.id,
        relayed = message.delivery_status.is_some(),
        "agent reply stored"
    );
    Ok(message)
}
