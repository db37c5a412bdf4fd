//! Starting (or resuming) a WhatsApp conversation from a phone number or
//! email typed by an agent.

use chrono::Utc;

use crate::error::{ConsoleError, StoreError};
use crate::gateway::whatsapp_remote_jid;
use crate::queue::timestamp_label;
use crate::store::{ConsoleStore, ACTIVE_CONVERSATION_CONSTRAINT};
use crate::types::{
    Channel, Contact, ContactDraft, ContactIdentifier, ConversationPatch, ConversationStatus,
    ConversationView, NewConversation, Presence,
};

const ACTIVE_EXISTS: &str = "active conversation exists";

fn active_conflict(existing: Option<String>) -> ConsoleError {
    ConsoleError::conflict(ACTIVE_EXISTS, existing)
}

fn map_conversation_write(err: StoreError, contact: &Contact) -> ConsoleError {
    match err {
        StoreError::UniqueViolation { constraint } if constraint == ACTIVE_CONVERSATION_CONSTRAINT => {
            active_conflict(Some(contact.display_name()))
        }
        StoreError::UniqueViolation { .. } => ConsoleError::conflict(ACTIVE_EXISTS, None),
        other => other.into(),
    }
}

/// Resolve `raw` to a contact and an assigned conversation on the newest
/// inbox of the channel that supports starting conversations.
///
/// Writes at most one contact and one conversation row and never a message.
/// The first failing step aborts; earlier writes are kept.
pub async fn start_conversation(
    store: &dyn ConsoleStore,
    account_id: &str,
    raw: &str,
    agent_id: Option<&str>,
) -> Result<ConversationView, ConsoleError> {
    let identifier =
        ContactIdentifier::classify(raw).ok_or_else(|| ConsoleError::validation("empty identifier"))?;
    let channel = Channel::startable().ok_or_else(|| {
        ConsoleError::Configuration("no channel supports starting conversations".into())
    })?;

    let existing = store.find_contact(account_id, &identifier).await?;
    if let Some(contact) = &existing {
        if store
            .find_active_conversation(account_id, &contact.id, channel)
            .await?
            .is_some()
        {
            tracing::info!(contact_id = %contact.id, "start refused, conversation already active");
            return Err(active_conflict(Some(contact.display_name())));
        }
    }

    let contact = match existing {
        Some(contact) => contact,
        None => store
            .insert_contact(account_id, &ContactDraft::for_identifier(&identifier))
            .await
            .map_err(|err| match err {
                StoreError::UniqueViolation { .. } => {
                    ConsoleError::conflict("duplicate contact", None)
                }
                other => other.into(),
            })?,
    };

    let inbox = store
        .latest_inbox(account_id, channel)
        .await?
        .ok_or_else(|| {
            ConsoleError::Configuration(format!(
                "no {} inbox configured",
                channel.meta().label
            ))
        })?;

    let previous = store
        .find_conversation_for(account_id, &contact.id, &inbox.id)
        .await?;
    let resumed = previous.is_some();
    let conversation = match previous {
        Some(conversation) => {
            let patch = ConversationPatch {
                status: Some(ConversationStatus::Assigned),
                closed_at: Some(None),
                assignee_id: agent_id.map(|id| Some(id.to_string())),
                ..ConversationPatch::default()
            };
            store
                .update_conversation(account_id, &conversation.id, &patch)
                .await
                .map_err(|err| map_conversation_write(err, &contact))?
        }
        None => {
            let new = NewConversation {
                contact_id: contact.id.clone(),
                inbox_id: inbox.id.clone(),
                status: ConversationStatus::Assigned,
                assignee_id: agent_id.map(str::to_string),
            };
            store
                .insert_conversation(account_id, &new)
                .await
                .map_err(|err| map_conversation_write(err, &contact))?
        }
    };

    tracing::info!(
        conversation_id = %conversation.id,
        contact_id = %contact.id,
        resumed,
        "conversation started"
    );

    let now = Utc::now();
    Ok(ConversationView {
        id: conversation.id.clone(),
        name: contact.display_name(),
        avatar: String::new(),
        last_message: if resumed { "resumed" } else { "new" }.to_string(),
        timestamp: now,
        timestamp_label: timestamp_label(Some(now), now),
        unread_count: 0,
        channel,
        status: Presence::Online,
        phone: contact.phone.clone(),
        remote_jid: match channel {
            Channel::Whatsapp => contact.phone.as_deref().and_then(whatsapp_remote_jid),
            Channel::Instagram => None,
        },
        queue_status: conversation.status.queue_status(),
        urgent: conversation.urgent,
        pinned: conversation.pinned,
        assignee_id: conversation.assignee_id.clone(),
    })
}
