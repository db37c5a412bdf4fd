//! Contact form: load the contact behind a conversation and save edits.

use serde::Serialize;

use crate::error::{ConsoleError, StoreError};
use crate::store::ConsoleStore;
use crate::types::{
    Channel, Contact, ContactDraft, ContactIdentifier, ConversationStatus, NewConversation,
};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedContact {
    pub contact: Contact,
    /// Name to write back onto the conversation row in the list.
    pub display_name: String,
    pub created: bool,
    /// Conversation opened for a brand-new contact, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

pub async fn load_contact_for_conversation(
    store: &dyn ConsoleStore,
    account_id: &str,
    conversation_id: &str,
) -> Result<Option<Contact>, ConsoleError> {
    let conversation = store
        .find_conversation(account_id, conversation_id)
        .await?
        .ok_or_else(|| ConsoleError::NotFound(format!("conversation {conversation_id} not found")))?;
    Ok(store
        .find_contact_by_id(account_id, &conversation.contact_id)
        .await?)
}

fn duplicate_contact(err: StoreError) -> ConsoleError {
    match err {
        StoreError::UniqueViolation { constraint } => ConsoleError::conflict(
            format!("another contact already uses these details ({constraint})"),
            None,
        ),
        other => other.into(),
    }
}

/// Upsert the contact keyed by phone.
///
/// First name and phone are mandatory. A contact created here without a
/// `conversation_id` also gets an assigned conversation on the newest
/// WhatsApp inbox, when the account has one.
pub async fn save_contact(
    store: &dyn ConsoleStore,
    account_id: &str,
    draft: &ContactDraft,
    conversation_id: Option<&str>,
) -> Result<SavedContact, ConsoleError> {
    let phone = draft.phone.as_deref().map(str::trim).unwrap_or_default();
    if draft.first_name.trim().is_empty() || phone.is_empty() {
        return Err(ConsoleError::validation("first name and phone are required"));
    }
    let key = ContactIdentifier::Phone(phone.to_string());

    let (contact, created) = match store.find_contact(account_id, &key).await? {
        Some(existing) => (
            store
                .update_contact(account_id, &existing.id, draft)
                .await
                .map_err(duplicate_contact)?,
            false,
        ),
        None => (
            store
                .insert_contact(account_id, draft)
                .await
                .map_err(duplicate_contact)?,
            true,
        ),
    };

    let mut opened = None;
    let conversation_id = conversation_id.map(str::trim).filter(|id| !id.is_empty());
    if created && conversation_id.is_none() {
        match store.latest_inbox(account_id, Channel::Whatsapp).await? {
            Some(inbox) => {
                let conversation = store
                    .insert_conversation(
                        account_id,
                        &NewConversation {
                            contact_id: contact.id.clone(),
                            inbox_id: inbox.id,
                            status: ConversationStatus::Assigned,
                            assignee_id: None,
                        },
                    )
                    .await
                    .map_err(|err| match err {
                        StoreError::UniqueViolation { .. } => ConsoleError::conflict(
                            "active conversation exists",
                            Some(contact.display_name()),
                        ),
                        other => other.into(),
                    })?;
                opened = Some(conversation.id);
            }
            None => {
                tracing::warn!(contact_id = %contact.id, "no whatsapp inbox, contact saved without conversation");
            }
        }
    }

    tracing::info!(contact_id = %contact.id, created, "contact saved");
    Ok(SavedContact {
        display_name: contact.display_name(),
        contact,
        created,
        conversation_id: opened,
    })
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::store::MemoryStore;

    const ACCOUNT: &str = "acct-1";

    fn form(first: &str, last: Option<&str>, phone: &str) -> ContactDraft {
        ContactDraft {
            first_name: first.to_string(),
            last_name: last.map(str::to_string),
            phone: Some(phone.to_string()),
            ..ContactDraft::default()
        }
    }

    #[tokio::test]
    async fn first_name_and_phone_are_required() {
        let store = MemoryStore::new();
        for draft in [form("", None, "5511"), form("Ana", None, "  ")] {
            let err = save_contact(&store, ACCOUNT, &draft, None).await.unwrap_err();
            assert!(matches!(err, ConsoleError::Validation(_)));
        }
        assert_eq!(store.contact_inserts(), 0);
    }

    #[tokio::test]
    async fn new_contact_without_conversation_opens_one() {
        let store = MemoryStore::new();
        store
            .seed_inbox(ACCOUNT, "line", Channel::Whatsapp, Utc::now())
            .await;

        let saved = save_contact(&store, ACCOUNT, &form("Ana", Some("Lima"), "5511"), None)
            .await
            .unwrap();

        assert!(saved.created);
        assert_eq!(saved.display_name, "Ana Lima");
        let conversation_id = saved.conversation_id.expect("conversation opened");
        let row = store
            .find_conversation(ACCOUNT, &conversation_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.status, ConversationStatus::Assigned);
        assert_eq!(row.contact_id, saved.contact.id);
    }

    #[tokio::test]
    async fn existing_phone_is_updated_in_place() {
        let store = MemoryStore::new();
        let first = save_contact(&store, ACCOUNT, &form("Ana", None, "5511"), Some("conv-1"))
            .await
            .unwrap();

        let mut edited = form("Ana", Some("Souza"), "5511");
        edited.company = Some("Acme".into());
        edited.city = Some("".into());
        let second = save_contact(&store, ACCOUNT, &edited, Some("conv-1"))
            .await
            .unwrap();

        assert!(!second.created);
        assert_eq!(second.contact.id, first.contact.id);
        assert_eq!(second.display_name, "Ana Souza");
        assert_eq!(second.contact.company.as_deref(), Some("Acme"));
        assert_eq!(second.contact.city, None);
        assert_eq!(store.contact_inserts(), 1);
        assert_eq!(store.conversation_inserts(), 0);
    }

    #[tokio::test]
    async fn email_taken_by_another_contact_conflicts() {
        let store = MemoryStore::new();
        let mut ana = form("Ana", None, "5511");
        ana.email = Some("shared@example.com".into());
        save_contact(&store, ACCOUNT, &ana, Some("c")).await.unwrap();

        let mut bia = form("Bia", None, "5522");
        bia.email = Some("shared@example.com".into());
        let err = save_contact(&store, ACCOUNT, &bia, Some("c")).await.unwrap_err();

        assert!(matches!(err, ConsoleError::Conflict { .. }));
    }

    #[tokio::test]
    async fn contact_behind_conversation_is_loaded() {
        let store = MemoryStore::new();
        store
            .seed_inbox(ACCOUNT, "line", Channel::Whatsapp, Utc::now())
            .await;
        let saved = save_contact(&store, ACCOUNT, &form("Caio", None, "5533"), None)
            .await
            .unwrap();
        let conversation_id = saved.conversation_id.unwrap();

        let loaded = load_contact_for_conversation(&store, ACCOUNT, &conversation_id)
            .await
            .unwrap();
        assert_eq!(loaded.map(|c| c.first_name), Some("Caio".to_string()));

        let missing = load_contact_for_conversation(&store, ACCOUNT, "nope")
            .await
            .unwrap_err();
        assert!(matches!(missing, ConsoleError::NotFound(_)));
    }
}
