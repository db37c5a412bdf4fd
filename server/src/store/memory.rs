use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    non_empty, ConsoleStore, ACTIVE_CONVERSATION_CONSTRAINT, CONTACT_EMAIL_CONSTRAINT,
    CONTACT_PHONE_CONSTRAINT,
};
use crate::error::StoreError;
use crate::types::{
    Channel, ChatMessage, Contact, ContactDraft, ContactIdentifier, Conversation,
    ConversationPatch, ConversationStatus, ConversationSummary, Inbox, NewConversation,
    NewMessage, SenderType,
};

#[derive(Default)]
struct Tables {
    contacts: Vec<Contact>,
    inboxes: Vec<Inbox>,
    conversations: Vec<Conversation>,
    messages: Vec<ChatMessage>,
}

/// Process-local store with the same uniqueness rules as the Postgres schema.
///
/// Used by the test suite and by `CONSOLE_STORE=memory` demo runs. Insert
/// counters let callers assert how many rows a workflow wrote.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    contact_inserts: AtomicUsize,
    conversation_inserts: AtomicUsize,
    conversation_updates: AtomicUsize,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contact_inserts(&self) -> usize {
        self.contact_inserts.load(Ordering::SeqCst)
    }

    pub fn conversation_inserts(&self) -> usize {
        self.conversation_inserts.load(Ordering::SeqCst)
    }

    pub fn conversation_updates(&self) -> usize {
        self.conversation_updates.load(Ordering::SeqCst)
    }

    /// Make every subsequent write fail as if the database went away.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }

    pub async fn seed_inbox(
        &self,
        account_id: &str,
        name: &str,
        channel: Channel,
        created_at: DateTime<Utc>,
    ) -> Inbox {
        let inbox = Inbox {
            id: Uuid::new_v4().to_string(),
            account_id: account_id.to_string(),
            name: name.to_string(),
            channel,
            created_at,
        };
        self.tables.lock().await.inboxes.push(inbox.clone());
        inbox
    }

    pub async fn seed_conversation(
        &self,
        account_id: &str,
        contact_id: &str,
        inbox_id: &str,
        status: ConversationStatus,
        updated_at: DateTime<Utc>,
    ) -> Conversation {
        let conversation = Conversation {
            id: Uuid::new_v4().to_string(),
            account_id: account_id.to_string(),
            contact_id: contact_id.to_string(),
            inbox_id: inbox_id.to_string(),
            status,
            assignee_id: None,
            urgent: false,
            pinned: false,
            closed_at: None,
            created_at: updated_at,
            updated_at,
        };
        self.tables
            .lock()
            .await
            .conversations
            .push(conversation.clone());
        conversation
    }

    pub async fn seed_message(
        &self,
        conversation_id: &str,
        content: &str,
        sender_type: SenderType,
        created_at: DateTime<Utc>,
    ) -> ChatMessage {
        let message = ChatMessage {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            content: content.to_string(),
            sender_type,
            sender_id: None,
            created_at,
            delivery_status: None,
        };
        self.tables.lock().await.messages.push(message.clone());
        message
    }
}

fn contact_from_draft(id: String, account_id: &str, draft: &ContactDraft) -> Contact {
    Contact {
        id,
        account_id: account_id.to_string(),
        first_name: draft.first_name.trim().to_string(),
        last_name: non_empty(&draft.last_name),
        phone: non_empty(&draft.phone),
        email: non_empty(&draft.email),
        city: non_empty(&draft.city),
        country: non_empty(&draft.country),
        biography: non_empty(&draft.biography),
        company: non_empty(&draft.company),
        cnpj: non_empty(&draft.cnpj),
        instagram: non_empty(&draft.instagram),
        facebook: non_empty(&draft.facebook),
        linkedin: non_empty(&draft.linkedin),
        other_social: non_empty(&draft.other_social),
        created_at: Utc::now(),
    }
}

fn check_contact_unique(tables: &Tables, candidate: &Contact) -> Result<(), StoreError> {
    let others = tables
        .contacts
        .iter()
        .filter(|c| c.account_id == candidate.account_id && c.id != candidate.id);
    for other in others {
        if candidate.phone.is_some() && other.phone == candidate.phone {
            return Err(StoreError::UniqueViolation {
                constraint: CONTACT_PHONE_CONSTRAINT.to_string(),
            });
        }
        if candidate.email.is_some() && other.email == candidate.email {
            return Err(StoreError::UniqueViolation {
                constraint: CONTACT_EMAIL_CONSTRAINT.to_string(),
            });
        }
    }
    Ok(())
}

fn check_single_active(tables: &Tables, candidate: &Conversation) -> Result<(), StoreError> {
    if !candidate.status.is_active() {
        return Ok(());
    }
    let clash = tables.conversations.iter().any(|c| {
        c.id != candidate.id
            && c.contact_id == candidate.contact_id
            && c.inbox_id == candidate.inbox_id
            && c.status.is_active()
    });
    if clash {
        return Err(StoreError::UniqueViolation {
            constraint: ACTIVE_CONVERSATION_CONSTRAINT.to_string(),
        });
    }
    Ok(())
}

fn summarize(tables: &Tables, conversation: &Conversation) -> Option<ConversationSummary> {
    let channel = tables
        .inboxes
        .iter()
        .find(|i| i.id == conversation.inbox_id)?
        .channel;
    let contact = tables
        .contacts
        .iter()
        .find(|c| c.id == conversation.contact_id)
        .cloned();
    let thread = thread_for(tables, &conversation.id);
    let last_agent = thread
        .iter()
        .rposition(|m| m.sender_type == SenderType::Agent);
    let unread_count = thread
        .iter()
        .skip(last_agent.map(|i| i + 1).unwrap_or(0))
        .filter(|m| m.sender_type == SenderType::Customer)
        .count();
    Some(ConversationSummary {
        conversation: conversation.clone(),
        channel,
        contact,
        last_message: thread.last().cloned(),
        unread_count,
    })
}

fn thread_for(tables: &Tables, conversation_id: &str) -> Vec<ChatMessage> {
    let mut thread = tables
        .messages
        .iter()
        .filter(|m| m.conversation_id == conversation_id)
        .cloned()
        .collect::<Vec<_>>();
    thread.sort_by_key(|m| m.created_at);
    thread
}

#[async_trait]
impl ConsoleStore for MemoryStore {
    async fn find_contact(
        &self,
        account_id: &str,
        identifier: &ContactIdentifier,
    ) -> Result<Option<Contact>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .contacts
            .iter()
            .find(|c| {
                c.account_id == account_id
                    && match identifier {
                        ContactIdentifier::Phone(v) => c.phone.as_deref() == Some(v.as_str()),
                        ContactIdentifier::Email(v) => c.email.as_deref() == Some(v.as_str()),
                    }
            })
            .cloned())
    }

    async fn find_contact_by_id(
        &self,
        account_id: &str,
        contact_id: &str,
    ) -> Result<Option<Contact>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .contacts
            .iter()
            .find(|c| c.account_id == account_id && c.id == contact_id)
            .cloned())
    }

    async fn insert_contact(
        &self,
        account_id: &str,
        draft: &ContactDraft,
    ) -> Result<Contact, StoreError> {
        self.check_writable()?;
        let mut tables = self.tables.lock().await;
        let contact = contact_from_draft(Uuid::new_v4().to_string(), account_id, draft);
        check_contact_unique(&tables, &contact)?;
        tables.contacts.push(contact.clone());
        self.contact_inserts.fetch_add(1, Ordering::SeqCst);
        Ok(contact)
    }

    async fn update_contact(
        &self,
        account_id: &str,
        contact_id: &str,
        draft: &ContactDraft,
    ) -> Result<Contact, StoreError> {
        self.check_writable()?;
        let mut tables = self.tables.lock().await;
        let Some(index) = tables
            .contacts
            .iter()
            .position(|c| c.account_id == account_id && c.id == contact_id)
        else {
            return Err(StoreError::RowMissing {
                table: "contacts",
                id: contact_id.to_string(),
            });
        };
        let mut updated = contact_from_draft(contact_id.to_string(), account_id, draft);
        updated.created_at = tables.contacts[index].created_at;
        check_contact_unique(&tables, &updated)?;
        tables.contacts[index] = updated.clone();
        Ok(updated)
    }

    async fn latest_inbox(
        &self,
        account_id: &str,
        channel: Channel,
    ) -> Result<Option<Inbox>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .inboxes
            .iter()
            .filter(|i| i.account_id == account_id && i.channel == channel)
            .max_by_key(|i| i.created_at)
            .cloned())
    }

    async fn find_conversation(
        &self,
        account_id: &str,
        conversation_id: &str,
    ) -> Result<Option<Conversation>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .conversations
            .iter()
            .find(|c| c.account_id == account_id && c.id == conversation_id)
            .cloned())
    }

    async fn find_conversation_for(
        &self,
        account_id: &str,
        contact_id: &str,
        inbox_id: &str,
    ) -> Result<Option<Conversation>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .conversations
            .iter()
            .filter(|c| {
                c.account_id == account_id && c.contact_id == contact_id && c.inbox_id == inbox_id
            })
            .max_by_key(|c| c.updated_at)
            .cloned())
    }

    async fn find_active_conversation(
        &self,
        account_id: &str,
        contact_id: &str,
        channel: Channel,
    ) -> Result<Option<Conversation>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .conversations
            .iter()
            .filter(|c| {
                c.account_id == account_id && c.contact_id == contact_id && c.status.is_active()
            })
            .filter(|c| {
                tables
                    .inboxes
                    .iter()
                    .any(|i| i.id == c.inbox_id && i.channel == channel)
            })
            .max_by_key(|c| c.updated_at)
            .cloned())
    }

    async fn insert_conversation(
        &self,
        account_id: &str,
        new: &NewConversation,
    ) -> Result<Conversation, StoreError> {
        self.check_writable()?;
        let mut tables = self.tables.lock().await;
        let now = Utc::now();
        let conversation = Conversation {
            id: Uuid::new_v4().to_string(),
            account_id: account_id.to_string(),
            contact_id: new.contact_id.clone(),
            inbox_id: new.inbox_id.clone(),
            status: new.status,
            assignee_id: new.assignee_id.clone(),
            urgent: false,
            pinned: false,
            closed_at: None,
            created_at: now,
            updated_at: now,
        };
        check_single_active(&tables, &conversation)?;
        tables.conversations.push(conversation.clone());
        self.conversation_inserts.fetch_add(1, Ordering::SeqCst);
        Ok(conversation)
    }

    async fn update_conversation(
        &self,
        account_id: &str,
        conversation_id: &str,
        patch: &ConversationPatch,
    ) -> Result<Conversation, StoreError> {
        self.check_writable()?;
        let mut tables = self.tables.lock().await;
        let Some(index) = tables
            .conversations
            .iter()
            .position(|c| c.account_id == account_id && c.id == conversation_id)
        else {
            return Err(StoreError::RowMissing {
                table: "conversations",
                id: conversation_id.to_string(),
            });
        };
        let mut updated = tables.conversations[index].clone();
        patch.apply_to(&mut updated);
        updated.updated_at = Utc::now();
        check_single_active(&tables, &updated)?;
        tables.conversations[index] = updated.clone();
        self.conversation_updates.fetch_add(1, Ordering::SeqCst);
        Ok(updated)
    }

    async fn conversation_summaries(
        &self,
        account_id: &str,
    ) -> Result<Vec<ConversationSummary>, StoreError> {
        let tables = self.tables.lock().await;
        let mut list = tables
            .conversations
            .iter()
            .filter(|c| c.account_id == account_id)
            .filter_map(|c| summarize(&tables, c))
            .collect::<Vec<_>>();
        list.sort_by(|a, b| b.conversation.updated_at.cmp(&a.conversation.updated_at));
        Ok(list)
    }

    async fn conversation_summary(
        &self,
        account_id: &str,
        conversation_id: &str,
    ) -> Result<Option<ConversationSummary>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .conversations
            .iter()
            .find(|c| c.account_id == account_id && c.id == conversation_id)
            .and_then(|c| summarize(&tables, c)))
    }

    async fn list_messages(
        &self,
        account_id: &str,
        conversation_id: &str,
    ) -> Result<Vec<ChatMessage>, StoreError> {
        let tables = self.tables.lock().await;
        let owned = tables
            .conversations
            .iter()
            .any(|c| c.account_id == account_id && c.id == conversation_id);
        if !owned {
            return Ok(Vec::new());
        }
        Ok(thread_for(&tables, conversation_id))
    }

    async fn insert_message(
        &self,
        account_id: &str,
        new: &NewMessage,
    ) -> Result<ChatMessage, StoreError> {
        self.check_writable()?;
        let mut tables = self.tables.lock().await;
        let owned = tables
            .conversations
            .iter()
            .any(|c| c.account_id == account_id && c.id == new.conversation_id);
        if !owned {
            return Err(StoreError::RowMissing {
                table: "conversations",
                id: new.conversation_id.clone(),
            });
        }
        let message = ChatMessage {
            id: Uuid::new_v4().to_string(),
            conversation_id: new.conversation_id.clone(),
            content: new.content.clone(),
            sender_type: new.sender_type,
            sender_id: new.sender_id.clone(),
            created_at: Utc::now(),
            delivery_status: None,
        };
        tables.messages.push(message.clone());
        if let Some(conversation) = tables
            .conversations
            .iter_mut()
            .find(|c| c.id == new.conversation_id)
        {
            conversation.updated_at = message.created_at;
        }
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    const ACCOUNT: &str = "acct-1";

    #[tokio::test]
    async fn duplicate_phone_is_a_unique_violation() {
        let store = MemoryStore::new();
        let draft = ContactDraft {
            first_name: "Ana".into(),
            phone: Some("5511".into()),
            ..ContactDraft::default()
        };
        store.insert_contact(ACCOUNT, &draft).await.unwrap();
        let err = store.insert_contact(ACCOUNT, &draft).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::UniqueViolation { ref constraint } if constraint == CONTACT_PHONE_CONSTRAINT
        ));
        // other accounts are unaffected
        store.insert_contact("acct-2", &draft).await.unwrap();
    }

    #[tokio::test]
    async fn latest_inbox_prefers_newest_of_channel() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store
            .seed_inbox(ACCOUNT, "old line", Channel::Whatsapp, now - Duration::days(3))
            .await;
        let newest = store
            .seed_inbox(ACCOUNT, "new line", Channel::Whatsapp, now)
            .await;
        store
            .seed_inbox(ACCOUNT, "insta", Channel::Instagram, now + Duration::days(1))
            .await;
        let found = store
            .latest_inbox(ACCOUNT, Channel::Whatsapp)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, newest.id);
    }

    #[tokio::test]
    async fn unread_counts_customer_messages_after_last_agent_reply() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let inbox = store.seed_inbox(ACCOUNT, "line", Channel::Whatsapp, now).await;
        let conversation = store
            .seed_conversation(ACCOUNT, "contact-1", &inbox.id, ConversationStatus::Open, now)
            .await;
        for (offset, sender) in [
            (1, SenderType::Customer),
            (2, SenderType::Agent),
            (3, SenderType::Customer),
            (4, SenderType::Customer),
        ] {
            store
                .seed_message(
                    &conversation.id,
                    "hi",
                    sender,
                    now + Duration::seconds(offset),
                )
                .await;
        }
        let summary = store
            .conversation_summary(ACCOUNT, &conversation.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(summary.unread_count, 2);
        assert_eq!(
            summary.last_message.map(|m| m.created_at),
            Some(now + Duration::seconds(4))
        );
    }

    #[tokio::test]
    async fn second_active_conversation_for_same_pair_is_rejected() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let inbox = store.seed_inbox(ACCOUNT, "line", Channel::Whatsapp, now).await;
        store
            .seed_conversation(ACCOUNT, "contact-1", &inbox.id, ConversationStatus::Open, now)
            .await;
        let err = store
            .insert_conversation(
                ACCOUNT,
                &NewConversation {
                    contact_id: "contact-1".into(),
                    inbox_id: inbox.id.clone(),
                    status: ConversationStatus::Assigned,
                    assignee_id: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UniqueViolation { .. }));
    }
}
