//! Data access for contacts, inboxes, conversations and messages.
//!
//! Every call is scoped by an account id. Implementations must report
//! uniqueness failures as [`StoreError::UniqueViolation`] carrying one of the
//! constraint names below, since callers treat those as the authoritative
//! duplicate check.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::types::{
    Channel, ChatMessage, Contact, ContactDraft, ContactIdentifier, Conversation,
    ConversationPatch, ConversationSummary, Inbox, NewConversation, NewMessage,
};

pub const CONTACT_PHONE_CONSTRAINT: &str = "contacts_account_phone_key";
pub const CONTACT_EMAIL_CONSTRAINT: &str = "contacts_account_email_key";
pub const ACTIVE_CONVERSATION_CONSTRAINT: &str = "conversations_one_active_idx";

#[async_trait]
pub trait ConsoleStore: Send + Sync {
    async fn find_contact(
        &self,
        account_id: &str,
        identifier: &ContactIdentifier,
    ) -> Result<Option<Contact>, StoreError>;

    async fn find_contact_by_id(
        &self,
        account_id: &str,
        contact_id: &str,
    ) -> Result<Option<Contact>, StoreError>;

    async fn insert_contact(
        &self,
        account_id: &str,
        draft: &ContactDraft,
    ) -> Result<Contact, StoreError>;

    async fn update_contact(
        &self,
        account_id: &str,
        contact_id: &str,
        draft: &ContactDraft,
    ) -> Result<Contact, StoreError>;

    /// Most recently created inbox of `channel`.
    async fn latest_inbox(
        &self,
        account_id: &str,
        channel: Channel,
    ) -> Result<Option<Inbox>, StoreError>;

    async fn find_conversation(
        &self,
        account_id: &str,
        conversation_id: &str,
    ) -> Result<Option<Conversation>, StoreError>;

    /// Most recently updated conversation for the pair, whatever its status.
    async fn find_conversation_for(
        &self,
        account_id: &str,
        contact_id: &str,
        inbox_id: &str,
    ) -> Result<Option<Conversation>, StoreError>;

    /// Open or assigned conversation for the contact on any inbox of `channel`.
    async fn find_active_conversation(
        &self,
        account_id: &str,
        contact_id: &str,
        channel: Channel,
    ) -> Result<Option<Conversation>, StoreError>;

    async fn insert_conversation(
        &self,
        account_id: &str,
        new: &NewConversation,
    ) -> Result<Conversation, StoreError>;

    async fn update_conversation(
        &self,
        account_id: &str,
        conversation_id: &str,
        patch: &ConversationPatch,
    ) -> Result<Conversation, StoreError>;

    async fn conversation_summaries(
        &self,
        account_id: &str,
    ) -> Result<Vec<ConversationSummary>, StoreError>;

    async fn conversation_summary(
        &self,
        account_id: &str,
        conversation_id: &str,
    ) -> Result<Option<ConversationSummary>, StoreError>;

    /// Thread in creation order.
    async fn list_messages(
        &self,
        account_id: &str,
        conversation_id: &str,
    ) -> Result<Vec<ChatMessage>, StoreError>;

    async fn insert_message(
        &self,
        account_id: &str,
        new: &NewMessage,
    ) -> Result<ChatMessage, StoreError>;
}

/// Empty strings from forms are stored as NULL.
pub(crate) fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
