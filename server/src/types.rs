use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::Settings;
use crate::gateway::EvolutionClient;
use crate::store::ConsoleStore;

pub struct AppState {
    pub store: Arc<dyn ConsoleStore>,
    pub gateway: Option<EvolutionClient>,
    pub settings: Settings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Whatsapp,
    Instagram,
}

/// Display metadata the UI shows next to a conversation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelMeta {
    pub label: &'static str,
    pub icon: &'static str,
    pub badge_color: &'static str,
    pub supports_start_conversation: bool,
}

const WHATSAPP_META: ChannelMeta = ChannelMeta {
    label: "WhatsApp",
    icon: "message-circle",
    badge_color: "bg-green-500",
    supports_start_conversation: true,
};

const INSTAGRAM_META: ChannelMeta = ChannelMeta {
    label: "Instagram",
    icon: "instagram",
    badge_color: "bg-gradient-to-r from-purple-500 to-pink-500",
    supports_start_conversation: false,
};

impl Channel {
    pub const ALL: [Channel; 2] = [Channel::Whatsapp, Channel::Instagram];

    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Whatsapp => "whatsapp",
            Channel::Instagram => "instagram",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "whatsapp" => Some(Channel::Whatsapp),
            "instagram" => Some(Channel::Instagram),
            _ => None,
        }
    }

    /// First channel whose metadata allows agents to open conversations.
    pub fn startable() -> Option<Channel> {
        Channel::ALL
            .into_iter()
            .find(|c| c.meta().supports_start_conversation)
    }

    pub fn meta(self) -> &'static ChannelMeta {
        match self {
            Channel::Whatsapp => &WHATSAPP_META,
            Channel::Instagram => &INSTAGRAM_META,
        }
    }
}

/// Persisted lifecycle state of a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    Open,
    Assigned,
    Resolved,
}

impl ConversationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ConversationStatus::Open => "open",
            ConversationStatus::Assigned => "assigned",
            ConversationStatus::Resolved => "resolved",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "open" => Some(ConversationStatus::Open),
            "assigned" => Some(ConversationStatus::Assigned),
            "resolved" => Some(ConversationStatus::Resolved),
            _ => None,
        }
    }

    pub fn is_active(self) -> bool {
        !matches!(self, ConversationStatus::Resolved)
    }

    pub fn queue_status(self) -> QueueStatus {
        match self {
            ConversationStatus::Open => QueueStatus::Waiting,
            ConversationStatus::Assigned => QueueStatus::Assigned,
            ConversationStatus::Resolved => QueueStatus::Resolved,
        }
    }
}

/// Queue label derived from [`ConversationStatus`]; never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Waiting,
    Assigned,
    Resolved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueTab {
    Waiting,
    Assigned,
    #[default]
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Presence {
    Online,
    Offline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderType {
    Agent,
    Customer,
}

impl SenderType {
    pub fn as_str(self) -> &'static str {
        match self {
            SenderType::Agent => "agent",
            SenderType::Customer => "customer",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "agent" | "user" => Some(SenderType::Agent),
            "customer" => Some(SenderType::Customer),
            _ => None,
        }
    }
}

/// Phone-or-email typed by an agent, classified purely on the presence of `@`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContactIdentifier {
    Phone(String),
    Email(String),
}

impl ContactIdentifier {
    pub fn classify(raw: &str) -> Option<Self> {
        let value = raw.trim();
        if value.is_empty() {
            return None;
        }
        if value.contains('@') {
            Some(ContactIdentifier::Email(value.to_string()))
        } else {
            Some(ContactIdentifier::Phone(value.to_string()))
        }
    }

    pub fn value(&self) -> &str {
        match self {
            ContactIdentifier::Phone(v) | ContactIdentifier::Email(v) => v,
        }
    }

    pub fn field(&self) -> &'static str {
        match self {
            ContactIdentifier::Phone(_) => "phone",
            ContactIdentifier::Email(_) => "email",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: String,
    pub account_id: String,
    pub first_name: String,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
    pub biography: Option<String>,
    pub company: Option<String>,
    pub cnpj: Option<String>,
    pub instagram: Option<String>,
    pub facebook: Option<String>,
    pub linkedin: Option<String>,
    pub other_social: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Contact {
    pub fn display_name(&self) -> String {
        match self.last_name.as_deref().map(str::trim) {
            Some(last) if !last.is_empty() => format!("{} {}", self.first_name, last),
            _ => self.first_name.clone(),
        }
    }
}

/// Writable contact fields, used for both insert and update.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactDraft {
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub biography: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub cnpj: Option<String>,
    #[serde(default)]
    pub instagram: Option<String>,
    #[serde(default)]
    pub facebook: Option<String>,
    #[serde(default)]
    pub linkedin: Option<String>,
    #[serde(default)]
    pub other_social: Option<String>,
}

impl ContactDraft {
    pub fn for_identifier(identifier: &ContactIdentifier) -> Self {
        let mut draft = ContactDraft {
            first_name: identifier.value().to_string(),
            ..ContactDraft::default()
        };
        match identifier {
            ContactIdentifier::Phone(v) => draft.phone = Some(v.clone()),
            ContactIdentifier::Email(v) => draft.email = Some(v.clone()),
        }
        draft
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Inbox {
    pub id: String,
    pub account_id: String,
    pub name: String,
    pub channel: Channel,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub account_id: String,
    pub contact_id: String,
    pub inbox_id: String,
    pub status: ConversationStatus,
    pub assignee_id: Option<String>,
    pub urgent: bool,
    pub pinned: bool,
    pub closed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewConversation {
    pub contact_id: String,
    pub inbox_id: String,
    pub status: ConversationStatus,
    pub assignee_id: Option<String>,
}

/// Partial update; `None` leaves the column untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversationPatch {
    pub status: Option<ConversationStatus>,
    pub assignee_id: Option<Option<String>>,
    pub urgent: Option<bool>,
    pub pinned: Option<bool>,
    pub closed_at: Option<Option<DateTime<Utc>>>,
}

impl ConversationPatch {
    pub fn apply_to(&self, conversation: &mut Conversation) {
        if let Some(status) = self.status {
            conversation.status = status;
        }
        if let Some(assignee) = &self.assignee_id {
            conversation.assignee_id = assignee.clone();
        }
        if let Some(urgent) = self.urgent {
            conversation.urgent = urgent;
        }
        if let Some(pinned) = self.pinned {
            conversation.pinned = pinned;
        }
        if let Some(closed_at) = self.closed_at {
            conversation.closed_at = closed_at;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub conversation_id: String,
    pub content: String,
    pub sender_type: SenderType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_status: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub conversation_id: String,
    pub content: String,
    pub sender_type: SenderType,
    pub sender_id: Option<String>,
}

/// A conversation joined with what the list needs to render it.
#[derive(Debug, Clone)]
pub struct ConversationSummary {
    pub conversation: Conversation,
    pub channel: Channel,
    pub contact: Option<Contact>,
    pub last_message: Option<ChatMessage>,
    pub unread_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationView {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub avatar: String,
    pub last_message: String,
    pub timestamp: DateTime<Utc>,
    pub timestamp_label: String,
    pub unread_count: usize,
    pub channel: Channel,
    pub status: Presence,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_jid: Option<String>,
    pub queue_status: QueueStatus,
    #[serde(default)]
    pub urgent: bool,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee_id: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListFilters {
    #[serde(default)]
    pub show_closed: bool,
    #[serde(default)]
    pub sort_oldest_first: bool,
    #[serde(default)]
    pub urgent_first: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueCounts {
    pub waiting: usize,
    pub assigned: usize,
    pub all: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListConversationsQuery {
    #[serde(default)]
    pub tab: QueueTab,
    #[serde(default)]
    pub show_closed: bool,
    #[serde(default)]
    pub sort_oldest_first: bool,
    #[serde(default)]
    pub urgent_first: bool,
}

impl ListConversationsQuery {
    pub fn filters(&self) -> ListFilters {
        ListFilters {
            show_closed: self.show_closed,
            sort_oldest_first: self.sort_oldest_first,
            urgent_first: self.urgent_first,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartConversationBody {
    pub identifier: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageBody {
    pub text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferBody {
    pub user_id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReopenQuery {
    /// Reopen straight into the calling agent's queue.
    #[serde(default)]
    pub assign: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveContactBody {
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(flatten)]
    pub contact: ContactDraft,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookBody {
    pub url: String,
    #[serde(default)]
    pub events: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayMessagesQuery {
    #[serde(default)]
    pub limit: Option<u32>,
}
