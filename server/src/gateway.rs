//! Evolution API client for the WhatsApp channel.
//!
//! Every call degrades instead of failing: transport errors and non-2xx
//! answers are logged and come back as an empty list, `false` or `None`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::queue::timestamp_label;
use crate::types::{
    Channel, ChatMessage, ConversationView, Presence, QueueStatus, SenderType,
};

pub const DEFAULT_MESSAGE_LIMIT: u32 = 50;

pub const DEFAULT_WEBHOOK_EVENTS: [&str; 5] = [
    "MESSAGES_UPSERT",
    "MESSAGE_UPDATE",
    "PRESENCE_UPDATE",
    "CHATS_UPSERT",
    "CONTACTS_UPSERT",
];

const WHATSAPP_JID_SUFFIX: &str = "@s.whatsapp.net";

pub fn normalize_whatsapp_phone(raw: &str) -> Option<String> {
    let digits = raw
        .chars()
        .filter(|c| c.is_ascii_digit())
        .collect::<String>();
    if digits.is_empty() {
        None
    } else {
        Some(digits)
    }
}

/// `<digits>@s.whatsapp.net` for a phone typed in any format.
pub fn whatsapp_remote_jid(phone: &str) -> Option<String> {
    let digits = normalize_whatsapp_phone(phone)?;
    Some(format!("{digits}{WHATSAPP_JID_SUFFIX}"))
}

/// User part of a jid (`5511...@s.whatsapp.net` -> `5511...`).
pub fn jid_user(jid: &str) -> &str {
    jid.split('@').next().unwrap_or(jid)
}

#[derive(Debug, Clone)]
pub struct EvolutionConfig {
    pub base_url: String,
    pub api_key: String,
    pub instance: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayContact {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub push_name: Option<String>,
    #[serde(default)]
    pub remote_jid: Option<String>,
    #[serde(default)]
    pub profile_picture_url: Option<String>,
}

#[derive(Clone)]
pub struct EvolutionClient {
    http: reqwest::Client,
    config: EvolutionConfig,
}

impl EvolutionClient {
    pub fn new(config: EvolutionConfig) -> Self {
        Self::with_client(reqwest::Client::new(), config)
    }

    pub fn with_client(http: reqwest::Client, mut config: EvolutionConfig) -> Self {
        config.base_url = config.base_url.trim_end_matches('/').to_string();
        Self { http, config }
    }

    pub fn instance(&self) -> &str {
        &self.config.instance
    }

    fn url(&self, endpoint: &str) -> String {
        format!(
            "{}/{}/{}",
            self.config.base_url, endpoint, self.config.instance
        )
    }

    async fn get_json(&self, endpoint: &str) -> Result<Value, String> {
        let response = self
            .http
            .get(self.url(endpoint))
            .header("apikey", &self.config.api_key)
            .send()
            .await
            .map_err(|e| format!("{endpoint} request failed: {e}"))?;
        if !response.status().is_success() {
            return Err(format!("{endpoint} returned {}", response.status()));
        }
        response
            .json::<Value>()
            .await
            .map_err(|e| format!("{endpoint} returned invalid json: {e}"))
    }

    async fn post_json(&self, endpoint: &str, payload: &Value) -> Result<reqwest::Response, String> {
        self.http
            .post(self.url(endpoint))
            .header("apikey", &self.config.api_key)
            .json(payload)
            .send()
            .await
            .map_err(|e| format!("{endpoint} request failed: {e}"))
    }

    pub async fn list_chats(&self) -> Vec<Value> {
        match self.get_json("chat/findChats").await {
            Ok(Value::Array(chats)) => chats,
            Ok(_) => Vec::new(),
            Err(err) => {
                tracing::warn!(error = %err, "failed to list gateway chats");
                Vec::new()
            }
        }
    }

    /// Raw messages for `remote_jid`, newest first as the gateway returns them.
    pub async fn list_messages(&self, remote_jid: &str, limit: Option<u32>) -> Vec<Value> {
        let payload = json!({
            "where": { "key": { "remoteJid": remote_jid } },
            "limit": limit.unwrap_or(DEFAULT_MESSAGE_LIMIT),
        });
        let response = match self.post_json("chat/findMessages", &payload).await {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                tracing::warn!(status = %response.status(), remote_jid, "gateway rejected message listing");
                return Vec::new();
            }
            Err(err) => {
                tracing::warn!(error = %err, remote_jid, "failed to list gateway messages");
                return Vec::new();
            }
        };
        match response.json::<Value>().await {
            Ok(Value::Array(messages)) => messages,
            Ok(other) => other
                .get("messages")
                .and_then(|m| m.get("records").or(Some(m)))
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default(),
            Err(err) => {
                tracing::warn!(error = %err, remote_jid, "gateway messages were not json");
                Vec::new()
            }
        }
    }

    pub async fn send_text(&self, remote_jid: &str, text: &str) -> bool {
        let payload = json!({ "number": remote_jid, "text": text });
        match self.post_json("message/sendText", &payload).await {
            Ok(response) => {
                let ok = response.status().is_success();
                if !ok {
                    tracing::warn!(status = %response.status(), remote_jid, "gateway refused text message");
                }
                ok
            }
            Err(err) => {
                tracing::warn!(error = %err, remote_jid, "failed to send text through gateway");
                false
            }
        }
    }

    pub async fn list_contacts(&self) -> Vec<GatewayContact> {
        match self.get_json("chat/findContacts").await {
            Ok(value) => serde_json::from_value::<Vec<GatewayContact>>(value).unwrap_or_else(|err| {
                tracing::warn!(error = %err, "unexpected gateway contact payload");
                Vec::new()
            }),
            Err(err) => {
                tracing::warn!(error = %err, "failed to list gateway contacts");
                Vec::new()
            }
        }
    }

    /// Register `url` for realtime events. `events` defaults to
    /// [`DEFAULT_WEBHOOK_EVENTS`].
    pub async fn set_webhook(&self, url: &str, events: Option<&[String]>) -> bool {
        let events = match events {
            Some(events) if !events.is_empty() => json!(events),
            _ => json!(DEFAULT_WEBHOOK_EVENTS),
        };
        let payload = json!({ "webhook": { "url": url, "events": events } });
        match self.post_json("webhook/set", &payload).await {
            Ok(response) => response.status().is_success(),
            Err(err) => {
                tracing::warn!(error = %err, "failed to register gateway webhook");
                false
            }
        }
    }

    pub async fn instance_status(&self) -> Option<Value> {
        match self.get_json("instance/connect").await {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::warn!(error = %err, "failed to read gateway instance status");
                None
            }
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.instance_status()
            .await
            .as_ref()
            .is_some_and(instance_connected)
    }
}

/// `instance.state == "open"` in an `instance/connect` response.
pub fn instance_connected(status: &Value) -> bool {
    status
        .get("instance")
        .and_then(|instance| instance.get("state"))
        .and_then(Value::as_str)
        == Some("open")
}

fn text_of(message: Option<&Value>) -> Option<String> {
    let message = message?;
    message
        .get("conversation")
        .and_then(Value::as_str)
        .or_else(|| {
            message
                .get("extendedTextMessage")
                .and_then(|m| m.get("text"))
                .and_then(Value::as_str)
        })
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

fn unix_seconds(value: Option<&Value>) -> Option<DateTime<Utc>> {
    let value = value?;
    let secs = value
        .as_i64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse::<i64>().ok()))?;
    DateTime::from_timestamp(secs, 0)
}

/// List row for a gateway chat. Chats without an id are skipped.
pub fn chat_view(chat: &Value, now: DateTime<Utc>) -> Option<ConversationView> {
    let jid = chat.get("id").and_then(Value::as_str)?.to_string();
    let user = jid_user(&jid).to_string();
    let last = chat.get("lastMessage");
    let sent_at = unix_seconds(last.and_then(|m| m.get("messageTimestamp")));
    let name = chat
        .get("name")
        .and_then(Value::as_str)
        .filter(|n| !n.trim().is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| user.clone());
    Some(ConversationView {
        id: jid.clone(),
        name,
        avatar: chat
            .get("profilePictureUrl")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        last_message: text_of(last.and_then(|m| m.get("message")))
            .unwrap_or_else(|| "New conversation".to_string()),
        timestamp: sent_at.unwrap_or(now),
        timestamp_label: timestamp_label(sent_at, now),
        unread_count: chat.get("unreadCount").and_then(Value::as_u64).unwrap_or(0) as usize,
        channel: Channel::Whatsapp,
        status: Presence::Offline,
        phone: Some(user),
        remote_jid: Some(jid),
        queue_status: QueueStatus::Waiting,
        urgent: false,
        pinned: false,
        assignee_id: None,
    })
}

pub fn chat_views(chats: &[Value], now: DateTime<Utc>) -> Vec<ConversationView> {
    chats.iter().filter_map(|c| chat_view(c, now)).collect()
}

pub fn gateway_message(raw: &Value) -> Option<ChatMessage> {
    let key = raw.get("key")?;
    let id = key.get("id").and_then(Value::as_str)?.to_string();
    let from_me = key.get("fromMe").and_then(Value::as_bool).unwrap_or(false);
    Some(ChatMessage {
        id,
        conversation_id: key
            .get("remoteJid")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        content: text_of(raw.get("message")).unwrap_or_else(|| "Unsupported message".to_string()),
        sender_type: if from_me {
            SenderType::Agent
        } else {
            SenderType::Customer
        },
        sender_id: None,
        created_at: unix_seconds(raw.get("messageTimestamp")).unwrap_or_else(Utc::now),
        delivery_status: Some(
            raw.get("status")
                .and_then(Value::as_str)
                .unwrap_or("delivered")
                .to_string(),
        ),
    })
}

/// Gateway messages arrive newest first; the thread reads oldest first.
pub fn gateway_thread(raw: &[Value]) -> Vec<ChatMessage> {
    raw.iter().rev().filter_map(gateway_message).collect()
}

#[cfg(test)]
mod tests {
    use httpmock::Method::{GET, POST};
    use httpmock::MockServer;

    use super::*;

    fn client(server: &MockServer) -> EvolutionClient {
        EvolutionClient::new(EvolutionConfig {
            base_url: format!("{}/", server.base_url()),
            api_key: "secret-key".to_string(),
            instance: "main".to_string(),
        })
    }

    #[test]
    fn remote_jid_keeps_only_digits() {
        assert_eq!(
            whatsapp_remote_jid("+55 (11) 99999-8888").as_deref(),
            Some("5511999998888@s.whatsapp.net")
        );
        assert_eq!(whatsapp_remote_jid("n/a"), None);
        assert_eq!(jid_user("5511@s.whatsapp.net"), "5511");
    }

    #[test]
    fn only_open_instance_state_counts_as_connected() {
        assert!(instance_connected(
            &json!({ "instance": { "instanceName": "main", "state": "open" } })
        ));
        assert!(!instance_connected(&json!({ "instance": { "state": "connecting" } })));
        assert!(!instance_connected(&json!({ "state": "open" })));
    }

    #[tokio::test]
    async fn send_text_posts_number_and_text_with_api_key() {
        let server = MockServer::start_async().await;
        let sent = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/message/sendText/main")
                    .header("apikey", "secret-key")
                    .json_body(json!({ "number": "5511@s.whatsapp.net", "text": "Olá" }));
                then.status(201).json_body(json!({ "key": { "id": "x" } }));
            })
            .await;

        assert!(client(&server).send_text("5511@s.whatsapp.net", "Olá").await);
        sent.assert_async().await;
    }

    #[tokio::test]
    async fn send_text_reports_rejection_as_false() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/message/sendText/main");
                then.status(400).json_body(json!({ "error": "bad number" }));
            })
            .await;

        assert!(!client(&server).send_text("x", "hi").await);
    }

    #[tokio::test]
    async fn list_messages_sends_where_clause_and_default_limit() {
        let server = MockServer::start_async().await;
        let listed = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/chat/findMessages/main")
                    .json_body(json!({
                        "where": { "key": { "remoteJid": "5511@s.whatsapp.net" } },
                        "limit": 50
                    }));
                then.status(200).json_body(json!([
                    { "key": { "id": "m2", "remoteJid": "5511@s.whatsapp.net", "fromMe": true },
                      "message": { "extendedTextMessage": { "text": "second" } },
                      "messageTimestamp": 1700000100 },
                    { "key": { "id": "m1", "remoteJid": "5511@s.whatsapp.net", "fromMe": false },
                      "message": { "conversation": "first" },
                      "messageTimestamp": 1700000000,
                      "status": "read" }
                ]));
            })
            .await;

        let raw = client(&server)
            .list_messages("5511@s.whatsapp.net", None)
            .await;
        listed.assert_async().await;
        let thread = gateway_thread(&raw);
        assert_eq!(thread.len(), 2);
        assert_eq!(thread[0].content, "first");
        assert_eq!(thread[0].sender_type, SenderType::Customer);
        assert_eq!(thread[0].delivery_status.as_deref(), Some("read"));
        assert_eq!(thread[1].content, "second");
        assert_eq!(thread[1].sender_type, SenderType::Agent);
        assert_eq!(thread[1].delivery_status.as_deref(), Some("delivered"));
    }

    #[tokio::test]
    async fn failures_degrade_to_empty() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/chat/findChats/main");
                then.status(500);
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/chat/findContacts/main");
                then.status(503);
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/instance/connect/main");
                then.status(401);
            })
            .await;

        let client = client(&server);
        assert!(client.list_chats().await.is_empty());
        assert!(client.list_contacts().await.is_empty());
        assert!(client.instance_status().await.is_none());
        assert!(!client.is_connected().await);
    }

    #[tokio::test]
    async fn connected_only_when_instance_state_is_open() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/instance/connect/main")
                    .header("apikey", "secret-key");
                then.status(200)
                    .json_body(json!({ "instance": { "instanceName": "main", "state": "open" } }));
            })
            .await;

        assert!(client(&server).is_connected().await);
    }

    #[tokio::test]
    async fn webhook_registration_uses_default_events() {
        let server = MockServer::start_async().await;
        let registered = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/webhook/set/main")
                    .json_body(json!({
                        "webhook": {
                            "url": "https://console.example.com/hooks/evolution",
                            "events": DEFAULT_WEBHOOK_EVENTS,
                        }
                    }));
                then.status(200).json_body(json!({ "ok": true }));
            })
            .await;

        assert!(
            client(&server)
                .set_webhook("https://console.example.com/hooks/evolution", None)
                .await
        );
        registered.assert_async().await;
    }

    #[tokio::test]
    async fn contacts_deserialize_from_gateway_shape() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/chat/findContacts/main");
                then.status(200).json_body(json!([
                    { "id": "c1", "pushName": "Ana", "remoteJid": "5511@s.whatsapp.net" }
                ]));
            })
            .await;

        let contacts = client(&server).list_contacts().await;
        assert_eq!(contacts.len(), 1);
        assert_eq!(contacts[0].push_name.as_deref(), Some("Ana"));
        assert_eq!(contacts[0].profile_picture_url, None);
    }

    #[test]
    fn chat_view_falls_back_to_jid_user_and_placeholder() {
        let now = DateTime::from_timestamp(1_700_000_500, 0).unwrap();
        let bare = chat_view(&json!({ "id": "5511988887777@s.whatsapp.net" }), now).unwrap();
        assert_eq!(bare.name, "5511988887777");
        assert_eq!(bare.phone.as_deref(), Some("5511988887777"));
        assert_eq!(bare.last_message, "New conversation");
        assert_eq!(bare.timestamp_label, "now");
        assert_eq!(bare.status, Presence::Offline);

        let named = chat_view(
            &json!({
                "id": "5511@s.whatsapp.net",
                "name": "Ana",
                "unreadCount": 3,
                "lastMessage": {
                    "message": { "extendedTextMessage": { "text": "pode ser amanhã?" } },
                    "messageTimestamp": 1_700_000_000
                }
            }),
            now,
        )
        .unwrap();
        assert_eq!(named.name, "Ana");
        assert_eq!(named.last_message, "pode ser amanhã?");
        assert_eq!(named.unread_count, 3);
        assert_eq!(named.timestamp.timestamp(), 1_700_000_000);
        assert_eq!(named.remote_jid.as_deref(), Some("5511@s.whatsapp.net"));

        assert!(chat_view(&json!({ "name": "no id" }), now).is_none());
    }

    #[test]
    fn unsupported_payloads_get_placeholder_text() {
        let msg = gateway_message(&json!({
            "key": { "id": "img", "remoteJid": "5511@s.whatsapp.net", "fromMe": false },
            "message": { "imageMessage": {} },
            "messageTimestamp": "1700000000"
        }))
        .unwrap();
        assert_eq!(msg.content, "Unsupported message");
        assert_eq!(msg.created_at.timestamp(), 1_700_000_000);
    }
}
