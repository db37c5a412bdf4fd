use async_trait::async_trait;
use chrono::Utc;
use sqlx::{postgres::PgRow, PgPool, Row};
use uuid::Uuid;

use super::{non_empty, ConsoleStore};
use crate::error::StoreError;
use crate::types::{
    Channel, ChatMessage, Contact, ContactDraft, ContactIdentifier, Conversation,
    ConversationPatch, ConversationStatus, ConversationSummary, Inbox, NewConversation,
    NewMessage, SenderType,
};

const CONTACT_COLUMNS: &str = "id, account_id, first_name, last_name, phone, email, city, country, \
     biography, company, cnpj, instagram, facebook, linkedin, other_social, created_at";

const CONVERSATION_COLUMNS: &str = "id, account_id, contact_id, inbox_id, status, assignee_id, \
     urgent, pinned, closed_at, created_at, updated_at";

const SUMMARY_SELECT: &str = r#"
    SELECT c.id, c.account_id, c.contact_id, c.inbox_id, c.status, c.assignee_id,
           c.urgent, c.pinned, c.closed_at, c.created_at, c.updated_at,
           i.channel_type,
           ct.id AS ct_id, ct.account_id AS ct_account_id, ct.first_name AS ct_first_name,
           ct.last_name AS ct_last_name, ct.phone AS ct_phone, ct.email AS ct_email,
           ct.city AS ct_city, ct.country AS ct_country, ct.biography AS ct_biography,
           ct.company AS ct_company, ct.cnpj AS ct_cnpj, ct.instagram AS ct_instagram,
           ct.facebook AS ct_facebook, ct.linkedin AS ct_linkedin,
           ct.other_social AS ct_other_social, ct.created_at AS ct_created_at,
           lm.id AS lm_id, lm.content AS lm_content, lm.sender_type AS lm_sender_type,
           lm.sender_id AS lm_sender_id, lm.created_at AS lm_created_at,
           (SELECT COUNT(1) FROM messages u
             WHERE u.conversation_id = c.id
               AND u.sender_type = 'customer'
               AND u.created_at > COALESCE(
                   (SELECT MAX(a.created_at) FROM messages a
                     WHERE a.conversation_id = c.id AND a.sender_type = 'agent'),
                   '-infinity'::timestamptz)) AS unread_count
    FROM conversations c
    JOIN inboxes i ON i.id = c.inbox_id
    LEFT JOIN contacts ct ON ct.id = c.contact_id
    LEFT JOIN LATERAL (
        SELECT id, content, sender_type, sender_id, created_at
        FROM messages
        WHERE conversation_id = c.id
        ORDER BY created_at DESC
        LIMIT 1
    ) lm ON true
    WHERE c.account_id = $1
"#;

/// Postgres-backed store. Schema lives in `migrations/`.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn decode_status(raw: &str) -> Result<ConversationStatus, StoreError> {
    ConversationStatus::parse(raw)
        .ok_or_else(|| StoreError::Decode(format!("unknown conversation status {raw:?}")))
}

fn decode_channel(raw: &str) -> Result<Channel, StoreError> {
    Channel::parse(raw).ok_or_else(|| StoreError::Decode(format!("unknown channel type {raw:?}")))
}

fn decode_sender(raw: &str) -> Result<SenderType, StoreError> {
    SenderType::parse(raw).ok_or_else(|| StoreError::Decode(format!("unknown sender type {raw:?}")))
}

fn parse_contact_row(row: &PgRow, prefix: &str) -> Result<Contact, StoreError> {
    let col = |name: &str| format!("{prefix}{name}");
    Ok(Contact {
        id: row.try_get(col("id").as_str())?,
        account_id: row.try_get(col("account_id").as_str())?,
        first_name: row.try_get(col("first_name").as_str())?,
        last_name: row.try_get(col("last_name").as_str())?,
        phone: row.try_get(col("phone").as_str())?,
        email: row.try_get(col("email").as_str())?,
        city: row.try_get(col("city").as_str())?,
        country: row.try_get(col("country").as_str())?,
        biography: row.try_get(col("biography").as_str())?,
        company: row.try_get(col("company").as_str())?,
        cnpj: row.try_get(col("cnpj").as_str())?,
        instagram: row.try_get(col("instagram").as_str())?,
        facebook: row.try_get(col("facebook").as_str())?,
        linkedin: row.try_get(col("linkedin").as_str())?,
        other_social: row.try_get(col("other_social").as_str())?,
        created_at: row.try_get(col("created_at").as_str())?,
    })
}

fn parse_inbox_row(row: &PgRow) -> Result<Inbox, StoreError> {
    Ok(Inbox {
        id: row.try_get("id")?,
        account_id: row.try_get("account_id")?,
        name: row.try_get("name")?,
        channel: decode_channel(&row.try_get::<String, _>("channel_type")?)?,
        created_at: row.try_get("created_at")?,
    })
}

fn parse_conversation_row(row: &PgRow) -> Result<Conversation, StoreError> {
    Ok(Conversation {
        id: row.try_get("id")?,
        account_id: row.try_get("account_id")?,
        contact_id: row.try_get("contact_id")?,
        inbox_id: row.try_get("inbox_id")?,
        status: decode_status(&row.try_get::<String, _>("status")?)?,
        assignee_id: row.try_get("assignee_id")?,
        urgent: row.try_get("urgent")?,
        pinned: row.try_get("pinned")?,
        closed_at: row.try_get("closed_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn parse_message_row(row: &PgRow) -> Result<ChatMessage, StoreError> {
    Ok(ChatMessage {
        id: row.try_get("id")?,
        conversation_id: row.try_get("conversation_id")?,
        content: row.try_get("content")?,
        sender_type: decode_sender(&row.try_get::<String, _>("sender_type")?)?,
        sender_id: row.try_get("sender_id")?,
        created_at: row.try_get("created_at")?,
        delivery_status: None,
    })
}

fn parse_summary_row(row: &PgRow) -> Result<ConversationSummary, StoreError> {
    let conversation = parse_conversation_row(row)?;
    let channel = decode_channel(&row.try_get::<String, _>("channel_type")?)?;
    let contact = match row.try_get::<Option<String>, _>("ct_id")? {
        Some(_) => Some(parse_contact_row(row, "ct_")?),
        None => None,
    };
    let last_message = match row.try_get::<Option<String>, _>("lm_id")? {
        Some(id) => Some(ChatMessage {
            id,
            conversation_id: conversation.id.clone(),
            content: row.try_get("lm_content")?,
            sender_type: decode_sender(&row.try_get::<String, _>("lm_sender_type")?)?,
            sender_id: row.try_get("lm_sender_id")?,
            created_at: row.try_get("lm_created_at")?,
            delivery_status: None,
        }),
        None => None,
    };
    let unread_count = row.try_get::<i64, _>("unread_count")?.max(0) as usize;
    Ok(ConversationSummary {
        conversation,
        channel,
        contact,
        last_message,
        unread_count,
    })
}

#[async_trait]
impl ConsoleStore for PgStore {
    async fn find_contact(
        &self,
        account_id: &str,
        identifier: &ContactIdentifier,
    ) -> Result<Option<Contact>, StoreError> {
        let sql = format!(
            "SELECT {CONTACT_COLUMNS} FROM contacts WHERE account_id = $1 AND {} = $2 LIMIT 1",
            identifier.field()
        );
        let row = sqlx::query(&sql)
            .bind(account_id)
            .bind(identifier.value())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(|r| parse_contact_row(r, "")).transpose()
    }

    async fn find_contact_by_id(
        &self,
        account_id: &str,
        contact_id: &str,
    ) -> Result<Option<Contact>, StoreError> {
        let sql = format!("SELECT {CONTACT_COLUMNS} FROM contacts WHERE account_id = $1 AND id = $2");
        let row = sqlx::query(&sql)
            .bind(account_id)
            .bind(contact_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(|r| parse_contact_row(r, "")).transpose()
    }

    async fn insert_contact(
        &self,
        account_id: &str,
        draft: &ContactDraft,
    ) -> Result<Contact, StoreError> {
        let sql = format!(
            "INSERT INTO contacts ({CONTACT_COLUMNS}) \
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16) \
             RETURNING {CONTACT_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(Uuid::new_v4().to_string())
            .bind(account_id)
            .bind(draft.first_name.trim())
            .bind(non_empty(&draft.last_name))
            .bind(non_empty(&draft.phone))
            .bind(non_empty(&draft.email))
            .bind(non_empty(&draft.city))
            .bind(non_empty(&draft.country))
            .bind(non_empty(&draft.biography))
            .bind(non_empty(&draft.company))
            .bind(non_empty(&draft.cnpj))
            .bind(non_empty(&draft.instagram))
            .bind(non_empty(&draft.facebook))
            .bind(non_empty(&draft.linkedin))
            .bind(non_empty(&draft.other_social))
            .bind(Utc::now())
            .fetch_one(&self.pool)
            .await?;
        parse_contact_row(&row, "")
    }

    async fn update_contact(
        &self,
        account_id: &str,
        contact_id: &str,
        draft: &ContactDraft,
    ) -> Result<Contact, StoreError> {
        let sql = format!(
            "UPDATE contacts SET first_name = $1, last_name = $2, phone = $3, email = $4, \
             city = $5, country = $6, biography = $7, company = $8, cnpj = $9, \
             instagram = $10, facebook = $11, linkedin = $12, other_social = $13 \
             WHERE id = $14 AND account_id = $15 \
             RETURNING {CONTACT_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(draft.first_name.trim())
            .bind(non_empty(&draft.last_name))
            .bind(non_empty(&draft.phone))
            .bind(non_empty(&draft.email))
            .bind(non_empty(&draft.city))
            .bind(non_empty(&draft.country))
            .bind(non_empty(&draft.biography))
            .bind(non_empty(&draft.company))
            .bind(non_empty(&draft.cnpj))
            .bind(non_empty(&draft.instagram))
            .bind(non_empty(&draft.facebook))
            .bind(non_empty(&draft.linkedin))
            .bind(non_empty(&draft.other_social))
            .bind(contact_id)
            .bind(account_id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Err(StoreError::RowMissing {
                table: "contacts",
                id: contact_id.to_string(),
            });
        };
        parse_contact_row(&row, "")
    }

    async fn latest_inbox(
        &self,
        account_id: &str,
        channel: Channel,
    ) -> Result<Option<Inbox>, StoreError> {
        let row = sqlx::query(
            "SELECT id, account_id, name, channel_type, created_at FROM inboxes \
             WHERE account_id = $1 AND channel_type = $2 \
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(account_id)
        .bind(channel.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(parse_inbox_row).transpose()
    }

    async fn find_conversation(
        &self,
        account_id: &str,
        conversation_id: &str,
    ) -> Result<Option<Conversation>, StoreError> {
        let sql = format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE account_id = $1 AND id = $2"
        );
        let row = sqlx::query(&sql)
            .bind(account_id)
            .bind(conversation_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(parse_conversation_row).transpose()
    }

    async fn find_conversation_for(
        &self,
        account_id: &str,
        contact_id: &str,
        inbox_id: &str,
    ) -> Result<Option<Conversation>, StoreError> {
        let sql = format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations \
             WHERE account_id = $1 AND contact_id = $2 AND inbox_id = $3 \
             ORDER BY updated_at DESC LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .bind(account_id)
            .bind(contact_id)
            .bind(inbox_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(parse_conversation_row).transpose()
    }

    async fn find_active_conversation(
        &self,
        account_id: &str,
        contact_id: &str,
        channel: Channel,
    ) -> Result<Option<Conversation>, StoreError> {
        let row = sqlx::query(
            "SELECT c.id, c.account_id, c.contact_id, c.inbox_id, c.status, c.assignee_id, \
                    c.urgent, c.pinned, c.closed_at, c.created_at, c.updated_at \
             FROM conversations c \
             JOIN inboxes i ON i.id = c.inbox_id \
             WHERE c.account_id = $1 \
               AND c.contact_id = $2 \
               AND i.channel_type = $3 \
               AND c.status IN ('open', 'assigned') \
             ORDER BY c.updated_at DESC LIMIT 1",
        )
        .bind(account_id)
        .bind(contact_id)
        .bind(channel.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(parse_conversation_row).transpose()
    }

    async fn insert_conversation(
        &self,
        account_id: &str,
        new: &NewConversation,
    ) -> Result<Conversation, StoreError> {
        let now = Utc::now();
        let sql = format!(
            "INSERT INTO conversations ({CONVERSATION_COLUMNS}) \
             VALUES ($1,$2,$3,$4,$5,$6,false,false,NULL,$7,$7) \
             RETURNING {CONVERSATION_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(Uuid::new_v4().to_string())
            .bind(account_id)
            .bind(&new.contact_id)
            .bind(&new.inbox_id)
            .bind(new.status.as_str())
            .bind(&new.assignee_id)
            .bind(now)
            .fetch_one(&self.pool)
            .await?;
        parse_conversation_row(&row)
    }

    async fn update_conversation(
        &self,
        account_id: &str,
        conversation_id: &str,
        patch: &ConversationPatch,
    ) -> Result<Conversation, StoreError> {
        // Flags decide whether the nullable columns are written, so a patch can
        // both leave them alone and clear them.
        let sql = format!(
            "UPDATE conversations SET \
                 status = COALESCE($1, status), \
                 assignee_id = CASE WHEN $2 THEN $3 ELSE assignee_id END, \
                 urgent = COALESCE($4, urgent), \
                 pinned = COALESCE($5, pinned), \
                 closed_at = CASE WHEN $6 THEN $7 ELSE closed_at END, \
                 updated_at = $8 \
             WHERE id = $9 AND account_id = $10 \
             RETURNING {CONVERSATION_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(patch.status.map(ConversationStatus::as_str))
            .bind(patch.assignee_id.is_some())
            .bind(patch.assignee_id.clone().flatten())
            .bind(patch.urgent)
            .bind(patch.pinned)
            .bind(patch.closed_at.is_some())
            .bind(patch.closed_at.flatten())
            .bind(Utc::now())
            .bind(conversation_id)
            .bind(account_id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Err(StoreError::RowMissing {
                table: "conversations",
                id: conversation_id.to_string(),
            });
        };
        parse_conversation_row(&row)
    }

    async fn conversation_summaries(
        &self,
        account_id: &str,
    ) -> Result<Vec<ConversationSummary>, StoreError> {
        let sql = format!("{SUMMARY_SELECT} ORDER BY c.updated_at DESC");
        let rows = sqlx::query(&sql)
            .bind(account_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(parse_summary_row).collect()
    }

    async fn conversation_summary(
        &self,
        account_id: &str,
        conversation_id: &str,
    ) -> Result<Option<ConversationSummary>, StoreError> {
        let sql = format!("{SUMMARY_SELECT} AND c.id = $2");
        let row = sqlx::query(&sql)
            .bind(account_id)
            .bind(conversation_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(parse_summary_row).transpose()
    }

    async fn list_messages(
        &self,
        account_id: &str,
        conversation_id: &str,
    ) -> Result<Vec<ChatMessage>, StoreError> {
        let rows = sqlx::query(
            "SELECT m.id, m.conversation_id, m.content, m.sender_type, m.sender_id, m.created_at \
             FROM messages m \
             JOIN conversations c ON c.id = m.conversation_id \
             WHERE c.account_id = $1 AND m.conversation_id = $2 \
             ORDER BY m.created_at ASC",
        )
        .bind(account_id)
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(parse_message_row).collect()
    }

    async fn insert_message(
        &self,
        account_id: &str,
        new: &NewMessage,
    ) -> Result<ChatMessage, StoreError> {
        let now = Utc::now();
        let row = sqlx::query(
            "INSERT INTO messages (id, conversation_id, content, sender_type, sender_id, created_at) \
             SELECT $1, c.id, $3, $4, $5, $6 FROM conversations c \
             WHERE c.id = $2 AND c.account_id = $7 \
             RETURNING id, conversation_id, content, sender_type, sender_id, created_at",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&new.conversation_id)
        .bind(&new.content)
        .bind(new.sender_type.as_str())
        .bind(&new.sender_id)
        .bind(now)
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            return Err(StoreError::RowMissing {
                table: "conversations",
                id: new.conversation_id.clone(),
            });
        };
        sqlx::query("UPDATE conversations SET updated_at = $1 WHERE id = $2")
            .bind(now)
            .bind(&new.conversation_id)
            .execute(&self.pool)
            .await?;
        parse_message_row(&row)
    }
}
