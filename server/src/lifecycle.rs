//! Agent actions that move a conversation between queues or decorate it.

use chrono::Utc;

use crate::error::{ConsoleError, StoreError};
use crate::store::{ConsoleStore, ACTIVE_CONVERSATION_CONSTRAINT};
use crate::types::{ConversationPatch, ConversationStatus, ConversationView, QueueStatus};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Take a waiting conversation.
    Assume { agent_id: String },
    /// Hand an assigned conversation back to the waiting queue.
    SendToQueue,
    Finish,
    /// Reopen a resolved conversation, straight to `agent_id` when given.
    Reopen { agent_id: Option<String> },
    ToggleUrgent,
    TogglePin,
    Transfer { user_id: String },
}

impl Transition {
    pub fn name(&self) -> &'static str {
        match self {
            Transition::Assume { .. } => "assume",
            Transition::SendToQueue => "queue",
            Transition::Finish => "finish",
            Transition::Reopen { .. } => "reopen",
            Transition::ToggleUrgent => "urgent",
            Transition::TogglePin => "pin",
            Transition::Transfer { .. } => "transfer",
        }
    }

    fn allowed_from(&self) -> &'static [QueueStatus] {
        match self {
            Transition::Assume { .. } => &[QueueStatus::Waiting],
            Transition::SendToQueue
            | Transition::Finish
            | Transition::ToggleUrgent
            | Transition::TogglePin => &[QueueStatus::Assigned],
            Transition::Reopen { .. } => &[QueueStatus::Resolved],
            Transition::Transfer { .. } => &[QueueStatus::Waiting, QueueStatus::Assigned],
        }
    }
}

fn status_word(status: QueueStatus) -> &'static str {
    match status {
        QueueStatus::Waiting => "waiting",
        QueueStatus::Assigned => "assigned",
        QueueStatus::Resolved => "resolved",
    }
}

fn required_id(value: &str, what: &str) -> Result<String, ConsoleError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ConsoleError::validation(format!("{what} is required")));
    }
    Ok(trimmed.to_string())
}

/// Check the precondition for `transition` against `view` and build the
/// row change it implies. Nothing is written.
pub fn plan(
    view: &ConversationView,
    transition: &Transition,
) -> Result<ConversationPatch, ConsoleError> {
    if !transition.allowed_from().contains(&view.queue_status) {
        return Err(ConsoleError::validation(format!(
            "cannot {} a {} conversation",
            transition.name(),
            status_word(view.queue_status)
        )));
    }
    let patch = match transition {
        Transition::Assume { agent_id } => ConversationPatch {
            status: Some(ConversationStatus::Assigned),
            assignee_id: Some(Some(required_id(agent_id, "agent id")?)),
            ..ConversationPatch::default()
        },
        Transition::SendToQueue => ConversationPatch {
            status: Some(ConversationStatus::Open),
            assignee_id: Some(None),
            ..ConversationPatch::default()
        },
        Transition::Finish => ConversationPatch {
            status: Some(ConversationStatus::Resolved),
            closed_at: Some(Some(Utc::now())),
            ..ConversationPatch::default()
        },
        Transition::Reopen { agent_id } => {
            let agent = agent_id
                .as_deref()
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(str::to_string);
            ConversationPatch {
                status: Some(if agent.is_some() {
                    ConversationStatus::Assigned
                } else {
                    ConversationStatus::Open
                }),
                assignee_id: Some(agent),
                closed_at: Some(None),
                ..ConversationPatch::default()
            }
        }
        Transition::ToggleUrgent => ConversationPatch {
            urgent: Some(!view.urgent),
            ..ConversationPatch::default()
        },
        Transition::TogglePin => ConversationPatch {
            pinned: Some(!view.pinned),
            ..ConversationPatch::default()
        },
        Transition::Transfer { user_id } => ConversationPatch {
            assignee_id: Some(Some(required_id(user_id, "target user")?)),
            ..ConversationPatch::default()
        },
    };
    Ok(patch)
}

/// Persist `transition` and, once the store confirms, patch `view` from the
/// written row. On any error `view` is left as it was.
pub async fn apply_transition(
    store: &dyn ConsoleStore,
    account_id: &str,
    view: &mut ConversationView,
    transition: &Transition,
) -> Result<(), ConsoleError> {
    let patch = plan(view, transition)?;
    let row = store
        .update_conversation(account_id, &view.id, &patch)
        .await
        .map_err(|err| match err {
            StoreError::UniqueViolation { constraint }
                if constraint == ACTIVE_CONVERSATION_CONSTRAINT =>
            {
                ConsoleError::conflict("active conversation exists", Some(view.name.clone()))
            }
            other => other.into(),
        })?;
    tracing::info!(
        conversation_id = %row.id,
        action = transition.name(),
        status = row.status.as_str(),
        "conversation transition applied"
    );
    view.queue_status = row.status.queue_status();
    view.urgent = row.urgent;
    view.pinned = row.pinned;
    view.assignee_id = row.assignee_id;
    Ok(())
}
