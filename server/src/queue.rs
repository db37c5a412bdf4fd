//! Conversation list: closed-filtering, pin/urgency/recency ordering, queue
//! tabs and the tab counters.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};

use crate::gateway::whatsapp_remote_jid;
use crate::types::{
    Channel, ConversationSummary, ConversationView, ListFilters, Presence, QueueCounts,
    QueueStatus, QueueTab,
};

const EMPTY_THREAD_PREVIEW: &str = "New conversation";

/// Filter and order `views` for display. The input is left untouched.
///
/// Resolved conversations are dropped unless `show_closed`. Pinned ones
/// always lead; with `urgent_first` urgent ones lead the rest of each pin
/// partition; ties fall back to recency (newest first unless
/// `sort_oldest_first`).
pub fn arrange_conversations(
    views: &[ConversationView],
    filters: &ListFilters,
) -> Vec<ConversationView> {
    let mut list = views
        .iter()
        .filter(|v| filters.show_closed || v.queue_status != QueueStatus::Resolved)
        .cloned()
        .collect::<Vec<_>>();
    list.sort_by(|a, b| compare_views(a, b, filters));
    list
}

fn compare_views(a: &ConversationView, b: &ConversationView, filters: &ListFilters) -> Ordering {
    b.pinned
        .cmp(&a.pinned)
        .then_with(|| {
            if filters.urgent_first {
                b.urgent.cmp(&a.urgent)
            } else {
                Ordering::Equal
            }
        })
        .then_with(|| {
            if filters.sort_oldest_first {
                a.timestamp.cmp(&b.timestamp)
            } else {
                b.timestamp.cmp(&a.timestamp)
            }
        })
}

/// Keep the views that belong on `tab`. Composes with
/// [`arrange_conversations`] in either order.
pub fn filter_by_tab(views: &[ConversationView], tab: QueueTab) -> Vec<ConversationView> {
    views
        .iter()
        .filter(|v| match tab {
            QueueTab::Waiting => v.queue_status == QueueStatus::Waiting,
            QueueTab::Assigned => v.queue_status == QueueStatus::Assigned,
            QueueTab::All => true,
        })
        .cloned()
        .collect()
}

/// Tab badge numbers. `all` counts every conversation that is not resolved.
pub fn queue_counts(views: &[ConversationView]) -> QueueCounts {
    views
        .iter()
        .fold(QueueCounts::default(), |mut counts, v| {
            match v.queue_status {
                QueueStatus::Waiting => counts.waiting += 1,
                QueueStatus::Assigned => counts.assigned += 1,
                QueueStatus::Resolved => return counts,
            }
            counts.all += 1;
            counts
        })
}

/// `HH:MM` for instants on the same UTC day as `now`, `DD/MM` otherwise.
pub fn timestamp_label(timestamp: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    match timestamp {
        None => "now".to_string(),
        Some(ts) if ts.date_naive() == now.date_naive() => ts.format("%H:%M").to_string(),
        Some(ts) => ts.format("%d/%m").to_string(),
    }
}

/// Build the list row for a stored conversation.
pub fn view_from_summary(summary: &ConversationSummary, now: DateTime<Utc>) -> ConversationView {
    let conversation = &summary.conversation;
    let contact = summary.contact.as_ref();
    let name = contact
        .map(|c| c.display_name())
        .filter(|n| !n.trim().is_empty())
        .or_else(|| contact.and_then(|c| c.phone.clone().or_else(|| c.email.clone())))
        .unwrap_or_else(|| "Unknown contact".to_string());
    let phone = contact.and_then(|c| c.phone.clone());
    let remote_jid = match summary.channel {
        Channel::Whatsapp => phone.as_deref().and_then(whatsapp_remote_jid),
        Channel::Instagram => None,
    };
    let timestamp = summary
        .last_message
        .as_ref()
        .map(|m| m.created_at)
        .unwrap_or(conversation.created_at);
    ConversationView {
        id: conversation.id.clone(),
        name,
        avatar: String::new(),
        last_message: summary
            .last_message
            .as_ref()
            .map(|m| m.content.clone())
            .unwrap_or_else(|| EMPTY_THREAD_PREVIEW.to_string()),
        timestamp,
        timestamp_label: timestamp_label(Some(timestamp), now),
        unread_count: summary.unread_count,
        channel: summary.channel,
        status: Presence::Offline,
        phone,
        remote_jid,
        queue_status: conversation.status.queue_status(),
        urgent: conversation.urgent,
        pinned: conversation.pinned,
        assignee_id: conversation.assignee_id.clone(),
    }
}

/// Caller-owned conversation list. Nothing here is shared or global; the
/// HTTP layer builds one per request from the store.
#[derive(Debug, Clone, Default)]
pub struct ConversationBoard {
    views: Vec<ConversationView>,
}

impl ConversationBoard {
    pub fn new(views: Vec<ConversationView>) -> Self {
        Self { views }
    }

    pub fn from_summaries(summaries: &[ConversationSummary], now: DateTime<Utc>) -> Self {
        Self::new(
            summaries
                .iter()
                .map(|s| view_from_summary(s, now))
                .collect(),
        )
    }

    pub fn visible(&self, tab: QueueTab, filters: &ListFilters) -> Vec<ConversationView> {
        arrange_conversations(&filter_by_tab(&self.views, tab), filters)
    }

    pub fn counts(&self) -> QueueCounts {
        queue_counts(&self.views)
    }

    pub fn get(&self, id: &str) -> Option<&ConversationView> {
        self.views.iter().find(|v| v.id == id)
    }

    /// Put a freshly started or resumed conversation at the head, dropping
    /// any stale copy of it.
    pub fn upsert_front(&mut self, view: ConversationView) {
        self.views.retain(|v| v.id != view.id);
        self.views.insert(0, view);
    }

    /// Swap in a patched view. Returns false when the id is not on the board.
    pub fn replace(&mut self, view: ConversationView) -> bool {
        match self.views.iter_mut().find(|v| v.id == view.id) {
            Some(slot) => {
                *slot = view;
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.views.len()
    }

    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::types::{ChatMessage, Contact, Conversation, ConversationStatus, SenderType};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn view(id: &str, pinned: bool, urgent: bool, ts: i64, status: QueueStatus) -> ConversationView {
        ConversationView {
            id: id.to_string(),
            name: format!("Customer {id}"),
            avatar: String::new(),
            last_message: "hi".to_string(),
            timestamp: at(ts),
            timestamp_label: String::new(),
            unread_count: 0,
            channel: Channel::Whatsapp,
            status: Presence::Offline,
            phone: None,
            remote_jid: None,
            queue_status: status,
            urgent,
            pinned,
            assignee_id: None,
        }
    }

    fn ids(views: &[ConversationView]) -> Vec<&str> {
        views.iter().map(|v| v.id.as_str()).collect()
    }

    fn mixed() -> Vec<ConversationView> {
        vec![
            view("a", false, false, 40, QueueStatus::Waiting),
            view("b", false, true, 10, QueueStatus::Assigned),
            view("c", true, false, 20, QueueStatus::Assigned),
            view("d", false, false, 50, QueueStatus::Resolved),
            view("e", true, true, 5, QueueStatus::Waiting),
            view("f", false, true, 30, QueueStatus::Waiting),
        ]
    }

    #[test]
    fn pinned_lead_and_resolved_hidden_with_urgent_first() {
        let filters = ListFilters {
            show_closed: false,
            sort_oldest_first: false,
            urgent_first: true,
        };
        let input = vec![
            view("1", false, false, 10, QueueStatus::Waiting),
            view("2", true, false, 5, QueueStatus::Waiting),
            view("3", false, true, 1, QueueStatus::Resolved),
        ];
        let out = arrange_conversations(&input, &filters);
        assert_eq!(ids(&out), vec!["2", "1"]);
        assert_eq!(input.len(), 3);
    }

    #[test]
    fn show_closed_restores_resolved_in_sort_position() {
        let hidden = arrange_conversations(&mixed(), &ListFilters::default());
        assert!(hidden.iter().all(|v| v.queue_status != QueueStatus::Resolved));
        assert_eq!(ids(&hidden), vec!["c", "e", "a", "f", "b"]);

        let shown = arrange_conversations(
            &mixed(),
            &ListFilters {
                show_closed: true,
                ..ListFilters::default()
            },
        );
        assert_eq!(ids(&shown), vec!["c", "e", "d", "a", "f", "b"]);
    }

    #[test]
    fn urgent_first_orders_within_pin_partitions() {
        let out = arrange_conversations(
            &mixed(),
            &ListFilters {
                urgent_first: true,
                ..ListFilters::default()
            },
        );
        assert_eq!(ids(&out), vec!["e", "c", "f", "b", "a"]);
    }

    #[test]
    fn oldest_first_flips_recency() {
        let out = arrange_conversations(
            &mixed(),
            &ListFilters {
                sort_oldest_first: true,
                ..ListFilters::default()
            },
        );
        assert_eq!(ids(&out), vec!["e", "c", "b", "f", "a"]);
    }

    #[test]
    fn arranging_twice_is_stable() {
        for filters in [
            ListFilters::default(),
            ListFilters {
                show_closed: true,
                sort_oldest_first: true,
                urgent_first: true,
            },
        ] {
            let once = arrange_conversations(&mixed(), &filters);
            let twice = arrange_conversations(&once, &filters);
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn all_pinned_falls_back_to_urgency_and_time() {
        let input = vec![
            view("x", true, false, 3, QueueStatus::Waiting),
            view("y", true, true, 1, QueueStatus::Waiting),
            view("z", true, false, 9, QueueStatus::Waiting),
        ];
        let out = arrange_conversations(
            &input,
            &ListFilters {
                urgent_first: true,
                ..ListFilters::default()
            },
        );
        assert_eq!(ids(&out), vec!["y", "z", "x"]);
        assert!(arrange_conversations(&[], &ListFilters::default()).is_empty());
    }

    #[test]
    fn tab_filter_composes_with_arrangement() {
        let filters = ListFilters {
            urgent_first: true,
            ..ListFilters::default()
        };
        let tab_then_sort = arrange_conversations(&filter_by_tab(&mixed(), QueueTab::Waiting), &filters);
        let sort_then_tab = filter_by_tab(&arrange_conversations(&mixed(), &filters), QueueTab::Waiting);
        assert_eq!(tab_then_sort, sort_then_tab);
        assert_eq!(ids(&tab_then_sort), vec!["e", "f", "a"]);
    }

    #[test]
    fn counts_skip_resolved_in_all() {
        assert_eq!(
            queue_counts(&mixed()),
            QueueCounts {
                waiting: 3,
                assigned: 2,
                all: 5,
            }
        );
    }

    #[test]
    fn labels_use_clock_for_today_and_date_otherwise() {
        let now = Utc.with_ymd_and_hms(2024, 3, 9, 15, 0, 0).unwrap();
        let earlier = Utc.with_ymd_and_hms(2024, 3, 9, 8, 5, 0).unwrap();
        let yesterday = Utc.with_ymd_and_hms(2024, 3, 8, 23, 59, 0).unwrap();
        assert_eq!(timestamp_label(Some(earlier), now), "08:05");
        assert_eq!(timestamp_label(Some(yesterday), now), "08/03");
        assert_eq!(timestamp_label(None, now), "now");
    }

    #[test]
    fn summary_view_derives_jid_and_preview() {
        let now = at(100);
        let summary = ConversationSummary {
            conversation: Conversation {
                id: "conv-1".into(),
                account_id: "acct".into(),
                contact_id: "ct-1".into(),
                inbox_id: "in-1".into(),
                status: ConversationStatus::Open,
                assignee_id: None,
                urgent: true,
                pinned: false,
                closed_at: None,
                created_at: at(1),
                updated_at: at(2),
            },
            channel: Channel::Whatsapp,
            contact: Some(Contact {
                id: "ct-1".into(),
                account_id: "acct".into(),
                first_name: "Ana".into(),
                last_name: Some("Lima".into()),
                phone: Some("+55 11 99999-8888".into()),
                email: None,
                city: None,
                country: None,
                biography: None,
                company: None,
                cnpj: None,
                instagram: None,
                facebook: None,
                linkedin: None,
                other_social: None,
                created_at: at(0),
            }),
            last_message: None,
            unread_count: 0,
        };
        let empty = view_from_summary(&summary, now);
        assert_eq!(empty.name, "Ana Lima");
        assert_eq!(empty.last_message, "New conversation");
        assert_eq!(empty.timestamp, at(1));
        assert_eq!(empty.queue_status, QueueStatus::Waiting);
        assert_eq!(empty.remote_jid.as_deref(), Some("5511999998888@s.whatsapp.net"));
        assert!(empty.urgent);

        let mut with_message = summary.clone();
        with_message.last_message = Some(ChatMessage {
            id: "m1".into(),
            conversation_id: "conv-1".into(),
            content: "Olá".into(),
            sender_type: SenderType::Customer,
            sender_id: None,
            created_at: at(50),
            delivery_status: None,
        });
        let view = view_from_summary(&with_message, now);
        assert_eq!(view.last_message, "Olá");
        assert_eq!(view.timestamp, at(50));
    }

    #[test]
    fn board_upserts_and_replaces_by_id() {
        let mut board = ConversationBoard::new(mixed());
        let mut fresh = view("a", false, false, 99, QueueStatus::Assigned);
        board.upsert_front(fresh.clone());
        assert_eq!(board.len(), 6);
        assert_eq!(board.get("a").map(|v| v.queue_status), Some(QueueStatus::Assigned));
        assert_eq!(board.counts().assigned, 3);

        fresh.pinned = true;
        assert!(board.replace(fresh));
        assert!(board.get("a").unwrap().pinned);
        assert!(!board.replace(view("missing", false, false, 0, QueueStatus::Waiting)));
        assert_eq!(
            ids(&board.visible(QueueTab::Assigned, &ListFilters::default())),
            vec!["a", "c", "b"]
        );
    }
}
