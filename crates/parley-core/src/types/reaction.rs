//! Message reactions.

use super::{MessageId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Longest accepted reaction kind, in characters.
pub const MAX_REACTION_KIND_LEN: usize = 32;

/// One reactor's current reaction on a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reaction {
    pub message_id: MessageId,
    pub user_id: UserId,
    pub user_name: String,
    pub kind: String,
    pub created_at: DateTime<Utc>,
}

/// Result of the atomic toggle-or-replace primitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReactionOutcome {
    /// No previous reaction from this user; the kind was inserted.
    Added,
    /// A different kind was replaced.
    Replaced { previous: String },
    /// The same kind was toggled off.
    Removed,
}

/// Count of one reaction kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionCount {
    pub kind: String,
    pub count: u32,
    pub reactor_names: Vec<String>,
}

/// Full current reaction state of a message, as seen by one actor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionSummary {
    pub message_id: MessageId,
    pub reactions: Vec<ReactionCount>,
    pub actor_id: UserId,
    pub self_reacted: bool,
}

impl ReactionSummary {
    /// Group rows by kind, most popular first, ties broken by kind.
    pub fn from_reactions(message_id: MessageId, actor_id: UserId, rows: &[Reaction]) -> Self {
        let mut by_kind: BTreeMap<&str, Vec<&Reaction>> = BTreeMap::new();
        for row in rows {
            by_kind.entry(row.kind.as_str()).or_default().push(row);
        }

        let mut reactions: Vec<ReactionCount> = by_kind
            .into_iter()
            .map(|(kind, mut rows)| {
                rows.sort_by_key(|r| r.created_at);
                ReactionCount {
                    kind: kind.to_string(),
                    count: rows.len() as u32,
                    reactor_names: rows.iter().map(|r| r.user_name.clone()).collect(),
                }
            })
            .collect();
        reactions.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.kind.cmp(&b.kind)));

        Self {
            message_id,
            reactions,
            actor_id,
            self_reacted: rows.iter().any(|r| r.user_id == actor_id),
        }
    }

    /// Total number of reaction rows.
    pub fn total(&self) -> u32 {
        self.reactions.iter().map(|r| r.count).sum()
    }
}
