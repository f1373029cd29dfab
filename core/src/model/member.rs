use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::group::QuestProgress;

/// Pointer to a group that has invited this member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupInvite {
    pub group_id: String,
    pub group_name: String,
}

/// Outstanding group-join invitations. A member can hold at most one
/// party invitation and any number of guild invitations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Invitations {
    #[serde(default)]
    pub party: Option<GroupInvite>,
    #[serde(default)]
    pub guilds: Vec<GroupInvite>,
}

/// Per-member cached copy of the party's active quest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestMirror {
    pub key: String,
    pub progress: QuestProgress,
}

/// Item inventory, reduced to what quest coordination touches.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Inventory {
    /// Owned quest scrolls per quest key.
    #[serde(default)]
    pub quest_scrolls: BTreeMap<String, i64>,
    /// Invite-event keys whose scroll debit has already been applied.
    /// Makes the debit a no-op when a fan-out is replayed.
    #[serde(default)]
    pub consumed_scroll_events: BTreeSet<String>,
}

/// A member record: invitation pointers, the quest mirror, and the slice
/// of inventory the quest workflow consumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Member {
    pub id: String,
    #[serde(default)]
    pub invitations: Invitations,
    #[serde(default)]
    pub party_quest: Option<QuestMirror>,
    #[serde(default)]
    pub items: Inventory,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Member {
    pub fn new(id: &str) -> Self {
        let now = Utc::now();
        Self {
            id: id.to_string(),
            invitations: Invitations::default(),
            party_quest: None,
            items: Inventory::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Scroll count for a quest key (0 when none owned).
    pub fn scroll_count(&self, quest_key: &str) -> i64 {
        self.items.quest_scrolls.get(quest_key).copied().unwrap_or(0)
    }

    /// Grant scrolls for a quest key.
    pub fn grant_scrolls(&mut self, quest_key: &str, count: i64) {
        *self
            .items
            .quest_scrolls
            .entry(quest_key.to_string())
            .or_insert(0) += count;
    }
}
