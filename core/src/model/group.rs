use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Whether a group is a party (at most one per member) or a guild.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupKind {
    Party,
    Guild,
}

impl GroupKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupKind::Party => "party",
            GroupKind::Guild => "guild",
        }
    }
}

/// A member's decision on a pending quest invitation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vote {
    Accepted,
    Rejected,
    Pending,
}

/// Progress of a running quest. Boss fights count hit points down,
/// collection quests count gathered items up; a quest is always exactly
/// one of the two.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestProgress {
    Boss { hp: f64 },
    Collect { items: BTreeMap<String, u32> },
}

/// Quest coordination state embedded in a group record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestState {
    /// Catalog key of the invited or running quest.
    pub key: String,
    /// True once the quest has started (post-voting).
    pub active: bool,
    /// Member who sent the invitation and paid the scroll.
    pub initiated_by: String,
    /// Deduplication key for the scroll debit, minted once per invitation.
    pub invite_event: String,
    /// Vote per member, seeded for everyone present at invitation time.
    pub votes: BTreeMap<String, Vote>,
    /// Progress state, present once the quest is active.
    pub progress: Option<QuestProgress>,
}

/// A party or guild: member roster, outstanding join invitations, and the
/// embedded quest state. The stored group record is the single source of
/// truth for quest state; member-side mirrors are caches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub id: String,
    pub name: String,
    pub kind: GroupKind,
    pub leader_id: String,
    pub members: BTreeSet<String>,
    pub invites: BTreeSet<String>,
    pub quest: Option<QuestState>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Group {
    /// Create a group with the leader as its first member.
    pub fn new(id: &str, name: &str, kind: GroupKind, leader_id: &str) -> Self {
        let now = Utc::now();
        Self {
            id: id.to_string(),
            name: name.to_string(),
            kind,
            leader_id: leader_id.to_string(),
            members: BTreeSet::from([leader_id.to_string()]),
            invites: BTreeSet::new(),
            quest: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Pending votes that can still block a non-forced quest start.
    /// Only members currently in the group count; a departed member's
    /// stale vote entry never blocks.
    pub fn blocking_pending_votes(&self) -> usize {
        match &self.quest {
            Some(quest) => quest
                .votes
                .iter()
                .filter(|(id, vote)| **vote == Vote::Pending && self.members.contains(*id))
                .count(),
            None => 0,
        }
    }
}
