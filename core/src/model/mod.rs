//! Domain types for the two persisted aggregates: groups and members.

pub mod group;
pub mod member;

pub use group::{Group, GroupKind, QuestProgress, QuestState, Vote};
pub use member::{GroupInvite, Inventory, Invitations, Member, QuestMirror};
