//! Quest coordinator: the state machine driving a party's quest from
//! invitation through voting, start, progress, and completion or abort.
//!
//! Transitions are computed fully in memory and committed with a single
//! group write; the member fan-out that follows is best-effort and
//! replayable (see [`super::fanout`]).

use std::collections::BTreeMap;

use tracing::info;
use uuid::Uuid;

use crate::catalog::QuestReward;
use crate::model::{Group, QuestProgress, QuestState, Vote};
use crate::store::{GroupStore, MemberStore};

use super::fanout::{self, FanoutReport, MemberDelta};
use super::{GroupEngine, GroupError};

/// A progress contribution applied to the running quest. `damage` is the
/// positive amount subtracted from a boss's remaining hp; `collected`
/// adds to the per-item counts of a collection quest. The component that
/// doesn't match the quest's progress representation is ignored.
#[derive(Debug, Clone, Default)]
pub struct ProgressDelta {
    pub damage: f64,
    pub collected: BTreeMap<String, u32>,
}

impl ProgressDelta {
    /// Damage-only delta for boss quests.
    pub fn damage(amount: f64) -> Self {
        Self {
            damage: amount,
            ..Self::default()
        }
    }

    /// Single-item delta for collection quests.
    pub fn collected(item: &str, count: u32) -> Self {
        Self {
            collected: BTreeMap::from([(item.to_string(), count)]),
            ..Self::default()
        }
    }
}

/// Completion payload handed back for the economy subsystem to act on.
/// Reward granting itself happens outside this crate.
#[derive(Debug, Clone)]
pub struct QuestCompletion {
    pub key: String,
    pub reward: Option<QuestReward>,
}

/// Result of a quest operation: the committed group snapshot, the
/// fan-out outcome, and the completion payload when the operation
/// finished the quest.
#[derive(Debug)]
pub struct QuestUpdate {
    pub group: Group,
    pub fanout: FanoutReport,
    pub completed: Option<QuestCompletion>,
}

impl<G: GroupStore, M: MemberStore> GroupEngine<G, M> {
    /// Start a quest invitation in the inviter's party. The inviter is
    /// pre-marked accepted, every other current member pending, and the
    /// inviter pays one quest scroll.
    pub async fn invite_to_quest(
        &self,
        inviter_id: &str,
        quest_key: &str,
    ) -> Result<QuestUpdate, GroupError> {
        let party = self
            .groups
            .find_party_of(inviter_id)
            .await?
            .ok_or(GroupError::NotInParty)?;
        if self.catalog.lookup(quest_key).is_none() {
            return Err(GroupError::QuestNotFound(quest_key.to_string()));
        }

        // Minted once, so CAS retries and fan-out replays share one
        // debit key.
        let invite_event = Uuid::new_v4().to_string();
        let group_id = party.value.id.clone();

        let (group, _) = self
            .update_group(&group_id, |group| {
                if group.quest.is_some() {
                    return Err(GroupError::QuestAlreadyInProgress);
                }
                let votes = group
                    .members
                    .iter()
                    .map(|member_id| {
                        let vote = if member_id == inviter_id {
                            Vote::Accepted
                        } else {
                            Vote::Pending
                        };
                        (member_id.clone(), vote)
                    })
                    .collect();
                group.quest = Some(QuestState {
                    key: quest_key.to_string(),
                    active: false,
                    initiated_by: inviter_id.to_string(),
                    invite_event: invite_event.clone(),
                    votes,
                    progress: None,
                });
                Ok(())
            })
            .await?;

        // The invitation costs the inviter one scroll; the event key
        // makes a replayed delivery a no-op.
        let fanout = self
            .deliver_to(
                &group_id,
                inviter_id,
                MemberDelta::DebitScroll {
                    quest_key: quest_key.to_string(),
                    event: invite_event,
                },
            )
            .await;

        info!(%group_id, %inviter_id, %quest_key, "quest invitation sent");
        Ok(QuestUpdate {
            group,
            fanout,
            completed: None,
        })
    }

    /// Record a member's accept/reject decision. A reject stays in the
    /// vote map as an explicit decision; it is not a removal.
    pub async fn vote_quest(
        &self,
        group_id: &str,
        member_id: &str,
        accept: bool,
    ) -> Result<QuestUpdate, GroupError> {
        let (group, _) = self
            .update_group(group_id, |group| {
                let quest = group
                    .quest
                    .as_mut()
                    .ok_or(GroupError::NoPendingInvitation)?;
                if quest.active {
                    return Err(GroupError::NoPendingInvitation);
                }
                // Only members seeded at invitation time hold a vote.
                let vote = quest
                    .votes
                    .get_mut(member_id)
                    .ok_or(GroupError::NoPendingInvitation)?;
                *vote = if accept { Vote::Accepted } else { Vote::Rejected };
                Ok(())
            })
            .await?;

        info!(%group_id, %member_id, accept, "quest vote recorded");
        Ok(QuestUpdate {
            group,
            fanout: FanoutReport::default(),
            completed: None,
        })
    }

    /// Start the quest if voting is settled, or unconditionally with
    /// `force` (leader-only). Without `force`, a pending vote from a
    /// member still in the group blocks the start and the call returns
    /// the unchanged group. This is the only place `active` becomes true.
    pub async fn try_start_quest(
        &self,
        group_id: &str,
        requester_id: &str,
        force: bool,
    ) -> Result<QuestUpdate, GroupError> {
        let current = self.load_group(group_id).await?.value;
        let quest = current
            .quest
            .as_ref()
            .ok_or(GroupError::NoPendingInvitation)?;
        if quest.active {
            return Err(GroupError::QuestAlreadyInProgress);
        }
        if force && current.leader_id != requester_id {
            return Err(GroupError::Unauthorized);
        }
        if !force && current.blocking_pending_votes() > 0 {
            return Ok(QuestUpdate {
                group: current,
                fanout: FanoutReport::default(),
                completed: None,
            });
        }

        let quest_key = quest.key.clone();
        let definition = self
            .catalog
            .lookup(&quest_key)
            .ok_or_else(|| GroupError::QuestNotFound(quest_key.clone()))?;
        let initial = definition.initial_progress();

        let (group, started) = self
            .update_group(group_id, |group| {
                let blocked = !force && group.blocking_pending_votes() > 0;
                let quest = group
                    .quest
                    .as_mut()
                    .ok_or(GroupError::NoPendingInvitation)?;
                if quest.key != quest_key {
                    return Err(GroupError::NoPendingInvitation);
                }
                if quest.active {
                    return Err(GroupError::QuestAlreadyInProgress);
                }
                if blocked {
                    // A concurrent membership change re-blocked the start.
                    return Ok(false);
                }
                // A forced start is an explicit decision for everyone who
                // never answered.
                for vote in quest.votes.values_mut() {
                    if *vote == Vote::Pending {
                        *vote = Vote::Rejected;
                    }
                }
                quest.active = true;
                quest.progress = Some(initial.clone());
                Ok(true)
            })
            .await?;

        if !started {
            return Ok(QuestUpdate {
                group,
                fanout: FanoutReport::default(),
                completed: None,
            });
        }

        let deltas = quest_fanout_deltas(&group);
        let fanout = fanout::propagate(
            &self.members,
            group_id,
            deltas,
            self.config.max_delivery_retries,
        )
        .await;
        info!(%group_id, %quest_key, force, "quest started");
        Ok(QuestUpdate {
            group,
            fanout,
            completed: None,
        })
    }

    /// Apply member-dealt progress to the running quest. Boss hp is
    /// floored at 0, collect counts are capped at the catalog goal;
    /// reaching the terminal condition completes the quest in the same
    /// logical operation.
    pub async fn apply_quest_progress(
        &self,
        group_id: &str,
        delta: &ProgressDelta,
    ) -> Result<QuestUpdate, GroupError> {
        let current = self.load_group(group_id).await?.value;
        let quest = current
            .quest
            .as_ref()
            .filter(|quest| quest.active)
            .ok_or(GroupError::QuestNotActive)?;
        let quest_key = quest.key.clone();
        let definition = self
            .catalog
            .lookup(&quest_key)
            .ok_or_else(|| GroupError::QuestNotFound(quest_key.clone()))?;
        let goals = definition.collect.clone().unwrap_or_default();

        let (group, finished_quest) = self
            .update_group(group_id, |group| {
                let quest = group.quest.as_mut().ok_or(GroupError::QuestNotActive)?;
                if !quest.active || quest.key != quest_key {
                    return Err(GroupError::QuestNotActive);
                }
                let finished = match quest.progress.as_mut() {
                    Some(QuestProgress::Boss { hp }) => {
                        *hp = (*hp - delta.damage).max(0.0);
                        *hp <= 0.0
                    }
                    Some(QuestProgress::Collect { items }) => {
                        for (item, gathered) in &delta.collected {
                            if let (Some(count), Some(goal)) = (items.get_mut(item), goals.get(item))
                            {
                                *count = (*count + gathered).min(*goal);
                            }
                        }
                        !goals.is_empty()
                            && goals.iter().all(|(item, goal)| {
                                items.get(item).is_some_and(|count| count >= goal)
                            })
                    }
                    None => return Err(GroupError::QuestNotActive),
                };
                if finished { Ok(group.quest.take()) } else { Ok(None) }
            })
            .await?;

        match finished_quest {
            Some(quest) => Ok(self.finalize_completed(group, quest).await),
            None => Ok(QuestUpdate {
                group,
                fanout: FanoutReport::default(),
                completed: None,
            }),
        }
    }

    /// Complete the running quest: clear it from the group, clear the
    /// accepted members' mirrors, and hand back the reward metadata.
    pub async fn complete_quest(&self, group_id: &str) -> Result<QuestUpdate, GroupError> {
        let (group, quest) = self
            .update_group(group_id, |group| match group.quest.take() {
                Some(quest) if quest.active => Ok(quest),
                Some(quest) => {
                    group.quest = Some(quest);
                    Err(GroupError::QuestNotActive)
                }
                None => Err(GroupError::QuestNotActive),
            })
            .await?;

        Ok(self.finalize_completed(group, quest).await)
    }

    /// Abort the quest from any non-empty state. Mirrors are cleared for
    /// everyone who might hold one: current members and everyone seeded
    /// into the vote map, whatever their vote.
    pub async fn abort_quest(&self, group_id: &str) -> Result<QuestUpdate, GroupError> {
        let (group, quest) = self
            .update_group(group_id, |group| {
                group.quest.take().ok_or(GroupError::NoPendingInvitation)
            })
            .await?;

        let mut deltas = BTreeMap::new();
        for member_id in group.members.iter().chain(quest.votes.keys()) {
            deltas.insert(member_id.clone(), MemberDelta::ClearQuestMirror);
        }
        let fanout = fanout::propagate(
            &self.members,
            group_id,
            deltas,
            self.config.max_delivery_retries,
        )
        .await;
        info!(%group_id, quest_key = %quest.key, "quest aborted");
        Ok(QuestUpdate {
            group,
            fanout,
            completed: None,
        })
    }

    /// Re-deliver quest deltas for specific members, typically the
    /// failed ids out of an earlier fan-out report. Deltas are re-derived
    /// from the current group state and are idempotent, so replaying is
    /// safe at any point.
    pub async fn retry_quest_fanout(
        &self,
        group_id: &str,
        member_ids: &[String],
    ) -> Result<QuestUpdate, GroupError> {
        let group = self.load_group(group_id).await?.value;
        let full = quest_fanout_deltas(&group);

        let mut deltas = BTreeMap::new();
        for member_id in member_ids {
            let delta = full
                .get(member_id)
                .cloned()
                .unwrap_or(MemberDelta::ClearQuestMirror);
            deltas.insert(member_id.clone(), delta);
        }
        let fanout = fanout::propagate(
            &self.members,
            group_id,
            deltas,
            self.config.max_delivery_retries,
        )
        .await;
        info!(%group_id, count = member_ids.len(), "quest fan-out replayed");
        Ok(QuestUpdate {
            group,
            fanout,
            completed: None,
        })
    }

    async fn finalize_completed(&self, group: Group, quest: QuestState) -> QuestUpdate {
        let reward = self
            .catalog
            .lookup(&quest.key)
            .and_then(|definition| definition.reward.clone());
        let deltas = completion_deltas(&quest);
        let fanout = fanout::propagate(
            &self.members,
            &group.id,
            deltas,
            self.config.max_delivery_retries,
        )
        .await;
        info!(group_id = %group.id, quest_key = %quest.key, "quest completed");
        QuestUpdate {
            group,
            fanout,
            completed: Some(QuestCompletion {
                key: quest.key,
                reward,
            }),
        }
    }
}

/// The delta each member should receive to make their record match the
/// group's current quest state: accepted members of a running quest
/// follow it, everyone else holds no mirror. The initiator's scroll
/// debit rides along and is a no-op once its event key has been
/// consumed.
fn quest_fanout_deltas(group: &Group) -> BTreeMap<String, MemberDelta> {
    let mut deltas: BTreeMap<String, MemberDelta> = BTreeMap::new();
    let Some(quest) = &group.quest else {
        for member_id in &group.members {
            deltas.insert(member_id.clone(), MemberDelta::ClearQuestMirror);
        }
        return deltas;
    };

    for member_id in &group.members {
        let accepted = quest.votes.get(member_id) == Some(&Vote::Accepted);
        let delta = match (&quest.progress, accepted, quest.active) {
            (Some(progress), true, true) => MemberDelta::SetQuestMirror {
                key: quest.key.clone(),
                progress: progress.clone(),
            },
            _ => MemberDelta::ClearQuestMirror,
        };
        deltas.insert(member_id.clone(), delta);
    }

    let debit = MemberDelta::DebitScroll {
        quest_key: quest.key.clone(),
        event: quest.invite_event.clone(),
    };
    let combined = match deltas.remove(&quest.initiated_by) {
        Some(existing) => MemberDelta::Batch(vec![debit, existing]),
        None => debit,
    };
    deltas.insert(quest.initiated_by.clone(), combined);
    deltas
}

/// Mirror clears for everyone who accepted the finished quest.
fn completion_deltas(quest: &QuestState) -> BTreeMap<String, MemberDelta> {
    quest
        .votes
        .iter()
        .filter(|(_, vote)| **vote == Vote::Accepted)
        .map(|(member_id, _)| (member_id.clone(), MemberDelta::ClearQuestMirror))
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use crate::catalog::{BossDefinition, QuestCatalog, QuestDefinition, QuestReward};
    use crate::config::CoordinationConfig;
    use crate::engine::{GroupEngine, GroupError};
    use crate::model::{Group, GroupKind, Member, QuestProgress, Vote};
    use crate::store::{GroupStore, MemberStore, MemoryGroupStore, MemoryMemberStore};

    use super::ProgressDelta;

    type TestEngine = GroupEngine<MemoryGroupStore, MemoryMemberStore>;

    fn test_catalog() -> QuestCatalog {
        let mut catalog = QuestCatalog::new();
        catalog.insert(
            "vice2",
            QuestDefinition {
                title: "Vice, Part 2".to_string(),
                boss: Some(BossDefinition { hp: 45.0 }),
                collect: None,
                reward: Some(QuestReward {
                    experience: 75.0,
                    gold: 20.0,
                }),
            },
        );
        catalog.insert(
            "evilsanta2",
            QuestDefinition {
                title: "Find the Cub".to_string(),
                boss: None,
                collect: Some(BTreeMap::from([
                    ("tracks".to_string(), 6),
                    ("branches".to_string(), 10),
                ])),
                reward: None,
            },
        );
        catalog
    }

    /// Party p1 with alice (leader), bob, carol; member records seeded;
    /// alice owns two vice2 scrolls.
    async fn setup() -> (TestEngine, MemoryGroupStore, MemoryMemberStore) {
        let groups = MemoryGroupStore::new();
        let members = MemoryMemberStore::new();

        let mut party = Group::new("p1", "The Party", GroupKind::Party, "alice");
        party.members.insert("bob".to_string());
        party.members.insert("carol".to_string());
        groups.put_if_version("p1", &party, None).await.unwrap();

        for id in ["alice", "bob", "carol"] {
            let mut member = Member::new(id);
            if id == "alice" {
                member.grant_scrolls("vice2", 2);
                member.grant_scrolls("evilsanta2", 1);
            }
            members.put_if_version(id, &member, None).await.unwrap();
        }

        let engine = GroupEngine::new(
            groups.clone(),
            members.clone(),
            test_catalog(),
            CoordinationConfig::default(),
        );
        (engine, groups, members)
    }

    #[tokio::test]
    async fn test_invite_seeds_votes_and_debits_scroll() {
        let (engine, _, members) = setup().await;

        let update = engine.invite_to_quest("alice", "vice2").await.unwrap();
        assert!(update.fanout.is_clean());

        let quest = update.group.quest.unwrap();
        assert_eq!(quest.key, "vice2");
        assert!(!quest.active);
        assert_eq!(quest.votes["alice"], Vote::Accepted);
        assert_eq!(quest.votes["bob"], Vote::Pending);
        assert_eq!(quest.votes["carol"], Vote::Pending);

        let alice = members.get("alice").await.unwrap().unwrap().value;
        assert_eq!(alice.scroll_count("vice2"), 1);
    }

    #[tokio::test]
    async fn test_invite_requires_party() {
        let (engine, _, members) = setup().await;
        members
            .put_if_version("dan", &Member::new("dan"), None)
            .await
            .unwrap();

        let err = engine.invite_to_quest("dan", "vice2").await.unwrap_err();
        assert!(matches!(err, GroupError::NotInParty));
    }

    #[tokio::test]
    async fn test_invite_unknown_quest() {
        let (engine, _, _) = setup().await;
        let err = engine.invite_to_quest("alice", "nosuch").await.unwrap_err();
        assert!(matches!(err, GroupError::QuestNotFound(key) if key == "nosuch"));
    }

    #[tokio::test]
    async fn test_invite_while_quest_pending() {
        let (engine, _, _) = setup().await;
        engine.invite_to_quest("alice", "vice2").await.unwrap();

        let err = engine.invite_to_quest("alice", "vice2").await.unwrap_err();
        assert!(matches!(err, GroupError::QuestAlreadyInProgress));
    }

    #[tokio::test]
    async fn test_vote_requires_invitation() {
        let (engine, _, _) = setup().await;
        let err = engine.vote_quest("p1", "bob", true).await.unwrap_err();
        assert!(matches!(err, GroupError::NoPendingInvitation));
    }

    #[tokio::test]
    async fn test_vote_by_unseeded_member_rejected() {
        let (engine, _, members) = setup().await;
        engine.invite_to_quest("alice", "vice2").await.unwrap();

        // Dan joins after the invitation went out, so he holds no vote
        members
            .put_if_version("dan", &Member::new("dan"), None)
            .await
            .unwrap();
        engine.join_group("p1", "dan").await.unwrap();

        let err = engine.vote_quest("p1", "dan", true).await.unwrap_err();
        assert!(matches!(err, GroupError::NoPendingInvitation));
    }

    #[tokio::test]
    async fn test_reject_is_recorded_not_removed() {
        let (engine, _, _) = setup().await;
        engine.invite_to_quest("alice", "vice2").await.unwrap();

        let update = engine.vote_quest("p1", "carol", false).await.unwrap();
        let quest = update.group.quest.unwrap();
        assert_eq!(quest.votes["carol"], Vote::Rejected);
        assert_eq!(quest.votes.len(), 3);
    }

    #[tokio::test]
    async fn test_start_blocked_while_votes_pending() {
        let (engine, _, _) = setup().await;
        engine.invite_to_quest("alice", "vice2").await.unwrap();
        engine.vote_quest("p1", "bob", true).await.unwrap();

        // carol hasn't voted: soft no-op, no transition
        let update = engine.try_start_quest("p1", "alice", false).await.unwrap();
        let quest = update.group.quest.unwrap();
        assert!(!quest.active);
        assert!(quest.progress.is_none());
    }

    #[tokio::test]
    async fn test_start_after_everyone_voted() {
        let (engine, _, members) = setup().await;
        engine.invite_to_quest("alice", "vice2").await.unwrap();
        engine.vote_quest("p1", "bob", true).await.unwrap();
        engine.vote_quest("p1", "carol", false).await.unwrap();

        let update = engine.try_start_quest("p1", "bob", false).await.unwrap();
        assert!(update.fanout.is_clean());

        let quest = update.group.quest.unwrap();
        assert!(quest.active);
        assert_eq!(quest.progress, Some(QuestProgress::Boss { hp: 45.0 }));

        // Accepted members mirror the quest, the rejecter does not
        let alice = members.get("alice").await.unwrap().unwrap().value;
        let bob = members.get("bob").await.unwrap().unwrap().value;
        let carol = members.get("carol").await.unwrap().unwrap().value;
        assert_eq!(alice.party_quest.as_ref().unwrap().key, "vice2");
        assert_eq!(bob.party_quest.as_ref().unwrap().key, "vice2");
        assert!(carol.party_quest.is_none());

        // The start fan-out must not debit the invitation scroll again
        assert_eq!(alice.scroll_count("vice2"), 1);
    }

    #[tokio::test]
    async fn test_force_start_is_leader_only() {
        let (engine, _, _) = setup().await;
        engine.invite_to_quest("alice", "vice2").await.unwrap();

        let err = engine
            .try_start_quest("p1", "bob", true)
            .await
            .unwrap_err();
        assert!(matches!(err, GroupError::Unauthorized));
    }

    #[tokio::test]
    async fn test_force_start_settles_pending_votes() {
        let (engine, _, _) = setup().await;
        engine.invite_to_quest("alice", "vice2").await.unwrap();
        engine.vote_quest("p1", "bob", true).await.unwrap();

        let update = engine.try_start_quest("p1", "alice", true).await.unwrap();
        let quest = update.group.quest.unwrap();
        assert!(quest.active);
        // No pending entry survives a forced start
        assert!(quest.votes.values().all(|vote| *vote != Vote::Pending));
        assert_eq!(quest.votes["carol"], Vote::Rejected);
    }

    #[tokio::test]
    async fn test_departed_member_cannot_block_start() {
        let (engine, _, _) = setup().await;
        engine.invite_to_quest("alice", "vice2").await.unwrap();
        engine.vote_quest("p1", "bob", true).await.unwrap();

        // carol leaves without voting; her stale pending entry stays in
        // the vote map but no longer gates the start
        engine.leave_group("p1", "carol").await.unwrap();

        let update = engine.try_start_quest("p1", "bob", false).await.unwrap();
        let quest = update.group.quest.unwrap();
        assert!(quest.active);
        // Her stale entry is settled on start: active never coexists
        // with a pending vote
        assert_eq!(quest.votes["carol"], Vote::Rejected);
    }

    #[tokio::test]
    async fn test_start_twice_rejected() {
        let (engine, _, _) = setup().await;
        engine.invite_to_quest("alice", "vice2").await.unwrap();
        engine.try_start_quest("p1", "alice", true).await.unwrap();

        let err = engine
            .try_start_quest("p1", "alice", true)
            .await
            .unwrap_err();
        assert!(matches!(err, GroupError::QuestAlreadyInProgress));
    }

    async fn start_boss_quest(engine: &TestEngine) {
        engine.invite_to_quest("alice", "vice2").await.unwrap();
        engine.vote_quest("p1", "bob", true).await.unwrap();
        engine.vote_quest("p1", "carol", true).await.unwrap();
        engine.try_start_quest("p1", "alice", false).await.unwrap();
    }

    #[tokio::test]
    async fn test_progress_requires_active_quest() {
        let (engine, _, _) = setup().await;
        let err = engine
            .apply_quest_progress("p1", &ProgressDelta::damage(10.0))
            .await
            .unwrap_err();
        assert!(matches!(err, GroupError::QuestNotActive));

        // A pending (not yet started) quest doesn't take progress either
        engine.invite_to_quest("alice", "vice2").await.unwrap();
        let err = engine
            .apply_quest_progress("p1", &ProgressDelta::damage(10.0))
            .await
            .unwrap_err();
        assert!(matches!(err, GroupError::QuestNotActive));
    }

    #[tokio::test]
    async fn test_boss_damage_floors_at_zero_and_completes() {
        let (engine, _, members) = setup().await;
        start_boss_quest(&engine).await;

        let update = engine
            .apply_quest_progress("p1", &ProgressDelta::damage(30.0))
            .await
            .unwrap();
        assert!(update.completed.is_none());
        let quest = update.group.quest.unwrap();
        assert_eq!(quest.progress, Some(QuestProgress::Boss { hp: 15.0 }));

        // Overkill damage floors at 0 and finishes the quest
        let update = engine
            .apply_quest_progress("p1", &ProgressDelta::damage(30.0))
            .await
            .unwrap();
        assert!(update.group.quest.is_none());
        let completion = update.completed.unwrap();
        assert_eq!(completion.key, "vice2");
        assert_eq!(completion.reward.unwrap().gold, 20.0);

        // Mirrors cleared for the accepted members
        let bob = members.get("bob").await.unwrap().unwrap().value;
        assert!(bob.party_quest.is_none());
    }

    #[tokio::test]
    async fn test_collect_counts_cap_at_goal() {
        let (engine, _, _) = setup().await;
        engine.invite_to_quest("alice", "evilsanta2").await.unwrap();
        engine.vote_quest("p1", "bob", true).await.unwrap();
        engine.vote_quest("p1", "carol", true).await.unwrap();
        engine.try_start_quest("p1", "alice", false).await.unwrap();

        let update = engine
            .apply_quest_progress("p1", &ProgressDelta::collected("tracks", 20))
            .await
            .unwrap();
        assert!(update.completed.is_none());
        let QuestProgress::Collect { items } =
            update.group.quest.unwrap().progress.unwrap()
        else {
            panic!("expected collect progress");
        };
        assert_eq!(items["tracks"], 6);
        assert_eq!(items["branches"], 0);

        // Unknown items are ignored, matching goals complete the quest
        let mut delta = ProgressDelta::collected("branches", 10);
        delta.collected.insert("mistletoe".to_string(), 4);
        let update = engine.apply_quest_progress("p1", &delta).await.unwrap();
        assert!(update.group.quest.is_none());
        assert_eq!(update.completed.unwrap().key, "evilsanta2");
    }

    #[tokio::test]
    async fn test_complete_requires_active_quest() {
        let (engine, _, _) = setup().await;
        let err = engine.complete_quest("p1").await.unwrap_err();
        assert!(matches!(err, GroupError::QuestNotActive));

        engine.invite_to_quest("alice", "vice2").await.unwrap();
        let err = engine.complete_quest("p1").await.unwrap_err();
        assert!(matches!(err, GroupError::QuestNotActive));
    }

    #[tokio::test]
    async fn test_abort_clears_quest_and_all_mirrors() {
        let (engine, _, members) = setup().await;
        start_boss_quest(&engine).await;

        let update = engine.abort_quest("p1").await.unwrap();
        assert!(update.group.quest.is_none());

        for id in ["alice", "bob", "carol"] {
            let member = members.get(id).await.unwrap().unwrap().value;
            assert!(member.party_quest.is_none(), "{id} still has a mirror");
        }
    }

    #[tokio::test]
    async fn test_abort_works_during_voting() {
        let (engine, _, _) = setup().await;
        engine.invite_to_quest("alice", "vice2").await.unwrap();

        let update = engine.abort_quest("p1").await.unwrap();
        assert!(update.group.quest.is_none());

        // No quest left to abort
        let err = engine.abort_quest("p1").await.unwrap_err();
        assert!(matches!(err, GroupError::NoPendingInvitation));
    }

    #[tokio::test]
    async fn test_fanout_replay_does_not_double_debit() {
        let (engine, _, members) = setup().await;
        start_boss_quest(&engine).await;

        let before = members.get("alice").await.unwrap().unwrap().value;
        assert_eq!(before.scroll_count("vice2"), 1);

        // Replaying the whole start fan-out converges without a second
        // scroll debit
        let ids: Vec<String> = ["alice", "bob", "carol"]
            .iter()
            .map(|id| id.to_string())
            .collect();
        let update = engine.retry_quest_fanout("p1", &ids).await.unwrap();
        assert!(update.fanout.is_clean());

        let after = members.get("alice").await.unwrap().unwrap().value;
        assert_eq!(after.scroll_count("vice2"), 1);
        assert_eq!(after.party_quest.as_ref().unwrap().key, "vice2");
    }
}
