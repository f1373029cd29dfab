//! Static quest catalog: an immutable lookup from quest key to definition.
//!
//! The catalog is content, not coordination state; the engine only reads
//! it. Definitions can be built programmatically or loaded from a TOML
//! file with `[quests.<key>]` tables.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::model::QuestProgress;

/// Boss parameters for a boss quest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BossDefinition {
    pub hp: f64,
}

/// Reward metadata attached to a quest. Granting rewards belongs to the
/// economy subsystem; the coordinator only hands this back on completion.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QuestReward {
    pub experience: f64,
    pub gold: f64,
}

/// A quest definition: a boss fight (`boss`) or a collection quest
/// (`collect`), never both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestDefinition {
    pub title: String,
    #[serde(default)]
    pub boss: Option<BossDefinition>,
    #[serde(default)]
    pub collect: Option<BTreeMap<String, u32>>,
    #[serde(default)]
    pub reward: Option<QuestReward>,
}

impl QuestDefinition {
    /// Progress state for a fresh start of this quest: full boss hp, or
    /// zeroed counts for every collection goal.
    pub fn initial_progress(&self) -> QuestProgress {
        if let Some(boss) = &self.boss {
            QuestProgress::Boss { hp: boss.hp }
        } else {
            let items = self
                .collect
                .as_ref()
                .map(|goals| goals.keys().map(|item| (item.clone(), 0)).collect())
                .unwrap_or_default();
            QuestProgress::Collect { items }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("failed to read quest catalog: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse quest catalog: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("quest {0} must define exactly one of boss or collect")]
    InvalidDefinition(String),
}

/// The quest catalog consulted by the coordinator. Read-only once built.
#[derive(Debug, Clone, Default)]
pub struct QuestCatalog {
    quests: HashMap<String, QuestDefinition>,
}

impl QuestCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a definition under a key.
    pub fn insert(&mut self, key: impl Into<String>, definition: QuestDefinition) {
        self.quests.insert(key.into(), definition);
    }

    pub fn lookup(&self, key: &str) -> Option<&QuestDefinition> {
        self.quests.get(key)
    }

    pub fn len(&self) -> usize {
        self.quests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.quests.is_empty()
    }

    /// Parse a catalog from TOML text. Every definition must be a boss
    /// fight or a collection quest, exactly one of the two.
    pub fn from_toml_str(text: &str) -> Result<Self, CatalogError> {
        #[derive(Deserialize)]
        struct CatalogFile {
            #[serde(default)]
            quests: HashMap<String, QuestDefinition>,
        }

        let file: CatalogFile = toml::from_str(text)?;
        for (key, definition) in &file.quests {
            if definition.boss.is_some() == definition.collect.is_some() {
                return Err(CatalogError::InvalidDefinition(key.clone()));
            }
        }
        Ok(Self {
            quests: file.quests,
        })
    }

    /// Load a catalog from a TOML file (the `[catalog] path` in the
    /// runtime configuration).
    pub fn load(path: &str) -> Result<Self, CatalogError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }
}
