use serde::Deserialize;
use std::path::Path;
use tracing::info;

/// Top-level configuration, loaded from warband.toml.
#[derive(Deserialize, Default)]
#[serde(default)]
pub struct CoreConfig {
    pub database: DatabaseSection,
    pub coordination: CoordinationConfig,
    pub catalog: CatalogSection,
}

#[derive(Deserialize)]
#[serde(default)]
pub struct DatabaseSection {
    pub url: String,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            url: "sqlite:warband.db?mode=rwc".into(),
        }
    }
}

/// Retry bounds for the optimistic-concurrency loops.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CoordinationConfig {
    /// Attempts for a group's own compare-and-set loop before the
    /// operation surfaces a conflict.
    pub max_cas_retries: u32,
    /// Attempts per member-record write during fan-out delivery.
    pub max_delivery_retries: u32,
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            max_cas_retries: 5,
            max_delivery_retries: 3,
        }
    }
}

#[derive(Deserialize, Default)]
#[serde(default)]
pub struct CatalogSection {
    /// Path to a TOML quest catalog file. Unset means an empty catalog.
    pub path: Option<String>,
}

impl CoreConfig {
    /// Load config from a TOML file. Falls back to defaults if the file
    /// doesn't exist. Environment variables override TOML values.
    pub fn load(path: &str) -> Self {
        let mut config = if Path::new(path).exists() {
            let contents = std::fs::read_to_string(path)
                .unwrap_or_else(|e| panic!("failed to read config file {}: {}", path, e));
            toml::from_str(&contents)
                .unwrap_or_else(|e| panic!("failed to parse config file {}: {}", path, e))
        } else {
            info!("No config file found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("DATABASE_URL") {
            self.database.url = v;
        }
        if let Ok(v) = std::env::var("MAX_CAS_RETRIES")
            && let Ok(retries) = v.parse()
        {
            self.coordination.max_cas_retries = retries;
        }
        if let Ok(v) = std::env::var("MAX_DELIVERY_RETRIES")
            && let Ok(retries) = v.parse()
        {
            self.coordination.max_delivery_retries = retries;
        }
        if let Ok(v) = std::env::var("QUEST_CATALOG_PATH") {
            self.catalog.path = Some(v);
        }
    }
}
