use sqlx::SqlitePool;

use crate::model::Group;

use super::{GroupStore, StoreError, Versioned};

/// SQLite-backed group store. Groups are stored as JSON documents with an
/// integer version column backing the compare-and-set contract.
#[derive(Clone)]
pub struct SqliteGroupStore {
    pool: SqlitePool,
}

impl SqliteGroupStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

impl GroupStore for SqliteGroupStore {
    async fn get(&self, id: &str) -> Result<Option<Versioned<Group>>, StoreError> {
        let row: Option<(String, i64)> =
            sqlx::query_as("SELECT data, version FROM groups WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        match row {
            Some((data, version)) => {
                let group: Group = serde_json::from_str(&data)?;
                Ok(Some(Versioned {
                    value: group,
                    version: version as u64,
                }))
            }
            None => Ok(None),
        }
    }

    async fn put_if_version(
        &self,
        id: &str,
        group: &Group,
        expected: Option<u64>,
    ) -> Result<u64, StoreError> {
        let data = serde_json::to_string(group)?;

        match expected {
            None => {
                let result = sqlx::query(
                    "INSERT OR IGNORE INTO groups (id, kind, data, version) VALUES (?, ?, ?, 1)",
                )
                .bind(id)
                .bind(group.kind.as_str())
                .bind(&data)
                .execute(&self.pool)
                .await?;
                if result.rows_affected() == 0 {
                    return Err(StoreError::Conflict);
                }
                Ok(1)
            }
            Some(version) => {
                let result = sqlx::query(
                    "UPDATE groups SET data = ?, kind = ?, version = version + 1, \
                     updated_at = datetime('now') WHERE id = ? AND version = ?",
                )
                .bind(&data)
                .bind(group.kind.as_str())
                .bind(id)
                .bind(version as i64)
                .execute(&self.pool)
                .await?;
                if result.rows_affected() == 0 {
                    return Err(StoreError::Conflict);
                }
                Ok(version + 1)
            }
        }
    }

    async fn find_party_of(&self, member_id: &str) -> Result<Option<Versioned<Group>>, StoreError> {
        // The member roster is a JSON array at $.members in the document.
        let row: Option<(String, i64)> = sqlx::query_as(
            "SELECT g.data, g.version FROM groups g, json_each(g.data, '$.members') m \
             WHERE g.kind = 'party' AND m.value = ? LIMIT 1",
        )
        .bind(member_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some((data, version)) => {
                let group: Group = serde_json::from_str(&data)?;
                Ok(Some(Versioned {
                    value: group,
                    version: version as u64,
                }))
            }
            None => Ok(None),
        }
    }
}
