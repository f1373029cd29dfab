use sqlx::SqlitePool;

use crate::model::Member;

use super::{MemberStore, StoreError, Versioned};

/// SQLite-backed member store, same document-plus-version layout as the
/// group store.
#[derive(Clone)]
pub struct SqliteMemberStore {
    pool: SqlitePool,
}

impl SqliteMemberStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

impl MemberStore for SqliteMemberStore {
    async fn get(&self, id: &str) -> Result<Option<Versioned<Member>>, StoreError> {
        let row: Option<(String, i64)> =
            sqlx::query_as("SELECT data, version FROM members WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        match row {
            Some((data, version)) => {
                let member: Member = serde_json::from_str(&data)?;
                Ok(Some(Versioned {
                    value: member,
                    version: version as u64,
                }))
            }
            None => Ok(None),
        }
    }

    async fn put_if_version(
        &self,
        id: &str,
        member: &Member,
        expected: Option<u64>,
    ) -> Result<u64, StoreError> {
        let data = serde_json::to_string(member)?;

        match expected {
            None => {
                let result =
                    sqlx::query("INSERT OR IGNORE INTO members (id, data, version) VALUES (?, ?, 1)")
                        .bind(id)
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
                    "UPDATE members SET data = ?, version = version + 1, \
                     updated_at = datetime('now') WHERE id = ? AND version = ?",
                )
                .bind(&data)
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::pool::{create_pool, run_migrations};

    async fn setup_store() -> SqliteMemberStore {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        SqliteMemberStore::new(pool)
    }

    #[tokio::test]
    async fn test_put_and_get_round_trip() {
        let store = setup_store().await;
        let mut member = Member::new("alice");
        member.grant_scrolls("vice2", 2);

        store.put_if_version("alice", &member, None).await.unwrap();

        let stored = store.get("alice").await.unwrap().unwrap();
        assert_eq!(stored.version, 1);
        assert_eq!(stored.value.scroll_count("vice2"), 2);
        assert!(stored.value.invitations.party.is_none());
    }

    #[tokio::test]
    async fn test_stale_version_conflicts() {
        let store = setup_store().await;
        let mut member = Member::new("alice");
        store.put_if_version("alice", &member, None).await.unwrap();

        member.grant_scrolls("vice2", 1);
        store
            .put_if_version("alice", &member, Some(1))
            .await
            .unwrap();

        let err = store
            .put_if_version("alice", &member, Some(1))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict));
    }

    #[tokio::test]
    async fn test_get_nonexistent_member() {
        let store = setup_store().await;
        assert!(store.get("nosuch").await.unwrap().is_none());
    }
}
