//! `PostgreSQL` implementation of the record store.
//!
//! One row per player in the `player_records` table. The attribute bag is
//! a single JSONB column; writes are compare-and-swap on the `version`
//! column so a stale writer is always rejected rather than silently
//! overwriting a newer row.

use async_trait::async_trait;
use playervault_types::{PlayerId, PlayerRecord};
use sqlx::Row as _;
use uuid::Uuid;

use crate::error::StoreError;
use crate::pool::DbPool;
use crate::store::RecordStore;

/// Record store backed by the `player_records` table.
#[derive(Clone)]
pub struct PgRecordStore {
    pool: DbPool,
}

impl PgRecordStore {
    /// Create a record store bound to a connection pool.
    pub const fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

/// A row from the `player_records` table, before attribute decoding.
#[derive(Debug, sqlx::FromRow)]
struct PlayerRow {
    player_id: Uuid,
    display_name: String,
    attributes: serde_json::Value,
    version: i64,
}

impl PlayerRow {
    /// Decode the JSONB attribute bag into a typed record.
    fn into_record(self) -> Result<PlayerRecord, StoreError> {
        let attributes = serde_json::from_value(self.attributes)?;
        Ok(PlayerRecord {
            player_id: PlayerId::from(self.player_id),
            display_name: self.display_name,
            attributes,
            version: u64::try_from(self.version).unwrap_or(0),
        })
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn load(&self, player_id: PlayerId) -> Result<Option<PlayerRecord>, StoreError> {
        let row = sqlx::query_as::<_, PlayerRow>(
            r"SELECT player_id, display_name, attributes, version
              FROM player_records
              WHERE player_id = $1",
        )
        .bind(player_id.into_inner())
        .fetch_optional(self.pool.pool())
        .await?;

        row.map(PlayerRow::into_record).transpose()
    }

    async fn save(&self, record: &PlayerRecord) -> Result<u64, StoreError> {
        let expected = record.version;
        let next = expected.saturating_add(1);
        let next_i64 = i64::try_from(next).unwrap_or(i64::MAX);
        let attributes = serde_json::to_value(&record.attributes)?;

        let rows_affected = if expected == 0 {
            // First save for this player. A concurrent insert loses the
            // race and reports a conflict, same as a stale update.
            sqlx::query(
                r"INSERT INTO player_records (player_id, display_name, attributes, version)
                  VALUES ($1, $2, $3, $4)
                  ON CONFLICT (player_id) DO NOTHING",
            )
            .bind(record.player_id.into_inner())
            .bind(&record.display_name)
            .bind(&attributes)
            .bind(next_i64)
            .execute(self.pool.pool())
            .await?
            .rows_affected()
        } else {
            let expected_i64 = i64::try_from(expected).unwrap_or(i64::MAX);
            sqlx::query(
                r"UPDATE player_records
                  SET display_name = $2, attributes = $3, version = $4, updated_at = now()
                  WHERE player_id = $1 AND version = $5",
            )
            .bind(record.player_id.into_inner())
            .bind(&record.display_name)
            .bind(&attributes)
            .bind(next_i64)
            .bind(expected_i64)
            .execute(self.pool.pool())
            .await?
            .rows_affected()
        };

        if rows_affected == 0 {
            return Err(StoreError::VersionConflict {
                player_id: record.player_id,
                expected,
            });
        }

        tracing::debug!(player_id = %record.player_id, version = next, "Saved player record");
        Ok(next)
    }

    async fn delete(&self, player_id: PlayerId) -> Result<(), StoreError> {
        let result = sqlx::query(r"DELETE FROM player_records WHERE player_id = $1")
            .bind(player_id.into_inner())
            .execute(self.pool.pool())
            .await?;

        tracing::debug!(
            %player_id,
            existed = result.rows_affected() > 0,
            "Deleted player record"
        );
        Ok(())
    }

    async fn find_id_by_name(&self, name: &str) -> Result<Option<PlayerId>, StoreError> {
        let row = sqlx::query(
            r"SELECT player_id
              FROM player_records
              WHERE lower(display_name) = lower($1)
              ORDER BY updated_at DESC
              LIMIT 1",
        )
        .bind(name)
        .fetch_optional(self.pool.pool())
        .await?;

        match row {
            Some(row) => {
                let id: Uuid = row.try_get("player_id").map_err(StoreError::from)?;
                Ok(Some(PlayerId::from(id)))
            }
            None => Ok(None),
        }
    }

    async fn top_by_attribute(
        &self,
        key: &str,
        limit: u32,
    ) -> Result<Vec<PlayerRecord>, StoreError> {
        let limit_i64 = i64::from(limit);

        let rows = sqlx::query_as::<_, PlayerRow>(
            r"SELECT player_id, display_name, attributes, version
              FROM player_records
              WHERE jsonb_typeof(attributes -> $1) = 'number'
              ORDER BY (attributes ->> $1)::numeric DESC
              LIMIT $2",
        )
        .bind(key)
        .bind(limit_i64)
        .fetch_all(self.pool.pool())
        .await?;

        rows.into_iter().map(PlayerRow::into_record).collect()
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use playervault_types::AttributeValue;

    use super::*;

    #[test]
    fn row_decodes_into_typed_record() {
        let id = Uuid::now_v7();
        let row = PlayerRow {
            player_id: id,
            display_name: String::from("Alice"),
            attributes: serde_json::json!({"score": 10, "afk": false}),
            version: 3,
        };

        let record = row.into_record().expect("decode failed");
        assert_eq!(record.player_id, PlayerId::from(id));
        assert_eq!(record.version, 3);
        assert_eq!(record.attribute("score"), Some(&AttributeValue::Int(10)));
        assert_eq!(record.attribute("afk"), Some(&AttributeValue::Flag(false)));
    }

    #[test]
    fn row_with_non_object_attributes_fails_decoding() {
        let row = PlayerRow {
            player_id: Uuid::now_v7(),
            display_name: String::from("Bob"),
            attributes: serde_json::json!(42),
            version: 1,
        };
        assert!(matches!(
            row.into_record(),
            Err(StoreError::Serialization(_))
        ));
    }

    #[test]
    fn negative_version_clamps_to_zero() {
        let row = PlayerRow {
            player_id: Uuid::now_v7(),
            display_name: String::from("Carol"),
            attributes: serde_json::json!({}),
            version: -5,
        };
        if let Ok(record) = row.into_record() {
            assert_eq!(record.version, 0);
        }
    }
}
