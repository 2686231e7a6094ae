use super::schema::Database;
use super::types::{join_categories, Channel, ChannelRow, StoreError};

const CHANNEL_COLUMNS: &str = "name, display_name, url, max_episodes, download_delay_hours, \
     refresh_interval_hours, format, quality, segment_categories, last_refresh_at, created_at";

impl Database {
    // ========================================================================
    // Channel Registry
    // ========================================================================

    /// Insert a new channel.
    ///
    /// Returns `ChannelExists` when the name or display name is already taken.
    pub async fn insert_channel(&self, channel: &Channel) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO channels (name, display_name, url, max_episodes, download_delay_hours,
                                  refresh_interval_hours, format, quality, segment_categories,
                                  last_refresh_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        )
        .bind(&channel.name)
        .bind(&channel.display_name)
        .bind(&channel.url)
        .bind(i64::from(channel.max_episodes))
        .bind(i64::from(channel.download_delay_hours))
        .bind(i64::from(channel.refresh_interval_hours))
        .bind(channel.format.as_str())
        .bind(channel.quality.as_str())
        .bind(join_categories(&channel.segment_categories))
        .bind(channel.last_refresh_at)
        .bind(channel.created_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StoreError::ChannelExists(channel.name.clone()))
            }
            Err(e) => Err(StoreError::from_sqlx(e)),
        }
    }

    /// Overwrite the editable settings of an existing channel.
    ///
    /// `last_refresh_at` and `created_at` are owned by the coordinator and
    /// left untouched.
    pub async fn update_channel(&self, channel: &Channel) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE channels
            SET display_name = ?, url = ?, max_episodes = ?, download_delay_hours = ?,
                refresh_interval_hours = ?, format = ?, quality = ?, segment_categories = ?
            WHERE name = ?
        "#,
        )
        .bind(&channel.display_name)
        .bind(&channel.url)
        .bind(i64::from(channel.max_episodes))
        .bind(i64::from(channel.download_delay_hours))
        .bind(i64::from(channel.refresh_interval_hours))
        .bind(channel.format.as_str())
        .bind(channel.quality.as_str())
        .bind(join_categories(&channel.segment_categories))
        .bind(&channel.name)
        .execute(&self.pool)
        .await;

        match result {
            Ok(r) if r.rows_affected() == 0 => Err(StoreError::ChannelNotFound(channel.name.clone())),
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StoreError::ChannelExists(channel.display_name.clone()))
            }
            Err(e) => Err(StoreError::from_sqlx(e)),
        }
    }

    /// Delete a channel row. Episode rows go with it (ON DELETE CASCADE);
    /// media files are the caller's concern, see [`Database::purge`].
    pub async fn delete_channel(&self, name: &str) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM channels WHERE name = ?")
            .bind(name)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::ChannelNotFound(name.to_string()));
        }
        Ok(())
    }

    pub async fn get_channel(&self, name: &str) -> Result<Option<Channel>, StoreError> {
        let row = sqlx::query_as::<_, ChannelRow>(&format!(
            "SELECT {CHANNEL_COLUMNS} FROM channels WHERE name = ?"
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ChannelRow::into_channel).transpose()
    }

    /// All channels, ordered by name.
    pub async fn list_channels(&self) -> Result<Vec<Channel>, StoreError> {
        let rows = sqlx::query_as::<_, ChannelRow>(&format!(
            "SELECT {CHANNEL_COLUMNS} FROM channels ORDER BY name"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ChannelRow::into_channel).collect()
    }

    /// Whether another channel already uses this display name (case-insensitive).
    pub async fn display_name_taken(
        &self,
        display_name: &str,
        except: Option<&str>,
    ) -> Result<bool, StoreError> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT name FROM channels WHERE lower(display_name) = lower(?) AND name != coalesce(?, '')",
        )
        .bind(display_name)
        .bind(except)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    /// Record the start time of the run that completed this channel.
    pub async fn set_last_refresh(&self, name: &str, at: i64) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE channels SET last_refresh_at = ? WHERE name = ?")
            .bind(at)
            .bind(name)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::ChannelNotFound(name.to_string()));
        }
        Ok(())
    }

    /// Forget the last refresh so the channel is due on the next tick.
    pub async fn clear_last_refresh(&self, name: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE channels SET last_refresh_at = NULL WHERE name = ?")
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
