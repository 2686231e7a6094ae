use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::schema::Database;
use super::types::{Episode, EpisodeRow, StoreError};

const EPISODE_COLUMNS: &str = "channel, external_id, title, published_at, duration_seconds, \
     description, file_path, extension, file_size, thumbnail_path, downloaded_at";

/// Remove a file, treating an already-missing file as removed.
async fn remove_file_if_present(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Delete the media file and thumbnail of each episode, collecting failures.
async fn remove_media(episodes: &[Episode]) -> Vec<(PathBuf, String)> {
    let mut failures = Vec::new();
    for episode in episodes {
        let paths = std::iter::once(&episode.file_path).chain(episode.thumbnail_path.as_ref());
        for path in paths {
            if let Err(e) = remove_file_if_present(path).await {
                tracing::warn!(path = %path.display(), error = %e, "Failed to delete media file");
                failures.push((path.clone(), e.to_string()));
            }
        }
    }
    failures
}

impl Database {
    // ========================================================================
    // Episode Store
    // ========================================================================

    /// Record a downloaded episode.
    ///
    /// # Errors
    ///
    /// - `DuplicateEpisode` if the external id is already stored for the channel
    /// - `ChannelNotFound` if the channel does not exist
    pub async fn add_episode(&self, episode: &Episode) -> Result<(), StoreError> {
        let file_size = i64::try_from(episode.file_size).unwrap_or(i64::MAX);
        let result = sqlx::query(
            r#"
            INSERT INTO episodes (channel, external_id, title, published_at, duration_seconds,
                                  description, file_path, extension, file_size, thumbnail_path,
                                  downloaded_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        )
        .bind(&episode.channel)
        .bind(&episode.external_id)
        .bind(&episode.title)
        .bind(episode.published_at)
        .bind(episode.duration_seconds)
        .bind(&episode.description)
        .bind(episode.file_path.to_string_lossy().into_owned())
        .bind(&episode.extension)
        .bind(file_size)
        .bind(
            episode
                .thumbnail_path
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned()),
        )
        .bind(episode.downloaded_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StoreError::DuplicateEpisode {
                    channel: episode.channel.clone(),
                    external_id: episode.external_id.clone(),
                })
            }
            Err(sqlx::Error::Database(e)) if e.is_foreign_key_violation() => {
                Err(StoreError::ChannelNotFound(episode.channel.clone()))
            }
            Err(e) => Err(StoreError::from_sqlx(e)),
        }
    }

    /// Episodes of a channel, newest `published_at` first (ties by external id).
    pub async fn list_episodes(&self, channel: &str) -> Result<Vec<Episode>, StoreError> {
        let rows = sqlx::query_as::<_, EpisodeRow>(&format!(
            "SELECT {EPISODE_COLUMNS} FROM episodes WHERE channel = ? \
             ORDER BY published_at DESC, external_id ASC"
        ))
        .bind(channel)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(EpisodeRow::into_episode).collect())
    }

    /// External ids already stored for a channel.
    pub async fn episode_ids(&self, channel: &str) -> Result<HashSet<String>, StoreError> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT external_id FROM episodes WHERE channel = ?")
            .bind(channel)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    pub async fn count_episodes(&self, channel: &str) -> Result<u64, StoreError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM episodes WHERE channel = ?")
            .bind(channel)
            .fetch_one(&self.pool)
            .await?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Remove every episode beyond the newest `keep_n`.
    ///
    /// Metadata is deleted in one transaction before any file is touched.
    /// Returns the removed episodes. If some files cannot be deleted the
    /// metadata stays deleted and `PartialDeletion` reports the failures.
    pub async fn evict_oldest(
        &self,
        channel: &str,
        keep_n: u32,
    ) -> Result<Vec<Episode>, StoreError> {
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query_as::<_, EpisodeRow>(&format!(
            "SELECT {EPISODE_COLUMNS} FROM episodes WHERE channel = ? \
             ORDER BY published_at DESC, external_id ASC LIMIT -1 OFFSET ?"
        ))
        .bind(channel)
        .bind(i64::from(keep_n))
        .fetch_all(&mut *tx)
        .await?;

        if rows.is_empty() {
            tx.rollback().await?;
            return Ok(Vec::new());
        }

        let evicted: Vec<Episode> = rows.into_iter().map(EpisodeRow::into_episode).collect();
        for episode in &evicted {
            sqlx::query("DELETE FROM episodes WHERE channel = ? AND external_id = ?")
                .bind(channel)
                .bind(&episode.external_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        tracing::debug!(channel = %channel, evicted = evicted.len(), keep = keep_n, "Evicted old episodes");

        let failures = remove_media(&evicted).await;
        if !failures.is_empty() {
            return Err(StoreError::PartialDeletion {
                channel: channel.to_string(),
                removed: evicted.len(),
                failures,
            });
        }
        Ok(evicted)
    }

    /// Remove all episodes of a channel along with their media directory.
    ///
    /// Idempotent: purging an empty channel or a missing directory succeeds.
    /// Returns how many episode records were removed.
    pub async fn purge(&self, channel: &str, media_dir: &Path) -> Result<usize, StoreError> {
        let episodes = self.list_episodes(channel).await?;

        sqlx::query("DELETE FROM episodes WHERE channel = ?")
            .bind(channel)
            .execute(&self.pool)
            .await?;

        let mut failures = remove_media(&episodes).await;
        match tokio::fs::remove_dir_all(media_dir).await {
            Err(e) if e.kind() != ErrorKind::NotFound => {
                failures.push((media_dir.to_path_buf(), e.to_string()));
            }
            _ => {}
        }

        if !failures.is_empty() {
            return Err(StoreError::PartialDeletion {
                channel: channel.to_string(),
                removed: episodes.len(),
                failures,
            });
        }
        tracing::info!(channel = %channel, removed = episodes.len(), "Purged channel media");
        Ok(episodes.len())
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::{Channel, Database, Episode, MediaFormat, Quality, StoreError};
    use std::collections::BTreeSet;
    use std::path::Path;

    async fn test_db() -> Database {
        let db = Database::open(":memory:").await.unwrap();
        db.insert_channel(&Channel {
            name: "alpha".into(),
            display_name: "Alpha".into(),
            url: "https://www.youtube.com/@alpha".into(),
            max_episodes: 10,
            download_delay_hours: 0,
            refresh_interval_hours: 24,
            format: MediaFormat::Video,
            quality: Quality::Max,
            segment_categories: BTreeSet::new(),
            last_refresh_at: None,
            created_at: 0,
        })
        .await
        .unwrap();
        db
    }

    fn test_episode(dir: &Path, id: &str, published_at: i64) -> Episode {
        let file_path = dir.join(format!("{id}.mp4"));
        std::fs::write(&file_path, b"media").unwrap();
        Episode {
            channel: "alpha".into(),
            external_id: id.into(),
            title: format!("Episode {id}"),
            published_at,
            duration_seconds: Some(60),
            description: String::new(),
            file_path,
            extension: "mp4".into(),
            file_size: 5,
            thumbnail_path: None,
            downloaded_at: published_at + 10,
        }
    }

    #[tokio::test]
    async fn test_add_and_list_newest_first() {
        let db = test_db().await;
        let dir = tempfile::tempdir().unwrap();
        db.add_episode(&test_episode(dir.path(), "old", 100)).await.unwrap();
        db.add_episode(&test_episode(dir.path(), "new", 300)).await.unwrap();
        db.add_episode(&test_episode(dir.path(), "mid", 200)).await.unwrap();

        let ids: Vec<_> = db
            .list_episodes("alpha")
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.external_id)
            .collect();
        assert_eq!(ids, vec!["new", "mid", "old"]);
    }

    #[tokio::test]
    async fn test_ties_ordered_by_external_id() {
        let db = test_db().await;
        let dir = tempfile::tempdir().unwrap();
        db.add_episode(&test_episode(dir.path(), "b", 100)).await.unwrap();
        db.add_episode(&test_episode(dir.path(), "a", 100)).await.unwrap();

        let ids: Vec<_> = db
            .list_episodes("alpha")
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.external_id)
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_add_duplicate_is_rejected() {
        let db = test_db().await;
        let dir = tempfile::tempdir().unwrap();
        let episode = test_episode(dir.path(), "v1", 100);
        db.add_episode(&episode).await.unwrap();

        let err = db.add_episode(&episode).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::DuplicateEpisode { ref external_id, .. } if external_id == "v1"
        ));
        assert_eq!(db.count_episodes("alpha").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_add_to_unknown_channel() {
        let db = test_db().await;
        let dir = tempfile::tempdir().unwrap();
        let mut episode = test_episode(dir.path(), "v1", 100);
        episode.channel = "ghost".into();

        let err = db.add_episode(&episode).await.unwrap_err();
        assert!(matches!(err, StoreError::ChannelNotFound(_)));
    }

    #[tokio::test]
    async fn test_episode_ids() {
        let db = test_db().await;
        let dir = tempfile::tempdir().unwrap();
        db.add_episode(&test_episode(dir.path(), "v1", 100)).await.unwrap();
        db.add_episode(&test_episode(dir.path(), "v2", 200)).await.unwrap();

        let ids = db.episode_ids("alpha").await.unwrap();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains("v1") && ids.contains("v2"));
        assert!(db.episode_ids("ghost").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_evict_oldest_removes_rows_and_files() {
        let db = test_db().await;
        let dir = tempfile::tempdir().unwrap();
        for (id, at) in [("e1", 100), ("e2", 200), ("e3", 300)] {
            db.add_episode(&test_episode(dir.path(), id, at)).await.unwrap();
        }

        let evicted = db.evict_oldest("alpha", 2).await.unwrap();
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].external_id, "e1");
        assert!(!dir.path().join("e1.mp4").exists());
        assert!(dir.path().join("e2.mp4").exists());
        assert_eq!(db.count_episodes("alpha").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_evict_with_nothing_to_remove() {
        let db = test_db().await;
        let dir = tempfile::tempdir().unwrap();
        db.add_episode(&test_episode(dir.path(), "e1", 100)).await.unwrap();
        assert!(db.evict_oldest("alpha", 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_evict_tolerates_missing_file() {
        let db = test_db().await;
        let dir = tempfile::tempdir().unwrap();
        db.add_episode(&test_episode(dir.path(), "e1", 100)).await.unwrap();
        db.add_episode(&test_episode(dir.path(), "e2", 200)).await.unwrap();
        std::fs::remove_file(dir.path().join("e1.mp4")).unwrap();

        let evicted = db.evict_oldest("alpha", 1).await.unwrap();
        assert_eq!(evicted.len(), 1);
    }

    #[tokio::test]
    async fn test_evict_partial_deletion_keeps_metadata_removed() {
        let db = test_db().await;
        let dir = tempfile::tempdir().unwrap();
        db.add_episode(&test_episode(dir.path(), "e2", 200)).await.unwrap();

        // A directory where the file should be cannot be removed with remove_file
        let mut stuck = test_episode(dir.path(), "e1", 100);
        std::fs::remove_file(&stuck.file_path).unwrap();
        stuck.file_path = dir.path().join("e1-dir");
        std::fs::create_dir(&stuck.file_path).unwrap();
        db.add_episode(&stuck).await.unwrap();

        let err = db.evict_oldest("alpha", 1).await.unwrap_err();
        match err {
            StoreError::PartialDeletion {
                removed, failures, ..
            } => {
                assert_eq!(removed, 1);
                assert_eq!(failures.len(), 1);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(db.count_episodes("alpha").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_purge_is_idempotent() {
        let db = test_db().await;
        let root = tempfile::tempdir().unwrap();
        let media_dir = root.path().join("alpha");
        std::fs::create_dir(&media_dir).unwrap();
        db.add_episode(&test_episode(&media_dir, "e1", 100)).await.unwrap();

        assert_eq!(db.purge("alpha", &media_dir).await.unwrap(), 1);
        assert!(!media_dir.exists());
        assert!(db.list_episodes("alpha").await.unwrap().is_empty());

        assert_eq!(db.purge("alpha", &media_dir).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delete_channel_cascades_episodes() {
        let db = test_db().await;
        let dir = tempfile::tempdir().unwrap();
        db.add_episode(&test_episode(dir.path(), "e1", 100)).await.unwrap();
        db.delete_channel("alpha").await.unwrap();
        assert_eq!(db.count_episodes("alpha").await.unwrap(), 0);
    }
}
