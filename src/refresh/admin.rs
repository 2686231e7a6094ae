use super::coordinator::{Coordinator, CoordinatorError};
use crate::registry::{ChannelDraft, ChannelPatch, ValidationError};
use crate::storage::{Channel, StoreError};

impl Coordinator {
    // ========================================================================
    // Channel CRUD
    // ========================================================================
    //
    // Mutations take a lease on the channel first. A channel covered by the
    // active run cannot be edited, and a run cannot start over a channel
    // that is being edited. Both sides fail fast with `Busy`.

    pub async fn list_channels(&self) -> Result<Vec<Channel>, CoordinatorError> {
        Ok(self.db.list_channels().await?)
    }

    pub async fn get_channel(&self, name: &str) -> Result<Channel, CoordinatorError> {
        self.db
            .get_channel(name)
            .await?
            .ok_or_else(|| CoordinatorError::NotFound(name.to_string()))
    }

    async fn check_reachable(&self, url: &str) -> Result<(), CoordinatorError> {
        match self.lister.probe(url).await {
            Ok(probe) => {
                tracing::debug!(url = %url, title = ?probe.title, "Channel URL reachable");
                Ok(())
            }
            Err(e) => Err(ValidationError::single("url", format!("channel is not reachable: {e}")).into()),
        }
    }

    /// Validate, probe and store a new channel.
    pub async fn add_channel(&self, draft: ChannelDraft) -> Result<Channel, CoordinatorError> {
        let channel = draft.validate(&self.settings.defaults, self.clock.now().timestamp())?;
        let _lease = self.tracker.lease(&channel.name)?;

        if self.db.get_channel(&channel.name).await?.is_some() {
            return Err(ValidationError::single("name", "a channel with this name already exists").into());
        }
        if self.db.display_name_taken(&channel.display_name, None).await? {
            return Err(ValidationError::single(
                "display_name",
                "a channel with this display name already exists",
            )
            .into());
        }
        self.check_reachable(&channel.url).await?;

        match self.db.insert_channel(&channel).await {
            Ok(()) => {}
            Err(StoreError::ChannelExists(_)) => {
                return Err(ValidationError::single("name", "a channel with this name already exists").into());
            }
            Err(e) => return Err(e.into()),
        }
        tracing::info!(channel = %channel.name, url = %channel.url, "Channel added");
        Ok(channel)
    }

    /// Apply a partial edit. The URL is re-probed only when it changes.
    pub async fn update_channel(
        &self,
        name: &str,
        patch: ChannelPatch,
    ) -> Result<Channel, CoordinatorError> {
        let _lease = self.tracker.lease(name)?;
        let current = self.get_channel(name).await?;
        let updated = patch.apply(&current)?;

        if updated.display_name != current.display_name
            && self
                .db
                .display_name_taken(&updated.display_name, Some(name))
                .await?
        {
            return Err(ValidationError::single(
                "display_name",
                "a channel with this display name already exists",
            )
            .into());
        }
        if updated.url != current.url {
            self.check_reachable(&updated.url).await?;
        }

        match self.db.update_channel(&updated).await {
            Ok(()) => {}
            Err(StoreError::ChannelExists(_)) => {
                return Err(ValidationError::single(
                    "display_name",
                    "a channel with this display name already exists",
                )
                .into());
            }
            Err(e) => return Err(e.into()),
        }
        tracing::info!(channel = %name, "Channel updated");
        Ok(updated)
    }

    /// Remove a channel with all its episodes and media.
    pub async fn delete_channel(&self, name: &str) -> Result<(), CoordinatorError> {
        let _lease = self.tracker.lease(name)?;
        self.get_channel(name).await?;

        self.remove_media(name).await?;
        self.db.delete_channel(name).await?;
        tracing::info!(channel = %name, "Channel deleted");
        Ok(())
    }

    /// Remove all episodes and media of a channel and make it due again.
    ///
    /// Returns the number of episode records removed.
    pub async fn purge_channel(&self, name: &str) -> Result<usize, CoordinatorError> {
        let _lease = self.tracker.lease(name)?;
        self.get_channel(name).await?;

        let removed = self.remove_media(name).await?;
        self.db.clear_last_refresh(name).await?;
        Ok(removed)
    }

    async fn remove_media(&self, name: &str) -> Result<usize, CoordinatorError> {
        match self.db.purge(name, &self.settings.channel_dir(name)).await {
            Ok(removed) => Ok(removed),
            Err(StoreError::PartialDeletion {
                removed, failures, ..
            }) => {
                for (path, error) in &failures {
                    tracing::warn!(channel = %name, path = %path.display(), error = %error, "Media left behind");
                }
                Ok(removed)
            }
            Err(e) => Err(e.into()),
        }
    }
}
