//! Read access to externally generated previews.

use std::sync::Arc;

use uuid::Uuid;

use tessera_core::types::ActionPreview;
use tessera_storage::{ActionStore, PreviewRepository};

use crate::error::ActionError;

/// Serves previews exactly as the producer stored them, including `pending`
/// and `failed` ones.
pub struct PreviewAccessor {
    store: Arc<ActionStore>,
    previews: Arc<PreviewRepository>,
}

impl PreviewAccessor {
    pub fn new(store: Arc<ActionStore>, previews: Arc<PreviewRepository>) -> Self {
        Self { store, previews }
    }

    /// `None` when no preview has been produced yet.
    pub fn get(&self, user_id: &str, action_id: Uuid) -> Result<Option<ActionPreview>, ActionError> {
        let action = self.store.get_owned(user_id, action_id)?;
        Ok(self.previews.get(action.id)?)
    }

    /// Producer side, reached only through the trusted surface.
    pub fn put(&self, preview: &ActionPreview) -> Result<(), ActionError> {
        self.previews.put(preview)?;
        tracing::debug!(action_id = %preview.action_id, status = %preview.status, "Preview stored");
        Ok(())
    }
}
