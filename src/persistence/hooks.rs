//! Load/save hooks wrapped around every external call.

use std::sync::Arc;

use crate::context::SharedRunContext;
use crate::error::AgencyError;
use crate::thread::ThreadStore;

/// Hydrates a conversation before a call and saves what the call touched
/// afterwards.
#[derive(Debug, Clone)]
pub struct PersistenceHooks {
    store: Arc<ThreadStore>,
}

impl PersistenceHooks {
    pub fn new(store: Arc<ThreadStore>) -> Self {
        Self { store }
    }

    /// Whether a persistence backend is configured.
    pub fn is_durable(&self) -> bool {
        self.store.persistence().is_some()
    }

    /// Load the conversation and hydrate its threads.
    ///
    /// Runs before any model call. Returns whether saved data was found.
    pub async fn before_run(&self, ctx: &SharedRunContext) -> Result<bool, AgencyError> {
        if !self.is_durable() {
            return Ok(false);
        }
        let conversation_id = ctx.conversation_id();
        let loaded = self.store.load_conversation(conversation_id).await.map_err(|err| {
            tracing::warn!(conversation_id, error = %err, "loading conversation failed");
            into_persistence(err)
        })?;
        tracing::debug!(conversation_id, loaded, "before_run complete");
        Ok(loaded)
    }

    /// Save every thread the call touched, whatever its outcome.
    ///
    /// A save failure after a successful run is returned as
    /// [`AgencyError::Persistence`]. After a failed run the run's own error
    /// takes precedence, so the save failure is only logged.
    pub async fn after_run<T>(
        &self,
        ctx: &SharedRunContext,
        outcome: &Result<T, AgencyError>,
    ) -> Result<(), AgencyError> {
        if !self.is_durable() {
            return Ok(());
        }
        let conversation_id = ctx.conversation_id();
        let touched = ctx.touched_channels();
        match self.store.save_channels(conversation_id, &touched).await {
            Ok(()) => {
                let earlier = ctx.persistence_failures();
                if !earlier.is_empty() {
                    tracing::debug!(
                        conversation_id,
                        recovered = earlier.len(),
                        "final save succeeded after earlier failures"
                    );
                }
                ctx.clear_persistence_failures();
                tracing::debug!(conversation_id, channels = touched.len(), "after_run saved threads");
                Ok(())
            }
            Err(err) if outcome.is_err() => {
                tracing::warn!(
                    conversation_id,
                    error = %err,
                    "saving threads after failed run also failed"
                );
                Ok(())
            }
            Err(err) => {
                tracing::warn!(conversation_id, error = %err, "saving threads failed");
                Err(into_persistence(err))
            }
        }
    }
}

fn into_persistence(err: AgencyError) -> AgencyError {
    match err {
        AgencyError::Persistence { .. } => err,
        other => AgencyError::persistence_with_source(other.to_string(), other),
    }
}
