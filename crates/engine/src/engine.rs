use std::sync::Arc;

use arc_swap::ArcSwap;
use confab_model::{
    FinalResponseChunk, Message, MessageHistoryPatch, MessageId, NewMessage, StreamChunk,
};
use futures::{Stream, StreamExt};
use snafu::ResultExt;
use tokio::sync::{Mutex, RwLock, RwLockWriteGuard, watch};

use crate::error::{EngineResult, PayloadSnafu};
use crate::ids::IdGenerator;
use crate::normalizer::NormalizeOptions;
use crate::observer::{MessageObserver, ObserverRegistry};
use crate::settings::{EngineSettings, SettingsStore};
use crate::store::{CanonicalStore, ConversationState};
use crate::streaming::{ChunkOutcome, IgnoredChunk};

/// Owned copy of the conversation at one revision.
pub type StoreSnapshot = ConversationState;

/// Async front of the canonical store.
///
/// Mutations run one at a time. The store write lock covers only the synchronous
/// commit, so observers and readers see committed state.
pub struct ChatEngine {
    store: RwLock<CanonicalStore>,
    mutation_gate: Mutex<()>,
    observers: ObserverRegistry,
    settings: Arc<ArcSwap<EngineSettings>>,
    revision_tx: watch::Sender<u64>,
}

impl ChatEngine {
    pub fn new(settings: EngineSettings) -> Self {
        Self::with_shared_settings(Arc::new(ArcSwap::from_pointee(settings.normalized())))
    }

    pub fn from_settings_store(settings: &SettingsStore) -> Self {
        Self::with_shared_settings(settings.shared())
    }

    /// Settings swapped into `settings` apply from the next mutation; `id_prefix` is read once.
    pub fn with_shared_settings(settings: Arc<ArcSwap<EngineSettings>>) -> Self {
        let current = settings.load_full();
        let ids = IdGenerator::from_prefix(current.id_prefix.as_deref());
        let store = CanonicalStore::new(ids, NormalizeOptions::from(current.as_ref()));
        let (revision_tx, _) = watch::channel(0);

        Self {
            store: RwLock::new(store),
            mutation_gate: Mutex::new(()),
            observers: ObserverRegistry::default(),
            settings,
            revision_tx,
        }
    }

    pub fn settings(&self) -> Arc<EngineSettings> {
        self.settings.load_full()
    }

    pub async fn register_observer(&self, observer: Arc<dyn MessageObserver>) {
        self.observers.register(observer).await;
    }

    /// Receiver of the store revision, updated after every committed mutation.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision_tx.subscribe()
    }

    pub async fn snapshot(&self) -> StoreSnapshot {
        self.store.read().await.state().clone()
    }

    pub async fn read<R>(&self, reader: impl FnOnce(&ConversationState) -> R) -> R {
        reader(self.store.read().await.state())
    }

    pub async fn add_message(&self, message: NewMessage) -> MessageId {
        let _gate = self.mutation_gate.lock().await;
        let mut message = self.store.read().await.assign_id(message);
        self.observers.before_insert(&mut message).await;

        let item_count = {
            let mut store = self.write_store().await;
            let item_count = store.add_message(message.clone());
            self.publish(&store);
            item_count
        };

        if self.debug_enabled() {
            tracing::info!(
                message_id = %message.id,
                item_count,
                payload = %serde_json::to_string(&message).unwrap_or_default(),
                "added message"
            );
        } else {
            tracing::debug!(message_id = %message.id, item_count, "added message");
        }

        self.observers.after_insert(&message).await;
        message.id
    }

    pub async fn add_message_json(&self, raw: &str) -> EngineResult<MessageId> {
        let message = NewMessage::from_json(raw).context(PayloadSnafu {
            stage: "decode-add-message-payload",
        })?;
        Ok(self.add_message(message).await)
    }

    pub async fn add_message_chunk(&self, chunk: StreamChunk) -> ChunkOutcome {
        let _gate = self.mutation_gate.lock().await;
        let kind = chunk.kind_name();
        let response_id = chunk.response_id().clone();

        let outcome = match chunk {
            StreamChunk::FinalResponse(FinalResponseChunk { final_message }) => {
                self.finalize_response(final_message).await
            }
            chunk => {
                let mut store = self.write_store().await;
                let outcome = store.add_message_chunk(chunk);
                self.publish(&store);
                outcome
            }
        };

        if self.debug_enabled() {
            tracing::info!(
                response_id = %response_id,
                kind,
                outcome = ?outcome,
                "applied stream chunk"
            );
        } else {
            tracing::debug!(
                response_id = %response_id,
                kind,
                outcome = outcome.label(),
                "applied stream chunk"
            );
        }
        outcome
    }

    pub async fn add_chunk_json(&self, raw: &str) -> EngineResult<ChunkOutcome> {
        let chunk = StreamChunk::from_json(raw).context(PayloadSnafu {
            stage: "decode-stream-chunk-payload",
        })?;
        Ok(self.add_message_chunk(chunk).await)
    }

    /// Applies every chunk of `chunks` in receipt order.
    pub async fn consume_chunks<S>(&self, chunks: S) -> Vec<ChunkOutcome>
    where
        S: Stream<Item = StreamChunk>,
    {
        let mut chunks = std::pin::pin!(chunks);
        let mut outcomes = Vec::new();
        while let Some(chunk) = chunks.next().await {
            outcomes.push(self.add_message_chunk(chunk).await);
        }
        outcomes
    }

    /// Removes known messages and notifies observers with the ids actually removed.
    pub async fn remove_messages(&self, ids: &[MessageId]) -> Vec<MessageId> {
        let _gate = self.mutation_gate.lock().await;
        let removed = {
            let mut store = self.write_store().await;
            let removed = store.remove_messages(ids);
            self.publish(&store);
            removed
        };

        tracing::debug!(
            requested = ids.len(),
            removed = removed.len(),
            "removed messages"
        );
        self.observers.messages_removed(&removed).await;
        removed
    }

    /// Drops the whole conversation without notifying observers.
    pub async fn clear_conversation(&self) {
        let _gate = self.mutation_gate.lock().await;
        let mut store = self.write_store().await;
        store.clear_conversation();
        self.publish(&store);
        tracing::debug!("cleared conversation");
    }

    pub async fn merge_message_history(&self, id: &MessageId, patch: MessageHistoryPatch) -> bool {
        let _gate = self.mutation_gate.lock().await;
        let mut store = self.write_store().await;
        let merged = store.merge_message_history(id, patch);
        self.publish(&store);

        if !merged {
            tracing::debug!(message_id = %id, "history merge for unknown message");
        }
        merged
    }

    pub async fn adjust_loading(&self, delta: i32) -> u32 {
        let _gate = self.mutation_gate.lock().await;
        let mut store = self.write_store().await;
        let value = store.adjust_loading(delta);
        self.publish(&store);
        value
    }

    pub async fn adjust_hydrating(&self, delta: i32) -> u32 {
        let _gate = self.mutation_gate.lock().await;
        let mut store = self.write_store().await;
        let value = store.adjust_hydrating(delta);
        self.publish(&store);
        value
    }

    async fn finalize_response(&self, mut final_message: Message) -> ChunkOutcome {
        if self.store.read().await.state().is_finalized(&final_message.id) {
            return ChunkOutcome::Ignored(IgnoredChunk::ResponseFinalized(final_message.id));
        }

        self.observers.before_insert(&mut final_message).await;

        let (outcome, stored) = {
            let mut store = self.write_store().await;
            let outcome = store.add_message_chunk(StreamChunk::final_response(final_message));
            let stored = match &outcome {
                ChunkOutcome::Finalized { response_id, .. } => {
                    store.state().message(response_id).cloned()
                }
                _ => None,
            };
            self.publish(&store);
            (outcome, stored)
        };

        if let Some(stored) = stored {
            self.observers.after_insert(&stored).await;
        }
        outcome
    }

    async fn write_store(&self) -> RwLockWriteGuard<'_, CanonicalStore> {
        let mut store = self.store.write().await;
        store.set_options(NormalizeOptions::from(self.settings.load().as_ref()));
        store
    }

    fn publish(&self, store: &CanonicalStore) {
        let revision = store.state().revision();
        self.revision_tx.send_if_modified(|current| {
            let changed = *current != revision;
            *current = revision;
            changed
        });
    }

    fn debug_enabled(&self) -> bool {
        self.settings.load().debug
    }
}
