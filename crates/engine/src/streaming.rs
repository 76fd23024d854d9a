use confab_model::{
    GenericItem, ItemChunk, ItemStreamingMetadata, LocalItemId, Message, MessageId,
    MessageStreamingHistory, StreamChunk,
};

use crate::local_item::StreamingState;
use crate::normalizer::ItemNormalizer;
use crate::store::ConversationState;

/// Lifecycle of one `(response id, item id)` key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemPhase {
    Unseen,
    Streaming,
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoredChunk {
    ItemAlreadyDone(LocalItemId),
    ResponseFinalized(MessageId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkOutcome {
    Started {
        response_id: MessageId,
        local_item_id: LocalItemId,
    },
    Appended {
        local_item_id: LocalItemId,
        chunk_count: usize,
    },
    Completed {
        local_item_id: LocalItemId,
    },
    Finalized {
        response_id: MessageId,
        item_count: usize,
    },
    Ignored(IgnoredChunk),
}

impl ChunkOutcome {
    pub fn is_ignored(&self) -> bool {
        matches!(self, Self::Ignored(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Started { .. } => "started",
            Self::Appended { .. } => "appended",
            Self::Completed { .. } => "completed",
            Self::Finalized { .. } => "finalized",
            Self::Ignored(IgnoredChunk::ItemAlreadyDone(_)) => "ignored_item_done",
            Self::Ignored(IgnoredChunk::ResponseFinalized(_)) => "ignored_response_finalized",
        }
    }
}

/// Applies stream chunks to a conversation, one chunk per call.
pub struct StreamingAssembler<'s, 'n> {
    state: &'s mut ConversationState,
    normalizer: ItemNormalizer<'n>,
}

impl<'s, 'n> StreamingAssembler<'s, 'n> {
    pub fn new(state: &'s mut ConversationState, normalizer: ItemNormalizer<'n>) -> Self {
        Self { state, normalizer }
    }

    pub fn apply(&mut self, chunk: StreamChunk) -> ChunkOutcome {
        let outcome = match chunk {
            StreamChunk::PartialItem(chunk) => self.apply_partial(chunk),
            StreamChunk::CompleteItem(chunk) => self.apply_complete(chunk),
            StreamChunk::FinalResponse(chunk) => self.apply_final(chunk.final_message),
        };

        if let ChunkOutcome::Ignored(reason) = &outcome {
            tracing::debug!(?reason, "ignoring late stream chunk");
        }
        outcome
    }

    fn apply_partial(&mut self, chunk: ItemChunk) -> ChunkOutcome {
        if self.state.is_finalized(&chunk.response_id) {
            return ChunkOutcome::Ignored(IgnoredChunk::ResponseFinalized(chunk.response_id));
        }

        let local_item_id = LocalItemId::for_streaming_item(&chunk.response_id, &chunk.item_id);
        let payload = stamped(chunk.payload, &chunk.item_id);

        match self.state.item_phase_of(&local_item_id) {
            ItemPhase::Done => ChunkOutcome::Ignored(IgnoredChunk::ItemAlreadyDone(local_item_id)),
            ItemPhase::Unseen => {
                let streaming_state = StreamingState::started(payload.clone());
                self.start_item(
                    &chunk.response_id,
                    local_item_id.clone(),
                    &payload,
                    streaming_state,
                );
                ChunkOutcome::Started {
                    response_id: chunk.response_id,
                    local_item_id,
                }
            }
            ItemPhase::Streaming => {
                let chunk_count = self.append(&chunk.response_id, &local_item_id, payload);
                ChunkOutcome::Appended {
                    local_item_id,
                    chunk_count,
                }
            }
        }
    }

    fn apply_complete(&mut self, chunk: ItemChunk) -> ChunkOutcome {
        if self.state.is_finalized(&chunk.response_id) {
            return ChunkOutcome::Ignored(IgnoredChunk::ResponseFinalized(chunk.response_id));
        }

        let local_item_id = LocalItemId::for_streaming_item(&chunk.response_id, &chunk.item_id);
        let payload = stamped(chunk.payload, &chunk.item_id);

        match self.state.item_phase_of(&local_item_id) {
            ItemPhase::Done => {
                return ChunkOutcome::Ignored(IgnoredChunk::ItemAlreadyDone(local_item_id));
            }
            ItemPhase::Unseen => self.start_item(
                &chunk.response_id,
                local_item_id.clone(),
                &payload,
                StreamingState::done(),
            ),
            // The terminal payload wins over whatever the partial chunks assembled.
            ItemPhase::Streaming => self.replace_item(
                &chunk.response_id,
                &local_item_id,
                &payload,
                StreamingState::done(),
            ),
        }

        ChunkOutcome::Completed { local_item_id }
    }

    fn apply_final(&mut self, mut message: Message) -> ChunkOutcome {
        if self.state.is_finalized(&message.id) {
            return ChunkOutcome::Ignored(IgnoredChunk::ResponseFinalized(message.id));
        }

        message.history.streaming = Some(MessageStreamingHistory { is_done: true });
        let normalized = self.normalizer.normalize(&message);
        let item_count = normalized.local_items.len();
        let response_id = message.id.clone();

        self.state.commit_message(message, normalized);
        self.state.mark_finalized(response_id.clone());

        ChunkOutcome::Finalized {
            response_id,
            item_count,
        }
    }

    /// Creates the local items for a key seen for the first time and fixes its position.
    fn start_item(
        &mut self,
        response_id: &MessageId,
        local_item_id: LocalItemId,
        payload: &GenericItem,
        streaming_state: StreamingState,
    ) {
        self.ensure_placeholder(response_id);
        let announce = self
            .state
            .message(response_id)
            .is_some_and(|message| self.normalizer.announces(message));

        let mut local_items = self
            .normalizer
            .normalize_item(response_id, payload, local_item_id, announce)
            .local_items;
        let Some(mut root) = local_items.pop() else {
            return;
        };
        root.ui_state.streaming_state = Some(streaming_state);

        for item in local_items {
            self.state.insert_item(item);
        }
        self.state.push_top_level_item(root);
    }

    /// Appends one partial payload; returns the buffered chunk count.
    fn append(
        &mut self,
        response_id: &MessageId,
        local_item_id: &LocalItemId,
        payload: GenericItem,
    ) -> usize {
        let Some(item) = self.state.item_mut(local_item_id) else {
            return 0;
        };
        let Some(mut streaming_state) = item.ui_state.streaming_state.take() else {
            return 0;
        };
        streaming_state.chunks.push(payload.clone());
        let chunk_count = streaming_state.chunks.len();

        let same_type = item.item.response_type() == payload.response_type();
        if same_type
            && let Some(addition) = payload.streamable_text()
            && let Some(text) = item.item.streamable_text_mut()
        {
            text.push_str(addition);
            item.ui_state.streaming_state = Some(streaming_state);
            return chunk_count;
        }

        // Payloads without concatenable text take over the rendered content.
        self.replace_item(response_id, local_item_id, &payload, streaming_state);
        chunk_count
    }

    /// Re-normalizes `payload` under an existing local id, dropping the previous children.
    fn replace_item(
        &mut self,
        response_id: &MessageId,
        local_item_id: &LocalItemId,
        payload: &GenericItem,
        streaming_state: StreamingState,
    ) {
        let (parent_id, needs_announcement) = match self.state.item(local_item_id) {
            Some(existing) => (
                existing.ui_state.parent_id.clone(),
                existing.ui_state.needs_announcement,
            ),
            None => (None, false),
        };

        let dropped = self.state.remove_descendants(local_item_id);
        let mut local_items = self
            .normalizer
            .normalize_item(response_id, payload, local_item_id.clone(), needs_announcement)
            .local_items;
        let Some(mut root) = local_items.pop() else {
            return;
        };
        root.ui_state.parent_id = parent_id;
        root.ui_state.streaming_state = Some(streaming_state);

        if dropped > 0 {
            tracing::debug!(local_item_id = %local_item_id, dropped, "replaced streamed children");
        }
        for item in local_items {
            self.state.insert_item(item);
        }
        self.state.insert_item(root);
    }

    fn ensure_placeholder(&mut self, response_id: &MessageId) {
        if self.state.contains_message(response_id) {
            return;
        }

        tracing::debug!(response_id = %response_id, "first chunk for unknown response");
        let mut placeholder = Message::response(response_id.clone(), Vec::new());
        placeholder.history.streaming = Some(MessageStreamingHistory { is_done: false });
        self.state.insert_placeholder(placeholder);
    }
}

fn stamped(mut payload: GenericItem, item_id: &str) -> GenericItem {
    payload
        .streaming_metadata
        .get_or_insert_with(|| ItemStreamingMetadata {
            id: item_id.to_string(),
        });
    payload
}

#[cfg(test)]
mod tests {
    use confab_model::CarouselItem;

    use super::*;
    use crate::ids::IdGenerator;
    use crate::normalizer::NormalizeOptions;

    struct Harness {
        state: ConversationState,
        ids: IdGenerator,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                state: ConversationState::default(),
                ids: IdGenerator::with_prefix("t"),
            }
        }

        fn apply(&mut self, chunk: StreamChunk) -> ChunkOutcome {
            let normalizer = ItemNormalizer::new(&self.ids, NormalizeOptions::default());
            StreamingAssembler::new(&mut self.state, normalizer).apply(chunk)
        }

        fn text(&self, response_id: &str, item_id: &str) -> Option<String> {
            let id = LocalItemId::for_streaming_item(&response_id.into(), item_id);
            self.state
                .item(&id)
                .and_then(|item| item.item.streamable_text())
                .map(str::to_string)
        }

        fn streaming_state(&self, response_id: &str, item_id: &str) -> Option<&StreamingState> {
            let id = LocalItemId::for_streaming_item(&response_id.into(), item_id);
            self.state
                .item(&id)
                .and_then(|item| item.ui_state.streaming_state.as_ref())
        }
    }

    #[test]
    fn partial_chunks_concatenate_at_every_step() {
        let mut harness = Harness::new();
        let mut expected = String::new();

        for (index, part) in ["He", "llo", ", ", "wor", "ld"].into_iter().enumerate() {
            let outcome = harness.apply(StreamChunk::partial("r1", "1", GenericItem::text(part)));
            expected.push_str(part);

            if index == 0 {
                assert!(matches!(outcome, ChunkOutcome::Started { .. }));
            } else {
                assert_eq!(
                    outcome,
                    ChunkOutcome::Appended {
                        local_item_id: "r1::1".into(),
                        chunk_count: index + 1,
                    }
                );
            }
            assert_eq!(harness.text("r1", "1").as_deref(), Some(expected.as_str()));
            assert_eq!(
                harness.streaming_state("r1", "1").map(StreamingState::joined_text),
                Some(expected.clone())
            );
        }

        assert_eq!(harness.state.streaming_item_count(), 1);
    }

    #[test]
    fn complete_chunk_wins_over_partials() {
        let mut harness = Harness::new();
        harness.apply(StreamChunk::partial("r1", "1", GenericItem::text("Hello ")));
        harness.apply(StreamChunk::partial("r1", "1", GenericItem::text("wor")));

        let outcome = harness.apply(StreamChunk::complete(
            "r1",
            "1",
            GenericItem::text("Hello world!"),
        ));

        assert_eq!(
            outcome,
            ChunkOutcome::Completed {
                local_item_id: "r1::1".into()
            }
        );
        assert_eq!(harness.text("r1", "1").as_deref(), Some("Hello world!"));
        assert_eq!(harness.streaming_state("r1", "1"), Some(&StreamingState::done()));
        assert_eq!(harness.state.streaming_item_count(), 0);

        let late = harness.apply(StreamChunk::partial("r1", "1", GenericItem::text("!!")));
        assert_eq!(
            late,
            ChunkOutcome::Ignored(IgnoredChunk::ItemAlreadyDone("r1::1".into()))
        );
        assert_eq!(harness.text("r1", "1").as_deref(), Some("Hello world!"));
    }

    #[test]
    fn unknown_response_gets_a_streaming_placeholder() {
        let mut harness = Harness::new();
        harness.apply(StreamChunk::partial("r9", "a", GenericItem::text("x")));

        let message = harness.state.message(&"r9".into()).unwrap();
        assert!(message.is_response());
        assert!(message.items.is_empty());
        assert_eq!(
            message.history.streaming,
            Some(MessageStreamingHistory { is_done: false })
        );
        assert_eq!(
            harness.state.items_for_message(&"r9".into()),
            [LocalItemId::from("r9::a")]
        );
        assert_eq!(harness.state.check_invariants(), Ok(()));
    }

    #[test]
    fn responses_with_separator_in_ids_stream_independently() {
        let mut harness = Harness::new();

        let first = harness.apply(StreamChunk::partial("a::b", "c", GenericItem::text("one")));
        let second = harness.apply(StreamChunk::partial("a", "b::c", GenericItem::text("two")));

        assert!(matches!(first, ChunkOutcome::Started { .. }));
        assert!(matches!(second, ChunkOutcome::Started { .. }));
        assert_eq!(harness.text("a::b", "c").as_deref(), Some("one"));
        assert_eq!(harness.text("a", "b::c").as_deref(), Some("two"));

        let owned = harness.state.items_for_message(&"a".into());
        assert_eq!(owned.len(), 1);
        assert_eq!(
            harness.state.item(&owned[0]).map(|item| item.full_message_id.as_str()),
            Some("a")
        );
        assert!(harness.state.message(&"a".into()).is_some_and(Message::is_response));
        assert_eq!(harness.state.all_items_by_id().len(), 2);
        assert_eq!(harness.state.check_invariants(), Ok(()));
    }

    #[test]
    fn final_response_lands_on_streamed_items_once() {
        let mut harness = Harness::new();
        harness.apply(StreamChunk::partial("r1", "1", GenericItem::text("Hi")));

        let final_message =
            Message::response("r1", vec![GenericItem::text("Hi there").with_streaming_id("1")]);
        let outcome = harness.apply(StreamChunk::final_response(final_message.clone()));
        assert_eq!(
            outcome,
            ChunkOutcome::Finalized {
                response_id: "r1".into(),
                item_count: 1,
            }
        );

        let finalized = harness.state.clone();
        assert_eq!(harness.text("r1", "1").as_deref(), Some("Hi there"));
        assert_eq!(harness.streaming_state("r1", "1"), None);
        assert_eq!(
            harness.state.message(&"r1".into()).unwrap().history.streaming,
            Some(MessageStreamingHistory { is_done: true })
        );

        let again = harness.apply(StreamChunk::final_response(final_message));
        assert_eq!(
            again,
            ChunkOutcome::Ignored(IgnoredChunk::ResponseFinalized("r1".into()))
        );
        let late = harness.apply(StreamChunk::partial("r1", "2", GenericItem::text("late")));
        assert!(late.is_ignored());
        assert_eq!(harness.state, finalized);
    }

    #[test]
    fn first_chunk_fixes_position_regardless_of_completion_order() {
        let mut harness = Harness::new();
        harness.apply(StreamChunk::partial("r1", "a", GenericItem::text("first")));
        harness.apply(StreamChunk::partial("r1", "b", GenericItem::text("second")));
        harness.apply(StreamChunk::complete("r1", "b", GenericItem::text("second!")));
        harness.apply(StreamChunk::complete("r1", "a", GenericItem::text("first!")));

        let order = harness
            .state
            .conversation_order()
            .iter()
            .map(LocalItemId::as_str)
            .collect::<Vec<_>>();
        assert_eq!(order, ["r1::a", "r1::b"]);
    }

    #[test]
    fn complete_container_replaces_streamed_children() {
        let mut harness = Harness::new();
        harness.apply(StreamChunk::partial(
            "r1",
            "1",
            GenericItem::carousel(vec![GenericItem::text("one"), GenericItem::text("two")]),
        ));
        let root: LocalItemId = "r1::1".into();
        assert_eq!(harness.state.descendant_ids(&root).len(), 2);

        harness.apply(StreamChunk::complete(
            "r1",
            "1",
            GenericItem::carousel(vec![GenericItem::text("only")]),
        ));

        assert_eq!(harness.state.descendant_ids(&root).len(), 1);
        assert_eq!(harness.state.all_items_by_id().len(), 2);
        assert_eq!(
            harness.state.rebuild_item(&root).map(|item| item.kind),
            Some(confab_model::ItemKind::Carousel(CarouselItem {
                items: vec![GenericItem::text("only")],
            }))
        );
        assert_eq!(harness.state.check_invariants(), Ok(()));
    }

    #[test]
    fn non_text_partial_replaces_rendered_content() {
        let mut harness = Harness::new();
        harness.apply(StreamChunk::partial("r1", "1", GenericItem::text("loading")));
        harness.apply(StreamChunk::partial(
            "r1",
            "1",
            GenericItem::carousel(vec![GenericItem::text("slide")]),
        ));

        let root: LocalItemId = "r1::1".into();
        let item = harness.state.item(&root).unwrap();
        assert_eq!(item.item.response_type(), "carousel");
        assert!(item.is_streaming());
        assert_eq!(
            item.ui_state.streaming_state.as_ref().map(|state| state.chunks.len()),
            Some(2)
        );
        assert_eq!(harness.state.descendant_ids(&root).len(), 1);
    }
}
