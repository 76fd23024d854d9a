use std::collections::{HashMap, HashSet};

use confab_model::{
    GenericItem, ItemKind, LocalItemId, Message, MessageHistoryPatch, MessageId, NewMessage,
    StreamChunk,
};
use serde::Serialize;

use crate::ids::IdGenerator;
use crate::local_item::{ChildLayout, LocalMessageItem};
use crate::normalizer::{ItemNormalizer, NormalizeOptions, NormalizedMessage};
use crate::streaming::{ChunkOutcome, ItemPhase, StreamingAssembler};

/// Tables and ordering indices of one conversation.
///
/// Readers get this by reference from [`CanonicalStore::state`] or as an owned snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConversationState {
    messages_by_id: HashMap<MessageId, Message>,
    items_by_id: HashMap<LocalItemId, LocalMessageItem>,
    message_order: Vec<MessageId>,
    conversation_order: Vec<LocalItemId>,
    items_by_message: HashMap<MessageId, Vec<LocalItemId>>,
    responses_by_request: HashMap<MessageId, Vec<MessageId>>,
    finalized_responses: HashSet<MessageId>,
    loading_counter: u32,
    hydrating_counter: u32,
    revision: u64,
}

impl ConversationState {
    pub fn message(&self, id: &MessageId) -> Option<&Message> {
        self.messages_by_id.get(id)
    }

    pub fn item(&self, id: &LocalItemId) -> Option<&LocalMessageItem> {
        self.items_by_id.get(id)
    }

    pub fn all_messages_by_id(&self) -> &HashMap<MessageId, Message> {
        &self.messages_by_id
    }

    pub fn all_items_by_id(&self) -> &HashMap<LocalItemId, LocalMessageItem> {
        &self.items_by_id
    }

    pub fn message_order(&self) -> &[MessageId] {
        &self.message_order
    }

    /// Top-level local items in render order.
    pub fn conversation_order(&self) -> &[LocalItemId] {
        &self.conversation_order
    }

    /// Top-level local items of one message.
    pub fn items_for_message(&self, id: &MessageId) -> &[LocalItemId] {
        self.items_by_message
            .get(id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn responses_for_request(&self, request_id: &MessageId) -> &[MessageId] {
        self.responses_by_request
            .get(request_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn children_of(&self, id: &LocalItemId) -> Vec<&LocalItemId> {
        self.items_by_id
            .get(id)
            .map(|item| item.ui_state.children.ids())
            .unwrap_or_default()
    }

    /// Every transitive child of `id`, depth-first, excluding `id` itself.
    pub fn descendant_ids(&self, id: &LocalItemId) -> Vec<LocalItemId> {
        let mut descendants = Vec::new();
        let mut pending = self
            .children_of(id)
            .into_iter()
            .rev()
            .cloned()
            .collect::<Vec<_>>();

        while let Some(next) = pending.pop() {
            pending.extend(self.children_of(&next).into_iter().rev().cloned());
            descendants.push(next);
        }

        descendants
    }

    /// Rebuilds the nested item tree rooted at `id` from the child id lists.
    pub fn rebuild_item(&self, id: &LocalItemId) -> Option<GenericItem> {
        let local = self.items_by_id.get(id)?;
        let mut item = local.item.clone();

        match (&mut item.kind, &local.ui_state.children) {
            (ItemKind::Card(card), ChildLayout::Card { body, footer }) => {
                card.body = self.rebuild_list(body)?;
                card.footer = self.rebuild_list(footer)?;
            }
            (ItemKind::Carousel(carousel), ChildLayout::Carousel(ids)) => {
                carousel.items = self.rebuild_list(ids)?;
            }
            (ItemKind::Grid(grid), ChildLayout::Grid(rows)) => {
                for (row, row_ids) in grid.rows.iter_mut().zip(rows) {
                    for (cell, cell_ids) in row.cells.iter_mut().zip(row_ids) {
                        cell.items = self.rebuild_list(cell_ids)?;
                    }
                }
            }
            _ => {}
        }

        Some(item)
    }

    /// Current item tree of a message, rebuilt from its local items.
    pub fn rebuild_message_items(&self, id: &MessageId) -> Option<Vec<GenericItem>> {
        self.messages_by_id.get(id)?;
        self.rebuild_list(self.items_for_message(id))
    }

    fn rebuild_list(&self, ids: &[LocalItemId]) -> Option<Vec<GenericItem>> {
        ids.iter().map(|id| self.rebuild_item(id)).collect()
    }

    pub fn item_phase(&self, response_id: &MessageId, item_id: &str) -> ItemPhase {
        self.item_phase_of(&LocalItemId::for_streaming_item(response_id, item_id))
    }

    pub(crate) fn item_phase_of(&self, id: &LocalItemId) -> ItemPhase {
        match self.items_by_id.get(id) {
            None => ItemPhase::Unseen,
            Some(item) if item.is_streaming() => ItemPhase::Streaming,
            Some(_) => ItemPhase::Done,
        }
    }

    pub fn is_finalized(&self, response_id: &MessageId) -> bool {
        self.finalized_responses.contains(response_id)
    }

    pub fn streaming_item_count(&self) -> usize {
        self.items_by_id
            .values()
            .filter(|item| item.is_streaming())
            .count()
    }

    pub fn loading_counter(&self) -> u32 {
        self.loading_counter
    }

    pub fn hydrating_counter(&self) -> u32 {
        self.hydrating_counter
    }

    /// Bumped by every mutation that changed something.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn is_empty(&self) -> bool {
        self.messages_by_id.is_empty() && self.items_by_id.is_empty()
    }

    /// Describes the first broken structural invariant, if any.
    pub fn check_invariants(&self) -> Result<(), String> {
        for (id, item) in &self.items_by_id {
            if &item.id != id {
                return Err(format!("item keyed {id} carries id {}", item.id));
            }
            if !self.messages_by_id.contains_key(&item.full_message_id) {
                return Err(format!(
                    "item {id} is orphaned from message {}",
                    item.full_message_id
                ));
            }
            for child in item.ui_state.children.ids() {
                let Some(child_item) = self.items_by_id.get(child) else {
                    return Err(format!("item {id} references missing child {child}"));
                };
                if child_item.ui_state.parent_id.as_ref() != Some(id) {
                    return Err(format!("child {child} does not point back to parent {id}"));
                }
            }
        }

        let mut seen_top_level = HashSet::new();
        for (message_id, top_level) in &self.items_by_message {
            if !self.messages_by_id.contains_key(message_id) {
                return Err(format!("top-level index references missing message {message_id}"));
            }
            for id in top_level {
                if !seen_top_level.insert(id) {
                    return Err(format!("top-level item {id} is indexed twice"));
                }
                let Some(item) = self.items_by_id.get(id) else {
                    return Err(format!("message {message_id} lists missing item {id}"));
                };
                if &item.full_message_id != message_id || item.ui_state.parent_id.is_some() {
                    return Err(format!("item {id} is not a top-level item of {message_id}"));
                }
            }
        }

        let mut seen_order = HashSet::new();
        for id in &self.conversation_order {
            if !seen_order.insert(id) {
                return Err(format!("conversation order lists {id} twice"));
            }
            if !seen_top_level.contains(id) {
                return Err(format!("conversation order lists unindexed item {id}"));
            }
        }

        let ordered_messages = self.message_order.iter().collect::<HashSet<_>>();
        if ordered_messages.len() != self.message_order.len()
            || ordered_messages.len() != self.messages_by_id.len()
            || !self
                .messages_by_id
                .keys()
                .all(|id| ordered_messages.contains(id))
        {
            return Err("message order does not match the message table".to_string());
        }

        for (request_id, responses) in &self.responses_by_request {
            if let Some(response_id) = responses
                .iter()
                .find(|id| !self.messages_by_id.contains_key(*id))
            {
                return Err(format!(
                    "request {request_id} groups missing response {response_id}"
                ));
            }
        }

        Ok(())
    }

    pub(crate) fn contains_message(&self, id: &MessageId) -> bool {
        self.messages_by_id.contains_key(id)
    }

    pub(crate) fn item_mut(&mut self, id: &LocalItemId) -> Option<&mut LocalMessageItem> {
        self.items_by_id.get_mut(id)
    }

    pub(crate) fn insert_item(&mut self, item: LocalMessageItem) {
        self.items_by_id.insert(item.id.clone(), item);
    }

    pub(crate) fn mark_finalized(&mut self, response_id: MessageId) {
        self.finalized_responses.insert(response_id);
    }

    pub(crate) fn bump_revision(&mut self) {
        self.revision += 1;
    }

    /// Inserts a message with no local items yet, at the end of the message order.
    pub(crate) fn insert_placeholder(&mut self, message: Message) {
        let id = message.id.clone();
        self.index_request_grouping(&message);
        self.messages_by_id.insert(id.clone(), message);
        self.items_by_message.entry(id.clone()).or_default();
        self.message_order.push(id);
    }

    /// Appends a new top-level item to a message, keeping the message's items contiguous.
    pub(crate) fn push_top_level_item(&mut self, item: LocalMessageItem) {
        let message_id = item.full_message_id.clone();
        let item_id = item.id.clone();
        self.insert_item(item);

        let top_level = self.items_by_message.entry(message_id.clone()).or_default();
        let previous_last = top_level.last().cloned();
        top_level.push(item_id.clone());

        let silent = self
            .messages_by_id
            .get(&message_id)
            .is_some_and(Message::is_silent);
        if silent {
            return;
        }

        let insert_at = previous_last
            .and_then(|last| self.conversation_order.iter().position(|id| *id == last))
            .map_or(self.conversation_order.len(), |position| position + 1);
        self.conversation_order.insert(insert_at, item_id);
    }

    /// Stores `message` with its normalized items, replacing any previous version in place.
    ///
    /// A replaced message keeps its slot in both the message order and the conversation order.
    pub(crate) fn commit_message(&mut self, message: Message, normalized: NormalizedMessage) {
        let id = message.id.clone();
        let previous_top_level = self.items_by_message.remove(&id).unwrap_or_default();
        let slot = previous_top_level
            .first()
            .and_then(|first| self.conversation_order.iter().position(|item| item == first));

        if let Some(previous) = self.messages_by_id.remove(&id) {
            self.unindex_request_grouping(&previous);
            self.items_by_id.retain(|_, item| item.full_message_id != id);
            let stale = previous_top_level.iter().collect::<HashSet<_>>();
            self.conversation_order.retain(|item| !stale.contains(item));
        } else {
            self.message_order.push(id.clone());
        }

        if !message.is_silent() {
            let slot = slot.unwrap_or(self.conversation_order.len());
            self.conversation_order
                .splice(slot..slot, normalized.top_level_ids.iter().cloned());
        }

        for item in normalized.local_items {
            self.insert_item(item);
        }
        self.items_by_message.insert(id.clone(), normalized.top_level_ids);
        self.index_request_grouping(&message);
        self.messages_by_id.insert(id, message);
    }

    /// Removes the children of `id` transitively, leaving `id` itself in place.
    pub(crate) fn remove_descendants(&mut self, id: &LocalItemId) -> usize {
        let descendants = self.descendant_ids(id);
        for descendant in &descendants {
            self.items_by_id.remove(descendant);
        }
        descendants.len()
    }

    pub(crate) fn remove_message(&mut self, id: &MessageId) -> Option<usize> {
        let message = self.messages_by_id.remove(id)?;
        let top_level = self.items_by_message.remove(id).unwrap_or_default();

        let before = self.items_by_id.len();
        // Ownership is the ground truth; it also catches children dropped from stale layouts.
        self.items_by_id.retain(|_, item| item.full_message_id != *id);
        let removed_items = before - self.items_by_id.len();

        let top_level = top_level.iter().collect::<HashSet<_>>();
        self.conversation_order.retain(|item| !top_level.contains(item));
        self.message_order.retain(|message_id| message_id != id);
        self.unindex_request_grouping(&message);
        self.responses_by_request.remove(id);
        self.finalized_responses.remove(id);

        Some(removed_items)
    }

    pub(crate) fn merge_history(&mut self, id: &MessageId, patch: MessageHistoryPatch) -> bool {
        let Some(message) = self.messages_by_id.get_mut(id) else {
            return false;
        };
        let was_silent = message.is_silent();
        message.history.merge(patch);
        let is_silent = message.is_silent();

        if was_silent != is_silent {
            self.sync_visibility(id, is_silent);
        }
        true
    }

    fn sync_visibility(&mut self, id: &MessageId, silent: bool) {
        let top_level = self.items_for_message(id).to_vec();
        if silent {
            let hidden = top_level.iter().collect::<HashSet<_>>();
            self.conversation_order.retain(|item| !hidden.contains(item));
            return;
        }

        // Un-silenced messages surface after the last visible item of an earlier message.
        let Some(message_position) = self.message_order.iter().position(|message| message == id)
        else {
            return;
        };
        let earlier_items = self.message_order[..message_position]
            .iter()
            .flat_map(|message| self.items_for_message(message))
            .collect::<HashSet<_>>();
        let slot = self
            .conversation_order
            .iter()
            .rposition(|item| earlier_items.contains(item))
            .map_or(0, |position| position + 1);
        self.conversation_order.splice(slot..slot, top_level);
    }

    pub(crate) fn adjust_loading(&mut self, delta: i32) -> u32 {
        self.loading_counter = self.loading_counter.saturating_add_signed(delta);
        self.loading_counter
    }

    pub(crate) fn adjust_hydrating(&mut self, delta: i32) -> u32 {
        self.hydrating_counter = self.hydrating_counter.saturating_add_signed(delta);
        self.hydrating_counter
    }

    /// Drops every table, index and counter; the revision keeps counting.
    pub(crate) fn reset(&mut self) {
        let revision = self.revision;
        *self = Self {
            revision,
            ..Self::default()
        };
    }

    fn index_request_grouping(&mut self, message: &Message) {
        if let Some(request_id) = &message.request_id {
            let responses = self.responses_by_request.entry(request_id.clone()).or_default();
            if !responses.contains(&message.id) {
                responses.push(message.id.clone());
            }
        }
    }

    fn unindex_request_grouping(&mut self, message: &Message) {
        let Some(request_id) = &message.request_id else {
            return;
        };
        if let Some(responses) = self.responses_by_request.get_mut(request_id) {
            responses.retain(|id| *id != message.id);
            if responses.is_empty() {
                self.responses_by_request.remove(request_id);
            }
        }
    }
}

/// The single writer over a [`ConversationState`].
#[derive(Debug, Default)]
pub struct CanonicalStore {
    state: ConversationState,
    ids: IdGenerator,
    options: NormalizeOptions,
}

impl CanonicalStore {
    pub fn new(ids: IdGenerator, options: NormalizeOptions) -> Self {
        Self {
            state: ConversationState::default(),
            ids,
            options,
        }
    }

    pub fn state(&self) -> &ConversationState {
        &self.state
    }

    pub fn options(&self) -> NormalizeOptions {
        self.options
    }

    pub fn set_options(&mut self, options: NormalizeOptions) {
        self.options = options;
    }

    /// Turns caller input into a storable message, generating an id when none was supplied.
    pub fn assign_id(&self, message: NewMessage) -> Message {
        let id = match message.supplied_id() {
            Some(id) => id.clone(),
            None => self.ids.message_id(),
        };
        message.into_message(id)
    }

    /// Normalizes and stores `message`; an existing message with the same id is replaced in place.
    pub fn add_message(&mut self, message: Message) -> usize {
        let normalized = ItemNormalizer::new(&self.ids, self.options).normalize(&message);
        let item_count = normalized.local_items.len();
        self.state.commit_message(message, normalized);
        self.state.bump_revision();
        item_count
    }

    pub fn add_message_chunk(&mut self, chunk: StreamChunk) -> ChunkOutcome {
        let normalizer = ItemNormalizer::new(&self.ids, self.options);
        let outcome = StreamingAssembler::new(&mut self.state, normalizer).apply(chunk);
        if !outcome.is_ignored() {
            self.state.bump_revision();
        }
        outcome
    }

    /// Removes each known message and everything it owns; returns the ids actually removed.
    pub fn remove_messages(&mut self, ids: &[MessageId]) -> Vec<MessageId> {
        let mut removed = Vec::new();
        for id in ids {
            if let Some(item_count) = self.state.remove_message(id) {
                tracing::debug!(message_id = %id, item_count, "removed message");
                removed.push(id.clone());
            }
        }

        if !removed.is_empty() {
            self.state.bump_revision();
        }
        removed
    }

    pub fn clear_conversation(&mut self) {
        self.state.reset();
        self.state.bump_revision();
    }

    pub fn merge_message_history(&mut self, id: &MessageId, patch: MessageHistoryPatch) -> bool {
        let merged = self.state.merge_history(id, patch);
        if merged {
            self.state.bump_revision();
        }
        merged
    }

    pub fn adjust_loading(&mut self, delta: i32) -> u32 {
        let value = self.state.adjust_loading(delta);
        self.state.bump_revision();
        value
    }

    pub fn adjust_hydrating(&mut self, delta: i32) -> u32 {
        let value = self.state.adjust_hydrating(delta);
        self.state.bump_revision();
        value
    }
}
