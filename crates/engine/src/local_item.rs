use confab_model::{GenericItem, LocalItemId, MessageId};
use serde::Serialize;

/// Flat, individually addressable rendering unit derived from one node of a message tree.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocalMessageItem {
    pub id: LocalItemId,
    pub full_message_id: MessageId,
    /// Containers hold their own fields only; nested items live in `ui_state.children`.
    pub item: GenericItem,
    pub ui_state: ItemUiState,
}

impl LocalMessageItem {
    pub fn is_streaming(&self) -> bool {
        self.ui_state
            .streaming_state
            .as_ref()
            .is_some_and(|state| !state.is_done)
    }
}

/// Store-local fields that never travel back to the backend.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ItemUiState {
    pub parent_id: Option<LocalItemId>,
    pub children: ChildLayout,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub streaming_state: Option<StreamingState>,
    pub validity: ItemValidity,
    pub needs_announcement: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChildLayout {
    #[default]
    None,
    Carousel(Vec<LocalItemId>),
    Card {
        body: Vec<LocalItemId>,
        footer: Vec<LocalItemId>,
    },
    /// Row → cell → item ids.
    Grid(Vec<Vec<Vec<LocalItemId>>>),
}

impl ChildLayout {
    /// Direct children in authoring order.
    pub fn ids(&self) -> Vec<&LocalItemId> {
        match self {
            Self::None => Vec::new(),
            Self::Carousel(ids) => ids.iter().collect(),
            Self::Card { body, footer } => body.iter().chain(footer.iter()).collect(),
            Self::Grid(rows) => rows.iter().flatten().flatten().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ids().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct StreamingState {
    /// Partial payloads in arrival order.
    pub chunks: Vec<GenericItem>,
    pub is_done: bool,
}

impl StreamingState {
    pub fn started(first_chunk: GenericItem) -> Self {
        Self {
            chunks: vec![first_chunk],
            is_done: false,
        }
    }

    pub fn done() -> Self {
        Self {
            chunks: Vec::new(),
            is_done: true,
        }
    }

    /// Concatenated text of every text-bearing chunk.
    pub fn joined_text(&self) -> String {
        self.chunks
            .iter()
            .filter_map(GenericItem::streamable_text)
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ItemValidity {
    #[default]
    Valid,
    /// The host substitutes an inline error for this item only.
    Invalid { reason: String },
}

impl ItemValidity {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_children_flatten_row_major() {
        let layout = ChildLayout::Grid(vec![
            vec![vec!["a".into()], vec!["b".into(), "c".into()]],
            vec![vec![], vec!["d".into()]],
        ]);

        let ids = layout
            .ids()
            .into_iter()
            .map(LocalItemId::as_str)
            .collect::<Vec<_>>();
        assert_eq!(ids, ["a", "b", "c", "d"]);
        assert!(ChildLayout::Grid(vec![vec![vec![]]]).is_empty());
    }

    #[test]
    fn joined_text_skips_non_text_chunks() {
        let mut state = StreamingState::started(GenericItem::text("Hel"));
        state.chunks.push(GenericItem::carousel(Vec::new()));
        state.chunks.push(GenericItem::text("lo"));

        assert_eq!(state.joined_text(), "Hello");
        assert!(!state.is_done);
    }
}
