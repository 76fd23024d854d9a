use std::collections::HashSet;

use confab_model::{GenericItem, ItemKind, LocalItemId, Message, MessageId};

use crate::ids::IdGenerator;
use crate::local_item::{ChildLayout, ItemUiState, ItemValidity, LocalMessageItem};
use crate::settings::EngineSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NormalizeOptions {
    pub flag_ragged_tables: bool,
    pub flag_ragged_grids: bool,
    pub announce_responses: bool,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self::from(&EngineSettings::default())
    }
}

impl From<&EngineSettings> for NormalizeOptions {
    fn from(settings: &EngineSettings) -> Self {
        Self {
            flag_ragged_tables: settings.flag_ragged_tables,
            flag_ragged_grids: settings.flag_ragged_grids,
            announce_responses: settings.announce_responses,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedMessage {
    /// Children precede their container.
    pub local_items: Vec<LocalMessageItem>,
    pub top_level_ids: Vec<LocalItemId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedItem {
    pub root_id: LocalItemId,
    /// Children precede their container; the root is last.
    pub local_items: Vec<LocalMessageItem>,
}

/// Flattens response trees into local items linked by child id lists.
pub struct ItemNormalizer<'a> {
    ids: &'a IdGenerator,
    options: NormalizeOptions,
}

impl<'a> ItemNormalizer<'a> {
    pub fn new(ids: &'a IdGenerator, options: NormalizeOptions) -> Self {
        Self { ids, options }
    }

    pub fn options(&self) -> NormalizeOptions {
        self.options
    }

    /// Whether top-level items of `message` should be announced when they land.
    pub fn announces(&self, message: &Message) -> bool {
        self.options.announce_responses && message.is_response() && !message.history.from_history
    }

    pub fn normalize(&self, message: &Message) -> NormalizedMessage {
        let announce = self.announces(message);
        let mut claimed = HashSet::with_capacity(message.items.len());
        let mut local_items = Vec::new();
        let mut top_level_ids = Vec::with_capacity(message.items.len());

        for item in &message.items {
            let root_id = self.top_level_id(message, item, &mut claimed);
            self.walk(&message.id, item, root_id.clone(), None, announce, &mut local_items);
            top_level_ids.push(root_id);
        }

        NormalizedMessage {
            local_items,
            top_level_ids,
        }
    }

    /// Normalizes one subtree under a caller-chosen root id.
    pub fn normalize_item(
        &self,
        message_id: &MessageId,
        item: &GenericItem,
        root_id: LocalItemId,
        announce: bool,
    ) -> NormalizedItem {
        let mut local_items = Vec::new();
        self.walk(message_id, item, root_id.clone(), None, announce, &mut local_items);
        NormalizedItem {
            root_id,
            local_items,
        }
    }

    fn top_level_id(
        &self,
        message: &Message,
        item: &GenericItem,
        claimed: &mut HashSet<LocalItemId>,
    ) -> LocalItemId {
        // Streamed responses must finalize onto the local items their chunks created.
        if message.is_response()
            && let Some(streaming_id) = item.streaming_id()
        {
            let derived = LocalItemId::for_streaming_item(&message.id, streaming_id);
            if claimed.insert(derived.clone()) {
                return derived;
            }

            tracing::warn!(
                message_id = %message.id,
                streaming_id,
                "duplicate streaming id within one message; generating a fresh local id"
            );
        }

        let generated = self.ids.local_item_id();
        claimed.insert(generated.clone());
        generated
    }

    fn walk(
        &self,
        message_id: &MessageId,
        item: &GenericItem,
        id: LocalItemId,
        parent_id: Option<LocalItemId>,
        announce: bool,
        out: &mut Vec<LocalMessageItem>,
    ) {
        let children = match &item.kind {
            ItemKind::Card(card) => ChildLayout::Card {
                body: self.walk_children(message_id, &card.body, &id, out),
                footer: self.walk_children(message_id, &card.footer, &id, out),
            },
            ItemKind::Carousel(carousel) => {
                ChildLayout::Carousel(self.walk_children(message_id, &carousel.items, &id, out))
            }
            ItemKind::Grid(grid) => ChildLayout::Grid(
                grid.rows
                    .iter()
                    .map(|row| {
                        row.cells
                            .iter()
                            .map(|cell| self.walk_children(message_id, &cell.items, &id, out))
                            .collect()
                    })
                    .collect(),
            ),
            _ => ChildLayout::None,
        };

        let validity = self.validity(message_id, &id, item);
        out.push(LocalMessageItem {
            id,
            full_message_id: message_id.clone(),
            item: hollow(item),
            ui_state: ItemUiState {
                parent_id,
                children,
                streaming_state: None,
                validity,
                needs_announcement: announce,
            },
        });
    }

    fn walk_children(
        &self,
        message_id: &MessageId,
        items: &[GenericItem],
        parent_id: &LocalItemId,
        out: &mut Vec<LocalMessageItem>,
    ) -> Vec<LocalItemId> {
        items
            .iter()
            .map(|child| {
                let child_id = self.ids.local_item_id();
                self.walk(
                    message_id,
                    child,
                    child_id.clone(),
                    Some(parent_id.clone()),
                    false,
                    out,
                );
                child_id
            })
            .collect()
    }

    fn validity(
        &self,
        message_id: &MessageId,
        id: &LocalItemId,
        item: &GenericItem,
    ) -> ItemValidity {
        let reason = match &item.kind {
            ItemKind::Table(table) if self.options.flag_ragged_tables => {
                table.first_ragged_row().map(|(row, cells)| {
                    format!(
                        "table row {row} has {cells} cells but {} headers",
                        table.headers.len()
                    )
                })
            }
            ItemKind::Grid(grid) if self.options.flag_ragged_grids => {
                grid.first_ragged_row().map(|(row, cells)| {
                    format!(
                        "grid row {row} has {cells} cells but {} columns",
                        grid.columns.len()
                    )
                })
            }
            _ => None,
        };

        match reason {
            Some(reason) => {
                tracing::warn!(
                    message_id = %message_id,
                    local_item_id = %id,
                    response_type = item.response_type(),
                    reason = %reason,
                    "flagging structurally invalid item"
                );
                ItemValidity::Invalid { reason }
            }
            None => ItemValidity::Valid,
        }
    }
}

/// Copy of `item` with nested item collections emptied; grid row/cell shells are kept.
pub fn hollow(item: &GenericItem) -> GenericItem {
    let mut hollowed = item.clone();
    match &mut hollowed.kind {
        ItemKind::Card(card) => {
            card.body.clear();
            card.footer.clear();
        }
        ItemKind::Carousel(carousel) => carousel.items.clear(),
        ItemKind::Grid(grid) => {
            for cell in grid.rows.iter_mut().flat_map(|row| row.cells.iter_mut()) {
                cell.items.clear();
            }
        }
        _ => {}
    }
    hollowed
}

#[cfg(test)]
mod tests {
    use confab_model::{GridColumn, MessageHistory, TableCell, TableItem, TableRow};

    use super::*;

    fn normalizer(ids: &IdGenerator) -> ItemNormalizer<'_> {
        ItemNormalizer::new(ids, NormalizeOptions::default())
    }

    fn find<'a>(items: &'a [LocalMessageItem], id: &LocalItemId) -> &'a LocalMessageItem {
        items
            .iter()
            .find(|item| &item.id == id)
            .unwrap_or_else(|| panic!("missing local item {id}"))
    }

    #[test]
    fn leaves_map_one_to_one() {
        let ids = IdGenerator::with_prefix("n");
        let message = Message::response(
            "m1",
            vec![GenericItem::text("a"), GenericItem::text("b")],
        );

        let normalized = normalizer(&ids).normalize(&message);

        assert_eq!(normalized.local_items.len(), 2);
        assert_eq!(normalized.top_level_ids.len(), 2);
        assert_eq!(
            find(&normalized.local_items, &normalized.top_level_ids[1])
                .item
                .streamable_text(),
            Some("b")
        );
        assert!(
            normalized
                .local_items
                .iter()
                .all(|item| item.full_message_id.as_str() == "m1"
                    && item.ui_state.parent_id.is_none())
        );
    }

    #[test]
    fn container_records_children_in_authoring_order() {
        let ids = IdGenerator::with_prefix("n");
        let card = GenericItem::card(
            vec![GenericItem::text("b1"), GenericItem::text("b2")],
            vec![GenericItem::text("f1")],
        );
        let message = Message::response("m1", vec![card]);

        let normalized = normalizer(&ids).normalize(&message);
        let root = find(&normalized.local_items, &normalized.top_level_ids[0]);

        let ChildLayout::Card { body, footer } = &root.ui_state.children else {
            panic!("expected card layout, got {:?}", root.ui_state.children);
        };
        let body_text = body
            .iter()
            .map(|id| find(&normalized.local_items, id).item.streamable_text())
            .collect::<Vec<_>>();
        assert_eq!(body_text, [Some("b1"), Some("b2")]);
        assert_eq!(footer.len(), 1);
        assert_eq!(
            find(&normalized.local_items, &footer[0]).ui_state.parent_id.as_ref(),
            Some(&root.id)
        );
        // Container is emitted after its children and without nested copies.
        assert_eq!(normalized.local_items.last().map(|item| &item.id), Some(&root.id));
        assert_eq!(root.item, GenericItem::card(Vec::new(), Vec::new()));
    }

    #[test]
    fn grid_keeps_two_dimensional_index() {
        let ids = IdGenerator::with_prefix("n");
        let grid = GenericItem::grid(vec![
            vec![vec![GenericItem::text("r0c0")], vec![]],
            vec![
                vec![GenericItem::text("r1c0a"), GenericItem::text("r1c0b")],
                vec![GenericItem::text("r1c1")],
            ],
        ]);
        let message = Message::response("m1", vec![grid]);

        let normalized = normalizer(&ids).normalize(&message);
        let root = find(&normalized.local_items, &normalized.top_level_ids[0]);

        let ChildLayout::Grid(rows) = &root.ui_state.children else {
            panic!("expected grid layout");
        };
        let shape = rows
            .iter()
            .map(|cells| cells.iter().map(Vec::len).collect::<Vec<_>>())
            .collect::<Vec<_>>();
        assert_eq!(shape, [vec![1, 0], vec![2, 1]]);
        assert_eq!(
            find(&normalized.local_items, &rows[1][0][1]).item.streamable_text(),
            Some("r1c0b")
        );
    }

    #[test]
    fn streamed_response_items_use_derived_ids() {
        let ids = IdGenerator::with_prefix("n");
        let message = Message::response(
            "resp",
            vec![
                GenericItem::text("a").with_streaming_id("1"),
                GenericItem::text("dup").with_streaming_id("1"),
                GenericItem::text("plain"),
            ],
        );

        let normalized = normalizer(&ids).normalize(&message);

        assert_eq!(normalized.top_level_ids[0].as_str(), "resp::1");
        assert_eq!(normalized.top_level_ids[1].as_str(), "n-1");
        assert_eq!(normalized.top_level_ids[2].as_str(), "n-2");
    }

    #[test]
    fn requests_never_use_streaming_ids() {
        let ids = IdGenerator::with_prefix("n");
        let message = Message::new(
            "req",
            confab_model::MessageKind::Request,
            vec![GenericItem::text("hi").with_streaming_id("1")],
        );

        let normalized = normalizer(&ids).normalize(&message);
        assert_eq!(normalized.top_level_ids[0].as_str(), "n-1");
        assert!(!normalized.local_items[0].ui_state.needs_announcement);
    }

    #[test]
    fn ragged_table_is_flagged_without_failing_siblings() {
        let ids = IdGenerator::with_prefix("n");
        let table = GenericItem::new(ItemKind::Table(TableItem {
            headers: vec![TableCell::Text("a".into()), TableCell::Text("b".into())],
            rows: vec![TableRow {
                cells: vec![TableCell::Text("only".into())],
            }],
            ..TableItem::default()
        }));
        let message = Message::response("m1", vec![GenericItem::text("before"), table]);

        let normalized = normalizer(&ids).normalize(&message);

        assert!(normalized.local_items[0].ui_state.validity.is_valid());
        assert_eq!(
            normalized.local_items[1].ui_state.validity,
            ItemValidity::Invalid {
                reason: "table row 0 has 1 cells but 2 headers".to_string()
            }
        );

        let lenient = ItemNormalizer::new(
            &ids,
            NormalizeOptions {
                flag_ragged_tables: false,
                ..NormalizeOptions::default()
            },
        )
        .normalize(&message);
        assert!(lenient.local_items[1].ui_state.validity.is_valid());
    }

    #[test]
    fn ragged_grid_is_flagged_without_failing_cells_or_siblings() {
        let ids = IdGenerator::with_prefix("n");
        let mut grid = GenericItem::grid(vec![
            vec![vec![GenericItem::text("r0c0")], vec![GenericItem::text("r0c1")]],
            vec![vec![GenericItem::text("r1c0")]],
        ]);
        let ItemKind::Grid(layout) = &mut grid.kind else {
            unreachable!("grid builder yields a grid");
        };
        layout.columns = vec![GridColumn::default(); 2];
        let message = Message::response("m1", vec![GenericItem::text("caption"), grid]);

        let normalized = normalizer(&ids).normalize(&message);
        let root = find(&normalized.local_items, &normalized.top_level_ids[1]);

        assert_eq!(
            root.ui_state.validity,
            ItemValidity::Invalid {
                reason: "grid row 1 has 1 cells but 2 columns".to_string()
            }
        );
        let cells = root.ui_state.children.ids();
        assert_eq!(cells.len(), 3);
        assert!(cells
            .iter()
            .all(|id| find(&normalized.local_items, id).ui_state.validity.is_valid()));
        assert!(find(&normalized.local_items, &normalized.top_level_ids[0])
            .ui_state
            .validity
            .is_valid());

        let lenient = ItemNormalizer::new(
            &ids,
            NormalizeOptions {
                flag_ragged_grids: false,
                ..NormalizeOptions::default()
            },
        )
        .normalize(&message);
        assert!(lenient
            .local_items
            .iter()
            .all(|item| item.ui_state.validity.is_valid()));
    }

    #[test]
    fn history_items_are_not_announced() {
        let ids = IdGenerator::with_prefix("n");
        let mut message = Message::response("m1", vec![GenericItem::text("old")]);
        message.history = MessageHistory {
            from_history: true,
            ..MessageHistory::default()
        };

        let normalized = normalizer(&ids).normalize(&message);
        assert!(!normalized.local_items[0].ui_state.needs_announcement);

        message.history.from_history = false;
        let normalized = normalizer(&ids).normalize(&message);
        assert!(normalized.local_items[0].ui_state.needs_announcement);
    }
}
