use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use snafu::ResultExt;

use super::error::{
    DecodeItemSnafu, EncodeItemSnafu, MissingResponseTypeSnafu, ModelResult, NotAnObjectSnafu,
};

pub const RESPONSE_TYPE_FIELD: &str = "response_type";
pub const STREAMING_METADATA_FIELD: &str = "streaming_metadata";

/// Response types decoded into a dedicated [`ItemKind`] variant.
///
/// Anything else becomes [`ItemKind::Unrecognized`] and is left for a custom renderer.
pub const KNOWN_RESPONSE_TYPES: &[&str] = &[
    "text",
    "image",
    "video",
    "audio",
    "iframe",
    "button",
    "option",
    "pause",
    "inline_error",
    "table",
    "conversational_search",
    "user_defined",
    "tour",
    "connect_to_human_agent",
    "card",
    "carousel",
    "grid",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemStreamingMetadata {
    pub id: String,
}

/// One node of a message's response tree.
#[derive(Debug, Clone, PartialEq)]
pub struct GenericItem {
    pub kind: ItemKind,
    pub streaming_metadata: Option<ItemStreamingMetadata>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "response_type", rename_all = "snake_case")]
pub enum ItemKind {
    Text(TextItem),
    Image(MediaItem),
    Video(MediaItem),
    Audio(MediaItem),
    Iframe(IframeItem),
    Button(ButtonItem),
    #[serde(rename = "option")]
    Options(OptionItem),
    Pause(PauseItem),
    InlineError(InlineErrorItem),
    Table(TableItem),
    ConversationalSearch(ConversationalSearchItem),
    UserDefined(UserDefinedItem),
    Tour(TourItem),
    ConnectToHumanAgent(ConnectToHumanAgentItem),
    Card(CardItem),
    Carousel(CarouselItem),
    Grid(GridItem),
    // Encoded by hand in `GenericItem::to_value`.
    #[serde(skip)]
    Unrecognized(UnrecognizedItem),
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TextItem {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaItem {
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alt_text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IframeItem {
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ButtonType {
    PostBack,
    Url,
    CustomEvent,
    ShowPanel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ButtonItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub button_type: Option<ButtonType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_event_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionChoice {
    pub label: String,
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preference: Option<String>,
    #[serde(default)]
    pub options: Vec<OptionChoice>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PauseItem {
    /// Milliseconds.
    pub time: u64,
    #[serde(default)]
    pub typing: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InlineErrorItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// Table cells are either strings or numbers on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TableCell {
    Number(serde_json::Number),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TableRow {
    #[serde(default)]
    pub cells: Vec<TableCell>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TableItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub headers: Vec<TableCell>,
    #[serde(default)]
    pub rows: Vec<TableRow>,
}

impl TableItem {
    /// First row whose cell count differs from the header count.
    pub fn first_ragged_row(&self) -> Option<(usize, usize)> {
        self.rows
            .iter()
            .enumerate()
            .find(|(_, row)| row.cells.len() != self.headers.len())
            .map(|(index, row)| (index, row.cells.len()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Citation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConversationalSearchItem {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub citations: Vec<Citation>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UserDefinedItem {
    #[serde(default)]
    pub user_defined: Value,
}

/// Tour steps stay nested; a tour is rendered as a single unit.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TourItem {
    #[serde(default)]
    pub steps: Vec<GenericItem>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ConnectToHumanAgentItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_to_human_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transfer_info: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CardItem {
    #[serde(default)]
    pub body: Vec<GenericItem>,
    #[serde(default)]
    pub footer: Vec<GenericItem>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CarouselItem {
    #[serde(default)]
    pub items: Vec<GenericItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GridColumn {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GridCell {
    #[serde(default)]
    pub items: Vec<GenericItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub horizontal_alignment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vertical_alignment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GridRow {
    #[serde(default)]
    pub cells: Vec<GridCell>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GridItem {
    #[serde(default)]
    pub columns: Vec<GridColumn>,
    #[serde(default)]
    pub rows: Vec<GridRow>,
}

impl GridItem {
    /// First row whose cell count differs from the declared column count.
    ///
    /// Grids without declared columns size themselves from their rows and are never ragged.
    pub fn first_ragged_row(&self) -> Option<(usize, usize)> {
        if self.columns.is_empty() {
            return None;
        }

        self.rows
            .iter()
            .enumerate()
            .find(|(_, row)| row.cells.len() != self.columns.len())
            .map(|(index, row)| (index, row.cells.len()))
    }
}

/// Item whose `response_type` is not one of [`KNOWN_RESPONSE_TYPES`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct UnrecognizedItem {
    pub response_type: String,
    pub fields: Map<String, Value>,
}

impl GenericItem {
    pub fn new(kind: ItemKind) -> Self {
        Self {
            kind,
            streaming_metadata: None,
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::new(ItemKind::Text(TextItem { text: text.into() }))
    }

    pub fn card(body: Vec<GenericItem>, footer: Vec<GenericItem>) -> Self {
        Self::new(ItemKind::Card(CardItem { body, footer }))
    }

    pub fn carousel(items: Vec<GenericItem>) -> Self {
        Self::new(ItemKind::Carousel(CarouselItem { items }))
    }

    /// Grid without declared columns built from `rows → cells → items`.
    pub fn grid(rows: Vec<Vec<Vec<GenericItem>>>) -> Self {
        let rows = rows
            .into_iter()
            .map(|cells| GridRow {
                cells: cells
                    .into_iter()
                    .map(|items| GridCell {
                        items,
                        ..GridCell::default()
                    })
                    .collect(),
            })
            .collect();
        Self::new(ItemKind::Grid(GridItem {
            columns: Vec::new(),
            rows,
        }))
    }

    pub fn with_streaming_id(mut self, id: impl Into<String>) -> Self {
        self.streaming_metadata = Some(ItemStreamingMetadata { id: id.into() });
        self
    }

    pub fn streaming_id(&self) -> Option<&str> {
        self.streaming_metadata
            .as_ref()
            .map(|metadata| metadata.id.as_str())
    }

    pub fn response_type(&self) -> &str {
        match &self.kind {
            ItemKind::Text(_) => "text",
            ItemKind::Image(_) => "image",
            ItemKind::Video(_) => "video",
            ItemKind::Audio(_) => "audio",
            ItemKind::Iframe(_) => "iframe",
            ItemKind::Button(_) => "button",
            ItemKind::Options(_) => "option",
            ItemKind::Pause(_) => "pause",
            ItemKind::InlineError(_) => "inline_error",
            ItemKind::Table(_) => "table",
            ItemKind::ConversationalSearch(_) => "conversational_search",
            ItemKind::UserDefined(_) => "user_defined",
            ItemKind::Tour(_) => "tour",
            ItemKind::ConnectToHumanAgent(_) => "connect_to_human_agent",
            ItemKind::Card(_) => "card",
            ItemKind::Carousel(_) => "carousel",
            ItemKind::Grid(_) => "grid",
            ItemKind::Unrecognized(item) => &item.response_type,
        }
    }

    pub fn is_container(&self) -> bool {
        matches!(
            self.kind,
            ItemKind::Card(_) | ItemKind::Carousel(_) | ItemKind::Grid(_)
        )
    }

    /// Text of items whose content streams by concatenation.
    pub fn streamable_text(&self) -> Option<&str> {
        match &self.kind {
            ItemKind::Text(item) => Some(&item.text),
            ItemKind::ConversationalSearch(item) => Some(&item.text),
            _ => None,
        }
    }

    pub fn streamable_text_mut(&mut self) -> Option<&mut String> {
        match &mut self.kind {
            ItemKind::Text(item) => Some(&mut item.text),
            ItemKind::ConversationalSearch(item) => Some(&mut item.text),
            _ => None,
        }
    }

    pub fn from_value(value: Value) -> ModelResult<Self> {
        let Value::Object(mut fields) = value else {
            return NotAnObjectSnafu {
                stage: "decode-generic-item",
                what: "generic item",
            }
            .fail();
        };

        let response_type = match fields.get(RESPONSE_TYPE_FIELD) {
            Some(Value::String(response_type)) => response_type.clone(),
            _ => {
                return MissingResponseTypeSnafu {
                    stage: "decode-generic-item",
                }
                .fail();
            }
        };

        let streaming_metadata = match fields.remove(STREAMING_METADATA_FIELD) {
            None | Some(Value::Null) => None,
            Some(raw) => Some(serde_json::from_value(raw).context(DecodeItemSnafu {
                stage: "decode-item-streaming-metadata",
                response_type: response_type.clone(),
            })?),
        };

        let kind = if KNOWN_RESPONSE_TYPES.contains(&response_type.as_str()) {
            serde_json::from_value(Value::Object(fields)).context(DecodeItemSnafu {
                stage: "decode-known-item",
                response_type,
            })?
        } else {
            fields.remove(RESPONSE_TYPE_FIELD);
            ItemKind::Unrecognized(UnrecognizedItem {
                response_type,
                fields,
            })
        };

        Ok(Self {
            kind,
            streaming_metadata,
        })
    }

    pub fn to_value(&self) -> ModelResult<Value> {
        let mut fields = match &self.kind {
            ItemKind::Unrecognized(item) => {
                let mut fields = item.fields.clone();
                fields.insert(
                    RESPONSE_TYPE_FIELD.to_string(),
                    Value::String(item.response_type.clone()),
                );
                fields
            }
            kind => match serde_json::to_value(kind).context(EncodeItemSnafu {
                stage: "encode-known-item",
            })? {
                Value::Object(fields) => fields,
                _ => {
                    return NotAnObjectSnafu {
                        stage: "encode-known-item",
                        what: "encoded item",
                    }
                    .fail();
                }
            },
        };

        if let Some(metadata) = &self.streaming_metadata {
            let encoded = serde_json::to_value(metadata).context(EncodeItemSnafu {
                stage: "encode-item-streaming-metadata",
            })?;
            fields.insert(STREAMING_METADATA_FIELD.to_string(), encoded);
        }

        Ok(Value::Object(fields))
    }
}

impl From<ItemKind> for GenericItem {
    fn from(kind: ItemKind) -> Self {
        Self::new(kind)
    }
}

impl Serialize for GenericItem {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.to_value()
            .map_err(serde::ser::Error::custom)?
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for GenericItem {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Self::from_value(value).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::error::ModelError;

    #[test]
    fn decodes_nested_card_with_streaming_metadata() {
        let item: GenericItem = serde_json::from_value(json!({
            "response_type": "card",
            "streaming_metadata": { "id": "1" },
            "body": [
                { "response_type": "text", "text": "hello" },
                { "response_type": "carousel", "items": [
                    { "response_type": "image", "source": "https://example.com/a.png" }
                ]}
            ]
        }))
        .unwrap();

        assert_eq!(item.streaming_id(), Some("1"));
        let ItemKind::Card(card) = &item.kind else {
            panic!("expected card, got {:?}", item.kind);
        };
        assert_eq!(card.body.len(), 2);
        assert!(card.footer.is_empty());
        assert_eq!(card.body[1].response_type(), "carousel");
    }

    #[test]
    fn unknown_response_type_is_preserved_for_custom_renderers() {
        let raw = json!({
            "response_type": "weather_widget",
            "city": "Oslo",
            "streaming_metadata": { "id": "w" }
        });
        let item = GenericItem::from_value(raw.clone()).unwrap();

        let ItemKind::Unrecognized(unrecognized) = &item.kind else {
            panic!("expected unrecognized item");
        };
        assert_eq!(unrecognized.response_type, "weather_widget");
        assert_eq!(unrecognized.fields.get("city"), Some(&json!("Oslo")));
        assert_eq!(item.response_type(), "weather_widget");
        assert_eq!(serde_json::to_value(&item).unwrap(), raw);
    }

    #[test]
    fn missing_response_type_fails_decoding() {
        let error = GenericItem::from_value(json!({ "text": "orphan" })).unwrap_err();
        assert!(matches!(error, ModelError::MissingResponseType { .. }));

        let error = GenericItem::from_value(json!("text")).unwrap_err();
        assert!(matches!(error, ModelError::NotAnObject { .. }));
    }

    #[test]
    fn malformed_known_item_reports_its_type() {
        let error = GenericItem::from_value(json!({ "response_type": "pause" })).unwrap_err();
        match error {
            ModelError::DecodeItem { response_type, .. } => assert_eq!(response_type, "pause"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn ragged_table_rows_are_detected() {
        let table: TableItem = serde_json::from_value(json!({
            "headers": ["name", "age"],
            "rows": [ { "cells": ["ada", 36] }, { "cells": ["alan"] } ]
        }))
        .unwrap();

        assert_eq!(table.first_ragged_row(), Some((1, 1)));
    }

    #[test]
    fn grid_without_columns_is_never_ragged() {
        let GenericItem {
            kind: ItemKind::Grid(grid),
            ..
        } = GenericItem::grid(vec![vec![vec![]], vec![vec![], vec![]]])
        else {
            panic!("expected grid");
        };

        assert_eq!(grid.first_ragged_row(), None);
    }

    #[test]
    fn streamable_text_covers_text_and_search() {
        let mut search = GenericItem::new(ItemKind::ConversationalSearch(
            ConversationalSearchItem::default(),
        ));
        if let Some(text) = search.streamable_text_mut() {
            text.push_str("found");
        }
        assert_eq!(search.streamable_text(), Some("found"));
        assert_eq!(GenericItem::carousel(Vec::new()).streamable_text(), None);
    }
}
