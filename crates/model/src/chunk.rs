use serde::{Deserialize, Serialize};
use snafu::ResultExt;

use super::error::{DecodeChunkSnafu, ModelResult};
use super::ids::MessageId;
use super::item::{GenericItem, ItemStreamingMetadata};
use super::message::Message;

/// Payload addressed to one logical item of a streaming response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemChunk {
    pub response_id: MessageId,
    pub item_id: String,
    pub payload: GenericItem,
}

impl ItemChunk {
    /// Builds a chunk, stamping the payload with `item_id` when it carries no streaming id.
    pub fn new(
        response_id: impl Into<MessageId>,
        item_id: impl Into<String>,
        mut payload: GenericItem,
    ) -> Self {
        let item_id = item_id.into();
        if payload.streaming_metadata.is_none() {
            payload.streaming_metadata = Some(ItemStreamingMetadata {
                id: item_id.clone(),
            });
        }

        Self {
            response_id: response_id.into(),
            item_id,
            payload,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FinalResponseChunk {
    pub final_message: Message,
}

/// One unit of a streaming response on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamChunk {
    /// Appends to the item.
    PartialItem(ItemChunk),
    /// Replaces the item and finishes it.
    CompleteItem(ItemChunk),
    /// Replaces the whole response and finishes every item in it.
    FinalResponse(FinalResponseChunk),
}

impl StreamChunk {
    pub fn partial(
        response_id: impl Into<MessageId>,
        item_id: impl Into<String>,
        payload: GenericItem,
    ) -> Self {
        Self::PartialItem(ItemChunk::new(response_id, item_id, payload))
    }

    pub fn complete(
        response_id: impl Into<MessageId>,
        item_id: impl Into<String>,
        payload: GenericItem,
    ) -> Self {
        Self::CompleteItem(ItemChunk::new(response_id, item_id, payload))
    }

    pub fn final_response(final_message: Message) -> Self {
        Self::FinalResponse(FinalResponseChunk { final_message })
    }

    pub fn response_id(&self) -> &MessageId {
        match self {
            Self::PartialItem(chunk) | Self::CompleteItem(chunk) => &chunk.response_id,
            Self::FinalResponse(chunk) => &chunk.final_message.id,
        }
    }

    pub fn item_id(&self) -> Option<&str> {
        match self {
            Self::PartialItem(chunk) | Self::CompleteItem(chunk) => Some(&chunk.item_id),
            Self::FinalResponse(_) => None,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::PartialItem(_) => "partial_item",
            Self::CompleteItem(_) => "complete_item",
            Self::FinalResponse(_) => "final_response",
        }
    }

    pub fn from_json(raw: &str) -> ModelResult<Self> {
        serde_json::from_str(raw).context(DecodeChunkSnafu {
            stage: "decode-stream-chunk-json",
        })
    }
}
