#![deny(unsafe_code)]

//! Wire and domain types shared by the confab message engine.

pub mod chunk;
pub mod error;
pub mod ids;
pub mod item;
pub mod message;

pub use chunk::{FinalResponseChunk, ItemChunk, StreamChunk};
pub use error::{ModelError, ModelResult};
pub use ids::{LocalItemId, MessageId, STREAMING_ID_SEPARATOR};
pub use item::{
    ButtonItem, ButtonType, CardItem, CarouselItem, Citation, ConnectToHumanAgentItem,
    ConversationalSearchItem, GenericItem, GridCell, GridColumn, GridItem, GridRow, IframeItem,
    InlineErrorItem, ItemKind, ItemStreamingMetadata, KNOWN_RESPONSE_TYPES, MediaItem,
    OptionChoice, OptionItem, PauseItem, TableCell, TableItem, TableRow, TextItem, TourItem,
    UnrecognizedItem, UserDefinedItem,
};
pub use message::{
    FeedbackHistory, Message, MessageErrorState, MessageHistory, MessageHistoryPatch,
    MessageKind, MessageStreamingHistory, NewMessage,
};
