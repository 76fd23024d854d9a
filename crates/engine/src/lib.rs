#![deny(unsafe_code)]

//! Normalized message store and streaming assembler for chat transcripts.

pub mod engine;
pub mod error;
pub mod ids;
pub mod local_item;
pub mod normalizer;
pub mod observer;
pub mod settings;
pub mod store;
pub mod streaming;

pub use engine::{ChatEngine, StoreSnapshot};
pub use error::{EngineError, EngineResult};
pub use ids::IdGenerator;
pub use local_item::{ChildLayout, ItemUiState, ItemValidity, LocalMessageItem, StreamingState};
pub use normalizer::{ItemNormalizer, NormalizeOptions, NormalizedItem, NormalizedMessage};
pub use observer::{BoxFuture, MessageObserver, ObserverRegistry};
pub use settings::{EngineSettings, SettingsStore};
pub use store::{CanonicalStore, ConversationState};
pub use streaming::{ChunkOutcome, IgnoredChunk, ItemPhase, StreamingAssembler};
