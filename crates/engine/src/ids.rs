use std::sync::atomic::{AtomicU64, Ordering};

use confab_model::{LocalItemId, MessageId};
use uuid::Uuid;

/// Source of opaque ids for messages without one and for normalized local items.
#[derive(Debug, Default)]
pub struct IdGenerator {
    prefix: Option<String>,
    counter: AtomicU64,
}

impl IdGenerator {
    /// Generator producing UUIDv7 strings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Generator producing `{prefix}-{n}` so scenario output stays reproducible.
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
            counter: AtomicU64::new(0),
        }
    }

    pub fn from_prefix(prefix: Option<&str>) -> Self {
        match prefix {
            Some(prefix) => Self::with_prefix(prefix),
            None => Self::new(),
        }
    }

    pub fn next_raw(&self) -> String {
        let sequence = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        match &self.prefix {
            Some(prefix) => format!("{prefix}-{sequence}"),
            None => Uuid::now_v7().to_string(),
        }
    }

    pub fn message_id(&self) -> MessageId {
        MessageId::new(self.next_raw())
    }

    pub fn local_item_id(&self) -> LocalItemId {
        LocalItemId::new(self.next_raw())
    }

    /// Number of ids handed out so far.
    pub fn issued(&self) -> u64 {
        self.counter.load(Ordering::Relaxed)
    }
}
