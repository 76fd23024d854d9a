use std::fmt;

use serde::{Deserialize, Serialize};

/// Joins a response id and a streaming item id into a local item id.
pub const STREAMING_ID_SEPARATOR: &str = "::";

// Macro keeps both ID wrappers structurally identical.
macro_rules! define_string_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(raw: impl Into<String>) -> Self {
                Self(raw.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn is_empty(&self) -> bool {
                self.0.trim().is_empty()
            }

            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self::new(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

define_string_id!(MessageId);
define_string_id!(LocalItemId);

impl LocalItemId {
    /// Local id for the logical streaming item `item_id` of `response_id`.
    ///
    /// Pure and repeatable: every chunk for the same pair resolves to the same local item.
    /// `:` and `\` inside either part are backslash-escaped, so distinct pairs never share an id.
    pub fn for_streaming_item(response_id: &MessageId, item_id: &str) -> Self {
        let mut raw = String::with_capacity(
            response_id.as_str().len() + STREAMING_ID_SEPARATOR.len() + item_id.len(),
        );
        push_escaped(&mut raw, response_id.as_str());
        raw.push_str(STREAMING_ID_SEPARATOR);
        push_escaped(&mut raw, item_id);
        Self(raw)
    }
}

fn push_escaped(out: &mut String, part: &str) {
    for ch in part.chars() {
        if matches!(ch, ':' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
}
