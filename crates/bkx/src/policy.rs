//! 🪦 Non-indexable policy — what to do with an event the server will never take.
//!
//! A 400 with a mapping conflict is not going to get better on retry. It's a
//! permanent "no". Two options:
//!
//! - `Drop` — count it, log it, let it go. 🗑️
//! - `DeadLetterIndex { index }` — wrap the whole original document into a
//!   `message` field and send it to a side index where nothing can reject it
//!   (famous last words). Tagged so it's never re-routed twice.
//!
//! ```toml
//! [client.non_indexable_policy]
//! type = "dead_letter_index"
//! index = "events-dlq"
//! ```

use anyhow::Result;
use serde::Deserialize;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NonIndexablePolicy {
    #[default]
    Drop,
    DeadLetterIndex { index: String },
}

impl NonIndexablePolicy {
    /// 🎯 The dead-letter target, if the policy has one.
    pub fn dead_letter_index(&self) -> Option<&str> {
        match self {
            NonIndexablePolicy::Drop => None,
            NonIndexablePolicy::DeadLetterIndex { index } => Some(index.as_str()),
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if let NonIndexablePolicy::DeadLetterIndex { index } = self {
            if index.trim().is_empty() {
                anyhow::bail!(
                    "💀 non_indexable_policy is dead_letter_index but the index is empty. A graveyard needs an address."
                );
            }
        }
        Ok(())
    }
}
