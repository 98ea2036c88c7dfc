//! Kind classification (NIP-01 ranges).
//!
//! | Kinds | Category |
//! |-------|----------|
//! | `0`, `3`, `10000..20000` | [`Category::Replaceable`] |
//! | `20000..30000` | [`Category::Ephemeral`] |
//! | `30000..40000` | [`Category::Addressable`] |
//! | anything else | [`Category::Unsupported`] |

use std::fmt;

use crate::events::NostrEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Ephemeral,
    Replaceable,
    Addressable,
    Unsupported,
}

impl Category {
    /// Whether events of this category go to the durable store.
    pub fn is_persistent(self) -> bool {
        matches!(self, Category::Replaceable | Category::Addressable)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Category::Ephemeral => "ephemeral",
            Category::Replaceable => "replaceable",
            Category::Addressable => "addressable",
            Category::Unsupported => "unsupported",
        };
        f.write_str(name)
    }
}

pub fn classify(kind: u16) -> Category {
    match kind {
        0 | 3 | 10_000..=19_999 => Category::Replaceable,
        20_000..=29_999 => Category::Ephemeral,
        30_000..=39_999 => Category::Addressable,
        _ => Category::Unsupported,
    }
}

/// The tuple a new write may supersede.
///
/// Replaceable events use an empty `d_tag`, so one key shape covers both
/// persistent categories.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdentityKey {
    pub pubkey: String,
    pub kind: u16,
    pub d_tag: String,
}

impl IdentityKey {
    /// `None` for events whose category has no identity (ephemeral, unsupported).
    pub fn for_event(event: &NostrEvent) -> Option<Self> {
        let d_tag = match classify(event.kind) {
            Category::Replaceable => String::new(),
            Category::Addressable => event.identifier().to_string(),
            Category::Ephemeral | Category::Unsupported => return None,
        };

        Some(Self {
            pubkey: event.pubkey.clone(),
            kind: event.kind,
            d_tag,
        })
    }
}
