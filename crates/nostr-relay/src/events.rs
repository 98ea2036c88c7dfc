use nostr_sdk::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Tag holding the sub-identifier of addressable events.
pub const IDENTIFIER_TAG: &str = "d";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NostrTag {
    pub name: String,
    pub values: Vec<String>,
}

impl NostrTag {
    pub fn new(name: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }

    pub fn from_sdk_tag(tag: &Tag) -> Self {
        Self::from_parts(tag.clone().to_vec())
    }

    /// Builds a tag from its wire form, `[name, value, ...]`.
    pub fn from_parts(parts: Vec<String>) -> Self {
        let mut parts = parts.into_iter();
        let name = parts.next().unwrap_or_default();
        Self {
            name,
            values: parts.collect(),
        }
    }

    pub fn to_parts(&self) -> Vec<String> {
        let mut parts = Vec::with_capacity(1 + self.values.len());
        parts.push(self.name.clone());
        parts.extend(self.values.iter().cloned());
        parts
    }
}

/// A signed event as handed over by the transport layer.
///
/// Signature verification happens upstream; `sig` is carried opaquely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NostrEvent {
    pub id: String,
    pub pubkey: String,
    pub kind: u16,
    pub created_at: u64,
    pub tags: Vec<NostrTag>,
    pub content: String,
    pub sig: String,
}

impl NostrEvent {
    pub fn from_event(event: &Event) -> Self {
        let tags = event
            .tags
            .iter()
            .map(NostrTag::from_sdk_tag)
            .collect();

        Self {
            id: event.id.to_string(),
            pubkey: event.pubkey.to_string(),
            kind: event.kind.as_u16(),
            created_at: event.created_at.as_secs(),
            tags,
            content: event.content.clone(),
            sig: event.sig.to_string(),
        }
    }

    /// First value of the first `d` tag, or `""` when the event has none.
    pub fn identifier(&self) -> &str {
        tag_value(&self.tags, IDENTIFIER_TAG).unwrap_or_default()
    }

    pub fn tag_parts(&self) -> Vec<Vec<String>> {
        self.tags.iter().map(NostrTag::to_parts).collect()
    }

    /// NIP-01 JSON object form.
    pub fn to_json_value(&self) -> Value {
        json!({
            "id": self.id,
            "pubkey": self.pubkey,
            "created_at": self.created_at,
            "kind": self.kind,
            "tags": self.tag_parts(),
            "content": self.content,
            "sig": self.sig,
        })
    }
}

pub fn d_tag(id: &str) -> NostrTag {
    NostrTag::new(IDENTIFIER_TAG, vec![id.to_string()])
}

pub fn tag_value<'a>(tags: &'a [NostrTag], name: &str) -> Option<&'a str> {
    tags.iter()
        .find(|tag| tag.name == name)
        .and_then(|tag| tag.values.first().map(|s| s.as_str()))
}

#[cfg(test)]
pub(crate) fn sample_event(id: &str, kind: u16, created_at: u64) -> NostrEvent {
    NostrEvent {
        id: id.to_string(),
        pubkey: "pubkey".to_string(),
        kind,
        created_at,
        tags: Vec::new(),
        content: format!("content of {id}"),
        sig: "sig".to_string(),
    }
}
