//! Subscription filters.
//!
//! A [`Filter`] matches an event when every present constraint holds. Within a
//! single constraint the listed values are alternatives, so `kinds: [1, 7]`
//! matches either kind. A present but empty set matches nothing.

use std::collections::{BTreeMap, BTreeSet};

use serde::Deserialize;
use serde_json::Value;

use crate::events::NostrEvent;
use crate::Error;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    pub ids: Option<BTreeSet<String>>,
    pub authors: Option<BTreeSet<String>>,
    pub kinds: Option<BTreeSet<u16>>,
    /// Tag name (without the `#` prefix) to accepted first values.
    pub tags: BTreeMap<String, BTreeSet<String>>,
    pub since: Option<u64>,
    pub until: Option<u64>,
    pub limit: Option<usize>,
}

#[derive(Deserialize)]
struct RawFilter {
    #[serde(default)]
    ids: Option<BTreeSet<String>>,
    #[serde(default)]
    authors: Option<BTreeSet<String>>,
    #[serde(default)]
    kinds: Option<BTreeSet<u16>>,
    #[serde(default)]
    since: Option<u64>,
    #[serde(default)]
    until: Option<u64>,
    #[serde(default)]
    limit: Option<usize>,
    #[serde(flatten)]
    extra: BTreeMap<String, Value>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ids = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn authors<I, S>(mut self, authors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.authors = Some(authors.into_iter().map(Into::into).collect());
        self
    }

    pub fn kinds<I>(mut self, kinds: I) -> Self
    where
        I: IntoIterator<Item = u16>,
    {
        self.kinds = Some(kinds.into_iter().collect());
        self
    }

    pub fn tag<I, S>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags
            .entry(name.into())
            .or_default()
            .extend(values.into_iter().map(Into::into));
        self
    }

    pub fn since(mut self, since: u64) -> Self {
        self.since = Some(since);
        self
    }

    pub fn until(mut self, until: u64) -> Self {
        self.until = Some(until);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Parses a NIP-01 filter object. Keys such as `#e` become tag
    /// constraints; unknown keys (e.g. `search`) are ignored.
    pub fn from_json_value(value: Value) -> Result<Self, Error> {
        let raw: RawFilter = serde_json::from_value(value)?;

        let mut tags = BTreeMap::new();
        for (key, value) in raw.extra {
            if let Some(name) = key.strip_prefix('#') {
                let values: BTreeSet<String> = serde_json::from_value(value)?;
                tags.insert(name.to_string(), values);
            }
        }

        Ok(Self {
            ids: raw.ids,
            authors: raw.authors,
            kinds: raw.kinds,
            tags,
            since: raw.since,
            until: raw.until,
            limit: raw.limit,
        })
    }

    pub fn from_json(json: &str) -> Result<Self, Error> {
        Self::from_json_value(serde_json::from_str(json)?)
    }

    /// True when some constraint is an empty set, so no event can match.
    pub fn is_empty_match(&self) -> bool {
        self.ids.as_ref().is_some_and(BTreeSet::is_empty)
            || self.authors.as_ref().is_some_and(BTreeSet::is_empty)
            || self.kinds.as_ref().is_some_and(BTreeSet::is_empty)
            || self.tags.values().any(BTreeSet::is_empty)
            || self.limit == Some(0)
    }

    pub fn matches(&self, event: &NostrEvent) -> bool {
        if let Some(ids) = &self.ids {
            if !ids.contains(&event.id) {
                return false;
            }
        }

        if let Some(authors) = &self.authors {
            if !authors.contains(&event.pubkey) {
                return false;
            }
        }

        if let Some(kinds) = &self.kinds {
            if !kinds.contains(&event.kind) {
                return false;
            }
        }

        if self.since.is_some_and(|since| event.created_at < since) {
            return false;
        }

        if self.until.is_some_and(|until| event.created_at > until) {
            return false;
        }

        self.tags.iter().all(|(name, values)| {
            event.tags.iter().any(|tag| {
                tag.name == *name
                    && tag
                        .values
                        .first()
                        .is_some_and(|value| values.contains(value))
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{sample_event, NostrTag};

    #[test]
    fn test_empty_filter_matches_everything() {
        assert!(Filter::new().matches(&sample_event("a", 1, 10)));
    }

    #[test]
    fn test_fields_are_anded_values_are_ored() {
        let filter = Filter::new().kinds([1, 7]).authors(["pubkey"]);
        assert!(filter.matches(&sample_event("a", 1, 10)));
        assert!(filter.matches(&sample_event("b", 7, 10)));
        assert!(!filter.matches(&sample_event("c", 2, 10)));

        let other_author = Filter::new().kinds([1]).authors(["someone-else"]);
        assert!(!other_author.matches(&sample_event("a", 1, 10)));
    }

    #[test]
    fn test_time_bounds_are_inclusive() {
        let filter = Filter::new().since(10).until(20);
        assert!(filter.matches(&sample_event("a", 1, 10)));
        assert!(filter.matches(&sample_event("b", 1, 20)));
        assert!(!filter.matches(&sample_event("c", 1, 9)));
        assert!(!filter.matches(&sample_event("d", 1, 21)));
    }

    #[test]
    fn test_tag_constraint_uses_first_value() {
        let mut event = sample_event("a", 1, 10);
        event
            .tags
            .push(NostrTag::new("e", vec!["parent".to_string(), "root".to_string()]));

        assert!(Filter::new().tag("e", ["parent"]).matches(&event));
        assert!(!Filter::new().tag("e", ["root"]).matches(&event));
        assert!(!Filter::new().tag("p", ["parent"]).matches(&event));
    }

    #[test]
    fn test_empty_set_matches_nothing() {
        let filter = Filter::new().ids(Vec::<String>::new());
        assert!(filter.is_empty_match());
        assert!(!filter.matches(&sample_event("a", 1, 10)));
        assert!(!Filter::new().kinds([1]).is_empty_match());
    }

    #[test]
    fn test_parse_nip01_json() {
        let filter = Filter::from_json(
            r##"{"kinds":[0,30023],"authors":["abc"],"#d":["slug"],"#t":["nostr","rust"],"since":5,"limit":10,"search":"ignored"}"##,
        )
        .unwrap();

        assert_eq!(filter.kinds, Some(BTreeSet::from([0, 30023])));
        assert_eq!(filter.authors, Some(BTreeSet::from(["abc".to_string()])));
        assert_eq!(filter.since, Some(5));
        assert_eq!(filter.until, None);
        assert_eq!(filter.limit, Some(10));
        assert_eq!(filter.tags.len(), 2);
        assert!(filter.tags["t"].contains("rust"));
        assert!(filter.ids.is_none());
    }

    #[test]
    fn test_parse_rejects_malformed_tag_values() {
        assert!(Filter::from_json(r##"{"#e":"not-a-list"}"##).is_err());
        assert!(Filter::from_json(r#"{"kinds":["one"]}"#).is_err());
    }
}
