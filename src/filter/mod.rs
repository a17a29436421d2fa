//! FilterCompiler (spec §4.4): the `Filter` wire type, the in-memory matcher,
//! and query-plan index selection used by the store.

use crate::event::Event;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A Nostr filter as it appears in `REQ`/`COUNT` (spec §4.4). All fields optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Filter {
    pub ids: Option<Vec<String>>,
    pub authors: Option<Vec<String>>,
    pub kinds: Option<Vec<u16>>,
    pub since: Option<i64>,
    pub until: Option<i64>,
    pub limit: Option<usize>,
    pub search: Option<String>,

    /// Tag filters, e.g. `{"#e": [...]}`. Captured via `flatten` so `#d`,
    /// `#e`, etc. round-trip as top-level JSON keys per the wire format.
    #[serde(flatten)]
    pub tags: HashMap<String, Vec<String>>,
}

/// Index the query planner would use to serve this filter (spec §4.1/§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexPlan {
    PrimaryKey,
    PubkeyCreatedAt,
    KindCreatedAt,
    CreatedAtOnly,
}

/// Sort direction the plan would scan in, before oldest-first reordering
/// is applied to the emitted results (spec §4.4 "Sort and limit semantics").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

impl Filter {
    /// `#name` accessor for tag filters, matching the wire key convention.
    pub fn tag_filter(&self, name: &str) -> Option<&[String]> {
        self.tags.get(&format!("#{name}")).map(Vec::as_slice)
    }

    pub fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(crate::common::consts::DEFAULT_QUERY_LIMIT)
    }

    /// Index selection precedence (spec §4.4).
    pub fn plan(&self) -> IndexPlan {
        if self.ids.as_ref().is_some_and(|v| !v.is_empty()) {
            IndexPlan::PrimaryKey
        } else if self.authors.as_ref().is_some_and(|v| !v.is_empty())
            && self.kinds.as_ref().is_some_and(|v| !v.is_empty())
        {
            IndexPlan::PubkeyCreatedAt
        } else if self.kinds.as_ref().is_some_and(|v| !v.is_empty()) {
            IndexPlan::KindCreatedAt
        } else {
            IndexPlan::CreatedAtOnly
        }
    }

    /// Scan order the plan uses; results are reversed to oldest-first at
    /// emission time when this is `Descending` (spec §4.4).
    pub fn sort_order(&self) -> SortOrder {
        if self.since.is_some() && self.until.is_none() {
            SortOrder::Ascending
        } else {
            SortOrder::Descending
        }
    }

    /// In-memory matcher used on the live path (spec §4.4). Must stay
    /// semantically identical to the SQL plan on the intersection of inputs (P2).
    pub fn matches(&self, evt: &Event) -> bool {
        if let Some(ids) = &self.ids {
            if !ids.iter().any(|id| id == &evt.id) {
                return false;
            }
        }
        if let Some(authors) = &self.authors {
            if !authors.iter().any(|a| a == &evt.pubkey) {
                return false;
            }
        }
        if let Some(kinds) = &self.kinds {
            if !kinds.contains(&evt.kind) {
                return false;
            }
        }
        if let Some(since) = self.since {
            if evt.created_at < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if evt.created_at > until {
                return false;
            }
        }
        for (key, values) in &self.tags {
            let Some(name) = key.strip_prefix('#') else {
                continue;
            };
            if !evt.tag_values(name).any(|v| values.iter().any(|want| want == v)) {
                return false;
            }
        }
        if let Some(search) = &self.search {
            let needle = search.to_lowercase();
            if !evt.content.to_lowercase().contains(&needle) {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;

    fn evt(kind: u16, pubkey: &str, created_at: i64, content: &str, tags: Vec<Vec<String>>) -> Event {
        Event {
            id: "deadbeef".into(),
            pubkey: pubkey.into(),
            created_at,
            kind,
            tags,
            content: content.into(),
            sig: String::new(),
        }
    }

    #[test]
    fn plan_selection_precedence() {
        let f = Filter {
            ids: Some(vec!["x".into()]),
            ..Default::default()
        };
        assert_eq!(f.plan(), IndexPlan::PrimaryKey);

        let f = Filter {
            authors: Some(vec!["a".into()]),
            kinds: Some(vec![1]),
            ..Default::default()
        };
        assert_eq!(f.plan(), IndexPlan::PubkeyCreatedAt);

        let f = Filter {
            kinds: Some(vec![1]),
            ..Default::default()
        };
        assert_eq!(f.plan(), IndexPlan::KindCreatedAt);

        assert_eq!(Filter::default().plan(), IndexPlan::CreatedAtOnly);
    }

    #[test]
    fn matcher_checks_every_set_field() {
        let e = evt(1, "pk1", 100, "hello world", vec![vec!["e".into(), "t1".into()]]);
        let f = Filter {
            kinds: Some(vec![1]),
            authors: Some(vec!["pk1".into()]),
            since: Some(50),
            until: Some(150),
            search: Some("WORLD".into()),
            ..Default::default()
        };
        assert!(f.matches(&e));

        let mut tags = HashMap::new();
        tags.insert("#e".to_string(), vec!["t1".to_string()]);
        let f2 = Filter { tags, ..Default::default() };
        assert!(f2.matches(&e));

        let mut tags_miss = HashMap::new();
        tags_miss.insert("#e".to_string(), vec!["other".to_string()]);
        let f3 = Filter { tags: tags_miss, ..Default::default() };
        assert!(!f3.matches(&e));
    }

    #[test]
    fn sort_order_forward_stream_vs_backlog() {
        let f = Filter { since: Some(1), ..Default::default() };
        assert_eq!(f.sort_order(), SortOrder::Ascending);
        let f2 = Filter { since: Some(1), until: Some(2), ..Default::default() };
        assert_eq!(f2.sort_order(), SortOrder::Descending);
        assert_eq!(Filter::default().sort_order(), SortOrder::Descending);
    }
}
