//! Filters: a selection predicate evaluated against one event, used both for
//! backfill queries and for live broadcast matching. §4.4: a single
//! canonical implementation drives both paths.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use super::event::{Event, PublicKey};
use super::kind::Kind;

/// A selection predicate over events. Predicates within a filter are
/// conjunctive; filters within a `REQ` are disjunctive (see [`Filter::matches_any`]).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authors: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub kinds: Vec<Kind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    /// `#<single-char-tag-name>` predicates, e.g. `#e`, `#p`, `#d`.
    #[serde(flatten)]
    pub tags: HashMap<String, Vec<String>>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluate this filter (conjunctively) against one event.
    pub fn matches(&self, event: &Event) -> bool {
        if !self.ids.is_empty() && !self.ids.iter().any(|p| event.id.starts_with_hex(p)) {
            return false;
        }
        if !self.authors.is_empty()
            && !self
                .authors
                .iter()
                .any(|p| event.pubkey.to_hex().starts_with(p))
        {
            return false;
        }
        if !self.kinds.is_empty() && !self.kinds.contains(&event.kind) {
            return false;
        }
        if let Some(since) = self.since {
            if event.created_at < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if event.created_at > until {
                return false;
            }
        }
        for (key, wanted) in &self.tags {
            let Some(tag_name) = key.strip_prefix('#') else {
                continue;
            };
            if tag_name.chars().count() != 1 {
                continue;
            }
            let has_match = event
                .tags
                .iter()
                .filter(|t| t.name() == tag_name)
                .filter_map(|t| t.value())
                .any(|v| wanted.iter().any(|w| w == v));
            if !has_match {
                return false;
            }
        }
        if let Some(search) = &self.search {
            let haystack = event.content.to_lowercase();
            if !haystack.contains(&search.to_lowercase()) {
                return false;
            }
        }
        true
    }

    /// Indexed single-letter tag predicates only, keyed by tag name (without `#`).
    pub fn indexed_tags(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.tags.iter().filter_map(|(k, v)| {
            let name = k.strip_prefix('#')?;
            (name.chars().count() == 1).then_some((name, v.as_slice()))
        })
    }
}

/// `true` if any filter in `filters` matches `event` (disjunction across filters).
pub fn matches_any(filters: &[Filter], event: &Event) -> bool {
    filters.iter().any(|f| f.matches(event))
}

/// Dedup a set of hex-id/author prefixes isn't required by the protocol, but callers often
/// want the unique set of kinds requested across filters for capability checks.
pub fn all_kinds(filters: &[Filter]) -> HashSet<Kind> {
    filters.iter().flat_map(|f| f.kinds.iter().copied()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::event::tests_support::signed as event;
    use crate::model::tag::Tag;

    #[test]
    fn kind_and_time_bounds() {
        let e = event(1, "hi", vec![], 100);
        let mut f = Filter::new();
        f.kinds = vec![Kind::new(1)];
        f.since = Some(50);
        f.until = Some(150);
        assert!(f.matches(&e));
        f.since = Some(101);
        assert!(!f.matches(&e));
    }

    #[test]
    fn tag_predicate() {
        let e = event(1, "hi", vec![Tag::identifier("abc")], 1);
        let mut f = Filter::new();
        f.tags.insert("#d".to_string(), vec!["abc".to_string()]);
        assert!(f.matches(&e));
        f.tags.insert("#d".to_string(), vec!["other".to_string()]);
        assert!(!f.matches(&e));
    }

    #[test]
    fn search_is_case_insensitive_substring() {
        let e = event(1, "Yaks are amazing", vec![], 1);
        let mut f = Filter::new();
        f.search = Some("yak".to_string());
        assert!(f.matches(&e));
        f.search = Some("zebra".to_string());
        assert!(!f.matches(&e));
    }

    #[test]
    fn disjunction_across_filters() {
        let e = event(2, "hi", vec![], 1);
        let mut a = Filter::new();
        a.kinds = vec![Kind::new(1)];
        let mut b = Filter::new();
        b.kinds = vec![Kind::new(2)];
        assert!(matches_any(&[a, b], &e));
    }
}
