//! Subscription table and broadcast matching (§4.5). Grounded on `nostr-relay-builder`'s
//! `local::inner` subscription map plus its `new_event_dispatcher`: one table per
//! connection, mutated only by its owning task, matched against a shared broadcast
//! channel of freshly stored events.

use std::collections::HashMap;

use crate::model::{Event, Filter};

/// The live subscriptions registered by one connection. Only the owning connection's
/// task ever mutates this (§5 "Shared resources").
#[derive(Default)]
pub struct SubscriptionTable {
    subs: HashMap<String, Vec<Filter>>,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.subs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subs.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.subs.contains_key(id)
    }

    pub fn insert(&mut self, id: String, filters: Vec<Filter>) {
        self.subs.insert(id, filters);
    }

    pub fn remove(&mut self, id: &str) -> bool {
        self.subs.remove(id).is_some()
    }

    /// Every subscription whose filters match `event`, in registration-agnostic order
    /// (delivery order across subscriptions is unspecified by §5).
    pub fn matching<'a, 'b>(&'a self, event: &'b Event) -> impl Iterator<Item = &'a str> + use<'a, 'b> {
        self.subs
            .iter()
            .filter(move |(_, filters)| crate::model::filter::matches_any(filters, event))
            .map(|(id, _)| id.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::event::tests_support::signed;
    use crate::model::Kind;

    #[test]
    fn matches_only_subscriptions_whose_filters_accept_the_event() {
        let mut table = SubscriptionTable::new();
        let mut wants_kind_1 = Filter::new();
        wants_kind_1.kinds = vec![Kind::new(1)];
        table.insert("a".to_string(), vec![wants_kind_1]);
        let mut wants_kind_2 = Filter::new();
        wants_kind_2.kinds = vec![Kind::new(2)];
        table.insert("b".to_string(), vec![wants_kind_2]);

        let event = signed(1, "hi", vec![], 1);
        let matched: Vec<&str> = table.matching(&event).collect();
        assert_eq!(matched, vec!["a"]);
    }

    #[test]
    fn close_removes_the_subscription() {
        let mut table = SubscriptionTable::new();
        table.insert("a".to_string(), vec![Filter::new()]);
        assert!(table.remove("a"));
        assert!(!table.contains("a"));
    }
}
