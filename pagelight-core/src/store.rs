//! Per-session match storage.
//!
//! The store only ever holds document-space rectangles. Screen rectangles are
//! derived on demand by the renderer, so zoom and rotation never touch it.

use std::collections::{BTreeMap, HashMap};
use std::ops::Range;

use serde::Serialize;

use crate::geometry::DocumentRect;
use crate::matcher::TermId;
use crate::PageId;

/// One stored highlight. Never mutated after creation; a page's list is
/// replaced wholesale instead.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchRect {
    pub page: PageId,
    pub term_id: TermId,
    pub order: u64,
    pub bbox_doc: DocumentRect,
    pub source_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchStats {
    pub total_matches: usize,
    pub active_index: Option<usize>,
    pub query: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Identifies one in-flight pipeline run for a page. A ticket that no longer
/// matches the page's status belongs to superseded work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ticket(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageState {
    Idle,
    Processing,
    Processed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessDecision {
    /// The caller owns the pipeline run identified by the ticket.
    Run(Ticket),
    /// Another run for this page is in flight; do nothing.
    InFlight,
    /// Already processed for this query; only repaint.
    Cached,
}

#[derive(Debug, Clone)]
enum PageStatus {
    Processing { ticket: Ticket, query: String },
    Processed { query: String },
}

type Listener = Box<dyn Fn(&SearchStats) + Send + Sync>;

#[derive(Default)]
pub struct MatchStore {
    query: String,
    pages: BTreeMap<PageId, Vec<MatchRect>>,
    by_order: BTreeMap<u64, (PageId, usize)>,
    total: usize,
    active: Option<usize>,
    next_order: u64,
    next_ticket: u64,
    status: HashMap<PageId, PageStatus>,
    listeners: Vec<(SubscriptionId, Listener)>,
    next_subscription: u64,
}

impl MatchStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn total_matches(&self) -> usize {
        self.total
    }

    pub fn active_index(&self) -> Option<usize> {
        self.active
    }

    pub fn stats(&self) -> SearchStats {
        SearchStats {
            total_matches: self.total,
            active_index: self.active,
            query: self.query.clone(),
        }
    }

    pub fn matches(&self, page: PageId) -> &[MatchRect] {
        self.pages.get(&page).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Pages that hold a (possibly empty) result list.
    pub fn pages(&self) -> impl Iterator<Item = PageId> + '_ {
        self.pages.keys().copied()
    }

    pub fn has_page(&self, page: PageId) -> bool {
        self.pages.contains_key(&page)
    }

    /// Starts a new search session when the query changes. Returns whether
    /// anything was reset; setting the current query again is a no-op.
    pub fn set_query(&mut self, query: &str) -> bool {
        if self.query == query {
            return false;
        }
        self.query = query.to_string();
        self.pages.clear();
        self.by_order.clear();
        self.total = 0;
        self.active = None;
        self.next_order = 0;
        self.status.clear();
        self.notify();
        true
    }

    /// Hands out `count` consecutive global orders.
    pub fn allocate_orders(&mut self, count: usize) -> Range<u64> {
        let start = self.next_order;
        self.next_order += count as u64;
        start..self.next_order
    }

    pub fn set_match_rects(&mut self, page: PageId, rects: Vec<MatchRect>) {
        self.replace_page(page, Some(rects));
        self.notify();
    }

    /// Drops a page's results and returns it to `Idle`. Any pipeline still in
    /// flight for the page becomes stale.
    pub fn invalidate_page(&mut self, page: PageId) {
        self.status.remove(&page);
        self.replace_page(page, None);
        self.notify();
    }

    pub fn next(&mut self) -> Option<usize> {
        if self.total == 0 {
            return None;
        }
        let next = match self.active {
            Some(index) => (index + 1) % self.total,
            None => 0,
        };
        self.active = Some(next);
        self.notify();
        self.active
    }

    pub fn previous(&mut self) -> Option<usize> {
        if self.total == 0 {
            return None;
        }
        let previous = match self.active {
            Some(0) | None => self.total - 1,
            Some(index) => index - 1,
        };
        self.active = Some(previous);
        self.notify();
        self.active
    }

    pub fn active_match(&self) -> Option<&MatchRect> {
        let (page, index) = self.by_order.values().nth(self.active?)?;
        self.pages.get(page)?.get(*index)
    }

    /// Position of the active match inside `page`'s list, if it lives there.
    pub fn active_index_within(&self, page: PageId) -> Option<usize> {
        let (active_page, index) = self.by_order.values().nth(self.active?)?;
        (*active_page == page).then_some(*index)
    }

    pub fn page_state(&self, page: PageId) -> PageState {
        match self.status.get(&page) {
            None => PageState::Idle,
            Some(PageStatus::Processing { .. }) => PageState::Processing,
            Some(PageStatus::Processed { .. }) => PageState::Processed,
        }
    }

    /// `Idle -> Processing`, or `Processed` with a different query back to
    /// `Processing`. A page already `Processing` is never restarted.
    pub fn begin_processing(&mut self, page: PageId, query: &str) -> ProcessDecision {
        match self.status.get(&page) {
            Some(PageStatus::Processing { .. }) => return ProcessDecision::InFlight,
            Some(PageStatus::Processed { query: done }) if done == query => {
                return ProcessDecision::Cached
            }
            _ => {}
        }
        self.next_ticket += 1;
        let ticket = Ticket(self.next_ticket);
        self.status.insert(
            page,
            PageStatus::Processing {
                ticket,
                query: query.to_string(),
            },
        );
        ProcessDecision::Run(ticket)
    }

    pub fn is_current(&self, page: PageId, ticket: Ticket) -> bool {
        matches!(
            self.status.get(&page),
            Some(PageStatus::Processing { ticket: current, .. }) if *current == ticket
        )
    }

    /// Commits the results of a pipeline run. Returns `false`, leaving the
    /// store untouched, when the run has been superseded.
    pub fn finish_processing(&mut self, page: PageId, ticket: Ticket, rects: Vec<MatchRect>) -> bool {
        let query = match self.status.get(&page) {
            Some(PageStatus::Processing {
                ticket: current,
                query,
            }) if *current == ticket => query.clone(),
            _ => return false,
        };
        self.status.insert(page, PageStatus::Processed { query });
        self.set_match_rects(page, rects);
        true
    }

    /// Abandons whatever run is in flight for `page` and returns it to `Idle`.
    /// Stored results, if any, are left alone.
    pub fn cancel_processing(&mut self, page: PageId) -> bool {
        if matches!(self.status.get(&page), Some(PageStatus::Processing { .. })) {
            self.status.remove(&page);
            true
        } else {
            false
        }
    }

    pub fn subscribe<F>(&mut self, listener: F) -> SubscriptionId
    where
        F: Fn(&SearchStats) + Send + Sync + 'static,
    {
        self.next_subscription += 1;
        let id = SubscriptionId(self.next_subscription);
        self.listeners.push((id, Box::new(listener)));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(existing, _)| *existing != id);
        self.listeners.len() != before
    }

    fn replace_page(&mut self, page: PageId, rects: Option<Vec<MatchRect>>) {
        let removed = match rects {
            Some(rects) => self.pages.insert(page, rects),
            None => self.pages.remove(&page),
        };
        if let Some(old) = removed {
            for rect in &old {
                self.by_order.remove(&rect.order);
            }
            self.total -= old.len();
        }
        if let Some(current) = self.pages.get(&page) {
            for (index, rect) in current.iter().enumerate() {
                self.by_order.insert(rect.order, (page, index));
            }
            self.total += current.len();
        }
        if matches!(self.active, Some(index) if index >= self.total) {
            self.active = None;
        }
    }

    // Runs after the mutation is complete, so listeners only ever see a
    // consistent snapshot.
    fn notify(&self) {
        if self.listeners.is_empty() {
            return;
        }
        let stats = self.stats();
        for (_, listener) in &self.listeners {
            listener(&stats);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn rects_for(store: &mut MatchStore, page: PageId, count: usize) -> Vec<MatchRect> {
        let orders = store.allocate_orders(count);
        orders
            .map(|order| MatchRect {
                page,
                term_id: TermId::for_query("q"),
                order,
                bbox_doc: DocumentRect::new(order as f64 * 10.0, 100.0, 8.0, 12.0),
                source_id: None,
            })
            .collect()
    }

    fn store_with_two_pages() -> MatchStore {
        let mut store = MatchStore::new();
        store.set_query("q");
        let first = rects_for(&mut store, 1, 3);
        store.set_match_rects(1, first);
        let second = rects_for(&mut store, 2, 2);
        store.set_match_rects(2, second);
        store
    }

    #[test]
    fn next_walks_orders_and_wraps() {
        let mut store = store_with_two_pages();
        assert_eq!(store.total_matches(), 5);
        let mut visited = Vec::new();
        for _ in 0..6 {
            store.next();
            visited.push(store.active_match().unwrap().order);
        }
        assert_eq!(visited, vec![0, 1, 2, 3, 4, 0]);
    }

    #[test]
    fn previous_from_unset_starts_at_last() {
        let mut store = store_with_two_pages();
        assert_eq!(store.previous(), Some(4));
        assert_eq!(store.active_match().unwrap().order, 4);
        assert_eq!(store.active_index_within(2), Some(1));
        assert_eq!(store.active_index_within(1), None);
        store.next();
        store.previous();
        store.previous();
        assert_eq!(store.active_match().unwrap().order, 3);
    }

    #[test]
    fn navigation_without_matches_is_a_no_op() {
        let mut store = MatchStore::new();
        store.set_query("q");
        let calls = Arc::new(Mutex::new(0));
        let seen = Arc::clone(&calls);
        store.subscribe(move |_| *seen.lock() += 1);
        assert_eq!(store.next(), None);
        assert_eq!(store.previous(), None);
        assert_eq!(store.active_index(), None);
        assert_eq!(*calls.lock(), 0);
    }

    #[test]
    fn setting_same_query_twice_changes_nothing() {
        let mut store = store_with_two_pages();
        store.next();
        assert!(!store.set_query("q"));
        assert_eq!(store.total_matches(), 5);
        assert_eq!(store.active_index(), Some(0));
        assert_eq!(store.allocate_orders(1), 5..6);
    }

    #[test]
    fn new_query_clears_pages_and_resets_counter() {
        let mut store = store_with_two_pages();
        store.next();
        assert!(store.set_query("other"));
        assert_eq!(store.total_matches(), 0);
        assert_eq!(store.active_index(), None);
        assert!(store.matches(1).is_empty());
        assert_eq!(store.allocate_orders(2), 0..2);
        assert_eq!(store.page_state(1), PageState::Idle);
    }

    #[test]
    fn replacing_a_page_keeps_total_and_resets_stale_active() {
        let mut store = store_with_two_pages();
        store.previous();
        assert_eq!(store.active_index(), Some(4));
        let replacement = rects_for(&mut store, 2, 1);
        store.set_match_rects(2, replacement);
        assert_eq!(store.total_matches(), 4);
        assert_eq!(store.active_index(), None);

        store.next();
        store.set_match_rects(1, Vec::new());
        assert_eq!(store.total_matches(), 1);
        assert_eq!(store.active_index(), Some(0));
        assert_eq!(store.active_match().unwrap().page, 2);
    }

    #[test]
    fn listeners_see_state_after_mutation() {
        let mut store = MatchStore::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let id = store.subscribe(move |stats| sink.lock().push(stats.clone()));

        store.set_query("shall");
        let rects = rects_for(&mut store, 0, 2);
        store.set_match_rects(0, rects);
        store.next();

        {
            let seen = seen.lock();
            assert_eq!(seen.len(), 3);
            assert_eq!(seen[0].query, "shall");
            assert_eq!(seen[1].total_matches, 2);
            assert_eq!(seen[1].active_index, None);
            assert_eq!(seen[2].active_index, Some(0));
        }

        assert!(store.unsubscribe(id));
        store.next();
        assert_eq!(seen.lock().len(), 3);
    }

    #[test]
    fn processing_state_machine() {
        let mut store = MatchStore::new();
        store.set_query("q");
        let ticket = match store.begin_processing(3, "q") {
            ProcessDecision::Run(ticket) => ticket,
            other => panic!("unexpected decision: {:?}", other),
        };
        assert_eq!(store.page_state(3), PageState::Processing);
        assert_eq!(store.begin_processing(3, "q"), ProcessDecision::InFlight);

        let rects = rects_for(&mut store, 3, 1);
        assert!(store.finish_processing(3, ticket, rects));
        assert_eq!(store.page_state(3), PageState::Processed);
        assert_eq!(store.begin_processing(3, "q"), ProcessDecision::Cached);
        assert!(matches!(
            store.begin_processing(3, "other"),
            ProcessDecision::Run(_)
        ));
    }

    #[test]
    fn superseded_ticket_cannot_commit() {
        let mut store = MatchStore::new();
        store.set_query("q");
        let ProcessDecision::Run(stale) = store.begin_processing(0, "q") else {
            panic!("expected a run");
        };
        store.invalidate_page(0);
        let ProcessDecision::Run(fresh) = store.begin_processing(0, "q") else {
            panic!("expected a run");
        };
        assert_ne!(stale, fresh);
        assert!(!store.is_current(0, stale));
        let rects = rects_for(&mut store, 0, 2);
        assert!(!store.finish_processing(0, stale, rects));
        assert_eq!(store.total_matches(), 0);
        assert_eq!(store.page_state(0), PageState::Processing);

        assert!(store.cancel_processing(0));
        assert_eq!(store.page_state(0), PageState::Idle);
        assert!(!store.cancel_processing(0));
    }
}
