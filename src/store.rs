//! Latest-book cache, written exclusively by the aggregator task.
//!
//! Because every write and every read happens inside the aggregator's call
//! frames, there is no lock and no interior mutability here; cross-task
//! consumers only ever see cloned snapshots carried inside signals.

use std::collections::HashMap;

use crate::model::{BookEvent, Venue};

#[derive(Default)]
pub struct BookStore {
    books: HashMap<Venue, HashMap<String, BookEvent>>,
}

impl BookStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the stored book for (venue, symbol). Invalid or unnamed events
    /// are the caller's problem; the store keeps whatever it is handed.
    pub fn update(&mut self, ev: BookEvent) {
        if ev.symbol_canon.is_empty() {
            return;
        }
        self.books
            .entry(ev.venue)
            .or_default()
            .insert(ev.symbol_canon.clone(), ev);
    }

    pub fn get(&self, venue: Venue, symbol_canon: &str) -> Option<&BookEvent> {
        self.books.get(&venue)?.get(symbol_canon)
    }

    /// Leader book and follower (Bittap) book for one symbol; either may be
    /// missing while feeds warm up.
    pub fn get_pair(
        &self,
        leader: Venue,
        symbol_canon: &str,
    ) -> (Option<&BookEvent>, Option<&BookEvent>) {
        (
            self.get(leader, symbol_canon),
            self.get(Venue::Bittap, symbol_canon),
        )
    }
}
