//! Shared snapshot store for live books.
//!
//! Venue decode tasks are the only writers (one task per book); detector
//! and router tasks read. Snapshots are immutable and handed out behind
//! `Arc`, so a read shares the current consistent state without copying
//! depth levels, and every entry remembers when it was written so callers
//! can refuse stale or mixed-age state.
//!
//! The multi-book readers are all-or-none: an atomic scan with only one
//! side of the pair, or a projection with a hole in the price vector, is
//! not worth running.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use crate::core::domain::{OrderBook, TokenId};

struct Entry {
    book: Arc<OrderBook>,
    published_at: Instant,
}

/// Latest-snapshot store, one entry per token.
pub struct BookCache {
    entries: RwLock<HashMap<TokenId, Entry>>,
}

impl BookCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Publish a fresh snapshot, replacing whatever was there.
    pub fn publish(&self, book: OrderBook) {
        let token_id = book.token_id().clone();
        let entry = Entry {
            book: Arc::new(book),
            published_at: Instant::now(),
        };
        self.entries.write().insert(token_id, entry);
    }

    /// Drop a book when its subscription goes away.
    pub fn remove(&self, token_id: &TokenId) {
        self.entries.write().remove(token_id);
    }

    /// Latest snapshot for one token.
    #[must_use]
    pub fn get(&self, token_id: &TokenId) -> Option<Arc<OrderBook>> {
        self.entries
            .read()
            .get(token_id)
            .map(|entry| Arc::clone(&entry.book))
    }

    /// Age of the latest snapshot for one token.
    #[must_use]
    pub fn age(&self, token_id: &TokenId) -> Option<Duration> {
        self.entries
            .read()
            .get(token_id)
            .map(|entry| entry.published_at.elapsed())
    }

    /// Both sides of a binary pair under one lock, or nothing when either
    /// side is missing.
    #[must_use]
    pub fn pair(
        &self,
        yes: &TokenId,
        no: &TokenId,
    ) -> Option<(Arc<OrderBook>, Arc<OrderBook>)> {
        let entries = self.entries.read();
        Some((
            Arc::clone(&entries.get(yes)?.book),
            Arc::clone(&entries.get(no)?.book),
        ))
    }

    /// Both sides of a binary pair, only when both snapshots are younger
    /// than `max_age`. A one-sided or half-stale pair cannot be scanned.
    #[must_use]
    pub fn fresh_pair(
        &self,
        yes: &TokenId,
        no: &TokenId,
        max_age: Duration,
    ) -> Option<(Arc<OrderBook>, Arc<OrderBook>)> {
        let entries = self.entries.read();
        let now = Instant::now();
        let fresh = |token: &TokenId| {
            let entry = entries.get(token)?;
            (now.duration_since(entry.published_at) <= max_age).then(|| Arc::clone(&entry.book))
        };
        Some((fresh(yes)?, fresh(no)?))
    }

    /// Snapshots for a whole constraint set under one lock, or nothing
    /// when any token is missing.
    #[must_use]
    pub fn all(&self, tokens: &[TokenId]) -> Option<Vec<Arc<OrderBook>>> {
        let entries = self.entries.read();
        tokens
            .iter()
            .map(|token| entries.get(token).map(|entry| Arc::clone(&entry.book)))
            .collect()
    }

    /// Number of tracked books.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether no books are tracked yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for BookCache {
    fn default() -> Self {
        Self::new()
    }
}
