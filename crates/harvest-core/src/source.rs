//! Item sources feeding the engine

use std::collections::VecDeque;

use crate::error::FetchError;
use crate::record::WorkItem;

/// Produces the items of one run, possibly page by page.
///
/// A source that fails must leave its position unchanged so the engine can
/// call `next_item` again after backing off.
pub trait ItemSource {
    type Item: WorkItem;

    /// Total or estimated item count, for progress reporting.
    fn size_hint(&self) -> Option<u64> {
        None
    }

    /// Next item, `Ok(None)` once exhausted.
    fn next_item(&mut self) -> Result<Option<Self::Item>, FetchError>;
}

/// Source over an in-memory list.
#[derive(Debug)]
pub struct ListSource<T> {
    items: VecDeque<T>,
    total: u64,
}

impl<T> ListSource<T> {
    pub fn new(items: impl IntoIterator<Item = T>) -> Self {
        let items: VecDeque<T> = items.into_iter().collect();
        let total = items.len() as u64;
        Self { items, total }
    }

    pub fn remaining(&self) -> usize {
        self.items.len()
    }
}

impl<T: WorkItem> ItemSource for ListSource<T> {
    type Item = T;

    fn size_hint(&self) -> Option<u64> {
        Some(self.total)
    }

    fn next_item(&mut self) -> Result<Option<T>, FetchError> {
        Ok(self.items.pop_front())
    }
}
