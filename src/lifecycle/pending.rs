//! Side buffer for chunks whose request is not the active one.
//!
//! Released first-buffered-request-first; each request keeps its chunk order.

use crate::message::TextChunk;
use indexmap::IndexMap;

#[derive(Debug, Default)]
pub struct PendingBuffer {
    requests: IndexMap<String, Vec<TextChunk>>,
}

impl PendingBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `chunk` to its request's list, creating it on first sight.
    pub fn push(&mut self, chunk: TextChunk) {
        self.requests
            .entry(chunk.request_id.clone())
            .or_default()
            .push(chunk);
    }

    /// Removes the earliest buffered request with all of its chunks.
    pub fn pop_first(&mut self) -> Option<(String, Vec<TextChunk>)> {
        self.requests.shift_remove_index(0)
    }

    pub fn contains(&self, request_id: &str) -> bool {
        self.requests.contains_key(request_id)
    }

    /// Buffered request ids in release order.
    pub fn ids(&self) -> Vec<String> {
        self.requests.keys().cloned().collect()
    }

    /// Total buffered chunks across all requests.
    pub fn chunk_count(&self) -> usize {
        self.requests.values().map(Vec::len).sum()
    }

    pub fn clear(&mut self) {
        self.requests.clear();
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}
