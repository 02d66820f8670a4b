//! Priority request queue with deduplication.
//!
//! A min-queue ordered by `(priority, insertion sequence)`: lowest priority
//! number first, FIFO within equal priority. The deduplication filter runs
//! before enqueue and marks keys regardless of outcome.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};

use tracing::debug;

use crate::request::Request;

use super::callbacks::DuplicateCheck;

struct Entry {
    priority: i32,
    seq: u64,
    request: Request,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.priority, self.seq).cmp(&(other.priority, other.seq))
    }
}

/// Outcome of an enqueue attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueue {
    Queued,
    /// Skipped by the deduplication filter.
    Duplicate,
}

/// Min-priority queue over planned requests.
pub struct RequestQueue {
    heap: BinaryHeap<Reverse<Entry>>,
    next_seq: u64,
    seen: HashSet<String>,
    duplicate_check: Option<DuplicateCheck>,
}

impl RequestQueue {
    /// Create a queue with the default in-memory seen-set, or a custom
    /// duplicate predicate (returns true to enqueue).
    pub fn new(duplicate_check: Option<DuplicateCheck>) -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_seq: 0,
            seen: HashSet::new(),
            duplicate_check,
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Enqueue a request. `step_priority` applies when the request does not
    /// pin its own priority.
    pub fn push(&mut self, request: Request, step_priority: i32) -> Enqueue {
        if let Some(key) = request.dedup_key() {
            let fresh = match &mut self.duplicate_check {
                Some(check) => check(&key),
                None => self.seen.insert(key),
            };
            if !fresh {
                debug!(url = %request.url, "skipping duplicate request");
                return Enqueue::Duplicate;
            }
        }

        let priority = request.effective_priority(step_priority);
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse(Entry {
            priority,
            seq,
            request,
        }));
        Enqueue::Queued
    }

    /// Pop the lowest-ordered request.
    pub fn pop(&mut self) -> Option<Request> {
        self.heap.pop().map(|Reverse(entry)| entry.request)
    }

    /// Discard all pending requests, returning how many were dropped.
    pub fn drain(&mut self) -> usize {
        let dropped = self.heap.len();
        self.heap.clear();
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::DEFAULT_PRIORITY;

    fn request(url: &str) -> Request {
        Request::get(url).continuation("parse").build()
    }

    fn request_with_priority(url: &str, priority: i32) -> Request {
        Request::get(url)
            .continuation("parse")
            .priority(priority)
            .build()
    }

    #[test]
    fn test_lowest_priority_number_pops_first() {
        let mut queue = RequestQueue::new(None);
        queue.push(request_with_priority("https://example.com/a", 9), DEFAULT_PRIORITY);
        queue.push(request_with_priority("https://example.com/b", 1), DEFAULT_PRIORITY);
        queue.push(request_with_priority("https://example.com/c", 9), DEFAULT_PRIORITY);

        let order: Vec<String> = std::iter::from_fn(|| queue.pop().map(|r| r.url)).collect();
        assert_eq!(
            order,
            vec![
                "https://example.com/b",
                "https://example.com/a",
                "https://example.com/c"
            ]
        );
    }

    #[test]
    fn test_equal_priority_is_fifo() {
        let mut queue = RequestQueue::new(None);
        for n in 0..5 {
            queue.push(request(&format!("https://example.com/{n}")), DEFAULT_PRIORITY);
        }
        for n in 0..5 {
            assert_eq!(queue.pop().unwrap().url, format!("https://example.com/{n}"));
        }
    }

    #[test]
    fn test_duplicate_urls_enqueue_once() {
        let mut queue = RequestQueue::new(None);
        assert_eq!(
            queue.push(request("https://example.com/x"), DEFAULT_PRIORITY),
            Enqueue::Queued
        );
        assert_eq!(
            queue.push(request("https://example.com/x"), DEFAULT_PRIORITY),
            Enqueue::Duplicate
        );
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_skip_dedup_bypasses_filter() {
        let mut queue = RequestQueue::new(None);
        queue.push(request("https://example.com/x"), DEFAULT_PRIORITY);
        let bypass = Request::get("https://example.com/x")
            .continuation("parse")
            .skip_dedup()
            .build();
        assert_eq!(queue.push(bypass, DEFAULT_PRIORITY), Enqueue::Queued);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_custom_duplicate_predicate() {
        let mut queue = RequestQueue::new(Some(Box::new(|_key: &str| false)));
        assert_eq!(
            queue.push(request("https://example.com/x"), DEFAULT_PRIORITY),
            Enqueue::Duplicate
        );
    }
}
