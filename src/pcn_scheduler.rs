//! Time-ordered event queue.
//!
//! A `BinaryHeap` with reversed ordering keyed by `(time, seq)`. The sequence
//! number grows with every push, so events scheduled for the same time come
//! out in the order they were scheduled and replays are deterministic.

use crate::pcn_interface::SimTime;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

#[derive(Debug, Clone)]
pub struct Scheduled<E> {
    pub time: SimTime,
    pub seq: u64,
    pub payload: E,
}

impl<E> PartialEq for Scheduled<E> {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl<E> Eq for Scheduled<E> {}

impl<E> Ord for Scheduled<E> {
    fn cmp(&self, other: &Self) -> Ordering {
        // reversed: the heap pops the earliest time, then the lowest seq
        other
            .time
            .total_cmp(&self.time)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl<E> PartialOrd for Scheduled<E> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone)]
pub struct EventQueue<E> {
    heap: BinaryHeap<Scheduled<E>>,
    next_seq: u64,
}

impl<E> EventQueue<E> {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_seq: 0,
        }
    }

    /// Schedules `payload` at `time` and returns its sequence number.
    pub fn push(&mut self, time: SimTime, payload: E) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Scheduled { time, seq, payload });
        seq
    }

    pub fn pop(&mut self) -> Option<Scheduled<E>> {
        self.heap.pop()
    }

    pub fn peek_time(&self) -> Option<SimTime> {
        self.heap.peek().map(|s| s.time)
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Number of events ever scheduled.
    pub fn scheduled_total(&self) -> u64 {
        self.next_seq
    }

    pub fn clear(&mut self) {
        self.heap.clear();
    }
}

impl<E> Default for EventQueue<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_at_same_time() {
        let mut q = EventQueue::new();
        q.push(10.0, "first");
        q.push(10.0, "second");
        q.push(10.0, "third");

        let order: Vec<_> = std::iter::from_fn(|| q.pop()).map(|s| s.payload).collect();
        assert_eq!(order, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_earliest_first() {
        let mut q = EventQueue::new();
        q.push(5.0, 'c');
        q.push(0.5, 'a');
        q.push(1.0, 'b');
        q.push(0.5, 'z');

        assert_eq!(q.peek_time(), Some(0.5));
        let order: Vec<_> = std::iter::from_fn(|| q.pop()).map(|s| s.payload).collect();
        assert_eq!(order, vec!['a', 'z', 'b', 'c']);
        assert!(q.is_empty());
        assert_eq!(q.scheduled_total(), 4);
    }
}
