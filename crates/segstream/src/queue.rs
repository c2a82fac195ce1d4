// FIFO work queue with a concurrency limit, driven by its owner.

use std::collections::{HashSet, VecDeque};

/// Handle for one started unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ticket(u64);

/// Bookkeeping for a bounded pool of workers.
///
/// The queue does not run anything itself: the owner takes work with
/// [`BoundedQueue::next_ready`] whenever a slot is free and reports back with
/// [`BoundedQueue::complete`]. Completing the same ticket twice, or a ticket
/// issued before [`BoundedQueue::die`], is ignored.
#[derive(Debug)]
pub struct BoundedQueue<T> {
    concurrency: usize,
    pending: VecDeque<T>,
    running: HashSet<Ticket>,
    next_ticket: u64,
    total: usize,
}

impl<T> BoundedQueue<T> {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
            pending: VecDeque::new(),
            running: HashSet::new(),
            next_ticket: 0,
            total: 0,
        }
    }

    pub fn push(&mut self, item: T) {
        self.pending.push_back(item);
        self.total += 1;
    }

    /// Starts the oldest pending item if a slot is free.
    pub fn next_ready(&mut self) -> Option<(Ticket, T)> {
        if self.running.len() >= self.concurrency {
            return None;
        }
        let item = self.pending.pop_front()?;
        let ticket = Ticket(self.next_ticket);
        self.next_ticket += 1;
        self.running.insert(ticket);
        Some((ticket, item))
    }

    /// Releases the slot held by `ticket`. Returns `false` if it was already
    /// released.
    pub fn complete(&mut self, ticket: Ticket) -> bool {
        self.running.remove(&ticket)
    }

    /// Drops pending work and forgets running work.
    pub fn die(&mut self) {
        self.pending.clear();
        self.running.clear();
    }

    pub fn active(&self) -> usize {
        self.running.len()
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Items pushed over the queue's lifetime.
    pub fn total(&self) -> usize {
        self.total
    }

    pub fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.running.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limits_concurrency_in_fifo_order() {
        let mut queue = BoundedQueue::new(2);
        for i in 0..4 {
            queue.push(i);
        }
        let (a, first) = queue.next_ready().unwrap();
        let (_b, second) = queue.next_ready().unwrap();
        assert_eq!((first, second), (0, 1));
        assert!(queue.next_ready().is_none());
        assert_eq!((queue.active(), queue.pending(), queue.total()), (2, 2, 4));

        assert!(queue.complete(a));
        let (_, third) = queue.next_ready().unwrap();
        assert_eq!(third, 2);
        assert!(queue.next_ready().is_none());
    }

    #[test]
    fn duplicate_completion_is_ignored() {
        let mut queue = BoundedQueue::new(1);
        queue.push("a");
        queue.push("b");
        let (ticket, _) = queue.next_ready().unwrap();
        assert!(queue.complete(ticket));
        assert!(!queue.complete(ticket));
        assert_eq!(queue.active(), 0);

        // A second completion must not free a slot held by another ticket.
        let (_other, item) = queue.next_ready().unwrap();
        assert_eq!(item, "b");
        assert!(!queue.complete(ticket));
        assert_eq!(queue.active(), 1);
    }

    #[test]
    fn die_clears_pending_and_running() {
        let mut queue = BoundedQueue::new(1);
        queue.push(1);
        queue.push(2);
        let (ticket, _) = queue.next_ready().unwrap();
        queue.die();
        assert!(queue.is_idle());
        assert!(queue.next_ready().is_none());
        assert!(!queue.complete(ticket));
        assert_eq!(queue.total(), 2);
    }

    #[test]
    fn zero_concurrency_runs_one_at_a_time() {
        let mut queue = BoundedQueue::new(0);
        queue.push(());
        queue.push(());
        assert!(queue.next_ready().is_some());
        assert!(queue.next_ready().is_none());
    }
}
