//! A multi-producer/multi-consumer FIFO queue, the Michael–Scott algorithm
//! run directly on top of [`crate::arcp::Arcp`] cells instead of raw atomic
//! pointers.
//!
//! Every node is a region holding two cells: `next` (the rest of the
//! list) and `item` (the region it carries, nulled out the moment it's
//! dequeued). The queue itself never goes empty of nodes — there's always
//! at least the sentinel — only ever empty of items.

use crate::arcp::Arcp;
use crate::region::Region;

struct QueueNode<T> {
    next: Arcp<QueueNode<T>>,
    item: Arcp<T>,
}

/// A lock-free FIFO queue of `Region<T>` items.
pub struct Queue<T> {
    head: Arcp<QueueNode<T>>,
    tail: Arcp<QueueNode<T>>,
}

impl<T> Queue<T> {
    pub fn new() -> Self {
        let sentinel = Region::new(QueueNode {
            next: Arcp::null(),
            item: Arcp::null(),
        });
        Self {
            head: Arcp::new(sentinel.clone()),
            tail: Arcp::new(sentinel),
        }
    }

    /// Appends `item` to the tail of the queue.
    ///
    /// Nodes come from `Box` through [`Region::new`], whose allocation
    /// failure aborts the process the same way every other `Box`/`Vec`
    /// allocation in Rust does, so there is nothing left for this method to
    /// report and it is infallible (see DESIGN.md).
    pub fn enqueue(&self, item: Region<T>) {
        let node = Region::new(QueueNode {
            next: Arcp::null(),
            item: Arcp::new(item),
        });
        loop {
            let tail = self.tail.load().expect("tail is never null");
            let next = tail.next.load();
            match next {
                Some(next) => {
                    // Someone else's node is already linked in but the tail
                    // pointer hasn't caught up; help it along before
                    // retrying our own insert.
                    let _ = self.tail.cas(Some(&tail), Some(&next));
                }
                None => {
                    if tail.next.cas(None, Some(&node)) {
                        let _ = self.tail.cas(Some(&tail), Some(&node));
                        return;
                    }
                }
            }
        }
    }

    /// Removes and returns the item at the head of the queue, or `None` if
    /// empty.
    pub fn dequeue(&self) -> Option<Region<T>> {
        loop {
            let head = self.head.load().expect("head is never null");
            let next = match head.next.load() {
                Some(next) => next,
                None => return None,
            };
            if self.head.cas(Some(&head), Some(&next)) {
                return next.item.swap(None);
            }
            // The head moved out from under us; loop and retry.
        }
    }

    /// Returns the item at the head of the queue without removing it, or
    /// `None` if empty.
    pub fn peek(&self) -> Option<Region<T>> {
        loop {
            let head = self.head.load().expect("head is never null");
            let next = match head.next.load() {
                Some(next) => next,
                None => return None,
            };
            let item = next.item.load();
            if item.is_none() {
                // Either the item was just dequeued out from under us, or
                // it genuinely is a stored `None` — tell the difference by
                // checking whether `head` is still current.
                let current = self.head.load_phantom();
                if current != Some(head.as_box_ptr()) {
                    continue;
                }
            }
            return item;
        }
    }

    /// Dequeues the head item only if it is (by region identity) `expected`.
    pub fn cmpdeq(&self, expected: &Region<T>) -> bool {
        loop {
            let head = self.head.load().expect("head is never null");
            let next = match head.next.load() {
                Some(next) => next,
                None => return false,
            };
            let observed = next.item.load_phantom();
            if observed.is_none() {
                let current = self.head.load_phantom();
                if current != Some(head.as_box_ptr()) {
                    continue;
                }
            }
            if observed != Some(expected.as_box_ptr()) {
                return false;
            }
            if self.head.cas(Some(&head), Some(&next)) {
                next.item.store(None);
                return true;
            }
        }
    }

    /// Returns `true` if the queue currently carries no items.
    pub fn is_empty(&self) -> bool {
        let head = self.head.load().expect("head is never null");
        head.next.load_phantom().is_none()
    }
}

impl<T> Default for Queue<T> {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl<T: Send + Sync> Send for Queue<T> {}
unsafe impl<T: Send + Sync> Sync for Queue<T> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order_is_preserved() {
        let q: Queue<u32> = Queue::new();
        for i in 0..5 {
            q.enqueue(Region::new(i));
        }
        for i in 0..5 {
            let item = q.dequeue().expect("item present");
            assert_eq!(*item, i);
        }
        assert!(q.dequeue().is_none());
    }

    #[test]
    fn peek_does_not_remove() {
        let q: Queue<&'static str> = Queue::new();
        q.enqueue(Region::new("a"));
        assert_eq!(*q.peek().unwrap(), "a");
        assert_eq!(*q.peek().unwrap(), "a");
        assert_eq!(*q.dequeue().unwrap(), "a");
        assert!(q.peek().is_none());
    }

    #[test]
    fn cmpdeq_only_removes_on_match() {
        let q: Queue<u32> = Queue::new();
        let a = Region::new(1u32);
        let b = Region::new(2u32);
        q.enqueue(a.clone());
        assert!(!q.cmpdeq(&b));
        assert!(q.cmpdeq(&a));
        assert!(q.is_empty());
    }

    #[test]
    fn concurrent_producers_and_consumers_preserve_total_count() {
        use std::sync::Arc as StdArc;
        use std::thread;

        let q = StdArc::new(Queue::<u32>::new());
        let producers = 8usize;
        let per_producer = 2000u32;

        thread::scope(|scope| {
            for p in 0..producers {
                let q = StdArc::clone(&q);
                scope.spawn(move || {
                    for i in 0..per_producer {
                        q.enqueue(Region::new(p as u32 * per_producer + i));
                    }
                });
            }
        });

        let mut seen = 0usize;
        while q.dequeue().is_some() {
            seen += 1;
        }
        assert_eq!(seen, producers * per_producer as usize);
    }
}
