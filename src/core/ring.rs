use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Creates a fixed-capacity single-producer single-consumer ring.
///
/// The ring is the only sample path between the realtime thread and the
/// worker thread. Both endpoints are wait-free: `push` rejects when the ring
/// is full (the value is handed back, nothing blocks) and `pop` returns
/// `None` when it is empty. Capacity is fixed at construction; there is no
/// overwrite of unconsumed items.
///
/// # Panics
/// Panics if `capacity` is zero.
pub fn ring_channel<T: Send>(capacity: usize) -> (Producer<T>, Consumer<T>) {
    assert!(capacity > 0, "ring capacity must be non-zero");

    let mut slots = Vec::with_capacity(capacity);
    for _ in 0..capacity {
        slots.push(UnsafeCell::new(MaybeUninit::uninit()));
    }

    let shared = Arc::new(RingShared {
        slots: slots.into_boxed_slice(),
        head: AtomicUsize::new(0),
        tail: AtomicUsize::new(0),
    });

    (
        Producer {
            shared: shared.clone(),
        },
        Consumer { shared },
    )
}

struct RingShared<T> {
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
    /// Next slot to read. Written only by the consumer.
    head: AtomicUsize,
    /// Next slot to write. Written only by the producer.
    tail: AtomicUsize,
}

// The slots are only touched from the single producer (writes at `tail`) and
// the single consumer (reads at `head`); the head/tail Acquire/Release pair
// orders the slot accesses.
unsafe impl<T: Send> Sync for RingShared<T> {}

impl<T> RingShared<T> {
    fn len(&self) -> usize {
        let tail = self.tail.load(Ordering::Acquire);
        let head = self.head.load(Ordering::Acquire);
        tail.wrapping_sub(head)
    }
}

impl<T> Drop for RingShared<T> {
    fn drop(&mut self) {
        // Sole owner at this point; release any unconsumed items.
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Relaxed);
        let mut idx = head;
        while idx != tail {
            let slot = &self.slots[idx % self.slots.len()];
            unsafe {
                (*slot.get()).assume_init_drop();
            }
            idx = idx.wrapping_add(1);
        }
    }
}

/// Write end of a ring. Held by exactly one thread.
pub struct Producer<T: Send> {
    shared: Arc<RingShared<T>>,
}

/// Read end of a ring. Held by exactly one thread.
pub struct Consumer<T: Send> {
    shared: Arc<RingShared<T>>,
}

impl<T: Send> Producer<T> {
    /// Appends `value`, or hands it back when the ring is full.
    pub fn push(&mut self, value: T) -> Result<(), T> {
        let shared = &self.shared;
        let tail = shared.tail.load(Ordering::Relaxed);
        let head = shared.head.load(Ordering::Acquire);

        if tail.wrapping_sub(head) == shared.slots.len() {
            return Err(value);
        }

        let slot = &shared.slots[tail % shared.slots.len()];
        unsafe {
            (*slot.get()).write(value);
        }
        shared.tail.store(tail.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    /// Number of items currently queued.
    pub fn len(&self) -> usize {
        self.shared.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() == self.shared.slots.len()
    }

    pub fn capacity(&self) -> usize {
        self.shared.slots.len()
    }
}

impl<T: Send> Consumer<T> {
    /// Removes and returns the oldest item, or `None` when the ring is empty.
    pub fn pop(&mut self) -> Option<T> {
        let shared = &self.shared;
        let head = shared.head.load(Ordering::Relaxed);
        let tail = shared.tail.load(Ordering::Acquire);

        if head == tail {
            return None;
        }

        let slot = &shared.slots[head % shared.slots.len()];
        let value = unsafe { (*slot.get()).assume_init_read() };
        shared.head.store(head.wrapping_add(1), Ordering::Release);
        Some(value)
    }

    /// Number of items currently queued.
    pub fn len(&self) -> usize {
        self.shared.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.shared.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let (mut tx, mut rx) = ring_channel(4);
        for i in 0..4 {
            tx.push(i).unwrap();
        }
        for i in 0..4 {
            assert_eq!(rx.pop(), Some(i));
        }
        assert_eq!(rx.pop(), None);
    }

    #[test]
    fn test_rejects_when_full() {
        let (mut tx, mut rx) = ring_channel(2);
        tx.push(10).unwrap();
        tx.push(11).unwrap();
        assert!(tx.is_full());
        assert_eq!(tx.push(12), Err(12));

        assert_eq!(rx.pop(), Some(10));
        tx.push(13).unwrap();
        assert_eq!(rx.pop(), Some(11));
        assert_eq!(rx.pop(), Some(13));
    }

    #[test]
    fn test_capacity_one() {
        let (mut tx, mut rx) = ring_channel(1);
        tx.push(1).unwrap();
        assert_eq!(tx.push(2), Err(2));
        assert_eq!(rx.pop(), Some(1));
        tx.push(3).unwrap();
        assert_eq!(rx.pop(), Some(3));
    }

    #[test]
    fn test_drops_unconsumed_items() {
        let item = std::sync::Arc::new(());
        let (mut tx, rx) = ring_channel(4);
        tx.push(item.clone()).unwrap();
        tx.push(item.clone()).unwrap();
        drop(tx);
        drop(rx);
        assert_eq!(std::sync::Arc::strong_count(&item), 1);
    }

    #[test]
    fn test_cross_thread_transfer() {
        let (mut tx, mut rx) = ring_channel(8);
        let producer = std::thread::spawn(move || {
            let mut next = 0u64;
            while next < 1000 {
                if tx.push(next).is_ok() {
                    next += 1;
                }
            }
        });

        let mut expected = 0u64;
        while expected < 1000 {
            if let Some(v) = rx.pop() {
                assert_eq!(v, expected);
                expected += 1;
            }
        }
        producer.join().unwrap();
    }
}
