//! Per-order critical sections
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

/// A mutex per order id. Every read-validate-write sequence on an order runs inside
/// [`OrderLocks::with_order`], so two writers on the same order never interleave while
/// writers on different orders never wait on each other.
#[derive(Default)]
pub struct OrderLocks {
    slots: DashMap<String, Arc<Mutex<()>>>,
}

impl OrderLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, order_id: &str) -> Arc<Mutex<()>> {
        // clone out of the map so the shard lock is released before we block
        self.slots
            .entry(order_id.to_string())
            .or_default()
            .value()
            .clone()
    }

    /// Runs `f` while holding the order's guard.
    pub fn with_order<T>(&self, order_id: &str, f: impl FnOnce() -> anyhow::Result<T>) -> anyhow::Result<T> {
        let slot = self.slot(order_id);
        let result = {
            let _guard = slot.lock();
            f()
        };
        drop(slot);
        // only the map's copy left: nobody holds or waits on this order
        self.slots.remove_if(order_id, |_, slot| Arc::strong_count(slot) == 1);
        result
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl std::fmt::Debug for OrderLocks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderLocks")
            .field("orders", &self.slots.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn same_order_is_serialised() {
        let locks = Arc::new(OrderLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let locks = locks.clone();
                let inside = inside.clone();
                let max_seen = max_seen.clone();
                thread::spawn(move || {
                    locks.with_order("order_1", || {
                        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(now, Ordering::SeqCst);
                        thread::sleep(std::time::Duration::from_millis(2));
                        inside.fetch_sub(1, Ordering::SeqCst);
                        Ok(())
                    })
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap().unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert!(locks.is_empty());
    }

    #[test]
    fn slots_are_dropped_once_released() {
        let locks = OrderLocks::new();
        for n in 0..100 {
            let order_id = format!("order_{n}");
            locks
                .with_order(&order_id, || {
                    assert_eq!(locks.len(), 1);
                    Ok(())
                })
                .unwrap();
        }
        assert!(locks.is_empty());

        let err = locks.with_order("order_failing", || -> anyhow::Result<()> { anyhow::bail!("rejected") });
        assert!(err.is_err());
        assert!(locks.is_empty());
    }
}
