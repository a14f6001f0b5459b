//! # Keyed Lock
//!
//! Serializes work per key (a twin ID) without a global lock. Each key maps to
//! a reference-counted async mutex; the slot is dropped once its last user,
//! holder or waiter, goes away, so the table only ever holds contended keys.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

struct Slot {
    users: usize,
    mutex: Arc<AsyncMutex<()>>,
}

type Slots = Arc<Mutex<HashMap<String, Slot>>>;

#[derive(Default)]
pub struct KeyedLock {
    slots: Slots,
}

/// Keeps the slot of a key alive, including while waiting on its mutex.
struct Ticket {
    key: String,
    slots: Slots,
}

impl Drop for Ticket {
    fn drop(&mut self) {
        let mut slots = lock_slots(&self.slots);
        if let Some(slot) = slots.get_mut(&self.key) {
            slot.users -= 1;
            if slot.users == 0 {
                slots.remove(&self.key);
            }
        }
    }
}

/// Exclusive access to one key until dropped.
pub struct KeyGuard {
    // Field order matters: release the mutex before the slot count.
    _guard: OwnedMutexGuard<()>,
    _ticket: Ticket,
}

impl KeyedLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: &str) -> KeyGuard {
        let mutex = {
            let mut slots = lock_slots(&self.slots);
            let slot = slots.entry(key.to_string()).or_insert_with(|| Slot {
                users: 0,
                mutex: Arc::new(AsyncMutex::new(())),
            });
            slot.users += 1;
            Arc::clone(&slot.mutex)
        };

        // Registered before awaiting so a cancelled waiter still releases its slot.
        let ticket = Ticket {
            key: key.to_string(),
            slots: Arc::clone(&self.slots),
        };
        let guard = mutex.lock_owned().await;

        KeyGuard {
            _guard: guard,
            _ticket: ticket,
        }
    }

    /// Number of keys currently held or awaited.
    pub fn active(&self) -> usize {
        lock_slots(&self.slots).len()
    }
}

fn lock_slots(slots: &Slots) -> MutexGuard<'_, HashMap<String, Slot>> {
    // The map is never left half-updated, so a poisoned lock is still usable.
    slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
