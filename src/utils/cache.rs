//! Caching utilities for ryt-decipher

use std::future::Future;
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::OnceCell;

struct Slot<K, V> {
    current: Option<(K, Arc<OnceCell<V>>)>,
    /// Evicted cells that were still initialising, kept while someone awaits them
    evicted: Vec<(K, Weak<OnceCell<V>>)>,
}

impl<K: Eq, V> Slot<K, V> {
    fn take_evicted(&mut self, key: &K) -> Option<Arc<OnceCell<V>>> {
        self.evicted.retain(|(_, cell)| cell.strong_count() > 0);
        let index = self.evicted.iter().position(|(evicted, _)| evicted == key)?;
        self.evicted.swap_remove(index).1.upgrade()
    }
}

/// In-memory cache holding a single entry.
///
/// Inserting a different key evicts the current entry. Concurrent lookups of
/// a key share one initialisation, including a key evicted while its
/// initialisation is still running.
pub struct SingleSlotCache<K, V> {
    slot: Mutex<Slot<K, V>>,
}

impl<K, V> SingleSlotCache<K, V>
where
    K: Eq + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot {
                current: None,
                evicted: Vec::new(),
            }),
        }
    }

    /// Get the value for `key`, running `init` if the slot holds another key
    /// or has not been filled yet.
    ///
    /// A failed `init` leaves the slot empty for the next caller to retry.
    pub async fn get_or_try_insert_with<F, Fut, E>(&self, key: K, init: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let cell = {
            let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
            match slot.current.as_ref() {
                Some((current, cell)) if *current == key => cell.clone(),
                _ => {
                    let cell = slot
                        .take_evicted(&key)
                        .unwrap_or_else(|| Arc::new(OnceCell::new()));
                    if let Some((previous, pending)) = slot.current.replace((key, cell.clone())) {
                        if !pending.initialized() {
                            slot.evicted.push((previous, Arc::downgrade(&pending)));
                        }
                    }
                    cell
                }
            }
        };

        cell.get_or_try_init(init).await.cloned()
    }

    /// Get the value for `key` if it is cached and initialised
    pub fn get(&self, key: &K) -> Option<V> {
        let slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        match slot.current.as_ref() {
            Some((current, cell)) if current == key => cell.get().cloned(),
            _ => None,
        }
    }

    /// Key currently occupying the slot
    pub fn key(&self) -> Option<K> {
        let slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        slot.current.as_ref().map(|(key, _)| key.clone())
    }

    pub fn clear(&self) {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        slot.current = None;
        slot.evicted.clear();
    }
}

impl<K, V> Default for SingleSlotCache<K, V>
where
    K: Eq + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}
