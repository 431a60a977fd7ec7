//! Single-flight guard over wells.

use std::sync::Arc;

use hashbrown::HashSet;
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::persistence::WellKey;

/// Set of wells currently owned by a batch run or loader.
///
/// Cloning shares the same set.
#[derive(Debug, Clone, Default)]
pub struct CheckoutRegistry {
    active: Arc<Mutex<HashSet<WellKey>>>,
}

impl CheckoutRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks out every well or none of them. The name paired with a busy
    /// key labels the error.
    pub fn checkout_all(&self, wells: &[(WellKey, String)]) -> Result<CheckoutGuard> {
        let mut active = self.active.lock();

        let mut requested = HashSet::with_capacity(wells.len());
        for (key, name) in wells {
            if active.contains(key) || !requested.insert(*key) {
                return Err(Error::WellBusy(name.clone()));
            }
        }

        active.extend(requested.iter().copied());
        Ok(CheckoutGuard {
            registry: self.clone(),
            keys: requested.into_iter().collect(),
        })
    }

    /// Runs `f` unless `key` is checked out. Checkouts wait until `f`
    /// returns, so `f` must not call back into the registry.
    pub fn run_if_free<R>(&self, key: WellKey, f: impl FnOnce() -> R) -> Option<R> {
        let active = self.active.lock();
        if active.contains(&key) {
            return None;
        }
        let result = f();
        drop(active);
        Some(result)
    }

    pub fn is_checked_out(&self, key: WellKey) -> bool {
        self.active.lock().contains(&key)
    }

    pub fn len(&self) -> usize {
        self.active.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.lock().is_empty()
    }
}

/// Returns its wells to the registry when dropped.
#[derive(Debug)]
pub struct CheckoutGuard {
    registry: CheckoutRegistry,
    keys: Vec<WellKey>,
}

impl CheckoutGuard {
    pub fn keys(&self) -> &[WellKey] {
        &self.keys
    }
}

impl Drop for CheckoutGuard {
    fn drop(&mut self) {
        let mut active = self.registry.active.lock();
        for key in &self.keys {
            active.remove(key);
        }
    }
}
