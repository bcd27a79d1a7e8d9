//! Keyed well registry.
//!
//! ```text
//!   WellRegistry ── blocking map lock (held for a lookup only)
//!        │
//!        ├── "A1" ─▶ Arc<async Mutex<Well>>   ◀── held across decide + actuation
//!        ├── "A2" ─▶ Arc<async Mutex<Well>>
//!        └── ...
//! ```
//!
//! The map lock is never held across an `.await`, so a slow actuation on
//! one well never blocks lookups or work on another. Operations on the
//! same well queue on its async mutex.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;
use log::info;

use crate::error::Error;
use crate::well::{Well, WellId, WellSpec};

/// Shared, individually lockable well.
pub type WellHandle = Arc<Mutex<CriticalSectionRawMutex, Well>>;

/// Outcome of [`WellRegistry::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Created,
    Replaced,
}

pub struct WellRegistry {
    wells: BlockingMutex<CriticalSectionRawMutex, RefCell<HashMap<WellId, WellHandle>>>,
}

impl Default for WellRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl WellRegistry {
    pub fn new() -> Self {
        Self {
            wells: BlockingMutex::new(RefCell::new(HashMap::new())),
        }
    }

    /// Insert a fresh well, replacing any previous registration of `id`.
    ///
    /// An operation already holding the old handle completes against the
    /// old well; later lookups see the new one.
    pub fn register(&self, id: WellId, spec: WellSpec) -> Registration {
        let handle = Arc::new(Mutex::new(Well::new(id.clone(), spec)));
        let previous = self
            .wells
            .lock(|map| map.borrow_mut().insert(id.clone(), handle));
        let outcome = if previous.is_some() {
            Registration::Replaced
        } else {
            Registration::Created
        };
        info!("registry: {id} {outcome:?}");
        outcome
    }

    /// Handle for `id`, or [`Error::MissingIdentifier`].
    pub fn get(&self, id: &WellId) -> Result<WellHandle, Error> {
        self.wells
            .lock(|map| map.borrow().get(id).cloned())
            .ok_or_else(|| Error::MissingIdentifier(id.clone()))
    }

    pub fn contains(&self, id: &WellId) -> bool {
        self.wells.lock(|map| map.borrow().contains_key(id))
    }

    pub fn len(&self) -> usize {
        self.wells.lock(|map| map.borrow().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registered identifiers, sorted.
    pub fn ids(&self) -> Vec<WellId> {
        let mut ids: Vec<WellId> = self.wells.lock(|map| map.borrow().keys().cloned().collect());
        ids.sort();
        ids
    }

    /// Copy of the well, waiting for any in-flight operation on it.
    pub async fn snapshot(&self, id: &WellId) -> Result<Well, Error> {
        let handle = self.get(id)?;
        let well = handle.lock().await;
        Ok(well.clone())
    }
}
