/*! Native-object to wrapper-record lookup.
 *
 * Wrapper creation has to tell two situations apart: the native object has
 * never been wrapped (make a fresh [`WrapperResources`] record), or another
 * interface pointer onto it is already wrapped (acquire the existing record).
 * The registry answers that question.
 *
 * The map holds `Weak` references on purpose: record lifetime is driven
 * solely by the wrapper handles, never by the registry. A slot whose record
 * died is replaced in place the next time its native handle shows up.
!*/

use std::collections::hash_map::Entry;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::resources::{SharedWrapperResources, WrapperResources};
use crate::{resource_log, FastHashMap};

/// A native object handle as the interception layer sees it: the raw
/// pointer or driver handle value, widened to 64 bits.
pub type NativeHandle = u64;

/// Registry of live wrapper records, keyed by native object handle.
///
/// All operations take the registry's mutex; the record's own share count and
/// entry list are untouched by registry bookkeeping.
#[derive(Debug, Default)]
pub struct WrapperRegistry {
    records: Mutex<FastHashMap<NativeHandle, Weak<WrapperResources>>>,
}

impl WrapperRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a handle to `native`'s record, creating the record if no
    /// wrapper currently tracks that object. The flag is `true` when the
    /// record is fresh.
    ///
    /// For an existing record this acquires one more shared reference, so the
    /// caller owns a release either way.
    pub fn get_or_create(&self, native: NativeHandle) -> (SharedWrapperResources, bool) {
        let mut records = self.records.lock();
        match records.entry(native) {
            Entry::Occupied(mut slot) => {
                if let Some(record) = slot.get().upgrade() {
                    (SharedWrapperResources::from_record(record), false)
                } else {
                    // The last wrapper for this object released its record,
                    // but nobody called `remove`. The native handle now
                    // denotes a fresh capture lifetime.
                    let shared = SharedWrapperResources::new();
                    slot.insert(Arc::downgrade(shared.record()));
                    resource_log!("WrapperRegistry: revived record for {native:#x}");
                    (shared, true)
                }
            }
            Entry::Vacant(slot) => {
                let shared = SharedWrapperResources::new();
                slot.insert(Arc::downgrade(shared.record()));
                resource_log!("WrapperRegistry: new record for {native:#x}");
                (shared, true)
            }
        }
    }

    /// Acquires the record for `native` if one is alive, without creating.
    pub fn get(&self, native: NativeHandle) -> Option<SharedWrapperResources> {
        self.records
            .lock()
            .get(&native)
            .and_then(Weak::upgrade)
            .map(SharedWrapperResources::from_record)
    }

    /// Forgets the slot for `native`.
    ///
    /// Called on the wrapper-destruction path once the native object itself
    /// is gone. This does not tear the record down; outstanding handles keep
    /// it alive, and the same handle value seen again later (driver handle
    /// reuse) starts a fresh record. Returns whether a live record was
    /// tracked under `native`.
    pub fn remove(&self, native: NativeHandle) -> bool {
        let removed = self
            .records
            .lock()
            .remove(&native)
            .is_some_and(|weak| weak.strong_count() > 0);
        if removed {
            resource_log!("WrapperRegistry: dropped slot for {native:#x}");
        }
        removed
    }

    /// Number of live records currently tracked. O(n) over the map, since
    /// dead slots are only reclaimed lazily.
    pub fn len(&self) -> usize {
        self.records
            .lock()
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_native_handle_shares_one_record() {
        let registry = WrapperRegistry::new();

        let (first, fresh) = registry.get_or_create(0x1000);
        assert!(fresh);
        assert_eq!(first.share_count(), 1);

        let (second, fresh) = registry.get_or_create(0x1000);
        assert!(!fresh);
        assert!(first.same_record(&second));
        assert_eq!(first.share_count(), 2);

        let (other, fresh) = registry.get_or_create(0x2000);
        assert!(fresh);
        assert!(!other.same_record(&first));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn entries_are_visible_through_every_handle() {
        let registry = WrapperRegistry::new();

        let (first, _) = registry.get_or_create(0xAB);
        let id = first.add_entry(String::from("heap layout"));

        let (second, _) = registry.get_or_create(0xAB);
        assert_eq!(*second.get_entry::<String>(id).unwrap(), "heap layout");
    }

    #[test]
    fn dead_slot_is_replaced_with_a_fresh_record() {
        let registry = WrapperRegistry::new();

        let (handle, _) = registry.get_or_create(0x77);
        handle.release();
        assert_eq!(registry.len(), 0);

        // Slot still exists but its record died with the last wrapper.
        let (revived, fresh) = registry.get_or_create(0x77);
        assert!(fresh);
        assert_eq!(revived.entry_count(), 0);
    }

    #[test]
    fn remove_forgets_the_slot_but_not_the_record() {
        let registry = WrapperRegistry::new();

        let (handle, _) = registry.get_or_create(0x5);
        let id = handle.add_entry(42u32);

        assert!(registry.remove(0x5));
        assert!(registry.get(0x5).is_none());
        assert!(!registry.remove(0x5));

        // The surviving handle still owns the record and its entries.
        assert_eq!(*handle.get_entry::<u32>(id).unwrap(), 42);
    }

    #[test]
    fn get_does_not_create() {
        let registry = WrapperRegistry::new();
        assert!(registry.get(0x9).is_none());
        assert!(registry.is_empty());
    }
}
