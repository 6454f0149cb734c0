/*! Shared wrapper-resource records.
 *
 * Every native object the capture layer wraps gets exactly one
 * [`WrapperResources`] record. Wrapper instances hold the record through
 * [`SharedWrapperResources`] handles; the record itself stores the ancillary
 * entries the capture layer accumulates about the native object.
 *
 * The record is arcanized: the share count is the `Arc` strong count, so the
 * last handle released tears the record down, and over-release or
 * use-after-teardown cannot be written in safe code. Teardown runs every
 * stored entry's destructor exactly once, in insertion order, on the thread
 * that performed the last release.
!*/

use std::any::TypeId;
use std::ffi::c_void;
use std::fmt;
use std::ops::Deref;
use std::ptr::NonNull;
use std::sync::Arc;

use parking_lot::{MappedRwLockReadGuard, RwLock, RwLockReadGuard};
use smallvec::SmallVec;
use thiserror::Error;

use crate::id::EntryId;
use crate::resource_log;

/// Most records carry only a couple of ancillary entries (layout info,
/// binding info), so the entry list stays inline in the common case.
type EntryList = SmallVec<[Entry; 4]>;

/// One type-erased ancillary entry: an opaque payload pointer paired with the
/// destructor that was bound to its concrete type at insertion time.
struct Entry {
    payload: NonNull<c_void>,
    /// Concrete type of the boxed value for entries added through
    /// [`WrapperResources::add_entry`]; `None` for raw entries, which carry
    /// no type information we could check.
    type_id: Option<TypeId>,
    destroy: unsafe fn(NonNull<c_void>),
}

// Typed entries only hold `T: Send + Sync` payloads, and raw entries are
// admitted through an unsafe fn whose contract includes cross-thread
// soundness of the (payload, destroy) pair.
unsafe impl Send for Entry {}
unsafe impl Sync for Entry {}

/// Drop glue for a payload that went in through the typed path.
unsafe fn drop_erased<T>(payload: NonNull<c_void>) {
    drop(Box::from_raw(payload.cast::<T>().as_ptr()));
}

/// Error returned when an entry lookup fails: the id was never issued by this
/// record, or the entry at that position does not hold the requested type.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("no such entry on this record: {0:?}")]
pub struct InvalidEntryId(pub EntryId);

/// The per-native-object record shared by every wrapper instance that refers
/// to the same native object.
///
/// A record does not know what its entries mean; it only guarantees that each
/// one is retrievable by the id its insertion returned and destroyed exactly
/// once when the record goes away. Entries cannot be removed individually;
/// teardown is all-or-nothing, driven by the last
/// [`SharedWrapperResources`] release.
///
/// Insertion takes the record's write lock and retrieval its read lock.
/// Acquire/release of the record itself never touches the lock.
pub struct WrapperResources {
    entries: RwLock<EntryList>,
}

impl WrapperResources {
    fn new() -> Self {
        Self {
            entries: RwLock::new(EntryList::new()),
        }
    }

    /// Stores an ancillary record against the native object and returns the
    /// id to retrieve it with.
    ///
    /// The destructor for `record` is its own drop glue, bound here; it runs
    /// when the last shared handle to this record is released. Entries are
    /// destroyed in insertion order.
    pub fn add_entry<T: Send + Sync + 'static>(&self, record: T) -> EntryId {
        let payload = NonNull::from(Box::leak(Box::new(record))).cast::<c_void>();
        let id = self.push_entry(Entry {
            payload,
            type_id: Some(TypeId::of::<T>()),
            destroy: drop_erased::<T>,
        });
        resource_log!(
            "WrapperResources::add_entry<{}> -> {:?}",
            std::any::type_name::<T>(),
            id
        );
        id
    }

    /// Stores a foreign ancillary record: an opaque payload pointer and the
    /// callback that releases it.
    ///
    /// This is the insertion path for wrapper objects whose teardown lives
    /// outside Rust's type system. `destroy` is invoked exactly once, during
    /// record teardown, on whichever thread released the last handle. It must
    /// not fail; a destructor with fallible cleanup has to absorb its own
    /// failures so sibling entries still get torn down.
    ///
    /// # Safety
    ///
    /// - `payload` must stay valid until this record is torn down, and
    ///   `destroy(payload)` must fully release it.
    /// - The (payload, destroy) pair must be sound to move to, and invoke on,
    ///   a thread other than the inserting one.
    pub unsafe fn add_entry_raw(
        &self,
        payload: NonNull<c_void>,
        destroy: unsafe fn(NonNull<c_void>),
    ) -> EntryId {
        let id = self.push_entry(Entry {
            payload,
            type_id: None,
            destroy,
        });
        resource_log!("WrapperResources::add_entry_raw -> {:?}", id);
        id
    }

    fn push_entry(&self, entry: Entry) -> EntryId {
        let mut entries = self.entries.write();
        let id = EntryId::from_index(entries.len());
        entries.push(entry);
        id
    }

    /// Borrows the entry stored under `id`, checked against its concrete
    /// type.
    ///
    /// The returned guard holds the record's read lock; insertions block
    /// until it is dropped. Fails if `id` was never issued by this record or
    /// if the entry is not a `T` (raw entries have no type to check and never
    /// match).
    pub fn get_entry<T: 'static>(
        &self,
        id: EntryId,
    ) -> Result<MappedRwLockReadGuard<'_, T>, InvalidEntryId> {
        RwLockReadGuard::try_map(self.entries.read(), |entries: &EntryList| {
            let entry = entries.get(id.index())?;
            if entry.type_id != Some(TypeId::of::<T>()) {
                return None;
            }
            // The TypeId match proves `payload` is the `Box<T>` leaked by
            // `add_entry`, still alive because entries are never removed
            // before teardown.
            Some(unsafe { entry.payload.cast::<T>().as_ref() })
        })
        .map_err(|_| InvalidEntryId(id))
    }

    /// Returns the opaque payload pointer stored under `id`.
    ///
    /// Works for raw and typed entries alike; ownership stays with the
    /// record, and the pointer must not be used after the last shared handle
    /// is released.
    pub fn get_entry_raw(&self, id: EntryId) -> Result<NonNull<c_void>, InvalidEntryId> {
        self.entries
            .read()
            .get(id.index())
            .map(|entry| entry.payload)
            .ok_or(InvalidEntryId(id))
    }

    pub fn entry_count(&self) -> usize {
        self.entries.read().len()
    }
}

impl Drop for WrapperResources {
    fn drop(&mut self) {
        // `drop` has exclusive access, so the lock is vacuous here; no
        // handle survives to add or read entries concurrently.
        let entries = self.entries.get_mut();
        resource_log!(
            "WrapperResources::drop, destroying {} entries",
            entries.len()
        );
        for entry in entries.drain(..) {
            unsafe { (entry.destroy)(entry.payload) };
        }
    }
}

impl fmt::Debug for WrapperResources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WrapperResources")
            .field("entries", &self.entry_count())
            .finish()
    }
}

/// A shared-ownership handle to a [`WrapperResources`] record.
///
/// Each wrapper instance referring to a native object holds one handle. The
/// first wrapper creates the record with [`new`]; every further interface
/// produced for the same native object [`acquire`]s it; destroying a wrapper
/// [`release`]s it. When the last handle goes, the record tears down all its
/// entries and is freed.
///
/// [`new`]: SharedWrapperResources::new
/// [`acquire`]: SharedWrapperResources::acquire
/// [`release`]: SharedWrapperResources::release
#[derive(Debug)]
pub struct SharedWrapperResources {
    record: Arc<WrapperResources>,
}

impl SharedWrapperResources {
    /// Creates the record for a native object seen for the first time, with
    /// this handle as its only reference.
    pub fn new() -> Self {
        resource_log!("SharedWrapperResources::new");
        Self {
            record: Arc::new(WrapperResources::new()),
        }
    }

    /// Takes one more shared reference, for a new wrapper interface onto the
    /// same native object.
    pub fn acquire(&self) -> Self {
        Self {
            record: Arc::clone(&self.record),
        }
    }

    /// Gives up this handle's reference; the last release tears the record
    /// down synchronously on the calling thread.
    ///
    /// Dropping the handle is equivalent. The explicit form exists for
    /// wrapper-destruction paths that want the release to be visible at the
    /// call site.
    pub fn release(self) {}

    /// Number of shared references currently held, this one included.
    ///
    /// Racy by nature once other threads hold handles; meaningful mostly for
    /// logging and tests.
    pub fn share_count(&self) -> usize {
        Arc::strong_count(&self.record)
    }

    /// Whether two handles refer to the same underlying record.
    pub fn same_record(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.record, &other.record)
    }

    pub(crate) fn from_record(record: Arc<WrapperResources>) -> Self {
        Self { record }
    }

    pub(crate) fn record(&self) -> &Arc<WrapperResources> {
        &self.record
    }
}

impl Default for SharedWrapperResources {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for SharedWrapperResources {
    fn clone(&self) -> Self {
        self.acquire()
    }
}

impl Deref for SharedWrapperResources {
    type Target = WrapperResources;

    fn deref(&self) -> &WrapperResources {
        &self.record
    }
}
