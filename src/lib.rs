/*! Shared wrapper-resource bookkeeping for the capture layer.
 *
 * A capture layer hands applications *wrappers*: shim objects standing in
 * for native API objects, forwarding calls while recording them. Many APIs
 * expose one native object through several simultaneously-valid interface
 * pointers, so several independent wrapper instances may refer to the same
 * native object. This crate owns the record they all share.
 *
 * The pieces fit together like this:
 *
 * - [`resources::WrapperResources`] is the per-native-object record. It holds
 *   an ordered set of type-erased *ancillary entries*: bookkeeping data the
 *   capture layer accumulates about the native object (memory layout, binding
 *   state, descriptor info), each paired with a destructor bound to its
 *   concrete type when it was stored.
 *
 * - [`resources::SharedWrapperResources`] is the shared-ownership handle a
 *   wrapper instance holds. The record is arcanized: the last handle released
 *   tears down every stored entry exactly once and frees the record, on
 *   whichever application thread performed that release.
 *
 * - [`registry::WrapperRegistry`] maps native object handles to live records,
 *   so wrapper creation can tell "first wrapper for this object" apart from
 *   "another interface onto an object we already track".
 *
 * What this crate deliberately does not do: decide what ancillary data to
 * capture, serialize anything, or intercept calls. Those belong to the
 * generated wrapper layer and the trace pipeline built on top.
!*/

pub mod id;
pub mod registry;
pub mod resources;

/// HashMap using a fast, non-cryptographic hash algorithm.
pub(crate) type FastHashMap<K, V> =
    std::collections::HashMap<K, V, std::hash::BuildHasherDefault<rustc_hash::FxHasher>>;

/// Trace macro for resource lifecycle actions, compiled out unless the
/// `resource_log` feature is enabled.
macro_rules! resource_log {
    ($($arg:tt)*) => {
        #[cfg(feature = "resource_log")]
        log::trace!($($arg)*);
    };
}
pub(crate) use resource_log;
