use std::fmt::{self, Debug};

type NonZeroId = std::num::NonZeroU32;

/// An identifier for an ancillary entry stored against a wrapper record.
///
/// `EntryId`s are issued by [`WrapperResources::add_entry`] and friends, and
/// are dense indices starting at the record's first entry. Entries are never
/// removed individually, so an id stays valid for as long as the record that
/// issued it is alive.
///
/// ## Note on id scope
///
/// An `EntryId` is only meaningful for the record that issued it. Ids from
/// two different records compare equal whenever their insertion positions
/// happen to match; looking an id up on the wrong record is not detected and
/// returns whatever entry sits at that position there.
///
/// [`WrapperResources::add_entry`]: crate::resources::WrapperResources::add_entry
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryId(NonZeroId);

impl EntryId {
    /// Entry ids use a non-zero representation so `Option<EntryId>` costs
    /// nothing; position `i` is stored as `i + 1`.
    pub(crate) fn from_index(index: usize) -> Self {
        let value = u32::try_from(index + 1).expect("entry index overflows id space");
        Self(NonZeroId::new(value).unwrap())
    }

    pub(crate) fn index(self) -> usize {
        (self.0.get() - 1) as usize
    }
}

impl Debug for EntryId {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.debug_tuple("EntryId").field(&self.index()).finish()
    }
}

#[test]
fn test_entry_id() {
    for index in [0usize, 1, 27, 4096] {
        let id = EntryId::from_index(index);
        assert_eq!(id.index(), index);
    }
    assert_eq!(format!("{:?}", EntryId::from_index(2)), "EntryId(2)");
}
