//! Graph element identity, change kinds and access levels.
//!
//! These are the values the event core shares with the storage engine. The
//! core never interprets an `ElementId` beyond equality and hashing.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque identifier of an element in the graph store.
///
/// The raw value `0` is reserved as the empty element.
///
/// # Examples
///
/// ```
/// use graphwatch::ElementId;
///
/// let id = ElementId::new(42);
/// assert!(!id.is_empty());
/// assert!(ElementId::EMPTY.is_empty());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElementId(u64);

impl ElementId {
    /// The empty element.
    pub const EMPTY: Self = Self(0);

    /// Wraps a raw identifier.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw identifier.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Returns true for the empty element.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl Default for ElementId {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<u64> for ElementId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

/// Kind of structural change a subscription reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// An outgoing connection was added to the element.
    AddOutputEdge,
    /// An incoming connection was added to the element.
    AddInputEdge,
    /// An outgoing connection was removed from the element.
    RemoveOutputEdge,
    /// An incoming connection was removed from the element.
    RemoveInputEdge,
    /// The element itself was removed.
    RemoveElement,
    /// The element's content changed.
    ContentChanged,
}

impl ChangeKind {
    /// All change kinds, in declaration order.
    pub const ALL: [Self; 6] = [
        Self::AddOutputEdge,
        Self::AddInputEdge,
        Self::RemoveOutputEdge,
        Self::RemoveInputEdge,
        Self::RemoveElement,
        Self::ContentChanged,
    ];
}

/// Read/write access levels, each in `0..=15`.
///
/// Higher is more privileged. A holder of levels `a` may read something
/// guarded by levels `b` when `a.read >= b.read`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct AccessLevels {
    read: u8,
    write: u8,
}

impl AccessLevels {
    /// Highest level for a single channel.
    pub const MAX_LEVEL: u8 = 0x0f;

    /// Full read and write access.
    pub const FULL: Self = Self {
        read: Self::MAX_LEVEL,
        write: Self::MAX_LEVEL,
    };

    /// No access at all.
    pub const NONE: Self = Self { read: 0, write: 0 };

    /// Creates levels, saturating each channel at [`Self::MAX_LEVEL`].
    #[must_use]
    pub const fn new(read: u8, write: u8) -> Self {
        let read = if read > Self::MAX_LEVEL { Self::MAX_LEVEL } else { read };
        let write = if write > Self::MAX_LEVEL { Self::MAX_LEVEL } else { write };
        Self { read, write }
    }

    /// Unpacks levels from the storage byte layout (read in the high nibble).
    #[must_use]
    pub const fn from_packed(packed: u8) -> Self {
        Self {
            read: packed >> 4,
            write: packed & 0x0f,
        }
    }

    /// Packs levels into the storage byte layout.
    #[must_use]
    pub const fn packed(self) -> u8 {
        (self.read << 4) | self.write
    }

    /// Read level.
    #[must_use]
    pub const fn read(self) -> u8 {
        self.read
    }

    /// Write level.
    #[must_use]
    pub const fn write(self) -> u8 {
        self.write
    }

    /// Returns true if these levels grant read access to something guarded by `guard`.
    #[must_use]
    pub const fn can_read(self, guard: Self) -> bool {
        self.read >= guard.read
    }

    /// Returns true if these levels grant write access to something guarded by `guard`.
    #[must_use]
    pub const fn can_write(self, guard: Self) -> bool {
        self.write >= guard.write
    }
}

impl fmt::Display for AccessLevels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}w{}", self.read, self.write)
    }
}

/// The caller's view of the store: whose access levels apply to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AccessContext {
    levels: AccessLevels,
}

impl AccessContext {
    /// A context acting with `levels`.
    #[must_use]
    pub const fn new(levels: AccessLevels) -> Self {
        Self { levels }
    }

    /// A context with full access.
    #[must_use]
    pub const fn full() -> Self {
        Self {
            levels: AccessLevels::FULL,
        }
    }

    /// The levels requests are checked against.
    #[must_use]
    pub const fn levels(&self) -> AccessLevels {
        self.levels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_element_is_zero() {
        assert!(ElementId::EMPTY.is_empty());
        assert!(ElementId::default().is_empty());
        assert!(!ElementId::new(7).is_empty());
        assert_eq!(ElementId::from(7).raw(), 7);
    }

    #[test]
    fn access_levels_saturate_and_pack() {
        let lv = AccessLevels::new(200, 3);
        assert_eq!(lv.read(), AccessLevels::MAX_LEVEL);
        assert_eq!(lv.write(), 3);
        assert_eq!(lv.packed(), 0xf3);
        assert_eq!(AccessLevels::from_packed(0x52), AccessLevels::new(5, 2));
    }

    #[test]
    fn read_check_compares_read_channel_only() {
        let low = AccessLevels::new(2, 15);
        let high = AccessLevels::new(9, 0);
        assert!(high.can_read(low));
        assert!(!low.can_read(high));
        assert!(low.can_write(high));
        assert!(AccessLevels::FULL.can_read(AccessLevels::FULL));
        assert!(AccessLevels::NONE.can_read(AccessLevels::NONE));
    }

    #[test]
    fn change_kind_uses_snake_case_names() {
        let s = serde_json::to_string(&ChangeKind::AddInputEdge).unwrap();
        assert_eq!(s, "\"add_input_edge\"");
    }
}
