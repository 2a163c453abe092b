//! Fabric membership types.
//!
//! A fabric is an administrative identity domain; a device may be
//! commissioned into several. The session manager only reads membership
//! through [`FabricDirectory`] and stores a [`FabricIndex`] per session
//! for fabric-scoped eviction.

use std::fmt;

/// Index into the provisioned fabric table.
///
/// The value 0 is the "no fabric" sentinel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct FabricIndex(u8);

impl FabricIndex {
    /// Sentinel for a session not bound to any fabric.
    pub const NONE: FabricIndex = FabricIndex(0);

    /// Create from a raw u8.
    pub const fn new(value: u8) -> Self {
        Self(value)
    }

    /// Get the raw u8 value.
    pub fn as_u8(&self) -> u8 {
        self.0
    }

    /// Whether this is the "no fabric" sentinel.
    pub fn is_none(&self) -> bool {
        *self == Self::NONE
    }
}

impl fmt::Display for FabricIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Read-only view of the provisioned fabric table.
///
/// Implemented by the embedder; the session manager consults it when a new
/// pairing names a fabric.
pub trait FabricDirectory {
    /// Whether a fabric is provisioned at the given index.
    fn contains(&self, index: FabricIndex) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fabric_index_sentinel() {
        assert!(FabricIndex::NONE.is_none());
        assert!(FabricIndex::default().is_none());
        assert!(!FabricIndex::new(1).is_none());
        assert_eq!(FabricIndex::new(3).as_u8(), 3);
    }
}
