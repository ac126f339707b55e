use core::ops::Range;

/// Raw port number that addresses every output at once.
///
/// Matches the `ALLPORTS` convention of the PCA995x family.
pub const ALL_PORTS_RAW: u8 = 0xFF;

/// Output address: one physical port or the whole bank
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Port {
    /// A single port, zero based
    Single(usize),
    /// Broadcast to every port of the bank
    All,
}

impl Port {
    /// Decode a raw port number, treating [`ALL_PORTS_RAW`] as the broadcast
    pub const fn from_raw(raw: u8) -> Self {
        if raw == ALL_PORTS_RAW {
            Self::All
        } else {
            Self::Single(raw as usize)
        }
    }

    /// Port index if this is a single port
    pub const fn index(self) -> Option<usize> {
        match self {
            Self::Single(index) => Some(index),
            Self::All => None,
        }
    }

    /// Returns true if this address exists on a bank of `count` ports
    pub const fn is_valid(self, count: usize) -> bool {
        match self {
            Self::Single(index) => index < count,
            Self::All => true,
        }
    }

    /// Indices covered by this address on a bank of `count` ports
    ///
    /// Out-of-range single ports yield an empty range.
    pub fn indices(self, count: usize) -> Range<usize> {
        match self {
            Self::Single(index) if index < count => index..index + 1,
            Self::Single(_) => 0..0,
            Self::All => 0..count,
        }
    }
}

impl From<usize> for Port {
    fn from(index: usize) -> Self {
        Self::Single(index)
    }
}
