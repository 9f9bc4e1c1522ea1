//! VLAN identifier and range types.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// IEEE 802.1Q VLAN identifier (1-4094).
///
/// VLAN 0 (priority tagged) and 4095 are reserved and never allocatable.
///
/// # Examples
///
/// ```
/// use alloc_types::VlanId;
///
/// let vlan = VlanId::new(100).unwrap();
/// assert_eq!(vlan.as_u16(), 100);
/// assert!(VlanId::new(4095).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct VlanId(u16);

impl VlanId {
    pub const MIN: u16 = 1;
    pub const MAX: u16 = 4094;

    /// Creates a new VLAN ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the ID is outside 1-4094.
    pub const fn new(id: u16) -> Result<Self, ParseError> {
        if id >= Self::MIN && id <= Self::MAX {
            Ok(VlanId(id))
        } else {
            Err(ParseError::InvalidVlanId(id))
        }
    }

    pub const fn as_u16(&self) -> u16 {
        self.0
    }
}

impl fmt::Display for VlanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for VlanId {
    type Err = ParseError;

    /// Accepts both `100` and `Vlan100`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id_str = match s.get(..4) {
            Some(head) if head.eq_ignore_ascii_case("vlan") => &s[4..],
            _ => s,
        };
        let id: u16 = id_str
            .parse()
            .map_err(|_| ParseError::InvalidVlanRange(s.to_string()))?;
        VlanId::new(id)
    }
}

impl TryFrom<u16> for VlanId {
    type Error = ParseError;

    fn try_from(id: u16) -> Result<Self, Self::Error> {
        VlanId::new(id)
    }
}

impl From<VlanId> for u16 {
    fn from(vlan: VlanId) -> u16 {
        vlan.0
    }
}

/// Inclusive range of VLAN identifiers, e.g. `100-199`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VlanRange {
    start: VlanId,
    end: VlanId,
}

impl VlanRange {
    /// The full allocatable range 1-4094.
    pub const FULL: VlanRange = VlanRange {
        start: VlanId(VlanId::MIN),
        end: VlanId(VlanId::MAX),
    };

    pub fn new(start: VlanId, end: VlanId) -> Result<Self, ParseError> {
        if start > end {
            return Err(ParseError::InvalidVlanRange(format!("{}-{}", start, end)));
        }
        Ok(VlanRange { start, end })
    }

    pub const fn start(&self) -> VlanId {
        self.start
    }

    pub const fn end(&self) -> VlanId {
        self.end
    }

    pub fn contains(&self, id: VlanId) -> bool {
        self.start <= id && id <= self.end
    }

    /// Iterates the range in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = VlanId> {
        (self.start.0..=self.end.0).map(VlanId)
    }
}

impl Default for VlanRange {
    fn default() -> Self {
        VlanRange::FULL
    }
}

impl fmt::Display for VlanRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

impl FromStr for VlanRange {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('-') {
            Some((start, end)) => VlanRange::new(start.trim().parse()?, end.trim().parse()?),
            None => {
                let id: VlanId = s.trim().parse()?;
                VlanRange::new(id, id)
            }
        }
    }
}
