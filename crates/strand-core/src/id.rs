//! Entity and instance identifiers.
//!
//! A [`Gid`] is a global entity id: the pair of the [`InstanceId`] that
//! allocated it and a local counter value from that instance's private id
//! space. Gids order instance-major, then local, and pack losslessly into a
//! `u64` for wire and sort-key use.
//!
//! Instance ids are handed out as disjoint ranges (an [`InstanceSpace`]):
//! forking an instance splits its range in half, so ids minted by different
//! forks can never collide.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Identity of one logical writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InstanceId(pub u32);

impl InstanceId {
    /// The instance that bootstraps a fresh database.
    pub const ROOT: InstanceId = InstanceId(0);
}

/// Global entity id, `(instance, local)`.
///
/// Field order matters: the derived `Ord` is instance-major.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Gid {
    pub instance: u32,
    pub local: u32,
}

impl Gid {
    pub const MIN: Gid = Gid { instance: 0, local: 0 };
    pub const MAX: Gid = Gid {
        instance: u32::MAX,
        local: u32::MAX,
    };

    pub const fn new(instance: u32, local: u32) -> Self {
        Gid { instance, local }
    }

    /// The reserved id of an instance's own `Instance` entity (local id 0).
    pub const fn instance_entity(instance: InstanceId) -> Self {
        Gid {
            instance: instance.0,
            local: 0,
        }
    }

    /// Packs into a `u64` preserving order.
    pub const fn pack(self) -> u64 {
        ((self.instance as u64) << 32) | self.local as u64
    }

    pub const fn unpack(packed: u64) -> Self {
        Gid {
            instance: (packed >> 32) as u32,
            local: packed as u32,
        }
    }

    pub fn instance_id(self) -> InstanceId {
        InstanceId(self.instance)
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for Gid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.instance, self.local)
    }
}

impl FromStr for Gid {
    type Err = CoreError;

    /// Parses the `instance:local` display form.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || CoreError::InvalidGid { input: s.to_string() };
        let (instance, local) = s.split_once(':').ok_or_else(bad)?;
        Ok(Gid {
            instance: instance.parse().map_err(|_| bad())?,
            local: local.parse().map_err(|_| bad())?,
        })
    }
}

/// Hands out fresh Gids from one instance's private counter.
///
/// Seeded from the committed `Instance/nextEid` value; the counter only ever
/// moves forward. [`high_water`](Self::high_water) is the value to commit back.
#[derive(Debug, Clone)]
pub struct GidAllocator {
    instance: InstanceId,
    next: u32,
}

impl GidAllocator {
    pub fn new(instance: InstanceId, next: u32) -> Self {
        // Local id 0 belongs to the instance entity itself.
        GidAllocator {
            instance,
            next: next.max(1),
        }
    }

    pub fn instance(&self) -> InstanceId {
        self.instance
    }

    /// Allocates the next unused Gid.
    pub fn allocate(&mut self) -> Result<Gid, CoreError> {
        if self.next == u32::MAX {
            return Err(CoreError::GidSpaceExhausted {
                instance: self.instance,
            });
        }
        let gid = Gid::new(self.instance.0, self.next);
        self.next += 1;
        Ok(gid)
    }

    /// The next local id that would be handed out.
    pub fn high_water(&self) -> u32 {
        self.next
    }
}

/// A contiguous range of instance ids owned by one instance: `[id, id + span)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceSpace {
    pub id: InstanceId,
    pub span: u64,
}

impl InstanceSpace {
    /// The whole 32-bit instance id space, owned by the root instance.
    pub const ROOT: InstanceSpace = InstanceSpace {
        id: InstanceId::ROOT,
        span: 1 << 32,
    };

    /// Splits off the upper half of this range for a child instance.
    ///
    /// Returns `(parent_after_fork, child)`.
    pub fn fork(self) -> Result<(InstanceSpace, InstanceSpace), CoreError> {
        if self.span < 2 {
            return Err(CoreError::InstanceSpaceExhausted { instance: self.id });
        }
        let half = self.span / 2;
        let parent = InstanceSpace {
            id: self.id,
            span: half,
        };
        let child = InstanceSpace {
            id: InstanceId(self.id.0 + half as u32),
            span: half,
        };
        Ok((parent, child))
    }

    pub fn contains(&self, instance: InstanceId) -> bool {
        let id = instance.0 as u64;
        let start = self.id.0 as u64;
        id >= start && id < start + self.span
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gid_orders_instance_major() {
        let a = Gid::new(1, 900);
        let b = Gid::new(2, 0);
        let c = Gid::new(2, 1);
        assert!(a < b);
        assert!(b < c);
        assert!(a.pack() < b.pack());
    }

    #[test]
    fn gid_pack_roundtrip() {
        for gid in [Gid::MIN, Gid::MAX, Gid::new(7, 42), Gid::new(u32::MAX, 0)] {
            assert_eq!(Gid::unpack(gid.pack()), gid);
        }
    }

    #[test]
    fn gid_display_and_parse() {
        insta::assert_snapshot!(Gid::new(3, 17).to_string(), @"3:17");
        let parsed: Gid = "3:17".parse().unwrap();
        assert_eq!(parsed, Gid::new(3, 17));
        assert!("3-17".parse::<Gid>().is_err());
        assert!("x:1".parse::<Gid>().is_err());
    }

    #[test]
    fn allocator_skips_reserved_local_zero() {
        let mut alloc = GidAllocator::new(InstanceId(4), 0);
        assert_eq!(alloc.allocate().unwrap(), Gid::new(4, 1));
        assert_eq!(alloc.allocate().unwrap(), Gid::new(4, 2));
        assert_eq!(alloc.high_water(), 3);
    }

    #[test]
    fn allocator_exhaustion_is_an_error() {
        let mut alloc = GidAllocator::new(InstanceId(1), u32::MAX - 1);
        assert!(alloc.allocate().is_ok());
        assert!(matches!(
            alloc.allocate(),
            Err(CoreError::GidSpaceExhausted { .. })
        ));
    }

    #[test]
    fn forks_never_overlap() {
        let (root, child_a) = InstanceSpace::ROOT.fork().unwrap();
        let (root, child_b) = root.fork().unwrap();
        let (child_a, grandchild) = child_a.fork().unwrap();

        let spaces = [root, child_a, child_b, grandchild];
        for (i, x) in spaces.iter().enumerate() {
            for (j, y) in spaces.iter().enumerate() {
                if i != j {
                    assert!(!x.contains(y.id), "{x:?} overlaps {y:?}");
                }
            }
        }
        assert_eq!(child_a.id, InstanceId(1 << 31));
        assert_eq!(child_b.id, InstanceId(1 << 30));
    }

    #[test]
    fn fork_of_unit_span_fails() {
        let space = InstanceSpace {
            id: InstanceId(9),
            span: 1,
        };
        assert!(matches!(
            space.fork(),
            Err(CoreError::InstanceSpaceExhausted { .. })
        ));
    }

    #[test]
    fn serde_roundtrip() {
        let gid = Gid::new(2, 99);
        let json = serde_json::to_string(&gid).unwrap();
        let back: Gid = serde_json::from_str(&json).unwrap();
        assert_eq!(gid, back);
    }
}
