//! Records stored in grid buckets

use glam::Vec3;
use std::hash::{Hash, Hasher};

use crate::EdgeId;

/// Opaque handle of the entity that owns a grid entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct EntityRef(pub u64);

impl EntityRef {
    /// Raw handle value
    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Capability set attached to an entry, tested by query filters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct TagMask(pub u32);

impl TagMask {
    pub const NONE: TagMask = TagMask(0);
    pub const ALL: TagMask = TagMask(u32::MAX);

    /// Mask with only bit `bit` set
    pub const fn bit(bit: u32) -> Self {
        TagMask(1 << bit)
    }

    pub fn contains(&self, other: TagMask) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(&self, other: TagMask) -> bool {
        self.0 & other.0 != 0
    }

    pub fn insert(&mut self, other: TagMask) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: TagMask) {
        self.0 &= !other.0;
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for TagMask {
    type Output = TagMask;

    fn bitor(self, rhs: TagMask) -> TagMask {
        TagMask(self.0 | rhs.0)
    }
}

/// Geometry an entry stands for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EntryShape {
    /// Sphere of the entry's radius around its position
    #[default]
    Sphere,
    /// Polygon obstacle edge; position and radius are its bounding sphere
    Edge(EdgeId),
}

/// Fixed-size record describing one entity inside a bucket
///
/// Entries are written once per tick by the owning entity and then read by
/// any number of concurrent queries. `dist_sq` is scratch space: queries
/// fill it on their own copies while ranking candidates.
#[derive(Debug, Clone, Copy)]
pub struct GridEntry {
    /// Entity hash, used for de-duplication across buckets
    pub hash: u64,
    /// World position of the entity centre
    pub position: Vec3,
    /// Collision radius
    pub radius: f32,
    /// Owning entity
    pub entity: EntityRef,
    /// Capability bits matched by query filters
    pub tags: TagMask,
    /// What the entry represents
    pub shape: EntryShape,
    /// Squared distance used while selecting the nearest results
    pub dist_sq: f32,
}

impl GridEntry {
    /// Creates a sphere entry whose hash is derived from the entity handle
    pub fn new(entity: EntityRef, position: Vec3, radius: f32) -> Self {
        Self {
            hash: mix_hash(entity.0, 0),
            position,
            radius,
            entity,
            tags: TagMask::NONE,
            shape: EntryShape::Sphere,
            dist_sq: 0.0,
        }
    }

    /// Overrides the entity hash
    pub fn with_hash(mut self, hash: u64) -> Self {
        self.hash = hash;
        self
    }

    pub fn with_tags(mut self, tags: TagMask) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_shape(mut self, shape: EntryShape) -> Self {
        self.shape = shape;
        self
    }
}

impl PartialEq for GridEntry {
    fn eq(&self, other: &Self) -> bool {
        self.entity == other.entity
    }
}

impl Eq for GridEntry {}

impl Hash for GridEntry {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

/// Mixes two 64-bit values into a well-distributed hash (splitmix64 finalizer)
pub fn mix_hash(a: u64, b: u64) -> u64 {
    let mut z = a ^ b.rotate_left(32) ^ 0x9E37_79B9_7F4A_7C15;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_identity_by_entity() {
        let a = GridEntry::new(EntityRef(7), Vec3::ZERO, 1.0);
        let mut b = GridEntry::new(EntityRef(7), Vec3::ONE, 2.0);
        b.dist_sq = 10.0;
        assert_eq!(a, b);
        assert_eq!(a.hash, b.hash);

        let c = GridEntry::new(EntityRef(8), Vec3::ZERO, 1.0);
        assert_ne!(a, c);
        assert_ne!(a.hash, c.hash);
    }

    #[test]
    fn test_tag_mask() {
        let mut tags = TagMask::bit(0) | TagMask::bit(3);
        assert!(tags.contains(TagMask::bit(3)));
        assert!(!tags.contains(TagMask::bit(1)));
        assert!(tags.intersects(TagMask::bit(0) | TagMask::bit(5)));

        tags.remove(TagMask::bit(0));
        assert_eq!(tags, TagMask::bit(3));
        tags.insert(TagMask::bit(1));
        assert!(tags.contains(TagMask::bit(1) | TagMask::bit(3)));
        assert!(TagMask::NONE.is_empty());
    }

    #[test]
    fn test_mix_hash_spreads() {
        assert_ne!(mix_hash(1, 0), mix_hash(1, 1));
        assert_ne!(mix_hash(1, 0), mix_hash(2, 0));
        assert_eq!(mix_hash(42, 9), mix_hash(42, 9));
    }
}
