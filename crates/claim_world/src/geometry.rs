//! Integer corner/region math for claims. Pure functions; no I/O.

use serde::{Deserialize, Serialize};

/// Horizontal block position. Claims ignore the vertical axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockPos {
    pub x: i64,
    pub z: i64,
}

impl BlockPos {
    pub fn new(x: i64, z: i64) -> Self {
        Self { x, z }
    }
}

/// Rectangular claim footprint. `near` is component-wise minimal and `far`
/// component-wise maximal; both corners are inclusive block cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub near: BlockPos,
    pub far: BlockPos,
}

impl Region {
    /// Builds a normalized region from two corners given in any order.
    pub fn from_corners(a: BlockPos, b: BlockPos) -> Self {
        Self {
            near: BlockPos::new(a.x.min(b.x), a.z.min(b.z)),
            far: BlockPos::new(a.x.max(b.x), a.z.max(b.z)),
        }
    }

    /// Corners in index order: near, (near.x, far.z), (far.x, near.z), far.
    pub fn corners(&self) -> [BlockPos; 4] {
        [
            self.near,
            BlockPos::new(self.near.x, self.far.z),
            BlockPos::new(self.far.x, self.near.z),
            self.far,
        ]
    }

    pub fn contains(&self, pos: BlockPos) -> bool {
        pos.x >= self.near.x && pos.x <= self.far.x && pos.z >= self.near.z && pos.z <= self.far.z
    }

    /// True when the two regions share at least one block cell. Regions that
    /// only touch along an edge share no cell and do not intersect.
    pub fn intersects(&self, other: &Region) -> bool {
        self.near.x <= other.far.x
            && other.near.x <= self.far.x
            && self.near.z <= other.far.z
            && other.near.z <= self.far.z
    }

    /// True when `other` lies entirely inside this region.
    pub fn encloses(&self, other: &Region) -> bool {
        self.contains(other.near) && self.contains(other.far)
    }

    /// Claimed surface area in blocks, corners inclusive.
    pub fn surface_area(&self) -> u64 {
        let dx = (self.far.x - self.near.x) as u64 + 1;
        let dz = (self.far.z - self.near.z) as u64 + 1;
        dx * dz
    }

    /// Returns a new normalized region with the indexed corner moved to
    /// `new_corner`; the diagonally opposite corner stays fixed. The caller
    /// validates the result before committing it.
    pub fn resize(&self, corner_index: usize, new_corner: BlockPos) -> Option<Region> {
        if corner_index >= 4 {
            return None;
        }
        let opposite = self.corners()[3 - corner_index];
        Some(Region::from_corners(new_corner, opposite))
    }

    /// True when both corners sit within `limit` blocks of the world origin.
    pub fn within_limit(&self, limit: i64) -> bool {
        self.near.x >= -limit
            && self.near.z >= -limit
            && self.far.x <= limit
            && self.far.z <= limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(ax: i64, az: i64, bx: i64, bz: i64) -> Region {
        Region::from_corners(BlockPos::new(ax, az), BlockPos::new(bx, bz))
    }

    #[test]
    fn corners_are_normalized_regardless_of_input_order() {
        let a = region(9, 9, 0, 0);
        let b = region(0, 0, 9, 9);
        assert_eq!(a, b);
        assert_eq!(a.near, BlockPos::new(0, 0));
        assert_eq!(a.far, BlockPos::new(9, 9));
    }

    #[test]
    fn region_contains_its_own_corners() {
        let r = region(-3, 4, 10, -7);
        for corner in r.corners() {
            assert!(r.contains(corner), "corner {corner:?} not contained");
        }
    }

    #[test]
    fn intersection_is_symmetric() {
        let a = region(0, 0, 9, 9);
        let b = region(5, 5, 15, 15);
        let c = region(20, 20, 30, 30);
        assert!(a.intersects(&b));
        assert!(b.intersects(&a));
        assert!(!a.intersects(&c));
        assert!(!c.intersects(&a));
    }

    #[test]
    fn edge_adjacent_regions_do_not_intersect() {
        let a = region(0, 0, 9, 9);
        let b = region(10, 0, 19, 9);
        assert!(!a.intersects(&b));
        assert!(!b.intersects(&a));
    }

    #[test]
    fn surface_area_counts_inclusive_corners() {
        assert_eq!(region(0, 0, 9, 9).surface_area(), 100);
        assert_eq!(region(5, 5, 5, 5).surface_area(), 1);
        assert_eq!(region(-2, 0, 2, 0).surface_area(), 5);
    }

    #[test]
    fn resize_keeps_opposite_corner_and_renormalizes() {
        let r = region(0, 0, 9, 9);
        // Drag the near corner past the far corner; the result re-sorts.
        let resized = r.resize(0, BlockPos::new(15, 15)).expect("resize");
        assert_eq!(resized.near, BlockPos::new(9, 9));
        assert_eq!(resized.far, BlockPos::new(15, 15));

        let grown = r.resize(3, BlockPos::new(19, 9)).expect("resize");
        assert_eq!(grown, region(0, 0, 19, 9));

        assert!(r.resize(4, BlockPos::new(0, 0)).is_none());
    }

    #[test]
    fn enclosure_requires_full_containment() {
        let parent = region(0, 0, 20, 20);
        assert!(parent.encloses(&region(5, 5, 10, 10)));
        assert!(parent.encloses(&parent));
        assert!(!parent.encloses(&region(15, 15, 25, 25)));
    }

    #[test]
    fn world_limit_bounds_both_corners() {
        let r = region(-1000, -1000, 1000, 1000);
        assert!(r.within_limit(1000));
        assert!(!r.within_limit(999));
    }
}
