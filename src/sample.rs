//! The sample value type stored in the octree leaves.

use crate::{Point3, Vector3};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// A 3D point with an orientation normal and the mutable selection state
/// used by the subsampling engines.
///
/// The coordinates and normal are fixed at construction. The three flags
/// (`selected`, `covered`, `ncovered`) are atomics so they can be updated
/// through a shared reference: during the parallel dart-throwing pass the
/// octree is borrowed immutably by every worker, and the 8-coloring of the
/// cells guarantees no two workers ever touch the same sample within a
/// pass, so `Relaxed` ordering is sufficient.
pub struct Sample {
    /// Position of the sample.
    pub point: Point3,

    /// Orientation normal; zero for unoriented input.
    pub normal: Vector3,

    /// Optional tangent direction associated with the sample.
    pub tangent: Option<Vector3>,

    selected: AtomicBool,
    covered: AtomicBool,
    ncovered: AtomicU32,
}

impl Sample {
    /// Create an oriented sample. Every sample starts selected and
    /// uncovered.
    pub fn new(point: Point3, normal: Vector3) -> Self {
        Self {
            point,
            normal,
            tangent: None,
            selected: AtomicBool::new(true),
            covered: AtomicBool::new(false),
            ncovered: AtomicU32::new(0),
        }
    }

    /// Create a sample with no orientation; the normal is zero.
    pub fn unoriented(point: Point3) -> Self {
        Self::new(point, Vector3::zeros())
    }

    pub fn is_selected(&self) -> bool {
        self.selected.load(Ordering::Relaxed)
    }

    pub fn set_selected(&self, value: bool) {
        self.selected.store(value, Ordering::Relaxed);
    }

    pub fn is_covered(&self) -> bool {
        self.covered.load(Ordering::Relaxed)
    }

    pub fn set_covered(&self, value: bool) {
        self.covered.store(value, Ordering::Relaxed);
    }

    /// Number of times this sample has been covered by a selected neighbor.
    pub fn n_covered(&self) -> u32 {
        self.ncovered.load(Ordering::Relaxed)
    }

    pub fn increment_covered(&self) {
        self.ncovered.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_flags() {
        let s = Sample::unoriented(Point3::new(1.0, 2.0, 3.0));
        assert!(s.is_selected());
        assert!(!s.is_covered());
        assert_eq!(s.n_covered(), 0);
        assert_eq!(s.normal, Vector3::zeros());
        assert!(s.tangent.is_none());
    }

    #[test]
    fn flag_updates_through_shared_reference() {
        let s = Sample::new(Point3::origin(), Vector3::new(0.0, 0.0, 1.0));
        let r = &s;
        r.set_selected(false);
        r.set_covered(true);
        r.increment_covered();
        r.increment_covered();
        assert!(!s.is_selected());
        assert!(s.is_covered());
        assert_eq!(s.n_covered(), 2);
    }
}
