//! Loose bounding-box octree over a 3D sample cloud.

pub mod node;
pub mod search;

use crate::{Point3, Sample};
use node::OctreeNode;

/// A pointerless octree: cells live in an arena indexed by `usize`, and the
/// samples themselves live in a central vector with the leaves holding id
/// lists. Once the points are in, the structure is immutable; the selection
/// engines only flip the per-sample flags.
///
/// The root sits at the configured depth and node 0 of the arena, leaves at
/// depth 0. The bounding cube must be built so every input point is
/// strictly inside it (see [`crate::io::loose_cube`]); a point on or past
/// the high faces would produce an out-of-range cell code.
pub struct Octree {
    depth: u32,
    binsize: u32,
    origin: Point3,
    size: f64,
    nodes: Vec<OctreeNode>,
    samples: Vec<Sample>,
    non_empty_cells: Vec<usize>,
}

impl Octree {
    /// Create an empty octree of the given depth. [`initialize`](Self::initialize)
    /// must be called before any point is added.
    pub fn new(depth: u32) -> Self {
        Self {
            depth,
            binsize: 1 << depth,
            origin: Point3::origin(),
            size: 0.0,
            nodes: Vec::new(),
            samples: Vec::new(),
            non_empty_cells: vec![0; depth as usize],
        }
    }

    /// Change the depth of a not-yet-initialized tree, resetting the
    /// per-level counters.
    pub fn set_depth(&mut self, depth: u32) {
        self.depth = depth;
        self.binsize = 1 << depth;
        self.non_empty_cells = vec![0; depth as usize];
    }

    /// Build the root cell over the bounding cube `[origin, origin + size)`.
    pub fn initialize(&mut self, origin: Point3, size: f64) {
        self.origin = origin;
        self.size = size;
        self.nodes.clear();
        self.nodes.push(OctreeNode::new(origin, size, self.depth));
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Number of leaf cells per axis, `2^depth`.
    pub fn binsize(&self) -> u32 {
        self.binsize
    }

    pub fn origin(&self) -> Point3 {
        self.origin
    }

    /// Side length of the bounding cube.
    pub fn size(&self) -> f64 {
        self.size
    }

    /// Total number of samples routed into the tree.
    pub fn n_points(&self) -> usize {
        self.samples.len()
    }

    /// Arena index of the root cell.
    pub fn root(&self) -> usize {
        0
    }

    pub fn node(&self, id: usize) -> &OctreeNode {
        &self.nodes[id]
    }

    pub fn sample(&self, id: usize) -> &Sample {
        &self.samples[id]
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Number of non-empty cells created at each level below the root,
    /// indexed by level.
    pub fn non_empty_cells(&self) -> &[usize] {
        &self.non_empty_cells
    }

    /// Route one sample to its leaf, lazily creating the cells along the
    /// way. The integer cell codes are the point's offset from the cube
    /// origin scaled to leaf units; one bit per level selects the child.
    pub fn add_point(&mut self, sample: Sample) {
        assert!(
            !self.nodes.is_empty(),
            "octree must be initialized before points are added"
        );
        let codx = ((sample.point.x - self.origin.x) / self.size * self.binsize as f64) as u32;
        let cody = ((sample.point.y - self.origin.y) / self.size * self.binsize as f64) as u32;
        let codz = ((sample.point.z - self.origin.z) / self.size * self.binsize as f64) as u32;

        let sample_id = self.samples.len();
        self.samples.push(sample);

        let mut current = self.root();
        while self.nodes[current].depth != 0 {
            let l = self.nodes[current].depth - 1;
            let x = (codx >> l) & 1;
            let y = (cody >> l) & 1;
            let z = (codz >> l) & 1;
            let index = ((x << 2) | (y << 1) | z) as usize;
            current = match self.nodes[current].children[index] {
                Some(child) => child,
                None => self.initialize_child(current, index, x, y, z),
            };
        }
        self.nodes[current].samples.push(sample_id);
    }

    /// Add a batch of samples; returns the total number of points in the
    /// tree afterwards.
    pub fn add_points<I: IntoIterator<Item = Sample>>(&mut self, samples: I) -> usize {
        for sample in samples {
            self.add_point(sample);
        }
        self.n_points()
    }

    fn initialize_child(&mut self, parent: usize, index: usize, x: u32, y: u32, z: u32) -> usize {
        let id = self.nodes.len();
        let child_size = self.nodes[parent].size / 2.0;
        let child_depth = self.nodes[parent].depth - 1;
        let parent_origin = self.nodes[parent].origin;
        let mut child = OctreeNode::new(
            Point3::new(
                parent_origin.x + x as f64 * child_size,
                parent_origin.y + y as f64 * child_size,
                parent_origin.z + z as f64 * child_size,
            ),
            child_size,
            child_depth,
        );
        child.xloc = self.nodes[parent].xloc + (x << child_depth);
        child.yloc = self.nodes[parent].yloc + (y << child_depth);
        child.zloc = self.nodes[parent].zloc + (z << child_depth);
        child.child_index = index as u8;
        child.parent = Some(parent);
        self.nodes.push(child);
        self.nodes[parent].children[index] = Some(id);
        self.non_empty_cells[child_depth as usize] += 1;
        id
    }

    /// Collect the arena indices of all cells of the given depth reachable
    /// from `start`, in depth-first order.
    pub fn nodes_at_depth(&self, depth: u32, start: usize) -> Vec<usize> {
        let mut out = Vec::new();
        self.collect_at_depth(depth, start, &mut out);
        out
    }

    fn collect_at_depth(&self, depth: u32, current: usize, out: &mut Vec<usize>) {
        if self.nodes[current].depth == depth {
            out.push(current);
        } else {
            for child in self.nodes[current].children.iter().flatten() {
                self.collect_at_depth(depth, *child, out);
            }
        }
    }

    /// Collect the cells of the given depth grouped by child index. Cells
    /// sharing a child index differ in every parity bit from each of their
    /// 26 face/edge/corner neighbors, so the cells of one bucket are
    /// pairwise non-adjacent and safe to process concurrently.
    pub fn nodes_by_parity(&self, depth: u32, start: usize) -> [Vec<usize>; 8] {
        let mut buckets: [Vec<usize>; 8] = Default::default();
        for id in self.nodes_at_depth(depth, start) {
            buckets[self.nodes[id].child_index as usize].push(id);
        }
        buckets
    }

    /// Sum of `ncovered` over every sample in the tree.
    pub fn covered_total(&self) -> u64 {
        self.samples.iter().map(|s| s.n_covered() as u64).sum()
    }

    /// Mean number of times an input point was covered by a selected
    /// sample; 1.0 means every point is covered exactly once on average.
    pub fn cover_rate(&self) -> f64 {
        if self.samples.is_empty() {
            0.0
        } else {
            self.covered_total() as f64 / self.samples.len() as f64
        }
    }
}
