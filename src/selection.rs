//! Poisson-disk sample selection over the octree.

use crate::{Octree, RadiusSearch, Result};
use log::{debug, info};
use rand::Rng;
use rayon::prelude::*;

/// Selects a Poisson-disk subset of the samples stored in an octree: after
/// a run no two selected samples lie within the radius of each other, and
/// every unselected sample is covered by a selected one.
///
/// Two engines are available. [`select_greedy`](Self::select_greedy) scans
/// the tree deterministically in traversal order;
/// [`select_dart_throwing`](Self::select_dart_throwing) draws samples at
/// random and runs cells of the tree in parallel. Both mutate the
/// per-sample flags in place and record the selected ids here.
pub struct SampleSelection<'a> {
    octree: &'a Octree,
    search: RadiusSearch<'a>,
    radius: f64,
    selected: Vec<usize>,
}

impl<'a> SampleSelection<'a> {
    /// Create a selection with the given separation radius, which must lie
    /// strictly between zero and the bounding cube side.
    pub fn new(octree: &'a Octree, radius: f64) -> Result<Self> {
        let search = RadiusSearch::new(octree, radius)?;
        Ok(Self {
            octree,
            search,
            radius,
            selected: Vec::new(),
        })
    }

    pub fn radius(&self) -> f64 {
        self.radius
    }

    pub fn set_radius(&mut self, radius: f64) -> Result<()> {
        self.search.set_radius(radius)?;
        self.radius = radius;
        Ok(())
    }

    /// Number of samples selected so far.
    pub fn n_selected(&self) -> usize {
        self.selected.len()
    }

    /// Ids of the selected samples, in selection order.
    pub fn selected(&self) -> &[usize] {
        &self.selected
    }

    /// Deterministic single-threaded selection: walk the octree in
    /// traversal order and select every sample not yet covered, covering
    /// its whole neighborhood in turn. A candidate whose neighborhood
    /// (which always includes the candidate itself) holds fewer than three
    /// samples is demoted as an isolated outlier instead.
    pub fn select_greedy(&mut self) {
        info!("selecting samples with radius {}", self.radius);
        self.greedy_descend(self.octree.root());
    }

    fn greedy_descend(&mut self, cell: usize) {
        let octree = self.octree;
        if octree.node(cell).depth() > self.search.active_depth() {
            for child in octree.node(cell).children() {
                self.greedy_descend(child);
            }
        } else {
            self.greedy_cell(cell, cell);
        }
    }

    /// Process the leaves under `cell`, querying neighborhoods from `par`,
    /// the ancestor at the active depth.
    fn greedy_cell(&mut self, cell: usize, par: usize) {
        let octree = self.octree;
        let node = octree.node(cell);
        if node.depth() != 0 {
            for child in node.children() {
                self.greedy_cell(child, par);
            }
            return;
        }

        let mut neighbors = Vec::new();
        for &sid in node.sample_ids() {
            let sample = octree.sample(sid);
            if sample.is_covered() {
                continue;
            }
            neighbors.clear();
            self.search.neighbors_from(&sample.point, par, &mut neighbors);
            if neighbors.len() < 3 {
                sample.set_selected(false);
                debug!("demoted isolated sample at {:?}", sample.point);
            } else {
                for &nid in &neighbors {
                    let neighbor = octree.sample(nid);
                    neighbor.set_covered(true);
                    neighbor.set_selected(false);
                    neighbor.increment_covered();
                }
                sample.set_selected(true);
                self.selected.push(sid);
            }
        }
    }

    /// Randomized parallel selection. The tree is partitioned at a depth
    /// whose cell side is at least `1.5 · 2.1 · r`, so the radius-r
    /// neighborhoods of samples in non-adjacent cells cannot overlap. The
    /// cells are processed in eight sequential parity passes; within one
    /// pass every cell is independent and runs on the rayon pool, throwing
    /// darts at its own uncovered samples until none remain.
    pub fn select_dart_throwing(&mut self) {
        info!("dart throwing selection in parallel");
        let octree = self.octree;
        let dilation = 2.1 * self.radius;
        let shift = (octree.size() / (1.5 * dilation)).log2().floor() as i64;
        let depth = octree.depth() as i64;
        let partition_depth = (depth - shift).clamp(0, depth) as u32;
        let cell_side =
            octree.size() / (1u64 << (octree.depth() - partition_depth)) as f64;
        info!(
            "processing depth {} ; cell size {} ; dilation radius {}",
            partition_depth, cell_side, dilation
        );

        let search = self.search;
        let buckets = octree.nodes_by_parity(partition_depth, octree.root());
        for bucket in &buckets {
            let mut per_cell: Vec<Vec<usize>> = bucket
                .par_iter()
                .map(|&cell| dart_throw_cell(octree, search, cell))
                .collect();
            for cell_selected in &mut per_cell {
                self.selected.append(cell_selected);
            }
        }
    }
}

/// Throw darts inside one partition cell: repeatedly draw a random
/// uncovered sample, select it, and cover its whole neighborhood. Returns
/// the ids selected in this cell.
///
/// The draw pool is thinned lazily: covering only flips the flag, and a
/// covered sample drawn later is discarded. The generator is the
/// thread-local one, seeded once per worker thread.
fn dart_throw_cell(octree: &Octree, search: RadiusSearch, cell: usize) -> Vec<usize> {
    let mut pool = Vec::new();
    for leaf in octree.nodes_at_depth(0, cell) {
        for &sid in octree.node(leaf).sample_ids() {
            if !octree.sample(sid).is_covered() {
                pool.push(sid);
            }
        }
    }

    let mut rng = rand::rng();
    let mut selected = Vec::new();
    let mut neighbors = Vec::new();
    while !pool.is_empty() {
        let sid = pool.swap_remove(rng.random_range(0..pool.len()));
        let sample = octree.sample(sid);
        if sample.is_covered() {
            continue;
        }
        neighbors.clear();
        search.neighbors(&sample.point, &mut neighbors);
        for &nid in &neighbors {
            let neighbor = octree.sample(nid);
            neighbor.set_covered(true);
            neighbor.set_selected(false);
            neighbor.increment_covered();
        }
        sample.set_selected(true);
        selected.push(sid);
    }
    selected
}
