//! Fixed-radius neighborhood queries over the octree.

use crate::common::points::dist2;
use crate::{Octree, Point3, Result};
use std::collections::HashSet;

/// A fixed-radius neighborhood query over a borrowed [`Octree`].
///
/// The search holds an active radius `r` and the *active depth* derived
/// from it: the shallowest level whose cell side is at least `2r`. At that
/// level a ball of radius `r` around any query point intersects at most one
/// cell beyond the query's own cell per axis and side, so the candidate set
/// is never more than the 27 cells adjacent to the query cell.
///
/// The type is `Copy`; each parallel selection worker takes its own copy so
/// no query state is ever shared.
#[derive(Clone, Copy)]
pub struct RadiusSearch<'a> {
    octree: &'a Octree,
    radius: f64,
    sq_radius: f64,
    active_depth: u32,
}

impl<'a> RadiusSearch<'a> {
    /// Create a search over `octree` with the given radius, which must lie
    /// strictly between zero and the bounding cube side.
    pub fn new(octree: &'a Octree, radius: f64) -> Result<Self> {
        let mut search = Self {
            octree,
            radius: 0.0,
            sq_radius: 0.0,
            active_depth: octree.depth(),
        };
        search.set_radius(radius)?;
        Ok(search)
    }

    /// Set the active radius and derive the active depth
    /// `d = D − ⌊log2(size / 2r)⌋`, clamped into `[0, D]`.
    pub fn set_radius(&mut self, radius: f64) -> Result<()> {
        let size = self.octree.size();
        if radius <= 0.0 || radius >= size {
            return Err(format!(
                "search radius {} must lie strictly between 0 and the cube side {}",
                radius, size
            )
            .into());
        }
        self.radius = radius;
        self.sq_radius = radius * radius;
        let shift = (size / (2.0 * radius)).log2().floor() as i64;
        let depth = self.octree.depth() as i64;
        self.active_depth = (depth - shift).clamp(0, depth) as u32;
        Ok(())
    }

    /// Set the active depth directly; the radius becomes `size / 2^depth`,
    /// the largest radius still covered by the 27-cell locality at that
    /// depth.
    pub fn set_depth(&mut self, depth: u32) -> Result<()> {
        if depth > self.octree.depth() {
            return Err(format!(
                "active depth {} exceeds the octree depth {}",
                depth,
                self.octree.depth()
            )
            .into());
        }
        self.active_depth = depth;
        self.radius = self.octree.size() / (1u64 << depth) as f64;
        self.sq_radius = self.radius * self.radius;
        Ok(())
    }

    pub fn radius(&self) -> f64 {
        self.radius
    }

    pub fn sq_radius(&self) -> f64 {
        self.sq_radius
    }

    pub fn active_depth(&self) -> u32 {
        self.active_depth
    }

    /// Find the cell containing `query` at the active depth, or the deepest
    /// live ancestor if the tree is not subdivided that far there.
    pub fn locate(&self, query: &Point3) -> usize {
        let (codx, cody, codz) = self.compute_code(query);
        self.traverse_to_level(codx, cody, codz, self.active_depth)
    }

    /// Append the ids of every stored sample within the active radius of
    /// `query`; returns the length of `out`. The query cell is located
    /// first; use [`neighbors_from`](Self::neighbors_from) when it is
    /// already known.
    pub fn neighbors(&self, query: &Point3, out: &mut Vec<usize>) -> usize {
        let node = self.locate(query);
        self.neighbors_from(query, node, out)
    }

    /// As [`neighbors`](Self::neighbors), with `query_node` a known cell
    /// containing the query at the active depth or above.
    pub fn neighbors_from(&self, query: &Point3, query_node: usize, out: &mut Vec<usize>) -> usize {
        self.for_each_candidate_cell(query, query_node, &mut |cell| {
            self.explore(cell, query, out);
            true
        });
        out.len()
    }

    /// As [`neighbors`](Self::neighbors), also recording the squared
    /// distance of each neighbor in the matching position of `distances`.
    pub fn neighbors_with_distances(
        &self,
        query: &Point3,
        out: &mut Vec<usize>,
        distances: &mut Vec<f64>,
    ) -> usize {
        let node = self.locate(query);
        self.neighbors_with_distances_from(query, node, out, distances)
    }

    pub fn neighbors_with_distances_from(
        &self,
        query: &Point3,
        query_node: usize,
        out: &mut Vec<usize>,
        distances: &mut Vec<f64>,
    ) -> usize {
        self.for_each_candidate_cell(query, query_node, &mut |cell| {
            self.explore_with_distances(cell, query, out, distances);
            true
        });
        out.len()
    }

    /// Append `(squared distance, sample id)` pairs for every neighbor of
    /// `query`, ordered by increasing distance; returns the length of
    /// `out`.
    pub fn sorted_neighbors(&self, query: &Point3, out: &mut Vec<(f64, usize)>) -> usize {
        let node = self.locate(query);
        self.sorted_neighbors_from(query, node, out)
    }

    pub fn sorted_neighbors_from(
        &self,
        query: &Point3,
        query_node: usize,
        out: &mut Vec<(f64, usize)>,
    ) -> usize {
        let start = out.len();
        self.for_each_candidate_cell(query, query_node, &mut |cell| {
            self.explore_sorted(cell, query, out);
            true
        });
        out[start..].sort_by(|a, b| a.0.total_cmp(&b.0));
        out.len()
    }

    /// Whether the ball around `query` contains no stored sample other
    /// than the given exceptions. Short-circuits on the first outsider.
    pub fn contains_only(&self, query: &Point3, exceptions: &HashSet<usize>) -> bool {
        let node = self.locate(query);
        self.contains_only_from(query, node, exceptions)
    }

    pub fn contains_only_from(
        &self,
        query: &Point3,
        query_node: usize,
        exceptions: &HashSet<usize>,
    ) -> bool {
        self.for_each_candidate_cell(query, query_node, &mut |cell| {
            self.explore_except(cell, query, exceptions)
        })
    }

    /// Enumerate the candidate cells around the query: the Cartesian
    /// product of up to three locational codes per axis, visited at level
    /// `s = max(query_node depth, active depth)`. The callback returns
    /// `false` to stop the enumeration; the return value reports whether it
    /// ran to completion.
    fn for_each_candidate_cell<F: FnMut(usize) -> bool>(
        &self,
        query: &Point3,
        query_node: usize,
        f: &mut F,
    ) -> bool {
        let node = self.octree.node(query_node);
        let s = node.depth().max(self.active_depth);
        let step = 1u32 << s;
        let origin = self.octree.origin();
        let size = self.octree.size();
        let node_origin = node.origin();
        let node_size = node.size();

        let (xs, nx) = self.axis_candidates(
            query.x,
            node_origin.x,
            node_size,
            origin.x,
            size,
            node.xloc(),
            step,
        );
        let (ys, ny) = self.axis_candidates(
            query.y,
            node_origin.y,
            node_size,
            origin.y,
            size,
            node.yloc(),
            step,
        );
        let (zs, nz) = self.axis_candidates(
            query.z,
            node_origin.z,
            node_size,
            origin.z,
            size,
            node.zloc(),
            step,
        );

        for &cx in &xs[..nx] {
            for &cy in &ys[..ny] {
                for &cz in &zs[..nz] {
                    let cell = self.traverse_to_level(cx, cy, cz, s);
                    if self.octree.node(cell).depth() == s && !f(cell) {
                        return false;
                    }
                }
            }
        }
        true
    }

    /// Candidate locational codes for one axis: the query cell's own code,
    /// plus the left neighbor when the ball crosses the cell's low face
    /// while staying inside the cube, plus the right neighbor in the
    /// mirrored case. The predicates are deliberately asymmetric: cells
    /// are half-open, so the low face belongs to the cell and the high
    /// face to its neighbor.
    #[allow(clippy::too_many_arguments)]
    fn axis_candidates(
        &self,
        q: f64,
        cell_min: f64,
        cell_size: f64,
        cube_min: f64,
        cube_size: f64,
        loc: u32,
        step: u32,
    ) -> ([u32; 3], usize) {
        let mut codes = [loc, 0, 0];
        let mut n = 1;
        if q - self.radius < cell_min && q - self.radius > cube_min {
            codes[n] = loc - 1;
            n += 1;
        }
        if q + self.radius > cell_min + cell_size && q + self.radius < cube_min + cube_size {
            codes[n] = loc + step;
            n += 1;
        }
        (codes, n)
    }

    /// Follow the path given by the locational codes from the root down to
    /// level `k`, stopping early where the tree is not subdivided.
    fn traverse_to_level(&self, codx: u32, cody: u32, codz: u32, k: u32) -> usize {
        let mut current = self.octree.root();
        while self.octree.node(current).depth() > k {
            let l = self.octree.node(current).depth() - 1;
            let index =
                ((((codx >> l) & 1) << 2) | (((cody >> l) & 1) << 1) | ((codz >> l) & 1)) as usize;
            match self.octree.node(current).child(index) {
                Some(child) => current = child,
                None => break,
            }
        }
        current
    }

    fn compute_code(&self, point: &Point3) -> (u32, u32, u32) {
        let multiplier = self.octree.binsize() as f64 / self.octree.size();
        let origin = self.octree.origin();
        (
            ((point.x - origin.x) * multiplier) as u32,
            ((point.y - origin.y) * multiplier) as u32,
            ((point.z - origin.z) * multiplier) as u32,
        )
    }

    fn explore(&self, cell: usize, query: &Point3, out: &mut Vec<usize>) {
        let node = self.octree.node(cell);
        if node.depth() != 0 {
            for child in node.children() {
                self.explore(child, query, out);
            }
        } else {
            for &sid in node.sample_ids() {
                if dist2(query, &self.octree.sample(sid).point) < self.sq_radius {
                    out.push(sid);
                }
            }
        }
    }

    fn explore_with_distances(
        &self,
        cell: usize,
        query: &Point3,
        out: &mut Vec<usize>,
        distances: &mut Vec<f64>,
    ) {
        let node = self.octree.node(cell);
        if node.depth() != 0 {
            for child in node.children() {
                self.explore_with_distances(child, query, out, distances);
            }
        } else {
            for &sid in node.sample_ids() {
                let d2 = dist2(query, &self.octree.sample(sid).point);
                if d2 < self.sq_radius {
                    out.push(sid);
                    distances.push(d2);
                }
            }
        }
    }

    fn explore_sorted(&self, cell: usize, query: &Point3, out: &mut Vec<(f64, usize)>) {
        let node = self.octree.node(cell);
        if node.depth() != 0 {
            for child in node.children() {
                self.explore_sorted(child, query, out);
            }
        } else {
            for &sid in node.sample_ids() {
                let d2 = dist2(query, &self.octree.sample(sid).point);
                if d2 < self.sq_radius {
                    out.push((d2, sid));
                }
            }
        }
    }

    /// Returns false as soon as a sample inside the ball is found that is
    /// not in the exception set.
    fn explore_except(&self, cell: usize, query: &Point3, exceptions: &HashSet<usize>) -> bool {
        let node = self.octree.node(cell);
        if node.depth() != 0 {
            for child in node.children() {
                if !self.explore_except(child, query, exceptions) {
                    return false;
                }
            }
        } else {
            for &sid in node.sample_ids() {
                if dist2(query, &self.octree.sample(sid).point) < self.sq_radius
                    && !exceptions.contains(&sid)
                {
                    return false;
                }
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::loose_cube;
    use crate::Sample;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_points(n: usize, seed: u64) -> Vec<Point3> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n)
            .map(|_| {
                Point3::new(
                    rng.random_range(0.0..1.0),
                    rng.random_range(0.0..1.0),
                    rng.random_range(0.0..1.0),
                )
            })
            .collect()
    }

    fn build_octree(points: &[Point3], min_radius: f64) -> Octree {
        let mut min = points[0];
        let mut max = points[0];
        for p in points {
            min = Point3::new(min.x.min(p.x), min.y.min(p.y), min.z.min(p.z));
            max = Point3::new(max.x.max(p.x), max.y.max(p.y), max.z.max(p.z));
        }
        let (origin, size, depth) = loose_cube(&min, &max, min_radius);
        let mut octree = Octree::new(depth.unwrap_or(0));
        octree.initialize(origin, size);
        octree.add_points(points.iter().map(|p| Sample::unoriented(*p)));
        octree
    }

    fn brute_force(points: &[Point3], query: &Point3, radius: f64) -> Vec<usize> {
        points
            .iter()
            .enumerate()
            .filter(|(_, p)| dist2(query, p) < radius * radius)
            .map(|(i, _)| i)
            .collect()
    }

    #[test]
    fn neighbors_match_brute_force() {
        let radius = 0.11;
        let points = random_points(600, 29);
        let octree = build_octree(&points, radius);
        let search = RadiusSearch::new(&octree, radius).unwrap();

        // Queries at the stored points plus a handful of free positions.
        let mut queries = points[..50].to_vec();
        queries.extend(random_points(20, 31));

        for query in &queries {
            let mut found = Vec::new();
            search.neighbors(query, &mut found);
            let mut expected = brute_force(&points, query, radius);
            found.sort_unstable();
            expected.sort_unstable();
            assert_eq!(found, expected, "query {:?}", query);
        }
    }

    #[test]
    fn distances_are_squared_and_below_threshold() {
        let radius = 0.2;
        let points = random_points(300, 41);
        let octree = build_octree(&points, radius);
        let search = RadiusSearch::new(&octree, radius).unwrap();

        let query = Point3::new(0.5, 0.5, 0.5);
        let mut found = Vec::new();
        let mut distances = Vec::new();
        search.neighbors_with_distances(&query, &mut found, &mut distances);
        assert_eq!(found.len(), distances.len());
        for (&sid, &d2) in found.iter().zip(distances.iter()) {
            assert!(d2 < radius * radius);
            let exact = dist2(&query, &octree.sample(sid).point);
            assert!((d2 - exact).abs() < 1e-12);
        }
    }

    #[test]
    fn sorted_neighbors_are_ordered() {
        let radius = 0.25;
        let points = random_points(400, 43);
        let octree = build_octree(&points, radius);
        let search = RadiusSearch::new(&octree, radius).unwrap();

        let mut found = Vec::new();
        search.sorted_neighbors(&Point3::new(0.4, 0.6, 0.5), &mut found);
        assert!(!found.is_empty());
        for pair in found.windows(2) {
            assert!(pair[0].0 <= pair[1].0);
        }
        let expected = brute_force(&points, &Point3::new(0.4, 0.6, 0.5), radius);
        assert_eq!(found.len(), expected.len());
    }

    #[test]
    fn sample_exactly_at_radius_is_excluded() {
        let points = vec![Point3::new(0.0, 0.0, 0.0), Point3::new(0.25, 0.0, 0.0)];
        let octree = build_octree(&points, 0.25);
        let search = RadiusSearch::new(&octree, 0.25).unwrap();

        let mut found = Vec::new();
        search.neighbors(&points[0], &mut found);
        // The open ball keeps the query sample and drops the one at
        // exactly r.
        assert_eq!(found, vec![0]);
    }

    #[test]
    fn contains_only_respects_exceptions() {
        let radius = 0.3;
        let points = random_points(200, 47);
        let octree = build_octree(&points, radius);
        let search = RadiusSearch::new(&octree, radius).unwrap();

        let query = points[17];
        let in_ball: HashSet<usize> = brute_force(&points, &query, radius).into_iter().collect();
        assert!(!in_ball.is_empty());
        assert!(search.contains_only(&query, &in_ball));

        let mut partial = in_ball.clone();
        let dropped = *partial.iter().next().unwrap();
        partial.remove(&dropped);
        assert!(!search.contains_only(&query, &partial));
    }

    #[test]
    fn locate_returns_the_containing_cell_at_active_depth() {
        let radius = 0.1;
        let points = random_points(500, 53);
        let octree = build_octree(&points, radius);
        let search = RadiusSearch::new(&octree, radius).unwrap();

        for p in &points[..40] {
            let node = octree.node(search.locate(p));
            assert_eq!(node.depth(), search.active_depth());
            assert!(node.is_inside(p));
        }
    }

    #[test]
    fn locate_at_leaf_level_finds_the_stored_sample() {
        let points = random_points(200, 73);
        let octree = build_octree(&points, 0.1);
        let mut search = RadiusSearch::new(&octree, 0.1).unwrap();
        search.set_depth(0).unwrap();

        for (sid, p) in points.iter().enumerate() {
            let leaf = octree.node(search.locate(p));
            assert_eq!(leaf.depth(), 0);
            assert!(leaf.sample_ids().contains(&sid));
        }
    }

    #[test]
    fn radius_validation() {
        let points = random_points(10, 59);
        let octree = build_octree(&points, 0.1);
        assert!(RadiusSearch::new(&octree, 0.0).is_err());
        assert!(RadiusSearch::new(&octree, -1.0).is_err());
        assert!(RadiusSearch::new(&octree, octree.size()).is_err());
        assert!(RadiusSearch::new(&octree, octree.size() * 0.25).is_ok());
    }

    #[test]
    fn set_depth_derives_the_matching_radius() {
        let points = random_points(50, 61);
        let octree = build_octree(&points, 0.1);
        let mut search = RadiusSearch::new(&octree, 0.1).unwrap();

        search.set_depth(2).unwrap();
        assert_eq!(search.active_depth(), 2);
        assert!((search.radius() - octree.size() / 4.0).abs() < 1e-12);
        assert!(search.set_depth(octree.depth() + 1).is_err());
    }

    #[test]
    fn active_depth_cell_side_is_at_least_twice_the_radius() {
        let radius = 0.07;
        let points = random_points(300, 67);
        let octree = build_octree(&points, radius);
        let search = RadiusSearch::new(&octree, radius).unwrap();

        let side =
            octree.size() / (1u64 << (octree.depth() - search.active_depth())) as f64;
        assert!(side >= 2.0 * radius);
        // One level shallower than active would be below 2r, unless the
        // active depth is already the root.
        if search.active_depth() > 0 {
            assert!(side / 2.0 < 2.0 * radius);
        }
    }
}
