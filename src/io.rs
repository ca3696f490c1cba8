//! ASCII point-cloud input and output.
//!
//! The input format is one point per line, whitespace separated: either
//! `x y z` (unoriented, zero normal) or `x y z nx ny nz` (oriented). The
//! first non-empty line fixes the arity for the whole file. Output is
//! either an OFF file (`OFF` header, count line, then one tab-separated
//! line per selected sample) or the same lines with no header.

use crate::{Octree, Point3, Result, Sample, Vector3};
use log::info;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// Read an ASCII cloud and sort it into a freshly built octree whose leaf
/// side matches `min_radius` (which must be positive).
pub fn read_cloud(path: &Path, min_radius: f64) -> Result<Octree> {
    if min_radius <= 0.0 {
        return Err("the minimum radius must be positive".into());
    }
    let file =
        File::open(path).map_err(|e| format!("could not open {}: {}", path.display(), e))?;
    parse_cloud(BufReader::new(file), min_radius)
}

/// Reader-generic core of [`read_cloud`]; single pass accumulating the
/// samples and the per-axis extents, then routing everything into the tree.
pub fn parse_cloud<R: BufRead>(reader: R, min_radius: f64) -> Result<Octree> {
    let mut samples: Vec<Sample> = Vec::new();
    let mut min = Point3::new(f64::INFINITY, f64::INFINITY, f64::INFINITY);
    let mut max = Point3::new(f64::NEG_INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY);
    let mut arity: Option<usize> = None;

    for line in reader.lines() {
        let line = line?;
        let mut values = [0.0f64; 6];
        let mut n = 0;
        for token in line.split_whitespace() {
            if n == 6 {
                return Err(format!("too many values on line: {}", line.trim()).into());
            }
            values[n] = token
                .parse()
                .map_err(|e| format!("could not parse '{}': {}", token, e))?;
            n += 1;
        }
        if n == 0 {
            continue;
        }
        let arity = *arity.get_or_insert(n);
        if n != arity {
            return Err(format!(
                "expected {} values per line, found {}: {}",
                arity,
                n,
                line.trim()
            )
            .into());
        }

        let point = Point3::new(values[0], values[1], values[2]);
        let sample = match arity {
            3 => Sample::unoriented(point),
            6 => Sample::new(point, Vector3::new(values[3], values[4], values[5])),
            _ => {
                return Err("each point must be given by 3 or 6 values: x y z [nx ny nz]".into());
            }
        };
        min = Point3::new(min.x.min(point.x), min.y.min(point.y), min.z.min(point.z));
        max = Point3::new(max.x.max(point.x), max.y.max(point.y), max.z.max(point.z));
        samples.push(sample);
    }

    if samples.is_empty() {
        return Err("the input contains no points".into());
    }
    info!("{} points read", samples.len());

    let (origin, size, depth) = loose_cube(&min, &max, min_radius);
    let mut octree = Octree::new(depth.unwrap_or(0));
    octree.initialize(origin, size);
    octree.add_points(samples);
    Ok(octree)
}

/// Compute the loose bounding cube for a cloud with the given per-axis
/// extents: the largest extent inflated by 10%, then — when `min_radius`
/// is positive — rounded up to a power-of-two multiple of `min_radius` so
/// the leaf side equals the radius, with the slack split into equal
/// margins. Without a radius the cube keeps a flat 5% margin and no depth
/// is prescribed.
///
/// The returned depth is clamped into `[1, 30]`: the lower bound keeps the
/// cube side at least twice the radius even for degenerate (single-point)
/// clouds, the upper keeps the `u32` locational codes in range.
pub fn loose_cube(min: &Point3, max: &Point3, min_radius: f64) -> (Point3, f64, Option<u32>) {
    let extent = (max.x - min.x).max(max.y - min.y).max(max.z - min.z);
    let mut size = 1.1 * extent;

    let (margin, depth) = if min_radius > 0.0 {
        let depth = ((size / min_radius).log2().ceil() as i64).clamp(1, 30) as u32;
        let adapted = (1u64 << depth) as f64 * min_radius;
        let margin = 0.5 * (adapted - size);
        size = adapted;
        (margin, Some(depth))
    } else {
        (0.05 * size, None)
    };

    let origin = Point3::new(min.x - margin, min.y - margin, min.z - margin);
    (origin, size, depth)
}

/// Write the selected samples as an OFF file: the header, a count line,
/// then one sample per line.
pub fn write_off(path: &Path, octree: &Octree, n_selected: usize) -> Result<()> {
    let file =
        File::create(path).map_err(|e| format!("could not create {}: {}", path.display(), e))?;
    let mut writer = BufWriter::new(file);
    writeln!(writer, "OFF")?;
    writeln!(writer, "{}\t0\t0", n_selected)?;
    write_selected(&mut writer, octree)?;
    writer.flush()?;
    Ok(())
}

/// Write the selected samples as bare ASCII lines.
pub fn write_asc(path: &Path, octree: &Octree) -> Result<()> {
    let file =
        File::create(path).map_err(|e| format!("could not create {}: {}", path.display(), e))?;
    let mut writer = BufWriter::new(file);
    write_selected(&mut writer, octree)?;
    writer.flush()?;
    Ok(())
}

/// Write every selected sample in depth-first leaf order, tab separated
/// with 8-digit fixed precision.
pub fn write_selected<W: Write>(writer: &mut W, octree: &Octree) -> Result<()> {
    write_node(writer, octree, octree.root())
}

fn write_node<W: Write>(writer: &mut W, octree: &Octree, cell: usize) -> Result<()> {
    let node = octree.node(cell);
    if node.depth() != 0 {
        for child in node.children() {
            write_node(writer, octree, child)?;
        }
    } else {
        for &sid in node.sample_ids() {
            let sample = octree.sample(sid);
            if sample.is_selected() {
                writeln!(
                    writer,
                    "{:.8}\t{:.8}\t{:.8}\t{:.8}\t{:.8}\t{:.8}",
                    sample.point.x,
                    sample.point.y,
                    sample.point.z,
                    sample.normal.x,
                    sample.normal.y,
                    sample.normal.z
                )?;
            }
        }
    }
    Ok(())
}
