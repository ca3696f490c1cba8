use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::Parser;
use disksample::{io, Octree, Result, SampleSelection};
use env_logger::Env;
use log::info;

/// Poisson-disk subsampling of a 3D point cloud: selects a subset of the
/// input in which no two points lie within the given radius of each other
/// while every input point stays within the radius of a selected one.
#[derive(Parser)]
#[clap(author, version, about)]
struct Args {
    /// Input cloud, one `x y z` or `x y z nx ny nz` line per point
    #[clap(short, long)]
    input: PathBuf,

    /// Output prefix; `_seeds.off` or `_seeds.asc` is appended
    #[clap(short, long)]
    output: String,

    /// Minimum separation radius between selected points
    #[clap(short, long)]
    radius: f64,

    /// Write bare ASCII lines instead of an OFF file
    #[clap(short, long)]
    ascii: bool,

    /// Use the sequential greedy scan instead of parallel dart throwing
    #[clap(short, long)]
    greedy: bool,
}

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stdout)
        .init();

    if let Err(e) = run(Args::parse()) {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    if args.radius <= 0.0 {
        return Err("the radius must be positive".into());
    }

    let start = Instant::now();
    let octree = io::read_cloud(&args.input, args.radius)?;
    info!("octree with depth {} created", octree.depth());
    info!(
        "octree contains {} points; the bounding cube side is {}",
        octree.n_points(),
        octree.size()
    );
    info!("reading and sorting the points took {:?}", start.elapsed());
    log_level_stats(&octree);

    let start = Instant::now();
    let mut selection = SampleSelection::new(&octree, args.radius)?;
    if args.greedy {
        selection.select_greedy();
    } else {
        selection.select_dart_throwing();
    }
    info!("{} selected points", selection.n_selected());
    info!("selecting the points took {:?}", start.elapsed());

    let start = Instant::now();
    if args.ascii {
        let output = format!("{}_seeds.asc", args.output);
        io::write_asc(Path::new(&output), &octree)?;
        info!("wrote {}", output);
    } else {
        let output = format!("{}_seeds.off", args.output);
        io::write_off(Path::new(&output), &octree, selection.n_selected())?;
        info!("wrote {}", output);
    }
    info!(
        "cover rate (average number of times a point is covered): {}",
        octree.cover_rate()
    );
    info!("saving the points took {:?}", start.elapsed());

    Ok(())
}

/// Mean number of points per non-empty cell at each level, from the
/// coarsest down to the leaves.
fn log_level_stats(octree: &Octree) {
    let counts = octree.non_empty_cells();
    for level in (0..octree.depth()).rev() {
        let cells = counts[level as usize];
        if cells == 0 {
            continue;
        }
        let side = octree.size() / (1u64 << (octree.depth() - level)) as f64;
        info!(
            "level {} : size {} ; mean number of points: {}",
            level,
            side,
            octree.n_points() as f64 / cells as f64
        );
    }
}
