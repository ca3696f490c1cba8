//! Poisson-disk subsampling of 3D point clouds.
//!
//! Given a cloud of (optionally oriented) points and a minimum separation
//! radius `r`, the crate selects a subset in which no two selected samples
//! lie within `r` of each other while every input sample lies within `r` of
//! some selected one. The heavy lifting is done by a loose bounding-box
//! octree ([`Octree`]), a fixed-radius neighborhood query over it
//! ([`RadiusSearch`]), and two selection engines ([`SampleSelection`]): a
//! deterministic greedy scan and a parallel dart thrower.

use std::error::Error;

pub mod common;
pub mod io;
pub mod octree;
pub mod sample;
pub mod selection;

pub type Result<T> = std::result::Result<T, Box<dyn Error>>;

pub type Point3 = parry3d_f64::na::Point3<f64>;
pub type Vector3 = parry3d_f64::na::Vector3<f64>;

pub use octree::node::OctreeNode;
pub use octree::search::RadiusSearch;
pub use octree::Octree;
pub use sample::Sample;
pub use selection::SampleSelection;
