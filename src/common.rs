pub mod points;

pub use points::{dist, dist2};
