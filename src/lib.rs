pub mod bih;
pub mod geometry;
pub mod util;

pub use bih::{Bih, BihStatistics, BuildError, BuildSettings, Frustum, Hit, Primitive, scene_bounds};
