mod aabb;
mod ray;
mod ray_box_intersection;
mod ray_triangle_intersection;
mod triangle;

pub use aabb::AABB;
pub use ray::{Ray, pack_rays};
pub use ray_box_intersection::RayIntersectionExt;
pub use triangle::Triangle;

use nalgebra::{Point3, Scalar, Vector3};
use simba::simd::{SimdRealField, WideF32x4, WideF32x8};

use crate::util::simba::SimbaWorkarounds;

pub type FloatType = f32;
pub type SimdFloatType = WideF32x8;
pub type SimdFloatType4 = WideF32x4;

pub type WorldPoint = Point3<FloatType>;
pub type WorldVector = Vector3<FloatType>;
pub type WorldBox = AABB<WorldPoint>;

pub type WorldBox8 = AABB<Point3<SimdFloatType>>;

/// Lane type that the traversal can run on.
/// `f32` is the single ray case, the wide types trace 4 or 8 rays at once.
pub trait SimdFloat:
    SimdRealField<Element = FloatType> + SimbaWorkarounds + Scalar + Copy + Default
{
}

impl<T> SimdFloat for T where
    T: SimdRealField<Element = FloatType> + SimbaWorkarounds + Scalar + Copy + Default
{
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    pub fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }
}
