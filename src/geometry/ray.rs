use nalgebra::{Point3, Scalar, Vector3};
use num_traits::{One as _, Zero};
use simba::simd::{SimdPartialOrd as _, SimdValue};

use super::{FloatType, SimdFloat};
use crate::util::simba::simd_windows;

/// Ray, or a group of rays with one ray per SIMD lane.
/// Intersections are only valid in the parametric range `t_min..t_max`.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Ray<T: Scalar = FloatType> {
    pub origin: Point3<T>,
    /// Normalized direction of the ray
    pub direction: Vector3<T>,

    /// Componentwise inverse of the ray direction
    /// Zeros in direction get turned into positive infinity regardless of the sign of the zero
    pub inv_direction: Vector3<T>,

    pub t_min: T,
    pub t_max: T,
}

impl<T: Scalar + Zero> Default for Ray<T> {
    fn default() -> Self {
        Ray {
            origin: Point3::default(),
            direction: Vector3::zeros(),
            inv_direction: Vector3::zeros(),
            t_min: T::zero(),
            t_max: T::zero(),
        }
    }
}

impl<T: SimdFloat> Ray<T> {
    /// Creates a ray valid from the origin to infinity.
    pub fn new(origin: Point3<T>, direction: Vector3<T>) -> Ray<T> {
        let direction = direction.normalize();
        let inv_direction = direction.map(|x| {
            T::infinity().select(x.simd_eq(T::zero()), T::one() / x)
        });

        Ray {
            origin,
            direction,
            inv_direction,
            t_min: T::zero(),
            t_max: T::infinity(),
        }
    }

    pub fn with_range(self, t_min: T, t_max: T) -> Ray<T> {
        Ray {
            t_min,
            t_max,
            ..self
        }
    }

    pub fn point_at(&self, distance: T) -> Point3<T> {
        self.origin + self.direction * distance
    }

    /// Lanes whose direction points toward negative values on the given axis.
    pub fn negative_direction(&self, axis: usize) -> T::SimdBool {
        self.inv_direction[axis].simd_lt(T::zero())
    }
}

/// Packs scalar rays into groups of `T::LANES` rays.
/// Lanes of the last group that have no ray to hold get a copy of the first ray
/// with an empty range, so that they never produce hits and keep the packet
/// direction signs consistent.
pub fn pack_rays<T: SimdFloat>(rays: &[Ray]) -> Vec<Ray<T>>
where
    T::SimdBool: SimdValue,
    <T::SimdBool as SimdValue>::Element: From<bool>,
{
    let Some(first) = rays.first() else {
        return Vec::new();
    };
    let padding = Ray::<T>::splat(first.with_range(FloatType::INFINITY, FloatType::NEG_INFINITY));

    simd_windows::<Ray<T>>(rays.iter().copied())
        .map(|(group, mask)| group.select(mask, padding))
        .collect()
}

impl<T: SimdValue + Scalar> SimdValue for Ray<T>
where
    T::Element: Scalar,
{
    const LANES: usize = T::LANES;
    type Element = Ray<T::Element>;
    type SimdBool = T::SimdBool;

    fn splat(val: Self::Element) -> Self {
        Ray {
            origin: val.origin.map(T::splat),
            direction: val.direction.map(T::splat),
            inv_direction: val.inv_direction.map(T::splat),
            t_min: T::splat(val.t_min),
            t_max: T::splat(val.t_max),
        }
    }

    fn extract(&self, i: usize) -> Self::Element {
        Ray {
            origin: self.origin.map(|x| x.extract(i)),
            direction: self.direction.map(|x| x.extract(i)),
            inv_direction: self.inv_direction.map(|x| x.extract(i)),
            t_min: self.t_min.extract(i),
            t_max: self.t_max.extract(i),
        }
    }

    unsafe fn extract_unchecked(&self, i: usize) -> Self::Element {
        unsafe {
            Ray {
                origin: self.origin.map(|x| x.extract_unchecked(i)),
                direction: self.direction.map(|x| x.extract_unchecked(i)),
                inv_direction: self.inv_direction.map(|x| x.extract_unchecked(i)),
                t_min: self.t_min.extract_unchecked(i),
                t_max: self.t_max.extract_unchecked(i),
            }
        }
    }

    fn replace(&mut self, i: usize, val: Self::Element) {
        self.origin
            .coords
            .zip_apply(&val.origin.coords, |x, y| x.replace(i, y));
        self.direction
            .zip_apply(&val.direction, |x, y| x.replace(i, y));
        self.inv_direction
            .zip_apply(&val.inv_direction, |x, y| x.replace(i, y));
        self.t_min.replace(i, val.t_min);
        self.t_max.replace(i, val.t_max);
    }

    unsafe fn replace_unchecked(&mut self, i: usize, val: Self::Element) {
        unsafe {
            self.origin
                .coords
                .zip_apply(&val.origin.coords, |x, y| x.replace_unchecked(i, y));
            self.direction
                .zip_apply(&val.direction, |x, y| x.replace_unchecked(i, y));
            self.inv_direction
                .zip_apply(&val.inv_direction, |x, y| x.replace_unchecked(i, y));
            self.t_min.replace_unchecked(i, val.t_min);
            self.t_max.replace_unchecked(i, val.t_max);
        }
    }

    fn select(self, cond: Self::SimdBool, other: Self) -> Self {
        Ray {
            origin: self
                .origin
                .coords
                .zip_map(&other.origin.coords, |x, y| x.select(cond, y))
                .into(),
            direction: self
                .direction
                .zip_map(&other.direction, |x, y| x.select(cond, y)),
            inv_direction: self
                .inv_direction
                .zip_map(&other.inv_direction, |x, y| x.select(cond, y)),
            t_min: self.t_min.select(cond, other.t_min),
            t_max: self.t_max.select(cond, other.t_max),
        }
    }
}
