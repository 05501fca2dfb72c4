use std::ops::Sub;

use nalgebra::{DefaultAllocator, DimName, OPoint, Point3, Scalar, allocator::Allocator};
use simba::simd::{SimdPartialOrd, SimdValue};

use super::{Axis, FloatType, WorldBox, WorldPoint};

#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct AABB<Point> {
    pub min: Point,
    pub max: Point,
}

impl<Point> AABB<Point> {
    pub fn new(min: Point, max: Point) -> AABB<Point> {
        AABB { min, max }
    }

    pub fn map<Point2, F: FnMut(&Point) -> Point2>(&self, mut f: F) -> AABB<Point2> {
        AABB {
            min: f(&self.min),
            max: f(&self.max),
        }
    }

    pub fn zip_map<Point2, Point3, F: FnMut(&Point, &Point2) -> Point3>(
        &self,
        rhs: &AABB<Point2>,
        mut f: F,
    ) -> AABB<Point3> {
        AABB {
            min: f(&self.min, &rhs.min),
            max: f(&self.max, &rhs.max),
        }
    }

    pub fn zip_apply<Point2, F: FnMut(&mut Point, &Point2)>(
        &mut self,
        rhs: &AABB<Point2>,
        mut f: F,
    ) {
        f(&mut self.min, &rhs.min);
        f(&mut self.max, &rhs.max);
    }
}

impl<T: Scalar, D: DimName> AABB<OPoint<T, D>>
where
    DefaultAllocator: Allocator<D>,
{
    pub fn map_coords<T2: Scalar, F: FnMut(T) -> T2>(&self, mut f: F) -> AABB<OPoint<T2, D>> {
        self.map(|x| x.map(&mut f))
    }

    pub fn zip_map_coords<T2: Scalar, T3: Scalar, F: FnMut(T, T2) -> T3>(
        &self,
        rhs: &AABB<OPoint<T2, D>>,
        mut f: F,
    ) -> AABB<OPoint<T3, D>> {
        self.zip_map(rhs, |x, y| OPoint {
            coords: x.coords.zip_map(&y.coords, &mut f),
        })
    }

    pub fn zip_apply_coords<T2: Scalar, F: FnMut(&mut T, T2)>(
        &mut self,
        rhs: &AABB<OPoint<T2, D>>,
        mut f: F,
    ) {
        self.zip_apply(rhs, |x, y| x.coords.zip_apply(&y.coords, &mut f))
    }
}

impl<Point: Sub + Copy> AABB<Point> {
    pub fn size(&self) -> Point::Output {
        self.max - self.min
    }
}

impl<T: Scalar + SimdPartialOrd> AABB<Point3<T>> {
    /// Smallest box containing both self and the other box.
    pub fn union(&self, other: &Self) -> Self {
        AABB {
            min: self.min.inf(&other.min),
            max: self.max.sup(&other.max),
        }
    }

    /// Grows the box to contain the given box.
    pub fn expand(&mut self, min: &Point3<T>, max: &Point3<T>) {
        self.min = self.min.inf(min);
        self.max = self.max.sup(max);
    }
}

impl WorldBox {
    /// Box that contains nothing and is the identity for `union`.
    pub fn empty() -> WorldBox {
        AABB {
            min: WorldPoint::from([FloatType::INFINITY; 3]),
            max: WorldPoint::from([FloatType::NEG_INFINITY; 3]),
        }
    }

    pub fn is_empty(&self) -> bool {
        (0..3).any(|i| self.min[i] > self.max[i])
    }

    pub fn extent(&self, axis: Axis) -> FloatType {
        self.max[axis.index()] - self.min[axis.index()]
    }

    /// Axis with the largest extent, ties prefer the later axis.
    pub fn longest_axis(&self) -> Axis {
        let size = self.size();
        if size.x > size.y {
            if size.x > size.z { Axis::X } else { Axis::Z }
        } else if size.y > size.z {
            Axis::Y
        } else {
            Axis::Z
        }
    }

    pub fn contains(&self, other: &WorldBox) -> bool {
        (0..3).all(|i| self.min[i] <= other.min[i] && other.max[i] <= self.max[i])
    }
}

impl<Point> From<[Point; 2]> for AABB<Point> {
    fn from(value: [Point; 2]) -> Self {
        let [min, max] = value;
        AABB { min, max }
    }
}

impl<Point> From<(Point, Point)> for AABB<Point> {
    fn from(value: (Point, Point)) -> Self {
        let (min, max) = value;
        AABB { min, max }
    }
}

impl<T: SimdValue + Scalar, D: DimName> SimdValue for AABB<OPoint<T, D>>
where
    T::Element: SimdValue + Scalar,
    DefaultAllocator: Allocator<D>,
{
    const LANES: usize = T::LANES;

    type Element = AABB<OPoint<T::Element, D>>;

    type SimdBool = T::SimdBool;

    fn splat(val: Self::Element) -> Self {
        val.map_coords(|x| T::splat(x))
    }

    fn extract(&self, i: usize) -> Self::Element {
        self.map_coords(|x| x.extract(i))
    }

    unsafe fn extract_unchecked(&self, i: usize) -> Self::Element {
        unsafe { self.map_coords(|x| x.extract_unchecked(i)) }
    }

    fn replace(&mut self, i: usize, val: Self::Element) {
        self.zip_apply_coords(&val, |x, y| x.replace(i, y));
    }

    unsafe fn replace_unchecked(&mut self, i: usize, val: Self::Element) {
        unsafe {
            self.zip_apply_coords(&val, |x, y| x.replace_unchecked(i, y));
        }
    }

    fn select(self, cond: Self::SimdBool, other: Self) -> Self {
        self.zip_map_coords(&other, |x, y| x.select(cond, y))
    }
}
