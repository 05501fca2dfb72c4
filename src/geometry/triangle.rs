use std::ops::{Index, Sub};

use nalgebra::{DefaultAllocator, DimName, OPoint, OVector, Point3, Scalar, allocator::Allocator};
use simba::simd::{SimdPartialOrd, SimdValue};

use super::AABB;

#[derive(Clone, Debug, PartialEq)]
pub struct Triangle<Point>([Point; 3]);

impl<Point> Triangle<Point> {
    pub fn new(a: Point, b: Point, c: Point) -> Triangle<Point> {
        Triangle([a, b, c])
    }

    pub fn vertices(&self) -> &[Point; 3] {
        &self.0
    }

    pub fn map<Point2, F: FnMut(&Point) -> Point2>(&self, mut f: F) -> Triangle<Point2> {
        Triangle([f(&self[0]), f(&self[1]), f(&self[2])])
    }

    pub fn zip_map<Point2, Point3, F: FnMut(&Point, &Point2) -> Point3>(
        &self,
        rhs: &Triangle<Point2>,
        mut f: F,
    ) -> Triangle<Point3> {
        Triangle([
            f(&self.0[0], &rhs.0[0]),
            f(&self.0[1], &rhs.0[1]),
            f(&self.0[2], &rhs.0[2]),
        ])
    }

    pub fn zip_apply<Point2, F: FnMut(&mut Point, &Point2)>(
        &mut self,
        rhs: &Triangle<Point2>,
        mut f: F,
    ) {
        for (a, b) in self.0.iter_mut().zip(rhs.0.iter()) {
            f(a, b);
        }
    }
}

impl<Point: Default> Default for Triangle<Point> {
    fn default() -> Self {
        Triangle([Default::default(), Default::default(), Default::default()])
    }
}

impl<Point> Index<usize> for Triangle<Point> {
    type Output = Point;

    fn index(&self, index: usize) -> &Self::Output {
        &self.0[index]
    }
}

impl<T: Scalar, D: DimName> Triangle<OPoint<T, D>>
where
    DefaultAllocator: Allocator<D>,
{
    pub fn map_coords<T2: Scalar, F: FnMut(T) -> T2>(&self, mut f: F) -> Triangle<OPoint<T2, D>> {
        self.map(|x| x.map(&mut f))
    }

    pub fn zip_map_coords<T2: Scalar, T3: Scalar, F: FnMut(T, T2) -> T3>(
        &self,
        rhs: &Triangle<OPoint<T2, D>>,
        mut f: F,
    ) -> Triangle<OPoint<T3, D>> {
        self.zip_map(rhs, |x, y| OPoint {
            coords: x.coords.zip_map(&y.coords, &mut f),
        })
    }

    pub fn zip_apply_coords<T2: Scalar, F: FnMut(&mut T, T2)>(
        &mut self,
        rhs: &Triangle<OPoint<T2, D>>,
        mut f: F,
    ) {
        self.zip_apply(rhs, |x, y| x.coords.zip_apply(&y.coords, &mut f))
    }
}

impl<T: Scalar, D: DimName> Triangle<OPoint<T, D>>
where
    DefaultAllocator: Allocator<D>,
    for<'a> &'a OPoint<T, D>: Sub<Output = OVector<T, D>>,
{
    /// Returns edge vectors, coming from self[0]
    pub fn edges(&self) -> [OVector<T, D>; 2] {
        [&self.0[1] - &self.0[0], &self.0[2] - &self.0[0]]
    }
}

impl<T: Scalar + SimdPartialOrd> Triangle<Point3<T>> {
    /// Componentwise minimum of the vertices.
    pub fn lowest(&self) -> Point3<T> {
        self.0[0].inf(&self.0[1]).inf(&self.0[2])
    }

    /// Componentwise maximum of the vertices.
    pub fn highest(&self) -> Point3<T> {
        self.0[0].sup(&self.0[1]).sup(&self.0[2])
    }

    pub fn bounds(&self) -> AABB<Point3<T>> {
        AABB::new(self.lowest(), self.highest())
    }
}

impl<T: SimdValue + Scalar, D: DimName> SimdValue for Triangle<OPoint<T, D>>
where
    T::Element: Scalar,
    DefaultAllocator: Allocator<D>,
{
    const LANES: usize = T::LANES;
    type Element = Triangle<OPoint<T::Element, D>>;
    type SimdBool = T::SimdBool;

    fn splat(val: Self::Element) -> Self {
        val.map_coords(T::splat)
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
