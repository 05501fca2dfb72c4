use simba::simd::SimdValue as _;

use crate::geometry::{AABB, Axis, FloatType, Ray, SimdFloat, Triangle, WorldBox, WorldPoint};

/// Anything that can be stored in the hierarchy.
pub trait Primitive {
    /// Componentwise minimum of the primitive's extent.
    fn lowest_point(&self) -> WorldPoint;
    /// Componentwise maximum of the primitive's extent.
    fn highest_point(&self) -> WorldPoint;

    /// Distance along the ray to the intersection with the primitive, if any.
    /// The distance does not need to be limited to the ray's valid range.
    fn intersect(&self, ray: &Ray) -> Option<FloatType>;

    /// Intersects every lane of the ray, positive infinity marks a miss.
    fn intersect_lanes<T: SimdFloat>(&self, ray: &Ray<T>) -> T {
        let mut ret = T::infinity();
        for i in 0..T::LANES {
            if let Some(t) = self.intersect(&ray.extract(i)) {
                ret.replace(i, t);
            }
        }
        ret
    }

    fn bounding_box(&self) -> WorldBox {
        AABB::new(self.lowest_point(), self.highest_point())
    }

    /// Position used to sort the primitive into one side of a split.
    fn center(&self, axis: Axis) -> FloatType {
        let a = axis.index();
        (self.lowest_point()[a] + self.highest_point()[a]) * 0.5
    }
}

impl<P: Primitive + ?Sized> Primitive for &P {
    fn lowest_point(&self) -> WorldPoint {
        (**self).lowest_point()
    }

    fn highest_point(&self) -> WorldPoint {
        (**self).highest_point()
    }

    fn intersect(&self, ray: &Ray) -> Option<FloatType> {
        (**self).intersect(ray)
    }

    fn intersect_lanes<T: SimdFloat>(&self, ray: &Ray<T>) -> T {
        (**self).intersect_lanes(ray)
    }
}

impl Primitive for Triangle<WorldPoint> {
    fn lowest_point(&self) -> WorldPoint {
        self.lowest()
    }

    fn highest_point(&self) -> WorldPoint {
        self.highest()
    }

    fn intersect(&self, ray: &Ray) -> Option<FloatType> {
        self.intersect_ray(ray)
    }

    fn intersect_lanes<T: SimdFloat>(&self, ray: &Ray<T>) -> T {
        Triangle::intersect_lanes(self, ray)
    }

    fn bounding_box(&self) -> WorldBox {
        self.bounds()
    }
}

/// Union of the extents of all primitives, empty box if there are none.
pub fn scene_bounds<P: Primitive>(primitives: &[P]) -> WorldBox {
    let mut ret = WorldBox::empty();
    for p in primitives {
        ret.expand(&p.lowest_point(), &p.highest_point());
    }
    ret
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::geometry::{SimdFloatType, WorldVector};
    use assert2::assert;
    use simba::simd::SimdValue;

    /// Sphere that only implements the scalar intersection.
    struct Ball {
        center: WorldPoint,
        radius: FloatType,
    }

    impl Primitive for Ball {
        fn lowest_point(&self) -> WorldPoint {
            self.center - WorldVector::repeat(self.radius)
        }

        fn highest_point(&self) -> WorldPoint {
            self.center + WorldVector::repeat(self.radius)
        }

        fn intersect(&self, ray: &Ray) -> Option<FloatType> {
            let to_center = self.center - ray.origin;
            let along = to_center.dot(&ray.direction);
            let d2 = to_center.norm_squared() - along * along;
            let r2 = self.radius * self.radius;
            (d2 <= r2).then(|| along - (r2 - d2).sqrt())
        }
    }

    #[test]
    fn default_lane_intersection_uses_scalar() {
        let ball = Ball {
            center: WorldPoint::new(0.0, 0.0, 10.0),
            radius: 1.0,
        };
        let hit = Ray::new(WorldPoint::origin(), WorldVector::new(0.0, 0.0, 1.0));
        let miss = Ray::new(WorldPoint::origin(), WorldVector::new(1.0, 0.0, 0.0));
        let mut rays = Ray::<SimdFloatType>::splat(miss);
        rays.replace(2, hit);

        let t = ball.intersect_lanes(&rays);
        assert!(t.extract(2) == 9.0);
        assert!(t.extract(0) == FloatType::INFINITY);
        assert!((&ball).intersect_lanes(&rays).extract(2) == 9.0);
    }

    #[test]
    fn center_and_bounds() {
        let ball = Ball {
            center: WorldPoint::new(1.0, 2.0, 3.0),
            radius: 0.5,
        };
        assert!(ball.center(Axis::Y) == 2.0);
        assert!(ball.bounding_box() == WorldBox::new(WorldPoint::new(0.5, 1.5, 2.5), WorldPoint::new(1.5, 2.5, 3.5)));
    }

    #[test]
    fn scene_bounds_of_triangles() {
        let triangles = [
            Triangle::new(WorldPoint::new(0.0, 0.0, 0.0), WorldPoint::new(1.0, 0.0, 0.0), WorldPoint::new(0.0, 1.0, 0.0)),
            Triangle::new(WorldPoint::new(5.0, 5.0, 5.0), WorldPoint::new(5.0, 6.0, 5.0), WorldPoint::new(5.0, 5.0, -2.0)),
        ];
        assert!(scene_bounds(&triangles) == WorldBox::new(WorldPoint::new(0.0, 0.0, -2.0), WorldPoint::new(5.0, 6.0, 5.0)));
        assert!(scene_bounds::<Triangle<WorldPoint>>(&[]).is_empty());
    }
}
