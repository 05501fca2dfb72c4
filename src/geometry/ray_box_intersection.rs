use nalgebra::Point3;

use crate::geometry::{AABB, Ray, SimdFloat};

pub trait RayIntersectionExt<T: SimdFloat> {
    /// Calculate first and last ray intersection with the box
    fn intersect(&self, ray: &Ray<T>) -> (T, T);
}

impl<T: SimdFloat> RayIntersectionExt<T> for AABB<Point3<T>> {
    /// Calculates ray intersection with the box, one box per lane.
    /// Returns minimum and maximum distance along the ray, ray intersects if min <= max.
    /// The ray's own `t_min..t_max` range is not applied here.
    fn intersect(&self, ray: &Ray<T>) -> (T, T) {
        // The multiplication is NAN if the ray is starting inside the slab bounding plane
        // and is parallel to it. In this case we blend to +-infinity, so that the range becomes infinite
        let to_box_min = (self.min - ray.origin)
            .component_mul(&ray.inv_direction)
            .map(|x| T::neg_infinity().select(x.is_nan(), x));
        let to_box_max = (self.max - ray.origin)
            .component_mul(&ray.inv_direction)
            .map(|x| T::infinity().select(x.is_nan(), x));

        let componentwise_min_t = to_box_min.zip_map(&to_box_max, |a, b| a.simd_min(b));
        let componentwise_max_t = to_box_min.zip_map(&to_box_max, |a, b| a.simd_max(b));

        let min_t = componentwise_min_t
            .x
            .simd_max(componentwise_min_t.y.simd_max(componentwise_min_t.z));
        let max_t = componentwise_max_t
            .x
            .simd_min(componentwise_max_t.y.simd_min(componentwise_max_t.z));

        (min_t, max_t)
    }
}

#[cfg(test)]
pub mod test {
    use assert2::{assert, let_assert};
    use simba::simd::{SimdBool as _, SimdPartialOrd as _, SimdValue};
    use test_case::{test_case, test_matrix};

    use super::*;

    use crate::geometry::{SimdFloatType, WorldBox, WorldBox8, WorldPoint, WorldVector};

    fn unit_box() -> WorldBox {
        WorldBox::new([5.0, 5.0, 5.0].into(), [10.0, 10.0, 10.0].into())
    }

    /// Rays starting in or on the box, or pointing at it from outside, always hit it
    /// and both reported distances land on the box surface.
    #[test_matrix(
        [5.0, 7.0, 10.0],
        [5.0, 7.0, 10.0],
        [5.0, 7.0, 10.0],
        [-1.0, 0.0, 2.0],
        [-1.0, 0.0, 2.0],
        [-1.0, 0.0, 2.0],
        [-10.0, 0.0, 5.0]
    )]
    fn hit(px: f32, py: f32, pz: f32, dx: f32, dy: f32, dz: f32, origin_pos: f32) {
        if dx == 0.0 && dy == 0.0 && dz == 0.0 {
            return;
        }

        let b = unit_box();
        let d = WorldVector::new(dx, dy, dz);
        let origin = Ray::new(WorldPoint::new(px, py, pz), d).point_at(origin_pos);
        let r = Ray::new(origin, d);

        let_assert!(Some((t1, t2)) = scalar_result(b.intersect(&r)));

        let p1 = r.point_at(t1);
        let p2 = r.point_at(t2);

        assert!(point_is_on_box_surface(&p1, &b), "{p1:?} must be on {b:?}");
        assert!(point_is_on_box_surface(&p2, &b), "{p2:?} must be on {b:?}");
    }

    /// Wide boxes give the same answer in every lane as the scalar box.
    #[test_matrix(
        [0.0, 7.0, 12.0],
        [-1.0, 0.0, 1.0],
        [-1.0, 0.5]
    )]
    fn wide_matches_scalar(p: f32, dx: f32, dy: f32) {
        let b = unit_box();
        let r = Ray::new(WorldPoint::new(p, 7.0, 0.0), WorldVector::new(dx, dy, 1.0));

        let scalar = b.intersect(&r);
        let wide = WorldBox8::splat(b).intersect(&Ray::<SimdFloatType>::splat(r));

        for i in 0..SimdFloatType::LANES {
            assert!(wide.0.extract(i) == scalar.0);
            assert!(wide.1.extract(i) == scalar.1);
        }
    }

    /// Just a manual example of ray grazing along an edge.
    #[test]
    fn hit_along_edge() {
        let r = Ray::new(
            WorldPoint::new(5.0, 5.0, 0.0),
            WorldVector::new(0.0, 0.0, 1.0),
        );

        assert!(scalar_result(unit_box().intersect(&r)) == Some((5.0, 10.0)))
    }

    /// Rays that lie parallel to one axis and start outside the corresponding slab
    /// must miss, even if they move toward the box on other axes.
    #[test_case( 0.0,  7.0,  7.0,   0.0, 1.0, 0.0 ; "low_x_parallel_miss")]
    #[test_case(12.0,  7.0,  7.0,   0.0, 1.0, 0.0 ; "high_x_parallel_miss")]
    #[test_case( 7.0,  0.0,  7.0,   1.0, 0.0, 0.0 ; "low_y_parallel_miss")]
    #[test_case( 7.0, 12.0,  7.0,   1.0, 0.0, 0.0 ; "high_y_parallel_miss")]
    #[test_case( 7.0,  7.0,  0.0,   1.0, 0.0, 0.0 ; "low_z_parallel_miss")]
    #[test_case( 7.0,  7.0, 12.0,   1.0, 0.0, 0.0 ; "high_z_parallel_miss")]
    #[test_case( 0.0,  5.0,  7.0,   1.0, 0.0, 1.0 ; "corner_miss")]
    #[test_case( 0.0,  0.0,  0.0,  -1.0, 1.0, 1.0 ; "corner_miss2")]
    fn only_misses(px: f32, py: f32, pz: f32, dx: f32, dy: f32, dz: f32) {
        let r = Ray::new(WorldPoint::new(px, py, pz), WorldVector::new(dx, dy, dz));
        let wide = WorldBox8::splat(unit_box()).intersect(&Ray::<SimdFloatType>::splat(r));

        assert!(scalar_result(unit_box().intersect(&r)) == None);
        assert!(wide.0.simd_gt(wide.1).all());
    }

    fn scalar_result((t1, t2): (f32, f32)) -> Option<(f32, f32)> {
        const TOLERANCE: f32 = 1e-3;

        if t1 <= t2 {
            Some((t1, t2))
        } else if t1 <= t2 + TOLERANCE {
            let t = (t1 + t2) / 2.0;
            Some((t, t))
        } else {
            None
        }
    }

    fn point_is_on_box_surface(p: &WorldPoint, b: &WorldBox) -> bool {
        const TOLERANCE: f32 = 1e-3;

        let inside = (0..3).all(|i| p[i] >= b.min[i] - TOLERANCE && p[i] <= b.max[i] + TOLERANCE);
        let on_face = (0..3).any(|i| {
            (p[i] - b.min[i]).abs() <= TOLERANCE || (p[i] - b.max[i]).abs() <= TOLERANCE
        });

        inside && on_face
    }
}
