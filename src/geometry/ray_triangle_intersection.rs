use nalgebra::Point3;
use num_traits::{One as _, Zero as _};
use simba::simd::{SimdPartialOrd as _, SimdValue};

use super::{Ray, SimdFloat, Triangle, WorldPoint};

impl Triangle<WorldPoint> {
    /// Calculates intersection of every ray lane with this (two sided) triangle.
    /// Returns the distance along each ray, positive infinity for lanes that miss.
    /// The distance is not limited to the ray's valid range.
    /// Adapted from https://en.wikipedia.org/wiki/M%C3%B6ller%E2%80%93Trumbore_intersection_algorithm#Rust_implementation
    pub fn intersect_lanes<T: SimdFloat>(&self, ray: &Ray<T>) -> T {
        let vertices = Triangle::<Point3<T>>::splat(self.clone());
        let [e1, e2] = vertices.edges();

        let ray_cross_e2 = ray.direction.cross(&e2);
        let det = e1.dot(&ray_cross_e2);

        let inv_det = T::one() / det; // May be infinite
        let s = ray.origin - vertices[0];
        let u = inv_det * s.dot(&ray_cross_e2);

        let s_cross_e1 = s.cross(&e1);
        let v = inv_det * ray.direction.dot(&s_cross_e1);
        let t = inv_det * e2.dot(&s_cross_e1);

        let mask = det.simd_ne(T::zero())
            & u.simd_ge(T::zero())
            & v.simd_ge(T::zero())
            & (u + v).simd_le(T::one());
        t.select(mask, T::infinity())
    }

    /// Single ray version of `intersect_lanes`.
    pub fn intersect_ray(&self, ray: &Ray) -> Option<f32> {
        let t = self.intersect_lanes::<f32>(ray);
        t.is_finite().then_some(t)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::geometry::{SimdFloatType4, WorldVector};
    use assert2::{assert, let_assert};
    use test_case::test_case;

    fn unit_triangle() -> Triangle<WorldPoint> {
        Triangle::new(
            WorldPoint::new(0.0, 0.0, 0.0),
            WorldPoint::new(1.0, 0.0, 0.0),
            WorldPoint::new(0.0, 1.0, 0.0),
        )
    }

    #[test_case(0.25, 0.25, 1.0 ; "front")]
    #[test_case(0.25, 0.25, -1.0 ; "back")]
    #[test_case(0.0, 0.0, 1.0 ; "vertex")]
    #[test_case(0.5, 0.5, 1.0 ; "edge")]
    fn hit(x: f32, y: f32, z_sign: f32) {
        let r = Ray::new(WorldPoint::new(x, y, 2.0 * z_sign), WorldVector::new(0.0, 0.0, -z_sign));
        let_assert!(Some(t) = unit_triangle().intersect_ray(&r));
        assert!((t - 2.0).abs() < 1e-5);
    }

    #[test_case(0.6, 0.6 ; "beyond_hypotenuse")]
    #[test_case(-0.1, 0.5 ; "negative_u")]
    #[test_case(0.5, -0.1 ; "negative_v")]
    fn miss(x: f32, y: f32) {
        let r = Ray::new(WorldPoint::new(x, y, 2.0), WorldVector::new(0.0, 0.0, -1.0));
        assert!(unit_triangle().intersect_ray(&r) == None);
    }

    #[test]
    fn parallel_ray_misses() {
        let r = Ray::new(WorldPoint::new(-1.0, 0.25, 0.0), WorldVector::new(1.0, 0.0, 0.0));
        assert!(unit_triangle().intersect_ray(&r) == None);
    }

    #[test]
    fn behind_origin_gives_negative_distance() {
        let r = Ray::new(WorldPoint::new(0.25, 0.25, -1.0), WorldVector::new(0.0, 0.0, -1.0));
        let_assert!(Some(t) = unit_triangle().intersect_ray(&r));
        assert!((t + 1.0).abs() < 1e-5);
    }

    #[test]
    fn lanes_are_independent() {
        let rays = [
            Ray::new(WorldPoint::new(0.25, 0.25, 3.0), WorldVector::new(0.0, 0.0, -1.0)),
            Ray::new(WorldPoint::new(2.0, 2.0, 3.0), WorldVector::new(0.0, 0.0, -1.0)),
            Ray::new(WorldPoint::new(0.1, 0.1, 1.0), WorldVector::new(0.0, 0.0, -1.0)),
            Ray::new(WorldPoint::new(0.1, 0.1, 1.0), WorldVector::new(1.0, 0.0, 0.0)),
        ];
        let mut packed = Ray::<SimdFloatType4>::splat(rays[0]);
        for (i, r) in rays.iter().enumerate() {
            packed.replace(i, *r);
        }

        let t = unit_triangle().intersect_lanes(&packed);
        for (i, r) in rays.iter().enumerate() {
            let expected = unit_triangle().intersect_ray(r).unwrap_or(f32::INFINITY);
            assert!((t.extract(i) - expected).abs() < 1e-5 || t.extract(i) == expected);
        }
    }
}
