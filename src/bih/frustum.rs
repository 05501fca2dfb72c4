use arrayvec::ArrayVec;
use assert2::debug_assert;
use nalgebra::Point3;
use simba::simd::{SimdBool as _, SimdPartialOrd as _, SimdValue};

use super::packet::MAX_PACKET_GROUPS;
use crate::geometry::{AABB, FloatType, Ray, RayIntersectionExt as _, SimdFloat, WorldBox, WorldVector};

/// Relative tolerance when deciding that a ray misses a box.
const SLACK: FloatType = 1e-5;

/// Conservative bound of a set of rays sharing direction signs.
///
/// Every ray of the set has its origin in `origin` and its inverse direction
/// in `inv_direction`. Distances derived from the corners of these boxes
/// bound the distances of every individual ray.
#[derive(Clone, Debug)]
pub struct Frustum {
    origin: WorldBox,
    inv_direction: AABB<WorldVector>,
    negative: [bool; 3],
    /// Range of distances that any of the rays still cares about.
    t_min: FloatType,
    t_max: FloatType,
}

impl Frustum {
    /// Bounds the lanes selected by the masks. Returns `None` if no lane is selected.
    pub fn new<T: SimdFloat>(
        rays: &[Ray<T>],
        best: &[T],
        groups: &[(usize, T::SimdBool)],
    ) -> Option<Frustum> {
        let mut origin = WorldBox::empty();
        let mut inv_direction = AABB::new(
            WorldVector::repeat(FloatType::INFINITY),
            WorldVector::repeat(FloatType::NEG_INFINITY),
        );
        let mut t_min = FloatType::INFINITY;
        let mut t_max = FloatType::NEG_INFINITY;
        let mut negative = None;

        for &(g, mask) in groups {
            if mask.none() {
                continue;
            }
            let ray = &rays[g];
            let lowest = |x: T| x.select(mask, T::infinity()).simd_horizontal_min();
            let highest = |x: T| x.select(mask, T::neg_infinity()).simd_horizontal_max();

            for a in 0..3 {
                origin.min[a] = origin.min[a].min(lowest(ray.origin[a]));
                origin.max[a] = origin.max[a].max(highest(ray.origin[a]));
                inv_direction.min[a] = inv_direction.min[a].min(lowest(ray.inv_direction[a]));
                inv_direction.max[a] = inv_direction.max[a].max(highest(ray.inv_direction[a]));
            }
            t_min = t_min.min(lowest(ray.t_min));
            t_max = t_max.max(highest(best[g]));

            let signs = [0, 1, 2].map(|a| {
                let n = ray.negative_direction(a);
                debug_assert!(
                    (n & mask).none() || (!n & mask).none(),
                    "Rays of a packet must share direction signs"
                );
                (n & mask).any()
            });
            debug_assert!(
                negative.is_none_or(|n| n == signs),
                "Rays of a packet must share direction signs"
            );
            negative = Some(signs);
        }

        Some(Frustum {
            origin,
            inv_direction,
            negative: negative?,
            t_min,
            t_max,
        })
    }

    pub fn negative(&self, axis: usize) -> bool {
        self.negative[axis]
    }

    /// Range of distances at which the rays cross the plane `axis = position`.
    /// Unbounded if any corner is undefined.
    pub fn plane_range(&self, axis: usize, position: FloatType) -> (FloatType, FloatType) {
        let mut lo = FloatType::INFINITY;
        let mut hi = FloatType::NEG_INFINITY;
        for o in [self.origin.min[axis], self.origin.max[axis]] {
            for inv in [self.inv_direction.min[axis], self.inv_direction.max[axis]] {
                let t = (position - o) * inv;
                if t.is_nan() {
                    return (FloatType::NEG_INFINITY, FloatType::INFINITY);
                }
                lo = lo.min(t);
                hi = hi.max(t);
            }
        }
        (lo, hi)
    }

    /// Checks whether any of the rays may pass through the box within the frustum's range.
    pub fn may_hit(&self, bounds: &WorldBox) -> bool {
        let mut lo = self.t_min;
        let mut hi = self.t_max;
        for a in 0..3 {
            let (entry, exit) = if self.negative[a] {
                (bounds.max[a], bounds.min[a])
            } else {
                (bounds.min[a], bounds.max[a])
            };
            lo = lo.max(self.plane_range(a, entry).0);
            hi = hi.min(self.plane_range(a, exit).1);
        }
        lo <= with_slack(hi)
    }

    /// Drops lanes that miss the leaf box and shrinks the frustum to the rest.
    /// Returns false if no lane is left.
    pub fn adapt_to_leaf<T: SimdFloat>(
        &mut self,
        rays: &[Ray<T>],
        best: &[T],
        leaf_bounds: &WorldBox,
        groups: &mut ArrayVec<(usize, T::SimdBool), MAX_PACKET_GROUPS>,
    ) -> bool {
        let bounds = AABB::<Point3<T>>::splat(*leaf_bounds);
        let mut t_min = FloatType::INFINITY;
        let mut t_max = FloatType::NEG_INFINITY;

        for (g, mask) in groups.iter_mut() {
            let ray = &rays[*g];
            let (t0, t1) = bounds.intersect(ray);
            let entry = t0.simd_max(ray.t_min);
            let exit = t1.simd_min(best[*g]);
            let slack = T::splat(SLACK) * exit.simd_max(-exit).simd_max(T::splat(1.0));
            *mask = *mask & entry.simd_le(exit + slack);

            t_min = t_min.min(entry.select(*mask, T::infinity()).simd_horizontal_min());
            t_max = t_max.max(exit.select(*mask, T::neg_infinity()).simd_horizontal_max());
        }
        groups.retain(|(_, mask)| mask.any());

        match Frustum::new(rays, best, groups) {
            Some(frustum) => {
                *self = Frustum {
                    t_min: frustum.t_min.max(t_min),
                    t_max: frustum.t_max.min(with_slack(t_max)),
                    ..frustum
                };
                true
            }
            None => false,
        }
    }
}

fn with_slack(t: FloatType) -> FloatType {
    if t.is_finite() {
        t + SLACK * t.abs().max(1.0)
    } else {
        t
    }
}
