use std::ops::{ControlFlow, Range};

use arrayvec::ArrayVec;
use assert2::debug_assert;
use nalgebra::Point3;
use num_traits::{One as _, Zero as _};
use simba::simd::{SimdBool as _, SimdPartialOrd as _, SimdValue};

use super::{Bih, Hit, MAX_DEPTH, Primitive, node::Node, node::NodeId};
use crate::{
    geometry::{AABB, Ray, RayIntersectionExt as _, SimdFloat, WorldBox},
    util::{bit_iter, simba::lane_bits},
};

/// Node waiting to be traversed with the parametric range of each lane inside it.
#[derive(Copy, Clone, Debug)]
pub(super) struct StackEntry<T> {
    pub node: NodeId,
    pub t_min: T,
    pub t_max: T,
}

impl Bih {
    /// Finds the closest primitive hit by the ray within its valid range.
    /// Index of the hit refers to the primitive order after building.
    pub fn nearest<P: Primitive>(&self, primitives: &[P], ray: &Ray) -> Option<Hit> {
        let mut hits = [None];
        self.nearest_lanes(primitives, ray, &mut hits);
        hits[0]
    }

    /// Checks whether any primitive is hit closer than `t` (and within the ray's range).
    pub fn any_nearer<P: Primitive>(&self, primitives: &[P], ray: &Ray, t: f32) -> bool {
        self.any_nearer_lanes(primitives, ray, t)
    }

    /// Nearest hit for every lane of the ray, written to `hits` (one item per lane).
    pub fn nearest_lanes<T: SimdFloat, P: Primitive>(
        &self,
        primitives: &[P],
        ray: &Ray<T>,
        hits: &mut [Option<Hit>],
    ) {
        debug_assert!(hits.len() == T::LANES);
        hits.fill(None);

        let mut best = initial_best(ray, ray.t_max);
        let start = self.clipped_entry(NodeId::root(), &self.scene_bounds, ray, best);
        self.nearest_lanes_from(primitives, ray, start, &mut best, hits);
    }

    /// Mask of lanes that hit something closer than `t`.
    pub fn any_nearer_lanes<T: SimdFloat, P: Primitive>(
        &self,
        primitives: &[P],
        ray: &Ray<T>,
        t: T,
    ) -> T::SimdBool {
        let mut closer = no_lanes::<T>();
        let mut best = initial_best(ray, t.simd_min(ray.t_max));
        let start = self.clipped_entry(NodeId::root(), &self.scene_bounds, ray, best);
        let _ = self.any_nearer_lanes_from(primitives, ray, start, &mut best, &mut closer);
        closer
    }

    /// Entry for a node occupying `bounds`, with each lane's range clipped to the box.
    pub(super) fn clipped_entry<T: SimdFloat>(
        &self,
        node: NodeId,
        bounds: &WorldBox,
        ray: &Ray<T>,
        best: T,
    ) -> StackEntry<T> {
        let (t_min, t_max) = AABB::<Point3<T>>::splat(*bounds).intersect(ray);
        StackEntry {
            node,
            t_min: t_min.simd_max(ray.t_min),
            t_max: t_max.simd_min(ray.t_max).simd_min(best),
        }
    }

    pub(super) fn nearest_lanes_from<T: SimdFloat, P: Primitive>(
        &self,
        primitives: &[P],
        ray: &Ray<T>,
        start: StackEntry<T>,
        best: &mut T,
        hits: &mut [Option<Hit>],
    ) {
        let _ = self.traverse_lanes(ray, start, best, |range, best| {
            for index in range {
                nearest_hit(&primitives[index], index, ray, best, hits);
            }
            ControlFlow::Continue(())
        });
    }

    /// Lanes that find a hit are marked in `closer` and get their `best` set to
    /// negative infinity, so that nothing else is searched for them.
    pub(super) fn any_nearer_lanes_from<T: SimdFloat, P: Primitive>(
        &self,
        primitives: &[P],
        ray: &Ray<T>,
        start: StackEntry<T>,
        best: &mut T,
        closer: &mut T::SimdBool,
    ) -> ControlFlow<()> {
        if all_done(*best) {
            return ControlFlow::Break(());
        }
        self.traverse_lanes(ray, start, best, |range, best| {
            for primitive in &primitives[range] {
                nearer_hit(primitive, ray, best, closer);
                if all_done(*best) {
                    return ControlFlow::Break(());
                }
            }
            ControlFlow::Continue(())
        })
    }

    /// Walks the tree front to back from `start`, calling `visit_leaf` with the
    /// primitive range of every leaf that some lane can reach before its best hit.
    fn traverse_lanes<T: SimdFloat>(
        &self,
        ray: &Ray<T>,
        start: StackEntry<T>,
        best: &mut T,
        mut visit_leaf: impl FnMut(Range<usize>, &mut T) -> ControlFlow<()>,
    ) -> ControlFlow<()> {
        let negative = direction_signs(ray);
        let mut stack = ArrayVec::<StackEntry<T>, MAX_DEPTH>::new();
        let mut current = Some(start);

        loop {
            let entry = match current.take() {
                Some(entry) => entry,
                None => match pop_live(&mut stack, *best) {
                    Some(entry) => entry,
                    None => return ControlFlow::Continue(()),
                },
            };

            if let Some(range) = self.find_leaf(ray, &negative, entry, &mut stack) {
                visit_leaf(range, best)?;
            }
        }
    }

    /// Descends from the entry until a leaf is reached, pushing far children
    /// that also need visiting. Returns `None` if the descent ends in empty space.
    fn find_leaf<T: SimdFloat>(
        &self,
        ray: &Ray<T>,
        negative: &[bool; 3],
        mut entry: StackEntry<T>,
        stack: &mut ArrayVec<StackEntry<T>, MAX_DEPTH>,
    ) -> Option<Range<usize>> {
        loop {
            let active = entry.t_min.simd_le(entry.t_max);
            if active.none() {
                return None;
            }

            let (axis, left_split, right_split, child_block) = match *self.node(entry.node) {
                Node::Leaf { .. } => {
                    return self
                        .node(entry.node)
                        .primitives()
                        .filter(|range| !range.is_empty());
                }
                Node::Internal {
                    axis,
                    left_split,
                    right_split,
                    child_block,
                } => (axis, left_split, right_split, child_block),
            };

            let a = axis.index();
            let [left, right] = entry.node.children(child_block);
            let (near_split, far_split, near, far) = if negative[a] {
                (right_split, left_split, right, left)
            } else {
                (left_split, right_split, left, right)
            };

            let origin = ray.origin[a];
            let inv_direction = ray.inv_direction[a];
            let near_t = (T::splat(near_split) - origin) * inv_direction;
            let near_t = T::infinity().select(near_t.is_nan(), near_t);
            let far_t = (T::splat(far_split) - origin) * inv_direction;
            let far_t = T::neg_infinity().select(far_t.is_nan(), far_t);

            let visit_near = active & entry.t_min.simd_le(near_t);
            let visit_far = active & entry.t_max.simd_ge(far_t);

            match (visit_near.any(), visit_far.any()) {
                (false, false) => return None,
                (false, true) => {
                    entry = StackEntry {
                        node: far,
                        t_min: entry.t_min.simd_max(far_t),
                        t_max: entry.t_max,
                    };
                }
                (true, false) => {
                    entry = StackEntry {
                        node: near,
                        t_min: entry.t_min,
                        t_max: entry.t_max.simd_min(near_t),
                    };
                }
                (true, true) => {
                    let far_entry = StackEntry {
                        node: far,
                        t_min: entry.t_min.simd_max(far_t),
                        t_max: entry.t_max,
                    };
                    debug_assert!(!stack.is_full(), "Traversal stack overflow");
                    let _ = stack.try_push(far_entry);
                    entry = StackEntry {
                        node: near,
                        t_min: entry.t_min,
                        t_max: entry.t_max.simd_min(near_t),
                    };
                }
            }
        }
    }
}

/// Intersects one primitive with all lanes, recording hits closer than `best`.
pub(super) fn nearest_hit<T: SimdFloat, P: Primitive>(
    primitive: &P,
    index: usize,
    ray: &Ray<T>,
    best: &mut T,
    hits: &mut [Option<Hit>],
) {
    let t = primitive.intersect_lanes(ray);
    let mask = t.simd_ge(ray.t_min) & t.simd_lt(*best);
    if mask.none() {
        return;
    }
    *best = t.select(mask, *best);
    for lane in bit_iter(lane_bits(mask, T::LANES)) {
        hits[lane] = Some(Hit {
            index,
            t: t.extract(lane),
        });
    }
}

/// Marks lanes hitting the primitive closer than `best` and retires them.
pub(super) fn nearer_hit<T: SimdFloat, P: Primitive>(
    primitive: &P,
    ray: &Ray<T>,
    best: &mut T,
    closer: &mut T::SimdBool,
) {
    let t = primitive.intersect_lanes(ray);
    let mask = t.simd_ge(ray.t_min) & t.simd_lt(*best);
    *closer = *closer | mask;
    *best = T::neg_infinity().select(mask, *best);
}

/// Pops entries until one has a lane that may still improve on `best`.
fn pop_live<T: SimdFloat>(
    stack: &mut ArrayVec<StackEntry<T>, MAX_DEPTH>,
    best: T,
) -> Option<StackEntry<T>> {
    while let Some(mut entry) = stack.pop() {
        let live = entry.t_min.simd_lt(best) & entry.t_min.simd_le(entry.t_max);
        if live.any() {
            entry.t_max = entry.t_max.simd_min(best);
            return Some(entry);
        }
    }
    None
}

/// Sign of the direction per axis, shared by all lanes.
fn direction_signs<T: SimdFloat>(ray: &Ray<T>) -> [bool; 3] {
    [0, 1, 2].map(|axis| {
        let negative = ray.negative_direction(axis);
        debug_assert!(
            negative.all() || negative.none(),
            "Lanes of a ray group must share direction signs"
        );
        negative.any()
    })
}

/// Upper bound for active lanes, negative infinity for lanes with an empty range.
pub(super) fn initial_best<T: SimdFloat>(ray: &Ray<T>, bound: T) -> T {
    let active = ray.t_min.simd_le(ray.t_max);
    bound.select(active, T::neg_infinity())
}

pub(super) fn all_done<T: SimdFloat>(best: T) -> bool {
    best.simd_eq(T::neg_infinity()).all()
}

pub(super) fn no_lanes<T: SimdFloat>() -> T::SimdBool {
    T::one().simd_lt(T::zero())
}
