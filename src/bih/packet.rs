use std::ops::{ControlFlow, Range};

use arrayvec::ArrayVec;
use assert2::debug_assert;
use nalgebra::Point3;
use simba::simd::{SimdBool as _, SimdValue};

use super::{
    Bih, Hit, MAX_DEPTH, Primitive,
    frustum::Frustum,
    node::{Node, NodeId},
    ray_bih_intersection::{all_done, initial_best, nearer_hit, nearest_hit, no_lanes},
};
use crate::geometry::{AABB, FloatType, Ray, RayIntersectionExt as _, SimdFloat, WorldBox};

/// Number of lane groups traced together, longer inputs are processed in chunks.
pub const MAX_PACKET_GROUPS: usize = 64;
/// Packets with at most this many groups fall back to lane traversal when their rays disagree.
const MINIMUM_PACKET_GROUPS: usize = 1;

enum Answer<'a, T: SimdValue> {
    Nearest(&'a mut [Option<Hit>]),
    AnyNearer(&'a mut [T::SimdBool]),
}

struct PacketState<'a, T: SimdFloat> {
    rays: &'a [Ray<T>],
    best: Vec<T>,
    answer: Answer<'a, T>,
}

impl<T: SimdFloat> PacketState<'_, T> {
    /// Lanes of the group that can still find a hit.
    fn live_lanes(&self, group: usize) -> T::SimdBool {
        let best = self.best[group];
        best.simd_gt(T::neg_infinity()) & self.rays[group].t_min.simd_le(best)
    }

    /// Furthest distance any of the groups still cares about.
    fn prune_bound(&self, groups: &[usize]) -> FloatType {
        groups
            .iter()
            .map(|&g| self.best[g].simd_horizontal_max())
            .fold(FloatType::NEG_INFINITY, FloatType::max)
    }

    fn finished(&self) -> bool {
        self.best.iter().all(|best| all_done(*best))
    }

    fn lanes(&self, groups: &[usize]) -> ArrayVec<(usize, T::SimdBool), MAX_PACKET_GROUPS> {
        groups
            .iter()
            .map(|&g| (g, self.live_lanes(g)))
            .filter(|(_, mask)| mask.any())
            .collect()
    }
}

/// Subtree waiting to be traversed by the whole packet.
#[derive(Copy, Clone, Debug)]
struct FrustumEntry {
    node: NodeId,
    /// Region of space the node's primitives lie in.
    bounds: WorldBox,
    t_min: FloatType,
    t_max: FloatType,
}

impl Bih {
    /// Nearest hit for every lane of every ray group.
    ///
    /// All rays must share direction signs on each axis.
    /// `hits` holds one item per lane, in the order of the groups.
    pub fn nearest_packet<T: SimdFloat, P: Primitive>(
        &self,
        primitives: &[P],
        rays: &[Ray<T>],
        hits: &mut [Option<Hit>],
    ) {
        debug_assert!(hits.len() == rays.len() * T::LANES);
        for (rays, hits) in rays
            .chunks(MAX_PACKET_GROUPS)
            .zip(hits.chunks_mut(MAX_PACKET_GROUPS * T::LANES))
        {
            hits.fill(None);
            let mut state = PacketState {
                rays,
                best: rays.iter().map(|ray| initial_best(ray, ray.t_max)).collect(),
                answer: Answer::Nearest(hits),
            };
            self.trace_packet(primitives, &mut state);
        }
    }

    /// For every lane, checks whether something is hit closer than the matching lane of `t`.
    ///
    /// All rays must share direction signs on each axis.
    pub fn any_nearer_packet<T: SimdFloat, P: Primitive>(
        &self,
        primitives: &[P],
        rays: &[Ray<T>],
        t: &[T],
        closer: &mut [T::SimdBool],
    ) {
        debug_assert!(t.len() == rays.len());
        debug_assert!(closer.len() == rays.len());
        for ((rays, t), closer) in rays
            .chunks(MAX_PACKET_GROUPS)
            .zip(t.chunks(MAX_PACKET_GROUPS))
            .zip(closer.chunks_mut(MAX_PACKET_GROUPS))
        {
            closer.fill(no_lanes::<T>());
            let mut state = PacketState {
                rays,
                best: rays
                    .iter()
                    .zip(t)
                    .map(|(ray, t)| initial_best(ray, t.simd_min(ray.t_max)))
                    .collect(),
                answer: Answer::AnyNearer(closer),
            };
            self.trace_packet(primitives, &mut state);
        }
    }

    fn trace_packet<T: SimdFloat, P: Primitive>(&self, primitives: &[P], state: &mut PacketState<T>) {
        let groups: ArrayVec<usize, MAX_PACKET_GROUPS> = (0..state.rays.len()).collect();
        if let Some(start) = self.packet_entry(state, &groups) {
            let _ = self.traverse_packet(primitives, state, &groups, start);
        }
    }

    /// Clips the packet against the scene bounds.
    fn packet_entry<T: SimdFloat>(&self, state: &PacketState<T>, groups: &[usize]) -> Option<FrustumEntry> {
        let scene = AABB::<Point3<T>>::splat(self.scene_bounds);
        let mut t_min = FloatType::INFINITY;
        let mut t_max = FloatType::NEG_INFINITY;

        for &g in groups {
            let ray = &state.rays[g];
            let (t0, t1) = scene.intersect(ray);
            let entry = t0.simd_max(ray.t_min);
            let exit = t1.simd_min(state.best[g]);
            let live = entry.simd_le(exit);
            t_min = t_min.min(entry.select(live, T::infinity()).simd_horizontal_min());
            t_max = t_max.max(exit.select(live, T::neg_infinity()).simd_horizontal_max());
        }

        (t_min <= t_max).then_some(FrustumEntry {
            node: NodeId::root(),
            bounds: self.scene_bounds,
            t_min,
            t_max,
        })
    }

    /// Traverses the subtree at `start` with the given groups as one frustum.
    /// Breaks once every lane of the whole packet is finished.
    fn traverse_packet<T: SimdFloat, P: Primitive>(
        &self,
        primitives: &[P],
        state: &mut PacketState<T>,
        groups: &[usize],
        start: FrustumEntry,
    ) -> ControlFlow<()> {
        let Some(frustum) = Frustum::new(state.rays, &state.best, &state.lanes(groups)) else {
            return ControlFlow::Continue(());
        };
        let mut stack = ArrayVec::<FrustumEntry, MAX_DEPTH>::new();
        let mut current = Some(start);

        loop {
            let mut entry = match current.take().or_else(|| stack.pop()) {
                Some(entry) => entry,
                None => return ControlFlow::Continue(()),
            };

            let bound = state.prune_bound(groups);
            if bound == FloatType::NEG_INFINITY {
                return ControlFlow::Continue(());
            }
            entry.t_max = entry.t_max.min(bound);
            if !(entry.t_min <= entry.t_max) {
                continue;
            }

            loop {
                let (axis, left_split, right_split, child_block) = match *self.node(entry.node) {
                    Node::Leaf { .. } => {
                        let range = self.node(entry.node).primitives();
                        if let Some(range) = range.filter(|range| !range.is_empty()) {
                            self.visit_packet_leaf(primitives, state, &frustum, groups, &entry, range)?;
                        }
                        break;
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
                let mut left_bounds = entry.bounds;
                left_bounds.max[a] = left_bounds.max[a].min(left_split);
                let mut right_bounds = entry.bounds;
                right_bounds.min[a] = right_bounds.min[a].max(right_split);

                let ((near, near_bounds, near_split), (far, far_bounds, far_split)) =
                    if frustum.negative(a) {
                        ((right, right_bounds, right_split), (left, left_bounds, left_split))
                    } else {
                        ((left, left_bounds, left_split), (right, right_bounds, right_split))
                    };

                let (min_near, max_near) = frustum.plane_range(a, near_split);
                let (min_far, max_far) = frustum.plane_range(a, far_split);

                let skip_near = entry.t_min > max_near;
                let skip_far = entry.t_max < min_far;
                if skip_near && skip_far {
                    break;
                }

                let disagree = (min_near < entry.t_min && entry.t_min < max_near)
                    || (min_far < entry.t_max && entry.t_max < max_far);
                if disagree {
                    if groups.len() > MINIMUM_PACKET_GROUPS {
                        let (first, second) = groups.split_at(groups.len() / 2);
                        self.traverse_packet(primitives, state, first, entry)?;
                        self.traverse_packet(primitives, state, second, entry)?;
                    } else {
                        for &g in groups {
                            self.traverse_group(primitives, state, g, &entry)?;
                        }
                    }
                    break;
                }

                let near_entry = FrustumEntry {
                    node: near,
                    bounds: near_bounds,
                    t_min: entry.t_min,
                    t_max: entry.t_max.min(max_near),
                };
                let far_entry = FrustumEntry {
                    node: far,
                    bounds: far_bounds,
                    t_min: entry.t_min.max(min_far),
                    t_max: entry.t_max,
                };

                if skip_near {
                    entry = far_entry;
                } else if skip_far {
                    entry = near_entry;
                } else {
                    debug_assert!(!stack.is_full(), "Traversal stack overflow");
                    let _ = stack.try_push(far_entry);
                    entry = near_entry;
                }
            }
        }
    }

    /// Finishes the subtree for a single group with lane traversal.
    fn traverse_group<T: SimdFloat, P: Primitive>(
        &self,
        primitives: &[P],
        state: &mut PacketState<T>,
        group: usize,
        entry: &FrustumEntry,
    ) -> ControlFlow<()> {
        let ray = &state.rays[group];
        let best = &mut state.best[group];
        let start = self.clipped_entry(entry.node, &entry.bounds, ray, *best);

        match &mut state.answer {
            Answer::Nearest(hits) => {
                let hits = &mut hits[group * T::LANES..(group + 1) * T::LANES];
                self.nearest_lanes_from(primitives, ray, start, best, hits);
            }
            Answer::AnyNearer(closer) => {
                let _ = self.any_nearer_lanes_from(primitives, ray, start, best, &mut closer[group]);
            }
        }

        if state.finished() {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    }

    fn visit_packet_leaf<T: SimdFloat, P: Primitive>(
        &self,
        primitives: &[P],
        state: &mut PacketState<T>,
        frustum: &Frustum,
        groups: &[usize],
        entry: &FrustumEntry,
        range: Range<usize>,
    ) -> ControlFlow<()> {
        let mut lanes = state.lanes(groups);
        let mut frustum = frustum.clone();
        if !frustum.adapt_to_leaf(state.rays, &state.best, &entry.bounds, &mut lanes) {
            return ControlFlow::Continue(());
        }

        let rays = state.rays;
        for index in range {
            let primitive = &primitives[index];
            if !frustum.may_hit(&primitive.bounding_box()) {
                continue;
            }

            for &(g, _) in &lanes {
                let best = &mut state.best[g];
                match &mut state.answer {
                    Answer::Nearest(hits) => {
                        let hits = &mut hits[g * T::LANES..(g + 1) * T::LANES];
                        nearest_hit(primitive, index, &rays[g], best, hits);
                    }
                    Answer::AnyNearer(closer) => {
                        nearer_hit(primitive, &rays[g], best, &mut closer[g]);
                    }
                }
            }

            if state.finished() {
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }
}
