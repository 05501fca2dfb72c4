//! Bounding interval hierarchy over a slice of primitives.
//!
//! Nodes are stored in blocks of seven forming complete binary trees of depth 3.
//! Each internal node keeps two clipping planes along one axis, the left child
//! owns everything below `left_split`, the right child everything above `right_split`.

mod bucket;
mod building;
mod frustum;
mod node;
mod packet;
mod primitive;
mod printing;
mod ray_bih_intersection;
mod settings;

use index_vec::IndexVec;

pub use frustum::Frustum;
pub use node::{Block, BlockIdx, Node, NodeId};
pub use packet::MAX_PACKET_GROUPS;
pub use primitive::{Primitive, scene_bounds};
pub use printing::BihStatistics;
pub use settings::{BuildError, BuildSettings, MAX_DEPTH};

use crate::geometry::{FloatType, WorldBox};

#[derive(Clone, Debug)]
pub struct Bih {
    blocks: IndexVec<BlockIdx, Block>,
    scene_bounds: WorldBox,
}

/// Primitive hit by a ray.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Hit {
    /// Index into the primitive slice as reordered by [`Bih::build`].
    pub index: usize,
    /// Distance along the ray.
    pub t: FloatType,
}

impl Bih {
    /// Bounds the tree was built for.
    pub fn scene_bounds(&self) -> &WorldBox {
        &self.scene_bounds
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.blocks[id.block][id.node as usize]
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use crate::geometry::{
        Ray, SimdFloatType4, Triangle, WorldPoint, WorldVector, pack_rays, test::TriangleSoupWrapper,
    };
    use assert2::{assert, let_assert};
    use ordered_float::OrderedFloat;
    use proptest::prop_assert;
    use simba::simd::{SimdPartialOrd as _, SimdValue as _};
    use test_strategy::proptest;

    pub fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    /// Checks that every primitive index is in exactly one leaf, returns the number of indices.
    pub fn leaf_coverage(bih: &Bih) -> usize {
        let mut indices = subtree_primitives(bih, NodeId::root());
        indices.sort();
        assert!(indices.iter().enumerate().all(|(i, index)| i == *index));
        indices.len()
    }

    fn subtree_primitives(bih: &Bih, id: NodeId) -> Vec<usize> {
        match *bih.node(id) {
            Node::Internal { child_block, .. } => id
                .children(child_block)
                .into_iter()
                .flat_map(|child| subtree_primitives(bih, child))
                .collect(),
            ref leaf => leaf.primitives().into_iter().flatten().collect(),
        }
    }

    /// Closest hit within `t_min <= t < t_max` by testing every primitive.
    pub fn brute_force_nearest<P: Primitive>(primitives: &[P], ray: &Ray) -> Option<Hit> {
        primitives
            .iter()
            .enumerate()
            .filter_map(|(index, p)| Some(Hit { index, t: p.intersect(ray)? }))
            .filter(|hit| hit.t >= ray.t_min && hit.t < ray.t_max)
            .min_by_key(|hit| OrderedFloat(hit.t))
    }

    fn build(triangles: &mut [Triangle<WorldPoint>], use_buckets: bool) -> Bih {
        init_logging();
        let bounds = scene_bounds(triangles);
        let settings = BuildSettings::builder()
            .max_leaf_size(3)
            .bucket_threshold(if use_buckets { 0 } else { usize::MAX })
            .bucket_handoff_size(8)
            .build();
        Bih::build(triangles, &bounds, &settings).unwrap()
    }

    #[proptest]
    fn leaves_cover_primitives(soup: TriangleSoupWrapper, use_buckets: bool) {
        let mut triangles = soup.0.clone();
        let bih = build(&mut triangles, use_buckets);
        prop_assert!(leaf_coverage(&bih) == triangles.len());
    }

    #[proptest]
    fn planes_contain_subtrees(soup: TriangleSoupWrapper, use_buckets: bool) {
        let mut triangles = soup.0.clone();
        let bih = build(&mut triangles, use_buckets);

        let mut stack = vec![NodeId::root()];
        while let Some(id) = stack.pop() {
            let Node::Internal {
                axis,
                left_split,
                right_split,
                child_block,
            } = *bih.node(id)
            else {
                continue;
            };
            let a = axis.index();
            let [left, right] = id.children(child_block);

            for i in subtree_primitives(&bih, left) {
                prop_assert!(triangles[i].highest_point()[a] <= left_split);
            }
            for i in subtree_primitives(&bih, right) {
                prop_assert!(triangles[i].lowest_point()[a] >= right_split);
            }
            stack.extend([left, right]);
        }
    }

    #[proptest]
    fn build_keeps_primitives(soup: TriangleSoupWrapper, use_buckets: bool) {
        let mut triangles = soup.0.clone();
        let bih = build(&mut triangles, use_buckets);

        let key = |t: &Triangle<WorldPoint>| -> [[OrderedFloat<f32>; 3]; 3] {
            t.vertices().map(|v| v.coords.map(OrderedFloat).into())
        };
        let mut before: Vec<_> = soup.iter().map(key).collect();
        let mut after: Vec<_> = triangles.iter().map(key).collect();
        before.sort();
        after.sort();
        prop_assert!(before == after);
        prop_assert!(bih.scene_bounds() == &scene_bounds(&triangles));
        prop_assert!(triangles.iter().all(|t| bih.scene_bounds().contains(&t.bounding_box())));
    }

    #[test]
    fn rebuilding_gives_same_shape() {
        init_logging();
        let mut triangles: Vec<_> = (0..50)
            .map(|i| {
                let p = WorldPoint::new((i * 7 % 13) as f32, (i * 3 % 5) as f32, i as f32 * 0.1);
                Triangle::new(p, p + WorldVector::x(), p + WorldVector::y())
            })
            .collect();
        let bounds = scene_bounds(&triangles);
        let a = Bih::build(&mut triangles, &bounds, &BuildSettings::default()).unwrap();
        let b = Bih::build(&mut triangles, &bounds, &BuildSettings::default()).unwrap();

        assert!(a.statistics() == b.statistics());
        assert!(a.block_count() == b.block_count());
    }

    #[test]
    fn invalid_settings_are_reported() {
        let mut triangles = vec![Triangle::new(
            WorldPoint::origin(),
            WorldPoint::new(1.0, 0.0, 0.0),
            WorldPoint::new(0.0, 1.0, 0.0),
        )];
        let bounds = scene_bounds(&triangles);
        let settings = BuildSettings::builder().max_leaf_size(0).build();
        assert!(Bih::build(&mut triangles, &bounds, &settings).err() == Some(BuildError::InvalidLeafSize));
    }

    #[test]
    fn frustum_of_packed_rays() {
        let direction = WorldVector::new(0.0, 0.0, 1.0);
        let rays = [
            Ray::new(WorldPoint::new(0.0, 0.0, -5.0), direction),
            Ray::new(WorldPoint::new(1.0, 1.0, -5.0), direction),
        ];
        let packed = pack_rays::<SimdFloatType4>(&rays);
        let best = [SimdFloatType4::splat(FloatType::INFINITY)];
        let live = packed[0].t_min.simd_le(packed[0].t_max);

        let_assert!(Some(mut frustum) = Frustum::new(&packed, &best, &[(0, live)]));
        let between = WorldBox::new(WorldPoint::new(0.2, 0.2, 0.0), WorldPoint::new(0.8, 0.8, 1.0));
        let aside = WorldBox::new(WorldPoint::new(3.0, 3.0, 0.0), WorldPoint::new(4.0, 4.0, 1.0));
        assert!(frustum.may_hit(&between));
        assert!(!frustum.may_hit(&aside));
        assert!(frustum.plane_range(2, 0.0) == (5.0, 5.0));

        let mut groups = [(0, live)].into_iter().collect();
        let around_first = WorldBox::new(WorldPoint::new(-0.5, -0.5, 0.0), WorldPoint::new(0.5, 0.5, 1.0));
        assert!(frustum.adapt_to_leaf(&packed, &best, &around_first, &mut groups));
        assert!(!frustum.may_hit(&WorldBox::new(WorldPoint::new(0.9, 0.9, 0.0), WorldPoint::new(1.1, 1.1, 1.0))));
    }
}
