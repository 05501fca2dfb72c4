use std::{
    sync::atomic::{AtomicU32, Ordering},
    time::Instant,
};

use index_vec::IndexVec;
use rayon::prelude::*;

use super::{
    Bih, BuildError, BuildSettings, Primitive,
    bucket::{Bucket, group_buckets, morton_sort},
    node::{BLOCK_NODES, Block, BlockIdx, FIRST_BOUNDARY_NODE, Node},
};
use crate::geometry::{Axis, FloatType, WorldBox};

impl Bih {
    /// Builds the hierarchy over the primitives, reordering them in place.
    ///
    /// `scene_bounds` must contain all primitives, see [`super::scene_bounds`].
    /// Leaves of the returned tree refer to positions in the reordered slice.
    pub fn build<P: Primitive + Send>(
        primitives: &mut [P],
        scene_bounds: &WorldBox,
        settings: &BuildSettings,
    ) -> Result<Bih, BuildError> {
        settings.validate()?;
        if primitives.len() >= u32::MAX as usize {
            return Err(BuildError::TooManyPrimitives {
                count: primitives.len(),
            });
        }

        let start = Instant::now();
        let count = primitives.len();

        let codes;
        let mode = if count >= settings.bucket_threshold {
            log::debug!("Building {count} primitives with the bucket builder");
            codes = morton_sort(primitives, scene_bounds);
            Mode::Bucket {
                codes: &codes,
                level: 0,
                buckets: group_buckets(primitives, &codes, 0, 0),
            }
        } else {
            log::debug!("Building {count} primitives with the direct builder");
            Mode::Direct
        };

        let context = BuildContext::new(settings);
        let built = context.build_block(
            BlockIdx::from_raw(0),
            NodeWork {
                primitives,
                offset: 0,
                bounds: *scene_bounds,
                depth: 0,
                mode,
            },
        );

        let block_count = context.next_block.into_inner() as usize;
        let mut blocks: IndexVec<BlockIdx, Block> =
            IndexVec::from_vec(vec![Block::default(); block_count]);
        for (index, block) in built {
            blocks[index] = block;
        }

        let bih = Bih {
            blocks,
            scene_bounds: *scene_bounds,
        };

        log::info!(
            "Built hierarchy over {} primitives: {} blocks in {:?}",
            count,
            bih.blocks.len(),
            start.elapsed()
        );
        log::debug!("{}", bih.statistics());

        Ok(bih)
    }
}

/// Shared state of one build.
pub(super) struct BuildContext<'s> {
    pub(super) settings: &'s BuildSettings,
    /// Next unallocated block, block 0 is the root.
    next_block: AtomicU32,
}

/// A node that still needs to be built.
pub(super) struct NodeWork<'p, P> {
    pub(super) primitives: &'p mut [P],
    /// Position of `primitives` in the whole primitive slice.
    pub(super) offset: usize,
    pub(super) bounds: WorldBox,
    pub(super) depth: usize,
    pub(super) mode: Mode<'p>,
}

#[derive(Clone, Debug)]
pub(super) enum Mode<'p> {
    Direct,
    /// Primitives are in Morton order, `codes` are parallel to `NodeWork::primitives`.
    /// `buckets` partition the node by the Morton digit at `level`.
    Bucket {
        codes: &'p [u32],
        level: u32,
        buckets: Vec<Bucket>,
    },
}

pub(super) enum Split<'p, P> {
    Leaf(Node),
    Internal {
        axis: Axis,
        left_split: FloatType,
        right_split: FloatType,
        children: [NodeWork<'p, P>; 2],
    },
}

impl<'p, P> NodeWork<'p, P> {
    pub(super) fn leaf(&self) -> Split<'p, P> {
        Split::Leaf(Node::leaf(self.offset..self.offset + self.primitives.len()))
    }

    /// Splits the work at `left_count` primitives into two children one level deeper.
    pub(super) fn into_children(
        self,
        left_count: usize,
        bounds: [WorldBox; 2],
        modes: [Mode<'p>; 2],
    ) -> [NodeWork<'p, P>; 2] {
        let (left, right) = self.primitives.split_at_mut(left_count);
        let [left_mode, right_mode] = modes;
        let [left_bounds, right_bounds] = bounds;

        [
            NodeWork {
                primitives: left,
                offset: self.offset,
                bounds: left_bounds,
                depth: self.depth + 1,
                mode: left_mode,
            },
            NodeWork {
                primitives: right,
                offset: self.offset + left_count,
                bounds: right_bounds,
                depth: self.depth + 1,
                mode: right_mode,
            },
        ]
    }
}

impl<'s> BuildContext<'s> {
    pub(super) fn new(settings: &'s BuildSettings) -> Self {
        BuildContext {
            settings,
            next_block: AtomicU32::new(1),
        }
    }

    /// Fills one block breadth first, then builds the blocks below it.
    /// Returns every finished block of the subtree with its index.
    pub(super) fn build_block<'p, P: Primitive + Send>(
        &self,
        index: BlockIdx,
        root: NodeWork<'p, P>,
    ) -> Vec<(BlockIdx, Block)> {
        let mut block = Block::default();
        let mut slots: [Option<NodeWork<'p, P>>; BLOCK_NODES] = Default::default();
        slots[0] = Some(root);

        let mut boundary = Vec::new();

        for i in 0..BLOCK_NODES {
            let Some(work) = slots[i].take() else {
                continue;
            };

            match self.split(work) {
                Split::Leaf(node) => block[i] = node,
                Split::Internal {
                    axis,
                    left_split,
                    right_split,
                    children: [left, right],
                } => {
                    block[i] = Node::Internal {
                        axis,
                        left_split,
                        right_split,
                        child_block: BlockIdx::from_raw(0),
                    };
                    if i < FIRST_BOUNDARY_NODE {
                        slots[2 * i + 1] = Some(left);
                        slots[2 * i + 2] = Some(right);
                    } else {
                        boundary.push((i, left, right));
                    }
                }
            }
        }

        if boundary.is_empty() {
            return vec![(index, block)];
        }

        let first = self
            .next_block
            .fetch_add(2 * boundary.len() as u32, Ordering::Relaxed);

        let mut tasks = Vec::with_capacity(2 * boundary.len());
        for (j, (slot, left, right)) in boundary.into_iter().enumerate() {
            let child_block = BlockIdx::from_raw(first + 2 * j as u32);
            if let Node::Internal {
                child_block: ref mut link,
                ..
            } = block[slot]
            {
                *link = child_block;
            }
            tasks.push((child_block, left));
            tasks.push((child_block + 1, right));
        }

        let primitive_count: usize = tasks.iter().map(|(_, work)| work.primitives.len()).sum();

        let mut ret: Vec<(BlockIdx, Block)> = if primitive_count >= self.settings.parallel_threshold
        {
            tasks
                .into_par_iter()
                .flat_map_iter(|(child, work)| self.build_block(child, work))
                .collect()
        } else {
            tasks
                .into_iter()
                .flat_map(|(child, work)| self.build_block(child, work))
                .collect()
        };
        ret.push((index, block));
        ret
    }

    fn split<'p, P: Primitive>(&self, mut work: NodeWork<'p, P>) -> Split<'p, P> {
        match std::mem::replace(&mut work.mode, Mode::Direct) {
            Mode::Direct => self.split_direct(work),
            Mode::Bucket {
                codes,
                level,
                buckets,
            } => self.split_buckets(work, codes, level, buckets),
        }
    }

    /// Splits the node's box in the middle of its longest axis.
    /// If all primitives end up on one side the box is shrunk and the split retried.
    pub(super) fn split_direct<'p, P: Primitive>(&self, mut work: NodeWork<'p, P>) -> Split<'p, P> {
        loop {
            if work.primitives.len() <= self.settings.max_leaf_size
                || work.depth >= self.settings.max_depth
            {
                return work.leaf();
            }

            let axis = work.bounds.longest_axis();
            let a = axis.index();
            // Also catches NaN extent
            if !(work.bounds.extent(axis) > 0.0) {
                return work.leaf();
            }

            let split = (work.bounds.min[a] + work.bounds.max[a]) * 0.5;
            let partition = partition(work.primitives, axis, split);

            if partition.left_count == work.primitives.len() {
                work.bounds.max[a] = split.min(partition.max_left);
                work.depth += 1;
                continue;
            }
            if partition.left_count == 0 {
                work.bounds.min[a] = split.max(partition.min_right);
                work.depth += 1;
                continue;
            }

            let mut left_bounds = work.bounds;
            left_bounds.max[a] = shrink_max(work.bounds.min[a], split, partition.max_left);
            let mut right_bounds = work.bounds;
            right_bounds.min[a] = shrink_min(split, work.bounds.max[a], partition.min_right);

            return Split::Internal {
                axis,
                left_split: partition.max_left,
                right_split: partition.min_right,
                children: work.into_children(
                    partition.left_count,
                    [left_bounds, right_bounds],
                    [Mode::Direct, Mode::Direct],
                ),
            };
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
struct Partition {
    left_count: usize,
    /// Highest point of the left side along the axis.
    max_left: FloatType,
    /// Lowest point of the right side along the axis.
    min_right: FloatType,
}

/// Moves primitives with center at or below `split` to the front.
fn partition<P: Primitive>(primitives: &mut [P], axis: Axis, split: FloatType) -> Partition {
    let a = axis.index();
    let mut max_left = FloatType::NEG_INFINITY;
    let mut min_right = FloatType::INFINITY;

    let mut i = 0;
    let mut j = primitives.len();
    while i < j {
        if primitives[i].center(axis) <= split {
            max_left = max_left.max(primitives[i].highest_point()[a]);
            i += 1;
        } else {
            j -= 1;
            min_right = min_right.min(primitives[i].lowest_point()[a]);
            primitives.swap(i, j);
        }
    }

    Partition {
        left_count: i,
        max_left,
        min_right,
    }
}

/// Halves the upper bound of `min..max` while it stays above `target`.
fn shrink_max(min: FloatType, mut max: FloatType, target: FloatType) -> FloatType {
    let mut step = (max - min) * 0.5;
    while step > 0.0 && min + step > target {
        max = min + step;
        step *= 0.5;
    }
    max
}

/// Halves the lower bound of `min..max` while it stays below `target`.
fn shrink_min(mut min: FloatType, max: FloatType, target: FloatType) -> FloatType {
    let mut step = (max - min) * 0.5;
    while step > 0.0 && max - step < target {
        min = max - step;
        step *= 0.5;
    }
    min
}
