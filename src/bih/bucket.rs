use itertools::Itertools as _;
use morton_encoding::morton_encode;

use super::{
    Primitive,
    building::{BuildContext, Mode, NodeWork, Split},
};
use crate::geometry::{FloatType, WorldBox, WorldVector};

const GRID_BITS: u32 = 10;
const GRID_CELLS: u32 = 1 << GRID_BITS;
const DIGIT_MASK: u32 = GRID_CELLS - 1;
/// Number of `GRID_BITS` wide digits in a Morton code.
const LEVELS: u32 = 3;

/// Run of primitives sharing one Morton digit.
/// `begin` and `end` are positions in the whole primitive slice.
#[derive(Clone, Debug, PartialEq)]
pub(super) struct Bucket {
    begin: usize,
    end: usize,
    bounds: WorldBox,
}

impl Bucket {
    fn len(&self) -> usize {
        self.end - self.begin
    }
}

/// Sorts primitives by the Morton code of their centers, quantized on a
/// `GRID_CELLS`^3 grid over the scene bounds.
/// Returns the sorted codes, parallel to the reordered primitives.
pub(super) fn morton_sort<P: Primitive>(primitives: &mut [P], scene_bounds: &WorldBox) -> Vec<u32> {
    let scale = scene_bounds
        .size()
        .map(|size| if size > 0.0 { GRID_CELLS as FloatType / size } else { 0.0 });

    let mut entries: Vec<(u32, u32)> = primitives
        .iter()
        .enumerate()
        .map(|(i, p)| (morton_code(p, scene_bounds, &scale), i as u32))
        .collect();

    radix_sort(&mut entries);

    let mut permutation: Vec<usize> = entries.iter().map(|(_, i)| *i as usize).collect();
    apply_permutation(primitives, &mut permutation);

    entries.into_iter().map(|(code, _)| code).collect()
}

fn morton_code<P: Primitive>(primitive: &P, scene_bounds: &WorldBox, scale: &WorldVector) -> u32 {
    let center = (primitive.lowest_point().coords + primitive.highest_point().coords) * 0.5;
    let grid_coordinates: [u32; 3] = (center - scene_bounds.min.coords)
        .component_mul(scale)
        .map(|x| (x.max(0.0) as u32).min(DIGIT_MASK))
        .into();

    morton_encode(grid_coordinates) as u32
}

/// Stable LSD radix sort of (code, index) pairs by code, one pass per Morton digit.
fn radix_sort(entries: &mut Vec<(u32, u32)>) {
    let mut scratch = vec![(0, 0); entries.len()];

    for pass in 0..LEVELS {
        let shift = pass * GRID_BITS;
        let digit = |code: u32| ((code >> shift) & DIGIT_MASK) as usize;

        let mut offsets = vec![0usize; GRID_CELLS as usize];
        for (code, _) in entries.iter() {
            offsets[digit(*code)] += 1;
        }
        let mut sum = 0;
        for offset in offsets.iter_mut() {
            let count = *offset;
            *offset = sum;
            sum += count;
        }

        for entry in entries.iter() {
            let d = digit(entry.0);
            scratch[offsets[d]] = *entry;
            offsets[d] += 1;
        }

        std::mem::swap(entries, &mut scratch);
    }
}

/// Reorders `items` so that `items[k]` becomes the previous `items[permutation[k]]`.
/// The permutation is consumed.
fn apply_permutation<T>(items: &mut [T], permutation: &mut [usize]) {
    for start in 0..permutation.len() {
        let mut current = start;
        loop {
            let source = permutation[current];
            permutation[current] = current;
            if source == start || source == current {
                break;
            }
            items.swap(current, source);
            current = source;
        }
    }
}

/// Groups a Morton ordered range into runs with the same digit at the given level.
/// `offset` is the position of `primitives` in the whole primitive slice.
pub(super) fn group_buckets<P: Primitive>(
    primitives: &[P],
    codes: &[u32],
    level: u32,
    offset: usize,
) -> Vec<Bucket> {
    let shift = (LEVELS - 1 - level) * GRID_BITS;
    codes
        .iter()
        .zip(primitives)
        .enumerate()
        .chunk_by(|(_, (code, _))| (**code >> shift) & DIGIT_MASK)
        .into_iter()
        .map(|(_, run)| {
            let mut bucket = Bucket {
                begin: usize::MAX,
                end: 0,
                bounds: WorldBox::empty(),
            };
            for (i, (_, p)) in run {
                bucket.begin = bucket.begin.min(offset + i);
                bucket.end = offset + i + 1;
                bucket.bounds.expand(&p.lowest_point(), &p.highest_point());
            }
            bucket
        })
        .collect()
}

/// Index of the first bucket of the right side: the bucket where the
/// cumulative count crosses half of the primitives, keeping both sides non empty.
fn median_bucket(buckets: &[Bucket]) -> usize {
    let total: usize = buckets.iter().map(Bucket::len).sum();
    let mut cumulative = 0;
    let mut split = buckets.len();
    for (i, bucket) in buckets.iter().enumerate() {
        cumulative += bucket.len();
        if 2 * cumulative >= total {
            split = i + 1;
            break;
        }
    }
    split.clamp(1, buckets.len() - 1)
}

fn union(buckets: &[Bucket]) -> WorldBox {
    buckets
        .iter()
        .fold(WorldBox::empty(), |acc, b| acc.union(&b.bounds))
}

impl BuildContext<'_> {
    /// Splits a Morton ordered node along bucket boundaries.
    /// The buckets of the node are split between the children, primitives are only
    /// grouped again when a node moves on to the next Morton digit.
    /// Falls back to direct splitting once the node is small or the code is exhausted.
    pub(super) fn split_buckets<'p, P: Primitive>(
        &self,
        mut work: NodeWork<'p, P>,
        codes: &'p [u32],
        mut level: u32,
        mut buckets: Vec<Bucket>,
    ) -> Split<'p, P> {
        loop {
            if work.primitives.len() <= self.settings.max_leaf_size
                || work.depth >= self.settings.max_depth
            {
                return work.leaf();
            }

            if level >= LEVELS || work.primitives.len() <= self.settings.bucket_handoff_size {
                // Buckets of the node still cover it exactly
                work.bounds = union(&buckets);
                return self.split_direct(work);
            }

            if buckets.len() == 1 {
                level += 1;
                if level < LEVELS {
                    buckets = group_buckets(work.primitives, codes, level, work.offset);
                }
                continue;
            }

            work.bounds = union(&buckets);

            let split = median_bucket(&buckets);
            let right_buckets = buckets.split_off(split);
            let axis = work.bounds.longest_axis();
            let a = axis.index();

            let left_split = buckets
                .iter()
                .map(|b| b.bounds.max[a])
                .fold(FloatType::NEG_INFINITY, FloatType::max);
            let right_split = right_buckets
                .iter()
                .map(|b| b.bounds.min[a])
                .fold(FloatType::INFINITY, FloatType::min);

            let left_count = right_buckets[0].begin - work.offset;
            let bounds = [union(&buckets), union(&right_buckets)];
            let (left_codes, right_codes) = codes.split_at(left_count);
            let modes = [
                Mode::Bucket {
                    codes: left_codes,
                    level,
                    buckets,
                },
                Mode::Bucket {
                    codes: right_codes,
                    level,
                    buckets: right_buckets,
                },
            ];

            return Split::Internal {
                axis,
                left_split,
                right_split,
                children: work.into_children(left_count, bounds, modes),
            };
        }
    }
}
