use std::ops::Range;

use crate::geometry::{Axis, FloatType};

/// Number of nodes stored in one block.
pub const BLOCK_NODES: usize = 7;

/// Nodes of a block from this index on have their children in other blocks.
pub const FIRST_BOUNDARY_NODE: usize = 3;

/// Complete binary tree of depth 3: node 0 is the root of the block,
/// children of node `i < FIRST_BOUNDARY_NODE` are `2i + 1` and `2i + 2`.
pub type Block = [Node; BLOCK_NODES];

index_vec::define_index_type! {
    pub struct BlockIdx = u32;
    IMPL_RAW_CONVERSIONS = true;
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Node {
    /// Inclusive range of the permuted primitives, empty if `end < begin`.
    Leaf { begin: u32, end: u32 },
    /// Left child owns `(-inf, left_split]`, right child owns `[right_split, inf)` along the axis.
    /// `child_block` is only meaningful for boundary nodes: the left child is the root of
    /// block `child_block`, the right child is the root of block `child_block + 1`.
    Internal {
        axis: Axis,
        left_split: FloatType,
        right_split: FloatType,
        child_block: BlockIdx,
    },
}

impl Node {
    /// Leaf over a range of primitive indices.
    /// Empty ranges keep their position and are encoded as `begin = start + 1, end = start`.
    pub fn leaf(range: Range<usize>) -> Node {
        debug_assert!(range.end < u32::MAX as usize);
        if range.is_empty() {
            Node::Leaf {
                begin: range.start as u32 + 1,
                end: range.start as u32,
            }
        } else {
            Node::Leaf {
                begin: range.start as u32,
                end: range.end as u32 - 1,
            }
        }
    }

    /// Range of primitives in a leaf, `None` for internal nodes.
    pub fn primitives(&self) -> Option<Range<usize>> {
        match *self {
            Node::Leaf { begin, end } if end < begin => Some(end as usize..end as usize),
            Node::Leaf { begin, end } => Some(begin as usize..end as usize + 1),
            Node::Internal { .. } => None,
        }
    }
}

impl Default for Node {
    fn default() -> Self {
        Node::leaf(0..0)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct NodeId {
    pub block: BlockIdx,
    pub node: u8,
}

impl NodeId {
    pub fn root() -> NodeId {
        NodeId {
            block: BlockIdx::from_raw(0),
            node: 0,
        }
    }

    /// Left and right child of an internal node with the given `child_block`.
    pub fn children(self, child_block: BlockIdx) -> [NodeId; 2] {
        let i = self.node as usize;
        if i < FIRST_BOUNDARY_NODE {
            [2 * i + 1, 2 * i + 2].map(|node| NodeId {
                block: self.block,
                node: node as u8,
            })
        } else {
            [child_block, child_block + 1].map(|block| NodeId { block, node: 0 })
        }
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.block.raw(), self.node)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use assert2::{assert, let_assert};
    use test_case::test_case;
    use test_strategy::proptest;

    #[test]
    fn default_is_empty_leaf() {
        let_assert!(Some(range) = Node::default().primitives());
        assert!(range.is_empty());
        assert!(Node::default() == Node::Leaf { begin: 1, end: 0 });
    }

    #[test_case(0 ; "at_start")]
    #[test_case(17 ; "inside")]
    fn empty_leaf_keeps_position(start: usize) {
        let_assert!(Some(range) = Node::leaf(start..start).primitives());
        assert!(range == (start..start));
    }

    #[proptest]
    fn leaf_range_survives_encoding(#[strategy(0usize..1_000_000)] start: usize, #[strategy(0usize..100)] len: usize) {
        let node = Node::leaf(start..start + len);
        let_assert!(Some(range) = node.primitives());
        assert!(range == (start..start + len));
    }

    #[test_case(0, 1, 2 ; "root")]
    #[test_case(1, 3, 4 ; "left")]
    #[test_case(2, 5, 6 ; "right")]
    fn children_inside_block(node: u8, left: u8, right: u8) {
        let id = NodeId { block: BlockIdx::from_raw(3), node };
        let children = id.children(BlockIdx::from_raw(100));
        assert!(children == [
            NodeId { block: BlockIdx::from_raw(3), node: left },
            NodeId { block: BlockIdx::from_raw(3), node: right },
        ]);
    }

    #[test_case(3)]
    #[test_case(6)]
    fn children_in_other_blocks(node: u8) {
        let id = NodeId { block: BlockIdx::from_raw(3), node };
        let children = id.children(BlockIdx::from_raw(10));
        assert!(children == [
            NodeId { block: BlockIdx::from_raw(10), node: 0 },
            NodeId { block: BlockIdx::from_raw(11), node: 0 },
        ]);
    }
}
