use std::fmt::Display;

use super::{
    Bih,
    node::{Node, NodeId},
};
use crate::util::Stats;

/// Shape of a built hierarchy.
#[derive(Clone, Debug, PartialEq)]
pub struct BihStatistics {
    pub blocks: usize,
    pub internal_nodes: usize,
    pub leaves: usize,
    pub empty_leaves: usize,
    /// Depth of every leaf, the root has depth 0.
    pub leaf_depth: Stats,
    /// Primitive count of every leaf, empty leaves included.
    pub leaf_size: Stats,
}

impl Display for BihStatistics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Blocks: {}", self.blocks)?;
        writeln!(f, "Internal nodes: {}", self.internal_nodes)?;
        writeln!(f, "Leaves: {} ({} empty)", self.leaves, self.empty_leaves)?;
        writeln!(f, "Leaf depth: {}", self.leaf_depth)?;
        write!(f, "Leaf size: {}", self.leaf_size)
    }
}

impl Bih {
    pub fn statistics(&self) -> BihStatistics {
        let mut ret = BihStatistics {
            blocks: self.blocks.len(),
            internal_nodes: 0,
            leaves: 0,
            empty_leaves: 0,
            leaf_depth: Stats::default(),
            leaf_size: Stats::default(),
        };

        let mut stack = vec![(NodeId::root(), 0)];
        while let Some((id, depth)) = stack.pop() {
            match *self.node(id) {
                Node::Internal { child_block, .. } => {
                    ret.internal_nodes += 1;
                    let [left, right] = id.children(child_block);
                    stack.push((right, depth + 1));
                    stack.push((left, depth + 1));
                }
                ref leaf => {
                    let size = leaf.primitives().map_or(0, |range| range.len());
                    ret.leaves += 1;
                    if size == 0 {
                        ret.empty_leaves += 1;
                    }
                    ret.leaf_depth.add_sample(depth);
                    ret.leaf_size.add_sample(size);
                }
            }
        }

        ret
    }

    pub fn print_tree(&self) {
        println!(
            "Scene: {:?}-{:?}",
            self.scene_bounds.min, self.scene_bounds.max
        );
        self.print_recursive(0, NodeId::root());
    }

    fn print_recursive(&self, indent: usize, id: NodeId) {
        let indent_str = "  ".repeat(indent);
        match *self.node(id) {
            Node::Internal {
                axis,
                left_split,
                right_split,
                child_block,
            } => {
                println!("{indent_str}- I{id}: {axis:?} ..{left_split} | {right_split}..");
                for child in id.children(child_block) {
                    self.print_recursive(indent + 1, child);
                }
            }
            ref leaf => {
                let range = leaf.primitives().unwrap_or_default();
                println!("{indent_str}- L{id}: {range:?}");
            }
        }
    }
}
