use thiserror::Error;

/// Capacity of the traversal stacks, upper limit for `BuildSettings::max_depth`.
pub const MAX_DEPTH: usize = 100;

/// Parameters of the tree construction.
#[derive(Clone, Debug, PartialEq, bon::Builder)]
pub struct BuildSettings {
    /// Nodes with at most this many primitives become leaves.
    #[builder(default = 5)]
    pub max_leaf_size: usize,

    /// Depth budget of the tree, retried splits count against it too.
    #[builder(default = MAX_DEPTH)]
    pub max_depth: usize,

    /// Scenes with at least this many primitives are built with the Morton bucket builder.
    #[builder(default = 1 << 20)]
    pub bucket_threshold: usize,

    /// Bucket builder nodes with at most this many primitives switch to direct splitting.
    #[builder(default = 256)]
    pub bucket_handoff_size: usize,

    /// Child blocks holding at least this many primitives in total are built in parallel.
    #[builder(default = 4096)]
    pub parallel_threshold: usize,
}

impl Default for BuildSettings {
    fn default() -> Self {
        BuildSettings::builder().build()
    }
}

impl BuildSettings {
    pub fn validate(&self) -> Result<(), BuildError> {
        if self.max_leaf_size == 0 {
            return Err(BuildError::InvalidLeafSize);
        }
        if self.max_depth == 0 || self.max_depth > MAX_DEPTH {
            return Err(BuildError::InvalidDepth {
                depth: self.max_depth,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BuildError {
    #[error("Maximum leaf size must be at least 1")]
    InvalidLeafSize,

    #[error("Maximum depth {depth} is outside of 1..={}", MAX_DEPTH)]
    InvalidDepth { depth: usize },

    #[error("{count} primitives can't be addressed by the leaf encoding")]
    TooManyPrimitives { count: usize },
}

#[cfg(test)]
mod test {
    use super::*;
    use assert2::{assert, let_assert};
    use test_case::test_case;

    #[test]
    fn default_matches_builder() {
        let settings = BuildSettings::default();
        assert!(settings == BuildSettings::builder().build());
        assert!(settings.max_leaf_size == 5);
        assert!(settings.max_depth == MAX_DEPTH);
        assert!(settings.bucket_threshold == 1 << 20);
        assert!(settings.bucket_handoff_size == 256);
        assert!(settings.parallel_threshold == 4096);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn zero_leaf_size_is_rejected() {
        let settings = BuildSettings::builder().max_leaf_size(0).build();
        assert!(settings.validate() == Err(BuildError::InvalidLeafSize));
    }

    #[test_case(0)]
    #[test_case(MAX_DEPTH + 1)]
    fn depth_out_of_range_is_rejected(depth: usize) {
        let settings = BuildSettings::builder().max_depth(depth).build();
        let_assert!(Err(BuildError::InvalidDepth { depth: reported }) = settings.validate());
        assert!(reported == depth);
    }

    #[test]
    fn error_messages() {
        assert!(BuildError::InvalidDepth { depth: 0 }.to_string() == "Maximum depth 0 is outside of 1..=100");
    }
}
