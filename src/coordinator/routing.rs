//! Range-based shard routing
//!
//! Every node id belongs to exactly one shard range. A transaction involves
//! each shard whose range contains either endpoint, so an edge touches one
//! shard (both endpoints local) or two (cross-shard).

use crate::common::{Error, NodeId, Result, ShardDescriptor, ShardId};

/// Shard table, kept sorted by shard id (the lock-acquisition order).
#[derive(Debug, Clone)]
pub struct ShardRouter {
    shards: Vec<ShardDescriptor>,
}

impl ShardRouter {
    pub fn new(mut shards: Vec<ShardDescriptor>) -> Self {
        shards.sort_by_key(|s| s.shard_id);
        Self { shards }
    }

    pub fn shards(&self) -> &[ShardDescriptor] {
        &self.shards
    }

    /// Shard owning `node`, if any.
    pub fn owner(&self, node: NodeId) -> Option<&ShardDescriptor> {
        self.shards.iter().find(|s| s.range.contains(node))
    }

    /// Shards involved in an edge between `node1` and `node2`, ascending by id.
    pub fn involved(&self, node1: NodeId, node2: NodeId) -> Result<Vec<ShardId>> {
        let ids: Vec<ShardId> = self
            .shards
            .iter()
            .filter(|s| s.range.covers(node1, node2))
            .map(|s| s.shard_id)
            .collect();

        if self.owner(node1).is_none() || self.owner(node2).is_none() {
            return Err(Error::OutOfRange {
                node1,
                node2,
                range: "any configured shard".to_string(),
            });
        }
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::ShardRange;

    fn router() -> ShardRouter {
        ShardRouter::new(vec![
            ShardDescriptor::new(2, ShardRange::new(950, 1899), "http://s2"),
            ShardDescriptor::new(1, ShardRange::new(1, 949), "http://s1"),
        ])
    }

    #[test]
    fn test_both_low_hits_shard1_only() {
        assert_eq!(router().involved(3, 7).unwrap(), vec![1]);
        assert_eq!(router().involved(949, 1).unwrap(), vec![1]);
    }

    #[test]
    fn test_both_high_hits_shard2_only() {
        assert_eq!(router().involved(950, 1899).unwrap(), vec![2]);
    }

    #[test]
    fn test_cross_shard_hits_both_in_id_order() {
        assert_eq!(router().involved(100, 1500).unwrap(), vec![1, 2]);
        assert_eq!(router().involved(1500, 100).unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_routing_matches_range_membership() {
        let router = router();
        for a in (1..1899).step_by(97) {
            for b in (1..1899).step_by(89) {
                let expected: Vec<ShardId> = router
                    .shards()
                    .iter()
                    .filter(|s| s.range.contains(a) || s.range.contains(b))
                    .map(|s| s.shard_id)
                    .collect();
                assert_eq!(router.involved(a, b).unwrap(), expected);
            }
        }
    }

    #[test]
    fn test_unowned_node_rejected() {
        assert!(matches!(
            router().involved(5, 5000),
            Err(Error::OutOfRange { .. })
        ));
    }
}
