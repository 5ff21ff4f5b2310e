/// Maps keys onto a fixed number of hash ranges and ranges onto store nodes.
///
/// Range `r` is owned by node `r % nodes`. Hashing uses `ahash` with fixed
/// seeds so every client process agrees on placement.
#[derive(Debug, Clone)]
pub struct RangeMap {
    ranges: u64,
    nodes: usize,
}

/// Keys bound for one node, with their positions in the original batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeBatch {
    pub node: usize,
    pub positions: Vec<usize>,
    pub keys: Vec<String>,
}

impl RangeMap {
    /// `ranges` and `nodes` must both be non-zero.
    pub fn new(ranges: u64, nodes: usize) -> Self {
        debug_assert!(ranges > 0 && nodes > 0);
        Self {
            ranges: ranges.max(1),
            nodes: nodes.max(1),
        }
    }

    #[inline]
    pub fn range_of(&self, key: &str) -> u64 {
        let hash = ahash::RandomState::with_seeds(1, 2, 3, 4).hash_one(key);
        hash % self.ranges
    }

    #[inline]
    pub fn node_of(&self, key: &str) -> usize {
        (self.range_of(key) % self.nodes as u64) as usize
    }

    /// Split `keys` per owning node, preserving relative order inside each
    /// group. Nodes with no keys are omitted.
    pub fn partition(&self, keys: &[String]) -> Vec<NodeBatch> {
        let mut groups: Vec<NodeBatch> = (0..self.nodes)
            .map(|node| NodeBatch {
                node,
                positions: Vec::new(),
                keys: Vec::new(),
            })
            .collect();

        for (pos, key) in keys.iter().enumerate() {
            let group = &mut groups[self.node_of(key)];
            group.positions.push(pos);
            group.keys.push(key.clone());
        }

        groups.retain(|g| !g.keys.is_empty());
        groups
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("key-{i}")).collect()
    }

    #[test]
    fn placement_is_stable() {
        let a = RangeMap::new(1024, 3);
        let b = RangeMap::new(1024, 3);
        for k in keys(100) {
            assert_eq!(a.range_of(&k), b.range_of(&k));
            assert_eq!(a.node_of(&k), b.node_of(&k));
            assert!(a.range_of(&k) < 1024);
        }
    }

    #[test]
    fn single_node_owns_everything() {
        let map = RangeMap::new(16, 1);
        let batch = keys(10);
        let groups = map.partition(&batch);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].keys, batch);
        assert_eq!(groups[0].positions, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn partition_covers_every_position_once() {
        let map = RangeMap::new(256, 4);
        let batch = keys(500);
        let groups = map.partition(&batch);

        let mut seen: Vec<usize> = groups.iter().flat_map(|g| g.positions.clone()).collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..500).collect::<Vec<_>>());

        for g in &groups {
            assert!(g.positions.windows(2).all(|w| w[0] < w[1]));
            for (pos, key) in g.positions.iter().zip(&g.keys) {
                assert_eq!(&batch[*pos], key);
                assert_eq!(map.node_of(key), g.node);
            }
        }
    }

    #[test]
    fn keys_spread_across_nodes() {
        let map = RangeMap::new(1024, 4);
        let groups = map.partition(&keys(1000));
        assert_eq!(groups.len(), 4, "expected every node to receive keys");
        for g in groups {
            assert!(g.keys.len() > 150, "node {} got {}", g.node, g.keys.len());
        }
    }
}
