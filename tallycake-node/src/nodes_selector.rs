use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::node::NodeId;

/// Picks the routing target a token should be sent to.
pub trait RoutingPolicy: Send + Sync + 'static {
    /// Selects the index of the candidate the `token` should be routed to.
    ///
    /// `candidates` are the IDs of the nodes currently `Up`, ordered by node ID,
    /// and are never empty. The returned index must be within bounds.
    fn select(&self, token: &str, candidates: &[NodeId]) -> usize;
}

impl<P: RoutingPolicy + ?Sized> RoutingPolicy for Arc<P> {
    fn select(&self, token: &str, candidates: &[NodeId]) -> usize {
        (**self).select(token, candidates)
    }
}

impl<P: RoutingPolicy + ?Sized> RoutingPolicy for Box<P> {
    fn select(&self, token: &str, candidates: &[NodeId]) -> usize {
        (**self).select(token, candidates)
    }
}

#[derive(Debug, Default)]
/// Cycles through the available targets.
///
/// The cursor is shared by every caller, so concurrent requests are spread
/// across the cluster rather than each starting at the first node.
pub struct RoundRobin {
    cursor: AtomicUsize,
}

impl RoutingPolicy for RoundRobin {
    fn select(&self, _token: &str, candidates: &[NodeId]) -> usize {
        self.cursor.fetch_add(1, Ordering::Relaxed) % candidates.len()
    }
}

#[derive(Debug, Default, Copy, Clone)]
/// Routes equal tokens to the same target using rendezvous hashing.
///
/// Each candidate is scored with `crc32(node_id, token)` and the highest
/// score wins. When a target leaves only the tokens it owned move, which
/// keeps the remaining workers' caches warm.
pub struct ConsistentHash;

impl ConsistentHash {
    fn score(node_id: NodeId, token: &str) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&node_id.to_le_bytes());
        hasher.update(token.as_bytes());
        hasher.finalize()
    }
}

impl RoutingPolicy for ConsistentHash {
    fn select(&self, token: &str, candidates: &[NodeId]) -> usize {
        candidates
            .iter()
            .enumerate()
            .max_by_key(|(_, node_id)| Self::score(**node_id, token))
            .map(|(idx, _)| idx)
            .unwrap_or_default()
    }
}
