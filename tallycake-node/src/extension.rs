use async_trait::async_trait;

use crate::TallycakeNode;

#[async_trait]
/// A service started on top of a running node.
///
/// Extensions are handed the node once, at which point they can take a
/// [RoutingWatcher](crate::RoutingWatcher) to follow the membership for as
/// long as they run. The statistics service is
/// attached this way.
pub trait ClusterExtension: Send {
    /// The running service returned to the caller of [TallycakeNode::add_extension].
    type Output;
    type Error;

    async fn init_extension(self, node: &TallycakeNode) -> Result<Self::Output, Self::Error>;
}
