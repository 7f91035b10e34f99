use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub type Counter = AtomicU64;

#[derive(Debug, Clone, Default)]
/// Live metrics around the cluster system.
pub struct ClusterStatistics(Arc<ClusterStatisticsInner>);

impl Deref for ClusterStatistics {
    type Target = ClusterStatisticsInner;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[derive(Debug, Default)]
pub struct ClusterStatisticsInner {
    /// The number of members currently routable.
    pub(crate) num_live_members: Counter,
    /// The number of members flagged as unreachable.
    pub(crate) num_unreachable_members: Counter,
    /// The number of data centers/availability zones the cluster belongs to.
    pub(crate) num_data_centers: Counter,
    /// The number of membership events which changed the routing table.
    pub(crate) num_membership_changes: Counter,
}

impl ClusterStatisticsInner {
    /// The number of members currently routable.
    pub fn num_live_members(&self) -> u64 {
        self.num_live_members.load(Ordering::Relaxed)
    }

    /// The number of members flagged as unreachable.
    pub fn num_unreachable_members(&self) -> u64 {
        self.num_unreachable_members.load(Ordering::Relaxed)
    }

    /// The number of data centers/availability zones the cluster belongs to.
    pub fn num_data_centers(&self) -> u64 {
        self.num_data_centers.load(Ordering::Relaxed)
    }

    /// The number of membership events which changed the routing table.
    pub fn num_membership_changes(&self) -> u64 {
        self.num_membership_changes.load(Ordering::Relaxed)
    }
}
