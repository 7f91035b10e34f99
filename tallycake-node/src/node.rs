use std::collections::BTreeSet;
use std::net::SocketAddr;

/// The unique ID of a node within the cluster.
pub type NodeId = u32;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ClusterMember {
    /// A unique ID for the given node in the cluster.
    pub node_id: NodeId,
    /// The public address of the node.
    pub public_addr: SocketAddr,
    /// The data center / availability zone the node is in.
    pub data_center: String,
    /// The roles the node has been started with.
    ///
    /// Worker pools can be restricted to the members carrying a given role.
    pub roles: BTreeSet<String>,
}

impl ClusterMember {
    pub fn new(
        node_id: NodeId,
        public_addr: SocketAddr,
        data_center: impl Into<String>,
    ) -> Self {
        Self {
            node_id,
            public_addr,
            data_center: data_center.into(),
            roles: BTreeSet::new(),
        }
    }

    /// Adds a role to the member.
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.insert(role.into());
        self
    }

    /// Adds several roles to the member.
    pub fn with_roles(mut self, roles: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.roles.extend(roles.into_iter().map(Into::into));
        self
    }

    #[inline]
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }
}
