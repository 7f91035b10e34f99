use std::net::{SocketAddr, TcpListener};

use flume::r#async::RecvStream;
use tallycake_node::{ClusterMember, MembershipEvent, NodeId};

pub static TEST_DATA_CENTER: &str = "dc-test";

/// Gets a new socket address allocated by the OS.
pub fn get_unused_addr() -> SocketAddr {
    let socket = TcpListener::bind("127.0.0.1:0").unwrap();
    socket.local_addr().unwrap()
}

/// Creates a cluster member with a unique address in the test data center.
pub fn make_member(node_id: NodeId) -> ClusterMember {
    ClusterMember::new(node_id, get_unused_addr(), TEST_DATA_CENTER)
}

/// Creates a cluster member carrying the given role.
pub fn make_member_with_role(node_id: NodeId, role: &str) -> ClusterMember {
    make_member(node_id).with_role(role)
}

#[derive(Clone)]
/// A hand driven membership source standing in for the cluster's failure detector.
pub struct ManualMembership {
    tx: flume::Sender<MembershipEvent>,
}

impl ManualMembership {
    /// Creates a new source, returning the stream to hand to the node.
    pub fn new() -> (Self, RecvStream<'static, MembershipEvent>) {
        let (tx, rx) = flume::unbounded();
        (Self { tx }, rx.into_stream())
    }

    pub fn send(&self, event: MembershipEvent) {
        self.tx.send(event).expect("Membership stream should be alive");
    }

    pub fn join(&self, member: ClusterMember) {
        self.send(MembershipEvent::Joined(member));
    }

    pub fn leave(&self, node_id: NodeId) {
        self.send(MembershipEvent::Left(node_id));
    }

    pub fn unreachable(&self, node_id: NodeId) {
        self.send(MembershipEvent::Unreachable(node_id));
    }

    pub fn reachable(&self, node_id: NodeId) {
        self.send(MembershipEvent::Reachable(node_id));
    }
}
