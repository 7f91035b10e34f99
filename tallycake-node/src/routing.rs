use std::collections::BTreeMap;

use crate::node::{ClusterMember, NodeId};

#[derive(Debug, Clone, PartialEq, Eq)]
/// A topology change notification produced by the cluster membership subsystem.
pub enum MembershipEvent {
    /// A node has joined the cluster.
    Joined(ClusterMember),
    /// A node has left the cluster, this is terminal for its routing target.
    Left(NodeId),
    /// The failure detector has flagged the node as unreachable.
    Unreachable(NodeId),
    /// A previously unreachable node has become reachable again.
    Reachable(NodeId),
}

impl MembershipEvent {
    /// The node the event is about.
    pub fn node_id(&self) -> NodeId {
        match self {
            Self::Joined(member) => member.node_id,
            Self::Left(node_id) => *node_id,
            Self::Unreachable(node_id) => *node_id,
            Self::Reachable(node_id) => *node_id,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
/// The routing state of a single target.
pub enum TargetState {
    /// The target can be selected for routing.
    Up,
    /// The target is still a member but must not be routed to.
    Unreachable,
    /// The target has left the cluster and is purged from the table.
    Removed,
}

impl TargetState {
    /// Applies a membership event to the state.
    ///
    /// `Removed` is terminal, no event will move a target out of it.
    pub fn transition(self, event: &MembershipEvent) -> TargetState {
        match (self, event) {
            (TargetState::Removed, _) => TargetState::Removed,
            (_, MembershipEvent::Left(_)) => TargetState::Removed,
            (TargetState::Up, MembershipEvent::Unreachable(_)) => {
                TargetState::Unreachable
            },
            (TargetState::Unreachable, MembershipEvent::Reachable(_)) => {
                TargetState::Up
            },
            (state, _) => state,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// A member of the routing table.
pub struct RoutingTarget {
    member: ClusterMember,
    state: TargetState,
    incarnation: u64,
}

impl RoutingTarget {
    #[inline]
    pub fn member(&self) -> &ClusterMember {
        &self.member
    }

    #[inline]
    pub fn node_id(&self) -> NodeId {
        self.member.node_id
    }

    #[inline]
    pub fn state(&self) -> TargetState {
        self.state
    }

    #[inline]
    /// A table wide unique number assigned when the target joined.
    ///
    /// A node which leaves and joins again gets a new incarnation, allowing
    /// consumers to tell the two targets apart.
    pub fn incarnation(&self) -> u64 {
        self.incarnation
    }

    #[inline]
    pub fn is_up(&self) -> bool {
        self.state == TargetState::Up
    }
}

#[derive(Debug, Clone)]
/// The outcome of applying a single membership event.
pub struct Transition {
    pub member: ClusterMember,
    pub from: Option<TargetState>,
    pub to: TargetState,
}

#[derive(Debug, Clone, Default)]
/// An immutable, versioned snapshot of the reachable routing targets.
///
/// Updates never mutate a published table, [RoutingTable::apply] produces
/// the next snapshot instead so readers holding an older version are never
/// exposed to a partially applied change.
pub struct RoutingTable {
    version: u64,
    next_incarnation: u64,
    targets: BTreeMap<NodeId, RoutingTarget>,
}

impl RoutingTable {
    /// Creates a new table where all of the provided members are `Up`.
    pub fn new(members: impl IntoIterator<Item = ClusterMember>) -> Self {
        let mut table = Self::default();
        for member in members {
            table.insert_member(member);
        }
        table
    }

    #[inline]
    /// The version of the snapshot, incremented for every applied change.
    pub fn version(&self) -> u64 {
        self.version
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn get(&self, node_id: NodeId) -> Option<&RoutingTarget> {
        self.targets.get(&node_id)
    }

    /// Returns the state of the target, `None` if the node is not part of the table.
    pub fn state_of(&self, node_id: NodeId) -> Option<TargetState> {
        self.targets.get(&node_id).map(|target| target.state)
    }

    /// All targets in the table, ordered by node ID.
    pub fn targets(&self) -> impl Iterator<Item = &RoutingTarget> {
        self.targets.values()
    }

    /// The targets which can currently be routed to, ordered by node ID.
    ///
    /// If a `role` is provided only targets carrying that role are returned.
    pub fn up_targets<'a>(
        &'a self,
        role: Option<&'a str>,
    ) -> impl Iterator<Item = &'a RoutingTarget> + 'a {
        self.targets
            .values()
            .filter(|target| target.is_up())
            .filter(move |target| role.map_or(true, |role| target.member.has_role(role)))
    }

    pub fn num_up(&self) -> usize {
        self.targets.values().filter(|target| target.is_up()).count()
    }

    pub fn num_unreachable(&self) -> usize {
        self.targets
            .values()
            .filter(|target| target.state == TargetState::Unreachable)
            .count()
    }

    /// Applies a membership event producing the next snapshot.
    ///
    /// Returns `None` if the event does not change the table, e.g. a duplicate
    /// join or a reachability event for a node which is not a member.
    pub fn apply(&self, event: &MembershipEvent) -> Option<(RoutingTable, Transition)> {
        let mut next = self.clone();

        let transition = match event {
            MembershipEvent::Joined(member) => {
                if next.targets.contains_key(&member.node_id) {
                    return None;
                }

                next.insert_member(member.clone());
                Transition {
                    member: member.clone(),
                    from: None,
                    to: TargetState::Up,
                }
            },
            MembershipEvent::Left(node_id) => {
                let target = next.targets.remove(node_id)?;
                Transition {
                    member: target.member,
                    from: Some(target.state),
                    to: TargetState::Removed,
                }
            },
            MembershipEvent::Unreachable(node_id) | MembershipEvent::Reachable(node_id) => {
                let target = next.targets.get_mut(node_id)?;
                let from = target.state;
                let to = from.transition(event);
                if from == to {
                    return None;
                }

                target.state = to;
                Transition {
                    member: target.member.clone(),
                    from: Some(from),
                    to,
                }
            },
        };

        next.version += 1;
        Some((next, transition))
    }

    fn insert_member(&mut self, member: ClusterMember) {
        let incarnation = self.next_incarnation;
        self.next_incarnation += 1;
        self.targets.insert(
            member.node_id,
            RoutingTarget {
                member,
                state: TargetState::Up,
                incarnation,
            },
        );
    }
}
