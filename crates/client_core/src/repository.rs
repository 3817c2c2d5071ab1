//! Viewer-relative relationship resolution.
//!
//! Member records carry one-sided edge lists, so a connection appears once in
//! each endpoint's list. Resolution reads the viewer's own edge and only
//! cross-checks the counterpart's mirror for logging; a disagreement never
//! fails resolution.

use std::fmt;

use shared::domain::{ConnectionEdge, Member, MemberId};
use tracing::warn;

use crate::session::SessionSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationshipState {
    Unconnected,
    /// The viewer asked and is waiting on the counterpart.
    PendingOutgoing,
    /// The counterpart asked; the viewer may accept or reject.
    PendingIncoming,
    Connected,
}

impl fmt::Display for RelationshipState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Unconnected => "unconnected",
            Self::PendingOutgoing => "pending (outgoing)",
            Self::PendingIncoming => "pending (incoming)",
            Self::Connected => "connected",
        };
        f.write_str(label)
    }
}

pub fn resolve(viewer: &Member, counterpart: &Member) -> RelationshipState {
    if viewer.id == counterpart.id {
        return RelationshipState::Unconnected;
    }

    let mut edges = viewer.edges_to(counterpart.id);
    let Some(edge) = edges.next() else {
        if counterpart.edges_to(viewer.id).next().is_some() {
            warn!(
                viewer = viewer.id.0,
                counterpart = counterpart.id.0,
                "inconsistent mirror edge: counterpart has an edge the viewer lacks"
            );
        }
        return RelationshipState::Unconnected;
    };
    if edges.next().is_some() {
        warn!(
            viewer = viewer.id.0,
            counterpart = counterpart.id.0,
            "multiple edges to the same counterpart; using the first"
        );
    }

    check_mirror(viewer, counterpart, edge);
    state_from_edge(viewer.id, counterpart.id, edge)
}

/// Resolves against the session's identity; no identity means nothing to
/// resolve against.
pub fn resolve_in_session(session: &SessionSnapshot, counterpart: &Member) -> RelationshipState {
    match &session.identity {
        Some(viewer) => resolve(viewer, counterpart),
        None => RelationshipState::Unconnected,
    }
}

pub fn list_for_viewer(viewer: &Member, all_members: &[Member]) -> Vec<(Member, RelationshipState)> {
    all_members
        .iter()
        .filter(|member| member.id != viewer.id)
        .map(|member| (member.clone(), resolve(viewer, member)))
        .collect()
}

/// Counterparts the viewer has any edge with, in directory order.
pub fn network_for_viewer(
    viewer: &Member,
    all_members: &[Member],
) -> Vec<(Member, RelationshipState)> {
    list_for_viewer(viewer, all_members)
        .into_iter()
        .filter(|(_, state)| *state != RelationshipState::Unconnected)
        .collect()
}

pub fn find_member(all_members: &[Member], member_id: MemberId) -> Option<&Member> {
    all_members.iter().find(|member| member.id == member_id)
}

fn state_from_edge(
    viewer: MemberId,
    counterpart: MemberId,
    edge: &ConnectionEdge,
) -> RelationshipState {
    if edge.accepted {
        RelationshipState::Connected
    } else if edge.requested_id == viewer {
        RelationshipState::PendingOutgoing
    } else if edge.requested_id == counterpart {
        RelationshipState::PendingIncoming
    } else {
        warn!(
            viewer = viewer.0,
            counterpart = counterpart.0,
            requested_id = edge.requested_id.0,
            "pending edge names a requester outside the pair"
        );
        RelationshipState::Unconnected
    }
}

fn check_mirror(viewer: &Member, counterpart: &Member, edge: &ConnectionEdge) {
    // A record fetched without its edge list carries nothing to compare.
    if counterpart.connections.is_none() {
        return;
    }
    match counterpart.edges_to(viewer.id).next() {
        None => warn!(
            viewer = viewer.id.0,
            counterpart = counterpart.id.0,
            "inconsistent mirror edge: counterpart lacks the viewer's edge"
        ),
        Some(mirror) if !edge.mirrors(viewer.id, mirror, counterpart.id) => warn!(
            viewer = viewer.id.0,
            counterpart = counterpart.id.0,
            "inconsistent mirror edge: edges disagree"
        ),
        Some(_) => {}
    }
}
