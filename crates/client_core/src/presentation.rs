//! Maps resolved relationships to what a member card should offer.

use shared::domain::{Member, MemberId};

use crate::{dispatcher::ConnectionAction, repository::RelationshipState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AffordanceKind {
    Connect,
    Pending,
    Accept,
    Delete,
    Cancel,
    Message,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Emphasis {
    Primary,
    Secondary,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Affordance {
    pub kind: AffordanceKind,
    pub label: &'static str,
    /// `None` for display-only affordances.
    pub action: Option<ConnectionAction>,
    pub enabled: bool,
    pub emphasis: Emphasis,
}

impl Affordance {
    fn new(
        kind: AffordanceKind,
        label: &'static str,
        action: Option<ConnectionAction>,
        emphasis: Emphasis,
    ) -> Self {
        Self {
            kind,
            label,
            enabled: action.is_some(),
            action,
            emphasis,
        }
    }
}

pub fn affordances(state: RelationshipState, in_flight: bool) -> Vec<Affordance> {
    use AffordanceKind as K;
    use ConnectionAction as A;

    let mut offered = match state {
        RelationshipState::Unconnected => vec![Affordance::new(
            K::Connect,
            "Connect",
            Some(A::Request),
            Emphasis::Primary,
        )],
        RelationshipState::PendingOutgoing => vec![
            Affordance::new(K::Pending, "Pending", None, Emphasis::Primary),
            Affordance::new(K::Cancel, "Cancel", Some(A::Cancel), Emphasis::Secondary),
        ],
        RelationshipState::PendingIncoming => vec![
            Affordance::new(K::Accept, "Accept", Some(A::Accept), Emphasis::Primary),
            Affordance::new(K::Delete, "Delete", Some(A::Cancel), Emphasis::Secondary),
        ],
        RelationshipState::Connected => vec![
            Affordance::new(K::Message, "Message", Some(A::Message), Emphasis::Primary),
            Affordance::new(K::Delete, "Delete", Some(A::Cancel), Emphasis::Secondary),
        ],
    };
    if in_flight {
        for affordance in &mut offered {
            affordance.enabled = false;
        }
    }
    offered
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberCard {
    pub member_id: MemberId,
    pub display_name: String,
    pub headline: Option<String>,
    pub photo: Option<String>,
    pub incomplete: bool,
    pub state: RelationshipState,
    pub affordances: Vec<Affordance>,
}

impl MemberCard {
    pub fn new(member: &Member, state: RelationshipState, in_flight: bool) -> Self {
        let profile = member.member_profile.as_ref();
        let headline = profile.and_then(|profile| {
            match (profile.designation.as_deref(), profile.company.as_deref()) {
                (Some(designation), Some(company)) => Some(format!("{designation} at {company}")),
                (Some(designation), None) => Some(designation.to_string()),
                (None, Some(company)) => Some(company.to_string()),
                (None, None) => None,
            }
        });

        Self {
            member_id: member.id,
            display_name: member.display_name().to_string(),
            headline,
            photo: profile.and_then(|profile| profile.photo.clone()),
            incomplete: member.is_incomplete(),
            state,
            affordances: affordances(state, in_flight),
        }
    }
}

#[cfg(test)]
mod tests {
    use shared::domain::MemberProfile;

    use super::*;

    fn kinds(state: RelationshipState) -> Vec<(AffordanceKind, bool)> {
        affordances(state, false)
            .into_iter()
            .map(|a| (a.kind, a.enabled))
            .collect()
    }

    #[test]
    fn each_state_offers_its_affordances() {
        use AffordanceKind as K;
        assert_eq!(kinds(RelationshipState::Unconnected), vec![(K::Connect, true)]);
        assert_eq!(
            kinds(RelationshipState::PendingOutgoing),
            vec![(K::Pending, false), (K::Cancel, true)]
        );
        assert_eq!(
            kinds(RelationshipState::PendingIncoming),
            vec![(K::Accept, true), (K::Delete, true)]
        );
        assert_eq!(
            kinds(RelationshipState::Connected),
            vec![(K::Message, true), (K::Delete, true)]
        );
    }

    #[test]
    fn delete_maps_to_cancel_action() {
        let offered = affordances(RelationshipState::PendingIncoming, false);
        assert_eq!(offered[1].label, "Delete");
        assert_eq!(offered[1].action, Some(ConnectionAction::Cancel));
    }

    #[test]
    fn in_flight_disables_everything() {
        let offered = affordances(RelationshipState::Connected, true);
        assert!(offered.iter().all(|a| !a.enabled));
    }

    #[test]
    fn card_uses_profile_fields_when_present() {
        let member = Member {
            member_profile: Some(MemberProfile {
                name: Some("Grace".into()),
                designation: Some("Engineer".into()),
                company: Some("Navy".into()),
                photo: Some("grace.png".into()),
                ..MemberProfile::default()
            }),
            ..Member::new(MemberId(5), "grace")
        };
        let card = MemberCard::new(&member, RelationshipState::Unconnected, false);
        assert_eq!(card.display_name, "Grace");
        assert_eq!(card.headline.as_deref(), Some("Engineer at Navy"));
        assert_eq!(card.photo.as_deref(), Some("grace.png"));
        assert!(!card.incomplete);
    }

    #[test]
    fn incomplete_member_still_offers_connect() {
        let card = MemberCard::new(
            &Member::new(MemberId(6), "newcomer"),
            RelationshipState::Unconnected,
            false,
        );
        assert!(card.incomplete);
        assert_eq!(card.display_name, "newcomer");
        assert_eq!(card.headline, None);
        assert_eq!(card.affordances[0].kind, AffordanceKind::Connect);
    }
}
