use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_newtype!(MemberId);

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub designation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    /// Years of experience.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experience: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skills: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo: Option<String>,
}

/// One member's view of a connection. `connection_id` names the other
/// endpoint; the counterpart holds a mirror edge pointing back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionEdge {
    pub connection_id: MemberId,
    pub requested_id: MemberId,
    pub accepted: bool,
}

impl ConnectionEdge {
    /// Two one-sided edges describe the same logical connection when they
    /// point at each other's owners and agree on requester and acceptance.
    pub fn mirrors(&self, owner: MemberId, other: &ConnectionEdge, other_owner: MemberId) -> bool {
        self.connection_id == other_owner
            && other.connection_id == owner
            && self.requested_id == other.requested_id
            && self.accepted == other.accepted
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub id: MemberId,
    #[serde(default)]
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub member_profile: Option<MemberProfile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connections: Option<Vec<ConnectionEdge>>,
}

impl Member {
    pub fn new(id: MemberId, username: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
            member_profile: None,
            connections: None,
        }
    }

    /// A member without a profile may still connect; only profile-driven UI
    /// is restricted.
    pub fn is_incomplete(&self) -> bool {
        self.member_profile.is_none()
    }

    pub fn connections(&self) -> &[ConnectionEdge] {
        self.connections.as_deref().unwrap_or_default()
    }

    pub fn edges_to(&self, counterpart: MemberId) -> impl Iterator<Item = &ConnectionEdge> {
        self.connections()
            .iter()
            .filter(move |edge| edge.connection_id == counterpart)
    }

    pub fn display_name(&self) -> &str {
        self.member_profile
            .as_ref()
            .and_then(|profile| profile.name.as_deref())
            .unwrap_or(&self.username)
    }
}
