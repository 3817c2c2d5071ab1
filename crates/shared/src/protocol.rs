use serde::{Deserialize, Serialize};

use crate::domain::{ConnectionEdge, MemberId, MemberProfile};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Registration {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Body shared by the request, accept and cancel endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionActionRequest {
    pub member_id: MemberId,
    pub connection_id: MemberId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdateRequest {
    pub member_profile: MemberProfile,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberConnectionsResponse {
    pub connections: Vec<ConnectionEdge>,
}
