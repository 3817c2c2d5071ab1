use shared::domain::MemberId;
use thiserror::Error;

use crate::{dispatcher::ConnectionAction, repository::RelationshipState};

/// Failure talking to the member backend, before any client policy is applied.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    #[error("backend rejected the credentials: {0}")]
    Unauthorized(String),
    #[error("backend returned HTTP {status}: {message}")]
    Status { status: u16, message: String },
    #[error("backend transport failed: {0}")]
    Transport(String),
    #[error("backend response could not be decoded: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("not authenticated: {0}")]
    Unauthenticated(String),
    #[error("login rejected: {0}")]
    InvalidCredentials(String),
    #[error("member {viewer} is not a participant who can {action} with member {counterpart}")]
    NotAParticipant {
        viewer: MemberId,
        counterpart: MemberId,
        action: ConnectionAction,
    },
    #[error("cannot {action} while the relationship is {state}")]
    InvalidTransition {
        action: ConnectionAction,
        state: RelationshipState,
    },
    #[error("an action with member {counterpart} is already in flight")]
    ActionInFlight { counterpart: MemberId },
    #[error("member {0} not found")]
    UnknownMember(MemberId),
    #[error("session changed while the request was in flight")]
    SessionChanged,
    #[error("request rejected with HTTP {status}: {message}")]
    Rejected { status: u16, message: String },
    #[error("network request failed: {0}")]
    TransientNetworkFailure(String),
    #[error("credential storage failed: {source}")]
    Storage { source: anyhow::Error },
}

/// How an error reaches the person using the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Surface {
    RedirectToLogin,
    InlineNotice(String),
    Silent,
}

impl ClientError {
    pub fn surface(&self) -> Surface {
        match self {
            Self::Unauthenticated(_) => Surface::RedirectToLogin,
            Self::NotAParticipant { .. } | Self::ActionInFlight { .. } | Self::SessionChanged => {
                Surface::Silent
            }
            other => Surface::InlineNotice(other.to_string()),
        }
    }

    /// Whether repeating the same action unchanged may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientNetworkFailure(_))
    }

    pub(crate) fn storage(source: anyhow::Error) -> Self {
        Self::Storage { source }
    }
}

impl From<BackendError> for ClientError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Unauthorized(message) => Self::Unauthenticated(message),
            BackendError::Status { status, message } if status >= 500 => {
                Self::TransientNetworkFailure(format!("HTTP {status}: {message}"))
            }
            BackendError::Status { status, message } => Self::Rejected { status, message },
            BackendError::Transport(message) | BackendError::Decode(message) => {
                Self::TransientNetworkFailure(message)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_failures_map_to_client_taxonomy() {
        assert!(matches!(
            ClientError::from(BackendError::Unauthorized("expired".into())),
            ClientError::Unauthenticated(_)
        ));
        assert!(ClientError::from(BackendError::Status {
            status: 503,
            message: "down".into()
        })
        .is_retryable());
        assert!(matches!(
            ClientError::from(BackendError::Status {
                status: 409,
                message: "exists".into()
            }),
            ClientError::Rejected { status: 409, .. }
        ));
    }

    #[test]
    fn surfaces_follow_propagation_policy() {
        assert_eq!(
            ClientError::Unauthenticated("x".into()).surface(),
            Surface::RedirectToLogin
        );
        assert_eq!(ClientError::SessionChanged.surface(), Surface::Silent);
        assert_eq!(
            ClientError::NotAParticipant {
                viewer: MemberId(1),
                counterpart: MemberId(2),
                action: ConnectionAction::Accept,
            }
            .surface(),
            Surface::Silent
        );
        assert_eq!(
            ClientError::TransientNetworkFailure("timeout".into()).surface(),
            Surface::InlineNotice("network request failed: timeout".into())
        );
    }
}
