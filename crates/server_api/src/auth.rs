use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use shared::{
    domain::MemberId,
    error::{ApiError, ErrorCode},
    protocol::TokenPair,
};

#[derive(Debug, Clone)]
pub struct TokenConfig {
    pub secret: String,
    pub access_ttl_seconds: i64,
    pub refresh_ttl_seconds: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum TokenKind {
    Access,
    Refresh,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: i64,
    exp: i64,
    iat: i64,
    jti: String,
    kind: TokenKind,
}

fn mint(
    cfg: &TokenConfig,
    member_id: MemberId,
    kind: TokenKind,
    ttl_seconds: i64,
) -> Result<String, ApiError> {
    let now = Utc::now();
    let claims = Claims {
        sub: member_id.0,
        iat: now.timestamp(),
        exp: (now + Duration::seconds(ttl_seconds)).timestamp(),
        jti: uuid::Uuid::new_v4().to_string(),
        kind,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(cfg.secret.as_bytes()),
    )
    .map_err(|e| ApiError::new(ErrorCode::Internal, format!("failed to mint token: {e}")))
}

pub fn issue_token_pair(cfg: &TokenConfig, member_id: MemberId) -> Result<TokenPair, ApiError> {
    Ok(TokenPair {
        access_token: mint(cfg, member_id, TokenKind::Access, cfg.access_ttl_seconds)?,
        refresh_token: mint(cfg, member_id, TokenKind::Refresh, cfg.refresh_ttl_seconds)?,
    })
}

/// Accepts only unexpired access tokens signed with the configured secret.
pub fn decode_access_token(cfg: &TokenConfig, token: &str) -> Result<MemberId, ApiError> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(cfg.secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| ApiError::unauthorized(format!("invalid access token: {e}")))?;
    if data.claims.kind != TokenKind::Access {
        return Err(ApiError::unauthorized("refresh token presented as access token"));
    }
    Ok(MemberId(data.claims.sub))
}

pub fn new_salt() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

pub fn hash_password(password: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b":");
    hasher.update(password.as_bytes());
    STANDARD.encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> TokenConfig {
        TokenConfig {
            secret: "test-secret".into(),
            access_ttl_seconds: 300,
            refresh_ttl_seconds: 3600,
        }
    }

    #[test]
    fn access_token_decodes_to_member() {
        let pair = issue_token_pair(&cfg(), MemberId(42)).expect("pair");
        assert_eq!(
            decode_access_token(&cfg(), &pair.access_token).expect("decode"),
            MemberId(42)
        );
        assert_ne!(pair.access_token, pair.refresh_token);
    }

    #[test]
    fn refresh_token_is_not_an_access_token() {
        let pair = issue_token_pair(&cfg(), MemberId(1)).expect("pair");
        let err = decode_access_token(&cfg(), &pair.refresh_token).expect_err("rejected");
        assert_eq!(err.code, ErrorCode::Unauthorized);
    }

    #[test]
    fn expired_and_foreign_tokens_are_rejected() {
        let expired_cfg = TokenConfig {
            access_ttl_seconds: -600,
            ..cfg()
        };
        let expired = issue_token_pair(&expired_cfg, MemberId(1)).expect("pair");
        assert!(decode_access_token(&cfg(), &expired.access_token).is_err());

        let foreign_cfg = TokenConfig {
            secret: "other".into(),
            ..cfg()
        };
        let foreign = issue_token_pair(&foreign_cfg, MemberId(1)).expect("pair");
        assert!(decode_access_token(&cfg(), &foreign.access_token).is_err());
    }

    #[test]
    fn password_hash_depends_on_salt() {
        assert_eq!(hash_password("pw", "a"), hash_password("pw", "a"));
        assert_ne!(hash_password("pw", "a"), hash_password("pw", "b"));
    }
}
