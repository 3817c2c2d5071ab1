use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use shared::{
    domain::{Member, MemberProfile},
    error::ApiError,
    protocol::{ConnectionActionRequest, Credentials, ProfileUpdateRequest, Registration, TokenPair},
};
use tracing::debug;

use crate::{config::ClientSettings, error::BackendError};

/// The REST contract the client relies on. Connection mutations carry the
/// caller's bearer token; the directory listing is public.
#[async_trait]
pub trait MemberBackend: Send + Sync {
    async fn login(&self, credentials: &Credentials) -> Result<TokenPair, BackendError>;
    async fn register(&self, registration: &Registration) -> Result<Member, BackendError>;
    async fn verify_access_token(&self, access_token: &str) -> Result<Member, BackendError>;
    async fn fetch_profile(&self, access_token: &str) -> Result<Member, BackendError>;
    async fn update_profile(
        &self,
        access_token: &str,
        profile: &MemberProfile,
    ) -> Result<Member, BackendError>;
    async fn fetch_profiles(&self) -> Result<Vec<Member>, BackendError>;
    async fn request_connection(
        &self,
        access_token: &str,
        request: ConnectionActionRequest,
    ) -> Result<(), BackendError>;
    async fn accept_connection(
        &self,
        access_token: &str,
        request: ConnectionActionRequest,
    ) -> Result<(), BackendError>;
    async fn cancel_connection(
        &self,
        access_token: &str,
        request: ConnectionActionRequest,
    ) -> Result<(), BackendError>;
}

pub struct HttpBackend {
    http: Client,
    base_url: String,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(http: Client, base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn from_settings(settings: &ClientSettings) -> Result<Self, BackendError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_seconds))
            .build()?;
        Ok(Self::with_client(http, settings.api_base_url.clone()))
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api{path}", self.base_url)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, BackendError> {
        let response = request.send().await?;
        let status = response.status();
        debug!(url = %response.url(), status = status.as_u16(), "member backend response");
        if status.is_success() {
            return Ok(response);
        }

        let message = match response.json::<ApiError>().await {
            Ok(body) => body.error,
            Err(_) => status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string(),
        };
        if status == StatusCode::UNAUTHORIZED {
            Err(BackendError::Unauthorized(message))
        } else {
            Err(BackendError::Status {
                status: status.as_u16(),
                message,
            })
        }
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, BackendError> {
        Ok(self.send(request).await?.json().await?)
    }
}

#[async_trait]
impl MemberBackend for HttpBackend {
    async fn login(&self, credentials: &Credentials) -> Result<TokenPair, BackendError> {
        self.send_json(self.http.post(self.url("/login")).json(credentials))
            .await
    }

    async fn register(&self, registration: &Registration) -> Result<Member, BackendError> {
        self.send_json(self.http.post(self.url("/members")).json(registration))
            .await
    }

    async fn verify_access_token(&self, access_token: &str) -> Result<Member, BackendError> {
        self.send_json(
            self.http
                .post(self.url("/login/verify-access-token"))
                .bearer_auth(access_token),
        )
        .await
    }

    async fn fetch_profile(&self, access_token: &str) -> Result<Member, BackendError> {
        self.send_json(
            self.http
                .get(self.url("/members/profile"))
                .bearer_auth(access_token),
        )
        .await
    }

    async fn update_profile(
        &self,
        access_token: &str,
        profile: &MemberProfile,
    ) -> Result<Member, BackendError> {
        self.send_json(
            self.http
                .put(self.url("/members/profile"))
                .bearer_auth(access_token)
                .json(&ProfileUpdateRequest {
                    member_profile: profile.clone(),
                }),
        )
        .await
    }

    async fn fetch_profiles(&self) -> Result<Vec<Member>, BackendError> {
        self.send_json(self.http.get(self.url("/members/profiles")))
            .await
    }

    async fn request_connection(
        &self,
        access_token: &str,
        request: ConnectionActionRequest,
    ) -> Result<(), BackendError> {
        self.send(
            self.http
                .post(self.url("/members/connections/request"))
                .bearer_auth(access_token)
                .json(&request),
        )
        .await?;
        Ok(())
    }

    async fn accept_connection(
        &self,
        access_token: &str,
        request: ConnectionActionRequest,
    ) -> Result<(), BackendError> {
        self.send(
            self.http
                .put(self.url("/members/connections/accept"))
                .bearer_auth(access_token)
                .json(&request),
        )
        .await?;
        Ok(())
    }

    async fn cancel_connection(
        &self,
        access_token: &str,
        request: ConnectionActionRequest,
    ) -> Result<(), BackendError> {
        self.send(
            self.http
                .delete(self.url("/members/connections/cancel"))
                .bearer_auth(access_token)
                .json(&request),
        )
        .await?;
        Ok(())
    }
}
