use anyhow::Context;
use reqwest::{Client, Method};
use std::sync::Arc;
use std::time::Duration;

use crate::auth::{
    redact, refresh_credentials, CredentialPair, CredentialStore, LoginRequest, RefreshCoordinator,
    SessionHandler, TokenPairResponse,
};
use crate::error::{ClientError, RefreshFailure, Result};
use crate::request::{join_url, ApiResponse, Payload, RequestDescriptor, ResponseType};

/// Settings for `ApiClient`
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Base address every endpoint is joined onto
    pub base_url: String,

    /// Relative path of the refresh endpoint
    pub refresh_endpoint: String,

    /// Relative path of the login endpoint
    pub login_endpoint: String,

    /// Status reserved by the backend for "access token expired"
    pub expired_status: u16,

    /// Status the refresh endpoint uses for an invalid refresh token
    pub refresh_rejected_status: u16,

    pub max_connections: usize,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl ClientOptions {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            refresh_endpoint: "/auth/refresh-token".to_string(),
            login_endpoint: "/auth/login".to_string(),
            expired_status: 419,
            refresh_rejected_status: 401,
            max_connections: 20,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Authenticated client for the admin backend
///
/// Attaches the stored access token to every request. When the backend
/// answers with the expired status the client refreshes the credential pair
/// (one refresh in flight at a time), persists it, and replays the original
/// request exactly once.
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<Inner>,
}

struct Inner {
    /// Shared HTTP client with connection pooling
    client: Client,
    options: ClientOptions,
    store: Arc<dyn CredentialStore>,
    session: Arc<dyn SessionHandler>,
    refresh: RefreshCoordinator,
}

impl ApiClient {
    pub fn new(
        options: ClientOptions,
        store: Arc<dyn CredentialStore>,
        session: Arc<dyn SessionHandler>,
    ) -> anyhow::Result<Self> {
        let client = Client::builder()
            .pool_max_idle_per_host(options.max_connections)
            .connect_timeout(options.connect_timeout)
            .timeout(options.request_timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            inner: Arc::new(Inner {
                client,
                options,
                store,
                session,
                refresh: RefreshCoordinator::new(),
            }),
        })
    }

    pub fn options(&self) -> &ClientOptions {
        &self.inner.options
    }

    /// Credential store this client reads and writes
    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.inner.store
    }

    /// Send a request as the current credential holder
    pub async fn request(
        &self,
        endpoint: &str,
        method: Method,
        body: Payload,
        response_type: ResponseType,
    ) -> Result<ApiResponse> {
        let descriptor = RequestDescriptor::new(endpoint, method, body, response_type);
        self.send(&descriptor).await
    }

    /// Send a descriptor, refreshing and retrying once on the expired signal
    pub async fn send(&self, descriptor: &RequestDescriptor) -> Result<ApiResponse> {
        let credentials = self.inner.store.get()?;

        let expired = match self
            .dispatch(descriptor, credentials.as_ref().map(|c| c.access_token.as_str()))
            .await
        {
            Ok(response) => return Ok(response),
            Err(err @ ClientError::CredentialExpired { .. }) => err,
            Err(err) => return Err(err),
        };

        let Some(sent) = credentials else {
            tracing::warn!(
                endpoint = %descriptor.endpoint,
                "Credential expired but no refresh token is stored"
            );
            return Err(expired);
        };

        let refresh_url = join_url(
            &self.inner.options.base_url,
            &self.inner.options.refresh_endpoint,
        )?;

        tracing::warn!(
            endpoint = %descriptor.endpoint,
            "Access token expired, refreshing and retrying once"
        );

        self.inner
            .refresh
            .refresh_with(|| match self.inner.store.get() {
                Ok(Some(current)) if current.access_token == sent.access_token => Ok(Some(
                    self.clone()
                        .refresh_and_persist(refresh_url, current.refresh_token),
                )),
                // Renewed by another refresh or a login since this request was sent
                Ok(_) => Ok(None),
                Err(e) => Err(RefreshFailure::Storage(e.to_string())),
            })
            .await?;

        let Some(current) = self.inner.store.get()? else {
            // Another request's refresh was rejected and the session is gone
            return Err(expired);
        };

        // Exactly one retry: a second expired signal is surfaced as is
        self.dispatch(descriptor, Some(&current.access_token)).await
    }

    /// Exchange the refresh token, then persist the pair before anyone retries
    async fn refresh_and_persist(
        self,
        url: String,
        refresh_token: String,
    ) -> std::result::Result<(), RefreshFailure> {
        match refresh_credentials(
            &self.inner.client,
            &url,
            &refresh_token,
            self.inner.options.refresh_rejected_status,
        )
        .await
        {
            Ok(pair) => {
                self.inner
                    .store
                    .set(&pair)
                    .map_err(|e| RefreshFailure::Storage(e.to_string()))?;
                tracing::info!(
                    access_token = %redact(&pair.access_token),
                    "Access token refreshed successfully"
                );
                Ok(())
            }
            Err(failure @ RefreshFailure::Rejected { .. }) => {
                tracing::warn!("Refresh token rejected, clearing stored credentials");
                if let Err(e) = self.inner.store.clear() {
                    tracing::error!("Failed to clear credentials: {}", e);
                }
                self.inner.session.on_session_expired();
                Err(failure)
            }
            Err(failure) => Err(failure),
        }
    }

    /// One transport round trip; the expired status becomes a tagged error
    async fn dispatch(
        &self,
        descriptor: &RequestDescriptor,
        token: Option<&str>,
    ) -> Result<ApiResponse> {
        let request = descriptor
            .build(&self.inner.client, &self.inner.options.base_url, token)?
            .build()
            .map_err(|e| ClientError::InvalidRequest(e.to_string()))?;

        tracing::debug!(
            method = %request.method(),
            url = %request.url(),
            authenticated = token.is_some(),
            "Sending HTTP request"
        );

        let response = match self.inner.client.execute(request).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    endpoint = %descriptor.endpoint,
                    "HTTP request error"
                );
                return Err(ClientError::Transport(e));
            }
        };

        let status = response.status();
        tracing::debug!(status = %status, "Received HTTP response");

        if status.is_success() {
            return ApiResponse::decode(response, descriptor.response_type).await;
        }

        let error_text = response.text().await.unwrap_or_default();
        let expired = status.as_u16() == self.inner.options.expired_status;
        if !expired {
            tracing::debug!(
                status = status.as_u16(),
                endpoint = %descriptor.endpoint,
                response_body = %error_text,
                "HTTP request failed with error response"
            );
        }

        Err(ClientError::from_response(status, &error_text, expired))
    }

    /// Log in and store the returned credential pair
    pub async fn login(&self, email: &str, password: &str) -> Result<CredentialPair> {
        let url = join_url(&self.inner.options.base_url, &self.inner.options.login_endpoint)?;

        let response = self
            .inner
            .client
            .post(&url)
            .json(&LoginRequest { email, password })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), "Login failed");
            return Err(ClientError::from_response(status, &error_text, false));
        }

        let data: TokenPairResponse = response
            .json()
            .await
            .map_err(|e| ClientError::Decode(format!("Failed to parse login response: {}", e)))?;
        let pair = CredentialPair::from(data);

        self.inner.store.set(&pair)?;
        tracing::info!(email = %email, "Logged in");

        Ok(pair)
    }

    /// Forget the stored credentials
    pub fn logout(&self) -> Result<()> {
        self.inner.store.clear()?;
        tracing::info!("Logged out, credentials cleared");
        Ok(())
    }
}
