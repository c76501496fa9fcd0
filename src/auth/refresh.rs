// Token refresh logic

use futures::future::{BoxFuture, FutureExt, Shared};
use reqwest::Client;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use super::types::{CredentialPair, RefreshTokenRequest, TokenPairResponse};
use crate::error::{extract_message, RefreshFailure};

/// Exchange a refresh token for a new credential pair
///
/// Talks to the transport directly: no bearer header, no expired-status
/// handling, so a refresh can never start another refresh.
pub async fn refresh_credentials(
    client: &Client,
    url: &str,
    refresh_token: &str,
    rejected_status: u16,
) -> Result<CredentialPair, RefreshFailure> {
    tracing::debug!(url = %url, "Refreshing access token...");

    let response = client
        .post(url)
        .json(&RefreshTokenRequest { refresh_token })
        .send()
        .await
        .map_err(|e| RefreshFailure::Transport(Arc::new(e)))?;

    let status = response.status();
    if !status.is_success() {
        let error_text = response.text().await.unwrap_or_default();
        let data = serde_json::from_str(&error_text).unwrap_or(serde_json::Value::Null);
        let message = extract_message(&data, &error_text, status);

        tracing::warn!(
            status = status.as_u16(),
            body = %error_text,
            "Token refresh failed"
        );

        return Err(if status.as_u16() == rejected_status {
            RefreshFailure::Rejected {
                status: status.as_u16(),
                message,
            }
        } else {
            RefreshFailure::Status {
                status: status.as_u16(),
                message,
            }
        });
    }

    let body = response
        .bytes()
        .await
        .map_err(|e| RefreshFailure::Transport(Arc::new(e)))?;
    let data: TokenPairResponse = serde_json::from_slice(&body).map_err(|e| {
        RefreshFailure::InvalidResponse(format!("Failed to parse refresh response: {}", e))
    })?;

    if data.access_token.is_empty() || data.refresh_token.is_empty() {
        return Err(RefreshFailure::InvalidResponse(
            "Refresh response does not contain both tokens".to_string(),
        ));
    }

    Ok(data.into())
}

type InFlight = Shared<BoxFuture<'static, Result<(), RefreshFailure>>>;

/// Keeps at most one refresh in flight
///
/// Requests that hit the expired signal while a refresh is running join it and
/// share its outcome. Once it settles the outcome is dropped, so a later
/// expired signal starts a fresh refresh.
#[derive(Default)]
pub struct RefreshCoordinator {
    in_flight: Mutex<Option<InFlight>>,
}

impl RefreshCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a refresh is currently running
    pub fn is_refreshing(&self) -> bool {
        self.slot().is_some()
    }

    /// Join the running refresh, or ask `start` for a new one
    ///
    /// `start` runs under the coordinator lock. Returning `Ok(None)` means no
    /// refresh is needed (the credentials were already renewed).
    pub async fn refresh_with<S, F>(&self, start: S) -> Result<(), RefreshFailure>
    where
        S: FnOnce() -> Result<Option<F>, RefreshFailure>,
        F: Future<Output = Result<(), RefreshFailure>> + Send + 'static,
    {
        let refresh = {
            let mut slot = self.slot();
            match slot.as_ref() {
                Some(running) => {
                    tracing::debug!("Joining token refresh already in flight");
                    running.clone()
                }
                None => match start()? {
                    Some(future) => {
                        let refresh = future.boxed().shared();
                        *slot = Some(refresh.clone());
                        refresh
                    }
                    None => return Ok(()),
                },
            }
        };

        let outcome = refresh.clone().await;

        let mut slot = self.slot();
        if slot.as_ref().is_some_and(|running| running.ptr_eq(&refresh)) {
            *slot = None;
        }

        outcome
    }

    fn slot(&self) -> MutexGuard<'_, Option<InFlight>> {
        self.in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_refresh_credentials_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/auth/refresh-token")
            .match_body(mockito::Matcher::Json(
                serde_json::json!({"refresh_token": "R1"}),
            ))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"A2","refresh_token":"R2"}"#)
            .expect(1)
            .create_async()
            .await;

        let url = format!("{}/auth/refresh-token", server.url());
        let pair = refresh_credentials(&Client::new(), &url, "R1", 401)
            .await
            .unwrap();

        assert_eq!(pair, CredentialPair::new("A2", "R2"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_refresh_credentials_does_not_send_bearer() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/auth/refresh-token")
            .match_header("authorization", mockito::Matcher::Missing)
            .with_status(200)
            .with_body(r#"{"access_token":"A2","refresh_token":"R2"}"#)
            .create_async()
            .await;

        let url = format!("{}/auth/refresh-token", server.url());
        refresh_credentials(&Client::new(), &url, "R1", 401)
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_refresh_credentials_rejected() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/auth/refresh-token")
            .with_status(401)
            .with_body(r#"{"message":"Invalid refresh token"}"#)
            .create_async()
            .await;

        let url = format!("{}/auth/refresh-token", server.url());
        let err = refresh_credentials(&Client::new(), &url, "R1", 401)
            .await
            .unwrap_err();

        match err {
            RefreshFailure::Rejected { status, message } => {
                assert_eq!(status, 401);
                assert_eq!(message, "Invalid refresh token");
            }
            other => panic!("unexpected failure: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_refresh_credentials_server_error_is_not_rejection() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/auth/refresh-token")
            .with_status(503)
            .with_body("maintenance")
            .create_async()
            .await;

        let url = format!("{}/auth/refresh-token", server.url());
        let err = refresh_credentials(&Client::new(), &url, "R1", 401)
            .await
            .unwrap_err();

        assert!(matches!(err, RefreshFailure::Status { status: 503, .. }));
    }

    #[tokio::test]
    async fn test_refresh_credentials_malformed_body() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/auth/refresh-token")
            .with_status(200)
            .with_body(r#"{"token":"A2"}"#)
            .create_async()
            .await;

        let url = format!("{}/auth/refresh-token", server.url());
        let err = refresh_credentials(&Client::new(), &url, "R1", 401)
            .await
            .unwrap_err();

        assert!(matches!(err, RefreshFailure::InvalidResponse(_)));
    }

    fn counted(
        runs: &Arc<AtomicUsize>,
        outcome: Result<(), RefreshFailure>,
    ) -> impl Future<Output = Result<(), RefreshFailure>> + Send + 'static {
        let runs = runs.clone();
        async move {
            runs.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            outcome
        }
    }

    #[tokio::test]
    async fn test_coordinator_runs_refresh_when_idle() {
        let coordinator = RefreshCoordinator::new();
        let runs = Arc::new(AtomicUsize::new(0));

        coordinator
            .refresh_with(|| Ok(Some(counted(&runs, Ok(())))))
            .await
            .unwrap();

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(!coordinator.is_refreshing());
    }

    #[tokio::test]
    async fn test_coordinator_skips_when_start_declines() {
        let coordinator = RefreshCoordinator::new();
        let runs = Arc::new(AtomicUsize::new(0));

        coordinator
            .refresh_with(|| Ok(None::<BoxFuture<'static, Result<(), RefreshFailure>>>))
            .await
            .unwrap();

        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_coordinator_does_not_replay_settled_failure() {
        let coordinator = RefreshCoordinator::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let failure = RefreshFailure::Status {
            status: 503,
            message: "down".to_string(),
        };

        let first = coordinator
            .refresh_with(|| Ok(Some(counted(&runs, Err(failure.clone())))))
            .await;
        assert!(matches!(first, Err(RefreshFailure::Status { status: 503, .. })));

        // The failed refresh has settled; the next caller refreshes on its own
        coordinator
            .refresh_with(|| Ok(Some(counted(&runs, Ok(())))))
            .await
            .unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_coordinator_start_error_is_returned() {
        let coordinator = RefreshCoordinator::new();

        let err = coordinator
            .refresh_with(|| {
                Err::<Option<BoxFuture<'static, Result<(), RefreshFailure>>>, _>(
                    RefreshFailure::Storage("disk full".to_string()),
                )
            })
            .await
            .unwrap_err();

        assert!(matches!(err, RefreshFailure::Storage(_)));
        assert!(!coordinator.is_refreshing());
    }

    #[tokio::test]
    async fn test_coordinator_concurrent_callers_share_one_refresh() {
        let coordinator = Arc::new(RefreshCoordinator::new());
        let runs = Arc::new(AtomicUsize::new(0));
        let failure = RefreshFailure::Status {
            status: 502,
            message: "Bad Gateway".to_string(),
        };

        let tasks: Vec<_> = (0..5)
            .map(|_| {
                let coordinator = coordinator.clone();
                let runs = runs.clone();
                let failure = failure.clone();
                tokio::spawn(async move {
                    coordinator
                        .refresh_with(|| Ok(Some(counted(&runs, Err(failure)))))
                        .await
                })
            })
            .collect();

        for task in tasks {
            let outcome = task.await.unwrap();
            assert!(matches!(outcome, Err(RefreshFailure::Status { status: 502, .. })));
        }

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(!coordinator.is_refreshing());
    }
}
