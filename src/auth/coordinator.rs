// Single-flight token renewal
// At most one renewal call is outstanding; everyone else queues behind it

use reqwest::Client;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::oneshot;

use super::redirect::LoginRedirect;
use super::refresh;
use super::store::TokenStore;
use super::types::{CredentialPair, TokenKind};
use crate::error::AuthError;
use crate::metrics::TransportMetrics;

type Outcome = Result<String, AuthError>;

enum RefreshState {
    Idle,
    Refreshing {
        waiters: Vec<oneshot::Sender<Outcome>>,
    },
}

/// Coordinates access token renewal across concurrent requests
///
/// The renewal runs on its own task, so a caller that is cancelled while
/// waiting never aborts it for the others.
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    state: Mutex<RefreshState>,
    store: Arc<TokenStore>,
    redirect: Arc<dyn LoginRedirect>,
    metrics: Arc<TransportMetrics>,
    client: Client,
    base_url: String,
    refresh_endpoint: String,
    login_redirect: String,
}

impl RefreshCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: Client,
        base_url: impl Into<String>,
        refresh_endpoint: impl Into<String>,
        login_redirect: impl Into<String>,
        store: Arc<TokenStore>,
        redirect: Arc<dyn LoginRedirect>,
        metrics: Arc<TransportMetrics>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(RefreshState::Idle),
                store,
                redirect,
                metrics,
                client,
                base_url: base_url.into(),
                refresh_endpoint: refresh_endpoint.into(),
                login_redirect: login_redirect.into(),
            }),
        }
    }

    /// Whether a renewal is currently in flight
    pub fn is_refreshing(&self) -> bool {
        matches!(*self.inner.lock_state(), RefreshState::Refreshing { .. })
    }

    /// Obtain a renewed access token
    ///
    /// The first caller while idle starts the renewal. Every caller,
    /// including that one, waits for its outcome; no second renewal is
    /// started while one is in flight.
    pub async fn refresh(&self) -> Outcome {
        let (tx, rx) = oneshot::channel();
        let start = {
            let mut state = self.inner.lock_state();
            match &mut *state {
                RefreshState::Refreshing { waiters } => {
                    waiters.push(tx);
                    false
                }
                RefreshState::Idle => {
                    *state = RefreshState::Refreshing { waiters: vec![tx] };
                    true
                }
            }
        };

        if start {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move {
                let mut guard = RenewalGuard {
                    inner: Arc::clone(&inner),
                    settled: false,
                };

                let outcome = inner.perform_renewal().await;
                if outcome.is_err() {
                    inner.redirect.redirect(&inner.login_redirect);
                }
                guard.settle(&outcome);
            });
        } else {
            tracing::debug!("Token renewal in flight, queueing request");
        }

        rx.await.unwrap_or(Err(AuthError::Abandoned))
    }
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, RefreshState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn perform_renewal(&self) -> Outcome {
        let Some(refresh_token) = self.store.get(TokenKind::Refresh) else {
            tracing::warn!("No refresh token stored, cannot renew session");
            self.store.clear();
            self.metrics.record_renewal(false);
            return Err(AuthError::MissingRefreshToken);
        };

        match refresh::renew(
            &self.client,
            &self.base_url,
            &self.refresh_endpoint,
            &refresh_token,
        )
        .await
        {
            Ok(tokens) => {
                let refresh_token = tokens.refresh_token.unwrap_or(refresh_token);
                self.store.set(&CredentialPair::new(
                    tokens.access_token.clone(),
                    refresh_token,
                ));
                self.metrics.record_renewal(true);
                Ok(tokens.access_token)
            }
            Err(e) => {
                tracing::error!("Token renewal failed: {}", e);
                self.store.clear();
                self.metrics.record_renewal(false);
                Err(e)
            }
        }
    }

    /// Return to idle and hand the outcome to every waiter in arrival order
    fn settle(&self, outcome: &Outcome) {
        let waiters = {
            let mut state = self.lock_state();
            match std::mem::replace(&mut *state, RefreshState::Idle) {
                RefreshState::Refreshing { waiters } => waiters,
                RefreshState::Idle => Vec::new(),
            }
        };

        if waiters.len() > 1 {
            tracing::debug!(waiters = waiters.len(), "Releasing queued requests");
        }
        for waiter in waiters {
            // Receiver gone means that caller was cancelled
            let _ = waiter.send(outcome.clone());
        }
    }
}

/// Releases waiters if the renewal task dies before settling
/// (panic or runtime shutdown)
struct RenewalGuard {
    inner: Arc<Inner>,
    settled: bool,
}

impl RenewalGuard {
    fn settle(&mut self, outcome: &Outcome) {
        self.settled = true;
        self.inner.settle(outcome);
    }
}

impl Drop for RenewalGuard {
    fn drop(&mut self) {
        if !self.settled {
            tracing::warn!("Token renewal abandoned, releasing queued requests");
            self.inner.settle(&Err(AuthError::Abandoned));
        }
    }
}
