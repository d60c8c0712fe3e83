//! Short-lived agent token acquisition

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::AgentError;
use crate::http::client::HttpClient;
use crate::utils::{calc_exp_backoff, jittered, CooldownOptions};

/// Exchanges a bootstrap credential for an agent token
#[async_trait]
pub trait TokenExchange: Send + Sync {
    async fn exchange(&self, bootstrap_token: &str) -> Result<String, AgentError>;
}

#[async_trait]
impl TokenExchange for HttpClient {
    async fn exchange(&self, bootstrap_token: &str) -> Result<String, AgentError> {
        self.exchange_agent_token(bootstrap_token).await
    }
}

/// Sleep used between attempts, swappable so tests do not wait for real
pub type SleepFn = Arc<dyn Fn(Duration) -> BoxFuture<'static, ()> + Send + Sync>;

fn tokio_sleep() -> SleepFn {
    Arc::new(|wait: Duration| -> BoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep(wait))
    })
}

/// Obtains agent tokens, retrying with fast retries then exponential backoff.
///
/// The failure streak survives across calls and is reset by a success, so a
/// daemon that keeps failing backs off up to `max_delay` while a daemon that
/// recovered starts over at the fast retries.
pub struct AgentTokenProvider {
    exchange: Arc<dyn TokenExchange>,
    cooldown: CooldownOptions,
    err_streak: AtomicU32,
    sleep_fn: SleepFn,
}

impl AgentTokenProvider {
    pub fn new(exchange: Arc<dyn TokenExchange>, cooldown: CooldownOptions) -> Self {
        Self {
            exchange,
            cooldown,
            err_streak: AtomicU32::new(0),
            sleep_fn: tokio_sleep(),
        }
    }

    pub fn with_sleep_fn(mut self, sleep_fn: SleepFn) -> Self {
        self.sleep_fn = sleep_fn;
        self
    }

    /// Consecutive failures since the last success
    pub fn err_streak(&self) -> u32 {
        self.err_streak.load(Ordering::SeqCst)
    }

    /// Keep trying until a token is obtained or `cancel` fires
    pub async fn obtain_agent_token_with_backoff(
        &self,
        bootstrap_token: &str,
        cancel: &CancellationToken,
    ) -> Result<String, AgentError> {
        loop {
            if cancel.is_cancelled() {
                return Err(AgentError::Cancelled("agent token acquisition".to_string()));
            }

            match self.exchange.exchange(bootstrap_token).await {
                Ok(token) => {
                    let previous = self.err_streak.swap(0, Ordering::SeqCst);
                    if previous > 0 {
                        info!("Obtained agent token after {} failed attempts", previous);
                    } else {
                        debug!("Obtained agent token");
                    }
                    return Ok(token);
                }
                Err(e) => {
                    let streak = self.err_streak.fetch_add(1, Ordering::SeqCst).saturating_add(1);
                    let wait = jittered(
                        calc_exp_backoff(&self.cooldown, streak),
                        self.cooldown.jitter,
                    );
                    warn!(
                        "Agent token request failed (attempt {}), retrying in {:?}: {}",
                        streak, wait, e
                    );

                    tokio::select! {
                        _ = cancel.cancelled() => {
                            return Err(AgentError::Cancelled("agent token acquisition".to_string()));
                        }
                        _ = (self.sleep_fn)(wait) => {}
                    }
                }
            }
        }
    }
}
