//! Agent token backoff tests

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use deployd::authn::token_provider::{AgentTokenProvider, SleepFn, TokenExchange};
use deployd::errors::AgentError;
use deployd::http::client::HttpClient;
use deployd::utils::CooldownOptions;

use crate::fakes::{spawn_base, FakeBase};

/// Fails the next `failures` exchanges, then succeeds
struct FlakyExchange {
    failures: AtomicU32,
    attempts: AtomicU32,
}

impl FlakyExchange {
    fn new(failures: u32) -> Arc<Self> {
        Arc::new(Self {
            failures: AtomicU32::new(failures),
            attempts: AtomicU32::new(0),
        })
    }

    fn fail_next(&self, failures: u32) {
        self.failures.store(failures, Ordering::SeqCst);
    }
}

#[async_trait]
impl TokenExchange for FlakyExchange {
    async fn exchange(&self, bootstrap_token: &str) -> Result<String, AgentError> {
        assert_eq!(bootstrap_token, "bootstrap");
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(AgentError::TokenError("unavailable".to_string()));
        }
        Ok("agent-token".to_string())
    }
}

/// Sleep that returns at once and remembers what it was asked to wait
fn recording_sleep() -> (SleepFn, Arc<Mutex<Vec<Duration>>>) {
    let waits = Arc::new(Mutex::new(Vec::new()));
    let recorded = waits.clone();
    let sleep_fn: SleepFn = Arc::new(move |wait: Duration| -> BoxFuture<'static, ()> {
        recorded.lock().unwrap().push(wait);
        Box::pin(async {})
    });
    (sleep_fn, waits)
}

fn assert_between(wait: Duration, low_secs: f64, high_secs: f64) {
    let secs = wait.as_secs_f64();
    assert!(
        secs >= low_secs && secs <= high_secs,
        "{:?} not within [{}, {}]",
        wait,
        low_secs,
        high_secs
    );
}

#[tokio::test]
async fn test_fast_retries_then_exponential() {
    let exchange = FlakyExchange::new(4);
    let (sleep_fn, waits) = recording_sleep();
    let provider = AgentTokenProvider::new(exchange.clone(), CooldownOptions::default())
        .with_sleep_fn(sleep_fn);

    let token = provider
        .obtain_agent_token_with_backoff("bootstrap", &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(token, "agent-token");
    assert_eq!(exchange.attempts.load(Ordering::SeqCst), 5);

    let waits = waits.lock().unwrap().clone();
    assert_eq!(waits.len(), 4);
    for wait in &waits[..3] {
        assert_between(*wait, 1.8, 2.2);
    }
    assert_between(waits[3], 54.0, 66.0);
}

#[tokio::test]
async fn test_success_resets_the_streak() {
    let exchange = FlakyExchange::new(5);
    let (sleep_fn, waits) = recording_sleep();
    let provider = AgentTokenProvider::new(exchange.clone(), CooldownOptions::default())
        .with_sleep_fn(sleep_fn);
    let cancel = CancellationToken::new();

    provider
        .obtain_agent_token_with_backoff("bootstrap", &cancel)
        .await
        .unwrap();
    assert_eq!(provider.err_streak(), 0);
    // Fifth wait was the doubled one
    assert_between(waits.lock().unwrap()[4], 108.0, 132.0);

    waits.lock().unwrap().clear();
    exchange.fail_next(1);
    provider
        .obtain_agent_token_with_backoff("bootstrap", &cancel)
        .await
        .unwrap();
    let waits = waits.lock().unwrap().clone();
    assert_eq!(waits.len(), 1);
    assert_between(waits[0], 1.8, 2.2);
}

#[tokio::test]
async fn test_wait_observes_cancellation() {
    let exchange = FlakyExchange::new(u32::MAX);
    let never: SleepFn = Arc::new(|_: Duration| -> BoxFuture<'static, ()> {
        Box::pin(futures::future::pending())
    });
    let provider = Arc::new(
        AgentTokenProvider::new(exchange, CooldownOptions::default()).with_sleep_fn(never),
    );
    let cancel = CancellationToken::new();

    let task = {
        let provider = provider.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            provider
                .obtain_agent_token_with_backoff("bootstrap", &cancel)
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    cancel.cancel();

    let result = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(result, Err(AgentError::Cancelled(_))));
    assert_eq!(provider.err_streak(), 1);
}

#[tokio::test]
async fn test_exchange_against_base() {
    let base = Arc::new(FakeBase::default());
    let url = spawn_base(base.clone()).await;
    let client = HttpClient::new(&url).unwrap();

    assert_eq!(client.exchange_agent_token("bootstrap").await.unwrap(), "agent-token");

    base.reject_tokens.store(true, Ordering::SeqCst);
    assert!(matches!(
        client.exchange_agent_token("bootstrap").await,
        Err(AgentError::TokenError(_))
    ));
}
