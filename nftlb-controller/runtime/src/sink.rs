use crate::{
    core::{ConfigSink, FarmName, FarmSet, SinkError, SinkOp},
    metrics::SinkMetrics,
};
use bytes::Bytes;
use http::{header, Method, Request, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use std::{future::Future, time::Duration};
use tokio::time;

/// The header carrying the load balancer's API key.
const KEY_HEADER: &str = "Key";

const MAX_BACKOFF: Duration = Duration::from_secs(5);

/// Sends configuration to the load balancer's HTTP API.
#[derive(Clone, Debug)]
pub struct HttpSink {
    client: Client<HttpConnector, Full<Bytes>>,
    base: String,
    key: String,
    timeout: Duration,
}

/// Retries failed sink requests with exponential backoff.
#[derive(Clone, Debug)]
pub struct Retry<S> {
    inner: S,
    policy: RetryPolicy,
    metrics: SinkMetrics,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// The total number of attempts, including the first.
    pub attempts: u32,

    /// The delay before the first retry. Doubles on every retry.
    pub backoff: Duration,
}

// === impl HttpSink ===

impl HttpSink {
    pub fn new(base: impl Into<String>, key: impl Into<String>, timeout: Duration) -> Self {
        let base = base.into().trim_end_matches('/').to_string();
        Self {
            client: Client::builder(TokioExecutor::new()).build_http(),
            base,
            key: key.into(),
            timeout,
        }
    }

    async fn send(&self, method: Method, path: &str, body: Bytes) -> Result<(), SinkError> {
        let req = Request::builder()
            .method(method)
            .uri(format!("{}{path}", self.base))
            .header(KEY_HEADER, &self.key)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Full::new(body))
            .map_err(|e| SinkError::Transport(e.into()))?;

        let rsp = time::timeout(self.timeout, self.client.request(req))
            .await
            .map_err(|_| SinkError::Timeout(self.timeout))?
            .map_err(|e| SinkError::Transport(e.into()))?;
        let status = rsp.status();
        if status.is_success() {
            return Ok(());
        }

        let body = match time::timeout(self.timeout, rsp.into_body().collect()).await {
            Ok(Ok(body)) => String::from_utf8_lossy(&body.to_bytes()).into_owned(),
            _ => String::new(),
        };
        Err(SinkError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait::async_trait]
impl ConfigSink for HttpSink {
    async fn apply(&self, farms: &FarmSet) -> Result<(), SinkError> {
        let body = farms.to_json().map_err(|e| SinkError::Transport(e.into()))?;
        self.send(Method::POST, "/farms", Bytes::from(body)).await
    }

    async fn delete_farm(&self, farm: &FarmName) -> Result<(), SinkError> {
        let rsp = self
            .send(Method::DELETE, &format!("/farms/{farm}"), Bytes::new())
            .await;
        absent_ok(rsp)
    }

    async fn delete_backend(&self, farm: &FarmName, backend: &str) -> Result<(), SinkError> {
        let rsp = self
            .send(
                Method::DELETE,
                &format!("/farms/{farm}/backends/{backend}"),
                Bytes::new(),
            )
            .await;
        absent_ok(rsp)
    }
}

/// Deleting something the load balancer does not know is not a failure.
fn absent_ok(rsp: Result<(), SinkError>) -> Result<(), SinkError> {
    match rsp {
        Err(SinkError::Status { status, .. }) if status == StatusCode::NOT_FOUND.as_u16() => {
            Ok(())
        }
        rsp => rsp,
    }
}

// === impl Retry ===

impl<S: ConfigSink> Retry<S> {
    pub fn new(inner: S, policy: RetryPolicy, metrics: SinkMetrics) -> Self {
        Self {
            inner,
            policy,
            metrics,
        }
    }

    async fn call<F, Fut>(&self, op: SinkOp, target: &str, call: F) -> Result<(), SinkError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<(), SinkError>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            self.metrics.request(op);
            match call().await {
                Ok(()) => return Ok(()),
                Err(error) if error.is_retryable() && attempt < self.policy.attempts => {
                    let backoff = self.policy.backoff(attempt);
                    tracing::debug!(%op, %target, attempt, ?backoff, %error, "Retrying load balancer request");
                    time::sleep(backoff).await;
                }
                Err(error) => {
                    self.metrics.failure(op);
                    return Err(error);
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl<S: ConfigSink> ConfigSink for Retry<S> {
    async fn apply(&self, farms: &FarmSet) -> Result<(), SinkError> {
        let target = farms
            .names()
            .map(FarmName::as_str)
            .collect::<Vec<_>>()
            .join(",");
        let rsp = self
            .call(SinkOp::Apply, &target, || self.inner.apply(farms))
            .await;
        if let Err(error) = &rsp {
            let payload = farms.to_json().unwrap_or_default();
            tracing::warn!(%error, %payload, "Failed to apply farms");
        }
        rsp
    }

    async fn delete_farm(&self, farm: &FarmName) -> Result<(), SinkError> {
        self.call(SinkOp::DeleteFarm, farm.as_str(), || {
            self.inner.delete_farm(farm)
        })
        .await
    }

    async fn delete_backend(&self, farm: &FarmName, backend: &str) -> Result<(), SinkError> {
        let target = format!("{farm}/{backend}");
        self.call(SinkOp::DeleteBackend, &target, || {
            self.inner.delete_backend(farm, backend)
        })
        .await
    }
}

// === impl RetryPolicy ===

impl RetryPolicy {
    /// The delay after the given (1-based) failed attempt.
    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.backoff.saturating_mul(factor).min(MAX_BACKOFF)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_millis(100),
        }
    }
}
